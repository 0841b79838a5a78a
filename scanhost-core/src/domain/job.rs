//! Job domain types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

/// Persisted job row
///
/// Owned by the persistence layer. The engine reads the configuration and
/// writes back state, result, stream data and timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub server_id: String,
    pub owner: String,
    pub state: JobState,
    pub created: DateTime<Utc>,
    pub started: Option<DateTime<Utc>>,
    pub ended: Option<DateTime<Utc>>,
    /// Job configuration as JSON text
    pub configuration: String,
    pub result: Option<String>,
    pub output_stream_text: Option<String>,
    pub error_stream_text: Option<String>,
    pub meta_data: Option<String>,
    /// Product messages as JSON array text
    pub messages: Option<String>,
    pub last_stream_text_refresh_request: Option<DateTime<Utc>>,
    pub last_stream_text_update: Option<DateTime<Utc>>,
    pub encryption_pool_id: i64,
    /// Optimistic locking version, bumped on every successful save
    pub version: i32,
}

impl Job {
    /// Creates a job in state CREATED for the given configuration
    pub fn new(server_id: &str, owner: &str, configuration: &JobConfiguration) -> Self {
        Self {
            id: Uuid::new_v4(),
            server_id: server_id.to_string(),
            owner: owner.to_string(),
            state: JobState::Created,
            created: Utc::now(),
            started: None,
            ended: None,
            configuration: configuration.to_json(),
            result: None,
            output_stream_text: None,
            error_stream_text: None,
            meta_data: None,
            messages: None,
            last_stream_text_refresh_request: None,
            last_stream_text_update: None,
            encryption_pool_id: 0,
            version: 0,
        }
    }
}

/// Job lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    Created,
    ReadyToStart,
    Queued,
    Running,
    CancelRequested,
    Canceled,
    Done,
    Failed,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Created => "CREATED",
            JobState::ReadyToStart => "READY_TO_START",
            JobState::Queued => "QUEUED",
            JobState::Running => "RUNNING",
            JobState::CancelRequested => "CANCEL_REQUESTED",
            JobState::Canceled => "CANCELED",
            JobState::Done => "DONE",
            JobState::Failed => "FAILED",
        }
    }

    /// Terminal states are never left again by the engine
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Canceled | JobState::Done | JobState::Failed)
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CREATED" => Ok(JobState::Created),
            "READY_TO_START" => Ok(JobState::ReadyToStart),
            "QUEUED" => Ok(JobState::Queued),
            "RUNNING" => Ok(JobState::Running),
            "CANCEL_REQUESTED" => Ok(JobState::CancelRequested),
            "CANCELED" => Ok(JobState::Canceled),
            "DONE" => Ok(JobState::Done),
            "FAILED" => Ok(JobState::Failed),
            other => Err(format!("unknown job state: {}", other)),
        }
    }
}

/// Configuration of a job, as submitted by the originating system
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobConfiguration {
    pub product_id: String,
    /// Job identifier inside the originating (orchestrating) system
    #[serde(default)]
    pub origin_job_uuid: Option<Uuid>,
    #[serde(default)]
    pub parameters: Vec<ParameterEntry>,
}

impl JobConfiguration {
    pub fn new(product_id: impl Into<String>) -> Self {
        Self {
            product_id: product_id.into(),
            origin_job_uuid: None,
            parameters: Vec::new(),
        }
    }

    /// Adds a parameter entry (builder style)
    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.push(ParameterEntry {
            key: key.into(),
            value: Some(value.into()),
        });
        self
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn to_json(&self) -> String {
        // a struct of strings and vectors always serializes
        serde_json::to_string(self).unwrap_or_default()
    }

    /// Returns the value of the first entry with the given key
    pub fn parameter(&self, key: &str) -> Option<&str> {
        self.parameters
            .iter()
            .find(|entry| entry.key == key)
            .and_then(|entry| entry.value.as_deref())
    }

    /// Returns true when the parameter is present, regardless of its value
    pub fn has_parameter(&self, key: &str) -> bool {
        self.parameters.iter().any(|entry| entry.key == key)
    }

    /// Parses the parameter value, `None` when absent or not parseable
    pub fn parameter_as<T: FromStr>(&self, key: &str) -> Option<T> {
        self.parameter(key).and_then(|v| v.trim().parse::<T>().ok())
    }

    /// True only when the parameter is set to "true" (case insensitive)
    pub fn is_enabled(&self, key: &str) -> bool {
        self.parameter(key)
            .map(|v| v.trim().eq_ignore_ascii_case("true"))
            .unwrap_or(false)
    }
}

/// Single key/value job parameter. The value may be missing (JSON null).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterEntry {
    pub key: String,
    #[serde(default)]
    pub value: Option<String>,
}

/// Configuration data loaded for an execution
#[derive(Debug, Clone)]
pub struct JobConfigurationData {
    pub configuration: JobConfiguration,
    pub meta_data: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_state_round_trips_through_str() {
        for state in [
            JobState::Created,
            JobState::ReadyToStart,
            JobState::Queued,
            JobState::Running,
            JobState::CancelRequested,
            JobState::Canceled,
            JobState::Done,
            JobState::Failed,
        ] {
            assert_eq!(state.as_str().parse::<JobState>(), Ok(state));
        }
        assert!("RUNNIN".parse::<JobState>().is_err());
    }

    #[test]
    fn test_configuration_parses_null_parameter_values() {
        let json = r#"{
            "productId": "scanner-a",
            "originJobUuid": "6c5a7b3e-1a1b-4f4e-9d5c-3b2a1c0d9e8f",
            "parameters": [
                {"key": "p1.keya", "value": "value1"},
                {"key": "p1.keyb", "value": null}
            ]
        }"#;

        let config = JobConfiguration::from_json(json).unwrap();

        assert_eq!(config.product_id, "scanner-a");
        assert!(config.origin_job_uuid.is_some());
        assert_eq!(config.parameter("p1.keya"), Some("value1"));
        assert_eq!(config.parameter("p1.keyb"), None);
        assert!(config.has_parameter("p1.keyb"));
    }

    #[test]
    fn test_parameter_helpers() {
        let config = JobConfiguration::new("p")
            .with_parameter("flag", "TRUE")
            .with_parameter("minutes", " 5 ")
            .with_parameter("broken", "five");

        assert!(config.is_enabled("flag"));
        assert!(!config.is_enabled("missing"));
        assert_eq!(config.parameter_as::<i64>("minutes"), Some(5));
        assert_eq!(config.parameter_as::<i64>("broken"), None);
    }

    #[test]
    fn test_terminal_states() {
        assert!(JobState::Done.is_terminal());
        assert!(JobState::Failed.is_terminal());
        assert!(JobState::Canceled.is_terminal());
        assert!(!JobState::Running.is_terminal());
        assert!(!JobState::CancelRequested.is_terminal());
    }
}
