//! Product setup types
//!
//! A product is the external scanner tool a job is executed against. Its setup
//! is loaded from the server configuration file at startup.

use serde::{Deserialize, Serialize};

/// Server configuration file content
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfiguration {
    pub server_id: String,
    #[serde(default)]
    pub products: Vec<ProductSetup>,
}

/// Setup of a single product
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductSetup {
    pub id: String,
    /// Launcher script or binary started for every job of this product
    pub path: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Inherited environment variables the product may see. Entries are exact
    /// names or prefixes ending with `*`.
    #[serde(default)]
    pub env_whitelist: Vec<String>,
    #[serde(default)]
    pub parameters: ProductParameters,
}

impl ProductSetup {
    /// All declared parameter definitions, mandatory first
    pub fn parameter_definitions(&self) -> impl Iterator<Item = &ParameterDefinition> {
        self.parameters
            .mandatory
            .iter()
            .chain(self.parameters.optional.iter())
    }

    pub fn declares_parameter(&self, key: &str) -> bool {
        self.parameter_definitions().any(|def| def.key == key)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProductParameters {
    #[serde(default)]
    pub mandatory: Vec<ParameterDefinition>,
    #[serde(default)]
    pub optional: Vec<ParameterDefinition>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParameterDefinition {
    pub key: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, rename = "default")]
    pub default_value: Option<String>,
}

impl ParameterDefinition {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            ..Default::default()
        }
    }

    pub fn with_default(mut self, default_value: impl Into<String>) -> Self {
        self.default_value = Some(default_value.into());
        self
    }
}
