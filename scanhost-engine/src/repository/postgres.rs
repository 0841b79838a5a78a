//! PostgreSQL job repository
//!
//! Handles all database operations on the `scan_job` table.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use scanhost_core::domain::job::{Job, JobState};
use sqlx::PgPool;
use uuid::Uuid;

use super::{JobRepository, RepositoryError};

const SELECT_COLUMNS: &str = r#"
    SELECT uuid, server_id, owner, state, created, started, ended, configuration,
           result, output_stream_text, error_stream_text, meta_data, messages,
           last_stream_text_refresh_request, last_stream_text_update,
           encryption_pool_id, version
    FROM scan_job
"#;

/// sqlx implementation of JobRepository
pub struct PgJobRepository {
    pool: PgPool,
}

impl PgJobRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobRepository for PgJobRepository {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Job>, RepositoryError> {
        let row = sqlx::query_as::<_, JobRow>(&format!("{} WHERE uuid = $1", SELECT_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(Job::try_from).transpose()
    }

    async fn insert(&self, job: &Job) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO scan_job (uuid, server_id, owner, state, created, started, ended,
                configuration, result, output_stream_text, error_stream_text, meta_data,
                messages, last_stream_text_refresh_request, last_stream_text_update,
                encryption_pool_id, version)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
            "#,
        )
        .bind(job.id)
        .bind(&job.server_id)
        .bind(&job.owner)
        .bind(job.state.as_str())
        .bind(job.created)
        .bind(job.started)
        .bind(job.ended)
        .bind(&job.configuration)
        .bind(&job.result)
        .bind(&job.output_stream_text)
        .bind(&job.error_stream_text)
        .bind(&job.meta_data)
        .bind(&job.messages)
        .bind(job.last_stream_text_refresh_request)
        .bind(job.last_stream_text_update)
        .bind(job.encryption_pool_id)
        .bind(job.version)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn save(&self, job: &Job) -> Result<Job, RepositoryError> {
        let result = sqlx::query(
            r#"
            UPDATE scan_job
            SET state = $1, started = $2, ended = $3, result = $4,
                output_stream_text = $5, error_stream_text = $6, meta_data = $7,
                messages = $8, last_stream_text_refresh_request = $9,
                last_stream_text_update = $10, version = version + 1
            WHERE uuid = $11 AND version = $12
            "#,
        )
        .bind(job.state.as_str())
        .bind(job.started)
        .bind(job.ended)
        .bind(&job.result)
        .bind(&job.output_stream_text)
        .bind(&job.error_stream_text)
        .bind(&job.meta_data)
        .bind(&job.messages)
        .bind(job.last_stream_text_refresh_request)
        .bind(job.last_stream_text_update)
        .bind(job.id)
        .bind(job.version)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            let exists: Option<(Uuid,)> = sqlx::query_as("SELECT uuid FROM scan_job WHERE uuid = $1")
                .bind(job.id)
                .fetch_optional(&self.pool)
                .await?;

            return Err(match exists {
                Some(_) => RepositoryError::OptimisticLock {
                    id: job.id,
                    expected_version: job.version,
                },
                None => RepositoryError::NotFound(job.id),
            });
        }

        let mut saved = job.clone();
        saved.version += 1;
        Ok(saved)
    }

    async fn force_state_reset(
        &self,
        ids: &[Uuid],
        state: JobState,
    ) -> Result<u64, RepositoryError> {
        if ids.is_empty() {
            return Ok(0);
        }

        let result = sqlx::query(
            r#"
            UPDATE scan_job
            SET state = $1, version = version + 1
            WHERE uuid = ANY($2)
            "#,
        )
        .bind(state.as_str())
        .bind(ids)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn find_in_state(&self, state: JobState) -> Result<Vec<Job>, RepositoryError> {
        let rows = sqlx::query_as::<_, JobRow>(&format!(
            "{} WHERE state = $1 ORDER BY created ASC",
            SELECT_COLUMNS
        ))
        .bind(state.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Job::try_from).collect()
    }

    async fn claim_next_ready(&self, server_id: &str) -> Result<Option<Job>, RepositoryError> {
        // SKIP LOCKED lets several engine instances claim concurrently
        let row = sqlx::query_as::<_, JobRow>(
            r#"
            UPDATE scan_job
            SET state = $1, version = version + 1
            WHERE uuid = (
                SELECT uuid FROM scan_job
                WHERE server_id = $2 AND state = $3
                ORDER BY created ASC
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING uuid, server_id, owner, state, created, started, ended, configuration,
                      result, output_stream_text, error_stream_text, meta_data, messages,
                      last_stream_text_refresh_request, last_stream_text_update,
                      encryption_pool_id, version
            "#,
        )
        .bind(JobState::Queued.as_str())
        .bind(server_id)
        .bind(JobState::ReadyToStart.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Job::try_from).transpose()
    }
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct JobRow {
    uuid: Uuid,
    server_id: String,
    owner: String,
    state: String,
    created: DateTime<Utc>,
    started: Option<DateTime<Utc>>,
    ended: Option<DateTime<Utc>>,
    configuration: String,
    result: Option<String>,
    output_stream_text: Option<String>,
    error_stream_text: Option<String>,
    meta_data: Option<String>,
    messages: Option<String>,
    last_stream_text_refresh_request: Option<DateTime<Utc>>,
    last_stream_text_update: Option<DateTime<Utc>>,
    encryption_pool_id: i64,
    version: i32,
}

impl TryFrom<JobRow> for Job {
    type Error = RepositoryError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        let state = row
            .state
            .parse::<JobState>()
            .map_err(|message| RepositoryError::Serialization {
                id: row.uuid,
                message,
            })?;

        Ok(Job {
            id: row.uuid,
            server_id: row.server_id,
            owner: row.owner,
            state,
            created: row.created,
            started: row.started,
            ended: row.ended,
            configuration: row.configuration,
            result: row.result,
            output_stream_text: row.output_stream_text,
            error_stream_text: row.error_stream_text,
            meta_data: row.meta_data,
            messages: row.messages,
            last_stream_text_refresh_request: row.last_stream_text_refresh_request,
            last_stream_text_update: row.last_stream_text_update,
            encryption_pool_id: row.encryption_pool_id,
            version: row.version,
        })
    }
}
