use sqlx::{PgPool, postgres::PgPoolOptions};
use std::time::Duration;

pub async fn create_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(5))
        .connect(database_url)
        .await
}

pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
    // Create job table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS scan_job (
            uuid UUID PRIMARY KEY,
            server_id VARCHAR(255) NOT NULL,
            owner VARCHAR(255) NOT NULL,
            state VARCHAR(30) NOT NULL,
            created TIMESTAMPTZ NOT NULL,
            started TIMESTAMPTZ,
            ended TIMESTAMPTZ,
            configuration TEXT NOT NULL,
            result TEXT,
            output_stream_text TEXT,
            error_stream_text TEXT,
            meta_data TEXT,
            messages TEXT,
            last_stream_text_refresh_request TIMESTAMPTZ,
            last_stream_text_update TIMESTAMPTZ,
            encryption_pool_id BIGINT NOT NULL DEFAULT 0,
            version INTEGER NOT NULL DEFAULT 0
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Ready-job claiming filters by server and state, ordered by creation
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_scan_job_server_state ON scan_job(server_id, state, created)",
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_scan_job_state ON scan_job(state)")
        .execute(pool)
        .await?;

    tracing::info!("Database migrations completed successfully");
    Ok(())
}
