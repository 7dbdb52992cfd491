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
    // One row per job run
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS job_results (
            id UUID PRIMARY KEY,
            class_path TEXT NOT NULL,
            job_name VARCHAR(255) NOT NULL,
            username VARCHAR(255),
            status VARCHAR(20) NOT NULL,
            task_queue VARCHAR(255) NOT NULL,
            dryrun BOOLEAN NOT NULL DEFAULT FALSE,
            task_kwargs JSONB,
            created_at TIMESTAMPTZ NOT NULL,
            started_at TIMESTAMPTZ,
            completed_at TIMESTAMPTZ,
            worker_id VARCHAR(255),
            return_value JSONB,
            error JSONB,
            approval_state VARCHAR(20) NOT NULL DEFAULT 'none',
            approved_by VARCHAR(255)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Execution requests; a result is claimable once its payload is released
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS job_payloads (
            job_result_id UUID PRIMARY KEY REFERENCES job_results(id) ON DELETE CASCADE,
            task VARCHAR(255) NOT NULL,
            queue VARCHAR(255) NOT NULL,
            payload JSONB NOT NULL,
            held BOOLEAN NOT NULL DEFAULT FALSE,
            claimed_by VARCHAR(255),
            claimed_at TIMESTAMPTZ
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS job_logs (
            id BIGSERIAL PRIMARY KEY,
            job_result_id UUID NOT NULL REFERENCES job_results(id) ON DELETE CASCADE,
            seq BIGINT NOT NULL,
            timestamp TIMESTAMPTZ NOT NULL,
            level VARCHAR(20) NOT NULL,
            grouping VARCHAR(255) NOT NULL,
            object JSONB,
            message TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS workers (
            id VARCHAR(255) PRIMARY KEY,
            queues TEXT[] NOT NULL DEFAULT '{}',
            registered_at TIMESTAMPTZ NOT NULL,
            last_heartbeat_at TIMESTAMPTZ NOT NULL,
            status VARCHAR(20) NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS singleton_locks (
            key TEXT PRIMARY KEY,
            owner VARCHAR(255) NOT NULL,
            acquired_at TIMESTAMPTZ NOT NULL,
            expires_at TIMESTAMPTZ NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS job_hooks (
            id UUID PRIMARY KEY,
            name VARCHAR(255) NOT NULL UNIQUE,
            class_path TEXT NOT NULL,
            content_types TEXT[] NOT NULL DEFAULT '{}',
            actions JSONB NOT NULL DEFAULT '[]',
            enabled BOOLEAN NOT NULL DEFAULT TRUE
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS job_buttons (
            id UUID PRIMARY KEY,
            name VARCHAR(255) NOT NULL UNIQUE,
            class_path TEXT NOT NULL,
            content_types TEXT[] NOT NULL DEFAULT '{}',
            enabled BOOLEAN NOT NULL DEFAULT TRUE
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create indexes for better query performance
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_job_results_status ON job_results(status)")
        .execute(pool)
        .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_job_results_created_at ON job_results(created_at DESC)",
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_job_payloads_queue ON job_payloads(queue)")
        .execute(pool)
        .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_job_logs_result ON job_logs(job_result_id, seq)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_workers_last_heartbeat ON workers(last_heartbeat_at)",
    )
    .execute(pool)
    .await?;

    tracing::info!("Database migrations completed successfully");
    Ok(())
}
