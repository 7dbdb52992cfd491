//! Job data in Postgres
//!
//! Every job run gets one database transaction; keys map to JSONB documents
//! in `job_data_objects`.

use async_trait::async_trait;
use serde_json::Value;
use sluice_jobs::engine::{DataStore, DataTransaction, StoreError};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, Transaction};
use std::time::Duration;

fn backend(err: sqlx::Error) -> StoreError {
    StoreError::Backend(err.to_string())
}

pub struct PgDataStore {
    pool: PgPool,
}

impl PgDataStore {
    /// Connect and make sure the data table exists
    pub async fn connect(database_url: &str) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .acquire_timeout(Duration::from_secs(5))
            .connect(database_url)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS job_data_objects (
                key TEXT PRIMARY KEY,
                value JSONB NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )
            "#,
        )
        .execute(&pool)
        .await?;

        Ok(Self { pool })
    }
}

#[async_trait]
impl DataStore for PgDataStore {
    async fn begin(&self) -> Result<Box<dyn DataTransaction>, StoreError> {
        let tx = self.pool.begin().await.map_err(backend)?;
        Ok(Box::new(PgDataTransaction { tx }))
    }
}

struct PgDataTransaction {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl DataTransaction for PgDataTransaction {
    async fn get(&mut self, key: &str) -> Result<Option<Value>, StoreError> {
        sqlx::query_scalar::<_, Value>("SELECT value FROM job_data_objects WHERE key = $1")
            .bind(key)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(backend)
    }

    async fn put(&mut self, key: &str, value: Value) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO job_data_objects (key, value, updated_at)
            VALUES ($1, $2, now())
            ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value, updated_at = now()
            "#,
        )
        .bind(key)
        .bind(value)
        .execute(&mut *self.tx)
        .await
        .map_err(backend)?;
        Ok(())
    }

    async fn delete(&mut self, key: &str) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM job_data_objects WHERE key = $1")
            .bind(key)
            .execute(&mut *self.tx)
            .await
            .map_err(backend)?;
        Ok(result.rows_affected() > 0)
    }

    async fn keys(&mut self, prefix: &str) -> Result<Vec<String>, StoreError> {
        sqlx::query_scalar::<_, String>(
            "SELECT key FROM job_data_objects WHERE starts_with(key, $1) ORDER BY key",
        )
        .bind(prefix)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(backend)
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.commit().await.map_err(backend)
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.rollback().await.map_err(backend)
    }
}
