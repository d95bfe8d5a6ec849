use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use uuid::Uuid;

use crate::config::DatabaseConfig;
use crate::error::{EnvelopeError, Result};
use crate::storage::{EncryptedRecord, RecordStore};

/// PostgreSQL record storage
/// - Only ciphertext is stored, as base64 text
/// - Records are insert-only; ids are never reused
pub struct PostgresRecordStore {
    pool: PgPool,
}

impl PostgresRecordStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Open a pool from configuration and make sure the schema exists
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let options = config.connect_options()?;
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(options)
            .await
            .map_err(|e| {
                EnvelopeError::Connection(format!("Failed to connect to database: {}", e))
            })?;

        let store = Self::new(pool);
        store
            .ensure_schema()
            .await
            .map_err(|e| EnvelopeError::Connection(e.to_string()))?;
        Ok(store)
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create the `phone_numbers` table if it is missing
    pub async fn ensure_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS phone_numbers (
                id UUID PRIMARY KEY,
                encrypted_data TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL
            )
            "#
        )
        .execute(&self.pool)
        .await
        .map_err(|e| EnvelopeError::Storage(format!("Failed to migrate schema: {}", e)))?;

        Ok(())
    }
}

fn record_from_row(r: &PgRow) -> EncryptedRecord {
    EncryptedRecord {
        id: r.get("id"),
        encrypted_data: r.get("encrypted_data"),
        created_at: r.get("created_at"),
        updated_at: r.get("updated_at"),
    }
}

#[async_trait]
impl RecordStore for PostgresRecordStore {
    async fn create(&self, encrypted_data: String) -> Result<EncryptedRecord> {
        let record = EncryptedRecord::new(encrypted_data);

        sqlx::query(
            r#"
            INSERT INTO phone_numbers (id, encrypted_data, created_at, updated_at)
            VALUES ($1, $2, $3, $4)
            "#
        )
        .bind(record.id)
        .bind(&record.encrypted_data)
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| EnvelopeError::Storage(format!("Failed to save phone number: {}", e)))?;

        Ok(record)
    }

    async fn get_by_id(&self, id: &Uuid) -> Result<Option<EncryptedRecord>> {
        let row = sqlx::query(
            r#"
            SELECT id, encrypted_data, created_at, updated_at
            FROM phone_numbers
            WHERE id = $1
            "#
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| EnvelopeError::Storage(format!("Failed to get phone number: {}", e)))?;

        Ok(row.as_ref().map(record_from_row))
    }
}
