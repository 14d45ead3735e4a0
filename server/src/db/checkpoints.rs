//! PostgreSQL-backed checkpoint storage.

use async_trait::async_trait;
use sqlx::{PgPool, Row};

use crate::ports::{CheckpointStore, StoreError};
use crate::session::Checkpoint;

#[derive(Debug, Clone)]
pub struct PgCheckpointStore {
    pool: PgPool,
}

impl PgCheckpointStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CheckpointStore for PgCheckpointStore {
    async fn save(&self, checkpoint: &Checkpoint) -> Result<(), StoreError> {
        let value = serde_json::to_value(checkpoint)
            .map_err(|e| StoreError::Backend(format!("cannot encode checkpoint: {}", e)))?;

        sqlx::query(
            r#"
            INSERT INTO sync_checkpoints (target_store_id, checkpoint, saved_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (target_store_id) DO UPDATE SET
                checkpoint = EXCLUDED.checkpoint,
                saved_at = EXCLUDED.saved_at
            "#,
        )
        .bind(&checkpoint.target_store_id)
        .bind(value)
        .bind(checkpoint.saved_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn load(&self, target_store_id: &str) -> Result<Option<Checkpoint>, StoreError> {
        let row = sqlx::query("SELECT checkpoint FROM sync_checkpoints WHERE target_store_id = $1")
            .bind(target_store_id)
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let value: serde_json::Value = row.try_get("checkpoint")?;
        serde_json::from_value(value)
            .map(Some)
            .map_err(|e| StoreError::Backend(format!("corrupt checkpoint for {target_store_id}: {e}")))
    }

    async fn clear(&self, target_store_id: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM sync_checkpoints WHERE target_store_id = $1")
            .bind(target_store_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
