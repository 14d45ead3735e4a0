//! PostgreSQL-backed book store.

use async_trait::async_trait;
use shelfsync_engine::{BookRecord, CURRENT_SCHEMA_VERSION};
use sqlx::{PgPool, Row};

use crate::ports::{BookStore, StoreError};

/// A stored book row from the database.
#[derive(Debug)]
pub struct StoredBook {
    pub store_id: String,
    pub id: String,
    pub record: serde_json::Value,
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for StoredBook {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(StoredBook {
            store_id: row.try_get("store_id")?,
            id: row.try_get("id")?,
            record: row.try_get("record")?,
        })
    }
}

impl StoredBook {
    /// Decode the JSON column into a record.
    pub fn to_record(&self) -> Result<BookRecord, StoreError> {
        serde_json::from_value(self.record.clone()).map_err(|e| {
            StoreError::Backend(format!(
                "corrupt row {}/{}: {}",
                self.store_id, self.id, e
            ))
        })
    }
}

/// One library kept in the `books` table, scoped by `store_id`.
#[derive(Debug, Clone)]
pub struct PgBookStore {
    pool: PgPool,
    store_id: String,
}

impl PgBookStore {
    /// Open a store, registering it at the current schema version on first
    /// use.
    pub async fn open(pool: PgPool, store_id: impl Into<String>) -> Result<Self, StoreError> {
        let store_id = store_id.into();
        sqlx::query(
            r#"
            INSERT INTO stores (store_id, schema_version)
            VALUES ($1, $2)
            ON CONFLICT (store_id) DO NOTHING
            "#,
        )
        .bind(&store_id)
        .bind(CURRENT_SCHEMA_VERSION)
        .execute(&pool)
        .await?;

        Ok(Self { pool, store_id })
    }
}

#[async_trait]
impl BookStore for PgBookStore {
    fn store_id(&self) -> &str {
        &self.store_id
    }

    async fn schema_version(&self) -> Result<String, StoreError> {
        let row = sqlx::query("SELECT schema_version FROM stores WHERE store_id = $1")
            .bind(&self.store_id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(row.try_get("schema_version")?),
            None => Err(StoreError::Unavailable(format!(
                "store {} is not registered",
                self.store_id
            ))),
        }
    }

    async fn get(&self, id: &str) -> Result<Option<BookRecord>, StoreError> {
        let row = sqlx::query_as::<_, StoredBook>(
            "SELECT store_id, id, record FROM books WHERE store_id = $1 AND id = $2",
        )
        .bind(&self.store_id)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(StoredBook::to_record).transpose()
    }

    async fn list(&self) -> Result<Vec<BookRecord>, StoreError> {
        let rows = sqlx::query_as::<_, StoredBook>(
            "SELECT store_id, id, record FROM books WHERE store_id = $1 ORDER BY id",
        )
        .bind(&self.store_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(StoredBook::to_record).collect()
    }

    async fn put(&self, record: &BookRecord) -> Result<(), StoreError> {
        let value = serde_json::to_value(record)
            .map_err(|e| StoreError::Backend(format!("cannot encode {}: {}", record.id, e)))?;

        sqlx::query(
            r#"
            INSERT INTO books (store_id, id, record, updated_at)
            VALUES ($1, $2, $3, NOW())
            ON CONFLICT (store_id, id) DO UPDATE SET
                record = EXCLUDED.record,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(&self.store_id)
        .bind(&record.id)
        .bind(value)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM books WHERE store_id = $1 AND id = $2")
            .bind(&self.store_id)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
