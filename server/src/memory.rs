//! In-memory adapters.
//!
//! Used when no database is configured, and by the tests.

use std::collections::BTreeMap;

use async_trait::async_trait;
use dashmap::DashMap;
use shelfsync_engine::{BookRecord, CURRENT_SCHEMA_VERSION};
use tokio::sync::RwLock;

use crate::ports::{BookStore, CheckpointStore, StoreError, Transport, TransportError};
use crate::session::Checkpoint;

fn stored_size(record: &BookRecord) -> u64 {
    serde_json::to_vec(record).map(|b| b.len() as u64).unwrap_or(0)
}

/// A library held in a sorted map.
#[derive(Debug)]
pub struct InMemoryBookStore {
    store_id: String,
    schema_version: String,
    records: RwLock<BTreeMap<String, BookRecord>>,
    /// Byte quota over the serialized records
    quota: Option<u64>,
}

impl InMemoryBookStore {
    pub fn new(store_id: impl Into<String>) -> Self {
        Self {
            store_id: store_id.into(),
            schema_version: CURRENT_SCHEMA_VERSION.to_string(),
            records: RwLock::new(BTreeMap::new()),
            quota: None,
        }
    }

    /// Seed the store. A later record with a repeated id replaces the earlier.
    pub fn with_records(self, records: impl IntoIterator<Item = BookRecord>) -> Self {
        let seeded = records.into_iter().map(|r| (r.id.clone(), r)).collect();
        Self {
            records: RwLock::new(seeded),
            ..self
        }
    }

    pub fn with_schema_version(mut self, version: impl Into<String>) -> Self {
        self.schema_version = version.into();
        self
    }

    pub fn with_quota_bytes(mut self, quota: u64) -> Self {
        self.quota = Some(quota);
        self
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl BookStore for InMemoryBookStore {
    fn store_id(&self) -> &str {
        &self.store_id
    }

    async fn schema_version(&self) -> Result<String, StoreError> {
        Ok(self.schema_version.clone())
    }

    async fn get(&self, id: &str) -> Result<Option<BookRecord>, StoreError> {
        Ok(self.records.read().await.get(id).cloned())
    }

    async fn list(&self) -> Result<Vec<BookRecord>, StoreError> {
        Ok(self.records.read().await.values().cloned().collect())
    }

    async fn put(&self, record: &BookRecord) -> Result<(), StoreError> {
        let mut records = self.records.write().await;

        if let Some(limit) = self.quota {
            let used: u64 = records.values().map(stored_size).sum();
            let replaced = records.get(&record.id).map(stored_size).unwrap_or(0);
            let requested = stored_size(record);
            if used - replaced + requested > limit {
                return Err(StoreError::QuotaExceeded {
                    used,
                    limit,
                    requested,
                });
            }
        }

        records.insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<(), StoreError> {
        self.records.write().await.remove(id);
        Ok(())
    }
}

/// Transport that hands payloads over through a shared map.
///
/// Reading a channel consumes it.
#[derive(Debug, Default)]
pub struct InMemoryTransport {
    channels: DashMap<String, Vec<u8>>,
}

impl InMemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Transport for InMemoryTransport {
    async fn write_bytes(&self, channel: &str, bytes: &[u8]) -> Result<(), TransportError> {
        self.channels.insert(channel.to_string(), bytes.to_vec());
        Ok(())
    }

    async fn read_bytes(&self, channel: &str) -> Result<Vec<u8>, TransportError> {
        self.channels
            .remove(channel)
            .map(|(_, bytes)| bytes)
            .ok_or_else(|| TransportError::Network(format!("nothing sent on channel {channel}")))
    }
}

#[derive(Debug, Default)]
pub struct InMemoryCheckpointStore {
    checkpoints: DashMap<String, Checkpoint>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn save(&self, checkpoint: &Checkpoint) -> Result<(), StoreError> {
        self.checkpoints
            .insert(checkpoint.target_store_id.clone(), checkpoint.clone());
        Ok(())
    }

    async fn load(&self, target_store_id: &str) -> Result<Option<Checkpoint>, StoreError> {
        Ok(self.checkpoints.get(target_store_id).map(|c| c.clone()))
    }

    async fn clear(&self, target_store_id: &str) -> Result<(), StoreError> {
        self.checkpoints.remove(target_store_id);
        Ok(())
    }
}
