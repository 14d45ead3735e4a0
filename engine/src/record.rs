//! Book record types.

use crate::{version::CURRENT_SCHEMA_VERSION, BookId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};

/// Reading status of a book.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReadingStatus {
    #[default]
    Unread,
    Reading,
    Completed,
    OnHold,
}

impl ReadingStatus {
    pub const ALL: [ReadingStatus; 4] = [
        ReadingStatus::Unread,
        ReadingStatus::Reading,
        ReadingStatus::Completed,
        ReadingStatus::OnHold,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ReadingStatus::Unread => "UNREAD",
            ReadingStatus::Reading => "READING",
            ReadingStatus::Completed => "COMPLETED",
            ReadingStatus::OnHold => "ON_HOLD",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|status| status.as_str() == s)
    }
}

impl std::fmt::Display for ReadingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One library entry.
///
/// `last_modified` and `schema_version` are kept as the strings that travel on
/// the wire; [`crate::schema::validate`] checks that they parse.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookRecord {
    /// Identifier, unique within one store
    pub id: BookId,
    /// Content-derived fingerprint, stable across devices
    pub cross_device_id: String,
    pub title: String,
    pub author: String,
    /// Other descriptive fields (publisher, isbn, ...), opaque to the engine
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    /// Reading progress in percent, 0..=100
    pub progress: u8,
    pub status: ReadingStatus,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub notes: String,
    /// ISO-8601 timestamp of the last local edit
    pub last_modified: String,
    /// Semantic version of the record shape
    pub schema_version: String,
}

impl BookRecord {
    /// Create a record at the current schema version. The cross-device id is
    /// derived from title and author.
    pub fn new(
        id: impl Into<BookId>,
        title: impl Into<String>,
        author: impl Into<String>,
        last_modified: impl Into<String>,
    ) -> Self {
        let title = title.into();
        let author = author.into();
        Self {
            id: id.into(),
            cross_device_id: fingerprint(&title, &author),
            title,
            author,
            metadata: BTreeMap::new(),
            progress: 0,
            status: ReadingStatus::Unread,
            tags: BTreeSet::new(),
            notes: String::new(),
            last_modified: last_modified.into(),
            schema_version: CURRENT_SCHEMA_VERSION.to_string(),
        }
    }

    pub fn with_progress(mut self, progress: u8) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_status(mut self, status: ReadingStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = notes.into();
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn with_cross_device_id(mut self, cross_device_id: impl Into<String>) -> Self {
        self.cross_device_id = cross_device_id.into();
        self
    }

    /// JSON form of the record, identical to its serde serialization.
    ///
    /// Built with `json!` so producing it cannot fail.
    pub fn to_json(&self) -> Value {
        json!({
            "id": self.id,
            "crossDeviceId": self.cross_device_id,
            "title": self.title,
            "author": self.author,
            "metadata": self.metadata,
            "progress": self.progress,
            "status": self.status.as_str(),
            "tags": self.tags,
            "notes": self.notes,
            "lastModified": self.last_modified,
            "schemaVersion": self.schema_version,
        })
    }
}

/// Derive the cross-device fingerprint for a work.
///
/// Case and whitespace differences between devices do not change the result.
pub fn fingerprint(title: &str, author: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalize(title).as_bytes());
    hasher.update([0x1f]);
    hasher.update(normalize(author).as_bytes());
    let mut digest = format!("{:x}", hasher.finalize());
    digest.truncate(32);
    digest
}

fn normalize(s: &str) -> String {
    s.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

/// A record that passed schema validation.
///
/// Only [`crate::schema`] constructs these, so holding one proves the record is
/// well-formed at the validator's target version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedRecord {
    record: BookRecord,
    modified: DateTime<Utc>,
}

impl ValidatedRecord {
    pub(crate) fn new(record: BookRecord, modified: DateTime<Utc>) -> Self {
        Self { record, modified }
    }

    pub fn record(&self) -> &BookRecord {
        &self.record
    }

    pub fn id(&self) -> &str {
        &self.record.id
    }

    /// Parsed `lastModified`.
    pub fn modified(&self) -> DateTime<Utc> {
        self.modified
    }

    pub fn into_record(self) -> BookRecord {
        self.record
    }
}
