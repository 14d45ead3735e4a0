//! Record schema and validation.
//!
//! Every record entering the engine passes through [`Validator::validate`].
//! Validation works on raw JSON so that malformed input from an import file or
//! a damaged store is reported field by field instead of failing to parse as a
//! whole. Records declaring an older minor version of the validator's major
//! are brought forward with the minor defaults from [`crate::version`] first.

use crate::{
    record::{BookRecord, ReadingStatus, ValidatedRecord},
    version::{self, is_supported, upgrade_path_between},
};
use chrono::{DateTime, Utc};
use semver::Version;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// What went wrong with a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SchemaErrorKind {
    MissingField,
    InvalidType,
    OutOfRange,
    BadTimestamp,
    UnsupportedVersion,
}

impl std::fmt::Display for SchemaErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SchemaErrorKind::MissingField => write!(f, "MISSING_FIELD"),
            SchemaErrorKind::InvalidType => write!(f, "INVALID_TYPE"),
            SchemaErrorKind::OutOfRange => write!(f, "OUT_OF_RANGE"),
            SchemaErrorKind::BadTimestamp => write!(f, "BAD_TIMESTAMP"),
            SchemaErrorKind::UnsupportedVersion => write!(f, "UNSUPPORTED_VERSION"),
        }
    }
}

/// A validation failure naming the offending field.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{kind} on field '{field}': {message}")]
#[serde(rename_all = "camelCase")]
pub struct SchemaError {
    pub kind: SchemaErrorKind,
    pub field: String,
    pub message: String,
}

impl SchemaError {
    pub fn new(kind: SchemaErrorKind, field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            field: field.into(),
            message: message.into(),
        }
    }

    fn missing(field: &str) -> Self {
        Self::new(SchemaErrorKind::MissingField, field, "field is required")
    }
}

/// Field types used by the record schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    /// Non-empty string
    Identifier,
    String,
    /// Integer in 0..=100
    Percent,
    /// ISO-8601 timestamp string
    Timestamp,
    /// One of the [`ReadingStatus`] names
    Status,
    /// Array of strings
    StringSet,
    /// Object whose values are strings
    StringMap,
}

impl std::fmt::Display for FieldType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FieldType::Identifier => write!(f, "Identifier"),
            FieldType::String => write!(f, "String"),
            FieldType::Percent => write!(f, "Percent"),
            FieldType::Timestamp => write!(f, "Timestamp"),
            FieldType::Status => write!(f, "Status"),
            FieldType::StringSet => write!(f, "StringSet"),
            FieldType::StringMap => write!(f, "StringMap"),
        }
    }
}

/// Definition of one record field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldDef {
    pub name: &'static str,
    pub field_type: FieldType,
}

impl FieldDef {
    const fn new(name: &'static str, field_type: FieldType) -> Self {
        Self { name, field_type }
    }

    /// Validate a JSON value against this field definition. Every field is
    /// required once minor defaults have been applied.
    pub fn validate(&self, value: Option<&Value>) -> Result<(), SchemaError> {
        match value {
            None | Some(Value::Null) => Err(SchemaError::missing(self.name)),
            Some(v) => self.validate_type(v),
        }
    }

    fn validate_type(&self, value: &Value) -> Result<(), SchemaError> {
        let mismatch = || {
            SchemaError::new(
                SchemaErrorKind::InvalidType,
                self.name,
                format!("expected {}, got {}", self.field_type, json_type_name(value)),
            )
        };

        match self.field_type {
            FieldType::Identifier => {
                let s = value.as_str().ok_or_else(mismatch)?;
                if s.trim().is_empty() {
                    return Err(SchemaError::missing(self.name));
                }
            }
            FieldType::String => {
                value.as_str().ok_or_else(mismatch)?;
            }
            FieldType::Percent => {
                if let Some(n) = value.as_i64() {
                    if !(0..=100).contains(&n) {
                        return Err(SchemaError::new(
                            SchemaErrorKind::OutOfRange,
                            self.name,
                            format!("must be between 0 and 100, got {n}"),
                        ));
                    }
                } else if value.is_u64() {
                    return Err(SchemaError::new(
                        SchemaErrorKind::OutOfRange,
                        self.name,
                        format!("must be between 0 and 100, got {value}"),
                    ));
                } else {
                    return Err(mismatch());
                }
            }
            FieldType::Timestamp => {
                let s = value.as_str().ok_or_else(mismatch)?;
                parse_timestamp(s).map_err(|reason| {
                    SchemaError::new(SchemaErrorKind::BadTimestamp, self.name, reason)
                })?;
            }
            FieldType::Status => {
                let s = value.as_str().ok_or_else(mismatch)?;
                if ReadingStatus::parse(s).is_none() {
                    return Err(SchemaError::new(
                        SchemaErrorKind::InvalidType,
                        self.name,
                        format!("unknown status '{s}'"),
                    ));
                }
            }
            FieldType::StringSet => {
                let items = value.as_array().ok_or_else(mismatch)?;
                if !items.iter().all(Value::is_string) {
                    return Err(SchemaError::new(
                        SchemaErrorKind::InvalidType,
                        self.name,
                        "every entry must be a string",
                    ));
                }
            }
            FieldType::StringMap => {
                let map = value.as_object().ok_or_else(mismatch)?;
                if !map.values().all(Value::is_string) {
                    return Err(SchemaError::new(
                        SchemaErrorKind::InvalidType,
                        self.name,
                        "every value must be a string",
                    ));
                }
            }
        }

        Ok(())
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "Null",
        Value::Bool(_) => "Bool",
        Value::Number(n) if n.is_i64() || n.is_u64() => "Int",
        Value::Number(_) => "Float",
        Value::String(_) => "String",
        Value::Array(_) => "Array",
        Value::Object(_) => "Object",
    }
}

/// Parse an ISO-8601 / RFC 3339 timestamp into UTC.
pub fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| format!("'{s}' is not an ISO-8601 timestamp: {e}"))
}

/// Fields of a record at the current major version.
pub const BOOK_FIELDS: [FieldDef; 11] = [
    FieldDef::new("id", FieldType::Identifier),
    FieldDef::new("crossDeviceId", FieldType::Identifier),
    FieldDef::new("title", FieldType::String),
    FieldDef::new("author", FieldType::String),
    FieldDef::new("metadata", FieldType::StringMap),
    FieldDef::new("progress", FieldType::Percent),
    FieldDef::new("status", FieldType::Status),
    FieldDef::new("tags", FieldType::StringSet),
    FieldDef::new("notes", FieldType::String),
    FieldDef::new("lastModified", FieldType::Timestamp),
    FieldDef::new("schemaVersion", FieldType::String),
];

/// An invalid record with the reason it was rejected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvalidRecord {
    /// Position in the input batch
    pub index: usize,
    /// The record id, when one could be read
    pub id: Option<String>,
    pub error: SchemaError,
}

/// Partition of a batch into valid and invalid records.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchValidation {
    pub valid: Vec<ValidatedRecord>,
    pub invalid: Vec<InvalidRecord>,
}

impl BatchValidation {
    pub fn is_clean(&self) -> bool {
        self.invalid.is_empty()
    }
}

/// Validates records against one target schema version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Validator {
    target: Version,
}

impl Default for Validator {
    fn default() -> Self {
        Self {
            target: version::current_version(),
        }
    }
}

impl Validator {
    /// Validator for the engine's current version.
    pub fn new() -> Self {
        Self::default()
    }

    /// Validator for another supported version.
    pub fn for_version(version: &str) -> crate::Result<Self> {
        let target = version::parse_version(version)?;
        if !is_supported(&target) {
            return Err(crate::Error::InvalidVersion {
                value: version.to_string(),
                reason: "version is not supported".to_string(),
            });
        }
        Ok(Self { target })
    }

    pub fn target(&self) -> &Version {
        &self.target
    }

    /// Validate one raw record.
    pub fn validate(&self, raw: &Value) -> Result<ValidatedRecord, SchemaError> {
        let obj = raw.as_object().ok_or_else(|| {
            SchemaError::new(
                SchemaErrorKind::InvalidType,
                "<record>",
                format!("record must be an object, got {}", json_type_name(raw)),
            )
        })?;

        let declared = match obj.get("schemaVersion") {
            None | Some(Value::Null) => return Err(SchemaError::missing("schemaVersion")),
            Some(Value::String(s)) => s.as_str(),
            Some(other) => {
                return Err(SchemaError::new(
                    SchemaErrorKind::InvalidType,
                    "schemaVersion",
                    format!("expected String, got {}", json_type_name(other)),
                ))
            }
        };
        let declared = self.check_version(declared)?;

        // Bring older minors of the same major forward.
        let upgraded;
        let obj = if declared < self.target {
            let path = upgrade_path_between(&declared, &self.target).map_err(|e| {
                SchemaError::new(SchemaErrorKind::UnsupportedVersion, "schemaVersion", e.to_string())
            })?;
            upgraded = path.apply(obj.clone());
            &upgraded
        } else {
            obj
        };

        for field in self.fields() {
            field.validate(obj.get(field.name))?;
        }

        let record: BookRecord = serde_json::from_value(Value::Object(obj.clone()))
            .map_err(|e| SchemaError::new(SchemaErrorKind::InvalidType, "<record>", e.to_string()))?;
        let modified = parse_timestamp(&record.last_modified)
            .map_err(|reason| SchemaError::new(SchemaErrorKind::BadTimestamp, "lastModified", reason))?;

        Ok(ValidatedRecord::new(record, modified))
    }

    /// Validate a typed record, e.g. one read back from a store.
    pub fn validate_record(&self, record: &BookRecord) -> Result<ValidatedRecord, SchemaError> {
        self.validate(&record.to_json())
    }

    /// Validate a batch. One malformed record never blocks the rest.
    pub fn validate_batch<'a, I>(&self, records: I) -> BatchValidation
    where
        I: IntoIterator<Item = &'a Value>,
    {
        let mut result = BatchValidation::default();
        for (index, raw) in records.into_iter().enumerate() {
            match self.validate(raw) {
                Ok(valid) => result.valid.push(valid),
                Err(error) => result.invalid.push(InvalidRecord {
                    index,
                    id: raw.get("id").and_then(Value::as_str).map(str::to_string),
                    error,
                }),
            }
        }
        result
    }

    /// Validate a batch of typed records.
    pub fn validate_records<'a, I>(&self, records: I) -> BatchValidation
    where
        I: IntoIterator<Item = &'a BookRecord>,
    {
        let raw: Vec<Value> = records.into_iter().map(BookRecord::to_json).collect();
        self.validate_batch(&raw)
    }

    /// Validate a JSON value holding a batch. `null` yields an empty batch.
    pub fn validate_json_batch(&self, batch: &Value) -> BatchValidation {
        match batch {
            Value::Null => BatchValidation::default(),
            Value::Array(items) => self.validate_batch(items),
            other => BatchValidation {
                valid: Vec::new(),
                invalid: vec![InvalidRecord {
                    index: 0,
                    id: None,
                    error: SchemaError::new(
                        SchemaErrorKind::InvalidType,
                        "<batch>",
                        format!("expected Array, got {}", json_type_name(other)),
                    ),
                }],
            },
        }
    }

    fn check_version(&self, declared: &str) -> Result<Version, SchemaError> {
        let unsupported =
            |msg: String| SchemaError::new(SchemaErrorKind::UnsupportedVersion, "schemaVersion", msg);

        let parsed = version::parse_version(declared).map_err(|e| unsupported(e.to_string()))?;
        if !is_supported(&parsed) {
            return Err(unsupported(format!("schema version {parsed} is not supported")));
        }
        if parsed.major != self.target.major {
            return Err(unsupported(format!(
                "schema version {parsed} needs migration to {}",
                self.target
            )));
        }
        if parsed > self.target {
            return Err(unsupported(format!(
                "schema version {parsed} is newer than {}",
                self.target
            )));
        }
        Ok(parsed)
    }

    fn fields(&self) -> impl Iterator<Item = &'static FieldDef> {
        // 1.x records have no metadata map.
        let major = self.target.major;
        BOOK_FIELDS
            .iter()
            .filter(move |f| major >= 2 || f.name != "metadata")
    }
}

/// Validate one raw record at the current version.
pub fn validate(raw: &Value) -> Result<ValidatedRecord, SchemaError> {
    Validator::new().validate(raw)
}

/// Validate a batch of raw records at the current version.
pub fn validate_batch<'a, I>(records: I) -> BatchValidation
where
    I: IntoIterator<Item = &'a Value>,
{
    Validator::new().validate_batch(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn valid_json() -> Value {
        json!({
            "id": "b-1",
            "crossDeviceId": "fp-1",
            "title": "Dune",
            "author": "Frank Herbert",
            "metadata": {"isbn": "9780441013593"},
            "progress": 42,
            "status": "READING",
            "tags": ["scifi"],
            "notes": "",
            "lastModified": "2024-03-01T10:00:00Z",
            "schemaVersion": "2.0.0",
        })
    }

    fn with(field: &str, value: Value) -> Value {
        let mut v = valid_json();
        v[field] = value;
        v
    }

    fn without(field: &str) -> Value {
        let mut v = valid_json();
        v.as_object_mut().unwrap().remove(field);
        v
    }

    #[test]
    fn validate_valid_record() {
        let record = validate(&valid_json()).unwrap();
        assert_eq!(record.id(), "b-1");
        assert_eq!(record.record().progress, 42);
        assert_eq!(record.record().status, ReadingStatus::Reading);
    }

    #[test]
    fn validate_missing_field() {
        let err = validate(&without("title")).unwrap_err();
        assert_eq!(err.kind, SchemaErrorKind::MissingField);
        assert_eq!(err.field, "title");

        let err = validate(&with("id", json!("  "))).unwrap_err();
        assert_eq!(err.kind, SchemaErrorKind::MissingField);
        assert_eq!(err.field, "id");
    }

    #[test]
    fn validate_wrong_type() {
        let err = validate(&with("progress", json!("forty"))).unwrap_err();
        assert_eq!(err.kind, SchemaErrorKind::InvalidType);
        assert_eq!(err.field, "progress");

        let err = validate(&with("tags", json!(["ok", 3]))).unwrap_err();
        assert_eq!(err.kind, SchemaErrorKind::InvalidType);
        assert_eq!(err.field, "tags");

        let err = validate(&with("status", json!("ABANDONED"))).unwrap_err();
        assert_eq!(err.kind, SchemaErrorKind::InvalidType);
        assert_eq!(err.field, "status");
    }

    #[test]
    fn validate_out_of_range() {
        for bad in [json!(101), json!(-1), json!(u64::MAX)] {
            let err = validate(&with("progress", bad)).unwrap_err();
            assert_eq!(err.kind, SchemaErrorKind::OutOfRange);
        }
        assert!(validate(&with("progress", json!(0))).is_ok());
        assert!(validate(&with("progress", json!(100))).is_ok());
    }

    #[test]
    fn validate_bad_timestamp() {
        let err = validate(&with("lastModified", json!("yesterday"))).unwrap_err();
        assert_eq!(err.kind, SchemaErrorKind::BadTimestamp);
        assert_eq!(err.field, "lastModified");
    }

    #[test]
    fn timestamp_offsets_normalize_to_utc() {
        let record = validate(&with("lastModified", json!("2024-03-01T12:00:00+02:00"))).unwrap();
        assert_eq!(record.modified(), parse_timestamp("2024-03-01T10:00:00Z").unwrap());
    }

    #[test]
    fn validate_unsupported_version() {
        let err = validate(&with("schemaVersion", json!("9.0.0"))).unwrap_err();
        assert_eq!(err.kind, SchemaErrorKind::UnsupportedVersion);

        let err = validate(&with("schemaVersion", json!("1.2.0"))).unwrap_err();
        assert_eq!(err.kind, SchemaErrorKind::UnsupportedVersion);
    }

    #[test]
    fn older_minor_gets_defaults() {
        let validator = Validator::for_version("1.2.0").unwrap();
        let old = json!({
            "id": "b-1",
            "crossDeviceId": "fp-1",
            "title": "Dune",
            "author": "Frank Herbert",
            "progress": 5,
            "status": "UNREAD",
            "lastModified": "2024-03-01T10:00:00Z",
            "schemaVersion": "1.0.0",
        });

        let record = validator.validate(&old).unwrap();
        assert!(record.record().tags.is_empty());
        assert_eq!(record.record().notes, "");
        assert_eq!(record.record().schema_version, "1.2.0");
    }

    #[test]
    fn non_object_record() {
        let err = validate(&json!([1, 2])).unwrap_err();
        assert_eq!(err.kind, SchemaErrorKind::InvalidType);
    }

    #[test]
    fn batch_partitions_instead_of_failing() {
        let batch = vec![valid_json(), with("progress", json!(300)), without("author")];
        let result = validate_batch(&batch);

        assert_eq!(result.valid.len(), 1);
        assert_eq!(result.invalid.len(), 2);
        assert_eq!(result.invalid[0].index, 1);
        assert_eq!(result.invalid[0].id.as_deref(), Some("b-1"));
        assert_eq!(result.invalid[1].error.field, "author");
    }

    #[test]
    fn null_and_empty_batches_are_valid() {
        let validator = Validator::new();
        let result = validator.validate_json_batch(&Value::Null);
        assert!(result.valid.is_empty() && result.is_clean());

        let result = validator.validate_json_batch(&json!([]));
        assert!(result.valid.is_empty() && result.is_clean());
    }

    #[test]
    fn typed_record_validation() {
        let record = BookRecord::new("b-1", "Dune", "Frank Herbert", "2024-01-01T00:00:00Z")
            .with_progress(120);
        let err = Validator::new().validate_record(&record).unwrap_err();
        assert_eq!(err.kind, SchemaErrorKind::OutOfRange);
    }
}
