//! Export/import wire format.
//!
//! ```json
//! {
//!   "books": [ BookRecord, ... ],
//!   "metadata": {
//!     "checksum": "<hex>",
//!     "bookCount": 2,
//!     "schemaVersion": "2.0.0",
//!     "exportedAt": "2024-03-01T10:00:00Z"
//!   }
//! }
//! ```
//!
//! Books are written in id order. The checksum is computed with
//! [`crate::canonical::checksum`], so it does not depend on formatting.

use crate::{
    canonical::{checksum, checksum_values},
    error::{ErrorCode, Result},
    record::BookRecord,
    Error,
};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Metadata block of an export file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportMetadata {
    pub checksum: String,
    pub book_count: usize,
    pub schema_version: String,
    pub exported_at: String,
}

/// A complete export file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportFile {
    pub books: Vec<BookRecord>,
    pub metadata: ExportMetadata,
}

impl ExportFile {
    /// Build an export of `books` declared at `schema_version`.
    pub fn new(
        mut books: Vec<BookRecord>,
        schema_version: impl Into<String>,
        exported_at: DateTime<Utc>,
    ) -> Self {
        books.sort_by(|a, b| a.id.cmp(&b.id));
        let metadata = ExportMetadata {
            checksum: checksum(&books),
            book_count: books.len(),
            schema_version: schema_version.into(),
            exported_at: exported_at.to_rfc3339_opts(SecondsFormat::Millis, true),
        };
        Self { books, metadata }
    }

    /// Serialize to pretty JSON.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::Serialization(e.to_string()))
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec_pretty(self).map_err(|e| Error::Serialization(e.to_string()))
    }
}

/// Position inside an import payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub line: usize,
    pub column: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ImportErrorKind {
    MalformedJson,
    MissingMetadata,
    InvalidStructure,
    BookCountMismatch,
    ChecksumMismatch,
}

impl std::fmt::Display for ImportErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ImportErrorKind::MalformedJson => write!(f, "MALFORMED_JSON"),
            ImportErrorKind::MissingMetadata => write!(f, "MISSING_METADATA"),
            ImportErrorKind::InvalidStructure => write!(f, "INVALID_STRUCTURE"),
            ImportErrorKind::BookCountMismatch => write!(f, "BOOK_COUNT_MISMATCH"),
            ImportErrorKind::ChecksumMismatch => write!(f, "CHECKSUM_MISMATCH"),
        }
    }
}

/// Structured import failure.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{kind}: {message}")]
#[serde(rename_all = "camelCase")]
pub struct ImportError {
    #[serde(rename = "type")]
    pub kind: ImportErrorKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,
    pub message: String,
    pub suggestion: String,
}

impl ImportError {
    fn new(kind: ImportErrorKind, message: impl Into<String>) -> Self {
        let suggestion = match kind {
            ImportErrorKind::MalformedJson => "The file is not valid JSON; export it again",
            ImportErrorKind::MissingMetadata => {
                "The file has no metadata block; it was not produced by an export"
            }
            ImportErrorKind::InvalidStructure => "The file layout is damaged; export it again",
            ImportErrorKind::BookCountMismatch => {
                "The file is truncated or was edited; export it again"
            }
            ImportErrorKind::ChecksumMismatch => {
                "The file contents were modified after export; export it again"
            }
        };
        Self {
            kind,
            location: None,
            message: message.into(),
            suggestion: suggestion.to_string(),
        }
    }

    pub fn code(&self) -> ErrorCode {
        match self.kind {
            ImportErrorKind::ChecksumMismatch => ErrorCode::ChecksumMismatch,
            _ => ErrorCode::FileCorrupted,
        }
    }
}

/// A payload that passed every integrity check. Records are not yet
/// validated against the schema.
#[derive(Debug, Clone, PartialEq)]
pub struct ImportedFile {
    pub metadata: ExportMetadata,
    pub books: Vec<Value>,
}

/// Parse and integrity-check an import payload.
///
/// Checks run in order: JSON syntax, metadata presence, structure, book
/// count, checksum. The first failure is returned.
pub fn import(bytes: &[u8]) -> std::result::Result<ImportedFile, ImportError> {
    let root: Value = serde_json::from_slice(bytes).map_err(|e| {
        let mut err = ImportError::new(ImportErrorKind::MalformedJson, e.to_string());
        err.location = Some(Location {
            line: e.line(),
            column: e.column(),
        });
        err
    })?;

    let Value::Object(mut root) = root else {
        return Err(ImportError::new(
            ImportErrorKind::InvalidStructure,
            "top level must be an object",
        ));
    };

    let metadata = match root.remove("metadata") {
        None | Some(Value::Null) => {
            return Err(ImportError::new(
                ImportErrorKind::MissingMetadata,
                "missing 'metadata'",
            ))
        }
        Some(value) => serde_json::from_value::<ExportMetadata>(value).map_err(|e| {
            ImportError::new(
                ImportErrorKind::InvalidStructure,
                format!("invalid 'metadata': {e}"),
            )
        })?,
    };

    let books = match root.remove("books") {
        Some(Value::Array(books)) => books,
        Some(_) => {
            return Err(ImportError::new(
                ImportErrorKind::InvalidStructure,
                "'books' must be an array",
            ))
        }
        None => {
            return Err(ImportError::new(
                ImportErrorKind::InvalidStructure,
                "missing 'books'",
            ))
        }
    };

    if metadata.book_count != books.len() {
        return Err(ImportError::new(
            ImportErrorKind::BookCountMismatch,
            format!(
                "metadata declares {} books, file contains {}",
                metadata.book_count,
                books.len()
            ),
        ));
    }

    let actual = checksum_values(&books);
    if actual != metadata.checksum {
        return Err(ImportError::new(
            ImportErrorKind::ChecksumMismatch,
            format!("expected checksum {}, computed {actual}", metadata.checksum),
        ));
    }

    Ok(ImportedFile { metadata, books })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn export() -> ExportFile {
        let books = vec![
            BookRecord::new("b", "Emma", "Austen", "2024-01-02T00:00:00Z"),
            BookRecord::new("a", "Dune", "Herbert", "2024-01-01T00:00:00Z").with_progress(30),
        ];
        let at = Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap();
        ExportFile::new(books, "2.0.0", at)
    }

    #[test]
    fn export_sorts_and_describes() {
        let file = export();
        assert_eq!(file.books[0].id, "a");
        assert_eq!(file.metadata.book_count, 2);
        assert_eq!(file.metadata.exported_at, "2024-03-01T10:00:00.000Z");

        let json = file.to_json().unwrap();
        assert!(json.contains("\"bookCount\": 2"));
        assert!(json.contains("\"exportedAt\""));
    }

    #[test]
    fn import_accepts_own_export() {
        let file = export();
        let imported = import(&file.to_bytes().unwrap()).unwrap();
        assert_eq!(imported.metadata, file.metadata);
        assert_eq!(imported.books.len(), 2);
    }

    #[test]
    fn malformed_json_reports_location() {
        let err = import(b"{\n  \"books\": [\n  ,]\n}").unwrap_err();
        assert_eq!(err.kind, ImportErrorKind::MalformedJson);
        assert_eq!(err.location.map(|l| l.line), Some(3));
        assert_eq!(err.code(), ErrorCode::FileCorrupted);
    }

    #[test]
    fn missing_metadata() {
        let err = import(br#"{"books": []}"#).unwrap_err();
        assert_eq!(err.kind, ImportErrorKind::MissingMetadata);
    }

    #[test]
    fn count_checked_before_checksum() {
        let mut value = serde_json::to_value(export()).unwrap();
        value["metadata"]["bookCount"] = 3.into();
        value["metadata"]["checksum"] = "0000".into();

        let err = import(&serde_json::to_vec(&value).unwrap()).unwrap_err();
        assert_eq!(err.kind, ImportErrorKind::BookCountMismatch);
    }

    #[test]
    fn tampered_checksum() {
        let mut value = serde_json::to_value(export()).unwrap();
        value["metadata"]["checksum"] = "deadbeef".into();

        let err = import(&serde_json::to_vec(&value).unwrap()).unwrap_err();
        assert_eq!(err.kind, ImportErrorKind::ChecksumMismatch);
        assert_eq!(err.code(), ErrorCode::ChecksumMismatch);
        assert!(!err.suggestion.is_empty());
    }

    #[test]
    fn tampered_book() {
        let mut value = serde_json::to_value(export()).unwrap();
        value["books"][0]["progress"] = 99.into();

        let err = import(&serde_json::to_vec(&value).unwrap()).unwrap_err();
        assert_eq!(err.kind, ImportErrorKind::ChecksumMismatch);
    }

    #[test]
    fn reformatting_keeps_checksum_valid() {
        let value = serde_json::to_value(export()).unwrap();
        let compact = serde_json::to_vec(&value).unwrap();
        assert!(import(&compact).is_ok());
    }

    #[test]
    fn error_serializes_with_type_field() {
        let err = import(br#"{"books": []}"#).unwrap_err();
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["type"], "MISSING_METADATA");
        assert!(json.get("location").is_none());
    }
}
