//! # Shelfsync Engine
//!
//! A deterministic merge engine for personal book libraries held on several
//! devices.
//!
//! Given two independently edited collections of [`BookRecord`]s, the engine
//! produces one merged collection, the list of field-level conflicts it found,
//! and the decisions it could not make on its own.
//!
//! ## Design Principles
//!
//! - **No IO**: the engine never touches files, network or storage
//! - **Deterministic**: same inputs, same outputs, regardless of input order
//! - **Partial success**: one malformed record never blocks the others
//!
//! ## Pipeline
//!
//! 1. [`version::check_compatible`] gates merges across major versions
//! 2. [`schema::Validator`] partitions input into valid and invalid records
//! 3. [`detect::detect`] pairs records and classifies divergence per field group
//! 4. [`merge::merge`] applies the [`Strategy`] of each group
//! 5. [`consistency::verify`] compares the written result against the plan
//!
//! ## Quick Start
//!
//! ```rust
//! use shelfsync_engine::{merge_records, BookRecord, MergeContext, ReadingStatus};
//!
//! let laptop = vec![
//!     BookRecord::new("b-1", "Dune", "Frank Herbert", "2024-03-01T10:00:00Z").with_progress(40),
//! ];
//! let phone = vec![
//!     BookRecord::new("b-1", "Dune", "Frank Herbert", "2024-03-02T08:00:00Z").with_progress(55),
//!     BookRecord::new("b-2", "Emma", "Jane Austen", "2024-03-02T08:00:00Z")
//!         .with_status(ReadingStatus::Completed),
//! ];
//!
//! let result = merge_records(&laptop, &phone, &MergeContext::new("laptop", "phone"));
//! assert_eq!(result.records.len(), 2);
//! assert_eq!(result.records[0].record.progress, 55);
//! assert_eq!(result.counts.added, 1);
//! assert_eq!(result.counts.updated, 1);
//! ```
//!
//! ## Wire format
//!
//! [`ExportFile`] and [`wire::import`] implement the JSON exchange format.
//! Import checks syntax, metadata, book count and checksum before any record
//! is looked at.

pub mod canonical;
pub mod consistency;
pub mod detect;
pub mod error;
pub mod merge;
pub mod record;
pub mod schema;
pub mod strategy;
pub mod version;
pub mod wire;

// Re-export main types at crate root
pub use canonical::checksum;
pub use consistency::{
    convergence, verify, ConvergenceReport, DeviceConvergence, Verification, VerifyConfig,
};
pub use detect::{detect, ConflictRecord, Detection, PlanAction, PlanEntry, Severity, Side};
pub use error::{Error, ErrorCode, Result};
pub use merge::{
    merge, merge_records, resolve_pending, MergeContext, MergeResult, MergedRecord,
    PendingDecision, RecordOutcome, StatusChoice, SyncCounts,
};
pub use record::{fingerprint, BookRecord, ReadingStatus, ValidatedRecord};
pub use schema::{BatchValidation, InvalidRecord, SchemaError, SchemaErrorKind, Validator};
pub use strategy::{FieldGroup, Strategy};
pub use version::{
    check_compatible, compute_upgrade_path, Compatibility, UpgradePath, CURRENT_SCHEMA_VERSION,
};
pub use wire::{import, ExportFile, ExportMetadata, ImportError, ImportErrorKind, ImportedFile};

/// Type aliases for clarity
pub type BookId = String;
pub type StoreId = String;
