//! Schema version compatibility and migration.
//!
//! Records carry a semantic `schemaVersion`. Versions sharing a major number
//! are compatible: the newer minor only adds fields, and each addition has a
//! documented default. Crossing a major version requires an explicit
//! migration along the path computed by [`compute_upgrade_path`].
//!
//! | Step            | Transform                                               |
//! |-----------------|---------------------------------------------------------|
//! | 1.0.0 -> 1.1.0  | add `tags` = `[]`                                       |
//! | 1.1.0 -> 1.2.0  | add `notes` = `""`                                      |
//! | 1.2.0 -> 2.0.0  | move legacy top-level descriptive keys into `metadata`  |
//!
//! Every transform is pure and leaves `id` and `crossDeviceId` untouched.

use crate::{error::Result, Error};
use semver::Version;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Version written by this engine.
pub const CURRENT_SCHEMA_VERSION: &str = "2.0.0";

/// Every version the engine can read, oldest first.
pub const SUPPORTED_VERSIONS: [&str; 4] = ["1.0.0", "1.1.0", "1.2.0", "2.0.0"];

/// Top-level keys that 1.x records used for descriptive data.
pub const LEGACY_METADATA_KEYS: [&str; 5] = ["publisher", "isbn", "language", "coverUrl", "series"];

/// Parse a schema version string.
pub fn parse_version(value: &str) -> Result<Version> {
    Version::parse(value.trim()).map_err(|e| Error::InvalidVersion {
        value: value.to_string(),
        reason: e.to_string(),
    })
}

/// Whether the engine knows how to read this version.
pub fn is_supported(version: &Version) -> bool {
    SUPPORTED_VERSIONS
        .iter()
        .filter_map(|v| Version::parse(v).ok())
        .any(|v| &v == version)
}

/// The current engine version, parsed.
pub fn current_version() -> Version {
    Version::new(2, 0, 0)
}

/// Default value filled in for a field missing from an older record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FieldDefault {
    EmptyList,
    EmptyString,
    EmptyMap,
}

impl FieldDefault {
    fn to_value(self) -> Value {
        match self {
            FieldDefault::EmptyList => Value::Array(Vec::new()),
            FieldDefault::EmptyString => Value::String(String::new()),
            FieldDefault::EmptyMap => Value::Object(Map::new()),
        }
    }
}

/// The transformation performed by one migration step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Transform {
    /// Insert `field` with a default when it is absent or null.
    AddDefault {
        field: &'static str,
        default: FieldDefault,
    },
    /// Move legacy top-level keys into the `metadata` map.
    NestLegacyMetadata,
}

impl Transform {
    fn apply(&self, record: &mut Map<String, Value>) {
        match self {
            Transform::AddDefault { field, default } => {
                let missing = matches!(record.get(*field), None | Some(Value::Null));
                if missing {
                    record.insert((*field).to_string(), default.to_value());
                }
            }
            Transform::NestLegacyMetadata => {
                let mut metadata = match record.remove("metadata") {
                    Some(Value::Object(map)) => map,
                    _ => Map::new(),
                };
                for key in LEGACY_METADATA_KEYS {
                    match record.remove(key) {
                        None | Some(Value::Null) => {}
                        Some(Value::String(s)) => {
                            metadata.entry(key.to_string()).or_insert(Value::String(s));
                        }
                        Some(other) => {
                            metadata
                                .entry(key.to_string())
                                .or_insert(Value::String(other.to_string()));
                        }
                    }
                }
                record.insert("metadata".to_string(), Value::Object(metadata));
            }
        }
    }
}

/// One step between two adjacent supported versions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationStep {
    pub from: Version,
    pub to: Version,
    pub transform: Transform,
}

impl MigrationStep {
    /// Apply the step to a raw record. Stamps the record with `to`.
    pub fn apply(&self, mut record: Map<String, Value>) -> Map<String, Value> {
        self.transform.apply(&mut record);
        record.insert(
            "schemaVersion".to_string(),
            Value::String(self.to.to_string()),
        );
        record
    }

    /// Whether the step stays within one major version.
    pub fn is_minor(&self) -> bool {
        self.from.major == self.to.major
    }
}

/// The full table of migration steps, in version order.
pub fn migration_table() -> Vec<MigrationStep> {
    vec![
        MigrationStep {
            from: Version::new(1, 0, 0),
            to: Version::new(1, 1, 0),
            transform: Transform::AddDefault {
                field: "tags",
                default: FieldDefault::EmptyList,
            },
        },
        MigrationStep {
            from: Version::new(1, 1, 0),
            to: Version::new(1, 2, 0),
            transform: Transform::AddDefault {
                field: "notes",
                default: FieldDefault::EmptyString,
            },
        },
        MigrationStep {
            from: Version::new(1, 2, 0),
            to: Version::new(2, 0, 0),
            transform: Transform::NestLegacyMetadata,
        },
    ]
}

/// Ordered steps leading from one version to another.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpgradePath {
    pub from: Version,
    pub to: Version,
    pub steps: Vec<MigrationStep>,
}

impl UpgradePath {
    /// Versions visited after `from`, ending with `to`.
    pub fn versions(&self) -> Vec<Version> {
        self.steps.iter().map(|s| s.to.clone()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Apply every step in order.
    pub fn apply(&self, record: Map<String, Value>) -> Map<String, Value> {
        self.steps.iter().fold(record, |acc, step| step.apply(acc))
    }
}

/// Compute the ordered upgrade path between two supported versions.
///
/// Downgrades have no path.
pub fn compute_upgrade_path(from: &str, to: &str) -> Result<UpgradePath> {
    let from_v = parse_version(from)?;
    let to_v = parse_version(to)?;
    upgrade_path_between(&from_v, &to_v)
}

pub(crate) fn upgrade_path_between(from: &Version, to: &Version) -> Result<UpgradePath> {
    let no_path = || Error::NoUpgradePath {
        from: from.to_string(),
        to: to.to_string(),
    };

    if !is_supported(from) || !is_supported(to) || from > to {
        return Err(no_path());
    }

    let table = migration_table();
    let mut steps = Vec::new();
    let mut cursor = from.clone();
    while &cursor < to {
        let step = table
            .iter()
            .find(|s| s.from == cursor)
            .cloned()
            .ok_or_else(no_path)?;
        cursor = step.to.clone();
        steps.push(step);
    }

    if &cursor != to {
        return Err(no_path());
    }

    Ok(UpgradePath {
        from: from.clone(),
        to: to.clone(),
        steps,
    })
}

/// Result of comparing two schema versions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Compatibility {
    /// Same major version. `defaults` lists the minor steps that fill in fields
    /// the older side lacks.
    Compatible { defaults: Vec<MigrationStep> },
    /// Different major versions, or a version the engine cannot read.
    #[serde(rename_all = "camelCase")]
    Incompatible {
        reason: String,
        required_migration_path: Vec<Version>,
    },
}

impl Compatibility {
    pub fn is_compatible(&self) -> bool {
        matches!(self, Compatibility::Compatible { .. })
    }
}

/// Decide whether records at `a` and `b` can be merged directly.
pub fn check_compatible(a: &str, b: &str) -> Result<Compatibility> {
    let va = parse_version(a)?;
    let vb = parse_version(b)?;

    for v in [&va, &vb] {
        if !is_supported(v) {
            return Ok(Compatibility::Incompatible {
                reason: format!("schema version {v} is not supported"),
                required_migration_path: Vec::new(),
            });
        }
    }

    let (older, newer) = if va <= vb { (&va, &vb) } else { (&vb, &va) };
    let path = upgrade_path_between(older, newer)?;

    if older.major == newer.major {
        Ok(Compatibility::Compatible {
            defaults: path.steps,
        })
    } else {
        Ok(Compatibility::Incompatible {
            reason: format!(
                "major version {} cannot be merged with major version {} without migration",
                older.major, newer.major
            ),
            required_migration_path: path.versions(),
        })
    }
}

/// Migrate one raw record to `target`, following its own declared version.
pub fn migrate_value(record: &Value, target: &Version) -> Result<Value> {
    let map = record.as_object().cloned().ok_or_else(|| Error::InvalidVersion {
        value: String::new(),
        reason: "record is not an object".to_string(),
    })?;
    let declared = map
        .get("schemaVersion")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::InvalidVersion {
            value: String::new(),
            reason: "record has no schemaVersion".to_string(),
        })?;
    let from = parse_version(declared)?;
    let path = upgrade_path_between(&from, target)?;
    Ok(Value::Object(path.apply(map)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn same_major_is_compatible() {
        let result = check_compatible("1.0.0", "1.2.0").unwrap();
        match result {
            Compatibility::Compatible { defaults } => {
                assert_eq!(defaults.len(), 2);
                assert!(defaults.iter().all(MigrationStep::is_minor));
            }
            other => panic!("expected compatible, got {other:?}"),
        }

        assert!(check_compatible("2.0.0", "2.0.0").unwrap().is_compatible());
    }

    #[test]
    fn different_major_is_incompatible_with_path() {
        let result = check_compatible("2.0.0", "1.1.0").unwrap();
        match result {
            Compatibility::Incompatible {
                required_migration_path,
                ..
            } => {
                let path: Vec<String> = required_migration_path
                    .iter()
                    .map(ToString::to_string)
                    .collect();
                assert_eq!(path, vec!["1.2.0", "2.0.0"]);
            }
            other => panic!("expected incompatible, got {other:?}"),
        }
    }

    #[test]
    fn unsupported_version_is_incompatible() {
        let result = check_compatible("3.0.0", "2.0.0").unwrap();
        assert!(!result.is_compatible());
    }

    #[test]
    fn malformed_version_is_an_error() {
        assert!(matches!(
            check_compatible("two", "2.0.0"),
            Err(Error::InvalidVersion { .. })
        ));
    }

    #[test]
    fn upgrade_path_is_ordered() {
        let path = compute_upgrade_path("1.0.0", "2.0.0").unwrap();
        let versions: Vec<String> = path.versions().iter().map(ToString::to_string).collect();
        assert_eq!(versions, vec!["1.1.0", "1.2.0", "2.0.0"]);

        assert!(compute_upgrade_path("2.0.0", "2.0.0").unwrap().is_empty());
    }

    #[test]
    fn downgrade_has_no_path() {
        assert!(matches!(
            compute_upgrade_path("2.0.0", "1.0.0"),
            Err(Error::NoUpgradePath { .. })
        ));
    }

    #[test]
    fn migration_fills_defaults_and_nests_metadata() {
        let legacy = json!({
            "id": "b-1",
            "crossDeviceId": "fp-1",
            "title": "Dune",
            "author": "Frank Herbert",
            "progress": 10,
            "status": "READING",
            "lastModified": "2024-01-01T00:00:00Z",
            "schemaVersion": "1.0.0",
            "isbn": "9780441013593",
            "publisher": "Ace",
        });

        let migrated = migrate_value(&legacy, &current_version()).unwrap();

        assert_eq!(migrated["schemaVersion"], "2.0.0");
        assert_eq!(migrated["tags"], json!([]));
        assert_eq!(migrated["notes"], "");
        assert_eq!(migrated["metadata"]["isbn"], "9780441013593");
        assert_eq!(migrated["metadata"]["publisher"], "Ace");
        assert!(migrated.get("isbn").is_none());
        assert_eq!(migrated["id"], "b-1");
        assert_eq!(migrated["crossDeviceId"], "fp-1");
    }

    #[test]
    fn migration_is_deterministic() {
        let legacy = json!({
            "id": "b-1",
            "crossDeviceId": "fp-1",
            "schemaVersion": "1.1.0",
            "tags": ["x"],
            "series": 3,
        });
        let a = migrate_value(&legacy, &current_version()).unwrap();
        let b = migrate_value(&legacy, &current_version()).unwrap();
        assert_eq!(a, b);
        assert_eq!(a["tags"], json!(["x"]));
        assert_eq!(a["metadata"]["series"], "3");
    }
}
