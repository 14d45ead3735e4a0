//! Field groups and the resolution strategy applied to each.
//!
//! | Field group              | Strategy          | Rule                                   |
//! |--------------------------|-------------------|----------------------------------------|
//! | progress                 | `ProgressMax`     | larger value wins                      |
//! | title / author / metadata| `LatestTimestamp` | later `lastModified` wins              |
//! | tags                     | `TagsUnion`       | set union                              |
//! | notes                    | `NotesAppend`     | concatenate, earlier first, attributed |
//! | status                   | `UserChoice`      | held for a human decision              |
//!
//! Every strategy is a pure function of the two contenders. "Later" is decided
//! by `lastModified`; on equal timestamps the contender from the
//! lexicographically smaller store id counts as later.

use crate::record::{BookRecord, ValidatedRecord};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::cmp::Ordering;

/// A group of fields that is compared and resolved as one unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FieldGroup {
    Progress,
    /// title, author and the metadata map
    Metadata,
    Tags,
    Notes,
    Status,
}

impl FieldGroup {
    pub const ALL: [FieldGroup; 5] = [
        FieldGroup::Progress,
        FieldGroup::Metadata,
        FieldGroup::Tags,
        FieldGroup::Notes,
        FieldGroup::Status,
    ];

    /// Record fields belonging to the group.
    pub fn fields(&self) -> &'static [&'static str] {
        match self {
            FieldGroup::Progress => &["progress"],
            FieldGroup::Metadata => &["title", "author", "metadata"],
            FieldGroup::Tags => &["tags"],
            FieldGroup::Notes => &["notes"],
            FieldGroup::Status => &["status"],
        }
    }

    pub fn default_strategy(&self) -> Strategy {
        match self {
            FieldGroup::Progress => Strategy::ProgressMax,
            FieldGroup::Metadata => Strategy::LatestTimestamp,
            FieldGroup::Tags => Strategy::TagsUnion,
            FieldGroup::Notes => Strategy::NotesAppend,
            FieldGroup::Status => Strategy::UserChoice,
        }
    }

    /// Fields of this group whose values differ between `a` and `b`.
    pub fn differing_fields(&self, a: &BookRecord, b: &BookRecord) -> Vec<String> {
        let differs = |field: &str| match field {
            "progress" => a.progress != b.progress,
            "title" => a.title != b.title,
            "author" => a.author != b.author,
            "metadata" => a.metadata != b.metadata,
            "tags" => a.tags != b.tags,
            "notes" => a.notes != b.notes,
            "status" => a.status != b.status,
            _ => false,
        };
        self.fields()
            .iter()
            .filter(|f| differs(f))
            .map(|f| (*f).to_string())
            .collect()
    }

    /// The group's values taken from `record`, as JSON.
    pub fn values(&self, record: &BookRecord) -> Value {
        match self {
            FieldGroup::Progress => json!(record.progress),
            FieldGroup::Metadata => json!({
                "title": record.title,
                "author": record.author,
                "metadata": record.metadata,
            }),
            FieldGroup::Tags => json!(record.tags),
            FieldGroup::Notes => json!(record.notes),
            FieldGroup::Status => json!(record.status.as_str()),
        }
    }

    /// Free-text groups lower the severity of a conflict.
    pub fn is_free_text(&self) -> bool {
        matches!(self, FieldGroup::Notes)
    }
}

impl std::fmt::Display for FieldGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FieldGroup::Progress => write!(f, "progress"),
            FieldGroup::Metadata => write!(f, "title/author/metadata"),
            FieldGroup::Tags => write!(f, "tags"),
            FieldGroup::Notes => write!(f, "notes"),
            FieldGroup::Status => write!(f, "status"),
        }
    }
}

/// Resolution strategies. Closed set; adding one is a compile-time change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Strategy {
    ProgressMax,
    TagsUnion,
    NotesAppend,
    LatestTimestamp,
    UserChoice,
}

impl Strategy {
    /// Whether the strategy resolves without a human.
    pub fn is_automatic(&self) -> bool {
        !matches!(self, Strategy::UserChoice)
    }

    /// Write the resolved values of `group` into `out`.
    ///
    /// Returns `false` when the strategy needs a decision and `out` was left
    /// untouched.
    pub fn apply(
        &self,
        group: FieldGroup,
        earlier: &Contender<'_>,
        later: &Contender<'_>,
        out: &mut BookRecord,
    ) -> bool {
        match self {
            Strategy::ProgressMax => {
                out.progress = earlier.record.progress.max(later.record.progress);
            }
            Strategy::TagsUnion => {
                out.tags = earlier.record.tags.union(&later.record.tags).cloned().collect();
            }
            Strategy::NotesAppend => {
                out.notes = merge_notes(earlier, later);
            }
            Strategy::LatestTimestamp => copy_group(group, later.record, out),
            Strategy::UserChoice => return false,
        }
        true
    }
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Strategy::ProgressMax => write!(f, "PROGRESS_MAX"),
            Strategy::TagsUnion => write!(f, "TAGS_UNION"),
            Strategy::NotesAppend => write!(f, "NOTES_APPEND"),
            Strategy::LatestTimestamp => write!(f, "LATEST_TIMESTAMP"),
            Strategy::UserChoice => write!(f, "USER_CHOICE"),
        }
    }
}

fn copy_group(group: FieldGroup, from: &BookRecord, out: &mut BookRecord) {
    match group {
        FieldGroup::Progress => out.progress = from.progress,
        FieldGroup::Metadata => {
            out.title = from.title.clone();
            out.author = from.author.clone();
            out.metadata = from.metadata.clone();
        }
        FieldGroup::Tags => out.tags = from.tags.clone(),
        FieldGroup::Notes => out.notes = from.notes.clone(),
        FieldGroup::Status => out.status = from.status,
    }
}

/// Concatenate two notes, earlier text first, with attribution for the later
/// one. When one text already contains the other it is kept as is, so merging
/// a result with either input again changes nothing.
pub fn merge_notes(earlier: &Contender<'_>, later: &Contender<'_>) -> String {
    let (a, b) = (&earlier.record.notes, &later.record.notes);
    if a.contains(b.as_str()) {
        return a.clone();
    }
    if b.contains(a.as_str()) {
        return b.clone();
    }
    format!(
        "{a}\n\n--- {} @ {} ---\n{b}",
        later.store_id, later.record.last_modified
    )
}

/// One side of a conflicting pair.
#[derive(Debug, Clone, Copy)]
pub struct Contender<'a> {
    pub record: &'a BookRecord,
    pub modified: DateTime<Utc>,
    pub store_id: &'a str,
}

impl<'a> Contender<'a> {
    pub fn new(record: &'a ValidatedRecord, store_id: &'a str) -> Self {
        Self {
            record: record.record(),
            modified: record.modified(),
            store_id,
        }
    }

    /// Total order over contenders: greater means later.
    ///
    /// Equal timestamps fall back to the smaller store id, then to the
    /// canonical record text, so the order never depends on argument order.
    pub fn recency(&self, other: &Contender<'_>) -> Ordering {
        self.modified
            .cmp(&other.modified)
            .then_with(|| other.store_id.cmp(self.store_id))
            .then_with(|| {
                let mine = crate::canonical::to_canonical_string(&self.record.to_json());
                let theirs = crate::canonical::to_canonical_string(&other.record.to_json());
                theirs.cmp(&mine)
            })
    }
}

/// Order two contenders as `(earlier, later)`.
pub fn order<'a>(a: Contender<'a>, b: Contender<'a>) -> (Contender<'a>, Contender<'a>) {
    if a.recency(&b) == Ordering::Greater {
        (b, a)
    } else {
        (a, b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{record::ReadingStatus, schema::Validator};

    fn validated(record: BookRecord) -> ValidatedRecord {
        Validator::new().validate_record(&record).unwrap()
    }

    fn book(ts: &str) -> BookRecord {
        BookRecord::new("b-1", "Dune", "Frank Herbert", ts)
    }

    #[test]
    fn later_timestamp_wins() {
        let old = validated(book("2024-01-01T00:00:00Z").with_metadata("isbn", "old"));
        let new = validated(book("2024-02-01T00:00:00Z").with_metadata("isbn", "new"));

        let (earlier, later) = order(Contender::new(&new, "a"), Contender::new(&old, "b"));
        assert_eq!(later.record.metadata["isbn"], "new");

        let mut out = old.record().clone();
        assert!(Strategy::LatestTimestamp.apply(FieldGroup::Metadata, &earlier, &later, &mut out));
        assert_eq!(out.metadata["isbn"], "new");
    }

    #[test]
    fn timestamp_tie_prefers_smaller_store_id() {
        let x = validated(book("2024-01-01T00:00:00Z").with_metadata("isbn", "x"));
        let y = validated(book("2024-01-01T00:00:00Z").with_metadata("isbn", "y"));

        let (_, later) = order(Contender::new(&x, "phone"), Contender::new(&y, "laptop"));
        assert_eq!(later.store_id, "laptop");

        let (_, later) = order(Contender::new(&y, "laptop"), Contender::new(&x, "phone"));
        assert_eq!(later.store_id, "laptop");
    }

    #[test]
    fn progress_takes_max_and_tags_union() {
        let a = validated(book("2024-01-01T00:00:00Z").with_progress(70).with_tags(["a"]));
        let b = validated(book("2024-02-01T00:00:00Z").with_progress(30).with_tags(["b"]));
        let (earlier, later) = order(Contender::new(&a, "l"), Contender::new(&b, "r"));

        let mut out = later.record.clone();
        Strategy::ProgressMax.apply(FieldGroup::Progress, &earlier, &later, &mut out);
        Strategy::TagsUnion.apply(FieldGroup::Tags, &earlier, &later, &mut out);

        assert_eq!(out.progress, 70);
        assert_eq!(out.tags.iter().collect::<Vec<_>>(), vec!["a", "b"]);
    }

    #[test]
    fn notes_append_with_attribution() {
        let a = validated(book("2024-01-01T00:00:00Z").with_notes("first"));
        let b = validated(book("2024-02-01T00:00:00Z").with_notes("second"));
        let (earlier, later) = order(Contender::new(&b, "r"), Contender::new(&a, "l"));

        let merged = merge_notes(&earlier, &later);
        assert_eq!(merged, "first\n\n--- r @ 2024-02-01T00:00:00Z ---\nsecond");

        let again = validated(book("2024-02-01T00:00:00Z").with_notes(merged.clone()));
        let (earlier, later) = order(Contender::new(&again, "l"), Contender::new(&b, "r"));
        assert_eq!(merge_notes(&earlier, &later), merged);
    }

    #[test]
    fn empty_notes_yield_the_other_side() {
        let a = validated(book("2024-01-01T00:00:00Z"));
        let b = validated(book("2024-02-01T00:00:00Z").with_notes("only"));
        let (earlier, later) = order(Contender::new(&a, "l"), Contender::new(&b, "r"));
        assert_eq!(merge_notes(&earlier, &later), "only");
    }

    #[test]
    fn status_needs_a_decision() {
        let a = validated(book("2024-01-01T00:00:00Z").with_status(ReadingStatus::Reading));
        let b = validated(book("2024-02-01T00:00:00Z").with_status(ReadingStatus::Completed));
        let (earlier, later) = order(Contender::new(&a, "l"), Contender::new(&b, "r"));

        let mut out = a.record().clone();
        assert!(!Strategy::UserChoice.apply(FieldGroup::Status, &earlier, &later, &mut out));
        assert_eq!(out.status, ReadingStatus::Reading);
        assert!(!FieldGroup::Status.default_strategy().is_automatic());
    }

    #[test]
    fn differing_fields_names_only_changed_members() {
        let a = book("2024-01-01T00:00:00Z");
        let b = BookRecord {
            author: "F. Herbert".into(),
            ..a.clone()
        };
        assert_eq!(FieldGroup::Metadata.differing_fields(&a, &b), vec!["author"]);
        assert!(FieldGroup::Tags.differing_fields(&a, &b).is_empty());
    }
}
