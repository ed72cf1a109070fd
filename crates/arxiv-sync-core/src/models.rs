//! Core data models for arxiv-sync.
//!
//! A paper moves through three shapes:
//!
//! | Type | Produced by | Meaning |
//! |------|-------------|---------|
//! | [`RawRecord`] | feed client | One record as delivered, unvalidated |
//! | [`PaperRevision`] | [`normalize`](crate::normalize::normalize) | One validated, observed version of a paper |
//! | [`StoredPaper`] | store | The latest accepted version of a paper |

use std::collections::BTreeSet;
use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Wire and storage format of revision dates.
pub const REVISION_DATE_FORMAT: &str = "%Y-%m-%d";

/// A set of category labels (e.g. `cs:cs:AI`). Ordered only for stable output.
pub type CategorySet = BTreeSet<String>;

/// A record as delivered by the feed, before validation.
///
/// `categories` keeps the feed's JSON shape: a single label, a list of
/// labels, or anything else (which the normalizer rejects). The whole
/// record is kept in `metadata` and becomes the stored document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
    #[serde(default)]
    pub identifier: Option<String>,
    #[serde(default)]
    pub datestamp: Option<String>,
    #[serde(default)]
    pub categories: serde_json::Value,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// One observed version of a paper.
#[derive(Debug, Clone, PartialEq)]
pub struct PaperRevision {
    pub paper_id: String,
    /// The sole recency signal.
    pub revision_date: NaiveDate,
    pub categories: CategorySet,
    /// Opaque canonical document, stored unmodified.
    pub payload: serde_json::Value,
}

/// The durable record of a paper: the latest accepted revision.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredPaper {
    pub paper_id: String,
    pub document: serde_json::Value,
    pub update_date: NaiveDate,
    /// `None` means the embedding needs (re)computation.
    pub embedding: Option<Vec<f32>>,
}

/// A paper whose embedding is missing, as returned by
/// [`PaperStore::find_missing_embeddings`](crate::store::PaperStore::find_missing_embeddings).
#[derive(Debug, Clone, PartialEq)]
pub struct PendingPaper {
    pub paper_id: String,
    pub document: serde_json::Value,
    /// Revision the embedding will be computed from; passed back to
    /// `store_embedding` as the guard date.
    pub update_date: NaiveDate,
}

/// Restricts which papers the missing-embedding query returns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CategoryFilter {
    All,
    /// Papers with at least one of these categories.
    AnyOf(CategorySet),
}

impl CategoryFilter {
    pub fn matches(&self, categories: &CategorySet) -> bool {
        match self {
            CategoryFilter::All => true,
            CategoryFilter::AnyOf(wanted) => !wanted.is_disjoint(categories),
        }
    }
}

/// Result of reconciling one revision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Inserted,
    Updated,
    /// Stale or duplicate; nothing was written.
    Skipped,
}

impl Outcome {
    /// Whether the revision was accepted (and derived state must follow it).
    pub fn is_accepted(self) -> bool {
        matches!(self, Outcome::Inserted | Outcome::Updated)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Outcome::Inserted => "inserted",
            Outcome::Updated => "updated",
            Outcome::Skipped => "skipped",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A record that could not be reconciled. The raw record is kept for
/// diagnosis and replay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordFailure {
    pub paper_id: Option<String>,
    pub error: String,
    pub raw: Option<RawRecord>,
}

/// Aggregate counts of a reconciliation run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncReport {
    pub inserted: u64,
    pub updated: u64,
    pub skipped: u64,
    pub failed: u64,
    pub failures: Vec<RecordFailure>,
}

impl SyncReport {
    pub fn total(&self) -> u64 {
        self.inserted + self.updated + self.skipped + self.failed
    }

    /// Ids of failed records; failures without a known id are omitted.
    pub fn failed_ids(&self) -> Vec<&str> {
        self.failures
            .iter()
            .filter_map(|f| f.paper_id.as_deref())
            .collect()
    }
}

/// Format a revision date the way it is stored and sent on the wire.
pub fn format_date(date: NaiveDate) -> String {
    date.format(REVISION_DATE_FORMAT).to_string()
}

/// Parse a strict `YYYY-MM-DD` date (zero-padded, exactly ten characters).
pub fn parse_date(value: &str) -> Option<NaiveDate> {
    let bytes = value.as_bytes();
    if bytes.len() != 10 || bytes[4] != b'-' || bytes[7] != b'-' {
        return None;
    }
    NaiveDate::parse_from_str(value, REVISION_DATE_FORMAT).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_date_is_strict() {
        assert_eq!(
            parse_date("2024-01-03"),
            NaiveDate::from_ymd_opt(2024, 1, 3)
        );
        assert_eq!(parse_date("2024-1-3"), None);
        assert_eq!(parse_date("2024-02-30"), None);
        assert_eq!(parse_date("2024-01-03T00:00:00Z"), None);
        assert_eq!(parse_date(""), None);
    }

    #[test]
    fn category_filter_any_of() {
        let filter = CategoryFilter::AnyOf(["cs:cs:AI".to_string()].into_iter().collect());
        let ai: CategorySet = ["cs:cs:AI".to_string(), "cs:cs:LG".to_string()]
            .into_iter()
            .collect();
        let cl: CategorySet = ["cs:cs:CL".to_string()].into_iter().collect();
        assert!(filter.matches(&ai));
        assert!(!filter.matches(&cl));
        assert!(CategoryFilter::All.matches(&cl));
    }

    #[test]
    fn outcome_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&Outcome::Updated).unwrap(),
            "\"updated\""
        );
        assert!(Outcome::Inserted.is_accepted());
        assert!(!Outcome::Skipped.is_accepted());
    }
}
