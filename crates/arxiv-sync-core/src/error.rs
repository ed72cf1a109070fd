//! Typed errors of the core crate. `ReconcileError` wraps the other two.

use thiserror::Error;

/// Why a raw record could not become a [`PaperRevision`](crate::models::PaperRevision).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NormalizeError {
    #[error("record has no paper identifier")]
    MissingIdentifier,

    #[error("paper {paper_id}: record has no revision date")]
    MissingDate { paper_id: String },

    #[error("paper {paper_id}: invalid revision date {value:?} (expected YYYY-MM-DD)")]
    InvalidDate { paper_id: String, value: String },

    #[error("paper {paper_id}: invalid categories: {detail}")]
    InvalidCategories { paper_id: String, detail: String },
}

/// Errors raised by a [`PaperStore`](crate::store::PaperStore) backend.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The backend refused the write because of a concurrent writer.
    /// Retrying the whole unit of work is safe.
    #[error("write conflict: {0}")]
    Conflict(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("stored data is corrupt: {0}")]
    Corrupt(String),

    #[error("store backend error: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl StoreError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Conflict(_))
    }
}

/// Failure to reconcile a single record.
#[derive(Error, Debug)]
pub enum ReconcileError {
    #[error("malformed record: {0}")]
    Malformed(#[from] NormalizeError),

    #[error("paper {paper_id}: {source}")]
    Store {
        paper_id: String,
        #[source]
        source: StoreError,
    },

    #[error("paper {paper_id}: gave up after {attempts} conflicting attempts")]
    ConflictRetriesExhausted { paper_id: String, attempts: u32 },
}

impl ReconcileError {
    pub fn paper_id(&self) -> Option<&str> {
        match self {
            ReconcileError::Malformed(NormalizeError::MissingIdentifier) => None,
            ReconcileError::Malformed(NormalizeError::MissingDate { paper_id })
            | ReconcileError::Malformed(NormalizeError::InvalidDate { paper_id, .. })
            | ReconcileError::Malformed(NormalizeError::InvalidCategories { paper_id, .. })
            | ReconcileError::Store { paper_id, .. }
            | ReconcileError::ConflictRetriesExhausted { paper_id, .. } => Some(paper_id),
        }
    }
}
