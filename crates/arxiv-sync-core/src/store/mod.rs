//! Storage contract for arxiv-sync.
//!
//! The reconciliation engine needs two things from a backend: plain reads
//! ([`PaperStore`]) and a unit of atomicity ([`StoreSession`]) in which a
//! document write, its category replacement, and its embedding
//! invalidation either all land or none do.
//!
//! A session commits only through [`StoreSession::commit`]. Dropping a
//! session without committing rolls back everything it wrote, so an early
//! return or `?` inside the engine can never leave a half-applied revision.
//!
//! # Operations
//!
//! | Method | Purpose |
//! |--------|---------|
//! | [`begin`](PaperStore::begin) | Open a write session |
//! | [`get_by_identity`](PaperStore::get_by_identity) | Latest accepted revision of a paper |
//! | [`get_categories`](PaperStore::get_categories) | Stored category set of a paper |
//! | [`max_update_date`](PaperStore::max_update_date) | Newest revision date in the store |
//! | [`find_missing_embeddings`](PaperStore::find_missing_embeddings) | Papers whose embedding is absent |
//! | [`store_embedding`](PaperStore::store_embedding) | Save a vector computed from a given revision |
//! | [`upsert_if_newer`](StoreSession::upsert_if_newer) | Date-guarded insert-or-update |
//! | [`replace_categories`](StoreSession::replace_categories) | Set-replace of category memberships |
//! | [`clear_embedding`](StoreSession::clear_embedding) | Mark an embedding as needing recomputation |

pub mod memory;

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::error::StoreError;
use crate::models::{CategoryFilter, CategorySet, Outcome, PendingPaper, StoredPaper};

/// A durable collection of papers keyed by `paper_id`.
#[async_trait]
pub trait PaperStore: Send + Sync {
    type Session: StoreSession;

    /// Open a write session. Backends may serialize sessions.
    async fn begin(&self) -> Result<Self::Session, StoreError>;

    async fn get_by_identity(&self, paper_id: &str) -> Result<Option<StoredPaper>, StoreError>;

    /// Empty set when the paper is unknown.
    async fn get_categories(&self, paper_id: &str) -> Result<CategorySet, StoreError>;

    /// `None` on an empty store.
    async fn max_update_date(&self) -> Result<Option<NaiveDate>, StoreError>;

    /// Papers with no embedding whose categories match `filter`, ordered by
    /// `paper_id`.
    async fn find_missing_embeddings(
        &self,
        filter: &CategoryFilter,
        limit: Option<usize>,
    ) -> Result<Vec<PendingPaper>, StoreError>;

    /// Store an embedding computed from the revision dated `revision_date`.
    ///
    /// Returns `false` and writes nothing if the paper is unknown or has
    /// since been updated to a different revision.
    async fn store_embedding(
        &self,
        paper_id: &str,
        revision_date: NaiveDate,
        model: &str,
        vector: &[f32],
    ) -> Result<bool, StoreError>;
}

/// One unit of atomicity. Rolls back on drop unless committed.
#[async_trait]
pub trait StoreSession: Send {
    /// Insert the paper if absent, or replace its document and date if
    /// `revision_date` is strictly newer than the stored one.
    ///
    /// The date comparison happens at write time. Returns
    /// [`Outcome::Skipped`] when the stored revision is the same age or
    /// newer, including when a concurrent writer inserted the paper first.
    async fn upsert_if_newer(
        &mut self,
        paper_id: &str,
        document: &serde_json::Value,
        revision_date: NaiveDate,
    ) -> Result<Outcome, StoreError>;

    async fn get_categories(&mut self, paper_id: &str) -> Result<CategorySet, StoreError>;

    /// Delete every membership of `paper_id` and insert `categories`.
    async fn replace_categories(
        &mut self,
        paper_id: &str,
        categories: &CategorySet,
    ) -> Result<(), StoreError>;

    async fn clear_embedding(&mut self, paper_id: &str) -> Result<(), StoreError>;

    async fn commit(self) -> Result<(), StoreError>;
}
