//! Revision reconciliation engine.
//!
//! For each incoming [`PaperRevision`] the engine decides whether it is a
//! new paper, a newer revision of a stored paper, or stale, and applies
//! accepted revisions in one store session:
//!
//! 1. Read the stored paper outside any session. A stored date that is
//!    already `>=` the incoming one is final (dates only move forward), so
//!    stale records never open a write session.
//! 2. Open a session and call
//!    [`upsert_if_newer`](crate::store::StoreSession::upsert_if_newer),
//!    which re-checks the date at write time. A concurrent writer that got
//!    there first turns this into a skip.
//! 3. On acceptance, reconcile categories ([`diff_categories`]) and clear
//!    the embedding on updates ([`invalidate_embedding`]), then commit.
//!
//! Equal dates are "already have it": no document, category, or embedding
//! write happens.
//!
//! Batch callers use [`Reconciler::process_record`], which never fails:
//! errors are counted and kept with the raw record, so one bad record
//! cannot abort a run.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use chrono::NaiveDate;
use tracing::{debug, warn};

use crate::categories::diff_categories;
use crate::error::{ReconcileError, StoreError};
use crate::invalidation::invalidate_embedding;
use crate::models::{Outcome, PaperRevision, RawRecord, RecordFailure, SyncReport};
use crate::normalize::normalize;
use crate::store::{PaperStore, StoreSession};

/// Engine tuning.
#[derive(Debug, Clone)]
pub struct ReconcileConfig {
    /// How many times a unit of work is re-run after a retryable store
    /// conflict before the record is reported as failed.
    pub max_conflict_retries: u32,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            max_conflict_retries: 3,
        }
    }
}

/// Decide what an incoming revision does to a paper stored at `stored`.
pub fn classify(stored: Option<NaiveDate>, incoming: NaiveDate) -> Outcome {
    match stored {
        None => Outcome::Inserted,
        Some(stored) if incoming > stored => Outcome::Updated,
        Some(_) => Outcome::Skipped,
    }
}

#[derive(Default)]
struct AtomicSyncStats {
    inserted: AtomicU64,
    updated: AtomicU64,
    skipped: AtomicU64,
    failed: AtomicU64,
    failures: Mutex<Vec<RecordFailure>>,
}

impl AtomicSyncStats {
    fn record(&self, outcome: Outcome) {
        let counter = match outcome {
            Outcome::Inserted => &self.inserted,
            Outcome::Updated => &self.updated,
            Outcome::Skipped => &self.skipped,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn record_failure(&self, failure: RecordFailure) {
        self.failed.fetch_add(1, Ordering::Relaxed);
        self.failures
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(failure);
    }

    fn snapshot(&self) -> SyncReport {
        SyncReport {
            inserted: self.inserted.load(Ordering::Relaxed),
            updated: self.updated.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            failures: self
                .failures
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .clone(),
        }
    }
}

/// The reconciliation engine, bound to one store.
///
/// Safe to share across tasks; counters are atomic.
pub struct Reconciler<S> {
    store: S,
    config: ReconcileConfig,
    stats: AtomicSyncStats,
}

impl<S: PaperStore> Reconciler<S> {
    pub fn new(store: S, config: ReconcileConfig) -> Self {
        Self {
            store,
            config,
            stats: AtomicSyncStats::default(),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Counts and failures accumulated by [`process_record`](Self::process_record).
    pub fn report(&self) -> SyncReport {
        self.stats.snapshot()
    }

    /// Reconcile one normalized revision against the store.
    pub async fn reconcile(&self, incoming: &PaperRevision) -> Result<Outcome, ReconcileError> {
        let paper_id = incoming.paper_id.as_str();
        let existing = self
            .store
            .get_by_identity(paper_id)
            .await
            .map_err(|source| ReconcileError::Store {
                paper_id: paper_id.to_string(),
                source,
            })?;
        if let Some(existing) = &existing {
            if classify(Some(existing.update_date), incoming.revision_date) == Outcome::Skipped {
                debug!(
                    paper_id,
                    stored = %existing.update_date,
                    incoming = %incoming.revision_date,
                    "stale revision"
                );
                return Ok(Outcome::Skipped);
            }
        }

        let mut attempts = 0u32;
        loop {
            attempts += 1;
            match self.apply(incoming).await {
                Ok(outcome) => {
                    debug!(paper_id, date = %incoming.revision_date, %outcome, "reconciled");
                    return Ok(outcome);
                }
                Err(err) if err.is_retryable() && attempts <= self.config.max_conflict_retries => {
                    debug!(paper_id, attempts, error = %err, "write conflict, retrying");
                }
                Err(err) if err.is_retryable() => {
                    return Err(ReconcileError::ConflictRetriesExhausted {
                        paper_id: paper_id.to_string(),
                        attempts,
                    });
                }
                Err(source) => {
                    return Err(ReconcileError::Store {
                        paper_id: paper_id.to_string(),
                        source,
                    });
                }
            }
        }
    }

    /// One unit of work. Returning early drops the session, which rolls back.
    async fn apply(&self, incoming: &PaperRevision) -> Result<Outcome, StoreError> {
        let paper_id = incoming.paper_id.as_str();
        let mut session = self.store.begin().await?;
        let outcome = session
            .upsert_if_newer(paper_id, &incoming.payload, incoming.revision_date)
            .await?;
        if !outcome.is_accepted() {
            return Ok(outcome);
        }
        let categories_changed = diff_categories(&mut session, paper_id, &incoming.categories).await?;
        invalidate_embedding(&mut session, paper_id, outcome).await?;
        session.commit().await?;
        if categories_changed {
            debug!(paper_id, categories = incoming.categories.len(), "categories replaced");
        }
        Ok(outcome)
    }

    /// Normalize and reconcile one raw record, recording the result in the
    /// run statistics. Failures carry the raw record.
    pub async fn process_record(&self, raw: RawRecord) -> Result<Outcome, RecordFailure> {
        let result = match normalize(&raw) {
            Ok(revision) => self.reconcile(&revision).await,
            Err(err) => Err(ReconcileError::from(err)),
        };
        match result {
            Ok(outcome) => {
                self.stats.record(outcome);
                Ok(outcome)
            }
            Err(err) => {
                warn!(paper_id = err.paper_id().unwrap_or("<unknown>"), error = %err, "record failed");
                let failure = RecordFailure {
                    paper_id: err.paper_id().map(String::from),
                    error: err.to_string(),
                    raw: Some(raw),
                };
                self.stats.record_failure(failure.clone());
                Err(failure)
            }
        }
    }

    /// Sequentially process a batch and return the cumulative report.
    pub async fn process_all<I>(&self, records: I) -> SyncReport
    where
        I: IntoIterator<Item = RawRecord>,
    {
        for raw in records {
            let _ = self.process_record(raw).await;
        }
        self.report()
    }

    /// What [`reconcile`](Self::reconcile) would do with `raw`, without
    /// writing anything.
    pub async fn plan(&self, raw: &RawRecord) -> Result<Outcome, ReconcileError> {
        let revision = normalize(raw)?;
        let existing = self
            .store
            .get_by_identity(&revision.paper_id)
            .await
            .map_err(|source| ReconcileError::Store {
                paper_id: revision.paper_id.clone(),
                source,
            })?;
        Ok(classify(
            existing.map(|paper| paper.update_date),
            revision.revision_date,
        ))
    }
}
