//! In-memory [`PaperStore`] for tests and dry runs.
//!
//! All state sits behind one `tokio::sync::Mutex`. A session holds the
//! owned guard for its whole lifetime, so sessions are fully serialized,
//! and keeps an undo log that is replayed on drop unless the session
//! committed.
//!
//! The store counts committed writes per kind ([`WriteStats`]) and can be
//! told to fail writes for a given paper ([`InMemoryStore::inject_fault`]),
//! which lets tests observe no-op short-circuits and per-record failure
//! isolation.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::error::StoreError;
use crate::models::{CategoryFilter, CategorySet, Outcome, PendingPaper, StoredPaper};

use super::{PaperStore, StoreSession};

/// Committed write counts, by kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteStats {
    pub document_writes: u64,
    pub category_writes: u64,
    pub embedding_clears: u64,
    pub embedding_writes: u64,
}

/// Failure to simulate on `upsert_if_newer` for one paper.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    Unavailable,
    Conflict,
}

#[derive(Debug, Clone)]
struct PaperRow {
    document: serde_json::Value,
    update_date: NaiveDate,
}

#[derive(Debug, Clone)]
struct EmbeddingRow {
    vector: Vec<f32>,
    _model: String,
}

#[derive(Debug, Clone, Copy)]
struct Fault {
    kind: FaultKind,
    remaining: u32,
}

#[derive(Default)]
struct MemState {
    papers: HashMap<String, PaperRow>,
    categories: HashMap<String, CategorySet>,
    embeddings: HashMap<String, EmbeddingRow>,
    faults: HashMap<String, Fault>,
    writes: WriteStats,
}

enum Undo {
    Paper(String, Option<PaperRow>),
    Categories(String, Option<CategorySet>),
    Embedding(String, Option<EmbeddingRow>),
}

/// In-memory paper store. Cloning shares the underlying state.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    state: Arc<Mutex<MemState>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Committed write counts so far.
    pub async fn write_stats(&self) -> WriteStats {
        self.state.lock().await.writes
    }

    pub async fn paper_count(&self) -> usize {
        self.state.lock().await.papers.len()
    }

    /// Make the next `times` upserts of `paper_id` fail with `kind`.
    pub async fn inject_fault(&self, paper_id: &str, kind: FaultKind, times: u32) {
        self.state.lock().await.faults.insert(
            paper_id.to_string(),
            Fault {
                kind,
                remaining: times,
            },
        );
    }
}

#[async_trait]
impl PaperStore for InMemoryStore {
    type Session = MemorySession;

    async fn begin(&self) -> Result<MemorySession, StoreError> {
        let guard = self.state.clone().lock_owned().await;
        Ok(MemorySession {
            guard,
            undo: Vec::new(),
            pending: WriteStats::default(),
            committed: false,
        })
    }

    async fn get_by_identity(&self, paper_id: &str) -> Result<Option<StoredPaper>, StoreError> {
        let state = self.state.lock().await;
        Ok(state.papers.get(paper_id).map(|row| StoredPaper {
            paper_id: paper_id.to_string(),
            document: row.document.clone(),
            update_date: row.update_date,
            embedding: state.embeddings.get(paper_id).map(|e| e.vector.clone()),
        }))
    }

    async fn get_categories(&self, paper_id: &str) -> Result<CategorySet, StoreError> {
        let state = self.state.lock().await;
        Ok(state.categories.get(paper_id).cloned().unwrap_or_default())
    }

    async fn max_update_date(&self) -> Result<Option<NaiveDate>, StoreError> {
        let state = self.state.lock().await;
        Ok(state.papers.values().map(|row| row.update_date).max())
    }

    async fn find_missing_embeddings(
        &self,
        filter: &CategoryFilter,
        limit: Option<usize>,
    ) -> Result<Vec<PendingPaper>, StoreError> {
        let state = self.state.lock().await;
        let empty = CategorySet::new();
        let mut pending: Vec<PendingPaper> = state
            .papers
            .iter()
            .filter(|(id, _)| !state.embeddings.contains_key(*id))
            .filter(|(id, _)| filter.matches(state.categories.get(*id).unwrap_or(&empty)))
            .map(|(id, row)| PendingPaper {
                paper_id: id.clone(),
                document: row.document.clone(),
                update_date: row.update_date,
            })
            .collect();
        pending.sort_by(|a, b| a.paper_id.cmp(&b.paper_id));
        if let Some(limit) = limit {
            pending.truncate(limit);
        }
        Ok(pending)
    }

    async fn store_embedding(
        &self,
        paper_id: &str,
        revision_date: NaiveDate,
        model: &str,
        vector: &[f32],
    ) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        let current = state.papers.get(paper_id).map(|row| row.update_date);
        if current != Some(revision_date) {
            return Ok(false);
        }
        state.embeddings.insert(
            paper_id.to_string(),
            EmbeddingRow {
                vector: vector.to_vec(),
                _model: model.to_string(),
            },
        );
        state.writes.embedding_writes += 1;
        Ok(true)
    }
}

/// Exclusive session over an [`InMemoryStore`].
pub struct MemorySession {
    guard: OwnedMutexGuard<MemState>,
    undo: Vec<Undo>,
    pending: WriteStats,
    committed: bool,
}

impl MemorySession {
    fn take_fault(&mut self, paper_id: &str) -> Option<FaultKind> {
        let fault = self.guard.faults.get_mut(paper_id)?;
        let kind = fault.kind;
        fault.remaining = fault.remaining.saturating_sub(1);
        if fault.remaining == 0 {
            self.guard.faults.remove(paper_id);
        }
        Some(kind)
    }
}

#[async_trait]
impl StoreSession for MemorySession {
    async fn upsert_if_newer(
        &mut self,
        paper_id: &str,
        document: &serde_json::Value,
        revision_date: NaiveDate,
    ) -> Result<Outcome, StoreError> {
        match self.take_fault(paper_id) {
            Some(FaultKind::Unavailable) => {
                return Err(StoreError::Unavailable(format!("injected fault for {paper_id}")))
            }
            Some(FaultKind::Conflict) => {
                return Err(StoreError::Conflict(format!("injected fault for {paper_id}")))
            }
            None => {}
        }

        let previous = self.guard.papers.get(paper_id).cloned();
        let outcome = match &previous {
            None => Outcome::Inserted,
            Some(row) if row.update_date < revision_date => Outcome::Updated,
            Some(_) => return Ok(Outcome::Skipped),
        };
        self.guard.papers.insert(
            paper_id.to_string(),
            PaperRow {
                document: document.clone(),
                update_date: revision_date,
            },
        );
        self.undo.push(Undo::Paper(paper_id.to_string(), previous));
        self.pending.document_writes += 1;
        Ok(outcome)
    }

    async fn get_categories(&mut self, paper_id: &str) -> Result<CategorySet, StoreError> {
        Ok(self.guard.categories.get(paper_id).cloned().unwrap_or_default())
    }

    async fn replace_categories(
        &mut self,
        paper_id: &str,
        categories: &CategorySet,
    ) -> Result<(), StoreError> {
        let previous = self
            .guard
            .categories
            .insert(paper_id.to_string(), categories.clone());
        self.undo.push(Undo::Categories(paper_id.to_string(), previous));
        self.pending.category_writes += 1;
        Ok(())
    }

    async fn clear_embedding(&mut self, paper_id: &str) -> Result<(), StoreError> {
        let previous = self.guard.embeddings.remove(paper_id);
        self.undo.push(Undo::Embedding(paper_id.to_string(), previous));
        self.pending.embedding_clears += 1;
        Ok(())
    }

    async fn commit(mut self) -> Result<(), StoreError> {
        let pending = self.pending;
        let writes = &mut self.guard.writes;
        writes.document_writes += pending.document_writes;
        writes.category_writes += pending.category_writes;
        writes.embedding_clears += pending.embedding_clears;
        self.undo.clear();
        self.committed = true;
        Ok(())
    }
}

impl Drop for MemorySession {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        while let Some(undo) = self.undo.pop() {
            let state = &mut *self.guard;
            match undo {
                Undo::Paper(id, Some(row)) => {
                    state.papers.insert(id, row);
                }
                Undo::Paper(id, None) => {
                    state.papers.remove(&id);
                }
                Undo::Categories(id, Some(set)) => {
                    state.categories.insert(id, set);
                }
                Undo::Categories(id, None) => {
                    state.categories.remove(&id);
                }
                Undo::Embedding(id, Some(row)) => {
                    state.embeddings.insert(id, row);
                }
                Undo::Embedding(id, None) => {
                    state.embeddings.remove(&id);
                }
            }
        }
    }
}
