//! # arxiv-sync core
//!
//! Storage-agnostic logic for arxiv-sync: paper models, record
//! normalization, the store contract, and the revision reconciliation
//! engine that decides whether an incoming record is new, stale, or a
//! genuine update.
//!
//! This crate contains no sqlx, HTTP, or filesystem dependencies. The
//! durable SQLite backend and the OAI-PMH feed client live in the
//! `arxiv-sync` app crate.
//!
//! # Pipeline
//!
//! ```text
//! RawRecord ──► normalize ──► Reconciler::reconcile ──► StoreSession
//!                                   │                    ├─ upsert_if_newer
//!                                   │                    ├─ diff_categories
//!                                   │                    ├─ invalidate_embedding
//!                                   │                    └─ commit
//!                                   └─► SyncReport (inserted / updated / skipped / failed)
//! ```

pub mod categories;
pub mod embedding;
pub mod error;
pub mod invalidation;
pub mod models;
pub mod normalize;
pub mod reconcile;
pub mod store;
pub mod watermark;
