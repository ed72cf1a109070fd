//! # arXiv Sync
//!
//! Keeps a local SQLite copy of arXiv paper metadata in step with the arXiv
//! OAI-PMH feed, one accepted revision per paper.
//!
//! The revision rules live in [`arxiv_sync_core`]; this crate supplies the
//! feed client, the SQLite store, embedding providers, and the `axs` CLI.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────┐   ┌──────────────┐
//! │  OAI-PMH    │──▶│  Reconciler  │──▶│    SQLite    │
//! │ feed / file │   │ (core crate) │   │ papers, cats │
//! └─────────────┘   └──────────────┘   └──────┬───────┘
//!                                             │
//!                                             ▼
//!                                      ┌──────────────┐
//!                                      │ embed pending│
//!                                      └──────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! axs init                 # create database
//! axs sync                 # harvest since the watermark
//! axs embed pending        # embed papers missing vectors
//! axs get 2401.00001
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`feed`] | OAI-PMH client and JSON-lines replay |
//! | [`sqlite_store`] | SQLite implementation of the paper store, run ledger |
//! | [`ingest`] | Sync pipeline (`axs sync`, `axs watermark`) |
//! | [`progress`] | Sync progress reporting |
//! | [`embedding`] | Embedding providers |
//! | [`embed_cmd`] | Embedding backfill |
//! | [`get`] | Paper lookup |
//! | [`stats`] | Database statistics |
//! | [`logging`] | tracing subscriber setup |

pub mod config;
pub mod db;
pub mod embed_cmd;
pub mod embedding;
pub mod feed;
pub mod get;
pub mod ingest;
pub mod logging;
pub mod migrate;
pub mod progress;
pub mod sqlite_store;
pub mod stats;
