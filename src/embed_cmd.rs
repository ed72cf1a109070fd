//! `axs embed pending`: backfill embeddings for papers that have none.
//!
//! A paper needs an embedding when it has none, or when its last accepted
//! revision cleared it. Every vector is written against the revision date it
//! was computed from; if a newer revision lands while a batch is in flight,
//! the write is refused and the paper stays pending for the next run.

use std::future::Future;

use anyhow::{bail, Result};
use serde_json::Value;

use arxiv_sync_core::models::CategoryFilter;
use arxiv_sync_core::store::PaperStore;

use crate::config::Config;
use crate::db;
use crate::embedding;
use crate::sqlite_store::SqliteStore;

/// Counts from one backfill pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct EmbedSummary {
    pub pending: u64,
    pub embedded: u64,
    /// Refused because the paper moved to a newer revision meanwhile.
    pub stale: u64,
    /// No title or abstract to embed.
    pub empty: u64,
    pub failed: u64,
}

pub async fn run_embed_pending(
    config: &Config,
    limit: Option<usize>,
    batch_size_override: Option<usize>,
    dry_run: bool,
) -> Result<()> {
    if !config.embedding.is_enabled() {
        bail!("Embedding provider is disabled. Set [embedding] provider in config.");
    }

    let provider = embedding::create_provider(&config.embedding)?;
    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool.clone());
    let filter = config.embedding.category_filter();
    let batch_size = batch_size_override
        .unwrap_or(config.embedding.batch_size)
        .max(1);

    if dry_run {
        let pending = store.find_missing_embeddings(&filter, limit).await?;
        println!("embed pending (dry-run)");
        println!("  papers needing embeddings: {}", pending.len());
        pool.close().await;
        return Ok(());
    }

    let summary = embed_pending(
        &store,
        &filter,
        limit,
        batch_size,
        provider.model_name(),
        |texts: Vec<String>| {
            let provider = provider.as_ref();
            let embedding_config = &config.embedding;
            async move { embedding::embed_texts(provider, embedding_config, &texts).await }
        },
    )
    .await?;

    println!("embed pending");
    if summary.pending == 0 {
        println!("  all papers up to date");
    } else {
        println!("  total pending: {}", summary.pending);
        println!("  embedded: {}", summary.embedded);
        println!("  stale: {}", summary.stale);
        println!("  no text: {}", summary.empty);
        println!("  failed: {}", summary.failed);
    }

    pool.close().await;
    Ok(())
}

/// Embed every paper matching `filter` that lacks an embedding.
///
/// `embed` turns a batch of texts into one vector per text. A failed batch is
/// logged and counted; the remaining batches still run.
pub async fn embed_pending<S, F, Fut>(
    store: &S,
    filter: &CategoryFilter,
    limit: Option<usize>,
    batch_size: usize,
    model: &str,
    mut embed: F,
) -> Result<EmbedSummary>
where
    S: PaperStore + ?Sized,
    F: FnMut(Vec<String>) -> Fut,
    Fut: Future<Output = Result<Vec<Vec<f32>>>>,
{
    let pending = store.find_missing_embeddings(filter, limit).await?;
    let mut summary = EmbedSummary {
        pending: pending.len() as u64,
        ..EmbedSummary::default()
    };

    let mut work = Vec::with_capacity(pending.len());
    for paper in pending {
        match embedding_text(&paper.document) {
            Some(text) => work.push((paper, text)),
            None => {
                tracing::debug!(paper_id = %paper.paper_id, "no text to embed");
                summary.empty += 1;
            }
        }
    }

    for batch in work.chunks(batch_size.max(1)) {
        let texts: Vec<String> = batch.iter().map(|(_, text)| text.clone()).collect();

        let vectors = match embed(texts).await {
            Ok(vectors) => vectors,
            Err(e) => {
                tracing::warn!(error = %e, papers = batch.len(), "embedding batch failed");
                summary.failed += batch.len() as u64;
                continue;
            }
        };

        for ((paper, _), vector) in batch.iter().zip(vectors.iter()) {
            let stored = store
                .store_embedding(&paper.paper_id, paper.update_date, model, vector)
                .await?;
            if stored {
                summary.embedded += 1;
            } else {
                tracing::debug!(paper_id = %paper.paper_id, "paper changed while embedding, left pending");
                summary.stale += 1;
            }
        }
    }

    Ok(summary)
}

/// Title and abstract of a stored paper document, blank-line separated.
///
/// Looks inside the first metadata format of a harvested record
/// (`metadata.arXivRaw`), or at the top level of flat replayed documents.
pub fn embedding_text(document: &Value) -> Option<String> {
    let fields = document
        .get("metadata")
        .and_then(Value::as_object)
        .and_then(|formats| formats.values().next())
        .unwrap_or(document);

    let parts: Vec<String> = ["title", "abstract"]
        .iter()
        .filter_map(|key| fields.get(*key))
        .filter_map(plain_text)
        .map(|text| text.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|text| !text.is_empty())
        .collect();

    if parts.is_empty() {
        None
    } else {
        Some(parts.join("\n\n"))
    }
}

fn plain_text(value: &Value) -> Option<&str> {
    match value {
        Value::String(s) => Some(s),
        Value::Object(map) => map.get("#text").and_then(Value::as_str),
        _ => None,
    }
}
