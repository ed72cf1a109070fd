//! Paper retrieval by identifier (`axs get`).

use anyhow::{bail, Result};
use serde::Serialize;

use arxiv_sync_core::models::format_date;
use arxiv_sync_core::store::PaperStore;

use crate::config::Config;
use crate::db;
use crate::sqlite_store::SqliteStore;

/// A stored paper as printed by `axs get --json`.
#[derive(Debug, Clone, Serialize)]
pub struct PaperResponse {
    pub paper_id: String,
    pub update_date: String,
    pub categories: Vec<String>,
    pub embedded: bool,
    pub document: serde_json::Value,
}

/// Load a paper and its categories. `Ok(None)` if the store has no such paper.
pub async fn get_paper<S: PaperStore + ?Sized>(
    store: &S,
    paper_id: &str,
) -> Result<Option<PaperResponse>> {
    let Some(paper) = store.get_by_identity(paper_id).await? else {
        return Ok(None);
    };
    let categories = store.get_categories(paper_id).await?;

    Ok(Some(PaperResponse {
        paper_id: paper.paper_id,
        update_date: format_date(paper.update_date),
        categories: categories.into_iter().collect(),
        embedded: paper.embedding.is_some(),
        document: paper.document,
    }))
}

/// CLI entry point: print the paper as text or JSON.
pub async fn run_get(config: &Config, paper_id: &str, json: bool) -> Result<()> {
    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool.clone());
    let paper = get_paper(&store, paper_id).await;
    pool.close().await;

    let paper = match paper? {
        Some(paper) => paper,
        None => bail!("paper not found: {}", paper_id),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&paper)?);
        return Ok(());
    }

    println!("--- Paper ---");
    println!("paper_id:     {}", paper.paper_id);
    println!("update_date:  {}", paper.update_date);
    println!("categories:   {}", paper.categories.join(" "));
    println!("embedded:     {}", if paper.embedded { "yes" } else { "no" });
    println!();
    println!("--- Document ---");
    println!("{}", serde_json::to_string_pretty(&paper.document)?);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use arxiv_sync_core::models::RawRecord;
    use arxiv_sync_core::reconcile::{ReconcileConfig, Reconciler};
    use arxiv_sync_core::store::memory::InMemoryStore;
    use serde_json::json;

    #[tokio::test]
    async fn returns_latest_revision_with_categories() {
        let engine = Reconciler::new(InMemoryStore::new(), ReconcileConfig::default());
        engine
            .process_record(RawRecord {
                identifier: Some("2401.00001".into()),
                datestamp: Some("2024-01-03".into()),
                categories: json!(["cs:cs:LG", "cs:cs:AI"]),
                metadata: json!({"title": "t"}),
            })
            .await
            .unwrap();

        let paper = get_paper(engine.store(), "2401.00001")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(paper.update_date, "2024-01-03");
        assert_eq!(paper.categories, vec!["cs:cs:AI", "cs:cs:LG"]);
        assert!(!paper.embedded);
        assert_eq!(paper.document, json!({"title": "t"}));

        assert!(get_paper(engine.store(), "missing").await.unwrap().is_none());
    }
}
