use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    apply_schema(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Create all tables and indexes. Idempotent.
pub async fn apply_schema(pool: &SqlitePool) -> Result<()> {
    // Latest accepted revision of each paper
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS papers (
            paper_id TEXT PRIMARY KEY,
            document TEXT NOT NULL,
            update_date TEXT NOT NULL,
            first_seen_at INTEGER NOT NULL,
            last_accepted_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS paper_categories (
            paper_id TEXT NOT NULL,
            category TEXT NOT NULL,
            PRIMARY KEY (paper_id, category),
            FOREIGN KEY (paper_id) REFERENCES papers(paper_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // A NULL embedding (or no row) means the paper needs embedding.
    // source_date is the update_date the vector was computed from.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS paper_embeddings (
            paper_id TEXT PRIMARY KEY,
            model TEXT,
            dims INTEGER,
            embedding BLOB,
            source_date TEXT,
            created_at INTEGER NOT NULL,
            FOREIGN KEY (paper_id) REFERENCES papers(paper_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sync_runs (
            id TEXT PRIMARY KEY,
            started_at INTEGER NOT NULL,
            finished_at INTEGER,
            from_date TEXT,
            until_date TEXT,
            status TEXT NOT NULL,
            inserted INTEGER NOT NULL DEFAULT 0,
            updated INTEGER NOT NULL DEFAULT 0,
            skipped INTEGER NOT NULL DEFAULT 0,
            failed INTEGER NOT NULL DEFAULT 0,
            error TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sync_failures (
            run_id TEXT NOT NULL,
            paper_id TEXT,
            error TEXT NOT NULL,
            raw_json TEXT,
            created_at INTEGER NOT NULL,
            FOREIGN KEY (run_id) REFERENCES sync_runs(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create indexes
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_papers_update_date ON papers(update_date DESC)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_paper_categories_category ON paper_categories(category)",
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_sync_failures_run ON sync_failures(run_id)")
        .execute(pool)
        .await?;

    Ok(())
}
