//! Database statistics and health overview.
//!
//! Summarises what the store holds: paper counts, the revision-date range,
//! embedding coverage, the busiest categories, and the most recent sync run.
//! Used by `axs stats` to confirm that harvests and backfills are working.

use anyhow::Result;
use sqlx::{Row, SqlitePool};

use crate::config::Config;
use crate::db;

/// Number of categories listed by `axs stats`.
const TOP_CATEGORIES: i64 = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreStats {
    pub papers: i64,
    pub embedded: i64,
    pub oldest: Option<String>,
    pub newest: Option<String>,
    /// `(category, papers)`, busiest first.
    pub top_categories: Vec<(String, i64)>,
    pub last_run: Option<RunSummary>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub id: String,
    pub status: String,
    pub started_at: i64,
    pub inserted: i64,
    pub updated: i64,
    pub skipped: i64,
    pub failed: i64,
}

pub async fn collect_stats(pool: &SqlitePool) -> Result<StoreStats> {
    let counts = sqlx::query(
        "SELECT COUNT(*) AS papers, MIN(update_date) AS oldest, MAX(update_date) AS newest FROM papers",
    )
    .fetch_one(pool)
    .await?;

    let embedded: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM paper_embeddings WHERE embedding IS NOT NULL")
            .fetch_one(pool)
            .await?;

    let category_rows = sqlx::query(
        r#"
        SELECT category, COUNT(*) AS papers
        FROM paper_categories
        GROUP BY category
        ORDER BY papers DESC, category ASC
        LIMIT ?
        "#,
    )
    .bind(TOP_CATEGORIES)
    .fetch_all(pool)
    .await?;

    let last_run = sqlx::query(
        r#"
        SELECT id, status, started_at, inserted, updated, skipped, failed
        FROM sync_runs
        ORDER BY started_at DESC, rowid DESC
        LIMIT 1
        "#,
    )
    .fetch_optional(pool)
    .await?
    .map(|row| RunSummary {
        id: row.get("id"),
        status: row.get("status"),
        started_at: row.get("started_at"),
        inserted: row.get("inserted"),
        updated: row.get("updated"),
        skipped: row.get("skipped"),
        failed: row.get("failed"),
    });

    Ok(StoreStats {
        papers: counts.get("papers"),
        embedded,
        oldest: counts.get("oldest"),
        newest: counts.get("newest"),
        top_categories: category_rows
            .iter()
            .map(|row| (row.get("category"), row.get("papers")))
            .collect(),
        last_run,
    })
}

/// Run the stats command: query the database and print a summary.
pub async fn run_stats(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    let stats = collect_stats(&pool).await?;

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("arXiv Sync: Database Stats");
    println!("==========================");
    println!();
    println!("  Database:    {}", config.db.path.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!();
    println!("  Papers:      {}", stats.papers);
    if let (Some(oldest), Some(newest)) = (&stats.oldest, &stats.newest) {
        println!("  Revisions:   {} .. {}", oldest, newest);
    }
    println!(
        "  Embedded:    {} / {} ({}%)",
        stats.embedded,
        stats.papers,
        if stats.papers > 0 {
            (stats.embedded * 100) / stats.papers
        } else {
            0
        }
    );

    if !stats.top_categories.is_empty() {
        println!();
        println!("  Top categories:");
        println!("  {:<32} {:>8}", "CATEGORY", "PAPERS");
        println!("  {}", "-".repeat(41));
        for (category, papers) in &stats.top_categories {
            println!("  {:<32} {:>8}", category, papers);
        }
    }

    println!();
    match &stats.last_run {
        Some(run) => {
            println!(
                "  Last sync:   {} ({}, {})",
                run.id,
                run.status,
                format_ts_relative(run.started_at)
            );
            println!(
                "               +{} new, ~{} updated, {} skipped, {} failed",
                run.inserted, run.updated, run.skipped, run.failed
            );
        }
        None => println!("  Last sync:   never"),
    }
    println!();

    pool.close().await;
    Ok(())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// Format a Unix timestamp as a relative time string (e.g. "3 hours ago").
fn format_ts_relative(ts: i64) -> String {
    let delta = chrono::Utc::now().timestamp() - ts;

    if delta < 0 {
        format_ts_iso(ts)
    } else if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else if delta < 86400 * 30 {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    } else {
        format_ts_iso(ts)
    }
}

fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bytes_human_readable() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.0 MB");
    }

    #[test]
    fn relative_timestamps() {
        let now = chrono::Utc::now().timestamp();
        assert_eq!(format_ts_relative(now), "just now");
        assert_eq!(format_ts_relative(now - 120), "2 mins ago");
        assert_eq!(format_ts_relative(now - 3600), "1 hour ago");
        assert_eq!(format_ts_relative(now - 86400 * 3), "3 days ago");
        assert_eq!(format_ts_relative(0), "1970-01-01 00:00");
    }
}
