//! SQLite-backed [`PaperStore`] implementation.
//!
//! A [`SqliteSession`] is a sqlx transaction; dropping it uncommitted rolls
//! back. The date-guarded upsert runs as a conditional `UPDATE` first,
//! which takes SQLite's write lock, and falls back to
//! `INSERT ... ON CONFLICT DO NOTHING`, so two writers racing on the same
//! paper can never both win.
//!
//! Dates are stored as `YYYY-MM-DD` text, whose lexical order is the
//! chronological order.

use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::{Row, Sqlite, SqlitePool, Transaction};

use arxiv_sync_core::embedding::{blob_to_vec, vec_to_blob};
use arxiv_sync_core::error::StoreError;
use arxiv_sync_core::models::{
    format_date, parse_date, CategoryFilter, CategorySet, Outcome, PendingPaper, StoredPaper,
    SyncReport,
};
use arxiv_sync_core::store::{PaperStore, StoreSession};

/// SQLite implementation of [`PaperStore`]. Cloning shares the pool.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

/// Map a sqlx error onto the store taxonomy. Lock contention is a
/// retryable conflict.
fn store_err(err: sqlx::Error) -> StoreError {
    let locked = matches!(
        &err,
        sqlx::Error::Database(db)
            if matches!(db.code().as_deref(), Some("5" | "6" | "261" | "262" | "517" | "773"))
    );
    if locked {
        return StoreError::Conflict(err.to_string());
    }
    if matches!(
        err,
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_)
    ) {
        return StoreError::Unavailable(err.to_string());
    }
    StoreError::Backend(Box::new(err))
}

fn read_date(paper_id: &str, value: &str) -> Result<NaiveDate, StoreError> {
    parse_date(value).ok_or_else(|| {
        StoreError::Corrupt(format!("paper {paper_id}: bad update_date {value:?}"))
    })
}

fn read_document(paper_id: &str, value: &str) -> Result<serde_json::Value, StoreError> {
    serde_json::from_str(value)
        .map_err(|e| StoreError::Corrupt(format!("paper {paper_id}: bad document: {e}")))
}

fn now_ts() -> i64 {
    chrono::Utc::now().timestamp()
}

#[async_trait]
impl PaperStore for SqliteStore {
    type Session = SqliteSession;

    async fn begin(&self) -> Result<SqliteSession, StoreError> {
        let tx = self.pool.begin().await.map_err(store_err)?;
        Ok(SqliteSession { tx, now: now_ts() })
    }

    async fn get_by_identity(&self, paper_id: &str) -> Result<Option<StoredPaper>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT p.document, p.update_date, e.embedding
            FROM papers p
            LEFT JOIN paper_embeddings e ON e.paper_id = p.paper_id
            WHERE p.paper_id = ?
            "#,
        )
        .bind(paper_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_err)?;

        let Some(row) = row else {
            return Ok(None);
        };
        let document: String = row.get("document");
        let update_date: String = row.get("update_date");
        let embedding: Option<Vec<u8>> = row.get("embedding");

        Ok(Some(StoredPaper {
            paper_id: paper_id.to_string(),
            document: read_document(paper_id, &document)?,
            update_date: read_date(paper_id, &update_date)?,
            embedding: embedding.map(|blob| blob_to_vec(&blob)),
        }))
    }

    async fn get_categories(&self, paper_id: &str) -> Result<CategorySet, StoreError> {
        let rows: Vec<String> =
            sqlx::query_scalar("SELECT category FROM paper_categories WHERE paper_id = ?")
                .bind(paper_id)
                .fetch_all(&self.pool)
                .await
                .map_err(store_err)?;
        Ok(rows.into_iter().collect())
    }

    async fn max_update_date(&self) -> Result<Option<NaiveDate>, StoreError> {
        let max: Option<String> = sqlx::query_scalar("SELECT MAX(update_date) FROM papers")
            .fetch_one(&self.pool)
            .await
            .map_err(store_err)?;
        max.map(|value| read_date("<max>", &value)).transpose()
    }

    async fn find_missing_embeddings(
        &self,
        filter: &CategoryFilter,
        limit: Option<usize>,
    ) -> Result<Vec<PendingPaper>, StoreError> {
        let category_clause = match filter {
            CategoryFilter::All => String::new(),
            CategoryFilter::AnyOf(wanted) if wanted.is_empty() => return Ok(Vec::new()),
            CategoryFilter::AnyOf(wanted) => format!(
                "AND EXISTS (SELECT 1 FROM paper_categories c \
                 WHERE c.paper_id = p.paper_id AND c.category IN ({}))",
                vec!["?"; wanted.len()].join(", ")
            ),
        };
        let sql = format!(
            r#"
            SELECT p.paper_id, p.document, p.update_date
            FROM papers p
            LEFT JOIN paper_embeddings e ON e.paper_id = p.paper_id
            WHERE e.embedding IS NULL {category_clause}
            ORDER BY p.paper_id
            LIMIT ?
            "#
        );

        let mut query = sqlx::query(&sql);
        if let CategoryFilter::AnyOf(wanted) = filter {
            for category in wanted {
                query = query.bind(category);
            }
        }
        let limit = limit.map(|l| l as i64).unwrap_or(-1);
        let rows = query
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(store_err)?;

        rows.iter()
            .map(|row| -> Result<PendingPaper, StoreError> {
                let paper_id: String = row.get("paper_id");
                let document: String = row.get("document");
                let update_date: String = row.get("update_date");
                Ok(PendingPaper {
                    document: read_document(&paper_id, &document)?,
                    update_date: read_date(&paper_id, &update_date)?,
                    paper_id,
                })
            })
            .collect()
    }

    async fn store_embedding(
        &self,
        paper_id: &str,
        revision_date: NaiveDate,
        model: &str,
        vector: &[f32],
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO paper_embeddings (paper_id, model, dims, embedding, source_date, created_at)
            SELECT paper_id, ?, ?, ?, update_date, ?
            FROM papers
            WHERE paper_id = ? AND update_date = ?
            ON CONFLICT(paper_id) DO UPDATE SET
                model = excluded.model,
                dims = excluded.dims,
                embedding = excluded.embedding,
                source_date = excluded.source_date,
                created_at = excluded.created_at
            "#,
        )
        .bind(model)
        .bind(vector.len() as i64)
        .bind(vec_to_blob(vector))
        .bind(now_ts())
        .bind(paper_id)
        .bind(format_date(revision_date))
        .execute(&self.pool)
        .await
        .map_err(store_err)?;

        Ok(result.rows_affected() > 0)
    }
}

/// One SQLite transaction.
pub struct SqliteSession {
    tx: Transaction<'static, Sqlite>,
    now: i64,
}

#[async_trait]
impl StoreSession for SqliteSession {
    async fn upsert_if_newer(
        &mut self,
        paper_id: &str,
        document: &serde_json::Value,
        revision_date: NaiveDate,
    ) -> Result<Outcome, StoreError> {
        let document = document.to_string();
        let date = format_date(revision_date);

        let updated = sqlx::query(
            r#"
            UPDATE papers
            SET document = ?, update_date = ?, last_accepted_at = ?
            WHERE paper_id = ? AND update_date < ?
            "#,
        )
        .bind(&document)
        .bind(&date)
        .bind(self.now)
        .bind(paper_id)
        .bind(&date)
        .execute(&mut *self.tx)
        .await
        .map_err(store_err)?
        .rows_affected();
        if updated > 0 {
            return Ok(Outcome::Updated);
        }

        let inserted = sqlx::query(
            r#"
            INSERT INTO papers (paper_id, document, update_date, first_seen_at, last_accepted_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(paper_id) DO NOTHING
            "#,
        )
        .bind(paper_id)
        .bind(&document)
        .bind(&date)
        .bind(self.now)
        .bind(self.now)
        .execute(&mut *self.tx)
        .await
        .map_err(store_err)?
        .rows_affected();

        Ok(if inserted > 0 {
            Outcome::Inserted
        } else {
            Outcome::Skipped
        })
    }

    async fn get_categories(&mut self, paper_id: &str) -> Result<CategorySet, StoreError> {
        let rows: Vec<String> =
            sqlx::query_scalar("SELECT category FROM paper_categories WHERE paper_id = ?")
                .bind(paper_id)
                .fetch_all(&mut *self.tx)
                .await
                .map_err(store_err)?;
        Ok(rows.into_iter().collect())
    }

    async fn replace_categories(
        &mut self,
        paper_id: &str,
        categories: &CategorySet,
    ) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM paper_categories WHERE paper_id = ?")
            .bind(paper_id)
            .execute(&mut *self.tx)
            .await
            .map_err(store_err)?;

        for category in categories {
            sqlx::query("INSERT INTO paper_categories (paper_id, category) VALUES (?, ?)")
                .bind(paper_id)
                .bind(category)
                .execute(&mut *self.tx)
                .await
                .map_err(store_err)?;
        }
        Ok(())
    }

    async fn clear_embedding(&mut self, paper_id: &str) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE paper_embeddings
            SET embedding = NULL, model = NULL, dims = NULL, source_date = NULL
            WHERE paper_id = ?
            "#,
        )
        .bind(paper_id)
        .execute(&mut *self.tx)
        .await
        .map_err(store_err)?;
        Ok(())
    }

    async fn commit(self) -> Result<(), StoreError> {
        self.tx.commit().await.map_err(store_err)
    }
}

// ============ Sync run ledger ============

/// Final state of a sync run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Running,
    Completed,
    Cancelled,
    Failed,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Cancelled => "cancelled",
            RunStatus::Failed => "failed",
        }
    }
}

impl SqliteStore {
    /// Record the start of a sync run and return its id.
    pub async fn begin_run(
        &self,
        from: Option<NaiveDate>,
        until: Option<NaiveDate>,
    ) -> Result<String> {
        let run_id = uuid::Uuid::new_v4().to_string();
        sqlx::query(
            "INSERT INTO sync_runs (id, started_at, from_date, until_date, status) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&run_id)
        .bind(now_ts())
        .bind(from.map(format_date))
        .bind(until.map(format_date))
        .bind(RunStatus::Running.as_str())
        .execute(&self.pool)
        .await?;
        Ok(run_id)
    }

    /// Store the outcome of a run together with every failed record.
    pub async fn finish_run(
        &self,
        run_id: &str,
        status: RunStatus,
        report: &SyncReport,
        error: Option<&str>,
    ) -> Result<()> {
        let now = now_ts();
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            UPDATE sync_runs
            SET finished_at = ?, status = ?, inserted = ?, updated = ?, skipped = ?, failed = ?, error = ?
            WHERE id = ?
            "#,
        )
        .bind(now)
        .bind(status.as_str())
        .bind(report.inserted as i64)
        .bind(report.updated as i64)
        .bind(report.skipped as i64)
        .bind(report.failed as i64)
        .bind(error)
        .bind(run_id)
        .execute(&mut *tx)
        .await?;

        for failure in &report.failures {
            let raw_json = failure
                .raw
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?;
            sqlx::query(
                "INSERT INTO sync_failures (run_id, paper_id, error, raw_json, created_at) VALUES (?, ?, ?, ?, ?)",
            )
            .bind(run_id)
            .bind(&failure.paper_id)
            .bind(&failure.error)
            .bind(raw_json)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }
}
