//! Sync pipeline orchestration.
//!
//! Coordinates one harvest: resolve the start date (explicit `--from`, the
//! store's watermark, or `feed.initial_from`), stream records from the feed,
//! reconcile them with bounded concurrency, and record the run.
//!
//! Ctrl-C stops pulling new records; records already in flight finish (or
//! roll back) on their own. Record-level failures never abort the run. A
//! feed failure ends it early, keeping everything committed so far.

use std::cell::Cell;
use std::path::PathBuf;
use std::pin::pin;

use anyhow::{anyhow, Result};
use chrono::NaiveDate;
use futures::future;
use futures::stream::{self, BoxStream, Stream, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use arxiv_sync_core::models::{format_date, parse_date, Outcome, RawRecord, SyncReport};
use arxiv_sync_core::reconcile::{ReconcileConfig, Reconciler};
use arxiv_sync_core::store::PaperStore;
use arxiv_sync_core::watermark::next_sync_from;

use crate::config::Config;
use crate::db;
use crate::feed::{self, FeedError, OaiPmhClient};
use crate::progress::{ProgressMode, SyncProgressEvent, SyncProgressReporter};
use crate::sqlite_store::{RunStatus, SqliteStore};

/// Progress is reported every this many records.
const PROGRESS_EVERY: u64 = 100;

/// Options of `axs sync`.
#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub from: Option<String>,
    pub until: Option<String>,
    /// Ignore the watermark and start from `feed.initial_from`.
    pub full: bool,
    /// Replay a JSON-lines file instead of harvesting.
    pub file: Option<PathBuf>,
    pub limit: Option<usize>,
    pub dry_run: bool,
    pub progress: ProgressMode,
}

/// Outcome of [`reconcile_stream`].
#[derive(Debug)]
pub struct PipelineResult {
    pub report: SyncReport,
    /// Set when the feed failed and the run ended early.
    pub feed_error: Option<FeedError>,
    pub cancelled: bool,
}

pub async fn run_sync(config: &Config, opts: SyncOptions) -> Result<()> {
    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool.clone());

    let until = opts.until.as_deref().map(parse_cli_date).transpose()?;
    let from = resolve_from(config, &store, opts.from.as_deref(), opts.full).await?;
    let label = from.map(format_date);

    let client = OaiPmhClient::new(&config.feed)?;
    let records = record_stream(&client, &opts, from, until)?;
    let reconciler = Reconciler::new(
        store.clone(),
        ReconcileConfig {
            max_conflict_retries: config.sync.max_conflict_retries,
        },
    );

    let cancel = CancellationToken::new();
    let ctrl_c = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupted, finishing in-flight records");
                cancel.cancel();
            }
        })
    };

    if opts.dry_run {
        let plan = plan_stream(&reconciler, records, config.sync.concurrency, &cancel).await;
        ctrl_c.abort();
        println!("sync arxiv (dry-run)");
        println!("  from: {}", label.as_deref().unwrap_or("beginning"));
        println!("  would insert: {}", plan.inserted);
        println!("  would update: {}", plan.updated);
        println!("  would skip: {}", plan.skipped);
        println!("  malformed: {}", plan.failed);
        pool.close().await;
        return match plan.feed_error {
            Some(err) => Err(anyhow!(err).context("feed harvest failed")),
            None => Ok(()),
        };
    }

    let run_id = store.begin_run(from, until).await?;
    info!(run_id = %run_id, from = ?label, until = ?until.map(format_date), "sync started");

    let reporter = opts.progress.reporter();
    reporter.report(SyncProgressEvent::Starting {
        from: label.clone(),
    });
    let result = reconcile_stream(
        &reconciler,
        records,
        config.sync.concurrency,
        &cancel,
        reporter.as_ref(),
    )
    .await;
    ctrl_c.abort();

    let status = if result.feed_error.is_some() {
        RunStatus::Failed
    } else if result.cancelled {
        RunStatus::Cancelled
    } else {
        RunStatus::Completed
    };
    let error_text = result.feed_error.as_ref().map(|e| e.to_string());
    store
        .finish_run(&run_id, status, &result.report, error_text.as_deref())
        .await?;
    let watermark = next_sync_from(&store, config.feed.overlap()).await?;

    let report = &result.report;
    info!(
        run_id = %run_id,
        status = status.as_str(),
        inserted = report.inserted,
        updated = report.updated,
        skipped = report.skipped,
        failed = report.failed,
        "sync finished"
    );

    println!("sync arxiv");
    println!("  from: {}", label.as_deref().unwrap_or("beginning"));
    println!("  inserted: {}", report.inserted);
    println!("  updated: {}", report.updated);
    println!("  skipped: {}", report.skipped);
    println!("  failed: {}", report.failed);
    let mut failed_ids = report.failed_ids();
    failed_ids.sort_unstable();
    if !failed_ids.is_empty() {
        println!("  failed ids: {}", failed_ids.join(", "));
    }
    println!(
        "  next from: {}",
        watermark.map(format_date).as_deref().unwrap_or("beginning")
    );
    println!("  run: {} ({})", run_id, status.as_str());

    pool.close().await;

    if let Some(err) = result.feed_error {
        return Err(anyhow!(err).context("feed harvest failed"));
    }
    println!("ok");
    Ok(())
}

/// Print where the next incremental sync would start.
pub async fn run_watermark(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool.clone());
    match next_sync_from(&store, config.feed.overlap()).await? {
        Some(date) => println!("{}", format_date(date)),
        None => match config.feed.initial_from_date() {
            Some(date) => println!("{} (initial_from, store is empty)", format_date(date)),
            None => println!("beginning (store is empty)"),
        },
    }
    pool.close().await;
    Ok(())
}

fn parse_cli_date(value: &str) -> Result<NaiveDate> {
    parse_date(value).ok_or_else(|| anyhow!("invalid date '{}': expected YYYY-MM-DD", value))
}

/// Explicit `--from` wins, then the watermark (unless `--full`), then
/// `feed.initial_from`. `None` harvests the whole history.
async fn resolve_from<S: PaperStore>(
    config: &Config,
    store: &S,
    from_arg: Option<&str>,
    full: bool,
) -> Result<Option<NaiveDate>> {
    if let Some(from) = from_arg {
        return Ok(Some(parse_cli_date(from)?));
    }
    if !full {
        if let Some(date) = next_sync_from(store, config.feed.overlap()).await? {
            return Ok(Some(date));
        }
    }
    Ok(config.feed.initial_from_date())
}

fn record_stream<'a>(
    client: &'a OaiPmhClient,
    opts: &SyncOptions,
    from: Option<NaiveDate>,
    until: Option<NaiveDate>,
) -> Result<BoxStream<'a, Result<RawRecord, FeedError>>> {
    let records = match &opts.file {
        Some(path) => {
            if opts.from.is_some() || opts.until.is_some() {
                warn!("--from/--until are ignored when replaying a file");
            }
            stream::iter(feed::read_jsonl(path)?).boxed()
        }
        None => client.records(from, until).boxed(),
    };
    Ok(match opts.limit {
        Some(limit) => records.take(limit).boxed(),
        None => records,
    })
}

/// Stop after the first feed error, and stash it in `slot`.
fn until_feed_error<'a, St>(
    records: St,
    slot: &'a Cell<Option<FeedError>>,
) -> impl Stream<Item = RawRecord> + 'a
where
    St: Stream<Item = Result<RawRecord, FeedError>> + 'a,
{
    records
        .scan(false, |failed, item| {
            if *failed {
                return future::ready(None);
            }
            *failed = item.is_err();
            future::ready(Some(item))
        })
        .filter_map(move |item| {
            future::ready(match item {
                Ok(raw) => Some(raw),
                Err(err) => {
                    warn!(error = %err, "feed failed, stopping");
                    slot.set(Some(err));
                    None
                }
            })
        })
}

/// Reconcile every record of `records`, at most `concurrency` at a time.
pub async fn reconcile_stream<S, St>(
    reconciler: &Reconciler<S>,
    records: St,
    concurrency: usize,
    cancel: &CancellationToken,
    progress: &dyn SyncProgressReporter,
) -> PipelineResult
where
    S: PaperStore,
    St: Stream<Item = Result<RawRecord, FeedError>>,
{
    let feed_error = Cell::new(None);
    let mut outcomes = pin!(until_feed_error(records.take_until(cancel.cancelled()), &feed_error)
        .map(|raw| reconciler.process_record(raw))
        .buffer_unordered(concurrency.max(1)));

    let mut processed = 0u64;
    while outcomes.next().await.is_some() {
        processed += 1;
        if processed % PROGRESS_EVERY == 0 {
            progress.report(SyncProgressEvent::reconciling(&reconciler.report()));
        }
    }

    let report = reconciler.report();
    progress.report(SyncProgressEvent::reconciling(&report));
    PipelineResult {
        report,
        feed_error: feed_error.take(),
        cancelled: cancel.is_cancelled(),
    }
}

/// Dry-run classification counts. `failed` counts malformed records.
#[derive(Debug, Default)]
pub struct PlanSummary {
    pub inserted: u64,
    pub updated: u64,
    pub skipped: u64,
    pub failed: u64,
    pub feed_error: Option<FeedError>,
}

/// Classify every record without writing anything.
pub async fn plan_stream<S, St>(
    reconciler: &Reconciler<S>,
    records: St,
    concurrency: usize,
    cancel: &CancellationToken,
) -> PlanSummary
where
    S: PaperStore,
    St: Stream<Item = Result<RawRecord, FeedError>>,
{
    let feed_error = Cell::new(None);
    let mut plans = pin!(until_feed_error(records.take_until(cancel.cancelled()), &feed_error)
        .map(|raw| async move { reconciler.plan(&raw).await })
        .buffer_unordered(concurrency.max(1)));

    let mut summary = PlanSummary::default();
    while let Some(plan) = plans.next().await {
        match plan {
            Ok(Outcome::Inserted) => summary.inserted += 1,
            Ok(Outcome::Updated) => summary.updated += 1,
            Ok(Outcome::Skipped) => summary.skipped += 1,
            Err(_) => summary.failed += 1,
        }
    }
    summary.feed_error = feed_error.take();
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::NoProgress;
    use arxiv_sync_core::store::memory::InMemoryStore;
    use serde_json::json;

    fn raw(id: &str, date: &str) -> RawRecord {
        RawRecord {
            identifier: Some(id.to_string()),
            datestamp: Some(date.to_string()),
            categories: json!("cs:cs:AI"),
            metadata: json!({"id": id, "date": date}),
        }
    }

    fn engine() -> Reconciler<InMemoryStore> {
        Reconciler::new(InMemoryStore::new(), ReconcileConfig::default())
    }

    #[tokio::test]
    async fn reconciles_whole_stream() {
        let engine = engine();
        let records: Vec<Result<RawRecord, FeedError>> = (0..250)
            .map(|i| Ok(raw(&format!("p{i}"), "2024-01-01")))
            .chain(std::iter::once(Ok(raw("p0", "2024-01-02"))))
            .collect();
        let result = reconcile_stream(
            &engine,
            stream::iter(records),
            8,
            &CancellationToken::new(),
            &NoProgress,
        )
        .await;

        assert!(result.feed_error.is_none());
        assert!(!result.cancelled);
        // p0's newer revision may race its own insert; either way both land.
        assert_eq!(result.report.total(), 251);
        assert_eq!(result.report.failed, 0);
        assert_eq!(engine.store().paper_count().await, 250);
        let p0 = engine.store().get_by_identity("p0").await.unwrap().unwrap();
        assert_eq!(p0.update_date, NaiveDate::from_ymd_opt(2024, 1, 2).unwrap());
    }

    #[tokio::test]
    async fn feed_error_ends_the_run() {
        let engine = engine();
        let records = vec![
            Ok(raw("p1", "2024-01-01")),
            Err(FeedError::Xml("boom".into())),
            Ok(raw("p2", "2024-01-01")),
        ];
        let result = reconcile_stream(
            &engine,
            stream::iter(records),
            1,
            &CancellationToken::new(),
            &NoProgress,
        )
        .await;

        assert!(matches!(result.feed_error, Some(FeedError::Xml(_))));
        assert_eq!(result.report.inserted, 1);
        assert!(engine.store().get_by_identity("p2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn cancelled_run_pulls_nothing() {
        let engine = engine();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = reconcile_stream(
            &engine,
            stream::iter(vec![Ok(raw("p1", "2024-01-01"))]),
            4,
            &cancel,
            &NoProgress,
        )
        .await;
        assert!(result.cancelled);
        assert_eq!(result.report.total(), 0);
    }

    #[tokio::test]
    async fn plan_counts_without_writing() {
        let engine = engine();
        engine.process_record(raw("p1", "2024-01-02")).await.unwrap();

        let mut malformed = raw("p3", "2024-01-01");
        malformed.categories = json!([]);
        let summary = plan_stream(
            &engine,
            stream::iter(vec![
                Ok(raw("p1", "2024-01-03")),
                Ok(raw("p1", "2024-01-02")),
                Ok(raw("p2", "2024-01-01")),
                Ok(malformed),
            ]),
            2,
            &CancellationToken::new(),
        )
        .await;

        assert_eq!(summary.updated, 1);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.inserted, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(engine.store().paper_count().await, 1);
    }
}
