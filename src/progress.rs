//! Sync progress reporting.
//!
//! Reports observable progress during `axs sync` so users see how far the
//! harvest has got. Progress is emitted on **stderr** so stdout remains
//! parseable for scripts. The total is unknown up front (the feed is paged
//! lazily), so events carry running counts only.

use std::io::Write;

use arxiv_sync_core::models::SyncReport;

/// A single progress event for sync.
#[derive(Clone, Debug)]
pub enum SyncProgressEvent {
    /// Harvest started from this date (`None` = from the beginning).
    Starting { from: Option<String> },
    /// Running totals after `n` records.
    Reconciling {
        n: u64,
        inserted: u64,
        updated: u64,
        skipped: u64,
        failed: u64,
    },
}

impl SyncProgressEvent {
    pub fn reconciling(report: &SyncReport) -> Self {
        SyncProgressEvent::Reconciling {
            n: report.total(),
            inserted: report.inserted,
            updated: report.updated,
            skipped: report.skipped,
            failed: report.failed,
        }
    }
}

/// Reports sync progress. Implementations write to stderr (human or JSON).
pub trait SyncProgressReporter: Send + Sync {
    /// Emit a progress event. Called from the sync pipeline.
    fn report(&self, event: SyncProgressEvent);
}

/// Human-friendly progress on stderr: "sync  1,234 records  (+12 new, ~3 updated, 1 failed)".
pub struct StderrProgress;

impl SyncProgressReporter for StderrProgress {
    fn report(&self, event: SyncProgressEvent) {
        let line = match &event {
            SyncProgressEvent::Starting { from } => match from {
                Some(from) => format!("sync  harvesting from {}...\n", from),
                None => "sync  harvesting full history...\n".to_string(),
            },
            SyncProgressEvent::Reconciling {
                n,
                inserted,
                updated,
                failed,
                ..
            } => format!(
                "sync  {} records  (+{} new, ~{} updated, {} failed)\n",
                format_number(*n),
                format_number(*inserted),
                format_number(*updated),
                format_number(*failed)
            ),
        };
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
        let _ = std::io::stderr().lock().flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl SyncProgressReporter for JsonProgress {
    fn report(&self, event: SyncProgressEvent) {
        let obj = match &event {
            SyncProgressEvent::Starting { from } => serde_json::json!({
                "event": "progress",
                "phase": "starting",
                "from": from
            }),
            SyncProgressEvent::Reconciling {
                n,
                inserted,
                updated,
                skipped,
                failed,
            } => serde_json::json!({
                "event": "progress",
                "phase": "reconciling",
                "n": n,
                "inserted": inserted,
                "updated": updated,
                "skipped": skipped,
                "failed": failed
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let _ = writeln!(std::io::stderr().lock(), "{}", line);
            let _ = std::io::stderr().lock().flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl SyncProgressReporter for NoProgress {
    fn report(&self, _event: SyncProgressEvent) {}
}

pub fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    for (i, c) in s.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq, clap::ValueEnum)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn SyncProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}
