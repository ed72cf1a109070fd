//! # arXiv Sync CLI (`axs`)
//!
//! ## Usage
//!
//! ```bash
//! axs --config ./config/axs.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `axs init` | Create the SQLite database and run schema migrations |
//! | `axs sync` | Harvest new revisions from the OAI-PMH feed |
//! | `axs sync --file <path>` | Replay records from a JSON-lines file |
//! | `axs watermark` | Print where the next incremental sync starts |
//! | `axs embed pending` | Backfill missing embeddings |
//! | `axs stats` | Database statistics |
//! | `axs get <paper_id>` | Print a stored paper |
//! | `axs completions <shell>` | Generate shell completions |
//!
//! ## Examples
//!
//! ```bash
//! # First harvest of a fresh database
//! axs init && axs sync --from 2024-01-01
//!
//! # Daily incremental run (starts one day before the newest stored revision)
//! axs sync
//!
//! # What would a replay change?
//! axs sync --file dump.jsonl --dry-run
//! ```

use std::path::PathBuf;

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;

use arxiv_sync::config;
use arxiv_sync::embed_cmd;
use arxiv_sync::get;
use arxiv_sync::ingest::{self, SyncOptions};
use arxiv_sync::logging;
use arxiv_sync::migrate;
use arxiv_sync::progress::ProgressMode;
use arxiv_sync::stats;

/// arXiv Sync CLI: keep a local SQLite copy of arXiv metadata current.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/axs.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "axs",
    about = "Incremental arXiv OAI-PMH harvester with revision-safe upserts",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/axs.toml")]
    config: PathBuf,

    /// Debug logging for this tool (overridden by RUST_LOG).
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Idempotent; running it on an existing database is safe.
    Init,

    /// Harvest records and reconcile them into the store.
    ///
    /// Without `--from`, starts one overlap window before the newest stored
    /// revision. Stale and duplicate records are skipped, so overlapping or
    /// repeated runs are safe.
    Sync {
        /// Harvest records changed on or after this date (YYYY-MM-DD).
        #[arg(long)]
        from: Option<String>,

        /// Harvest records changed on or before this date (YYYY-MM-DD).
        #[arg(long)]
        until: Option<String>,

        /// Ignore the watermark and start from `feed.initial_from`.
        #[arg(long, conflicts_with = "from")]
        full: bool,

        /// Replay a JSON-lines file of records instead of harvesting.
        #[arg(long)]
        file: Option<PathBuf>,

        /// Maximum number of records to process.
        #[arg(long)]
        limit: Option<usize>,

        /// Classify records without writing to the database.
        #[arg(long)]
        dry_run: bool,

        /// Progress on stderr. Defaults to `human` on a terminal, else `off`.
        #[arg(long, value_enum)]
        progress: Option<ProgressMode>,
    },

    /// Print the date the next incremental sync starts from.
    Watermark,

    /// Manage embedding vectors.
    Embed {
        #[command(subcommand)]
        action: EmbedAction,
    },

    /// Show database statistics.
    Stats,

    /// Print a stored paper.
    Get {
        /// arXiv identifier, e.g. `2401.00001`.
        paper_id: String,

        /// Print as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Generate shell completions on stdout.
    Completions {
        shell: Shell,
    },
}

/// Embedding management subcommands.
#[derive(Subcommand)]
enum EmbedAction {
    /// Embed papers that have no embedding.
    ///
    /// Covers new papers and papers whose embedding was cleared by a newer
    /// revision. Only papers in `embedding.categories` are considered.
    Pending {
        /// Maximum number of papers to embed in this run.
        #[arg(long)]
        limit: Option<usize>,
        /// Override the batch size from config (number of texts per API call).
        #[arg(long)]
        batch_size: Option<usize>,
        /// Show counts without performing any embedding.
        #[arg(long)]
        dry_run: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Commands that don't require config
    if let Commands::Completions { shell } = &cli.command {
        let mut command = Cli::command();
        clap_complete::generate(*shell, &mut command, "axs", &mut std::io::stdout());
        return Ok(());
    }

    let cfg = config::load_config(&cli.config)?;
    logging::init_logging(&cfg.logging, cli.verbose)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Sync {
            from,
            until,
            full,
            file,
            limit,
            dry_run,
            progress,
        } => {
            let opts = SyncOptions {
                from,
                until,
                full,
                file,
                limit,
                dry_run,
                progress: progress.unwrap_or_else(ProgressMode::default_for_tty),
            };
            ingest::run_sync(&cfg, opts).await?;
        }
        Commands::Watermark => {
            ingest::run_watermark(&cfg).await?;
        }
        Commands::Embed { action } => match action {
            EmbedAction::Pending {
                limit,
                batch_size,
                dry_run,
            } => {
                embed_cmd::run_embed_pending(&cfg, limit, batch_size, dry_run).await?;
            }
        },
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
        Commands::Get { paper_id, json } => {
            get::run_get(&cfg, &paper_id, json).await?;
        }
        Commands::Completions { .. } => {}
    }

    Ok(())
}
