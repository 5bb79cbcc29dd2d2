//! # Companion Recall CLI (`recall`)
//!
//! Indexes a notes directory into SQLite and answers hybrid
//! (vector + keyword) queries over it.
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `recall init` | Create the SQLite database and run schema migrations |
//! | `recall sync` | Incrementally index the notes connector |
//! | `recall search "<query>"` | Ranked search results |
//! | `recall context "<query>"` | Token-budgeted context with citations |
//! | `recall runs` | Recent sync runs |
//! | `recall doc <id>` | A chunked document and its chunks |
//! | `recall serve` | Start the HTTP API |
//!
//! ## Examples
//!
//! ```bash
//! recall init --config ./config/recall.toml
//! recall sync --config ./config/recall.toml
//! recall search "invoice totals" --mode hybrid
//! recall context "what did I decide about the roof" --max-tokens 800
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use companion_recall::search::FilterArgs;
use companion_recall::{config, get, migrate, search, server, sync};

/// Companion Recall: incremental note indexing and hybrid retrieval.
#[derive(Parser)]
#[command(name = "recall", version, about)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/recall.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Idempotent.
    Init,

    /// Index new, changed and deleted notes.
    Sync {
        /// Recorded on the sync run (`manual`, `schedule`, ...).
        #[arg(long, default_value = "manual")]
        trigger: String,

        /// Show what would change without embedding or writing.
        #[arg(long)]
        dry_run: bool,
    },

    /// Search indexed notes.
    Search {
        query: String,

        /// `vector`, `keyword` or `hybrid`. Defaults to `[retrieval].mode`.
        #[arg(long)]
        mode: Option<String>,

        /// Maximum number of results.
        #[arg(long)]
        limit: Option<usize>,

        #[command(flatten)]
        filter: FilterFlags,
    },

    /// Assemble a context block for a query.
    Context {
        query: String,

        #[arg(long)]
        mode: Option<String>,

        /// Candidates considered before budgeting.
        #[arg(long)]
        limit: Option<usize>,

        /// Token budget. Defaults to `[retrieval].max_tokens`.
        #[arg(long)]
        max_tokens: Option<usize>,

        /// Print the context, sources and metadata as JSON.
        #[arg(long)]
        json: bool,

        #[command(flatten)]
        filter: FilterFlags,
    },

    /// List recent sync runs.
    Runs {
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },

    /// Print a chunked document and its chunks.
    Doc { id: String },

    /// Start the HTTP API on `[server].bind`.
    Serve,
}

#[derive(clap::Args)]
struct FilterFlags {
    /// Only results from this source.
    #[arg(long)]
    source: Option<String>,

    /// Only notes updated on or after this date (YYYY-MM-DD).
    #[arg(long)]
    since: Option<String>,

    /// Only notes carrying this tag.
    #[arg(long)]
    tag: Option<String>,
}

impl From<FilterFlags> for FilterArgs {
    fn from(flags: FilterFlags) -> Self {
        FilterArgs {
            source: flags.source,
            since: flags.since,
            tag: flags.tag,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&cfg.logging.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Sync { trigger, dry_run } => {
            sync::run_sync(&cfg, &trigger, dry_run).await?;
        }
        Commands::Search {
            query,
            mode,
            limit,
            filter,
        } => {
            search::run_search(&cfg, &query, mode.as_deref(), &filter.into(), limit).await?;
        }
        Commands::Context {
            query,
            mode,
            limit,
            max_tokens,
            json,
            filter,
        } => {
            search::run_context(
                &cfg,
                &query,
                mode.as_deref(),
                &filter.into(),
                limit,
                max_tokens,
                json,
            )
            .await?;
        }
        Commands::Runs { limit } => {
            sync::run_runs(&cfg, limit).await?;
        }
        Commands::Doc { id } => {
            get::run_doc(&cfg, &id).await?;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}
