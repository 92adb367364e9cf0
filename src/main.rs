//! # Volley RAG CLI (`vrag`)
//!
//! The `vrag` binary indexes match and standings data, answers questions
//! against the index, and serves the HTTP API.
//!
//! ## Usage
//!
//! ```bash
//! vrag --config ./config/vrag.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `vrag init` | Create the SQLite database and schema |
//! | `vrag index` | Build match and standings records and embed them |
//! | `vrag search "<query>"` | Raw semantic search |
//! | `vrag ask "<question>"` | Classify, retrieve, and generate an answer |
//! | `vrag team <name>` | Matches of one team in date order |
//! | `vrag league <name>` | Records of one league |
//! | `vrag stats` | Index summary |
//! | `vrag serve` | Start the HTTP API |
//!
//! ## Examples
//!
//! ```bash
//! vrag init
//! vrag index --full
//! vrag ask "Quando gioca la prossima partita RM VOLLEY #18?"
//! vrag ask "what were the last results of RM VOLLEY #02" --context-only
//! vrag team "RM VOLLEY #18" --upcoming --limit 3
//! vrag serve
//! ```

use volley_rag::{config, indexer, logging, migrate, search, server, stats};

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Question answering over volleyball matches and league standings.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file.
#[derive(Parser)]
#[command(
    name = "vrag",
    about = "Question answering over volleyball matches and league standings",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/vrag.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run repeatedly.
    Init,

    /// Build records from the configured source files and embed them.
    ///
    /// With neither `--matches` nor `--standings`, both sources are indexed.
    /// Records whose text and metadata are unchanged are not re-embedded.
    Index {
        /// Index the match CSV.
        #[arg(long)]
        matches: bool,

        /// Index the standings JSON.
        #[arg(long)]
        standings: bool,

        /// Clear the index and re-embed everything.
        #[arg(long)]
        full: bool,

        /// Show record counts without embedding or writing.
        #[arg(long)]
        dry_run: bool,
    },

    /// Semantic search over all indexed records.
    Search {
        query: String,

        /// Maximum number of results.
        #[arg(long)]
        limit: Option<usize>,

        /// Restrict to one record kind: `match` or `standing`.
        #[arg(long = "type")]
        kind: Option<String>,
    },

    /// Answer a question from the indexed data.
    Ask {
        question: String,

        /// Number of records to retrieve.
        #[arg(long)]
        limit: Option<usize>,

        /// Sampling temperature, 0.0 to 1.0.
        #[arg(long)]
        temperature: Option<f32>,

        /// Restrict semantic search to one record kind: `match` or `standing`.
        #[arg(long = "type")]
        kind: Option<String>,

        /// Print the retrieval plan and assembled context instead of
        /// generating an answer.
        #[arg(long)]
        context_only: bool,
    },

    /// Matches of one team, most recent first (soonest first with `--upcoming`).
    Team {
        name: String,

        #[arg(long)]
        limit: Option<usize>,

        /// Only matches already played.
        #[arg(long)]
        played: bool,

        /// Only matches not yet played.
        #[arg(long)]
        upcoming: bool,
    },

    /// Records of one league.
    League {
        name: String,

        #[arg(long)]
        limit: Option<usize>,
    },

    /// Show index statistics.
    Stats,

    /// Start the HTTP API on `[server].bind`.
    Serve,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;
    logging::init(&cfg.logging);

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Index {
            matches,
            standings,
            full,
            dry_run,
        } => {
            let both = !matches && !standings;
            let opts = indexer::IndexOptions {
                matches: matches || both,
                standings: standings || both,
                full,
                dry_run,
            };
            indexer::run_index(&cfg, opts).await?;
        }
        Commands::Search { query, limit, kind } => {
            search::run_search(&cfg, &query, limit, kind.as_deref()).await?;
        }
        Commands::Ask {
            question,
            limit,
            temperature,
            kind,
            context_only,
        } => {
            search::run_ask(
                &cfg,
                &question,
                limit,
                temperature,
                kind.as_deref(),
                context_only,
            )
            .await?;
        }
        Commands::Team {
            name,
            limit,
            played,
            upcoming,
        } => {
            search::run_team(&cfg, &name, limit, played, upcoming).await?;
        }
        Commands::League { name, limit } => {
            search::run_league(&cfg, &name, limit).await?;
        }
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}
