//! # markdown-qa CLI (`mdqa`)
//!
//! ## Usage
//!
//! ```bash
//! mdqa --config ./config/mdqa.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `mdqa chunks <file>` | Show how a document is chunked |
//! | `mdqa search <file> "<query>"` | Rank chunks by similarity to a query |
//! | `mdqa ask <file> "<question>"` | Answer one question with sources |
//! | `mdqa chat <file>` | Answer questions from stdin, one per line |
//!
//! ## Examples
//!
//! ```bash
//! # Offline, no model needed
//! mdqa chunks docs/guide.md --json
//!
//! # Answer with the configured embedding provider
//! mdqa ask docs/guide.md "What does the deploy step do?"
//!
//! # Stream a model-written answer, falling back to extraction on failure
//! mdqa ask docs/guide.md "What does the deploy step do?" --generate
//! ```

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use markdown_qa::ask_cmd;
use markdown_qa::config::{self, DEFAULT_CONFIG_PATH};
use markdown_qa::progress::ProgressMode;

/// Ask questions about a Markdown document.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/mdqa.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "mdqa",
    about = "Ask questions about a Markdown document",
    version,
    long_about = "mdqa splits a Markdown document into heading-aware chunks, embeds them, \
    and answers questions by retrieving the most similar chunks and extracting or \
    generating an answer with cited sources."
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// A missing file means built-in defaults.
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Log debug detail to stderr (overridden by RUST_LOG).
    #[arg(long, short, global = true)]
    verbose: bool,

    /// Indexing progress on stderr. Defaults to `human` on a terminal, else `off`.
    #[arg(long, global = true, value_enum)]
    progress: Option<ProgressArg>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum ProgressArg {
    Off,
    Human,
    Json,
}

impl From<ProgressArg> for ProgressMode {
    fn from(arg: ProgressArg) -> Self {
        match arg {
            ProgressArg::Off => ProgressMode::Off,
            ProgressArg::Human => ProgressMode::Human,
            ProgressArg::Json => ProgressMode::Json,
        }
    }
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Print the chunks a document splits into.
    ///
    /// Needs no embedding provider.
    Chunks {
        /// Markdown file to chunk.
        file: PathBuf,

        /// Emit a JSON array instead of text.
        #[arg(long)]
        json: bool,
    },

    /// Rank the document's chunks against a query.
    Search {
        /// Markdown file to index.
        file: PathBuf,

        /// The search query string.
        query: String,

        /// Maximum number of results (defaults to retrieval.top_k).
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Answer one question about the document.
    Ask {
        /// Markdown file to index.
        file: PathBuf,

        /// The question.
        question: String,

        /// Ask the configured generation model, falling back to extraction.
        #[arg(long)]
        generate: bool,
    },

    /// Load the document once, then answer questions read from stdin.
    Chat {
        /// Markdown file to index.
        file: PathBuf,

        /// Ask the configured generation model, falling back to extraction.
        #[arg(long)]
        generate: bool,
    },
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let cfg = config::load_or_default(&cli.config)?;
    let progress = cli
        .progress
        .map(ProgressMode::from)
        .unwrap_or_else(ProgressMode::default_for_tty);

    match cli.command {
        Commands::Chunks { file, json } => {
            ask_cmd::run_chunks(&cfg, &file, json)?;
        }
        Commands::Search { file, query, limit } => {
            ask_cmd::run_search(&cfg, &file, &query, limit, progress).await?;
        }
        Commands::Ask {
            file,
            question,
            generate,
        } => {
            ask_cmd::run_ask(&cfg, &file, &question, generate, progress).await?;
        }
        Commands::Chat { file, generate } => {
            ask_cmd::run_chat(&cfg, &file, generate, progress).await?;
        }
    }

    Ok(())
}
