//! # docsync CLI
//!
//! ```bash
//! docsync --config ./config/docsync.toml <command>
//! ```
//!
//! | Command | Description |
//! |---------|-------------|
//! | `docsync init` | Create the database and the data directory |
//! | `docsync bootstrap` | Attach to the index or build it from the source directory |
//! | `docsync add <path>` | Add a file |
//! | `docsync update <path>` | Replace a file's content, keeping its document id |
//! | `docsync delete <filename>` | Remove a file from the index and the metadata table |
//! | `docsync files` | List recorded documents |
//! | `docsync reconcile <filename> <document_id>` | Restore a missing metadata row |
//! | `docsync ask "<question>"` | Answer a question over the documents |
//! | `docsync calc "<expr>"` | Evaluate an arithmetic expression |
//! | `docsync serve` | Start the HTTP server |
//!
//! Log verbosity follows `RUST_LOG` (default `docsync=info`). Logs go to
//! stderr; command results go to stdout.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use docsync::{commands, config, server};

#[derive(Parser)]
#[command(
    name = "docsync",
    about = "Keeps a document metadata table and a vector index in sync",
    version
)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, global = true, default_value = "./config/docsync.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the SQLite database and run schema migrations.
    Init,

    /// Load the index, bootstrapping it from the source directory when empty.
    Bootstrap,

    /// Index a new file and record it.
    Add {
        path: PathBuf,

        /// Store under this filename instead of the file's own name.
        #[arg(long)]
        name: Option<String>,
    },

    /// Replace the content of a recorded file.
    Update {
        path: PathBuf,

        #[arg(long)]
        name: Option<String>,
    },

    /// Delete a file from the index, the metadata table and the data directory.
    Delete { filename: String },

    /// List recorded documents.
    Files,

    /// Re-create the metadata row for a document the index already holds.
    Reconcile {
        filename: String,
        document_id: String,
    },

    /// Ask a question over the indexed documents.
    Ask {
        question: String,

        /// One of: default, document_analysis, research, calculation, general.
        #[arg(long, default_value = "default")]
        task_type: String,

        /// Grade the answer's relevance and completeness.
        #[arg(long)]
        evaluate: bool,
    },

    /// Evaluate an arithmetic expression.
    Calc { expression: String },

    /// Start the HTTP server.
    Serve,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("docsync=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    // Commands that don't require config
    if let Commands::Calc { expression } = &cli.command {
        return commands::run_calc(expression);
    }

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => commands::run_init(&cfg).await?,
        Commands::Bootstrap => commands::run_bootstrap(&cfg).await?,
        Commands::Add { path, name } => commands::run_add(&cfg, &path, name.as_deref()).await?,
        Commands::Update { path, name } => {
            commands::run_update(&cfg, &path, name.as_deref()).await?
        }
        Commands::Delete { filename } => commands::run_delete(&cfg, &filename).await?,
        Commands::Files => commands::run_files(&cfg).await?,
        Commands::Reconcile {
            filename,
            document_id,
        } => commands::run_reconcile(&cfg, &filename, &document_id).await?,
        Commands::Ask {
            question,
            task_type,
            evaluate,
        } => commands::run_ask(&cfg, &question, &task_type, evaluate).await?,
        Commands::Calc { .. } => unreachable!("handled before config loading"),
        Commands::Serve => server::run_server(&cfg).await?,
    }

    Ok(())
}
