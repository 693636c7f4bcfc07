//! CLI commands implementation.
//!
//! This module contains the CLI parser and dispatches to command-specific modules.

mod commands;
mod helpers;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use console::style;
use tracing::error;

use ocrvault::config::Settings;
use ocrvault::error::AppError;
use ocrvault::selection::SelectionCriteria;

use commands::{dead_letters, ingest, init, reprocess, runs, select};

#[derive(Parser)]
#[command(name = "ocrvault")]
#[command(about = "Content-addressed document store with OCR best-run selection")]
#[command(version)]
pub struct Cli {
    /// Config file path (defaults to ./ocrvault.toml if present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Data directory (overrides config file)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Check if verbose mode is enabled (for early logging setup).
pub fn is_verbose() -> bool {
    std::env::args().any(|arg| arg == "-v" || arg == "--verbose")
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database schema and storage root
    Init,

    /// Store files as deduplicated documents
    Ingest {
        /// Files to ingest
        #[arg(required = true)]
        files: Vec<PathBuf>,
        /// Declared content type (detected when omitted)
        #[arg(long)]
        content_type: Option<String>,
        /// Declared page count
        #[arg(long)]
        pages: Option<i32>,
    },

    /// Inspect OCR runs
    Runs {
        #[command(subcommand)]
        command: RunsCommands,
    },

    /// Choose the canonical OCR result for a document
    Select {
        document_id: String,
        /// Selection criteria: policy, confidence, recency, word_count, custom
        #[arg(long, default_value = "policy")]
        criteria: SelectionCriteria,
        /// Show the decision without applying it
        #[arg(long)]
        dry_run: bool,
        #[arg(long)]
        json: bool,
    },

    /// Compare OCR runs side by side
    Compare {
        #[arg(required = true)]
        run_ids: Vec<String>,
        #[arg(long)]
        json: bool,
    },

    /// Show a document's OCR status
    Status {
        document_id: String,
        #[arg(long)]
        json: bool,
    },

    /// Validate a reprocess request and print the resulting job
    Reprocess {
        #[command(subcommand)]
        target: ReprocessCommands,
    },

    /// Inspect abandoned units of work
    DeadLetters {
        #[command(subcommand)]
        command: DeadLetterCommands,
    },
}

#[derive(Subcommand)]
enum RunsCommands {
    /// List runs matching filters
    List(runs::ListArgs),
    /// Show one run with its pages
    Show {
        run_id: String,
        /// Print page text
        #[arg(long)]
        text: bool,
        #[arg(long)]
        json: bool,
    },
    /// Aggregate performance of completed runs
    Stats {
        /// Trailing window in days
        #[arg(long, default_value_t = ocrvault::registry::DEFAULT_STATS_WINDOW_DAYS)]
        days: i64,
        #[arg(long)]
        engine: Option<String>,
        #[arg(long)]
        json: bool,
    },
}

#[derive(clap::Args)]
struct ReprocessArgs {
    id: String,
    /// Force an engine: azure, google, tesseract, mistral, easyocr
    #[arg(long)]
    engine: Option<String>,
    #[arg(long, default_value = ocrvault::reprocess::DEFAULT_WORKFLOW)]
    workflow: String,
    /// high, normal or low
    #[arg(long, default_value = "normal")]
    priority: String,
    /// Skip attachments (emails only)
    #[arg(long)]
    no_attachments: bool,
}

#[derive(Subcommand)]
enum ReprocessCommands {
    /// Reprocess one document
    Document(ReprocessArgs),
    /// Reprocess an email and its attachments
    Email(ReprocessArgs),
}

#[derive(Subcommand)]
enum DeadLetterCommands {
    /// Most recent first
    List {
        #[arg(short, long, default_value = "50")]
        limit: i64,
        #[arg(long)]
        json: bool,
    },
    Show { id: i32 },
    Delete { id: i32 },
}

pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut settings = match Settings::load(cli.config.as_deref()).await {
        Ok(settings) => settings,
        Err(e) => fail(&e.into()),
    };
    if let Some(dir) = cli.data_dir {
        settings.data_dir = dir;
    }

    let result = match cli.command {
        Commands::Init => init::cmd_init(&settings).await,
        Commands::Ingest {
            files,
            content_type,
            pages,
        } => ingest::cmd_ingest(&settings, &files, content_type.as_deref(), pages).await,
        Commands::Runs { command } => match command {
            RunsCommands::List(args) => runs::cmd_runs_list(&settings, args).await,
            RunsCommands::Show { run_id, text, json } => {
                runs::cmd_runs_show(&settings, &run_id, text, json).await
            }
            RunsCommands::Stats { days, engine, json } => {
                runs::cmd_runs_stats(&settings, days, engine.as_deref(), json).await
            }
        },
        Commands::Select {
            document_id,
            criteria,
            dry_run,
            json,
        } => select::cmd_select(&settings, &document_id, criteria, dry_run, json).await,
        Commands::Compare { run_ids, json } => select::cmd_compare(&settings, &run_ids, json).await,
        Commands::Status { document_id, json } => {
            select::cmd_status(&settings, &document_id, json).await
        }
        Commands::Reprocess { target } => {
            let (target, args) = match target {
                ReprocessCommands::Document(args) => {
                    (ocrvault::reprocess::ReprocessTarget::Document(args.id.clone()), args)
                }
                ReprocessCommands::Email(args) => {
                    (ocrvault::reprocess::ReprocessTarget::Email(args.id.clone()), args)
                }
            };
            reprocess::cmd_reprocess(
                target,
                args.engine,
                args.workflow,
                args.priority,
                !args.no_attachments,
            )
        }
        Commands::DeadLetters { command } => match command {
            DeadLetterCommands::List { limit, json } => {
                dead_letters::cmd_list(&settings, limit, json).await
            }
            DeadLetterCommands::Show { id } => dead_letters::cmd_show(&settings, id).await,
            DeadLetterCommands::Delete { id } => dead_letters::cmd_delete(&settings, id).await,
        },
    };

    match result {
        Ok(()) => Ok(()),
        Err(e) => fail(&e),
    }
}

/// Log full detail, print only the user-facing message, and exit.
fn fail(err: &anyhow::Error) -> ! {
    match err.downcast_ref::<AppError>() {
        Some(app) => {
            error!(
                error_class = app.kind().as_str(),
                correlation_id = app.correlation_id().map(|c| c.as_str()).unwrap_or(""),
                "{:#}",
                err
            );
            let facing = app.user_facing();
            eprintln!("{} {} ({})", style("✗").red(), facing.message, app.kind().as_str());
            if facing.status == 400 {
                eprintln!("  {}", app.message());
            }
        }
        None => {
            error!("{:#}", err);
            eprintln!("{} {:#}", style("✗").red(), err);
        }
    }
    std::process::exit(1)
}

