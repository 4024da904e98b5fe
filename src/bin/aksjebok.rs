//! Aksjebok command line interface
//!
//! Imports shareholder registry files and answers ownership queries.
//!
//! # Usage
//!
//! ```bash
//! # Import a registry file for 2024
//! aksjebok import aksjonaerregister_2024.csv --year 2024
//!
//! # Direct shareholders of one company
//! aksjebok shareholders 912345678 --year 2024
//!
//! # Ownership graph, three levels up
//! aksjebok graph 912345678 --year 2024 --direction up --depth 3
//!
//! # Export the shareholder list as CSV
//! aksjebok export 912345678 --year 2024
//! ```
//!
//! The remote backend is configured with `AKSJEBOK_API_URL` and
//! `AKSJEBOK_API_KEY`; without a URL the CLI runs against an in-memory
//! backend (useful for dry runs of the import pipeline).

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::warn;
use tracing_subscriber::EnvFilter;

use aksjebok::registry::export::{export_filename, export_shareholders};
use aksjebok::registry::import::{
    process_shareholder_file, resume_shareholder_file, run_pending_aggregation, ImportConfig,
};
use aksjebok::registry::progress::{progress_channel, ImportEvent};
use aksjebok::{
    Direction, GraphQuery, HttpBackend, MemoryBackend, OwnershipGraphService, RegistryBackend,
};

#[derive(Parser)]
#[command(name = "aksjebok")]
#[command(version)]
#[command(about = "Shareholder registry import and ownership graph queries")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Base URL of the registry backend
    #[arg(long, env = "AKSJEBOK_API_URL", global = true)]
    api_url: Option<String>,

    /// API key for the registry backend
    #[arg(long, env = "AKSJEBOK_API_KEY", global = true, hide_env_values = true)]
    api_key: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Import a shareholder registry file (csv, xlsx, xls)
    Import {
        file: PathBuf,

        /// Registry year the file covers
        #[arg(long)]
        year: i32,

        /// Import into the global registry instead of a scoped snapshot
        #[arg(long)]
        global: bool,

        /// Rows per batch
        #[arg(long, default_value_t = aksjebok::registry::import::DEFAULT_BATCH_SIZE)]
        batch_size: usize,
    },

    /// Resume an interrupted session: re-ingest remaining batches from the
    /// original file (if given) and run any pending aggregation
    Recover {
        session_id: uuid::Uuid,

        #[arg(long)]
        year: i32,

        #[arg(long)]
        global: bool,

        /// The original registry file; batches up to the session's last
        /// offset are skipped
        #[arg(long)]
        file: Option<PathBuf>,
    },

    /// List direct shareholders of a company
    Shareholders {
        orgnr: String,

        #[arg(long)]
        year: i32,
    },

    /// Ownership graph around a company
    Graph {
        orgnr: String,

        #[arg(long)]
        year: i32,

        /// up, down or both
        #[arg(long, default_value = "both")]
        direction: Direction,

        #[arg(long, default_value_t = aksjebok::graph::types::DEFAULT_GRAPH_DEPTH)]
        depth: u32,
    },

    /// Export the shareholder list of a company as semicolon CSV
    Export {
        orgnr: String,

        #[arg(long)]
        year: i32,

        /// Output file (defaults to aksjonaerer_<company>_<date>.csv)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn spawn_event_printer(
    mut events: tokio::sync::mpsc::UnboundedReceiver<ImportEvent>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                ImportEvent::Parsing { message } | ImportEvent::Progress { message, .. } => {
                    println!("{message}")
                }
                ImportEvent::RateLimitWarning { message, .. } => {
                    println!("ADVARSEL: {message}")
                }
                ImportEvent::BatchComplete { .. } => {}
                ImportEvent::Completed { .. } => {}
                ImportEvent::Failed { message, .. } => eprintln!("{message}"),
            }
        }
    })
}

fn backend(cli: &Cli) -> Result<Box<dyn RegistryBackend>> {
    match &cli.api_url {
        Some(url) => Ok(Box::new(
            HttpBackend::new(url.clone(), cli.api_key.clone())
                .context("failed to build HTTP backend")?,
        )),
        None => {
            warn!("AKSJEBOK_API_URL not set, running against in-memory backend");
            Ok(Box::new(MemoryBackend::new()))
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("feil: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let backend = backend(&cli)?;

    match cli.command {
        Commands::Import {
            file,
            year,
            global,
            batch_size,
        } => {
            let config = ImportConfig {
                batch_size,
                is_global: global,
                ..Default::default()
            };
            let (progress, events) = progress_channel();
            let printer = spawn_event_printer(events);

            let result =
                process_shareholder_file(&file, year, backend.as_ref(), &config, &progress).await?;
            drop(progress);
            printer.await.ok();

            println!(
                "Sesjon {}: {} rader, {} importert, {} feil, {} batcher.",
                result.session_id, result.total_rows, result.imported, result.errors,
                result.batches
            );
        }

        Commands::Recover {
            session_id,
            year,
            global,
            file,
        } => {
            if let Some(file) = file {
                let config = ImportConfig {
                    is_global: global,
                    ..Default::default()
                };
                let (progress, events) = progress_channel();
                let printer = spawn_event_printer(events);
                let result = resume_shareholder_file(
                    &file,
                    session_id,
                    year,
                    backend.as_ref(),
                    &config,
                    &progress,
                )
                .await?;
                drop(progress);
                printer.await.ok();
                println!(
                    "Sesjon {} gjenopptatt: {} importert, {} feil.",
                    result.session_id, result.imported, result.errors
                );
                return Ok(());
            }

            let status = backend.check_recovery(session_id, year, global).await?;
            if !status.can_recover {
                println!("Sesjonen er allerede fullført eller feilet.");
                return Ok(());
            }
            println!(
                "Sesjonen kan gjenopptas fra batch {}.",
                status.last_batch_offset
            );
            if status.needs_aggregation {
                let processed =
                    run_pending_aggregation(backend.as_ref(), session_id, year, 200).await?;
                println!("Aggregering fullført for {processed} selskaper.");
            }
        }

        Commands::Shareholders { orgnr, year } => {
            let service = OwnershipGraphService::new(backend.as_ref());
            let shareholders = service.get_company_shareholders(&orgnr, year).await?;
            for sh in &shareholders {
                println!(
                    "{:<40} {:>12} aksjer  {:>6.2} %  ({})",
                    sh.display_name(),
                    sh.shares,
                    sh.ownership_pct,
                    sh.share_class
                );
            }
            println!("{} aksjonærer.", shareholders.len());
        }

        Commands::Graph {
            orgnr,
            year,
            direction,
            depth,
        } => {
            let service = OwnershipGraphService::new(backend.as_ref());
            let query = GraphQuery::new(orgnr, year).direction(direction).depth(depth);
            let graph = service.fetch_ownership_graph(&query).await?;
            println!("{}", serde_json::to_string_pretty(&graph)?);
        }

        Commands::Export { orgnr, year, output } => {
            let service = OwnershipGraphService::new(backend.as_ref());
            let shareholders = service.get_company_shareholders(&orgnr, year).await?;
            let company_name = backend
                .company_by_orgnr(&orgnr)
                .await?
                .map(|c| c.name)
                .unwrap_or_else(|| orgnr.clone());
            let path = output.unwrap_or_else(|| PathBuf::from(export_filename(&company_name)));
            std::fs::write(&path, export_shareholders(&shareholders)?)
                .with_context(|| format!("failed to write {}", path.display()))?;
            println!("Skrev {} aksjonærer til {}.", shareholders.len(), path.display());
        }
    }
    Ok(())
}
