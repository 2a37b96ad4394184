//! schemashift command-line runner.
//!
//! Two modes: `run` registers steps from a file (skipping ids already in the
//! ledger) and executes the expand/migrate/contract pipeline; `check` reports
//! ledger status without executing anything, exiting non-zero if any step is
//! failed.

mod sqlite;
mod steps;

use clap::{Parser, Subcommand};
use schemashift_core::{BackfillConfig, EngineConfig, MigrationEngine};
use sqlite::SqliteExecutor;
use std::path::PathBuf;

/// Online schema-migration runner (expand/migrate/contract).
#[derive(Parser, Debug)]
#[command(name = "schemashift")]
#[command(version, about = "Online schema-migration runner")]
struct Cli {
    /// Path to the step ledger directory
    #[arg(long, default_value = "./schemashift-ledger")]
    ledger: PathBuf,

    /// Path to the SQLite database to migrate
    #[arg(long)]
    database: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Register steps from a file and run the pipeline
    Run {
        /// JSON file with the migration steps
        #[arg(long)]
        steps: PathBuf,

        /// Rows per backfill chunk
        #[arg(long, default_value_t = 500)]
        chunk_size: usize,

        /// Retries per chunk before the run aborts
        #[arg(long, default_value_t = 3)]
        max_retries: u32,

        /// Base retry delay in milliseconds (linear backoff)
        #[arg(long, default_value_t = 500)]
        retry_delay_ms: u64,

        /// Pause between backfill chunks in milliseconds
        #[arg(long, default_value_t = 100)]
        chunk_delay_ms: u64,

        /// Identifier column used for backfill pagination
        #[arg(long, default_value = "id")]
        id_column: String,
    },
    /// Report ledger status without executing anything
    Check,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("schemashift=info".parse().unwrap())
                .add_directive("schemashift_core=info".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let db = sled::open(&cli.ledger)?;
    let executor = SqliteExecutor::open(&cli.database)?;

    match cli.command {
        Command::Run {
            steps,
            chunk_size,
            max_retries,
            retry_delay_ms,
            chunk_delay_ms,
            id_column,
        } => {
            let config = EngineConfig {
                backfill: BackfillConfig {
                    chunk_size,
                    max_retries,
                    retry_delay_ms,
                    chunk_delay_ms,
                    id_column,
                },
            };
            let engine = MigrationEngine::new(&db, Box::new(executor), config)?;

            for spec in steps::load_steps(&steps)? {
                if engine.is_registered(&spec.id)? {
                    tracing::debug!(step = %spec.id, "already registered, skipping");
                    continue;
                }
                engine.register(spec)?;
            }

            let report = engine.execute()?;
            println!("Run complete: {} step(s) executed.", report.steps_executed());
            for phase in &report.phases {
                println!(
                    "  {}: {} executed, {} skipped",
                    phase.phase, phase.executed, phase.skipped
                );
            }
            Ok(())
        }
        Command::Check => {
            let engine = MigrationEngine::new(&db, Box::new(executor), EngineConfig::default())?;
            let report = engine.check()?;

            println!(
                "{} step(s): {} pending, {} in progress, {} completed, {} failed",
                report.total, report.pending, report.in_progress, report.completed, report.failed
            );
            for failed in &report.failed_steps {
                println!("  failed: {}: {}", failed.id, failed.error);
            }

            if report.has_failures() {
                std::process::exit(1);
            }
            Ok(())
        }
    }
}
