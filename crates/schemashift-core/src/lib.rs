//! Online schema-migration engine implementing the expand/migrate/contract
//! pattern.
//!
//! A schema change is split into three phases: add new structure (expand),
//! copy or transform data into it in small idempotent batches (migrate), then
//! remove obsolete structure (contract). The engine provides:
//! - A persisted step ledger as the source of truth for what has run
//! - Sequential per-phase execution with fail-fast error propagation
//! - Chunked, retryable, cursor-paginated backfills for `UPDATE` statements
//! - Crash recovery via per-step checkpoints
//!
//! The datastore is an external collaborator behind the [`StatementExecutor`]
//! trait; the engine never interprets SQL beyond the minimal chunkable-update
//! shape.
//!
//! # Example
//!
//! ```ignore
//! use schemashift_core::{EngineConfig, MigrationEngine, Phase, StepSpec};
//!
//! let engine = MigrationEngine::new(&db, Box::new(executor), EngineConfig::default())?;
//!
//! engine.register(StepSpec::new(
//!     "add_email_norm",
//!     Phase::Expand,
//!     "add normalized email column",
//!     "ALTER TABLE users ADD COLUMN email_norm TEXT",
//! ))?;
//! engine.register(StepSpec::new(
//!     "backfill_email_norm",
//!     Phase::Migrate,
//!     "populate normalized emails",
//!     "UPDATE users SET email_norm = lower(email) WHERE email_norm IS NULL",
//! ))?;
//!
//! let report = engine.execute()?;
//! println!("executed {} steps", report.steps_executed());
//! ```

pub mod backfill;
pub mod error;
pub mod executor;
pub mod ledger;
pub mod pipeline;
pub mod statement;
pub mod step;

// Error types
pub use error::MigrationError;

// Step types
pub use step::{MigrationStep, Phase, StepSpec, StepStatus};

// Ledger types
pub use ledger::StepLedger;

// Statement boundary types
pub use statement::{
    parse_chunkable_update, ChunkableUpdate, ResultSet, StatementError, StatementExecutor,
};

// Backfill types
pub use backfill::{BackfillConfig, BackfillCursor, BackfillExecutor, BackfillOutcome};

// Executor types
pub use executor::{PhaseExecutor, PhaseOutcome};

// Pipeline types
pub use pipeline::{CheckReport, EngineConfig, FailedStep, MigrationEngine, RunReport};
