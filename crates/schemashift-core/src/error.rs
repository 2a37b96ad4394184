//! Engine error types.

use super::statement::StatementError;
use thiserror::Error;

/// Errors raised by the migration engine.
#[derive(Debug, Error)]
pub enum MigrationError {
    /// A step with this id is already registered.
    #[error("step already registered: {id}")]
    DuplicateStep {
        /// The duplicate step id.
        id: String,
    },

    /// No step with this id exists in the ledger.
    #[error("step not found: {id}")]
    StepNotFound {
        /// The missing step id.
        id: String,
    },

    /// A declared dependency is not completed.
    #[error("step '{step_id}' has unmet dependency '{dependency}': {detail}")]
    UnmetDependency {
        /// The step whose dependency is unmet.
        step_id: String,
        /// The dependency id.
        dependency: String,
        /// Why the dependency is unmet.
        detail: String,
    },

    /// A backfill chunk kept failing past the retry budget.
    #[error("backfill retries exhausted after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        /// Total tries made at the failing chunk.
        attempts: u32,
        /// The last statement error observed.
        last_error: String,
    },

    /// A migration step failed, aborting the run.
    #[error("step '{id}' failed: {message}")]
    StepFailed {
        /// The failed step id.
        id: String,
        /// Error message recorded on the step.
        message: String,
    },

    /// Engine configuration is invalid.
    #[error("invalid engine configuration: {message}")]
    InvalidConfig {
        /// Description of the problem.
        message: String,
    },

    /// A statement execution failed.
    #[error("statement execution failed: {0}")]
    Statement(#[from] StatementError),

    /// Ledger storage error.
    #[error("ledger storage error: {0}")]
    Storage(#[from] sled::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Deserialization error.
    #[error("deserialization error: {0}")]
    Deserialization(String),
}
