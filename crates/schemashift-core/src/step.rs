//! Migration step records and their lifecycle.
//!
//! A step is the unit of change in an expand/migrate/contract run. Steps are
//! created `Pending`, picked up by the phase executor for their phase, and end
//! in a terminal `Completed` or `Failed` state.

use super::error::MigrationError;
use rkyv::{Archive, Deserialize, Serialize};

/// Current time in microseconds since the Unix epoch.
pub fn current_timestamp() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system time before Unix epoch")
        .as_micros() as u64
}

/// Phase of a migration step.
///
/// Phases execute in the fixed order expand, migrate, contract regardless of
/// registration order.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Archive,
    Serialize,
    Deserialize,
    serde::Serialize,
    serde::Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Add new structure (columns, tables, indexes).
    Expand,
    /// Copy or transform data into the new structure.
    Migrate,
    /// Remove obsolete structure after the verification window.
    Contract,
}

impl Phase {
    /// Pipeline execution order.
    pub const ORDER: [Phase; 3] = [Phase::Expand, Phase::Migrate, Phase::Contract];
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::Expand => write!(f, "expand"),
            Phase::Migrate => write!(f, "migrate"),
            Phase::Contract => write!(f, "contract"),
        }
    }
}

/// Status of a single migration step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Archive, Serialize, Deserialize)]
pub enum StepStatus {
    /// Step registered but not yet started.
    Pending,
    /// Step in progress. A step left in this state by an interrupted run is
    /// re-entered by the next run.
    InProgress,
    /// Step completed successfully. Never re-selected.
    Completed,
    /// Step failed. Never re-selected automatically.
    Failed,
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StepStatus::Pending => write!(f, "pending"),
            StepStatus::InProgress => write!(f, "in_progress"),
            StepStatus::Completed => write!(f, "completed"),
            StepStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Caller-supplied description of a step to register.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct StepSpec {
    /// Stable, unique identifier (e.g. a slug).
    pub id: String,
    /// Phase the step belongs to.
    pub phase: Phase,
    /// Free text, for audit and reporting.
    pub description: String,
    /// SQL text to execute for this step.
    pub statement: String,
    /// Ids of steps that must be completed before this one runs.
    #[serde(default)]
    pub depends_on: Vec<String>,
}

impl StepSpec {
    /// Create a spec with no dependencies.
    pub fn new(
        id: impl Into<String>,
        phase: Phase,
        description: impl Into<String>,
        statement: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            phase,
            description: description.into(),
            statement: statement.into(),
            depends_on: Vec::new(),
        }
    }

    /// Add a dependency on another step id.
    pub fn with_dependency(mut self, id: impl Into<String>) -> Self {
        self.depends_on.push(id.into());
        self
    }
}

/// Persisted record of one migration step.
#[derive(Debug, Clone, Archive, Serialize, Deserialize)]
pub struct MigrationStep {
    /// Caller-assigned unique identifier.
    pub id: String,
    /// Phase the step belongs to. Immutable after registration.
    pub phase: Phase,
    /// Current status.
    pub status: StepStatus,
    /// Free text, for audit and reporting.
    pub description: String,
    /// SQL text to execute.
    pub statement: String,
    /// Ids this step declares a dependency on.
    pub depends_on: Vec<String>,
    /// Registration timestamp (microseconds since epoch). Immutable.
    pub created_at: u64,
    /// Set exactly once, when the step first completes.
    pub completed_at: Option<u64>,
    /// Last failure message. Cleared when a new run attempt starts the step.
    pub error: Option<String>,
    /// Last identifier committed by a chunked backfill, for resumption.
    pub last_cursor: Option<String>,
    /// Rows processed by a chunked backfill so far.
    pub processed_count: u64,
    /// Monotonic registration sequence, tie-breaker for load order.
    pub seq: u64,
}

impl MigrationStep {
    /// Create a new pending step from a spec.
    pub fn new(spec: StepSpec, seq: u64) -> Self {
        Self {
            id: spec.id,
            phase: spec.phase,
            status: StepStatus::Pending,
            description: spec.description,
            statement: spec.statement,
            depends_on: spec.depends_on,
            created_at: current_timestamp(),
            completed_at: None,
            error: None,
            last_cursor: None,
            processed_count: 0,
            seq,
        }
    }

    /// Mark the step as started, clearing any error from a prior attempt.
    pub fn start(&mut self) {
        self.status = StepStatus::InProgress;
        self.error = None;
    }

    /// Mark the step as completed. `completed_at` is set only on the first
    /// transition into the completed state.
    pub fn complete(&mut self) {
        self.status = StepStatus::Completed;
        if self.completed_at.is_none() {
            self.completed_at = Some(current_timestamp());
        }
    }

    /// Mark the step as failed with an error message.
    pub fn fail(&mut self, error: impl Into<String>) {
        self.status = StepStatus::Failed;
        self.error = Some(error.into());
    }

    /// Record chunked backfill progress.
    pub fn checkpoint(&mut self, cursor: Option<String>, processed: u64) {
        self.last_cursor = cursor;
        self.processed_count = processed;
    }

    /// Whether the step is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self.status, StepStatus::Completed | StepStatus::Failed)
    }

    /// Whether the phase executor may pick this step up.
    pub fn is_runnable(&self) -> bool {
        matches!(self.status, StepStatus::Pending | StepStatus::InProgress)
    }

    /// Serialize the step to bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, MigrationError> {
        rkyv::to_bytes::<rkyv::rancor::Error>(self)
            .map(|v| v.to_vec())
            .map_err(|e| MigrationError::Serialization(e.to_string()))
    }

    /// Deserialize a step from bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, MigrationError> {
        rkyv::from_bytes::<Self, rkyv::rancor::Error>(bytes)
            .map_err(|e| MigrationError::Deserialization(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_step() -> MigrationStep {
        MigrationStep::new(
            StepSpec::new("add_col", Phase::Expand, "add email column", "ALTER TABLE t ADD email"),
            0,
        )
    }

    #[test]
    fn test_step_lifecycle() {
        let mut step = sample_step();

        assert_eq!(step.status, StepStatus::Pending);
        assert!(step.is_runnable());
        assert!(!step.is_terminal());

        step.start();
        assert_eq!(step.status, StepStatus::InProgress);
        assert!(step.is_runnable());

        step.complete();
        assert_eq!(step.status, StepStatus::Completed);
        assert!(step.is_terminal());
        assert!(step.completed_at.is_some());
    }

    #[test]
    fn test_completed_at_set_once() {
        let mut step = sample_step();
        step.start();
        step.complete();
        let first = step.completed_at;

        step.complete();
        assert_eq!(step.completed_at, first);
    }

    #[test]
    fn test_step_failure_and_error_clearing() {
        let mut step = sample_step();
        step.start();
        step.fail("connection reset");

        assert_eq!(step.status, StepStatus::Failed);
        assert_eq!(step.error.as_deref(), Some("connection reset"));
        assert!(!step.is_runnable());

        // A new run attempt clears the previous error.
        step.start();
        assert!(step.error.is_none());
    }

    #[test]
    fn test_checkpoint() {
        let mut step = sample_step();
        step.checkpoint(Some("row-42".to_string()), 200);

        assert_eq!(step.last_cursor.as_deref(), Some("row-42"));
        assert_eq!(step.processed_count, 200);
    }

    #[test]
    fn test_step_serialization() {
        let mut step = sample_step();
        step.depends_on.push("other".to_string());
        step.start();

        let bytes = step.to_bytes().unwrap();
        let restored = MigrationStep::from_bytes(&bytes).unwrap();

        assert_eq!(restored.id, step.id);
        assert_eq!(restored.phase, step.phase);
        assert_eq!(restored.status, step.status);
        assert_eq!(restored.depends_on, step.depends_on);
        assert_eq!(restored.created_at, step.created_at);
    }

    #[test]
    fn test_phase_display() {
        assert_eq!(Phase::Expand.to_string(), "expand");
        assert_eq!(Phase::Migrate.to_string(), "migrate");
        assert_eq!(Phase::Contract.to_string(), "contract");
    }

    #[test]
    fn test_step_spec_json() {
        let json = r#"{
            "id": "backfill_col",
            "phase": "migrate",
            "description": "populate new column",
            "statement": "UPDATE t SET col = 1 WHERE col IS NULL"
        }"#;
        let spec: StepSpec = serde_json::from_str(json).unwrap();

        assert_eq!(spec.id, "backfill_col");
        assert_eq!(spec.phase, Phase::Migrate);
        assert!(spec.depends_on.is_empty());
    }
}
