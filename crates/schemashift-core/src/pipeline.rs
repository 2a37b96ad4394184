//! Pipeline driver.
//!
//! Runs the phase executor for expand, then migrate, then contract, in that
//! fixed order, aborting the whole run on the first failure. Also provides
//! the read-only `check` mode used for status reporting.

use super::backfill::{BackfillConfig, BackfillExecutor};
use super::error::MigrationError;
use super::executor::{PhaseExecutor, PhaseOutcome};
use super::ledger::StepLedger;
use super::statement::StatementExecutor;
use super::step::{MigrationStep, Phase, StepSpec, StepStatus};

/// Engine configuration.
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    /// Chunked backfill tuning.
    pub backfill: BackfillConfig,
}

/// Summary of a completed run.
#[derive(Debug, Clone)]
pub struct RunReport {
    /// Per-phase outcomes, in execution order.
    pub phases: Vec<PhaseOutcome>,
}

impl RunReport {
    /// Total steps executed across all phases.
    pub fn steps_executed(&self) -> usize {
        self.phases.iter().map(|p| p.executed).sum()
    }
}

/// A failed step, as reported by `check`.
#[derive(Debug, Clone)]
pub struct FailedStep {
    /// Step id.
    pub id: String,
    /// Recorded error message.
    pub error: String,
}

/// Read-only ledger summary.
#[derive(Debug, Clone, Default)]
pub struct CheckReport {
    /// Total registered steps.
    pub total: usize,
    /// Steps not yet started.
    pub pending: usize,
    /// Steps interrupted mid-run.
    pub in_progress: usize,
    /// Steps completed.
    pub completed: usize,
    /// Steps failed.
    pub failed: usize,
    /// Every failed step with its error.
    pub failed_steps: Vec<FailedStep>,
}

impl CheckReport {
    /// Whether any step is in the failed state.
    pub fn has_failures(&self) -> bool {
        self.failed > 0
    }
}

/// The migration engine: step registration surface plus the pipeline driver.
pub struct MigrationEngine {
    ledger: StepLedger,
    statements: Box<dyn StatementExecutor>,
    backfill: BackfillExecutor,
}

impl MigrationEngine {
    /// Create an engine over an opened ledger database and a host-supplied
    /// statement executor. Validates the configuration.
    pub fn new(
        db: &sled::Db,
        statements: Box<dyn StatementExecutor>,
        config: EngineConfig,
    ) -> Result<Self, MigrationError> {
        config.backfill.validate()?;
        let ledger = StepLedger::open(db)?;
        Ok(Self {
            ledger,
            statements,
            backfill: BackfillExecutor::new(config.backfill),
        })
    }

    /// The underlying ledger.
    pub fn ledger(&self) -> &StepLedger {
        &self.ledger
    }

    /// Register a new step. Steps are expected to be registered once, before
    /// the pipeline is invoked.
    pub fn register(&self, spec: StepSpec) -> Result<MigrationStep, MigrationError> {
        self.ledger.register(spec)
    }

    /// Whether a step id is already registered.
    pub fn is_registered(&self, id: &str) -> Result<bool, MigrationError> {
        self.ledger.contains(id)
    }

    /// Run expand, migrate, contract in fixed order. The first failure stops
    /// the pipeline without attempting later phases. Already-terminal steps
    /// are skipped, so re-running after success is a no-op.
    pub fn execute(&self) -> Result<RunReport, MigrationError> {
        let executor = PhaseExecutor::new(&self.ledger, self.statements.as_ref(), &self.backfill);

        let mut phases = Vec::with_capacity(Phase::ORDER.len());
        for phase in Phase::ORDER {
            tracing::info!(phase = %phase, "starting phase");
            let outcome = executor.run_phase(phase)?;
            tracing::info!(
                phase = %phase,
                executed = outcome.executed,
                skipped = outcome.skipped,
                "phase finished"
            );
            phases.push(outcome);
        }

        if let Err(e) = self.ledger.flush() {
            tracing::warn!(error = %e, "failed to flush ledger");
        }

        Ok(RunReport { phases })
    }

    /// Load the ledger and report aggregate counts and failed steps, without
    /// executing or mutating anything.
    pub fn check(&self) -> Result<CheckReport, MigrationError> {
        let mut report = CheckReport::default();
        for step in self.ledger.load()? {
            report.total += 1;
            match step.status {
                StepStatus::Pending => report.pending += 1,
                StepStatus::InProgress => report.in_progress += 1,
                StepStatus::Completed => report.completed += 1,
                StepStatus::Failed => {
                    report.failed += 1;
                    report.failed_steps.push(FailedStep {
                        id: step.id,
                        error: step.error.unwrap_or_default(),
                    });
                }
            }
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::statement::{ResultSet, StatementError};
    use std::cell::RefCell;

    struct Recorder {
        log: RefCell<Vec<String>>,
    }

    impl StatementExecutor for Recorder {
        fn execute(&self, sql: &str) -> Result<ResultSet, StatementError> {
            self.log.borrow_mut().push(sql.to_string());
            Ok(ResultSet::empty())
        }
    }

    fn quiet_config() -> EngineConfig {
        EngineConfig {
            backfill: BackfillConfig {
                retry_delay_ms: 0,
                chunk_delay_ms: 0,
                ..BackfillConfig::default()
            },
        }
    }

    #[test]
    fn test_invalid_config_rejected_at_construction() {
        let db = sled::Config::new().temporary(true).open().unwrap();
        let config = EngineConfig {
            backfill: BackfillConfig {
                chunk_size: 0,
                ..BackfillConfig::default()
            },
        };
        let result = MigrationEngine::new(
            &db,
            Box::new(Recorder {
                log: RefCell::new(Vec::new()),
            }),
            config,
        );
        assert!(matches!(result, Err(MigrationError::InvalidConfig { .. })));
    }

    #[test]
    fn test_check_on_empty_ledger() {
        let db = sled::Config::new().temporary(true).open().unwrap();
        let engine = MigrationEngine::new(
            &db,
            Box::new(Recorder {
                log: RefCell::new(Vec::new()),
            }),
            quiet_config(),
        )
        .unwrap();

        let report = engine.check().unwrap();
        assert_eq!(report.total, 0);
        assert!(!report.has_failures());
    }
}
