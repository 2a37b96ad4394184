//! Phase executor.
//!
//! Runs the pending steps of one phase strictly sequentially, in ledger load
//! order, failing fast on the first error. Migrate steps whose statement
//! matches the chunkable update shape are delegated to the backfill executor;
//! everything else executes once against the statement executor.

use super::backfill::{BackfillCursor, BackfillExecutor};
use super::error::MigrationError;
use super::ledger::StepLedger;
use super::statement::{parse_chunkable_update, StatementExecutor};
use super::step::{MigrationStep, Phase, StepStatus};

/// Per-phase execution summary.
#[derive(Debug, Clone)]
pub struct PhaseOutcome {
    /// The phase that ran.
    pub phase: Phase,
    /// Steps executed to completion in this invocation.
    pub executed: usize,
    /// Steps skipped because they were already terminal.
    pub skipped: usize,
}

/// Executor for one phase of the pipeline.
pub struct PhaseExecutor<'a> {
    ledger: &'a StepLedger,
    statements: &'a dyn StatementExecutor,
    backfill: &'a BackfillExecutor,
}

impl<'a> PhaseExecutor<'a> {
    /// Create a phase executor over the shared ledger and datastore boundary.
    pub fn new(
        ledger: &'a StepLedger,
        statements: &'a dyn StatementExecutor,
        backfill: &'a BackfillExecutor,
    ) -> Self {
        Self {
            ledger,
            statements,
            backfill,
        }
    }

    /// Run every runnable step of `phase` in load order.
    ///
    /// Completed and failed steps are never re-selected, so re-running a
    /// pipeline skips finished work. A step left in-progress by an
    /// interrupted run is re-entered and, for backfills, resumes from its
    /// persisted checkpoint.
    pub fn run_phase(&self, phase: Phase) -> Result<PhaseOutcome, MigrationError> {
        let mut outcome = PhaseOutcome {
            phase,
            executed: 0,
            skipped: 0,
        };

        let steps = self.ledger.load()?;
        for mut step in steps.into_iter().filter(|s| s.phase == phase) {
            if !step.is_runnable() {
                outcome.skipped += 1;
                continue;
            }

            if let Err(e) = self.check_dependencies(&step) {
                step.fail(e.to_string());
                self.persist(&step);
                return Err(e);
            }

            tracing::info!(step = %step.id, phase = %phase, "running step");
            step.start();
            self.persist(&step);

            match self.run_step(&mut step) {
                Ok(()) => {
                    step.complete();
                    self.persist(&step);
                    outcome.executed += 1;
                }
                Err(e) => {
                    let message = e.to_string();
                    step.fail(message.as_str());
                    self.persist(&step);
                    tracing::warn!(step = %step.id, error = %message, "step failed, aborting run");
                    return Err(MigrationError::StepFailed {
                        id: step.id,
                        message,
                    });
                }
            }
        }

        Ok(outcome)
    }

    /// Execute one step's statement, delegating chunkable migrate updates to
    /// the backfill executor.
    fn run_step(&self, step: &mut MigrationStep) -> Result<(), MigrationError> {
        if step.phase == Phase::Migrate {
            if let Some(update) = parse_chunkable_update(&step.statement) {
                let mut cursor =
                    BackfillCursor::resume(step.last_cursor.clone(), step.processed_count);
                let outcome = self.backfill.execute(
                    self.statements,
                    &update,
                    &mut cursor,
                    Some(self.ledger),
                    &step.id,
                )?;
                step.checkpoint(outcome.last_id.clone(), outcome.total_processed);
                tracing::info!(
                    step = %step.id,
                    chunks = outcome.chunks_applied,
                    rows = outcome.total_processed,
                    "backfill complete"
                );
                return Ok(());
            }
        }

        self.statements.execute(&step.statement)?;
        Ok(())
    }

    /// Every declared dependency must exist and be completed before the step
    /// runs.
    fn check_dependencies(&self, step: &MigrationStep) -> Result<(), MigrationError> {
        for dep in &step.depends_on {
            match self.ledger.get(dep)? {
                Some(d) if d.status == StepStatus::Completed => {}
                Some(d) => {
                    return Err(MigrationError::UnmetDependency {
                        step_id: step.id.clone(),
                        dependency: dep.clone(),
                        detail: format!("status is {}", d.status),
                    })
                }
                None => {
                    return Err(MigrationError::UnmetDependency {
                        step_id: step.id.clone(),
                        dependency: dep.clone(),
                        detail: "not registered".to_string(),
                    })
                }
            }
        }
        Ok(())
    }

    /// Status writes are an observability concern, not a correctness one:
    /// log and continue on failure.
    fn persist(&self, step: &MigrationStep) {
        if let Err(e) = self.ledger.save(step) {
            tracing::warn!(step = %step.id, error = %e, "failed to persist step status");
        }
    }
}
