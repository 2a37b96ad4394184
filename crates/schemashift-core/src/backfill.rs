//! Chunked backfill executor for migrate steps.
//!
//! Applies a row-level update to an unbounded candidate set in bounded-size
//! batches, tolerating transient failures with linear backoff. Pagination is
//! keyset based (`identifier > last_seen`) rather than offset based: a filter
//! that becomes false for rows the update already touched (the common
//! `WHERE col IS NULL` idiom) shrinks the candidate set under the query, and
//! a fixed offset would silently skip rows.

use super::error::MigrationError;
use super::ledger::StepLedger;
use super::statement::{ChunkableUpdate, StatementError, StatementExecutor};
use std::time::Duration;

/// Configuration for chunked backfill execution, supplied per engine
/// instance.
#[derive(Debug, Clone)]
pub struct BackfillConfig {
    /// Rows per batch. Must be at least 1.
    pub chunk_size: usize,
    /// Consecutive failures tolerated at one cursor position before the run
    /// aborts.
    pub max_retries: u32,
    /// Base retry delay; attempt `n` waits `n * retry_delay_ms`.
    pub retry_delay_ms: u64,
    /// Pause between successful chunks, to bound load on the datastore.
    pub chunk_delay_ms: u64,
    /// Identifier column used for keyset pagination.
    pub id_column: String,
}

impl Default for BackfillConfig {
    fn default() -> Self {
        Self {
            chunk_size: 500,
            max_retries: 3,
            retry_delay_ms: 500,
            chunk_delay_ms: 100,
            id_column: "id".to_string(),
        }
    }
}

impl BackfillConfig {
    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), MigrationError> {
        if self.chunk_size == 0 {
            return Err(MigrationError::InvalidConfig {
                message: "chunk_size must be at least 1".to_string(),
            });
        }
        if self.id_column.trim().is_empty() {
            return Err(MigrationError::InvalidConfig {
                message: "id_column must not be empty".to_string(),
            });
        }
        Ok(())
    }
}

/// In-memory state of one backfill invocation. Exists only for the duration
/// of one migrate-step execution; durable progress lives in the step record.
#[derive(Debug, Clone, Default)]
pub struct BackfillCursor {
    /// Last identifier committed by a successful chunk.
    pub last_id: Option<String>,
    /// Rows successfully updated so far.
    pub total_processed: u64,
    /// Consecutive failures at the current cursor position.
    pub retry_count: u32,
}

impl BackfillCursor {
    /// A cursor at the start of the candidate set.
    pub fn new() -> Self {
        Self::default()
    }

    /// A cursor resuming from a persisted checkpoint.
    pub fn resume(last_id: Option<String>, total_processed: u64) -> Self {
        Self {
            last_id,
            total_processed,
            retry_count: 0,
        }
    }
}

/// Result of a completed backfill.
#[derive(Debug, Clone)]
pub struct BackfillOutcome {
    /// Chunks successfully applied in this invocation.
    pub chunks_applied: u64,
    /// Total rows processed, including rows from a resumed checkpoint.
    pub total_processed: u64,
    /// Identifier of the last processed row, if any chunk ran.
    pub last_id: Option<String>,
}

/// Executor for chunked backfill operations.
pub struct BackfillExecutor {
    config: BackfillConfig,
}

impl BackfillExecutor {
    /// Create a new backfill executor.
    pub fn new(config: BackfillConfig) -> Self {
        Self { config }
    }

    /// The configured chunk size.
    pub fn chunk_size(&self) -> usize {
        self.config.chunk_size
    }

    /// Delay before retry attempt `retry_count` (linear backoff).
    pub fn backoff_delay(&self, retry_count: u32) -> Duration {
        Duration::from_millis(self.config.retry_delay_ms.saturating_mul(retry_count as u64))
    }

    /// Run the backfill to completion.
    ///
    /// Selects up to `chunk_size` identifiers past the cursor, applies the
    /// update restricted to exactly those identifiers, and advances. An empty
    /// selection terminates the loop. The update must be idempotent: a retry
    /// re-applies it to the same identifier set.
    ///
    /// When a ledger and step id are supplied, progress is checkpointed after
    /// every chunk so an interrupted run resumes instead of restarting.
    /// Checkpoint write failures are logged, not fatal.
    pub fn execute(
        &self,
        statements: &dyn StatementExecutor,
        update: &ChunkableUpdate,
        cursor: &mut BackfillCursor,
        ledger: Option<&StepLedger>,
        step_id: &str,
    ) -> Result<BackfillOutcome, MigrationError> {
        let mut chunks_applied = 0u64;

        loop {
            let select_sql = self.select_sql(update, cursor);
            let ids = match statements.execute(&select_sql) {
                Ok(result) => result.first_column(),
                Err(e) => {
                    self.handle_retry(cursor, step_id, &e)?;
                    continue;
                }
            };

            if ids.is_empty() {
                break;
            }

            let update_sql = self.update_sql(update, &ids);
            if let Err(e) = statements.execute(&update_sql) {
                self.handle_retry(cursor, step_id, &e)?;
                continue;
            }

            cursor.total_processed += ids.len() as u64;
            cursor.last_id = ids.last().cloned();
            cursor.retry_count = 0;
            chunks_applied += 1;

            tracing::debug!(
                step = %step_id,
                chunk = chunks_applied,
                rows = ids.len(),
                total = cursor.total_processed,
                "backfill chunk applied"
            );

            if let Some(ledger) = ledger {
                if let Err(e) =
                    ledger.checkpoint(step_id, cursor.last_id.clone(), cursor.total_processed)
                {
                    tracing::warn!(step = %step_id, error = %e, "failed to checkpoint backfill progress");
                }
            }

            if self.config.chunk_delay_ms > 0 {
                std::thread::sleep(Duration::from_millis(self.config.chunk_delay_ms));
            }
        }

        Ok(BackfillOutcome {
            chunks_applied,
            total_processed: cursor.total_processed,
            last_id: cursor.last_id.clone(),
        })
    }

    /// Record a failure at the current cursor position; escalates to fatal
    /// once the retry budget is exhausted.
    fn handle_retry(
        &self,
        cursor: &mut BackfillCursor,
        step_id: &str,
        error: &StatementError,
    ) -> Result<(), MigrationError> {
        cursor.retry_count += 1;
        if cursor.retry_count > self.config.max_retries {
            return Err(MigrationError::RetriesExhausted {
                attempts: cursor.retry_count,
                last_error: error.message.clone(),
            });
        }

        let delay = self.backoff_delay(cursor.retry_count);
        tracing::warn!(
            step = %step_id,
            retry = cursor.retry_count,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "backfill chunk failed, retrying at same cursor"
        );
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        Ok(())
    }

    /// Compose the candidate-selection query for the current cursor.
    fn select_sql(&self, update: &ChunkableUpdate, cursor: &BackfillCursor) -> String {
        let id = &self.config.id_column;
        let mut clauses = Vec::new();
        if let Some(filter) = &update.filter {
            clauses.push(format!("({})", filter));
        }
        if let Some(last_id) = &cursor.last_id {
            clauses.push(format!("{} > {}", id, quote_literal(last_id)));
        }
        let where_clause = if clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", clauses.join(" AND "))
        };

        format!(
            "SELECT {id} FROM {table}{where_clause} ORDER BY {id} ASC LIMIT {limit}",
            id = id,
            table = update.table,
            where_clause = where_clause,
            limit = self.config.chunk_size,
        )
    }

    /// Compose the update restricted to exactly the selected identifiers.
    fn update_sql(&self, update: &ChunkableUpdate, ids: &[String]) -> String {
        let quoted: Vec<String> = ids.iter().map(|id| quote_literal(id)).collect();
        format!(
            "UPDATE {} SET {} WHERE {} IN ({})",
            update.table,
            update.assignments,
            self.config.id_column,
            quoted.join(", "),
        )
    }
}

/// Quote a value as a SQL string literal.
fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}
