//! Persisted step ledger.
//!
//! The ledger is the source of truth for what has run: one sled tree keyed by
//! step id, append-mostly (steps are never deleted by the engine; only
//! status, timestamps, error, and backfill checkpoints mutate in place). All
//! status mutation goes through the ledger; components must not cache status
//! across calls.

use super::error::MigrationError;
use super::step::{MigrationStep, StepSpec};

/// Step ledger backed by a sled tree.
pub struct StepLedger {
    tree: sled::Tree,
}

impl StepLedger {
    /// Tree name for migration steps.
    pub const TREE_NAME: &'static str = "migration:steps";

    /// Open or create the ledger. Creating the tree initializes an empty
    /// ledger.
    pub fn open(db: &sled::Db) -> Result<Self, MigrationError> {
        let tree = db.open_tree(Self::TREE_NAME)?;
        Ok(Self { tree })
    }

    /// Register a new pending step. Fails if the id is already taken.
    pub fn register(&self, spec: StepSpec) -> Result<MigrationStep, MigrationError> {
        let key = Self::step_key(&spec.id);
        if self.tree.contains_key(&key)? {
            return Err(MigrationError::DuplicateStep { id: spec.id });
        }

        let step = MigrationStep::new(spec, self.next_seq()?);
        self.tree.insert(key, step.to_bytes()?)?;
        Ok(step)
    }

    /// Whether a step with this id exists.
    pub fn contains(&self, id: &str) -> Result<bool, MigrationError> {
        Ok(self.tree.contains_key(Self::step_key(id))?)
    }

    /// Load one step by id.
    pub fn get(&self, id: &str) -> Result<Option<MigrationStep>, MigrationError> {
        match self.tree.get(Self::step_key(id))? {
            Some(bytes) => Ok(Some(MigrationStep::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Load all steps in creation order.
    pub fn load(&self) -> Result<Vec<MigrationStep>, MigrationError> {
        let mut steps = Vec::new();
        for entry in self.tree.iter() {
            let (_, value) = entry?;
            steps.push(MigrationStep::from_bytes(&value)?);
        }
        steps.sort_by(|a, b| (a.created_at, a.seq).cmp(&(b.created_at, b.seq)));
        Ok(steps)
    }

    /// Persist the current state of one step, replacing exactly that record.
    pub fn save(&self, step: &MigrationStep) -> Result<(), MigrationError> {
        self.tree.insert(Self::step_key(&step.id), step.to_bytes()?)?;
        Ok(())
    }

    /// Record backfill progress on one step without touching its status.
    pub fn checkpoint(
        &self,
        id: &str,
        cursor: Option<String>,
        processed: u64,
    ) -> Result<(), MigrationError> {
        let mut step = self.get(id)?.ok_or_else(|| MigrationError::StepNotFound {
            id: id.to_string(),
        })?;
        step.checkpoint(cursor, processed);
        self.save(&step)
    }

    /// Flush the ledger to disk.
    pub fn flush(&self) -> Result<(), MigrationError> {
        self.tree.flush()?;
        Ok(())
    }

    fn step_key(id: &str) -> Vec<u8> {
        let mut key = Vec::with_capacity(5 + id.len());
        key.extend_from_slice(b"step:");
        key.extend_from_slice(id.as_bytes());
        key
    }

    /// Next registration sequence number. Registration is rare and
    /// single-threaded, so a scan is acceptable.
    fn next_seq(&self) -> Result<u64, MigrationError> {
        let mut max_seq = None;
        for entry in self.tree.iter() {
            let (_, value) = entry?;
            let step = MigrationStep::from_bytes(&value)?;
            max_seq = max_seq.max(Some(step.seq));
        }
        Ok(max_seq.map_or(0, |s| s + 1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::step::{Phase, StepStatus};

    fn open_ledger() -> (sled::Db, StepLedger) {
        let db = sled::Config::new().temporary(true).open().unwrap();
        let ledger = StepLedger::open(&db).unwrap();
        (db, ledger)
    }

    fn spec(id: &str, phase: Phase) -> StepSpec {
        StepSpec::new(id, phase, format!("step {}", id), "SELECT 1")
    }

    #[test]
    fn test_register_and_load_order() {
        let (_db, ledger) = open_ledger();

        // Register in an order that does not match the lexicographic key
        // order, so load order demonstrably follows registration.
        ledger.register(spec("zz_first", Phase::Expand)).unwrap();
        ledger.register(spec("aa_second", Phase::Migrate)).unwrap();
        ledger.register(spec("mm_third", Phase::Contract)).unwrap();

        let steps = ledger.load().unwrap();
        let ids: Vec<&str> = steps.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["zz_first", "aa_second", "mm_third"]);
        assert!(steps.iter().all(|s| s.status == StepStatus::Pending));
    }

    #[test]
    fn test_register_duplicate_fails() {
        let (_db, ledger) = open_ledger();

        ledger.register(spec("add_col", Phase::Expand)).unwrap();
        let err = ledger.register(spec("add_col", Phase::Expand)).unwrap_err();

        assert!(matches!(err, MigrationError::DuplicateStep { id } if id == "add_col"));
        assert_eq!(ledger.load().unwrap().len(), 1);
    }

    #[test]
    fn test_save_updates_exactly_one_record() {
        let (_db, ledger) = open_ledger();

        ledger.register(spec("a", Phase::Expand)).unwrap();
        let mut b = ledger.register(spec("b", Phase::Expand)).unwrap();

        b.start();
        b.fail("boom");
        ledger.save(&b).unwrap();

        let a = ledger.get("a").unwrap().unwrap();
        let b = ledger.get("b").unwrap().unwrap();
        assert_eq!(a.status, StepStatus::Pending);
        assert_eq!(b.status, StepStatus::Failed);
        assert_eq!(b.error.as_deref(), Some("boom"));
    }

    #[test]
    fn test_checkpoint_preserves_status() {
        let (_db, ledger) = open_ledger();

        let mut step = ledger.register(spec("backfill", Phase::Migrate)).unwrap();
        step.start();
        ledger.save(&step).unwrap();

        ledger
            .checkpoint("backfill", Some("100".to_string()), 100)
            .unwrap();

        let loaded = ledger.get("backfill").unwrap().unwrap();
        assert_eq!(loaded.status, StepStatus::InProgress);
        assert_eq!(loaded.last_cursor.as_deref(), Some("100"));
        assert_eq!(loaded.processed_count, 100);
    }

    #[test]
    fn test_checkpoint_missing_step() {
        let (_db, ledger) = open_ledger();
        let err = ledger.checkpoint("nope", None, 0).unwrap_err();
        assert!(matches!(err, MigrationError::StepNotFound { .. }));
    }

    #[test]
    fn test_ledger_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let db = sled::open(dir.path()).unwrap();
            let ledger = StepLedger::open(&db).unwrap();
            ledger.register(spec("add_col", Phase::Expand)).unwrap();
            ledger.flush().unwrap();
        }

        let db = sled::open(dir.path()).unwrap();
        let ledger = StepLedger::open(&db).unwrap();
        let steps = ledger.load().unwrap();
        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].id, "add_col");
    }
}
