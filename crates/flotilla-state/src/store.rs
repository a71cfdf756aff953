//! StateStore — redb-backed fleet state persistence.
//!
//! Provides typed operations over processors, resources, assignments,
//! executions, and the decision log. All values are JSON-serialized into
//! redb's `&[u8]` value columns. The store supports both on-disk and
//! in-memory backends (the latter for testing).
//!
//! The balancing engine talks to the store through the [`ResourceStore`]
//! trait, which pins down the exact read and mutation contracts the engine
//! depends on — including the conflict semantics of dynamic assignment
//! inserts and the rows-affected semantics of deletes.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use redb::{Database, ReadableDatabase, ReadableTable};
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Read and mutation contract the balancing engine relies on.
///
/// Read operations return the filtered views the engine snapshots each
/// cycle. Mutations cover only dynamic assignments: `insert` must fail with
/// [`StateError::Conflict`] when the resource already carries any assignment
/// (this is the race mitigation of last resort), and `delete` must only ever
/// touch rows where `reserved == false && scheduled == false` — zero rows
/// affected is a valid, non-error outcome.
pub trait ResourceStore: Send + Sync {
    /// Processors eligible for balancing (active and online).
    fn list_candidate_processors(&self) -> StateResult<Vec<ProcessorSpec>>;

    /// Resources eligible for dynamic assignment (active and dynamic-eligible).
    fn list_eligible_resources(&self) -> StateResult<Vec<ResourceSpec>>;

    /// All assignments, fixed and dynamic.
    fn list_assignments(&self) -> StateResult<Vec<Assignment>>;

    /// (processor, resource) pairs with a non-terminal execution.
    fn list_in_use_resources(&self) -> StateResult<Vec<(ProcessorId, ResourceId)>>;

    /// Candidacy re-check for the given processors. Unknown ids are omitted.
    fn processor_status(&self, ids: &[ProcessorId]) -> StateResult<Vec<ProcessorStatus>>;

    /// Create a dynamic assignment. Fails with `Conflict` if the resource
    /// already has any assignment.
    fn insert_dynamic_assignment(
        &self,
        processor_id: ProcessorId,
        resource_id: ResourceId,
        source: &str,
    ) -> StateResult<()>;

    /// Delete a dynamic assignment. Returns the number of rows affected
    /// (0 or 1); 0 means the assignment was already gone or is fixed.
    fn delete_dynamic_assignment(
        &self,
        processor_id: ProcessorId,
        resource_id: ResourceId,
    ) -> StateResult<u32>;
}

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
    /// Next sequence number for the append-only decisions table.
    decision_seq: Arc<AtomicU64>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self {
            db: Arc::new(db),
            decision_seq: Arc::new(AtomicU64::new(0)),
        };
        store.ensure_tables()?;
        store.seed_decision_seq()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self {
            db: Arc::new(db),
            decision_seq: Arc::new(AtomicU64::new(0)),
        };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(PROCESSORS).map_err(map_err!(Table))?;
        txn.open_table(RESOURCES).map_err(map_err!(Table))?;
        txn.open_table(ASSIGNMENTS).map_err(map_err!(Table))?;
        txn.open_table(EXECUTIONS).map_err(map_err!(Table))?;
        txn.open_table(DECISIONS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Resume the decision sequence after the last persisted entry.
    fn seed_decision_seq(&self) -> StateResult<()> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(DECISIONS).map_err(map_err!(Table))?;
        let last = table.iter().map_err(map_err!(Read))?.last();
        if let Some(entry) = last {
            let (key, _) = entry.map_err(map_err!(Read))?;
            self.decision_seq.store(key.value() + 1, Ordering::Relaxed);
        }
        Ok(())
    }

    // ── Processors ─────────────────────────────────────────────────

    /// Insert or update a processor spec.
    pub fn put_processor(&self, spec: &ProcessorSpec) -> StateResult<()> {
        let key = spec.id.to_string();
        let value = serde_json::to_vec(spec).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(PROCESSORS).map_err(map_err!(Table))?;
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%key, "processor stored");
        Ok(())
    }

    /// Get a processor by id.
    pub fn get_processor(&self, id: ProcessorId) -> StateResult<Option<ProcessorSpec>> {
        let key = id.to_string();
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(PROCESSORS).map_err(map_err!(Table))?;
        match table.get(key.as_str()).map_err(map_err!(Read))? {
            Some(guard) => {
                let spec: ProcessorSpec =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(spec))
            }
            None => Ok(None),
        }
    }

    /// List all processors, candidates or not.
    pub fn list_processors(&self) -> StateResult<Vec<ProcessorSpec>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(PROCESSORS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let spec: ProcessorSpec =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(spec);
        }
        Ok(results)
    }

    // ── Resources ──────────────────────────────────────────────────

    /// Insert or update a resource spec.
    pub fn put_resource(&self, spec: &ResourceSpec) -> StateResult<()> {
        let key = spec.id.to_string();
        let value = serde_json::to_vec(spec).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(RESOURCES).map_err(map_err!(Table))?;
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Get a resource by id.
    pub fn get_resource(&self, id: ResourceId) -> StateResult<Option<ResourceSpec>> {
        let key = id.to_string();
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(RESOURCES).map_err(map_err!(Table))?;
        match table.get(key.as_str()).map_err(map_err!(Read))? {
            Some(guard) => {
                let spec: ResourceSpec =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(spec))
            }
            None => Ok(None),
        }
    }

    /// List all resources.
    pub fn list_resources(&self) -> StateResult<Vec<ResourceSpec>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(RESOURCES).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let spec: ResourceSpec =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(spec);
        }
        Ok(results)
    }

    // ── Assignments ────────────────────────────────────────────────

    /// Insert or replace an assignment (operator/seed path; the engine only
    /// mutates through [`ResourceStore`]).
    pub fn put_assignment(&self, assignment: &Assignment) -> StateResult<()> {
        let key = assignment.resource_id.to_string();
        let value = serde_json::to_vec(assignment).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(ASSIGNMENTS).map_err(map_err!(Table))?;
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Get the assignment currently occupying a resource, if any.
    pub fn get_assignment(&self, resource_id: ResourceId) -> StateResult<Option<Assignment>> {
        let key = resource_id.to_string();
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(ASSIGNMENTS).map_err(map_err!(Table))?;
        match table.get(key.as_str()).map_err(map_err!(Read))? {
            Some(guard) => {
                let assignment: Assignment =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(assignment))
            }
            None => Ok(None),
        }
    }

    // ── Executions ─────────────────────────────────────────────────

    /// Insert or update an execution record.
    pub fn put_execution(&self, record: &ExecutionRecord) -> StateResult<()> {
        let key = record.table_key();
        let value = serde_json::to_vec(record).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(EXECUTIONS).map_err(map_err!(Table))?;
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Decisions ──────────────────────────────────────────────────

    /// Append a balancing decision. Returns its sequence number.
    pub fn append_decision(&self, decision: &Decision) -> StateResult<u64> {
        let seq = self.decision_seq.fetch_add(1, Ordering::Relaxed);
        let value = serde_json::to_vec(decision).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(DECISIONS).map_err(map_err!(Table))?;
            table.insert(seq, value.as_slice()).map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(seq)
    }

    /// List the most recent decisions, oldest first, capped at `limit`.
    pub fn list_decisions(&self, limit: usize) -> StateResult<Vec<Decision>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(DECISIONS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))?.rev() {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let decision: Decision =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(decision);
            if results.len() >= limit {
                break;
            }
        }
        results.reverse();
        Ok(results)
    }
}

impl ResourceStore for StateStore {
    fn list_candidate_processors(&self) -> StateResult<Vec<ProcessorSpec>> {
        Ok(self
            .list_processors()?
            .into_iter()
            .filter(ProcessorSpec::is_candidate)
            .collect())
    }

    fn list_eligible_resources(&self) -> StateResult<Vec<ResourceSpec>> {
        Ok(self
            .list_resources()?
            .into_iter()
            .filter(|r| r.active && r.dynamic_eligible)
            .collect())
    }

    fn list_assignments(&self) -> StateResult<Vec<Assignment>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(ASSIGNMENTS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let assignment: Assignment =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(assignment);
        }
        Ok(results)
    }

    fn list_in_use_resources(&self) -> StateResult<Vec<(ProcessorId, ResourceId)>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(EXECUTIONS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let record: ExecutionRecord =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            if !record.state.is_terminal() {
                results.push((record.processor_id, record.resource_id));
            }
        }
        Ok(results)
    }

    fn processor_status(&self, ids: &[ProcessorId]) -> StateResult<Vec<ProcessorStatus>> {
        let mut results = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(spec) = self.get_processor(*id)? {
                results.push(ProcessorStatus {
                    id: spec.id,
                    active: spec.active,
                    online: spec.online,
                    pool_id: spec.pool_id,
                });
            }
        }
        Ok(results)
    }

    fn insert_dynamic_assignment(
        &self,
        processor_id: ProcessorId,
        resource_id: ResourceId,
        source: &str,
    ) -> StateResult<()> {
        let key = resource_id.to_string();
        let assignment = Assignment {
            processor_id,
            resource_id,
            reserved: false,
            scheduled: false,
            source: source.to_string(),
            assigned_at: epoch_secs(),
        };
        let value = serde_json::to_vec(&assignment).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(ASSIGNMENTS).map_err(map_err!(Table))?;
            // Conflict check and insert inside one write transaction.
            if table.get(key.as_str()).map_err(map_err!(Read))?.is_some() {
                return Err(StateError::Conflict(format!(
                    "resource {resource_id} already assigned"
                )));
            }
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(processor_id, resource_id, source, "dynamic assignment created");
        Ok(())
    }

    fn delete_dynamic_assignment(
        &self,
        processor_id: ProcessorId,
        resource_id: ResourceId,
    ) -> StateResult<u32> {
        let key = resource_id.to_string();
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let affected;
        {
            let mut table = txn.open_table(ASSIGNMENTS).map_err(map_err!(Table))?;
            let matches = match table.get(key.as_str()).map_err(map_err!(Read))? {
                Some(guard) => {
                    let existing: Assignment =
                        serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                    existing.processor_id == processor_id && existing.is_dynamic()
                }
                None => false,
            };
            affected = if matches {
                table.remove(key.as_str()).map_err(map_err!(Write))?;
                1
            } else {
                0
            };
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(processor_id, resource_id, affected, "dynamic assignment deleted");
        Ok(affected)
    }
}

/// Current Unix epoch in seconds.
fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_processor(id: ProcessorId, name: &str) -> ProcessorSpec {
        ProcessorSpec {
            id,
            name: name.to_string(),
            active: true,
            online: true,
            min_units: 0,
            max_units: -1,
            priority: 100,
            tickets_per_unit: Some(10),
            pool_id: None,
            created_at: 1000,
            updated_at: 1000,
        }
    }

    fn test_resource(id: ResourceId) -> ResourceSpec {
        ResourceSpec {
            id,
            name: format!("vm-{id}"),
            pool_id: None,
            dynamic_eligible: true,
            active: true,
            created_at: 1000,
            updated_at: 1000,
        }
    }

    fn test_execution(
        processor_id: ProcessorId,
        resource_id: ResourceId,
        state: ExecutionState,
    ) -> ExecutionRecord {
        ExecutionRecord {
            processor_id,
            resource_id,
            state,
            updated_at: 1000,
        }
    }

    // ── Processor CRUD ─────────────────────────────────────────────

    #[test]
    fn processor_put_and_get() {
        let store = StateStore::open_in_memory().unwrap();
        let spec = test_processor(1, "invoices");

        store.put_processor(&spec).unwrap();
        assert_eq!(store.get_processor(1).unwrap(), Some(spec));
        assert!(store.get_processor(2).unwrap().is_none());
    }

    #[test]
    fn candidate_filter_excludes_inactive_and_offline() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_processor(&test_processor(1, "a")).unwrap();

        let mut inactive = test_processor(2, "b");
        inactive.active = false;
        store.put_processor(&inactive).unwrap();

        let mut offline = test_processor(3, "c");
        offline.online = false;
        store.put_processor(&offline).unwrap();

        let candidates = store.list_candidate_processors().unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].id, 1);
        // The unfiltered list still sees all three.
        assert_eq!(store.list_processors().unwrap().len(), 3);
    }

    // ── Resource eligibility ───────────────────────────────────────

    #[test]
    fn eligible_filter_requires_active_and_dynamic() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_resource(&test_resource(10)).unwrap();

        let mut fixed_only = test_resource(11);
        fixed_only.dynamic_eligible = false;
        store.put_resource(&fixed_only).unwrap();

        let mut inactive = test_resource(12);
        inactive.active = false;
        store.put_resource(&inactive).unwrap();

        let eligible = store.list_eligible_resources().unwrap();
        assert_eq!(eligible.len(), 1);
        assert_eq!(eligible[0].id, 10);
    }

    // ── Dynamic assignment contract ────────────────────────────────

    #[test]
    fn insert_dynamic_assignment_and_read_back() {
        let store = StateStore::open_in_memory().unwrap();
        store.insert_dynamic_assignment(1, 10, "balancer").unwrap();

        let assignment = store.get_assignment(10).unwrap().unwrap();
        assert_eq!(assignment.processor_id, 1);
        assert!(assignment.is_dynamic());
        assert_eq!(assignment.source, "balancer");
    }

    #[test]
    fn insert_conflicts_with_existing_assignment() {
        let store = StateStore::open_in_memory().unwrap();
        store.insert_dynamic_assignment(1, 10, "balancer").unwrap();

        let err = store.insert_dynamic_assignment(2, 10, "balancer");
        assert!(matches!(err, Err(StateError::Conflict(_))));
        // The original assignment survives.
        assert_eq!(store.get_assignment(10).unwrap().unwrap().processor_id, 1);
    }

    #[test]
    fn insert_conflicts_with_fixed_assignment() {
        let store = StateStore::open_in_memory().unwrap();
        store
            .put_assignment(&Assignment {
                processor_id: 1,
                resource_id: 10,
                reserved: true,
                scheduled: false,
                source: "operator".to_string(),
                assigned_at: 1000,
            })
            .unwrap();

        let err = store.insert_dynamic_assignment(2, 10, "balancer");
        assert!(matches!(err, Err(StateError::Conflict(_))));
    }

    #[test]
    fn delete_dynamic_assignment_affects_one_row() {
        let store = StateStore::open_in_memory().unwrap();
        store.insert_dynamic_assignment(1, 10, "balancer").unwrap();

        assert_eq!(store.delete_dynamic_assignment(1, 10).unwrap(), 1);
        // Already released: zero rows, not an error.
        assert_eq!(store.delete_dynamic_assignment(1, 10).unwrap(), 0);
        assert!(store.get_assignment(10).unwrap().is_none());
    }

    #[test]
    fn delete_never_touches_fixed_assignments() {
        let store = StateStore::open_in_memory().unwrap();
        for (resource_id, reserved, scheduled) in [(10, true, false), (11, false, true)] {
            store
                .put_assignment(&Assignment {
                    processor_id: 1,
                    resource_id,
                    reserved,
                    scheduled,
                    source: "operator".to_string(),
                    assigned_at: 1000,
                })
                .unwrap();
            assert_eq!(store.delete_dynamic_assignment(1, resource_id).unwrap(), 0);
            assert!(store.get_assignment(resource_id).unwrap().is_some());
        }
    }

    #[test]
    fn delete_ignores_other_processors_assignment() {
        let store = StateStore::open_in_memory().unwrap();
        store.insert_dynamic_assignment(1, 10, "balancer").unwrap();

        assert_eq!(store.delete_dynamic_assignment(2, 10).unwrap(), 0);
        assert!(store.get_assignment(10).unwrap().is_some());
    }

    // ── Executions / in-use view ───────────────────────────────────

    #[test]
    fn in_use_excludes_terminal_executions() {
        let store = StateStore::open_in_memory().unwrap();
        store
            .put_execution(&test_execution(1, 10, ExecutionState::Running))
            .unwrap();
        store
            .put_execution(&test_execution(1, 11, ExecutionState::Queued))
            .unwrap();
        store
            .put_execution(&test_execution(2, 12, ExecutionState::Completed))
            .unwrap();
        store
            .put_execution(&test_execution(2, 13, ExecutionState::Failed))
            .unwrap();

        let mut in_use = store.list_in_use_resources().unwrap();
        in_use.sort_unstable();
        assert_eq!(in_use, vec![(1, 10), (1, 11)]);
    }

    // ── Candidacy re-check ─────────────────────────────────────────

    #[test]
    fn processor_status_omits_unknown_ids() {
        let store = StateStore::open_in_memory().unwrap();
        let mut spec = test_processor(1, "a");
        spec.online = false;
        spec.pool_id = Some(7);
        store.put_processor(&spec).unwrap();

        let statuses = store.processor_status(&[1, 99]).unwrap();
        assert_eq!(statuses.len(), 1);
        assert_eq!(statuses[0].id, 1);
        assert!(!statuses[0].is_candidate());
        assert_eq!(statuses[0].pool_id, Some(7));
    }

    // ── Decision log ───────────────────────────────────────────────

    fn test_decision(processor_id: ProcessorId, action: DecisionAction) -> Decision {
        Decision {
            processor_id,
            pool_id: None,
            tickets: 42,
            units_before: 1,
            units_after: 2,
            action,
            justification: "test".to_string(),
            recorded_at: 1000,
        }
    }

    #[test]
    fn decisions_append_in_order() {
        let store = StateStore::open_in_memory().unwrap();
        let a = store
            .append_decision(&test_decision(1, DecisionAction::MinSatisfy))
            .unwrap();
        let b = store
            .append_decision(&test_decision(2, DecisionAction::TrimExcess))
            .unwrap();
        assert!(b > a);

        let decisions = store.list_decisions(10).unwrap();
        assert_eq!(decisions.len(), 2);
        assert_eq!(decisions[0].processor_id, 1);
        assert_eq!(decisions[1].processor_id, 2);
    }

    #[test]
    fn decision_list_caps_at_limit_keeping_newest() {
        let store = StateStore::open_in_memory().unwrap();
        for id in 1..=5 {
            store
                .append_decision(&test_decision(id, DecisionAction::OverflowGrant))
                .unwrap();
        }

        let recent = store.list_decisions(2).unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].processor_id, 4);
        assert_eq!(recent[1].processor_id, 5);
    }

    // ── Persistence (on-disk) ──────────────────────────────────────

    #[test]
    fn persistence_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("fleet.redb");

        {
            let store = StateStore::open(&db_path).unwrap();
            store.put_processor(&test_processor(1, "invoices")).unwrap();
            store.insert_dynamic_assignment(1, 10, "balancer").unwrap();
            store
                .append_decision(&test_decision(1, DecisionAction::MinSatisfy))
                .unwrap();
        }

        let store = StateStore::open(&db_path).unwrap();
        assert!(store.get_processor(1).unwrap().is_some());
        assert!(store.get_assignment(10).unwrap().is_some());
        // The sequence resumes after the persisted entry.
        let seq = store
            .append_decision(&test_decision(1, DecisionAction::TrimExcess))
            .unwrap();
        assert_eq!(seq, 1);
        assert_eq!(store.list_decisions(10).unwrap().len(), 2);
    }

    // ── Edge cases ─────────────────────────────────────────────────

    #[test]
    fn empty_store_operations() {
        let store = StateStore::open_in_memory().unwrap();

        assert!(store.list_candidate_processors().unwrap().is_empty());
        assert!(store.list_eligible_resources().unwrap().is_empty());
        assert!(store.list_assignments().unwrap().is_empty());
        assert!(store.list_in_use_resources().unwrap().is_empty());
        assert!(store.processor_status(&[1, 2]).unwrap().is_empty());
        assert!(store.list_decisions(10).unwrap().is_empty());
        assert_eq!(store.delete_dynamic_assignment(1, 10).unwrap(), 0);
    }
}
