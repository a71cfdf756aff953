//! Cycle snapshot — a single consistent view of the fleet.
//!
//! All balancing math inside a cycle runs against this snapshot, never
//! against fresh store reads. Any read failure during assembly aborts the
//! cycle before a single mutation happens.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use tracing::debug;

use flotilla_load::LoadAggregator;
use flotilla_state::{
    PoolId, ProcessorId, ProcessorSpec, ResourceId, ResourceStore, StateResult,
};

/// Everything one balancing cycle needs to decide grants and releases.
#[derive(Debug, Default)]
pub struct Snapshot {
    /// Candidate processors (active and online), keyed by id.
    pub candidates: BTreeMap<ProcessorId, ProcessorSpec>,
    /// Dynamically eligible resources grouped by pool; `None` is the
    /// general pool. The general entry always exists, even when empty.
    pub valid_by_pool: BTreeMap<Option<PoolId>, BTreeSet<ResourceId>>,
    /// Aggregated pending tickets per processor.
    pub pending: BTreeMap<ProcessorId, u64>,
    /// Dynamic assignments: resources each processor currently holds,
    /// sorted ascending. Mutated in place as the cycle grants and releases.
    pub held: BTreeMap<ProcessorId, Vec<ResourceId>>,
    /// Resources pinned by fixed (non-dynamic) assignments. Never granted,
    /// never released.
    pub fixed: BTreeSet<ResourceId>,
    /// Resources with a non-terminal execution, per processor. Releasing
    /// these is a last resort.
    pub in_use: BTreeMap<ProcessorId, BTreeSet<ResourceId>>,
}

impl Snapshot {
    /// Reads the full fleet state and aggregates pending load. Fails fast:
    /// the first store error wins and nothing is mutated.
    pub async fn assemble(
        store: &dyn ResourceStore,
        load: &LoadAggregator,
    ) -> StateResult<Self> {
        let mut snapshot = Snapshot::default();

        for spec in store.list_candidate_processors()? {
            snapshot.candidates.insert(spec.id, spec);
        }

        snapshot.valid_by_pool.entry(None).or_default();
        for resource in store.list_eligible_resources()? {
            snapshot
                .valid_by_pool
                .entry(resource.pool_id)
                .or_default()
                .insert(resource.id);
        }

        for assignment in store.list_assignments()? {
            if assignment.is_dynamic() {
                snapshot
                    .held
                    .entry(assignment.processor_id)
                    .or_default()
                    .push(assignment.resource_id);
            } else {
                snapshot.fixed.insert(assignment.resource_id);
            }
        }
        for resources in snapshot.held.values_mut() {
            resources.sort_unstable();
        }

        for (processor, resource) in store.list_in_use_resources()? {
            snapshot.in_use.entry(processor).or_default().insert(resource);
        }

        let index: HashMap<String, ProcessorId> = snapshot
            .candidates
            .values()
            .map(|spec| (spec.name.clone(), spec.id))
            .collect();
        snapshot.pending = load.fetch_pending_load(&index).await;

        debug!(
            candidates = snapshot.candidates.len(),
            pools = snapshot.valid_by_pool.len(),
            dynamic_holders = snapshot.held.len(),
            fixed = snapshot.fixed.len(),
            "snapshot assembled"
        );
        Ok(snapshot)
    }

    /// Pending tickets for a processor, zero when it reported nothing.
    pub fn tickets(&self, processor: ProcessorId) -> u64 {
        self.pending.get(&processor).copied().unwrap_or(0)
    }

    /// Dynamic units a processor currently holds.
    pub fn units_held(&self, processor: ProcessorId) -> u32 {
        self.held.get(&processor).map_or(0, |r| r.len() as u32)
    }

    /// Resources of a pool that are eligible, not pinned by a fixed
    /// assignment, and not held by anyone. Sorted ascending.
    pub fn free_in_pool(&self, pool: Option<PoolId>) -> Vec<ResourceId> {
        let held_anywhere: BTreeSet<ResourceId> =
            self.held.values().flatten().copied().collect();
        self.valid_by_pool
            .get(&pool)
            .map(|resources| {
                resources
                    .iter()
                    .copied()
                    .filter(|r| !self.fixed.contains(r) && !held_anywhere.contains(r))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Resources a processor in the given pool may legitimately hold.
    ///
    /// Pool-scoped processors own their pool's set; unless isolation is
    /// strict they may also hold general resources handed out by the
    /// overflow phase. Unpooled processors only ever hold general ones.
    pub fn allowed_resources(
        &self,
        pool: Option<PoolId>,
        strict_pool_isolation: bool,
    ) -> BTreeSet<ResourceId> {
        let mut allowed = BTreeSet::new();
        if let Some(pool) = pool {
            if let Some(resources) = self.valid_by_pool.get(&Some(pool)) {
                allowed.extend(resources.iter().copied());
            }
            if strict_pool_isolation {
                return allowed;
            }
        }
        if let Some(general) = self.valid_by_pool.get(&None) {
            allowed.extend(general.iter().copied());
        }
        allowed
    }

    /// Records a grant in the in-memory view so later phases see it.
    pub fn note_granted(&mut self, processor: ProcessorId, resource: ResourceId) {
        let held = self.held.entry(processor).or_default();
        held.push(resource);
        held.sort_unstable();
    }

    /// Records a release in the in-memory view.
    pub fn note_released(&mut self, processor: ProcessorId, resource: ResourceId) {
        if let Some(held) = self.held.get_mut(&processor) {
            held.retain(|r| *r != resource);
            if held.is_empty() {
                self.held.remove(&processor);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flotilla_load::{LoadAggregator, StaticLoadProvider};
    use flotilla_state::{Assignment, ProcessorSpec, ResourceSpec, StateStore};
    use std::sync::Arc;

    fn processor(id: ProcessorId, name: &str, pool: Option<PoolId>) -> ProcessorSpec {
        ProcessorSpec {
            id,
            name: name.to_string(),
            active: true,
            online: true,
            min_units: 0,
            max_units: -1,
            priority: 10,
            tickets_per_unit: None,
            pool_id: pool,
            created_at: 0,
            updated_at: 0,
        }
    }

    fn resource(id: ResourceId, pool: Option<PoolId>) -> ResourceSpec {
        ResourceSpec {
            id,
            name: format!("res-{id}"),
            pool_id: pool,
            dynamic_eligible: true,
            active: true,
            created_at: 0,
            updated_at: 0,
        }
    }

    fn fixed_assignment(processor: ProcessorId, resource: ResourceId) -> Assignment {
        Assignment {
            processor_id: processor,
            resource_id: resource,
            reserved: true,
            scheduled: false,
            source: "operator".to_string(),
            assigned_at: 0,
        }
    }

    fn load(entries: &[(&str, u64)]) -> LoadAggregator {
        let mut aggregator = LoadAggregator::new();
        aggregator.register(Arc::new(StaticLoadProvider::new(
            "static",
            entries.iter().map(|(n, t)| (n.to_string(), *t)).collect(),
        )));
        aggregator
    }

    #[tokio::test]
    async fn groups_resources_by_pool() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_resource(&resource(1, None)).unwrap();
        store.put_resource(&resource(2, Some(7))).unwrap();
        store.put_resource(&resource(3, Some(7))).unwrap();

        let snapshot = Snapshot::assemble(&store, &load(&[])).await.unwrap();
        assert_eq!(snapshot.valid_by_pool[&None].len(), 1);
        assert_eq!(snapshot.valid_by_pool[&Some(7)].len(), 2);
    }

    #[tokio::test]
    async fn general_pool_entry_exists_even_when_empty() {
        let store = StateStore::open_in_memory().unwrap();
        let snapshot = Snapshot::assemble(&store, &load(&[])).await.unwrap();
        assert!(snapshot.valid_by_pool.contains_key(&None));
        assert!(snapshot.valid_by_pool[&None].is_empty());
    }

    #[tokio::test]
    async fn splits_fixed_and_dynamic_assignments() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_processor(&processor(1, "alpha", None)).unwrap();
        store.put_resource(&resource(10, None)).unwrap();
        store.put_resource(&resource(11, None)).unwrap();
        store.put_assignment(&fixed_assignment(1, 10)).unwrap();
        store.insert_dynamic_assignment(1, 11, "balancer").unwrap();

        let snapshot = Snapshot::assemble(&store, &load(&[])).await.unwrap();
        assert!(snapshot.fixed.contains(&10));
        assert_eq!(snapshot.held[&1], vec![11]);
    }

    #[tokio::test]
    async fn pending_load_resolved_by_name() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_processor(&processor(1, "alpha", None)).unwrap();

        let snapshot = Snapshot::assemble(&store, &load(&[("alpha", 42), ("ghost", 9)]))
            .await
            .unwrap();
        assert_eq!(snapshot.tickets(1), 42);
        assert_eq!(snapshot.pending.len(), 1);
    }

    #[tokio::test]
    async fn free_excludes_fixed_and_held() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_processor(&processor(1, "alpha", None)).unwrap();
        for id in 10..14 {
            store.put_resource(&resource(id, None)).unwrap();
        }
        store.put_assignment(&fixed_assignment(1, 10)).unwrap();
        store.insert_dynamic_assignment(1, 11, "balancer").unwrap();

        let snapshot = Snapshot::assemble(&store, &load(&[])).await.unwrap();
        assert_eq!(snapshot.free_in_pool(None), vec![12, 13]);
    }

    #[test]
    fn allowed_resources_honors_isolation() {
        let mut snapshot = Snapshot::default();
        snapshot.valid_by_pool.insert(None, [1, 2].into());
        snapshot.valid_by_pool.insert(Some(5), [3].into());

        let strict = snapshot.allowed_resources(Some(5), true);
        assert_eq!(strict, [3].into());

        let relaxed = snapshot.allowed_resources(Some(5), false);
        assert_eq!(relaxed, [1, 2, 3].into());

        let unpooled = snapshot.allowed_resources(None, true);
        assert_eq!(unpooled, [1, 2].into());
    }

    #[test]
    fn note_released_drops_empty_holders() {
        let mut snapshot = Snapshot::default();
        snapshot.note_granted(1, 10);
        snapshot.note_granted(1, 9);
        assert_eq!(snapshot.held[&1], vec![9, 10]);

        snapshot.note_released(1, 9);
        snapshot.note_released(1, 10);
        assert!(!snapshot.held.contains_key(&1));
        assert_eq!(snapshot.units_held(1), 0);
    }
}
