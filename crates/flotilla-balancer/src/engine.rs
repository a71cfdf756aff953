//! The balancing engine: one periodic control loop over the fleet.
//!
//! Each cycle runs four phases against a single snapshot: cleanup,
//! per-pool minimum satisfaction and excess trimming, and a final
//! overflow pass over the general pool. Mutation failures are absorbed
//! locally; only a failed store read aborts a cycle.
//!
//! Cooling verdicts are evaluated against snapshot-time state and cached
//! per processor and direction for the whole cycle, so a minimum grant
//! does not block the same processor's overflow top-up moments later.
//! The resulting scale marks are committed to the cooling manager once,
//! at the end of the cycle.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use flotilla_cooling::{CoolingManager, Verdict};
use flotilla_load::LoadAggregator;
use flotilla_state::{
    Decision, DecisionAction, PoolId, ProcessorId, ProcessorSpec, ResourceId, ResourceStore,
};

use crate::audit::AuditSink;
use crate::config::EngineConfig;
use crate::error::BalancerResult;
use crate::snapshot::Snapshot;

/// Source tag on every assignment the engine creates.
const ASSIGNMENT_SOURCE: &str = "balancer";

/// What one balancing cycle did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub granted: u32,
    pub released: u32,
    pub cooling_denials: u32,
    pub store_failures: u32,
    pub audit_failures: u32,
    /// Shutdown was observed mid-cycle; remaining phases were skipped.
    pub aborted: bool,
}

impl CycleReport {
    pub fn mutations(&self) -> u32 {
        self.granted + self.released
    }
}

/// One processor's unmet demand inside a grant phase.
struct Demand {
    processor: ProcessorId,
    pool: Option<PoolId>,
    priority: u32,
    shortfall: u32,
    tickets: u64,
    units_before: u32,
}

/// Cooling verdicts for this cycle, computed from snapshot-time tickets
/// and unit counts and cached per processor and direction.
struct CycleGates<'a> {
    cooling: &'a CoolingManager,
    tickets: BTreeMap<ProcessorId, u64>,
    units: BTreeMap<ProcessorId, u32>,
    ups: BTreeMap<ProcessorId, Verdict>,
    downs: BTreeMap<ProcessorId, Verdict>,
}

impl<'a> CycleGates<'a> {
    fn new(cooling: &'a CoolingManager, snapshot: &Snapshot) -> Self {
        let units = snapshot
            .held
            .iter()
            .map(|(processor, resources)| (*processor, resources.len() as u32))
            .collect();
        Self {
            cooling,
            tickets: snapshot.pending.clone(),
            units,
            ups: BTreeMap::new(),
            downs: BTreeMap::new(),
        }
    }

    fn tickets(&self, processor: ProcessorId) -> u64 {
        self.tickets.get(&processor).copied().unwrap_or(0)
    }

    fn units(&self, processor: ProcessorId) -> u32 {
        self.units.get(&processor).copied().unwrap_or(0)
    }

    fn up(&mut self, processor: ProcessorId) -> Verdict {
        if let Some(verdict) = self.ups.get(&processor) {
            return verdict.clone();
        }
        let verdict =
            self.cooling
                .can_scale_up(processor, self.tickets(processor), self.units(processor));
        self.ups.insert(processor, verdict.clone());
        verdict
    }

    fn down(&mut self, processor: ProcessorId) -> Verdict {
        if let Some(verdict) = self.downs.get(&processor) {
            return verdict.clone();
        }
        let verdict =
            self.cooling
                .can_scale_down(processor, self.tickets(processor), self.units(processor));
        self.downs.insert(processor, verdict.clone());
        verdict
    }
}

/// Scale actions taken during the cycle, merged per processor and
/// direction, committed to the cooling manager when the cycle ends.
#[derive(Default)]
struct PendingMarks {
    ups: BTreeMap<ProcessorId, (u64, u32)>,
    downs: BTreeMap<ProcessorId, (u64, u32)>,
}

impl PendingMarks {
    fn up(&mut self, processor: ProcessorId, tickets: u64, units: u32) {
        let entry = self.ups.entry(processor).or_insert((tickets, 0));
        entry.0 = tickets;
        entry.1 += units;
    }

    fn down(&mut self, processor: ProcessorId, tickets: u64, units: u32) {
        let entry = self.downs.entry(processor).or_insert((tickets, 0));
        entry.0 = tickets;
        entry.1 += units;
    }

    fn commit(self, cooling: &CoolingManager) {
        for (processor, (tickets, units)) in self.ups {
            cooling.record_scale_up(processor, tickets, units);
        }
        for (processor, (tickets, units)) in self.downs {
            cooling.record_scale_down(processor, tickets, units);
        }
    }
}

/// The balancing engine. Owns no state besides its collaborators; all
/// fleet state lives in the store, all hysteresis in the cooling manager.
pub struct Engine {
    store: Arc<dyn ResourceStore>,
    load: LoadAggregator,
    cooling: Arc<CoolingManager>,
    audit: Arc<dyn AuditSink>,
    config: EngineConfig,
    shutdown: watch::Receiver<bool>,
}

impl Engine {
    pub fn new(
        store: Arc<dyn ResourceStore>,
        load: LoadAggregator,
        cooling: Arc<CoolingManager>,
        audit: Arc<dyn AuditSink>,
        config: EngineConfig,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            store,
            load,
            cooling,
            audit,
            config,
            shutdown,
        }
    }

    /// Run cycles at the given interval until shutdown. The first cycle
    /// fires immediately; overlapping ticks are skipped, never queued.
    pub async fn run(&self, interval: Duration) {
        let mut shutdown = self.shutdown.clone();
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(
            interval_secs = interval.as_secs(),
            strict_pool_isolation = self.config.strict_pool_isolation,
            "balancing engine started"
        );
        loop {
            tokio::select! {
                _ = ticker.tick() => match self.run_cycle().await {
                    Ok(report) if report.aborted => {
                        warn!(
                            granted = report.granted,
                            released = report.released,
                            "balancing cycle aborted by shutdown"
                        );
                    }
                    Ok(report) => {
                        info!(
                            granted = report.granted,
                            released = report.released,
                            cooling_denials = report.cooling_denials,
                            store_failures = report.store_failures,
                            "balancing cycle completed"
                        );
                    }
                    Err(e) => {
                        error!(error = %e, "balancing cycle failed");
                    }
                },
                _ = shutdown.changed() => {
                    info!("balancing engine stopping");
                    return;
                }
            }
        }
    }

    /// Execute one full balancing cycle.
    pub async fn run_cycle(&self) -> BalancerResult<CycleReport> {
        let mut report = CycleReport::default();
        if self.shutting_down() {
            report.aborted = true;
            return Ok(report);
        }

        let mut snapshot = Snapshot::assemble(self.store.as_ref(), &self.load).await?;
        let mut gates = CycleGates::new(&self.cooling, &snapshot);
        let mut marks = PendingMarks::default();

        let outcome = self.run_phases(&mut snapshot, &mut gates, &mut marks, &mut report);
        // Marks for mutations already applied must stick even when the
        // cycle ends early.
        marks.commit(&self.cooling);
        outcome?;
        Ok(report)
    }

    fn shutting_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    fn run_phases(
        &self,
        snapshot: &mut Snapshot,
        gates: &mut CycleGates<'_>,
        marks: &mut PendingMarks,
        report: &mut CycleReport,
    ) -> BalancerResult<()> {
        self.phase_cleanup(snapshot, gates, marks, report)?;
        if report.aborted {
            return Ok(());
        }

        let mut pools: BTreeSet<Option<PoolId>> = snapshot.valid_by_pool.keys().copied().collect();
        pools.extend(snapshot.candidates.values().map(|spec| spec.pool_id));
        // Scoped pools first; the general pool last, right before overflow.
        let ordered: Vec<Option<PoolId>> = pools
            .iter()
            .copied()
            .filter(Option::is_some)
            .chain(std::iter::once(None))
            .collect();

        for pool in ordered {
            if self.shutting_down() {
                report.aborted = true;
                return Ok(());
            }
            self.balance_pool(pool, snapshot, gates, marks, report);
        }

        if self.shutting_down() {
            report.aborted = true;
            return Ok(());
        }
        self.phase_overflow(snapshot, gates, marks, report);
        Ok(())
    }

    // ── Phase: cleanup ─────────────────────────────────────────────

    /// Re-check every holder of dynamic assignments and release what no
    /// longer belongs: everything for non-candidates, out-of-pool strays
    /// for the rest.
    fn phase_cleanup(
        &self,
        snapshot: &mut Snapshot,
        gates: &mut CycleGates<'_>,
        marks: &mut PendingMarks,
        report: &mut CycleReport,
    ) -> BalancerResult<()> {
        let holders: Vec<ProcessorId> = snapshot.held.keys().copied().collect();
        if holders.is_empty() {
            return Ok(());
        }
        let statuses: BTreeMap<ProcessorId, _> = self
            .store
            .processor_status(&holders)?
            .into_iter()
            .map(|status| (status.id, status))
            .collect();

        for processor in holders {
            if self.shutting_down() {
                report.aborted = true;
                return Ok(());
            }
            match statuses.get(&processor) {
                Some(status) if status.is_candidate() => {
                    self.release_incoherent(processor, status.pool_id, snapshot, gates, marks, report);
                }
                status => {
                    let pool = status.and_then(|s| s.pool_id);
                    self.release_all(processor, pool, snapshot, gates, marks, report);
                }
            }
        }
        Ok(())
    }

    /// Release every dynamic assignment of a processor that is gone,
    /// inactive, or offline.
    fn release_all(
        &self,
        processor: ProcessorId,
        pool: Option<PoolId>,
        snapshot: &mut Snapshot,
        gates: &mut CycleGates<'_>,
        marks: &mut PendingMarks,
        report: &mut CycleReport,
    ) {
        let verdict = gates.down(processor);
        if !verdict.allowed {
            report.cooling_denials += 1;
            info!(
                processor,
                reason = %verdict.reason,
                "inactive processor keeps its resources for now"
            );
            return;
        }
        let held = snapshot.held.get(&processor).cloned().unwrap_or_default();
        let victims = order_for_release(&held, snapshot.in_use.get(&processor));
        let tickets = gates.tickets(processor);
        let released = self.release_resources(processor, &victims, snapshot, report);
        if released == 0 {
            return;
        }
        marks.down(processor, tickets, released);
        self.record(
            Decision {
                processor_id: processor,
                pool_id: pool,
                tickets,
                units_before: held.len() as u32,
                units_after: held.len() as u32 - released,
                action: DecisionAction::ReleaseOffline,
                justification: "processor no longer active and online".to_string(),
                recorded_at: epoch_secs(),
            },
            report,
        );
    }

    /// Release assignments a candidate holds outside its allowed pool set.
    fn release_incoherent(
        &self,
        processor: ProcessorId,
        pool: Option<PoolId>,
        snapshot: &mut Snapshot,
        gates: &mut CycleGates<'_>,
        marks: &mut PendingMarks,
        report: &mut CycleReport,
    ) {
        let allowed = snapshot.allowed_resources(pool, self.config.strict_pool_isolation);
        let held = snapshot.held.get(&processor).cloned().unwrap_or_default();
        let stray: Vec<ResourceId> = held
            .iter()
            .copied()
            .filter(|resource| !allowed.contains(resource))
            .collect();
        if stray.is_empty() {
            return;
        }
        let verdict = gates.down(processor);
        if !verdict.allowed {
            report.cooling_denials += 1;
            info!(
                processor,
                stray = stray.len(),
                reason = %verdict.reason,
                "out-of-pool assignments retained for now"
            );
            return;
        }
        let victims = order_for_release(&stray, snapshot.in_use.get(&processor));
        let tickets = gates.tickets(processor);
        let released = self.release_resources(processor, &victims, snapshot, report);
        if released == 0 {
            return;
        }
        marks.down(processor, tickets, released);
        self.record(
            Decision {
                processor_id: processor,
                pool_id: pool,
                tickets,
                units_before: held.len() as u32,
                units_after: held.len() as u32 - released,
                action: DecisionAction::ReleaseIncoherent,
                justification: format!("{released} assignment(s) outside the allowed pool set"),
                recorded_at: epoch_secs(),
            },
            report,
        );
    }

    // ── Phase: per-pool balancing ──────────────────────────────────

    /// Minimum satisfaction then excess trimming for one pool's members.
    fn balance_pool(
        &self,
        pool: Option<PoolId>,
        snapshot: &mut Snapshot,
        gates: &mut CycleGates<'_>,
        marks: &mut PendingMarks,
        report: &mut CycleReport,
    ) {
        let members: Vec<(ProcessorId, ProcessorSpec)> = snapshot
            .candidates
            .iter()
            .filter(|(_, spec)| spec.pool_id == pool)
            .map(|(id, spec)| (*id, spec.clone()))
            .collect();
        if members.is_empty() {
            return;
        }
        let mut free: VecDeque<ResourceId> = snapshot.free_in_pool(pool).into();
        debug!(?pool, members = members.len(), free = free.len(), "balancing pool");

        // Minimum satisfaction: every member with pending work should hold
        // at least its functional minimum.
        let mut demands = Vec::new();
        for (processor, spec) in &members {
            let tickets = snapshot.tickets(*processor);
            if tickets == 0 {
                continue;
            }
            let current = snapshot.units_held(*processor);
            let floor = functional_min(spec, tickets);
            if current >= floor {
                continue;
            }
            let verdict = gates.up(*processor);
            if !verdict.allowed {
                report.cooling_denials += 1;
                debug!(
                    processor,
                    reason = %verdict.reason,
                    "minimum grant blocked by cooldown"
                );
                continue;
            }
            demands.push(Demand {
                processor: *processor,
                pool,
                priority: spec.priority,
                shortfall: floor - current,
                tickets,
                units_before: current,
            });
        }
        sort_demands(&mut demands);
        for demand in demands {
            if free.is_empty() {
                break;
            }
            self.grant(&demand, DecisionAction::MinSatisfy, &mut free, snapshot, marks, report);
        }

        // Excess trimming: release everything above the target, idle
        // resources first.
        for (processor, spec) in &members {
            let tickets = snapshot.tickets(*processor);
            let current = snapshot.units_held(*processor);
            let floor = if tickets > 0 {
                target_units(spec, tickets, self.config.default_tickets_per_unit)
                    .max(functional_min(spec, tickets))
            } else {
                0
            };
            if current <= floor {
                continue;
            }
            let verdict = gates.down(*processor);
            if !verdict.allowed {
                report.cooling_denials += 1;
                debug!(
                    processor,
                    reason = %verdict.reason,
                    "excess trim blocked by cooldown"
                );
                continue;
            }
            let held = snapshot.held.get(processor).cloned().unwrap_or_default();
            let victims: Vec<ResourceId> = order_for_release(&held, snapshot.in_use.get(processor))
                .into_iter()
                .take((current - floor) as usize)
                .collect();
            let released = self.release_resources(*processor, &victims, snapshot, report);
            if released == 0 {
                continue;
            }
            marks.down(*processor, tickets, released);
            self.record(
                Decision {
                    processor_id: *processor,
                    pool_id: spec.pool_id,
                    tickets,
                    units_before: current,
                    units_after: current - released,
                    action: DecisionAction::TrimExcess,
                    justification: format!("held {current}, target {floor}"),
                    recorded_at: epoch_secs(),
                },
                report,
            );
        }
    }

    // ── Phase: overflow ────────────────────────────────────────────

    /// Serve leftover demand, up to each processor's target, from what
    /// remains of the general pool.
    fn phase_overflow(
        &self,
        snapshot: &mut Snapshot,
        gates: &mut CycleGates<'_>,
        marks: &mut PendingMarks,
        report: &mut CycleReport,
    ) {
        let mut free: VecDeque<ResourceId> = snapshot.free_in_pool(None).into();
        let mut demands = Vec::new();
        for (processor, spec) in &snapshot.candidates {
            if self.config.strict_pool_isolation && spec.pool_id.is_some() {
                continue;
            }
            let tickets = snapshot.tickets(*processor);
            if tickets == 0 {
                continue;
            }
            let current = snapshot.units_held(*processor);
            let target = target_units(spec, tickets, self.config.default_tickets_per_unit);
            if current >= target {
                continue;
            }
            let verdict = gates.up(*processor);
            if !verdict.allowed {
                report.cooling_denials += 1;
                debug!(
                    processor = *processor,
                    reason = %verdict.reason,
                    "overflow grant blocked by cooldown"
                );
                continue;
            }
            demands.push(Demand {
                processor: *processor,
                pool: spec.pool_id,
                priority: spec.priority,
                shortfall: target - current,
                tickets,
                units_before: current,
            });
        }
        if demands.is_empty() || free.is_empty() {
            debug!(
                demands = demands.len(),
                free = free.len(),
                "overflow phase has nothing to do"
            );
            return;
        }
        sort_demands(&mut demands);
        for demand in demands {
            if free.is_empty() {
                break;
            }
            self.grant(&demand, DecisionAction::OverflowGrant, &mut free, snapshot, marks, report);
        }
    }

    // ── Mutation helpers ───────────────────────────────────────────

    /// Grant up to `shortfall` resources from the free list. A failed
    /// insert returns the resource to the free list and moves on to the
    /// next demand.
    fn grant(
        &self,
        demand: &Demand,
        action: DecisionAction,
        free: &mut VecDeque<ResourceId>,
        snapshot: &mut Snapshot,
        marks: &mut PendingMarks,
        report: &mut CycleReport,
    ) {
        let mut granted = 0;
        while granted < demand.shortfall {
            let Some(resource) = free.pop_front() else {
                break;
            };
            match self
                .store
                .insert_dynamic_assignment(demand.processor, resource, ASSIGNMENT_SOURCE)
            {
                Ok(()) => {
                    snapshot.note_granted(demand.processor, resource);
                    granted += 1;
                    report.granted += 1;
                }
                Err(e) => {
                    warn!(
                        processor = demand.processor,
                        resource,
                        error = %e,
                        "grant failed; resource returned to the free list"
                    );
                    report.store_failures += 1;
                    free.push_back(resource);
                    break;
                }
            }
        }
        if granted == 0 {
            return;
        }
        marks.up(demand.processor, demand.tickets, granted);
        self.record(
            Decision {
                processor_id: demand.processor,
                pool_id: demand.pool,
                tickets: demand.tickets,
                units_before: demand.units_before,
                units_after: demand.units_before + granted,
                action,
                justification: format!(
                    "granted {granted} of {} needed (priority {})",
                    demand.shortfall, demand.priority
                ),
                recorded_at: epoch_secs(),
            },
            report,
        );
    }

    /// Delete the given dynamic assignments, in order. Returns how many
    /// releases actually took effect; everything else stays held.
    fn release_resources(
        &self,
        processor: ProcessorId,
        victims: &[ResourceId],
        snapshot: &mut Snapshot,
        report: &mut CycleReport,
    ) -> u32 {
        let mut released = 0;
        for resource in victims {
            let busy = snapshot
                .in_use
                .get(&processor)
                .is_some_and(|set| set.contains(resource));
            match self.store.delete_dynamic_assignment(processor, *resource) {
                Ok(affected) if affected > 0 => {
                    if busy {
                        warn!(
                            processor,
                            resource = *resource,
                            "released a resource with a live execution"
                        );
                    }
                    snapshot.note_released(processor, *resource);
                    released += 1;
                    report.released += 1;
                }
                Ok(_) => {
                    warn!(
                        processor,
                        resource = *resource,
                        "release affected no rows; treating resource as still held"
                    );
                    report.store_failures += 1;
                }
                Err(e) => {
                    warn!(
                        processor,
                        resource = *resource,
                        error = %e,
                        "release failed; resource stays assigned"
                    );
                    report.store_failures += 1;
                }
            }
        }
        released
    }

    fn record(&self, decision: Decision, report: &mut CycleReport) {
        if let Err(e) = self.audit.record(&decision) {
            warn!(
                processor = decision.processor_id,
                error = %e,
                "audit sink failure; decision applied anyway"
            );
            report.audit_failures += 1;
        }
    }
}

/// How many units a processor should hold for the given pending tickets.
///
/// `ceil(tickets / ratio)`, raised to `min_units`, capped at `max_units`
/// (-1 means unbounded). Zero tickets always mean zero units, even below
/// the configured minimum.
pub(crate) fn target_units(spec: &ProcessorSpec, tickets: u64, default_ratio: u32) -> u32 {
    if tickets == 0 {
        return 0;
    }
    let ratio = u64::from(
        spec.tickets_per_unit
            .filter(|r| *r > 0)
            .unwrap_or(default_ratio)
            .max(1),
    );
    let mut needed = tickets.div_ceil(ratio).max(u64::from(spec.min_units));
    if spec.max_units >= 0 {
        needed = needed.min(spec.max_units as u64);
    }
    needed.min(u64::from(u32::MAX)) as u32
}

/// The floor the minimum-satisfaction phase defends: a processor with
/// pending work holds at least one unit even when `min_units` is zero.
pub(crate) fn functional_min(spec: &ProcessorSpec, tickets: u64) -> u32 {
    let min = if tickets > 0 {
        spec.min_units.max(1)
    } else {
        spec.min_units
    };
    if spec.max_units >= 0 {
        min.min(spec.max_units as u32)
    } else {
        min
    }
}

/// Release order: idle resources first, in-use ones last.
fn order_for_release(
    held: &[ResourceId],
    in_use: Option<&BTreeSet<ResourceId>>,
) -> Vec<ResourceId> {
    let busy = |resource: &ResourceId| in_use.is_some_and(|set| set.contains(resource));
    let mut ordered: Vec<ResourceId> = held.iter().copied().filter(|r| !busy(r)).collect();
    ordered.extend(held.iter().copied().filter(|r| busy(r)));
    ordered
}

/// Priority desc, then shortfall desc, then id for determinism.
fn sort_demands(demands: &mut [Demand]) {
    demands.sort_by(|a, b| {
        b.priority
            .cmp(&a.priority)
            .then(b.shortfall.cmp(&a.shortfall))
            .then(a.processor.cmp(&b.processor))
    });
}

/// Current Unix epoch in seconds.
fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
