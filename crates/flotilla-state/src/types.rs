//! Domain types for the Flotilla state store.
//!
//! These types represent the persisted state of processors, resources,
//! assignments, executions, and balancing decisions. All types are
//! serializable to/from JSON for storage in redb tables.

use serde::{Deserialize, Serialize};

/// Unique identifier for a workload processor ("robot").
pub type ProcessorId = i64;

/// Unique identifier for a compute resource ("equipment").
pub type ResourceId = i64;

/// Identifier for a resource pool. `None` means the shared general pool.
pub type PoolId = i64;

// ── Processor ─────────────────────────────────────────────────────

/// Configuration of a workload processor.
///
/// Created and edited by external administration; the balancing engine
/// consumes it read-only each cycle. A processor is a balancing candidate
/// only when both `active` and `online` are true.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProcessorSpec {
    pub id: ProcessorId,
    /// Stable name used to resolve upstream load reports.
    pub name: String,
    pub active: bool,
    pub online: bool,
    /// Minimum resource units the processor should hold.
    pub min_units: u32,
    /// Maximum resource units, or -1 for unbounded.
    pub max_units: i32,
    /// Balancing priority; higher wins ties for free resources.
    pub priority: u32,
    /// Pending tickets one unit is expected to absorb. Unset or zero falls
    /// back to the engine-wide default ratio.
    pub tickets_per_unit: Option<u32>,
    /// Pool this processor draws from. `None` = general pool.
    pub pool_id: Option<PoolId>,
    /// Unix timestamp (seconds) when this spec was created.
    pub created_at: u64,
    /// Unix timestamp (seconds) when this spec was last updated.
    pub updated_at: u64,
}

impl ProcessorSpec {
    /// Whether this processor is eligible to be balanced right now.
    pub fn is_candidate(&self) -> bool {
        self.active && self.online
    }
}

/// Candidacy re-check result used by the cleanup phase.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProcessorStatus {
    pub id: ProcessorId,
    pub active: bool,
    pub online: bool,
    pub pool_id: Option<PoolId>,
}

impl ProcessorStatus {
    pub fn is_candidate(&self) -> bool {
        self.active && self.online
    }
}

// ── Resource ──────────────────────────────────────────────────────

/// A fungible unit of compute capacity.
///
/// Valid for balancing only when `active` and `dynamic_eligible`; pool
/// scoping additionally restricts which processors may hold it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResourceSpec {
    pub id: ResourceId,
    pub name: String,
    /// Pool this resource belongs to. `None` = general pool.
    pub pool_id: Option<PoolId>,
    /// Whether the balancing engine may assign this resource dynamically.
    pub dynamic_eligible: bool,
    pub active: bool,
    pub created_at: u64,
    pub updated_at: u64,
}

// ── Assignment ────────────────────────────────────────────────────

/// A processor–resource link.
///
/// Dynamic iff both `reserved` and `scheduled` are false; only dynamic
/// assignments are ever created or deleted by the balancing engine.
/// A resource carries at most one assignment at a time — the store keys
/// this table by resource id to enforce that invariant.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Assignment {
    pub processor_id: ProcessorId,
    pub resource_id: ResourceId,
    /// Reserved by an operator; immutable from the engine's perspective.
    pub reserved: bool,
    /// Pinned by the scheduling subsystem; immutable from the engine.
    pub scheduled: bool,
    /// Who created this assignment (e.g. "balancer", "operator").
    pub source: String,
    /// Unix timestamp (seconds) when the assignment was made.
    pub assigned_at: u64,
}

impl Assignment {
    /// Whether the balancing engine owns this assignment.
    pub fn is_dynamic(&self) -> bool {
        !self.reserved && !self.scheduled
    }
}

// ── Execution ─────────────────────────────────────────────────────

/// Lifecycle state of a work execution on a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionState {
    Queued,
    PendingExecution,
    Deployed,
    Running,
    Updating,
    RunPaused,
    Completed,
    Failed,
    Cancelled,
}

impl ExecutionState {
    /// Terminal states no longer occupy the resource.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionState::Completed | ExecutionState::Failed | ExecutionState::Cancelled
        )
    }
}

/// A work execution currently or previously running on a resource.
///
/// Non-terminal records mark the resource as in use, which biases release
/// ordering in the balancing engine (never blocks a forced release).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecutionRecord {
    pub processor_id: ProcessorId,
    pub resource_id: ResourceId,
    pub state: ExecutionState,
    pub updated_at: u64,
}

// ── Decision ──────────────────────────────────────────────────────

/// Action tag for an audited balancing decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DecisionAction {
    /// Released resources that no longer belong to the processor's pool.
    ReleaseIncoherent,
    /// Released all resources of an inactive/offline processor.
    ReleaseOffline,
    /// Granted resources toward the functional minimum.
    MinSatisfy,
    /// Released resources above the computed target.
    TrimExcess,
    /// Granted general-pool resources to leftover demand.
    OverflowGrant,
}

/// Audit record for one balancing decision. Write-once, append-only;
/// the engine never reads these back.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Decision {
    pub processor_id: ProcessorId,
    pub pool_id: Option<PoolId>,
    /// Pending tickets at the moment of the decision.
    pub tickets: u64,
    pub units_before: u32,
    pub units_after: u32,
    pub action: DecisionAction,
    pub justification: String,
    /// Unix timestamp (seconds) when the decision was recorded.
    pub recorded_at: u64,
}

impl ExecutionRecord {
    /// Build the composite key for the executions table.
    pub fn table_key(&self) -> String {
        format!("{}:{}", self.processor_id, self.resource_id)
    }
}
