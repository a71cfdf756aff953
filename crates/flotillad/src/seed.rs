//! Seed file support: declarative fleet bootstrap from TOML.
//!
//! Operators describe processors, resources, and fixed assignments in one
//! file; `flotillad seed` applies it to the state store. Entries are
//! upserts, so re-applying an edited file is safe.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::Deserialize;

use flotilla_state::{
    Assignment, PoolId, ProcessorId, ProcessorSpec, ResourceId, ResourceSpec, StateStore,
};

#[derive(Debug, Deserialize)]
pub struct SeedFile {
    #[serde(default)]
    pub processors: Vec<ProcessorSeed>,
    #[serde(default)]
    pub resources: Vec<ResourceSeed>,
    #[serde(default)]
    pub assignments: Vec<AssignmentSeed>,
}

#[derive(Debug, Deserialize)]
pub struct ProcessorSeed {
    pub id: ProcessorId,
    pub name: String,
    #[serde(default = "default_true")]
    pub active: bool,
    #[serde(default = "default_true")]
    pub online: bool,
    #[serde(default)]
    pub min_units: u32,
    /// -1 means unbounded.
    #[serde(default = "default_unbounded")]
    pub max_units: i32,
    #[serde(default)]
    pub priority: u32,
    pub tickets_per_unit: Option<u32>,
    pub pool_id: Option<PoolId>,
}

#[derive(Debug, Deserialize)]
pub struct ResourceSeed {
    pub id: ResourceId,
    pub name: String,
    pub pool_id: Option<PoolId>,
    #[serde(default = "default_true")]
    pub dynamic_eligible: bool,
    #[serde(default = "default_true")]
    pub active: bool,
}

#[derive(Debug, Deserialize)]
pub struct AssignmentSeed {
    pub processor_id: ProcessorId,
    pub resource_id: ResourceId,
    #[serde(default)]
    pub reserved: bool,
    #[serde(default)]
    pub scheduled: bool,
}

fn default_true() -> bool {
    true
}

fn default_unbounded() -> i32 {
    -1
}

/// Counts of applied entries: (processors, resources, assignments).
pub type SeedSummary = (usize, usize, usize);

/// Upsert every seed entry into the store.
pub fn apply(store: &StateStore, seed: &SeedFile) -> anyhow::Result<SeedSummary> {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();

    for processor in &seed.processors {
        store.put_processor(&ProcessorSpec {
            id: processor.id,
            name: processor.name.clone(),
            active: processor.active,
            online: processor.online,
            min_units: processor.min_units,
            max_units: processor.max_units,
            priority: processor.priority,
            tickets_per_unit: processor.tickets_per_unit,
            pool_id: processor.pool_id,
            created_at: now,
            updated_at: now,
        })?;
    }

    for resource in &seed.resources {
        store.put_resource(&ResourceSpec {
            id: resource.id,
            name: resource.name.clone(),
            pool_id: resource.pool_id,
            dynamic_eligible: resource.dynamic_eligible,
            active: resource.active,
            created_at: now,
            updated_at: now,
        })?;
    }

    for assignment in &seed.assignments {
        store.put_assignment(&Assignment {
            processor_id: assignment.processor_id,
            resource_id: assignment.resource_id,
            reserved: assignment.reserved,
            scheduled: assignment.scheduled,
            source: "seed".to_string(),
            assigned_at: now,
        })?;
    }

    Ok((
        seed.processors.len(),
        seed.resources.len(),
        seed.assignments.len(),
    ))
}
