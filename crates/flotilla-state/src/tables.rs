//! redb table definitions for the Flotilla state store.
//!
//! Most tables use `&str` keys and `&[u8]` values (JSON-serialized domain
//! types). The assignments table is keyed by resource id so a resource can
//! never carry more than one assignment. The decisions table is keyed by a
//! store-assigned sequence number to preserve append order.

use redb::TableDefinition;

/// Processor specs keyed by decimal processor id.
pub const PROCESSORS: TableDefinition<&str, &[u8]> = TableDefinition::new("processors");

/// Resource specs keyed by decimal resource id.
pub const RESOURCES: TableDefinition<&str, &[u8]> = TableDefinition::new("resources");

/// Assignments keyed by decimal resource id (one assignment per resource).
pub const ASSIGNMENTS: TableDefinition<&str, &[u8]> = TableDefinition::new("assignments");

/// Execution records keyed by `{processor_id}:{resource_id}`.
pub const EXECUTIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("executions");

/// Balancing decisions keyed by append sequence number.
pub const DECISIONS: TableDefinition<u64, &[u8]> = TableDefinition::new("decisions");
