//! redb table definitions for the Stratum state store.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized domain types).

use redb::TableDefinition;

/// Server instances keyed by `{instance_id}`.
pub const INSTANCES: TableDefinition<&str, &[u8]> = TableDefinition::new("instances");

/// Replica-group mappings keyed by `{table}`.
pub const MAPPINGS: TableDefinition<&str, &[u8]> = TableDefinition::new("replica_group_mappings");

/// Committed segment placements keyed by `{table}:{segment}`.
pub const EXTERNAL_VIEW: TableDefinition<&str, &[u8]> = TableDefinition::new("external_view");
