//! Shared types for the Stratum segment placement engine.
//!
//! Holds the per-table placement configuration (parsed from TOML) and the
//! segment metadata the placement engine reads when a segment is
//! registered. Nothing here talks to storage or performs placement.

pub mod config;
pub mod error;
pub mod types;

pub use config::{
    PartitionConfig, PartitionFunction, ReplicaGroupConfig, StrategyKind, TableConfig, TableType,
    DEFAULT_TENANT,
};
pub use error::ConfigError;
pub use types::*;
