//! Placement error types.

use stratum_core::ConfigError;
use stratum_state::StateError;
use thiserror::Error;

/// Errors that can occur while placing segments.
#[derive(Debug, Error)]
pub enum PlacementError {
    #[error("table {table}: {required} eligible instances required, {available} available")]
    InsufficientInstances {
        table: String,
        required: usize,
        available: usize,
    },

    #[error("invalid table configuration: {0}")]
    Configuration(#[from] ConfigError),

    #[error("segment {segment}: column {column} spans partitions {partitions:?}")]
    AmbiguousPartition {
        segment: String,
        column: String,
        partitions: Vec<u32>,
    },

    #[error("segment {segment}: no value range for partition column {column}")]
    MissingPartitionColumn { segment: String, column: String },

    #[error("table {table}: stored replica-group mapping is incompatible: {reason}")]
    IncompatibleMapping { table: String, reason: String },

    #[error("table {table}: replica-group mapping still contended after {attempts} attempts")]
    MappingContention { table: String, attempts: u32 },

    #[error("table not registered: {0}")]
    TableNotFound(String),

    #[error("table already registered: {0}")]
    TableAlreadyRegistered(String),

    #[error("table {table} was dropped after segment {segment} was planned")]
    StalePlacement { table: String, segment: String },

    #[error("failed to publish segment {segment}: {source}")]
    Publish {
        segment: String,
        #[source]
        source: StateError,
    },

    #[error("state store error: {0}")]
    State(#[from] StateError),
}

pub type PlacementResult<T> = Result<T, PlacementError>;
