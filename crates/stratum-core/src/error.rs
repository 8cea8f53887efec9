//! Configuration errors.

use thiserror::Error;

/// Errors raised while parsing or validating a table's placement config.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("table name must not be empty")]
    EmptyTableName,

    #[error("table name {table:?} must not contain ':'")]
    InvalidTableName { table: String },

    #[error("table {table}: replication factor must be at least 1")]
    InvalidReplication { table: String },

    #[error("table {table}: partition column must not be empty")]
    EmptyPartitionColumn { table: String },

    #[error("table {table}: partition count for column {column} must be at least 1")]
    InvalidPartitionCount { table: String, column: String },

    #[error("table {table}: replica-group strategy requires a [replica_group] section")]
    MissingReplicaGroupConfig { table: String },

    #[error("table {table}: instances per partition must be at least 1")]
    InvalidInstancesPerPartition { table: String },

    #[error("failed to parse table config: {0}")]
    Parse(String),
}
