//! Table placement configuration parser.
//!
//! A table's placement behaviour is described by a small TOML document:
//!
//! ```toml
//! name = "events"
//! type = "offline"
//! tenant = "DefaultTenant"
//! replication = 2
//! strategy = "replica-group"
//!
//! [partition]
//! column = "memberId"
//! function = "modulo"
//! num_partitions = 2
//!
//! [replica_group]
//! instances_per_partition = 3
//! mirror_across_groups = false
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::ConfigError;

/// Server tenant used when a table does not name one.
pub const DEFAULT_TENANT: &str = "DefaultTenant";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TableConfig {
    pub name: String,
    #[serde(rename = "type", default)]
    pub table_type: TableType,
    #[serde(default = "default_tenant")]
    pub tenant: String,
    /// Number of instances that host every segment (R).
    pub replication: u32,
    pub strategy: StrategyKind,
    pub partition: Option<PartitionConfig>,
    pub replica_group: Option<ReplicaGroupConfig>,
}

/// Role of the servers a table lives on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableType {
    #[default]
    Offline,
    Realtime,
}

impl TableType {
    pub fn tag_suffix(&self) -> &'static str {
        match self {
            TableType::Offline => "OFFLINE",
            TableType::Realtime => "REALTIME",
        }
    }
}

/// Which segment assignment strategy a table uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StrategyKind {
    Random,
    Balanced,
    ReplicaGroup,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PartitionConfig {
    pub column: String,
    #[serde(default)]
    pub function: PartitionFunction,
    pub num_partitions: u32,
}

/// Function mapping a column value onto a partition number.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PartitionFunction {
    #[default]
    Modulo,
}

impl PartitionFunction {
    /// Partition of `value` among `num_partitions` partitions.
    ///
    /// Always in `[0, num_partitions)`, negative values included.
    pub fn partition(&self, value: i64, num_partitions: u32) -> u32 {
        match self {
            PartitionFunction::Modulo => value.rem_euclid(i64::from(num_partitions.max(1))) as u32,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReplicaGroupConfig {
    /// Instances per partition in each replica group (K).
    pub instances_per_partition: u32,
    #[serde(default)]
    pub mirror_across_groups: bool,
}

fn default_tenant() -> String {
    DEFAULT_TENANT.to_string()
}

impl TableConfig {
    /// Minimal config for `name`; partitioning and replica groups are added
    /// with the `with_*` builders.
    pub fn new(name: &str, strategy: StrategyKind, replication: u32) -> Self {
        Self {
            name: name.to_string(),
            table_type: TableType::Offline,
            tenant: default_tenant(),
            replication,
            strategy,
            partition: None,
            replica_group: None,
        }
    }

    pub fn with_tenant(mut self, tenant: &str) -> Self {
        self.tenant = tenant.to_string();
        self
    }

    pub fn with_table_type(mut self, table_type: TableType) -> Self {
        self.table_type = table_type;
        self
    }

    pub fn with_partition(mut self, column: &str, num_partitions: u32) -> Self {
        self.partition = Some(PartitionConfig {
            column: column.to_string(),
            function: PartitionFunction::Modulo,
            num_partitions,
        });
        self
    }

    pub fn with_replica_group(mut self, instances_per_partition: u32, mirror: bool) -> Self {
        self.replica_group = Some(ReplicaGroupConfig {
            instances_per_partition,
            mirror_across_groups: mirror,
        });
        self
    }

    /// Tag an instance must carry to serve this table, e.g. `DefaultTenant_OFFLINE`.
    pub fn server_tag(&self) -> String {
        format!("{}_{}", self.tenant, self.table_type.tag_suffix())
    }

    /// Number of partitions (1 when the table is not partitioned).
    pub fn num_partitions(&self) -> u32 {
        self.partition.as_ref().map_or(1, |p| p.num_partitions)
    }

    /// Check the invariants the placement engine relies on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::EmptyTableName);
        }
        // Placements are keyed `{table}:{segment}`.
        if self.name.contains(':') {
            return Err(ConfigError::InvalidTableName {
                table: self.name.clone(),
            });
        }
        if self.replication == 0 {
            return Err(ConfigError::InvalidReplication {
                table: self.name.clone(),
            });
        }
        if let Some(partition) = &self.partition {
            if partition.column.trim().is_empty() {
                return Err(ConfigError::EmptyPartitionColumn {
                    table: self.name.clone(),
                });
            }
            if partition.num_partitions == 0 {
                return Err(ConfigError::InvalidPartitionCount {
                    table: self.name.clone(),
                    column: partition.column.clone(),
                });
            }
        }
        if self.strategy == StrategyKind::ReplicaGroup {
            let group = self
                .replica_group
                .as_ref()
                .ok_or_else(|| ConfigError::MissingReplicaGroupConfig {
                    table: self.name.clone(),
                })?;
            if group.instances_per_partition == 0 {
                return Err(ConfigError::InvalidInstancesPerPartition {
                    table: self.name.clone(),
                });
            }
        }
        Ok(())
    }

    /// Parse and validate a TOML table config.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: TableConfig =
            toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(Self::from_toml_str(&content)?)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_minimal_uses_defaults() {
        let toml_str = r#"
name = "events"
replication = 3
strategy = "balanced"
"#;
        let config = TableConfig::from_toml_str(toml_str).unwrap();
        assert_eq!(config.name, "events");
        assert_eq!(config.tenant, DEFAULT_TENANT);
        assert_eq!(config.table_type, TableType::Offline);
        assert_eq!(config.strategy, StrategyKind::Balanced);
        assert!(config.partition.is_none());
        assert_eq!(config.num_partitions(), 1);
    }

    #[test]
    fn parse_partitioned_replica_group() {
        let toml_str = r#"
name = "members"
type = "realtime"
tenant = "tenantX"
replication = 2
strategy = "replica-group"

[partition]
column = "memberId"
function = "modulo"
num_partitions = 4

[replica_group]
instances_per_partition = 3
mirror_across_groups = true
"#;
        let config = TableConfig::from_toml_str(toml_str).unwrap();
        assert_eq!(config.server_tag(), "tenantX_REALTIME");
        assert_eq!(config.num_partitions(), 4);
        let group = config.replica_group.unwrap();
        assert_eq!(group.instances_per_partition, 3);
        assert!(group.mirror_across_groups);
    }

    #[test]
    fn unknown_partition_function_is_rejected() {
        let toml_str = r#"
name = "members"
replication = 2
strategy = "random"

[partition]
column = "memberId"
function = "murmur"
num_partitions = 4
"#;
        let err = TableConfig::from_toml_str(toml_str).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn zero_replication_is_rejected() {
        let config = TableConfig::new("t", StrategyKind::Random, 0);
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidReplication {
                table: "t".to_string()
            })
        );
    }

    #[test]
    fn replica_group_strategy_needs_group_section() {
        let config = TableConfig::new("t", StrategyKind::ReplicaGroup, 2);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingReplicaGroupConfig { .. })
        ));

        let config = config.with_replica_group(0, false);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidInstancesPerPartition { .. })
        ));
    }

    #[test]
    fn colon_in_table_name_is_rejected() {
        let config = TableConfig::new("events:v2", StrategyKind::Balanced, 2);
        assert_eq!(
            config.validate().unwrap_err(),
            ConfigError::InvalidTableName {
                table: "events:v2".to_string()
            }
        );
    }

    #[test]
    fn zero_partitions_is_rejected() {
        let config = TableConfig::new("t", StrategyKind::Balanced, 1).with_partition("c", 0);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidPartitionCount { .. })
        ));
    }

    #[test]
    fn modulo_handles_negative_values() {
        let f = PartitionFunction::Modulo;
        assert_eq!(f.partition(7, 4), 3);
        assert_eq!(f.partition(-1, 4), 3);
        assert_eq!(f.partition(0, 1), 0);
    }

    #[test]
    fn toml_round_trip_through_file() {
        let config = TableConfig::new("events", StrategyKind::ReplicaGroup, 2)
            .with_partition("memberId", 2)
            .with_replica_group(3, true);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.toml");
        std::fs::write(&path, config.to_toml_string().unwrap()).unwrap();

        let loaded = TableConfig::from_file(&path).unwrap();
        assert_eq!(loaded, config);
    }
}
