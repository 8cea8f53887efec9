//! StateStore: redb-backed state persistence for Stratum.
//!
//! Provides typed operations over the instance registry, replica-group
//! mappings and the external view. All values are JSON-serialized into
//! redb's `&[u8]` value columns. The store supports both on-disk and
//! in-memory backends (the latter for testing).

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable};
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Outcome of a versioned mapping write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MappingWrite {
    /// The mapping was stored under the returned version.
    Committed { version: u64 },
    /// The stored version did not match the expected one; nothing was written.
    Conflict { current_version: Option<u64> },
}

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(INSTANCES).map_err(map_err!(Table))?;
        txn.open_table(MAPPINGS).map_err(map_err!(Table))?;
        txn.open_table(EXTERNAL_VIEW).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Instances ──────────────────────────────────────────────────
    //
    // The engine only lists instances. Put, get and delete are the registry
    // maintenance side: adding servers, disabling them, decommissioning.

    /// Insert or update a server instance.
    pub fn put_instance(&self, instance: &InstanceInfo) -> StateResult<()> {
        let value = serde_json::to_vec(instance).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(INSTANCES).map_err(map_err!(Table))?;
            table
                .insert(instance.id.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(instance = %instance.id, "instance stored");
        Ok(())
    }

    /// Get an instance by ID.
    pub fn get_instance(&self, instance_id: &str) -> StateResult<Option<InstanceInfo>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(INSTANCES).map_err(map_err!(Table))?;
        match table.get(instance_id).map_err(map_err!(Read))? {
            Some(guard) => {
                let instance: InstanceInfo =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(instance))
            }
            None => Ok(None),
        }
    }

    /// List all instances, ordered by instance ID.
    pub fn list_instances(&self) -> StateResult<Vec<InstanceInfo>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(INSTANCES).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let instance: InstanceInfo =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(instance);
        }
        Ok(results)
    }

    /// List instances carrying `tag`, ordered by instance ID.
    pub fn list_instances_with_tag(&self, tag: &str) -> StateResult<Vec<InstanceInfo>> {
        Ok(self
            .list_instances()?
            .into_iter()
            .filter(|i| i.has_tag(tag))
            .collect())
    }

    /// Delete an instance by ID. Returns true if it existed.
    pub fn delete_instance(&self, instance_id: &str) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(INSTANCES).map_err(map_err!(Table))?;
            existed = table.remove(instance_id).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(instance = %instance_id, existed, "instance deleted");
        Ok(existed)
    }

    // ── Replica-group mappings ─────────────────────────────────────

    /// Get the replica-group mapping of a table.
    pub fn get_mapping(&self, table_name: &str) -> StateResult<Option<ReplicaGroupMapping>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(MAPPINGS).map_err(map_err!(Table))?;
        match table.get(table_name).map_err(map_err!(Read))? {
            Some(guard) => {
                let mapping: ReplicaGroupMapping =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(mapping))
            }
            None => Ok(None),
        }
    }

    /// Store a mapping if the stored version still equals `expected_version`
    /// (`None` = no mapping stored yet).
    ///
    /// The check and the write happen in one write transaction, so two
    /// writers racing from the same base version cannot both commit.
    pub fn put_mapping(
        &self,
        mapping: &ReplicaGroupMapping,
        expected_version: Option<u64>,
    ) -> StateResult<MappingWrite> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let outcome;
        {
            let mut table = txn.open_table(MAPPINGS).map_err(map_err!(Table))?;
            let current_version = match table.get(mapping.table.as_str()).map_err(map_err!(Read))? {
                Some(guard) => {
                    let stored: ReplicaGroupMapping =
                        serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                    Some(stored.version)
                }
                None => None,
            };

            if current_version != expected_version {
                outcome = MappingWrite::Conflict { current_version };
            } else {
                let mut next = mapping.clone();
                next.version = current_version.map_or(1, |v| v + 1);
                let value = serde_json::to_vec(&next).map_err(map_err!(Serialize))?;
                table
                    .insert(next.table.as_str(), value.as_slice())
                    .map_err(map_err!(Write))?;
                outcome = MappingWrite::Committed {
                    version: next.version,
                };
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(table = %mapping.table, ?expected_version, ?outcome, "mapping write");
        Ok(outcome)
    }

    /// Delete a table's mapping. Returns true if it existed.
    pub fn delete_mapping(&self, table_name: &str) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(MAPPINGS).map_err(map_err!(Table))?;
            existed = table.remove(table_name).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(table = %table_name, existed, "mapping deleted");
        Ok(existed)
    }

    // ── External view ──────────────────────────────────────────────

    /// Insert or update a segment placement.
    pub fn put_placement(&self, placement: &SegmentPlacement) -> StateResult<()> {
        let key = placement.table_key();
        let value = serde_json::to_vec(placement).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(EXTERNAL_VIEW).map_err(map_err!(Table))?;
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%key, "placement stored");
        Ok(())
    }

    /// Get the placement of one segment.
    pub fn get_placement(
        &self,
        table_name: &str,
        segment: &str,
    ) -> StateResult<Option<SegmentPlacement>> {
        let key = placement_key(table_name, segment);
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(EXTERNAL_VIEW).map_err(map_err!(Table))?;
        match table.get(key.as_str()).map_err(map_err!(Read))? {
            Some(guard) => {
                let placement: SegmentPlacement =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(placement))
            }
            None => Ok(None),
        }
    }

    /// List all placements of a table.
    ///
    /// The key prefix narrows the scan; the stored table name decides, so
    /// a table named `a` never picks up rows keyed `a:b:...`.
    pub fn list_placements_for_table(&self, table_name: &str) -> StateResult<Vec<SegmentPlacement>> {
        let prefix = format!("{table_name}:");
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(EXTERNAL_VIEW).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            if !key.value().starts_with(&prefix) {
                continue;
            }
            let placement: SegmentPlacement =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            if placement.table == table_name {
                results.push(placement);
            }
        }
        Ok(results)
    }

    /// Delete all placements of a table. Returns number deleted.
    pub fn delete_placements_for_table(&self, table_name: &str) -> StateResult<u32> {
        let prefix = format!("{table_name}:");
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let count;
        {
            let mut table = txn.open_table(EXTERNAL_VIEW).map_err(map_err!(Table))?;
            let mut keys = Vec::new();
            for entry in table.iter().map_err(map_err!(Read))? {
                let (key, value) = entry.map_err(map_err!(Read))?;
                if !key.value().starts_with(&prefix) {
                    continue;
                }
                let placement: SegmentPlacement =
                    serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
                if placement.table == table_name {
                    keys.push(key.value().to_string());
                }
            }
            count = keys.len() as u32;
            for key in &keys {
                table.remove(key.as_str()).map_err(map_err!(Write))?;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(table = %table_name, count, "placements deleted");
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_instance(id: &str, tag: &str) -> InstanceInfo {
        InstanceInfo::new(id, "10.0.0.1", 8098).with_tag(tag)
    }

    fn test_mapping(table: &str) -> ReplicaGroupMapping {
        let mut mapping = ReplicaGroupMapping::new(table, 2, 1);
        mapping
            .partitions
            .insert(0, vec![vec!["s0".to_string()], vec!["s1".to_string()]]);
        mapping.next_offset = 2;
        mapping
    }

    fn test_placement(table: &str, segment: &str) -> SegmentPlacement {
        SegmentPlacement {
            table: table.to_string(),
            segment: segment.to_string(),
            partition: 0,
            instances: vec!["s0".to_string(), "s1".to_string()],
            published_at: 1000,
        }
    }

    // ── Instances ──────────────────────────────────────────────────

    #[test]
    fn instance_put_and_get() {
        let store = StateStore::open_in_memory().unwrap();
        let inst = test_instance("server_1", "DefaultTenant_OFFLINE");

        store.put_instance(&inst).unwrap();
        assert_eq!(store.get_instance("server_1").unwrap(), Some(inst));
    }

    #[test]
    fn instances_list_in_id_order() {
        let store = StateStore::open_in_memory().unwrap();
        for id in ["server_c", "server_a", "server_b"] {
            store.put_instance(&test_instance(id, "t_OFFLINE")).unwrap();
        }

        let ids: Vec<String> = store
            .list_instances()
            .unwrap()
            .into_iter()
            .map(|i| i.id)
            .collect();
        assert_eq!(ids, vec!["server_a", "server_b", "server_c"]);
    }

    #[test]
    fn instances_filter_by_tag() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_instance(&test_instance("s1", "t_OFFLINE")).unwrap();
        store.put_instance(&test_instance("s2", "t_REALTIME")).unwrap();
        store
            .put_instance(&test_instance("s3", "t_OFFLINE").with_tag("t_REALTIME"))
            .unwrap();

        assert_eq!(store.list_instances_with_tag("t_OFFLINE").unwrap().len(), 2);
        assert_eq!(store.list_instances_with_tag("t_REALTIME").unwrap().len(), 2);
        assert!(store.list_instances_with_tag("other_OFFLINE").unwrap().is_empty());
    }

    #[test]
    fn instance_delete() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_instance(&test_instance("s1", "t_OFFLINE")).unwrap();

        assert!(store.delete_instance("s1").unwrap());
        assert!(!store.delete_instance("s1").unwrap());
        assert!(store.get_instance("s1").unwrap().is_none());
    }

    // ── Mappings ───────────────────────────────────────────────────

    #[test]
    fn first_mapping_write_gets_version_one() {
        let store = StateStore::open_in_memory().unwrap();
        let outcome = store.put_mapping(&test_mapping("events"), None).unwrap();
        assert_eq!(outcome, MappingWrite::Committed { version: 1 });

        let stored = store.get_mapping("events").unwrap().unwrap();
        assert_eq!(stored.version, 1);
        assert_eq!(stored.instances(0, 1), Some(&["s1".to_string()][..]));
    }

    #[test]
    fn stale_create_conflicts() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_mapping(&test_mapping("events"), None).unwrap();

        let mut other = test_mapping("events");
        other.partitions.insert(0, vec![vec!["x".to_string()], vec!["y".to_string()]]);
        let outcome = store.put_mapping(&other, None).unwrap();
        assert_eq!(
            outcome,
            MappingWrite::Conflict {
                current_version: Some(1)
            }
        );
        // Winner's mapping is untouched.
        let stored = store.get_mapping("events").unwrap().unwrap();
        assert_eq!(stored.instances(0, 0), Some(&["s0".to_string()][..]));
    }

    #[test]
    fn versioned_update_bumps_version() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_mapping(&test_mapping("events"), None).unwrap();

        let mut mapping = store.get_mapping("events").unwrap().unwrap();
        mapping
            .partitions
            .insert(1, vec![vec!["s2".to_string()], vec!["s3".to_string()]]);
        let outcome = store.put_mapping(&mapping, Some(mapping.version)).unwrap();
        assert_eq!(outcome, MappingWrite::Committed { version: 2 });

        // Writing again from the old version now conflicts.
        let outcome = store.put_mapping(&mapping, Some(1)).unwrap();
        assert!(matches!(outcome, MappingWrite::Conflict { .. }));
    }

    #[test]
    fn update_of_missing_mapping_conflicts() {
        let store = StateStore::open_in_memory().unwrap();
        let outcome = store.put_mapping(&test_mapping("events"), Some(3)).unwrap();
        assert_eq!(
            outcome,
            MappingWrite::Conflict {
                current_version: None
            }
        );
        assert!(store.get_mapping("events").unwrap().is_none());
    }

    #[test]
    fn mapping_delete() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_mapping(&test_mapping("events"), None).unwrap();
        assert!(store.delete_mapping("events").unwrap());
        assert!(!store.delete_mapping("events").unwrap());
        assert!(store.get_mapping("events").unwrap().is_none());
    }

    // ── External view ──────────────────────────────────────────────

    #[test]
    fn placement_put_and_get() {
        let store = StateStore::open_in_memory().unwrap();
        let placement = test_placement("events", "events_0");
        store.put_placement(&placement).unwrap();

        assert_eq!(
            store.get_placement("events", "events_0").unwrap(),
            Some(placement)
        );
        assert!(store.get_placement("events", "events_1").unwrap().is_none());
    }

    #[test]
    fn placements_are_scoped_by_table() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_placement(&test_placement("events", "a")).unwrap();
        store.put_placement(&test_placement("events", "b")).unwrap();
        store.put_placement(&test_placement("events2", "a")).unwrap();

        assert_eq!(store.list_placements_for_table("events").unwrap().len(), 2);
        assert_eq!(store.list_placements_for_table("events2").unwrap().len(), 1);

        let deleted = store.delete_placements_for_table("events").unwrap();
        assert_eq!(deleted, 2);
        assert!(store.list_placements_for_table("events").unwrap().is_empty());
        // events2 untouched
        assert_eq!(store.list_placements_for_table("events2").unwrap().len(), 1);
    }

    #[test]
    fn table_whose_name_prefixes_another_keeps_its_own_rows() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_placement(&test_placement("a", "s0")).unwrap();
        store.put_placement(&test_placement("a:b", "s1")).unwrap();

        let listed = store.list_placements_for_table("a").unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].segment, "s0");

        assert_eq!(store.delete_placements_for_table("a").unwrap(), 1);
        assert_eq!(store.list_placements_for_table("a:b").unwrap().len(), 1);
        assert!(store.get_placement("a:b", "s1").unwrap().is_some());
    }

    // ── Persistence (on-disk) ──────────────────────────────────────

    #[test]
    fn persistence_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.redb");

        {
            let store = StateStore::open(&db_path).unwrap();
            store.put_mapping(&test_mapping("events"), None).unwrap();
            store.put_instance(&test_instance("s0", "t_OFFLINE")).unwrap();
        }

        let store = StateStore::open(&db_path).unwrap();
        let mapping = store.get_mapping("events").unwrap().unwrap();
        assert_eq!(mapping.version, 1);
        assert_eq!(mapping.next_offset, 2);
        assert!(store.get_instance("s0").unwrap().is_some());
    }

    #[test]
    fn empty_store_operations() {
        let store = StateStore::open_in_memory().unwrap();

        assert!(store.list_instances().unwrap().is_empty());
        assert!(store.get_mapping("any").unwrap().is_none());
        assert!(store.list_placements_for_table("any").unwrap().is_empty());
        assert_eq!(store.delete_placements_for_table("any").unwrap(), 0);
        assert!(!store.delete_instance("nope").unwrap());
        assert!(!store.delete_mapping("nope").unwrap());
    }
}
