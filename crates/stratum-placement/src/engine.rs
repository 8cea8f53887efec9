//! Placement engine: decides and commits segment placements.
//!
//! The `PlacementEngine` owns one slot per registered table:
//! - the table config (immutable for the slot's lifetime)
//! - the table's assignment strategy and its counters, behind a mutex
//!
//! Calls for the same table serialize on that mutex, publishing included;
//! calls for different tables share nothing but the slot map, which is only
//! locked to look a slot up. A failed publish rolls back the counters the
//! selection reserved.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use stratum_core::{SegmentMetadata, TableConfig};
use stratum_state::{InstanceId, ReplicaGroupMapping, SegmentPlacement, StateStore};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::cluster::{InstanceRegistry, MappingStore, PlacementPublisher};
use crate::error::{PlacementError, PlacementResult};
use crate::partition::resolve_partition;
use crate::pool::InstancePool;
use crate::strategy::{AssignmentStrategy, Reservation};

/// Per-table state held in memory.
struct TableSlot {
    config: TableConfig,
    /// Distinguishes this registration from earlier ones of the same name.
    epoch: u64,
    strategy: Mutex<AssignmentStrategy>,
}

/// A placement that has been decided, with its load reserved, but not
/// necessarily published.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placement {
    pub table: String,
    pub segment: String,
    pub partition: u32,
    pub instances: Vec<InstanceId>,
    reservation: Reservation,
    epoch: u64,
}

impl Placement {
    pub fn reservation(&self) -> &Reservation {
        &self.reservation
    }

    fn to_record(&self, published_at: u64) -> SegmentPlacement {
        SegmentPlacement {
            table: self.table.clone(),
            segment: self.segment.clone(),
            partition: self.partition,
            instances: self.instances.clone(),
            published_at,
        }
    }
}

/// Places segments of registered tables onto instances.
pub struct PlacementEngine {
    registry: Arc<dyn InstanceRegistry>,
    mappings: Arc<dyn MappingStore>,
    publisher: Arc<dyn PlacementPublisher>,
    /// Registered tables: table name → slot.
    tables: RwLock<HashMap<String, Arc<TableSlot>>>,
    next_epoch: AtomicU64,
    rng_seed: Option<u64>,
}

impl PlacementEngine {
    /// Create an engine over explicit collaborators.
    pub fn new(
        registry: Arc<dyn InstanceRegistry>,
        mappings: Arc<dyn MappingStore>,
        publisher: Arc<dyn PlacementPublisher>,
    ) -> Self {
        Self {
            registry,
            mappings,
            publisher,
            tables: RwLock::new(HashMap::new()),
            next_epoch: AtomicU64::new(1),
            rng_seed: None,
        }
    }

    /// Create an engine whose collaborators are all backed by one state store.
    pub fn from_store(store: StateStore) -> Self {
        let store = Arc::new(store);
        Self::new(store.clone(), store.clone(), store)
    }

    /// Seed random assignment so selections are reproducible.
    pub fn with_rng_seed(mut self, seed: u64) -> Self {
        self.rng_seed = Some(seed);
        self
    }

    /// Register a table and build its strategy state.
    ///
    /// Counters start from whatever the external view already holds for the
    /// table, and a persisted replica-group mapping is adopted as is.
    pub async fn register_table(&self, config: TableConfig) -> PlacementResult<()> {
        if self.is_registered(&config.name).await {
            return Err(PlacementError::TableAlreadyRegistered(config.name));
        }

        let mut strategy = AssignmentStrategy::for_table(&config, self.rng_seed)?;
        if let AssignmentStrategy::ReplicaGroup(rg) = &mut strategy {
            if let Some(mapping) = self.mappings.load_mapping(&config.name)? {
                rg.adopt(mapping)?;
            }
        }
        let view = self.publisher.external_view(&config.name)?;
        strategy.seed(&view);

        let mut tables = self.tables.write().await;
        if tables.contains_key(&config.name) {
            return Err(PlacementError::TableAlreadyRegistered(config.name));
        }
        let epoch = self.next_epoch.fetch_add(1, Ordering::Relaxed);
        info!(
            table = %config.name,
            strategy = ?config.strategy,
            replication = config.replication,
            partitions = config.num_partitions(),
            tag = %config.server_tag(),
            existing_segments = view.len(),
            "table registered"
        );
        tables.insert(
            config.name.clone(),
            Arc::new(TableSlot {
                config,
                epoch,
                strategy: Mutex::new(strategy),
            }),
        );
        Ok(())
    }

    /// Drop a table: forget its counters, its replica-group mapping and its
    /// published placements. Returns false if it was not registered.
    pub async fn drop_table(&self, table: &str) -> PlacementResult<bool> {
        let slot = self.tables.write().await.remove(table);
        let Some(slot) = slot else {
            warn!(%table, "table not registered, nothing to drop");
            return Ok(false);
        };

        // Let selections already holding the table lock finish first.
        let _strategy = slot.strategy.lock().await;
        let mapping_removed = self.mappings.delete_mapping(table)?;
        let placements_removed = self.publisher.retract_table(table)?;
        info!(%table, mapping_removed, placements_removed, "table dropped");
        Ok(true)
    }

    pub async fn is_registered(&self, table: &str) -> bool {
        self.tables.read().await.contains_key(table)
    }

    pub async fn registered_tables(&self) -> Vec<String> {
        let tables = self.tables.read().await;
        let mut names: Vec<String> = tables.keys().cloned().collect();
        names.sort();
        names
    }

    pub async fn table_config(&self, table: &str) -> Option<TableConfig> {
        let tables = self.tables.read().await;
        tables.get(table).map(|slot| slot.config.clone())
    }

    /// Place a segment and publish the result.
    ///
    /// A segment that is already in the external view keeps its instances;
    /// re-registering it neither moves it nor counts it twice. The lookup,
    /// the selection and the publish all happen under the table lock, so two
    /// concurrent calls for the same segment agree on one placement.
    pub async fn assign_segment(&self, segment: &SegmentMetadata) -> PlacementResult<SegmentPlacement> {
        let slot = self.slot(&segment.table).await?;
        let mut strategy = slot.strategy.lock().await;
        if !self.is_live(&slot).await {
            return Err(PlacementError::TableNotFound(segment.table.clone()));
        }

        if let Some(existing) = self.publisher.lookup(&slot.config.name, &segment.name)? {
            info!(
                table = %segment.table,
                segment = %segment.name,
                instances = ?existing.instances,
                "segment already placed, keeping its instances"
            );
            return Ok(existing);
        }

        let placement = self.plan_locked(&slot, &mut strategy, segment)?;
        self.publish_locked(&mut strategy, placement)
    }

    /// Decide where a segment goes and reserve the load, without publishing.
    ///
    /// The caller must either [`commit`](Self::commit) or
    /// [`rollback`](Self::rollback) the returned placement.
    pub async fn plan_segment(&self, segment: &SegmentMetadata) -> PlacementResult<Placement> {
        let slot = self.slot(&segment.table).await?;
        let mut strategy = slot.strategy.lock().await;
        if !self.is_live(&slot).await {
            return Err(PlacementError::TableNotFound(segment.table.clone()));
        }
        self.plan_locked(&slot, &mut strategy, segment)
    }

    /// Publish a planned placement. If the publisher fails, the placement's
    /// reservation is rolled back before the error is returned.
    ///
    /// A placement planned before its table was dropped is never published:
    /// the call fails with `TableNotFound`, or `StalePlacement` when the
    /// table has been registered again in the meantime.
    pub async fn commit(&self, placement: Placement) -> PlacementResult<SegmentPlacement> {
        let slot = self.slot(&placement.table).await?;
        let mut strategy = slot.strategy.lock().await;
        if slot.epoch != placement.epoch || !self.is_live(&slot).await {
            warn!(
                table = %placement.table,
                segment = %placement.segment,
                "table dropped since the placement was planned, not publishing"
            );
            return Err(PlacementError::StalePlacement {
                table: placement.table,
                segment: placement.segment,
            });
        }
        self.publish_locked(&mut strategy, placement)
    }

    /// Release the load reserved by an unpublished placement.
    ///
    /// Returns false when there was nothing to release: the table has since
    /// been dropped (and possibly re-registered), or the strategy keeps no
    /// counters.
    pub async fn rollback(&self, placement: &Placement) -> bool {
        let Ok(slot) = self.slot(&placement.table).await else {
            debug!(table = %placement.table, segment = %placement.segment, "rollback for unregistered table ignored");
            return false;
        };
        if slot.epoch != placement.epoch {
            debug!(table = %placement.table, segment = %placement.segment, "rollback for dropped table ignored");
            return false;
        }
        if placement.reservation == Reservation::Untracked {
            return false;
        }

        slot.strategy.lock().await.release(&placement.reservation);
        warn!(
            table = %placement.table,
            segment = %placement.segment,
            instances = ?placement.instances,
            "placement rolled back"
        );
        true
    }

    /// Segments each instance holds according to the table's counters.
    ///
    /// Random tables keep no counters and report an empty map.
    pub async fn instance_loads(&self, table: &str) -> PlacementResult<BTreeMap<InstanceId, u32>> {
        let slot = self.slot(table).await?;
        let strategy = slot.strategy.lock().await;
        Ok(strategy.loads())
    }

    /// The replica-group mapping the table is currently assigning against.
    pub async fn replica_group_mapping(&self, table: &str) -> PlacementResult<Option<ReplicaGroupMapping>> {
        let slot = self.slot(table).await?;
        let strategy = slot.strategy.lock().await;
        Ok(strategy.mapping().cloned())
    }

    // ── Internal helpers ────────────────────────────────────────────

    async fn slot(&self, table: &str) -> PlacementResult<Arc<TableSlot>> {
        let tables = self.tables.read().await;
        tables
            .get(table)
            .cloned()
            .ok_or_else(|| PlacementError::TableNotFound(table.to_string()))
    }

    /// Whether `slot` is still the registered slot of its table.
    ///
    /// Callers hold the slot's strategy lock; `drop_table` removes the slot
    /// from the map before it takes that lock.
    async fn is_live(&self, slot: &TableSlot) -> bool {
        let tables = self.tables.read().await;
        tables
            .get(&slot.config.name)
            .is_some_and(|current| current.epoch == slot.epoch)
    }

    fn plan_locked(
        &self,
        slot: &TableSlot,
        strategy: &mut AssignmentStrategy,
        segment: &SegmentMetadata,
    ) -> PlacementResult<Placement> {
        let config = &slot.config;
        let partition = resolve_partition(segment, config.partition.as_ref())?;
        let pool = InstancePool::resolve(self.registry.as_ref(), config)?;
        let selection = strategy.select(partition, config.replication, &pool, self.mappings.as_ref())?;
        debug!(
            table = %config.name,
            segment = %segment.name,
            partition,
            instances = ?selection.instances,
            "placement planned"
        );

        Ok(Placement {
            table: config.name.clone(),
            segment: segment.name.clone(),
            partition,
            instances: selection.instances,
            reservation: selection.reservation,
            epoch: slot.epoch,
        })
    }

    fn publish_locked(
        &self,
        strategy: &mut AssignmentStrategy,
        placement: Placement,
    ) -> PlacementResult<SegmentPlacement> {
        let record = placement.to_record(epoch_secs());
        if let Err(source) = self.publisher.publish(&record) {
            strategy.release(&placement.reservation);
            warn!(
                table = %placement.table,
                segment = %placement.segment,
                instances = ?placement.instances,
                error = %source,
                "publish failed, placement rolled back"
            );
            return Err(PlacementError::Publish {
                segment: placement.segment,
                source,
            });
        }
        info!(
            table = %record.table,
            segment = %record.segment,
            partition = record.partition,
            instances = ?record.instances,
            "segment placed"
        );
        Ok(record)
    }
}

/// Current Unix epoch in seconds.
fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
