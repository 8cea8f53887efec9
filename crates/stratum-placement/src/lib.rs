//! Stratum segment placement.
//!
//! Decides which server instances host each replica of a table segment.
//! Three strategies are available per table: uniform random, least-loaded
//! balanced, and replica-group, which partitions instances into persisted
//! groups so every group holds a complete copy of the table (or of one
//! partition of it).
//!
//! # Components
//!
//! - **`engine`**: Per-table registration, planning, commit and rollback
//! - **`strategy`**: Strategy dispatch and counter reservations
//! - **`random`**, **`balanced`**, **`replica_group`**: The strategies
//! - **`partition`**: Resolves a segment's partition from its value ranges
//! - **`pool`**: Eligible instances for a table
//! - **`load`**: Per-instance segment counters
//! - **`cluster`**: Registry, mapping store and publisher seams

pub mod balanced;
pub mod cluster;
pub mod engine;
pub mod error;
pub mod load;
pub mod partition;
pub mod pool;
pub mod random;
pub mod replica_group;
pub mod strategy;

pub use cluster::{InstanceRegistry, MappingStore, PlacementPublisher};
pub use engine::{Placement, PlacementEngine};
pub use error::{PlacementError, PlacementResult};
pub use partition::resolve_partition;
pub use pool::InstancePool;
pub use strategy::{AssignmentStrategy, Reservation, Selection};
