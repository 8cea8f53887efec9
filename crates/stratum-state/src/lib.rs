//! Embedded state store for Stratum.
//!
//! Backed by [redb](https://docs.rs/redb), persists the three pieces of
//! cluster state the placement engine consumes or produces:
//!
//! - the instance registry (servers and their tenant/role tags)
//! - replica-group mappings, versioned for optimistic concurrency
//! - the external view (committed segment placements)
//!
//! # Architecture
//!
//! All domain types are JSON-serialized into redb's `&[u8]` value columns.
//! Composite keys (`{table}:{segment}`) enable prefix scans over a table's
//! placements. redb iterates keys in order, so instance listings come back
//! sorted by instance id.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared across async tasks and across engines.

pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::{MappingWrite, StateStore};
pub use types::*;
