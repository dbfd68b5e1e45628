//! # minimeta
//!
//! Meta-server core for a partitioned key-value store:
//! - Replica groups with leader tracking and round-robin failover
//! - App (table) lifecycle: create, promote, drop, reclaim
//! - Per-app env updates and duplication links, serialized per app
//! - Partition reconfiguration ordered by ballot
//! - Every change written to a coordination store before it is visible
//!
//! ## Architecture
//!
//! ```text
//!   admin client / replication layer
//!               │ HTTP (JSON)
//!   ┌───────────▼──────────────────────┐
//!   │           Meta server            │
//!   │  ClusterState                    │
//!   │   - apps by id / by name         │
//!   │   - per-app FIFO op lock         │
//!   │   - snapshot swap after persist  │
//!   └───────────┬──────────────────────┘
//!               │ blocking calls with deadline
//!   ┌───────────▼──────────────────────┐
//!   │  Coordination store              │
//!   │  <root>/apps/<id>/partitions/<i> │
//!   │  (RocksDB, sled, memory)         │
//!   └──────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```bash
//! minimeta-server serve \
//!   --id meta-1 \
//!   --bind 0.0.0.0:34601 \
//!   --store rocksdb \
//!   --store-path ./meta-data
//!
//! curl -X POST localhost:34601/apps \
//!   -d '{"app_name":"temp","app_type":"pegasus","partition_count":8}'
//! curl -X POST localhost:34601/apps/temp/envs \
//!   -d '{"op":"set","keys":["rocksdb.usage_scenario"],"values":["bulk_load"]}'
//! ```

#![allow(clippy::result_large_err)]

pub mod common;
pub mod meta;

// Re-export commonly used types
pub use common::{Config, Error, Result};
pub use meta::{ClusterState, MetaServer};

/// Current version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build info
pub const BUILD_INFO: &str = concat!(env!("CARGO_PKG_VERSION"), " (", env!("CARGO_PKG_NAME"), ")");
