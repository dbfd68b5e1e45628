//! Types shared by the meta server and its clients

pub mod address;
pub mod config;
pub mod error;
pub mod group;
pub mod partition;
pub mod routing;
pub mod utils;

pub use address::{Address, Endpoint};
pub use config::{Config, MetaConfig, StoreBackend};
pub use error::{Error, ErrorCode, Result};
pub use group::{GroupId, GroupTable, ReplicaGroup, UriId};
pub use partition::PartitionConfig;
pub use routing::PartitionRouter;
pub use utils::{crc32, parse_duration, timestamp_now_millis};
