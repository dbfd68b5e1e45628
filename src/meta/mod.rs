//! Meta server: authoritative app metadata backed by a coordination store

pub mod app_state;
pub mod cluster_state;
pub mod duplication;
pub mod env;
pub mod http;
pub mod messages;
pub mod rocks;
pub mod server;
pub mod store;
pub mod tasks;

pub use app_state::{AppState, AppStatus, PartitionConfig};
pub use cluster_state::{ClusterState, CreateAppOptions};
pub use duplication::{DupId, DuplicationEntry, DuplicationStatus};
pub use env::{AppEnvRequest, EnvOperation};
pub use rocks::RocksStore;
#[cfg(feature = "sled-backend")]
pub use rocks::SledStore;
pub use server::MetaServer;
pub use store::{CoordinationStore, FailpointStore, MemoryStore};
