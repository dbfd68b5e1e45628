//! Configuration for the meta server

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::common::Result;

/// Global configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Node ID (unique identifier)
    #[serde(default = "default_node_id")]
    pub node_id: String,

    /// Meta server config
    #[serde(default)]
    pub meta: MetaConfig,

    /// Logging level
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_node_id() -> String {
    "meta-1".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            node_id: default_node_id(),
            meta: MetaConfig::default(),
            log_level: default_log_level(),
        }
    }
}

/// Backend behind the coordination store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Memory,
    Rocksdb,
    Sled,
}

impl std::str::FromStr for StoreBackend {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "memory" => Ok(StoreBackend::Memory),
            "rocksdb" => Ok(StoreBackend::Rocksdb),
            "sled" => Ok(StoreBackend::Sled),
            other => Err(crate::Error::InvalidConfig(format!(
                "unknown store backend: {}",
                other
            ))),
        }
    }
}

/// Meta server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaConfig {
    /// Bind address for the HTTP admin API
    #[serde(default = "default_bind_addr")]
    pub bind_addr: SocketAddr,

    /// Root path of all cluster state in the coordination store
    #[serde(default = "default_cluster_root")]
    pub cluster_root: String,

    /// Coordination store backend
    #[serde(default = "default_store")]
    pub store: StoreBackend,

    /// On-disk location for durable backends
    #[serde(default = "default_store_path")]
    pub store_path: PathBuf,

    /// Deadline for a single coordination store call
    #[serde(default = "default_persistence_timeout")]
    pub persistence_timeout_ms: u64,

    /// Replica count used when a create request leaves it at zero
    #[serde(default = "default_replica_count")]
    pub default_replica_count: i32,

    /// How often dropped apps are checked for reclamation
    #[serde(default = "default_reclaim_interval")]
    pub reclaim_interval_secs: u64,

    /// Grace period applied when a drop request does not carry one
    #[serde(default = "default_drop_grace")]
    pub default_drop_grace_secs: u64,
}

fn default_bind_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 34601))
}
fn default_cluster_root() -> String {
    "/minimeta".to_string()
}
fn default_store() -> StoreBackend {
    StoreBackend::Memory
}
fn default_store_path() -> PathBuf {
    PathBuf::from("./meta-data")
}
fn default_persistence_timeout() -> u64 {
    5_000
}
fn default_replica_count() -> i32 {
    3
}
fn default_reclaim_interval() -> u64 {
    60
}
fn default_drop_grace() -> u64 {
    7 * 24 * 3600
}

impl Default for MetaConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            cluster_root: default_cluster_root(),
            store: default_store(),
            store_path: default_store_path(),
            persistence_timeout_ms: default_persistence_timeout(),
            default_replica_count: default_replica_count(),
            reclaim_interval_secs: default_reclaim_interval(),
            default_drop_grace_secs: default_drop_grace(),
        }
    }
}

impl MetaConfig {
    pub fn persistence_timeout(&self) -> Duration {
        Duration::from_millis(self.persistence_timeout_ms)
    }

    pub fn reclaim_interval(&self) -> Duration {
        Duration::from_secs(self.reclaim_interval_secs)
    }

    /// Path of the apps directory, e.g. `/minimeta/apps`
    pub fn apps_root(&self) -> String {
        format!("{}/apps", self.cluster_root.trim_end_matches('/'))
    }

    pub fn validate(&self) -> Result<()> {
        if self.cluster_root.is_empty() || !self.cluster_root.starts_with('/') {
            return Err(crate::Error::InvalidConfig(format!(
                "cluster_root must be an absolute path, got {:?}",
                self.cluster_root
            )));
        }
        if self.cluster_root.trim_end_matches('/').is_empty() {
            return Err(crate::Error::InvalidConfig(
                "cluster_root cannot be the store root".into(),
            ));
        }
        if self.persistence_timeout_ms == 0 {
            return Err(crate::Error::InvalidConfig(
                "persistence_timeout_ms must be positive".into(),
            ));
        }
        if self.default_replica_count <= 0 {
            return Err(crate::Error::InvalidConfig(
                "default_replica_count must be positive".into(),
            ));
        }
        if self.reclaim_interval_secs == 0 {
            return Err(crate::Error::InvalidConfig(
                "reclaim_interval_secs must be positive".into(),
            ));
        }
        Ok(())
    }
}

impl Config {
    /// Load configuration from `minimeta.toml` (optional) and `MINIMETA__*`
    /// environment variables.
    pub fn load() -> Result<Self> {
        Self::load_from(Path::new("minimeta.toml"))
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path).required(false))
            .add_source(
                config::Environment::with_prefix("MINIMETA")
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?;
        let config: Config = settings.try_deserialize()?;
        config.meta.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = MetaConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.apps_root(), "/minimeta/apps");
        assert_eq!(config.persistence_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_validate_rejects_bad_root() {
        let mut config = MetaConfig {
            cluster_root: "relative".into(),
            ..Default::default()
        };
        assert!(config.validate().is_err());

        config.cluster_root = "/".into();
        assert!(config.validate().is_err());

        config.cluster_root = "/ok/".into();
        assert!(config.validate().is_ok());
        assert_eq!(config.apps_root(), "/ok/apps");
    }

    #[test]
    fn test_validate_rejects_zero_timeout() {
        let config = MetaConfig {
            persistence_timeout_ms: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("meta.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            "node_id = \"meta-7\"\n[meta]\ncluster_root = \"/test\"\nstore = \"rocksdb\"\npersistence_timeout_ms = 250"
        )
        .unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.node_id, "meta-7");
        assert_eq!(config.meta.cluster_root, "/test");
        assert_eq!(config.meta.store, StoreBackend::Rocksdb);
        assert_eq!(config.meta.persistence_timeout_ms, 250);
        assert_eq!(config.meta.default_replica_count, 3);
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_from(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.meta.cluster_root, "/minimeta");
    }

    #[test]
    fn test_store_backend_from_str() {
        assert_eq!("memory".parse::<StoreBackend>().unwrap(), StoreBackend::Memory);
        assert!("zookeeper".parse::<StoreBackend>().is_err());
    }
}
