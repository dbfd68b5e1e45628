//! Coordination store interface
//!
//! A hierarchical, path-addressed node store (ZooKeeper-like). Paths are
//! absolute, `/`-separated, with no trailing slash; a node can only be
//! created under an existing parent. Calls are blocking: the cluster state
//! submits them to the blocking pool and awaits completion with a deadline.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use crate::common::utils::crc32;
use crate::common::Result;

pub trait CoordinationStore: Send + Sync {
    /// Create a node. Fails if it exists or its parent does not.
    fn create(&self, path: &str, data: &[u8]) -> Result<()>;

    /// Read a node's payload.
    fn get(&self, path: &str) -> Result<Vec<u8>>;

    /// Overwrite an existing node's payload.
    fn set(&self, path: &str, data: &[u8]) -> Result<()>;

    /// Delete a node and everything below it. Missing nodes are not an error.
    fn delete_subtree(&self, path: &str) -> Result<()>;

    /// Names of the direct children of a node, sorted.
    fn children(&self, path: &str) -> Result<Vec<String>>;

    fn exists(&self, path: &str) -> Result<bool>;
}

/// Check path syntax: `/a/b/c`, no empty segments, no trailing slash.
pub fn validate_path(path: &str) -> Result<()> {
    if path == "/" {
        return Ok(());
    }
    if !path.starts_with('/') || path.ends_with('/') || path[1..].split('/').any(str::is_empty) {
        return Err(crate::Error::Storage(format!("invalid node path: {:?}", path)));
    }
    Ok(())
}

/// Parent of a node path; `None` for the root.
pub fn parent_path(path: &str) -> Option<&str> {
    if path == "/" {
        return None;
    }
    match path.rfind('/') {
        Some(0) => Some("/"),
        Some(idx) => Some(&path[..idx]),
        None => None,
    }
}

/// Prefix shared by every strict descendant of `path`.
pub fn descendant_prefix(path: &str) -> String {
    if path == "/" {
        "/".to_string()
    } else {
        format!("{}/", path)
    }
}

/// Create `path` and any missing ancestors with empty payloads.
pub fn create_recursive(store: &dyn CoordinationStore, path: &str) -> Result<()> {
    validate_path(path)?;
    if path == "/" || store.exists(path)? {
        return Ok(());
    }
    if let Some(parent) = parent_path(path) {
        create_recursive(store, parent)?;
    }
    store.create(path, &[])
}

/// Encode a node payload: bincode body followed by its CRC32.
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    let mut buf = bincode::serialize(value)?;
    let checksum = crc32(&buf);
    buf.extend_from_slice(&checksum.to_le_bytes());
    Ok(buf)
}

/// Decode a payload written by [`encode`].
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    if bytes.len() < 4 {
        return Err(crate::Error::Codec(format!(
            "payload too short: {} bytes",
            bytes.len()
        )));
    }
    let (body, tail) = bytes.split_at(bytes.len() - 4);
    let expected = u32::from_le_bytes([tail[0], tail[1], tail[2], tail[3]]);
    let actual = crc32(body);
    if expected != actual {
        return Err(crate::Error::Codec(format!(
            "checksum mismatch: expected {:08x}, got {:08x}",
            expected, actual
        )));
    }
    Ok(bincode::deserialize(body)?)
}

/// In-memory store (tests, single process)
pub struct MemoryStore {
    nodes: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            nodes: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn node_count(&self) -> usize {
        self.nodes.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CoordinationStore for MemoryStore {
    fn create(&self, path: &str, data: &[u8]) -> Result<()> {
        validate_path(path)?;
        let mut nodes = self.nodes.lock().unwrap_or_else(PoisonError::into_inner);
        if nodes.contains_key(path) {
            return Err(crate::Error::Storage(format!("node exists: {}", path)));
        }
        if let Some(parent) = parent_path(path) {
            if parent != "/" && !nodes.contains_key(parent) {
                return Err(crate::Error::NotFound(format!("parent of {}", path)));
            }
        }
        nodes.insert(path.to_string(), data.to_vec());
        Ok(())
    }

    fn get(&self, path: &str) -> Result<Vec<u8>> {
        let nodes = self.nodes.lock().unwrap_or_else(PoisonError::into_inner);
        nodes
            .get(path)
            .cloned()
            .ok_or_else(|| crate::Error::NotFound(format!("node {}", path)))
    }

    fn set(&self, path: &str, data: &[u8]) -> Result<()> {
        let mut nodes = self.nodes.lock().unwrap_or_else(PoisonError::into_inner);
        match nodes.get_mut(path) {
            Some(slot) => {
                *slot = data.to_vec();
                Ok(())
            }
            None => Err(crate::Error::NotFound(format!("node {}", path))),
        }
    }

    fn delete_subtree(&self, path: &str) -> Result<()> {
        validate_path(path)?;
        let prefix = descendant_prefix(path);
        let mut nodes = self.nodes.lock().unwrap_or_else(PoisonError::into_inner);
        nodes.retain(|key, _| key != path && !key.starts_with(&prefix));
        Ok(())
    }

    fn children(&self, path: &str) -> Result<Vec<String>> {
        let nodes = self.nodes.lock().unwrap_or_else(PoisonError::into_inner);
        if path != "/" && !nodes.contains_key(path) {
            return Err(crate::Error::NotFound(format!("node {}", path)));
        }
        let prefix = descendant_prefix(path);
        Ok(nodes
            .range(prefix.clone()..)
            .take_while(|(key, _)| key.starts_with(&prefix))
            .map(|(key, _)| &key[prefix.len()..])
            .filter(|rest| !rest.contains('/'))
            .map(str::to_string)
            .collect())
    }

    fn exists(&self, path: &str) -> Result<bool> {
        let nodes = self.nodes.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(path == "/" || nodes.contains_key(path))
    }
}

/// Store wrapper that injects write failures and latency.
///
/// Writes are `create`, `set` and `delete_subtree`; reads pass through.
pub struct FailpointStore {
    inner: Arc<dyn CoordinationStore>,
    fail_writes: AtomicUsize,
    write_delay_ms: AtomicU64,
    writes: AtomicUsize,
}

impl FailpointStore {
    pub fn new(inner: Arc<dyn CoordinationStore>) -> Self {
        Self {
            inner,
            fail_writes: AtomicUsize::new(0),
            write_delay_ms: AtomicU64::new(0),
            writes: AtomicUsize::new(0),
        }
    }

    /// Fail the next `n` writes with a storage error.
    pub fn fail_next_writes(&self, n: usize) {
        self.fail_writes.store(n, Ordering::SeqCst);
    }

    /// Sleep this long before every write.
    pub fn delay_writes(&self, delay: Duration) {
        self.write_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Writes that reached the inner store.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    fn before_write(&self, what: &str, path: &str) -> Result<()> {
        let delay = self.write_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            std::thread::sleep(Duration::from_millis(delay));
        }
        let armed = self
            .fail_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if armed {
            return Err(crate::Error::Storage(format!(
                "injected failure: {} {}",
                what, path
            )));
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

impl CoordinationStore for FailpointStore {
    fn create(&self, path: &str, data: &[u8]) -> Result<()> {
        self.before_write("create", path)?;
        self.inner.create(path, data)
    }

    fn get(&self, path: &str) -> Result<Vec<u8>> {
        self.inner.get(path)
    }

    fn set(&self, path: &str, data: &[u8]) -> Result<()> {
        self.before_write("set", path)?;
        self.inner.set(path, data)
    }

    fn delete_subtree(&self, path: &str) -> Result<()> {
        self.before_write("delete", path)?;
        self.inner.delete_subtree(path)
    }

    fn children(&self, path: &str) -> Result<Vec<String>> {
        self.inner.children(path)
    }

    fn exists(&self, path: &str) -> Result<bool> {
        self.inner.exists(path)
    }
}
