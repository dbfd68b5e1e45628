//! Durable coordination store backends
//!
//! One key per node path, payload as value. Subtree operations are prefix
//! scans over the sorted key space.

use rocksdb::{Direction, IteratorMode, Options, WriteBatch, WriteOptions, DB};
use std::path::Path;
use std::sync::{Mutex, PoisonError};

use crate::common::Result;
use crate::meta::store::{descendant_prefix, parent_path, validate_path, CoordinationStore};

/// RocksDB-backed store
pub struct RocksStore {
    db: DB,
    // create/set are check-then-write
    write_lock: Mutex<()>,
}

impl RocksStore {
    /// Open or create the store
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);

        let db = DB::open(&opts, path.as_ref())?;
        tracing::info!("Opened RocksDB coordination store at {}", path.as_ref().display());

        Ok(Self {
            db,
            write_lock: Mutex::new(()),
        })
    }

    fn sync_writes() -> WriteOptions {
        let mut wo = WriteOptions::default();
        wo.set_sync(true);
        wo
    }

    fn has(&self, path: &str) -> Result<bool> {
        Ok(path == "/" || self.db.get(path.as_bytes())?.is_some())
    }

    /// Keys strictly below `path`, in order.
    fn descendants(&self, path: &str) -> Result<Vec<String>> {
        let prefix = descendant_prefix(path);
        let iter = self
            .db
            .iterator(IteratorMode::From(prefix.as_bytes(), Direction::Forward));

        let mut keys = Vec::new();
        for item in iter {
            let (key_bytes, _) = item?;
            if !key_bytes.starts_with(prefix.as_bytes()) {
                break;
            }
            let key = String::from_utf8(key_bytes.to_vec())
                .map_err(|_| crate::Error::Codec("Invalid UTF-8 node path".into()))?;
            keys.push(key);
        }
        Ok(keys)
    }

    /// Flush to disk
    pub fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }
}

impl CoordinationStore for RocksStore {
    fn create(&self, path: &str, data: &[u8]) -> Result<()> {
        validate_path(path)?;
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        if self.has(path)? {
            return Err(crate::Error::Storage(format!("node exists: {}", path)));
        }
        if let Some(parent) = parent_path(path) {
            if !self.has(parent)? {
                return Err(crate::Error::NotFound(format!("parent of {}", path)));
            }
        }
        self.db.put_opt(path.as_bytes(), data, &Self::sync_writes())?;
        Ok(())
    }

    fn get(&self, path: &str) -> Result<Vec<u8>> {
        self.db
            .get(path.as_bytes())?
            .ok_or_else(|| crate::Error::NotFound(format!("node {}", path)))
    }

    fn set(&self, path: &str, data: &[u8]) -> Result<()> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        if !self.has(path)? {
            return Err(crate::Error::NotFound(format!("node {}", path)));
        }
        self.db.put_opt(path.as_bytes(), data, &Self::sync_writes())?;
        Ok(())
    }

    fn delete_subtree(&self, path: &str) -> Result<()> {
        validate_path(path)?;
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut batch = WriteBatch::default();
        batch.delete(path.as_bytes());
        for key in self.descendants(path)? {
            batch.delete(key.as_bytes());
        }
        self.db.write_opt(batch, &Self::sync_writes())?;
        Ok(())
    }

    fn children(&self, path: &str) -> Result<Vec<String>> {
        if !self.has(path)? {
            return Err(crate::Error::NotFound(format!("node {}", path)));
        }
        let prefix_len = descendant_prefix(path).len();
        Ok(self
            .descendants(path)?
            .into_iter()
            .map(|key| key[prefix_len..].to_string())
            .filter(|rest| !rest.contains('/'))
            .collect())
    }

    fn exists(&self, path: &str) -> Result<bool> {
        self.has(path)
    }
}

/// Sled-backed store
#[cfg(feature = "sled-backend")]
pub struct SledStore {
    db: sled::Db,
    write_lock: Mutex<()>,
}

#[cfg(feature = "sled-backend")]
fn sled_err(e: sled::Error) -> crate::Error {
    crate::Error::Storage(format!("sled: {}", e))
}

#[cfg(feature = "sled-backend")]
impl SledStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let db = sled::open(path.as_ref()).map_err(sled_err)?;
        tracing::info!("Opened sled coordination store at {}", path.as_ref().display());
        Ok(Self {
            db,
            write_lock: Mutex::new(()),
        })
    }

    fn has(&self, path: &str) -> Result<bool> {
        Ok(path == "/" || self.db.contains_key(path).map_err(sled_err)?)
    }

    fn descendants(&self, path: &str) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        for item in self.db.scan_prefix(descendant_prefix(path)) {
            let (key, _) = item.map_err(sled_err)?;
            let key = String::from_utf8(key.to_vec())
                .map_err(|_| crate::Error::Codec("Invalid UTF-8 node path".into()))?;
            keys.push(key);
        }
        Ok(keys)
    }

    fn flush_durable(&self) -> Result<()> {
        self.db.flush().map_err(sled_err)?;
        Ok(())
    }
}

#[cfg(feature = "sled-backend")]
impl CoordinationStore for SledStore {
    fn create(&self, path: &str, data: &[u8]) -> Result<()> {
        validate_path(path)?;
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        if self.has(path)? {
            return Err(crate::Error::Storage(format!("node exists: {}", path)));
        }
        if let Some(parent) = parent_path(path) {
            if !self.has(parent)? {
                return Err(crate::Error::NotFound(format!("parent of {}", path)));
            }
        }
        self.db.insert(path, data).map_err(sled_err)?;
        self.flush_durable()
    }

    fn get(&self, path: &str) -> Result<Vec<u8>> {
        self.db
            .get(path)
            .map_err(sled_err)?
            .map(|ivec| ivec.to_vec())
            .ok_or_else(|| crate::Error::NotFound(format!("node {}", path)))
    }

    fn set(&self, path: &str, data: &[u8]) -> Result<()> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        if !self.has(path)? {
            return Err(crate::Error::NotFound(format!("node {}", path)));
        }
        self.db.insert(path, data).map_err(sled_err)?;
        self.flush_durable()
    }

    fn delete_subtree(&self, path: &str) -> Result<()> {
        validate_path(path)?;
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut batch = sled::Batch::default();
        batch.remove(path);
        for key in self.descendants(path)? {
            batch.remove(key.as_str());
        }
        self.db.apply_batch(batch).map_err(sled_err)?;
        self.flush_durable()
    }

    fn children(&self, path: &str) -> Result<Vec<String>> {
        if !self.has(path)? {
            return Err(crate::Error::NotFound(format!("node {}", path)));
        }
        let prefix_len = descendant_prefix(path).len();
        Ok(self
            .descendants(path)?
            .into_iter()
            .map(|key| key[prefix_len..].to_string())
            .filter(|rest| !rest.contains('/'))
            .collect())
    }

    fn exists(&self, path: &str) -> Result<bool> {
        self.has(path)
    }
}
