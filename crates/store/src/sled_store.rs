use crate::{KvStore, StoreError, StoreResult};
use std::path::Path;

fn backend(e: sled::Error) -> StoreError {
    StoreError::Backend(e.to_string())
}

/// Durable store on a single sled tree.
#[derive(Clone)]
pub struct SledStore {
    tree: sled::Tree,
}

impl SledStore {
    pub fn open<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
        let db = sled::open(path.as_ref()).map_err(backend)?;
        tracing::debug!(path = %path.as_ref().display(), "settlement store opened");
        Self::from_db(&db)
    }

    /// Throwaway database, removed on drop.
    pub fn temporary() -> StoreResult<Self> {
        let db = sled::Config::new()
            .temporary(true)
            .open()
            .map_err(backend)?;
        Self::from_db(&db)
    }

    fn from_db(db: &sled::Db) -> StoreResult<Self> {
        let tree = db.open_tree("settlement").map_err(backend)?;
        Ok(Self { tree })
    }

    pub fn flush(&self) -> StoreResult<()> {
        self.tree.flush().map_err(backend)?;
        Ok(())
    }
}

impl KvStore for SledStore {
    fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        Ok(self
            .tree
            .get(key.as_bytes())
            .map_err(backend)?
            .map(|v| v.to_vec()))
    }

    fn put(&self, key: &str, value: &[u8]) -> StoreResult<()> {
        self.tree.insert(key.as_bytes(), value).map_err(backend)?;
        Ok(())
    }

    fn list_by_prefix(&self, prefix: &str) -> StoreResult<Vec<(String, Vec<u8>)>> {
        let mut out = Vec::new();
        for item in self.tree.scan_prefix(prefix.as_bytes()) {
            let (k, v) = item.map_err(backend)?;
            let key = String::from_utf8_lossy(&k).into_owned();
            out.push((key, v.to_vec()));
        }
        Ok(out)
    }

    fn remove(&self, key: &str) -> StoreResult<bool> {
        Ok(self.tree.remove(key.as_bytes()).map_err(backend)?.is_some())
    }
}
