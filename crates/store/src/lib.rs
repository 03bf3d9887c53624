//! Key-value persistence for receipts, ledger entries and the recipient
//! directory.
//!
//! Keys are `/`-separated strings (`receipt/<tx>`, `ledger/<party>/<tx>`),
//! values are JSON documents. Writes are at-least-once; callers layer their
//! own idempotency on top.

mod memory;
mod sled_store;

pub use memory::MemoryStore;
pub use sled_store::SledStore;

use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage backend failure: {0}")]
    Backend(String),
    #[error("unusable key segment {0:?}")]
    InvalidKey(String),
    #[error("failed to encode or decode {key}: {source}")]
    Codec {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

pub type StoreResult<T> = Result<T, StoreError>;

pub trait KvStore: Send + Sync {
    fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>>;

    fn put(&self, key: &str, value: &[u8]) -> StoreResult<()>;

    /// All entries whose key starts with `prefix`, in key order.
    fn list_by_prefix(&self, prefix: &str) -> StoreResult<Vec<(String, Vec<u8>)>>;

    /// Returns whether the key existed.
    fn remove(&self, key: &str) -> StoreResult<bool>;
}

/// One component of a `/`-separated key. Empty segments and segments that
/// contain `/` would alias other keys and are refused.
pub fn key_segment(segment: &str) -> StoreResult<&str> {
    if segment.is_empty() || segment.contains('/') {
        return Err(StoreError::InvalidKey(segment.to_string()));
    }
    Ok(segment)
}

pub fn get_json<T: DeserializeOwned>(store: &dyn KvStore, key: &str) -> StoreResult<Option<T>> {
    match store.get(key)? {
        Some(bytes) => serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|source| StoreError::Codec {
                key: key.to_string(),
                source,
            }),
        None => Ok(None),
    }
}

pub fn put_json<T: Serialize>(store: &dyn KvStore, key: &str, value: &T) -> StoreResult<()> {
    let bytes = serde_json::to_vec(value).map_err(|source| StoreError::Codec {
        key: key.to_string(),
        source,
    })?;
    store.put(key, &bytes)
}

pub fn list_json<T: DeserializeOwned>(store: &dyn KvStore, prefix: &str) -> StoreResult<Vec<T>> {
    store
        .list_by_prefix(prefix)?
        .into_iter()
        .map(|(key, bytes)| {
            serde_json::from_slice(&bytes).map_err(|source| StoreError::Codec { key, source })
        })
        .collect()
}
