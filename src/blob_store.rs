//! Encrypted key-value persistence contract (§6, C3).
//!
//! `BlobStore` is an external collaborator: the engine treats every
//! payload as opaque bytes and assumes encryption-at-rest is handled by
//! the implementation. [`InMemoryBlobStore`] is a reference fake for
//! tests and for callers that have not wired up a real backend yet.

use std::collections::HashMap;
use std::sync::RwLock;

/// Key-value persistence with encryption-at-rest assumed by the caller.
pub trait BlobStore: Send + Sync {
    /// Store `bytes` under `key`, replacing any existing value.
    ///
    /// # Errors
    /// Returns a human-readable failure description on I/O or encryption
    /// errors; the engine wraps this in [`crate::error::StoreError::StoreBackend`].
    fn put(&self, key: &str, bytes: Vec<u8>) -> Result<(), String>;

    /// Fetch the bytes stored under `key`, or `None` if absent.
    ///
    /// # Errors
    /// Returns a human-readable failure description on I/O or decryption
    /// errors.
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, String>;

    /// Remove the value stored under `key`, if any.
    ///
    /// # Errors
    /// Returns a human-readable failure description on I/O errors.
    fn delete(&self, key: &str) -> Result<(), String>;

    /// Whether `key` currently has a stored value.
    ///
    /// # Errors
    /// Returns a human-readable failure description on I/O errors.
    fn has(&self, key: &str) -> Result<bool, String>;
}

/// In-memory reference [`BlobStore`] implementation. Never fails; intended
/// for tests and as a starting point before a real encrypted backend is
/// wired in.
#[derive(Debug, Default)]
pub struct InMemoryBlobStore {
    data: RwLock<HashMap<String, Vec<u8>>>,
}

impl InMemoryBlobStore {
    /// Construct an empty in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl BlobStore for InMemoryBlobStore {
    fn put(&self, key: &str, bytes: Vec<u8>) -> Result<(), String> {
        self.data.write().unwrap().insert(key.to_string(), bytes);
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, String> {
        Ok(self.data.read().unwrap().get(key).cloned())
    }

    fn delete(&self, key: &str) -> Result<(), String> {
        self.data.write().unwrap().remove(key);
        Ok(())
    }

    fn has(&self, key: &str) -> Result<bool, String> {
        Ok(self.data.read().unwrap().contains_key(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_then_get_roundtrips() {
        let store = InMemoryBlobStore::new();
        store.put("k", vec![1, 2, 3]).unwrap();
        assert_eq!(store.get("k").unwrap(), Some(vec![1, 2, 3]));
    }

    #[test]
    fn missing_key_returns_none() {
        let store = InMemoryBlobStore::new();
        assert_eq!(store.get("missing").unwrap(), None);
        assert!(!store.has("missing").unwrap());
    }

    #[test]
    fn delete_removes_key() {
        let store = InMemoryBlobStore::new();
        store.put("k", vec![9]).unwrap();
        store.delete("k").unwrap();
        assert!(!store.has("k").unwrap());
    }
}
