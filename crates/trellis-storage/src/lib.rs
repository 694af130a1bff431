//! # trellis-storage: Namespaced key/value persistence
//!
//! Persisted state lives in a hierarchical namespaced key/value store.
//! Top-level contexts mirror the engine's ownership: `fabrics`,
//! `nodes/<nodeId>`, `sessions`, `events`, `ota`. Values are TLV blobs
//! whose schema matches the in-memory type of the owning component.
//!
//! Backends are platform collaborators behind [`StorageBackend`]; the
//! crate ships [`MemoryStorage`] for tests and commissioning dry-runs.
//! Each context records a schema version so newer writers stay readable
//! by forward-compatible readers.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use bytes::Bytes;
use trellis_tlv::{TlvError, TlvValue};

/// Errors surfaced by storage operations.
#[derive(thiserror::Error, Debug)]
pub enum StorageError {
    #[error("storage backend failure on '{key}': {reason}")]
    Backend { key: String, reason: String },

    #[error("corrupt value at '{key}': {source}")]
    Corrupt {
        key: String,
        #[source]
        source: TlvError,
    },
}

/// A flat key/value backend.
///
/// Keys are `/`-joined context paths; values are opaque byte blobs.
/// Implementations are platform collaborators (filesystem, NVS, ...).
pub trait StorageBackend {
    fn get(&self, key: &str) -> Result<Option<Bytes>, StorageError>;
    fn set(&self, key: &str, value: Bytes) -> Result<(), StorageError>;
    fn remove(&self, key: &str) -> Result<(), StorageError>;
    /// Keys below the given prefix, in lexicographic order.
    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StorageError>;
}

/// In-memory backend.
#[derive(Debug, Default, Clone)]
pub struct MemoryStorage {
    entries: Rc<RefCell<BTreeMap<String, Bytes>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys, across all contexts.
    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }
}

impl StorageBackend for MemoryStorage {
    fn get(&self, key: &str) -> Result<Option<Bytes>, StorageError> {
        Ok(self.entries.borrow().get(key).cloned())
    }

    fn set(&self, key: &str, value: Bytes) -> Result<(), StorageError> {
        self.entries.borrow_mut().insert(key.to_string(), value);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.entries.borrow_mut().remove(key);
        Ok(())
    }

    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        Ok(self
            .entries
            .borrow()
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect())
    }
}

/// Reserved key carrying a context's schema version.
const VERSION_KEY: &str = "__version";

/// A view of the backend under one context path.
#[derive(Clone)]
pub struct StorageContext {
    backend: Rc<dyn StorageBackend>,
    path: String,
}

impl StorageContext {
    /// Opens the root of a backend.
    pub fn root(backend: Rc<dyn StorageBackend>) -> Self {
        Self {
            backend,
            path: String::new(),
        }
    }

    /// Descends into a child context.
    pub fn child(&self, segment: &str) -> Self {
        debug_assert!(
            !segment.contains('/'),
            "context segments must be single path components"
        );
        let path = if self.path.is_empty() {
            segment.to_string()
        } else {
            format!("{}/{segment}", self.path)
        };
        Self {
            backend: Rc::clone(&self.backend),
            path,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    fn full_key(&self, key: &str) -> String {
        if self.path.is_empty() {
            key.to_string()
        } else {
            format!("{}/{key}", self.path)
        }
    }

    /// Reads a raw blob.
    pub fn get_raw(&self, key: &str) -> Result<Option<Bytes>, StorageError> {
        self.backend.get(&self.full_key(key))
    }

    /// Writes a raw blob.
    pub fn set_raw(&self, key: &str, value: Bytes) -> Result<(), StorageError> {
        self.backend.set(&self.full_key(key), value)
    }

    /// Reads and decodes a TLV value.
    pub fn get(&self, key: &str) -> Result<Option<TlvValue>, StorageError> {
        let full = self.full_key(key);
        match self.backend.get(&full)? {
            None => Ok(None),
            Some(bytes) => trellis_tlv::decode(&bytes)
                .map(Some)
                .map_err(|source| StorageError::Corrupt { key: full, source }),
        }
    }

    /// Encodes and writes a TLV value.
    pub fn set(&self, key: &str, value: &TlvValue) -> Result<(), StorageError> {
        self.backend
            .set(&self.full_key(key), trellis_tlv::encode(value))
    }

    pub fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.backend.remove(&self.full_key(key))
    }

    /// Keys directly stored in this context (relative names).
    pub fn keys(&self) -> Result<Vec<String>, StorageError> {
        let prefix = if self.path.is_empty() {
            String::new()
        } else {
            format!("{}/", self.path)
        };
        Ok(self
            .backend
            .keys_with_prefix(&prefix)?
            .into_iter()
            .map(|k| k[prefix.len()..].to_string())
            .filter(|k| k != VERSION_KEY)
            .collect())
    }

    /// Removes every key in this context and below.
    pub fn clear(&self) -> Result<(), StorageError> {
        let prefix = if self.path.is_empty() {
            String::new()
        } else {
            format!("{}/", self.path)
        };
        for key in self.backend.keys_with_prefix(&prefix)? {
            self.backend.remove(&key)?;
        }
        Ok(())
    }

    /// The context's schema version; 1 when never written.
    pub fn version(&self) -> Result<u32, StorageError> {
        Ok(self
            .get(VERSION_KEY)?
            .and_then(|v| v.as_u64())
            .map_or(1, |v| v as u32))
    }

    pub fn set_version(&self, version: u32) -> Result<(), StorageError> {
        self.set(VERSION_KEY, &TlvValue::UnsignedInt(u64::from(version)))
    }
}

impl std::fmt::Debug for StorageContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageContext")
            .field("path", &self.path)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn root() -> StorageContext {
        StorageContext::root(Rc::new(MemoryStorage::new()))
    }

    #[test]
    fn contexts_namespace_keys() {
        let root = root();
        let fabrics = root.child("fabrics");
        let nodes = root.child("nodes").child("1");

        fabrics.set("1", &TlvValue::utf8("home")).unwrap();
        nodes.set("label", &TlvValue::utf8("lamp")).unwrap();

        assert_eq!(fabrics.get("1").unwrap(), Some(TlvValue::utf8("home")));
        assert_eq!(nodes.get("label").unwrap(), Some(TlvValue::utf8("lamp")));
        assert_eq!(fabrics.get("label").unwrap(), None);
        assert_eq!(fabrics.path(), "fabrics");
        assert_eq!(nodes.path(), "nodes/1");
    }

    #[test]
    fn keys_are_relative_and_exclude_version() {
        let ctx = root().child("sessions");
        ctx.set("a", &TlvValue::UnsignedInt(1)).unwrap();
        ctx.set("b", &TlvValue::UnsignedInt(2)).unwrap();
        ctx.set_version(3).unwrap();
        assert_eq!(ctx.keys().unwrap(), vec!["a", "b"]);
    }

    #[test]
    fn clear_removes_whole_subtree() {
        let root = root();
        let ota = root.child("ota");
        ota.set("image", &TlvValue::bytes(vec![1, 2, 3])).unwrap();
        ota.child("meta").set("size", &TlvValue::UnsignedInt(3)).unwrap();
        root.child("fabrics").set("1", &TlvValue::Null).unwrap();

        ota.clear().unwrap();
        assert_eq!(ota.get("image").unwrap(), None);
        assert_eq!(ota.child("meta").get("size").unwrap(), None);
        assert!(root.child("fabrics").get("1").unwrap().is_some());
    }

    #[test]
    fn version_defaults_to_one() {
        let ctx = root().child("events");
        assert_eq!(ctx.version().unwrap(), 1);
        ctx.set_version(4).unwrap();
        assert_eq!(ctx.version().unwrap(), 4);
    }

    #[test]
    fn corrupt_value_is_reported_with_key() {
        let backend = Rc::new(MemoryStorage::new());
        backend.set("fabrics/1", Bytes::from_static(&[0x15])).unwrap();
        let ctx = StorageContext::root(backend).child("fabrics");
        let err = ctx.get("1").unwrap_err();
        assert!(matches!(err, StorageError::Corrupt { .. }));
    }
}
