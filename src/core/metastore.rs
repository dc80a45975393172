// src/core/metastore.rs

//! The byte-level KV interface backing topology persistence, plus an
//! in-memory implementation for embedding and tests.

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::ops::Bound;

use crate::core::MetaError;

/// The persistent KV store for topology snapshots. The core is agnostic to
/// the actual engine; `write` must apply its puts and deletes atomically.
pub trait MetaStore: Send + Sync {
    fn write(
        &self,
        puts: Vec<(Vec<u8>, Vec<u8>)>,
        deletes: Vec<Vec<u8>>,
    ) -> Result<(), MetaError>;

    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, MetaError>;

    fn put(&self, key: Vec<u8>, value: Vec<u8>) -> Result<(), MetaError> {
        self.write(vec![(key, value)], Vec::new())
    }

    fn put_batch(&self, entries: Vec<(Vec<u8>, Vec<u8>)>) -> Result<(), MetaError> {
        self.write(entries, Vec::new())
    }

    fn delete(&self, keys: Vec<Vec<u8>>) -> Result<(), MetaError> {
        self.write(Vec::new(), keys)
    }
}

/// A `MetaStore` over a plain ordered map. Good enough for tests and for
/// single-process deployments that snapshot elsewhere.
#[derive(Debug, Default)]
pub struct MemoryMetaStore {
    map: Mutex<BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl MemoryMetaStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.map.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.lock().is_empty()
    }

    pub fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.map.lock().get(key).cloned()
    }
}

impl MetaStore for MemoryMetaStore {
    fn write(
        &self,
        puts: Vec<(Vec<u8>, Vec<u8>)>,
        deletes: Vec<Vec<u8>>,
    ) -> Result<(), MetaError> {
        let mut map = self.map.lock();
        for (key, value) in puts {
            map.insert(key, value);
        }
        for key in deletes {
            map.remove(&key);
        }
        Ok(())
    }

    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, MetaError> {
        let map = self.map.lock();
        let range = map.range::<[u8], _>((Bound::Included(prefix), Bound::Unbounded));
        Ok(range
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }
}
