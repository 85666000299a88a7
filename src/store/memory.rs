//! In-process store backed by `dashmap`, used by the test suite and by
//! `--store memory` runs that skip the network store entirely.

use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::Mutex;

use super::{Store, StoreError, WriteOp};

#[derive(Default)]
pub struct MemoryStore {
    strings: DashMap<String, String>,
    sets: DashMap<String, HashSet<String>>,
    hashes: DashMap<String, DashMap<String, String>>,
    // Guards `apply_batch` so concurrent batches don't interleave.
    batch_lock: Mutex<()>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn apply_one(&self, op: WriteOp) {
        match op {
            WriteOp::Set { key, value } => {
                self.strings.insert(key, value);
            }
            WriteOp::Delete { key } => {
                self.strings.remove(&key);
                self.sets.remove(&key);
                self.hashes.remove(&key);
            }
            WriteOp::SetAdd { key, member } => {
                self.sets.entry(key).or_default().insert(member);
            }
            WriteOp::SetRemove { key, member } => {
                if let Some(mut set) = self.sets.get_mut(&key) {
                    set.remove(&member);
                }
            }
        }
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.strings.get(key).map(|v| v.value().clone()))
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.strings.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.strings.remove(key);
        self.sets.remove(key);
        self.hashes.remove(key);
        Ok(())
    }

    async fn set_add(&self, key: &str, member: &str) -> Result<(), StoreError> {
        self.sets
            .entry(key.to_string())
            .or_default()
            .insert(member.to_string());
        Ok(())
    }

    async fn set_remove(&self, key: &str, member: &str) -> Result<(), StoreError> {
        if let Some(mut set) = self.sets.get_mut(key) {
            set.remove(member);
        }
        Ok(())
    }

    async fn set_members(&self, key: &str) -> Result<Vec<String>, StoreError> {
        Ok(self
            .sets
            .get(key)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn hash_get(&self, key: &str, field: &str) -> Result<Option<String>, StoreError> {
        Ok(self
            .hashes
            .get(key)
            .and_then(|h| h.get(field).map(|v| v.value().clone())))
    }

    async fn hash_set(&self, key: &str, field: &str, value: &str) -> Result<(), StoreError> {
        self.hashes
            .entry(key.to_string())
            .or_default()
            .insert(field.to_string(), value.to_string());
        Ok(())
    }

    async fn hash_get_all(&self, key: &str) -> Result<Vec<(String, String)>, StoreError> {
        Ok(self
            .hashes
            .get(key)
            .map(|h| h.iter().map(|kv| (kv.key().clone(), kv.value().clone())).collect())
            .unwrap_or_default())
    }

    async fn apply_batch(&self, ops: Vec<WriteOp>) -> Result<(), StoreError> {
        let _guard = self.batch_lock.lock().unwrap();
        for op in ops {
            self.apply_one(op);
        }
        Ok(())
    }
}
