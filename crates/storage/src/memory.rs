use std::collections::BTreeMap;

use curvesim_core::CurveKey;

use crate::error::StorageError;
use crate::traits::{CurveStore, OverrideRecord};

/// Process-local store; contents are lost with the session.
#[derive(Debug, Default, Clone)]
pub struct MemoryCurveStore {
    records: BTreeMap<CurveKey, OverrideRecord>,
}

impl MemoryCurveStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CurveStore for MemoryCurveStore {
    fn get(&self, key: &CurveKey) -> Result<Option<OverrideRecord>, StorageError> {
        Ok(self.records.get(key).cloned())
    }

    fn put(&mut self, record: &OverrideRecord) -> Result<(), StorageError> {
        self.records.insert(record.key.clone(), record.clone());
        Ok(())
    }

    fn exists(&self, key: &CurveKey) -> Result<bool, StorageError> {
        Ok(self.records.contains_key(key))
    }

    fn records(&self) -> Result<Vec<OverrideRecord>, StorageError> {
        Ok(self.records.values().cloned().collect())
    }

    fn remove(&mut self, key: &CurveKey) -> Result<bool, StorageError> {
        Ok(self.records.remove(key).is_some())
    }

    fn clear(&mut self) -> Result<usize, StorageError> {
        let n = self.records.len();
        self.records.clear();
        Ok(n)
    }

    fn count(&self) -> Result<usize, StorageError> {
        Ok(self.records.len())
    }
}
