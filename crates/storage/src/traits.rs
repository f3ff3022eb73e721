use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use curvesim_core::{CurveKey, MonthlySeries, OverrideId};

use crate::error::StorageError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverrideMeta {
    pub override_id: OverrideId,
    pub name: String,
    /// Year the curve was written through to, if the key matched any rows.
    pub year: Option<i32>,
    /// Milliseconds since Unix epoch.
    pub created_at: i64,
    pub updated_at: i64,
}

/// Operator-entered adjusted curve for one key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverrideRecord {
    pub key: CurveKey,
    pub curve: MonthlySeries,
    pub meta: OverrideMeta,
}

impl OverrideRecord {
    pub fn new(
        key: CurveKey,
        curve: MonthlySeries,
        name: impl Into<String>,
        year: Option<i32>,
        now_ms: i64,
    ) -> Self {
        Self {
            key,
            curve,
            meta: OverrideMeta {
                override_id: OverrideId::new(),
                name: name.into(),
                year,
                created_at: now_ms,
                updated_at: now_ms,
            },
        }
    }

    /// Same key, curve, name and year; ids and timestamps are not compared.
    pub fn same_content(&self, curve: &MonthlySeries, name: &str, year: Option<i32>) -> bool {
        self.curve == *curve && self.meta.name == name && self.meta.year == year
    }
}

/// Persistence for adjustment overrides, keyed by [`CurveKey`].
pub trait CurveStore {
    fn get(&self, key: &CurveKey) -> Result<Option<OverrideRecord>, StorageError>;

    /// Insert or replace the record for `record.key`.
    fn put(&mut self, record: &OverrideRecord) -> Result<(), StorageError>;

    fn exists(&self, key: &CurveKey) -> Result<bool, StorageError> {
        Ok(self.get(key)?.is_some())
    }

    fn list(&self) -> Result<BTreeMap<CurveKey, OverrideMeta>, StorageError> {
        Ok(self
            .records()?
            .into_iter()
            .map(|r| (r.key, r.meta))
            .collect())
    }

    /// All records ordered by key.
    fn records(&self) -> Result<Vec<OverrideRecord>, StorageError>;

    /// Returns whether a record was removed.
    fn remove(&mut self, key: &CurveKey) -> Result<bool, StorageError>;

    /// Removes every record, returning how many there were.
    fn clear(&mut self) -> Result<usize, StorageError>;

    fn count(&self) -> Result<usize, StorageError> {
        Ok(self.records()?.len())
    }
}
