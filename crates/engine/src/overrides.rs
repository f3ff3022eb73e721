//! Override persistence with write-through into the row snapshot.
//!
//! The store is always written first: if persistence fails the rows are left
//! untouched and the caller can retry.

use serde::{Deserialize, Serialize};
use tracing::debug;

use curvesim_core::{CurveKey, EngineConfig, MonthlySeries, clock::physical_now};
use curvesim_storage::{CurveStore, OverrideRecord};

use crate::aggregate::key_year;
use crate::dataset::RowSet;
use crate::error::EngineError;

/// Outcome of [`set_override`].
#[derive(Debug, Clone, PartialEq)]
pub struct SetAck {
    pub record: OverrideRecord,
    /// Adjusted cells rewritten in the row snapshot; 0 when the key matches no rows.
    pub rows_updated: usize,
    /// `false` when the stored record already had this curve and name.
    pub changed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClearAck {
    pub removed: bool,
    pub rows_updated: usize,
}

/// Export document: every stored record, ordered by key.
#[derive(Debug, Serialize, Deserialize)]
struct OverrideExport {
    overrides: Vec<OverrideRecord>,
}

pub fn set_override<S: CurveStore>(
    store: &mut S,
    rows: &mut RowSet,
    key: &CurveKey,
    curve: MonthlySeries,
    name: &str,
    config: &EngineConfig,
) -> Result<SetAck, EngineError> {
    let year = key_year(rows.rows(), key, config);
    let existing = store.get(key)?;

    let (record, changed) = match existing {
        Some(record) if record.same_content(&curve, name, year) => (record, false),
        Some(mut record) => {
            record.key = key.clone();
            record.curve = curve;
            record.meta.name = name.to_string();
            record.meta.year = year;
            record.meta.updated_at = physical_now()?;
            (record, true)
        }
        None => {
            let record = OverrideRecord::new(key.clone(), curve, name, year, physical_now()?);
            (record, true)
        }
    };

    if changed {
        store.put(&record)?;
    }
    let rows_updated = match year {
        Some(year) => rows.write_through(key, year, &record.curve, config),
        None => 0,
    };
    debug!(key = %key, changed, rows_updated, "override stored");

    Ok(SetAck {
        record,
        rows_updated,
        changed,
    })
}

/// Removes the stored override and puts the key's adjusted cells back to analytic.
pub fn clear_override<S: CurveStore>(
    store: &mut S,
    rows: &mut RowSet,
    key: &CurveKey,
    config: &EngineConfig,
) -> Result<ClearAck, EngineError> {
    let removed = store.remove(key)?;
    let rows_updated = match key_year(rows.rows(), key, config) {
        Some(year) => rows.reset_adjusted(key, year, config),
        None => 0,
    };
    Ok(ClearAck {
        removed,
        rows_updated,
    })
}

/// Stores an imported record as is, keeping its id and timestamps. The year
/// is recomputed against `rows`; nothing is written through yet.
pub fn restore_record<S: CurveStore>(
    store: &mut S,
    rows: &RowSet,
    mut record: OverrideRecord,
    config: &EngineConfig,
) -> Result<OverrideRecord, EngineError> {
    record.meta.year = key_year(rows.rows(), &record.key, config);
    store.put(&record)?;
    Ok(record)
}

/// Writes a record's curve into the rows of its recorded year.
pub fn write_record(rows: &mut RowSet, record: &OverrideRecord, config: &EngineConfig) -> usize {
    match record.meta.year {
        Some(year) => rows.write_through(&record.key, year, &record.curve, config),
        None => 0,
    }
}

/// Writes every stored override through a freshly loaded snapshot, each into
/// the latest year its key has in these rows. Records are applied in key
/// order. Returns the number of cells written.
pub fn apply_stored<S: CurveStore>(
    store: &S,
    rows: &mut RowSet,
    config: &EngineConfig,
) -> Result<usize, EngineError> {
    let mut written = 0;
    for record in store.records()? {
        if let Some(year) = key_year(rows.rows(), &record.key, config) {
            written += rows.write_through(&record.key, year, &record.curve, config);
        }
    }
    Ok(written)
}

pub fn export_json<S: CurveStore>(store: &S) -> Result<String, EngineError> {
    let doc = OverrideExport {
        overrides: store.records()?,
    };
    serde_json::to_string_pretty(&doc).map_err(|e| EngineError::Serialization(e.to_string()))
}

/// Parses an export document. Nothing is written if the document is invalid.
pub fn parse_export(text: &str) -> Result<Vec<OverrideRecord>, EngineError> {
    let doc: OverrideExport =
        serde_json::from_str(text).map_err(|e| EngineError::Serialization(e.to_string()))?;
    Ok(doc.overrides)
}

#[cfg(test)]
mod tests {
    use super::*;
    use curvesim_core::RawRow;
    use curvesim_storage::MemoryCurveStore;

    fn rows() -> RowSet {
        RowSet::new(vec![
            RawRow::new("a", "C", "P", 1, 2024).with_analytic(10.0),
            RawRow::new("a", "C", "P", 2, 2024).with_analytic(20.0),
        ])
    }

    #[test]
    fn set_writes_record_and_rows() -> Result<(), EngineError> {
        let mut store = MemoryCurveStore::new();
        let mut rows = rows();
        let key = CurveKey::all_clients("C", "P");
        let curve = MonthlySeries::from_values([11.0, 22.0]);

        let ack = set_override(&mut store, &mut rows, &key, curve, "v1", &EngineConfig::default())?;
        assert!(ack.changed);
        assert_eq!(ack.rows_updated, 2);
        assert_eq!(ack.record.meta.year, Some(2024));
        assert_eq!(rows.rows()[1].adjusted, Some(22.0));
        assert_eq!(store.get(&key)?.map(|r| r.curve), Some(curve));
        Ok(())
    }

    #[test]
    fn repeated_set_is_a_no_op() -> Result<(), EngineError> {
        let mut store = MemoryCurveStore::new();
        let mut rows = rows();
        let key = CurveKey::all_clients("C", "P");
        let curve = MonthlySeries::from_values([11.0, 22.0]);
        let config = EngineConfig::default();

        let first = set_override(&mut store, &mut rows, &key, curve, "v1", &config)?;
        let hash = rows.snapshot_hash();
        let second = set_override(&mut store, &mut rows, &key, curve, "v1", &config)?;

        assert!(!second.changed);
        assert_eq!(second.record, first.record);
        assert_eq!(store.get(&key)?, Some(first.record));
        assert_eq!(rows.snapshot_hash(), hash);
        Ok(())
    }

    #[test]
    fn update_keeps_identity() -> Result<(), EngineError> {
        let mut store = MemoryCurveStore::new();
        let mut rows = rows();
        let key = CurveKey::all_clients("C", "P");
        let config = EngineConfig::default();

        let first = set_override(&mut store, &mut rows, &key, MonthlySeries::from_values([1.0]), "v1", &config)?;
        let second = set_override(&mut store, &mut rows, &key, MonthlySeries::from_values([2.0]), "v2", &config)?;

        assert!(second.changed);
        assert_eq!(second.record.meta.override_id, first.record.meta.override_id);
        assert_eq!(second.record.meta.created_at, first.record.meta.created_at);
        assert!(second.record.meta.updated_at >= first.record.meta.updated_at);
        assert_eq!(rows.rows()[0].adjusted, Some(2.0));
        assert_eq!(store.count()?, 1);
        Ok(())
    }

    #[test]
    fn unmatched_key_is_stored_without_rows() -> Result<(), EngineError> {
        let mut store = MemoryCurveStore::new();
        let mut rows = rows();
        let key = CurveKey::all_clients("X", "Y");
        let ack = set_override(&mut store, &mut rows, &key, MonthlySeries::zeros(), "x", &EngineConfig::default())?;
        assert_eq!(ack.rows_updated, 0);
        assert_eq!(ack.record.meta.year, None);
        assert!(store.exists(&key)?);
        Ok(())
    }

    #[test]
    fn clear_resets_rows_to_analytic() -> Result<(), EngineError> {
        let mut store = MemoryCurveStore::new();
        let mut rows = rows();
        let key = CurveKey::all_clients("C", "P");
        let config = EngineConfig::default();
        set_override(&mut store, &mut rows, &key, MonthlySeries::from_values([99.0]), "v", &config)?;

        let ack = clear_override(&mut store, &mut rows, &key, &config)?;
        assert!(ack.removed);
        assert_eq!(ack.rows_updated, 2);
        assert_eq!(rows.rows()[0].adjusted, Some(10.0));
        assert!(!store.exists(&key)?);

        assert!(!clear_override(&mut store, &mut rows, &key, &config)?.removed);
        Ok(())
    }

    #[test]
    fn export_then_restore_into_fresh_store() -> Result<(), EngineError> {
        let mut store = MemoryCurveStore::new();
        let mut rows = rows();
        let key = CurveKey::all_clients("C", "P");
        let config = EngineConfig::default();
        let ack = set_override(&mut store, &mut rows, &key, MonthlySeries::from_values([5.0]), "v", &config)?;

        let json = export_json(&store)?;
        let records = parse_export(&json)?;
        assert_eq!(records, vec![ack.record.clone()]);

        let mut other = MemoryCurveStore::new();
        let mut fresh = self::rows();
        for record in records {
            let stored = restore_record(&mut other, &fresh, record, &config)?;
            assert_eq!(write_record(&mut fresh, &stored, &config), 2);
        }
        assert_eq!(other.get(&key)?, Some(ack.record));
        assert_eq!(fresh.rows()[0].adjusted, Some(5.0));
        assert!(parse_export("[1, 2]").is_err());
        Ok(())
    }

    #[test]
    fn stored_overrides_apply_to_new_rows() -> Result<(), EngineError> {
        let mut store = MemoryCurveStore::new();
        let config = EngineConfig::default();
        let key = CurveKey::all_clients("C", "P");
        set_override(&mut store, &mut rows(), &key, MonthlySeries::from_values([7.0, 8.0]), "v", &config)?;
        set_override(&mut store, &mut rows(), &CurveKey::all_clients("X", "Y"), MonthlySeries::zeros(), "x", &config)?;

        let mut fresh = rows();
        assert_eq!(apply_stored(&store, &mut fresh, &config)?, 2);
        assert_eq!(fresh.rows()[0].adjusted, Some(7.0));
        assert_eq!(fresh.rows()[1].adjusted, Some(8.0));
        Ok(())
    }
}
