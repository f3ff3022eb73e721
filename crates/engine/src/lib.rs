pub mod aggregate;
pub mod dataset;
pub mod delta;
pub mod error;
pub mod overrides;
pub mod sync;

pub use aggregate::{
    BaselineCurves, CategoryAggregate, DashboardMetrics, MetricSeries, ProductAggregate,
};
pub use dataset::RowSet;
pub use error::EngineError;
pub use overrides::{ClearAck, SetAck};
pub use sync::{ActiveCurve, PullResult, ResetScope, SyncCoordinator, SyncPhase};

use std::collections::BTreeMap;

use tracing::{debug, info};

use curvesim_core::{
    ClientFilter, CurveKey, EngineConfig, MaskedSeries, MonthlySeries, normalize_label,
};
use curvesim_storage::{CurveStore, OverrideMeta, OverrideRecord};

/// Category rollup as presented, with the active edit folded in.
#[derive(Debug, Clone, PartialEq)]
pub struct CategoryView {
    pub client: String,
    pub year: Option<i32>,
    pub categories: BTreeMap<String, CategoryAggregate>,
    /// Key whose edit is folded into `categories`, if any.
    pub folded: Option<CurveKey>,
    pub diff: MonthlySeries,
}

#[derive(Debug)]
struct RollupCache {
    hash: blake3::Hash,
    client: String,
    year: i32,
    rollup: BTreeMap<String, CategoryAggregate>,
}

/// One operator session: the row snapshot, the override store, the active
/// curve and the last category view.
pub struct Session<S: CurveStore> {
    config: EngineConfig,
    rows: RowSet,
    store: S,
    sync: SyncCoordinator,
    cache: Option<RollupCache>,
    view_client: Option<(String, Option<i32>)>,
    last_view: Option<CategoryView>,
}

impl<S: CurveStore> Session<S> {
    pub fn new(store: S, config: EngineConfig) -> Self {
        Self {
            config,
            rows: RowSet::default(),
            store,
            sync: SyncCoordinator::new(),
            cache: None,
            view_client: None,
            last_view: None,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn rows(&self) -> &RowSet {
        &self.rows
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    pub fn sync(&self) -> &SyncCoordinator {
        &self.sync
    }

    pub fn active(&self) -> Option<&ActiveCurve> {
        self.sync.active()
    }

    /// Replaces the row snapshot and writes every stored override through it.
    /// The active curve is dropped since its baseline may no longer exist.
    pub fn load_rows(&mut self, mut rows: RowSet) -> Result<(), EngineError> {
        let applied = overrides::apply_stored(&self.store, &mut rows, &self.config)?;
        info!(rows = rows.len(), applied, "rows loaded");
        self.rows = rows;
        self.cache = None;
        self.sync.clear()?;
        self.recompute();
        Ok(())
    }

    // ========================================================================
    // Aggregation
    // ========================================================================

    pub fn baseline_curves(&self, key: &CurveKey) -> BaselineCurves {
        aggregate::baseline_curves(self.rows.rows(), key, &self.config)
    }

    /// Realized series per year, masked according to the config.
    pub fn realized_by_year(&self, key: &CurveKey) -> BTreeMap<i32, MaskedSeries> {
        aggregate::realized_by_year(
            self.rows.rows(),
            key,
            &self.config,
            self.config.mask_trailing_zeros,
        )
    }

    /// Pure rollup without any active edit folded in.
    pub fn category_rollup(&mut self, client: &str, year: i32) -> BTreeMap<String, CategoryAggregate> {
        let hash = self.rows.snapshot_hash();
        let client_norm = normalize_label(client);
        if let Some(cache) = &self.cache {
            if cache.hash == hash && cache.client == client_norm && cache.year == year {
                debug!(client, year, "rollup cache hit");
                return cache.rollup.clone();
            }
        }
        let rollup = aggregate::category_rollup(self.rows.rows(), client, year, &self.config);
        self.cache = Some(RollupCache {
            hash,
            client: client_norm,
            year,
            rollup: rollup.clone(),
        });
        rollup
    }

    pub fn product_aggregate(&self, key: &CurveKey, year: i32) -> ProductAggregate {
        aggregate::product_aggregate(self.rows.rows(), key, year, &self.config)
    }

    pub fn product_adjusted(&self, key: &CurveKey, year: i32) -> Option<MonthlySeries> {
        aggregate::product_adjusted(self.rows.rows(), key, year, &self.config)
    }

    pub fn latest_year(&self, client: &str) -> Option<i32> {
        aggregate::latest_year(self.rows.rows(), client, &self.config)
    }

    pub fn dashboard_metrics(&self) -> Result<DashboardMetrics, EngineError> {
        Ok(aggregate::dataset_metrics(
            self.rows.rows(),
            &self.config,
            self.store.count()?,
        ))
    }

    // ========================================================================
    // Category view
    // ========================================================================

    /// Selects the client and year shown in the category view and returns it.
    /// `None` picks the latest year for that client.
    pub fn view(&mut self, client: &str, year: Option<i32>) -> &CategoryView {
        self.view_client = Some((client.to_string(), year));
        self.recompute();
        self.last_view.get_or_insert_with(|| CategoryView {
            client: client.to_string(),
            year,
            categories: BTreeMap::new(),
            folded: None,
            diff: MonthlySeries::zeros(),
        })
    }

    pub fn last_view(&self) -> Option<&CategoryView> {
        self.last_view.as_ref()
    }

    /// Rebuilds the category view from the current rows and active edit.
    /// Calling it again without changes yields the same view.
    pub fn recompute(&mut self) {
        let Some((client, requested)) = self.view_client.clone() else {
            return;
        };
        let year = requested.or_else(|| self.latest_year(&client));
        let mut categories = match year {
            Some(year) => self.category_rollup(&client, year),
            None => BTreeMap::new(),
        };

        let mut diff = MonthlySeries::zeros();
        let mut folded = None;
        if let (Some(active), Some(year)) = (self.sync.active(), year) {
            let applies = active.year == Some(year)
                && delta_applies(&active.key, &client, &self.config);
            if applies {
                let baseline = self.product_adjusted(&active.key, year).unwrap_or_default();
                let candidate = delta::compute_diff(&active.current(), &baseline);
                if delta::fold_delta(&mut categories, active.key.category(), candidate) {
                    diff = candidate;
                    folded = Some(active.key.clone());
                }
            }
        }
        debug!(client = %client, ?year, folded = folded.is_some(), "view recomputed");

        self.last_view = Some(CategoryView {
            client,
            year,
            categories,
            folded,
            diff,
        });
    }

    // ========================================================================
    // Editing
    // ========================================================================

    /// Makes `key` the active curve, loaded from its stored override or the
    /// analytic baseline. Uncommitted state of the previous key is discarded.
    pub fn open(&mut self, key: &CurveKey) -> Result<&ActiveCurve, EngineError> {
        let baseline = self.baseline_curves(key);
        let loaded = match self.store.get(key)? {
            Some(record) => record.curve,
            None => baseline.analytic,
        };
        self.sync.open(key.clone(), loaded, baseline.year)?;
        debug!(key = %key, year = ?baseline.year, "curve opened");
        self.recompute();
        self.sync.active().ok_or(EngineError::NoActiveCurve)
    }

    pub fn begin_edit(&mut self) -> Result<(), EngineError> {
        self.sync.begin_edit()
    }

    pub fn request_sync(&mut self) -> Result<u64, EngineError> {
        self.sync.request_sync()
    }

    pub fn pull_edit(
        &mut self,
        key: &CurveKey,
        values: &[f64],
        version: u64,
    ) -> Result<PullResult, EngineError> {
        let result = self.sync.pull_edit(key, values, version)?;
        if matches!(result, PullResult::Accepted { .. }) {
            self.recompute();
        }
        Ok(result)
    }

    /// Writes the active curve through the store. On failure the adopted
    /// curve is kept so the commit can be retried.
    pub fn commit(&mut self, name: &str) -> Result<SetAck, EngineError> {
        let active = self.sync.active().ok_or(EngineError::NoActiveCurve)?;
        let key = active.key.clone();
        let curve = active.current();

        let ack = overrides::set_override(
            &mut self.store,
            &mut self.rows,
            &key,
            curve,
            name,
            &self.config,
        )?;
        self.sync.mark_committed(curve)?;
        info!(key = %key, name, rows_updated = ack.rows_updated, changed = ack.changed, "curve committed");
        self.recompute();
        Ok(ack)
    }

    pub fn reset(&mut self, scope: ResetScope) -> Result<(), EngineError> {
        let key = self.sync.active_key().ok_or(EngineError::NoActiveCurve)?.clone();
        let mut rows_updated = 0;
        if scope == ResetScope::ClearPersisted {
            rows_updated =
                overrides::clear_override(&mut self.store, &mut self.rows, &key, &self.config)?
                    .rows_updated;
        }
        let baseline = self.baseline_curves(&key);
        self.sync.reset_to(baseline.analytic)?;
        info!(key = %key, scope = scope.as_str(), rows_updated, "curve reset");
        self.recompute();
        Ok(())
    }

    /// Curve the editing surface should display for `key`.
    pub fn current_adjusted_curve(&self, key: &CurveKey) -> Result<MonthlySeries, EngineError> {
        if let Some(active) = self.sync.active() {
            if active.key == *key {
                return Ok(active.current());
            }
        }
        Ok(match self.store.get(key)? {
            Some(record) => record.curve,
            None => self.baseline_curves(key).analytic,
        })
    }

    // ========================================================================
    // Overrides
    // ========================================================================

    /// Stores `curve` for `key` and writes it through the rows. If `key` is the
    /// active curve it becomes its committed value.
    pub fn set_override(
        &mut self,
        key: &CurveKey,
        curve: MonthlySeries,
        name: &str,
    ) -> Result<SetAck, EngineError> {
        let ack =
            overrides::set_override(&mut self.store, &mut self.rows, key, curve, name, &self.config)?;
        if self.sync.active_key() == Some(key) {
            self.sync.mark_committed(curve)?;
        }
        self.recompute();
        Ok(ack)
    }

    pub fn get_override(&self, key: &CurveKey) -> Result<Option<OverrideRecord>, EngineError> {
        Ok(self.store.get(key)?)
    }

    pub fn override_exists(&self, key: &CurveKey) -> Result<bool, EngineError> {
        Ok(self.store.exists(key)?)
    }

    pub fn list_overrides(&self) -> Result<BTreeMap<CurveKey, OverrideMeta>, EngineError> {
        Ok(self.store.list()?)
    }

    /// Removes the stored override of `key` and restores its rows to analytic.
    pub fn delete_override(&mut self, key: &CurveKey) -> Result<ClearAck, EngineError> {
        let ack = overrides::clear_override(&mut self.store, &mut self.rows, key, &self.config)?;
        if self.sync.active_key() == Some(key) {
            let baseline = self.baseline_curves(key);
            self.sync.reset_to(baseline.analytic)?;
        }
        info!(key = %key, removed = ack.removed, rows_updated = ack.rows_updated, "override deleted");
        self.recompute();
        Ok(ack)
    }

    pub fn export_overrides_json(&self) -> Result<String, EngineError> {
        overrides::export_json(&self.store)
    }

    /// Upserts every record of an export document, then writes each through.
    /// Returns how many records were imported.
    ///
    /// Not atomic: if the store fails part way, the records stored before the
    /// failure stay stored while the rows are left untouched. Importing the
    /// same document again completes it.
    pub fn import_overrides_json(&mut self, text: &str) -> Result<usize, EngineError> {
        let records = overrides::parse_export(text)?;
        let mut stored = Vec::with_capacity(records.len());
        for record in records {
            let record =
                overrides::restore_record(&mut self.store, &self.rows, record, &self.config)?;
            stored.push(record);
        }

        let count = stored.len();
        let active_key = self.sync.active_key().cloned();
        let mut reopen = None;
        for record in &stored {
            if active_key.as_ref() == Some(&record.key) {
                reopen = Some(record.key.clone());
            }
            overrides::write_record(&mut self.rows, record, &self.config);
        }
        if let Some(key) = reopen {
            self.open(&key)?;
        }
        info!(count, "overrides imported");
        self.recompute();
        Ok(count)
    }

    /// Full-session reset: active curve, stored overrides and rows.
    pub fn reset_all(&mut self) -> Result<(), EngineError> {
        self.sync.clear()?;
        let removed = self.store.clear()?;
        self.rows = RowSet::default();
        self.cache = None;
        self.view_client = None;
        self.last_view = None;
        info!(removed, "session reset");
        Ok(())
    }
}

/// The active edit is folded into a view that covers every client, or into
/// a view of exactly the key's client.
fn delta_applies(key: &CurveKey, view_client: &str, config: &EngineConfig) -> bool {
    let view = ClientFilter::parse(view_client, &config.wildcard_client);
    view == ClientFilter::All || view == key.client_filter(&config.wildcard_client)
}

#[cfg(test)]
mod tests {
    use super::*;
    use curvesim_core::RawRow;
    use curvesim_storage::MemoryCurveStore;

    fn session() -> Result<Session<MemoryCurveStore>, EngineError> {
        let mut session = Session::new(MemoryCurveStore::new(), EngineConfig::default());
        session.load_rows(RowSet::new(vec![
            RawRow::new("a", "C", "P1", 1, 2024).with_analytic(100.0),
            RawRow::new("a", "C", "P2", 1, 2024).with_analytic(50.0),
        ]))?;
        Ok(session)
    }

    fn edit(first: f64) -> Vec<f64> {
        let mut values = vec![0.0; 12];
        values[0] = first;
        values
    }

    #[test]
    fn view_folds_active_edit() -> Result<(), EngineError> {
        let mut s = session()?;
        let key = CurveKey::all_clients("C", "P1");
        s.open(&key)?;
        s.begin_edit()?;
        let v = s.request_sync()?;
        s.pull_edit(&key, &edit(130.0), v)?;

        let view = s.view("Todos", None);
        assert_eq!(view.year, Some(2024));
        assert_eq!(view.folded.as_ref(), Some(&key));
        assert_eq!(view.diff[0], 30.0);
        assert_eq!(view.categories["C"].current.adjusted[0], 180.0);
        Ok(())
    }

    #[test]
    fn commit_converges_delta_to_zero() -> Result<(), EngineError> {
        let mut s = session()?;
        let key = CurveKey::all_clients("C", "P1");
        s.view("Todos", Some(2024));
        s.open(&key)?;
        let v = s.request_sync()?;
        s.pull_edit(&key, &edit(130.0), v)?;
        s.commit("plano")?;

        let view = s.last_view().ok_or(EngineError::NoActiveCurve)?;
        assert!(view.diff.is_zero());
        assert_eq!(view.categories["C"].current.adjusted[0], 180.0);
        assert_eq!(s.active().map(|a| a.phase), Some(SyncPhase::Committed));
        Ok(())
    }

    #[test]
    fn rollup_cache_tracks_row_changes() -> Result<(), EngineError> {
        let mut s = session()?;
        let before = s.category_rollup("Todos", 2024);
        assert_eq!(s.category_rollup("Todos", 2024), before);

        s.set_override(&CurveKey::all_clients("C", "P2"), MonthlySeries::from_values([70.0]), "x")?;
        let after = s.category_rollup("Todos", 2024);
        assert_eq!(after["C"].current.adjusted[0], 170.0);
        Ok(())
    }

    #[test]
    fn reloading_rows_reapplies_stored_overrides() -> Result<(), EngineError> {
        let mut s = session()?;
        let key = CurveKey::all_clients("C", "P1");
        s.set_override(&key, MonthlySeries::from_values([130.0]), "x")?;
        s.load_rows(RowSet::new(vec![
            RawRow::new("a", "C", "P1", 1, 2024).with_analytic(100.0),
            RawRow::new("a", "C", "P2", 1, 2024).with_analytic(50.0),
        ]))?;

        assert_eq!(s.product_adjusted(&key, 2024), Some(MonthlySeries::from_values([130.0])));
        assert_eq!(s.category_rollup("Todos", 2024)["C"].current.adjusted[0], 180.0);
        assert_eq!(s.dashboard_metrics()?.total_adjusted, 180.0);
        Ok(())
    }

    #[test]
    fn delta_only_for_matching_client_views() {
        let config = EngineConfig::default();
        let key = CurveKey::new("a", "C", "P");
        assert!(delta_applies(&key, "Todos", &config));
        assert!(delta_applies(&key, " A ", &config));
        assert!(!delta_applies(&key, "b", &config));
        assert!(!delta_applies(&CurveKey::all_clients("C", "P"), "a", &config));
    }

    #[test]
    fn reset_all_empties_session() -> Result<(), EngineError> {
        let mut s = session()?;
        let key = CurveKey::all_clients("C", "P1");
        s.open(&key)?;
        s.commit("x")?;
        s.reset_all()?;
        assert!(s.rows().is_empty());
        assert!(s.active().is_none());
        assert_eq!(s.list_overrides()?.len(), 0);
        assert!(s.last_view().is_none());
        Ok(())
    }
}
