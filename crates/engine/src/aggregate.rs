//! Pure aggregation over a row snapshot.
//!
//! Nothing here fails: unmatched keys yield all-zero series, unreadable
//! values were already coerced to 0.0 when the rows were decoded, and rows
//! with an invalid month, a blank category or product, or a year below
//! [`EngineConfig::min_year`] are skipped.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use curvesim_core::{
    ClientFilter, CurveKey, EngineConfig, MaskedSeries, MonthlySeries, RawRow, normalize_label,
};

/// Shared row predicate: client, optional category/product, month and year floor.
pub(crate) struct RowFilter {
    client: ClientFilter,
    category: Option<String>,
    product: Option<String>,
    min_year: i32,
}

impl RowFilter {
    pub(crate) fn for_key(key: &CurveKey, config: &EngineConfig) -> Self {
        Self {
            client: key.client_filter(&config.wildcard_client),
            category: Some(normalize_label(key.category())),
            product: Some(normalize_label(key.product())),
            min_year: config.min_year,
        }
    }

    pub(crate) fn for_client(client: &str, config: &EngineConfig) -> Self {
        Self {
            client: ClientFilter::parse(client, &config.wildcard_client),
            category: None,
            product: None,
            min_year: config.min_year,
        }
    }

    pub(crate) fn matches(&self, row: &RawRow) -> bool {
        if !row.has_valid_month() || row.year < self.min_year {
            return false;
        }
        if !self.client.matches(&row.normalized_client()) {
            return false;
        }
        let category = row.normalized_category();
        let product = row.normalized_product();
        if category.is_empty() || product.is_empty() {
            return false;
        }
        if self.category.as_ref().is_some_and(|c| *c != category) {
            return false;
        }
        if self.product.as_ref().is_some_and(|p| *p != product) {
            return false;
        }
        true
    }
}

/// Analytic and market projections of one key in its latest year.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaselineCurves {
    pub analytic: MonthlySeries,
    pub market: MonthlySeries,
    pub year: Option<i32>,
}

impl BaselineCurves {
    pub fn empty() -> Self {
        Self {
            analytic: MonthlySeries::zeros(),
            market: MonthlySeries::zeros(),
            year: None,
        }
    }
}

/// The four monthly metrics of one group in one year.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct MetricSeries {
    pub analytic: MonthlySeries,
    pub market: MonthlySeries,
    pub adjusted: MonthlySeries,
    pub realized: MonthlySeries,
}

impl MetricSeries {
    fn add_row(&mut self, row: &RawRow) {
        self.analytic.accumulate(row.month, row.analytic);
        self.market.accumulate(row.month, row.market);
        self.adjusted.accumulate(row.month, row.effective_adjusted());
        self.realized.accumulate(row.month, row.realized);
    }

    /// Realized series in display form.
    pub fn realized_display(&self, mask: bool) -> MaskedSeries {
        if mask {
            self.realized.masked()
        } else {
            self.realized.unmasked()
        }
    }
}

/// Category rollup for a target year plus the prior year.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CategoryAggregate {
    pub current: MetricSeries,
    pub previous: MetricSeries,
    /// Active-edit difference folded into `current.adjusted`; zero for a pure rollup.
    pub delta: MonthlySeries,
}

impl CategoryAggregate {
    /// `current.adjusted` before any delta was folded in.
    pub fn adjusted_from_rollup(&self) -> MonthlySeries {
        self.current.adjusted - self.delta
    }
}

/// The same metrics as [`CategoryAggregate`] for a single key.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ProductAggregate {
    pub current: MetricSeries,
    pub previous: MetricSeries,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DashboardMetrics {
    pub total_adjusted: f64,
    pub total_realized: f64,
    /// Realized over analytic, as a percentage clamped to 0..=100.
    pub accuracy_pct: f64,
    pub active_overrides: usize,
}

fn matching<'a>(rows: &'a [RawRow], filter: &'a RowFilter) -> impl Iterator<Item = &'a RawRow> + 'a {
    rows.iter().filter(move |r| filter.matches(r))
}

/// Latest year with rows for `key`.
pub fn key_year(rows: &[RawRow], key: &CurveKey, config: &EngineConfig) -> Option<i32> {
    let filter = RowFilter::for_key(key, config);
    matching(rows, &filter).map(|r| r.year).max()
}

/// Latest year with rows for a client selection.
pub fn latest_year(rows: &[RawRow], client: &str, config: &EngineConfig) -> Option<i32> {
    let filter = RowFilter::for_client(client, config);
    matching(rows, &filter).map(|r| r.year).max()
}

pub fn baseline_curves(rows: &[RawRow], key: &CurveKey, config: &EngineConfig) -> BaselineCurves {
    let filter = RowFilter::for_key(key, config);
    let Some(year) = matching(rows, &filter).map(|r| r.year).max() else {
        return BaselineCurves::empty();
    };

    let mut analytic = MonthlySeries::zeros();
    let mut market = MonthlySeries::zeros();
    for row in matching(rows, &filter).filter(|r| r.year == year) {
        analytic.accumulate(row.month, row.analytic);
        market.accumulate(row.month, row.market);
    }
    BaselineCurves {
        analytic,
        market,
        year: Some(year),
    }
}

pub fn realized_by_year(
    rows: &[RawRow],
    key: &CurveKey,
    config: &EngineConfig,
    mask: bool,
) -> BTreeMap<i32, MaskedSeries> {
    let filter = RowFilter::for_key(key, config);
    let mut by_year: BTreeMap<i32, MonthlySeries> = BTreeMap::new();
    for row in matching(rows, &filter) {
        by_year
            .entry(row.year)
            .or_default()
            .accumulate(row.month, row.realized);
    }
    by_year
        .into_iter()
        .map(|(year, series)| {
            let display = if mask { series.masked() } else { series.unmasked() };
            (year, display)
        })
        .collect()
}

/// Sums every metric per category and month for `year` and `year - 1`.
///
/// Categories are grouped by normalized label and keyed by the first label
/// seen. Categories without rows in either year are absent.
pub fn category_rollup(
    rows: &[RawRow],
    client: &str,
    year: i32,
    config: &EngineConfig,
) -> BTreeMap<String, CategoryAggregate> {
    let filter = RowFilter::for_client(client, config);
    let previous = year.checked_sub(1);
    let mut groups: BTreeMap<String, (String, CategoryAggregate)> = BTreeMap::new();

    for row in matching(rows, &filter) {
        let in_current = row.year == year;
        if !in_current && Some(row.year) != previous {
            continue;
        }
        let (_, agg) = groups
            .entry(row.normalized_category())
            .or_insert_with(|| (row.category.clone(), CategoryAggregate::default()));
        if in_current {
            agg.current.add_row(row);
        } else {
            agg.previous.add_row(row);
        }
    }

    groups.into_values().collect()
}

pub fn product_aggregate(
    rows: &[RawRow],
    key: &CurveKey,
    year: i32,
    config: &EngineConfig,
) -> ProductAggregate {
    let filter = RowFilter::for_key(key, config);
    let previous = year.checked_sub(1);
    let mut agg = ProductAggregate::default();
    for row in matching(rows, &filter) {
        if row.year == year {
            agg.current.add_row(row);
        } else if Some(row.year) == previous {
            agg.previous.add_row(row);
        }
    }
    agg
}

/// Adjusted series of one key in `year` as currently reflected in the rows.
/// `None` when the key has no rows in that year.
pub fn product_adjusted(
    rows: &[RawRow],
    key: &CurveKey,
    year: i32,
    config: &EngineConfig,
) -> Option<MonthlySeries> {
    let filter = RowFilter::for_key(key, config);
    let mut series = MonthlySeries::zeros();
    let mut any = false;
    for row in matching(rows, &filter).filter(|r| r.year == year) {
        series.accumulate(row.month, row.effective_adjusted());
        any = true;
    }
    any.then_some(series)
}

pub fn dataset_metrics(
    rows: &[RawRow],
    config: &EngineConfig,
    active_overrides: usize,
) -> DashboardMetrics {
    let filter = RowFilter::for_client(&config.wildcard_client, config);
    let (mut adjusted, mut realized, mut analytic) = (0.0, 0.0, 0.0);
    for row in matching(rows, &filter) {
        adjusted += row.effective_adjusted();
        realized += row.realized;
        analytic += row.analytic;
    }
    let accuracy_pct = if analytic > 0.0 {
        (realized / analytic * 100.0).clamp(0.0, 100.0)
    } else {
        0.0
    };
    DashboardMetrics {
        total_adjusted: adjusted,
        total_realized: realized,
        accuracy_pct,
        active_overrides,
    }
}
