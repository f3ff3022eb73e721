use std::collections::BTreeMap;

use curvesim_core::{MonthlySeries, normalize_label};

use crate::aggregate::CategoryAggregate;

/// Difference between the active edit and the key's adjusted series as the
/// rows currently reflect it.
pub fn compute_diff(edit: &MonthlySeries, baseline_adjusted: &MonthlySeries) -> MonthlySeries {
    *edit - *baseline_adjusted
}

/// Folds `diff` into the category whose label normalizes like `category`.
///
/// Any delta folded earlier is replaced, not stacked. Returns `false` when
/// the rollup has no such category.
pub fn fold_delta(
    rollup: &mut BTreeMap<String, CategoryAggregate>,
    category: &str,
    diff: MonthlySeries,
) -> bool {
    let target = normalize_label(category);
    let Some(agg) = rollup
        .iter_mut()
        .find(|(label, _)| normalize_label(label) == target)
        .map(|(_, agg)| agg)
    else {
        return false;
    };
    agg.current.adjusted = agg.adjusted_from_rollup() + diff;
    agg.delta = diff;
    true
}
