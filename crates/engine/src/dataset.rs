use curvesim_core::{ClientFilter, CurveKey, EngineConfig, MonthlySeries, RawRow};

use crate::aggregate::RowFilter;
use crate::error::EngineError;

/// The raw upload held by a session. Every mutation refreshes the snapshot
/// hash so cached aggregates can tell the rows changed.
#[derive(Debug, Clone)]
pub struct RowSet {
    rows: Vec<RawRow>,
    hash: blake3::Hash,
}

impl Default for RowSet {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl RowSet {
    pub fn new(rows: Vec<RawRow>) -> Self {
        let hash = hash_rows(&rows);
        Self { rows, hash }
    }

    /// Decodes a JSON array of rows. Individual cells are decoded leniently;
    /// only a structurally invalid document fails.
    pub fn from_json(text: &str) -> Result<Self, EngineError> {
        let rows: Vec<RawRow> =
            serde_json::from_str(text).map_err(|e| EngineError::Serialization(e.to_string()))?;
        Ok(Self::new(rows))
    }

    pub fn rows(&self) -> &[RawRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn snapshot_hash(&self) -> blake3::Hash {
        self.hash
    }

    pub fn push(&mut self, row: RawRow) {
        self.rows.push(row);
        self.hash = hash_rows(&self.rows);
    }

    /// Replaces the adjusted cells of `key` in `year` so that each month's
    /// cells sum to `curve`.
    ///
    /// When several rows share a month (several clients under the wildcard, or
    /// duplicate uploads) the month value is split pro-rata to the rows'
    /// absolute analytic values, or evenly when those are all zero. The last
    /// row takes the remainder. A nonzero month without any row gets a new row
    /// for the key carrying only the adjusted value. Nothing is written when
    /// the key has no rows in `year`. Returns the number of cells written.
    pub fn write_through(
        &mut self,
        key: &CurveKey,
        year: i32,
        curve: &MonthlySeries,
        config: &EngineConfig,
    ) -> usize {
        let by_month = self.month_cells(key, year, config);
        if by_month.iter().all(Vec::is_empty) {
            return 0;
        }
        let mut written = 0;

        for (m, cells) in by_month.iter().enumerate() {
            let target = curve[m];
            let Some((last, rest)) = cells.split_last() else {
                if target != 0.0 {
                    self.rows.push(synthesized_row(key, m, year, target, config));
                    written += 1;
                }
                continue;
            };
            let weight_total: f64 = cells.iter().map(|i| self.rows[*i].analytic.abs()).sum();
            let mut assigned = 0.0;
            for i in rest {
                let share = if weight_total > 0.0 {
                    self.rows[*i].analytic.abs() / weight_total
                } else {
                    1.0 / cells.len() as f64
                };
                let value = target * share;
                self.rows[*i].adjusted = Some(value);
                assigned += value;
            }
            self.rows[*last].adjusted = Some(target - assigned);
            written += cells.len();
        }

        self.hash = hash_rows(&self.rows);
        written
    }

    /// Sets every adjusted cell of `key` in `year` back to its analytic value.
    pub fn reset_adjusted(&mut self, key: &CurveKey, year: i32, config: &EngineConfig) -> usize {
        let filter = RowFilter::for_key(key, config);
        let mut written = 0;
        for row in self.rows.iter_mut() {
            if filter.matches(row) && row.year == year {
                row.adjusted = Some(row.analytic);
                written += 1;
            }
        }
        self.hash = hash_rows(&self.rows);
        written
    }

    fn month_cells(&self, key: &CurveKey, year: i32, config: &EngineConfig) -> [Vec<usize>; 12] {
        let filter = RowFilter::for_key(key, config);
        let mut by_month: [Vec<usize>; 12] = Default::default();
        for (i, row) in self.rows.iter().enumerate() {
            if filter.matches(row) && row.year == year {
                by_month[usize::from(row.month - 1)].push(i);
            }
        }
        by_month
    }
}

/// Row holding an override value for a month the upload has no cell for.
/// A wildcard key gets an empty client so every client view counts it.
fn synthesized_row(
    key: &CurveKey,
    month_index: usize,
    year: i32,
    adjusted: f64,
    config: &EngineConfig,
) -> RawRow {
    let client = match key.client_filter(&config.wildcard_client) {
        ClientFilter::All => "",
        ClientFilter::Only(_) => key.client(),
    };
    // month_index < 12
    let month = month_index as u8 + 1;
    RawRow::new(client, key.category(), key.product(), month, year).with_adjusted(adjusted)
}

fn hash_rows(rows: &[RawRow]) -> blake3::Hash {
    let mut hasher = blake3::Hasher::new();
    for row in rows {
        for text in [&row.client, &row.category, &row.product] {
            hasher.update(&(text.len() as u64).to_le_bytes());
            hasher.update(text.as_bytes());
        }
        hasher.update(&[row.month]);
        hasher.update(&row.year.to_le_bytes());
        for v in [row.realized, row.analytic, row.market] {
            hasher.update(&v.to_bits().to_le_bytes());
        }
        match row.adjusted {
            Some(v) => {
                hasher.update(&[1]);
                hasher.update(&v.to_bits().to_le_bytes());
            }
            None => {
                hasher.update(&[0]);
            }
        }
    }
    hasher.finalize()
}
