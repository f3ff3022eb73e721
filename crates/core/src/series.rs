use std::ops::{Add, AddAssign, Index, Sub};

use serde::{Deserialize, Serialize};

use crate::CoreError;

pub const MONTHS: usize = 12;

/// Twelve monthly values; index 0 is January.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct MonthlySeries([f64; MONTHS]);

impl MonthlySeries {
    pub fn zeros() -> Self {
        Self([0.0; MONTHS])
    }

    /// Builds a series from any sequence: truncated or zero-padded to 12,
    /// non-finite values become 0.0.
    pub fn from_values<I: IntoIterator<Item = f64>>(values: I) -> Self {
        let mut out = [0.0; MONTHS];
        for (slot, v) in out.iter_mut().zip(values) {
            *slot = coerce(Some(v));
        }
        Self(out)
    }

    /// Like [`from_values`](Self::from_values) but missing entries count as 0.0.
    pub fn from_optional<I: IntoIterator<Item = Option<f64>>>(values: I) -> Self {
        Self::from_values(values.into_iter().map(coerce))
    }

    /// Strict construction for curves coming from an editing surface.
    pub fn try_from_slice(values: &[f64]) -> Result<Self, CoreError> {
        if values.len() != MONTHS {
            return Err(CoreError::CurveLength { len: values.len() });
        }
        let mut out = [0.0; MONTHS];
        for (i, v) in values.iter().enumerate() {
            if !v.is_finite() {
                return Err(CoreError::NonFiniteValue { month: i + 1 });
            }
            out[i] = *v;
        }
        Ok(Self(out))
    }

    pub fn values(&self) -> &[f64; MONTHS] {
        &self.0
    }

    pub fn iter(&self) -> impl Iterator<Item = f64> + '_ {
        self.0.iter().copied()
    }

    /// Value for a calendar month (1..=12).
    pub fn month(&self, month: u8) -> Option<f64> {
        month_index(month).map(|i| self.0[i])
    }

    /// Adds `value` to a calendar month. Out-of-range months are ignored.
    pub fn accumulate(&mut self, month: u8, value: f64) {
        if let Some(i) = month_index(month) {
            self.0[i] += coerce(Some(value));
        }
    }

    pub fn total(&self) -> f64 {
        self.0.iter().sum()
    }

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|v| *v == 0.0)
    }

    pub fn variation(&self) -> MonthlySeries {
        MonthlySeries::from_values(variation(&self.0))
    }

    pub fn masked(&self) -> MaskedSeries {
        MaskedSeries::from_slice(&mask_trailing_zeros(&self.0))
    }

    pub fn unmasked(&self) -> MaskedSeries {
        MaskedSeries(self.0.map(Some))
    }
}

impl Index<usize> for MonthlySeries {
    type Output = f64;

    fn index(&self, index: usize) -> &f64 {
        &self.0[index]
    }
}

impl Add for MonthlySeries {
    type Output = MonthlySeries;

    fn add(mut self, rhs: MonthlySeries) -> MonthlySeries {
        self += rhs;
        self
    }
}

impl AddAssign for MonthlySeries {
    fn add_assign(&mut self, rhs: MonthlySeries) {
        for (a, b) in self.0.iter_mut().zip(rhs.0) {
            *a += b;
        }
    }
}

impl Sub for MonthlySeries {
    type Output = MonthlySeries;

    fn sub(mut self, rhs: MonthlySeries) -> MonthlySeries {
        for (a, b) in self.0.iter_mut().zip(rhs.0) {
            *a -= b;
        }
        self
    }
}

/// Display form of a series: `None` marks "no data yet".
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct MaskedSeries([Option<f64>; MONTHS]);

impl MaskedSeries {
    fn from_slice(values: &[Option<f64>]) -> Self {
        let mut out = [None; MONTHS];
        for (slot, v) in out.iter_mut().zip(values) {
            *slot = *v;
        }
        Self(out)
    }

    pub fn values(&self) -> &[Option<f64>; MONTHS] {
        &self.0
    }

    /// Back to plain numbers, masked months counting as zero.
    pub fn filled(&self) -> MonthlySeries {
        MonthlySeries::from_optional(self.0)
    }
}

fn month_index(month: u8) -> Option<usize> {
    (1..=MONTHS as u8).contains(&month).then(|| usize::from(month - 1))
}

/// Missing or non-finite numbers become 0.0.
pub fn coerce(value: Option<f64>) -> f64 {
    match value {
        Some(v) if v.is_finite() => v,
        _ => 0.0,
    }
}

/// Month-over-month relative change. Zero for the first month and whenever the
/// previous month is zero.
pub fn variation(values: &[f64]) -> Vec<f64> {
    let mut out = Vec::with_capacity(values.len());
    let mut prev = 0.0;
    for (i, raw) in values.iter().enumerate() {
        let v = coerce(Some(*raw));
        if i == 0 || prev == 0.0 {
            out.push(0.0);
        } else {
            out.push((v - prev) / prev.abs());
        }
        prev = v;
    }
    out
}

/// Zeros after the last nonzero value become `None`. Leading and interior
/// zeros are kept; an all-zero sequence has no anchor and is left as is.
pub fn mask_trailing_zeros(values: &[f64]) -> Vec<Option<f64>> {
    let last_real = values.iter().rposition(|v| v.is_finite() && *v != 0.0);
    values
        .iter()
        .enumerate()
        .map(|(i, v)| match last_real {
            _ if !v.is_finite() => None,
            Some(last) if i > last && *v == 0.0 => None,
            _ => Some(*v),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn short_and_long_inputs_normalize_to_twelve() {
        let short = MonthlySeries::from_values([1.0, 2.0]);
        assert_eq!(short[0], 1.0);
        assert_eq!(short[1], 2.0);
        assert!(short.values()[2..].iter().all(|v| *v == 0.0));

        let long = MonthlySeries::from_values((1..=20).map(f64::from));
        assert_eq!(long[11], 12.0);
        assert_eq!(long.values().len(), MONTHS);
    }

    #[test]
    fn non_finite_values_coerce_to_zero() {
        let s = MonthlySeries::from_values([f64::NAN, f64::INFINITY, 3.0]);
        assert_eq!(&s.values()[..3], &[0.0, 0.0, 3.0]);
        let s = MonthlySeries::from_optional([None, Some(4.0)]);
        assert_eq!(&s.values()[..2], &[0.0, 4.0]);
    }

    #[test]
    fn strict_construction_rejects_bad_curves() {
        assert_eq!(
            MonthlySeries::try_from_slice(&[1.0; 11]),
            Err(CoreError::CurveLength { len: 11 })
        );
        let mut values = [1.0; 12];
        values[4] = f64::NAN;
        assert_eq!(
            MonthlySeries::try_from_slice(&values),
            Err(CoreError::NonFiniteValue { month: 5 })
        );
        assert!(MonthlySeries::try_from_slice(&[2.5; 12]).is_ok());
    }

    #[test]
    fn variation_matches_documented_example() {
        assert_eq!(variation(&[100.0, 150.0, 0.0, 90.0]), vec![0.0, 0.5, -1.0, 0.0]);
    }

    #[test]
    fn variation_uses_absolute_previous_value() {
        assert_eq!(variation(&[-100.0, -50.0]), vec![0.0, 0.5]);
    }

    #[test]
    fn trailing_zeros_are_masked() {
        assert_eq!(
            mask_trailing_zeros(&[10.0, 20.0, 0.0, 0.0]),
            vec![Some(10.0), Some(20.0), None, None]
        );
    }

    #[test]
    fn interior_zeros_are_kept() {
        assert_eq!(
            mask_trailing_zeros(&[0.0, 10.0, 0.0, 20.0]),
            vec![Some(0.0), Some(10.0), Some(0.0), Some(20.0)]
        );
    }

    #[test]
    fn all_zero_sequence_is_unchanged() {
        assert_eq!(mask_trailing_zeros(&[0.0; 4]), vec![Some(0.0); 4]);
    }

    #[test]
    fn accumulate_ignores_out_of_range_months() {
        let mut s = MonthlySeries::zeros();
        s.accumulate(1, 5.0);
        s.accumulate(1, 2.5);
        s.accumulate(0, 100.0);
        s.accumulate(13, 100.0);
        assert_eq!(s.month(1), Some(7.5));
        assert_eq!(s.total(), 7.5);
        assert_eq!(s.month(13), None);
    }

    #[test]
    fn elementwise_arithmetic() {
        let a = MonthlySeries::from_values([3.0, 4.0]);
        let b = MonthlySeries::from_values([1.0, 1.0]);
        assert_eq!((a - b).values()[..2], [2.0, 3.0]);
        assert_eq!((a + b).values()[..2], [4.0, 5.0]);
        assert!((a - a).is_zero());
    }

    #[test]
    fn masked_series_fills_back_to_zero() {
        let s = MonthlySeries::from_values([5.0, 0.0, 7.0]);
        let masked = s.masked();
        assert_eq!(masked.values()[2], Some(7.0));
        assert_eq!(masked.values()[3], None);
        assert_eq!(masked.filled(), s);
    }

    proptest! {
        #[test]
        fn prop_any_length_normalizes(values in proptest::collection::vec(-1e9f64..1e9, 0..40)) {
            let s = MonthlySeries::from_values(values.iter().copied());
            for i in 0..MONTHS {
                let expected = values.get(i).copied().unwrap_or(0.0);
                prop_assert_eq!(s[i], expected);
            }
        }

        #[test]
        fn prop_masking_never_touches_values_up_to_last_nonzero(
            values in proptest::collection::vec(prop_oneof![Just(0.0f64), 1.0f64..100.0], 0..12)
        ) {
            let masked = mask_trailing_zeros(&values);
            prop_assert_eq!(masked.len(), values.len());
            let last = values.iter().rposition(|v| *v != 0.0);
            for (i, (m, v)) in masked.iter().zip(&values).enumerate() {
                match last {
                    Some(l) if i > l => prop_assert_eq!(*m, None),
                    _ => prop_assert_eq!(*m, Some(*v)),
                }
            }
        }
    }
}
