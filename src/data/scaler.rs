//! Feature Scaling
//!
//! Per-feature min-max scaling. Statistics come from the normal series only
//! and are reused unchanged on the attack series, so attack values may land
//! outside [0, 1].

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::Series;
use crate::error::{Result, UsadError};

/// Min/max seen for one feature
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeatureRange {
    pub min: f64,
    pub max: f64,
}

impl Default for FeatureRange {
    fn default() -> Self {
        Self {
            min: f64::MAX,
            max: f64::MIN,
        }
    }
}

impl FeatureRange {
    pub fn update(&mut self, value: f64) {
        if value < self.min {
            self.min = value;
        }
        if value > self.max {
            self.max = value;
        }
    }

    pub fn range(&self) -> f64 {
        self.max - self.min
    }

    /// Scale a value into the fitted range. A constant feature maps to 0.
    pub fn normalize(&self, value: f64) -> f64 {
        let range = self.range();
        if range > 0.0 {
            (value - self.min) / range
        } else {
            0.0
        }
    }
}

/// Min-max scaler fitted exactly once
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MinMaxScaler {
    columns: Vec<String>,
    ranges: Vec<FeatureRange>,
}

impl MinMaxScaler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a scaler fitted on `series`.
    pub fn fitted(series: &Series) -> Result<Self> {
        let mut scaler = Self::new();
        scaler.fit(series)?;
        Ok(scaler)
    }

    pub fn is_fitted(&self) -> bool {
        !self.ranges.is_empty()
    }

    pub fn ranges(&self) -> &[FeatureRange] {
        &self.ranges
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Fit per-feature statistics. Refitting an already fitted scaler is rejected.
    pub fn fit(&mut self, series: &Series) -> Result<()> {
        if self.is_fitted() {
            return Err(UsadError::Config("scaler is already fitted".into()));
        }
        if series.is_empty() {
            return Err(UsadError::EmptyInput("cannot fit scaler on an empty series".into()));
        }

        let mut ranges = vec![FeatureRange::default(); series.feature_count()];
        for row in series.rows() {
            for (range, &value) in ranges.iter_mut().zip(row) {
                if !value.is_finite() {
                    return Err(UsadError::data_format(format!(
                        "non-finite value {} in scaler input",
                        value
                    )));
                }
                range.update(value);
            }
        }

        let constant = ranges.iter().filter(|r| r.range() == 0.0).count();
        debug!(
            "Fitted scaler on {} rows x {} features ({} constant)",
            series.len(),
            ranges.len(),
            constant
        );

        self.columns = series.columns().to_vec();
        self.ranges = ranges;
        Ok(())
    }

    /// Apply the fitted statistics. No clamping is applied.
    pub fn transform(&self, series: &Series) -> Result<Series> {
        if !self.is_fitted() {
            return Err(UsadError::Config("scaler used before fit".into()));
        }
        if series.feature_count() != self.ranges.len() {
            return Err(UsadError::dimension_mismatch(
                format!("{} features", self.ranges.len()),
                format!("{} features", series.feature_count()),
            ));
        }

        let width = self.ranges.len();
        let values = series
            .values()
            .iter()
            .enumerate()
            .map(|(i, &v)| self.ranges[i % width].normalize(v))
            .collect();
        Ok(series.with_values(values))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn series(rows: &[Vec<f64>]) -> Series {
        let columns = (0..rows[0].len()).map(|i| format!("f{}", i)).collect();
        Series::from_rows(columns, rows).unwrap()
    }

    #[test]
    fn test_normal_series_lands_in_unit_range() {
        let normal = series(&[vec![1.0, -5.0], vec![3.0, 5.0], vec![2.0, 0.0]]);
        let scaler = MinMaxScaler::fitted(&normal).unwrap();
        let scaled = scaler.transform(&normal).unwrap();
        assert!(scaled.values().iter().all(|&v| (0.0..=1.0).contains(&v)));
        assert_eq!(scaled.row(2), &[0.5, 0.5]);
    }

    #[test]
    fn test_attack_series_is_not_refit() {
        let normal = series(&[vec![0.0], vec![10.0]]);
        let attack = series(&[vec![20.0], vec![-10.0]]);
        let scaler = MinMaxScaler::fitted(&normal).unwrap();
        let scaled = scaler.transform(&attack).unwrap();
        assert_eq!(scaled.values(), &[2.0, -1.0]);
    }

    #[test]
    fn test_constant_feature_maps_to_zero() {
        let normal = series(&[vec![4.0, 1.0], vec![4.0, 2.0]]);
        let scaler = MinMaxScaler::fitted(&normal).unwrap();
        let scaled = scaler.transform(&normal).unwrap();
        assert_eq!(scaled.values(), &[0.0, 0.0, 0.0, 1.0]);
    }

    #[test]
    fn test_fit_twice_rejected() {
        let normal = series(&[vec![0.0], vec![1.0]]);
        let mut scaler = MinMaxScaler::fitted(&normal).unwrap();
        assert!(scaler.fit(&normal).is_err());
    }

    #[test]
    fn test_transform_before_fit_rejected() {
        let normal = series(&[vec![0.0], vec![1.0]]);
        assert!(MinMaxScaler::new().transform(&normal).is_err());
    }

    #[test]
    fn test_transform_feature_count_mismatch() {
        let normal = series(&[vec![0.0], vec![1.0]]);
        let wide = series(&[vec![0.0, 1.0]]);
        let scaler = MinMaxScaler::fitted(&normal).unwrap();
        let err = scaler.transform(&wide).unwrap_err();
        assert!(matches!(err, UsadError::DimensionMismatch { .. }));
    }
}
