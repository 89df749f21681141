//! Sensor time-series data
//!
//! Holds the multivariate series read from the normal and attack captures,
//! and the transforms applied before training:
//!
//! ```text
//! CSV -> Series -> MinMaxScaler (fit on normal only) -> WindowSet -> split
//! ```

pub mod ingest;
pub mod scaler;
pub mod synthetic;
pub mod window;

pub use ingest::{load_series, parse_series, IngestOptions, LabeledSeries};
pub use scaler::MinMaxScaler;
pub use window::{window_labels, NormalSplit, SplitFractions, WindowSet};

use serde::{Deserialize, Serialize};

use crate::error::{Result, UsadError};

/// Ordered feature vectors, one per timestamp, stored row-major.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Series {
    columns: Vec<String>,
    values: Vec<f64>,
}

impl Series {
    /// Create a series from named columns and a row-major value buffer.
    pub fn new(columns: Vec<String>, values: Vec<f64>) -> Result<Self> {
        if columns.is_empty() {
            return Err(UsadError::data_format("series has no feature columns"));
        }
        if values.len() % columns.len() != 0 {
            return Err(UsadError::data_format(format!(
                "{} values do not fill rows of {} features",
                values.len(),
                columns.len()
            )));
        }
        Ok(Self { columns, values })
    }

    /// Create a series from individual rows.
    pub fn from_rows(columns: Vec<String>, rows: &[Vec<f64>]) -> Result<Self> {
        let width = columns.len();
        let mut values = Vec::with_capacity(rows.len() * width);
        for (i, row) in rows.iter().enumerate() {
            if row.len() != width {
                return Err(UsadError::data_format(format!(
                    "row {} has {} values, expected {}",
                    i,
                    row.len(),
                    width
                )));
            }
            values.extend_from_slice(row);
        }
        Self::new(columns, values)
    }

    /// Number of timestamps
    pub fn len(&self) -> usize {
        self.values.len() / self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn feature_count(&self) -> usize {
        self.columns.len()
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Row-major values
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// Feature vector at timestamp `index`
    pub fn row(&self, index: usize) -> &[f64] {
        let width = self.columns.len();
        &self.values[index * width..(index + 1) * width]
    }

    pub fn rows(&self) -> impl Iterator<Item = &[f64]> {
        self.values.chunks(self.columns.len())
    }

    /// Keep only the first `rows` timestamps.
    pub fn truncate(&mut self, rows: usize) {
        let width = self.columns.len();
        self.values.truncate(rows * width);
    }

    /// Replace the values with a transformed buffer of identical shape.
    pub(crate) fn with_values(&self, values: Vec<f64>) -> Self {
        debug_assert_eq!(values.len(), self.values.len());
        Self {
            columns: self.columns.clone(),
            values,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn columns(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("f{}", i)).collect()
    }

    #[test]
    fn test_series_shape() {
        let series = Series::new(columns(2), vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
        assert_eq!(series.len(), 3);
        assert_eq!(series.feature_count(), 2);
        assert_eq!(series.row(1), &[3.0, 4.0]);
        assert_eq!(series.rows().count(), 3);
    }

    #[test]
    fn test_series_rejects_ragged_buffer() {
        assert!(Series::new(columns(2), vec![1.0, 2.0, 3.0]).is_err());
        assert!(Series::from_rows(columns(2), &[vec![1.0, 2.0], vec![3.0]]).is_err());
    }

    #[test]
    fn test_series_truncate() {
        let mut series = Series::from_rows(columns(1), &[vec![1.0], vec![2.0], vec![3.0]]).unwrap();
        series.truncate(2);
        assert_eq!(series.len(), 2);
        assert_eq!(series.values(), &[1.0, 2.0]);
    }
}
