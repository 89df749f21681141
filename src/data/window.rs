//! Sliding Windows
//!
//! Slices a series into overlapping windows of `window_size` timestamps
//! (stride 1), each flattened timestamp-major, feature-minor. A series of
//! length L yields L - W windows starting at offsets `0..L-W`.

use std::ops::Range;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::Series;
use crate::error::{Result, UsadError};

/// Flattened windows in one contiguous row-major buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct WindowSet {
    values: Vec<f32>,
    window_size: usize,
    feature_count: usize,
}

impl WindowSet {
    /// An empty set with the given shape
    pub fn empty(window_size: usize, feature_count: usize) -> Self {
        Self {
            values: Vec::new(),
            window_size,
            feature_count,
        }
    }

    /// Build windows from a series. Fails when the series is not longer than
    /// the window.
    pub fn from_series(series: &Series, window_size: usize) -> Result<Self> {
        if window_size == 0 {
            return Err(UsadError::Config("window_size must be at least 1".into()));
        }
        let length = series.len();
        if length <= window_size {
            return Err(UsadError::EmptyInput(format!(
                "series of length {} yields no windows of size {}",
                length, window_size
            )));
        }

        let feature_count = series.feature_count();
        let dim = window_size * feature_count;
        let count = length - window_size;
        let source = series.values();

        let mut values = Vec::with_capacity(count * dim);
        for start in 0..count {
            let from = start * feature_count;
            values.extend(source[from..from + dim].iter().map(|&v| v as f32));
        }

        debug!(
            "Built {} windows of {} x {} (dim {})",
            count, window_size, feature_count, dim
        );

        Ok(Self {
            values,
            window_size,
            feature_count,
        })
    }

    /// Wrap an existing flattened buffer.
    pub fn from_flat(values: Vec<f32>, window_size: usize, feature_count: usize) -> Result<Self> {
        let dim = window_size * feature_count;
        if dim == 0 || values.len() % dim != 0 {
            return Err(UsadError::dimension_mismatch(
                format!("multiple of {}", dim),
                values.len(),
            ));
        }
        Ok(Self {
            values,
            window_size,
            feature_count,
        })
    }

    /// Number of windows
    pub fn len(&self) -> usize {
        self.values.len() / self.dim()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }

    pub fn feature_count(&self) -> usize {
        self.feature_count
    }

    /// Flattened window length, `window_size * feature_count`
    pub fn dim(&self) -> usize {
        self.window_size * self.feature_count
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    pub fn row(&self, index: usize) -> &[f32] {
        let dim = self.dim();
        &self.values[index * dim..(index + 1) * dim]
    }

    /// Contiguous values of windows in `range`
    pub fn rows(&self, range: Range<usize>) -> &[f32] {
        let dim = self.dim();
        &self.values[range.start * dim..range.end * dim]
    }

    /// Copy of the windows in `range`
    pub fn slice(&self, range: Range<usize>) -> Self {
        Self {
            values: self.rows(range).to_vec(),
            window_size: self.window_size,
            feature_count: self.feature_count,
        }
    }

    /// Append `other` after `self`, preserving order.
    pub fn concat(&self, other: &WindowSet) -> Result<Self> {
        if other.window_size != self.window_size || other.feature_count != self.feature_count {
            return Err(UsadError::dimension_mismatch(
                format!("{}x{}", self.window_size, self.feature_count),
                format!("{}x{}", other.window_size, other.feature_count),
            ));
        }
        let mut values = Vec::with_capacity(self.values.len() + other.values.len());
        values.extend_from_slice(&self.values);
        values.extend_from_slice(&other.values);
        Ok(Self {
            values,
            window_size: self.window_size,
            feature_count: self.feature_count,
        })
    }

    /// Index ranges of consecutive batches. The last batch may be short.
    pub fn batches(&self, batch_size: usize) -> impl Iterator<Item = Range<usize>> {
        let len = self.len();
        let step = batch_size.max(1);
        (0..len)
            .step_by(step)
            .map(move |start| start..(start + step).min(len))
    }
}

/// Per-window labels from per-row labels: a window is an anomaly when any
/// row it covers is one.
pub fn window_labels(row_labels: &[u8], window_size: usize) -> Result<Vec<u8>> {
    if row_labels.len() <= window_size {
        return Err(UsadError::EmptyInput(format!(
            "{} row labels yield no windows of size {}",
            row_labels.len(),
            window_size
        )));
    }
    Ok((0..row_labels.len() - window_size)
        .map(|start| {
            u8::from(row_labels[start..start + window_size].iter().any(|&l| l != 0))
        })
        .collect())
}

/// Fractions of the normal windows used for training and validation.
/// The remainder is held out as normal test data.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SplitFractions {
    pub train: f64,
    pub validation: f64,
}

impl Default for SplitFractions {
    fn default() -> Self {
        Self {
            train: 0.4,
            validation: 0.1,
        }
    }
}

impl SplitFractions {
    pub fn validate(&self) -> Result<()> {
        let in_unit = |v: f64| v > 0.0 && v < 1.0;
        if !in_unit(self.train) || !in_unit(self.validation) {
            return Err(UsadError::Config(format!(
                "split fractions must lie in (0, 1), got train={} validation={}",
                self.train, self.validation
            )));
        }
        if self.train + self.validation >= 1.0 {
            return Err(UsadError::Config(format!(
                "train + validation must leave test windows, got {}",
                self.train + self.validation
            )));
        }
        Ok(())
    }
}

/// Normal windows split in temporal order, without shuffling.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalSplit {
    pub train: WindowSet,
    pub validation: WindowSet,
    pub test: WindowSet,
}

impl NormalSplit {
    /// Train is `[0, floor(train*n))`, validation runs to
    /// `floor((train+validation)*n)`, test takes the rest.
    pub fn split(windows: &WindowSet, fractions: SplitFractions) -> Result<Self> {
        fractions.validate()?;
        let n = windows.len();
        let train_end = (fractions.train * n as f64).floor() as usize;
        let val_end = ((fractions.train + fractions.validation) * n as f64).floor() as usize;

        if train_end == 0 || val_end <= train_end || val_end >= n {
            return Err(UsadError::EmptyInput(format!(
                "{} normal windows are too few to split into train/validation/test",
                n
            )));
        }

        debug!(
            "Split {} normal windows: train={} validation={} test={}",
            n,
            train_end,
            val_end - train_end,
            n - val_end
        );

        Ok(Self {
            train: windows.slice(0..train_end),
            validation: windows.slice(train_end..val_end),
            test: windows.slice(val_end..n),
        })
    }
}
