//! USAD: UnSupervised Anomaly Detection on multivariate time series
//!
//! Architecture for a flattened window of `w = window_size * feature_count`
//! values and latent size `z = window_size * hidden_size`:
//!
//! ```text
//! Encoder:   w -> w/2 -> w/4 -> z
//! Decoder1:  z -> w/4 -> w/2 -> w   (sigmoid output)
//! Decoder2:  z -> w/4 -> w/2 -> w   (sigmoid output)
//! ```
//!
//! Training alternates two phases per batch with weights `alpha = 1/n`,
//! `beta = 1 - 1/n` for epoch `n`. Scoring holds the weights at their final
//! value.

pub mod network;
pub mod scorer;
pub mod trainer;

pub use network::{Decoder, Encoder, UsadModel, UsadOutput};
pub use scorer::{reconstruction_errors, score_batch, score_windows, ReconstructionErrors, ScoreSummary};
pub use trainer::{BlendWeights, EpochLosses, TrainingConfig, UsadTrainer};

use std::fmt;

use burn::backend::{Autodiff, NdArray};
use serde::{Deserialize, Serialize};

use crate::error::{Result, UsadError};

/// Backend used for training
pub type TrainBackend = Autodiff<NdArray<f32>>;

/// Backend used for scoring and checkpoint restore
pub type InferenceBackend = NdArray<f32>;

/// Structural dimensions of a model. Two models are interchangeable only when
/// these match exactly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelDims {
    pub window_size: usize,
    pub feature_count: usize,
    pub hidden_size: usize,
    /// Flattened window length
    pub w_size: usize,
    /// Latent code length
    pub z_size: usize,
}

impl ModelDims {
    pub fn new(window_size: usize, feature_count: usize, hidden_size: usize) -> Result<Self> {
        if window_size == 0 || feature_count == 0 || hidden_size == 0 {
            return Err(UsadError::Config(format!(
                "model dimensions must be positive: window_size={} feature_count={} hidden_size={}",
                window_size, feature_count, hidden_size
            )));
        }
        Ok(Self {
            window_size,
            feature_count,
            hidden_size,
            w_size: window_size * feature_count,
            z_size: window_size * hidden_size,
        })
    }

    /// Hidden layer widths between window and latent space
    pub fn hidden_layers(&self) -> (usize, usize) {
        ((self.w_size / 2).max(1), (self.w_size / 4).max(1))
    }

    /// Fail unless `other` matches these dimensions.
    pub fn ensure_matches(&self, other: &ModelDims) -> Result<()> {
        if self != other {
            return Err(UsadError::dimension_mismatch(self, other));
        }
        Ok(())
    }
}

impl fmt::Display for ModelDims {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "window={} features={} hidden={} (w_size={}, z_size={})",
            self.window_size, self.feature_count, self.hidden_size, self.w_size, self.z_size
        )
    }
}
