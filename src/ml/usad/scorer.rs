//! Anomaly Scoring
//!
//! `score(w) = alpha * mean((w - w1)^2) + beta * mean((w - w3)^2)` per window,
//! with `w1 = decoder1(encoder(w))` and `w3 = decoder2(encoder(w1))`. The
//! squared error is averaged over the flattened window, the same reduction the
//! training losses use.

use std::ops::Range;

use burn::tensor::{backend::Backend, Tensor, TensorData};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::network::UsadModel;
use super::trainer::BlendWeights;
use crate::data::WindowSet;
use crate::error::{Result, UsadError};

/// Windows in `range` as a `[batch, dim]` tensor
pub fn window_batch<B: Backend>(
    windows: &WindowSet,
    range: Range<usize>,
    device: &B::Device,
) -> Tensor<B, 2> {
    let rows = range.len();
    let data = TensorData::new(windows.rows(range).to_vec(), [rows, windows.dim()]);
    Tensor::from_data(data, device)
}

/// Per-window mean squared error, shape `[batch]`
fn per_window_error<B: Backend>(target: Tensor<B, 2>, reconstruction: Tensor<B, 2>) -> Tensor<B, 1> {
    let [rows, _] = target.dims();
    let diff = target - reconstruction;
    (diff.clone() * diff).mean_dim(1).reshape([rows])
}

/// Score one batch of windows.
pub fn score_batch<B: Backend>(
    model: &UsadModel<B>,
    w: Tensor<B, 2>,
    weights: BlendWeights,
) -> Tensor<B, 1> {
    let (w1, w3) = model.reconstruct(w.clone());
    per_window_error(w.clone(), w1).mul_scalar(weights.alpha)
        + per_window_error(w, w3).mul_scalar(weights.beta)
}

fn check_model_input<B: Backend>(model: &UsadModel<B>, windows: &WindowSet) -> Result<()> {
    if windows.is_empty() {
        return Err(UsadError::EmptyInput("no windows to score".into()));
    }
    let expected = model.input_dim();
    if windows.dim() != expected {
        return Err(UsadError::dimension_mismatch(
            format!("window dim {}", expected),
            format!("window dim {}", windows.dim()),
        ));
    }
    Ok(())
}

/// Score every window batch by batch. The result keeps window order and does
/// not depend on the batch size.
pub fn score_windows<B: Backend>(
    model: &UsadModel<B>,
    windows: &WindowSet,
    batch_size: usize,
    weights: BlendWeights,
    device: &B::Device,
) -> Result<Vec<f32>> {
    check_model_input(model, windows)?;

    let mut scores = Vec::with_capacity(windows.len());
    for range in windows.batches(batch_size) {
        let w = window_batch::<B>(windows, range, device);
        scores.extend(score_batch(model, w, weights).into_data().iter::<f32>());
    }

    debug!(
        "Scored {} windows (alpha={:.4}, beta={:.4})",
        scores.len(),
        weights.alpha,
        weights.beta
    );
    Ok(scores)
}

/// Both error terms of the score, unweighted
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReconstructionErrors {
    /// `mean((w - w1)^2)` per window
    pub decoder1: Vec<f32>,
    /// `mean((w - w3)^2)` per window
    pub adversarial: Vec<f32>,
}

impl ReconstructionErrors {
    /// Blend the two terms into scores.
    pub fn blend(&self, weights: BlendWeights) -> Vec<f32> {
        self.decoder1
            .iter()
            .zip(&self.adversarial)
            .map(|(&e1, &e3)| (weights.alpha * e1 as f64 + weights.beta * e3 as f64) as f32)
            .collect()
    }
}

pub fn reconstruction_errors<B: Backend>(
    model: &UsadModel<B>,
    windows: &WindowSet,
    batch_size: usize,
    device: &B::Device,
) -> Result<ReconstructionErrors> {
    check_model_input(model, windows)?;

    let mut errors = ReconstructionErrors::default();
    for range in windows.batches(batch_size) {
        let w = window_batch::<B>(windows, range, device);
        let (w1, w3) = model.reconstruct(w.clone());
        errors
            .decoder1
            .extend(per_window_error(w.clone(), w1).into_data().iter::<f32>());
        errors
            .adversarial
            .extend(per_window_error(w, w3).into_data().iter::<f32>());
    }
    Ok(errors)
}

/// Summary statistics of a score sequence
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoreSummary {
    pub count: u64,
    pub mean: f32,
    /// M2 for Welford's variance algorithm
    m2: f64,
    pub min: f32,
    pub max: f32,
}

impl ScoreSummary {
    pub fn from_scores(scores: &[f32]) -> Self {
        let mut summary = Self::default();
        for &score in scores {
            summary.update(score);
        }
        summary
    }

    pub fn update(&mut self, score: f32) {
        self.count += 1;

        if self.count == 1 {
            self.min = score;
            self.max = score;
        } else {
            self.min = self.min.min(score);
            self.max = self.max.max(score);
        }

        // Welford's online algorithm
        let delta = score as f64 - self.mean as f64;
        self.mean += (delta / self.count as f64) as f32;
        let delta2 = score as f64 - self.mean as f64;
        self.m2 += delta * delta2;
    }

    pub fn std(&self) -> f32 {
        if self.count < 2 {
            return 0.0;
        }
        ((self.m2 / (self.count - 1) as f64) as f32).sqrt()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::synthetic::{perturb_windows, SensorGenerator, SyntheticConfig};
    use crate::data::MinMaxScaler;
    use crate::ml::usad::{InferenceBackend, ModelDims, TrainBackend, TrainingConfig, UsadTrainer};
    use burn::module::AutodiffModule;

    type B = InferenceBackend;

    fn windows(length: usize) -> WindowSet {
        let config = SyntheticConfig {
            features: 2,
            normal_length: length,
            period: 20.0,
            ..Default::default()
        };
        let series = SensorGenerator::new(config).normal().unwrap();
        let scaled = MinMaxScaler::fitted(&series).unwrap().transform(&series).unwrap();
        WindowSet::from_series(&scaled, 5).unwrap()
    }

    #[test]
    fn test_scores_independent_of_batch_size() {
        let windows = windows(80);
        let dims = ModelDims::new(5, 2, 2).unwrap();
        let device = Default::default();
        let model = UsadModel::<B>::new(&dims, &device);
        let weights = BlendWeights::final_for(10);

        let whole = score_windows(&model, &windows, 1000, weights, &device).unwrap();
        let small = score_windows(&model, &windows, 7, weights, &device).unwrap();
        assert_eq!(whole.len(), windows.len());
        for (a, b) in whole.iter().zip(&small) {
            assert!((a - b).abs() < 1e-5);
        }
    }

    #[test]
    fn test_score_matches_blended_errors() {
        let windows = windows(60);
        let dims = ModelDims::new(5, 2, 2).unwrap();
        let device = Default::default();
        let model = UsadModel::<B>::new(&dims, &device);
        let weights = BlendWeights::final_for(4);

        let scores = score_windows(&model, &windows, 16, weights, &device).unwrap();
        let blended = reconstruction_errors(&model, &windows, 16, &device)
            .unwrap()
            .blend(weights);
        for (a, b) in scores.iter().zip(&blended) {
            assert!((a - b).abs() < 1e-5);
        }
    }

    #[test]
    fn test_score_rejects_wrong_dim() {
        let windows = windows(40);
        let dims = ModelDims::new(4, 2, 2).unwrap();
        let device = Default::default();
        let model = UsadModel::<B>::new(&dims, &device);
        let err = score_windows(&model, &windows, 8, BlendWeights::final_for(1), &device)
            .unwrap_err();
        assert!(matches!(err, UsadError::DimensionMismatch { .. }));
    }

    #[test]
    fn test_perturbed_windows_score_higher() {
        let windows = windows(300);
        let dims = ModelDims::new(5, 2, 2).unwrap();
        let config = TrainingConfig {
            epochs: 3,
            batch_size: 32,
            learning_rate: 5e-3,
            seed: Some(7),
        };
        let device = Default::default();
        let trainer = UsadTrainer::<TrainBackend>::new(config, Default::default());
        let model = trainer.init_model(&dims);
        let (model, _) = trainer.fit(model, &windows, &windows.slice(0..20)).unwrap();
        let model = model.valid();
        let weights = BlendWeights::final_for(3);

        let perturbed = perturb_windows(&windows, 1.5, 2.5, 11).unwrap();
        let normal = ScoreSummary::from_scores(
            &score_windows(&model, &windows, 64, weights, &device).unwrap(),
        );
        let shifted = ScoreSummary::from_scores(
            &score_windows(&model, &perturbed, 64, weights, &device).unwrap(),
        );
        assert!(shifted.mean > normal.mean);
        assert!(shifted.min > normal.mean);
    }

    #[test]
    fn test_summary_statistics() {
        let summary = ScoreSummary::from_scores(&[1.0, 2.0, 3.0, 4.0]);
        assert_eq!(summary.count, 4);
        assert!((summary.mean - 2.5).abs() < 1e-6);
        assert_eq!(summary.min, 1.0);
        assert_eq!(summary.max, 4.0);
        assert!((summary.std() - 1.2909944).abs() < 1e-5);
    }
}
