//! USAD Training
//!
//! Two-phase adversarial training. For every batch:
//!
//! 1. `loss1` is computed, backpropagated and applied to the encoder and
//!    decoder 1 only.
//! 2. The forward pass is recomputed with the updated parameters, then `loss2`
//!    is backpropagated and applied to the encoder and decoder 2 only.
//!
//! Each phase owns its own Adam state, so no gradient or moment estimate
//! crosses between the two objectives. Validation losses are averaged per
//! epoch; there is no early stopping.

use burn::{
    module::AutodiffModule,
    optim::{AdamConfig, GradientsParams, Optimizer},
    tensor::{
        backend::{AutodiffBackend, Backend},
        ElementConversion, Tensor,
    },
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::network::{Decoder, Encoder, UsadModel};
use super::scorer::window_batch;
use super::ModelDims;
use crate::data::WindowSet;
use crate::error::{Result, UsadError};

/// Epoch-dependent blend between the direct and adversarial error terms
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BlendWeights {
    pub alpha: f64,
    pub beta: f64,
}

impl BlendWeights {
    /// `alpha = 1/n`, `beta = 1 - 1/n` for 1-indexed epoch `n`
    pub fn for_epoch(epoch: usize) -> Self {
        let alpha = 1.0 / epoch.max(1) as f64;
        Self {
            alpha,
            beta: 1.0 - alpha,
        }
    }

    /// Weights at the end of an `epochs`-long run, used for scoring
    pub fn final_for(epochs: usize) -> Self {
        Self::for_epoch(epochs)
    }
}

/// Optimisation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingConfig {
    pub epochs: usize,
    pub batch_size: usize,
    pub learning_rate: f64,
    /// Backend RNG seed for weight initialisation
    pub seed: Option<u64>,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            epochs: 100,
            batch_size: 7919,
            learning_rate: 1e-3,
            seed: None,
        }
    }
}

/// Mean validation losses for one epoch
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EpochLosses {
    pub epoch: usize,
    pub alpha: f64,
    pub beta: f64,
    pub val_loss1: f32,
    pub val_loss2: f32,
}

/// Adam state of one training phase: the shared encoder and that phase's decoder
struct PhaseOptimizers<OE, OD> {
    encoder: OE,
    decoder: OD,
}

fn adam_phase<B: AutodiffBackend>(
) -> PhaseOptimizers<impl Optimizer<Encoder<B>, B>, impl Optimizer<Decoder<B>, B>> {
    let adam = AdamConfig::new();
    PhaseOptimizers {
        encoder: adam.init::<B, Encoder<B>>(),
        decoder: adam.init::<B, Decoder<B>>(),
    }
}

/// Adversarial trainer for [`UsadModel`]
#[derive(Debug)]
pub struct UsadTrainer<B: AutodiffBackend> {
    config: TrainingConfig,
    device: B::Device,
}

impl<B: AutodiffBackend> UsadTrainer<B> {
    pub fn new(config: TrainingConfig, device: B::Device) -> Self {
        Self { config, device }
    }

    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    pub fn device(&self) -> &B::Device {
        &self.device
    }

    /// Fresh model, seeding the backend first when a seed is configured.
    pub fn init_model(&self, dims: &ModelDims) -> UsadModel<B> {
        if let Some(seed) = self.config.seed {
            B::seed(seed);
        }
        UsadModel::new(dims, &self.device)
    }

    /// Train for exactly `epochs` epochs and return the model with its
    /// validation history.
    pub fn fit(
        &self,
        mut model: UsadModel<B>,
        train: &WindowSet,
        validation: &WindowSet,
    ) -> Result<(UsadModel<B>, Vec<EpochLosses>)> {
        if self.config.epochs == 0 {
            return Err(UsadError::Config("epochs must be at least 1".into()));
        }
        if train.is_empty() {
            return Err(UsadError::EmptyInput("no training windows".into()));
        }
        if validation.is_empty() {
            return Err(UsadError::EmptyInput("no validation windows".into()));
        }
        if train.dim() != model.input_dim() || validation.dim() != model.input_dim() {
            return Err(UsadError::dimension_mismatch(
                format!("window dim {}", model.input_dim()),
                format!("train {} / validation {}", train.dim(), validation.dim()),
            ));
        }

        let mut phase1 = adam_phase::<B>();
        let mut phase2 = adam_phase::<B>();

        info!(
            "Training USAD on {} windows (validation {}), {} epochs, batch size {}",
            train.len(),
            validation.len(),
            self.config.epochs,
            self.config.batch_size
        );

        let mut history = Vec::with_capacity(self.config.epochs);
        for epoch in 1..=self.config.epochs {
            let weights = BlendWeights::for_epoch(epoch);

            for (batch, range) in train.batches(self.config.batch_size).enumerate() {
                let w = window_batch::<B>(train, range, &self.device);
                model = self.step_phase1(model, w.clone(), weights, &mut phase1, (epoch, batch))?;
                model = self.step_phase2(model, w, weights, &mut phase2, (epoch, batch))?;
            }

            let (val_loss1, val_loss2) = self.validate(&model.valid(), validation, weights, epoch)?;
            info!(
                "Epoch [{}], val_loss1: {:.4}, val_loss2: {:.4}",
                epoch, val_loss1, val_loss2
            );
            history.push(EpochLosses {
                epoch,
                alpha: weights.alpha,
                beta: weights.beta,
                val_loss1,
                val_loss2,
            });
        }

        Ok((model, history))
    }

    /// Phase 1 update: `loss1` is applied to the encoder and decoder 1.
    /// Decoder 2 is returned untouched.
    fn step_phase1<OE, OD>(
        &self,
        mut model: UsadModel<B>,
        w: Tensor<B, 2>,
        weights: BlendWeights,
        optim: &mut PhaseOptimizers<OE, OD>,
        (epoch, batch): (usize, usize),
    ) -> Result<UsadModel<B>>
    where
        OE: Optimizer<Encoder<B>, B>,
        OD: Optimizer<Decoder<B>, B>,
    {
        let loss1 = model.forward(w.clone()).loss1(w, weights);
        ensure_finite(scalar(&loss1), epoch, batch, "training loss1")?;
        let mut grads = loss1.backward();
        let grads_encoder = GradientsParams::from_module(&mut grads, &model.encoder);
        let grads_decoder = GradientsParams::from_module(&mut grads, &model.decoder1);
        let lr = self.config.learning_rate;
        model.encoder = optim.encoder.step(lr, model.encoder, grads_encoder);
        model.decoder1 = optim.decoder.step(lr, model.decoder1, grads_decoder);
        Ok(model)
    }

    /// Phase 2 update on a fresh forward pass: `loss2` is applied to the
    /// encoder and decoder 2. Decoder 1 is returned untouched.
    fn step_phase2<OE, OD>(
        &self,
        mut model: UsadModel<B>,
        w: Tensor<B, 2>,
        weights: BlendWeights,
        optim: &mut PhaseOptimizers<OE, OD>,
        (epoch, batch): (usize, usize),
    ) -> Result<UsadModel<B>>
    where
        OE: Optimizer<Encoder<B>, B>,
        OD: Optimizer<Decoder<B>, B>,
    {
        let loss2 = model.forward(w.clone()).loss2(w, weights);
        ensure_finite(scalar(&loss2), epoch, batch, "training loss2")?;
        let mut grads = loss2.backward();
        let grads_encoder = GradientsParams::from_module(&mut grads, &model.encoder);
        let grads_decoder = GradientsParams::from_module(&mut grads, &model.decoder2);
        let lr = self.config.learning_rate;
        model.encoder = optim.encoder.step(lr, model.encoder, grads_encoder);
        model.decoder2 = optim.decoder.step(lr, model.decoder2, grads_decoder);
        Ok(model)
    }

    /// Mean of the per-batch losses over the validation windows, without
    /// parameter updates.
    fn validate(
        &self,
        model: &UsadModel<B::InnerBackend>,
        validation: &WindowSet,
        weights: BlendWeights,
        epoch: usize,
    ) -> Result<(f32, f32)> {
        let mut sum1 = 0.0f64;
        let mut sum2 = 0.0f64;
        let mut batches = 0usize;

        for (batch, range) in validation.batches(self.config.batch_size).enumerate() {
            let w = window_batch::<B::InnerBackend>(validation, range, &self.device);
            let out = model.forward(w.clone());
            let loss1 = scalar(&out.loss1(w.clone(), weights));
            let loss2 = scalar(&out.loss2(w, weights));
            ensure_finite(loss1, epoch, batch, "validation loss1")?;
            ensure_finite(loss2, epoch, batch, "validation loss2")?;
            sum1 += loss1 as f64;
            sum2 += loss2 as f64;
            batches += 1;
        }

        debug!("Validated epoch {} over {} batches", epoch, batches);
        Ok(((sum1 / batches as f64) as f32, (sum2 / batches as f64) as f32))
    }
}

fn scalar<B: Backend>(loss: &Tensor<B, 1>) -> f32 {
    loss.clone().into_scalar().elem::<f32>()
}

fn ensure_finite(value: f32, epoch: usize, batch: usize, phase: &str) -> Result<()> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(UsadError::NumericInstability {
            epoch,
            batch,
            phase: phase.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::synthetic::{SensorGenerator, SyntheticConfig};
    use crate::data::MinMaxScaler;
    use crate::ml::usad::{InferenceBackend, TrainBackend};
    use burn::module::Module;
    use burn::record::{BinBytesRecorder, FullPrecisionSettings, Recorder};

    type B = TrainBackend;

    /// Mean decoder 1 reconstruction error over `windows`
    fn reconstruction_mse<I: Backend>(
        model: &UsadModel<I>,
        windows: &WindowSet,
        device: &I::Device,
    ) -> f32 {
        let w = window_batch::<I>(windows, 0..windows.len(), device);
        let w1 = model.decoder1.forward(model.encoder.forward(w.clone()));
        scalar(&crate::ml::usad::network::mse(w, w1))
    }

    fn periodic_windows(length: usize, window_size: usize) -> WindowSet {
        let config = SyntheticConfig {
            features: 2,
            normal_length: length,
            period: 16.0,
            noise: 0.01,
            ..Default::default()
        };
        let series = SensorGenerator::new(config).normal().unwrap();
        let scaled = MinMaxScaler::fitted(&series).unwrap().transform(&series).unwrap();
        WindowSet::from_series(&scaled, window_size).unwrap()
    }

    fn trainer(epochs: usize) -> UsadTrainer<B> {
        let config = TrainingConfig {
            epochs,
            batch_size: 32,
            learning_rate: 5e-3,
            seed: Some(3),
        };
        UsadTrainer::new(config, Default::default())
    }

    #[test]
    fn test_blend_weights_exact() {
        assert_eq!(BlendWeights::for_epoch(1), BlendWeights { alpha: 1.0, beta: 0.0 });
        assert_eq!(BlendWeights::for_epoch(2), BlendWeights { alpha: 0.5, beta: 0.5 });
        assert_eq!(BlendWeights::for_epoch(4), BlendWeights { alpha: 0.25, beta: 0.75 });
        assert_eq!(BlendWeights::final_for(100).alpha, 0.01);
    }

    #[test]
    fn test_history_records_epoch_weights() {
        let windows = periodic_windows(120, 4);
        let trainer = trainer(2);
        let model = trainer.init_model(&ModelDims::new(4, 2, 2).unwrap());
        let (_, history) = trainer.fit(model, &windows, &windows.slice(0..16)).unwrap();

        assert_eq!(history.len(), 2);
        assert_eq!(history[0].epoch, 1);
        assert_eq!((history[0].alpha, history[0].beta), (1.0, 0.0));
        assert_eq!((history[1].alpha, history[1].beta), (0.5, 0.5));
        assert!(history.iter().all(|h| h.val_loss1.is_finite() && h.val_loss2.is_finite()));
    }

    #[test]
    fn test_single_epoch_uses_direct_term_only() {
        let windows = periodic_windows(80, 4);
        let trainer = trainer(1);
        let model = trainer.init_model(&ModelDims::new(4, 2, 2).unwrap());
        let (_, history) = trainer.fit(model, &windows, &windows.slice(0..16)).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].alpha, 1.0);
        assert_eq!(history[0].beta, 0.0);
    }

    #[test]
    fn test_training_reduces_reconstruction_error() {
        let windows = periodic_windows(400, 4);
        let trainer = UsadTrainer::<B>::new(
            TrainingConfig {
                epochs: 4,
                batch_size: 16,
                learning_rate: 5e-3,
                seed: Some(3),
            },
            Default::default(),
        );
        let model = trainer.init_model(&ModelDims::new(4, 2, 2).unwrap());
        let device = Default::default();
        let before = reconstruction_mse(&model.valid(), &windows, &device);
        let (model, _) = trainer.fit(model, &windows, &windows.slice(0..32)).unwrap();
        let after = reconstruction_mse(&model.valid(), &windows, &device);
        assert!(after < before, "error went from {} to {}", before, after);
    }

    /// Serialised parameters of a module, for before/after comparison
    fn param_bytes<M: Module<InferenceBackend>>(module: M) -> Vec<u8> {
        let recorder = BinBytesRecorder::<FullPrecisionSettings>::default();
        <BinBytesRecorder<FullPrecisionSettings> as Recorder<InferenceBackend>>::record(
            &recorder,
            module.into_record(),
            (),
        )
        .unwrap()
    }

    fn snapshot(model: &UsadModel<B>) -> [Vec<u8>; 3] {
        [
            param_bytes(model.encoder.valid()),
            param_bytes(model.decoder1.valid()),
            param_bytes(model.decoder2.valid()),
        ]
    }

    #[test]
    fn test_phase1_leaves_decoder2_untouched() {
        let windows = periodic_windows(80, 4);
        let trainer = trainer(1);
        let model = trainer.init_model(&ModelDims::new(4, 2, 2).unwrap());
        let [encoder, decoder1, decoder2] = snapshot(&model);

        let w = window_batch::<B>(&windows, 0..32, trainer.device());
        let mut optim = adam_phase::<B>();
        let model = trainer
            .step_phase1(model, w, BlendWeights::for_epoch(2), &mut optim, (2, 0))
            .unwrap();

        let [encoder_after, decoder1_after, decoder2_after] = snapshot(&model);
        assert_ne!(encoder, encoder_after);
        assert_ne!(decoder1, decoder1_after);
        assert_eq!(decoder2, decoder2_after);
    }

    #[test]
    fn test_phase2_leaves_decoder1_untouched() {
        let windows = periodic_windows(80, 4);
        let trainer = trainer(1);
        let model = trainer.init_model(&ModelDims::new(4, 2, 2).unwrap());
        let [encoder, decoder1, decoder2] = snapshot(&model);

        let w = window_batch::<B>(&windows, 0..32, trainer.device());
        let mut optim = adam_phase::<B>();
        let model = trainer
            .step_phase2(model, w, BlendWeights::for_epoch(2), &mut optim, (2, 0))
            .unwrap();

        let [encoder_after, decoder1_after, decoder2_after] = snapshot(&model);
        assert_ne!(encoder, encoder_after);
        assert_eq!(decoder1, decoder1_after);
        assert_ne!(decoder2, decoder2_after);
    }

    #[test]
    fn test_non_finite_input_fails_fast() {
        let mut values = periodic_windows(60, 4).values().to_vec();
        values[3] = f32::NAN;
        let windows = WindowSet::from_flat(values, 4, 2).unwrap();
        let trainer = trainer(3);
        let model = trainer.init_model(&ModelDims::new(4, 2, 2).unwrap());
        let err = trainer.fit(model, &windows, &windows.slice(0..8)).unwrap_err();
        match err {
            UsadError::NumericInstability { epoch, batch, phase } => {
                assert_eq!(epoch, 1);
                assert_eq!(batch, 0);
                assert_eq!(phase, "training loss1");
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_dimension_mismatch_rejected() {
        let windows = periodic_windows(60, 4);
        let trainer = trainer(1);
        let model = trainer.init_model(&ModelDims::new(5, 2, 2).unwrap());
        let err = trainer.fit(model, &windows, &windows).unwrap_err();
        assert!(matches!(err, UsadError::DimensionMismatch { .. }));
    }

    #[test]
    fn test_empty_validation_rejected() {
        let windows = periodic_windows(60, 4);
        let trainer = trainer(1);
        let model = trainer.init_model(&ModelDims::new(4, 2, 2).unwrap());
        let empty = WindowSet::empty(4, 2);
        assert!(trainer.fit(model, &windows, &empty).is_err());
    }
}
