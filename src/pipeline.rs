//! End-to-end detection run
//!
//! ```text
//! normal CSV ─┐                      ┌─ train ──────┐
//!             ├─ scale ─ window ─ split ─ validation ─┴─ fit ─ checkpoint
//! attack CSV ─┘                      └─ test ─┐                    │
//!                     attack windows ─────────┴──── score ◄─ reload ┘
//!                                                     │
//!                  threshold ─ predict ─ adjust ─ evaluate ─ report
//! ```
//!
//! Every step is attributed to a [`Stage`] so a failure names where the run
//! stopped. The model is always scored from the checkpoint written to disk,
//! never from the in-memory training state.

use std::fs;
use std::path::{Path, PathBuf};

use burn::module::AutodiffModule;
use tracing::{debug, info, warn};

use crate::config::{AttackLabeling, Config};
use crate::data::synthetic::{SensorGenerator, SyntheticConfig};
use crate::data::{load_series, window_labels, LabeledSeries, MinMaxScaler, NormalSplit, WindowSet};
use crate::error::{Result, Stage, StageExt, UsadError};
use crate::evaluation::{
    adjust_predictions, predict, select_threshold, Evaluation, EvaluationReport, TestSetSummary,
};
use crate::ml::{
    score_windows, BlendWeights, Checkpoint, EpochLosses, InferenceBackend, ModelDims,
    ScoreSummary, TrainBackend, UsadTrainer,
};

type Device = <InferenceBackend as burn::tensor::backend::Backend>::Device;

/// Scaled, windowed and split input of one run
#[derive(Debug, Clone)]
pub struct PreparedData {
    pub dims: ModelDims,
    pub scaler: MinMaxScaler,
    pub split: NormalSplit,
    pub attack: WindowSet,
    /// One label per attack window
    pub attack_labels: Vec<u8>,
}

impl PreparedData {
    /// Held-out normal windows followed by every attack window, with labels
    /// in the same order.
    pub fn test_set(&self) -> Result<(WindowSet, Vec<u8>, TestSetSummary)> {
        let windows = self.split.test.concat(&self.attack)?;
        let mut labels = vec![0u8; self.split.test.len()];
        labels.extend_from_slice(&self.attack_labels);

        let summary = TestSetSummary {
            normal_windows: self.split.test.len(),
            attack_windows: self.attack.len(),
            anomalous_windows: self.attack_labels.iter().filter(|&&l| l == 1).count(),
        };
        Ok((windows, labels, summary))
    }
}

/// Trained model parameters and the validation history that produced them
#[derive(Debug, Clone)]
pub struct TrainedRun {
    pub checkpoint: Checkpoint,
    pub history: Vec<EpochLosses>,
}

/// Scores, labels and report of one evaluation
#[derive(Debug, Clone)]
pub struct EvaluationOutcome {
    pub scores: Vec<f32>,
    pub labels: Vec<u8>,
    pub predictions: Vec<u8>,
    pub adjusted: Vec<u8>,
    pub normal_scores: ScoreSummary,
    pub attack_scores: ScoreSummary,
    pub report: EvaluationReport,
}

/// Training followed by evaluation
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub history: Vec<EpochLosses>,
    pub checkpoint_path: PathBuf,
    pub evaluation: EvaluationOutcome,
}

pub struct Pipeline {
    config: Config,
    device: Device,
}

impl Pipeline {
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            device: Device::default(),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Load both captures and check that they carry the same features.
    pub fn ingest(&self) -> Result<(LabeledSeries, LabeledSeries)> {
        let data = &self.config.data;
        let normal_path = required_path(data.normal_path.as_deref(), "data.normal_path")?;
        let attack_path = required_path(data.attack_path.as_deref(), "data.attack_path")?;

        let loaded = (|| -> Result<_> {
            let normal = load_series(normal_path, &data.normal_options())?;
            let attack = load_series(attack_path, &data.attack_options())?;
            normal.ensure_same_features(&attack)?;
            Ok((normal, attack))
        })();
        let (normal, attack) = loaded.stage(Stage::Ingestion)?;

        info!(
            "Loaded {} normal and {} attack rows with {} features",
            normal.series.len(),
            attack.series.len(),
            normal.series.feature_count()
        );
        Ok((normal, attack))
    }

    /// Scale, window and split. A fresh scaler is fit on the normal capture
    /// unless one is supplied.
    pub fn prepare(
        &self,
        normal: &LabeledSeries,
        attack: &LabeledSeries,
        scaler: Option<MinMaxScaler>,
    ) -> Result<PreparedData> {
        let (normal_scaled, attack_scaled, scaler) = (|| -> Result<_> {
            let scaler = match scaler {
                Some(scaler) => scaler,
                None => MinMaxScaler::fitted(&normal.series)?,
            };
            let normal_scaled = scaler.transform(&normal.series)?;
            let attack_scaled = scaler.transform(&attack.series)?;
            Ok((normal_scaled, attack_scaled, scaler))
        })()
        .stage(Stage::Scaling)?;

        let model = &self.config.model;
        let prepared = (|| -> Result<_> {
            let dims = ModelDims::new(
                model.window_size,
                normal_scaled.feature_count(),
                model.hidden_size,
            )?;
            let normal_windows = WindowSet::from_series(&normal_scaled, model.window_size)?;
            let attack_windows = WindowSet::from_series(&attack_scaled, model.window_size)?;
            let split = NormalSplit::split(&normal_windows, self.config.training.split())?;
            let attack_labels = self.attack_labels(attack, attack_windows.len())?;
            Ok(PreparedData {
                dims,
                scaler,
                split,
                attack: attack_windows,
                attack_labels,
            })
        })()
        .stage(Stage::Windowing)?;

        info!(
            "Prepared {}: train={} validation={} test={} attack={}",
            prepared.dims,
            prepared.split.train.len(),
            prepared.split.validation.len(),
            prepared.split.test.len(),
            prepared.attack.len()
        );
        Ok(prepared)
    }

    fn attack_labels(&self, attack: &LabeledSeries, windows: usize) -> Result<Vec<u8>> {
        match self.config.data.labeling {
            AttackLabeling::Segment => Ok(vec![1; windows]),
            AttackLabeling::Column => {
                let rows = attack.labels.as_deref().ok_or_else(|| {
                    UsadError::data_format(format!(
                        "column labeling needs a '{}' column in the attack data",
                        self.config.data.label_column
                    ))
                })?;
                let labels = window_labels(rows, self.config.model.window_size)?;
                if labels.len() != windows {
                    return Err(UsadError::dimension_mismatch(
                        format!("{} attack labels", windows),
                        format!("{} attack labels", labels.len()),
                    ));
                }
                Ok(labels)
            }
        }
    }

    /// Fit a fresh model on the training windows.
    pub fn train(&self, data: &PreparedData) -> Result<TrainedRun> {
        let training = self.config.training.training_config();
        let epochs = training.epochs;

        let (checkpoint, history) = (|| -> Result<_> {
            let trainer = UsadTrainer::<TrainBackend>::new(training, self.device.clone());
            let model = trainer.init_model(&data.dims);
            let (model, history) =
                trainer.fit(model, &data.split.train, &data.split.validation)?;
            let checkpoint =
                Checkpoint::capture(&model.valid(), data.dims, epochs, data.scaler.clone())?;
            Ok((checkpoint, history))
        })()
        .stage(Stage::Training)?;

        if let Some(last) = history.last() {
            info!(
                "Training finished after {} epochs: val_loss1={:.4} val_loss2={:.4}",
                last.epoch, last.val_loss1, last.val_loss2
            );
        }
        Ok(TrainedRun {
            checkpoint,
            history,
        })
    }

    /// Persist the checkpoint and, when configured, the loss history.
    pub fn save(&self, run: &TrainedRun) -> Result<PathBuf> {
        let output = &self.config.output;
        (|| -> Result<_> {
            run.checkpoint.save(&output.checkpoint)?;
            if let Some(path) = &output.history {
                write_history(path, &run.history)?;
            }
            Ok(())
        })()
        .stage(Stage::Checkpoint)?;
        Ok(output.checkpoint.clone())
    }

    /// Score the test set with `checkpoint` and build the report.
    pub fn evaluate(&self, checkpoint: &Checkpoint, data: &PreparedData) -> Result<EvaluationOutcome> {
        let model = (|| -> Result<_> {
            checkpoint.dims.ensure_matches(&data.dims)?;
            checkpoint.restore::<InferenceBackend>(&self.device)
        })()
        .stage(Stage::Checkpoint)?;

        let (windows, labels, test_set) = data.test_set().stage(Stage::Scoring)?;
        let weights = BlendWeights::final_for(checkpoint.epochs);
        let scores = score_windows(
            &model,
            &windows,
            self.config.training.batch_size,
            weights,
            &self.device,
        )
        .stage(Stage::Scoring)?;

        let (normal_part, attack_part) = scores.split_at(test_set.normal_windows);
        let normal_scores = ScoreSummary::from_scores(normal_part);
        let attack_scores = ScoreSummary::from_scores(attack_part);
        debug!(
            "Score means: normal={:.6} attack={:.6}",
            normal_scores.mean, attack_scores.mean
        );

        let eval = &self.config.evaluation;
        let selection =
            select_threshold(&scores, &labels, eval.threshold).stage(Stage::ThresholdSelection)?;
        let predictions = predict(&scores, selection.threshold);

        let adjusted = adjust_predictions(&labels, &predictions, eval.slack, eval.boundary)
            .stage(Stage::Adjustment)?;

        let report = (|| -> Result<_> {
            let original = Evaluation::compute(&labels, &predictions)?;
            let adjusted_eval = Evaluation::compute(&labels, &adjusted)?;
            let report = EvaluationReport::new(
                &selection,
                eval.slack,
                eval.boundary,
                test_set,
                original,
                adjusted_eval,
            );
            if let Some(path) = &self.config.output.report {
                report.save(path, eval.report_format)?;
            }
            Ok(report)
        })()
        .stage(Stage::Reporting)?;

        info!(
            "Original F1 {:.4}, adjusted F1 {:.4} (slack {})",
            report.original.f1, report.adjusted.f1, eval.slack
        );

        Ok(EvaluationOutcome {
            scores,
            labels,
            predictions,
            adjusted,
            normal_scores,
            attack_scores,
            report,
        })
    }

    /// Train, save, reload from disk and evaluate.
    pub fn run_prepared(&self, data: &PreparedData) -> Result<RunOutcome> {
        let run = self.train(data)?;
        let checkpoint_path = self.save(&run)?;
        let checkpoint = Checkpoint::read(&checkpoint_path).stage(Stage::Checkpoint)?;
        let evaluation = self.evaluate(&checkpoint, data)?;
        Ok(RunOutcome {
            history: run.history,
            checkpoint_path,
            evaluation,
        })
    }

    /// Full run on the configured files.
    pub fn run(&self) -> Result<RunOutcome> {
        let (normal, attack) = self.ingest()?;
        let data = self.prepare(&normal, &attack, None)?;
        self.run_prepared(&data)
    }

    /// Train and save without evaluating.
    pub fn train_only(&self) -> Result<TrainedRun> {
        let (normal, attack) = self.ingest()?;
        let data = self.prepare(&normal, &attack, None)?;
        let run = self.train(&data)?;
        self.save(&run)?;
        Ok(run)
    }

    /// Evaluate a saved checkpoint on the configured files, reusing its
    /// scaler and dimensions.
    pub fn evaluate_checkpoint(&self, path: &Path) -> Result<EvaluationOutcome> {
        let checkpoint = Checkpoint::read(path).stage(Stage::Checkpoint)?;
        let dims = checkpoint.dims;

        let mut config = self.config.clone();
        if config.model.window_size != dims.window_size
            || config.model.hidden_size != dims.hidden_size
        {
            warn!(
                "Configured window/hidden size {}/{} overridden by checkpoint {}",
                config.model.window_size, config.model.hidden_size, dims
            );
            config.model.window_size = dims.window_size;
            config.model.hidden_size = dims.hidden_size;
        }
        let pipeline = Pipeline {
            config,
            device: self.device.clone(),
        };

        let (normal, attack) = pipeline.ingest()?;
        let data = pipeline.prepare(&normal, &attack, Some(checkpoint.scaler.clone()))?;
        pipeline.evaluate(&checkpoint, &data)
    }

    /// Full run on generated captures.
    pub fn run_synthetic(&self, synthetic: SyntheticConfig) -> Result<RunOutcome> {
        let mut generator = SensorGenerator::new(synthetic);
        let (normal, attack) = (|| -> Result<_> {
            let normal = LabeledSeries::unlabeled(generator.normal()?);
            let attack = generator.attack()?;
            Ok((normal, attack))
        })()
        .stage(Stage::Ingestion)?;

        info!(
            "Generated {} normal and {} attack rows",
            normal.series.len(),
            attack.series.len()
        );
        let data = self.prepare(&normal, &attack, None)?;
        self.run_prepared(&data)
    }
}

fn required_path<'a>(path: Option<&'a Path>, key: &str) -> Result<&'a Path> {
    path.ok_or_else(|| UsadError::Config(format!("{} is not set", key)))
}

/// Write the per-epoch validation losses as pretty JSON.
pub fn write_history(path: &Path, history: &[EpochLosses]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| UsadError::file(parent, e))?;
    }
    let json = serde_json::to_string_pretty(history)?;
    fs::write(path, json).map_err(|e| UsadError::file(path, e))?;
    debug!("Wrote {} epochs of history to {}", history.len(), path.display());
    Ok(())
}
