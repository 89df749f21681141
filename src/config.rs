use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::data::{IngestOptions, SplitFractions};
use crate::error::UsadError;
use crate::evaluation::{BoundaryPolicy, ReportFormat, ThresholdMethod};
use crate::ml::TrainingConfig;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub data: DataConfig,

    #[serde(default)]
    pub model: ModelConfig,

    #[serde(default)]
    pub training: TrainingSettings,

    #[serde(default)]
    pub evaluation: EvaluationConfig,

    #[serde(default)]
    pub output: OutputConfig,
}

/// How attack windows are labelled
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum AttackLabeling {
    /// Every attack window is an anomaly
    #[default]
    Segment,
    /// A window is an anomaly when any of its rows is labelled attack
    Column,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    /// Normal operation capture
    #[serde(skip_serializing_if = "Option::is_none")]
    pub normal_path: Option<PathBuf>,
    /// Attack capture
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attack_path: Option<PathBuf>,
    pub normal_delimiter: char,
    pub attack_delimiter: char,
    /// Columns removed before parsing
    pub drop_columns: Vec<String>,
    /// Per-row ground truth column
    pub label_column: String,
    pub labeling: AttackLabeling,
    /// Read at most this many rows per file
    #[serde(skip_serializing_if = "Option::is_none")]
    pub row_limit: Option<usize>,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            normal_path: None,
            attack_path: None,
            normal_delimiter: ',',
            attack_delimiter: ';',
            drop_columns: vec!["Timestamp".to_string(), "Normal/Attack".to_string()],
            label_column: "Normal/Attack".to_string(),
            labeling: AttackLabeling::Segment,
            row_limit: None,
        }
    }
}

impl DataConfig {
    fn options(&self, delimiter: char) -> IngestOptions {
        IngestOptions {
            delimiter,
            drop_columns: self.drop_columns.clone(),
            label_column: Some(self.label_column.clone()),
            row_limit: self.row_limit,
        }
    }

    pub fn normal_options(&self) -> IngestOptions {
        self.options(self.normal_delimiter)
    }

    pub fn attack_options(&self) -> IngestOptions {
        self.options(self.attack_delimiter)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Timestamps per window
    pub window_size: usize,
    /// Latent units per timestamp
    pub hidden_size: usize,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            window_size: 12,
            hidden_size: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingSettings {
    pub batch_size: usize,
    pub epochs: usize,
    pub learning_rate: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    /// Share of normal windows used for training
    pub train_fraction: f64,
    /// Share of normal windows used for validation
    pub validation_fraction: f64,
}

impl Default for TrainingSettings {
    fn default() -> Self {
        let split = SplitFractions::default();
        let training = TrainingConfig::default();
        Self {
            batch_size: training.batch_size,
            epochs: training.epochs,
            learning_rate: training.learning_rate,
            seed: None,
            train_fraction: split.train,
            validation_fraction: split.validation,
        }
    }
}

impl TrainingSettings {
    pub fn training_config(&self) -> TrainingConfig {
        TrainingConfig {
            epochs: self.epochs,
            batch_size: self.batch_size,
            learning_rate: self.learning_rate,
            seed: self.seed,
        }
    }

    pub fn split(&self) -> SplitFractions {
        SplitFractions {
            train: self.train_fraction,
            validation: self.validation_fraction,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluationConfig {
    /// Point adjustment slack in windows
    pub slack: usize,
    pub threshold: ThresholdMethod,
    pub boundary: BoundaryPolicy,
    pub report_format: ReportFormat,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            slack: 5,
            threshold: ThresholdMethod::Youden,
            boundary: BoundaryPolicy::Clip,
            report_format: ReportFormat::Text,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub checkpoint: PathBuf,
    /// Per-epoch validation losses as JSON
    #[serde(skip_serializing_if = "Option::is_none")]
    pub history: Option<PathBuf>,
    /// Report file; printed to stdout when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<PathBuf>,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            checkpoint: PathBuf::from("model.usad"),
            history: Some(PathBuf::from("history.json")),
            report: None,
        }
    }
}

impl Config {
    /// Load configuration from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.as_ref().display()))?;

        Ok(config)
    }

    /// Load config from default locations or create default
    pub fn load_or_default() -> Result<Self> {
        let paths = [
            PathBuf::from("usadmon.toml"),
            dirs_next::config_dir()
                .map(|p| p.join("usadmon/config.toml"))
                .unwrap_or_default(),
        ];

        for path in &paths {
            if path.is_file() {
                return Self::load(path);
            }
        }

        Ok(Self::default())
    }

    /// Save configuration to file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(&path, content)
            .with_context(|| format!("Failed to write config file: {}", path.as_ref().display()))?;
        Ok(())
    }

    /// Reject settings no run can succeed with.
    pub fn validate(&self) -> crate::error::Result<()> {
        let positive = [
            ("model.window_size", self.model.window_size),
            ("model.hidden_size", self.model.hidden_size),
            ("training.batch_size", self.training.batch_size),
            ("training.epochs", self.training.epochs),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(UsadError::Config(format!("{} must be at least 1", name)));
            }
        }
        let lr = self.training.learning_rate;
        if !lr.is_finite() || lr <= 0.0 {
            return Err(UsadError::Config(format!(
                "training.learning_rate must be positive, got {}",
                lr
            )));
        }
        if self.data.normal_delimiter == '.' || self.data.attack_delimiter == '.' {
            return Err(UsadError::Config("'.' cannot be a field delimiter".into()));
        }
        self.training.split().validate()
    }
}
