use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use tabled::{Table, Tabled};

use usadmon::config::{AttackLabeling, Config, TrainingSettings};
use usadmon::data::synthetic::{AttackShape, SyntheticConfig};
use usadmon::evaluation::{BoundaryPolicy, EvaluationReport, ReportFormat, ThresholdMethod};
use usadmon::ml::EpochLosses;
use usadmon::pipeline::{EvaluationOutcome, Pipeline};

const DEMO_EPOCHS: usize = 20;
const DEMO_BATCH_SIZE: usize = 256;

#[derive(Parser)]
#[command(name = "usadmon")]
#[command(author, version, about = "USAD anomaly detection for multivariate sensor time series")]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Train, checkpoint, reload and evaluate
    Run {
        #[command(flatten)]
        input: InputArgs,

        #[command(flatten)]
        overrides: Overrides,
    },

    /// Train and write the checkpoint only
    Train {
        #[command(flatten)]
        input: InputArgs,

        #[command(flatten)]
        overrides: Overrides,
    },

    /// Evaluate an existing checkpoint
    Evaluate {
        #[command(flatten)]
        input: InputArgs,

        #[command(flatten)]
        overrides: Overrides,
    },

    /// Full run on generated sensor data. With segment labeling the attack
    /// capture is offset throughout, with column labeling it carries bursts.
    Demo {
        /// Sensor columns to generate
        #[arg(long, default_value = "4")]
        features: usize,

        /// Generator seed
        #[arg(long, default_value = "42")]
        data_seed: u64,

        #[command(flatten)]
        overrides: Overrides,
    },

    /// Generate default configuration file
    GenConfig {
        /// Output path (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[derive(Args)]
pub struct InputArgs {
    /// Normal operation CSV
    #[arg(long)]
    pub normal: Option<PathBuf>,

    /// Attack CSV
    #[arg(long)]
    pub attack: Option<PathBuf>,

    /// Read at most this many rows per file
    #[arg(long)]
    pub rows: Option<usize>,
}

#[derive(Args)]
pub struct Overrides {
    /// Timestamps per window
    #[arg(short, long)]
    pub window: Option<usize>,

    /// Latent units per timestamp
    #[arg(long)]
    pub hidden: Option<usize>,

    #[arg(short, long)]
    pub epochs: Option<usize>,

    #[arg(short, long)]
    pub batch_size: Option<usize>,

    #[arg(long)]
    pub learning_rate: Option<f64>,

    /// Weight initialisation seed
    #[arg(long)]
    pub seed: Option<u64>,

    /// Point adjustment slack
    #[arg(short, long)]
    pub slack: Option<usize>,

    #[arg(short, long, value_enum)]
    pub threshold: Option<ThresholdMethod>,

    #[arg(long, value_enum)]
    pub boundary: Option<BoundaryPolicy>,

    #[arg(long, value_enum)]
    pub labeling: Option<AttackLabeling>,

    /// Checkpoint path
    #[arg(short = 'm', long)]
    pub model: Option<PathBuf>,

    /// Write the report here instead of printing it
    #[arg(short, long)]
    pub report: Option<PathBuf>,

    #[arg(short, long, value_enum)]
    pub format: Option<ReportFormat>,
}

impl InputArgs {
    fn apply(&self, config: &mut Config) {
        if let Some(path) = &self.normal {
            config.data.normal_path = Some(path.clone());
        }
        if let Some(path) = &self.attack {
            config.data.attack_path = Some(path.clone());
        }
        if self.rows.is_some() {
            config.data.row_limit = self.rows;
        }
    }
}

impl Overrides {
    fn apply(&self, config: &mut Config) {
        if let Some(v) = self.window {
            config.model.window_size = v;
        }
        if let Some(v) = self.hidden {
            config.model.hidden_size = v;
        }
        if let Some(v) = self.epochs {
            config.training.epochs = v;
        }
        if let Some(v) = self.batch_size {
            config.training.batch_size = v;
        }
        if let Some(v) = self.learning_rate {
            config.training.learning_rate = v;
        }
        if self.seed.is_some() {
            config.training.seed = self.seed;
        }
        if let Some(v) = self.slack {
            config.evaluation.slack = v;
        }
        if let Some(v) = self.threshold {
            config.evaluation.threshold = v;
        }
        if let Some(v) = self.boundary {
            config.evaluation.boundary = v;
        }
        if let Some(v) = self.labeling {
            config.data.labeling = v;
        }
        if let Some(path) = &self.model {
            config.output.checkpoint = path.clone();
        }
        if self.report.is_some() {
            config.output.report = self.report.clone();
        }
        if let Some(v) = self.format {
            config.evaluation.report_format = v;
        }
    }
}

/// Table row for the loss history
#[derive(Tabled)]
struct EpochRow {
    #[tabled(rename = "Epoch")]
    epoch: usize,
    #[tabled(rename = "Alpha")]
    alpha: String,
    #[tabled(rename = "Val Loss1")]
    loss1: String,
    #[tabled(rename = "Val Loss2")]
    loss2: String,
}

/// Table row for original vs adjusted metrics
#[derive(Tabled)]
struct MetricsRow {
    #[tabled(rename = "Predictions")]
    name: String,
    #[tabled(rename = "Accuracy")]
    accuracy: String,
    #[tabled(rename = "Precision")]
    precision: String,
    #[tabled(rename = "Recall")]
    recall: String,
    #[tabled(rename = "AUC")]
    auc: String,
    #[tabled(rename = "F1")]
    f1: String,
    #[tabled(rename = "TN")]
    true_negatives: String,
    #[tabled(rename = "FP")]
    false_positives: String,
    #[tabled(rename = "FN")]
    false_negatives: String,
    #[tabled(rename = "TP")]
    true_positives: String,
}

pub fn run_command(cli: Cli) -> Result<()> {
    let config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::load_or_default()?,
    };

    match cli.command {
        Commands::Run { input, overrides } => cmd_run(config, input, overrides),
        Commands::Train { input, overrides } => cmd_train(config, input, overrides),
        Commands::Evaluate { input, overrides } => cmd_evaluate(config, input, overrides),
        Commands::Demo {
            features,
            data_seed,
            overrides,
        } => cmd_demo(config, features, data_seed, overrides),
        Commands::GenConfig { output } => cmd_gen_config(output),
    }
}

fn cmd_run(mut config: Config, input: InputArgs, overrides: Overrides) -> Result<()> {
    input.apply(&mut config);
    overrides.apply(&mut config);
    let pipeline = Pipeline::new(config)?;

    let outcome = pipeline.run()?;
    print_history(&outcome.history);
    println!(
        "{} {}",
        "Checkpoint:".green().bold(),
        outcome.checkpoint_path.display()
    );
    print_evaluation(pipeline.config(), &outcome.evaluation)
}

fn cmd_train(mut config: Config, input: InputArgs, overrides: Overrides) -> Result<()> {
    input.apply(&mut config);
    overrides.apply(&mut config);
    let pipeline = Pipeline::new(config)?;

    let run = pipeline.train_only()?;
    print_history(&run.history);
    println!(
        "{} {} ({})",
        "Checkpoint:".green().bold(),
        pipeline.config().output.checkpoint.display(),
        run.checkpoint.dims
    );
    Ok(())
}

fn cmd_evaluate(mut config: Config, input: InputArgs, overrides: Overrides) -> Result<()> {
    input.apply(&mut config);
    overrides.apply(&mut config);
    let checkpoint = config.output.checkpoint.clone();
    if !checkpoint.is_file() {
        anyhow::bail!("No checkpoint at {}", checkpoint.display());
    }
    let pipeline = Pipeline::new(config)?;

    let outcome = pipeline
        .evaluate_checkpoint(&checkpoint)
        .with_context(|| format!("Evaluating {}", checkpoint.display()))?;
    print_evaluation(pipeline.config(), &outcome)
}

/// Shorter demo training for settings the config file left at their defaults
fn apply_demo_defaults(config: &mut Config, data_seed: u64) {
    let defaults = TrainingSettings::default();
    if config.training.epochs == defaults.epochs {
        config.training.epochs = DEMO_EPOCHS;
    }
    if config.training.batch_size == defaults.batch_size {
        config.training.batch_size = DEMO_BATCH_SIZE;
    }
    if config.training.seed.is_none() {
        config.training.seed = Some(data_seed);
    }
}

/// Generated attack shape that matches how attack windows are labeled:
/// per-row labels can mark bursts, segment labels need the whole capture
/// to be anomalous.
fn demo_attack_shape(labeling: AttackLabeling) -> AttackShape {
    match labeling {
        AttackLabeling::Column => AttackShape::Bursts,
        AttackLabeling::Segment => AttackShape::Sustained,
    }
}

fn cmd_demo(mut config: Config, features: usize, data_seed: u64, overrides: Overrides) -> Result<()> {
    apply_demo_defaults(&mut config, data_seed);
    overrides.apply(&mut config);

    let synthetic = SyntheticConfig {
        features,
        shape: demo_attack_shape(config.data.labeling),
        seed: data_seed,
        ..SyntheticConfig::default()
    };
    println!(
        "{} {} features, {} normal / {} attack rows",
        "Generating:".cyan().bold(),
        synthetic.features,
        synthetic.normal_length,
        synthetic.attack_length
    );

    let pipeline = Pipeline::new(config)?;
    let outcome = pipeline.run_synthetic(synthetic)?;
    print_history(&outcome.history);
    print_evaluation(pipeline.config(), &outcome.evaluation)
}

fn cmd_gen_config(output: Option<PathBuf>) -> Result<()> {
    let config = Config::default();
    let toml_str = toml::to_string_pretty(&config)?;

    match output {
        Some(path) => {
            std::fs::write(&path, &toml_str)?;
            println!("Configuration written to {}", path.display());
        }
        None => {
            println!("{}", toml_str);
        }
    }

    Ok(())
}

fn print_history(history: &[EpochLosses]) {
    if history.is_empty() {
        return;
    }
    // Long runs: first and last five epochs
    let rows: Vec<EpochRow> = history
        .iter()
        .enumerate()
        .filter(|(i, _)| history.len() <= 10 || *i < 5 || *i >= history.len() - 5)
        .map(|(_, h)| EpochRow {
            epoch: h.epoch,
            alpha: format!("{:.3}", h.alpha),
            loss1: format!("{:.6}", h.val_loss1),
            loss2: format!("{:.6}", h.val_loss2),
        })
        .collect();

    println!("\n{}", "Validation Losses".bold());
    println!("{}", Table::new(rows));
}

fn print_evaluation(config: &Config, outcome: &EvaluationOutcome) -> Result<()> {
    let report = &outcome.report;

    println!("\n{}", "Scores".bold());
    println!(
        "  Normal test: mean={:.6} std={:.6} max={:.6}",
        outcome.normal_scores.mean,
        outcome.normal_scores.std(),
        outcome.normal_scores.max
    );
    println!(
        "  Attack:      mean={:.6} std={:.6} min={:.6}",
        outcome.attack_scores.mean,
        outcome.attack_scores.std(),
        outcome.attack_scores.min
    );
    println!(
        "  Threshold:   {} ({}, score AUC {:.4})",
        format!("{:.6}", report.threshold).yellow(),
        report.method,
        report.score_auc
    );

    println!("\n{}", "Metrics".bold());
    println!("{}", Table::new(metric_rows(report)));
    println!("{}", report.note.dimmed());

    match &config.output.report {
        Some(path) => println!(
            "\n{} {}",
            "Report written to".green().bold(),
            path.display()
        ),
        None if config.evaluation.report_format != ReportFormat::Text => {
            println!("\n{}", report.render(config.evaluation.report_format)?);
        }
        None => {}
    }
    Ok(())
}

/// Metrics per prediction set, with confusion counts and their share of the
/// true class (`TN`/`FP` of label 0, `FN`/`TP` of label 1)
fn metric_rows(report: &EvaluationReport) -> Vec<MetricsRow> {
    [("original", &report.original), ("adjusted", &report.adjusted)]
        .into_iter()
        .map(|(name, eval)| {
            let counts = eval.confusion.counts();
            let percent = eval.confusion.percentages();
            let cell = |row: usize, col: usize| format!("{} ({:.1}%)", counts[row][col], percent[row][col]);
            MetricsRow {
                name: name.to_string(),
                accuracy: format!("{:.4}", eval.accuracy),
                precision: format!("{:.4}", eval.precision),
                recall: format!("{:.4}", eval.recall),
                auc: format!("{:.4}", eval.auc),
                f1: format!("{:.4}", eval.f1),
                true_negatives: cell(0, 0),
                false_positives: cell(0, 1),
                false_negatives: cell(1, 0),
                true_positives: cell(1, 1),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use usadmon::evaluation::{select_threshold, Evaluation, TestSetSummary};

    fn report() -> EvaluationReport {
        let labels = [0, 0, 0, 1, 1, 1];
        let scores = [0.1, 0.2, 0.6, 0.9, 0.8, 0.3];
        let selection = select_threshold(&scores, &labels, ThresholdMethod::Youden).unwrap();
        let original = Evaluation::compute(&labels, &[0, 0, 1, 1, 1, 0]).unwrap();
        let adjusted = Evaluation::compute(&labels, &labels).unwrap();
        let test_set = TestSetSummary {
            normal_windows: 3,
            attack_windows: 3,
            anomalous_windows: 3,
        };
        EvaluationReport::new(&selection, 5, BoundaryPolicy::Clip, test_set, original, adjusted)
    }

    #[test]
    fn test_metric_rows_show_confusion_counts() {
        let rows = metric_rows(&report());
        assert_eq!(rows.len(), 2);

        let original = &rows[0];
        assert_eq!(original.name, "original");
        assert_eq!(original.true_negatives, "2 (66.7%)");
        assert_eq!(original.false_positives, "1 (33.3%)");
        assert_eq!(original.false_negatives, "1 (33.3%)");
        assert_eq!(original.true_positives, "2 (66.7%)");

        let adjusted = &rows[1];
        assert_eq!(adjusted.true_negatives, "3 (100.0%)");
        assert_eq!(adjusted.false_positives, "0 (0.0%)");
        assert_eq!(adjusted.true_positives, "3 (100.0%)");

        let table = Table::new(rows).to_string();
        assert!(table.contains("TN") && table.contains("TP"));
    }

    #[test]
    fn test_demo_defaults_fill_untouched_settings() {
        let mut config = Config::default();
        apply_demo_defaults(&mut config, 9);
        assert_eq!(config.training.epochs, DEMO_EPOCHS);
        assert_eq!(config.training.batch_size, DEMO_BATCH_SIZE);
        assert_eq!(config.training.seed, Some(9));
        assert_eq!(config.data.labeling, AttackLabeling::Segment);
    }

    #[test]
    fn test_demo_defaults_keep_configured_settings() {
        let mut config = Config::default();
        config.training.epochs = 7;
        config.training.batch_size = 64;
        config.training.seed = Some(1);
        config.data.labeling = AttackLabeling::Column;
        apply_demo_defaults(&mut config, 9);
        assert_eq!(config.training.epochs, 7);
        assert_eq!(config.training.batch_size, 64);
        assert_eq!(config.training.seed, Some(1));
        assert_eq!(config.data.labeling, AttackLabeling::Column);
        assert_eq!(demo_attack_shape(config.data.labeling), AttackShape::Bursts);
    }

    #[test]
    fn test_demo_segment_labeling_uses_sustained_attack() {
        assert_eq!(demo_attack_shape(AttackLabeling::Segment), AttackShape::Sustained);
    }
}
