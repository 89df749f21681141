//! Threshold Selection
//!
//! Builds the ROC curve of anomaly scores against labels and picks the
//! decision threshold at the point that maximises a pluggable criterion.
//! Predictions are `score > threshold`.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::metrics::safe_ratio;
use crate::error::{Result, UsadError};

/// One operating point of the ROC curve
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RocPoint {
    /// Predictions at this point are `score > threshold`
    pub threshold: f32,
    pub fpr: f64,
    pub tpr: f64,
    pub true_positives: u64,
    pub false_positives: u64,
}

impl RocPoint {
    pub fn precision(&self) -> f64 {
        let tp = self.true_positives as f64;
        safe_ratio(tp, tp + self.false_positives as f64)
    }
}

/// ROC curve swept from the highest score down
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RocCurve {
    /// Ordered by decreasing threshold, from (0, 0) to (1, 1)
    points: Vec<RocPoint>,
    positives: u64,
    negatives: u64,
}

impl RocCurve {
    pub fn compute(scores: &[f32], labels: &[u8]) -> Result<Self> {
        if scores.len() != labels.len() {
            return Err(UsadError::dimension_mismatch(
                format!("{} labels", scores.len()),
                format!("{} labels", labels.len()),
            ));
        }
        if scores.is_empty() {
            return Err(UsadError::EmptyInput("no scores for threshold selection".into()));
        }
        if let Some(i) = scores.iter().position(|s| s.is_nan()) {
            return Err(UsadError::data_format(format!("score at index {} is NaN", i)));
        }
        if let Some(i) = labels.iter().position(|&l| l > 1) {
            return Err(UsadError::data_format(format!(
                "label {} at index {} is not binary",
                labels[i], i
            )));
        }

        let positives = labels.iter().filter(|&&l| l == 1).count() as u64;
        let negatives = labels.len() as u64 - positives;
        if positives == 0 || negatives == 0 {
            return Err(UsadError::data_format(
                "ROC needs both normal and attack labels",
            ));
        }

        let mut order: Vec<usize> = (0..scores.len()).collect();
        order.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]));

        let mut points = Vec::new();
        let (mut tp, mut fp) = (0u64, 0u64);
        let mut i = 0;
        while i < order.len() {
            let score = scores[order[i]];
            points.push(Self::point(score, tp, fp, positives, negatives));
            while i < order.len() && scores[order[i]] == score {
                if labels[order[i]] == 1 {
                    tp += 1;
                } else {
                    fp += 1;
                }
                i += 1;
            }
        }
        points.push(Self::point(f32::NEG_INFINITY, tp, fp, positives, negatives));

        Ok(Self {
            points,
            positives,
            negatives,
        })
    }

    fn point(threshold: f32, tp: u64, fp: u64, positives: u64, negatives: u64) -> RocPoint {
        RocPoint {
            threshold,
            fpr: fp as f64 / negatives as f64,
            tpr: tp as f64 / positives as f64,
            true_positives: tp,
            false_positives: fp,
        }
    }

    pub fn points(&self) -> &[RocPoint] {
        &self.points
    }

    pub fn positives(&self) -> u64 {
        self.positives
    }

    pub fn negatives(&self) -> u64 {
        self.negatives
    }

    /// Area under the curve by the trapezoid rule
    pub fn auc(&self) -> f64 {
        let mut auc = 0.0;
        for segment in self.points.windows(2) {
            let width = (segment[1].fpr - segment[0].fpr).max(0.0);
            auc += width * (segment[0].tpr + segment[1].tpr) * 0.5;
        }
        auc.clamp(0.0, 1.0)
    }
}

/// Criterion for the "knee" of the ROC curve. Higher objective wins; `None`
/// excludes a point.
pub trait ThresholdStrategy {
    fn name(&self) -> &'static str;
    fn objective(&self, point: &RocPoint) -> Option<f64>;

    /// Best point with a finite threshold. Ties keep the higher threshold.
    fn select(&self, curve: &RocCurve) -> Result<RocPoint> {
        let mut best: Option<(f64, RocPoint)> = None;
        for point in curve.points().iter().filter(|p| p.threshold.is_finite()) {
            let Some(value) = self.objective(point) else {
                continue;
            };
            let better = match &best {
                Some((current, _)) => value.partial_cmp(current) == Some(Ordering::Greater),
                None => true,
            };
            if better {
                best = Some((value, *point));
            }
        }
        best.map(|(_, point)| point).ok_or_else(|| {
            UsadError::EmptyInput(format!("no ROC point qualifies for {}", self.name()))
        })
    }
}

/// Youden's J statistic, `TPR - FPR`
#[derive(Debug, Clone, Copy, Default)]
pub struct Youden;

impl ThresholdStrategy for Youden {
    fn name(&self) -> &'static str {
        "youden"
    }

    fn objective(&self, point: &RocPoint) -> Option<f64> {
        Some(point.tpr - point.fpr)
    }
}

/// Point nearest to the perfect classifier at (FPR 0, TPR 1)
#[derive(Debug, Clone, Copy, Default)]
pub struct ClosestToCorner;

impl ThresholdStrategy for ClosestToCorner {
    fn name(&self) -> &'static str {
        "closest-to-corner"
    }

    fn objective(&self, point: &RocPoint) -> Option<f64> {
        Some(-(point.fpr.powi(2) + (1.0 - point.tpr).powi(2)).sqrt())
    }
}

/// Precision closest to recall, over points that flag at least one window
#[derive(Debug, Clone, Copy, Default)]
pub struct BreakEven;

impl ThresholdStrategy for BreakEven {
    fn name(&self) -> &'static str {
        "break-even"
    }

    fn objective(&self, point: &RocPoint) -> Option<f64> {
        if point.true_positives + point.false_positives == 0 {
            return None;
        }
        Some(-(point.precision() - point.tpr).abs())
    }
}

/// Equal error rate: false negative rate closest to false positive rate
#[derive(Debug, Clone, Copy, Default)]
pub struct EqualError;

impl ThresholdStrategy for EqualError {
    fn name(&self) -> &'static str {
        "equal-error"
    }

    fn objective(&self, point: &RocPoint) -> Option<f64> {
        Some(-(point.tpr - (1.0 - point.fpr)).abs())
    }
}

/// Configurable choice of [`ThresholdStrategy`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum ThresholdMethod {
    #[default]
    Youden,
    ClosestToCorner,
    BreakEven,
    EqualError,
}

impl ThresholdMethod {
    pub fn strategy(&self) -> &'static dyn ThresholdStrategy {
        match self {
            ThresholdMethod::Youden => &Youden,
            ThresholdMethod::ClosestToCorner => &ClosestToCorner,
            ThresholdMethod::BreakEven => &BreakEven,
            ThresholdMethod::EqualError => &EqualError,
        }
    }
}

impl fmt::Display for ThresholdMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.strategy().name())
    }
}

impl FromStr for ThresholdMethod {
    type Err = UsadError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().replace('_', "-").as_str() {
            "youden" => Ok(ThresholdMethod::Youden),
            "closest-to-corner" | "corner" => Ok(ThresholdMethod::ClosestToCorner),
            "break-even" => Ok(ThresholdMethod::BreakEven),
            "equal-error" | "eer" => Ok(ThresholdMethod::EqualError),
            other => Err(UsadError::Config(format!("unknown threshold method '{}'", other))),
        }
    }
}

/// Chosen threshold with the ROC context it came from
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThresholdSelection {
    pub threshold: f32,
    pub method: ThresholdMethod,
    pub point: RocPoint,
    /// Area under the score ROC curve
    pub score_auc: f64,
}

/// Compute the ROC curve and select a threshold with `method`.
pub fn select_threshold(
    scores: &[f32],
    labels: &[u8],
    method: ThresholdMethod,
) -> Result<ThresholdSelection> {
    let curve = RocCurve::compute(scores, labels)?;
    let point = method.strategy().select(&curve)?;
    let score_auc = curve.auc();

    debug!("ROC curve has {} points", curve.points().len());
    info!(
        "Selected threshold {:.6} by {} (TPR {:.4}, FPR {:.4}, score AUC {:.4})",
        point.threshold, method, point.tpr, point.fpr, score_auc
    );

    Ok(ThresholdSelection {
        threshold: point.threshold,
        method,
        point,
        score_auc,
    })
}

/// 1 where `score > threshold`, else 0
pub fn predict(scores: &[f32], threshold: f32) -> Vec<u8> {
    scores.iter().map(|&s| u8::from(s > threshold)).collect()
}
