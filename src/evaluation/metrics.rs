//! Classification metrics for binary anomaly predictions
//!
//! Accuracy, precision, recall, AUC, F1 and the confusion matrix of a
//! prediction sequence against ground truth. AUC here is the area under the
//! ROC of the hard 0/1 predictions, which reduces to `(TPR + TNR) / 2`.

use serde::{Deserialize, Serialize};

use crate::error::{Result, UsadError};

/// Counts of each prediction outcome
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfusionMatrix {
    pub true_negatives: u64,
    pub false_positives: u64,
    pub false_negatives: u64,
    pub true_positives: u64,
}

impl ConfusionMatrix {
    pub fn from_predictions(labels: &[u8], predictions: &[u8]) -> Result<Self> {
        if labels.len() != predictions.len() {
            return Err(UsadError::dimension_mismatch(
                format!("{} predictions", labels.len()),
                format!("{} predictions", predictions.len()),
            ));
        }
        let mut matrix = Self::default();
        for (i, (&y, &p)) in labels.iter().zip(predictions).enumerate() {
            match (y, p) {
                (0, 0) => matrix.true_negatives += 1,
                (0, 1) => matrix.false_positives += 1,
                (1, 0) => matrix.false_negatives += 1,
                (1, 1) => matrix.true_positives += 1,
                _ => {
                    return Err(UsadError::data_format(format!(
                        "non-binary label/prediction ({}, {}) at index {}",
                        y, p, i
                    )))
                }
            }
        }
        Ok(matrix)
    }

    pub fn total(&self) -> u64 {
        self.true_negatives + self.false_positives + self.false_negatives + self.true_positives
    }

    pub fn positives(&self) -> u64 {
        self.true_positives + self.false_negatives
    }

    pub fn negatives(&self) -> u64 {
        self.true_negatives + self.false_positives
    }

    /// `[[tn, fp], [fn, tp]]`, rows are true classes
    pub fn counts(&self) -> [[u64; 2]; 2] {
        [
            [self.true_negatives, self.false_positives],
            [self.false_negatives, self.true_positives],
        ]
    }

    /// Row-normalised percentages: each row sums to 100 unless the class is absent
    pub fn percentages(&self) -> [[f64; 2]; 2] {
        let row = |a: u64, b: u64| {
            let total = (a + b) as f64;
            [
                safe_ratio(a as f64, total) * 100.0,
                safe_ratio(b as f64, total) * 100.0,
            ]
        };
        [
            row(self.true_negatives, self.false_positives),
            row(self.false_negatives, self.true_positives),
        ]
    }
}

/// Metrics of one prediction sequence
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    pub accuracy: f64,
    pub precision: f64,
    pub recall: f64,
    pub auc: f64,
    pub f1: f64,
    pub confusion: ConfusionMatrix,
}

impl Evaluation {
    /// Score `predictions` against `labels`. Both classes must be present in
    /// `labels`, otherwise AUC is undefined.
    pub fn compute(labels: &[u8], predictions: &[u8]) -> Result<Self> {
        if labels.is_empty() {
            return Err(UsadError::EmptyInput("no predictions to evaluate".into()));
        }
        let confusion = ConfusionMatrix::from_predictions(labels, predictions)?;
        if confusion.positives() == 0 || confusion.negatives() == 0 {
            return Err(UsadError::data_format(
                "only one class present in labels; AUC is undefined",
            ));
        }

        let tp = confusion.true_positives as f64;
        let fp = confusion.false_positives as f64;
        let fn_ = confusion.false_negatives as f64;
        let tn = confusion.true_negatives as f64;

        let precision = safe_ratio(tp, tp + fp);
        let recall = safe_ratio(tp, tp + fn_);
        let specificity = safe_ratio(tn, tn + fp);
        let f1 = if precision + recall > 0.0 {
            2.0 * precision * recall / (precision + recall)
        } else {
            0.0
        };

        Ok(Self {
            accuracy: safe_ratio(tp + tn, confusion.total() as f64),
            precision,
            recall,
            auc: (recall + specificity) / 2.0,
            f1,
            confusion,
        })
    }
}

pub(crate) fn safe_ratio(numerator: f64, denominator: f64) -> f64 {
    if denominator > 0.0 {
        numerator / denominator
    } else {
        0.0
    }
}
