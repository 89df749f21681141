//! Detection evaluation
//!
//! Turns raw window scores into a report:
//!
//! ```text
//! scores -> RocCurve -> threshold -> predictions -> Evaluation (original)
//!                                        |
//!                                adjust_predictions -> Evaluation (adjusted)
//! ```

pub mod adjust;
pub mod metrics;
pub mod report;
pub mod threshold;

pub use adjust::{adjust_predictions, BoundaryPolicy};
pub use metrics::{ConfusionMatrix, Evaluation};
pub use report::{EvaluationReport, ReportFormat, TestSetSummary, ADJUSTMENT_NOTE};
pub use threshold::{
    predict, select_threshold, BreakEven, ClosestToCorner, EqualError, RocCurve, RocPoint,
    ThresholdMethod, ThresholdSelection, ThresholdStrategy, Youden,
};
