//! USAD anomaly detection for multivariate sensor time series.
//!
//! Normal-operation windows train an encoder with two decoders in an
//! adversarial game. Windows are scored by a blend of the two reconstruction
//! errors, a threshold is picked from the ROC curve of the scores, and the
//! predictions are evaluated both raw and after point adjustment.

pub mod config;
pub mod data;
pub mod error;
pub mod evaluation;
pub mod ml;
pub mod pipeline;

pub use config::Config;
pub use error::{Result, Stage, UsadError};
pub use pipeline::{EvaluationOutcome, Pipeline, PreparedData, RunOutcome, TrainedRun};
