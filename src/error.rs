//! Error types for the USAD detection pipeline.
//!
//! Every failure is fatal to a run. Pipeline code wraps errors with the
//! [`Stage`] that produced them so the diagnostic names where the run stopped.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Pipeline stage used to attribute failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Stage {
    Ingestion,
    Scaling,
    Windowing,
    Training,
    Checkpoint,
    Scoring,
    ThresholdSelection,
    Adjustment,
    Reporting,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Ingestion => "ingestion",
            Stage::Scaling => "scaling",
            Stage::Windowing => "windowing",
            Stage::Training => "training",
            Stage::Checkpoint => "checkpoint",
            Stage::Scoring => "scoring",
            Stage::ThresholdSelection => "threshold selection",
            Stage::Adjustment => "adjustment",
            Stage::Reporting => "reporting",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum UsadError {
    /// Malformed or non-numeric field, or mismatched feature columns.
    #[error("data format error: {0}")]
    DataFormat(String),

    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: String, actual: String },

    #[error("non-finite {phase} at epoch {epoch}, batch {batch}")]
    NumericInstability {
        epoch: usize,
        batch: usize,
        phase: String,
    },

    #[error("slack window of {slack} at index {index} exceeds sequence of length {len}")]
    IndexBoundary {
        index: usize,
        slack: usize,
        len: usize,
    },

    #[error("empty input: {0}")]
    EmptyInput(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("checkpoint error: {0}")]
    Checkpoint(String),

    /// Report or history could not be encoded as JSON.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error on {path}: {source}")]
    File {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{stage} failed: {source}")]
    Stage {
        stage: Stage,
        #[source]
        source: Box<UsadError>,
    },
}

pub type Result<T> = std::result::Result<T, UsadError>;

impl UsadError {
    pub fn data_format(reason: impl Into<String>) -> Self {
        Self::DataFormat(reason.into())
    }

    pub fn dimension_mismatch(expected: impl fmt::Display, actual: impl fmt::Display) -> Self {
        Self::DimensionMismatch {
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }

    pub fn file(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::File {
            path: path.into(),
            source,
        }
    }

    /// Stage the error is attributed to, if any.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Self::Stage { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    /// Innermost error, skipping stage attribution.
    pub fn root(&self) -> &UsadError {
        match self {
            Self::Stage { source, .. } => source.root(),
            other => other,
        }
    }
}

/// Attach a [`Stage`] to a fallible result.
///
/// An error already attributed to a stage keeps its original attribution.
pub trait StageExt<T> {
    fn stage(self, stage: Stage) -> Result<T>;
}

impl<T> StageExt<T> for Result<T> {
    fn stage(self, stage: Stage) -> Result<T> {
        self.map_err(|err| match err {
            attributed @ UsadError::Stage { .. } => attributed,
            other => UsadError::Stage {
                stage,
                source: Box::new(other),
            },
        })
    }
}
