//! Machine learning for sensor anomaly detection
//!
//! The USAD model (shared encoder, two adversarial decoders), its trainer and
//! scorer, and checkpoint persistence.
//!
//! ```text
//! WindowSet -> UsadTrainer (normal windows) -> UsadModel -> Checkpoint
//!                                                  |
//!                               score_windows -> Vec<f32> scores
//! ```

pub mod storage;
pub mod usad;

pub use storage::Checkpoint;
pub use usad::{
    score_windows, BlendWeights, EpochLosses, InferenceBackend, ModelDims, ScoreSummary,
    TrainBackend, TrainingConfig, UsadModel, UsadTrainer,
};
