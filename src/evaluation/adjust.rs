//! Neighborhood-tolerant point adjustment
//!
//! A false positive at `i` becomes correct when a true anomaly lies in
//! `y[i-s .. i+s)`; a false negative becomes correct when the detector fired
//! in `p[i-s .. i+s)` (raw predictions). This rewards temporally close
//! detections and inflates the resulting metrics, so reports always show the
//! raw metrics next to the adjusted ones.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, UsadError};

/// Treatment of slack windows that would leave the sequence
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum BoundaryPolicy {
    /// Clip the window to `[max(0, i-s), min(len, i+s))`
    #[default]
    Clip,
    /// Leave edge indices at their raw prediction
    Skip,
    /// Fail on an edge index that needs adjustment
    Strict,
}

impl fmt::Display for BoundaryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BoundaryPolicy::Clip => "clip",
            BoundaryPolicy::Skip => "skip",
            BoundaryPolicy::Strict => "strict",
        };
        f.write_str(name)
    }
}

/// Rewrite `predictions` against `labels` with slack `slack`.
///
/// Output has the same length and order as the input.
pub fn adjust_predictions(
    labels: &[u8],
    predictions: &[u8],
    slack: usize,
    policy: BoundaryPolicy,
) -> Result<Vec<u8>> {
    if labels.len() != predictions.len() {
        return Err(UsadError::dimension_mismatch(
            format!("{} predictions", labels.len()),
            format!("{} predictions", predictions.len()),
        ));
    }
    if let Some(i) = labels
        .iter()
        .zip(predictions)
        .position(|(&y, &p)| y > 1 || p > 1)
    {
        return Err(UsadError::data_format(format!(
            "non-binary label/prediction ({}, {}) at index {}",
            labels[i], predictions[i], i
        )));
    }

    let len = labels.len();
    let mut adjusted = predictions.to_vec();
    let (mut cleared, mut credited) = (0usize, 0usize);

    for i in 0..len {
        let (y, p) = (labels[i], predictions[i]);
        if y == p {
            continue;
        }

        let leaves = i < slack || i + slack > len;
        if leaves {
            match policy {
                BoundaryPolicy::Clip => {}
                BoundaryPolicy::Skip => continue,
                BoundaryPolicy::Strict => {
                    return Err(UsadError::IndexBoundary {
                        index: i,
                        slack,
                        len,
                    })
                }
            }
        }

        let window = i.saturating_sub(slack)..(i + slack).min(len);
        if p == 1 {
            if labels[window].contains(&1) {
                adjusted[i] = 0;
                cleared += 1;
            }
        } else if predictions[window].contains(&1) {
            adjusted[i] = 1;
            credited += 1;
        }
    }

    debug!(
        "Point adjustment (slack {}, {}): {} false positives cleared, {} false negatives credited",
        slack, policy, cleared, credited
    );
    Ok(adjusted)
}

#[cfg(test)]
mod tests {
    use super::*;

    const Y: [u8; 5] = [0, 1, 0, 0, 0];
    const P: [u8; 5] = [1, 0, 0, 0, 0];

    #[test]
    fn test_fixture_clip() {
        // i=0: FP, y[0..2] holds y[1]=1 -> 0. i=1: FN, p[0..3] holds p[0]=1 -> 1.
        let adjusted = adjust_predictions(&Y, &P, 2, BoundaryPolicy::Clip).unwrap();
        assert_eq!(adjusted, vec![0, 1, 0, 0, 0]);
    }

    #[test]
    fn test_fixture_skip() {
        // Both mismatches sit within 2 of the start and stay raw.
        let adjusted = adjust_predictions(&Y, &P, 2, BoundaryPolicy::Skip).unwrap();
        assert_eq!(adjusted, vec![1, 0, 0, 0, 0]);
    }

    #[test]
    fn test_fixture_strict() {
        let err = adjust_predictions(&Y, &P, 2, BoundaryPolicy::Strict).unwrap_err();
        match err {
            UsadError::IndexBoundary { index, slack, len } => {
                assert_eq!((index, slack, len), (0, 2, 5));
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_correct_predictions_untouched() {
        let y = [0, 1, 1, 0, 0, 1];
        let adjusted = adjust_predictions(&y, &y, 3, BoundaryPolicy::Strict).unwrap();
        assert_eq!(adjusted, y.to_vec());
    }

    #[test]
    fn test_window_excludes_upper_end() {
        // Anomaly at distance exactly `slack` to the right is outside [i-s, i+s).
        let y = [0, 0, 0, 0, 0, 1, 0, 0];
        let p = [0, 0, 0, 1, 0, 1, 0, 0];
        let adjusted = adjust_predictions(&y, &p, 2, BoundaryPolicy::Clip).unwrap();
        assert_eq!(adjusted, p.to_vec());

        let adjusted = adjust_predictions(&y, &p, 3, BoundaryPolicy::Clip).unwrap();
        assert_eq!(adjusted, y.to_vec());
    }

    #[test]
    fn test_false_negative_uses_raw_predictions() {
        // A credited FN must not credit its neighbour through the adjusted sequence.
        let y = [0, 1, 1, 1, 1, 0];
        let p = [1, 0, 0, 0, 0, 0];
        let adjusted = adjust_predictions(&y, &p, 2, BoundaryPolicy::Clip).unwrap();
        assert_eq!(adjusted, vec![0, 1, 1, 0, 0, 0]);
    }

    #[test]
    fn test_zero_slack_is_identity() {
        let adjusted = adjust_predictions(&Y, &P, 0, BoundaryPolicy::Strict).unwrap();
        assert_eq!(adjusted, P.to_vec());
    }

    #[test]
    fn test_length_mismatch() {
        let err = adjust_predictions(&[0, 1], &[0], 1, BoundaryPolicy::Clip).unwrap_err();
        assert!(matches!(err, UsadError::DimensionMismatch { .. }));
    }

    #[test]
    fn test_non_binary() {
        let err = adjust_predictions(&[0, 3], &[0, 1], 1, BoundaryPolicy::Clip).unwrap_err();
        assert!(matches!(err, UsadError::DataFormat(_)));
    }
}
