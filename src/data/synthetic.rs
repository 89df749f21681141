//! Synthetic sensor data for testing
//!
//! Generates periodic "normal" plant signals and attack captures with
//! injected constant-offset bursts (or one offset spanning the whole
//! capture), with a seedable RNG so runs repeat.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use super::{LabeledSeries, Series, WindowSet};
use crate::error::{Result, UsadError};

/// Where the attack capture departs from normal operation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttackShape {
    /// Evenly spaced offset bursts; rows between them stay normal
    #[default]
    Bursts,
    /// Every row is offset, so the whole capture is one attack
    Sustained,
}

/// Shape of the generated signals
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyntheticConfig {
    /// Number of sensor columns
    pub features: usize,
    /// Timestamps in the normal capture
    pub normal_length: usize,
    /// Timestamps in the attack capture
    pub attack_length: usize,
    /// Sine period in timestamps
    pub period: f64,
    /// Uniform noise amplitude added to every reading
    pub noise: f64,
    /// Number of anomalous bursts in the attack capture
    pub burst_count: usize,
    /// Timestamps per burst
    pub burst_length: usize,
    /// Constant added to every feature during a burst
    pub burst_offset: f64,
    pub shape: AttackShape,
    pub seed: u64,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            features: 4,
            normal_length: 2000,
            attack_length: 600,
            period: 50.0,
            noise: 0.05,
            burst_count: 3,
            burst_length: 60,
            burst_offset: 4.0,
            shape: AttackShape::Bursts,
            seed: 42,
        }
    }
}

/// Seeded generator for normal and attack captures
pub struct SensorGenerator {
    config: SyntheticConfig,
    rng: StdRng,
}

impl SensorGenerator {
    pub fn new(config: SyntheticConfig) -> Self {
        let rng = StdRng::seed_from_u64(config.seed);
        Self { config, rng }
    }

    pub fn config(&self) -> &SyntheticConfig {
        &self.config
    }

    fn columns(&self) -> Vec<String> {
        (0..self.config.features)
            .map(|i| format!("sensor_{}", i))
            .collect()
    }

    /// Reading of feature `feature` at time `t`, before noise
    fn signal(&self, t: usize, feature: usize) -> f64 {
        let phase = feature as f64 * std::f64::consts::PI / self.config.features.max(1) as f64;
        let angle = 2.0 * std::f64::consts::PI * t as f64 / self.config.period + phase;
        angle.sin() + 0.25 * (2.0 * angle).cos() * (feature % 2) as f64
    }

    fn sample(&mut self, start: usize, length: usize) -> Vec<f64> {
        let features = self.config.features;
        let noise = self.config.noise;
        let mut values = Vec::with_capacity(length * features);
        for t in start..start + length {
            for feature in 0..features {
                let jitter = if noise > 0.0 {
                    self.rng.random_range(-noise..noise)
                } else {
                    0.0
                };
                values.push(self.signal(t, feature) + jitter);
            }
        }
        values
    }

    /// Normal operation: periodic signals plus noise
    pub fn normal(&mut self) -> Result<Series> {
        if self.config.features == 0 {
            return Err(UsadError::Config("synthetic data needs at least one feature".into()));
        }
        let values = self.sample(0, self.config.normal_length);
        Series::new(self.columns(), values)
    }

    /// Attack capture continuing the same signals, with evenly spaced offset
    /// bursts or, for [`AttackShape::Sustained`], every row offset. Row labels
    /// mark the offset timestamps.
    pub fn attack(&mut self) -> Result<LabeledSeries> {
        if self.config.features == 0 {
            return Err(UsadError::Config("synthetic data needs at least one feature".into()));
        }
        let length = self.config.attack_length;
        let features = self.config.features;
        let mut values = self.sample(self.config.normal_length, length);
        let mut labels = vec![0u8; length];

        let bursts = self.config.burst_count;
        if self.config.shape == AttackShape::Sustained {
            labels.fill(1);
            for value in &mut values {
                *value += self.config.burst_offset;
            }
        } else if bursts > 0 {
            let spacing = length / bursts;
            for b in 0..bursts {
                let start = b * spacing + spacing / 4;
                let end = (start + self.config.burst_length).min(length);
                for t in start..end {
                    labels[t] = 1;
                    for value in &mut values[t * features..(t + 1) * features] {
                        *value += self.config.burst_offset;
                    }
                }
            }
        }

        Ok(LabeledSeries {
            series: Series::new(self.columns(), values)?,
            labels: Some(labels),
        })
    }
}

/// Copy of `windows` with every element shifted by a uniform draw from
/// `[low, high)`.
pub fn perturb_windows(windows: &WindowSet, low: f32, high: f32, seed: u64) -> Result<WindowSet> {
    let mut rng = StdRng::seed_from_u64(seed);
    let values = windows
        .values()
        .iter()
        .map(|&v| v + rng.random_range(low..high))
        .collect();
    WindowSet::from_flat(values, windows.window_size(), windows.feature_count())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small() -> SyntheticConfig {
        SyntheticConfig {
            features: 3,
            normal_length: 200,
            attack_length: 120,
            burst_count: 2,
            burst_length: 10,
            ..Default::default()
        }
    }

    #[test]
    fn test_normal_shape_and_range() {
        let series = SensorGenerator::new(small()).normal().unwrap();
        assert_eq!(series.len(), 200);
        assert_eq!(series.feature_count(), 3);
        assert!(series.values().iter().all(|v| v.abs() < 1.5));
    }

    #[test]
    fn test_attack_bursts_are_labeled_and_offset() {
        let attack = SensorGenerator::new(small()).attack().unwrap();
        let labels = attack.labels.unwrap();
        assert_eq!(labels.len(), 120);
        assert_eq!(labels.iter().filter(|&&l| l == 1).count(), 20);
        for (row, &label) in attack.series.rows().zip(&labels) {
            if label == 1 {
                assert!(row.iter().all(|&v| v > 2.0));
            } else {
                assert!(row.iter().all(|&v| v < 1.5));
            }
        }
    }

    #[test]
    fn test_sustained_attack_offsets_every_row() {
        let attack = SensorGenerator::new(SyntheticConfig {
            shape: AttackShape::Sustained,
            ..small()
        })
        .attack()
        .unwrap();
        let labels = attack.labels.unwrap();
        assert_eq!(labels.len(), 120);
        assert!(labels.iter().all(|&l| l == 1));
        assert!(attack.series.values().iter().all(|&v| v > 2.0));
    }

    #[test]
    fn test_same_seed_repeats() {
        let a = SensorGenerator::new(small()).normal().unwrap();
        let b = SensorGenerator::new(small()).normal().unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_perturb_shifts_every_element() {
        let series = SensorGenerator::new(small()).normal().unwrap();
        let windows = WindowSet::from_series(&series, 5).unwrap();
        let shifted = perturb_windows(&windows, 1.5, 2.5, 7).unwrap();
        for (a, b) in windows.values().iter().zip(shifted.values()) {
            let delta = b - a;
            assert!((1.499..2.501).contains(&delta));
        }
    }
}
