//! Robust per-channel noise and baseline estimates from the start of a recording.
//!
//! The training stretch is cut into fixed-size chunks. The baseline is the
//! median of the chunk means and the noise level is the square root of the
//! 25th percentile of the chunk variances, so a handful of chunks containing
//! artifacts or bursts do not inflate the estimate.

use crate::error::{Result, SalpaError};
use serde::{Deserialize, Serialize};

pub const CHUNK_SIZE: usize = 250;
pub const MIN_CHUNKS: usize = 5;
const VARIANCE_PERCENTILE: usize = 25;

/// Result of a noise estimate for one channel.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NoiseLevels {
    pub mean: f64,
    pub std: f64,
    pub chunks: usize,
}

/// Running sums relative to a reference value, reset at every chunk boundary.
#[derive(Debug, Clone, Default)]
struct ChunkVariance {
    reference: f64,
    sum: f64,
    sum_sq: f64,
    count: usize,
}

impl ChunkVariance {
    fn reset(&mut self, reference: f64) {
        *self = Self {
            reference,
            ..Self::default()
        };
    }

    fn add(&mut self, x: f64) {
        let d = x - self.reference;
        self.sum += d;
        self.sum_sq += d * d;
        self.count += 1;
    }

    fn mean(&self) -> f64 {
        self.reference + self.sum / self.count as f64
    }

    fn variance(&self) -> f64 {
        let n = self.count as f64;
        (self.sum_sq - self.sum * self.sum / n) / (n - 1.0)
    }
}

#[derive(Debug, Clone)]
pub struct NoiseEstimator {
    chunk_size: usize,
    current: ChunkVariance,
    means: Vec<f64>,
    variances: Vec<f64>,
}

impl Default for NoiseEstimator {
    fn default() -> Self {
        Self::new(CHUNK_SIZE)
    }
}

impl NoiseEstimator {
    pub fn new(chunk_size: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(2),
            current: ChunkVariance::default(),
            means: Vec::new(),
            variances: Vec::new(),
        }
    }

    pub fn add_sample(&mut self, x: f64) {
        self.current.add(x);
        if self.current.count == self.chunk_size {
            let mean = self.current.mean();
            self.means.push(mean);
            self.variances.push(self.current.variance());
            self.current.reset(mean);
        }
    }

    pub fn train(&mut self, samples: &[f32]) {
        for &x in samples {
            self.add_sample(x as f64);
        }
    }

    /// Completed chunks so far; a trailing partial chunk is not counted.
    pub fn chunks(&self) -> usize {
        self.variances.len()
    }

    pub fn estimate(&mut self) -> Result<NoiseLevels> {
        let chunks = self.chunks();
        if chunks < MIN_CHUNKS {
            return Err(SalpaError::ConfigError(format!(
                "Too few chunks for a noise estimate: {} of {} samples, need at least {}",
                chunks, self.chunk_size, MIN_CHUNKS
            )));
        }
        let mean = percentile(&mut self.means, 50);
        let variance = percentile(&mut self.variances, VARIANCE_PERCENTILE);
        Ok(NoiseLevels {
            mean,
            std: variance.max(0.0).sqrt(),
            chunks,
        })
    }
}

/// Element at rank `len * pct / 100`; an empty rank yields 0.
fn percentile(values: &mut [f64], pct: usize) -> f64 {
    let rank = values.len() * pct / 100;
    if rank == 0 {
        return 0.0;
    }
    let (_, nth, _) = values.select_nth_unstable_by(rank, |a, b| a.total_cmp(b));
    *nth
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_requires_minimum_chunks() {
        let mut est = NoiseEstimator::default();
        est.train(&vec![1.0; CHUNK_SIZE * (MIN_CHUNKS - 1) + CHUNK_SIZE / 2]);
        assert_eq!(est.chunks(), MIN_CHUNKS - 1);
        assert!(matches!(est.estimate(), Err(SalpaError::ConfigError(_))));
    }

    #[test]
    fn test_alternating_signal() {
        // +-a alternating has per-chunk mean 0 and sample variance a^2 * n/(n-1)
        let a = 10.0f32;
        let samples: Vec<f32> = (0..CHUNK_SIZE * 8)
            .map(|i| if i % 2 == 0 { 500.0 + a } else { 500.0 - a })
            .collect();
        let mut est = NoiseEstimator::default();
        est.train(&samples);
        let levels = est.estimate().unwrap();

        let n = CHUNK_SIZE as f64;
        let expected_std = (100.0 * n / (n - 1.0)).sqrt();
        assert_eq!(levels.chunks, 8);
        assert!((levels.mean - 500.0).abs() < 1e-9);
        assert!((levels.std - expected_std).abs() < 1e-9);
    }

    #[test]
    fn test_robust_to_artifact_chunks() {
        let mut samples: Vec<f32> = (0..CHUNK_SIZE * 20)
            .map(|i| if i % 2 == 0 { 2.0 } else { -2.0 })
            .collect();
        // Two chunks of huge excursions
        for x in samples.iter_mut().skip(CHUNK_SIZE * 3).take(CHUNK_SIZE * 2) {
            *x *= 1000.0;
        }
        let mut est = NoiseEstimator::default();
        est.train(&samples);
        let levels = est.estimate().unwrap();
        assert!(levels.std < 2.1, "std {}", levels.std);
        assert!(levels.mean.abs() < 1e-9);
    }

    #[test]
    fn test_percentile_rank() {
        let mut v = vec![5.0, 1.0, 4.0, 2.0, 3.0];
        assert_eq!(percentile(&mut v, 50), 3.0);
        assert_eq!(percentile(&mut v, 25), 2.0);
        let mut few = vec![7.0, 8.0, 9.0];
        assert_eq!(percentile(&mut few, 25), 0.0);
    }
}
