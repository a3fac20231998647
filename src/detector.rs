//! Per-sample artifact detection for one channel.

use crate::fit::{Polynomial, PolynomialFitter};
use crate::ring::SampleRing;
use crate::error::Result;
use std::collections::VecDeque;

/// Limit on `(Σr)² / (n·y_thr²)`: the two-sided 95% bound for the mean of
/// `n` residuals at noise level `y_thr` (1.98²).
pub const CHI2_LIMIT: f64 = 3.92;

/// Limit for a fit checked against samples it was fitted to.
pub const SETTLED_LIMIT: f64 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cause {
    Rail,
    Residual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleFlag {
    Clean,
    Corrupted(Cause),
}

impl SampleFlag {
    pub fn is_corrupted(&self) -> bool {
        matches!(self, SampleFlag::Corrupted(_))
    }
}

/// Rail and residual-drift tests on incoming samples.
///
/// The residual test compares each sample with the one-step prediction of a
/// cubic fitted to the `2*tau+1` samples before it. It only runs once that
/// whole window is clean, i.e. after `2*tau+1` consecutive samples with no
/// corruption and no forced peg.
#[derive(Debug, Clone)]
pub struct ArtifactDetector {
    rail1: f32,
    rail2: f32,
    t_chi2: usize,
    y_thr: f64,
    fitter: PolynomialFitter,
    residuals: VecDeque<f64>,
    residual_sum: f64,
    clean_run: usize,
}

impl ArtifactDetector {
    pub fn new(tau: usize, rail1: f32, rail2: f32, t_chi2: usize, y_thr: f64) -> Result<Self> {
        Ok(Self {
            rail1,
            rail2,
            t_chi2: t_chi2.max(1),
            y_thr,
            fitter: PolynomialFitter::new(tau)?,
            residuals: VecDeque::with_capacity(t_chi2.max(1)),
            residual_sum: 0.0,
            clean_run: 0,
        })
    }

    pub fn is_armed(&self) -> bool {
        self.clean_run >= self.fitter.window_len()
    }

    pub fn on_rail(&self, x: f32) -> bool {
        x <= self.rail1 || x >= self.rail2
    }

    /// Classify sample `n`, which must be the newest sample in `ring`.
    ///
    /// `forced` marks a sample inside a forced peg: it is still rail-tested
    /// but disarms the residual test.
    pub fn observe(&mut self, ring: &SampleRing, n: u64, forced: bool) -> SampleFlag {
        let x = ring.get(n);
        if self.on_rail(x) {
            self.disarm();
            return SampleFlag::Corrupted(Cause::Rail);
        }
        if forced {
            self.disarm();
            return SampleFlag::Clean;
        }

        if self.is_armed() {
            let tau = self.fitter.tau() as u64;
            let prediction = self.fitter.advance_to(ring, n - 1 - tau).evaluate(n);
            let r = x as f64 - prediction;
            if self.residuals.len() == self.t_chi2 {
                if let Some(old) = self.residuals.pop_front() {
                    self.residual_sum -= old;
                }
            }
            self.residuals.push_back(r);
            self.residual_sum += r;

            if exceeds(self.residual_sum, self.residuals.len(), self.y_thr, CHI2_LIMIT) {
                self.disarm();
                return SampleFlag::Corrupted(Cause::Residual);
            }
        }

        self.clean_run += 1;
        SampleFlag::Clean
    }

    /// Whether samples `[lo, hi]` stay within the residual limit of `reference`.
    pub fn consistent_with(
        &self,
        ring: &SampleRing,
        lo: u64,
        hi: u64,
        reference: impl Fn(u64) -> f64,
    ) -> bool {
        let sum: f64 = (lo..=hi).map(|i| ring.get(i) as f64 - reference(i)).sum();
        !exceeds(sum, (hi - lo + 1) as usize, self.y_thr, CHI2_LIMIT)
    }

    /// Whether `poly`, fitted over a window containing `[lo, hi]`, sits on
    /// those samples to within `y_thr / sqrt(n)` on average.
    pub fn fit_settled(&self, ring: &SampleRing, poly: &Polynomial, lo: u64, hi: u64) -> bool {
        let sum: f64 = (lo..=hi).map(|i| ring.get(i) as f64 - poly.evaluate(i)).sum();
        !exceeds(sum, (hi - lo + 1) as usize, self.y_thr, SETTLED_LIMIT)
    }

    fn disarm(&mut self) {
        self.clean_run = 0;
        self.residuals.clear();
        self.residual_sum = 0.0;
        self.fitter.reset();
    }
}

fn exceeds(sum: f64, count: usize, y_thr: f64, limit: f64) -> bool {
    sum * sum > limit * count as f64 * y_thr * y_thr
}
