//! Local cubic fits over windows of a channel's recent samples.
//!
//! Offsets are measured from the window centre and divided by a scale so the
//! powers stay within [-1, 1] inside the window; this keeps the 4×4 normal
//! matrix well conditioned for half-widths of several hundred samples.
//!
//! A full symmetric window of `2*tau+1` samples has a constant normal matrix,
//! so its inverse is computed once and sliding the window only updates four
//! moments. Every `2*tau+1` slides the moments are recomputed from the
//! samples, which bounds the rounding drift of the rolling update.

use crate::error::{Result, SalpaError};
use crate::ring::SampleRing;
use nalgebra::{Matrix4, Vector4};

/// Degree of the local polynomial.
pub const DEGREE: usize = 3;

/// Smallest number of valid samples a fit can be made from.
pub const MIN_SAMPLES: usize = DEGREE + 1;

/// Cubic in scaled offsets from an absolute centre index.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Polynomial {
    center: u64,
    scale: f64,
    coeffs: [f64; DEGREE + 1],
}

impl Polynomial {
    pub fn new(center: u64, scale: f64, coeffs: [f64; DEGREE + 1]) -> Self {
        Self {
            center,
            scale,
            coeffs,
        }
    }

    pub fn constant(center: u64, value: f64) -> Self {
        Self::new(center, 1.0, [value, 0.0, 0.0, 0.0])
    }

    pub fn center(&self) -> u64 {
        self.center
    }

    pub fn scale(&self) -> f64 {
        self.scale
    }

    /// Coefficients in the scaled basis, constant term first.
    pub fn coeffs(&self) -> &[f64; DEGREE + 1] {
        &self.coeffs
    }

    /// Value at an absolute sample index, inside or outside the fitted window.
    pub fn evaluate(&self, index: u64) -> f64 {
        let u = (index as f64 - self.center as f64) / self.scale;
        self.coeffs.iter().rev().fold(0.0, |acc, &c| acc * u + c)
    }
}

/// Sliding-window least-squares fitter for one channel.
#[derive(Debug, Clone)]
pub struct PolynomialFitter {
    tau: usize,
    scale: f64,
    inverse: Matrix4<f64>,
    /// Unscaled moments `X_k = Σ t^k y(center + t)` for `t` in `[-tau, tau]`.
    moments: [f64; DEGREE + 1],
    center: Option<u64>,
    slides_since_sync: usize,
}

impl PolynomialFitter {
    pub fn new(tau: usize) -> Result<Self> {
        if tau < 2 {
            return Err(SalpaError::ConfigError(format!(
                "Fit half-width must be at least 2 samples (got {})",
                tau
            )));
        }

        let scale = tau as f64;
        let mut normal = Matrix4::<f64>::zeros();
        let half = tau as i64;
        for t in -half..=half {
            let p = powers(t as f64 / scale);
            for i in 0..=DEGREE {
                for j in 0..=DEGREE {
                    normal[(i, j)] += p[i] * p[j];
                }
            }
        }

        let inverse = normal.try_inverse().ok_or_else(|| {
            SalpaError::ConfigError(format!("Singular fit window for tau = {}", tau))
        })?;

        Ok(Self {
            tau,
            scale,
            inverse,
            moments: [0.0; DEGREE + 1],
            center: None,
            slides_since_sync: 0,
        })
    }

    pub fn tau(&self) -> usize {
        self.tau
    }

    pub fn window_len(&self) -> usize {
        2 * self.tau + 1
    }

    /// Centre of the window currently tracked, if any.
    pub fn center(&self) -> Option<u64> {
        self.center
    }

    /// Forget the tracked window; the next fit starts from scratch.
    pub fn reset(&mut self) {
        self.center = None;
        self.slides_since_sync = 0;
    }

    /// Exact fit over `[center - tau, center + tau]`, which becomes the tracked window.
    pub fn fit_window(&mut self, ring: &SampleRing, center: u64) -> Polynomial {
        debug_assert!(center >= self.tau as u64);
        self.moments = window_moments(ring, center, self.tau);
        self.center = Some(center);
        self.slides_since_sync = 0;
        self.solve(center)
    }

    /// Exact fit over the `2*tau+1` samples ending at `end`.
    pub fn fit_right_anchored(&mut self, ring: &SampleRing, end: u64) -> Polynomial {
        self.fit_window(ring, end - self.tau as u64)
    }

    /// Move the tracked window one sample to the right.
    ///
    /// Returns `None` when no window is tracked.
    pub fn slide(&mut self, ring: &SampleRing) -> Option<Polynomial> {
        let center = self.center? + 1;
        if self.slides_since_sync + 1 >= self.window_len() {
            return Some(self.fit_window(ring, center));
        }

        let tau = self.tau as u64;
        let y_new = ring.get(center + tau) as f64;
        let y_old = ring.get(center - tau - 1) as f64;

        // Sums over the shifted window, still in the old window's offsets:
        // y_new sits at offset tau+1 and y_old (offset -tau) drops out.
        let reach = self.tau as f64 + 1.0;
        let back = -(self.tau as f64);
        let mut s = [0.0; DEGREE + 1];
        let (mut p_new, mut p_old) = (1.0, 1.0);
        for (k, sk) in s.iter_mut().enumerate() {
            *sk = self.moments[k] + p_new * y_new - p_old * y_old;
            p_new *= reach;
            p_old *= back;
        }

        // Re-centre by one: X'_k = Σ_j C(k, j) (-1)^(k-j) S_j
        self.moments = [
            s[0],
            s[1] - s[0],
            s[2] - 2.0 * s[1] + s[0],
            s[3] - 3.0 * s[2] + 3.0 * s[1] - s[0],
        ];
        self.center = Some(center);
        self.slides_since_sync += 1;
        Some(self.solve(center))
    }

    /// Fit centred at `center`, sliding when it is the next window and refitting otherwise.
    pub fn advance_to(&mut self, ring: &SampleRing, center: u64) -> Polynomial {
        match self.center {
            Some(c) if c == center => self.solve(c),
            Some(c) if c + 1 == center => match self.slide(ring) {
                Some(poly) => poly,
                None => self.fit_window(ring, center),
            },
            _ => self.fit_window(ring, center),
        }
    }

    fn solve(&self, center: u64) -> Polynomial {
        let mut scaled = Vector4::<f64>::zeros();
        let mut factor = 1.0;
        for k in 0..=DEGREE {
            scaled[k] = self.moments[k] / factor;
            factor *= self.scale;
        }
        let a = self.inverse * scaled;
        Polynomial::new(center, self.scale, [a[0], a[1], a[2], a[3]])
    }

    /// Least-squares fit over `[lo, hi]`, skipping samples for which `excluded` is true.
    ///
    /// Used for partial windows (right after an artifact) where the fixed
    /// normal matrix of a full window does not apply.
    pub fn fit_range<F>(ring: &SampleRing, lo: u64, hi: u64, excluded: F) -> Result<Polynomial>
    where
        F: Fn(u64) -> bool,
    {
        debug_assert!(lo <= hi);
        let center = lo + (hi - lo) / 2;
        let scale = ((hi - lo) as f64 / 2.0).max(1.0);

        let mut normal = Matrix4::<f64>::zeros();
        let mut rhs = Vector4::<f64>::zeros();
        let mut count = 0usize;
        for index in lo..=hi {
            if excluded(index) {
                continue;
            }
            let p = powers((index as f64 - center as f64) / scale);
            let y = ring.get(index) as f64;
            for i in 0..=DEGREE {
                rhs[i] += p[i] * y;
                for j in 0..=DEGREE {
                    normal[(i, j)] += p[i] * p[j];
                }
            }
            count += 1;
        }

        let insufficient = SalpaError::InsufficientHistory {
            available: count,
            required: MIN_SAMPLES,
        };
        if count < MIN_SAMPLES {
            return Err(insufficient);
        }

        let a = normal
            .cholesky()
            .map(|c| c.solve(&rhs))
            .ok_or(insufficient)?;
        Ok(Polynomial::new(center, scale, [a[0], a[1], a[2], a[3]]))
    }
}

fn powers(u: f64) -> [f64; DEGREE + 1] {
    [1.0, u, u * u, u * u * u]
}

fn window_moments(ring: &SampleRing, center: u64, tau: usize) -> [f64; DEGREE + 1] {
    let mut m = [0.0; DEGREE + 1];
    let start = center - tau as u64;
    for (i, index) in (start..=center + tau as u64).enumerate() {
        let t = i as f64 - tau as f64;
        let y = ring.get(index) as f64;
        m[0] += y;
        m[1] += t * y;
        m[2] += t * t * y;
        m[3] += t * t * t * y;
    }
    m
}
