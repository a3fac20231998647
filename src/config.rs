use crate::engine::EngineParams;
use crate::error::{Result, SalpaError};
use crate::noise::{CHUNK_SIZE, MIN_CHUNKS};
use crate::pegs::PeriodicPegs;
use crate::types::{OutputMode, SalpaParams, Threshold};
use log::info;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Scans used to estimate per-channel noise when the threshold is RMS-scaled.
pub const DEFAULT_NOISE_TRAINING_SCANS: usize = 3072;

pub const DEFAULT_BLOCK_SCANS: usize = 4096;

/// Sample-domain configuration for one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    pub fs_hz: f64,
    pub probe_chans: usize,
    pub total_chans: usize,
    pub tau: usize,
    pub threshold: Threshold,
    pub rail1: f32,
    pub rail2: f32,
    pub forcepeg: u64,
    pub postblank: u64,
    pub postblank_interruptible: bool,
    pub t_ahead: usize,
    pub t_chi2: usize,
    pub t_blankdepeg: usize,
    pub skip: u64,
    pub lim: Option<u64>,
    pub period: Option<u64>,
    pub delay: u64,
    pub output_mode: OutputMode,
    pub baseline_subtract: bool,
    pub noise_training_scans: usize,
    pub block_scans: usize,
    pub threads: Option<usize>,
    /// Set when a peg file supplies the forced pegs.
    pub peg_file: bool,
}

/// Milliseconds to whole samples, truncating.
pub fn ms_to_samples(fs_hz: f64, ms: f64) -> u64 {
    (fs_hz * ms / 1000.0) as u64
}

impl RunConfig {
    pub fn from_params(params: &SalpaParams) -> Result<Self> {
        let threshold = match (params.thr_abs, params.thr_rms) {
            (Some(abs), _) => Threshold::Absolute(abs),
            (None, Some(rms)) => Threshold::RmsScaled(rms),
            (None, None) => {
                return Err(SalpaError::ConfigError(
                    "Either thr_rms or thr_abs must be given".to_string(),
                ))
            }
        };

        let fs = params.fs_hz;
        let config = Self {
            fs_hz: fs,
            probe_chans: params.probechans,
            total_chans: params
                .totalchans
                .unwrap_or(params.probechans + params.extrachans),
            tau: ms_to_samples(fs, params.halfwidth) as usize,
            threshold,
            rail1: params.rail1,
            rail2: params.rail2,
            forcepeg: ms_to_samples(fs, params.forcepeg),
            postblank: ms_to_samples(fs, params.postblank),
            postblank_interruptible: params.postblankinterruptible,
            t_ahead: params.t_ahead,
            t_chi2: params.t_chi2,
            t_blankdepeg: params.t_blankdepeg,
            skip: params.skip,
            lim: params.lim.filter(|&n| n > 0),
            period: params.period.map(|ms| ms_to_samples(fs, ms)),
            delay: ms_to_samples(fs, params.delay),
            output_mode: if params.detrend {
                OutputMode::Detrend
            } else {
                OutputMode::Substitute
            },
            baseline_subtract: params.baseline,
            noise_training_scans: DEFAULT_NOISE_TRAINING_SCANS,
            block_scans: params.block_scans,
            threads: params.threads,
            peg_file: false,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn with_peg_file(mut self) -> Result<Self> {
        self.peg_file = true;
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        let fail = |msg: String| Err(SalpaError::ConfigError(msg));
        if !(self.fs_hz > 0.0) || !self.fs_hz.is_finite() {
            return fail(format!("Sampling rate must be positive (got {})", self.fs_hz));
        }
        if self.probe_chans == 0 {
            return fail("At least one probe channel is required".to_string());
        }
        if self.probe_chans > self.total_chans {
            return fail(format!(
                "Probe channels ({}) exceed total channels ({})",
                self.probe_chans, self.total_chans
            ));
        }
        match self.threshold {
            Threshold::Absolute(v) if !(v >= 0.0) || !v.is_finite() => {
                return fail(format!("Absolute threshold must be non-negative (got {})", v));
            }
            Threshold::RmsScaled(k) if !(k > 0.0) || !k.is_finite() => {
                return fail(format!("RMS threshold multiple must be positive (got {})", k));
            }
            Threshold::RmsScaled(_) if self.noise_training_scans < CHUNK_SIZE * MIN_CHUNKS => {
                return fail(format!(
                    "Noise training needs at least {} scans (got {})",
                    CHUNK_SIZE * MIN_CHUNKS,
                    self.noise_training_scans
                ));
            }
            _ => {}
        }
        if self.block_scans == 0 {
            return fail("Block size must be at least one scan".to_string());
        }
        if self.threads == Some(0) {
            return fail("Thread count must be at least 1".to_string());
        }
        if self.peg_file && self.period.is_some() {
            return fail("A peg file and a peg period cannot be combined".to_string());
        }
        self.engine_params(0.0).validate()
    }

    /// Engine parameters for a channel whose residual threshold is `y_threshold`.
    pub fn engine_params(&self, y_threshold: f64) -> EngineParams {
        EngineParams {
            tau: self.tau,
            rail1: self.rail1,
            rail2: self.rail2,
            y_threshold,
            forcepeg: self.forcepeg,
            postblank: self.postblank,
            postblank_interruptible: self.postblank_interruptible,
            t_ahead: self.t_ahead,
            t_chi2: self.t_chi2,
            t_blankdepeg: self.t_blankdepeg,
            output_mode: self.output_mode,
            periodic: self.period.map(|period| PeriodicPegs {
                period,
                delay: self.delay,
            }),
        }
    }

    pub fn aux_chans(&self) -> usize {
        self.total_chans - self.probe_chans
    }

    /// Whether per-channel noise must be estimated before processing.
    pub fn needs_noise(&self) -> bool {
        matches!(self.threshold, Threshold::RmsScaled(_)) || self.baseline_subtract
    }

    pub fn log_summary(&self) {
        info!(
            "SALPA: fs={} Hz, {} probe / {} total channels, tau={} samples",
            self.fs_hz, self.probe_chans, self.total_chans, self.tau
        );
        info!(
            "  threshold={:?}, rails=[{}, {}], forcepeg={}, postblank={}{}",
            self.threshold,
            self.rail1,
            self.rail2,
            self.forcepeg,
            self.postblank,
            if self.postblank_interruptible {
                " (interruptible)"
            } else {
                ""
            }
        );
        info!(
            "  t_ahead={}, t_chi2={}, t_blankdepeg={}, output={:?}",
            self.t_ahead, self.t_chi2, self.t_blankdepeg, self.output_mode
        );
    }
}

/// Read a JSON parameter file.
pub fn load_params(path: &Path) -> Result<SalpaParams> {
    if !path.exists() {
        return Err(SalpaError::FileNotFound(path.display().to_string()));
    }
    let content = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}
