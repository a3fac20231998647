use crate::noise::NoiseLevels;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// User-facing parameter set, in milliseconds and RMS multiples.
///
/// Unknown fields are rejected so that misspelled or unsupported options
/// (e.g. `prepeg`) fail loudly instead of being ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SalpaParams {
    #[serde(rename = "fs_Hz")]
    pub fs_hz: f64,
    pub probechans: usize,
    pub extrachans: usize,
    /// Overrides `probechans + extrachans` when given.
    pub totalchans: Option<usize>,
    /// Scans to discard at the start of the input.
    pub skip: u64,
    /// Scans to process; `None` or 0 means until end of input.
    pub lim: Option<u64>,
    /// Detection threshold in units of estimated RMS noise.
    pub thr_rms: Option<f32>,
    /// Detection threshold in digital units; takes precedence over `thr_rms`.
    pub thr_abs: Option<f32>,
    /// Fit half-width (ms).
    pub halfwidth: f64,
    /// Minimum forced-peg duration (ms).
    pub forcepeg: f64,
    /// Blank after the nominal end of an artifact (ms).
    pub postblank: f64,
    pub postblankinterruptible: bool,
    pub t_blankdepeg: usize,
    pub t_ahead: usize,
    pub t_chi2: usize,
    pub rail1: f32,
    pub rail2: f32,
    /// Period of forced pegs (ms), for stimulation at a fixed rate.
    pub period: Option<f64>,
    /// Time of the first periodic peg (ms).
    pub delay: f64,
    /// Subtract each channel's estimated baseline before processing.
    pub baseline: bool,
    /// Emit `raw - fit` instead of the cleaned signal.
    pub detrend: bool,
    pub threads: Option<usize>,
    pub block_scans: usize,
}

impl Default for SalpaParams {
    fn default() -> Self {
        Self {
            fs_hz: 30000.0,
            probechans: 64,
            extrachans: 0,
            totalchans: None,
            skip: 0,
            lim: None,
            thr_rms: Some(3.0),
            thr_abs: None,
            halfwidth: 3.0,
            forcepeg: 0.3,
            postblank: 0.8,
            postblankinterruptible: false,
            t_blankdepeg: 5,
            t_ahead: 5,
            t_chi2: 15,
            rail1: -32767.0,
            rail2: 32767.0,
            period: None,
            delay: 0.0,
            baseline: false,
            detrend: false,
            threads: None,
            block_scans: 4096,
        }
    }
}

/// Residual threshold used by the detector and recovery validation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value")]
pub enum Threshold {
    /// Digital units.
    Absolute(f32),
    /// Multiple of each channel's estimated RMS noise.
    RmsScaled(f32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputMode {
    /// Clean signal: raw where valid, the local fit where pegged.
    #[default]
    Substitute,
    /// Residual after removing the right-anchored fit ending at each sample;
    /// zero while pegged.
    Detrend,
}

/// Per-channel counters collected by the engine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelStats {
    /// Entries into `Pegged`.
    pub pegs: u64,
    /// Entries into `Pegged` caused by a forced peg.
    pub forced_pegs: u64,
    pub pegged_samples: u64,
    pub recovering_samples: u64,
    pub rail_hits: u64,
    pub residual_hits: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelSummary {
    pub channel: usize,
    pub y_threshold: f64,
    pub noise: Option<NoiseLevels>,
    pub stats: ChannelStats,
}

/// Result of processing one file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub id: String,
    pub input: String,
    pub output: String,
    pub scans: u64,
    pub probe_chans: usize,
    pub total_chans: usize,
    pub skip: u64,
    pub forced_pegs: usize,
    pub channels: Vec<ChannelSummary>,
    pub created_at: String,
}

impl RunSummary {
    pub fn new(input: String, output: String, probe_chans: usize, total_chans: usize) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            input,
            output,
            scans: 0,
            probe_chans,
            total_chans,
            skip: 0,
            forced_pegs: 0,
            channels: Vec::new(),
            created_at: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn total_pegs(&self) -> u64 {
        self.channels.iter().map(|c| c.stats.pegs).sum()
    }
}

/// A run of the external `salpa` executable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRequest {
    pub input: PathBuf,
    /// Overwritten if it exists.
    pub output: PathBuf,
    pub params: SalpaParams,
    /// Stimulus times in samples (absolute in the recording), pegged for `forcepeg`.
    pub stimuli: Option<Vec<u64>>,
}

impl RunRequest {
    pub fn new(input: impl Into<PathBuf>, output: impl Into<PathBuf>, params: SalpaParams) -> Self {
        Self {
            input: input.into(),
            output: output.into(),
            params,
            stimuli: None,
        }
    }

    pub fn with_stimuli(mut self, stimuli: Vec<u64>) -> Self {
        self.stimuli = Some(stimuli);
        self
    }
}
