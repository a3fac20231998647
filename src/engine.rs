//! Per-channel artifact suppression state machine.
//!
//! Samples enter at the look-ahead head and are emitted `t_ahead` samples
//! later, so detection and recovery validation can look at samples the
//! output has not reached yet.
//!
//! ```text
//!   Normal ──(emitted index enters a peg)──▶ Pegged
//!   Pegged ──(end + postblank, or zero crossing)──▶ Recovering
//!   Recovering ──(t_blankdepeg validated samples)──▶ Normal
//!   Recovering ──(emitted index enters a peg)──▶ Pegged
//! ```

use crate::detector::{ArtifactDetector, Cause, SampleFlag};
use crate::error::{Result, SalpaError};
use crate::fit::{Polynomial, PolynomialFitter, MIN_SAMPLES};
use crate::pegs::{PegInterval, PegScheduler, PeriodicPegs};
use crate::ring::SampleRing;
use crate::types::{ChannelStats, OutputMode};
use log::{debug, trace};
use serde::{Deserialize, Serialize};

/// Sample-domain parameters for one channel.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EngineParams {
    pub tau: usize,
    pub rail1: f32,
    pub rail2: f32,
    /// Residual threshold in digital units.
    pub y_threshold: f64,
    pub forcepeg: u64,
    pub postblank: u64,
    pub postblank_interruptible: bool,
    pub t_ahead: usize,
    pub t_chi2: usize,
    pub t_blankdepeg: usize,
    pub output_mode: OutputMode,
    pub periodic: Option<PeriodicPegs>,
}

impl Default for EngineParams {
    fn default() -> Self {
        Self {
            tau: 90,
            rail1: -32767.0,
            rail2: 32767.0,
            y_threshold: 30.0,
            forcepeg: 9,
            postblank: 24,
            postblank_interruptible: false,
            t_ahead: 5,
            t_chi2: 15,
            t_blankdepeg: 5,
            output_mode: OutputMode::Substitute,
            periodic: None,
        }
    }
}

impl EngineParams {
    pub fn validate(&self) -> Result<()> {
        let fail = |msg: String| Err(SalpaError::ConfigError(msg));
        if self.tau < 2 {
            return fail(format!(
                "Fit half-width must be at least 2 samples (got {})",
                self.tau
            ));
        }
        if !(self.rail1 < self.rail2) {
            return fail(format!(
                "Low rail ({}) must be below high rail ({})",
                self.rail1, self.rail2
            ));
        }
        if !self.y_threshold.is_finite() || self.y_threshold < 0.0 {
            return fail(format!(
                "Detection threshold must be a non-negative number (got {})",
                self.y_threshold
            ));
        }
        if self.t_chi2 == 0 {
            return fail("t_chi2 must be at least 1".to_string());
        }
        if self.t_blankdepeg == 0 {
            return fail("t_blankdepeg must be at least 1".to_string());
        }
        if self.t_ahead + 1 < MIN_SAMPLES {
            return fail(format!(
                "t_ahead must be at least {} so a recovery fit can be made (got {})",
                MIN_SAMPLES - 1,
                self.t_ahead
            ));
        }
        if let Some(p) = self.periodic {
            if p.period == 0 {
                return fail("Peg period must be at least one sample".to_string());
            }
        }
        Ok(())
    }

    /// Samples of history the engine must retain.
    pub fn ring_capacity(&self) -> usize {
        (2 * self.tau + 1).max(self.t_chi2) + self.t_ahead + 3
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mode {
    Normal,
    Pegged,
    Recovering,
}

/// One emitted sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Output {
    pub index: u64,
    pub value: f32,
    pub mode: Mode,
}

pub struct ChannelEngine {
    channel: usize,
    params: EngineParams,
    ring: SampleRing,
    detector: ArtifactDetector,
    pegs: PegScheduler,
    normal_fitter: PolynomialFitter,
    mode: Mode,
    next_emit: u64,
    /// First sample of the current stretch of valid signal.
    normal_from: u64,
    /// Right-anchored fit at the last emitted normal sample.
    normal_fit: Option<Polynomial>,
    substitute: Option<Polynomial>,
    anchor: u64,
    /// Value held while pegged when no fit was available.
    held: f32,
    /// Last value of the cleaned signal, whatever the output mode.
    last_clean: f32,
    last_peg: Option<PegInterval>,
    crossing: Option<bool>,
    /// End of the last peg interval; recovery tests never reach behind it.
    blank_end: u64,
    recovery_start: u64,
    recovery_fit: Option<Polynomial>,
    settled: usize,
    run: usize,
    stats: ChannelStats,
    finished: bool,
}

impl ChannelEngine {
    pub fn new(channel: usize, params: EngineParams) -> Result<Self> {
        params.validate()?;
        let mut pegs = PegScheduler::new(params.forcepeg);
        if let Some(periodic) = params.periodic {
            pegs = pegs.with_periodic(periodic);
        }
        Ok(Self {
            channel,
            params,
            ring: SampleRing::with_capacity(params.ring_capacity()),
            detector: ArtifactDetector::new(
                params.tau,
                params.rail1,
                params.rail2,
                params.t_chi2,
                params.y_threshold,
            )?,
            pegs,
            normal_fitter: PolynomialFitter::new(params.tau)?,
            mode: Mode::Normal,
            next_emit: 0,
            normal_from: 0,
            normal_fit: None,
            substitute: None,
            anchor: 0,
            held: 0.0,
            last_clean: 0.0,
            last_peg: None,
            crossing: None,
            blank_end: 0,
            recovery_start: 0,
            recovery_fit: None,
            settled: 0,
            run: 0,
            stats: ChannelStats::default(),
            finished: false,
        })
    }

    pub fn channel(&self) -> usize {
        self.channel
    }

    pub fn params(&self) -> &EngineParams {
        &self.params
    }

    /// Mode of the most recently emitted sample's successor.
    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn stats(&self) -> ChannelStats {
        self.stats
    }

    pub fn pegs(&self) -> &PegScheduler {
        &self.pegs
    }

    /// Index of the next sample to be emitted.
    pub fn next_emit(&self) -> u64 {
        self.next_emit
    }

    /// Samples pushed so far.
    pub fn samples_in(&self) -> u64 {
        self.ring.next_index()
    }

    /// Schedule a forced peg; `start` must not have been emitted yet.
    pub fn force_peg(&mut self, start: u64, duration: u64) -> Result<()> {
        self.pegs.register_forced(start, duration)
    }

    /// Push one raw sample; returns the sample `t_ahead` behind it once the
    /// look-ahead is full.
    pub fn step(&mut self, raw: f32) -> Option<Output> {
        debug_assert!(!self.finished, "step after finish");
        let head = self.ring.push(raw);
        self.pegs.extend_periodic(head);
        let forced = self.pegs.is_forced_at(head);

        if let SampleFlag::Corrupted(cause) = self.detector.observe(&self.ring, head, forced) {
            match cause {
                Cause::Rail => self.stats.rail_hits += 1,
                Cause::Residual => self.stats.residual_hits += 1,
            }
            trace!("channel {}: {:?} at {}", self.channel, cause, head);
            self.pegs.mark_corrupted(head);
        }

        let t_ahead = self.params.t_ahead as u64;
        if head < t_ahead {
            return None;
        }
        Some(self.emit(head - t_ahead, head))
    }

    /// Close open pegs at the end of the stream and flush the look-ahead.
    pub fn finish(&mut self) -> Vec<Output> {
        if self.finished {
            return Vec::new();
        }
        self.finished = true;

        let end = self.ring.next_index();
        self.pegs.close_at(end);
        let mut out = Vec::with_capacity((end - self.next_emit) as usize);
        while self.next_emit < end {
            out.push(self.emit(self.next_emit, end - 1));
        }
        debug!(
            "channel {}: finished after {} samples, {:?}",
            self.channel, end, self.stats
        );
        out
    }

    fn emit(&mut self, e: u64, head: u64) -> Output {
        debug_assert_eq!(e, self.next_emit);
        let raw = self.ring.get(e);
        let active = self.pegs.active_interval(e).copied();

        match (self.mode, active) {
            (Mode::Normal | Mode::Recovering, Some(peg)) => self.enter_pegged(e, peg),
            (Mode::Pegged, Some(peg)) => {
                self.last_peg = Some(peg);
                self.crossing = None;
            }
            (Mode::Pegged, None) => {
                if self.blank_over(e, raw) {
                    self.enter_recovering(e);
                }
            }
            (Mode::Normal, None) | (Mode::Recovering, None) => {}
        }

        let mode = self.mode;
        let value = match mode {
            Mode::Normal => self.normal_value(e, raw),
            Mode::Pegged => {
                self.stats.pegged_samples += 1;
                self.pegged_value(e)
            }
            Mode::Recovering => {
                self.stats.recovering_samples += 1;
                self.recovering_value(e, head, raw)
            }
        };

        self.next_emit = e + 1;
        self.pegs.retire_before(self.next_emit);
        Output {
            index: e,
            value,
            mode,
        }
    }

    fn enter_pegged(&mut self, e: u64, peg: PegInterval) {
        self.substitute = match self.mode {
            Mode::Recovering => self.recovery_fit,
            _ => self.normal_fit,
        };
        self.anchor = e.saturating_sub(1);
        self.held = self.last_clean;
        self.mode = Mode::Pegged;
        self.last_peg = Some(peg);
        self.crossing = None;
        self.stats.pegs += 1;
        if peg.is_forced() {
            self.stats.forced_pegs += 1;
        }
        debug!(
            "channel {}: pegged at {} ({:?} [{}, {}))",
            self.channel, e, peg.kind, peg.start, peg.end
        );
    }

    /// Whether the post-blank after the last peg is over at `e`.
    fn blank_over(&mut self, e: u64, raw: f32) -> bool {
        let Some(peg) = self.last_peg else {
            return true;
        };
        if e >= peg.end + self.params.postblank {
            return true;
        }
        if self.params.postblank_interruptible && !peg.is_forced() {
            let above = raw >= self.substitute_at(e);
            match self.crossing {
                None => self.crossing = Some(above),
                Some(prev) if prev != above => {
                    debug!("channel {}: post-blank interrupted at {}", self.channel, e);
                    return true;
                }
                Some(_) => {}
            }
        }
        false
    }

    fn enter_recovering(&mut self, e: u64) {
        self.mode = Mode::Recovering;
        self.blank_end = self.last_peg.map_or(e, |peg| peg.end.min(e));
        self.recovery_start = e;
        self.recovery_fit = None;
        self.settled = 0;
        self.run = 0;
        self.last_peg = None;
        self.crossing = None;
        debug!("channel {}: recovering from {}", self.channel, e);
    }

    fn normal_value(&mut self, e: u64, raw: f32) -> f32 {
        let window = self.normal_fitter.window_len() as u64;
        let available = e + 1 - self.normal_from;
        self.normal_fit = if available >= window {
            let center = e - self.params.tau as u64;
            Some(self.normal_fitter.advance_to(&self.ring, center))
        } else if available >= MIN_SAMPLES as u64 {
            PolynomialFitter::fit_range(&self.ring, self.normal_from, e, |_| false).ok()
        } else {
            None
        };

        self.last_clean = raw;
        match self.params.output_mode {
            OutputMode::Substitute => raw,
            OutputMode::Detrend => self
                .normal_fit
                .map_or(0.0, |fit| (raw as f64 - fit.evaluate(e)) as f32),
        }
    }

    /// Fit continued up to `tau` past its anchor, then held, within the rails.
    fn substitute_at(&self, e: u64) -> f32 {
        match self.substitute {
            Some(poly) => {
                let at = e.min(self.anchor + self.params.tau as u64);
                (poly.evaluate(at) as f32).clamp(self.params.rail1, self.params.rail2)
            }
            None => self.held,
        }
    }

    fn pegged_value(&mut self, e: u64) -> f32 {
        let value = self.substitute_at(e);
        self.last_clean = value;
        match self.params.output_mode {
            OutputMode::Substitute => value,
            OutputMode::Detrend => 0.0,
        }
    }

    fn recovering_value(&mut self, e: u64, head: u64, raw: f32) -> f32 {
        let window = self.normal_fitter.window_len() as u64;
        let lo = self.recovery_start.max((head + 1).saturating_sub(window));
        let pegs = &self.pegs;
        let fresh = match PolynomialFitter::fit_range(&self.ring, lo, head, |i| {
            pegs.active_interval(i).is_some()
        }) {
            Ok(fit) => Some(fit),
            Err(err) => {
                trace!("channel {}: keeping previous recovery fit: {}", self.channel, err);
                None
            }
        };
        if fresh.is_some() {
            self.recovery_fit = fresh;
        }

        if self.settled < self.params.t_ahead {
            self.settled += 1;
        } else if !self.pegs.overlaps(e, head) && self.recovery_validated(lo, head, fresh) {
            self.run += 1;
        } else {
            self.run = 0;
        }

        let fitted = self.recovery_fit.map(|fit| fit.evaluate(e));
        let weight = (self.run as f64 / self.params.t_blankdepeg as f64).min(1.0);
        let clean = match fitted {
            Some(y) => (y + weight * (raw as f64 - y)) as f32,
            None => self.last_clean,
        };
        self.last_clean = clean;

        if self.run >= self.params.t_blankdepeg {
            self.mode = Mode::Normal;
            self.normal_from = self.recovery_start;
            self.normal_fitter.reset();
            debug!("channel {}: normal from {}", self.channel, e + 1);
        }

        match self.params.output_mode {
            OutputMode::Substitute => clean,
            OutputMode::Detrend => fitted.map_or(0.0, |y| (raw as f64 - y) as f32),
        }
    }

    /// Whether the signal since the last peg agrees with a fit it did not shape.
    ///
    /// The newest `t_chi2` samples after the peg are tested against the
    /// substitute that stood in for the peg. A signal that has settled on a new
    /// baseline passes instead once a full `2*tau+1` window has been collected
    /// since recovery began and its fit sits on the oldest `t_chi2` samples of
    /// that window.
    fn recovery_validated(&self, lo: u64, head: u64, fresh: Option<Polynomial>) -> bool {
        let t_chi2 = self.params.t_chi2 as u64;
        let from = self.blank_end.max((head + 1).saturating_sub(t_chi2));
        if self
            .detector
            .consistent_with(&self.ring, from, head, |i| self.substitute_at(i) as f64)
        {
            return true;
        }

        let window = self.normal_fitter.window_len() as u64;
        match fresh {
            Some(fit) if head + 1 - lo >= window => {
                self.detector
                    .fit_settled(&self.ring, &fit, lo, lo + t_chi2.min(window) - 1)
            }
            _ => false,
        }
    }
}
