//! Multichannel processing: de-interleave scans, run one engine per probe
//! channel on a worker pool, and re-interleave the cleaned probes with the
//! untouched auxiliary channels.

use crate::config::RunConfig;
use crate::engine::{ChannelEngine, EngineParams, Output};
use crate::error::{Result, SalpaError};
use crate::mmap_utils::{decode_samples, encode_samples, mmap_file, scan_layout, SAMPLE_BYTES};
use crate::noise::{NoiseEstimator, NoiseLevels};
use crate::pegfile::{relative_to_skip, ForcedPeg};
use crate::types::{ChannelSummary, OutputMode, RunSummary, Threshold};
use log::{debug, info, warn};
use rayon::prelude::*;
use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::time::Instant;

pub struct MultiChannelProcessor {
    config: RunConfig,
    engines: Vec<ChannelEngine>,
    offsets: Vec<f32>,
    noise: Option<Vec<NoiseLevels>>,
    /// Raw scans not yet emitted by the engines.
    pending: VecDeque<Vec<i16>>,
    pool: rayon::ThreadPool,
    scans_out: u64,
}

impl MultiChannelProcessor {
    /// Build engines for every probe channel.
    ///
    /// `noise` is required when the threshold is RMS-scaled or baselines are subtracted.
    pub fn new(config: RunConfig, noise: Option<Vec<NoiseLevels>>) -> Result<Self> {
        config.validate()?;
        if let Some(levels) = &noise {
            if levels.len() != config.probe_chans {
                return Err(SalpaError::ConfigError(format!(
                    "Noise estimates for {} channels, expected {}",
                    levels.len(),
                    config.probe_chans
                )));
            }
        }

        let mut engines = Vec::with_capacity(config.probe_chans);
        let mut offsets = Vec::with_capacity(config.probe_chans);
        for channel in 0..config.probe_chans {
            let levels = noise.as_ref().map(|n| n[channel]);
            let y_threshold = match (config.threshold, levels) {
                (Threshold::Absolute(v), _) => v as f64,
                (Threshold::RmsScaled(k), Some(l)) => k as f64 * l.std,
                (Threshold::RmsScaled(_), None) => {
                    return Err(SalpaError::ConfigError(
                        "RMS-scaled threshold requires a noise estimate".to_string(),
                    ))
                }
            };
            let offset = match (config.baseline_subtract, levels) {
                (true, Some(l)) => l.mean as f32,
                (true, None) => {
                    return Err(SalpaError::ConfigError(
                        "Baseline subtraction requires a noise estimate".to_string(),
                    ))
                }
                (false, _) => 0.0,
            };
            debug!(
                "channel {}: threshold {:.2}, offset {:.2}",
                channel, y_threshold, offset
            );
            engines.push(ChannelEngine::new(channel, config.engine_params(y_threshold))?);
            offsets.push(offset);
        }

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.threads.unwrap_or(0))
            .thread_name(|i| format!("salpa-worker-{}", i))
            .build()
            .map_err(|e| SalpaError::RunFailure(format!("Failed to create thread pool: {}", e)))?;

        Ok(Self {
            config,
            engines,
            offsets,
            noise,
            pending: VecDeque::new(),
            pool,
            scans_out: 0,
        })
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Register a forced peg on every probe channel.
    pub fn force_peg(&mut self, start: u64, duration: Option<u64>) -> Result<()> {
        let duration = duration.unwrap_or(self.config.forcepeg);
        for engine in self.engines.iter_mut() {
            engine.force_peg(start, duration)?;
        }
        Ok(())
    }

    pub fn scans_out(&self) -> u64 {
        self.scans_out
    }

    /// Process whole interleaved scans; returns the scans that are complete.
    ///
    /// Output lags input by `t_ahead` scans until `finish` is called.
    pub fn process_block(&mut self, samples: &[i16]) -> Result<Vec<i16>> {
        let total = self.config.total_chans;
        if samples.len() % total != 0 {
            return Err(SalpaError::RunFailure(format!(
                "Block of {} samples is not a whole number of {}-channel scans",
                samples.len(),
                total
            )));
        }
        let n_scans = samples.len() / total;

        let mut inputs: Vec<Vec<f32>> = (0..self.config.probe_chans)
            .map(|_| Vec::with_capacity(n_scans))
            .collect();
        for scan in samples.chunks_exact(total) {
            for (c, input) in inputs.iter_mut().enumerate() {
                input.push(scan[c] as f32 - self.offsets[c]);
            }
            self.pending.push_back(scan.to_vec());
        }

        let engines = &mut self.engines;
        let outputs: Vec<Vec<Output>> = self.pool.install(|| {
            engines
                .par_iter_mut()
                .zip(inputs.par_iter())
                .map(|(engine, input)| input.iter().filter_map(|&x| engine.step(x)).collect())
                .collect()
        });
        self.interleave(outputs)
    }

    /// Flush every engine; returns the remaining scans.
    pub fn finish(&mut self) -> Result<Vec<i16>> {
        let engines = &mut self.engines;
        let outputs: Vec<Vec<Output>> = self
            .pool
            .install(|| engines.par_iter_mut().map(|engine| engine.finish()).collect());
        let out = self.interleave(outputs)?;
        if !self.pending.is_empty() {
            return Err(SalpaError::RunFailure(format!(
                "{} scans left unprocessed",
                self.pending.len()
            )));
        }
        Ok(out)
    }

    pub fn channel_summaries(&self) -> Vec<ChannelSummary> {
        self.engines
            .iter()
            .map(|engine| ChannelSummary {
                channel: engine.channel(),
                y_threshold: engine.params().y_threshold,
                noise: self.noise.as_ref().map(|n| n[engine.channel()]),
                stats: engine.stats(),
            })
            .collect()
    }

    fn interleave(&mut self, outputs: Vec<Vec<Output>>) -> Result<Vec<i16>> {
        let n_out = outputs.first().map_or(0, |o| o.len());
        if outputs.iter().any(|o| o.len() != n_out) {
            return Err(SalpaError::RunFailure(
                "Channel engines produced different numbers of samples".to_string(),
            ));
        }
        if n_out > self.pending.len() {
            return Err(SalpaError::RunFailure(format!(
                "Engines emitted {} scans but only {} are pending",
                n_out,
                self.pending.len()
            )));
        }

        let restore_offset = self.config.output_mode == OutputMode::Substitute;
        let mut out = Vec::with_capacity(n_out * self.config.total_chans);
        for k in 0..n_out {
            let Some(mut scan) = self.pending.pop_front() else {
                break;
            };
            for (c, channel) in outputs.iter().enumerate() {
                let offset = if restore_offset { self.offsets[c] } else { 0.0 };
                scan[c] = to_i16(channel[k].value + offset);
            }
            out.extend_from_slice(&scan);
        }
        self.scans_out += n_out as u64;
        Ok(out)
    }
}

/// Round and saturate to the 16-bit sample range.
pub fn to_i16(value: f32) -> i16 {
    value.round().clamp(i16::MIN as f32, i16::MAX as f32) as i16
}

/// Estimate noise per probe channel from interleaved scans.
pub fn estimate_noise(samples: &[i16], probe_chans: usize, total_chans: usize) -> Result<Vec<NoiseLevels>> {
    let mut estimators: Vec<NoiseEstimator> =
        (0..probe_chans).map(|_| NoiseEstimator::default()).collect();
    for scan in samples.chunks_exact(total_chans) {
        for (c, est) in estimators.iter_mut().enumerate() {
            est.add_sample(scan[c] as f64);
        }
    }
    estimators.iter_mut().map(|e| e.estimate()).collect()
}

/// Run a single channel through an engine with the given forced pegs.
pub fn process_channel(data: &[f32], params: EngineParams, pegs: &[ForcedPeg]) -> Result<Vec<Output>> {
    let mut engine = ChannelEngine::new(0, params)?;
    for peg in pegs {
        engine.force_peg(peg.start, peg.duration.unwrap_or(params.forcepeg))?;
    }
    let mut out: Vec<Output> = data.iter().filter_map(|&x| engine.step(x)).collect();
    out.extend(engine.finish());
    Ok(out)
}

/// Process a window of interleaved little-endian scans into `sink`.
///
/// `pegs` are relative to the first scan of `bytes`.
/// Estimate noise if the threshold needs it, then build the engines and
/// schedule the forced pegs.
fn prepare(bytes: &[u8], config: &RunConfig, pegs: &[ForcedPeg]) -> Result<MultiChannelProcessor> {
    let total = config.total_chans;
    let (n_scans, _) = scan_layout(bytes.len(), total);

    let noise = if config.needs_noise() {
        let training = (config.noise_training_scans as u64).min(n_scans) as usize;
        let samples = decode_samples(&bytes[..training * total * SAMPLE_BYTES]);
        let levels = estimate_noise(&samples, config.probe_chans, total).map_err(|e| {
            SalpaError::ConfigError(format!(
                "Cannot estimate noise from {} scans: {}",
                training, e
            ))
        })?;
        Some(levels)
    } else {
        None
    };

    let mut processor = MultiChannelProcessor::new(config.clone(), noise)?;
    for peg in pegs {
        processor.force_peg(peg.start, peg.duration)?;
    }
    Ok(processor)
}

fn drive<W: Write>(
    bytes: &[u8],
    mut processor: MultiChannelProcessor,
    sink: &mut W,
) -> Result<(u64, Vec<ChannelSummary>)> {
    let scan_bytes = processor.config.total_chans * SAMPLE_BYTES;
    let (n_scans, _) = scan_layout(bytes.len(), processor.config.total_chans);

    let mut encoded = Vec::new();
    let block_bytes = processor.config.block_scans * scan_bytes;
    for block in bytes[..n_scans as usize * scan_bytes].chunks(block_bytes) {
        let out = processor.process_block(&decode_samples(block))?;
        encoded.clear();
        encode_samples(&out, &mut encoded);
        sink.write_all(&encoded)?;
    }
    let out = processor.finish()?;
    encoded.clear();
    encode_samples(&out, &mut encoded);
    sink.write_all(&encoded)?;
    sink.flush()?;

    Ok((processor.scans_out(), processor.channel_summaries()))
}

/// Process interleaved scans held in memory.
pub fn process_interleaved(
    samples: &[i16],
    config: &RunConfig,
    pegs: &[ForcedPeg],
) -> Result<(Vec<i16>, Vec<ChannelSummary>)> {
    let mut bytes = Vec::new();
    encode_samples(samples, &mut bytes);
    let processor = prepare(&bytes, config, pegs)?;
    let mut sink = Vec::with_capacity(bytes.len());
    let (_, summaries) = drive(&bytes, processor, &mut sink)?;
    Ok((decode_samples(&sink), summaries))
}

/// Process a raw 16-bit interleaved recording into `output`.
///
/// `pegs` use absolute indices in the recording; they are shifted by `skip`.
/// The output is created or overwritten once the run is set up, and removed
/// again if processing fails part way.
pub fn process_file(
    input: &Path,
    output: &Path,
    config: &RunConfig,
    pegs: &[ForcedPeg],
) -> Result<RunSummary> {
    let started = Instant::now();
    let mmap = mmap_file(input)?;

    if output.exists() && std::fs::canonicalize(output)? == std::fs::canonicalize(input)? {
        return Err(SalpaError::ConfigError(format!(
            "Output would overwrite the input file {}",
            input.display()
        )));
    }

    let total = config.total_chans;
    let (total_scans, trailing) = scan_layout(mmap.len(), total);
    if trailing > 0 {
        warn!(
            "{}: ignoring {} trailing bytes (partial scan)",
            input.display(),
            trailing
        );
    }

    let first = config.skip.min(total_scans);
    let last = match config.lim {
        Some(lim) => first.saturating_add(lim).min(total_scans),
        None => total_scans,
    };
    if config.skip > total_scans {
        warn!(
            "skip ({}) is beyond the end of {} ({} scans)",
            config.skip,
            input.display(),
            total_scans
        );
    }

    let scan_bytes = total * SAMPLE_BYTES;
    let window = &mmap[first as usize * scan_bytes..last as usize * scan_bytes];
    let pegs = relative_to_skip(pegs, config.skip, config.forcepeg)?;

    config.log_summary();
    info!(
        "Processing {} scans of {} ({} forced pegs)",
        last - first,
        input.display(),
        pegs.len()
    );

    let processor = prepare(window, config, &pegs)?;
    let mut writer = BufWriter::new(File::create(output)?);
    let (scans, channels) = match drive(window, processor, &mut writer) {
        Ok(done) => done,
        Err(err) => {
            drop(writer);
            if let Err(rm) = std::fs::remove_file(output) {
                warn!("Could not remove partial output {}: {}", output.display(), rm);
            }
            return Err(err);
        }
    };

    let mut summary = RunSummary::new(
        input.display().to_string(),
        output.display().to_string(),
        config.probe_chans,
        total,
    );
    summary.scans = scans;
    summary.skip = first;
    summary.forced_pegs = pegs.len();
    summary.channels = channels;

    info!(
        "Wrote {} scans to {} in {:.2?} ({} pegs)",
        scans,
        output.display(),
        started.elapsed(),
        summary.total_pegs()
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SalpaParams;

    fn config(probe: usize, aux: usize) -> RunConfig {
        let params = SalpaParams {
            fs_hz: 10000.0,
            probechans: probe,
            extrachans: aux,
            thr_abs: Some(20.0),
            halfwidth: 1.0,
            forcepeg: 0.5,
            postblank: 1.0,
            block_scans: 64,
            threads: Some(2),
            ..SalpaParams::default()
        };
        RunConfig::from_params(&params).unwrap()
    }

    fn interleaved(scans: usize, total: usize, f: impl Fn(usize, usize) -> i16) -> Vec<i16> {
        (0..scans)
            .flat_map(|s| (0..total).map(move |c| (s, c)))
            .map(|(s, c)| f(s, c))
            .collect()
    }

    #[test]
    fn test_to_i16_rounds_and_saturates() {
        assert_eq!(to_i16(1.5), 2);
        assert_eq!(to_i16(-1.4), -1);
        assert_eq!(to_i16(1e6), i16::MAX);
        assert_eq!(to_i16(-1e6), i16::MIN);
    }

    #[test]
    fn test_clean_data_passes_through() {
        let cfg = config(3, 2);
        let data = interleaved(500, 5, |s, c| ((s as f32 / 15.0).sin() * 200.0) as i16 + c as i16 * 1000);
        let (out, summaries) = process_interleaved(&data, &cfg, &[]).unwrap();
        assert_eq!(out, data);
        assert_eq!(summaries.len(), 3);
        assert!(summaries.iter().all(|s| s.stats.pegs == 0));
    }

    #[test]
    fn test_forced_peg_applies_to_probes_only() {
        let cfg = config(2, 1);
        let data = interleaved(300, 3, |s, c| {
            if (100..104).contains(&s) {
                5000
            } else {
                c as i16 * 7
            }
        });
        let pegs = [ForcedPeg::new(100, None)];
        let (out, summaries) = process_interleaved(&data, &cfg, &pegs).unwrap();

        assert_eq!(out.len(), data.len());
        for s in 100..104 {
            assert_eq!(out[s * 3], 0);
            assert_eq!(out[s * 3 + 1], 7);
            assert_eq!(out[s * 3 + 2], 5000);
        }
        assert!(summaries.iter().all(|s| s.stats.forced_pegs == 1));
    }

    #[test]
    fn test_block_size_does_not_change_output() {
        let mut cfg = config(2, 0);
        let data = interleaved(700, 2, |s, c| {
            let base = ((s * (c + 3)) % 37) as i16 - 18;
            if s == 350 { 32767 } else { base }
        });
        cfg.block_scans = 1;
        let (small, _) = process_interleaved(&data, &cfg, &[]).unwrap();
        cfg.block_scans = 1000;
        let (large, _) = process_interleaved(&data, &cfg, &[]).unwrap();
        assert_eq!(small, large);
    }

    #[test]
    fn test_rms_threshold_needs_enough_data() {
        let params = SalpaParams {
            fs_hz: 10000.0,
            probechans: 1,
            ..SalpaParams::default()
        };
        let cfg = RunConfig::from_params(&params).unwrap();
        let data = vec![0i16; 1000];
        let err = process_interleaved(&data, &cfg, &[]).unwrap_err();
        assert!(err.to_string().contains("noise"), "{}", err);
    }

    #[test]
    fn test_failed_setup_leaves_no_output() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("short.dat");
        let output = dir.path().join("clean.dat");
        let mut bytes = Vec::new();
        encode_samples(&[0i16; 1000], &mut bytes);
        std::fs::write(&input, bytes).unwrap();

        let params = SalpaParams {
            fs_hz: 10000.0,
            probechans: 1,
            ..SalpaParams::default()
        };
        let cfg = RunConfig::from_params(&params).unwrap();
        let err = process_file(&input, &output, &cfg, &[]).unwrap_err();
        assert!(err.to_string().contains("noise"), "{}", err);
        assert!(!output.exists());

        let err = process_file(&input, &output, &config(1, 0), &[ForcedPeg::new(u64::MAX, None)])
            .unwrap_err();
        assert!(matches!(err, SalpaError::ConfigError(_)), "{}", err);
        assert!(!output.exists());
    }

    #[test]
    fn test_process_channel() {
        let params = EngineParams {
            tau: 4,
            rail1: -50.0,
            rail2: 50.0,
            y_threshold: 5.0,
            forcepeg: 2,
            postblank: 2,
            ..EngineParams::default()
        };
        let data: Vec<f32> = (0..60).map(|i| if i == 30 { 80.0 } else { 1.0 }).collect();
        let out = process_channel(&data, params, &[ForcedPeg::new(10, None)]).unwrap();
        assert_eq!(out.len(), 60);
        assert_eq!(out[10].mode, crate::engine::Mode::Pegged);
        assert_eq!(out[11].mode, crate::engine::Mode::Pegged);
        assert_eq!(out[30].mode, crate::engine::Mode::Pegged);
        assert!(out.iter().all(|o| o.value.abs() <= 50.0));
    }
}
