use salpa_rs::fit::PolynomialFitter;
use salpa_rs::ring::SampleRing;
use salpa_rs::{
    process_channel, process_interleaved, ChannelEngine, EngineParams, ForcedPeg, Mode, Output,
    OutputMode, PegKind, PegScheduler, RunConfig, SalpaParams,
};

/// Deterministic pseudo-noise in [-1, 1).
struct Lcg(u64);

impl Lcg {
    fn next(&mut self) -> f32 {
        self.0 = self
            .0
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        ((self.0 >> 40) as f32 / (1u64 << 24) as f32) * 2.0 - 1.0
    }
}

fn small_params() -> EngineParams {
    EngineParams {
        tau: 10,
        rail1: -100.0,
        rail2: 100.0,
        y_threshold: 1.0,
        forcepeg: 5,
        postblank: 24,
        postblank_interruptible: false,
        t_ahead: 5,
        t_chi2: 15,
        t_blankdepeg: 5,
        output_mode: OutputMode::Substitute,
        periodic: None,
    }
}

fn modes(out: &[Output]) -> Vec<Mode> {
    out.iter().map(|o| o.mode).collect()
}

// =============================================================================
// LENGTH AND PASS-THROUGH
// =============================================================================

#[test]
fn test_every_scan_is_emitted_and_aux_is_untouched() {
    let params = SalpaParams {
        fs_hz: 10000.0,
        probechans: 3,
        extrachans: 2,
        thr_abs: Some(15.0),
        halfwidth: 1.5,
        forcepeg: 0.5,
        postblank: 2.0,
        rail1: -2000.0,
        rail2: 2000.0,
        block_scans: 100,
        ..SalpaParams::default()
    };
    let config = RunConfig::from_params(&params).unwrap();

    let mut rng = Lcg(42);
    let scans = 2500;
    let mut data = Vec::with_capacity(scans * 5);
    for s in 0..scans {
        for c in 0..5 {
            let v = if c < 3 && (1200..1230).contains(&s) {
                2500.0
            } else {
                5.0 * rng.next() + 30.0 * (s as f32 / 40.0).sin()
            };
            data.push(v as i16);
        }
    }
    let pegs = [ForcedPeg::new(600, Some(12)), ForcedPeg::new(1900, None)];

    let (out, summaries) = process_interleaved(&data, &config, &pegs).unwrap();
    assert_eq!(out.len(), data.len());
    for s in 0..scans {
        assert_eq!(out[s * 5 + 3], data[s * 5 + 3], "aux 0 scan {}", s);
        assert_eq!(out[s * 5 + 4], data[s * 5 + 4], "aux 1 scan {}", s);
    }
    for summary in &summaries {
        assert_eq!(summary.stats.forced_pegs, 2);
        assert_eq!(summary.stats.rail_hits, 30);
    }
}

#[test]
fn test_clean_channel_is_unchanged() {
    let mut params = small_params();
    params.rail1 = -30000.0;
    params.rail2 = 30000.0;
    params.y_threshold = 40.0;
    let mut rng = Lcg(7);
    let data: Vec<f32> = (0..5000)
        .map(|i| {
            let t = i as f32;
            (800.0 * (t / 300.0).sin() + 5.0 * rng.next()).round()
        })
        .collect();

    let out = process_channel(&data, params, &[]).unwrap();
    assert_eq!(out.len(), data.len());
    for (o, &x) in out.iter().zip(data.iter()) {
        assert_eq!(o.mode, Mode::Normal, "sample {}", o.index);
        assert_eq!(o.value, x);
    }
}

// =============================================================================
// PEGGING
// =============================================================================

#[test]
fn test_forced_peg_replaces_samples() {
    let params = small_params();
    let a = 300usize;
    let d = 20u64;
    let data: Vec<f32> = (0..800)
        .map(|i| {
            if (a..a + d as usize).contains(&i) {
                90.0
            } else {
                20.0 * (i as f32 / 50.0).sin()
            }
        })
        .collect();

    let out = process_channel(&data, params, &[ForcedPeg::new(a as u64, Some(d))]).unwrap();
    for o in &out[a..a + d as usize] {
        assert_eq!(o.mode, Mode::Pegged);
        assert_ne!(o.value, data[o.index as usize]);
        assert!(o.value.abs() <= 100.0);
    }
    assert!(out[..a].iter().all(|o| o.mode == Mode::Normal));
}

#[test]
fn test_sample_at_rail_pegs() {
    for rail in [-100.0f32, 100.0] {
        let mut data = vec![0.0f32; 200];
        data[120] = rail;
        let out = process_channel(&data, small_params(), &[]).unwrap();
        assert_eq!(out[119].mode, Mode::Normal);
        assert_eq!(out[120].mode, Mode::Pegged, "rail {}", rail);
        assert_eq!(out[120].value, 0.0);
    }
}

#[test]
fn test_recovery_takes_exactly_t_ahead_plus_t_blankdepeg() {
    for (t_ahead, t_blankdepeg) in [(5, 5), (3, 8), (10, 1)] {
        let mut params = small_params();
        params.t_ahead = t_ahead;
        params.t_blankdepeg = t_blankdepeg;
        let (a, d) = (200u64, 10u64);
        let data = vec![3.0f32; 500];
        let out = process_channel(&data, params, &[ForcedPeg::new(a, Some(d))]).unwrap();

        let release = (a + d + params.postblank) as usize;
        let normal_at = release + t_ahead + t_blankdepeg;
        let m = modes(&out);
        assert!(m[a as usize..release].iter().all(|&x| x == Mode::Pegged));
        assert!(
            m[release..normal_at].iter().all(|&x| x == Mode::Recovering),
            "t_ahead={} t_blankdepeg={}",
            t_ahead,
            t_blankdepeg
        );
        assert!(m[normal_at..].iter().all(|&x| x == Mode::Normal));
    }
}

#[test]
fn test_decaying_tail_holds_recovery() {
    let params = EngineParams {
        tau: 30,
        rail1: -1000.0,
        rail2: 1000.0,
        y_threshold: 5.0,
        forcepeg: 9,
        postblank: 0,
        ..small_params()
    };
    let tail = |i: usize| 800.0 * (-((i - 1010) as f32) / 40.0).exp();
    let data: Vec<f32> = (0..1600)
        .map(|i| match i {
            0..=999 => 0.0,
            1000..=1009 => 1000.0,
            _ => tail(i),
        })
        .collect();

    let out = process_channel(&data, params, &[]).unwrap();
    assert!(out[1000..1010].iter().all(|o| o.mode == Mode::Pegged));
    assert_eq!(out[1010].mode, Mode::Recovering);
    // No validation before a full window has been seen after the peg
    let window = 2 * params.tau + 1;
    let earliest = 1010 + window - 1 - params.t_ahead + params.t_blankdepeg;
    assert!(
        out[1010..earliest].iter().all(|o| o.mode != Mode::Normal),
        "normal while the tail is at {}",
        tail(1020)
    );
    let first_normal = out[1010..]
        .iter()
        .find(|o| o.mode == Mode::Normal)
        .map(|o| o.index as usize)
        .unwrap();
    assert!(first_normal >= earliest);
    for o in out[1010..].iter().filter(|o| o.mode == Mode::Normal) {
        assert!(o.value.abs() <= tail(earliest), "{:?}", o);
    }
}

#[test]
fn test_new_baseline_recovers_after_full_window() {
    let params = small_params();
    let data: Vec<f32> = (0..500)
        .map(|i| match i {
            0..=199 => 0.0,
            200..=209 => 150.0,
            _ => 40.0,
        })
        .collect();

    let out = process_channel(&data, params, &[]).unwrap();
    let release = 210 + params.postblank as usize;
    let window = 2 * params.tau + 1;
    let normal_at = release + window - 1 - params.t_ahead + params.t_blankdepeg;
    let m = modes(&out);
    assert!(m[200..release].iter().all(|&x| x == Mode::Pegged));
    assert!(m[release..normal_at].iter().all(|&x| x == Mode::Recovering));
    assert!(m[normal_at..].iter().all(|&x| x == Mode::Normal));
    for o in &out[release..] {
        assert!((o.value - 40.0).abs() < 1e-3, "{:?}", o);
    }
}

#[test]
fn test_forced_and_detected_intervals_merge() {
    let mut pegs = PegScheduler::new(5);
    for i in 95..105 {
        pegs.mark_corrupted(i);
    }
    pegs.register_forced(100, 10).unwrap();
    let merged: Vec<_> = pegs.intervals().copied().collect();
    assert_eq!(merged.len(), 1);
    assert_eq!((merged[0].start, merged[0].end), (95, 110));
    assert_eq!(merged[0].kind, PegKind::Forced);

    let mut engine = ChannelEngine::new(0, small_params()).unwrap();
    engine.force_peg(100, 10).unwrap();
    let data: Vec<f32> = (0..400)
        .map(|i| if (95..105).contains(&i) { 150.0 } else { 0.0 })
        .collect();
    let mut out: Vec<Output> = data.iter().filter_map(|&x| engine.step(x)).collect();
    out.extend(engine.finish());

    let stats = engine.stats();
    assert_eq!(stats.pegs, 1);
    assert_eq!(stats.forced_pegs, 1);
    assert!(out[95..134].iter().all(|o| o.mode == Mode::Pegged));
    assert_eq!(out[134].mode, Mode::Recovering);
}

// =============================================================================
// END TO END
// =============================================================================

#[test]
fn test_out_of_rail_block_end_to_end() {
    let params = small_params();
    let mut data = vec![0.0f32; 10_000];
    for x in data.iter_mut().take(4500).skip(4000) {
        *x = 1000.0;
    }

    let out = process_channel(&data, params, &[]).unwrap();
    assert_eq!(out.len(), 10_000);

    let pegged_end = 4500 + params.postblank as usize;
    let recovered = pegged_end + params.t_ahead + params.t_blankdepeg;
    for o in &out {
        let i = o.index as usize;
        let expected = if (4000..pegged_end).contains(&i) {
            Mode::Pegged
        } else if (pegged_end..recovered).contains(&i) {
            Mode::Recovering
        } else {
            Mode::Normal
        };
        assert_eq!(o.mode, expected, "sample {}", i);
        assert!(o.value >= params.rail1 && o.value <= params.rail2);
        if expected != Mode::Normal {
            assert!(o.value.abs() < 1e-3, "sample {} = {}", i, o.value);
        } else {
            assert_eq!(o.value, data[i]);
        }
    }
}

#[test]
fn test_pegged_substitute_never_exceeds_rails() {
    let mut params = small_params();
    params.postblank = 0;
    params.y_threshold = 1000.0;
    // Steep ramp into the rail: the extrapolated fit would overshoot
    let data: Vec<f32> = (0..400)
        .map(|i| match i {
            0..=199 => 0.0,
            200..=239 => 2.4 * (i - 199) as f32,
            240..=259 => 150.0,
            _ => 0.0,
        })
        .collect();
    let out = process_channel(&data, params, &[]).unwrap();
    assert!(out.iter().any(|o| o.mode == Mode::Pegged));
    for o in out.iter().filter(|o| o.mode == Mode::Pegged) {
        assert!(o.value <= 100.0 && o.value >= -100.0, "{:?}", o);
    }
}

// =============================================================================
// FITTER
// =============================================================================

#[test]
fn test_incremental_fit_tracks_naive_refit_on_long_stream() {
    let tau = 90;
    let n = 20_000u64;
    let mut rng = Lcg(2024);
    let mut ring = SampleRing::with_capacity(n as usize);
    for i in 0..n {
        let t = i as f32;
        ring.push(3000.0 * (t / 700.0).sin() + 200.0 * (t / 31.0).cos() + 40.0 * rng.next());
    }

    let mut rolling = PolynomialFitter::new(tau).unwrap();
    let mut naive = PolynomialFitter::new(tau).unwrap();
    rolling.fit_window(&ring, tau as u64);
    for center in (tau as u64 + 1)..(n - tau as u64) {
        let fast = rolling.slide(&ring).unwrap();
        if center % 7 != 0 {
            continue;
        }
        let exact = naive.fit_window(&ring, center);
        for probe in [center - 5, center, center + tau as u64 + 3] {
            let diff = (fast.evaluate(probe) - exact.evaluate(probe)).abs();
            assert!(diff < 1e-4, "center {} probe {} diff {}", center, probe, diff);
        }
    }
}
