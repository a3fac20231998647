use crate::cli::ConfigArgs;
use salpa_rs::{load_params, load_peg_file, ForcedPeg, RunConfig, SalpaParams};

/// Parameters from `--params` (or defaults) with command-line overrides applied.
pub fn resolve_params(args: &ConfigArgs) -> Result<SalpaParams, String> {
    let mut params = match &args.params {
        Some(path) => load_params(path).map_err(|e| e.to_string())?,
        None => SalpaParams::default(),
    };

    if let Some(fs) = args.fs_hz {
        params.fs_hz = fs;
    }
    if let Some(n) = args.probe_chans {
        params.probechans = n;
    }
    if let Some(n) = args.total_chans {
        params.totalchans = Some(n);
    }
    if let Some(thr) = args.thr_rms {
        params.thr_rms = Some(thr);
        params.thr_abs = None;
    }
    if let Some(thr) = args.thr_abs {
        params.thr_abs = Some(thr);
    }
    if let Some(ms) = args.halfwidth_ms {
        params.halfwidth = ms;
    }
    if let Some(ms) = args.forcepeg_ms {
        params.forcepeg = ms;
    }
    if let Some(ms) = args.postblank_ms {
        params.postblank = ms;
    }
    if args.postblank_interruptible {
        params.postblankinterruptible = true;
    }
    if let Some(n) = args.t_blankdepeg {
        params.t_blankdepeg = n;
    }
    if let Some(n) = args.t_ahead {
        params.t_ahead = n;
    }
    if let Some(n) = args.t_chi2 {
        params.t_chi2 = n;
    }
    if let Some(v) = args.rail1 {
        params.rail1 = v;
    }
    if let Some(v) = args.rail2 {
        params.rail2 = v;
    }
    if let Some(ms) = args.period_ms {
        params.period = Some(ms);
    }
    if let Some(ms) = args.delay_ms {
        params.delay = ms;
    }
    if let Some(n) = args.skip {
        params.skip = n;
    }
    if let Some(n) = args.lim {
        params.lim = Some(n);
    }
    if args.baseline {
        params.baseline = true;
    }
    if let Some(n) = args.threads {
        params.threads = Some(n);
    }
    if let Some(n) = args.block_scans {
        params.block_scans = n;
    }
    if args.detrend {
        params.detrend = true;
    }

    Ok(params)
}

/// Sample-domain configuration plus the forced pegs from `--pegs`.
pub fn build_config(args: &ConfigArgs) -> Result<(RunConfig, Vec<ForcedPeg>), String> {
    let params = resolve_params(args)?;
    let config = RunConfig::from_params(&params).map_err(|e| e.to_string())?;

    match &args.pegs {
        Some(path) => {
            let pegs = load_peg_file(path).map_err(|e| e.to_string())?;
            let config = config.with_peg_file().map_err(|e| e.to_string())?;
            Ok((config, pegs))
        }
        None => Ok((config, Vec::new())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use salpa_rs::Threshold;
    use std::path::PathBuf;

    #[test]
    fn test_defaults_without_file() {
        let params = resolve_params(&ConfigArgs::default()).unwrap();
        assert_eq!(params, SalpaParams::default());
    }

    #[test]
    fn test_flags_override_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("params.json");
        std::fs::write(
            &path,
            r#"{"fs_Hz": 20000, "probechans": 8, "thr_abs": 40, "halfwidth": 2.0}"#,
        )
        .unwrap();

        let args = ConfigArgs {
            params: Some(path),
            probe_chans: Some(4),
            thr_rms: Some(4.5),
            ..ConfigArgs::default()
        };
        let params = resolve_params(&args).unwrap();
        assert_eq!(params.fs_hz, 20000.0);
        assert_eq!(params.probechans, 4);
        assert_eq!(params.halfwidth, 2.0);
        assert_eq!(params.thr_abs, None);

        let (config, pegs) = build_config(&args).unwrap();
        assert_eq!(config.threshold, Threshold::RmsScaled(4.5));
        assert_eq!(config.tau, 40);
        assert!(pegs.is_empty());
    }

    #[test]
    fn test_unknown_parameter_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("params.json");
        std::fs::write(&path, r#"{"prepeg": 0.5}"#).unwrap();
        let args = ConfigArgs {
            params: Some(path),
            ..ConfigArgs::default()
        };
        let err = resolve_params(&args).unwrap_err();
        assert!(err.contains("prepeg"), "{}", err);
    }

    #[test]
    fn test_peg_file_is_loaded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pegs.txt");
        std::fs::write(&path, "100 9\n300\n").unwrap();
        let args = ConfigArgs {
            pegs: Some(path),
            ..ConfigArgs::default()
        };
        let (config, pegs) = build_config(&args).unwrap();
        assert!(config.peg_file);
        assert_eq!(pegs.len(), 2);

        let missing = ConfigArgs {
            pegs: Some(PathBuf::from("/nonexistent/pegs.txt")),
            ..ConfigArgs::default()
        };
        assert!(build_config(&missing).is_err());
    }
}
