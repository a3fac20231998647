use crate::cli::InfoArgs;
use crate::exit_codes;
use crate::output;
use crate::params;
use salpa_rs::{RunConfig, SalpaRunner};
use serde::Serialize;

#[derive(Serialize)]
struct InfoOutput {
    cli_version: String,
    config: RunConfig,
    forced_pegs: usize,
    binary_path: Option<String>,
    binary_found: bool,
    platform: String,
    arch: String,
}

pub fn execute(args: InfoArgs) -> i32 {
    let (config, pegs) = match params::build_config(&args.config) {
        Ok(c) => c,
        Err(msg) => {
            eprintln!("Error: {}", msg);
            return exit_codes::INPUT_ERROR;
        }
    };

    let runner = match &args.binary {
        Some(path) => SalpaRunner::new(path),
        None => SalpaRunner::discover(),
    };

    let info = InfoOutput {
        cli_version: env!("CARGO_PKG_VERSION").to_string(),
        forced_pegs: pegs.len(),
        binary_path: match (&runner, &args.binary) {
            (Ok(r), _) => Some(r.binary_path().display().to_string()),
            (Err(_), Some(path)) => Some(path.display().to_string()),
            (Err(_), None) => None,
        },
        binary_found: runner.is_ok(),
        platform: std::env::consts::OS.to_string(),
        arch: std::env::consts::ARCH.to_string(),
        config,
    };

    if args.json {
        if let Err(e) = output::emit_json(&info, false, None) {
            eprintln!("Error: {}", e);
            return exit_codes::EXECUTION_ERROR;
        }
    } else {
        let c = &info.config;
        println!("salpa v{}", info.cli_version);
        println!("Platform: {} ({})", info.platform, info.arch);
        println!();
        println!("Sampling rate: {} Hz", c.fs_hz);
        println!(
            "Channels: {} probe, {} auxiliary",
            c.probe_chans,
            c.aux_chans()
        );
        println!("Threshold: {:?}", c.threshold);
        println!("Fit half-width (tau): {} samples", c.tau);
        println!("Rails: [{}, {}]", c.rail1, c.rail2);
        println!(
            "Forced peg minimum: {} samples, post-blank: {} samples{}",
            c.forcepeg,
            c.postblank,
            if c.postblank_interruptible {
                " (interruptible)"
            } else {
                ""
            }
        );
        println!(
            "t_ahead: {}, t_chi2: {}, t_blankdepeg: {}",
            c.t_ahead, c.t_chi2, c.t_blankdepeg
        );
        if let Some(period) = c.period {
            println!("Periodic pegs: every {} samples from {}", period, c.delay);
        }
        if info.forced_pegs > 0 {
            println!("Forced pegs from file: {}", info.forced_pegs);
        }
        println!("Output: {:?}", c.output_mode);
        println!();
        match &info.binary_path {
            Some(path) if info.binary_found => println!("salpa binary: {}", path),
            Some(path) => println!("salpa binary: {} (not found)", path),
            None => println!("salpa binary: not found"),
        }
    }

    if args.binary.is_some() && !info.binary_found {
        return exit_codes::BINARY_NOT_FOUND;
    }
    exit_codes::SUCCESS
}
