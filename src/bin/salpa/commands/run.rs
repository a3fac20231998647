use crate::cli::RunArgs;
use crate::exit_codes;
use crate::output;
use crate::params;
use salpa_rs::{process_file, SalpaError};

pub fn execute(args: RunArgs) -> i32 {
    let (config, pegs) = match params::build_config(&args.config) {
        Ok(c) => c,
        Err(msg) => {
            eprintln!("Error: {}", msg);
            return exit_codes::INPUT_ERROR;
        }
    };

    if !args.input.exists() {
        eprintln!("Error: Input file not found: {}", args.input.display());
        return exit_codes::INPUT_ERROR;
    }

    if !args.quiet {
        eprintln!("Running SALPA on {}...", args.input.display());
        eprintln!(
            "  Channels: {} probe, {} total",
            config.probe_chans, config.total_chans
        );
        eprintln!(
            "  Fit: tau={} samples, threshold={:?}",
            config.tau, config.threshold
        );
        if !pegs.is_empty() {
            eprintln!("  Forced pegs: {}", pegs.len());
        }
    }

    let summary = match process_file(&args.input, &args.output, &config, &pegs) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("SALPA failed: {}", e);
            return match e {
                SalpaError::ConfigError(_) | SalpaError::FileNotFound(_) => {
                    exit_codes::INPUT_ERROR
                }
                _ => exit_codes::EXECUTION_ERROR,
            };
        }
    };

    if let Some(path) = &args.summary {
        if let Err(e) = output::emit_json(&summary, args.compact, Some(path)) {
            eprintln!("Error: {}", e);
            return exit_codes::EXECUTION_ERROR;
        }
    }

    if args.json {
        if let Err(e) = output::emit_json(&summary, args.compact, None) {
            eprintln!("Error: {}", e);
            return exit_codes::EXECUTION_ERROR;
        }
    }

    if !args.quiet {
        eprintln!(
            "Wrote {} scans to {} ({} pegs)",
            summary.scans,
            args.output.display(),
            summary.total_pegs()
        );
    }

    exit_codes::SUCCESS
}
