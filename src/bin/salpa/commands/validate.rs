use crate::cli::ValidateArgs;
use crate::exit_codes;
use crate::output;
use crate::params;
use salpa_rs::mmap_utils::{scan_layout, SAMPLE_BYTES};
use serde::Serialize;

#[derive(Serialize)]
struct ValidateOutput {
    file: String,
    exists: bool,
    readable: bool,
    size_bytes: Option<u64>,
    total_chans: Option<usize>,
    scans: Option<u64>,
    trailing_bytes: Option<usize>,
    duration_s: Option<f64>,
    forced_pegs: usize,
    pegs_outside_input: usize,
    warnings: Vec<String>,
    error: Option<String>,
}

pub fn execute(args: ValidateArgs) -> i32 {
    let path = &args.input;
    let exists = path.exists();
    let readable = path.is_file() && std::fs::File::open(path).is_ok();
    let size_bytes = if readable {
        std::fs::metadata(path).ok().map(|m| m.len())
    } else {
        None
    };

    let mut result = ValidateOutput {
        file: path.display().to_string(),
        exists,
        readable,
        size_bytes,
        total_chans: None,
        scans: None,
        trailing_bytes: None,
        duration_s: None,
        forced_pegs: 0,
        pegs_outside_input: 0,
        warnings: Vec::new(),
        error: None,
    };

    let config = params::build_config(&args.config);
    if !exists {
        result.error = Some(format!("File not found: {}", path.display()));
    } else if !readable {
        result.error = Some(format!("File is not readable: {}", path.display()));
    }

    match config {
        Err(msg) => {
            if result.error.is_none() {
                result.error = Some(msg);
            }
        }
        Ok((config, pegs)) => {
            result.total_chans = Some(config.total_chans);
            result.forced_pegs = pegs.len();
            if let Some(size) = size_bytes {
                let (scans, trailing) = scan_layout(size as usize, config.total_chans);
                result.scans = Some(scans);
                result.trailing_bytes = Some(trailing);
                result.duration_s = Some(scans as f64 / config.fs_hz);

                if trailing > 0 {
                    result.warnings.push(format!(
                        "{} trailing bytes do not form a whole scan of {} bytes",
                        trailing,
                        config.total_chans * SAMPLE_BYTES
                    ));
                }
                if config.skip >= scans && scans > 0 {
                    result.warnings.push(format!(
                        "skip ({}) leaves no scans to process",
                        config.skip
                    ));
                }

                let last = match config.lim {
                    Some(lim) => config.skip.saturating_add(lim).min(scans),
                    None => scans,
                };
                result.pegs_outside_input = pegs
                    .iter()
                    .filter(|p| p.start < config.skip || p.start >= last)
                    .count();
                if result.pegs_outside_input > 0 {
                    result.warnings.push(format!(
                        "{} forced pegs fall outside the processed scans",
                        result.pegs_outside_input
                    ));
                }
            }
        }
    }

    if args.json {
        if let Err(e) = output::emit_json(&result, false, None) {
            eprintln!("Error: {}", e);
            return exit_codes::EXECUTION_ERROR;
        }
    } else if let Some(ref err) = result.error {
        eprintln!("Error: {}", err);
    } else {
        for warning in &result.warnings {
            eprintln!("Warning: {}", warning);
        }
        println!(
            "File '{}' is valid ({} scans of {} channels, {:.3} s)",
            result.file,
            result.scans.unwrap_or(0),
            result.total_chans.unwrap_or(0),
            result.duration_s.unwrap_or(0.0)
        );
    }

    if result.error.is_some() {
        exit_codes::INPUT_ERROR
    } else {
        exit_codes::SUCCESS
    }
}
