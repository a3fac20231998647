use clap::Parser;
use std::process::ExitCode;

mod cli;
mod commands;
mod exit_codes;
mod output;
mod params;

use cli::{Cli, Command};

/// Overrides the `-v` filter, in `env_logger` filter syntax.
const LOG_ENV: &str = "SALPA_LOG";

/// `-v` raises the level for this crate only; dependencies stay at `warn`.
fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    let mut builder = env_logger::Builder::new();
    builder
        .filter_level(log::LevelFilter::Warn)
        .filter_module("salpa_rs", level)
        .filter_module("salpa", level)
        .format_timestamp(None)
        .format_target(verbose > 2);
    if let Ok(filters) = std::env::var(LOG_ENV) {
        builder.parse_filters(&filters);
    }
    builder.init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let code = match cli.command {
        Command::Run(args) => commands::run::execute(args),
        Command::Info(args) => commands::info::execute(args),
        Command::Validate(args) => commands::validate::execute(args),
    };
    log::debug!("exit status {}", code);
    ExitCode::from(u8::try_from(code).unwrap_or(exit_codes::EXECUTION_ERROR as u8))
}
