use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "salpa",
    version,
    about = "SALPA artifact suppression for multichannel extracellular recordings",
    long_about = "Suppress stimulation and saturation artifacts by Local Polynomial Approximation.\n\
                  Input and output are raw interleaved little-endian 16-bit scans, probe channels first."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
}

#[derive(Subcommand)]
pub enum Command {
    /// Remove artifacts from a recording
    Run(RunArgs),
    /// Show the resolved sample-domain configuration
    Info(InfoArgs),
    /// Check an input file and peg file against a channel layout
    Validate(ValidateArgs),
}

/// Parameters shared by every subcommand. Flags override `--params`.
#[derive(Args, Debug, Clone, Default)]
pub struct ConfigArgs {
    /// JSON parameter file (fs_Hz, probechans, thr_rms, halfwidth, ...)
    #[arg(long)]
    pub params: Option<PathBuf>,

    /// Sampling rate in Hz
    #[arg(long)]
    pub fs_hz: Option<f64>,

    /// Number of probe channels
    #[arg(short = 'c', long)]
    pub probe_chans: Option<usize>,

    /// Total channels per scan (probe + auxiliary)
    #[arg(short = 'C', long)]
    pub total_chans: Option<usize>,

    /// Detection threshold in units of RMS noise
    #[arg(short = 'x', long, conflicts_with = "thr_abs")]
    pub thr_rms: Option<f32>,

    /// Detection threshold in digital units
    #[arg(short = 't', long)]
    pub thr_abs: Option<f32>,

    /// Fit half-width in milliseconds
    #[arg(short = 'l', long)]
    pub halfwidth_ms: Option<f64>,

    /// Minimum forced-peg duration in milliseconds
    #[arg(short = 'f', long)]
    pub forcepeg_ms: Option<f64>,

    /// Blanking after the end of an artifact in milliseconds
    #[arg(short = 'b', long)]
    pub postblank_ms: Option<f64>,

    /// End post-artifact blanking early when the signal crosses its baseline
    #[arg(long, default_value_t = false)]
    pub postblank_interruptible: bool,

    /// Consistent samples required before leaving recovery
    #[arg(long)]
    pub t_blankdepeg: Option<usize>,

    /// Look-ahead in samples
    #[arg(long)]
    pub t_ahead: Option<usize>,

    /// Samples in the goodness-of-fit window
    #[arg(long)]
    pub t_chi2: Option<usize>,

    /// Low rail (saturation) value
    #[arg(long, allow_hyphen_values = true)]
    pub rail1: Option<f32>,

    /// High rail (saturation) value
    #[arg(long, allow_hyphen_values = true)]
    pub rail2: Option<f32>,

    /// Peg file: one "<index> [<duration>]" line per stimulus
    #[arg(short = 'P', long, conflicts_with = "period_ms")]
    pub pegs: Option<PathBuf>,

    /// Force a peg every this many milliseconds
    #[arg(long)]
    pub period_ms: Option<f64>,

    /// Time of the first periodic peg in milliseconds
    #[arg(long, requires = "period_ms")]
    pub delay_ms: Option<f64>,

    /// Scans to skip at the start of the input
    #[arg(short = 'M', long)]
    pub skip: Option<u64>,

    /// Scans to process (default: to end of input)
    #[arg(short = 'N', long)]
    pub lim: Option<u64>,

    /// Subtract each channel's estimated baseline before processing
    #[arg(short = 'B', long, default_value_t = false)]
    pub baseline: bool,

    /// Worker threads (default: one per core)
    #[arg(short = 'T', long)]
    pub threads: Option<usize>,

    /// Scans per processing block
    #[arg(short = 'S', long)]
    pub block_scans: Option<usize>,

    /// Write the residual after removing the local fit instead of the cleaned signal
    #[arg(long, default_value_t = false)]
    pub detrend: bool,
}

#[derive(Args)]
pub struct RunArgs {
    #[command(flatten)]
    pub config: ConfigArgs,

    /// Input recording
    #[arg(short = 'i', long)]
    pub input: PathBuf,

    /// Output recording (overwritten if it exists)
    #[arg(short = 'o', long)]
    pub output: PathBuf,

    /// Print the run summary as JSON on stdout
    #[arg(long, default_value_t = false)]
    pub json: bool,

    /// Also write the JSON run summary to this file
    #[arg(long)]
    pub summary: Option<PathBuf>,

    /// Compact JSON output (no indentation)
    #[arg(long, default_value_t = false)]
    pub compact: bool,

    /// Suppress progress messages on stderr
    #[arg(short, long, default_value_t = false)]
    pub quiet: bool,
}

#[derive(Args)]
pub struct InfoArgs {
    #[command(flatten)]
    pub config: ConfigArgs,

    /// Path to a salpa binary to report on
    #[arg(long, env = "SALPA_BINARY_PATH")]
    pub binary: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, default_value_t = false)]
    pub json: bool,
}

#[derive(Args)]
pub struct ValidateArgs {
    #[command(flatten)]
    pub config: ConfigArgs,

    /// Input recording
    #[arg(short = 'i', long)]
    pub input: PathBuf,

    /// Output as JSON
    #[arg(long, default_value_t = false)]
    pub json: bool,
}
