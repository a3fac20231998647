//! SALPA: Suppression of Artifacts by Local Polynomial Approximation.
//!
//! Each probe channel of a multichannel recording runs through a
//! [`ChannelEngine`] that tracks a local cubic fit of the signal, detects
//! amplifier saturation and fit-inconsistent excursions, and replaces
//! corrupted stretches (and known stimulus times) with the fit's
//! continuation until the raw signal is consistent with a fresh fit again.

pub mod config;
pub mod detector;
pub mod driver;
pub mod engine;
pub mod error;
pub mod fit;
pub mod mmap_utils;
pub mod noise;
pub mod pegfile;
pub mod pegs;
pub mod ring;
pub mod runner;
pub mod types;

pub use config::{load_params, RunConfig};
pub use driver::{process_channel, process_file, process_interleaved, MultiChannelProcessor};
pub use engine::{ChannelEngine, EngineParams, Mode, Output};
pub use error::{Result, SalpaError};
pub use pegfile::{load_peg_file, parse_peg_file, ForcedPeg};
pub use pegs::{PegInterval, PegKind, PegScheduler};
pub use runner::SalpaRunner;
pub use types::*;
