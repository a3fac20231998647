use crate::error::{Result, SalpaError};
use log::warn;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::path::Path;

/// One forced peg as listed in a peg file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForcedPeg {
    /// Sample index of the stimulus.
    pub start: u64,
    /// Duration in samples; `None` means the configured minimum.
    pub duration: Option<u64>,
}

impl ForcedPeg {
    pub fn new(start: u64, duration: Option<u64>) -> Self {
        Self { start, duration }
    }
}

/// Parse peg-file text.
///
/// Each line is `<stimulus_index> [<duration>]`. Blank lines and `#`
/// comments are ignored. Anything else is a `ConfigError` naming the line.
pub fn parse_peg_file(content: &str) -> Result<Vec<ForcedPeg>> {
    let mut pegs = Vec::new();

    for (lineno, raw) in content.lines().enumerate() {
        let line = raw.split('#').next().unwrap_or("").trim();
        if line.is_empty() {
            continue;
        }

        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() > 2 {
            return Err(SalpaError::ConfigError(format!(
                "Peg file line {}: expected '<index> [<duration>]', got {} fields",
                lineno + 1,
                fields.len()
            )));
        }

        let parse = |field: &str, what: &str| {
            field.parse::<u64>().map_err(|_| {
                SalpaError::ConfigError(format!(
                    "Peg file line {}: invalid {} '{}'",
                    lineno + 1,
                    what,
                    field
                ))
            })
        };

        let start = parse(fields[0], "stimulus index")?;
        let duration = match fields.get(1) {
            Some(f) => Some(parse(f, "duration")?),
            None => None,
        };
        if start.checked_add(duration.unwrap_or(0)).is_none() {
            return Err(SalpaError::ConfigError(format!(
                "Peg file line {}: peg at {} lasting {} runs past the last sample index",
                lineno + 1,
                start,
                duration.unwrap_or(0)
            )));
        }
        pegs.push(ForcedPeg::new(start, duration));
    }

    Ok(pegs)
}

pub fn load_peg_file(path: &Path) -> Result<Vec<ForcedPeg>> {
    if !path.exists() {
        return Err(SalpaError::FileNotFound(path.display().to_string()));
    }
    let content = std::fs::read_to_string(path)?;
    parse_peg_file(&content)
}

/// Write pegs as `<index> <duration>` lines, filling missing durations with `default_duration`.
pub fn write_peg_file(path: &Path, pegs: &[ForcedPeg], default_duration: u64) -> Result<()> {
    let mut content = String::with_capacity(pegs.len() * 16);
    for peg in pegs {
        let _ = writeln!(
            content,
            "{} {}",
            peg.start,
            peg.duration.unwrap_or(default_duration)
        );
    }
    std::fs::write(path, content)?;
    Ok(())
}

/// Re-express absolute recording indices relative to the first processed scan.
///
/// Pegs entirely before `skip` are dropped; one straddling `skip` keeps its tail.
pub fn relative_to_skip(pegs: &[ForcedPeg], skip: u64, forcepeg: u64) -> Result<Vec<ForcedPeg>> {
    let mut dropped = 0usize;
    let mut shifted = Vec::with_capacity(pegs.len());
    for peg in pegs {
        if peg.start >= skip {
            shifted.push(ForcedPeg::new(peg.start - skip, peg.duration));
            continue;
        }
        let len = peg.duration.unwrap_or(forcepeg).max(forcepeg);
        let end = peg.start.checked_add(len).ok_or_else(|| {
            SalpaError::ConfigError(format!(
                "Forced peg at {} lasting {} runs past the last sample index",
                peg.start, len
            ))
        })?;
        if end > skip {
            shifted.push(ForcedPeg::new(0, Some(end - skip)));
        } else {
            dropped += 1;
        }
    }

    if dropped > 0 {
        warn!(
            "{} forced peg(s) end before the first processed scan ({}) and are ignored",
            dropped, skip
        );
    }
    Ok(shifted)
}
