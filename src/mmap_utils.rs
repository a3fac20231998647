use crate::error::{Result, SalpaError};
use memmap2::Mmap;
use std::fs::File;
use std::path::Path;

/// Bytes per stored sample (little-endian `i16`).
pub const SAMPLE_BYTES: usize = 2;

/// Open a recording and map it into memory (read-only).
pub fn mmap_file(path: &Path) -> Result<Mmap> {
    if !path.exists() {
        return Err(SalpaError::FileNotFound(path.display().to_string()));
    }
    let file = File::open(path).map_err(SalpaError::IoError)?;
    let mmap = unsafe { Mmap::map(&file).map_err(SalpaError::IoError)? };
    Ok(mmap)
}

/// Whole scans in `bytes` and the number of bytes left over after them.
pub fn scan_layout(bytes: usize, total_chans: usize) -> (u64, usize) {
    let scan_bytes = total_chans * SAMPLE_BYTES;
    if scan_bytes == 0 {
        return (0, bytes);
    }
    ((bytes / scan_bytes) as u64, bytes % scan_bytes)
}

pub fn decode_samples(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(SAMPLE_BYTES)
        .map(|b| i16::from_le_bytes([b[0], b[1]]))
        .collect()
}

pub fn encode_samples(samples: &[i16], out: &mut Vec<u8>) {
    out.reserve(samples.len() * SAMPLE_BYTES);
    for s in samples {
        out.extend_from_slice(&s.to_le_bytes());
    }
}
