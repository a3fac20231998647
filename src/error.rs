use thiserror::Error;

#[derive(Error, Debug)]
pub enum SalpaError {
    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    #[error("Insufficient history for fit: {available} valid samples, need {required}")]
    InsufficientHistory { available: usize, required: usize },

    #[error("SALPA run failed: {0}")]
    RunFailure(String),

    #[error("SALPA binary not found at: {0}")]
    BinaryNotFound(String),

    #[error("Input file not found: {0}")]
    FileNotFound(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl From<serde_json::Error> for SalpaError {
    fn from(e: serde_json::Error) -> Self {
        SalpaError::ConfigError(format!("Failed to parse parameters: {}", e))
    }
}

pub type Result<T> = std::result::Result<T, SalpaError>;
