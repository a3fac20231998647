use crate::config::ms_to_samples;
use crate::error::{Result, SalpaError};
use crate::pegfile::{write_peg_file, ForcedPeg};
use crate::types::{RunRequest, RunSummary};
use std::path::{Path, PathBuf};
use tokio::process::Command;
use uuid::Uuid;

/// Environment variable naming the `salpa` executable.
pub const BINARY_ENV: &str = "SALPA_BINARY_PATH";

/// Drives an external `salpa` executable.
///
/// The binary path is explicit; nothing is resolved at load time.
pub struct SalpaRunner {
    binary_path: PathBuf,
}

impl SalpaRunner {
    /// Create a runner for the binary at `binary_path`, which must exist.
    pub fn new<P: AsRef<Path>>(binary_path: P) -> Result<Self> {
        let binary_path = binary_path.as_ref().to_path_buf();

        if !binary_path.exists() {
            return Err(SalpaError::BinaryNotFound(binary_path.display().to_string()));
        }

        Ok(Self { binary_path })
    }

    /// Locate the binary via `$SALPA_BINARY_PATH`, then next to the running executable.
    pub fn discover() -> Result<Self> {
        if let Ok(path) = std::env::var(BINARY_ENV) {
            return Self::new(path);
        }

        let sibling = std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(|dir| dir.join(binary_name())));
        match sibling {
            Some(path) if path.exists() => Self::new(path),
            _ => Err(SalpaError::BinaryNotFound(format!(
                "${} is not set and no {} next to the current executable",
                BINARY_ENV,
                binary_name()
            ))),
        }
    }

    pub fn binary_path(&self) -> &Path {
        &self.binary_path
    }

    /// Process `request.input` into `request.output` with the external binary.
    ///
    /// Any existing output file is removed first. A non-zero exit status
    /// becomes `RunFailure` carrying the process's stderr.
    pub async fn run(&self, request: &RunRequest) -> Result<RunSummary> {
        let run_id = Uuid::new_v4().to_string();

        if !request.input.exists() {
            return Err(SalpaError::FileNotFound(request.input.display().to_string()));
        }

        log::info!("Starting SALPA run for file: {}", request.input.display());
        log::info!("Parameters: {:?}", request.params);

        let temp_dir = std::env::temp_dir();
        let params_file = temp_dir.join(format!("salpa_params_{}.json", run_id));
        let params_json = serde_json::to_string_pretty(&request.params)
            .map_err(|e| SalpaError::RunFailure(format!("Failed to encode parameters: {}", e)))?;
        tokio::fs::write(&params_file, params_json).await?;

        let peg_file = match &request.stimuli {
            Some(stimuli) => {
                let path = temp_dir.join(format!("salpa_pegs_{}.txt", run_id));
                let forcepeg = ms_to_samples(request.params.fs_hz, request.params.forcepeg);
                let pegs: Vec<ForcedPeg> =
                    stimuli.iter().map(|&s| ForcedPeg::new(s, None)).collect();
                if let Err(e) = write_peg_file(&path, &pegs, forcepeg.max(1)) {
                    let _ = tokio::fs::remove_file(&params_file).await;
                    return Err(e);
                }
                Some(path)
            }
            None => None,
        };

        let result = self.execute(request, &params_file, peg_file.as_deref()).await;

        let _ = tokio::fs::remove_file(&params_file).await;
        if let Some(path) = &peg_file {
            let _ = tokio::fs::remove_file(path).await;
        }

        result
    }

    async fn execute(
        &self,
        request: &RunRequest,
        params_file: &Path,
        peg_file: Option<&Path>,
    ) -> Result<RunSummary> {
        if request.output.exists() {
            tokio::fs::remove_file(&request.output).await?;
        }

        let mut command = Command::new(&self.binary_path);
        command
            .arg("run")
            .arg("--params")
            .arg(params_file)
            .arg("--input")
            .arg(&request.input)
            .arg("--output")
            .arg(&request.output)
            .arg("--json")
            .arg("--quiet");
        if let Some(path) = peg_file {
            command.arg("--pegs").arg(path);
        }

        log::info!("Executing SALPA command: {:?}", command);

        let start_time = std::time::Instant::now();
        let output = command
            .output()
            .await
            .map_err(|e| SalpaError::RunFailure(format!("Failed to execute binary: {}", e)))?;

        log::info!(
            "SALPA binary finished in {:.2}s",
            start_time.elapsed().as_secs_f64()
        );

        if !output.status.success() {
            let stderr_str = String::from_utf8_lossy(&output.stderr);
            log::error!("SALPA binary failed with status: {}", output.status);
            log::error!("stderr: {}", stderr_str);

            return Err(SalpaError::RunFailure(format!(
                "Binary failed with status: {}. stderr: {}",
                output.status,
                stderr_str.trim()
            )));
        }

        serde_json::from_slice::<RunSummary>(&output.stdout)
            .map_err(|e| SalpaError::RunFailure(format!("Invalid run summary from binary: {}", e)))
    }
}

fn binary_name() -> &'static str {
    if cfg!(target_os = "windows") {
        "salpa.exe"
    } else {
        "salpa"
    }
}
