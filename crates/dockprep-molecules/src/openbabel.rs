//! Protonation, minimization and format conversion using Open Babel.

use dockprep_common::{PrepError, PreparationConfig, Result};
use std::path::{Path, PathBuf};
use std::process::Output;
use std::time::Duration;
use tokio::process::Command;
use tracing::{info, debug};

const TOOL: &str = "Open Babel";

/// Wrapper for `obabel` execution.
pub struct OpenBabelRunner {
    executable_path: PathBuf,
    timeout: Duration,
    partial_charge: String,
}

impl OpenBabelRunner {
    /// Create a new OpenBabelRunner with a 300 s per-call timeout.
    pub fn new<P: AsRef<Path>>(executable_path: P) -> Self {
        Self {
            executable_path: executable_path.as_ref().to_path_buf(),
            timeout: Duration::from_secs(300),
            partial_charge: "eem".to_string(),
        }
    }

    pub fn from_config(config: &PreparationConfig) -> Self {
        Self {
            executable_path: config.obabel_path.clone(),
            timeout: Duration::from_secs(config.tool_timeout_secs),
            partial_charge: config.partial_charge.clone(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Add hydrogens appropriate for `ph`.
    pub async fn protonate(&self, input: &Path, output: &Path, ph: f64) -> Result<PathBuf> {
        info!("Protonating {:?} at pH {}", input, ph);
        let args = ["-opdb".to_string(), "-p".to_string(), ph.to_string()];
        self.convert(input, &args, output).await
    }

    /// Local force-field energy minimization.
    pub async fn minimize(&self, input: &Path, output: &Path) -> Result<PathBuf> {
        info!("Minimizing {:?}", input);
        let args = ["-opdb".to_string(), "--minimize".to_string()];
        self.convert(input, &args, output).await
    }

    /// Rigid receptor PDBQT.
    pub async fn receptor_to_pdbqt(&self, input: &Path, output: &Path) -> Result<PathBuf> {
        debug!("Converting receptor {:?} to PDBQT", input);
        let args = [
            "-opdbqt".to_string(),
            "-xr".to_string(),
            "--partialcharge".to_string(),
            self.partial_charge.clone(),
        ];
        self.convert(input, &args, output).await
    }

    /// Ligand PDBQT with 3D coordinates, hydrogens at `ph` and Gasteiger charges.
    pub async fn ligand_to_pdbqt(&self, input: &Path, output: &Path, ph: f64) -> Result<PathBuf> {
        debug!("Converting ligand {:?} to PDBQT", input);
        let args = [
            "-opdbqt".to_string(),
            "--gen3d".to_string(),
            "-p".to_string(),
            ph.to_string(),
            "--partialcharge".to_string(),
            "gasteiger".to_string(),
        ];
        self.convert(input, &args, output).await
    }

    /// Canonical SMILES of the first molecule in `input`.
    pub async fn to_smiles(&self, input: &Path) -> Result<String> {
        let mut command = Command::new(&self.executable_path);
        command.arg(input).arg("-osmi");
        let output = self.run(command).await?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        stdout
            .lines()
            .find_map(|line| line.split_whitespace().next())
            .map(str::to_string)
            .ok_or_else(|| PrepError::external(TOOL, format!("no SMILES produced for {}", input.display())))
    }

    async fn convert(&self, input: &Path, args: &[String], output: &Path) -> Result<PathBuf> {
        if !input.is_file() {
            return Err(PrepError::NotFound(format!("input file {}", input.display())));
        }

        let mut command = Command::new(&self.executable_path);
        command.arg(input).args(args).arg("-O").arg(output);
        let result = self.run(command).await?;

        // obabel exits 0 with "0 molecules converted" on unreadable input
        let written = std::fs::metadata(output).map(|m| m.len() > 0).unwrap_or(false);
        if !written {
            let stderr = String::from_utf8_lossy(&result.stderr);
            return Err(PrepError::external(
                TOOL,
                format!("no output written to {}: {}", output.display(), stderr.trim()),
            ));
        }

        debug!("Open Babel completed successfully. Output in {:?}", output);
        Ok(output.to_path_buf())
    }

    async fn run(&self, mut command: Command) -> Result<Output> {
        command.kill_on_drop(true);

        let output = tokio::time::timeout(self.timeout, command.output())
            .await
            .map_err(|_| PrepError::external(TOOL, format!("timed out after {:?}", self.timeout)))?
            .map_err(|e| {
                PrepError::external(TOOL, format!("cannot run {}: {}", self.executable_path.display(), e))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(PrepError::external(TOOL, format!("{}: {}", output.status, stderr.trim())));
        }
        Ok(output)
    }
}
