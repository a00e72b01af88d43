//! Preparation settings.
//!
//! Read from dockprep.toml in the current directory or the path in the
//! DOCKPREP_CONFIG env var. YAML and JSON files are accepted by extension.
//! A missing file means built-in defaults.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{PrepError, Result};

/// Complete preparation configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PrepConfig {
    /// Binding-site residue selection
    #[serde(default)]
    pub selection: SelectionConfig,

    /// Grid box policy constants
    #[serde(default)]
    pub grid: GridConfig,

    /// Protonation / conversion tool settings
    #[serde(default)]
    pub preparation: PreparationConfig,

    /// Structure download settings
    #[serde(default)]
    pub fetch: FetchConfig,

    /// Output options
    #[serde(default)]
    pub output: OutputConfig,
}

// ── Selection ────────────────────────────────────────────────────────────────

/// How binding-site residues are picked from a prediction table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionMode {
    /// Every residue above `cutoff`
    #[default]
    Cutoff,
    /// The `top_n` most probable residues
    TopN,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectionConfig {
    #[serde(default)]
    pub mode: SelectionMode,

    /// p(bind) cutoff; residues strictly above it are selected
    #[serde(default = "default_cutoff")]
    pub cutoff: f64,

    /// Pocket size when selecting the top-N residues instead of thresholding
    #[serde(default = "default_top_n")]
    pub top_n: usize,
}

fn default_cutoff() -> f64 { 0.8 }
fn default_top_n() -> usize { 15 }

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            mode: SelectionMode::default(),
            cutoff: default_cutoff(),
            top_n: default_top_n(),
        }
    }
}

// ── Grid ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridConfig {
    /// Fixed padding of the ligand-diameter policy (Angstrom)
    #[serde(default = "default_base_margin")]
    pub base_margin: f64,

    /// Diameter multiplier of the ligand-diameter policy
    #[serde(default = "default_scale")]
    pub scale: f64,

    /// Ligand file stem written into the docking config
    #[serde(default = "default_ligand_id")]
    pub ligand_id: String,
}

fn default_base_margin() -> f64 { 16.0 }
fn default_scale() -> f64 { 0.8 }
fn default_ligand_id() -> String { "ligand".to_string() }

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            base_margin: default_base_margin(),
            scale: default_scale(),
            ligand_id: default_ligand_id(),
        }
    }
}

// ── Preparation ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreparationConfig {
    /// Protonation pH
    #[serde(default = "default_ph")]
    pub ph: f64,

    /// Open Babel executable
    #[serde(default = "default_obabel")]
    pub obabel_path: PathBuf,

    /// Per-invocation timeout for external tools
    #[serde(default = "default_tool_timeout")]
    pub tool_timeout_secs: u64,

    /// Partial charge model for receptor PDBQT conversion
    #[serde(default = "default_partial_charge")]
    pub partial_charge: String,
}

fn default_ph() -> f64 { 7.4 }
fn default_obabel() -> PathBuf { PathBuf::from("obabel") }
fn default_tool_timeout() -> u64 { 300 }
fn default_partial_charge() -> String { "eem".to_string() }

impl Default for PreparationConfig {
    fn default() -> Self {
        Self {
            ph: default_ph(),
            obabel_path: default_obabel(),
            tool_timeout_secs: default_tool_timeout(),
            partial_charge: default_partial_charge(),
        }
    }
}

// ── Fetch ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,

    #[serde(default = "default_http_timeout")]
    pub timeout_secs: u64,
}

fn default_cache_dir() -> PathBuf { PathBuf::from("./structures") }
fn default_http_timeout() -> u64 { 30 }

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            cache_dir: default_cache_dir(),
            timeout_secs: default_http_timeout(),
        }
    }
}

// ── Output ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    #[serde(default = "default_output_dir")]
    pub directory: PathBuf,
}

fn default_output_dir() -> PathBuf { PathBuf::from("./prepared") }

impl Default for OutputConfig {
    fn default() -> Self {
        Self { directory: default_output_dir() }
    }
}

// ── Loading ──────────────────────────────────────────────────────────────────

impl PrepConfig {
    /// Load from DOCKPREP_CONFIG or ./dockprep.toml, falling back to defaults
    /// when neither exists.
    pub fn load() -> Result<Self> {
        let path = std::env::var("DOCKPREP_CONFIG")
            .unwrap_or_else(|_| "dockprep.toml".to_string());
        let path = Path::new(&path);

        if !path.exists() {
            debug!("No config file at {:?}, using defaults", path);
            return Ok(Self::default());
        }
        Self::from_path(path)
    }

    /// Load from an explicit file, dispatching on its extension.
    pub fn from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => serde_yaml::from_str(&content)?,
            Some("json") => serde_json::from_str(&content)?,
            _ => toml::from_str(&content)?,
        };
        config.validate()?;
        debug!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Save as TOML
    pub fn to_toml(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Reject values the derivation would silently misuse.
    pub fn validate(&self) -> Result<()> {
        let cutoff = self.selection.cutoff;
        if !(0.0..=1.0).contains(&cutoff) {
            return Err(PrepError::Config(format!("selection.cutoff must be in [0, 1], got {cutoff}")));
        }
        if self.selection.top_n == 0 {
            return Err(PrepError::Config("selection.top_n must be > 0".to_string()));
        }
        if !(self.grid.base_margin > 0.0) {
            return Err(PrepError::Config(format!("grid.base_margin must be > 0, got {}", self.grid.base_margin)));
        }
        if !(self.grid.scale > 0.0) {
            return Err(PrepError::Config(format!("grid.scale must be > 0, got {}", self.grid.scale)));
        }
        if self.grid.ligand_id.trim().is_empty() {
            return Err(PrepError::Config("grid.ligand_id must not be empty".to_string()));
        }
        if !(0.0..=14.0).contains(&self.preparation.ph) {
            return Err(PrepError::Config(format!("preparation.ph must be in [0, 14], got {}", self.preparation.ph)));
        }
        if self.preparation.tool_timeout_secs == 0 {
            return Err(PrepError::Config("preparation.tool_timeout_secs must be > 0".to_string()));
        }
        if self.fetch.timeout_secs == 0 {
            return Err(PrepError::Config("fetch.timeout_secs must be > 0".to_string()));
        }
        Ok(())
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────
