//! dockprep-common — Shared errors, configuration, and the sandboxed HTTP client
//! used across all dockprep crates.

pub mod error;
pub mod config;
pub mod sandbox;

// Re-export commonly used types
pub use error::{PrepError, Result};
pub use config::{PrepConfig, SelectionConfig, SelectionMode, GridConfig, PreparationConfig, FetchConfig, OutputConfig};
