use thiserror::Error;

#[derive(Debug, Error)]
pub enum PrepError {
    /// Malformed binding-site table row or config text. `row` is 1-based over data rows.
    #[error("Parse error at row {row}: {message}")]
    Parse { row: usize, message: String },

    #[error("Degenerate grid box: {0}")]
    DegenerateBox(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{tool} failed: {message}")]
    ExternalTool { tool: String, message: String },

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Selection error: {0}")]
    Selection(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Security error: {0}")]
    Security(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl PrepError {
    pub fn parse(row: usize, message: impl Into<String>) -> Self {
        PrepError::Parse { row, message: message.into() }
    }

    pub fn external(tool: impl Into<String>, message: impl Into<String>) -> Self {
        PrepError::ExternalTool { tool: tool.into(), message: message.into() }
    }
}

impl From<serde_json::Error> for PrepError {
    fn from(e: serde_json::Error) -> Self {
        PrepError::Config(e.to_string())
    }
}

impl From<serde_yaml::Error> for PrepError {
    fn from(e: serde_yaml::Error) -> Self {
        PrepError::Config(e.to_string())
    }
}

impl From<toml::de::Error> for PrepError {
    fn from(e: toml::de::Error) -> Self {
        PrepError::Config(e.to_string())
    }
}

impl From<toml::ser::Error> for PrepError {
    fn from(e: toml::ser::Error) -> Self {
        PrepError::Config(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, PrepError>;
