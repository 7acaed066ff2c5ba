//! Settings error types.

use thiserror::Error;

/// Settings loading and validation failures.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// The settings file exists but could not be read.
    #[error("cannot read eventline settings: {0}")]
    Io(#[from] std::io::Error),
    /// The settings file is not valid JSON or has the wrong shape.
    #[error("malformed eventline settings: {0}")]
    Json(#[from] serde_json::Error),
    /// A value the connector cannot run with.
    #[error("invalid setting: {0}")]
    InvalidValue(String),
}

/// Settings result.
pub type Result<T> = std::result::Result<T, SettingsError>;
