use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] tollgate_core::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("Consent not granted for category: {0}")]
    NotGranted(String),
    #[error("Could not read page fixture {path}: {reason}")]
    Fixture { path: String, reason: String },
    #[error("Configuration error: {0}")]
    Config(String),
}
