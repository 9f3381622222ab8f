//! CLI error types.

use mdfig_config::ConfigError;
use mdfig_diagrams::{ConfigurationError, PageError};

/// CLI error type.
#[derive(Debug, thiserror::Error)]
pub(crate) enum CliError {
    #[error("{0}")]
    Config(#[from] ConfigError),

    #[error("{0}")]
    Configuration(#[from] ConfigurationError),

    #[error("{0}")]
    Page(#[from] PageError),

    #[error("{0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Walk(#[from] ignore::Error),

    #[error("{0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Validation(String),
}
