//! Error types for the CLI

use std::path::PathBuf;

/// CLI Result type
pub type Result<T> = std::result::Result<T, Error>;

/// CLI errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Lakeforge(#[from] lakeforge_common::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("config file not found: {path}")]
    ConfigNotFound { path: PathBuf },
}
