use std::path::PathBuf;

/// Core error type for the broadcast system.
///
/// Adapter crates map their specific errors into this type. Every variant here
/// is a setup-level failure: per-recipient send failures never surface as
/// `Error`, they are classified into a `SendResult` instead.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("store error: {0}")]
    Store(String),

    #[error("{0}")]
    Setup(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid path: {path}: {reason}")]
    InvalidPath { path: PathBuf, reason: String },
}

pub type Result<T> = std::result::Result<T, Error>;
