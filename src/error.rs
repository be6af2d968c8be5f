//! Error types for RO-Crate validation

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ValidateError {
    #[error("Failed to fetch {url}: {reason}")]
    Fetch { url: String, reason: String },

    #[error("Timed out after {secs}s fetching {url}")]
    Timeout { url: String, secs: u64 },

    #[error("Invalid schema document '{source_id}': {reason}")]
    InvalidSchema { source_id: String, reason: String },

    #[error("'{0}' belongs to a recognized namespace that no registered schema provides")]
    UnsupportedNamespace(String),

    #[error("'{0}' is not a class")]
    NotAClass(String),

    #[error("Failed to load crate from {path}: {reason}")]
    LoadError { path: String, reason: String },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Worker call failed: {0}")]
    Rpc(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid path: {0}")]
    InvalidPath(PathBuf),
}

pub type Result<T> = std::result::Result<T, ValidateError>;
