//! Core error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Invalid image reference: {reference} - {reason}")]
    InvalidImageReference { reference: String, reason: String },

    #[error("Invalid manifest {path}: {message}")]
    InvalidManifest { path: String, message: String },

    #[error("Manifest directory not found: {path}")]
    ManifestDirNotFound { path: String },

    #[error("Failed to parse YAML: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Archive error: {message}")]
    Archive { message: String },

    #[error("Values error: {message}")]
    Values { message: String },
}

pub type Result<T> = std::result::Result<T, CoreError>;
