//! CLI error types with exit code handling
//!
//! This module provides a unified error type for CLI operations that
//! maps errors to appropriate exit codes.

use miette::Diagnostic;
use stowaway_core::CoreError;
use stowaway_mirror::MirrorError;
use stowaway_tools::ToolError;
use thiserror::Error;

use crate::exit_codes;

/// CLI-specific error type that includes exit code information
#[derive(Error, Debug, Diagnostic, Clone)]
pub enum CliError {
    /// Settings could not be loaded
    #[error("Configuration error: {message}")]
    #[diagnostic(code(stowaway::cli::config))]
    Config {
        message: String,
        #[help]
        help: Option<String>,
    },

    /// Manifests or values input is missing or malformed
    #[error("{message}")]
    #[diagnostic(code(stowaway::cli::document))]
    Document {
        message: String,
        #[help]
        help: Option<String>,
    },

    /// An external tool failed
    #[error("{message}")]
    #[diagnostic(code(stowaway::cli::tool))]
    Tool {
        message: String,
        #[help]
        help: Option<String>,
    },

    /// IO error (file not found, permissions, etc.)
    #[error("IO error: {message}")]
    #[diagnostic(code(stowaway::cli::io))]
    Io { message: String },

    /// Invalid argument value
    #[error("Invalid argument: {message}")]
    #[diagnostic(code(stowaway::cli::usage))]
    Usage {
        message: String,
        #[help]
        help: Option<String>,
    },

    /// Internal error (runtime, unexpected failure)
    #[error("Internal error: {message}")]
    #[diagnostic(code(stowaway::cli::internal))]
    Internal { message: String },
}

impl CliError {
    /// Get the exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::Config { .. } => exit_codes::CONFIG_ERROR,
            CliError::Document { .. } => exit_codes::DOCUMENT_ERROR,
            CliError::Tool { .. } => exit_codes::TOOL_ERROR,
            CliError::Io { .. } => exit_codes::IO_ERROR,
            CliError::Usage { .. } => exit_codes::USAGE_ERROR,
            CliError::Internal { .. } => exit_codes::ERROR,
        }
    }

    pub fn usage(message: impl Into<String>) -> Self {
        Self::Usage {
            message: message.into(),
            help: None,
        }
    }

    pub fn usage_with_help(message: impl Into<String>, help: impl Into<String>) -> Self {
        Self::Usage {
            message: message.into(),
            help: Some(help.into()),
        }
    }

    pub fn document_with_help(message: impl Into<String>, help: impl Into<String>) -> Self {
        Self::Document {
            message: message.into(),
            help: Some(help.into()),
        }
    }

    pub fn io_at(path: &std::path::Path, err: impl std::fmt::Display) -> Self {
        Self::Io {
            message: format!("{}: {}", path.display(), err),
        }
    }
}

impl From<std::io::Error> for CliError {
    fn from(err: std::io::Error) -> Self {
        CliError::Io {
            message: err.to_string(),
        }
    }
}

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::ManifestDirNotFound { path } => CliError::Document {
                message: format!("Manifest directory not found: {}", path),
                help: Some("Pass --manifests or set paths.manifests in stowaway.yaml".to_string()),
            },
            CoreError::Io(e) => CliError::Io { message: e.to_string() },
            other => CliError::Document {
                message: other.to_string(),
                help: None,
            },
        }
    }
}

impl From<ToolError> for CliError {
    fn from(err: ToolError) -> Self {
        let stderr = err.stderr().trim();
        CliError::Tool {
            message: err.to_string(),
            help: (!stderr.is_empty()).then(|| stderr.to_string()),
        }
    }
}

impl From<MirrorError> for CliError {
    fn from(err: MirrorError) -> Self {
        match err {
            MirrorError::Config { message } => CliError::Config {
                message,
                help: Some("Settings are read from --config, ./stowaway.yaml or ~/.config/stowaway/config.yaml".to_string()),
            },
            MirrorError::Core(e) => e.into(),
            MirrorError::Tool(e) => e.into(),
            MirrorError::Io(e) => e.into(),
            other => CliError::Internal {
                message: other.to_string(),
            },
        }
    }
}

/// Result type for CLI operations
pub type Result<T> = std::result::Result<T, CliError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(CliError::usage("bad").exit_code(), exit_codes::USAGE_ERROR);
        assert_eq!(
            CliError::from(CoreError::ManifestDirNotFound {
                path: "./application-sets".to_string()
            })
            .exit_code(),
            exit_codes::DOCUMENT_ERROR
        );
        assert_eq!(
            CliError::from(MirrorError::Config {
                message: "workers must be at least 1".to_string()
            })
            .exit_code(),
            exit_codes::CONFIG_ERROR
        );
    }
}
