//! Error types for stowaway-mirror

use stowaway_core::{CoreError, FailedCommand, FailureKind};
use stowaway_tools::ToolError;
use thiserror::Error;

/// Result type for mirroring operations
pub type Result<T> = std::result::Result<T, MirrorError>;

/// Errors that stop a chart (or the whole run)
///
/// Per-image failures are recorded in the chart's job instead.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum MirrorError {
    /// The package manager could not report the chart's version
    #[error("failed to resolve chart '{chart}': {source}")]
    ResolutionFailed {
        chart: String,
        #[source]
        source: ToolError,
    },

    /// The pull reported success but left no archive behind
    #[error("chart archive missing after download: {path}")]
    DownloadIncomplete { path: String },

    /// A private registry repository could not be confirmed or created
    #[error("cannot provision registry repository '{repository}': {detail}")]
    RegistryProvisioning { repository: String, detail: String },

    /// Invalid configuration
    #[error("invalid configuration: {message}")]
    Config { message: String },

    #[error(transparent)]
    Tool(#[from] ToolError),

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Job log entry for a failed tool call
pub(crate) fn failed_command(kind: FailureKind, error: &ToolError, fallback_command: &str) -> FailedCommand {
    FailedCommand {
        kind,
        command: error.command().unwrap_or(fallback_command).to_string(),
        message: error.to_string(),
        stderr: error.stderr().to_string(),
    }
}

impl MirrorError {
    /// Command line behind the failure, when one was run
    pub fn command(&self) -> Option<&str> {
        match self {
            MirrorError::ResolutionFailed { source, .. } | MirrorError::Tool(source) => source.command(),
            _ => None,
        }
    }

    /// Diagnostic output of the failed command, empty otherwise
    pub fn stderr(&self) -> &str {
        match self {
            MirrorError::ResolutionFailed { source, .. } | MirrorError::Tool(source) => source.stderr(),
            _ => "",
        }
    }
}
