//! Error types for external tool invocations

use stowaway_core::CoreError;
use thiserror::Error;

/// What a failed command's diagnostic output suggests went wrong
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Diagnosis {
    /// A named local repository did not exist; harmless
    MissingRepo,
    /// The remote repository is missing or its host does not resolve
    RemoteUnavailable,
    Other,
}

/// Tool operation errors
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("{message}: `{command}` failed")]
    CommandFailed {
        command: String,
        message: String,
        code: Option<i32>,
        stderr: String,
        diagnosis: Diagnosis,
    },

    #[error("Failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Unexpected output from `{command}`: {message}")]
    UnexpectedOutput { command: String, message: String },

    #[error("Authentication to {registry} failed: {message}")]
    Authentication { registry: String, message: String },

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ToolError {
    /// Raw diagnostic output, empty when the tool never ran
    pub fn stderr(&self) -> &str {
        match self {
            ToolError::CommandFailed { stderr, .. } => stderr,
            _ => "",
        }
    }

    /// Command line involved, if any
    pub fn command(&self) -> Option<&str> {
        match self {
            ToolError::CommandFailed { command, .. } | ToolError::UnexpectedOutput { command, .. } => {
                Some(command)
            }
            ToolError::Spawn { program, .. } => Some(program),
            _ => None,
        }
    }

    pub fn diagnosis(&self) -> Diagnosis {
        match self {
            ToolError::CommandFailed { diagnosis, .. } => *diagnosis,
            _ => Diagnosis::Other,
        }
    }

    /// Whether the failure belongs in the job's failed command log
    pub fn is_reportable(&self) -> bool {
        self.diagnosis() != Diagnosis::MissingRepo
    }
}

/// Result type for tool operations
pub type Result<T> = std::result::Result<T, ToolError>;
