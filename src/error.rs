//! Error types for the media job pipeline.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while running a media job.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Operation parameters were rejected before anything was allocated or spawned.
    #[error("invalid parameters: {0}")]
    InvalidParameters(String),

    /// The engine process exited with a non-zero status. Carries the captured
    /// diagnostic output, untruncated beyond the configured tail limit.
    #[error("engine failed: {diagnostic}")]
    Engine { diagnostic: String },

    /// The engine exited cleanly but the declared artifact is missing or empty.
    #[error("output missing or empty: {}", path.display())]
    EmptyOutput { path: PathBuf },

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The job was cancelled by the caller or during shutdown.
    #[error("job cancelled")]
    Cancelled,

    /// A required external tool is not available.
    #[error("tool not found: {tool}")]
    ToolNotFound { tool: String },

    /// Failed to parse tool output.
    #[error("failed to parse {tool} output: {message}")]
    Parse { tool: String, message: String },

    /// Workspace allocation or bookkeeping error.
    #[error("workspace error: {0}")]
    Workspace(String),

    /// No job with this id is known to the dispatcher.
    #[error("unknown job: {0}")]
    UnknownJob(Uuid),
}

/// The closed set of failure kinds a terminal job result can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    InvalidParameters,
    EngineError,
    EmptyOutput,
    IoError,
    Cancelled,
}

impl Error {
    /// Create an engine failure from captured diagnostic output.
    pub fn engine(diagnostic: impl Into<String>) -> Self {
        Self::Engine {
            diagnostic: diagnostic.into(),
        }
    }

    /// Create a parse error.
    pub fn parse_error(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Parse {
            tool: tool.into(),
            message: message.into(),
        }
    }

    /// Create a tool not found error.
    pub fn tool_not_found(tool: impl Into<String>) -> Self {
        Self::ToolNotFound { tool: tool.into() }
    }

    /// Map this error onto the failure kind reported to requesters.
    ///
    /// Tool and parse problems count as engine failures; workspace problems
    /// are filesystem failures.
    pub fn kind(&self) -> FailureKind {
        match self {
            Error::InvalidParameters(_) => FailureKind::InvalidParameters,
            Error::Engine { .. } | Error::ToolNotFound { .. } | Error::Parse { .. } => {
                FailureKind::EngineError
            }
            Error::EmptyOutput { .. } => FailureKind::EmptyOutput,
            Error::Io(_) | Error::Workspace(_) | Error::UnknownJob(_) => FailureKind::IoError,
            Error::Cancelled => FailureKind::Cancelled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_mapping() {
        assert_eq!(
            Error::InvalidParameters("width".into()).kind(),
            FailureKind::InvalidParameters
        );
        assert_eq!(Error::engine("boom").kind(), FailureKind::EngineError);
        assert_eq!(Error::tool_not_found("ffmpeg").kind(), FailureKind::EngineError);
        assert_eq!(Error::Cancelled.kind(), FailureKind::Cancelled);
        assert_eq!(
            Error::Workspace("denied".into()).kind(),
            FailureKind::IoError
        );
    }
}
