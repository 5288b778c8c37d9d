//! Error types and exit codes for gosuite.
//!
//! `SuiteError` is the single error type shared by the core and the runner
//! crate. Discovery problems are mostly absorbed where they happen (one bad
//! file never aborts a scan), so the variants here are the conditions a caller
//! has to see: selection preconditions, toolchain and spawn failures, and I/O
//! on explicitly requested paths.
//!
//! ## Exit codes
//!
//! - `2`: Invalid arguments (bad selection, unknown node)
//! - `3`: Resolution errors (toolchain missing, node of the wrong kind)
//! - `4`: Execution errors (spawn or debug-session start failures)
//! - `10`: Internal errors (I/O, watcher, configuration)

use std::fmt;
use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::catalog::{NodeId, NodeKind};

// ============================================================================
// Exit Codes
// ============================================================================

/// Stable exit codes for the CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ErrorCode {
    /// Invalid arguments from the caller.
    InvalidArguments = 2,
    /// Something the request depends on could not be resolved.
    ResolutionError = 3,
    /// A test process or debug session could not be started.
    ExecutionError = 4,
    /// Internal errors (I/O, watcher, configuration).
    InternalError = 10,
}

impl ErrorCode {
    /// Get the numeric code value.
    pub fn code(&self) -> u8 {
        *self as u8
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

// ============================================================================
// Unified Error Type
// ============================================================================

/// Unified error type for gosuite.
#[derive(Debug, Error)]
pub enum SuiteError {
    /// The referenced catalog node does not exist (or no longer exists).
    #[error("no catalog node with id '{id}'")]
    NodeNotFound { id: NodeId },

    /// An operation was handed a node of the wrong kind.
    #[error("node '{id}' is a {actual}, expected a {expected}")]
    UnexpectedNodeKind {
        id: NodeId,
        expected: NodeKind,
        actual: NodeKind,
    },

    /// A run or debug request resolved to zero queue entries.
    #[error("no tests selected")]
    EmptySelection,

    /// Debugging was requested for more than one entry.
    #[error("only one test can be debugged at a time ({count} selected)")]
    MultipleDebugTargets { count: usize },

    /// The Go toolchain could not be located.
    #[error("go toolchain unavailable: {reason}")]
    ToolchainUnavailable { reason: String },

    /// The test process could not be spawned.
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    /// The host refused to start a debug session.
    #[error("debug session '{name}' failed to start")]
    DebugStartFailed { name: String },

    /// Filesystem error on an explicitly requested path.
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The filesystem watcher could not be created or registered.
    #[error("watch error: {0}")]
    Watch(String),

    /// Configuration could not be read or parsed.
    #[error("configuration error: {0}")]
    Config(String),
}

/// Result type for gosuite operations.
pub type SuiteResult<T> = Result<T, SuiteError>;

impl From<&SuiteError> for ErrorCode {
    fn from(err: &SuiteError) -> Self {
        match err {
            SuiteError::NodeNotFound { .. } => ErrorCode::InvalidArguments,
            SuiteError::EmptySelection => ErrorCode::InvalidArguments,
            SuiteError::MultipleDebugTargets { .. } => ErrorCode::InvalidArguments,
            SuiteError::UnexpectedNodeKind { .. } => ErrorCode::ResolutionError,
            SuiteError::ToolchainUnavailable { .. } => ErrorCode::ResolutionError,
            SuiteError::Spawn { .. } => ErrorCode::ExecutionError,
            SuiteError::DebugStartFailed { .. } => ErrorCode::ExecutionError,
            SuiteError::Io { .. } => ErrorCode::InternalError,
            SuiteError::Watch(_) => ErrorCode::InternalError,
            SuiteError::Config(_) => ErrorCode::InternalError,
        }
    }
}

impl SuiteError {
    /// Wrap an I/O error with the path it happened on.
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        SuiteError::Io {
            path: path.into(),
            source,
        }
    }

    /// Exit code for this error.
    pub fn code(&self) -> ErrorCode {
        ErrorCode::from(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(SuiteError::EmptySelection.code().code(), 2);
        assert_eq!(
            SuiteError::MultipleDebugTargets { count: 3 }.code(),
            ErrorCode::InvalidArguments
        );
        assert_eq!(
            SuiteError::ToolchainUnavailable {
                reason: "missing".into()
            }
            .code()
            .code(),
            3
        );
        assert_eq!(
            SuiteError::DebugStartFailed { name: "x".into() }.code(),
            ErrorCode::ExecutionError
        );
        assert_eq!(SuiteError::Watch("boom".into()).code().code(), 10);
    }

    #[test]
    fn test_error_display() {
        let err = SuiteError::MultipleDebugTargets { count: 2 };
        assert_eq!(
            err.to_string(),
            "only one test can be debugged at a time (2 selected)"
        );

        let err = SuiteError::UnexpectedNodeKind {
            id: NodeId::from("pkg:p/a_test"),
            expected: NodeKind::File,
            actual: NodeKind::Suite,
        };
        assert_eq!(
            err.to_string(),
            "node 'pkg:p/a_test' is a suite, expected a file"
        );
    }
}
