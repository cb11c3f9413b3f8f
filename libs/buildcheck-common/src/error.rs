use crate::types::{Outcome, Stage};
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HarnessError {
    /// Generator exited with a status other than the declared one
    #[error("generation failed for {}: expected exit status {expected}, got {}\n{stderr}", .spec.display(), display_status(.actual))]
    Generation {
        spec: PathBuf,
        expected: i32,
        actual: Option<i32>,
        stderr: String,
    },

    /// Build tool exited with a status other than the declared one
    #[error("build of target '{target}' failed: expected exit status {expected}, got {}\n{stderr}", display_status(.actual))]
    Build {
        target: String,
        expected: i32,
        actual: Option<i32>,
        stderr: String,
    },

    #[error("assertion failed: {what}\n{detail}")]
    Assertion { what: String, detail: String },

    /// The case does not apply to this platform or format
    #[error("skipped: {reason}")]
    Skip { reason: String },

    #[error("'{program}' timed out after {timeout_ms}ms")]
    Timeout { program: String, timeout_ms: u64 },

    #[error("failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("illegal stage transition {from} -> {to}")]
    Stage { from: Stage, to: Stage },

    #[error("regular expression error in {pattern:?}: {message}")]
    InvalidPattern { pattern: String, message: String },

    #[error("workspace operation '{operation}' failed on {}: {source}", .path.display())]
    Workspace {
        operation: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid test case {}: {message}", .path.display())]
    Case { path: PathBuf, message: String },
}

fn display_status(status: &Option<i32>) -> String {
    match status {
        Some(code) => code.to_string(),
        None => "no status (terminated)".to_string(),
    }
}

impl HarnessError {
    pub fn assertion(what: impl Into<String>, detail: impl Into<String>) -> Self {
        HarnessError::Assertion {
            what: what.into(),
            detail: detail.into(),
        }
    }

    pub fn skip(reason: impl Into<String>) -> Self {
        HarnessError::Skip {
            reason: reason.into(),
        }
    }

    pub fn workspace(operation: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        HarnessError::Workspace {
            operation,
            path: path.into(),
            source,
        }
    }

    /// Terminal state a case ends in when this error aborts it.
    ///
    /// Skips and workspace I/O problems are conditions outside the code
    /// under test, so they report NO RESULT rather than FAILED.
    pub fn outcome(&self) -> Outcome {
        match self {
            HarnessError::Skip { .. } | HarnessError::Workspace { .. } => Outcome::NoResult,
            _ => Outcome::Fail,
        }
    }

    pub fn is_skip(&self) -> bool {
        matches!(self, HarnessError::Skip { .. })
    }
}
