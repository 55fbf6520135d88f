//! Error types for download, conversion, organization and probing backends.

use std::path::PathBuf;

use thiserror::Error;

use crate::security::SecurityRejection;

/// Failure of an external capability. The message is recorded verbatim on
/// the failed job.
#[derive(Debug, Error)]
pub enum BackendError {
    /// The tool binary could not be started.
    #[error(
        "cannot start {tool}: {source}\n  Suggestion: Install {tool} or set its path under [tools] in the config file"
    )]
    ToolMissing {
        tool: String,
        #[source]
        source: std::io::Error,
    },

    /// The tool ran and exited unsuccessfully.
    #[error("{tool} exited with {}: {output_tail}", .code.map_or_else(|| "a signal".to_string(), |c| format!("code {c}")))]
    ExitStatus {
        tool: String,
        code: Option<i32>,
        output_tail: String,
    },

    /// The operation exceeded its time budget and was killed.
    #[error("{tool} timed out after {secs}s")]
    Timeout { tool: String, secs: u64 },

    /// The operation was cancelled on request.
    #[error("{tool} was cancelled")]
    Cancelled { tool: String },

    /// HTTP fetch failed.
    #[error("HTTP error fetching {url}: {message}")]
    Http { url: String, message: String },

    /// Filesystem error.
    #[error("IO error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The tool succeeded but left nothing usable behind.
    #[error("{tool} produced no output in {}", .path.display())]
    NoOutput { tool: String, path: PathBuf },

    /// The tool's output could not be understood.
    #[error("cannot parse {tool} output: {message}")]
    Parse { tool: String, message: String },

    /// Inputs the backend cannot act on.
    #[error("{0}")]
    InvalidInput(String),

    /// A path or URL the backend was about to use failed the security gate.
    #[error(transparent)]
    Rejected(#[from] SecurityRejection),
}

impl BackendError {
    #[must_use]
    pub fn tool_missing(tool: impl Into<String>, source: std::io::Error) -> Self {
        Self::ToolMissing {
            tool: tool.into(),
            source,
        }
    }

    #[must_use]
    pub fn exit_status(tool: impl Into<String>, code: Option<i32>, output_tail: impl Into<String>) -> Self {
        Self::ExitStatus {
            tool: tool.into(),
            code,
            output_tail: output_tail.into(),
        }
    }

    #[must_use]
    pub fn timeout(tool: impl Into<String>, secs: u64) -> Self {
        Self::Timeout {
            tool: tool.into(),
            secs,
        }
    }

    #[must_use]
    pub fn cancelled(tool: impl Into<String>) -> Self {
        Self::Cancelled { tool: tool.into() }
    }

    #[must_use]
    pub fn http(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Http {
            url: url.into(),
            message: message.into(),
        }
    }

    #[must_use]
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    #[must_use]
    pub fn no_output(tool: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self::NoOutput {
            tool: tool.into(),
            path: path.into(),
        }
    }

    #[must_use]
    pub fn parse(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Parse {
            tool: tool.into(),
            message: message.into(),
        }
    }

    /// True when the failure came from a cancel request.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}
