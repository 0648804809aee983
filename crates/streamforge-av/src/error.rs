//! Error types for streamforge-av.

use std::path::PathBuf;

use crate::cancel::CancelReason;

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while orchestrating external media tools.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Request data failed validation (empty paths, unreadable input).
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The specified file was not found.
    #[error("file not found: {}", path.display())]
    FileNotFound { path: PathBuf },

    /// A required external tool is not available.
    #[error("tool not found: {tool}")]
    ToolNotFound { tool: String },

    /// The operating system refused to start the tool.
    #[error("failed to launch {tool}: {source}")]
    Launch {
        tool: String,
        #[source]
        source: std::io::Error,
    },

    /// An external tool ran and exited unsuccessfully.
    #[error("{tool} failed (exit code {}): {message}", display_code(*exit_code))]
    ToolFailed {
        tool: String,
        exit_code: Option<i32>,
        message: String,
    },

    /// The operation was canceled before it could finish.
    #[error("canceled: {0}")]
    Canceled(CancelReason),

    /// Failed to parse tool output.
    #[error("failed to parse {tool} output: {message}")]
    ParseError { tool: String, message: String },

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

fn display_code(code: Option<i32>) -> String {
    code.map_or_else(|| "none".to_string(), |c| c.to_string())
}

impl Error {
    /// Create a tool not found error.
    pub fn tool_not_found(tool: impl Into<String>) -> Self {
        Self::ToolNotFound { tool: tool.into() }
    }

    /// Create a tool execution failed error.
    pub fn tool_failed(
        tool: impl Into<String>,
        exit_code: Option<i32>,
        message: impl Into<String>,
    ) -> Self {
        Self::ToolFailed {
            tool: tool.into(),
            exit_code,
            message: message.into(),
        }
    }

    /// Create a launch error.
    pub fn launch(tool: impl Into<String>, source: std::io::Error) -> Self {
        Self::Launch {
            tool: tool.into(),
            source,
        }
    }

    /// Create a parse error.
    pub fn parse_error(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ParseError {
            tool: tool.into(),
            message: message.into(),
        }
    }

    /// Create a file not found error.
    pub fn file_not_found(path: impl Into<PathBuf>) -> Self {
        Self::FileNotFound { path: path.into() }
    }

    /// Whether this error represents a cancellation rather than a failure.
    pub fn is_canceled(&self) -> bool {
        matches!(self, Self::Canceled(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_failed_display() {
        let err = Error::tool_failed("ffmpeg", Some(1), "Invalid data found");
        assert_eq!(
            err.to_string(),
            "ffmpeg failed (exit code 1): Invalid data found"
        );
    }

    #[test]
    fn tool_failed_without_code() {
        let err = Error::tool_failed("ffmpeg", None, "killed");
        assert_eq!(err.to_string(), "ffmpeg failed (exit code none): killed");
    }

    #[test]
    fn launch_keeps_source() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err = Error::launch("ffmpeg", io);
        assert!(err.to_string().starts_with("failed to launch ffmpeg"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn canceled_is_not_failure() {
        assert!(Error::Canceled(CancelReason::Timeout).is_canceled());
        assert!(!Error::InvalidInput("x".into()).is_canceled());
    }

    #[test]
    fn file_not_found_display() {
        let err = Error::file_not_found("/missing.avi");
        assert_eq!(err.to_string(), "file not found: /missing.avi");
    }
}
