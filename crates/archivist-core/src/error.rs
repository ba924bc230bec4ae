//! Error types for the Archivist pipeline.
//!
//! Errors are organized by stage so that a failed work item can be reported
//! with the stage that produced it and an actionable message (file paths,
//! tool names, HTTP status codes).

use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type for Archivist operations.
#[derive(Error, Debug)]
pub enum ArchivistError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Pipeline processing errors
    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    /// General I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Configuration-specific errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to read the config file from disk
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    /// Failed to parse TOML configuration
    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Configuration values are invalid
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Pipeline errors, organized by the stage that raises them.
///
/// Every variant is item-scoped: the orchestrator records it against the
/// current work item and moves on to the next one.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// An external binary could not be located by any resolution strategy
    #[error("{tool} not found (searched: {})", display_paths(.searched))]
    ToolMissing {
        tool: String,
        searched: Vec<PathBuf>,
    },

    /// The archiver rejected the container type, or the configured archive format is unknown
    #[error("Unsupported archive format for {path}: {format}")]
    UnsupportedFormat { path: PathBuf, format: String },

    /// The configured image target format is not one the transcoder can produce
    #[error("Unsupported image format: {format}")]
    UnsupportedImageFormat { format: String },

    /// No password candidate opened the archive
    #[error("Could not decrypt {path} ({attempts} password candidates tried)")]
    DecryptionFailed { path: PathBuf, attempts: usize },

    /// Extraction failed for a reason other than a wrong password
    #[error("Extraction failed for {path}: {message}")]
    ExtractionFailed { path: PathBuf, message: String },

    /// The archiver exited non-zero or produced no output while packaging
    #[error("Compression failed for {path}: {message}")]
    CompressionFailed { path: PathBuf, message: String },

    /// The transcoder failed on a single image
    #[error("Conversion failed for {path}: {message}")]
    ConversionFailed { path: PathBuf, message: String },

    /// Login was rejected, or the session was rejected twice in a row
    #[error("Authentication failed: {message}")]
    AuthenticationFailed { message: String },

    /// The upload did not reach the server (network or local IO failure)
    #[error("Upload failed for {path}: {message}")]
    UploadFailed { path: PathBuf, message: String },

    /// The server answered the upload with an error
    #[error("Upload rejected for {path}: HTTP {status}: {body}")]
    UploadRejected {
        path: PathBuf,
        status: u16,
        body: String,
    },

    /// The article record could not be created
    #[error("Article submission failed: {message}")]
    SubmissionFailed {
        message: String,
        status_code: Option<u16>,
    },

    /// An external tool did not finish within its time budget
    #[error("{tool} timed out on {path} after {timeout_ms}ms")]
    Timeout {
        tool: String,
        path: PathBuf,
        timeout_ms: u64,
    },

    /// The work item was cancelled by the operator
    #[error("Cancelled")]
    Cancelled,

    /// Local filesystem work on the scratch workspace failed
    #[error("Workspace error at {path}: {message}")]
    Workspace { path: PathBuf, message: String },

    /// Input path does not exist
    #[error("File not found: {0}")]
    FileNotFound(PathBuf),
}

impl PipelineError {
    /// Wrap an IO error raised while manipulating `path` in the scratch workspace.
    pub fn workspace(path: impl Into<PathBuf>, err: impl std::fmt::Display) -> Self {
        Self::Workspace {
            path: path.into(),
            message: err.to_string(),
        }
    }
}

fn display_paths(paths: &[PathBuf]) -> String {
    if paths.is_empty() {
        return "PATH".to_string();
    }
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Convenience type alias for Archivist results.
pub type Result<T> = std::result::Result<T, ArchivistError>;

/// Convenience type alias for pipeline-specific results.
pub type PipelineResult<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_missing_lists_searched_paths() {
        let err = PipelineError::ToolMissing {
            tool: "7z".to_string(),
            searched: vec![PathBuf::from("/opt/tools/7z"), PathBuf::from("/opt/7z")],
        };
        let msg = err.to_string();
        assert!(msg.starts_with("7z not found"));
        assert!(msg.contains("/opt/tools/7z, /opt/7z"));
    }

    #[test]
    fn test_upload_rejected_includes_status_and_body() {
        let err = PipelineError::UploadRejected {
            path: PathBuf::from("out.7z"),
            status: 413,
            body: "too large".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Upload rejected for out.7z: HTTP 413: too large"
        );
    }

    #[test]
    fn test_pipeline_error_converts_to_top_level() {
        let err: ArchivistError = PipelineError::Cancelled.into();
        assert!(matches!(err, ArchivistError::Pipeline(PipelineError::Cancelled)));
    }
}
