//! Error types for pdfsmith.
//!
//! Every failure the job pipeline can surface is a [`PdfSmithError`]. The
//! variants are grouped into a small number of [`ErrorKind`]s which drive
//! the pipeline's decisions: which errors abort admission, which are retried
//! by the resilience wrapper, and which exit code the CLI reports.
//!
//! # Error Categories
//!
//! - **Security**: untrusted or unsafe input, fatal to admission of that input
//! - **Corruption**: input is not readable as a PDF
//! - **Overload**: a configured ceiling was exceeded
//! - **Processing**: a stage-internal failure, eligible for retry
//! - **Timeout**: an external tool exceeded its wall-clock budget

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for pdfsmith operations.
pub type Result<T> = std::result::Result<T, PdfSmithError>;

/// Example page-range syntax quoted in parse errors.
pub const PAGE_RANGE_EXAMPLE: &str = "1-5, 10, 20-30";

/// Coarse classification of a [`PdfSmithError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Unsafe or untrusted input.
    Security,
    /// Input unreadable as the expected format.
    Corruption,
    /// A configured ceiling was exceeded.
    Overload,
    /// A stage failed internally.
    Processing,
    /// An external tool ran out of time.
    Timeout,
    /// The operator cancelled the job.
    Cancelled,
    /// Invalid request, settings or page-range input.
    Config,
    /// Filesystem failure outside any stage.
    Io,
}

/// Main error type for pdfsmith operations.
#[derive(Debug, Error)]
pub enum PdfSmithError {
    /// Input failed a security rule.
    #[error("File rejected: {}\n  Reason: {reason}", path.display())]
    Security {
        /// Offending path.
        path: PathBuf,
        /// Human-readable rule that failed.
        reason: String,
    },

    /// Input could not be parsed as a PDF.
    #[error("Corrupted or invalid PDF: {}\n  Details: {details}", path.display())]
    Corruption {
        /// Path to the unreadable file.
        path: PathBuf,
        /// Parser message.
        details: String,
    },

    /// A file-count, page-count or system-pressure ceiling was exceeded.
    #[error("Limit exceeded: {message}")]
    Overload {
        /// What was exceeded and by how much.
        message: String,
    },

    /// A pipeline stage failed.
    #[error("{stage} failed: {reason}")]
    Processing {
        /// Stage label.
        stage: String,
        /// Failure detail.
        reason: String,
    },

    /// An external tool did not finish in time.
    #[error("{program} did not finish within {seconds} seconds and was terminated")]
    Timeout {
        /// Program that was killed.
        program: String,
        /// Budget that elapsed.
        seconds: u64,
    },

    /// A required external tool is not installed.
    #[error("{tool} is not available on this system")]
    ToolUnavailable {
        /// Tool name.
        tool: String,
    },

    /// Page-range text could not be parsed.
    #[error("Invalid page range '{input}': {reason}\n  Example of valid syntax: {}", PAGE_RANGE_EXAMPLE)]
    InvalidPageRange {
        /// The text the operator typed.
        input: String,
        /// What is wrong with it.
        reason: String,
    },

    /// Invalid request or settings.
    #[error("Invalid configuration: {message}")]
    InvalidConfig {
        /// Description of what's wrong.
        message: String,
    },

    /// Operator cancelled the job.
    #[error("Operation cancelled by user")]
    Cancelled,

    /// Generic I/O error.
    #[error("I/O error: {source}")]
    Io {
        /// Underlying I/O error.
        #[from]
        source: io::Error,
    },

    /// Generic error with a custom message.
    #[error("{message}")]
    Other {
        /// Error message.
        message: String,
    },
}

impl From<lopdf::Error> for PdfSmithError {
    fn from(err: lopdf::Error) -> Self {
        Self::processing("PDF engine", err.to_string())
    }
}

impl From<anyhow::Error> for PdfSmithError {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast::<PdfSmithError>() {
            Ok(err) => err,
            Err(err) => Self::other(format!("{err:#}")),
        }
    }
}

impl From<serde_json::Error> for PdfSmithError {
    fn from(err: serde_json::Error) -> Self {
        Self::other(format!("JSON error: {err}"))
    }
}

impl PdfSmithError {
    /// Create a Security error.
    pub fn security(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::Security {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create a Corruption error.
    pub fn corruption(path: impl Into<PathBuf>, details: impl Into<String>) -> Self {
        Self::Corruption {
            path: path.into(),
            details: details.into(),
        }
    }

    /// Create an Overload error.
    pub fn overload(message: impl Into<String>) -> Self {
        Self::Overload {
            message: message.into(),
        }
    }

    /// Create a Processing error for the named stage.
    pub fn processing(stage: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Processing {
            stage: stage.into(),
            reason: reason.into(),
        }
    }

    /// Create an InvalidPageRange error.
    pub fn invalid_range(input: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidPageRange {
            input: input.into(),
            reason: reason.into(),
        }
    }

    /// Create an InvalidConfig error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Create a ToolUnavailable error.
    pub fn tool_unavailable(tool: impl Into<String>) -> Self {
        Self::ToolUnavailable { tool: tool.into() }
    }

    /// Create an Other error with a custom message.
    pub fn other(message: impl Into<String>) -> Self {
        Self::Other {
            message: message.into(),
        }
    }

    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Security { .. } => ErrorKind::Security,
            Self::Corruption { .. } => ErrorKind::Corruption,
            Self::Overload { .. } => ErrorKind::Overload,
            Self::Processing { .. } | Self::ToolUnavailable { .. } | Self::Other { .. } => {
                ErrorKind::Processing
            }
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::InvalidPageRange { .. } | Self::InvalidConfig { .. } => ErrorKind::Config,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Io { .. } => ErrorKind::Io,
        }
    }

    /// Whether the resilience wrapper may retry the failed operation.
    ///
    /// Only the pipeline's own recoverable kinds qualify. A missing tool is
    /// classified as processing but retrying cannot make it appear.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Processing { .. } | Self::Overload { .. })
    }

    /// Get the process exit code for this error.
    pub fn exit_code(&self) -> i32 {
        match self.kind() {
            ErrorKind::Config => 1,
            ErrorKind::Security => 2,
            ErrorKind::Corruption => 3,
            ErrorKind::Overload => 4,
            ErrorKind::Io => 5,
            ErrorKind::Processing => 6,
            ErrorKind::Timeout => 7,
            ErrorKind::Cancelled => 130, // Standard exit code for SIGINT
        }
    }
}
