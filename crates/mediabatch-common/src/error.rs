//! Unified error type for mediabatch.
//!
//! Library crates funnel their failures into [`Error`], which carries enough
//! context for the HTTP layer to derive a status code via
//! [`Error::http_status`].

use std::fmt;
use std::path::PathBuf;

/// Unified error type covering the failure modes of a media job.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Request data failed validation. Raised before any work starts.
    #[error("Validation error: {0}")]
    Validation(String),

    /// The requested entity could not be found.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// The kind of entity (e.g. "file").
        entity: String,
        /// The identifier that was looked up.
        id: String,
    },

    /// The caller is not authenticated.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// The caller lacks permission for the requested action.
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// A source could not be interpreted as the expected media kind.
    #[error("Decode error [{}]: {message}", path.display())]
    Decode {
        /// The source that failed to decode.
        path: PathBuf,
        /// Human-readable error description.
        message: String,
    },

    /// Writing the archive failed; always fatal to the job.
    #[error("Archive error: {0}")]
    Archive(String),

    /// An external tool (ffmpeg) could not be run.
    #[error("Tool error [{tool}]: {message}")]
    Tool {
        /// Name of the tool that failed.
        tool: String,
        /// Human-readable error description.
        message: String,
    },

    /// An I/O operation failed.
    #[error("IO error: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// A job failed after dispatch.
    #[error("Job failed: {0}")]
    Job(String),

    /// Catch-all for unexpected internal errors.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Map this error to an appropriate HTTP status code.
    pub fn http_status(&self) -> u16 {
        match self {
            Error::Validation(_) => 400,
            Error::NotFound { .. } => 404,
            Error::Unauthorized(_) => 401,
            Error::Forbidden(_) => 403,
            Error::Decode { .. } => 500,
            Error::Archive(_) => 500,
            Error::Tool { .. } => 502,
            Error::Io { .. } => 500,
            Error::Job(_) => 500,
            Error::Internal(_) => 500,
        }
    }

    /// Whether the error was raised before any work began.
    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.http_status())
    }

    /// Convenience constructor for [`Error::Validation`].
    pub fn validation(msg: impl Into<String>) -> Self {
        Error::Validation(msg.into())
    }

    /// Convenience constructor for [`Error::NotFound`].
    pub fn not_found(entity: impl Into<String>, id: impl fmt::Display) -> Self {
        Error::NotFound {
            entity: entity.into(),
            id: id.to_string(),
        }
    }

    /// Convenience constructor for [`Error::Decode`].
    pub fn decode(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Error::Decode {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Convenience constructor for [`Error::Archive`].
    pub fn archive(msg: impl fmt::Display) -> Self {
        Error::Archive(msg.to_string())
    }

    /// Convenience constructor for [`Error::Tool`].
    pub fn tool(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Tool {
            tool: tool.into(),
            message: message.into(),
        }
    }

    /// Convenience constructor for [`Error::Internal`].
    pub fn internal(msg: impl Into<String>) -> Self {
        Error::Internal(msg.into())
    }
}

/// Result type alias using the unified Error type.
pub type Result<T> = std::result::Result<T, Error>;
