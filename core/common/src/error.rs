//! Common error types for SkyView.

use thiserror::Error;

/// Top-level error type for SkyView operations.
///
/// Variants split into service errors (the remote API or identity provider
/// reported a failure) and local errors (bad input, filesystem, operator
/// cancelled).
#[derive(Debug, Error)]
pub enum Error {
    /// Transport failure talking to the remote service.
    #[error("Network error: {0}")]
    Network(String),

    /// The remote API returned an error response.
    #[error("Service error ({status}): {code}: {message}")]
    Service {
        status: u16,
        code: String,
        message: String,
    },

    /// Token acquisition or validation failed.
    #[error("Authentication error: {0}")]
    Authentication(String),

    /// The remote denied access to the resource.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Conflict detected (name collision, stale eTag).
    #[error("Conflict: {0}")]
    Conflict(String),

    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid input provided.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The operator cancelled the action.
    #[error("Cancelled: {0}")]
    Cancelled(String),
}

impl Error {
    /// Whether the failure was reported by the remote side rather than
    /// detected locally.
    pub fn is_service_error(&self) -> bool {
        matches!(
            self,
            Error::Network(_)
                | Error::Service { .. }
                | Error::Authentication(_)
                | Error::PermissionDenied(_)
                | Error::NotFound(_)
                | Error::Conflict(_)
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;
