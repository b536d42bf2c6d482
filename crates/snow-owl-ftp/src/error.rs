//! Error types surfaced by the reconnecting client
//!
//! NIST 800-53: SI-11 (Error Handling)
//! Implementation: One error per logical call. Connection-level failures are
//! retried internally and only surface, wrapped, once the retry budget is
//! spent; server rejections pass through unmodified.

use thiserror::Error;

use crate::transport::TransportError;

/// Result type alias for client operations
pub type Result<T> = std::result::Result<T, Error>;

/// Client error types
#[derive(Error, Debug)]
pub enum Error {
    /// Retry budget exhausted
    ///
    /// NIST 800-53: CP-10 (System Recovery and Reconstitution), SI-11
    /// Implementation: Carries the last connection-level failure as source
    #[error(
        "Failed to execute a command on {host}:{port} after {attempts} attempt(s), the last error was: {source}"
    )]
    ConnectionExhausted {
        /// Server host
        host: String,
        /// Server port
        port: u16,
        /// Attempts made
        attempts: u32,
        /// Last connection-level failure observed
        #[source]
        source: TransportError,
    },

    /// Server-reported error unrelated to connectivity
    ///
    /// NIST 800-53: SI-11
    /// Implementation: Invalid path, permission denied and the like; never
    /// retried since repeating the request would fail the same way
    #[error(transparent)]
    Domain(TransportError),

    /// A single-entry lookup matched nothing
    #[error("No entry found for: {0}")]
    NotFound(String),

    /// A single-entry lookup matched several entries
    #[error("Ambiguous entry for {path}: {count} entries matched")]
    Ambiguous {
        /// Queried path
        path: String,
        /// Number of entries returned
        count: usize,
    },

    /// Configuration error
    ///
    /// NIST 800-53: SI-11
    /// Implementation: Invalid or unreadable configuration
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Check whether the retry budget was exhausted
    pub fn is_exhausted(&self) -> bool {
        matches!(self, Error::ConnectionExhausted { .. })
    }

    /// Check if error is due to the shape of the query rather than the server
    pub fn is_lookup_error(&self) -> bool {
        matches!(self, Error::NotFound(_) | Error::Ambiguous { .. })
    }

    /// Underlying transport failure, for exhausted and domain errors
    pub fn transport_error(&self) -> Option<&TransportError> {
        match self {
            Error::ConnectionExhausted { source, .. } | Error::Domain(source) => Some(source),
            _ => None,
        }
    }

    /// Server reply code behind this error, if any
    pub fn reply_code(&self) -> Option<u16> {
        self.transport_error().and_then(TransportError::reply_code)
    }
}
