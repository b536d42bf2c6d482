//! Transport Capability Interface
//!
//! The resilience layer never speaks the FTP wire protocol itself. It drives
//! an implementation of [`Transport`], which owns one control connection and
//! exposes the narrow set of primitives the client needs. Anything that can
//! connect, log in, change directory and stream a listing can be wrapped.
//!
//! NIST 800-53: SC-8 (Transmission Confidentiality and Integrity)
//! Implementation: The transport owns the socket; credentials only pass
//! through `login` and are never retained here.

use async_trait::async_trait;
use bytes::Bytes;
use std::io::ErrorKind;
use thiserror::Error;

use crate::entry::{DirEntry, parse_mlst_reply};
use crate::reply::{Reply, ReplyClass};

/// Result type alias for transport primitives
pub type TransportResult<T> = std::result::Result<T, TransportError>;

/// Failures reported by a [`Transport`]
///
/// NIST 800-53: SI-11 (Error Handling)
/// Implementation: Every variant is classified as either connection-level
/// (the session is unusable, reconnect and retry) or domain-level (the
/// server rejected a well-formed request, surface it unmodified).
#[derive(Error, Debug)]
pub enum TransportError {
    /// Socket-level failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Negative server reply (4yz or 5yz)
    #[error("{text}")]
    Reply {
        /// Three-digit reply code
        code: u16,
        /// Full reply text
        text: String,
    },

    /// Operation attempted without a live control connection
    #[error("Not connected")]
    NotConnected,

    /// The server did not answer in time
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Malformed or unexpected server response
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Primitive not offered by this transport
    #[error("Operation not supported: {0}")]
    NotSupported(String),

    /// Opaque transport-specific failure
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl TransportError {
    /// Build a reply error from a negative reply
    pub fn reply(code: u16, text: impl Into<String>) -> Self {
        TransportError::Reply {
            code,
            text: text.into(),
        }
    }

    /// Check whether the session should be considered lost
    ///
    /// Transient negative replies (4yz, including 421 "closing control
    /// connection", 425 and 426) and socket failures are connection-level.
    /// Permanent negative replies (5yz) and local faults are not: repeating
    /// the request would fail the same way.
    ///
    /// # NIST 800-53: SI-11 (Error Handling), CP-10 (System Recovery)
    /// # Implementation: Categorizes errors for the reconnect logic
    pub fn is_connection_level(&self) -> bool {
        match self {
            TransportError::Io(err) => !matches!(
                err.kind(),
                ErrorKind::InvalidInput
                    | ErrorKind::InvalidData
                    | ErrorKind::PermissionDenied
                    | ErrorKind::NotFound
                    | ErrorKind::Unsupported
                    | ErrorKind::OutOfMemory
            ),
            TransportError::Reply { code, .. } => {
                ReplyClass::from(*code) == ReplyClass::TransientNegative
            }
            TransportError::NotConnected | TransportError::Timeout(_) => true,
            TransportError::Protocol(_)
            | TransportError::NotSupported(_)
            | TransportError::Other(_) => false,
        }
    }

    /// Reply code carried by this error, if it came from the server
    pub fn reply_code(&self) -> Option<u16> {
        match self {
            TransportError::Reply { code, .. } => Some(*code),
            _ => None,
        }
    }
}

impl From<Reply> for TransportError {
    fn from(reply: Reply) -> Self {
        TransportError::Reply {
            code: reply.code,
            text: reply.text,
        }
    }
}

/// A lazily produced sequence read over the open connection
///
/// Each call to `next_item` may perform network I/O. `Ok(None)` marks the
/// end of the sequence.
#[async_trait]
pub trait DataStream<I: Send>: Send {
    /// Fetch the next item
    async fn next_item(&mut self) -> TransportResult<Option<I>>;
}

/// Read a stream to its end
///
/// A failure part way through discards everything read so far; callers never
/// observe a truncated sequence.
pub async fn drain<I: Send>(stream: &mut (dyn DataStream<I> + '_)) -> TransportResult<Vec<I>> {
    let mut items = Vec::new();
    while let Some(item) = stream.next_item().await? {
        items.push(item);
    }
    Ok(items)
}

/// FTP control connection capability set
///
/// One value owns at most one connection at a time. `connect` on a value
/// that still holds a connection replaces it.
#[async_trait]
pub trait Transport: Send {
    /// Open the control connection
    async fn connect(&mut self, host: &str, port: u16) -> TransportResult<()>;

    /// Authenticate (USER/PASS)
    async fn login(&mut self, user: &str, password: &str) -> TransportResult<()>;

    /// Change the working directory (CWD)
    async fn cwd(&mut self, path: &str) -> TransportResult<()>;

    /// Query the working directory (PWD)
    async fn pwd(&mut self) -> TransportResult<String>;

    /// Send a raw command and return its reply
    ///
    /// Negative replies (4yz, 5yz) come back as [`TransportError::Reply`].
    async fn sendcmd(&mut self, command: &str) -> TransportResult<Reply>;

    /// Open a machine-readable listing (MLSD, RFC 3659)
    ///
    /// The returned stream borrows the connection; entries arrive lazily.
    /// An empty `facts` slice leaves the server's fact selection untouched.
    async fn mlsd<'a>(
        &'a mut self,
        path: &str,
        facts: &[String],
    ) -> TransportResult<Box<dyn DataStream<DirEntry> + 'a>>;

    /// Open a name listing (NLST); one name per item
    async fn nlst<'a>(&'a mut self, path: &str) -> TransportResult<Box<dyn DataStream<String> + 'a>>;

    /// Open a human-readable listing (LIST); one line per item, format is
    /// server-specific
    async fn list<'a>(&'a mut self, path: &str) -> TransportResult<Box<dyn DataStream<String> + 'a>>;

    /// Whether `mlst` is backed by the server
    ///
    /// When `false`, the client synthesizes single-entry lookups from `mlsd`.
    fn supports_mlst(&self) -> bool {
        true
    }

    /// Look up a single entry (MLST, RFC 3659)
    ///
    /// The default sends `OPTS MLST` when facts are requested, then `MLST`,
    /// and parses the fact line of the multi-line reply.
    async fn mlst(&mut self, path: &str, facts: &[String]) -> TransportResult<DirEntry> {
        if !facts.is_empty() {
            self.sendcmd(&format!("OPTS MLST {};", facts.join(";")))
                .await?;
        }

        let reply = self.sendcmd(&format!("MLST {path}")).await?;
        parse_mlst_reply(&reply.text)
    }

    /// Open a binary download (RETR); chunks arrive lazily
    async fn retrieve<'a>(
        &'a mut self,
        path: &str,
    ) -> TransportResult<Box<dyn DataStream<Bytes> + 'a>>;

    /// Upload `data` as `path` (STOR)
    async fn store(&mut self, path: &str, data: Bytes) -> TransportResult<()>;

    /// Release the connection without negotiating a QUIT
    ///
    /// Best effort; a transport that already lost its socket just resets.
    async fn close(&mut self);
}
