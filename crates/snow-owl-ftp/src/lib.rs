//! # Snow Owl FTP
//!
//! Reconnecting FTP client for long-running scripts.
//!
//! Long-lived sessions against FTP servers get cut off by idle timeouts,
//! flaky links and server restarts. [`Client`] hides that: it detects a lost
//! session, reconnects, logs in again, restores the working directory and
//! re-issues the failed command, up to a bounded number of attempts.
//!
//! The FTP wire protocol itself is supplied by an implementation of
//! [`Transport`] (RFC 959, RFC 3659). This crate adds:
//!
//! - Bounded, immediate retries on connection-level failures
//! - Working directory restoration after reconnection
//! - Atomic directory listings (MLSD) and single-entry lookups (MLST), with a
//!   listing-based fallback for servers without MLST
//! - Retry-safe passthrough of raw commands
//!
//! ```ignore
//! let config = ClientConfig::new("ftp.example.org", 21, "user", "secret").with_retry_budget(5);
//! let mut client = Client::new(config, transport)?;
//!
//! client.cwd("/pub/reports").await?;
//! for entry in client.mlsd("").await? {
//!     println!("{} {:?}", entry.name, entry.size());
//! }
//! ```

pub mod client;
pub mod config;
pub mod entry;
pub mod error;
pub mod listing;
pub mod reply;
pub mod transport;

pub use client::{Client, ConnectionState};
pub use config::ClientConfig;
pub use entry::{DirEntry, Facts};
pub use error::{Error, Result};
pub use listing::DirListing;
pub use reply::Reply;
pub use transport::{DataStream, Transport, TransportError, TransportResult};
