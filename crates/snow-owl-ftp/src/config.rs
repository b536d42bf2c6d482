//! Configuration for the reconnecting FTP client

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Client configuration
///
/// Immutable once handed to [`crate::Client::new`]; each client instance
/// carries its own retry policy.
///
/// NIST 800-53: IA-5 (Authenticator Management)
/// Implementation: The password is kept only to support reconnection and is
/// redacted from `Debug` output.
#[derive(Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Server host name or address
    pub host: String,

    /// Server control port (default: 21)
    #[serde(default = "default_port")]
    pub port: u16,

    /// Login user (default: anonymous)
    #[serde(default = "default_user")]
    pub user: String,

    /// Login password
    #[serde(default)]
    pub password: String,

    /// Maximum attempts per logical operation, the first one included
    #[serde(default = "default_retry_budget")]
    pub retry_budget: u32,
}

impl ClientConfig {
    /// Create a configuration with the default retry budget
    pub fn new(
        host: impl Into<String>,
        port: u16,
        user: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            user: user.into(),
            password: password.into(),
            retry_budget: default_retry_budget(),
        }
    }

    /// Set the retry budget
    pub fn with_retry_budget(mut self, retry_budget: u32) -> Self {
        self.retry_budget = retry_budget;
        self
    }

    /// `host:port` as used in log and error messages
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| crate::Error::Config(format!("Failed to read config file: {}", e)))?;

        toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))
    }

    /// Validate configuration
    pub fn validate(&self) -> crate::Result<()> {
        if self.host.trim().is_empty() {
            return Err(crate::Error::Config("host must not be empty".to_string()));
        }

        if self.port == 0 {
            return Err(crate::Error::Config("port must not be 0".to_string()));
        }

        if self.retry_budget == 0 {
            return Err(crate::Error::Config(
                "retry_budget must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("retry_budget", &self.retry_budget)
            .finish()
    }
}

fn default_port() -> u16 {
    21
}

fn default_user() -> String {
    "anonymous".to_string()
}

// Small on purpose: retries are immediate, there is no backoff.
fn default_retry_budget() -> u32 {
    3
}
