//! Reconnecting FTP Client
//!
//! [`Client`] owns one logical session against an FTP server. Every
//! operation funnels through [`Client::execute_with_retry`], which on each
//! attempt makes sure a live, correctly positioned connection exists before
//! handing it to the operation:
//!
//! 1. When disconnected: connect, log in, restore the remembered working
//!    directory. Any failure here costs one attempt.
//! 2. Run the operation.
//! 3. A connection-level failure drops the connection and starts the next
//!    attempt; any other failure is returned at once.
//!
//! Retries are immediate and bounded by the configured retry budget only.
//!
//! NIST 800-53: CP-10 (System Recovery and Reconstitution), SC-5
//! Implementation: Transparent session recovery with a hard attempt cap

use bytes::{Bytes, BytesMut};
use tracing::{debug, error, info, warn};

use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::reply::{PENDING_FURTHER_INFO, Reply, TRANSFER_ABORTED, parse_213, parse_257};
use crate::transport::{Transport, TransportError, TransportResult};

/// Connection state of a [`Client`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No usable connection; the next operation reconnects
    Disconnected,
    /// Connected and logged in
    Connected,
}

/// FTP client that survives transient network failures
///
/// Operations take `&mut self`, so a client runs exactly one logical
/// operation at a time. The connection is opened lazily by the first
/// operation (or eagerly by [`Client::connect`]) and released by
/// [`Client::close`], [`Client::quit`], the end of [`Client::scoped`], or drop.
pub struct Client<T: Transport> {
    config: ClientConfig,
    transport: T,
    state: ConnectionState,
    last_pwd: Option<String>,
}

impl<T: Transport> Client<T> {
    /// Create a client; no connection is made yet
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the configuration does not validate.
    pub fn new(config: ClientConfig, transport: T) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            config,
            transport,
            state: ConnectionState::Disconnected,
            last_pwd: None,
        })
    }

    /// Current connection state
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// True while a connection is established
    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    /// Working directory restored on reconnection
    pub fn remembered_dir(&self) -> Option<&str> {
        self.last_pwd.as_deref()
    }

    /// Client configuration
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Underlying transport
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Run `operation` against a live connection, reconnecting as needed
    ///
    /// The operation may be invoked once per attempt, so it must be safe to
    /// restart from scratch. Anything it reads lazily over the connection has
    /// to be consumed before it returns.
    ///
    /// # Errors
    ///
    /// - [`Error::Domain`] on the first non connection-level failure
    /// - [`Error::ConnectionExhausted`] once `retry_budget` attempts failed
    pub async fn execute_with_retry<R, F>(&mut self, mut operation: F) -> Result<R>
    where
        F: AsyncFnMut(&mut T) -> TransportResult<R>,
    {
        let budget = self.config.retry_budget;
        let mut attempt = 0;

        loop {
            attempt += 1;

            let failure = match self.ensure_connected().await {
                Err(err) => err,
                Ok(()) => {
                    // Counts as lost while in flight: a future dropped
                    // mid-transfer must not leave unread replies behind.
                    self.state = ConnectionState::Disconnected;
                    let outcome = operation(&mut self.transport).await;
                    self.state = ConnectionState::Connected;

                    match outcome {
                        Ok(value) => return Ok(value),
                        Err(err) if err.is_connection_level() => err,
                        Err(err) => {
                            debug!(error = %err, "Server rejected command, not retrying");
                            return Err(Error::Domain(err));
                        }
                    }
                }
            };

            warn!(
                addr = %self.config.addr(),
                attempt,
                budget,
                error = %failure,
                "Connection-level failure"
            );
            self.drop_connection().await;

            if attempt >= budget {
                error!(
                    addr = %self.config.addr(),
                    attempts = attempt,
                    "Retry budget exhausted"
                );
                return Err(Error::ConnectionExhausted {
                    host: self.config.host.clone(),
                    port: self.config.port,
                    attempts: attempt,
                    source: failure,
                });
            }
        }
    }

    async fn ensure_connected(&mut self) -> TransportResult<()> {
        if self.state == ConnectionState::Connected {
            return Ok(());
        }

        self.establish().await?;
        self.state = ConnectionState::Connected;
        Ok(())
    }

    // Login always precedes directory restoration. A failed restoration is
    // a failed attempt, never a silent fallback to the login directory.
    async fn establish(&mut self) -> TransportResult<()> {
        info!(
            addr = %self.config.addr(),
            user = %self.config.user,
            "Connecting to FTP server"
        );

        self.transport
            .connect(&self.config.host, self.config.port)
            .await?;
        self.transport
            .login(&self.config.user, &self.config.password)
            .await?;

        if let Some(dir) = &self.last_pwd {
            self.transport.cwd(dir).await?;
            info!(dir = %dir, "Restored working directory");
        }

        Ok(())
    }

    async fn drop_connection(&mut self) {
        self.transport.close().await;
        self.state = ConnectionState::Disconnected;
    }

    /// Connect and log in now instead of on first use
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionExhausted`] if no attempt succeeds.
    pub async fn connect(&mut self) -> Result<()> {
        self.execute_with_retry(async |_: &mut T| Ok(())).await
    }

    /// Release the connection without sending QUIT
    ///
    /// Idempotent. The remembered working directory is kept, so a later
    /// operation reconnects to the same place.
    pub async fn close(&mut self) {
        if self.state == ConnectionState::Connected {
            info!(addr = %self.config.addr(), "Closing connection");
            self.drop_connection().await;
        }
    }

    /// Send QUIT, then release the connection
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionExhausted`] or [`Error::Domain`].
    pub async fn quit(&mut self) -> Result<Reply> {
        let reply = self
            .execute_with_retry(async |conn: &mut T| conn.sendcmd("QUIT").await)
            .await?;
        self.close().await;
        Ok(reply)
    }

    /// Run `f` with a live connection and close on every exit path
    ///
    /// # Errors
    ///
    /// Returns the connection failure if the initial connect fails, otherwise
    /// whatever `f` returns.
    pub async fn scoped<R, F>(mut self, f: F) -> Result<R>
    where
        F: AsyncFnOnce(&mut Self) -> Result<R>,
    {
        if let Err(err) = self.connect().await {
            self.close().await;
            return Err(err);
        }

        let result = f(&mut self).await;
        self.close().await;
        result
    }

    /// Change the working directory (CWD)
    ///
    /// The directory the server reports afterwards becomes the remembered
    /// working directory. A server without a usable PWD gets `dirname`
    /// resolved against the previously remembered directory instead.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionExhausted`] or [`Error::Domain`].
    pub async fn cwd(&mut self, dirname: &str) -> Result<()> {
        let fallback = resolve_path(self.last_pwd.as_deref(), dirname);

        let dir = self
            .execute_with_retry(async |conn: &mut T| {
                conn.cwd(dirname).await?;
                current_dir_after(conn, fallback.as_deref()).await
            })
            .await?;

        debug!(dir = ?dir, "Working directory changed");
        self.last_pwd = dir;
        Ok(())
    }

    /// Query the working directory (PWD)
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionExhausted`] or [`Error::Domain`].
    pub async fn pwd(&mut self) -> Result<String> {
        let dir = self
            .execute_with_retry(async |conn: &mut T| conn.pwd().await)
            .await?;

        self.last_pwd = Some(dir.clone());
        Ok(dir)
    }

    /// Send a raw command and return the server's reply
    ///
    /// Directory-changing commands (CWD, XCWD, CDUP, XCUP) also refresh the
    /// remembered working directory within the same attempt.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionExhausted`] or [`Error::Domain`].
    pub async fn sendcmd(&mut self, command: &str) -> Result<Reply> {
        debug!(command = %redact(command), "Sending command");

        let fallback = directory_change(command)
            .map(|target| resolve_path(self.last_pwd.as_deref(), &target));

        let (reply, dir) = self
            .execute_with_retry(async |conn: &mut T| {
                let reply = conn.sendcmd(command).await?;
                let dir = match &fallback {
                    Some(fallback) => Some(current_dir_after(conn, fallback.as_deref()).await?),
                    None => None,
                };
                Ok((reply, dir))
            })
            .await?;

        if let Some(dir) = dir {
            self.last_pwd = dir;
        }
        Ok(reply)
    }

    /// Send a raw command that must complete with a 2yz reply
    ///
    /// # Errors
    ///
    /// Returns [`Error::Domain`] for any other reply, in addition to the
    /// errors of [`Client::sendcmd`].
    pub async fn voidcmd(&mut self, command: &str) -> Result<Reply> {
        let reply = self.sendcmd(command).await?;
        if reply.is_completion() {
            Ok(reply)
        } else {
            Err(Error::Domain(TransportError::from(reply)))
        }
    }

    /// Send `name` followed by space-separated `args`
    ///
    /// # Errors
    ///
    /// See [`Client::sendcmd`].
    pub async fn command(&mut self, name: &str, args: &[&str]) -> Result<Reply> {
        let mut command = name.to_ascii_uppercase();
        for arg in args {
            command.push(' ');
            command.push_str(arg);
        }
        self.sendcmd(&command).await
    }

    /// NOOP, handy as a keep-alive
    ///
    /// # Errors
    ///
    /// See [`Client::voidcmd`].
    pub async fn noop(&mut self) -> Result<Reply> {
        self.voidcmd("NOOP").await
    }

    /// Abort the previous command and any transfer in progress (ABOR)
    ///
    /// Both 426 (transfer aborted) and 2yz replies count as success.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionExhausted`] or [`Error::Domain`].
    pub async fn abort(&mut self) -> Result<Reply> {
        self.execute_with_retry(async |conn: &mut T| match conn.sendcmd("ABOR").await {
            Err(TransportError::Reply {
                code: TRANSFER_ABORTED,
                text,
            }) => Ok(Reply::new(TRANSFER_ABORTED, text)),
            other => other,
        })
        .await
    }

    /// Send the account information (ACCT)
    ///
    /// # Errors
    ///
    /// See [`Client::voidcmd`].
    pub async fn acct(&mut self, account: &str) -> Result<Reply> {
        self.voidcmd(&format!("ACCT {account}")).await
    }

    /// Create a directory (MKD) and return its path
    ///
    /// # Errors
    ///
    /// See [`Client::sendcmd`].
    pub async fn mkd(&mut self, dirname: &str) -> Result<String> {
        let reply = self.sendcmd(&format!("MKD {dirname}")).await?;
        Ok(parse_257(&reply)
            .or_else(|| resolve_path(self.last_pwd.as_deref(), dirname))
            .unwrap_or_else(|| dirname.to_string()))
    }

    /// Remove a directory (RMD)
    ///
    /// # Errors
    ///
    /// See [`Client::voidcmd`].
    pub async fn rmd(&mut self, dirname: &str) -> Result<Reply> {
        self.voidcmd(&format!("RMD {dirname}")).await
    }

    /// Delete a file (DELE)
    ///
    /// # Errors
    ///
    /// See [`Client::voidcmd`].
    pub async fn delete(&mut self, filename: &str) -> Result<Reply> {
        self.voidcmd(&format!("DELE {filename}")).await
    }

    /// Rename a file or directory (RNFR + RNTO in one attempt)
    ///
    /// # Errors
    ///
    /// Returns [`Error::Domain`] if the server does not accept RNFR with a
    /// 350 reply, in addition to the errors of [`Client::sendcmd`].
    pub async fn rename(&mut self, from: &str, to: &str) -> Result<Reply> {
        self.execute_with_retry(async |conn: &mut T| {
            let pending = conn.sendcmd(&format!("RNFR {from}")).await?;
            if pending.code != PENDING_FURTHER_INFO {
                return Err(TransportError::Protocol(format!(
                    "Unexpected reply to RNFR: {pending}"
                )));
            }
            conn.sendcmd(&format!("RNTO {to}")).await
        })
        .await
    }

    /// Size of a file in octets (SIZE, RFC 3659)
    ///
    /// # Errors
    ///
    /// Returns [`Error::Domain`] if the reply carries no size, in addition
    /// to the errors of [`Client::sendcmd`].
    pub async fn size(&mut self, filename: &str) -> Result<u64> {
        let reply = self.sendcmd(&format!("SIZE {filename}")).await?;
        parse_213(&reply).ok_or_else(|| {
            Error::Domain(TransportError::Protocol(format!(
                "Unexpected reply to SIZE: {reply}"
            )))
        })
    }

    /// Download a file in one attempt (RETR)
    ///
    /// The whole file is buffered before returning; a reconnection restarts
    /// the download from the first byte, so the result never mixes data from
    /// two connections.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionExhausted`] or [`Error::Domain`].
    pub async fn retrieve(&mut self, path: &str) -> Result<Bytes> {
        self.execute_with_retry(async |conn: &mut T| {
            let mut stream = conn.retrieve(path).await?;
            let mut buf = BytesMut::new();
            while let Some(chunk) = stream.next_item().await? {
                buf.extend_from_slice(&chunk);
            }
            Ok(buf.freeze())
        })
        .await
    }

    /// Download a text file and split it into lines
    ///
    /// Line terminators (CRLF or LF) are stripped.
    ///
    /// # Errors
    ///
    /// See [`Client::retrieve`]; a file that is not valid UTF-8 is rejected
    /// with [`Error::Domain`].
    pub async fn retrieve_lines(&mut self, path: &str) -> Result<Vec<String>> {
        let data = self.retrieve(path).await?;
        let text = std::str::from_utf8(&data).map_err(|err| {
            Error::Domain(TransportError::Protocol(format!(
                "{path} is not a text file: {err}"
            )))
        })?;
        Ok(text.lines().map(str::to_string).collect())
    }

    /// Upload `lines` as a text file, each line terminated by CRLF
    ///
    /// # Errors
    ///
    /// See [`Client::store`].
    pub async fn store_lines<S: AsRef<str>>(&mut self, path: &str, lines: &[S]) -> Result<()> {
        let mut buf = BytesMut::new();
        for line in lines {
            buf.extend_from_slice(line.as_ref().as_bytes());
            buf.extend_from_slice(b"\r\n");
        }
        self.store(path, buf.freeze()).await
    }

    /// Upload `data` as `path` (STOR); retries resend from the beginning
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionExhausted`] or [`Error::Domain`].
    pub async fn store(&mut self, path: &str, data: Bytes) -> Result<()> {
        self.execute_with_retry(async |conn: &mut T| conn.store(path, data.clone()).await)
            .await
    }
}

impl<T: Transport> Drop for Client<T> {
    fn drop(&mut self) {
        if self.state == ConnectionState::Connected {
            warn!(
                addr = %self.config.addr(),
                "Client dropped while connected, releasing transport without QUIT"
            );
        }
    }
}

/// Working directory after a successful directory change
///
/// A domain failure of PWD (not implemented, unparsable) falls back to the
/// locally resolved path; connection-level failures fail the attempt.
async fn current_dir_after<T: Transport>(
    conn: &mut T,
    fallback: Option<&str>,
) -> TransportResult<Option<String>> {
    match conn.pwd().await {
        Ok(dir) => Ok(Some(dir)),
        Err(err) if err.is_connection_level() => Err(err),
        Err(err) => {
            debug!(error = %err, fallback = ?fallback, "PWD unavailable, using resolved path");
            Ok(fallback.map(str::to_string))
        }
    }
}

/// Target of a directory-changing raw command, if `command` is one
fn directory_change(command: &str) -> Option<String> {
    let command = command.trim();
    let (verb, arg) = command.split_once(' ').unwrap_or((command, ""));

    match verb.to_ascii_uppercase().as_str() {
        "CWD" | "XCWD" => Some(arg.trim().to_string()),
        "CDUP" | "XCUP" => Some("..".to_string()),
        _ => None,
    }
}

/// Hide the argument of PASS/ACCT in logs
fn redact(command: &str) -> &str {
    let verb = command.split(' ').next().unwrap_or(command);
    if verb.eq_ignore_ascii_case("PASS") || verb.eq_ignore_ascii_case("ACCT") {
        verb
    } else {
        command
    }
}

/// Resolve `path` against the working directory
///
/// `None` stands for the login directory. Relative results are relative to
/// it, which is where directory restoration starts after logging in.
///
/// - absolute `path` -> unchanged
/// - `.` or empty -> `current`
/// - `..` -> parent of `current`
/// - anything else -> `current/path`
pub(crate) fn resolve_path(current: Option<&str>, path: &str) -> Option<String> {
    if path.starts_with('/') {
        return Some(path.to_string());
    }
    if path.is_empty() || path == "." {
        return current.map(str::to_string);
    }

    let Some(current) = current else {
        return Some(path.to_string());
    };

    if path == ".." {
        return parent_of(current);
    }

    if current.ends_with('/') {
        Some(format!("{current}{path}"))
    } else {
        Some(format!("{current}/{path}"))
    }
}

/// Parent of `current`; `None` when that is the login directory
fn parent_of(current: &str) -> Option<String> {
    let trimmed = current.trim_end_matches('/');

    if current.starts_with('/') {
        return match trimmed.rsplit_once('/') {
            Some((parent, _)) if !parent.is_empty() => Some(parent.to_string()),
            _ => Some("/".to_string()),
        };
    }

    // A trailing `..` climbs above the login directory and cannot be popped.
    if trimmed == ".." || trimmed.ends_with("/..") {
        return Some(format!("{trimmed}/.."));
    }

    trimmed
        .rsplit_once('/')
        .map(|(parent, _)| parent.to_string())
}
