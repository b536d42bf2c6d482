//! Atomic listings and single-entry lookups
//!
//! The raw MLSD primitive streams entries over the connection one at a time.
//! A reconnection in the middle of that stream would splice two sessions'
//! views together, so each listing is drained completely inside a single
//! retry attempt and handed back as an owned snapshot.

use tracing::debug;

use crate::client::Client;
use crate::entry::DirEntry;
use crate::error::{Error, Result};
use crate::transport::{Transport, drain};

/// Fully materialized directory listing
///
/// Iterating performs no network I/O. The order is the server's.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirListing {
    entries: Vec<DirEntry>,
}

impl DirListing {
    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if the directory listed no entries
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over the entries
    pub fn iter(&self) -> std::slice::Iter<'_, DirEntry> {
        self.entries.iter()
    }

    /// Entry names, in listing order
    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|entry| entry.name.as_str()).collect()
    }

    /// Take the entries
    pub fn into_vec(self) -> Vec<DirEntry> {
        self.entries
    }
}

impl From<Vec<DirEntry>> for DirListing {
    fn from(entries: Vec<DirEntry>) -> Self {
        Self { entries }
    }
}

impl IntoIterator for DirListing {
    type Item = DirEntry;
    type IntoIter = std::vec::IntoIter<DirEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

impl<'a> IntoIterator for &'a DirListing {
    type Item = &'a DirEntry;
    type IntoIter = std::slice::Iter<'a, DirEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

impl<T: Transport> Client<T> {
    /// List `path` (MLSD); an empty path lists the working directory
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionExhausted`] or the server's own error as
    /// [`Error::Domain`]. A truncated listing is never returned.
    pub async fn mlsd(&mut self, path: &str) -> Result<DirListing> {
        self.mlsd_with_facts(path, &[]).await
    }

    /// List `path`, asking the server for the given facts only
    ///
    /// # Errors
    ///
    /// See [`Client::mlsd`].
    pub async fn mlsd_with_facts(&mut self, path: &str, facts: &[&str]) -> Result<DirListing> {
        let facts: Vec<String> = facts.iter().map(|fact| fact.to_string()).collect();

        let entries = self
            .execute_with_retry(async |conn: &mut T| {
                let mut stream = conn.mlsd(path, &facts).await?;
                drain(&mut *stream).await
            })
            .await?;

        debug!(path, entries = entries.len(), "Listing complete");
        Ok(DirListing::from(entries))
    }

    /// Names in `path` (NLST); an empty path lists the working directory
    ///
    /// Drained within one attempt, like [`Client::mlsd`]. Works on servers
    /// that do not offer MLSD.
    ///
    /// # Errors
    ///
    /// See [`Client::mlsd`].
    pub async fn nlst(&mut self, path: &str) -> Result<Vec<String>> {
        let names = self
            .execute_with_retry(async |conn: &mut T| {
                let mut stream = conn.nlst(path).await?;
                drain(&mut *stream).await
            })
            .await?;

        debug!(path, names = names.len(), "Name listing complete");
        Ok(names)
    }

    /// Raw LIST lines for `path`; an empty path lists the working directory
    ///
    /// The line format is whatever the server produces.
    ///
    /// # Errors
    ///
    /// See [`Client::mlsd`].
    pub async fn list(&mut self, path: &str) -> Result<Vec<String>> {
        let lines = self
            .execute_with_retry(async |conn: &mut T| {
                let mut stream = conn.list(path).await?;
                drain(&mut *stream).await
            })
            .await?;

        debug!(path, lines = lines.len(), "LIST complete");
        Ok(lines)
    }

    /// Look up a single entry (MLST)
    ///
    /// Servers without MLST get the lookup synthesized from a listing scoped
    /// to `filename`, which must then yield exactly one entry.
    ///
    /// # Errors
    ///
    /// - [`Error::NotFound`] when the listing yields no entry
    /// - [`Error::Ambiguous`] when it yields more than one
    /// - [`Error::ConnectionExhausted`] or [`Error::Domain`] otherwise
    pub async fn mlst(&mut self, filename: &str) -> Result<DirEntry> {
        self.mlst_with_facts(filename, &[]).await
    }

    /// Look up a single entry, asking for the given facts only
    ///
    /// # Errors
    ///
    /// See [`Client::mlst`].
    pub async fn mlst_with_facts(&mut self, filename: &str, facts: &[&str]) -> Result<DirEntry> {
        if self.transport().supports_mlst() {
            let facts: Vec<String> = facts.iter().map(|fact| fact.to_string()).collect();
            return self
                .execute_with_retry(async |conn: &mut T| conn.mlst(filename, &facts).await)
                .await;
        }

        debug!(filename, "MLST not supported, synthesizing from listing");
        let mut entries = self.mlsd_with_facts(filename, facts).await?.into_vec();

        match entries.len() {
            0 => Err(Error::NotFound(filename.to_string())),
            1 => Ok(entries.remove(0)),
            count => Err(Error::Ambiguous {
                path: filename.to_string(),
                count,
            }),
        }
    }
}
