//! Directory entries and machine-readable listing facts (RFC 3659 section 7)
//!
//! Both MLSD lines and the fact line of an MLST reply share the same shape:
//! `fact=value;fact=value; pathname`. Fact names are case-insensitive and are
//! normalized to lower case.

use chrono::{DateTime, NaiveDateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::transport::{TransportError, TransportResult};

/// Fact name to value mapping of one entry
pub type Facts = BTreeMap<String, String>;

/// One file-system object as reported by the server
///
/// For listings `name` is the entry name relative to the listed directory;
/// for single-entry lookups it is the path as the server resolved it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirEntry {
    /// Entry name or server-resolved path
    pub name: String,
    /// Reported facts
    pub facts: Facts,
}

impl DirEntry {
    /// Create an entry from a name and its facts
    pub fn new(name: impl Into<String>, facts: Facts) -> Self {
        Self {
            name: name.into(),
            facts,
        }
    }

    /// Value of a fact, looked up case-insensitively
    pub fn fact(&self, key: &str) -> Option<&str> {
        self.facts.get(&key.to_ascii_lowercase()).map(String::as_str)
    }

    /// The `type` fact (`file`, `dir`, `cdir`, `pdir`, or an OS-specific value)
    pub fn kind(&self) -> Option<&str> {
        self.fact("type")
    }

    /// True for `dir`, `cdir` and `pdir` entries
    pub fn is_dir(&self) -> bool {
        self.kind()
            .is_some_and(|kind| matches!(kind.to_ascii_lowercase().as_str(), "dir" | "cdir" | "pdir"))
    }

    /// True for `file` entries
    pub fn is_file(&self) -> bool {
        self.kind()
            .is_some_and(|kind| kind.eq_ignore_ascii_case("file"))
    }

    /// The `size` fact in octets
    pub fn size(&self) -> Option<u64> {
        self.fact("size").and_then(|size| size.parse().ok())
    }

    /// The `modify` fact as UTC time
    ///
    /// Format is `YYYYMMDDHHMMSS` with an optional fraction of a second.
    pub fn modified(&self) -> Option<DateTime<Utc>> {
        self.fact("modify").and_then(parse_time_val)
    }
}

/// Parse a `time-val` (RFC 3659 section 2.3)
pub fn parse_time_val(value: &str) -> Option<DateTime<Utc>> {
    let (whole, fraction) = value.split_once('.').unwrap_or((value, ""));
    let naive = NaiveDateTime::parse_from_str(whole, "%Y%m%d%H%M%S").ok()?;

    if fraction.is_empty() {
        return Some(naive.and_utc());
    }

    if fraction.len() > 9 || !fraction.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }

    let nanos: u32 = format!("{fraction:0<9}").parse().ok()?;
    naive.with_nanosecond(nanos).map(|naive| naive.and_utc())
}

/// Parse one `facts SP pathname` line
///
/// The pathname is everything after the first space, so names containing
/// spaces survive intact.
pub fn parse_facts_line(line: &str) -> TransportResult<DirEntry> {
    let line = line.trim_end_matches(['\r', '\n']);

    let (facts_part, name) = line.split_once(' ').ok_or_else(|| {
        TransportError::Protocol(format!("Unexpected partition of fact line by space: {line:?}"))
    })?;

    let mut facts = Facts::new();
    for fact in facts_part.split(';').filter(|fact| !fact.is_empty()) {
        let (key, value) = fact.split_once('=').ok_or_else(|| {
            TransportError::Protocol(format!(
                "Unexpected partition of fact line by equal sign: {line:?}"
            ))
        })?;
        facts.insert(key.to_ascii_lowercase(), value.to_string());
    }

    Ok(DirEntry::new(name, facts))
}

/// Parse the reply to `MLST`
///
/// The reply is multi-line: an opening `250-` line, the fact line (indented
/// by one space), and the closing `250` line.
pub fn parse_mlst_reply(text: &str) -> TransportResult<DirEntry> {
    let fact_line = text.lines().nth(1).ok_or_else(|| {
        TransportError::Protocol(format!("Unexpected number of lines in an MLST response: {text:?}"))
    })?;

    parse_facts_line(fact_line.trim_start_matches(' '))
}
