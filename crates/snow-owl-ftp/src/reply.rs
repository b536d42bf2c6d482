//! FTP Reply Model
//!
//! Server replies as defined in RFC 959 section 4.2. The first digit of a
//! reply code carries the completion class; the resilience layer only needs
//! that class plus a handful of well-known codes to decide whether a failure
//! is transient or permanent.

use std::fmt;

/// Service not available, closing control connection
pub const SERVICE_CLOSING: u16 = 421;
/// Can't open data connection
pub const DATA_CONNECTION_FAILED: u16 = 425;
/// Connection closed; transfer aborted
pub const TRANSFER_ABORTED: u16 = 426;
/// File status (SIZE response, RFC 3659)
pub const FILE_STATUS: u16 = 213;
/// Requested file action okay, completed
pub const FILE_ACTION_OK: u16 = 250;
/// "PATHNAME" created / current directory
pub const PATHNAME_CREATED: u16 = 257;
/// Requested file action pending further information (RNFR)
pub const PENDING_FURTHER_INFO: u16 = 350;
/// Syntax error, command unrecognized
pub const SYNTAX_ERROR: u16 = 500;
/// Command not implemented
pub const NOT_IMPLEMENTED: u16 = 502;
/// Not logged in
pub const NOT_LOGGED_IN: u16 = 530;
/// Requested action not taken; file unavailable
pub const FILE_UNAVAILABLE: u16 = 550;

/// Completion class of a reply (first digit of the code)
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyClass {
    /// 1yz: positive preliminary reply
    PositivePreliminary = 1,
    /// 2yz: positive completion reply
    PositiveCompletion = 2,
    /// 3yz: positive intermediate reply
    PositiveIntermediate = 3,
    /// 4yz: transient negative completion reply
    TransientNegative = 4,
    /// 5yz: permanent negative completion reply
    PermanentNegative = 5,
    /// Anything outside 100..=599
    Unknown = 0,
}

impl From<u16> for ReplyClass {
    fn from(code: u16) -> Self {
        match code / 100 {
            1 => ReplyClass::PositivePreliminary,
            2 => ReplyClass::PositiveCompletion,
            3 => ReplyClass::PositiveIntermediate,
            4 => ReplyClass::TransientNegative,
            5 => ReplyClass::PermanentNegative,
            _ => ReplyClass::Unknown,
        }
    }
}

/// A complete server reply
///
/// `text` holds the full reply as received, including the code prefix and
/// every continuation line of a multi-line reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    /// Three-digit reply code
    pub code: u16,
    /// Full reply text
    pub text: String,
}

impl Reply {
    /// Create a reply from its parts
    pub fn new(code: u16, text: impl Into<String>) -> Self {
        Self {
            code,
            text: text.into(),
        }
    }

    /// Completion class of this reply
    pub fn class(&self) -> ReplyClass {
        ReplyClass::from(self.code)
    }

    /// True for 1yz, 2yz and 3yz replies
    pub fn is_positive(&self) -> bool {
        matches!(
            self.class(),
            ReplyClass::PositivePreliminary
                | ReplyClass::PositiveCompletion
                | ReplyClass::PositiveIntermediate
        )
    }

    /// True for 2yz replies only
    pub fn is_completion(&self) -> bool {
        self.class() == ReplyClass::PositiveCompletion
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.text.trim_end())
    }
}

/// Extract the pathname from a `257` reply
///
/// The path is enclosed in double quotes; embedded quotes are doubled
/// (RFC 959 Appendix II). Returns `None` when the reply carries no quoted
/// path, which some servers do for MKD.
pub fn parse_257(reply: &Reply) -> Option<String> {
    if reply.code != PATHNAME_CREATED {
        return None;
    }

    let start = reply.text.find('"')?;
    let mut path = String::new();
    let mut chars = reply.text[start + 1..].chars().peekable();

    while let Some(c) = chars.next() {
        if c == '"' {
            if chars.peek() == Some(&'"') {
                chars.next();
                path.push('"');
            } else {
                return Some(path);
            }
        } else {
            path.push(c);
        }
    }

    // Unterminated quote
    None
}

/// Extract the size from a `213` reply to SIZE (RFC 3659 section 4)
pub fn parse_213(reply: &Reply) -> Option<u64> {
    if reply.code != FILE_STATUS {
        return None;
    }

    reply
        .text
        .split_whitespace()
        .nth(1)
        .and_then(|size| size.parse().ok())
}
