//! Request and status lines of embedded HTTP messages.
//!
//! ```text
//! request line:  METHOD SP URL SP HTTP/x.y
//! status line:   HTTP/x.y SP code SP reason
//! ```

use std::fmt;

use crate::error::{BatchwireError, Result};

/// Protocol version written by the batch writer.
pub const HTTP_VERSION: &str = "HTTP/1.1";

/// First line of an embedded request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestLine {
    /// Request method, as sent.
    pub method: String,
    /// Target URL, absolute, relative or a `$N` reference.
    pub url: String,
    /// Protocol version.
    pub version: String,
}

/// First line of an embedded response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusLine {
    /// Protocol version.
    pub version: String,
    /// Three-digit status code.
    pub status_code: u16,
    /// Reason phrase (may be empty).
    pub reason: String,
}

impl RequestLine {
    /// Create a request line with the default protocol version.
    pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            url: url.into(),
            version: HTTP_VERSION.to_string(),
        }
    }

    /// Parse a request line (without its line terminator).
    pub fn parse(line: &str) -> Result<Self> {
        let invalid =
            || BatchwireError::MalformedOperation(format!("invalid request line '{}'", line));

        let mut parts = line.split(' ');
        let (Some(method), Some(url), Some(version), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(invalid());
        };

        if method.is_empty() || !method.bytes().all(|b| b.is_ascii_uppercase()) {
            return Err(invalid());
        }
        if url.is_empty() || !is_http_version(version) {
            return Err(invalid());
        }

        Ok(Self {
            method: method.to_string(),
            url: url.to_string(),
            version: version.to_string(),
        })
    }

    /// Check if the method may appear inside a change-set.
    pub fn is_modifying(&self) -> bool {
        !matches!(self.method.as_str(), "GET" | "HEAD" | "OPTIONS")
    }
}

impl StatusLine {
    /// Create a status line with the default protocol version.
    pub fn new(status_code: u16, reason: impl Into<String>) -> Self {
        Self {
            version: HTTP_VERSION.to_string(),
            status_code,
            reason: reason.into(),
        }
    }

    /// Parse a status line (without its line terminator).
    pub fn parse(line: &str) -> Result<Self> {
        let invalid =
            || BatchwireError::MalformedOperation(format!("invalid status line '{}'", line));

        let (version, rest) = line.split_once(' ').ok_or_else(invalid)?;
        if !is_http_version(version) {
            return Err(invalid());
        }
        let (code, reason) = rest.split_once(' ').unwrap_or((rest, ""));
        if code.len() != 3 || !code.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        let status_code = code.parse::<u16>().map_err(|_| invalid())?;
        if !(100..=599).contains(&status_code) {
            return Err(invalid());
        }

        Ok(Self {
            version: version.to_string(),
            status_code,
            reason: reason.to_string(),
        })
    }
}

impl fmt::Display for RequestLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.method, self.url, self.version)
    }
}

impl fmt::Display for StatusLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.version, self.status_code, self.reason)
    }
}

fn is_http_version(s: &str) -> bool {
    match s.strip_prefix("HTTP/") {
        Some(number) => {
            let mut parts = number.split('.');
            matches!(
                (parts.next(), parts.next(), parts.next()),
                (Some(major), Some(minor), None)
                    if !major.is_empty()
                        && !minor.is_empty()
                        && major.bytes().all(|b| b.is_ascii_digit())
                        && minor.bytes().all(|b| b.is_ascii_digit())
            )
        }
        None => false,
    }
}
