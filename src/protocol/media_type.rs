//! Media type parsing.
//!
//! Handles `type/subtype; name=value; name="quoted value"` as it appears in
//! `Content-Type` headers.

use std::fmt;
use std::str::FromStr;

use crate::error::{BatchwireError, Result};

/// Parsed media type with ordered parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaType {
    /// Top-level type, lowercased.
    pub type_: String,
    /// Subtype, lowercased.
    pub subtype: String,
    /// Parameters in declaration order; names lowercased, values verbatim.
    pub parameters: Vec<(String, String)>,
}

impl MediaType {
    /// Create a media type without parameters.
    pub fn new(type_: &str, subtype: &str) -> Self {
        Self {
            type_: type_.to_ascii_lowercase(),
            subtype: subtype.to_ascii_lowercase(),
            parameters: Vec::new(),
        }
    }

    /// Add a parameter.
    pub fn with_parameter(mut self, name: &str, value: &str) -> Self {
        self.parameters
            .push((name.to_ascii_lowercase(), value.to_string()));
        self
    }

    /// Parse a `Content-Type` value.
    pub fn parse(input: &str) -> Result<Self> {
        let invalid =
            || BatchwireError::MalformedOperation(format!("invalid media type '{}'", input));

        let mut rest = input.trim();
        let essence_end = rest.find(';').unwrap_or(rest.len());
        let (type_, subtype) = rest[..essence_end]
            .trim()
            .split_once('/')
            .ok_or_else(invalid)?;
        let (type_, subtype) = (type_.trim(), subtype.trim());
        if !is_token(type_) || !is_token(subtype) {
            return Err(invalid());
        }

        let mut media_type = Self::new(type_, subtype);
        rest = &rest[essence_end..];

        while let Some(stripped) = rest.strip_prefix(';') {
            rest = stripped.trim_start();
            if rest.is_empty() {
                break;
            }
            let eq = rest.find('=').ok_or_else(invalid)?;
            let name = rest[..eq].trim();
            if !is_token(name) {
                return Err(invalid());
            }
            rest = rest[eq + 1..].trim_start();

            let value;
            if let Some(quoted) = rest.strip_prefix('"') {
                let (unquoted, consumed) = read_quoted(quoted).ok_or_else(invalid)?;
                value = unquoted;
                rest = quoted[consumed..].trim_start();
            } else {
                let end = rest.find(';').unwrap_or(rest.len());
                value = rest[..end].trim().to_string();
                rest = &rest[end..];
            }

            media_type
                .parameters
                .push((name.to_ascii_lowercase(), value));

            if !rest.is_empty() && !rest.starts_with(';') {
                return Err(invalid());
            }
        }

        Ok(media_type)
    }

    /// `type/subtype`, lowercased.
    pub fn essence(&self) -> String {
        format!("{}/{}", self.type_, self.subtype)
    }

    /// Check the type and subtype, ignoring case and parameters.
    pub fn is(&self, type_: &str, subtype: &str) -> bool {
        self.type_.eq_ignore_ascii_case(type_) && self.subtype.eq_ignore_ascii_case(subtype)
    }

    /// Get a parameter value by name (case-insensitive).
    pub fn parameter(&self, name: &str) -> Option<&str> {
        self.parameters
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Get the `boundary` parameter.
    pub fn boundary(&self) -> Option<&str> {
        self.parameter("boundary")
    }
}

impl FromStr for MediaType {
    type Err = BatchwireError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.type_, self.subtype)?;
        for (name, value) in &self.parameters {
            if is_token(value) {
                write!(f, "; {}={}", name, value)?;
            } else {
                write!(f, "; {}=\"{}\"", name, value.replace('\\', "\\\\").replace('"', "\\\""))?;
            }
        }
        Ok(())
    }
}

/// RFC 7230 token characters.
fn is_token(s: &str) -> bool {
    !s.is_empty()
        && s.bytes().all(|b| {
            b.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&b)
        })
}

/// Read a quoted-string body (after the opening quote).
///
/// Returns the unescaped value and the number of bytes consumed including
/// the closing quote.
fn read_quoted(input: &str) -> Option<(String, usize)> {
    let mut value = String::new();
    let mut escaped = false;
    for (i, c) in input.char_indices() {
        if escaped {
            value.push(c);
            escaped = false;
        } else if c == '\\' {
            escaped = true;
        } else if c == '"' {
            return Some((value, i + 1));
        } else {
            value.push(c);
        }
    }
    None
}
