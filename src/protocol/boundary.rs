//! Multipart boundaries.
//!
//! A boundary line is `--<boundary>` (another part follows) or
//! `--<boundary>--` (the scope ends), optionally followed by transport
//! padding (spaces and tabs) before the line terminator.

use crate::error::{BatchwireError, Result};

/// Nesting depth of the batch boundary.
pub const BATCH_DEPTH: u8 = 0;

/// Nesting depth of a change-set boundary.
pub const CHANGESET_DEPTH: u8 = 1;

/// Longest boundary text allowed by RFC 2046.
pub const MAX_BOUNDARY_LENGTH: usize = 70;

/// What a boundary line announces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoundaryLine {
    /// `--<boundary>`: another part follows.
    Delimiter,
    /// `--<boundary>--`: the scope is closed.
    Terminator,
}

/// A boundary delimiter at a given nesting depth.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Boundary {
    text: String,
    depth: u8,
}

impl Boundary {
    /// Validate a boundary string and bind it to a depth.
    pub fn new(text: &str, depth: u8) -> Result<Self> {
        if depth > CHANGESET_DEPTH {
            return Err(BatchwireError::MalformedBoundary(format!(
                "boundary '{}' would nest at depth {}, change-sets cannot contain change-sets",
                text, depth
            )));
        }
        if text.is_empty() || text.len() > MAX_BOUNDARY_LENGTH {
            return Err(BatchwireError::MalformedBoundary(format!(
                "boundary must be 1 to {} characters, got {}",
                MAX_BOUNDARY_LENGTH,
                text.len()
            )));
        }
        if !text.bytes().all(is_boundary_char) || text.ends_with(' ') {
            return Err(BatchwireError::MalformedBoundary(format!(
                "boundary '{}' contains characters outside the RFC 2046 set",
                text
            )));
        }
        Ok(Self {
            text: text.to_string(),
            depth,
        })
    }

    /// The boundary text.
    #[inline]
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Nesting depth (0 = batch, 1 = change-set).
    #[inline]
    pub fn depth(&self) -> u8 {
        self.depth
    }

    /// `--<boundary>`
    pub fn delimiter(&self) -> String {
        format!("--{}", self.text)
    }

    /// `--<boundary>--`
    pub fn terminator(&self) -> String {
        format!("--{}--", self.text)
    }

    /// Classify a raw line, line terminator included or not.
    pub fn classify(&self, line: &[u8]) -> Option<BoundaryLine> {
        let line = trim_padding(trim_line_end(line));
        let rest = line.strip_prefix(b"--")?.strip_prefix(self.text.as_bytes())?;
        match rest {
            b"" => Some(BoundaryLine::Delimiter),
            b"--" => Some(BoundaryLine::Terminator),
            _ => None,
        }
    }
}

/// Strip a trailing `\n` or `\r\n`.
pub fn trim_line_end(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

/// Strip trailing spaces and tabs.
fn trim_padding(mut line: &[u8]) -> &[u8] {
    while let [rest @ .., b' ' | b'\t'] = line {
        line = rest;
    }
    line
}

/// RFC 2046 `bchars`.
fn is_boundary_char(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b"'()+_,-./:=? ".contains(&b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_delimiter_and_terminator() {
        let boundary = Boundary::new("batch_1", BATCH_DEPTH).unwrap();
        assert_eq!(boundary.classify(b"--batch_1\r\n"), Some(BoundaryLine::Delimiter));
        assert_eq!(boundary.classify(b"--batch_1"), Some(BoundaryLine::Delimiter));
        assert_eq!(boundary.classify(b"--batch_1--\n"), Some(BoundaryLine::Terminator));
        assert_eq!(boundary.classify(b"--batch_1 \t\r\n"), Some(BoundaryLine::Delimiter));
    }

    #[test]
    fn test_classify_non_boundaries() {
        let boundary = Boundary::new("batch_1", BATCH_DEPTH).unwrap();
        assert_eq!(boundary.classify(b"batch_1\r\n"), None);
        assert_eq!(boundary.classify(b"--batch_12\r\n"), None);
        assert_eq!(boundary.classify(b"--batch_1-\r\n"), None);
        assert_eq!(boundary.classify(b" --batch_1\r\n"), None);
        assert_eq!(boundary.classify(b"--changeset_1\r\n"), None);
    }

    #[test]
    fn test_delimiter_text() {
        let boundary = Boundary::new("changeset_a", CHANGESET_DEPTH).unwrap();
        assert_eq!(boundary.delimiter(), "--changeset_a");
        assert_eq!(boundary.terminator(), "--changeset_a--");
        assert_eq!(boundary.depth(), CHANGESET_DEPTH);
    }

    #[test]
    fn test_rejects_second_nesting_level() {
        let err = Boundary::new("inner", CHANGESET_DEPTH + 1).unwrap_err();
        assert!(matches!(err, BatchwireError::MalformedBoundary(_)));
    }

    #[test]
    fn test_rejects_bad_text() {
        assert!(Boundary::new("", BATCH_DEPTH).is_err());
        assert!(Boundary::new(&"x".repeat(71), BATCH_DEPTH).is_err());
        assert!(Boundary::new("bad\"quote", BATCH_DEPTH).is_err());
        assert!(Boundary::new("trailing ", BATCH_DEPTH).is_err());
        assert!(Boundary::new("with space inside", BATCH_DEPTH).is_ok());
    }

    #[test]
    fn test_trim_line_end() {
        assert_eq!(trim_line_end(b"abc\r\n"), b"abc");
        assert_eq!(trim_line_end(b"abc\n"), b"abc");
        assert_eq!(trim_line_end(b"abc"), b"abc");
        assert_eq!(trim_line_end(b"\r\n"), b"");
    }
}
