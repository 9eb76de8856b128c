//! Operations and their cross-references.
//!
//! Every operation may carry a Content-ID. Later operations refer to it in
//! two ways, which are merged into one ordered, de-duplicated list:
//!
//! 1. an explicit `Depends-On: 1, 2` header
//! 2. a `$1` placeholder segment in the request URL (`POST $1/Orders/$ref`)
//!
//! Explicit ids come first, then URL references, each id kept at its first
//! occurrence.

use std::collections::HashSet;

use bytes::Bytes;

use crate::error::{BatchwireError, Result};
use crate::protocol::{Headers, RequestLine, StatusLine};

/// First line of an embedded message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationLine {
    /// `METHOD URL version`
    Request(RequestLine),
    /// `version code reason`
    Response(StatusLine),
}

/// One embedded request or response, as read from a batch.
///
/// The body is not part of this value; it is exposed separately through a
/// scoped stream while the reader is positioned on the operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Operation {
    /// Content-ID assigned by the producer.
    pub content_id: Option<String>,
    /// Content-IDs this operation must follow, in first-referenced order.
    pub depends_on_ids: Vec<String>,
    /// Request line or status line.
    pub line: OperationLine,
    /// Headers of the embedded message.
    pub headers: Headers,
    /// MIME headers of the enclosing part.
    pub part_headers: Headers,
    /// Boundary of the change-set this operation belongs to.
    pub changeset: Option<String>,
}

impl Operation {
    /// Request method, for request operations.
    pub fn method(&self) -> Option<&str> {
        match &self.line {
            OperationLine::Request(line) => Some(&line.method),
            OperationLine::Response(_) => None,
        }
    }

    /// Request URL, for request operations.
    pub fn url(&self) -> Option<&str> {
        match &self.line {
            OperationLine::Request(line) => Some(&line.url),
            OperationLine::Response(_) => None,
        }
    }

    /// Status code, for response operations.
    pub fn status_code(&self) -> Option<u16> {
        match &self.line {
            OperationLine::Request(_) => None,
            OperationLine::Response(line) => Some(line.status_code),
        }
    }

    /// Check if the operation is part of a change-set.
    pub fn in_changeset(&self) -> bool {
        self.changeset.is_some()
    }
}

/// `$name` segments of a URL path, in order.
///
/// Query and fragment are ignored.
pub fn url_references(url: &str) -> impl Iterator<Item = &str> {
    let path_end = url.find(['?', '#']).unwrap_or(url.len());
    url[..path_end]
        .split('/')
        .filter_map(|segment| segment.strip_prefix('$'))
        .filter(|name| !name.is_empty())
}

/// Split a `Depends-On` header value into ids.
pub fn parse_depends_on(value: &str) -> impl Iterator<Item = &str> {
    value.split(',').map(str::trim).filter(|id| !id.is_empty())
}

/// Content-IDs seen so far in one batch.
#[derive(Debug, Default)]
pub struct ContentIdRegistry {
    seen: HashSet<String>,
}

impl ContentIdRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if an id has been registered.
    pub fn contains(&self, id: &str) -> bool {
        self.seen.contains(id)
    }

    /// Number of registered ids.
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    /// Check if no id has been registered.
    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    /// Register an operation's Content-ID. Ids are unique per batch.
    pub fn register(&mut self, id: &str) -> Result<()> {
        if !self.seen.insert(id.to_string()) {
            return Err(BatchwireError::MalformedOperation(format!(
                "duplicate Content-ID '{}' in batch",
                id
            )));
        }
        Ok(())
    }

    /// Compute the dependency list of an operation.
    ///
    /// Explicit ids must all be known. URL segments are references when they
    /// name a known id; an unknown all-digit `$N` segment is an unresolved
    /// reference, other unknown `$name` segments (`$ref`, `$value`, ...) are
    /// path syntax.
    pub fn resolve(&self, explicit: Option<&str>, url: Option<&str>) -> Result<Vec<String>> {
        let mut ids: Vec<String> = Vec::new();
        let mut push = |id: &str| {
            if !ids.iter().any(|existing| existing == id) {
                ids.push(id.to_string());
            }
        };

        if let Some(value) = explicit {
            for id in parse_depends_on(value) {
                if !self.contains(id) {
                    return Err(unresolved(id));
                }
                push(id);
            }
        }

        if let Some(url) = url {
            for name in url_references(url) {
                if self.contains(name) {
                    push(name);
                } else if name.bytes().all(|b| b.is_ascii_digit()) {
                    return Err(unresolved(name));
                }
            }
        }

        Ok(ids)
    }
}

/// An operation together with its body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchOperation {
    /// Operation headers and cross-references.
    pub operation: Operation,
    /// Body bytes, exactly as they appeared in the part.
    pub body: Bytes,
}

/// Operations that succeed or fail together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Changeset {
    /// Boundary that delimited the change-set.
    pub boundary: String,
    /// Operations in order of appearance.
    pub operations: Vec<BatchOperation>,
}

/// Direct child of a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchItem {
    /// A standalone operation.
    Operation(BatchOperation),
    /// A change-set; change-sets never contain change-sets.
    Changeset(Changeset),
}

/// A fully read batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchPayload {
    /// Parts in order of appearance.
    pub items: Vec<BatchItem>,
}

impl BatchPayload {
    /// Every operation, flattening change-sets, in order of appearance.
    pub fn operations(&self) -> impl Iterator<Item = &BatchOperation> {
        self.items.iter().flat_map(|item| match item {
            BatchItem::Operation(operation) => std::slice::from_ref(operation).iter(),
            BatchItem::Changeset(changeset) => changeset.operations.iter(),
        })
    }

    /// Number of change-sets.
    pub fn changeset_count(&self) -> usize {
        self.items
            .iter()
            .filter(|item| matches!(item, BatchItem::Changeset(_)))
            .count()
    }
}

fn unresolved(id: &str) -> BatchwireError {
    BatchwireError::MalformedOperation(format!(
        "dependency on Content-ID '{}' which has not been seen in this batch",
        id
    ))
}
