//! Payload kinds.

use std::fmt;

use serde::{Deserialize, Serialize};

/// High-level shape of a message body.
///
/// The declaration order is the detection sort order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadKind {
    Resource,
    ResourceSet,
    Property,
    EntityReferenceLink,
    EntityReferenceLinks,
    Value,
    BinaryValue,
    Collection,
    ServiceDocument,
    MetadataDocument,
    Error,
    Batch,
    Parameter,
    IndividualProperty,
    Delta,
    Asynchronous,
    Unsupported,
}

impl PayloadKind {
    /// Stable lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Resource => "resource",
            Self::ResourceSet => "resource_set",
            Self::Property => "property",
            Self::EntityReferenceLink => "entity_reference_link",
            Self::EntityReferenceLinks => "entity_reference_links",
            Self::Value => "value",
            Self::BinaryValue => "binary_value",
            Self::Collection => "collection",
            Self::ServiceDocument => "service_document",
            Self::MetadataDocument => "metadata_document",
            Self::Error => "error",
            Self::Batch => "batch",
            Self::Parameter => "parameter",
            Self::IndividualProperty => "individual_property",
            Self::Delta => "delta",
            Self::Asynchronous => "asynchronous",
            Self::Unsupported => "unsupported",
        }
    }
}

impl fmt::Display for PayloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A kind together with the format that proposed it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PayloadKindCandidate {
    /// Proposed kind.
    pub kind: PayloadKind,
    /// Name of the originating format.
    pub format: String,
}

impl PayloadKindCandidate {
    /// Create a candidate.
    pub fn new(kind: PayloadKind, format: impl Into<String>) -> Self {
        Self {
            kind,
            format: format.into(),
        }
    }
}

/// Remove duplicate (kind, format) pairs, keeping the first, then sort
/// ascending by kind. The sort is stable, so formats keep registration order
/// within a kind.
pub fn normalize_candidates(candidates: Vec<PayloadKindCandidate>) -> Vec<PayloadKindCandidate> {
    let mut unique: Vec<PayloadKindCandidate> = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        if !unique.contains(&candidate) {
            unique.push(candidate);
        }
    }
    unique.sort_by_key(|candidate| candidate.kind);
    unique
}
