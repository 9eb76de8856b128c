//! Format registry for looking up detectors by media type.
//!
//! Formats are keyed by media type essence (`type/subtype`, parameters
//! ignored). One format may serve several media types, and several formats
//! may share one; lookups return them in registration order.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use batchwire::format::{FormatRegistry, RawValueFormat};
//!
//! let mut registry = FormatRegistry::new();
//! registry.register("text/plain", Arc::new(RawValueFormat)).unwrap();
//!
//! assert_eq!(registry.formats_for("TEXT/PLAIN; charset=utf-8").count(), 1);
//! assert_eq!(registry.formats_for("application/json").count(), 0);
//! ```

use std::sync::Arc;

use super::kind::PayloadKind;
use super::message::Message;
use super::resolver::DetectionSettings;
use super::{BatchFormat, RawValueFormat};
use crate::error::Result;
use crate::protocol::MediaType;
use crate::stream::BoxFuture;

/// Media type of raw text values.
pub const TEXT_PLAIN: &str = "text/plain";

/// Media type of raw binary values.
pub const APPLICATION_OCTET_STREAM: &str = "application/octet-stream";

/// A payload format able to recognize the kinds it can read.
pub trait Format: Send + Sync {
    /// Name reported in detection candidates.
    fn name(&self) -> &str;

    /// Kinds this format believes the message holds.
    ///
    /// An empty result means "no opinion". The message body may be read
    /// freely; the caller rewinds it afterwards.
    fn detect_kinds(
        &self,
        message: &mut dyn Message,
        media_type: &MediaType,
        settings: &DetectionSettings,
    ) -> Result<Vec<PayloadKind>>;

    /// Suspending form of [`detect_kinds`](Self::detect_kinds).
    fn detect_kinds_async<'a>(
        &'a self,
        message: &'a mut dyn Message,
        media_type: &'a MediaType,
        settings: &'a DetectionSettings,
    ) -> BoxFuture<'a, Result<Vec<PayloadKind>>> {
        Box::pin(async move { self.detect_kinds(message, media_type, settings) })
    }
}

/// Entry for a registered format.
struct FormatEntry {
    /// Lowercased `type/subtype`.
    essence: String,
    /// The format.
    format: Arc<dyn Format>,
}

/// Registry mapping media types to formats.
#[derive(Default)]
pub struct FormatRegistry {
    /// Entries in registration order.
    entries: Vec<FormatEntry>,
}

impl FormatRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry with the built-in formats.
    pub fn with_defaults() -> Self {
        let raw: Arc<dyn Format> = Arc::new(RawValueFormat);
        let mut registry = Self::new();
        registry.push(MediaType::new("multipart", "mixed"), Arc::new(BatchFormat));
        registry.push(MediaType::new("text", "plain"), raw.clone());
        registry.push(MediaType::new("application", "octet-stream"), raw);
        registry
    }

    /// Register a format for a media type.
    pub fn register(&mut self, media_type: &str, format: Arc<dyn Format>) -> Result<()> {
        let media_type = MediaType::parse(media_type)?;
        self.push(media_type, format);
        Ok(())
    }

    fn push(&mut self, media_type: MediaType, format: Arc<dyn Format>) {
        let essence = media_type.essence();
        tracing::trace!(media_type = %essence, format = format.name(), "format registered");
        self.entries.push(FormatEntry { essence, format });
    }

    /// Formats registered for a media type, in registration order.
    ///
    /// Unparsable media types match nothing.
    pub fn formats_for(&self, media_type: &str) -> impl Iterator<Item = &Arc<dyn Format>> {
        let essence = MediaType::parse(media_type).ok().map(|m| m.essence());
        self.entries
            .iter()
            .filter(move |entry| essence.as_deref() == Some(entry.essence.as_str()))
            .map(|entry| &entry.format)
    }

    /// Registered media types, in registration order, without repeats.
    pub fn media_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = Vec::new();
        for entry in &self.entries {
            if !types.contains(&entry.essence.as_str()) {
                types.push(&entry.essence);
            }
        }
        types
    }

    /// Number of registrations.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl std::fmt::Debug for FormatRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(
                self.entries
                    .iter()
                    .map(|entry| (entry.essence.as_str(), entry.format.name())),
            )
            .finish()
    }
}
