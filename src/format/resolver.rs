//! Payload kind detection.
//!
//! Resolves the message's content type, asks every format registered for it
//! which kinds it sees, and merges the answers into one sorted, de-duplicated
//! candidate list. The body is rewound before each format runs and once more
//! at the end, so detection can be repeated or followed by real parsing.

use serde::{Deserialize, Serialize};

use super::kind::{normalize_candidates, PayloadKindCandidate};
use super::message::Message;
use super::registry::{FormatRegistry, APPLICATION_OCTET_STREAM};
use crate::error::{combine_release, Result};
use crate::protocol::{MediaType, CONTENT_LENGTH_HEADER, CONTENT_TYPE_HEADER};
use crate::stream::ReplayableByteBuffer;

/// Configuration for [`PayloadKindResolver`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionSettings {
    /// Media type assumed when a message declares neither a content type nor
    /// a body length.
    pub default_media_type: String,
}

impl Default for DetectionSettings {
    fn default() -> Self {
        Self {
            default_media_type: APPLICATION_OCTET_STREAM.to_string(),
        }
    }
}

/// Detects candidate payload kinds for incoming messages.
#[derive(Debug)]
pub struct PayloadKindResolver {
    registry: FormatRegistry,
    settings: DetectionSettings,
}

impl Default for PayloadKindResolver {
    fn default() -> Self {
        Self::new(FormatRegistry::with_defaults(), DetectionSettings::default())
    }
}

impl PayloadKindResolver {
    /// Create a resolver over a registry.
    pub fn new(registry: FormatRegistry, settings: DetectionSettings) -> Self {
        Self { registry, settings }
    }

    /// The format registry.
    pub fn registry(&self) -> &FormatRegistry {
        &self.registry
    }

    /// Detection settings.
    pub fn settings(&self) -> &DetectionSettings {
        &self.settings
    }

    /// Detect the candidate kinds of a message.
    ///
    /// Returns an empty list when no registered format recognizes the
    /// message. The body is left rewound.
    pub fn detect(&self, message: &mut dyn Message) -> Result<Vec<PayloadKindCandidate>> {
        let Some(media_type) = self.resolve_media_type(message) else {
            return Ok(Vec::new());
        };

        let outcome = self.sniff(message, &media_type);
        let rewound = message.open_body().map(ReplayableByteBuffer::reset_for_reading);
        let candidates = combine_release(outcome, rewound)?;

        tracing::debug!(
            media_type = %media_type.essence(),
            candidates = candidates.len(),
            "payload kinds detected"
        );
        Ok(candidates)
    }

    /// Suspending form of [`detect`](Self::detect).
    pub async fn detect_async(
        &self,
        message: &mut dyn Message,
    ) -> Result<Vec<PayloadKindCandidate>> {
        let Some(media_type) = self.resolve_media_type(message) else {
            return Ok(Vec::new());
        };

        let outcome = self.sniff_async(message, &media_type).await;
        let rewound = message
            .open_body_async()
            .await
            .map(ReplayableByteBuffer::reset_for_reading);
        let candidates = combine_release(outcome, rewound)?;

        tracing::debug!(
            media_type = %media_type.essence(),
            candidates = candidates.len(),
            "payload kinds detected"
        );
        Ok(candidates)
    }

    fn sniff(
        &self,
        message: &mut dyn Message,
        media_type: &MediaType,
    ) -> Result<Vec<PayloadKindCandidate>> {
        let mut candidates = Vec::new();
        for format in self.registry.formats_for(&media_type.to_string()) {
            message.open_body()?.reset_for_reading();
            let kinds = format.detect_kinds(message, media_type, &self.settings)?;
            tracing::trace!(format = format.name(), ?kinds, "format answered");
            candidates.extend(
                kinds
                    .into_iter()
                    .map(|kind| PayloadKindCandidate::new(kind, format.name())),
            );
        }
        Ok(normalize_candidates(candidates))
    }

    async fn sniff_async(
        &self,
        message: &mut dyn Message,
        media_type: &MediaType,
    ) -> Result<Vec<PayloadKindCandidate>> {
        let mut candidates = Vec::new();
        for format in self.registry.formats_for(&media_type.to_string()) {
            message.open_body_async().await?.reset_for_reading();
            let kinds = format
                .detect_kinds_async(message, media_type, &self.settings)
                .await?;
            tracing::trace!(format = format.name(), ?kinds, "format answered");
            candidates.extend(
                kinds
                    .into_iter()
                    .map(|kind| PayloadKindCandidate::new(kind, format.name())),
            );
        }
        Ok(normalize_candidates(candidates))
    }

    /// The declared content type, or the configured default when the message
    /// carries no content type and no non-zero `Content-Length`.
    fn resolve_media_type(&self, message: &dyn Message) -> Option<MediaType> {
        let declared = message
            .header(CONTENT_TYPE_HEADER)
            .map(str::trim)
            .filter(|value| !value.is_empty());

        let text = match declared {
            Some(value) => value,
            None => {
                let length = message
                    .header(CONTENT_LENGTH_HEADER)
                    .and_then(|value| value.trim().parse::<u64>().ok());
                if matches!(length, Some(n) if n > 0) {
                    tracing::debug!("message has a body but no content type");
                    return None;
                }
                self.settings.default_media_type.as_str()
            }
        };

        match MediaType::parse(text) {
            Ok(media_type) => Some(media_type),
            Err(e) => {
                tracing::debug!("content type not recognized: {}", e);
                None
            }
        }
    }
}
