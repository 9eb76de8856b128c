//! Raw value format.

use super::kind::PayloadKind;
use super::message::Message;
use super::registry::Format;
use super::resolver::DetectionSettings;
use crate::error::Result;
use crate::protocol::MediaType;

/// Raw `text/plain` and `application/octet-stream` values.
///
/// Decides on the media type alone; the body is never read.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawValueFormat;

impl Format for RawValueFormat {
    fn name(&self) -> &str {
        "raw_value"
    }

    fn detect_kinds(
        &self,
        _message: &mut dyn Message,
        media_type: &MediaType,
        _settings: &DetectionSettings,
    ) -> Result<Vec<PayloadKind>> {
        let kinds = if media_type.is("text", "plain") {
            vec![PayloadKind::Value]
        } else if media_type.is("application", "octet-stream") {
            vec![PayloadKind::BinaryValue]
        } else {
            Vec::new()
        };
        Ok(kinds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::BufferedMessage;
    use crate::protocol::Headers;

    #[test]
    fn test_kinds_by_media_type() {
        let mut message = BufferedMessage::from_bytes(Headers::new(), "42");
        let settings = DetectionSettings::default();
        let mut kinds = |media_type: &str| {
            RawValueFormat
                .detect_kinds(&mut message, &MediaType::parse(media_type).unwrap(), &settings)
                .unwrap()
        };

        assert_eq!(kinds("text/plain; charset=utf-8"), vec![PayloadKind::Value]);
        assert_eq!(kinds("application/octet-stream"), vec![PayloadKind::BinaryValue]);
        assert!(kinds("application/json").is_empty());
    }
}
