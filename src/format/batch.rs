//! Detector for multipart batch bodies.

use std::io::{BufRead, Read};

use super::kind::PayloadKind;
use super::message::Message;
use super::registry::Format;
use super::resolver::DetectionSettings;
use crate::error::Result;
use crate::protocol::{Boundary, MediaType, BATCH_DEPTH};

/// Bytes examined while looking for the first boundary, preamble included.
const SNIFF_LIMIT: u64 = 4 * 1024;

/// Recognizes `multipart/mixed` batch bodies.
///
/// Reports [`PayloadKind::Batch`] when the content type carries a valid
/// `boundary` parameter and a delimiter or terminator of that boundary
/// appears within the first [`SNIFF_LIMIT`] bytes of the body. Lines before
/// it are preamble, which readers skip.
#[derive(Debug, Clone, Copy, Default)]
pub struct BatchFormat;

impl Format for BatchFormat {
    fn name(&self) -> &str {
        "batch"
    }

    fn detect_kinds(
        &self,
        message: &mut dyn Message,
        media_type: &MediaType,
        _settings: &DetectionSettings,
    ) -> Result<Vec<PayloadKind>> {
        if !media_type.is("multipart", "mixed") {
            return Ok(Vec::new());
        }
        let Some(boundary) = media_type
            .boundary()
            .and_then(|text| Boundary::new(text, BATCH_DEPTH).ok())
        else {
            return Ok(Vec::new());
        };

        let mut window = message.open_body()?.take(SNIFF_LIMIT);
        let mut line = Vec::new();
        loop {
            line.clear();
            if window.read_until(b'\n', &mut line)? == 0 {
                return Ok(Vec::new());
            }
            if boundary.classify(&line).is_some() {
                return Ok(vec![PayloadKind::Batch]);
            }
        }
    }
}
