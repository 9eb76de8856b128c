//! Format module - payload kind detection.
//!
//! - [`PayloadKind`] - the shapes a message body can take
//! - [`Message`] - headers plus a replayable body
//! - [`Format`] / [`FormatRegistry`] - pluggable detectors keyed by media type
//! - [`PayloadKindResolver`] - runs the detectors and merges their answers
//!
//! # Example
//!
//! ```
//! use batchwire::format::{BufferedMessage, PayloadKind, PayloadKindResolver};
//! use batchwire::protocol::Headers;
//!
//! let resolver = PayloadKindResolver::default();
//! let mut message = BufferedMessage::from_bytes(
//!     Headers::new().with("Content-Type", "multipart/mixed; boundary=b"),
//!     "--b--\r\n",
//! );
//!
//! let candidates = resolver.detect(&mut message).unwrap();
//! assert_eq!(candidates[0].kind, PayloadKind::Batch);
//! ```

mod batch;
mod kind;
mod message;
mod raw_value;
mod registry;
mod resolver;

pub use batch::BatchFormat;
pub use kind::{normalize_candidates, PayloadKind, PayloadKindCandidate};
pub use message::{BufferedMessage, Message};
pub use raw_value::RawValueFormat;
pub use registry::{Format, FormatRegistry, APPLICATION_OCTET_STREAM, TEXT_PLAIN};
pub use resolver::{DetectionSettings, PayloadKindResolver};
