//! # batchwire
//!
//! Streaming substrate for multipart batch payloads of a data-access
//! protocol carried over HTTP-like transports.
//!
//! ## Architecture
//!
//! - **Buffering** ([`stream::ReplayableByteBuffer`]): a single-pass source is
//!   materialized once and replayed as often as needed
//! - **Scoped streams** ([`stream::StreamLifecycleController`]): sub-streams
//!   handed to callers with exactly-once requested/released notifications
//! - **Batches** ([`batch::BatchReader`], [`batch::BatchWriter`]): the
//!   boundary-scanning state machine and its writing counterpart
//! - **Detection** ([`format::PayloadKindResolver`]): sniffs a buffered body
//!   before a parser is chosen
//!
//! ## Example
//!
//! ```
//! use batchwire::batch::{BatchReader, BatchReaderSettings, BatchWriter, BatchWriterSettings,
//!     OutgoingOperation};
//!
//! let mut writer = BatchWriter::new("batch_1", BatchWriterSettings::default()).unwrap();
//! writer.write_start_batch().unwrap();
//! writer.write_start_changeset("changeset_1").unwrap();
//! writer
//!     .create_operation(
//!         OutgoingOperation::request("POST", "http://tempuri.org/Customers").content_id("1"),
//!     )
//!     .unwrap()
//!     .release()
//!     .unwrap();
//! writer
//!     .create_operation(OutgoingOperation::request("POST", "$1/Orders"))
//!     .unwrap()
//!     .release()
//!     .unwrap();
//! writer.write_end_changeset().unwrap();
//! writer.write_end_batch().unwrap();
//!
//! let content_type = writer.content_type();
//! let payload = writer.into_bytes();
//!
//! let mut reader =
//!     BatchReader::from_reader(&payload[..], &content_type, BatchReaderSettings::default())
//!         .unwrap();
//! let batch = reader.read_all().unwrap();
//! let deps: Vec<_> = batch
//!     .operations()
//!     .map(|op| op.operation.depends_on_ids.clone())
//!     .collect();
//! assert_eq!(deps, vec![vec![], vec!["1".to_string()]]);
//! ```

pub mod batch;
pub mod error;
pub mod format;
pub mod protocol;
pub mod stream;

pub use error::{BatchwireError, Result};
