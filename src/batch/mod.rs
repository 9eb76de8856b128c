//! Batch module - reading and writing multipart batches.
//!
//! A batch is a `multipart/mixed` body whose parts are either single embedded
//! HTTP messages (`application/http`) or change-sets, a second
//! `multipart/mixed` level grouping modifying requests.
//!
//! ```text
//! --batch_1
//! Content-Type: multipart/mixed; boundary=changeset_1
//!
//! --changeset_1
//! Content-Type: application/http
//! Content-ID: 1
//!
//! POST http://tempuri.org/Customers HTTP/1.1
//! ...
//! --changeset_1--
//! --batch_1--
//! ```

mod operation;
mod reader;
mod writer;

pub use operation::{
    parse_depends_on, url_references, BatchItem, BatchOperation, BatchPayload, Changeset,
    ContentIdRegistry, Operation, OperationLine,
};
pub use reader::{
    boundary_from_content_type, BatchReader, BatchReaderSettings, BatchReaderState, MessageKind,
    OperationBody, DEFAULT_MAX_HEADER_LINE_LENGTH, DEFAULT_MAX_OPERATIONS_PER_CHANGESET,
    DEFAULT_MAX_PARTS_PER_BATCH,
};
pub use writer::{
    BatchWriter, BatchWriterSettings, BodySink, OperationBodyWriter, OutgoingOperation,
};
