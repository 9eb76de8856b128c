//! Protocol module - the textual building blocks of a batch payload.
//!
//! This module implements:
//! - Ordered, case-insensitive header collections
//! - `Content-Type` media type parsing
//! - Request and status lines of embedded messages
//! - Multipart boundaries and boundary-line classification

mod boundary;
mod headers;
mod http_line;
mod media_type;

pub use boundary::{
    trim_line_end, Boundary, BoundaryLine, BATCH_DEPTH, CHANGESET_DEPTH, MAX_BOUNDARY_LENGTH,
};
pub use headers::Headers;
pub use http_line::{RequestLine, StatusLine, HTTP_VERSION};
pub use media_type::MediaType;

/// `Content-Type` header name.
pub const CONTENT_TYPE_HEADER: &str = "Content-Type";

/// `Content-Transfer-Encoding` header name.
pub const CONTENT_TRANSFER_ENCODING_HEADER: &str = "Content-Transfer-Encoding";

/// `Content-ID` header name.
pub const CONTENT_ID_HEADER: &str = "Content-ID";

/// `Content-Length` header name.
pub const CONTENT_LENGTH_HEADER: &str = "Content-Length";

/// Header carrying a comma-separated list of Content-IDs an operation depends on.
pub const DEPENDS_ON_HEADER: &str = "Depends-On";

/// Media type of a part that embeds one HTTP message.
pub const APPLICATION_HTTP: &str = "application/http";

/// Media type of a batch or change-set.
pub const MULTIPART_MIXED: &str = "multipart/mixed";

/// The only transfer encoding allowed for embedded messages.
pub const BINARY_TRANSFER_ENCODING: &str = "binary";
