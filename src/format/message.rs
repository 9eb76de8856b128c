//! Message abstraction consumed by detection and by the batch reader.

use std::io::Read;

use bytes::Bytes;
use tokio::io::AsyncRead;

use crate::error::Result;
use crate::protocol::Headers;
use crate::stream::{BoxFuture, ReplayableByteBuffer};

/// An incoming message: headers plus a buffered body.
pub trait Message: Send {
    /// Look up a header value (case-insensitive).
    fn header(&self, name: &str) -> Option<&str> {
        self.headers().get(name)
    }

    /// All headers in order.
    fn headers(&self) -> &Headers;

    /// The body buffer, at whatever position the last reader left it.
    fn open_body(&mut self) -> Result<&mut ReplayableByteBuffer>;

    /// Suspending form of [`open_body`](Self::open_body).
    fn open_body_async(&mut self) -> BoxFuture<'_, Result<&mut ReplayableByteBuffer>> {
        Box::pin(async move { self.open_body() })
    }
}

/// A message whose body has been materialized.
#[derive(Debug, Clone, Default)]
pub struct BufferedMessage {
    headers: Headers,
    body: ReplayableByteBuffer,
}

impl BufferedMessage {
    /// Create a message from headers and a buffer.
    pub fn new(headers: Headers, body: ReplayableByteBuffer) -> Self {
        Self { headers, body }
    }

    /// Create a message over in-memory bytes.
    pub fn from_bytes(headers: Headers, body: impl Into<Bytes>) -> Self {
        Self::new(headers, ReplayableByteBuffer::from_bytes(body))
    }

    /// Buffer a blocking source.
    pub fn from_reader<R: Read>(headers: Headers, source: R) -> Result<Self> {
        Ok(Self::new(headers, ReplayableByteBuffer::buffer_from_reader(source)?))
    }

    /// Buffer an asynchronous source.
    pub async fn from_source<R: AsyncRead + Unpin>(headers: Headers, source: R) -> Result<Self> {
        Ok(Self::new(headers, ReplayableByteBuffer::buffer_from(source).await?))
    }

    /// Message headers.
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Mutable message headers.
    pub fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    /// The body buffer.
    pub fn buffer(&self) -> &ReplayableByteBuffer {
        &self.body
    }

    /// Split into headers and body.
    pub fn into_parts(self) -> (Headers, ReplayableByteBuffer) {
        (self.headers, self.body)
    }
}

impl Message for BufferedMessage {
    fn headers(&self) -> &Headers {
        &self.headers
    }

    fn open_body(&mut self) -> Result<&mut ReplayableByteBuffer> {
        Ok(&mut self.body)
    }
}
