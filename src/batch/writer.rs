//! Multipart batch writer.
//!
//! Produces the format [`BatchReader`](super::BatchReader) consumes. Output is
//! accumulated in memory and handed over with [`BatchWriter::into_bytes`] or
//! copied to a sink with [`BatchWriter::write_to`] /
//! [`BatchWriter::write_to_async`].
//!
//! ```text
//! write_start_batch
//!   create_operation ─► body stream ─► release
//!   write_start_changeset
//!     create_operation ─► body stream ─► release
//!   write_end_changeset
//! write_end_batch
//! ```
//!
//! An operation's body stream borrows the writer, so nothing else can be
//! written until the stream is dropped.

use std::io::{self, Write};
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWrite;

use super::operation::{ContentIdRegistry, OperationLine};
use super::reader::MessageKind;
use crate::error::{BatchwireError, Result};
use crate::protocol::{
    Boundary, Headers, MediaType, RequestLine, StatusLine, APPLICATION_HTTP, BATCH_DEPTH,
    BINARY_TRANSFER_ENCODING, CHANGESET_DEPTH, CONTENT_ID_HEADER, CONTENT_TRANSFER_ENCODING_HEADER,
    CONTENT_TYPE_HEADER, DEPENDS_ON_HEADER,
};
use crate::stream::{ExecutionMode, StreamLifecycleController, StreamListener};

const CRLF: &[u8] = b"\r\n";

/// Configuration for [`BatchWriter`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchWriterSettings {
    /// Request or response batch.
    pub message_kind: MessageKind,
    /// Mode handed to body streams.
    pub mode: ExecutionMode,
}

impl Default for BatchWriterSettings {
    fn default() -> Self {
        Self {
            message_kind: MessageKind::Request,
            mode: ExecutionMode::Blocking,
        }
    }
}

impl BatchWriterSettings {
    /// Write a response batch.
    pub fn responses(mut self) -> Self {
        self.message_kind = MessageKind::Response;
        self
    }

    /// Set the mode of body streams.
    pub fn mode(mut self, mode: ExecutionMode) -> Self {
        self.mode = mode;
        self
    }
}

/// An operation to be written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingOperation {
    /// Request line or status line.
    pub line: OperationLine,
    /// Headers of the embedded message.
    pub headers: Headers,
    /// Content-ID, unique within the batch.
    pub content_id: Option<String>,
    /// Content-IDs written to the `Depends-On` header.
    pub depends_on: Vec<String>,
}

impl OutgoingOperation {
    /// Create a request operation.
    pub fn request(method: impl Into<String>, url: impl Into<String>) -> Self {
        Self::with_line(OperationLine::Request(RequestLine::new(method, url)))
    }

    /// Create a response operation.
    pub fn response(status_code: u16, reason: impl Into<String>) -> Self {
        Self::with_line(OperationLine::Response(StatusLine::new(status_code, reason)))
    }

    fn with_line(line: OperationLine) -> Self {
        Self {
            line,
            headers: Headers::new(),
            content_id: None,
            depends_on: Vec::new(),
        }
    }

    /// Add a header to the embedded message.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Set the Content-ID.
    pub fn content_id(mut self, id: impl Into<String>) -> Self {
        self.content_id = Some(id.into());
        self
    }

    /// Declare an explicit dependency.
    pub fn depends_on(mut self, id: impl Into<String>) -> Self {
        self.depends_on.push(id.into());
        self
    }
}

/// Sink for an operation body; appends straight to the batch output.
#[derive(Debug)]
pub struct BodySink<'a> {
    out: &'a mut BytesMut,
    written: usize,
}

impl BodySink<'_> {
    /// Bytes written so far.
    pub fn written(&self) -> usize {
        self.written
    }
}

impl Write for BodySink<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.out.extend_from_slice(buf);
        self.written += buf.len();
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl AsyncWrite for BodySink<'_> {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Poll::Ready(Write::write(self.get_mut(), buf))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

/// Scoped body stream of an outgoing operation.
pub type OperationBodyWriter<'a> = StreamLifecycleController<BodySink<'a>>;

struct BodyTrace {
    content_id: Option<String>,
}

impl StreamListener for BodyTrace {
    fn stream_requested(&mut self) -> Result<()> {
        tracing::trace!(content_id = ?self.content_id, "operation body opened");
        Ok(())
    }

    fn stream_released(&mut self) -> Result<()> {
        tracing::trace!(content_id = ?self.content_id, "operation body closed");
        Ok(())
    }
}

/// Writer for one multipart batch.
#[derive(Debug)]
pub struct BatchWriter {
    out: BytesMut,
    settings: BatchWriterSettings,
    batch_boundary: Boundary,
    changeset_boundary: Option<Boundary>,
    content_ids: ContentIdRegistry,
    started: bool,
    completed: bool,
    operations: usize,
}

impl BatchWriter {
    /// Create a writer for a batch delimited by `batch_boundary`.
    pub fn new(batch_boundary: &str, settings: BatchWriterSettings) -> Result<Self> {
        Ok(Self {
            out: BytesMut::new(),
            settings,
            batch_boundary: Boundary::new(batch_boundary, BATCH_DEPTH)?,
            changeset_boundary: None,
            content_ids: ContentIdRegistry::new(),
            started: false,
            completed: false,
            operations: 0,
        })
    }

    /// `Content-Type` value announcing this batch.
    pub fn content_type(&self) -> String {
        MediaType::new("multipart", "mixed")
            .with_parameter("boundary", self.batch_boundary.text())
            .to_string()
    }

    /// Number of operations written.
    pub fn operation_count(&self) -> usize {
        self.operations
    }

    /// Check if the batch terminator has been written.
    pub fn is_completed(&self) -> bool {
        self.completed
    }

    /// Begin the batch.
    pub fn write_start_batch(&mut self) -> Result<()> {
        if self.started {
            return Err(BatchwireError::InvalidState("batch already started".to_string()));
        }
        self.started = true;
        Ok(())
    }

    /// Open a change-set part.
    pub fn write_start_changeset(&mut self, boundary: &str) -> Result<()> {
        self.ensure_writable()?;
        if let Some(open) = &self.changeset_boundary {
            return Err(BatchwireError::InvalidState(format!(
                "change-set '{}' is still open",
                open.text()
            )));
        }
        let boundary = Boundary::new(boundary, CHANGESET_DEPTH)?;
        if boundary.text() == self.batch_boundary.text() {
            return Err(BatchwireError::MalformedBoundary(format!(
                "change-set boundary '{}' repeats the batch boundary",
                boundary.text()
            )));
        }

        let delimiter = self.batch_boundary.delimiter();
        self.write_boundary_line(&delimiter);
        let content_type = MediaType::new("multipart", "mixed")
            .with_parameter("boundary", boundary.text())
            .to_string();
        self.write_header(CONTENT_TYPE_HEADER, &content_type);
        self.out.put_slice(CRLF);

        self.changeset_boundary = Some(boundary);
        Ok(())
    }

    /// Close the open change-set.
    pub fn write_end_changeset(&mut self) -> Result<()> {
        self.ensure_writable()?;
        let boundary = self.changeset_boundary.take().ok_or_else(|| {
            BatchwireError::InvalidState("no change-set is open".to_string())
        })?;
        self.write_boundary_line(&boundary.terminator());
        Ok(())
    }

    /// Write the batch terminator.
    pub fn write_end_batch(&mut self) -> Result<()> {
        self.ensure_writable()?;
        if let Some(open) = &self.changeset_boundary {
            return Err(BatchwireError::InvalidState(format!(
                "change-set '{}' must be closed before the batch",
                open.text()
            )));
        }
        let terminator = self.batch_boundary.terminator();
        self.write_boundary_line(&terminator);
        self.completed = true;
        tracing::debug!(operations = self.operations, bytes = self.out.len(), "batch written");
        Ok(())
    }

    /// Write an operation's part and headers and return its body stream.
    ///
    /// Content-IDs must be unique and every dependency, explicit or through a
    /// `$N` URL segment, must name an operation written earlier.
    pub fn create_operation(
        &mut self,
        operation: OutgoingOperation,
    ) -> Result<OperationBodyWriter<'_>> {
        self.ensure_writable()?;

        match (&operation.line, self.settings.message_kind) {
            (OperationLine::Request(_), MessageKind::Request)
            | (OperationLine::Response(_), MessageKind::Response) => {}
            _ => {
                return Err(BatchwireError::MalformedOperation(format!(
                    "cannot write '{}' into a {:?} batch",
                    line_text(&operation.line),
                    self.settings.message_kind
                )))
            }
        }

        if let (Some(boundary), OperationLine::Request(request)) =
            (&self.changeset_boundary, &operation.line)
        {
            if !request.is_modifying() {
                return Err(BatchwireError::MalformedOperation(format!(
                    "{} request inside change-set '{}'",
                    request.method,
                    boundary.text()
                )));
            }
        }

        let explicit = (!operation.depends_on.is_empty()).then(|| operation.depends_on.join(", "));
        let url = match &operation.line {
            OperationLine::Request(request) => Some(request.url.as_str()),
            OperationLine::Response(_) => None,
        };
        self.content_ids.resolve(explicit.as_deref(), url)?;
        if let Some(id) = &operation.content_id {
            self.content_ids.register(id)?;
        }

        let delimiter = self
            .changeset_boundary
            .as_ref()
            .unwrap_or(&self.batch_boundary)
            .delimiter();
        self.write_boundary_line(&delimiter);
        self.write_header(CONTENT_TYPE_HEADER, APPLICATION_HTTP);
        self.write_header(CONTENT_TRANSFER_ENCODING_HEADER, BINARY_TRANSFER_ENCODING);
        if let Some(id) = &operation.content_id {
            self.write_header(CONTENT_ID_HEADER, id);
        }
        if let Some(value) = &explicit {
            self.write_header(DEPENDS_ON_HEADER, value);
        }
        self.out.put_slice(CRLF);

        self.out.put_slice(line_text(&operation.line).as_bytes());
        self.out.put_slice(CRLF);
        for (name, value) in &operation.headers {
            self.write_header(name, value);
        }
        self.out.put_slice(CRLF);

        self.operations += 1;
        let listener = BodyTrace {
            content_id: operation.content_id,
        };
        Ok(StreamLifecycleController::new(
            BodySink {
                out: &mut self.out,
                written: 0,
            },
            Box::new(listener),
            self.settings.mode,
        ))
    }

    /// Bytes written so far.
    pub fn as_bytes(&self) -> &[u8] {
        &self.out
    }

    /// Finish and take the output.
    pub fn into_bytes(self) -> Bytes {
        self.out.freeze()
    }

    /// Copy the output to a blocking sink.
    pub fn write_to<W: Write>(&self, mut sink: W) -> Result<()> {
        sink.write_all(&self.out)?;
        sink.flush()?;
        Ok(())
    }

    /// Copy the output to an asynchronous sink.
    pub async fn write_to_async<W: AsyncWrite + Unpin>(&self, mut sink: W) -> Result<()> {
        use tokio::io::AsyncWriteExt;

        sink.write_all(&self.out).await?;
        sink.flush().await?;
        Ok(())
    }

    fn ensure_writable(&self) -> Result<()> {
        if !self.started {
            return Err(BatchwireError::InvalidState("batch has not been started".to_string()));
        }
        if self.completed {
            return Err(BatchwireError::InvalidState("batch has already ended".to_string()));
        }
        Ok(())
    }

    /// Boundary lines own the line break in front of them.
    fn write_boundary_line(&mut self, line: &str) {
        if !self.out.is_empty() {
            self.out.put_slice(CRLF);
        }
        self.out.put_slice(line.as_bytes());
        self.out.put_slice(CRLF);
    }

    fn write_header(&mut self, name: &str, value: &str) {
        self.out.put_slice(name.as_bytes());
        self.out.put_slice(b": ");
        self.out.put_slice(value.as_bytes());
        self.out.put_slice(CRLF);
    }
}

fn line_text(line: &OperationLine) -> String {
    match line {
        OperationLine::Request(request) => request.to_string(),
        OperationLine::Response(status) => status.to_string(),
    }
}
