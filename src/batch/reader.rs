//! Multipart batch reader.
//!
//! A boundary-scanning state machine over a fully buffered batch body.
//! Every call to [`BatchReader::read`] performs exactly one transition:
//!
//! ```text
//! Initial ─┬─► Operation ─────────────────────────────┬─► Completed
//!          └─► ChangesetStart ─► Operation* ─► ChangesetEnd ┘
//!
//! any state ── malformed input ──► Exception (terminal)
//! ```
//!
//! While the reader sits on an operation, its headers are available through
//! [`BatchReader::operation`] and its body can be opened once as a scoped
//! stream. The body must be released (or dropped) before the reader moves on;
//! bodies that are never opened are skipped.
//!
//! # Example
//!
//! ```
//! use batchwire::batch::{BatchReader, BatchReaderSettings, BatchReaderState};
//!
//! let payload = "--b\r\n\
//! Content-Type: application/http\r\n\
//! Content-Transfer-Encoding: binary\r\n\
//! \r\n\
//! GET http://tempuri.org/Customers HTTP/1.1\r\n\
//! \r\n\
//! \r\n\
//! --b--\r\n";
//!
//! let mut reader = BatchReader::from_reader(
//!     payload.as_bytes(),
//!     "multipart/mixed; boundary=b",
//!     BatchReaderSettings::default(),
//! )
//! .unwrap();
//!
//! assert!(reader.read().unwrap());
//! assert_eq!(reader.state(), BatchReaderState::Operation);
//! assert_eq!(reader.operation().unwrap().url(), Some("http://tempuri.org/Customers"));
//! assert!(!reader.read().unwrap());
//! assert_eq!(reader.state(), BatchReaderState::Completed);
//! ```

use std::io::{BufRead, Cursor, Read};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncRead;

use super::operation::{
    BatchItem, BatchOperation, BatchPayload, Changeset, ContentIdRegistry, Operation, OperationLine,
};
use crate::error::{BatchwireError, Result};
use crate::format::BufferedMessage;
use crate::protocol::{
    trim_line_end, Boundary, BoundaryLine, Headers, MediaType, RequestLine, StatusLine,
    BATCH_DEPTH, BINARY_TRANSFER_ENCODING, CHANGESET_DEPTH, CONTENT_ID_HEADER,
    CONTENT_TRANSFER_ENCODING_HEADER, CONTENT_TYPE_HEADER, DEPENDS_ON_HEADER,
};
use crate::stream::{ExecutionMode, ReplayableByteBuffer, StreamLifecycleController, StreamListener};

/// Default maximum number of top-level parts per batch.
pub const DEFAULT_MAX_PARTS_PER_BATCH: usize = 100;

/// Default maximum number of operations per change-set.
pub const DEFAULT_MAX_OPERATIONS_PER_CHANGESET: usize = 1000;

/// Default maximum length of a single header line.
pub const DEFAULT_MAX_HEADER_LINE_LENGTH: usize = 8 * 1024;

/// Scoped body of the current operation.
pub type OperationBody = StreamLifecycleController<Cursor<Bytes>>;

/// Whether embedded messages are requests or responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    /// Parts start with a request line.
    #[default]
    Request,
    /// Parts start with a status line.
    Response,
}

/// Configuration for [`BatchReader`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchReaderSettings {
    /// Request or response batch.
    pub message_kind: MessageKind,
    /// Maximum top-level parts (operations and change-sets).
    pub max_parts_per_batch: usize,
    /// Maximum operations inside one change-set.
    pub max_operations_per_changeset: usize,
    /// Maximum length of one header line, terminator excluded.
    pub max_header_line_length: usize,
}

impl Default for BatchReaderSettings {
    fn default() -> Self {
        Self {
            message_kind: MessageKind::Request,
            max_parts_per_batch: DEFAULT_MAX_PARTS_PER_BATCH,
            max_operations_per_changeset: DEFAULT_MAX_OPERATIONS_PER_CHANGESET,
            max_header_line_length: DEFAULT_MAX_HEADER_LINE_LENGTH,
        }
    }
}

impl BatchReaderSettings {
    /// Read a response batch.
    pub fn responses(mut self) -> Self {
        self.message_kind = MessageKind::Response;
        self
    }

    /// Set the maximum number of top-level parts.
    pub fn max_parts_per_batch(mut self, limit: usize) -> Self {
        self.max_parts_per_batch = limit;
        self
    }

    /// Set the maximum number of operations per change-set.
    pub fn max_operations_per_changeset(mut self, limit: usize) -> Self {
        self.max_operations_per_changeset = limit;
        self
    }

    /// Set the maximum header line length.
    pub fn max_header_line_length(mut self, limit: usize) -> Self {
        self.max_header_line_length = limit;
        self
    }
}

/// Position of the reader after its last transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchReaderState {
    /// Nothing read yet.
    Initial,
    /// Positioned on an operation; headers parsed, body not yet consumed.
    Operation,
    /// A change-set part was opened.
    ChangesetStart,
    /// The current change-set was closed.
    ChangesetEnd,
    /// The batch terminator was read.
    Completed,
    /// Malformed input was found; the reader cannot be used any more.
    Exception,
}

/// Tracks the body stream handed out for the current operation.
#[derive(Debug, Default)]
struct BodyLease {
    requested: AtomicBool,
    released: AtomicBool,
}

struct BodyListener {
    lease: Arc<BodyLease>,
}

impl StreamListener for BodyListener {
    fn stream_requested(&mut self) -> Result<()> {
        self.lease.requested.store(true, Ordering::Release);
        Ok(())
    }

    fn stream_released(&mut self) -> Result<()> {
        self.lease.released.store(true, Ordering::Release);
        Ok(())
    }
}

/// Reader for one multipart batch payload.
///
/// Serves one caller from start to finish; it is not meant to be driven
/// concurrently.
pub struct BatchReader {
    /// The whole batch body.
    buffer: ReplayableByteBuffer,
    /// Reader configuration.
    settings: BatchReaderSettings,
    /// Mode handed to body streams.
    mode: ExecutionMode,
    /// Current state.
    state: BatchReaderState,
    /// Outer boundary.
    batch_boundary: Boundary,
    /// Boundary of the open change-set, if any.
    changeset_boundary: Option<Boundary>,
    /// Boundary line already consumed while reading a body.
    pending_line: Option<BoundaryLine>,
    /// Content-IDs seen in this batch.
    content_ids: ContentIdRegistry,
    /// Operation the reader is positioned on.
    operation: Option<Operation>,
    /// Lease of the body handed out for the current operation.
    body_lease: Option<Arc<BodyLease>>,
    /// Top-level parts read so far.
    parts_in_batch: usize,
    /// Operations read in the open change-set.
    operations_in_changeset: usize,
    /// Scratch line buffer.
    line: Vec<u8>,
}

impl BatchReader {
    /// Create a reader over an already buffered body.
    pub fn new(
        buffer: ReplayableByteBuffer,
        batch_boundary: &str,
        settings: BatchReaderSettings,
        mode: ExecutionMode,
    ) -> Result<Self> {
        let batch_boundary = Boundary::new(batch_boundary, BATCH_DEPTH)?;
        Ok(Self {
            buffer,
            settings,
            mode,
            state: BatchReaderState::Initial,
            batch_boundary,
            changeset_boundary: None,
            pending_line: None,
            content_ids: ContentIdRegistry::new(),
            operation: None,
            body_lease: None,
            parts_in_batch: 0,
            operations_in_changeset: 0,
            line: Vec::new(),
        })
    }

    /// Buffer a blocking source and create a reader for it.
    pub fn from_reader<R: Read>(
        source: R,
        content_type: &str,
        settings: BatchReaderSettings,
    ) -> Result<Self> {
        let boundary = boundary_from_content_type(content_type)?;
        let buffer = ReplayableByteBuffer::buffer_from_reader(source)?;
        Self::new(buffer, &boundary, settings, ExecutionMode::Blocking)
    }

    /// Buffer an asynchronous source and create a reader for it.
    pub async fn from_source<R: AsyncRead + Unpin>(
        source: R,
        content_type: &str,
        settings: BatchReaderSettings,
    ) -> Result<Self> {
        let boundary = boundary_from_content_type(content_type)?;
        let buffer = ReplayableByteBuffer::buffer_from(source).await?;
        Self::new(buffer, &boundary, settings, ExecutionMode::Suspending)
    }

    /// Create a reader over a message whose body is already buffered.
    ///
    /// The message's buffer is shared, not copied, and read from the start.
    pub fn from_message(
        message: &mut BufferedMessage,
        settings: BatchReaderSettings,
        mode: ExecutionMode,
    ) -> Result<Self> {
        let content_type = message.headers().get(CONTENT_TYPE_HEADER).ok_or_else(|| {
            BatchwireError::MalformedBoundary("batch message has no Content-Type".to_string())
        })?;
        let boundary = boundary_from_content_type(content_type)?;
        let mut buffer = message.buffer().clone();
        buffer.reset_for_reading();
        Self::new(buffer, &boundary, settings, mode)
    }

    /// Current state.
    #[inline]
    pub fn state(&self) -> BatchReaderState {
        self.state
    }

    /// Execution mode of the body streams.
    #[inline]
    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    /// Reader configuration.
    #[inline]
    pub fn settings(&self) -> &BatchReaderSettings {
        &self.settings
    }

    /// The batch boundary.
    pub fn batch_boundary(&self) -> &str {
        self.batch_boundary.text()
    }

    /// Boundary of the open change-set.
    pub fn changeset_boundary(&self) -> Option<&str> {
        self.changeset_boundary.as_ref().map(Boundary::text)
    }

    /// Operation the reader is positioned on.
    pub fn operation(&self) -> Option<&Operation> {
        self.operation.as_ref()
    }

    /// Advance by one transition.
    ///
    /// Returns `false` once the batch is completed.
    pub fn read(&mut self) -> Result<bool> {
        self.advance()
    }

    /// Suspending form of [`read`](Self::read).
    ///
    /// The body is already in memory, so this never waits on I/O.
    pub async fn read_async(&mut self) -> Result<bool> {
        self.advance()
    }

    /// Open the body of the current operation as a scoped stream.
    ///
    /// Only valid in [`BatchReaderState::Operation`] and only once per
    /// operation. The returned stream holds exactly the bytes between the
    /// operation's blank line and the next boundary.
    pub fn open_body(&mut self) -> Result<OperationBody> {
        self.create_body()
    }

    /// Suspending form of [`open_body`](Self::open_body).
    pub async fn open_body_async(&mut self) -> Result<OperationBody> {
        self.create_body()
    }

    /// Read the whole body of the current operation and release it.
    pub fn read_body(&mut self) -> Result<Bytes> {
        let mut body = self.open_body()?;
        let content = body.stream().map(|cursor| cursor.get_ref().clone());
        body.release_with(content)
    }

    /// Suspending form of [`read_body`](Self::read_body).
    pub async fn read_body_async(&mut self) -> Result<Bytes> {
        let mut body = self.open_body_async().await?;
        let content = body.stream_async().await.map(|cursor| cursor.get_ref().clone());
        body.release_with_async(content).await
    }

    /// Drain the reader into a [`BatchPayload`], reading every body.
    pub fn read_all(&mut self) -> Result<BatchPayload> {
        let mut payload = BatchPayload::default();
        let mut changeset: Option<Changeset> = None;

        while self.read()? {
            match self.state {
                BatchReaderState::ChangesetStart => {
                    changeset = Some(Changeset {
                        boundary: self.changeset_boundary().unwrap_or_default().to_string(),
                        operations: Vec::new(),
                    });
                }
                BatchReaderState::Operation => {
                    let operation = self.current_operation()?;
                    let body = self.read_body()?;
                    let item = BatchOperation { operation, body };
                    match changeset.as_mut() {
                        Some(open) => open.operations.push(item),
                        None => payload.items.push(BatchItem::Operation(item)),
                    }
                }
                BatchReaderState::ChangesetEnd => {
                    if let Some(closed) = changeset.take() {
                        payload.items.push(BatchItem::Changeset(closed));
                    }
                }
                _ => {}
            }
        }

        Ok(payload)
    }

    /// Suspending form of [`read_all`](Self::read_all).
    pub async fn read_all_async(&mut self) -> Result<BatchPayload> {
        let mut payload = BatchPayload::default();
        let mut changeset: Option<Changeset> = None;

        while self.read_async().await? {
            match self.state {
                BatchReaderState::ChangesetStart => {
                    changeset = Some(Changeset {
                        boundary: self.changeset_boundary().unwrap_or_default().to_string(),
                        operations: Vec::new(),
                    });
                }
                BatchReaderState::Operation => {
                    let operation = self.current_operation()?;
                    let body = self.read_body_async().await?;
                    let item = BatchOperation { operation, body };
                    match changeset.as_mut() {
                        Some(open) => open.operations.push(item),
                        None => payload.items.push(BatchItem::Operation(item)),
                    }
                }
                BatchReaderState::ChangesetEnd => {
                    if let Some(closed) = changeset.take() {
                        payload.items.push(BatchItem::Changeset(closed));
                    }
                }
                _ => {}
            }
        }

        Ok(payload)
    }

    fn current_operation(&self) -> Result<Operation> {
        self.operation.clone().ok_or_else(|| {
            BatchwireError::InvalidState("reader is not positioned on an operation".to_string())
        })
    }

    // ------------------------------------------------------------------
    // Transitions
    // ------------------------------------------------------------------

    fn advance(&mut self) -> Result<bool> {
        match self.state {
            BatchReaderState::Completed => {
                return Err(BatchwireError::InvalidState(
                    "batch reader has already completed".to_string(),
                ))
            }
            BatchReaderState::Exception => {
                return Err(BatchwireError::InvalidState(
                    "batch reader failed earlier and cannot be used".to_string(),
                ))
            }
            _ => {}
        }

        if let Some(lease) = &self.body_lease {
            if !lease.released.load(Ordering::Acquire) {
                return Err(BatchwireError::InvalidState(
                    "operation body must be released before reading further".to_string(),
                ));
            }
        }

        let from = self.state;
        match self.transition() {
            Ok(to) => {
                tracing::trace!(
                    ?from,
                    ?to,
                    position = self.buffer.position(),
                    "batch reader transition"
                );
                self.state = to;
                Ok(to != BatchReaderState::Completed)
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    fn fail(&mut self, err: BatchwireError) -> BatchwireError {
        tracing::debug!(position = self.buffer.position(), "batch reader failed: {}", err);
        self.state = BatchReaderState::Exception;
        self.operation = None;
        err
    }

    fn transition(&mut self) -> Result<BatchReaderState> {
        match self.state {
            BatchReaderState::Initial => {
                let line = self.scan_to_boundary(None)?;
                self.after_batch_boundary(line)
            }
            BatchReaderState::Operation => {
                self.operation = None;
                self.body_lease = None;
                let line = match self.pending_line.take() {
                    Some(line) => line,
                    None => self.scan_to_boundary(None)?,
                };
                if self.changeset_boundary.is_some() {
                    self.after_changeset_boundary(line)
                } else {
                    self.after_batch_boundary(line)
                }
            }
            BatchReaderState::ChangesetStart => {
                let line = self.scan_to_boundary(None)?;
                self.after_changeset_boundary(line)
            }
            BatchReaderState::ChangesetEnd => {
                self.changeset_boundary = None;
                let line = self.scan_to_boundary(None)?;
                self.after_batch_boundary(line)
            }
            BatchReaderState::Completed | BatchReaderState::Exception => Err(
                BatchwireError::InvalidState("no transition from a terminal state".to_string()),
            ),
        }
    }

    fn after_batch_boundary(&mut self, line: BoundaryLine) -> Result<BatchReaderState> {
        match line {
            BoundaryLine::Terminator => Ok(BatchReaderState::Completed),
            BoundaryLine::Delimiter => {
                self.parts_in_batch += 1;
                if self.parts_in_batch > self.settings.max_parts_per_batch {
                    return Err(BatchwireError::QuotaExceeded(format!(
                        "batch has more than {} parts",
                        self.settings.max_parts_per_batch
                    )));
                }
                self.read_batch_part()
            }
        }
    }

    fn after_changeset_boundary(&mut self, line: BoundaryLine) -> Result<BatchReaderState> {
        match line {
            BoundaryLine::Terminator => Ok(BatchReaderState::ChangesetEnd),
            BoundaryLine::Delimiter => {
                self.operations_in_changeset += 1;
                if self.operations_in_changeset > self.settings.max_operations_per_changeset {
                    return Err(BatchwireError::QuotaExceeded(format!(
                        "change-set has more than {} operations",
                        self.settings.max_operations_per_changeset
                    )));
                }
                let part_headers = self.read_header_block()?;
                let media_type = part_media_type(&part_headers)?;
                if media_type.is("multipart", "mixed") {
                    let text = media_type.boundary().unwrap_or_default();
                    // Depth 2 is always rejected.
                    Boundary::new(text, CHANGESET_DEPTH + 1)?;
                }
                self.read_operation(part_headers, media_type)
            }
        }
    }

    /// Part directly inside the batch: an operation or a change-set.
    fn read_batch_part(&mut self) -> Result<BatchReaderState> {
        let part_headers = self.read_header_block()?;
        let media_type = part_media_type(&part_headers)?;

        if !media_type.is("multipart", "mixed") {
            return self.read_operation(part_headers, media_type);
        }

        let text = media_type.boundary().ok_or_else(|| {
            BatchwireError::MalformedBoundary(
                "change-set part has no boundary parameter".to_string(),
            )
        })?;
        let boundary = Boundary::new(text, CHANGESET_DEPTH)?;
        if boundary.text() == self.batch_boundary.text() {
            return Err(BatchwireError::MalformedBoundary(format!(
                "change-set boundary '{}' repeats the batch boundary",
                text
            )));
        }

        self.changeset_boundary = Some(boundary);
        self.operations_in_changeset = 0;
        Ok(BatchReaderState::ChangesetStart)
    }

    /// `application/http` part: first line, headers, then the body stays
    /// unread until opened or skipped.
    fn read_operation(
        &mut self,
        part_headers: Headers,
        media_type: MediaType,
    ) -> Result<BatchReaderState> {
        if !media_type.is("application", "http") {
            return Err(BatchwireError::MalformedOperation(format!(
                "operation part has Content-Type '{}', expected application/http",
                media_type.essence()
            )));
        }
        if let Some(encoding) = part_headers.get(CONTENT_TRANSFER_ENCODING_HEADER) {
            if !encoding.trim().eq_ignore_ascii_case(BINARY_TRANSFER_ENCODING) {
                return Err(BatchwireError::MalformedOperation(format!(
                    "operation part has Content-Transfer-Encoding '{}', expected binary",
                    encoding
                )));
            }
        }

        let first_line = self.read_first_line()?;
        let line = match self.settings.message_kind {
            MessageKind::Request => OperationLine::Request(RequestLine::parse(&first_line)?),
            MessageKind::Response => OperationLine::Response(StatusLine::parse(&first_line)?),
        };

        let changeset = self.changeset_boundary().map(str::to_string);
        if let (Some(boundary), OperationLine::Request(request)) = (&changeset, &line) {
            if !request.is_modifying() {
                return Err(BatchwireError::MalformedOperation(format!(
                    "{} request inside change-set '{}'",
                    request.method, boundary
                )));
            }
        }

        let headers = self.read_header_block()?;

        let content_id = match single_content_id(&part_headers)? {
            Some(id) => Some(id),
            None => single_content_id(&headers)?,
        };

        let declared: Vec<&str> = part_headers
            .get_all(DEPENDS_ON_HEADER)
            .chain(headers.get_all(DEPENDS_ON_HEADER))
            .collect();
        let explicit = (!declared.is_empty()).then(|| declared.join(","));
        let url = match &line {
            OperationLine::Request(request) => Some(request.url.as_str()),
            OperationLine::Response(_) => None,
        };
        let depends_on_ids = self.content_ids.resolve(explicit.as_deref(), url)?;

        if let Some(id) = &content_id {
            self.content_ids.register(id)?;
        }

        self.operation = Some(Operation {
            content_id,
            depends_on_ids,
            line,
            headers,
            part_headers,
            changeset,
        });
        Ok(BatchReaderState::Operation)
    }

    fn create_body(&mut self) -> Result<OperationBody> {
        if self.state != BatchReaderState::Operation {
            return Err(BatchwireError::InvalidState(format!(
                "no operation body to open in state {:?}",
                self.state
            )));
        }
        if self.body_lease.is_some() {
            return Err(BatchwireError::InvalidState(
                "operation body has already been opened".to_string(),
            ));
        }

        let mut body = BytesMut::new();
        let line = match self.scan_to_boundary(Some(&mut body)) {
            Ok(line) => line,
            Err(e) => return Err(self.fail(e)),
        };

        // The line break before a boundary belongs to the boundary.
        if body.ends_with(b"\r\n") {
            body.truncate(body.len() - 2);
        } else if body.ends_with(b"\n") {
            body.truncate(body.len() - 1);
        }

        self.pending_line = Some(line);
        let lease = Arc::new(BodyLease::default());
        self.body_lease = Some(lease.clone());

        Ok(StreamLifecycleController::new(
            Cursor::new(body.freeze()),
            Box::new(BodyListener { lease }),
            self.mode,
        ))
    }

    // ------------------------------------------------------------------
    // Line scanning
    // ------------------------------------------------------------------

    /// Read one raw line into the scratch buffer. Returns false at end of data.
    fn next_line(&mut self) -> Result<bool> {
        self.line.clear();
        let n = self.buffer.read_until(b'\n', &mut self.line)?;
        Ok(n > 0)
    }

    /// Skip (or collect) lines up to the next boundary line of the innermost
    /// scope and report which kind it was.
    fn scan_to_boundary(&mut self, mut collect: Option<&mut BytesMut>) -> Result<BoundaryLine> {
        loop {
            if !self.next_line()? {
                let expected = self
                    .changeset_boundary
                    .as_ref()
                    .unwrap_or(&self.batch_boundary)
                    .delimiter();
                return Err(BatchwireError::TransportExhausted(format!(
                    "end of data before boundary '{}'",
                    expected
                )));
            }

            if let Some(changeset) = &self.changeset_boundary {
                if let Some(kind) = changeset.classify(&self.line) {
                    return Ok(kind);
                }
                if self.batch_boundary.classify(&self.line).is_some() {
                    return Err(BatchwireError::MalformedBoundary(format!(
                        "batch boundary inside unterminated change-set '{}'",
                        changeset.text()
                    )));
                }
            } else if let Some(kind) = self.batch_boundary.classify(&self.line) {
                return Ok(kind);
            }

            if let Some(body) = collect.as_deref_mut() {
                body.extend_from_slice(&self.line);
            }
        }
    }

    /// First line of an embedded message.
    fn read_first_line(&mut self) -> Result<String> {
        if !self.next_line()? {
            return Err(BatchwireError::TransportExhausted(
                "end of data before request or status line".to_string(),
            ));
        }
        if self.is_boundary_line() {
            return Err(BatchwireError::MalformedOperation(
                "operation part has no request or status line".to_string(),
            ));
        }
        self.line_text()
    }

    /// `name: value` lines up to the blank line.
    fn read_header_block(&mut self) -> Result<Headers> {
        let mut headers = Headers::new();
        loop {
            if !self.next_line()? {
                return Err(BatchwireError::TransportExhausted(
                    "end of data inside a header block".to_string(),
                ));
            }
            if trim_line_end(&self.line).is_empty() {
                return Ok(headers);
            }
            if self.is_boundary_line() {
                return Err(BatchwireError::MalformedOperation(
                    "header block is not terminated by a blank line".to_string(),
                ));
            }
            let text = self.line_text()?;
            headers.push_line(&text)?;
        }
    }

    fn is_boundary_line(&self) -> bool {
        self.batch_boundary.classify(&self.line).is_some()
            || self
                .changeset_boundary
                .as_ref()
                .is_some_and(|b| b.classify(&self.line).is_some())
    }

    /// Scratch line as text, terminator removed, length checked.
    fn line_text(&self) -> Result<String> {
        let raw = trim_line_end(&self.line);
        if raw.len() > self.settings.max_header_line_length {
            return Err(BatchwireError::QuotaExceeded(format!(
                "line of {} bytes exceeds the {} byte limit",
                raw.len(),
                self.settings.max_header_line_length
            )));
        }
        String::from_utf8(raw.to_vec()).map_err(|_| {
            BatchwireError::MalformedOperation(
                "header or request line is not valid UTF-8".to_string(),
            )
        })
    }
}

impl std::fmt::Debug for BatchReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchReader")
            .field("state", &self.state)
            .field("mode", &self.mode)
            .field("batch_boundary", &self.batch_boundary.text())
            .field("changeset_boundary", &self.changeset_boundary())
            .field("position", &self.buffer.position())
            .finish()
    }
}

/// Extract the batch boundary from a `multipart/mixed` content type.
pub fn boundary_from_content_type(content_type: &str) -> Result<String> {
    let media_type = MediaType::parse(content_type)
        .map_err(|e| BatchwireError::MalformedBoundary(e.to_string()))?;
    if !media_type.is("multipart", "mixed") {
        return Err(BatchwireError::MalformedBoundary(format!(
            "batch content type must be multipart/mixed, got '{}'",
            media_type.essence()
        )));
    }
    let boundary = media_type.boundary().ok_or_else(|| {
        BatchwireError::MalformedBoundary(
            "batch content type has no boundary parameter".to_string(),
        )
    })?;
    Ok(boundary.to_string())
}

fn part_media_type(part_headers: &Headers) -> Result<MediaType> {
    let value = part_headers.get(CONTENT_TYPE_HEADER).ok_or_else(|| {
        BatchwireError::MalformedOperation("batch part has no Content-Type header".to_string())
    })?;
    MediaType::parse(value)
}

/// The Content-ID of one header block. Repeating the header with a
/// different value is an error.
fn single_content_id(headers: &Headers) -> Result<Option<String>> {
    let mut found: Option<&str> = None;
    for id in headers.get_all(CONTENT_ID_HEADER).map(str::trim) {
        if id.is_empty() {
            continue;
        }
        match found {
            Some(previous) if previous != id => {
                return Err(BatchwireError::MalformedOperation(format!(
                    "conflicting Content-ID values '{}' and '{}'",
                    previous, id
                )));
            }
            _ => found = Some(id),
        }
    }
    Ok(found.map(str::to_string))
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONTENT_TYPE: &str = "multipart/mixed; boundary=batch_1";

    fn join(lines: &[&str]) -> String {
        let mut payload = lines.join("\r\n");
        payload.push_str("\r\n");
        payload
    }

    fn reader(payload: &str) -> BatchReader {
        BatchReader::from_reader(payload.as_bytes(), CONTENT_TYPE, BatchReaderSettings::default())
            .unwrap()
    }

    fn operation_part(headers: &[&str], first_line: &str, body: &str) -> Vec<String> {
        let mut lines = vec![
            "Content-Type: application/http".to_string(),
            "Content-Transfer-Encoding: binary".to_string(),
        ];
        lines.extend(headers.iter().map(|h| h.to_string()));
        lines.push(String::new());
        lines.push(first_line.to_string());
        lines.push("Content-Type: application/json".to_string());
        lines.push(String::new());
        lines.push(body.to_string());
        lines
    }

    fn changeset_payload() -> String {
        let mut lines: Vec<String> = vec![
            "--batch_1".into(),
            "Content-Type: multipart/mixed; boundary=changeset_1".into(),
            String::new(),
            "--changeset_1".into(),
        ];
        lines.extend(operation_part(
            &["Content-ID: 1"],
            "POST http://tempuri.org/Customers HTTP/1.1",
            "{\"Name\":\"Bob\"}",
        ));
        lines.push("--changeset_1".into());
        lines.extend(operation_part(
            &["Content-ID: 2"],
            "POST http://tempuri.org/Orders HTTP/1.1",
            "{\"Total\":5}",
        ));
        lines.push("--changeset_1".into());
        lines.extend(operation_part(
            &["Depends-On: 1"],
            "POST $2/Customer/$ref HTTP/1.1",
            "{\"@odata.id\":\"$1\"}",
        ));
        lines.push("--changeset_1--".into());
        lines.push("--batch_1--".into());
        let refs: Vec<&str> = lines.iter().map(String::as_str).collect();
        join(&refs)
    }

    #[test]
    fn test_state_sequence_for_changeset() {
        let mut reader = reader(&changeset_payload());
        assert_eq!(reader.state(), BatchReaderState::Initial);

        let mut states = Vec::new();
        while reader.read().unwrap() {
            states.push(reader.state());
        }
        states.push(reader.state());

        assert_eq!(
            states,
            vec![
                BatchReaderState::ChangesetStart,
                BatchReaderState::Operation,
                BatchReaderState::Operation,
                BatchReaderState::Operation,
                BatchReaderState::ChangesetEnd,
                BatchReaderState::Completed,
            ]
        );
    }

    #[test]
    fn test_dependency_extraction() {
        let mut reader = reader(&changeset_payload());
        let mut deps = Vec::new();
        while reader.read().unwrap() {
            if let Some(operation) = reader.operation() {
                deps.push(operation.depends_on_ids.clone());
            }
        }
        assert_eq!(
            deps,
            vec![
                Vec::<String>::new(),
                Vec::<String>::new(),
                vec!["1".to_string(), "2".to_string()],
            ]
        );
    }

    #[test]
    fn test_repeated_depends_on_lines_merge() {
        let mut lines: Vec<String> = vec![
            "--batch_1".into(),
            "Content-Type: multipart/mixed; boundary=changeset_1".into(),
            String::new(),
            "--changeset_1".into(),
        ];
        lines.extend(operation_part(
            &["Content-ID: 1"],
            "POST http://tempuri.org/Customers HTTP/1.1",
            "{}",
        ));
        lines.push("--changeset_1".into());
        lines.extend(operation_part(
            &["Content-ID: 2"],
            "POST http://tempuri.org/Orders HTTP/1.1",
            "{}",
        ));
        lines.push("--changeset_1".into());
        lines.extend(operation_part(
            &["Depends-On: 1", "Depends-On: 2"],
            "POST http://tempuri.org/Links HTTP/1.1",
            "{}",
        ));
        lines.push("--changeset_1--".into());
        lines.push("--batch_1--".into());
        let refs: Vec<&str> = lines.iter().map(String::as_str).collect();

        let mut reader = reader(&join(&refs));
        let mut deps = Vec::new();
        while reader.read().unwrap() {
            if let Some(operation) = reader.operation() {
                deps.push(operation.depends_on_ids.clone());
            }
        }
        assert_eq!(deps[2], vec!["1".to_string(), "2".to_string()]);
    }

    #[test]
    fn test_conflicting_content_id_lines() {
        let payload = join(&[
            "--batch_1",
            "Content-Type: application/http",
            "Content-ID: 1",
            "Content-ID: 2",
            "",
            "POST Customers HTTP/1.1",
            "",
            "",
            "--batch_1--",
        ]);
        let mut reader = reader(&payload);
        let err = reader.read().unwrap_err();
        assert!(matches!(err, BatchwireError::MalformedOperation(_)));
        assert!(err.to_string().contains("conflicting Content-ID"));
        assert_eq!(reader.state(), BatchReaderState::Exception);

        let payload = join(&[
            "--batch_1",
            "Content-Type: application/http",
            "Content-ID: 1",
            "Content-ID: 1",
            "",
            "POST Customers HTTP/1.1",
            "",
            "",
            "--batch_1--",
        ]);
        let mut reader = self::reader(&payload);
        assert!(reader.read().unwrap());
        assert_eq!(
            reader.operation().and_then(|o| o.content_id.as_deref()),
            Some("1")
        );
    }

    #[test]
    fn test_operation_headers_before_body() {
        let mut reader = reader(&changeset_payload());
        reader.read().unwrap();
        reader.read().unwrap();

        assert_eq!(reader.state(), BatchReaderState::Operation);
        let operation = reader.operation().unwrap();
        assert_eq!(operation.method(), Some("POST"));
        assert_eq!(operation.url(), Some("http://tempuri.org/Customers"));
        assert_eq!(operation.content_id.as_deref(), Some("1"));
        assert_eq!(operation.changeset.as_deref(), Some("changeset_1"));
        assert_eq!(operation.headers.get("content-type"), Some("application/json"));

        let body = reader.read_body().unwrap();
        assert_eq!(&body[..], b"{\"Name\":\"Bob\"}");
    }

    #[test]
    fn test_unopened_bodies_are_skipped() {
        let mut reader = reader(&changeset_payload());
        let mut urls = Vec::new();
        while reader.read().unwrap() {
            if let Some(url) = reader.operation().and_then(Operation::url) {
                urls.push(url.to_string());
            }
        }
        assert_eq!(
            urls,
            vec![
                "http://tempuri.org/Customers",
                "http://tempuri.org/Orders",
                "$2/Customer/$ref",
            ]
        );
    }

    #[test]
    fn test_body_must_be_released() {
        let mut reader = reader(&changeset_payload());
        reader.read().unwrap();
        reader.read().unwrap();

        let mut body = reader.open_body().unwrap();
        let mut text = String::new();
        body.stream().unwrap().read_to_string(&mut text).unwrap();

        let err = reader.read().unwrap_err();
        assert!(matches!(err, BatchwireError::InvalidState(_)));
        assert_eq!(reader.state(), BatchReaderState::Operation);

        body.release().unwrap();
        body.release().unwrap();
        assert!(reader.read().unwrap());
        assert_eq!(reader.operation().unwrap().url(), Some("http://tempuri.org/Orders"));
    }

    #[test]
    fn test_dropped_body_counts_as_released() {
        let mut reader = reader(&changeset_payload());
        reader.read().unwrap();
        reader.read().unwrap();
        {
            let mut body = reader.open_body().unwrap();
            body.stream().unwrap();
        }
        assert!(reader.read().unwrap());
    }

    #[test]
    fn test_body_opened_once() {
        let mut reader = reader(&changeset_payload());
        reader.read().unwrap();
        reader.read().unwrap();
        let _body = reader.open_body().unwrap();
        assert!(matches!(reader.open_body(), Err(BatchwireError::InvalidState(_))));
    }

    #[test]
    fn test_open_body_outside_operation() {
        let mut reader = reader(&changeset_payload());
        assert!(matches!(reader.open_body(), Err(BatchwireError::InvalidState(_))));
        reader.read().unwrap();
        assert!(matches!(reader.open_body(), Err(BatchwireError::InvalidState(_))));
    }

    #[test]
    fn test_empty_batch() {
        let mut reader = reader(&join(&["--batch_1--"]));
        assert!(!reader.read().unwrap());
        assert_eq!(reader.state(), BatchReaderState::Completed);
        assert!(matches!(reader.read(), Err(BatchwireError::InvalidState(_))));
    }

    #[test]
    fn test_empty_changeset() {
        let payload = join(&[
            "--batch_1",
            "Content-Type: multipart/mixed; boundary=cs",
            "",
            "--cs--",
            "--batch_1--",
        ]);
        let mut reader = reader(&payload);
        assert!(reader.read().unwrap());
        assert_eq!(reader.state(), BatchReaderState::ChangesetStart);
        assert!(reader.read().unwrap());
        assert_eq!(reader.state(), BatchReaderState::ChangesetEnd);
        assert!(!reader.read().unwrap());
    }

    #[test]
    fn test_preamble_epilogue_and_lf_endings() {
        let payload = "This is a preamble\n\
            --batch_1\n\
            Content-Type: application/http\n\
            \n\
            GET Customers HTTP/1.1\n\
            \n\
            \n\
            --batch_1--\n\
            epilogue text\n";
        let mut reader = reader(payload);
        let batch = reader.read_all().unwrap();
        assert_eq!(batch.items.len(), 1);
        match &batch.items[0] {
            BatchItem::Operation(op) => {
                assert_eq!(op.operation.method(), Some("GET"));
                assert!(op.body.is_empty());
            }
            other => panic!("unexpected item: {other:?}"),
        }
    }

    #[test]
    fn test_response_batch() {
        let payload = join(&[
            "--batch_1",
            "Content-Type: application/http",
            "Content-Transfer-Encoding: binary",
            "Content-ID: 1",
            "",
            "HTTP/1.1 201 Created",
            "Location: http://tempuri.org/Customers(1)",
            "",
            "{}",
            "--batch_1--",
        ]);
        let mut reader = BatchReader::from_reader(
            payload.as_bytes(),
            CONTENT_TYPE,
            BatchReaderSettings::default().responses(),
        )
        .unwrap();

        assert!(reader.read().unwrap());
        let operation = reader.operation().unwrap();
        assert_eq!(operation.status_code(), Some(201));
        assert_eq!(operation.headers.get("location"), Some("http://tempuri.org/Customers(1)"));
        assert_eq!(&reader.read_body().unwrap()[..], b"{}");
        assert!(!reader.read().unwrap());
    }

    #[test]
    fn test_large_binary_body_spans_chunks() {
        let body: String = "0123456789abcdef".repeat(10_000);
        let payload = join(&[
            "--batch_1",
            "Content-Type: application/http",
            "",
            "PUT Photos(1)/$value HTTP/1.1",
            "Content-Type: application/octet-stream",
            "",
            &body,
            "--batch_1--",
        ]);
        let mut reader = reader(&payload);
        reader.read().unwrap();
        assert_eq!(reader.read_body().unwrap(), body.as_bytes());
        assert!(!reader.read().unwrap());
    }

    #[test]
    fn test_premature_end_of_data() {
        let payload = join(&[
            "--batch_1",
            "Content-Type: application/http",
            "",
            "GET Customers HTTP/1.1",
            "",
            "no terminator follows",
        ]);
        let mut reader = reader(&payload);
        assert!(reader.read().unwrap());
        let err = reader.read().unwrap_err();
        assert!(matches!(err, BatchwireError::TransportExhausted(_)));
        assert_eq!(reader.state(), BatchReaderState::Exception);
        assert!(matches!(reader.read(), Err(BatchwireError::InvalidState(_))));
    }

    #[test]
    fn test_missing_first_boundary() {
        let mut reader = reader("just some text\r\n");
        assert!(matches!(reader.read(), Err(BatchwireError::TransportExhausted(_))));
    }

    #[test]
    fn test_nested_changeset_rejected() {
        let payload = join(&[
            "--batch_1",
            "Content-Type: multipart/mixed; boundary=outer",
            "",
            "--outer",
            "Content-Type: multipart/mixed; boundary=inner",
            "",
            "--inner--",
            "--outer--",
            "--batch_1--",
        ]);
        let mut reader = reader(&payload);
        assert!(reader.read().unwrap());
        let err = reader.read().unwrap_err();
        assert!(matches!(err, BatchwireError::MalformedBoundary(_)));
        assert_eq!(reader.state(), BatchReaderState::Exception);
    }

    #[test]
    fn test_missing_request_line() {
        let payload = join(&[
            "--batch_1",
            "Content-Type: application/http",
            "",
            "Content-Type: application/json",
            "",
            "--batch_1--",
        ]);
        let mut reader = reader(&payload);
        assert!(matches!(reader.read(), Err(BatchwireError::MalformedOperation(_))));
    }

    #[test]
    fn test_boundary_instead_of_request_line() {
        let payload = join(&[
            "--batch_1",
            "Content-Type: application/http",
            "",
            "--batch_1--",
        ]);
        let mut reader = reader(&payload);
        let err = reader.read().unwrap_err();
        assert!(err.to_string().contains("no request or status line"));
    }

    #[test]
    fn test_duplicate_content_id() {
        let payload = join(&[
            "--batch_1",
            "Content-Type: application/http",
            "Content-ID: 1",
            "",
            "POST Customers HTTP/1.1",
            "",
            "",
            "--batch_1",
            "Content-Type: application/http",
            "Content-ID: 1",
            "",
            "POST Orders HTTP/1.1",
            "",
            "",
            "--batch_1--",
        ]);
        let mut reader = reader(&payload);
        assert!(reader.read().unwrap());
        let err = reader.read().unwrap_err();
        assert!(err.to_string().contains("duplicate Content-ID"));
    }

    #[test]
    fn test_unresolved_dependency() {
        let payload = join(&[
            "--batch_1",
            "Content-Type: application/http",
            "",
            "POST $7/Orders HTTP/1.1",
            "",
            "",
            "--batch_1--",
        ]);
        let mut reader = reader(&payload);
        let err = reader.read().unwrap_err();
        assert!(matches!(err, BatchwireError::MalformedOperation(_)));
        assert!(err.to_string().contains("'7'"));
    }

    #[test]
    fn test_get_inside_changeset_rejected() {
        let payload = join(&[
            "--batch_1",
            "Content-Type: multipart/mixed; boundary=cs",
            "",
            "--cs",
            "Content-Type: application/http",
            "",
            "GET Customers HTTP/1.1",
            "",
            "",
            "--cs--",
            "--batch_1--",
        ]);
        let mut reader = reader(&payload);
        reader.read().unwrap();
        assert!(matches!(reader.read(), Err(BatchwireError::MalformedOperation(_))));
    }

    #[test]
    fn test_batch_boundary_inside_changeset() {
        let payload = join(&[
            "--batch_1",
            "Content-Type: multipart/mixed; boundary=cs",
            "",
            "--cs",
            "Content-Type: application/http",
            "",
            "POST Customers HTTP/1.1",
            "",
            "{}",
            "--batch_1--",
        ]);
        let mut reader = reader(&payload);
        reader.read().unwrap();
        reader.read().unwrap();
        assert!(matches!(reader.read(), Err(BatchwireError::MalformedBoundary(_))));
    }

    #[test]
    fn test_non_binary_transfer_encoding() {
        let payload = join(&[
            "--batch_1",
            "Content-Type: application/http",
            "Content-Transfer-Encoding: base64",
            "",
            "GET Customers HTTP/1.1",
            "",
            "",
            "--batch_1--",
        ]);
        let mut reader = reader(&payload);
        assert!(matches!(reader.read(), Err(BatchwireError::MalformedOperation(_))));
    }

    #[test]
    fn test_parts_quota() {
        let payload = join(&[
            "--batch_1",
            "Content-Type: application/http",
            "",
            "GET A HTTP/1.1",
            "",
            "",
            "--batch_1",
            "Content-Type: application/http",
            "",
            "GET B HTTP/1.1",
            "",
            "",
            "--batch_1--",
        ]);
        let mut reader = BatchReader::from_reader(
            payload.as_bytes(),
            CONTENT_TYPE,
            BatchReaderSettings::default().max_parts_per_batch(1),
        )
        .unwrap();
        assert!(reader.read().unwrap());
        assert!(matches!(reader.read(), Err(BatchwireError::QuotaExceeded(_))));
    }

    #[test]
    fn test_boundary_from_content_type() {
        assert_eq!(boundary_from_content_type(CONTENT_TYPE).unwrap(), "batch_1");
        assert!(matches!(
            boundary_from_content_type("multipart/mixed"),
            Err(BatchwireError::MalformedBoundary(_))
        ));
        assert!(matches!(
            boundary_from_content_type("application/json"),
            Err(BatchwireError::MalformedBoundary(_))
        ));
    }

    #[test]
    fn test_settings_from_json() {
        let settings: BatchReaderSettings =
            serde_json::from_str(r#"{"message_kind":"response","max_parts_per_batch":5}"#).unwrap();
        assert_eq!(settings.message_kind, MessageKind::Response);
        assert_eq!(settings.max_parts_per_batch, 5);
        assert_eq!(
            settings.max_operations_per_changeset,
            DEFAULT_MAX_OPERATIONS_PER_CHANGESET
        );
    }

    #[tokio::test]
    async fn test_async_reader() {
        let payload = changeset_payload();
        let mut reader = BatchReader::from_source(
            payload.as_bytes(),
            CONTENT_TYPE,
            BatchReaderSettings::default(),
        )
        .await
        .unwrap();
        assert_eq!(reader.mode(), ExecutionMode::Suspending);

        assert!(reader.read_async().await.unwrap());
        assert!(reader.read_async().await.unwrap());

        let mut body = reader.open_body_async().await.unwrap();
        let mut out = Vec::new();
        tokio::io::AsyncReadExt::read_to_end(body.stream_async().await.unwrap(), &mut out)
            .await
            .unwrap();
        body.release_async().await.unwrap();
        assert_eq!(out, b"{\"Name\":\"Bob\"}");

        let rest = reader.read_all_async().await.unwrap();
        assert_eq!(rest.operations().count(), 2);
        assert_eq!(reader.state(), BatchReaderState::Completed);
    }
}
