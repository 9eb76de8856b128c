//! Replayable byte buffer.
//!
//! Drains a single-pass source into fixed 64KB chunks and then serves the
//! bytes back through a synchronous cursor that can be rewound:
//!
//! ```text
//! source ──► [chunk 0][chunk 1]...[chunk n] ──► read() / BufRead / AsyncRead
//!                 ▲
//!                 └── reset_for_reading()
//! ```
//!
//! The source is consumed exactly once and dropped before any byte is
//! exposed, whether filling succeeded or failed.
//!
//! # Example
//!
//! ```
//! use batchwire::stream::ReplayableByteBuffer;
//!
//! let mut buffer = ReplayableByteBuffer::buffer_from_reader(&b"hello"[..]).unwrap();
//! let mut out = [0u8; 8];
//! assert_eq!(buffer.read(&mut out), 5);
//! assert_eq!(buffer.read(&mut out), 0);
//!
//! buffer.reset_for_reading();
//! assert_eq!(buffer.read(&mut out), 5);
//! ```

use std::io::{self, BufRead, Read};
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, ReadBuf};

/// Capacity of each buffered chunk (64KB).
pub const CHUNK_SIZE: usize = 64 * 1024;

/// Fully materialized, replayable copy of a byte source.
///
/// Chunks are immutable once filled. Only the last chunk may be shorter
/// than [`CHUNK_SIZE`] and no chunk is ever empty.
#[derive(Debug, Clone, Default)]
pub struct ReplayableByteBuffer {
    /// Filled chunks in source order.
    chunks: Vec<Bytes>,
    /// Total number of buffered bytes.
    len: usize,
    /// Index of the chunk the cursor is in.
    chunk_index: usize,
    /// Offset of the cursor inside that chunk.
    offset: usize,
    /// Absolute cursor position.
    position: usize,
}

impl ReplayableByteBuffer {
    /// Buffer an asynchronous source to exhaustion.
    ///
    /// The source is dropped before this returns, in every outcome. A read
    /// failure is returned as the source's own `io::Error`, unchanged.
    pub async fn buffer_from<R>(mut source: R) -> io::Result<Self>
    where
        R: AsyncRead + Unpin,
    {
        let filled = Self::fill_async(&mut source).await;
        drop(source);
        match &filled {
            Ok(buffer) => tracing::trace!(
                bytes = buffer.len,
                chunks = buffer.chunks.len(),
                "buffered async source"
            ),
            Err(e) => tracing::debug!("async source failed during buffering: {}", e),
        }
        filled
    }

    /// Buffer a blocking source to exhaustion.
    ///
    /// Same contract as [`buffer_from`](Self::buffer_from), without any
    /// suspension point.
    pub fn buffer_from_reader<R>(mut source: R) -> io::Result<Self>
    where
        R: Read,
    {
        let filled = Self::fill_blocking(&mut source);
        drop(source);
        if let Err(e) = &filled {
            tracing::debug!("blocking source failed during buffering: {}", e);
        }
        filled
    }

    /// Build a buffer over bytes that are already in memory.
    pub fn from_bytes(data: impl Into<Bytes>) -> Self {
        let data: Bytes = data.into();
        let len = data.len();
        let mut chunks = Vec::with_capacity(len.div_ceil(CHUNK_SIZE));
        let mut start = 0;
        while start < len {
            let end = usize::min(start + CHUNK_SIZE, len);
            chunks.push(data.slice(start..end));
            start = end;
        }
        Self::from_chunks(chunks, len)
    }

    fn from_chunks(chunks: Vec<Bytes>, len: usize) -> Self {
        Self {
            chunks,
            len,
            chunk_index: 0,
            offset: 0,
            position: 0,
        }
    }

    async fn fill_async<R>(source: &mut R) -> io::Result<Self>
    where
        R: AsyncRead + Unpin,
    {
        let mut filler = ChunkFiller::default();
        loop {
            let mut chunk = vec![0u8; CHUNK_SIZE];
            let mut filled = 0;
            while filled < CHUNK_SIZE {
                match source.read(&mut chunk[filled..]).await {
                    Ok(0) => break,
                    Ok(n) => filled += n,
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => return Err(e),
                }
            }
            if filler.push(chunk, filled) {
                return Ok(filler.finish());
            }
        }
    }

    fn fill_blocking<R>(source: &mut R) -> io::Result<Self>
    where
        R: Read,
    {
        let mut filler = ChunkFiller::default();
        loop {
            let mut chunk = vec![0u8; CHUNK_SIZE];
            let mut filled = 0;
            while filled < CHUNK_SIZE {
                match source.read(&mut chunk[filled..]) {
                    Ok(0) => break,
                    Ok(n) => filled += n,
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => return Err(e),
                }
            }
            if filler.push(chunk, filled) {
                return Ok(filler.finish());
            }
        }
    }

    /// Copy up to `dest.len()` bytes at the cursor into `dest`.
    ///
    /// Spans chunk boundaries transparently. Returns 0 only at the end of
    /// the data (or for an empty `dest`).
    pub fn read(&mut self, dest: &mut [u8]) -> usize {
        let mut copied = 0;
        while copied < dest.len() {
            let available = self.current_chunk();
            if available.is_empty() {
                break;
            }
            let n = usize::min(available.len(), dest.len() - copied);
            dest[copied..copied + n].copy_from_slice(&available[..n]);
            copied += n;
            self.advance(n);
        }
        copied
    }

    /// Rewind the cursor to the first byte.
    ///
    /// Subsequent reads reproduce the buffered content byte for byte.
    pub fn reset_for_reading(&mut self) {
        self.chunk_index = 0;
        self.offset = 0;
        self.position = 0;
    }

    /// Total number of buffered bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Check if the source produced no bytes at all.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Absolute cursor position.
    #[inline]
    pub fn position(&self) -> usize {
        self.position
    }

    /// Number of bytes left between the cursor and the end.
    #[inline]
    pub fn remaining(&self) -> usize {
        self.len - self.position
    }

    /// Number of filled chunks.
    #[inline]
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Unread part of the chunk under the cursor.
    fn current_chunk(&self) -> &[u8] {
        match self.chunks.get(self.chunk_index) {
            Some(chunk) => &chunk[self.offset..],
            None => &[],
        }
    }

    /// Move the cursor forward by `amount` bytes, stepping into the next
    /// chunk once the current one is exhausted.
    fn advance(&mut self, mut amount: usize) {
        while amount > 0 {
            let Some(chunk) = self.chunks.get(self.chunk_index) else {
                return;
            };
            let step = usize::min(amount, chunk.len() - self.offset);
            self.offset += step;
            self.position += step;
            amount -= step;
            if self.offset == chunk.len() {
                self.chunk_index += 1;
                self.offset = 0;
            }
        }
    }
}

impl Read for ReplayableByteBuffer {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Ok(ReplayableByteBuffer::read(self, buf))
    }
}

impl BufRead for ReplayableByteBuffer {
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        Ok(self.current_chunk())
    }

    fn consume(&mut self, amt: usize) {
        self.advance(amt);
    }
}

impl AsyncRead for ReplayableByteBuffer {
    fn poll_read(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        // Data is already in memory, so this never returns Pending.
        let this = self.get_mut();
        let n = ReplayableByteBuffer::read(this, buf.initialize_unfilled());
        buf.advance(n);
        Poll::Ready(Ok(()))
    }
}

/// Chunks collected while draining a source.
#[derive(Default)]
struct ChunkFiller {
    chunks: Vec<Bytes>,
    len: usize,
}

impl ChunkFiller {
    /// Keep the first `filled` bytes of `chunk`. Returns true once the
    /// source is exhausted, i.e. the chunk came back short.
    fn push(&mut self, mut chunk: Vec<u8>, filled: usize) -> bool {
        if filled > 0 {
            chunk.truncate(filled);
            self.chunks.push(Bytes::from(chunk));
            self.len += filled;
        }
        filled < CHUNK_SIZE
    }

    fn finish(self) -> ReplayableByteBuffer {
        ReplayableByteBuffer::from_chunks(self.chunks, self.len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    /// Deterministic test pattern.
    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 31 % 251) as u8).collect()
    }

    /// Read everything left using fixed-size requests.
    fn drain(buffer: &mut ReplayableByteBuffer, request: usize) -> Vec<u8> {
        let mut out = Vec::new();
        let mut scratch = vec![0u8; request];
        loop {
            let n = buffer.read(&mut scratch);
            if n == 0 {
                return out;
            }
            out.extend_from_slice(&scratch[..n]);
        }
    }

    /// Async source that hands out at most `step` bytes per poll, after
    /// optionally failing the first poll with `Interrupted`.
    struct Trickle {
        data: Vec<u8>,
        pos: usize,
        step: usize,
        interrupt: bool,
    }

    impl AsyncRead for Trickle {
        fn poll_read(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            if std::mem::take(&mut self.interrupt) {
                return Poll::Ready(Err(io::ErrorKind::Interrupted.into()));
            }
            let end = usize::min(self.pos + self.step, self.data.len());
            let n = usize::min(end - self.pos, buf.remaining());
            let start = self.pos;
            buf.put_slice(&self.data[start..start + n]);
            self.pos += n;
            Poll::Ready(Ok(()))
        }
    }

    /// Source that flags when it is dropped.
    struct DropFlag<R> {
        inner: R,
        dropped: Arc<AtomicBool>,
    }

    impl<R> Drop for DropFlag<R> {
        fn drop(&mut self) {
            self.dropped.store(true, Ordering::SeqCst);
        }
    }

    impl<R: Read> Read for DropFlag<R> {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.inner.read(buf)
        }
    }

    #[test]
    fn test_empty_source() {
        let mut buffer = ReplayableByteBuffer::buffer_from_reader(io::empty()).unwrap();
        let mut out = [0u8; 16];
        assert_eq!(buffer.read(&mut out), 0);
        assert!(buffer.is_empty());
        assert_eq!(buffer.chunk_count(), 0);
    }

    #[test]
    fn test_exact_multiple_has_no_trailing_chunk() {
        let data = pattern(CHUNK_SIZE * 2);
        let mut buffer = ReplayableByteBuffer::buffer_from_reader(&data[..]).unwrap();
        assert_eq!(buffer.chunk_count(), 2);
        assert_eq!(buffer.len(), CHUNK_SIZE * 2);
        assert_eq!(drain(&mut buffer, CHUNK_SIZE), data);
    }

    #[test]
    fn test_read_sizes_across_chunks() {
        let data = pattern(CHUNK_SIZE * 3 + 17);
        let mut buffer = ReplayableByteBuffer::buffer_from_reader(&data[..]).unwrap();
        assert_eq!(buffer.chunk_count(), 4);

        for request in [1, 7, 4096, CHUNK_SIZE - 1, CHUNK_SIZE, CHUNK_SIZE + 1, CHUNK_SIZE * 2] {
            buffer.reset_for_reading();
            assert_eq!(drain(&mut buffer, request), data, "request size {request}");
        }
    }

    #[test]
    fn test_reset_replays_identical_bytes() {
        let data = pattern(100_000);
        let mut buffer = ReplayableByteBuffer::buffer_from_reader(&data[..]).unwrap();

        let first = drain(&mut buffer, 3000);
        assert_eq!(buffer.remaining(), 0);
        buffer.reset_for_reading();
        assert_eq!(buffer.position(), 0);
        let second = drain(&mut buffer, 777);

        assert_eq!(first, data);
        assert_eq!(first, second);
    }

    #[test]
    fn test_buf_read_lines_span_chunks() {
        let mut data = vec![b'a'; CHUNK_SIZE - 2];
        data.extend_from_slice(b"\r\nsecond line\n");
        let mut buffer = ReplayableByteBuffer::buffer_from_reader(&data[..]).unwrap();

        let mut line = Vec::new();
        buffer.read_until(b'\n', &mut line).unwrap();
        assert_eq!(line.len(), CHUNK_SIZE);

        line.clear();
        buffer.read_until(b'\n', &mut line).unwrap();
        assert_eq!(line, b"second line\n");
    }

    #[test]
    fn test_from_bytes_splits_into_chunks() {
        let data = pattern(CHUNK_SIZE + 5);
        let mut buffer = ReplayableByteBuffer::from_bytes(data.clone());
        assert_eq!(buffer.chunk_count(), 2);
        assert_eq!(drain(&mut buffer, 10_000), data);
    }

    #[test]
    fn test_blocking_source_dropped_on_success() {
        let dropped = Arc::new(AtomicBool::new(false));
        let source = DropFlag {
            inner: &b"payload"[..],
            dropped: dropped.clone(),
        };
        let buffer = ReplayableByteBuffer::buffer_from_reader(source).unwrap();
        assert!(dropped.load(Ordering::SeqCst));
        assert_eq!(buffer.len(), 7);
    }

    #[tokio::test]
    async fn test_async_trickle_source() {
        let data = pattern(CHUNK_SIZE * 2 + 300);
        let source = Trickle {
            data: data.clone(),
            pos: 0,
            step: 1000,
            interrupt: false,
        };
        let mut buffer = ReplayableByteBuffer::buffer_from(source).await.unwrap();
        assert_eq!(buffer.chunk_count(), 3);
        assert_eq!(drain(&mut buffer, CHUNK_SIZE + 3), data);
    }

    #[tokio::test]
    async fn test_async_exact_multiple_after_interrupt() {
        let data = pattern(CHUNK_SIZE * 2);
        let source = Trickle {
            data: data.clone(),
            pos: 0,
            step: CHUNK_SIZE / 3,
            interrupt: true,
        };
        let mut buffer = ReplayableByteBuffer::buffer_from(source).await.unwrap();
        assert_eq!(buffer.chunk_count(), 2);
        assert_eq!(buffer.len(), CHUNK_SIZE * 2);
        assert_eq!(drain(&mut buffer, CHUNK_SIZE), data);
    }

    #[tokio::test]
    async fn test_async_read_impl() {
        let mut buffer = ReplayableByteBuffer::from_bytes(&b"async bytes"[..]);
        let mut out = Vec::new();
        AsyncReadExt::read_to_end(&mut buffer, &mut out).await.unwrap();
        assert_eq!(out, b"async bytes");
    }
}
