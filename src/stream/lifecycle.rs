//! Lifecycle control for scoped byte streams.
//!
//! A [`StreamLifecycleController`] wraps one read or write handle handed to a
//! consumer and reports two events to a [`StreamListener`]:
//!
//! - *requested*: the first time the handle is actually obtained
//!   (never at construction)
//! - *released*: exactly once, no matter how often release is invoked
//!
//! Both events exist in a blocking and a suspending form. The execution mode
//! fixed at construction decides what happens when a controller is dropped
//! without an explicit release.
//!
//! # Example
//!
//! ```
//! use batchwire::stream::{ExecutionMode, StreamLifecycleController, StreamListener};
//! use std::io::Read;
//!
//! struct Quiet;
//!
//! impl StreamListener for Quiet {
//!     fn stream_requested(&mut self) -> batchwire::Result<()> {
//!         Ok(())
//!     }
//!     fn stream_released(&mut self) -> batchwire::Result<()> {
//!         Ok(())
//!     }
//! }
//!
//! let body = std::io::Cursor::new(b"body".to_vec());
//! let mut scoped = StreamLifecycleController::new(body, Box::new(Quiet), ExecutionMode::Blocking);
//!
//! let mut text = String::new();
//! scoped.stream().unwrap().read_to_string(&mut text).unwrap();
//! scoped.release().unwrap();
//! assert_eq!(text, "body");
//! ```

use std::future::Future;
use std::io::{self, Read, Write};
use std::pin::Pin;

use serde::{Deserialize, Serialize};

use crate::error::{combine_release, BatchwireError, Result};

/// Boxed future returned by suspending listener callbacks.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// How a component performs its I/O, fixed at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    /// No suspension points at all.
    Blocking,
    /// Cooperative; suspends only on buffer fill and stream drain/release.
    Suspending,
}

/// Receives lifecycle notifications for a scoped stream.
///
/// The suspending forms default to the blocking ones, which suits listeners
/// that only flip in-memory state.
pub trait StreamListener: Send {
    /// The handle was obtained for the first time.
    fn stream_requested(&mut self) -> Result<()>;

    /// Suspending form of [`stream_requested`](Self::stream_requested).
    fn stream_requested_async(&mut self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move { self.stream_requested() })
    }

    /// The handle was released.
    fn stream_released(&mut self) -> Result<()>;

    /// Suspending form of [`stream_released`](Self::stream_released).
    fn stream_released_async(&mut self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move { self.stream_released() })
    }
}

/// Scoped read or write handle with exactly-once lifecycle notifications.
pub struct StreamLifecycleController<S> {
    /// The wrapped handle.
    stream: S,
    /// Lifecycle listener.
    listener: Box<dyn StreamListener>,
    /// Mode fixed at construction.
    mode: ExecutionMode,
    /// Whether `requested` has fired.
    requested: bool,
    /// Whether `released` has fired.
    released: bool,
}

impl<S> StreamLifecycleController<S> {
    /// Wrap `stream`. No listener callback fires here.
    pub fn new(stream: S, listener: Box<dyn StreamListener>, mode: ExecutionMode) -> Self {
        Self {
            stream,
            listener,
            mode,
            requested: false,
            released: false,
        }
    }

    /// Get the execution mode.
    #[inline]
    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    /// Check if the handle has been obtained.
    #[inline]
    pub fn is_requested(&self) -> bool {
        self.requested
    }

    /// Check if the handle has been released.
    #[inline]
    pub fn is_released(&self) -> bool {
        self.released
    }

    /// Obtain the handle, firing `stream_requested` on first access.
    pub fn stream(&mut self) -> Result<&mut S> {
        self.ensure_open()?;
        if !self.requested {
            self.requested = true;
            self.listener.stream_requested()?;
        }
        Ok(&mut self.stream)
    }

    /// Obtain the handle, firing `stream_requested_async` on first access.
    pub async fn stream_async(&mut self) -> Result<&mut S> {
        self.ensure_open()?;
        if !self.requested {
            self.requested = true;
            self.listener.stream_requested_async().await?;
        }
        Ok(&mut self.stream)
    }

    /// Release the handle. Only the first call notifies the listener.
    pub fn release(&mut self) -> Result<()> {
        if self.released {
            return Ok(());
        }
        self.released = true;
        self.listener.stream_released()
    }

    /// Suspending release. Honored in both execution modes.
    pub async fn release_async(&mut self) -> Result<()> {
        if self.released {
            return Ok(());
        }
        self.released = true;
        self.listener.stream_released_async().await
    }

    /// Release after some work, reporting a release failure alongside any
    /// failure the work already produced.
    pub fn release_with<T>(&mut self, pending: Result<T>) -> Result<T> {
        let released = self.release();
        combine_release(pending, released)
    }

    /// Suspending form of [`release_with`](Self::release_with).
    pub async fn release_with_async<T>(&mut self, pending: Result<T>) -> Result<T> {
        let released = self.release_async().await;
        combine_release(pending, released)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.released {
            return Err(BatchwireError::InvalidState(
                "stream has already been released".to_string(),
            ));
        }
        Ok(())
    }
}

impl<S: Read> Read for StreamLifecycleController<S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream()?.read(buf)
    }
}

impl<S: Write> Write for StreamLifecycleController<S> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.stream()?.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.stream()?.flush()
    }
}

impl<S> Drop for StreamLifecycleController<S> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if self.mode == ExecutionMode::Suspending {
            tracing::warn!("scoped stream dropped without release_async; notifying synchronously");
        }
        if let Err(e) = self.release() {
            tracing::warn!("stream listener failed during implicit release: {}", e);
        }
    }
}

impl<S> std::fmt::Debug for StreamLifecycleController<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamLifecycleController")
            .field("mode", &self.mode)
            .field("requested", &self.requested)
            .field("released", &self.released)
            .finish()
    }
}
