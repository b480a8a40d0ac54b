//! Byte source ownership and the close cascade.
//!
//! A [`SourceHandle`] carries the close duty for one underlying byte source:
//! however many cursor layers are stacked on top, the first close reaching the
//! handle releases the source, and every later close is a no-op. Closing is
//! never triggered by `Drop` — the caller owns the duty, and a release failure
//! is surfaced at the point of `close()`.

use std::io::{self, Read};
use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::cursor::TokenEvent;
use crate::error::{Location, ReadError, Result};

/// A single-use, sequential byte-producing resource.
///
/// `close` exists separately from `Drop` so that release failures are
/// observable and the release instant is deterministic.
pub trait ByteSource: Read + Send {
    fn close(&mut self) -> io::Result<()>;
}

impl ByteSource for std::fs::File {
    fn close(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<T: AsRef<[u8]> + Send> ByteSource for io::Cursor<T> {
    fn close(&mut self) -> io::Result<()> {
        Ok(())
    }
}

struct Slot {
    source: Option<Box<dyn ByteSource>>,
    closed: bool,
}

/// Shared handle over one [`ByteSource`]. Clones refer to the same slot, so
/// the close-exactly-once guarantee holds across every layer holding a clone.
#[derive(Clone)]
pub struct SourceHandle {
    slot: Arc<Mutex<Slot>>,
}

impl std::fmt::Debug for SourceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceHandle").finish_non_exhaustive()
    }
}

impl SourceHandle {
    pub fn new(source: impl ByteSource + 'static) -> Self {
        Self {
            slot: Arc::new(Mutex::new(Slot {
                source: Some(Box::new(source)),
                closed: false,
            })),
        }
    }

    /// Release the underlying source. The first call performs the release and
    /// reports any failure; subsequent calls are no-ops.
    pub fn close(&self) -> Result<()> {
        let mut slot = self
            .slot
            .lock()
            .map_err(|_| ReadError::Internal {
                details: "byte source slot poisoned".to_string(),
            })?;
        if slot.closed {
            return Ok(());
        }
        slot.closed = true;
        if let Some(mut source) = slot.source.take() {
            debug!("releasing byte source");
            source.close().map_err(|e| ReadError::ResourceRelease {
                details: e.to_string(),
            })?;
        }
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.slot.lock().map(|slot| slot.closed).unwrap_or(true)
    }
}

impl Read for SourceHandle {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut slot = self
            .slot
            .lock()
            .map_err(|_| io::Error::other("byte source slot poisoned"))?;
        match slot.source.as_mut() {
            Some(source) => source.read(buf),
            None => Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "read from closed byte source",
            )),
        }
    }
}

/// The seam every cursor layer implements: the plain tokenizer, the
/// validating wrapper, and the outward-facing bound handle.
pub trait EventCursor: Send {
    /// Pull the next structural event.
    fn next_event(&mut self) -> Result<TokenEvent>;

    /// Position of the most recent event, if the layer can report one.
    fn location(&self) -> Option<Location>;

    /// Release parser state and, for layers that own one, the byte source.
    /// Must be idempotent.
    fn close(&mut self) -> Result<()>;
}

/// The outward handle returned to a caller in cursor-pass-through mode.
///
/// Binds an event cursor to the originating byte source: the first `close()`
/// cascades through the inner layers and then releases the origin, whatever
/// wrapping sits in between. Never closes on drop.
pub struct BoundCursor {
    inner: Box<dyn EventCursor>,
    origin: SourceHandle,
    released: bool,
}

impl BoundCursor {
    pub fn bind(inner: Box<dyn EventCursor>, origin: SourceHandle) -> Self {
        Self {
            inner,
            origin,
            released: false,
        }
    }

    pub fn next_event(&mut self) -> Result<TokenEvent> {
        self.inner.next_event()
    }

    pub fn location(&self) -> Option<Location> {
        self.inner.location()
    }

    /// Close the cursor and the originating byte source. Idempotent: only the
    /// first call releases anything. The origin is released even when the
    /// inner layer fails to close, and the first error wins.
    pub fn close(&mut self) -> Result<()> {
        if self.released {
            return Ok(());
        }
        self.released = true;
        debug!("closing bound cursor, cascading to origin");
        let inner_result = self.inner.close();
        let origin_result = self.origin.close();
        inner_result?;
        origin_result
    }

    pub fn is_released(&self) -> bool {
        self.released
    }
}

impl EventCursor for BoundCursor {
    fn next_event(&mut self) -> Result<TokenEvent> {
        BoundCursor::next_event(self)
    }

    fn location(&self) -> Option<Location> {
        BoundCursor::location(self)
    }

    fn close(&mut self) -> Result<()> {
        BoundCursor::close(self)
    }
}
