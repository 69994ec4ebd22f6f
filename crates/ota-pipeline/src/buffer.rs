//! Chunk buffer
//!
//! Bounded FIFO between the transport (producer) and the update pipeline
//! (single consumer). The producer side never blocks: a chunk that does not
//! fit is rejected and the caller decides what to do with it. The consumer
//! waits for the next chunk with an upper bound.

use core::ops::Deref;
use core::sync::atomic::{AtomicUsize, Ordering};

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::channel::{Channel, TrySendError};
use embassy_time::{Duration, with_timeout};
use heapless::Vec;

use crate::error::OtaError;

/// Firmware bytes delivered by one transport callback.
pub type Chunk<const MAX_CHUNK: usize> = Vec<u8, MAX_CHUNK>;

/// Reason a chunk was not accepted by [`ChunkBuffer::put`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutError {
    /// No free slot; the chunk was not stored
    Full { pending: usize },
    /// The chunk is larger than a single slot
    Oversized { len: usize, max: usize },
}

/// Fixed-capacity chunk queue holding at most `SLOTS` chunks of up to
/// `MAX_CHUNK` bytes each.
pub struct ChunkBuffer<M: RawMutex, const MAX_CHUNK: usize, const SLOTS: usize> {
    queue: Channel<M, Chunk<MAX_CHUNK>, SLOTS>,
    pending: AtomicUsize,
}

impl<M: RawMutex, const MAX_CHUNK: usize, const SLOTS: usize> ChunkBuffer<M, MAX_CHUNK, SLOTS> {
    pub const fn new() -> Self {
        Self {
            queue: Channel::new(),
            pending: AtomicUsize::new(0),
        }
    }

    /// Capacity in bytes.
    pub const fn capacity(&self) -> usize {
        MAX_CHUNK * SLOTS
    }

    /// Bytes accepted but not yet released by the consumer.
    pub fn pending_bytes(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    /// Store a copy of `bytes` as one chunk. Never blocks.
    ///
    /// On success returns `bytes.len()`. An empty slice is accepted without
    /// occupying a slot. A chunk is refused while the bytes already
    /// accepted, including a chunk held by the consumer, would push the
    /// buffer past [`capacity`](Self::capacity).
    pub fn put(&self, bytes: &[u8]) -> Result<usize, PutError> {
        if bytes.is_empty() {
            return Ok(0);
        }
        let len = bytes.len();
        let Ok(chunk) = Chunk::<MAX_CHUNK>::from_slice(bytes) else {
            return Err(PutError::Oversized {
                len,
                max: MAX_CHUNK,
            });
        };

        // Reserve before sending so the consumer can never release more than
        // was accounted for.
        let capacity = self.capacity();
        if let Err(pending) =
            self.pending
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |pending| {
                    (pending + len <= capacity).then_some(pending + len)
                })
        {
            return Err(PutError::Full { pending });
        }
        match self.queue.try_send(chunk) {
            Ok(()) => Ok(len),
            Err(TrySendError::Full(_)) => {
                let pending = self.pending.fetch_sub(len, Ordering::AcqRel) - len;
                Err(PutError::Full { pending })
            }
        }
    }

    /// Wait up to `max_wait` for the oldest chunk.
    ///
    /// The chunk stays accounted to the buffer until the returned grant is
    /// released or dropped.
    pub async fn take(
        &self,
        max_wait: Duration,
    ) -> Result<ChunkGrant<'_, M, MAX_CHUNK, SLOTS>, OtaError> {
        let chunk = with_timeout(max_wait, self.queue.receive())
            .await
            .map_err(|_| OtaError::ChunkTimeout)?;
        Ok(ChunkGrant {
            chunk,
            buffer: self,
        })
    }

    fn release(&self, len: usize) {
        self.pending.fetch_sub(len, Ordering::AcqRel);
    }
}

impl<M: RawMutex, const MAX_CHUNK: usize, const SLOTS: usize> Default
    for ChunkBuffer<M, MAX_CHUNK, SLOTS>
{
    fn default() -> Self {
        Self::new()
    }
}

/// A chunk taken from the buffer. Releases its share of the buffer capacity
/// when dropped.
pub struct ChunkGrant<'a, M: RawMutex, const MAX_CHUNK: usize, const SLOTS: usize> {
    chunk: Chunk<MAX_CHUNK>,
    buffer: &'a ChunkBuffer<M, MAX_CHUNK, SLOTS>,
}

impl<M: RawMutex, const MAX_CHUNK: usize, const SLOTS: usize> ChunkGrant<'_, M, MAX_CHUNK, SLOTS> {
    /// Return the chunk's storage to the buffer.
    pub fn release(self) {}
}

impl<M: RawMutex, const MAX_CHUNK: usize, const SLOTS: usize> Deref
    for ChunkGrant<'_, M, MAX_CHUNK, SLOTS>
{
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        &self.chunk
    }
}

impl<M: RawMutex, const MAX_CHUNK: usize, const SLOTS: usize> Drop
    for ChunkGrant<'_, M, MAX_CHUNK, SLOTS>
{
    fn drop(&mut self) {
        self.buffer.release(self.chunk.len());
    }
}
