//! Lock-free pool of reusable read buffers for the decode path.
//!
//! Parsing an envelope needs a scratch byte buffer per inbound frame.
//! Allocating one per message defeats the point of a steady-state,
//! zero-allocation dispatcher under bursty load, so buffers are recycled
//! through a bounded lock-free queue instead. The reset contract is the one
//! thing callers must honor: a buffer handed back via [`EnvelopePool::release`]
//! is cleared before re-entering the pool, so a subsequent acquire never
//! observes a previous message's bytes.

use crossbeam_queue::ArrayQueue;

/// A bounded pool of `Vec<u8>` scratch buffers.
pub struct EnvelopePool {
    queue: ArrayQueue<Vec<u8>>,
}

impl EnvelopePool {
    /// Create a pool that holds at most `capacity` idle buffers. Acquiring
    /// past that point simply allocates a fresh buffer; it is returned to
    /// the pool on release as long as there's room.
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: ArrayQueue::new(capacity.max(1)),
        }
    }

    /// Take a buffer from the pool, or allocate a new (empty) one if the
    /// pool is currently empty.
    pub fn acquire(&self) -> Vec<u8> {
        self.queue.pop().unwrap_or_default()
    }

    /// Return a buffer to the pool after clearing it. If the pool is full
    /// the buffer is simply dropped.
    pub fn release(&self, mut buf: Vec<u8>) {
        buf.clear();
        let _ = self.queue.push(buf);
    }

    /// Number of buffers currently idle in the pool.
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}
