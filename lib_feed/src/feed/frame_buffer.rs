//! # Frame Buffer
//!
//! Reassembles one logical feed message from the physical WebSocket frames
//! that carry it. The buffer has a hard ceiling (5 MB by default); a message
//! that would grow past it is abandoned with `MessageTooLong`, the rest of its
//! fragments are skipped, and the next message starts from a clean buffer.
//!
//! The write cursor is the length of the underlying `BytesMut`. Completed
//! messages are split off as frozen `Bytes`, so the sniffer and decoder own
//! their bytes while the buffer is already accepting the next message.

use bytes::{Bytes, BytesMut};

use crate::feed::errors::FeedError;

/// Default receive ceiling: 5 MB.
pub const DEFAULT_MAX_MESSAGE_BYTES: usize = 5 * 1024 * 1024;

/// Allocation made up-front; the buffer grows on demand up to its ceiling.
const INITIAL_ALLOCATION: usize = 4 * 1024;

/// Fixed-ceiling accumulator for the in-flight message.
#[derive(Debug)]
pub struct FrameBuffer {
    buf: BytesMut,
    capacity: usize,
    /// Set after an overflow until the oversized message's final fragment arrives.
    discarding: bool,
}

impl FrameBuffer {
    /// Creates an empty buffer that never holds more than `capacity` bytes.
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(INITIAL_ALLOCATION.min(capacity)),
            capacity,
            discarding: false,
        }
    }

    /// The ceiling in bytes.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Current write cursor: bytes accumulated for the in-flight message.
    pub fn cursor(&self) -> usize {
        self.buf.len()
    }

    /// Free space left before the ceiling is hit.
    pub fn remaining(&self) -> usize {
        self.capacity - self.buf.len()
    }

    /// Whether the buffer is skipping the tail of an oversized message.
    pub fn is_discarding(&self) -> bool {
        self.discarding
    }

    /// How many bytes the next receive call should ask the transport for.
    ///
    /// Never zero: when the buffer is full, one more byte is requested so an
    /// oversized message is detected by `append` instead of stalling the read.
    pub fn receive_budget(&self) -> usize {
        if self.discarding {
            self.capacity
        } else {
            self.remaining().max(1)
        }
    }

    /// Advances the write cursor by `chunk.len()` bytes.
    ///
    /// Returns the remaining free capacity. If the advance would cross the
    /// ceiling, the in-flight message is dropped and `MessageTooLong` returned.
    pub fn append(&mut self, chunk: &[u8]) -> Result<usize, FeedError> {
        let fits = self
            .buf
            .len()
            .checked_add(chunk.len())
            .is_some_and(|next| next <= self.capacity);

        if !fits {
            self.abandon();
            return Err(FeedError::MessageTooLong {
                limit: self.capacity,
            });
        }

        self.buf.extend_from_slice(chunk);
        Ok(self.remaining())
    }

    /// Feeds one transport frame into the buffer.
    ///
    /// Returns `Ok(Some(bytes))` when `end_of_message` completes a message,
    /// `Ok(None)` while more fragments are needed (or while skipping the tail
    /// of an oversized message), and `Err(MessageTooLong)` exactly once per
    /// oversized message.
    pub fn push(&mut self, payload: &[u8], end_of_message: bool) -> Result<Option<Bytes>, FeedError> {
        if self.discarding {
            if end_of_message {
                self.discarding = false;
            }
            return Ok(None);
        }

        if let Err(err) = self.append(payload) {
            self.discarding = !end_of_message;
            return Err(err);
        }

        if end_of_message {
            Ok(Some(self.take_message()))
        } else {
            Ok(None)
        }
    }

    /// Hands out bytes `[0, cursor)` and resets the cursor to zero.
    pub fn take_message(&mut self) -> Bytes {
        self.buf.split().freeze()
    }

    /// Clears the in-flight message, keeping the allocation.
    pub fn reset(&mut self) {
        self.buf.clear();
        self.discarding = false;
    }

    // Oversized messages may have pushed the allocation up to the ceiling;
    // start over with a small one.
    fn abandon(&mut self) {
        self.buf = BytesMut::with_capacity(INITIAL_ALLOCATION.min(self.capacity));
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_MESSAGE_BYTES)
    }
}
