//! Fixed-capacity queue of received bus operations.
//!
//! Operations received from the host in one event are pushed here during
//! ingestion and consumed while the schedule advances. Each element slot
//! has a fixed byte budget ([`ELEMENT_SIZE`]); operations whose framed length
//! exceeds it are rejected rather than truncated, and so are pushes into a
//! full queue.
//!
//! # Example
//!
//! ```ignore
//! use flexray_sim::ring_buffer::RingBuffer;
//!
//! let mut queue = RingBuffer::new();
//! if queue.push(op).is_err() {
//!     log::warn!("operation dropped");
//! }
//! while let Some(op) = queue.peek() {
//!     // inspect, then
//!     queue.pop();
//! }
//! ```

use alloc::vec::Vec;

use crate::wire::Framed;

/// Byte budget of a single queued operation.
pub const ELEMENT_SIZE: usize = 128;

/// Number of operations the queue can hold.
pub const ELEMENT_COUNT: usize = 1024;

/// A circular queue with an arena of slots, head and tail indices and an
/// element count.
#[derive(Debug, Clone)]
pub struct RingBuffer<T> {
    slots: Vec<Option<T>>,
    head: usize,
    tail: usize,
    count: usize,
}

impl<T: Framed> RingBuffer<T> {
    /// Create a queue with [`ELEMENT_COUNT`] slots.
    pub fn new() -> Self {
        Self::with_capacity(ELEMENT_COUNT)
    }

    /// Create a queue with a custom number of slots.
    pub fn with_capacity(capacity: usize) -> Self {
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        Self {
            slots,
            head: 0,
            tail: 0,
            count: 0,
        }
    }

    /// Append an operation at the tail.
    ///
    /// Hands the operation back if the queue is full or the operation is
    /// larger than [`ELEMENT_SIZE`].
    pub fn push(&mut self, op: T) -> Result<(), T> {
        if self.is_full() || op.framed_len() > ELEMENT_SIZE {
            return Err(op);
        }
        self.slots[self.tail] = Some(op);
        self.tail = self.wrap(self.tail + 1);
        self.count += 1;
        Ok(())
    }

    /// The oldest queued operation, if any.
    pub fn peek(&self) -> Option<&T> {
        if self.is_empty() {
            return None;
        }
        self.slots[self.head].as_ref()
    }

    /// Remove and return the oldest queued operation.
    pub fn pop(&mut self) -> Option<T> {
        if self.is_empty() {
            return None;
        }
        let op = self.slots[self.head].take();
        self.head = self.wrap(self.head + 1);
        self.count -= 1;
        op
    }

    /// Number of queued operations.
    pub fn len(&self) -> usize {
        self.count
    }

    /// Whether the queue holds no operation.
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Whether another push would be rejected for lack of space.
    pub fn is_full(&self) -> bool {
        self.count == self.slots.len()
    }

    /// Total number of slots.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Drop every queued operation.
    pub fn clear(&mut self) {
        while self.pop().is_some() {}
    }

    #[inline]
    fn wrap(&self, index: usize) -> usize {
        if index == self.slots.len() { 0 } else { index }
    }
}

impl<T: Framed> Default for RingBuffer<T> {
    fn default() -> Self {
        Self::new()
    }
}
