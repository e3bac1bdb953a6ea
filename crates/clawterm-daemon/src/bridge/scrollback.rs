//! Bounded rolling copy of recent terminal output.

use std::collections::VecDeque;

use bytes::Bytes;

/// FIFO byte buffer that keeps at most `capacity` trailing bytes.
#[derive(Debug)]
pub struct ScrollbackBuffer {
    buf: VecDeque<u8>,
    capacity: usize,
}

impl ScrollbackBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: VecDeque::with_capacity(capacity.min(64 * 1024)),
            capacity,
        }
    }

    /// Append a chunk, evicting the oldest bytes past the cap.
    pub fn append(&mut self, chunk: &[u8]) {
        if chunk.len() >= self.capacity {
            self.buf.clear();
            self.buf.extend(&chunk[chunk.len() - self.capacity..]);
            return;
        }
        let overflow = (self.buf.len() + chunk.len()).saturating_sub(self.capacity);
        self.buf.drain(..overflow);
        self.buf.extend(chunk);
    }

    /// Copy of the current contents.
    pub fn snapshot(&self) -> Bytes {
        let (front, back) = self.buf.as_slices();
        let mut out = Vec::with_capacity(self.buf.len());
        out.extend_from_slice(front);
        out.extend_from_slice(back);
        Bytes::from(out)
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub const fn capacity(&self) -> usize {
        self.capacity
    }
}
