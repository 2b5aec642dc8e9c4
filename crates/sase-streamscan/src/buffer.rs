//! Sliding window buffer
//!
//! Keeps only the most recent `window_size` bytes of an unbounded stream.
//! Storage is allocated once at the cap and never grows past it.

/// Bounded trailing window over a byte stream
#[derive(Debug, Clone)]
pub struct SlidingWindowBuffer {
    buf: Vec<u8>,
    window_size: usize,
    total_appended: u64,
}

impl SlidingWindowBuffer {
    pub fn new(window_size: usize) -> Self {
        Self {
            buf: Vec::with_capacity(window_size),
            window_size,
            total_appended: 0,
        }
    }

    /// Append a chunk, evicting the oldest bytes beyond the cap
    pub fn append(&mut self, chunk: &[u8]) {
        if chunk.is_empty() {
            return;
        }
        self.total_appended += chunk.len() as u64;

        if chunk.len() >= self.window_size {
            self.buf.clear();
            self.buf
                .extend_from_slice(&chunk[chunk.len() - self.window_size..]);
            return;
        }

        let overflow = (self.buf.len() + chunk.len()).saturating_sub(self.window_size);
        if overflow > 0 {
            self.buf.drain(..overflow);
        }
        self.buf.extend_from_slice(chunk);
    }

    /// Current window contents, oldest byte first
    #[inline]
    pub fn snapshot(&self) -> &[u8] {
        &self.buf
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }

    /// Bytes that have passed through the window since creation
    pub fn total_appended(&self) -> u64 {
        self.total_appended
    }
}
