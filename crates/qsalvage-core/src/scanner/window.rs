//! Bounded sliding window over a byte stream.
//!
//! The scanner must handle segment files of arbitrary size without
//! holding a whole file in memory. [`SlidingWindow`] buffers a bounded
//! prefix of the stream, tracks the absolute offset of the first
//! buffered byte, and lets the scanner discard consumed bytes as the
//! search position advances.

use std::io::Read;

/// Default number of bytes pulled from the reader per refill
pub const DEFAULT_CHUNK_LEN: usize = 64 * 1024;

/// A bounded, forward-only window into a byte stream.
///
/// Bytes enter at the back via [`refill`](Self::refill) and leave at the
/// front via [`consume`](Self::consume). The window never rewinds; the
/// absolute stream offset of the front byte is available via
/// [`base`](Self::base).
#[derive(Debug)]
pub struct SlidingWindow<R> {
    reader: R,
    buf: Vec<u8>,
    base: u64,
    chunk_len: usize,
    eof: bool,
}

impl<R: Read> SlidingWindow<R> {
    /// Creates a window over the given reader with the default chunk size
    pub fn new(reader: R) -> Self {
        Self::with_chunk_len(reader, DEFAULT_CHUNK_LEN)
    }

    /// Creates a window with a custom refill chunk size (must be nonzero)
    pub fn with_chunk_len(reader: R, chunk_len: usize) -> Self {
        Self {
            reader,
            buf: Vec::new(),
            base: 0,
            chunk_len: chunk_len.max(1),
            eof: false,
        }
    }

    /// Absolute stream offset of the first buffered byte
    pub fn base(&self) -> u64 {
        self.base
    }

    /// The currently buffered bytes
    pub fn data(&self) -> &[u8] {
        &self.buf
    }

    /// Number of currently buffered bytes
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Returns true if no bytes are buffered
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Returns true once the underlying reader is exhausted.
    ///
    /// Buffered bytes may still remain after this turns true.
    pub fn is_eof(&self) -> bool {
        self.eof
    }

    /// Reads one chunk from the underlying stream into the window.
    ///
    /// Returns the number of bytes added; zero means end-of-stream.
    pub fn refill(&mut self) -> std::io::Result<usize> {
        if self.eof {
            return Ok(0);
        }

        let old_len = self.buf.len();
        self.buf.resize(old_len + self.chunk_len, 0);

        // Loop over short reads so a single refill call makes progress
        // proportional to the chunk size when data is available.
        let mut filled = 0;
        while filled < self.chunk_len {
            match self.reader.read(&mut self.buf[old_len + filled..]) {
                Ok(0) => {
                    self.eof = true;
                    break;
                }
                Ok(n) => filled += n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.buf.truncate(old_len + filled);
                    return Err(e);
                }
            }
        }

        self.buf.truncate(old_len + filled);
        Ok(filled)
    }

    /// Ensures at least `len` bytes are buffered, or that end-of-stream
    /// has been reached. Returns the buffered length.
    pub fn fill_to(&mut self, len: usize) -> std::io::Result<usize> {
        while self.buf.len() < len && !self.eof {
            self.refill()?;
        }
        Ok(self.buf.len())
    }

    /// Discards `n` bytes from the front of the window
    pub fn consume(&mut self, n: usize) {
        let n = n.min(self.buf.len());
        self.buf.drain(..n);
        self.base += n as u64;
    }
}
