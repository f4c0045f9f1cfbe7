//! Line Framing
//!
//! Turns arbitrarily fragmented response bytes into complete protocol lines.
//!
//! # Frame Format
//!
//! ```text
//! data: {"type":"token","content":"Hel"}\n
//! \n
//! data: [DONE]\n
//! \n
//! ```
//!
//! A line is only complete once its terminating `\n` has arrived. Fragments
//! from the transport carry no boundary information, so a single line may be
//! spread over many fragments, and a fragment may end inside a multi-byte
//! UTF-8 sequence. Bytes are buffered untouched and only converted to text
//! once the whole line is present.
//!
//! A line that grows past the decoder's limit without a newline is an error:
//! the peer is not speaking the protocol, and buffering would be unbounded.

use thiserror::Error;

/// Default maximum line length (10MB)
pub const MAX_LINE_SIZE: usize = 10 * 1024 * 1024;

/// Minimum buffer capacity for decoder
const MIN_BUFFER_CAPACITY: usize = 4096;

/// Framing errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    /// An unterminated line exceeded the maximum line length
    #[error("Line of {len} bytes exceeds maximum {max} without a newline")]
    LineTooLong {
        /// Bytes buffered for the line so far
        len: usize,
        /// The decoder's limit
        max: usize,
    },
}

/// Decoder state machine for newline-delimited framing
///
/// Buffers incoming bytes and yields complete lines. The only state is the
/// carry-over of bytes that have not yet been terminated by a newline.
#[derive(Debug)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
    /// Position where we've consumed up to
    read_pos: usize,
    /// Position up to which the buffer is known to contain no newline
    scan_pos: usize,
    /// Longest line accepted
    max_line: usize,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDecoder {
    /// Create a new decoder with default buffer capacity
    #[must_use]
    pub fn new() -> Self {
        Self {
            buffer: Vec::with_capacity(MIN_BUFFER_CAPACITY),
            read_pos: 0,
            scan_pos: 0,
            max_line: MAX_LINE_SIZE,
        }
    }

    /// Set the maximum line length
    #[must_use]
    pub fn with_max_line(mut self, max: usize) -> Self {
        self.max_line = max.max(1);
        self
    }

    /// Get the maximum line length
    #[must_use]
    pub fn max_line(&self) -> usize {
        self.max_line
    }

    /// Append a raw fragment to the buffer
    pub fn push(&mut self, data: &[u8]) {
        // Compact buffer if we've consumed a lot
        if self.read_pos > self.buffer.len() / 2 && self.read_pos > MIN_BUFFER_CAPACITY {
            self.buffer.drain(..self.read_pos);
            self.scan_pos -= self.read_pos;
            self.read_pos = 0;
        }
        self.buffer.extend_from_slice(data);
    }

    /// Get the number of unterminated bytes held in the buffer
    #[must_use]
    pub fn pending(&self) -> usize {
        self.buffer.len() - self.read_pos
    }

    /// Try to take the next complete line
    ///
    /// Returns `Ok(None)` when the buffer holds no terminated line. The
    /// newline and an optional preceding `\r` are stripped.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::LineTooLong`] if a line exceeds the maximum
    /// length. The buffer is cleared; the decoder should not be reused.
    pub fn next_line(&mut self) -> Result<Option<String>, FrameError> {
        let start = self.scan_pos.max(self.read_pos);
        let Some(offset) = self.buffer[start..].iter().position(|&b| b == b'\n') else {
            self.scan_pos = self.buffer.len();
            let len = self.pending();
            if len > self.max_line {
                self.clear();
                return Err(FrameError::LineTooLong {
                    len,
                    max: self.max_line,
                });
            }
            return Ok(None);
        };

        let end = start + offset;
        let len = end - self.read_pos;
        if len > self.max_line {
            self.clear();
            return Err(FrameError::LineTooLong {
                len,
                max: self.max_line,
            });
        }

        let mut line = &self.buffer[self.read_pos..end];
        if let Some(stripped) = line.strip_suffix(b"\r") {
            line = stripped;
        }
        let text = String::from_utf8_lossy(line).into_owned();

        self.read_pos = end + 1;
        self.scan_pos = self.read_pos;
        Ok(Some(text))
    }

    /// Push a fragment and drain every line it completes
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::LineTooLong`] if a line exceeds the maximum
    /// length.
    pub fn decode(&mut self, data: &[u8]) -> Result<Vec<String>, FrameError> {
        self.push(data);
        let mut lines = Vec::new();
        while let Some(line) = self.next_line()? {
            lines.push(line);
        }
        Ok(lines)
    }

    /// End of input: discard any unterminated remainder
    ///
    /// Returns the number of bytes discarded. A trailing partial line is not
    /// a complete message and is never emitted.
    pub fn finish(&mut self) -> usize {
        let discarded = self.pending();
        if discarded > 0 {
            tracing::debug!(bytes = discarded, "Discarding unterminated stream tail");
        }
        self.clear();
        discarded
    }

    /// Clear the buffer
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.read_pos = 0;
        self.scan_pos = 0;
    }
}
