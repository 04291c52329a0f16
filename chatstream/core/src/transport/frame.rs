//! Line Framing
//!
//! Splits a server-push response body into lines and extracts payloads.
//!
//! # Wire Format
//!
//! ```text
//! : keep-alive comment          <- discarded
//! data: {"choices":[...]}       <- payload `{"choices":[...]}`
//!                               <- blank, discarded
//! data:[DONE]                   <- payload `[DONE]`
//! plain text line               <- payload as-is
//! ```
//!
//! Lines end in `\n` or `\r\n`. A trailing line without a terminator is
//! still delivered once the body ends.
//!
//! # Security
//!
//! - Maximum line size is enforced to prevent memory exhaustion
//! - Multi-byte characters split across chunks are reassembled before
//!   decoding, never replaced

use thiserror::Error;

/// Maximum line size (1 MB)
pub const MAX_LINE_SIZE: usize = 1024 * 1024;

/// Minimum buffer capacity for decoder
const MIN_BUFFER_CAPACITY: usize = 4096;

/// Payload field prefix
const DATA_PREFIX: &str = "data:";

/// Framing failure
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    /// No line terminator within [`MAX_LINE_SIZE`] bytes
    #[error("line of {len} bytes exceeds maximum {max}")]
    LineTooLong {
        /// Bytes buffered without a terminator
        len: usize,
        /// Configured limit
        max: usize,
    },
}

/// Extract the payload from one line
///
/// Returns `None` for empty lines and `:` comments. A leading `data:` is
/// stripped together with the whitespace after it; any other line is the
/// payload unchanged.
#[must_use]
pub fn parse_line(line: &str) -> Option<&str> {
    if line.is_empty() || line.starts_with(':') {
        return None;
    }
    match line.strip_prefix(DATA_PREFIX) {
        Some(rest) => Some(rest.trim_start()),
        None => Some(line),
    }
}

/// Decoder state machine for streaming line parsing
///
/// Buffers incoming bytes and yields complete lines.
#[derive(Debug)]
pub struct LineDecoder {
    buffer: Vec<u8>,
    /// Position where we've consumed up to
    read_pos: usize,
    /// Bytes before this position hold no terminator
    scan_pos: usize,
}

impl Default for LineDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl LineDecoder {
    /// Create a new decoder with default buffer capacity
    #[must_use]
    pub fn new() -> Self {
        Self {
            buffer: Vec::with_capacity(MIN_BUFFER_CAPACITY),
            read_pos: 0,
            scan_pos: 0,
        }
    }

    /// Append bytes to the buffer
    pub fn push(&mut self, data: &[u8]) {
        // Compact buffer if we've consumed a lot
        if self.read_pos > self.buffer.len() / 2 && self.read_pos > MIN_BUFFER_CAPACITY {
            self.buffer.drain(..self.read_pos);
            self.scan_pos -= self.read_pos;
            self.read_pos = 0;
        }
        self.buffer.extend_from_slice(data);
    }

    /// Get the number of bytes available in the buffer
    #[must_use]
    pub fn available(&self) -> usize {
        self.buffer.len() - self.read_pos
    }

    /// Try to take the next complete line, without its terminator
    ///
    /// Returns:
    /// - `Ok(Some(line))` if a terminated line was buffered
    /// - `Ok(None)` if more data is needed
    /// - `Err(FrameError::LineTooLong)` if the pending line exceeds the limit
    pub fn next_line(&mut self) -> Result<Option<String>, FrameError> {
        let unscanned = &self.buffer[self.scan_pos..];
        let Some(offset) = unscanned.iter().position(|&b| b == b'\n') else {
            self.scan_pos = self.buffer.len();
            let pending = self.available();
            if pending > MAX_LINE_SIZE {
                return Err(FrameError::LineTooLong {
                    len: pending,
                    max: MAX_LINE_SIZE,
                });
            }
            return Ok(None);
        };

        let end = self.scan_pos + offset;
        let line = decode_line(&self.buffer[self.read_pos..end]);
        self.read_pos = end + 1;
        self.scan_pos = self.read_pos;
        Ok(Some(line))
    }

    /// Take whatever is left once the body has ended
    ///
    /// Returns `None` when nothing is buffered.
    pub fn finish(&mut self) -> Option<String> {
        if self.available() == 0 {
            self.clear();
            return None;
        }
        let line = decode_line(&self.buffer[self.read_pos..]);
        self.clear();
        Some(line)
    }

    /// Clear the buffer
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.read_pos = 0;
        self.scan_pos = 0;
    }
}

fn decode_line(raw: &[u8]) -> String {
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    String::from_utf8_lossy(raw).into_owned()
}
