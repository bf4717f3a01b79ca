//! Line framing for the serial command stream.
//!
//! Commands arrive as an unbounded byte stream and are split on `\n`. Carriage
//! returns are dropped as they arrive, and trailing spaces are stripped from
//! each completed line. Empty lines are never emitted.

use std::collections::VecDeque;

use bytes::BytesMut;

/// Maximum command line length, including the terminator.
pub const MAX_LINE_LENGTH: usize = 1024;

/// A framer that turns raw serial bytes into command lines.
///
/// The accumulation buffer holds at most `max_len - 1` bytes. When a byte
/// other than a terminator arrives while the buffer is full, the partial line
/// is discarded and the byte starts a new accumulation. The discarded bytes
/// are lost silently and the tail of an oversized line is framed as a line of
/// its own on the next `\n`; callers that care can watch
/// [`LineFramer::overflows`].
///
/// The capacity check runs only for bytes that would extend the line, so a
/// line of exactly `max_len - 1` bytes followed by `\n` is still emitted. A
/// framer that checks before every byte, terminator included, would drop it.
#[derive(Debug)]
pub struct LineFramer {
    /// Bytes of the line currently being received.
    buffer: BytesMut,
    /// Completed lines waiting to be taken.
    ready: VecDeque<String>,
    /// Line capacity including the terminator.
    max_len: usize,
    /// Number of partial lines dropped because the buffer filled up.
    overflows: u64,
}

impl Default for LineFramer {
    fn default() -> Self {
        Self::new()
    }
}

impl LineFramer {
    /// Create a framer with the default [`MAX_LINE_LENGTH`].
    pub fn new() -> Self {
        Self::with_max_len(MAX_LINE_LENGTH)
    }

    /// Create a framer with a custom line capacity.
    ///
    /// `max_len` counts the terminator, so it must be at least 2.
    pub fn with_max_len(max_len: usize) -> Self {
        let max_len = max_len.max(2);
        LineFramer {
            buffer: BytesMut::with_capacity(max_len),
            ready: VecDeque::new(),
            max_len,
            overflows: 0,
        }
    }

    /// Feed received bytes into the framer.
    pub fn push(&mut self, data: &[u8]) {
        for &byte in data {
            match byte {
                b'\n' => self.finish_line(),
                b'\r' => {}
                _ => {
                    if self.buffer.len() >= self.max_len - 1 {
                        log::warn!(
                            "line buffer overflow: dropping {} bytes without a newline",
                            self.buffer.len()
                        );
                        self.buffer.clear();
                        self.overflows += 1;
                    }
                    self.buffer.extend_from_slice(&[byte]);
                }
            }
        }
    }

    /// Take the next complete line, if any.
    pub fn decode_line(&mut self) -> Option<String> {
        self.ready.pop_front()
    }

    /// Number of bytes of the line currently being accumulated.
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Number of partial lines dropped on overflow since creation.
    pub fn overflows(&self) -> u64 {
        self.overflows
    }

    /// Discard the partial line and any lines not yet taken.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.ready.clear();
    }

    fn finish_line(&mut self) {
        let raw = self.buffer.split();
        let line = String::from_utf8_lossy(&raw);
        let line = line.trim_end_matches(' ');
        if !line.is_empty() {
            self.ready.push_back(line.to_string());
        }
    }
}

/// Encode a line for transmission, appending the `\n` terminator.
pub fn encode_line(line: &str) -> Vec<u8> {
    let mut buf = Vec::with_capacity(line.len() + 1);
    buf.extend_from_slice(line.as_bytes());
    buf.push(b'\n');
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_line() {
        let mut framer = LineFramer::new();
        framer.push(b"commissioner_start\n");
        assert_eq!(framer.decode_line(), Some("commissioner_start".to_string()));
        assert!(framer.decode_line().is_none());
    }

    #[test]
    fn test_crlf_and_trailing_spaces() {
        let mut framer = LineFramer::new();
        framer.push(b"FORM_NET home  \r\n");
        assert_eq!(framer.decode_line(), Some("FORM_NET home".to_string()));
    }

    #[test]
    fn test_partial_line_across_reads() {
        let mut framer = LineFramer::new();
        framer.push(b"add * ");
        assert!(framer.decode_line().is_none());
        assert_eq!(framer.buffered_len(), 6);

        framer.push(b"J01NME|ab\nfactory");
        assert_eq!(framer.decode_line(), Some("add * J01NME|ab".to_string()));
        assert!(framer.decode_line().is_none());
        assert_eq!(framer.buffered_len(), 7);
    }

    #[test]
    fn test_empty_lines_discarded() {
        let mut framer = LineFramer::new();
        framer.push(b"\n\r\n   \ncommissioner_stop\n");
        assert_eq!(framer.decode_line(), Some("commissioner_stop".to_string()));
        assert!(framer.decode_line().is_none());
    }

    #[test]
    fn test_overflow_drops_partial_line_and_recovers() {
        let mut framer = LineFramer::new();
        framer.push(&[b'a'; 1500]);
        assert_eq!(framer.overflows(), 1);
        assert!(framer.buffered_len() < MAX_LINE_LENGTH);

        framer.push(b"\ncommissioner_start\n");
        // The tail of the oversized line is framed on its own.
        let tail = framer.decode_line().unwrap();
        assert_eq!(tail.len(), 1500 - (MAX_LINE_LENGTH - 1));
        assert!(tail.bytes().all(|b| b == b'a'));
        assert_eq!(framer.decode_line(), Some("commissioner_start".to_string()));
    }

    #[test]
    fn test_line_at_capacity_is_kept() {
        let mut framer = LineFramer::with_max_len(8);
        framer.push(b"1234567\n");
        assert_eq!(framer.decode_line(), Some("1234567".to_string()));
        assert_eq!(framer.overflows(), 0);
    }

    #[test]
    fn test_full_buffer_then_newline_is_emitted() {
        let mut framer = LineFramer::new();
        framer.push(&[b'a'; MAX_LINE_LENGTH - 1]);
        assert_eq!(framer.buffered_len(), MAX_LINE_LENGTH - 1);

        framer.push(b"\ncommissioner_stop\n");
        assert_eq!(framer.decode_line().map(|l| l.len()), Some(MAX_LINE_LENGTH - 1));
        assert_eq!(framer.decode_line(), Some("commissioner_stop".to_string()));
        assert_eq!(framer.overflows(), 0);
    }

    #[test]
    fn test_encode_line() {
        assert_eq!(encode_line("NETWORK_FORMED"), b"NETWORK_FORMED\n");
    }
}
