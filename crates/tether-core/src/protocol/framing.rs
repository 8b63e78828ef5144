//! Stream reassembly: turning TCP byte chunks into complete message lines.
//!
//! TCP is a *stream* protocol.  A single `read()` may return part of a line,
//! several lines, or the tail of one line followed by the head of the next.
//! [`LineReassembler`] accumulates bytes and hands out each complete line as
//! soon as its `\n` terminator has arrived.
//!
//! ```text
//! push(b"{\"cmd\":\"pi")        -> (nothing yet)
//! push(b"ng\"}\n{\"cmd\":\"q")  -> "{\"cmd\":\"ping\"}"
//! push(b"uit\"}\n")             -> "{\"cmd\":\"quit\"}"
//! ```
//!
//! Lines are trimmed; blank lines (keep-alive padding) are skipped.  Bytes are
//! only interpreted as UTF-8 once a whole line is present, so a multi-byte
//! character split across two reads is handled correctly.

use thiserror::Error;
use tracing::trace;

/// Default upper bound on a single line, terminator excluded.
///
/// Large enough for a base64 screen capture or a 10 MiB file download.
pub const DEFAULT_MAX_LINE_BYTES: usize = 32 * 1024 * 1024;

/// Problems with an individual line.
#[derive(Debug, Error, PartialEq)]
pub enum FrameError {
    /// The line is not valid UTF-8.  The line is skipped; the stream is intact.
    #[error("line is not valid UTF-8")]
    InvalidUtf8,

    /// A line grew past the configured limit.  The buffer is discarded and the
    /// stream can no longer be trusted.
    #[error("line exceeds the {limit}-byte limit")]
    LineTooLong { limit: usize },
}

/// Per-connection accumulator of bytes not yet resolved into lines.
#[derive(Debug)]
pub struct LineReassembler {
    buf: Vec<u8>,
    /// Prefix of `buf` already searched for a terminator.
    scanned: usize,
    max_line_bytes: usize,
}

impl Default for LineReassembler {
    fn default() -> Self {
        Self::new()
    }
}

impl LineReassembler {
    /// Creates a reassembler with [`DEFAULT_MAX_LINE_BYTES`].
    pub fn new() -> Self {
        Self::with_max_line_bytes(DEFAULT_MAX_LINE_BYTES)
    }

    /// Creates a reassembler that rejects lines longer than `max_line_bytes`.
    pub fn with_max_line_bytes(max_line_bytes: usize) -> Self {
        Self {
            buf: Vec::with_capacity(crate::READ_CHUNK_SIZE),
            scanned: 0,
            max_line_bytes,
        }
    }

    /// Appends `chunk` and returns an iterator over every line now complete.
    ///
    /// The iterator is lazy: each call to `next()` extracts one line from the
    /// buffer.  Drain it fully before the next `push`.
    pub fn push(&mut self, chunk: &[u8]) -> Lines<'_> {
        self.buf.extend_from_slice(chunk);
        Lines { inner: self }
    }

    /// Number of bytes waiting for a terminator.
    pub fn buffered_len(&self) -> usize {
        self.buf.len()
    }

    /// Ends the stream, discarding any unterminated trailing bytes.
    ///
    /// Returns how many bytes were discarded.
    pub fn finish(&mut self) -> usize {
        let discarded = self.buf.len();
        self.reset();
        discarded
    }

    fn reset(&mut self) {
        self.buf.clear();
        self.scanned = 0;
    }

    fn next_line(&mut self) -> Option<Result<String, FrameError>> {
        loop {
            let Some(pos) = self.buf[self.scanned..]
                .iter()
                .position(|&b| b == b'\n')
                .map(|i| i + self.scanned)
            else {
                self.scanned = self.buf.len();
                if self.buf.len() > self.max_line_bytes {
                    return Some(Err(self.overflow()));
                }
                return None;
            };

            if pos > self.max_line_bytes {
                return Some(Err(self.overflow()));
            }

            let raw: Vec<u8> = self.buf.drain(..=pos).collect();
            self.scanned = 0;

            match std::str::from_utf8(&raw[..pos]) {
                Ok(text) => {
                    let line = text.trim();
                    if line.is_empty() {
                        continue;
                    }
                    return Some(Ok(line.to_owned()));
                }
                Err(_) => return Some(Err(FrameError::InvalidUtf8)),
            }
        }
    }

    fn overflow(&mut self) -> FrameError {
        trace!(
            buffered = self.buf.len(),
            limit = self.max_line_bytes,
            "discarding oversized line"
        );
        self.reset();
        FrameError::LineTooLong {
            limit: self.max_line_bytes,
        }
    }
}

/// Iterator over the lines completed by one [`LineReassembler::push`].
pub struct Lines<'a> {
    inner: &'a mut LineReassembler,
}

impl Iterator for Lines<'_> {
    type Item = Result<String, FrameError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next_line()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    const STREAM: &[u8] = b"{\"cmd\":\"ping\"}\n\
        {\"cmd\":\"popup\",\"title\":\"caf\xc3\xa9\",\"message\":\"M\",\"type\":\"info\"}\n\
        \n\
        {\"type\":\"pong\",\"status\":\"ok\"}\r\n\
        {\"cmd\":\"quit\"}\n";

    fn expected() -> Vec<String> {
        vec![
            "{\"cmd\":\"ping\"}".to_string(),
            "{\"cmd\":\"popup\",\"title\":\"café\",\"message\":\"M\",\"type\":\"info\"}".to_string(),
            "{\"type\":\"pong\",\"status\":\"ok\"}".to_string(),
            "{\"cmd\":\"quit\"}".to_string(),
        ]
    }

    fn collect_with_splits(stream: &[u8], splits: &[usize]) -> Vec<String> {
        let mut r = LineReassembler::new();
        let mut out = Vec::new();
        let mut start = 0;
        for &end in splits.iter().chain(std::iter::once(&stream.len())) {
            for line in r.push(&stream[start..end]) {
                out.push(line.expect("valid line"));
            }
            start = end;
        }
        out
    }

    #[test]
    fn test_single_giant_chunk_yields_all_lines() {
        assert_eq!(collect_with_splits(STREAM, &[]), expected());
    }

    #[test]
    fn test_one_byte_at_a_time_yields_all_lines() {
        let splits: Vec<usize> = (1..STREAM.len()).collect();
        assert_eq!(collect_with_splits(STREAM, &splits), expected());
    }

    #[test]
    fn test_every_fixed_chunk_size_yields_identical_lines() {
        for size in 1..=STREAM.len() {
            let splits: Vec<usize> = (size..STREAM.len()).step_by(size).collect();
            assert_eq!(
                collect_with_splits(STREAM, &splits),
                expected(),
                "chunk size {size}"
            );
        }
    }

    #[test]
    fn test_pseudo_random_splits_yield_identical_lines() {
        // Small LCG so the test is deterministic without extra crates.
        let mut seed: u64 = 0x2545_F491_4F6C_DD1D;
        for _ in 0..200 {
            let mut splits = Vec::new();
            let mut pos = 0usize;
            loop {
                seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
                pos += 1 + (seed >> 33) as usize % 17;
                if pos >= STREAM.len() {
                    break;
                }
                splits.push(pos);
            }
            assert_eq!(collect_with_splits(STREAM, &splits), expected());
        }
    }

    #[test]
    fn test_buffer_holds_only_the_unterminated_tail() {
        // Arrange
        let mut r = LineReassembler::new();

        // Act
        let lines: Vec<_> = r.push(b"{\"cmd\":\"ping\"}\n{\"cmd\"").collect();

        // Assert
        assert_eq!(lines.len(), 1);
        assert_eq!(r.buffered_len(), "{\"cmd\"".len());
    }

    #[test]
    fn test_whitespace_only_lines_are_dropped() {
        let mut r = LineReassembler::new();
        let lines: Vec<_> = r.push(b"   \n\t\n\r\n{\"cmd\":\"ping\"}\n  \n").collect();
        assert_eq!(lines, vec![Ok("{\"cmd\":\"ping\"}".to_string())]);
        assert_eq!(r.buffered_len(), 0);
    }

    #[test]
    fn test_finish_discards_unterminated_content() {
        // Arrange
        let mut r = LineReassembler::new();
        assert_eq!(r.push(b"{\"cmd\":\"ping\"}").count(), 0);

        // Act
        let discarded = r.finish();

        // Assert
        assert_eq!(discarded, "{\"cmd\":\"ping\"}".len());
        assert_eq!(r.buffered_len(), 0);
    }

    #[test]
    fn test_invalid_utf8_line_is_reported_and_stream_continues() {
        let mut r = LineReassembler::new();
        let lines: Vec<_> = r.push(b"\xff\xfe\n{\"cmd\":\"ping\"}\n").collect();
        assert_eq!(
            lines,
            vec![
                Err(FrameError::InvalidUtf8),
                Ok("{\"cmd\":\"ping\"}".to_string())
            ]
        );
    }

    #[test]
    fn test_unterminated_line_over_limit_overflows_and_clears() {
        // Arrange
        let mut r = LineReassembler::with_max_line_bytes(8);

        // Act
        let lines: Vec<_> = r.push(b"0123456789").collect();

        // Assert
        assert_eq!(lines, vec![Err(FrameError::LineTooLong { limit: 8 })]);
        assert_eq!(r.buffered_len(), 0);
    }

    #[test]
    fn test_terminated_line_over_limit_overflows() {
        let mut r = LineReassembler::with_max_line_bytes(4);
        let lines: Vec<_> = r.push(b"ok\n0123456789\n").collect();
        assert_eq!(
            lines,
            vec![
                Ok("ok".to_string()),
                Err(FrameError::LineTooLong { limit: 4 })
            ]
        );
    }

    #[test]
    fn test_line_exactly_at_limit_is_accepted() {
        let mut r = LineReassembler::with_max_line_bytes(4);
        let lines: Vec<_> = r.push(b"abcd\n").collect();
        assert_eq!(lines, vec![Ok("abcd".to_string())]);
    }
}
