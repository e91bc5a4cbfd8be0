//! Wire protocol: newline-delimited request/response framing.
//!
//! Requests are single lines of the form `"offset,count"`. Responses are
//! comma-joined word lists, optionally carrying the in-band `EOF` token when
//! the end of the word list is reached, each terminated by a single newline.
//!
//! `RecvBuffer` handles reassembly of lines from a TCP byte stream: partial
//! reads are retained until the terminating newline arrives, and multiple
//! lines delivered in one read are all surfaced.

use bytes::{Buf, BytesMut};

/// In-band token signaling that no further words remain.
pub const EOF_TOKEN: &str = "EOF";

/// A parsed chunk request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Request {
    /// Starting index into the word list.
    pub offset: usize,
    /// Maximum number of words requested.
    pub count: usize,
}

impl Request {
    /// A request past the end of any word list. Serving it yields a bare
    /// `EOF` response, so malformed lines can be answered in submission
    /// order through the normal scheduling path.
    pub const END: Request = Request {
        offset: usize::MAX,
        count: 1,
    };
}

/// Parse one trimmed request line.
///
/// Returns `None` for malformed lines: wrong field count, non-integer
/// fields, or a zero count. Malformed lines are answered with `EOF` by the
/// server rather than treated as fatal.
pub fn parse_request(line: &str) -> Option<Request> {
    let (offset, count) = line.split_once(',')?;
    if count.contains(',') {
        return None;
    }
    let offset: usize = offset.trim().parse().ok()?;
    let count: usize = count.trim().parse().ok()?;
    if count == 0 {
        return None;
    }
    Some(Request { offset, count })
}

/// Encode one response record.
///
/// Words are joined with commas. When `reached_end` is set the `EOF` token
/// is appended (as `",EOF"` after words, or bare `"EOF"` when there are
/// none). Exactly one trailing newline terminates the record.
pub fn encode_response(words: &[String], reached_end: bool) -> Vec<u8> {
    let mut out = String::with_capacity(words.iter().map(|w| w.len() + 1).sum::<usize>() + 8);
    out.push_str(&words.join(","));
    if reached_end {
        if !out.is_empty() {
            out.push(',');
        }
        out.push_str(EOF_TOKEN);
    }
    out.push('\n');
    out.into_bytes()
}

/// Check whether a response line carries the end-of-data token.
pub fn line_has_eof(line: &str) -> bool {
    line.split(',').any(|tok| tok.trim() == EOF_TOKEN)
}

/// Per-connection receive accumulator.
///
/// Bytes are appended as they arrive; complete newline-terminated lines are
/// drained out, and any trailing partial line stays buffered for the next
/// read.
#[derive(Debug, Default)]
pub struct RecvBuffer {
    buf: BytesMut,
}

impl RecvBuffer {
    /// Create an empty buffer.
    pub fn new() -> Self {
        Self {
            buf: BytesMut::with_capacity(4096),
        }
    }

    /// Append freshly read bytes.
    pub fn feed(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Drain every complete line currently buffered.
    ///
    /// Lines are decoded lossily, trimmed of surrounding whitespace
    /// (including `\r`), and lines that are empty after trimming are
    /// silently skipped.
    pub fn take_lines(&mut self) -> Vec<String> {
        let mut lines = Vec::new();
        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let line = self.buf.split_to(pos + 1);
            let text = String::from_utf8_lossy(&line[..pos]);
            let trimmed = text.trim();
            if !trimmed.is_empty() {
                lines.push(trimmed.to_string());
            }
        }
        // Reclaim capacity after a burst of pipelined requests
        if self.buf.is_empty() && self.buf.capacity() > 64 * 1024 {
            self.buf = BytesMut::with_capacity(4096);
        }
        lines
    }

    /// Bytes held in the partial-line tail.
    pub fn pending_len(&self) -> usize {
        self.buf.remaining()
    }

    /// Discard any buffered partial line.
    pub fn clear(&mut self) {
        self.buf.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn owned(words: &[&str]) -> Vec<String> {
        words.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_request() {
        assert_eq!(
            parse_request("0,5"),
            Some(Request {
                offset: 0,
                count: 5
            })
        );
        assert_eq!(
            parse_request("120, 7"),
            Some(Request {
                offset: 120,
                count: 7
            })
        );
    }

    #[test]
    fn test_parse_request_malformed() {
        assert_eq!(parse_request("abc"), None);
        assert_eq!(parse_request("1,2,3"), None);
        assert_eq!(parse_request("x,5"), None);
        assert_eq!(parse_request("5,y"), None);
        assert_eq!(parse_request("-1,5"), None);
        assert_eq!(parse_request("3,0"), None);
        assert_eq!(parse_request(""), None);
    }

    #[test]
    fn test_encode_mid_list() {
        let words = owned(&["cat", "bat", "cat", "dog", "dog"]);
        assert_eq!(encode_response(&words, false), b"cat,bat,cat,dog,dog\n");
    }

    #[test]
    fn test_encode_end_with_words() {
        let words = owned(&["emu", "emu", "emu", "ant"]);
        assert_eq!(encode_response(&words, true), b"emu,emu,emu,ant,EOF\n");
    }

    #[test]
    fn test_encode_end_without_words() {
        assert_eq!(encode_response(&[], true), b"EOF\n");
    }

    #[test]
    fn test_encode_empty_not_end() {
        assert_eq!(encode_response(&[], false), b"\n");
    }

    #[test]
    fn test_line_has_eof() {
        assert!(line_has_eof("EOF"));
        assert!(line_has_eof("emu,ant,EOF"));
        assert!(!line_has_eof("emu,ant"));
        // EOF must be its own token, not a substring of a word
        assert!(!line_has_eof("NOTEOF,ant"));
    }

    #[test]
    fn test_recv_buffer_partial_then_complete() {
        let mut buf = RecvBuffer::new();
        buf.feed(b"0,");
        assert!(buf.take_lines().is_empty());
        assert_eq!(buf.pending_len(), 2);
        buf.feed(b"5\n12,5\n");
        assert_eq!(buf.take_lines(), vec!["0,5", "12,5"]);
        assert_eq!(buf.pending_len(), 0);
    }

    #[test]
    fn test_recv_buffer_retains_tail() {
        let mut buf = RecvBuffer::new();
        buf.feed(b"0,5\n10,");
        assert_eq!(buf.take_lines(), vec!["0,5"]);
        buf.feed(b"5\n");
        assert_eq!(buf.take_lines(), vec!["10,5"]);
    }

    #[test]
    fn test_recv_buffer_skips_blank_lines() {
        let mut buf = RecvBuffer::new();
        buf.feed(b"\n   \n0,5\r\n");
        assert_eq!(buf.take_lines(), vec!["0,5"]);
    }
}
