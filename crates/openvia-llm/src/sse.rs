//! SSE framing shared by all three streaming adapters.
//!
//! Providers deliver responses as Server-Sent Events: `data:` lines carrying
//! JSON payloads, separated by blank lines, optionally terminated with a
//! `data: [DONE]` sentinel. [`SseLineBuffer`] accumulates raw bytes as they
//! arrive and yields complete `data:` payloads; comment, `event:`, `id:`
//! and `retry:` lines are skipped.

/// The sentinel payload that marks the end of an SSE stream.
pub const DONE_SENTINEL: &str = "[DONE]";

/// Incremental line buffer over an SSE byte stream.
///
/// Bytes may arrive split at arbitrary boundaries; `push` consumes a chunk
/// and returns the `data:` payloads completed by it. A trailing partial
/// line stays buffered until the next chunk (or [`SseLineBuffer::finish`]).
#[derive(Debug, Default)]
pub struct SseLineBuffer {
    buf: String,
}

impl SseLineBuffer {
    /// Create an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk of bytes; returns the `data:` payloads it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buf.push_str(&String::from_utf8_lossy(chunk));

        let mut payloads = Vec::new();
        while let Some(pos) = self.buf.find('\n') {
            let line: String = self.buf.drain(..=pos).collect();
            if let Some(payload) = extract_data_payload(&line) {
                payloads.push(payload);
            }
        }
        payloads
    }

    /// Flush any trailing unterminated line at end of stream.
    pub fn finish(&mut self) -> Option<String> {
        let line = std::mem::take(&mut self.buf);
        extract_data_payload(&line)
    }
}

/// Extract the payload from a single SSE line, or `None` for lines that
/// carry no data (blank separators, comments, `event:`/`id:`/`retry:`).
fn extract_data_payload(line: &str) -> Option<String> {
    let line = line.trim_end_matches(['\n', '\r']);

    if line.is_empty() || line.starts_with(':') {
        return None;
    }

    let payload = line.strip_prefix("data:")?.trim_start();
    if payload.is_empty() {
        return None;
    }
    Some(payload.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_data_line() {
        let mut buf = SseLineBuffer::new();
        let payloads = buf.push(b"data: {\"x\":1}\n\n");
        assert_eq!(payloads, vec![r#"{"x":1}"#]);
    }

    #[test]
    fn split_across_chunks() {
        let mut buf = SseLineBuffer::new();
        assert!(buf.push(b"data: {\"he").is_empty());
        let payloads = buf.push(b"llo\":true}\n");
        assert_eq!(payloads, vec![r#"{"hello":true}"#]);
    }

    #[test]
    fn crlf_line_endings() {
        let mut buf = SseLineBuffer::new();
        let payloads = buf.push(b"data: {\"a\":1}\r\n\r\ndata: [DONE]\r\n");
        assert_eq!(payloads, vec![r#"{"a":1}"#.to_string(), DONE_SENTINEL.to_string()]);
    }

    #[test]
    fn skips_comments_and_event_lines() {
        let mut buf = SseLineBuffer::new();
        let payloads =
            buf.push(b": keepalive\nevent: message\nid: 7\nretry: 500\ndata: {\"b\":2}\n");
        assert_eq!(payloads, vec![r#"{"b":2}"#]);
    }

    #[test]
    fn empty_data_payload_skipped() {
        let mut buf = SseLineBuffer::new();
        assert!(buf.push(b"data:\ndata: \n").is_empty());
    }

    #[test]
    fn done_sentinel_no_space() {
        let mut buf = SseLineBuffer::new();
        let payloads = buf.push(b"data:[DONE]\n");
        assert_eq!(payloads, vec![DONE_SENTINEL]);
    }

    #[test]
    fn multiple_payloads_in_one_chunk() {
        let mut buf = SseLineBuffer::new();
        let payloads = buf.push(b"data: 1\n\ndata: 2\n\ndata: 3\n");
        assert_eq!(payloads, vec!["1", "2", "3"]);
    }

    #[test]
    fn finish_flushes_trailing_line() {
        let mut buf = SseLineBuffer::new();
        assert!(buf.push(b"data: {\"tail\":1}").is_empty());
        assert_eq!(buf.finish().as_deref(), Some(r#"{"tail":1}"#));
        assert!(buf.finish().is_none());
    }
}
