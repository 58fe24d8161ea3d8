//! Shared driver turning an HTTP byte stream into an [`LlmEvent`] stream.
//!
//! Each adapter supplies an [`SsePayloadParser`] that maps one SSE payload
//! to zero or more events; the driver owns the byte buffering, the
//! terminal-event bookkeeping, and end-of-stream handling. Once a terminal
//! event ([`LlmEvent::Done`] or [`LlmEvent::Error`]) is emitted the stream
//! ends; remaining bytes are dropped.

use std::collections::VecDeque;

use futures_util::stream::{self, StreamExt};

use openvia_types::LlmEvent;

use crate::adapter::LlmEventStream;
use crate::sse::SseLineBuffer;

/// Per-protocol payload parser.
pub(crate) trait SsePayloadParser: Send + 'static {
    /// Translate one SSE `data:` payload into events.
    fn on_payload(&mut self, payload: &str) -> Vec<LlmEvent>;

    /// The byte stream ended without a terminal event having been emitted.
    fn on_end(&mut self) -> Vec<LlmEvent>;
}

struct DriverState<P> {
    bytes: futures_util::stream::BoxStream<'static, reqwest::Result<bytes::Bytes>>,
    buffer: SseLineBuffer,
    parser: P,
    pending: VecDeque<LlmEvent>,
    finished: bool,
    source_done: bool,
}

/// Wrap an HTTP response body in a lazily-evaluated [`LlmEvent`] stream.
pub(crate) fn drive<P: SsePayloadParser>(response: reqwest::Response, parser: P) -> LlmEventStream {
    let state = DriverState {
        bytes: response.bytes_stream().boxed(),
        buffer: SseLineBuffer::new(),
        parser,
        pending: VecDeque::new(),
        finished: false,
        source_done: false,
    };

    Box::pin(stream::unfold(state, |mut state| async move {
        loop {
            if let Some(event) = state.pending.pop_front() {
                if matches!(event, LlmEvent::Done { .. } | LlmEvent::Error { .. }) {
                    state.finished = true;
                    state.pending.clear();
                }
                return Some((event, state));
            }

            if state.finished || state.source_done {
                return None;
            }

            match state.bytes.next().await {
                Some(Ok(chunk)) => {
                    for payload in state.buffer.push(&chunk) {
                        let events = state.parser.on_payload(&payload);
                        state.pending.extend(events);
                    }
                }
                Some(Err(e)) => {
                    state.source_done = true;
                    state.pending.push_back(LlmEvent::Error {
                        message: format!("stream read failed: {e}"),
                    });
                }
                None => {
                    state.source_done = true;
                    if let Some(payload) = state.buffer.finish() {
                        let events = state.parser.on_payload(&payload);
                        state.pending.extend(events);
                    }
                    let has_terminal = state
                        .pending
                        .iter()
                        .any(|e| matches!(e, LlmEvent::Done { .. } | LlmEvent::Error { .. }));
                    if !has_terminal {
                        state.pending.extend(state.parser.on_end());
                    }
                }
            }
        }
    }))
}

/// Build an event stream from already-buffered SSE text. Used by adapter
/// tests to exercise parsers without a live HTTP connection.
#[cfg(test)]
pub(crate) fn drive_text<P: SsePayloadParser>(text: &str, mut parser: P) -> Vec<LlmEvent> {
    let mut buffer = SseLineBuffer::new();
    let mut events = Vec::new();
    for payload in buffer.push(text.as_bytes()) {
        events.extend(parser.on_payload(&payload));
    }
    if let Some(payload) = buffer.finish() {
        events.extend(parser.on_payload(&payload));
    }
    let terminal_at = events
        .iter()
        .position(|e| matches!(e, LlmEvent::Done { .. } | LlmEvent::Error { .. }));
    match terminal_at {
        Some(idx) => events.truncate(idx + 1),
        None => events.extend(parser.on_end()),
    }
    events
}
