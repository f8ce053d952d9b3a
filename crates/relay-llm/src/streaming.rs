//! SSE decoding for vendor streaming responses.
//!
//! Bytes are buffered until a `\n\n` event boundary and decoded there, so a
//! multi-byte UTF-8 character split across HTTP chunks survives intact.

use bytes::Bytes;
use futures::stream::{self, StreamExt};
use futures::Stream;
use std::collections::VecDeque;
use std::fmt::Display;
use std::future::Future;
use std::pin::Pin;

use crate::TextStream;
use relay_types::Result;

/// Max SSE buffer size (1MB) before a stream is abandoned as malformed.
const MAX_BUFFER_SIZE: usize = 1_048_576;

/// What a vendor parser extracted from one SSE `data:` payload.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum SseEvent {
    Text(String),
    Done,
    Error(String),
}

/// Vendor-specific decoding of one `data:` payload.
pub(crate) type EventParser = fn(&str) -> Vec<SseEvent>;

/// Build a fragment stream from a pending connection.
///
/// Nothing happens until the stream is first polled. A connection failure
/// becomes the single `"Error: …"` fragment.
pub(crate) fn text_stream<F>(connect: F, parse: EventParser) -> TextStream
where
    F: Future<Output = Result<reqwest::Response>> + Send + 'static,
{
    stream::once(connect)
        .flat_map(move |result| match result {
            Ok(resp) => fragments(resp.bytes_stream(), parse),
            Err(e) => error_stream(e),
        })
        .boxed()
}

pub(crate) fn error_stream(err: impl Display) -> TextStream {
    stream::once(futures::future::ready(format!("Error: {err}"))).boxed()
}

// ---------------------------------------------------------------------------
// SSE state machine
// ---------------------------------------------------------------------------

struct SseState<S> {
    bytes: Pin<Box<S>>,
    buffer: Vec<u8>,
    pending: VecDeque<String>,
    parse: EventParser,
    finished: bool,
}

impl<S> SseState<S> {
    fn push_chunk(&mut self, chunk: &[u8]) {
        self.buffer
            .extend(chunk.iter().copied().filter(|b| *b != b'\r'));

        if self.buffer.len() > MAX_BUFFER_SIZE {
            tracing::error!(limit = MAX_BUFFER_SIZE, "SSE buffer exceeded limit, aborting");
            self.fail("stream buffer limit exceeded");
            return;
        }

        while !self.finished {
            let Some(pos) = find_double_newline(&self.buffer) else {
                break;
            };
            let event: Vec<u8> = self.buffer.drain(..pos + 2).collect();
            self.dispatch(&event[..pos]);
        }
    }

    /// Handle whatever is left once the body ends without a trailing boundary.
    fn flush(&mut self) {
        if !self.finished && !self.buffer.is_empty() {
            let event = std::mem::take(&mut self.buffer);
            self.dispatch(&event);
        }
        self.finished = true;
    }

    fn dispatch(&mut self, event: &[u8]) {
        let block = String::from_utf8_lossy(event);
        let data = block
            .lines()
            .filter_map(|line| line.strip_prefix("data:"))
            .map(|d| d.strip_prefix(' ').unwrap_or(d))
            .collect::<Vec<_>>()
            .join("\n");

        if data.is_empty() {
            return;
        }

        for event in (self.parse)(&data) {
            match event {
                SseEvent::Text(text) if !text.is_empty() => self.pending.push_back(text),
                SseEvent::Text(_) => {}
                SseEvent::Done => {
                    self.finished = true;
                    return;
                }
                SseEvent::Error(message) => {
                    self.fail(message);
                    return;
                }
            }
        }
    }

    fn fail(&mut self, message: impl Display) {
        self.pending.push_back(format!("Error: {message}"));
        self.buffer.clear();
        self.finished = true;
    }
}

/// Decode an SSE byte stream into text fragments using `parse`.
///
/// The returned stream owns `bytes`; dropping it releases the connection.
pub(crate) fn fragments<S, E>(bytes: S, parse: EventParser) -> TextStream
where
    S: Stream<Item = std::result::Result<Bytes, E>> + Send + 'static,
    E: Display + Send,
{
    let state = SseState {
        bytes: Box::pin(bytes),
        buffer: Vec::new(),
        pending: VecDeque::new(),
        parse,
        finished: false,
    };

    stream::unfold(state, |mut st| async move {
        loop {
            if let Some(text) = st.pending.pop_front() {
                return Some((text, st));
            }
            if st.finished {
                return None;
            }
            match st.bytes.next().await {
                Some(Ok(chunk)) => st.push_chunk(&chunk),
                Some(Err(e)) => {
                    tracing::warn!(error = %e, "SSE read error");
                    st.fail(e);
                }
                None => st.flush(),
            }
        }
    })
    .boxed()
}

fn find_double_newline(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\n\n")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
