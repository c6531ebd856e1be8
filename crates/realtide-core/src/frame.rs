//! Incremental decoder for the `text/event-stream` wire format.
//!
//! Frames are groups of `field: value` lines terminated by a blank line:
//!
//! ```text
//! event: posts/*
//! id: 42
//! data: {"action":"create",
//! data:  "record":{"id":"r1"}}
//!
//! ```
//!
//! Bytes may arrive split at any point, including inside a line or a UTF-8
//! sequence; nothing is decoded until its line terminator has been seen.

use std::collections::VecDeque;

use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Event name used when a frame carries no `event:` field.
pub const DEFAULT_EVENT: &str = "message";

/// One decoded frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    /// Event name; doubles as the topic key for dispatch.
    pub event: String,
    /// Last `id:` value of the frame, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Parsed `data:` payload. Non-JSON text is wrapped as `{"raw": "..."}`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Stateful line/frame decoder.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: Vec<u8>,
    event: Option<String>,
    data: String,
    id: Option<String>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk of bytes and return every frame it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<EventRecord> {
        self.buf.extend_from_slice(chunk);

        let mut records = Vec::new();
        let mut start = 0;
        while let Some(pos) = self.buf[start..].iter().position(|b| *b == b'\n') {
            let end = start + pos;
            let mut raw = &self.buf[start..end];
            if let [rest @ .., b'\r'] = raw {
                raw = rest;
            }
            let line = String::from_utf8_lossy(raw).into_owned();
            start = end + 1;

            if let Some(record) = self.process_line(&line) {
                records.push(record);
            }
        }
        self.buf.drain(..start);
        records
    }

    /// Bytes received after the last line terminator.
    pub fn pending_bytes(&self) -> usize {
        self.buf.len()
    }

    fn process_line(&mut self, line: &str) -> Option<EventRecord> {
        if line.is_empty() {
            return self.finish_frame();
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => self.event = (!value.is_empty()).then(|| value.to_string()),
            "data" => {
                self.data.push_str(value);
                self.data.push('\n');
            }
            "id" => self.id = Some(value.to_string()),
            _ => {}
        }
        None
    }

    /// Every blank line ends a frame, including one with no fields; that
    /// yields a bare `message` record without payload.
    fn finish_frame(&mut self) -> Option<EventRecord> {
        let data = std::mem::take(&mut self.data);
        Some(EventRecord {
            event: self
                .event
                .take()
                .unwrap_or_else(|| DEFAULT_EVENT.to_string()),
            id: self.id.take(),
            data: parse_payload(&data),
        })
    }
}

fn parse_payload(data: &str) -> Option<Value> {
    if data.is_empty() {
        return None;
    }
    let text = data.strip_suffix('\n').unwrap_or(data);
    Some(serde_json::from_str(text).unwrap_or_else(|_| json!({ "raw": text })))
}

/// Adapt a byte stream into a stream of decoded frames.
///
/// The output ends when the input ends. Input errors are passed through
/// unchanged; the caller decides whether to keep reading.
pub fn decode_stream<S, B, E>(input: S) -> impl Stream<Item = Result<EventRecord, E>>
where
    S: Stream<Item = Result<B, E>> + Unpin,
    B: AsRef<[u8]>,
{
    let state = (input, FrameDecoder::new(), VecDeque::new());
    futures::stream::unfold(state, |(mut input, mut decoder, mut ready)| async move {
        loop {
            if let Some(record) = ready.pop_front() {
                return Some((Ok(record), (input, decoder, ready)));
            }
            match input.next().await {
                Some(Ok(chunk)) => ready.extend(decoder.push(chunk.as_ref())),
                Some(Err(e)) => return Some((Err(e), (input, decoder, ready))),
                None => return None,
            }
        }
    })
}
