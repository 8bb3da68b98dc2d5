//! Upstream SSE decoding.
//!
//! [`SseDecoder`] reassembles Server-Sent Events across TCP chunk boundaries.
//! [`completion_stream`] drives an upstream response body through the decoder
//! and the provider's [`WireFormat`], yielding canonical [`StreamEvent`]s.

use bytes::Bytes;
use futures::stream::{self, BoxStream};
use futures::StreamExt;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use super::types::StreamEvent;
use crate::error::ProxyError;
use crate::router::wire::{UpstreamEvent, WireFormat};

/// A streamed completion: deltas followed by one `Done`, or an error.
pub type CompletionStream = BoxStream<'static, Result<StreamEvent, ProxyError>>;

/// Line-buffered SSE parser that yields the `data` payload of each event.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    data: Vec<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw bytes, returning the payloads of every event completed by them.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(bytes);

        let mut payloads = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line[..line.len() - 1]);
            self.process_line(line.trim_end_matches('\r'), &mut payloads);
        }
        payloads
    }

    /// Treat end of input as the end of the last line and the last event.
    pub fn flush(&mut self) -> Vec<String> {
        let mut payloads = Vec::new();
        if !self.buffer.is_empty() {
            let rest = std::mem::take(&mut self.buffer);
            let line = String::from_utf8_lossy(&rest);
            self.process_line(line.trim_end_matches('\r'), &mut payloads);
        }
        self.dispatch(&mut payloads);
        payloads
    }

    fn process_line(&mut self, line: &str, payloads: &mut Vec<String>) {
        if line.is_empty() {
            self.dispatch(payloads);
            return;
        }

        // `event:`, `id:`, `retry:` and `:` comments carry nothing we use.
        if let Some(value) = line.strip_prefix("data:") {
            let value = value.strip_prefix(' ').unwrap_or(value);
            self.data.push(value.to_string());
        }
    }

    fn dispatch(&mut self, payloads: &mut Vec<String>) {
        if !self.data.is_empty() {
            payloads.push(self.data.join("\n"));
            self.data.clear();
        }
    }
}

struct StreamState {
    body: BoxStream<'static, reqwest::Result<Bytes>>,
    decoder: SseDecoder,
    format: Arc<dyn WireFormat>,
    provider: String,
    model: String,
    usage: Value,
    idle_timeout: Duration,
    pending: VecDeque<Result<StreamEvent, ProxyError>>,
    finished: bool,
}

impl StreamState {
    fn absorb(&mut self, payloads: Vec<String>) {
        for payload in payloads {
            let events = self.format.stream_events(&payload);
            for event in events {
                if self.finished {
                    return;
                }
                match event {
                    UpstreamEvent::Delta(content) => {
                        self.pending.push_back(Ok(StreamEvent::Delta { content }))
                    }
                    UpstreamEvent::Model(model) => self.model = model,
                    UpstreamEvent::Usage(usage) => merge_usage(&mut self.usage, usage),
                    UpstreamEvent::Done => self.complete(),
                    UpstreamEvent::Error(message) => self.fail(ProxyError::Upstream {
                        provider: self.provider.clone(),
                        status: None,
                        message,
                    }),
                }
            }
        }
    }

    fn complete(&mut self) {
        if !self.finished {
            tracing::debug!(provider = %self.provider, model = %self.model, "Stream completed");
            self.pending.push_back(Ok(StreamEvent::Done {
                usage: self.usage.clone(),
                model: self.model.clone(),
            }));
            self.finished = true;
        }
    }

    fn fail(&mut self, err: ProxyError) {
        if !self.finished {
            tracing::error!(provider = %self.provider, error = %err, "Stream failed");
            self.pending.push_back(Err(err));
            self.finished = true;
        }
    }
}

/// Usage objects arriving in pieces (Claude reports input and output tokens
/// in separate events) are merged key by key.
fn merge_usage(acc: &mut Value, update: Value) {
    if let Value::Object(fields) = update {
        if let Value::Object(existing) = acc {
            existing.extend(fields);
            return;
        }
        *acc = Value::Object(fields);
    } else {
        *acc = update;
    }
}

/// Turn a successful upstream streaming response into canonical events.
///
/// Each read from the body is bounded by `idle_timeout`. Dropping the returned
/// stream drops the upstream connection.
pub fn completion_stream(
    response: reqwest::Response,
    format: Arc<dyn WireFormat>,
    provider: &str,
    requested_model: &str,
    idle_timeout: Duration,
) -> CompletionStream {
    let state = StreamState {
        body: response.bytes_stream().boxed(),
        decoder: SseDecoder::new(),
        format,
        provider: provider.to_string(),
        model: requested_model.to_string(),
        usage: Value::Null,
        idle_timeout,
        pending: VecDeque::new(),
        finished: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(item) = state.pending.pop_front() {
                return Some((item, state));
            }
            if state.finished {
                return None;
            }

            match tokio::time::timeout(state.idle_timeout, state.body.next()).await {
                Ok(Some(Ok(bytes))) => {
                    let payloads = state.decoder.push(&bytes);
                    state.absorb(payloads);
                }
                Ok(Some(Err(source))) => state.fail(ProxyError::Transport {
                    provider: state.provider.clone(),
                    source,
                }),
                Ok(None) => {
                    let payloads = state.decoder.flush();
                    state.absorb(payloads);
                    state.complete();
                }
                Err(_) => state.fail(ProxyError::Timeout {
                    provider: state.provider.clone(),
                    after: state.idle_timeout,
                }),
            }
        }
    })
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    /// Build SSE data from event lines, then split at the given byte positions.
    fn split_sse_at_positions(events: &[&str], split_positions: &[usize]) -> Vec<Vec<u8>> {
        let full: Vec<u8> = events
            .iter()
            .flat_map(|e| format!("{}\n\n", e).into_bytes())
            .collect();

        let mut chunks = Vec::new();
        let mut prev = 0;
        for &pos in split_positions {
            if pos > prev && pos < full.len() {
                chunks.push(full[prev..pos].to_vec());
                prev = pos;
            }
        }
        chunks.push(full[prev..].to_vec());
        chunks
    }

    fn decode_all(chunks: &[Vec<u8>]) -> Vec<String> {
        let mut decoder = SseDecoder::new();
        let mut payloads = Vec::new();
        for chunk in chunks {
            payloads.extend(decoder.push(chunk));
        }
        payloads.extend(decoder.flush());
        payloads
    }

    const EVENTS: [&str; 3] = [
        r#"data: {"choices":[{"delta":{"content":"Hello"}}]}"#,
        r#"data: {"choices":[{"delta":{"content":" world"}}]}"#,
        "data: [DONE]",
    ];

    #[test]
    fn test_single_chunk() {
        let chunks = split_sse_at_positions(&EVENTS, &[]);
        let payloads = decode_all(&chunks);
        assert_eq!(payloads.len(), 3);
        assert_eq!(payloads[2], "[DONE]");
    }

    #[test]
    fn test_split_anywhere_decodes_identically() {
        let whole = decode_all(&split_sse_at_positions(&EVENTS, &[]));
        let total: usize = EVENTS.iter().map(|e| e.len() + 2).sum();
        for pos in 1..total {
            let chunks = split_sse_at_positions(&EVENTS, &[pos]);
            assert_eq!(decode_all(&chunks), whole, "split at {}", pos);
        }
    }

    #[test]
    fn test_byte_by_byte() {
        let whole = decode_all(&split_sse_at_positions(&EVENTS, &[]));
        let total: usize = EVENTS.iter().map(|e| e.len() + 2).sum();
        let positions: Vec<usize> = (1..total).collect();
        assert_eq!(
            decode_all(&split_sse_at_positions(&EVENTS, &positions)),
            whole
        );
    }

    #[test]
    fn test_crlf_event_and_comment_lines() {
        let mut decoder = SseDecoder::new();
        let payloads = decoder.push(
            b": keep-alive\r\nevent: content_block_delta\r\ndata: {\"a\":1}\r\n\r\n",
        );
        assert_eq!(payloads, vec![r#"{"a":1}"#.to_string()]);
    }

    #[test]
    fn test_multiline_data_joined() {
        let mut decoder = SseDecoder::new();
        let payloads = decoder.push(b"data: first\ndata: second\n\n");
        assert_eq!(payloads, vec!["first\nsecond".to_string()]);
    }

    #[test]
    fn test_flush_without_trailing_newline() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(b"data: [DONE]").is_empty());
        assert_eq!(decoder.flush(), vec!["[DONE]".to_string()]);
    }

    #[test]
    fn test_merge_usage() {
        let mut usage = Value::Null;
        merge_usage(&mut usage, json!({"input_tokens": 9, "output_tokens": 1}));
        merge_usage(&mut usage, json!({"output_tokens": 12}));
        assert_eq!(usage, json!({"input_tokens": 9, "output_tokens": 12}));
    }
}
