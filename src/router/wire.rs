//! Provider wire formats.
//!
//! A [`WireFormat`] owns everything that differs between upstream dialects:
//! how messages and request bodies are shaped, how a completed response is
//! read back into a [`CompletionResult`], how error bodies are read, and how
//! streamed events are interpreted. Providers that share a dialect share an
//! implementation (openai and mistral both use [`OpenAiFormat`]).

use serde_json::{json, Value};

use crate::config::WireFormatKind;
use crate::proxy::types::{ChatMessage, CompletionResult, Role};

/// Output ceiling sent with every Claude request; the Messages API requires the field.
pub const CLAUDE_MAX_TOKENS: u32 = 4000;

/// Placeholder used when an upstream error body carries no readable message.
pub const UNKNOWN_UPSTREAM_ERROR: &str = "unknown error";

/// Something an upstream stream told us, in dialect-independent terms.
#[derive(Debug, Clone, PartialEq)]
pub enum UpstreamEvent {
    Delta(String),
    Model(String),
    Usage(Value),
    Done,
    Error(String),
}

/// Request/response dialect of an upstream API.
pub trait WireFormat: Send + Sync + std::fmt::Debug {
    fn kind(&self) -> WireFormatKind;

    /// Role name as the upstream expects it.
    fn role_name(&self, role: Role) -> &'static str;

    /// Inverse of [`WireFormat::role_name`].
    fn role_from_upstream(&self, name: &str) -> Option<Role> {
        Role::ALL
            .into_iter()
            .find(|role| self.role_name(*role) == name)
    }

    /// Translate canonical messages into the upstream message list, preserving order.
    fn to_upstream(&self, messages: &[ChatMessage]) -> Vec<Value> {
        messages
            .iter()
            .map(|m| json!({ "role": self.role_name(m.role), "content": m.content }))
            .collect()
    }

    /// Full JSON body of the upstream call.
    fn request_body(&self, model: &str, messages: &[ChatMessage], stream: bool) -> Value;

    /// Normalize a successful response body. Never fails: absent fields
    /// become empty content, `null` usage, and the requested model.
    fn from_upstream(&self, body: &Value, requested_model: &str) -> CompletionResult;

    /// Extract the human-readable message from an upstream error body.
    fn error_message(&self, body: &Value) -> Option<String> {
        let error = body.get("error");
        error
            .and_then(|e| e.get("message"))
            .and_then(Value::as_str)
            .or_else(|| error.and_then(Value::as_str))
            .or_else(|| body.get("message").and_then(Value::as_str))
            .map(str::to_string)
    }

    /// Interpret the payload of one SSE `data:` line.
    fn stream_events(&self, data: &str) -> Vec<UpstreamEvent>;
}

fn echoed_model(body: &Value, requested_model: &str) -> String {
    body.get("model")
        .and_then(Value::as_str)
        .unwrap_or(requested_model)
        .to_string()
}

fn usage_of(body: &Value) -> Value {
    body.get("usage").cloned().unwrap_or(Value::Null)
}

/// OpenAI `/chat/completions` dialect, shared by Mistral.
#[derive(Debug, Clone, Default)]
pub struct OpenAiFormat {
    /// Ask for a trailing usage chunk on streamed responses (`stream_options.include_usage`).
    pub stream_usage: bool,
}

impl OpenAiFormat {
    pub fn new(stream_usage: bool) -> Self {
        Self { stream_usage }
    }
}

impl WireFormat for OpenAiFormat {
    fn kind(&self) -> WireFormatKind {
        WireFormatKind::Openai
    }

    fn role_name(&self, role: Role) -> &'static str {
        role.as_str()
    }

    fn request_body(&self, model: &str, messages: &[ChatMessage], stream: bool) -> Value {
        let mut body = json!({
            "model": model,
            "messages": self.to_upstream(messages),
            "stream": stream,
        });
        if stream && self.stream_usage {
            body["stream_options"] = json!({ "include_usage": true });
        }
        body
    }

    fn from_upstream(&self, body: &Value, requested_model: &str) -> CompletionResult {
        let content = body
            .pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        CompletionResult {
            content,
            usage_metrics: usage_of(body),
            model_echoed: echoed_model(body, requested_model),
        }
    }

    fn stream_events(&self, data: &str) -> Vec<UpstreamEvent> {
        if data.trim() == "[DONE]" {
            return vec![UpstreamEvent::Done];
        }

        let Ok(chunk) = serde_json::from_str::<Value>(data) else {
            tracing::debug!(data = %data, "Skipping non-JSON stream line");
            return Vec::new();
        };

        if chunk.get("error").is_some() {
            let message = self
                .error_message(&chunk)
                .unwrap_or_else(|| UNKNOWN_UPSTREAM_ERROR.to_string());
            return vec![UpstreamEvent::Error(message)];
        }

        let mut events = Vec::new();
        if let Some(model) = chunk.get("model").and_then(Value::as_str) {
            events.push(UpstreamEvent::Model(model.to_string()));
        }
        if let Some(text) = chunk
            .pointer("/choices/0/delta/content")
            .and_then(Value::as_str)
        {
            if !text.is_empty() {
                events.push(UpstreamEvent::Delta(text.to_string()));
            }
        }
        if let Some(usage) = chunk.get("usage").filter(|u| !u.is_null()) {
            events.push(UpstreamEvent::Usage(usage.clone()));
        }
        events
    }
}

/// Anthropic Messages API dialect.
///
/// `user` is sent as `human`; system messages stay inline in the message list.
#[derive(Debug, Clone)]
pub struct ClaudeFormat {
    pub max_tokens: u32,
}

impl Default for ClaudeFormat {
    fn default() -> Self {
        Self {
            max_tokens: CLAUDE_MAX_TOKENS,
        }
    }
}

impl WireFormat for ClaudeFormat {
    fn kind(&self) -> WireFormatKind {
        WireFormatKind::Claude
    }

    fn role_name(&self, role: Role) -> &'static str {
        match role {
            Role::User => "human",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }

    fn request_body(&self, model: &str, messages: &[ChatMessage], stream: bool) -> Value {
        json!({
            "model": model,
            "messages": self.to_upstream(messages),
            "max_tokens": self.max_tokens,
            "stream": stream,
        })
    }

    fn from_upstream(&self, body: &Value, requested_model: &str) -> CompletionResult {
        let content = body
            .pointer("/content/0/text")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        CompletionResult {
            content,
            usage_metrics: usage_of(body),
            model_echoed: echoed_model(body, requested_model),
        }
    }

    fn stream_events(&self, data: &str) -> Vec<UpstreamEvent> {
        let Ok(event) = serde_json::from_str::<Value>(data) else {
            tracing::debug!(data = %data, "Skipping non-JSON stream line");
            return Vec::new();
        };

        match event.get("type").and_then(Value::as_str) {
            Some("message_start") => {
                let message = event.get("message").cloned().unwrap_or(Value::Null);
                let mut events = Vec::new();
                if let Some(model) = message.get("model").and_then(Value::as_str) {
                    events.push(UpstreamEvent::Model(model.to_string()));
                }
                if let Some(usage) = message.get("usage").filter(|u| !u.is_null()) {
                    events.push(UpstreamEvent::Usage(usage.clone()));
                }
                events
            }
            Some("content_block_delta") => event
                .pointer("/delta/text")
                .and_then(Value::as_str)
                .filter(|text| !text.is_empty())
                .map(|text| vec![UpstreamEvent::Delta(text.to_string())])
                .unwrap_or_default(),
            Some("message_delta") => event
                .get("usage")
                .filter(|u| !u.is_null())
                .map(|usage| vec![UpstreamEvent::Usage(usage.clone())])
                .unwrap_or_default(),
            Some("message_stop") => vec![UpstreamEvent::Done],
            Some("error") => vec![UpstreamEvent::Error(
                self.error_message(&event)
                    .unwrap_or_else(|| UNKNOWN_UPSTREAM_ERROR.to_string()),
            )],
            _ => Vec::new(),
        }
    }
}
