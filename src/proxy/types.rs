//! Canonical request and response types shared by every provider.

use serde::{Deserialize, Serialize};

use crate::config::ApiKey;

/// Author of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub const ALL: [Role; 3] = [Role::User, Role::Assistant, Role::System];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }
}

/// A chat message.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }
}

/// Body of `POST /chat-completion`.
///
/// `model` and `provider` are optional at the type level so that a request
/// missing them is rejected by validation with the uniform error envelope
/// instead of a deserialization failure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CompletionRequest {
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub stream: bool,
    /// Caller-supplied key; takes precedence over server-side keys.
    #[serde(default, rename = "userApiKey")]
    pub user_api_key: Option<ApiKey>,
}

impl CompletionRequest {
    pub fn new(provider: &str, model: &str, messages: Vec<ChatMessage>) -> Self {
        Self {
            messages,
            model: Some(model.to_string()),
            provider: Some(provider.to_string()),
            stream: false,
            user_api_key: None,
        }
    }

    pub fn with_user_api_key(mut self, key: impl Into<ApiKey>) -> Self {
        self.user_api_key = Some(key.into());
        self
    }

    pub fn streaming(mut self) -> Self {
        self.stream = true;
        self
    }

    /// Provider id trimmed of whitespace, `None` when absent or blank.
    pub fn provider_id(&self) -> Option<&str> {
        non_blank(self.provider.as_deref())
    }

    /// Model id trimmed of whitespace, `None` when absent or blank.
    pub fn model_id(&self) -> Option<&str> {
        non_blank(self.model.as_deref())
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|s| !s.is_empty())
}

/// Provider-independent result of a completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionResult {
    pub content: String,
    /// Upstream usage object passed through untouched (`null` when absent).
    #[serde(rename = "usage")]
    pub usage_metrics: serde_json::Value,
    #[serde(rename = "model")]
    pub model_echoed: String,
}

/// One event of a streamed completion as delivered to the caller.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StreamEvent {
    /// Incremental piece of assistant text.
    Delta { content: String },
    /// Terminal event carrying the totals reported upstream.
    Done {
        usage: serde_json::Value,
        model: String,
    },
}
