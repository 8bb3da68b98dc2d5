//! HTTP proxy server module.
//!
//! This module provides the `/chat-completion` HTTP API, the canonical
//! request/response types, and the plumbing for upstream calls (SSE decoding,
//! connection retry).

mod handlers;
pub mod retry;
mod server;
pub mod stream;
pub mod types;

pub use handlers::{PROVIDER_HEADER, REQUEST_ID_HEADER};
pub use server::{create_router, run_server, AppState};
pub use stream::{CompletionStream, SseDecoder};
pub use types::{ChatMessage, CompletionRequest, CompletionResult, Role, StreamEvent};
