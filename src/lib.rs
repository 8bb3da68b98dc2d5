//! chatrelay - one chat-completion API in front of several LLM providers
//!
//! This library provides the core functionality for the chatrelay proxy,
//! including configuration, provider routing, and the HTTP boundary.

pub mod config;
pub mod error;
pub mod proxy;
pub mod router;

pub use config::Config;
pub use error::{ProxyError, Result};
pub use router::CompletionRouter;
