//! Router module for provider dispatch.
//!
//! This module turns a canonical completion request into exactly one call to
//! the selected provider:
//! - Provider lookup in a registry of profiles (endpoint, auth, wire format)
//! - Credential resolution (caller key, then server-side keys)
//! - Message and response translation per wire format

pub mod completion;
pub mod credentials;
pub mod registry;
pub mod wire;

pub use completion::{CompletionRouter, RouterSettings};
pub use credentials::{CredentialResolver, EnvCredentials, StaticCredentials};
pub use registry::{
    builtin_profile, is_builtin_provider, AuthScheme, ProviderProfile, ProviderRegistry,
    BUILTIN_PROVIDERS,
};
pub use wire::{ClaudeFormat, OpenAiFormat, UpstreamEvent, WireFormat};
