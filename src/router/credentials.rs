//! Server-side credential lookup.

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::{convention_env_var_name, ApiKey, ProviderConfig};

/// Read-only source of process-wide provider keys, injected into the router.
pub trait CredentialResolver: Send + Sync {
    fn resolve(&self, provider_id: &str) -> Option<ApiKey>;
}

type EnvLookup = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Keys from the config file first, then `<PROVIDER>_API_KEY` from the environment.
///
/// The environment is read on every call, so rotating a key takes effect on
/// the next request without a restart.
#[derive(Clone)]
pub struct EnvCredentials {
    configured: HashMap<String, ApiKey>,
    lookup: EnvLookup,
}

impl EnvCredentials {
    pub fn new() -> Self {
        Self::with_lookup(|name| std::env::var(name).ok())
    }

    /// Use a custom variable lookup instead of the process environment.
    pub fn with_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String> + Send + Sync + 'static,
    {
        Self {
            configured: HashMap::new(),
            lookup: Arc::new(lookup),
        }
    }

    /// Add the keys carried by provider config entries.
    pub fn with_configured(mut self, providers: &[ProviderConfig]) -> Self {
        for provider in providers {
            if let Some(key) = &provider.api_key {
                self.configured.insert(provider.name.clone(), key.clone());
            }
        }
        self
    }
}

impl Default for EnvCredentials {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EnvCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnvCredentials")
            .field("configured", &self.configured)
            .finish_non_exhaustive()
    }
}

impl CredentialResolver for EnvCredentials {
    fn resolve(&self, provider_id: &str) -> Option<ApiKey> {
        if let Some(key) = self.configured.get(provider_id).filter(|k| !k.is_blank()) {
            return Some(key.clone());
        }

        (self.lookup)(&convention_env_var_name(provider_id))
            .map(ApiKey::from)
            .filter(|k| !k.is_blank())
    }
}

/// Fixed map of keys.
#[derive(Debug, Clone, Default)]
pub struct StaticCredentials {
    keys: HashMap<String, ApiKey>,
}

impl StaticCredentials {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with_key(mut self, provider_id: &str, key: impl Into<ApiKey>) -> Self {
        self.keys.insert(provider_id.to_string(), key.into());
        self
    }
}

impl CredentialResolver for StaticCredentials {
    fn resolve(&self, provider_id: &str) -> Option<ApiKey> {
        self.keys.get(provider_id).cloned()
    }
}
