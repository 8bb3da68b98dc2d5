//! Provider profiles and the registry that maps provider ids to them.

use reqwest::header::{HeaderValue, AUTHORIZATION};
use reqwest::RequestBuilder;
use std::collections::BTreeMap;
use std::sync::Arc;

use super::wire::{ClaudeFormat, OpenAiFormat, WireFormat};
use crate::config::{ApiKey, ProviderConfig, WireFormatKind};

pub const OPENAI_ENDPOINT: &str = "https://api.openai.com/v1/chat/completions";
pub const CLAUDE_ENDPOINT: &str = "https://api.anthropic.com/v1/messages";
pub const MISTRAL_ENDPOINT: &str = "https://api.mistral.ai/v1/chat/completions";

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Provider ids available without any configuration.
pub const BUILTIN_PROVIDERS: [&str; 3] = ["openai", "claude", "mistral"];

pub fn is_builtin_provider(id: &str) -> bool {
    BUILTIN_PROVIDERS.contains(&id)
}

/// How the credential is attached to the upstream request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthScheme {
    /// `Authorization: Bearer <key>`
    Bearer,
    /// `<header>: <key>` plus a fixed API version header.
    ApiKeyHeader {
        header: &'static str,
        version_header: &'static str,
        version: &'static str,
    },
}

impl AuthScheme {
    pub fn anthropic() -> Self {
        AuthScheme::ApiKeyHeader {
            header: "x-api-key",
            version_header: "anthropic-version",
            version: ANTHROPIC_VERSION,
        }
    }

    /// Whether `key` can be sent in this scheme's header at all.
    pub fn accepts(&self, key: &ApiKey) -> bool {
        HeaderValue::from_str(key.expose_secret()).is_ok()
    }

    pub fn apply(&self, builder: RequestBuilder, key: &ApiKey) -> RequestBuilder {
        match self {
            AuthScheme::Bearer => {
                builder.header(AUTHORIZATION, format!("Bearer {}", key.expose_secret()))
            }
            AuthScheme::ApiKeyHeader {
                header,
                version_header,
                version,
            } => builder
                .header(*header, key.expose_secret())
                .header(*version_header, *version),
        }
    }
}

/// Everything needed to talk to one provider.
#[derive(Debug, Clone)]
pub struct ProviderProfile {
    pub id: String,
    pub endpoint: String,
    pub auth: AuthScheme,
    pub format: Arc<dyn WireFormat>,
}

impl ProviderProfile {
    pub fn new(
        id: impl Into<String>,
        endpoint: impl Into<String>,
        auth: AuthScheme,
        format: Arc<dyn WireFormat>,
    ) -> Self {
        Self {
            id: id.into(),
            endpoint: endpoint.into(),
            auth,
            format,
        }
    }

    pub fn openai() -> Self {
        Self::new(
            "openai",
            OPENAI_ENDPOINT,
            AuthScheme::Bearer,
            Arc::new(OpenAiFormat::new(true)),
        )
    }

    pub fn claude() -> Self {
        Self::new(
            "claude",
            CLAUDE_ENDPOINT,
            AuthScheme::anthropic(),
            Arc::new(ClaudeFormat::default()),
        )
    }

    pub fn mistral() -> Self {
        Self::new(
            "mistral",
            MISTRAL_ENDPOINT,
            AuthScheme::Bearer,
            Arc::new(OpenAiFormat::new(false)),
        )
    }

    /// A provider speaking one of the known dialects at an arbitrary endpoint.
    pub fn custom(
        id: impl Into<String>,
        endpoint: impl Into<String>,
        kind: WireFormatKind,
    ) -> Self {
        let (auth, format): (AuthScheme, Arc<dyn WireFormat>) = match kind {
            WireFormatKind::Openai => (AuthScheme::Bearer, Arc::new(OpenAiFormat::new(false))),
            WireFormatKind::Claude => (AuthScheme::anthropic(), Arc::new(ClaudeFormat::default())),
        };
        Self::new(id, endpoint, auth, format)
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

/// Built-in profile for `id`, if it is one of [`BUILTIN_PROVIDERS`].
pub fn builtin_profile(id: &str) -> Option<ProviderProfile> {
    match id {
        "openai" => Some(ProviderProfile::openai()),
        "claude" => Some(ProviderProfile::claude()),
        "mistral" => Some(ProviderProfile::mistral()),
        _ => None,
    }
}

/// Lookup table from provider id to profile. Immutable once the router is built.
#[derive(Debug, Clone, Default)]
pub struct ProviderRegistry {
    profiles: BTreeMap<String, ProviderProfile>,
}

impl ProviderRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the openai, claude and mistral profiles.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        for id in BUILTIN_PROVIDERS {
            if let Some(profile) = builtin_profile(id) {
                registry.register(profile);
            }
        }
        registry
    }

    /// Built-in profiles with configured overrides and custom providers applied.
    pub fn from_config(providers: &[ProviderConfig]) -> Self {
        let mut registry = Self::builtin();

        for pc in providers {
            let base = builtin_profile(&pc.name);
            let format = pc
                .format
                .filter(|kind| !matches!(&base, Some(b) if b.format.kind() == *kind));
            let profile = match (base, format) {
                (Some(base), None) => match &pc.url {
                    Some(url) => base.with_endpoint(url),
                    None => base,
                },
                (base, Some(kind)) => {
                    let endpoint = pc
                        .url
                        .clone()
                        .or_else(|| base.map(|b| b.endpoint));
                    match endpoint {
                        Some(endpoint) => ProviderProfile::custom(&pc.name, endpoint, kind),
                        None => {
                            tracing::warn!(provider = %pc.name, "Provider has no url, skipping");
                            continue;
                        }
                    }
                }
                (None, None) => {
                    tracing::warn!(provider = %pc.name, "Provider has no format, skipping");
                    continue;
                }
            };

            tracing::debug!(
                provider = %profile.id,
                endpoint = %profile.endpoint,
                format = profile.format.kind().as_str(),
                "Registered provider"
            );
            registry.register(profile);
        }

        registry
    }

    /// Add or replace a profile, returning the one it replaced.
    pub fn register(&mut self, profile: ProviderProfile) -> Option<ProviderProfile> {
        self.profiles.insert(profile.id.clone(), profile)
    }

    pub fn get(&self, id: &str) -> Option<&ProviderProfile> {
        self.profiles.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.profiles.contains_key(id)
    }

    /// Profiles ordered by id.
    pub fn iter(&self) -> impl Iterator<Item = &ProviderProfile> {
        self.profiles.values()
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider(name: &str, url: Option<&str>, format: Option<WireFormatKind>) -> ProviderConfig {
        ProviderConfig {
            name: name.to_string(),
            url: url.map(str::to_string),
            api_key: None,
            format,
        }
    }

    #[test]
    fn test_builtin_registry() {
        let registry = ProviderRegistry::builtin();
        assert_eq!(registry.len(), 3);
        let ids: Vec<&str> = registry.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["claude", "mistral", "openai"]);
        assert!(!registry.contains("cohere"));
    }

    #[test]
    fn test_builtin_profiles() {
        let openai = ProviderProfile::openai();
        assert_eq!(openai.endpoint, OPENAI_ENDPOINT);
        assert_eq!(openai.auth, AuthScheme::Bearer);
        assert_eq!(openai.format.kind(), WireFormatKind::Openai);

        let claude = ProviderProfile::claude();
        assert_eq!(claude.format.kind(), WireFormatKind::Claude);
        assert!(matches!(
            claude.auth,
            AuthScheme::ApiKeyHeader { header: "x-api-key", .. }
        ));

        let mistral = ProviderProfile::mistral();
        assert_eq!(mistral.endpoint, MISTRAL_ENDPOINT);
        assert_eq!(mistral.format.kind(), WireFormatKind::Openai);
    }

    #[test]
    fn test_from_config_overrides_builtin_endpoint() {
        let registry = ProviderRegistry::from_config(&[provider(
            "openai",
            Some("http://localhost:9999/v1/chat/completions"),
            None,
        )]);
        let openai = registry.get("openai").unwrap();
        assert_eq!(openai.endpoint, "http://localhost:9999/v1/chat/completions");
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn test_from_config_registers_custom_provider() {
        let registry = ProviderRegistry::from_config(&[provider(
            "groq",
            Some("https://api.groq.com/openai/v1/chat/completions"),
            Some(WireFormatKind::Openai),
        )]);
        let groq = registry.get("groq").unwrap();
        assert_eq!(groq.format.kind(), WireFormatKind::Openai);
        assert_eq!(groq.auth, AuthScheme::Bearer);
        assert_eq!(registry.len(), 4);
    }

    #[test]
    fn test_from_config_skips_incomplete_custom_provider() {
        let registry = ProviderRegistry::from_config(&[provider("groq", None, None)]);
        assert!(registry.get("groq").is_none());
    }

    #[test]
    fn test_from_config_builtin_with_format_keeps_default_endpoint() {
        let registry = ProviderRegistry::from_config(&[provider(
            "mistral",
            None,
            Some(WireFormatKind::Claude),
        )]);
        let mistral = registry.get("mistral").unwrap();
        assert_eq!(mistral.endpoint, MISTRAL_ENDPOINT);
        assert_eq!(mistral.format.kind(), WireFormatKind::Claude);
    }

    #[test]
    fn test_from_config_matching_format_keeps_builtin_profile() {
        let registry = ProviderRegistry::from_config(&[provider(
            "openai",
            None,
            Some(WireFormatKind::Openai),
        )]);
        let body = registry
            .get("openai")
            .unwrap()
            .format
            .request_body("gpt-4", &[], true);
        assert_eq!(body["stream_options"]["include_usage"], true);
    }

    #[test]
    fn test_auth_accepts_only_header_safe_keys() {
        for auth in [AuthScheme::Bearer, AuthScheme::anthropic()] {
            assert!(auth.accepts(&ApiKey::from("sk-abc123")));
            assert!(!auth.accepts(&ApiKey::from("sk\nbad")));
            assert!(!auth.accepts(&ApiKey::from("sk\r\nX-Injected: 1")));
        }
    }

    #[test]
    fn test_register_replaces() {
        let mut registry = ProviderRegistry::builtin();
        let replaced = registry.register(ProviderProfile::openai().with_endpoint("http://x"));
        assert!(replaced.is_some());
        assert_eq!(registry.get("openai").unwrap().endpoint, "http://x");
    }
}
