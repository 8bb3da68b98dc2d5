//! The completion router: validate, resolve credentials, dispatch, normalize.

use reqwest::Client;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use super::credentials::{CredentialResolver, EnvCredentials};
use super::registry::{ProviderProfile, ProviderRegistry};
use super::wire::UNKNOWN_UPSTREAM_ERROR;
use crate::config::{ApiKey, Config, UpstreamConfig};
use crate::error::{ProxyError, Result};
use crate::proxy::retry::{retry_transient, RetryPolicy};
use crate::proxy::stream::{completion_stream, CompletionStream};
use crate::proxy::types::{CompletionRequest, CompletionResult};

/// Outbound call limits applied to every provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouterSettings {
    /// Bound on a whole non-streaming call, and on receiving stream headers.
    pub timeout: Duration,
    /// Bound on the silence between two chunks of a streamed body.
    pub stream_idle_timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for RouterSettings {
    fn default() -> Self {
        Self::from(&UpstreamConfig::default())
    }
}

impl From<&UpstreamConfig> for RouterSettings {
    fn from(upstream: &UpstreamConfig) -> Self {
        Self {
            timeout: upstream.timeout(),
            stream_idle_timeout: upstream.stream_idle_timeout(),
            retry: RetryPolicy::new(upstream.connect_retries, upstream.retry_backoff()),
        }
    }
}

/// A request that passed validation and has a credential.
struct Dispatch<'a> {
    profile: &'a ProviderProfile,
    model: &'a str,
    key: ApiKey,
    request: &'a CompletionRequest,
}

/// Stateless router from canonical requests to provider APIs.
///
/// Cloning is cheap; all shared state is immutable.
#[derive(Clone)]
pub struct CompletionRouter {
    registry: Arc<ProviderRegistry>,
    credentials: Arc<dyn CredentialResolver>,
    client: Client,
    settings: RouterSettings,
}

impl CompletionRouter {
    pub fn new(
        registry: ProviderRegistry,
        credentials: Arc<dyn CredentialResolver>,
        client: Client,
        settings: RouterSettings,
    ) -> Self {
        Self {
            registry: Arc::new(registry),
            credentials,
            client,
            settings,
        }
    }

    /// Router with built-in and configured providers, config keys, and environment keys.
    pub fn from_config(config: &Config) -> std::result::Result<Self, reqwest::Error> {
        let client = Client::builder()
            .connect_timeout(config.upstream.connect_timeout())
            .build()?;
        let credentials = EnvCredentials::new().with_configured(&config.providers);

        Ok(Self::new(
            ProviderRegistry::from_config(&config.providers),
            Arc::new(credentials),
            client,
            RouterSettings::from(&config.upstream),
        ))
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    pub fn settings(&self) -> &RouterSettings {
        &self.settings
    }

    /// Whether a server-side key is currently available for `provider_id`.
    pub fn has_credential(&self, provider_id: &str) -> bool {
        self.credentials.resolve(provider_id).is_some()
    }

    /// Complete `request` with a single non-streaming upstream call.
    ///
    /// The `stream` flag is ignored here; use [`CompletionRouter::route_stream`].
    pub async fn route(&self, request: &CompletionRequest) -> Result<CompletionResult> {
        self.route_until(request, std::future::pending()).await
    }

    /// Like [`CompletionRouter::route`], abandoning the upstream call when
    /// `cancel` resolves first.
    pub async fn route_until<F>(
        &self,
        request: &CompletionRequest,
        cancel: F,
    ) -> Result<CompletionResult>
    where
        F: Future<Output = ()>,
    {
        let dispatch = self.prepare(request)?;
        let provider = dispatch.profile.id.as_str();

        tokio::select! {
            biased;
            _ = cancel => {
                tracing::warn!(provider = %provider, "Completion cancelled by caller");
                Err(ProxyError::Cancelled { provider: provider.to_string() })
            }
            outcome = tokio::time::timeout(self.settings.timeout, self.complete(&dispatch)) => {
                outcome.unwrap_or_else(|_| {
                    tracing::error!(
                        provider = %provider,
                        timeout_ms = self.settings.timeout.as_millis() as u64,
                        "Provider timed out"
                    );
                    Err(ProxyError::Timeout {
                        provider: provider.to_string(),
                        after: self.settings.timeout,
                    })
                })
            }
        }
    }

    /// Start a streamed completion.
    ///
    /// Validation, credential and upstream status failures are reported here,
    /// before any event; failures after that arrive as the stream's last item.
    pub async fn route_stream(&self, request: &CompletionRequest) -> Result<CompletionStream> {
        let dispatch = self.prepare(request)?;
        let provider = dispatch.profile.id.as_str();

        let response = tokio::time::timeout(self.settings.timeout, self.send(&dispatch, true))
            .await
            .map_err(|_| ProxyError::Timeout {
                provider: provider.to_string(),
                after: self.settings.timeout,
            })??;

        Ok(completion_stream(
            response,
            dispatch.profile.format.clone(),
            provider,
            dispatch.model,
            self.settings.stream_idle_timeout,
        ))
    }

    /// Validation and credential resolution. Performs no I/O.
    fn prepare<'a>(&'a self, request: &'a CompletionRequest) -> Result<Dispatch<'a>> {
        let requested_provider = request.provider_id();

        if request.messages.is_empty() {
            return Err(ProxyError::invalid_request(
                "messages must be a non-empty array",
                requested_provider,
            ));
        }

        let (Some(model), Some(provider_id)) = (request.model_id(), requested_provider) else {
            return Err(ProxyError::invalid_request(
                "model and provider are required",
                requested_provider,
            ));
        };

        let profile = self
            .registry
            .get(provider_id)
            .ok_or_else(|| ProxyError::UnsupportedProvider {
                provider: provider_id.to_string(),
            })?;

        let key = match request.user_api_key.as_ref().filter(|k| !k.is_blank()) {
            Some(key) if !profile.auth.accepts(key) => {
                return Err(ProxyError::invalid_request(
                    "userApiKey contains characters not allowed in an HTTP header",
                    Some(profile.id.as_str()),
                ));
            }
            Some(key) => key.clone(),
            None => self
                .credentials
                .resolve(&profile.id)
                .ok_or_else(|| ProxyError::MissingCredential {
                    provider: profile.id.clone(),
                })?,
        };

        Ok(Dispatch {
            profile,
            model,
            key,
            request,
        })
    }

    /// POST the request body and check the upstream status.
    async fn send(&self, dispatch: &Dispatch<'_>, stream: bool) -> Result<reqwest::Response> {
        let profile = dispatch.profile;
        let body = profile
            .format
            .request_body(dispatch.model, &dispatch.request.messages, stream);

        tracing::debug!(
            provider = %profile.id,
            endpoint = %profile.endpoint,
            model = %dispatch.model,
            messages = dispatch.request.messages.len(),
            stream,
            "Dispatching to provider"
        );

        let response = retry_transient(self.settings.retry, || {
            let builder = self.client.post(&profile.endpoint).json(&body);
            profile.auth.apply(builder, &dispatch.key).send()
        })
        .await
        .map_err(|source| {
            tracing::error!(error = %source, provider = %profile.id, "Failed to reach provider");
            ProxyError::Transport {
                provider: profile.id.clone(),
                source,
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<Value>(&error_body)
                .ok()
                .and_then(|body| profile.format.error_message(&body))
                .unwrap_or_else(|| UNKNOWN_UPSTREAM_ERROR.to_string());

            tracing::error!(
                status = %status,
                provider = %profile.id,
                body = %error_body,
                "Provider returned error"
            );

            return Err(ProxyError::Upstream {
                provider: profile.id.clone(),
                status: Some(status.as_u16()),
                message,
            });
        }

        Ok(response)
    }

    async fn complete(&self, dispatch: &Dispatch<'_>) -> Result<CompletionResult> {
        let profile = dispatch.profile;
        let response = self.send(dispatch, false).await?;

        let bytes = response.bytes().await.map_err(|source| ProxyError::Transport {
            provider: profile.id.clone(),
            source,
        })?;

        let body: Value = serde_json::from_slice(&bytes).unwrap_or_else(|e| {
            tracing::warn!(error = %e, provider = %profile.id, "Provider response is not JSON");
            Value::Object(Default::default())
        });

        let result = profile.format.from_upstream(&body, dispatch.model);
        tracing::debug!(
            provider = %profile.id,
            model = %result.model_echoed,
            content_len = result.content.len(),
            "Normalized provider response"
        );
        Ok(result)
    }
}

impl std::fmt::Debug for CompletionRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompletionRouter")
            .field("registry", &self.registry)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::types::ChatMessage;
    use crate::router::credentials::StaticCredentials;

    fn router(credentials: StaticCredentials) -> CompletionRouter {
        CompletionRouter::new(
            ProviderRegistry::builtin(),
            Arc::new(credentials),
            Client::new(),
            RouterSettings::default(),
        )
    }

    fn hello(provider: &str) -> CompletionRequest {
        CompletionRequest::new(provider, "some-model", vec![ChatMessage::user("hello")])
    }

    #[test]
    fn test_prepare_prefers_caller_key() {
        let router = router(StaticCredentials::empty().with_key("openai", "sk-server"));
        let request = hello("openai").with_user_api_key("sk-caller");
        let dispatch = router.prepare(&request).ok().unwrap();
        assert_eq!(dispatch.key.expose_secret(), "sk-caller");
    }

    #[test]
    fn test_prepare_falls_back_to_resolver_on_blank_caller_key() {
        let router = router(StaticCredentials::empty().with_key("openai", "sk-server"));
        let request = hello("openai").with_user_api_key("");
        let dispatch = router.prepare(&request).ok().unwrap();
        assert_eq!(dispatch.key.expose_secret(), "sk-server");
    }

    #[test]
    fn test_prepare_missing_model() {
        let router = router(StaticCredentials::empty());
        let mut request = hello("openai");
        request.model = None;
        let err = router.prepare(&request).err().unwrap();
        assert_eq!(err.code(), "invalid_request");
        assert_eq!(err.provider(), Some("openai"));
    }

    #[test]
    fn test_prepare_missing_provider() {
        let router = router(StaticCredentials::empty());
        let mut request = hello("openai");
        request.provider = Some("   ".to_string());
        let err = router.prepare(&request).err().unwrap();
        assert_eq!(err.code(), "invalid_request");
    }

    #[test]
    fn test_empty_messages_checked_before_provider() {
        let router = router(StaticCredentials::empty());
        let request = CompletionRequest::new("cohere", "m", vec![]);
        let err = router.prepare(&request).err().unwrap();
        assert_eq!(err.code(), "invalid_request");
    }

    #[test]
    fn test_settings_from_upstream_config() {
        let upstream = UpstreamConfig {
            timeout_secs: 5,
            connect_timeout_secs: 1,
            connect_retries: 0,
            retry_backoff_ms: 10,
            stream_idle_timeout_secs: 2,
        };
        let settings = RouterSettings::from(&upstream);
        assert_eq!(settings.timeout, Duration::from_secs(5));
        assert_eq!(settings.stream_idle_timeout, Duration::from_secs(2));
        assert_eq!(settings.retry, RetryPolicy::new(0, Duration::from_millis(10)));
    }
}
