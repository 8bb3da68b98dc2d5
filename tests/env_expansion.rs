//! Integration tests for the full Config::from_file_with_env pipeline.
//!
//! These tests exercise the end-to-end flow: TOML file -> raw parse -> env var
//! expansion -> validation -> final Config with KeySource metadata.
//!
//! Each test uses its own temp file and env var names to avoid parallel test interference.

use std::io::Write;

use chatrelay::config::{Config, ConfigError, KeySource, WireFormatKind};
use chatrelay::router::ProviderRegistry;

fn write_config(content: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().expect("create temp config");
    file.write_all(content.as_bytes()).expect("write temp config");
    file
}

fn source_for<'a>(key_sources: &'a [(String, KeySource)], name: &str) -> &'a KeySource {
    &key_sources
        .iter()
        .find(|(n, _)| n == name)
        .unwrap_or_else(|| panic!("no key source for {}", name))
        .1
}

#[test]
fn test_env_expansion_resolves_var() {
    let var_name = "CHATRELAY_E2E_EXPAND_KEY";
    unsafe { std::env::set_var(var_name, "sk-from-env") };

    let file = write_config(&format!(
        r#"
[server]
listen = "127.0.0.1:19876"

[[providers]]
name = "openai"
api_key = "${{{}}}"
"#,
        var_name
    ));

    let (config, key_sources) =
        Config::from_file_with_env(file.path()).expect("config should load");

    let provider = config
        .providers
        .iter()
        .find(|p| p.name == "openai")
        .expect("provider 'openai' should exist");
    assert_eq!(
        provider.api_key.as_ref().unwrap().expose_secret(),
        "sk-from-env"
    );
    assert_eq!(source_for(&key_sources, "openai"), &KeySource::EnvExpanded);
    assert_eq!(config.server.listen, "127.0.0.1:19876");

    unsafe { std::env::remove_var(var_name) };
}

#[test]
fn test_literal_key_is_kept() {
    let file = write_config(
        r#"
[[providers]]
name = "mistral"
api_key = "literal-mistral-key"
"#,
    );

    let (config, key_sources) =
        Config::from_file_with_env(file.path()).expect("config should load");

    assert_eq!(
        config.providers[0].api_key.as_ref().unwrap().expose_secret(),
        "literal-mistral-key"
    );
    assert_eq!(source_for(&key_sources, "mistral"), &KeySource::Literal);
}

#[test]
fn test_missing_var_names_var_and_provider() {
    let var_name = "CHATRELAY_E2E_DEFINITELY_UNSET";
    unsafe { std::env::remove_var(var_name) };

    let file = write_config(&format!(
        r#"
[[providers]]
name = "claude"
api_key = "${{{}}}"
"#,
        var_name
    ));

    let err = Config::from_file_with_env(file.path()).unwrap_err();
    assert!(matches!(err, ConfigError::EnvVar { .. }), "got {:?}", err);

    let message = err.to_string();
    assert!(message.contains(var_name), "message: {}", message);
    assert!(message.contains("claude"), "message: {}", message);
}

#[test]
fn test_convention_key_reported_but_not_stored() {
    // A provider name no other test uses, so its convention var is ours alone.
    let file = write_config(
        r#"
[[providers]]
name = "e2e-convention"
url = "https://llm.example.com/v1/chat/completions"
format = "openai"
"#,
    );
    unsafe { std::env::set_var("E2E_CONVENTION_API_KEY", "sk-convention") };

    let (config, key_sources) =
        Config::from_file_with_env(file.path()).expect("config should load");

    assert!(config.providers[0].api_key.is_none());
    assert_eq!(
        source_for(&key_sources, "e2e-convention"),
        &KeySource::Convention("E2E_CONVENTION_API_KEY".to_string())
    );

    unsafe { std::env::remove_var("E2E_CONVENTION_API_KEY") };
}

#[test]
fn test_custom_provider_requires_url_and_format() {
    let missing_url = write_config(
        r#"
[[providers]]
name = "groq"
format = "openai"
"#,
    );
    let err = Config::from_file_with_env(missing_url.path()).unwrap_err();
    assert!(matches!(err, ConfigError::Validation(_)));
    assert!(err.to_string().contains("groq"));

    let missing_format = write_config(
        r#"
[[providers]]
name = "groq"
url = "https://api.groq.com/openai/v1/chat/completions"
"#,
    );
    let err = Config::from_file_with_env(missing_format.path()).unwrap_err();
    assert!(matches!(err, ConfigError::Validation(_)));
    assert!(err.to_string().contains("format"));
}

#[test]
fn test_loaded_config_builds_registry() {
    let file = write_config(
        r#"
[upstream]
timeout_secs = 30

[[providers]]
name = "openai"
url = "http://127.0.0.1:9000/v1/chat/completions"

[[providers]]
name = "groq"
url = "https://api.groq.com/openai/v1/chat/completions"
format = "openai"
api_key = "gsk-literal"
"#,
    );

    let (config, _) = Config::from_file_with_env(file.path()).expect("config should load");
    assert_eq!(config.upstream.timeout_secs, 30);
    assert_eq!(config.providers[1].format, Some(WireFormatKind::Openai));

    let registry = ProviderRegistry::from_config(&config.providers);
    assert!(registry.contains("claude"));
    assert!(registry.contains("mistral"));
    assert!(registry.contains("groq"));
    assert_eq!(
        registry.get("openai").unwrap().endpoint,
        "http://127.0.0.1:9000/v1/chat/completions"
    );
}

#[test]
fn test_missing_file_is_io_error() {
    let err = Config::from_file_with_env("/nonexistent/chatrelay/config.toml").unwrap_err();
    assert!(matches!(err, ConfigError::Io { .. }));
    assert!(err.to_string().contains("/nonexistent/chatrelay/config.toml"));
}
