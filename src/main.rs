//! chatrelay - one chat-completion API in front of several LLM providers
//!
//! A stateless proxy that accepts a single normalized chat request shape,
//! forwards it to OpenAI, Claude, Mistral or any configured compatible
//! provider, and returns a single normalized response shape.

use std::path::Path;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use chatrelay::config::{Config, KeySource};
use chatrelay::router::CompletionRouter;

#[derive(Parser)]
#[command(name = "chatrelay")]
#[command(about = "One chat-completion API in front of several LLM providers")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the proxy server
    Serve {
        /// Path to configuration file (built-in defaults when absent)
        #[arg(short, long, default_value = "config.toml")]
        config: String,

        /// Override listen address
        #[arg(short, long)]
        listen: Option<String>,
    },

    /// Validate configuration file
    Check {
        /// Path to configuration file
        #[arg(short, long, default_value = "config.toml")]
        config: String,
    },

    /// Show registered providers and where their keys come from
    Providers {
        /// Path to configuration file (built-in defaults when absent)
        #[arg(short, long, default_value = "config.toml")]
        config: String,
    },
}

fn init_tracing(level: &str) {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("chatrelay={level},tower_http={level}").into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Load the config file, or built-in defaults when `optional` and the file is absent.
type LoadedConfig = (Config, Vec<(String, KeySource)>, bool);

fn load_config(path: &str, optional: bool) -> anyhow::Result<LoadedConfig> {
    if optional && !Path::new(path).exists() {
        return Ok((Config::default(), Vec::new(), false));
    }
    let (config, key_sources) = Config::from_file_with_env(path)?;
    Ok((config, key_sources, true))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { config, listen } => {
            let (mut cfg, key_sources, from_file) = load_config(&config, true)?;
            init_tracing(&cfg.logging.level);

            if from_file {
                tracing::info!(config = %config, "Loaded configuration");
            } else {
                tracing::warn!(config = %config, "Config file not found, using defaults");
            }
            for (provider, source) in &key_sources {
                tracing::info!(
                    provider = %provider,
                    key_source = %source,
                    "Configured provider key"
                );
            }

            if let Some(addr) = listen {
                tracing::info!(listen = %addr, "Override listen address");
                cfg.server.listen = addr;
            }

            chatrelay::proxy::run_server(cfg).await
        }

        Commands::Check { config } => {
            let (cfg, key_sources, _) = load_config(&config, false)?;
            init_tracing(&cfg.logging.level);

            println!("Configuration OK: {}", config);
            println!("  listen: {}", cfg.server.listen);
            println!(
                "  upstream: timeout={}s connect_timeout={}s connect_retries={} stream_idle_timeout={}s",
                cfg.upstream.timeout_secs,
                cfg.upstream.connect_timeout_secs,
                cfg.upstream.connect_retries,
                cfg.upstream.stream_idle_timeout_secs
            );
            for (provider, source) in &key_sources {
                println!("  provider {}: key {}", provider, source);
            }
            Ok(())
        }

        Commands::Providers { config } => {
            let (cfg, key_sources, _) = load_config(&config, true)?;
            init_tracing(&cfg.logging.level);

            let router = CompletionRouter::from_config(&cfg)?;
            println!("{:<12} {:<8} {:<10} ENDPOINT", "PROVIDER", "FORMAT", "KEY");
            for profile in router.registry().iter() {
                let key = key_sources
                    .iter()
                    .find(|(name, _)| name == &profile.id)
                    .map(|(_, source)| source.to_string())
                    .filter(|source| source != "none")
                    .unwrap_or_else(|| {
                        if router.has_credential(&profile.id) {
                            "env".to_string()
                        } else {
                            "missing".to_string()
                        }
                    });
                println!(
                    "{:<12} {:<8} {:<10} {}",
                    profile.id,
                    profile.format.kind().as_str(),
                    key,
                    profile.endpoint
                );
            }
            Ok(())
        }
    }
}
