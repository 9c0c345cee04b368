use crate::chat::{Backend, ChatSettings};
use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use std::env;
use thiserror::Error;

/// Environment variable holding the hosted API key.
pub const API_KEY_VAR: &str = "API_KEY";

/// Model used when none is configured.
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Config file path
    #[arg(short, long, env = "CONFIG_FILE")]
    pub config: Option<String>,

    /// Address to bind
    #[arg(long, env = "HOST")]
    pub host: Option<String>,

    /// Port to listen on
    #[arg(long, env = "PORT")]
    pub port: Option<u16>,

    /// Chat backend: gemini, chat (OpenAI-compatible) or offline
    #[arg(long, env = "CHAT_BACKEND")]
    pub backend: Option<String>,

    /// Model identifier
    #[arg(long, env = "CHAT_MODEL")]
    pub model: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub chat: ChatConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
    pub static_dir: String,
}

#[derive(Deserialize, Clone)]
pub struct ChatConfig {
    pub backend: Backend,
    pub model: String,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub system_instruction: Option<String>,
}

impl std::fmt::Debug for ChatConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatConfig")
            .field("backend", &self.backend)
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("system_instruction", &self.system_instruction)
            .finish()
    }
}

/// The hosted backend needs a key and none was configured.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("API key not found. Please set the {variable} environment variable.")]
pub struct MissingApiKey {
    /// Variable the key is read from.
    pub variable: &'static str,
}

impl AppConfig {
    pub fn load() -> Result<Self, config::ConfigError> {
        Self::load_from_args(std::env::args())
    }

    pub fn load_from_args<I, T>(args: I) -> Result<Self, config::ConfigError>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let cli =
            Cli::try_parse_from(args).map_err(|e| config::ConfigError::Message(e.to_string()))?;

        // 1. Defaults
        let mut builder = Config::builder()
            .set_default("server.port", 3000)?
            .set_default("server.host", "127.0.0.1")?
            .set_default("server.static_dir", "static")?
            .set_default("chat.backend", "gemini")?
            .set_default("chat.model", DEFAULT_MODEL)?;

        // 2. Config file: explicit path, else ./config.{yaml,toml,json} if present
        builder = match &cli.config {
            Some(path) => builder.add_source(File::with_name(path)),
            None => builder.add_source(File::with_name("config").required(false)),
        };

        // 3. Environment variables prefixed with WIDGET_, e.g. WIDGET_SERVER__PORT=8000
        builder = builder.add_source(
            Environment::with_prefix("WIDGET")
                .separator("__")
                .try_parsing(true),
        );

        // 4. Unprefixed environment variables the hosted API conventionally uses
        if let Some(key) = non_empty_var(API_KEY_VAR) {
            builder = builder.set_override("chat.api_key", key)?;
        }
        if let Some(url) = non_empty_var("CHAT_BASE_URL") {
            builder = builder.set_override("chat.base_url", url)?;
        }

        // 5. CLI flags (clap also fills these from their env fallbacks)
        if let Some(host) = cli.host {
            builder = builder.set_override("server.host", host)?;
        }
        if let Some(port) = cli.port {
            builder = builder.set_override("server.port", port)?;
        }
        if let Some(backend) = cli.backend {
            builder = builder.set_override("chat.backend", backend.to_lowercase())?;
        }
        if let Some(model) = cli.model {
            builder = builder.set_override("chat.model", model)?;
        }

        let cfg = builder.build()?;
        cfg.try_deserialize()
    }

    /// Address the server binds to.
    #[must_use]
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    /// Resolve the chat settings, failing when the backend needs a key
    /// that is absent.
    pub fn chat_settings(&self) -> Result<ChatSettings, MissingApiKey> {
        let chat = &self.chat;
        let api_key = chat
            .api_key
            .as_ref()
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty());

        if chat.backend.requires_api_key() && api_key.is_none() {
            return Err(MissingApiKey {
                variable: API_KEY_VAR,
            });
        }

        let base_url = chat
            .base_url
            .clone()
            .filter(|u| !u.trim().is_empty())
            .unwrap_or_else(|| chat.backend.default_base_url().to_string());

        Ok(ChatSettings {
            backend: chat.backend,
            base_url,
            api_key,
            model: chat.model.clone(),
            system_instruction: chat.system_instruction.clone(),
        })
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(backend: Backend, api_key: Option<&str>) -> AppConfig {
        AppConfig {
            server: ServerConfig {
                port: 3000,
                host: "127.0.0.1".to_string(),
                static_dir: "static".to_string(),
            },
            chat: ChatConfig {
                backend,
                model: DEFAULT_MODEL.to_string(),
                base_url: None,
                api_key: api_key.map(ToString::to_string),
                system_instruction: None,
            },
        }
    }

    #[test]
    fn test_missing_key_is_reported() {
        let err = config(Backend::Gemini, None).chat_settings().unwrap_err();
        assert_eq!(err.variable, "API_KEY");
        assert!(err.to_string().contains("API_KEY environment variable"));

        assert!(config(Backend::Gemini, Some("  ")).chat_settings().is_err());
    }

    #[test]
    fn test_offline_needs_no_key() {
        let settings = config(Backend::Offline, None).chat_settings().unwrap();
        assert_eq!(settings.backend, Backend::Offline);
    }

    #[test]
    fn test_default_base_url_per_backend() {
        let settings = config(Backend::Gemini, Some("k")).chat_settings().unwrap();
        assert_eq!(settings.base_url, "https://generativelanguage.googleapis.com");

        let settings = config(Backend::Chat, Some("k")).chat_settings().unwrap();
        assert_eq!(settings.base_url, "https://api.openai.com");
    }

    #[test]
    fn test_debug_redacts_key() {
        let dbg = format!("{:?}", config(Backend::Gemini, Some("secret")));
        assert!(!dbg.contains("secret"));
    }
}
