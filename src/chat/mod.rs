//! Hosted chat API sessions.
//!
//! A [`ChatSession`] is one conversation with the hosted model. It accepts a
//! user message and returns a lazy [`FragmentStream`] of reply text. The
//! session owns the conversation context: each backend records the completed
//! exchange so the next message is sent with the full history.
//!
//! # Backends
//!
//! - [`GeminiSession`]: Gemini `streamGenerateContent` (default)
//! - [`ChatCompletionsSession`]: OpenAI-compatible `/v1/chat/completions`
//! - [`ScriptedSession`]: in-process replay, used offline and in tests
//!
//! # Example
//!
//! ```rust
//! use chat_widget::chat::{ChatSession, ScriptedSession};
//! use futures::StreamExt;
//!
//! # tokio_test_block(async {
//! let session = ScriptedSession::new(["Hel", "lo"]);
//! let mut stream = session.send_message_stream("hi").await.unwrap();
//! let mut reply = String::new();
//! while let Some(fragment) = stream.next().await {
//!     reply.push_str(&fragment.unwrap());
//! }
//! assert_eq!(reply, "Hello");
//! # });
//! # fn tokio_test_block<F: std::future::Future>(f: F) {
//! #     tokio::runtime::Runtime::new().unwrap().block_on(f);
//! # }
//! ```

pub mod chat_completions;
pub mod gemini;
pub mod history;
pub mod scripted;
pub mod sse;

pub use chat_completions::ChatCompletionsSession;
pub use gemini::GeminiSession;
pub use history::{Exchange, History};
pub use scripted::ScriptedSession;

use std::pin::Pin;
use std::sync::Arc;

use futures::Stream;
use serde::Deserialize;

use crate::error::{ChatError, Result};

/// Lazy, finite sequence of reply fragments.
///
/// Ends normally when the model finishes. A fault is surfaced as an `Err`
/// item and nothing follows it.
pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// A conversation with the hosted model.
#[async_trait::async_trait]
pub trait ChatSession: Send + Sync {
    /// Send a user message and stream the reply.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::EmptyMessage`] for a blank message, or a
    /// transport/API error if the request cannot be started.
    async fn send_message_stream(&self, message: &str) -> Result<FragmentStream>;

    /// Model identifier this session talks to.
    fn model(&self) -> &str;
}

/// Creates one [`ChatSession`] per widget.
pub trait SessionFactory: Send + Sync {
    /// Start a new conversation.
    fn create_session(&self) -> Arc<dyn ChatSession>;
}

impl<F> SessionFactory for F
where
    F: Fn() -> Arc<dyn ChatSession> + Send + Sync,
{
    fn create_session(&self) -> Arc<dyn ChatSession> {
        self()
    }
}

/// Hosted API flavour.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Google Gemini `streamGenerateContent`.
    #[default]
    Gemini,
    /// OpenAI-compatible Chat Completions.
    #[serde(alias = "openai")]
    Chat,
    /// No network: replies are generated in-process.
    Offline,
}

impl Backend {
    /// Base URL used when none is configured.
    #[must_use]
    pub fn default_base_url(self) -> &'static str {
        match self {
            Self::Gemini => gemini::DEFAULT_BASE_URL,
            Self::Chat => chat_completions::DEFAULT_BASE_URL,
            Self::Offline => "",
        }
    }

    /// Whether this backend needs an API key to be usable.
    #[must_use]
    pub fn requires_api_key(self) -> bool {
        !matches!(self, Self::Offline)
    }
}

impl std::str::FromStr for Backend {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "gemini" => Ok(Self::Gemini),
            "chat" | "openai" => Ok(Self::Chat),
            "offline" => Ok(Self::Offline),
            other => Err(format!("unknown chat backend: {other}")),
        }
    }
}

/// Connection and model settings for a chat backend.
#[derive(Clone)]
pub struct ChatSettings {
    /// Which hosted API to talk to.
    pub backend: Backend,
    /// Base URL of the API.
    pub base_url: String,
    /// API key sent with every request.
    pub api_key: Option<String>,
    /// Model identifier (e.g., `gemini-2.5-flash`).
    pub model: String,
    /// Optional system instruction prepended to every conversation.
    pub system_instruction: Option<String>,
}

impl std::fmt::Debug for ChatSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatSettings")
            .field("backend", &self.backend)
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("model", &self.model)
            .field("system_instruction", &self.system_instruction)
            .finish()
    }
}

/// Creates sessions against the configured backend, sharing one HTTP client.
#[derive(Clone)]
pub struct ChatClient {
    http: reqwest::Client,
    settings: ChatSettings,
}

impl std::fmt::Debug for ChatClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatClient")
            .field("settings", &self.settings)
            .finish()
    }
}

impl ChatClient {
    /// Create a client for the given settings.
    #[must_use]
    pub fn new(settings: ChatSettings) -> Self {
        Self {
            http: reqwest::Client::new(),
            settings,
        }
    }

    /// Settings this client was created with.
    #[must_use]
    pub fn settings(&self) -> &ChatSettings {
        &self.settings
    }
}

impl SessionFactory for ChatClient {
    fn create_session(&self) -> Arc<dyn ChatSession> {
        match self.settings.backend {
            Backend::Gemini => Arc::new(GeminiSession::new(
                self.http.clone(),
                self.settings.clone(),
            )),
            Backend::Chat => Arc::new(ChatCompletionsSession::new(
                self.http.clone(),
                self.settings.clone(),
            )),
            Backend::Offline => Arc::new(ScriptedSession::echo()),
        }
    }
}

/// Trim the message and reject it if nothing is left.
pub(crate) fn validate_message(message: &str) -> Result<String> {
    let trimmed = message.trim();
    if trimmed.is_empty() {
        Err(ChatError::EmptyMessage)
    } else {
        Ok(trimmed.to_string())
    }
}

/// Error envelope shared by Gemini and OpenAI-compatible APIs.
#[derive(Debug, Deserialize)]
pub(crate) struct ErrorEnvelope {
    pub error: ApiErrorBody,
}

/// Body of an API error.
#[derive(Debug, Deserialize)]
pub(crate) struct ApiErrorBody {
    #[serde(default)]
    pub code: Option<serde_json::Value>,
    #[serde(default)]
    pub message: String,
}

impl ApiErrorBody {
    /// Convert into a [`ChatError::Api`], preferring the numeric code in the body.
    pub fn into_error(self, status: u16) -> ChatError {
        let status = self
            .code
            .as_ref()
            .and_then(serde_json::Value::as_u64)
            .and_then(|c| u16::try_from(c).ok())
            .unwrap_or(status);
        ChatError::Api {
            status,
            message: self.message,
        }
    }
}

/// Turn a non-success HTTP response into a [`ChatError::Api`].
pub(crate) async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }

    let body = resp.text().await.unwrap_or_default();
    Err(api_error_from_body(status.as_u16(), &body, status.canonical_reason()))
}

fn api_error_from_body(status: u16, body: &str, reason: Option<&str>) -> ChatError {
    if let Ok(envelope) = serde_json::from_str::<ErrorEnvelope>(body) {
        return envelope.error.into_error(status);
    }
    let message = if body.trim().is_empty() {
        reason.unwrap_or("request failed").to_string()
    } else {
        body.trim().to_string()
    };
    ChatError::Api { status, message }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_message() {
        assert_eq!(validate_message("  hi \n").unwrap(), "hi");
        assert!(matches!(
            validate_message(" \t\n"),
            Err(ChatError::EmptyMessage)
        ));
    }

    #[test]
    fn test_backend_from_str() {
        assert_eq!("Gemini".parse::<Backend>().unwrap(), Backend::Gemini);
        assert_eq!("openai".parse::<Backend>().unwrap(), Backend::Chat);
        assert_eq!("offline".parse::<Backend>().unwrap(), Backend::Offline);
        assert!("bogus".parse::<Backend>().is_err());
        assert!(!Backend::Offline.requires_api_key());
    }

    #[test]
    fn test_api_error_from_json_body() {
        let body = r#"{"error":{"code":400,"message":"API key not valid.","status":"INVALID_ARGUMENT"}}"#;
        match api_error_from_body(400, body, Some("Bad Request")) {
            ChatError::Api { status, message } => {
                assert_eq!(status, 400);
                assert_eq!(message, "API key not valid.");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_api_error_from_plain_body() {
        match api_error_from_body(502, "", Some("Bad Gateway")) {
            ChatError::Api { status, message } => {
                assert_eq!(status, 502);
                assert_eq!(message, "Bad Gateway");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_settings_debug_redacts_key() {
        let settings = ChatSettings {
            backend: Backend::Gemini,
            base_url: gemini::DEFAULT_BASE_URL.to_string(),
            api_key: Some("secret".to_string()),
            model: "gemini-2.5-flash".to_string(),
            system_instruction: None,
        };
        let dbg = format!("{settings:?}");
        assert!(!dbg.contains("secret"));
        assert!(dbg.contains("<redacted>"));
    }
}
