//! OpenAI Chat Completions session.
//!
//! Talks to any OpenAI-compatible `/v1/chat/completions` endpoint with
//! `stream: true` and yields `choices[0].delta.content` as fragments.

use futures::StreamExt;
use serde::Deserialize;

use crate::error::Result;

use super::history::{Exchange, History};
use super::{ApiErrorBody, ChatSession, ChatSettings, FragmentStream, check_status, sse, validate_message};

/// Public `OpenAI` API endpoint.
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com";

/// A conversation with an OpenAI-compatible model.
#[derive(Clone)]
pub struct ChatCompletionsSession {
    http: reqwest::Client,
    settings: ChatSettings,
    history: History,
}

impl std::fmt::Debug for ChatCompletionsSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatCompletionsSession")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl ChatCompletionsSession {
    /// Create a session with an empty history.
    #[must_use]
    pub fn new(http: reqwest::Client, settings: ChatSettings) -> Self {
        Self {
            http,
            settings,
            history: History::new(),
        }
    }

    /// History recorded so far.
    #[must_use]
    pub fn history(&self) -> &History {
        &self.history
    }
}

#[async_trait::async_trait]
impl ChatSession for ChatCompletionsSession {
    async fn send_message_stream(&self, message: &str) -> Result<FragmentStream> {
        let message = validate_message(message)?;
        let turn = self.history.begin().await;

        let url = format!(
            "{}/v1/chat/completions",
            self.settings.base_url.trim_end_matches('/')
        );

        let body = serde_json::json!({
            "model": self.settings.model,
            "stream": true,
            "messages": request_messages(
                turn.exchanges(),
                &message,
                self.settings.system_instruction.as_deref(),
            ),
        });

        let mut rb = self.http.post(&url).json(&body);
        if let Some(k) = &self.settings.api_key {
            rb = rb.bearer_auth(k);
        }

        tracing::debug!(
            model = %self.settings.model,
            history_len = turn.exchanges().len(),
            "Opening chat completions stream"
        );

        let resp = check_status(rb.send().await?).await?;
        let payloads = sse::data_stream(resp);

        let out = async_stream::try_stream! {
            let mut reply = String::new();

            futures::pin_mut!(payloads);
            while let Some(data) = payloads.next().await {
                let data = data?;
                if data.trim() == "[DONE]" {
                    break;
                }

                let chunk: CompletionChunk = serde_json::from_str(&data)?;
                if let Some(error) = chunk.error {
                    Err::<(), _>(error.into_error(0))?;
                }

                let text = chunk
                    .choices
                    .into_iter()
                    .next()
                    .and_then(|c| c.delta.content)
                    .unwrap_or_default();
                if !text.is_empty() {
                    reply.push_str(&text);
                    yield text;
                }
            }

            if !reply.is_empty() {
                turn.record(message, reply);
            }
        };

        Ok(Box::pin(out))
    }

    fn model(&self) -> &str {
        &self.settings.model
    }
}

#[derive(Debug, Deserialize)]
struct CompletionChunk {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    error: Option<ApiErrorBody>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    #[serde(default)]
    delta: Delta,
}

#[derive(Debug, Default, Deserialize)]
struct Delta {
    #[serde(default)]
    content: Option<String>,
}

fn request_messages(
    history: &[Exchange],
    message: &str,
    system_instruction: Option<&str>,
) -> Vec<serde_json::Value> {
    let mut messages = Vec::with_capacity(history.len() * 2 + 2);
    if let Some(system) = system_instruction {
        messages.push(serde_json::json!({ "role": "system", "content": system }));
    }
    for exchange in history {
        messages.push(serde_json::json!({ "role": "user", "content": exchange.user }));
        messages.push(serde_json::json!({ "role": "assistant", "content": exchange.model }));
    }
    messages.push(serde_json::json!({ "role": "user", "content": message }));
    messages
}
