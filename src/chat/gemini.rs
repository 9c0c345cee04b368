//! Gemini `streamGenerateContent` session.
//!
//! Sends the whole conversation as `contents` on every turn and streams the
//! reply over SSE (`?alt=sse`). Each event is a `GenerateContentResponse`
//! whose candidate parts carry the next slice of text.

use futures::StreamExt;
use serde::{Deserialize, Serialize};

use crate::error::{ChatError, Result};

use super::history::{Exchange, History};
use super::{ApiErrorBody, ChatSession, ChatSettings, FragmentStream, check_status, sse, validate_message};

/// Public Gemini API endpoint.
pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

/// A conversation with a Gemini model.
#[derive(Clone)]
pub struct GeminiSession {
    http: reqwest::Client,
    settings: ChatSettings,
    history: History,
}

impl std::fmt::Debug for GeminiSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiSession")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl GeminiSession {
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

    fn url(&self) -> String {
        format!(
            "{}/v1beta/models/{}:streamGenerateContent?alt=sse",
            self.settings.base_url.trim_end_matches('/'),
            self.settings.model
        )
    }
}

#[async_trait::async_trait]
impl ChatSession for GeminiSession {
    async fn send_message_stream(&self, message: &str) -> Result<FragmentStream> {
        let message = validate_message(message)?;
        let turn = self.history.begin().await;

        let body = request_body(
            turn.exchanges(),
            &message,
            self.settings.system_instruction.as_deref(),
        );

        let mut rb = self.http.post(self.url()).json(&body);
        if let Some(k) = &self.settings.api_key {
            rb = rb.header("x-goog-api-key", k);
        }

        tracing::debug!(
            model = %self.settings.model,
            history_len = turn.exchanges().len(),
            "Opening Gemini stream"
        );

        let resp = check_status(rb.send().await?).await?;
        let payloads = sse::data_stream(resp);

        let out = async_stream::try_stream! {
            let mut reply = String::new();

            futures::pin_mut!(payloads);
            while let Some(data) = payloads.next().await {
                let data = data?;
                let text = parse_chunk(&data)?;
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

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

impl Content {
    fn text(role: Option<&str>, text: &str) -> Self {
        Self {
            role: role.map(ToString::to_string),
            parts: vec![Part {
                text: Some(text.to_string()),
            }],
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    prompt_feedback: Option<PromptFeedback>,
    #[serde(default)]
    error: Option<ApiErrorBody>,
}

#[derive(Debug, Default, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<Content>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
}

fn request_body(
    history: &[Exchange],
    message: &str,
    system_instruction: Option<&str>,
) -> GenerateContentRequest {
    let mut contents = Vec::with_capacity(history.len() * 2 + 1);
    for exchange in history {
        contents.push(Content::text(Some("user"), &exchange.user));
        contents.push(Content::text(Some("model"), &exchange.model));
    }
    contents.push(Content::text(Some("user"), message));

    GenerateContentRequest {
        contents,
        system_instruction: system_instruction.map(|s| Content::text(None, s)),
    }
}

/// Extract the text of one streamed response chunk.
fn parse_chunk(data: &str) -> Result<String> {
    let chunk: GenerateContentResponse = serde_json::from_str(data)?;

    if let Some(error) = chunk.error {
        return Err(error.into_error(0));
    }

    if chunk.candidates.is_empty()
        && let Some(reason) = chunk.prompt_feedback.and_then(|f| f.block_reason)
    {
        return Err(ChatError::Api {
            status: 0,
            message: format!("Response was blocked: {reason}"),
        });
    }

    let text = chunk
        .candidates
        .first()
        .and_then(|c| c.content.as_ref())
        .map(|c| {
            c.parts
                .iter()
                .filter_map(|p| p.text.as_deref())
                .collect::<String>()
        })
        .unwrap_or_default();

    Ok(text)
}
