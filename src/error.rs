//! Error types for the chat widget.

use thiserror::Error;

/// Faults raised while talking to the hosted chat API.
#[derive(Error, Debug)]
pub enum ChatError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// API returned an error response.
    #[error("API error ({status}): {message}")]
    Api {
        /// HTTP status code (0 when the error arrived inside the stream).
        status: u16,
        /// Error message from the API.
        message: String,
    },

    /// The message was empty after trimming whitespace.
    #[error("Message must not be empty")]
    EmptyMessage,

    /// Scripted or upstream fault with a free-form description.
    #[error("{0}")]
    Transport(String),
}

impl ChatError {
    /// Text shown to the user inside the affected model turn.
    ///
    /// Falls back to a generic description when the fault carries none.
    #[must_use]
    pub fn description(&self) -> String {
        let text = match self {
            Self::Api { message, .. } => message.trim().to_string(),
            other => other.to_string().trim().to_string(),
        };
        if text.is_empty() {
            "Unknown error".to_string()
        } else {
            text
        }
    }
}

/// Faults raised by transcript mutation.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum TranscriptError {
    /// The handle does not refer to any turn.
    #[error("Unknown turn: {0}")]
    UnknownTurn(u64),

    /// The turn exists but is no longer open for updates.
    #[error("Turn {0} is closed")]
    Closed(u64),
}

/// Result type alias for chat operations.
pub type Result<T> = std::result::Result<T, ChatError>;
