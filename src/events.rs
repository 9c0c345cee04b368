//! View events pushed to the browser.
//!
//! Every mutation of a widget's transcript or input state is published as a
//! [`ViewEvent`]. The page applies them in order: append or replace a turn's
//! markup and scroll the transcript to the newest turn, or toggle the form.
//! A page that connects (or falls behind) first receives a snapshot of the
//! whole transcript; a repeated `turn.appended` for a known id replaces it.
//!
//! # Example
//!
//! ```rust
//! use chat_widget::events::{ViewEvent, sse_event};
//!
//! let event = ViewEvent::InputEnabled { focus: true };
//! let sse = sse_event(&event);
//! assert!(sse.starts_with("event: input.enabled\n"));
//! ```

use serde::{Deserialize, Serialize};

use crate::transcript::Sender;

/// Events describing changes to the widget's view.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "data")]
pub enum ViewEvent {
    /// A new turn was appended to the transcript.
    #[serde(rename = "turn.appended")]
    TurnAppended {
        /// Turn identifier, used as the DOM slot key.
        id: u64,
        /// Author of the turn.
        sender: Sender,
        /// Display markup (already escaped for user turns).
        html: String,
    },

    /// The open turn's markup was replaced.
    #[serde(rename = "turn.updated")]
    TurnUpdated {
        /// Turn identifier.
        id: u64,
        /// Replacement markup.
        html: String,
    },

    /// Whole transcript, sent when a page connects or falls behind.
    #[serde(rename = "transcript.snapshot")]
    Snapshot {
        /// Transcript HTML fragment.
        html: String,
        /// Whether the form currently accepts input.
        input_enabled: bool,
    },

    /// A turn is in flight; the form must not accept input.
    #[serde(rename = "input.disabled")]
    InputDisabled,

    /// The turn finished; the form accepts input again.
    #[serde(rename = "input.enabled")]
    InputEnabled {
        /// Whether the page should move focus back to the text input.
        focus: bool,
    },

    /// The widget cannot be used at all (missing credential).
    #[serde(rename = "widget.unavailable")]
    Unavailable {
        /// Static notice markup.
        html: String,
    },
}

impl ViewEvent {
    /// SSE event name for this event.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::TurnAppended { .. } => "turn.appended",
            Self::TurnUpdated { .. } => "turn.updated",
            Self::Snapshot { .. } => "transcript.snapshot",
            Self::InputDisabled => "input.disabled",
            Self::InputEnabled { .. } => "input.enabled",
            Self::Unavailable { .. } => "widget.unavailable",
        }
    }
}

/// Convert a [`ViewEvent`] to an SSE-formatted string.
///
/// The output carries an `event:` line for `EventSource` listeners and a
/// `data:` line with the JSON payload.
pub fn sse_event(evt: &ViewEvent) -> String {
    let json = serde_json::to_string(evt).unwrap_or_else(|e| {
        serde_json::json!({ "type": "error", "data": { "message": e.to_string() } }).to_string()
    });

    format!("event: {}\ndata: {json}\n\n", evt.name())
}
