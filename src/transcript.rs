//! Transcript view.
//!
//! The transcript is an ordered, append-only list of turns. Only the most
//! recent model turn may be open; it is the slot the streaming reply is
//! re-rendered into. Every mutation is published to the page as a
//! [`ViewEvent`], after which the page scrolls to the newest turn.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::error::TranscriptError;
use crate::events::ViewEvent;
use crate::render::escape_text;

/// Author of a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    /// Text typed into the form.
    User,
    /// Reply generated by the hosted model.
    Model,
}

impl Sender {
    /// CSS class of the turn's element.
    #[must_use]
    pub fn css_class(self) -> &'static str {
        match self {
            Self::User => "message user-message",
            Self::Model => "message model-message",
        }
    }
}

/// One message entry in the transcript.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Turn {
    /// Identifier, strictly increasing in append order.
    pub id: u64,
    /// Author of the turn.
    pub sender: Sender,
    /// Display markup.
    pub markup: String,
}

/// Reference to a turn's display slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TurnHandle(u64);

impl TurnHandle {
    /// Turn identifier this handle points at.
    #[must_use]
    pub fn id(self) -> u64 {
        self.0
    }
}

/// Ordered list of turns with a single open slot.
#[derive(Debug)]
pub struct Transcript {
    turns: Vec<Turn>,
    next_id: u64,
    open: Option<u64>,
    scroll_anchor: Option<u64>,
    events: broadcast::Sender<ViewEvent>,
}

impl Transcript {
    /// Create an empty transcript publishing to `events`.
    #[must_use]
    pub fn new(events: broadcast::Sender<ViewEvent>) -> Self {
        Self {
            turns: Vec::new(),
            next_id: 1,
            open: None,
            scroll_anchor: None,
            events,
        }
    }

    /// Append a turn and return a handle to its slot.
    ///
    /// Content with `is_markup == false` is escaped and displayed inert.
    /// Appending a model turn opens it for updates and closes any turn that
    /// was open before.
    pub fn append(&mut self, sender: Sender, content: &str, is_markup: bool) -> TurnHandle {
        let id = self.next_id;
        self.next_id += 1;

        let markup = if is_markup {
            content.to_string()
        } else {
            escape_text(content)
        };

        self.open = (sender == Sender::Model).then_some(id);
        self.turns.push(Turn {
            id,
            sender,
            markup: markup.clone(),
        });
        self.scroll_anchor = Some(id);

        self.publish(ViewEvent::TurnAppended {
            id,
            sender,
            html: markup,
        });

        TurnHandle(id)
    }

    /// Replace the markup of the open turn.
    pub fn update(&mut self, handle: TurnHandle, markup: &str) -> Result<(), TranscriptError> {
        let id = handle.id();
        if self.open != Some(id) {
            return if self.turns.iter().any(|t| t.id == id) {
                Err(TranscriptError::Closed(id))
            } else {
                Err(TranscriptError::UnknownTurn(id))
            };
        }

        let turn = self
            .turns
            .iter_mut()
            .rev()
            .find(|t| t.id == id)
            .ok_or(TranscriptError::UnknownTurn(id))?;
        markup.clone_into(&mut turn.markup);
        self.scroll_anchor = Some(id);

        self.publish(ViewEvent::TurnUpdated {
            id,
            html: markup.to_string(),
        });
        Ok(())
    }

    /// Close the open turn so it can no longer be updated.
    pub fn close(&mut self, handle: TurnHandle) {
        if self.open == Some(handle.id()) {
            self.open = None;
        }
    }

    /// All turns in display order.
    #[must_use]
    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    /// Number of turns.
    #[must_use]
    pub fn len(&self) -> usize {
        self.turns.len()
    }

    /// Check if the transcript has no turns.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Handle of the open turn, if any.
    #[must_use]
    pub fn open_turn(&self) -> Option<TurnHandle> {
        self.open.map(TurnHandle)
    }

    /// Identifier of the turn the view is scrolled to.
    #[must_use]
    pub fn scroll_anchor(&self) -> Option<u64> {
        self.scroll_anchor
    }

    /// Render the whole transcript as an HTML fragment.
    #[must_use]
    pub fn to_html(&self) -> String {
        self.turns.iter().fold(String::new(), |mut out, turn| {
            out.push_str(&format!(
                r#"<div class="{}" data-turn-id="{}">{}</div>"#,
                turn.sender.css_class(),
                turn.id,
                turn.markup
            ));
            out
        })
    }

    fn publish(&self, event: ViewEvent) {
        // No connected page is fine; it resyncs from `to_html` on connect.
        let _ = self.events.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transcript() -> (Transcript, broadcast::Receiver<ViewEvent>) {
        let (tx, rx) = broadcast::channel(16);
        (Transcript::new(tx), rx)
    }

    #[test]
    fn test_append_escapes_user_text() {
        let (mut t, mut rx) = transcript();
        let handle = t.append(Sender::User, "<img src=x onerror=alert(1)>", false);

        assert_eq!(t.len(), 1);
        assert!(t.turns()[0].markup.starts_with("&lt;img"));
        assert_eq!(t.scroll_anchor(), Some(handle.id()));
        assert!(t.open_turn().is_none());

        match rx.try_recv().unwrap() {
            ViewEvent::TurnAppended { sender, html, .. } => {
                assert_eq!(sender, Sender::User);
                assert!(!html.contains("<img"));
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn test_model_turn_is_open_and_updatable() {
        let (mut t, mut rx) = transcript();
        t.append(Sender::User, "hi", false);
        let model = t.append(Sender::Model, "<em>...</em>", true);

        assert_eq!(t.open_turn(), Some(model));
        t.update(model, "<p>Hello</p>").unwrap();
        assert_eq!(t.turns()[1].markup, "<p>Hello</p>");

        let _ = rx.try_recv();
        let _ = rx.try_recv();
        assert_eq!(
            rx.try_recv().unwrap(),
            ViewEvent::TurnUpdated {
                id: model.id(),
                html: "<p>Hello</p>".to_string()
            }
        );
    }

    #[test]
    fn test_closed_and_unknown_turns_reject_updates() {
        let (mut t, _rx) = transcript();
        let user = t.append(Sender::User, "hi", false);
        let model = t.append(Sender::Model, "", true);

        assert_eq!(t.update(user, "x"), Err(TranscriptError::Closed(user.id())));
        assert_eq!(
            t.update(TurnHandle(99), "x"),
            Err(TranscriptError::UnknownTurn(99))
        );

        t.close(model);
        assert_eq!(t.update(model, "x"), Err(TranscriptError::Closed(model.id())));
    }

    #[test]
    fn test_new_model_turn_closes_previous() {
        let (mut t, _rx) = transcript();
        let first = t.append(Sender::Model, "", true);
        let second = t.append(Sender::Model, "", true);

        assert_eq!(t.open_turn(), Some(second));
        assert!(t.update(first, "x").is_err());
    }

    #[test]
    fn test_to_html_keeps_order() {
        let (mut t, _rx) = transcript();
        t.append(Sender::User, "a & b", false);
        t.append(Sender::Model, "<p>c</p>", true);

        let html = t.to_html();
        let user_pos = html.find("user-message").unwrap();
        let model_pos = html.find("model-message").unwrap();
        assert!(user_pos < model_pos);
        assert!(html.contains("a &amp; b"));
        assert!(html.contains(r#"data-turn-id="2""#));
    }
}
