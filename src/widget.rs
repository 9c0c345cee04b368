//! Chat widget context and store.
//!
//! A [`ChatWidget`] is the explicit context for one page: its chat session,
//! its transcript and its input controller. Handlers reach it through the
//! [`WidgetStore`] instead of ambient globals.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use chat_widget::chat::{ChatSession, ScriptedSession};
//! use chat_widget::widget::{SubmitOutcome, WidgetStore};
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let store = WidgetStore::new(Arc::new(|| {
//!     Arc::new(ScriptedSession::new(["Hello"])) as Arc<dyn ChatSession>
//! }));
//! let widget = store.create();
//!
//! match widget.submit("hi").await {
//!     SubmitOutcome::Accepted(turn) => turn.await.unwrap(),
//!     other => panic!("unexpected {other:?}"),
//! }
//! assert_eq!(widget.turn_count().await, 2);
//! # });
//! ```

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::StreamExt;
use tokio::sync::{Mutex, broadcast};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::chat::{ChatSession, SessionFactory};
use crate::controller::{InputController, InputState, Submit};
use crate::error::ChatError;
use crate::events::ViewEvent;
use crate::render::{LOADING_PLACEHOLDER, error_block, render_markdown};
use crate::transcript::{Sender, Transcript, Turn, TurnHandle};

/// Default widget timeout (30 minutes).
pub const DEFAULT_WIDGET_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Capacity of each widget's view event channel.
const EVENT_CAPACITY: usize = 256;

/// Outcome of a form submission.
#[derive(Debug)]
pub enum SubmitOutcome {
    /// Blank text; no turn was created.
    Ignored,
    /// A turn is already in flight.
    Busy,
    /// The widget has no chat session.
    Unavailable,
    /// Turns appended; the reply streams on the returned task.
    Accepted(JoinHandle<()>),
}

/// One chat widget: session, transcript and input controller.
pub struct ChatWidget {
    id: String,
    session: Option<Arc<dyn ChatSession>>,
    transcript: Mutex<Transcript>,
    controller: InputController,
    events: broadcast::Sender<ViewEvent>,
    notice: Option<String>,
    created_at: DateTime<Utc>,
    last_activity: RwLock<DateTime<Utc>>,
}

impl std::fmt::Debug for ChatWidget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatWidget")
            .field("id", &self.id)
            .field("model", &self.session.as_ref().map(|s| s.model().to_string()))
            .field("state", &self.controller.state())
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}

impl ChatWidget {
    /// Create a widget bound to a chat session.
    #[must_use]
    pub fn new(id: impl Into<String>, session: Arc<dyn ChatSession>) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Arc::new(Self::build(
            id.into(),
            Some(session),
            InputController::new(events.clone()),
            events,
            None,
        ))
    }

    /// Create a permanently disabled widget showing `notice` markup.
    #[must_use]
    pub fn unavailable(id: impl Into<String>, notice: impl Into<String>) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Arc::new(Self::build(
            id.into(),
            None,
            InputController::disabled(events.clone()),
            events,
            Some(notice.into()),
        ))
    }

    fn build(
        id: String,
        session: Option<Arc<dyn ChatSession>>,
        controller: InputController,
        events: broadcast::Sender<ViewEvent>,
        notice: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            session,
            transcript: Mutex::new(Transcript::new(events.clone())),
            controller,
            events,
            notice,
            created_at: now,
            last_activity: RwLock::new(now),
        }
    }

    /// Widget identifier.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Current input state.
    #[must_use]
    pub fn state(&self) -> InputState {
        self.controller.state()
    }

    /// Static notice shown when the widget is disabled.
    #[must_use]
    pub fn notice(&self) -> Option<&str> {
        self.notice.as_deref()
    }

    /// Subscribe to view events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ViewEvent> {
        self.touch();
        self.events.subscribe()
    }

    /// Wait until no turn is in flight and return the resulting state.
    pub async fn settled(&self) -> InputState {
        self.controller.settled().await
    }

    /// Full transcript as an HTML fragment.
    pub async fn transcript_html(&self) -> String {
        self.transcript.lock().await.to_html()
    }

    /// Event carrying the whole view, for a page that (re)connects.
    pub async fn snapshot(&self) -> ViewEvent {
        if let Some(notice) = &self.notice {
            return ViewEvent::Unavailable {
                html: notice.clone(),
            };
        }
        let html = self.transcript_html().await;
        ViewEvent::Snapshot {
            html,
            input_enabled: self.state() == InputState::Idle,
        }
    }

    /// Copy of all turns.
    pub async fn turns(&self) -> Vec<Turn> {
        self.transcript.lock().await.turns().to_vec()
    }

    /// Number of turns.
    pub async fn turn_count(&self) -> usize {
        self.transcript.lock().await.len()
    }

    /// Handle a form submission.
    ///
    /// Non-blank text on an idle widget appends the user turn and a model
    /// turn holding the loading placeholder, then streams the reply on a
    /// spawned task. Anything else leaves the widget untouched.
    pub async fn submit(self: &Arc<Self>, text: &str) -> SubmitOutcome {
        self.touch();

        // The only await is the lock. From `try_begin` to `spawn` nothing
        // yields, so a dropped submit never leaves the state in flight.
        let mut transcript = self.transcript.lock().await;

        let message = match self.controller.try_begin(text) {
            Submit::Accepted(message) => message,
            Submit::Ignored => return SubmitOutcome::Ignored,
            Submit::Busy => {
                tracing::debug!(widget_id = %self.id, "Submit while busy");
                return SubmitOutcome::Busy;
            }
            Submit::Unavailable => return SubmitOutcome::Unavailable,
        };

        transcript.append(Sender::User, &message, false);
        let slot = transcript.append(Sender::Model, LOADING_PLACEHOLDER, true);
        drop(transcript);

        let widget = Arc::clone(self);
        SubmitOutcome::Accepted(tokio::spawn(async move {
            widget.run_turn(message, slot).await;
        }))
    }

    async fn run_turn(&self, message: String, slot: TurnHandle) {
        let request_id = Uuid::new_v4().to_string();
        tracing::info!(
            name: "chat.turn.started",
            widget_id = %self.id,
            request_id = %request_id,
            message_length = message.len(),
            "Chat turn started"
        );

        let mut reply = String::new();
        match self.stream_reply(&message, slot, &mut reply).await {
            Ok(fragments) => {
                tracing::info!(
                    name: "chat.turn.completed",
                    widget_id = %self.id,
                    request_id = %request_id,
                    fragments,
                    reply_length = reply.len(),
                    "Chat turn completed"
                );
            }
            Err(e) => {
                tracing::error!(
                    name: "chat.turn.failed",
                    widget_id = %self.id,
                    request_id = %request_id,
                    error = %e,
                    partial_length = reply.len(),
                    "Chat turn failed"
                );
                let mut markup = if reply.is_empty() {
                    String::new()
                } else {
                    render_markdown(&reply)
                };
                markup.push_str(&error_block(&e.description()));
                self.update_slot(slot, &markup).await;
            }
        }

        self.transcript.lock().await.close(slot);
        self.controller.finish();
        self.touch();
    }

    /// Consume the reply stream, re-rendering the whole reply per fragment.
    async fn stream_reply(
        &self,
        message: &str,
        slot: TurnHandle,
        reply: &mut String,
    ) -> Result<usize, ChatError> {
        let Some(session) = &self.session else {
            return Err(ChatError::Transport("No chat session".to_string()));
        };

        let mut stream = session.send_message_stream(message).await?;
        let mut fragments = 0usize;

        while let Some(fragment) = stream.next().await {
            let fragment = fragment?;
            if fragments == 0 {
                self.controller.on_first_fragment();
            }
            fragments += 1;

            reply.push_str(&fragment);
            let markup = render_markdown(reply);
            self.update_slot(slot, &markup).await;
            tracing::trace!(widget_id = %self.id, delta_length = fragment.len(), "Fragment rendered");
        }

        if fragments == 0 {
            // Nothing streamed: drop the placeholder so the turn is not left loading.
            self.update_slot(slot, "").await;
        }

        Ok(fragments)
    }

    async fn update_slot(&self, slot: TurnHandle, markup: &str) {
        if let Err(e) = self.transcript.lock().await.update(slot, markup) {
            tracing::warn!(widget_id = %self.id, error = %e, "Transcript update rejected");
        }
    }

    fn touch(&self) {
        let mut guard = self
            .last_activity
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        *guard = Utc::now();
    }

    /// Check if the widget has been idle longer than `timeout`.
    #[must_use]
    pub fn is_expired_with_timeout(&self, timeout: Duration) -> bool {
        if self.state().in_flight() {
            return false;
        }
        let last = *self
            .last_activity
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        (Utc::now() - last)
            .to_std()
            .is_ok_and(|idle| idle > timeout)
    }
}

/// Thread-safe store of widgets, one per page load.
#[derive(Clone)]
pub struct WidgetStore {
    inner: Arc<WidgetStoreInner>,
}

struct WidgetStoreInner {
    widgets: RwLock<HashMap<String, Arc<ChatWidget>>>,
    factory: Option<Arc<dyn SessionFactory>>,
    notice: String,
}

impl std::fmt::Debug for WidgetStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WidgetStore")
            .field("widgets", &self.len())
            .field("available", &self.is_available())
            .finish()
    }
}

impl WidgetStore {
    /// Store whose widgets get a fresh session from `factory`.
    #[must_use]
    pub fn new(factory: Arc<dyn SessionFactory>) -> Self {
        Self::build(Some(factory), String::new())
    }

    /// Store whose widgets are all disabled and show `notice`.
    #[must_use]
    pub fn unavailable(notice: impl Into<String>) -> Self {
        Self::build(None, notice.into())
    }

    fn build(factory: Option<Arc<dyn SessionFactory>>, notice: String) -> Self {
        Self {
            inner: Arc::new(WidgetStoreInner {
                widgets: RwLock::new(HashMap::new()),
                factory,
                notice,
            }),
        }
    }

    /// Whether new widgets can chat.
    #[must_use]
    pub fn is_available(&self) -> bool {
        self.inner.factory.is_some()
    }

    /// Create a new widget and return it.
    #[must_use]
    pub fn create(&self) -> Arc<ChatWidget> {
        let id = Uuid::new_v4().to_string();
        let widget = match &self.inner.factory {
            Some(factory) => ChatWidget::new(id.clone(), factory.create_session()),
            None => ChatWidget::unavailable(id.clone(), self.inner.notice.clone()),
        };

        self.inner
            .widgets
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, Arc::clone(&widget));
        widget
    }

    /// Get a widget by ID.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<Arc<ChatWidget>> {
        self.inner
            .widgets
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    /// Remove a widget by ID.
    pub fn remove(&self, id: &str) -> Option<Arc<ChatWidget>> {
        self.inner
            .widgets
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id)
    }

    /// Number of live widgets.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner
            .widgets
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Check if there are no widgets.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove widgets idle for longer than the default timeout.
    pub fn cleanup_expired(&self) -> usize {
        self.cleanup_expired_with_timeout(DEFAULT_WIDGET_TIMEOUT)
    }

    /// Remove widgets idle for longer than `timeout`.
    ///
    /// Widgets with a turn in flight are kept. Returns the number removed.
    pub fn cleanup_expired_with_timeout(&self, timeout: Duration) -> usize {
        let mut guard = self
            .inner
            .widgets
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let before = guard.len();
        guard.retain(|_, widget| !widget.is_expired_with_timeout(timeout));
        before - guard.len()
    }
}
