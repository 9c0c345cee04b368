//! Input controller state machine.
//!
//! ```text
//! Idle --submit(non-empty)--> Sending --first fragment--> Streaming
//!   ^                            |                            |
//!   +-------- end or fault ------+----------------------------+
//! ```
//!
//! `Disabled` is terminal and only entered at construction, when the widget
//! has no usable chat session. The state is the mirror image of "a turn is in
//! flight": a second submit is refused while the first is running rather
//! than queued behind a lock.

use serde::Serialize;
use tokio::sync::{broadcast, watch};

use crate::events::ViewEvent;

/// State of the widget's input form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InputState {
    /// Input enabled, awaiting a submit.
    Idle,
    /// Request sent, loading placeholder shown, no fragment yet.
    Sending,
    /// Fragments arriving and being rendered.
    Streaming,
    /// No credential configured; the form is never usable.
    Disabled,
}

impl InputState {
    /// Whether a turn is currently in flight.
    #[must_use]
    pub fn in_flight(self) -> bool {
        matches!(self, Self::Sending | Self::Streaming)
    }
}

/// Result of offering text to the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Submit {
    /// Empty or whitespace-only text; nothing happened.
    Ignored,
    /// A turn is already in flight.
    Busy,
    /// The widget is disabled.
    Unavailable,
    /// Moved to `Sending`; carries the trimmed message.
    Accepted(String),
}

/// Owns the input state and announces enable/disable to the page.
#[derive(Debug)]
pub struct InputController {
    state: watch::Sender<InputState>,
    events: broadcast::Sender<ViewEvent>,
}

impl InputController {
    /// Create an idle controller.
    #[must_use]
    pub fn new(events: broadcast::Sender<ViewEvent>) -> Self {
        Self::with_state(InputState::Idle, events)
    }

    /// Create a permanently disabled controller.
    #[must_use]
    pub fn disabled(events: broadcast::Sender<ViewEvent>) -> Self {
        Self::with_state(InputState::Disabled, events)
    }

    fn with_state(initial: InputState, events: broadcast::Sender<ViewEvent>) -> Self {
        let (state, _) = watch::channel(initial);
        Self { state, events }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> InputState {
        *self.state.borrow()
    }

    /// Watch state transitions.
    #[must_use]
    pub fn watch(&self) -> watch::Receiver<InputState> {
        self.state.subscribe()
    }

    /// Offer submitted text. Only an idle controller with non-blank text
    /// moves to `Sending`.
    pub fn try_begin(&self, text: &str) -> Submit {
        let message = text.trim();
        if message.is_empty() {
            return Submit::Ignored;
        }

        let mut outcome = Submit::Busy;
        self.state.send_if_modified(|state| match *state {
            InputState::Idle => {
                *state = InputState::Sending;
                outcome = Submit::Accepted(message.to_string());
                true
            }
            InputState::Disabled => {
                outcome = Submit::Unavailable;
                false
            }
            InputState::Sending | InputState::Streaming => false,
        });

        if matches!(outcome, Submit::Accepted(_)) {
            self.publish(ViewEvent::InputDisabled);
        }
        outcome
    }

    /// First fragment arrived: `Sending` becomes `Streaming`.
    pub fn on_first_fragment(&self) {
        self.state.send_if_modified(|state| {
            if *state == InputState::Sending {
                *state = InputState::Streaming;
                true
            } else {
                false
            }
        });
    }

    /// Turn ended (normally or by fault): back to `Idle`, input refocused.
    pub fn finish(&self) {
        let finished = self.state.send_if_modified(|state| {
            if state.in_flight() {
                *state = InputState::Idle;
                true
            } else {
                false
            }
        });

        if finished {
            self.publish(ViewEvent::InputEnabled { focus: true });
        }
    }

    /// Wait until no turn is in flight.
    pub async fn settled(&self) -> InputState {
        let mut rx = self.state.subscribe();
        match rx.wait_for(|s| !s.in_flight()).await {
            Ok(state) => *state,
            Err(_) => self.state(),
        }
    }

    fn publish(&self, event: ViewEvent) {
        let _ = self.events.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn controller() -> (InputController, broadcast::Receiver<ViewEvent>) {
        let (tx, rx) = broadcast::channel(16);
        (InputController::new(tx), rx)
    }

    #[test]
    fn test_full_cycle() {
        let (c, mut rx) = controller();
        assert_eq!(c.state(), InputState::Idle);

        assert_eq!(c.try_begin("  hello "), Submit::Accepted("hello".to_string()));
        assert_eq!(c.state(), InputState::Sending);
        assert_eq!(rx.try_recv().unwrap(), ViewEvent::InputDisabled);

        c.on_first_fragment();
        assert_eq!(c.state(), InputState::Streaming);

        c.finish();
        assert_eq!(c.state(), InputState::Idle);
        assert_eq!(
            rx.try_recv().unwrap(),
            ViewEvent::InputEnabled { focus: true }
        );
    }

    #[test]
    fn test_blank_submit_is_noop() {
        let (c, mut rx) = controller();
        assert_eq!(c.try_begin(""), Submit::Ignored);
        assert_eq!(c.try_begin(" \t\n "), Submit::Ignored);
        assert_eq!(c.state(), InputState::Idle);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_second_submit_while_in_flight_is_busy() {
        let (c, _rx) = controller();
        assert!(matches!(c.try_begin("one"), Submit::Accepted(_)));
        assert_eq!(c.try_begin("two"), Submit::Busy);

        c.on_first_fragment();
        assert_eq!(c.try_begin("three"), Submit::Busy);
    }

    #[test]
    fn test_fault_before_first_fragment_returns_to_idle() {
        let (c, _rx) = controller();
        assert!(matches!(c.try_begin("hi"), Submit::Accepted(_)));
        c.finish();
        assert_eq!(c.state(), InputState::Idle);
    }

    #[test]
    fn test_disabled_is_terminal() {
        let (tx, mut rx) = broadcast::channel(4);
        let c = InputController::disabled(tx);

        assert_eq!(c.try_begin("hi"), Submit::Unavailable);
        c.on_first_fragment();
        c.finish();
        assert_eq!(c.state(), InputState::Disabled);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_settled_waits_for_finish() {
        let (tx, _rx) = broadcast::channel(4);
        let c = std::sync::Arc::new(InputController::new(tx));
        assert!(matches!(c.try_begin("hi"), Submit::Accepted(_)));

        let waiter = {
            let c = std::sync::Arc::clone(&c);
            tokio::spawn(async move { c.settled().await })
        };
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        c.finish();
        assert_eq!(waiter.await.unwrap(), InputState::Idle);
    }
}
