//! Conversation history held by a chat session.

use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};

/// One completed user/model exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exchange {
    /// Message the user sent.
    pub user: String,
    /// Full reply the model produced.
    pub model: String,
}

/// Shared, turn-serialized conversation history.
///
/// [`History::begin`] takes the history for the duration of one turn; a
/// second turn on the same session waits until the first stream finishes or
/// is dropped.
#[derive(Debug, Clone, Default)]
pub struct History {
    inner: Arc<Mutex<Vec<Exchange>>>,
}

impl History {
    /// Create an empty history.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the history for one turn.
    pub async fn begin(&self) -> TurnGuard {
        TurnGuard {
            guard: Arc::clone(&self.inner).lock_owned().await,
        }
    }

    /// Copy of all recorded exchanges.
    pub async fn snapshot(&self) -> Vec<Exchange> {
        self.inner.lock().await.clone()
    }

    /// Number of recorded exchanges.
    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }

    /// Check if no exchange has been recorded.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

/// Exclusive access to the history while a turn is in flight.
#[derive(Debug)]
pub struct TurnGuard {
    guard: OwnedMutexGuard<Vec<Exchange>>,
}

impl TurnGuard {
    /// Exchanges recorded before this turn.
    #[must_use]
    pub fn exchanges(&self) -> &[Exchange] {
        &self.guard
    }

    /// Record the completed exchange and release the history.
    pub fn record(mut self, user: impl Into<String>, model: impl Into<String>) {
        self.guard.push(Exchange {
            user: user.into(),
            model: model.into(),
        });
    }
}
