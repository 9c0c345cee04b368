//! In-process chat session.
//!
//! Replays a fixed script of fragments, optionally ending in a fault, or
//! echoes the user's message back word by word. Backs the `offline` backend
//! and the test suites.

use std::sync::Arc;

use tokio::sync::Notify;

use crate::error::{ChatError, Result};

use super::history::History;
use super::{ChatSession, FragmentStream, validate_message};

#[derive(Debug, Clone)]
enum Script {
    Fixed {
        fragments: Vec<String>,
        fault: Option<String>,
    },
    Echo,
}

/// A chat session that never leaves the process.
#[derive(Debug, Clone)]
pub struct ScriptedSession {
    script: Script,
    gate: Option<Arc<Notify>>,
    history: History,
}

impl ScriptedSession {
    /// Reply with `fragments`, in order, on every turn.
    pub fn new<I, S>(fragments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            script: Script::Fixed {
                fragments: fragments.into_iter().map(Into::into).collect(),
                fault: None,
            },
            gate: None,
            history: History::new(),
        }
    }

    /// Reply with `fragments`, then fail with `description`.
    pub fn failing<I, S>(fragments: I, description: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut session = Self::new(fragments);
        if let Script::Fixed { fault, .. } = &mut session.script {
            *fault = Some(description.into());
        }
        session
    }

    /// Echo the user's message back as a short markdown reply.
    #[must_use]
    pub fn echo() -> Self {
        Self {
            script: Script::Echo,
            gate: None,
            history: History::new(),
        }
    }

    /// Hold every reply until `gate` is notified.
    #[must_use]
    pub fn gated(mut self, gate: Arc<Notify>) -> Self {
        self.gate = Some(gate);
        self
    }

    /// History recorded so far.
    #[must_use]
    pub fn history(&self) -> &History {
        &self.history
    }

    fn fragments_for(&self, message: &str) -> (Vec<String>, Option<String>) {
        match &self.script {
            Script::Fixed { fragments, fault } => (fragments.clone(), fault.clone()),
            Script::Echo => {
                let reply = format!("You said:\n\n> {message}");
                let fragments = reply
                    .split_inclusive(' ')
                    .map(ToString::to_string)
                    .collect();
                (fragments, None)
            }
        }
    }
}

#[async_trait::async_trait]
impl ChatSession for ScriptedSession {
    async fn send_message_stream(&self, message: &str) -> Result<FragmentStream> {
        let message = validate_message(message)?;
        let turn = self.history.begin().await;
        let (fragments, fault) = self.fragments_for(&message);
        let gate = self.gate.clone();

        let out = async_stream::try_stream! {
            if let Some(gate) = gate {
                gate.notified().await;
            }

            let mut reply = String::new();
            for fragment in fragments {
                reply.push_str(&fragment);
                yield fragment;
                tokio::task::yield_now().await;
            }

            if let Some(description) = fault {
                Err::<(), _>(ChatError::Transport(description))?;
            }

            if !reply.is_empty() {
                turn.record(message, reply);
            }
        };

        Ok(Box::pin(out))
    }

    fn model(&self) -> &str {
        "scripted"
    }
}

#[cfg(test)]
mod tests {
    use futures::StreamExt;

    use super::*;

    async fn collect(stream: FragmentStream) -> Vec<Result<String>> {
        stream.collect().await
    }

    #[tokio::test]
    async fn test_fixed_script_records_history() {
        let session = ScriptedSession::new(["Hel", "lo"]);
        let items = collect(session.send_message_stream(" hi ").await.unwrap()).await;

        let texts: Vec<String> = items.into_iter().map(Result::unwrap).collect();
        assert_eq!(texts, ["Hel", "lo"]);

        let history = session.history().snapshot().await;
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].user, "hi");
        assert_eq!(history[0].model, "Hello");
    }

    #[tokio::test]
    async fn test_failing_script_ends_with_fault() {
        let session = ScriptedSession::failing(["partial"], "network down");
        let items = collect(session.send_message_stream("hi").await.unwrap()).await;

        assert_eq!(items.len(), 2);
        assert_eq!(items[0].as_deref().unwrap(), "partial");
        assert_eq!(items[1].as_ref().unwrap_err().description(), "network down");
        assert!(session.history().is_empty().await);
    }

    #[tokio::test]
    async fn test_empty_message_rejected() {
        let session = ScriptedSession::echo();
        let result = session.send_message_stream("   ").await;
        assert!(matches!(result, Err(ChatError::EmptyMessage)));
    }

    #[tokio::test]
    async fn test_echo_quotes_message() {
        let session = ScriptedSession::echo();
        let items = collect(session.send_message_stream("ping pong").await.unwrap()).await;
        let reply: String = items.into_iter().map(Result::unwrap).collect();
        assert_eq!(reply, "You said:\n\n> ping pong");
    }
}
