//! Agent-backed provider: sessions, event routing and lifecycle.
//!
//! The local agent exposes a turn-based session that reports progress as
//! discrete events rather than as a pull-based stream. This module bridges
//! the two:
//!
//! ```text
//! AgentClient::create_session → AgentSession
//!   ├── subscribe() → raw events → router → text / reasoning queues
//!   ├── send(prompt)
//!   └── abort() / destroy()   (owned by SessionLifecycle, destroyed once)
//! ```
//!
//! [`stdio::StdioAgentClient`] implements the client over a spawned agent
//! CLI; tests substitute in-memory fakes.

pub mod events;
pub mod lifecycle;
pub mod router;
pub mod stdio;

use std::pin::Pin;

use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::AdapterError;

pub use events::SessionEvent;
pub use lifecycle::{AgentStream, SessionLifecycle, SessionOptions};
pub use router::OutputQueues;
pub use stdio::{AgentProcess, StdioAgentClient};

/// Raw, unclassified session events in arrival order.
pub type RawEventStream = Pin<Box<dyn Stream<Item = Value> + Send>>;

/// Parameters for creating a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Model identifier.
    pub model: String,
    /// Whether delta events should be emitted.
    pub streaming: bool,
    /// Optional system prompt for the session.
    pub system_message: Option<String>,
}

/// A client able to open agent sessions.
#[async_trait]
pub trait AgentClient: Send + Sync {
    /// Creates a session for one conversation turn.
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError`] if the agent refuses or cannot be reached.
    async fn create_session(
        &self,
        config: &SessionConfig,
    ) -> Result<Box<dyn AgentSession>, AdapterError>;
}

/// A live agent session.
#[async_trait]
pub trait AgentSession: Send + Sync {
    /// Session identifier.
    fn id(&self) -> &str;

    /// Subscribes to the session's raw events.
    ///
    /// A session supports a single subscription.
    fn subscribe(&self) -> RawEventStream;

    /// Sends a prompt without waiting for the turn to finish.
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError`] if the prompt could not be delivered.
    async fn send(&self, prompt: &str) -> Result<(), AdapterError>;

    /// Asks the session to stop generating.
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError`] if the request could not be delivered.
    async fn abort(&self) -> Result<(), AdapterError>;

    /// Releases the session. Repeated calls are harmless.
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError`] if the backend failed to release it.
    async fn destroy(&self) -> Result<(), AdapterError>;

    /// Sends a prompt and waits for the turn to finish.
    ///
    /// Returns the final assistant message, or the concatenated text deltas
    /// if no final message was emitted, or `None` if the turn produced no
    /// text.
    ///
    /// # Errors
    ///
    /// - [`AdapterError::Dispatch`] if the prompt could not be sent.
    /// - [`AdapterError::Session`] if the backend reports an error or the
    ///   event stream ends before the turn completes.
    async fn send_and_wait(&self, prompt: &str) -> Result<Option<String>, AdapterError> {
        let mut events = self.subscribe();
        self.send(prompt).await.map_err(AdapterError::dispatch)?;

        let mut deltas = String::new();
        let mut final_message = None;
        while let Some(raw) = events.next().await {
            match SessionEvent::classify(&raw) {
                Ok(SessionEvent::MessageDelta(text)) => deltas.push_str(&text),
                Ok(SessionEvent::Message(text)) => final_message = Some(text),
                Ok(SessionEvent::Error { message, kind }) => {
                    return Err(AdapterError::Session { message, kind });
                }
                Ok(SessionEvent::Idle) => {
                    debug!(session_id = self.id(), "turn complete");
                    return Ok(final_message.or_else(|| (!deltas.is_empty()).then_some(deltas)));
                }
                Ok(SessionEvent::ReasoningDelta(_) | SessionEvent::Other(_)) => {}
                Err(reason) => warn!(session_id = self.id(), %reason, "ignoring malformed event"),
            }
        }

        Err(AdapterError::Session {
            message: "event stream ended before the turn completed".to_string(),
            kind: None,
        })
    }
}
