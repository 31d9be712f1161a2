//! Session event router.
//!
//! Demultiplexes one session's raw event stream into the text and
//! reasoning output queues. Error and idle events are terminal: the router
//! stops reading after either, and the caller decides what to tear down.

use futures_util::StreamExt;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use super::RawEventStream;
use super::events::SessionEvent;
use crate::error::AdapterError;
use crate::queue::BoundedEventQueue;

/// The output channels fed by one session.
#[derive(Debug, Clone)]
pub struct OutputQueues {
    /// Assistant text deltas.
    pub text: BoundedEventQueue<String>,
    /// Reasoning deltas.
    pub reasoning: BoundedEventQueue<String>,
}

impl OutputQueues {
    /// Creates both queues with the same capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            text: BoundedEventQueue::new(capacity),
            reasoning: BoundedEventQueue::new(capacity),
        }
    }

    /// Ends both queues normally.
    pub fn complete_all(&self) {
        self.text.complete();
        self.reasoning.complete();
    }

    /// Fails both queues with the same error.
    pub fn fail_all(&self, error: &AdapterError) {
        self.text.fail(error.clone());
        self.reasoning.fail(error.clone());
    }
}

/// How routing of a session's events ended.
#[derive(Debug, Clone)]
pub enum RouteOutcome {
    /// Keep routing.
    Continue,
    /// The turn completed; both queues are done.
    Finished,
    /// The session failed; both queues carry the error.
    Failed(AdapterError),
    /// Routing was cancelled; queues were left for the canceller to close.
    Cancelled,
}

/// Routes a single raw event into the queues.
pub fn route_event(raw: &Value, queues: &OutputQueues) -> RouteOutcome {
    match SessionEvent::classify(raw) {
        Ok(SessionEvent::MessageDelta(text)) => {
            queues.text.push(text);
            RouteOutcome::Continue
        }
        Ok(SessionEvent::ReasoningDelta(text)) => {
            queues.reasoning.push(text);
            RouteOutcome::Continue
        }
        Ok(SessionEvent::Message(content)) => {
            debug!(len = content.len(), "final assistant message received");
            RouteOutcome::Continue
        }
        Ok(SessionEvent::Error { message, kind }) => {
            error!(%message, kind = kind.as_deref(), "agent session reported an error");
            let err = AdapterError::Session { message, kind };
            queues.fail_all(&err);
            RouteOutcome::Failed(err)
        }
        Ok(SessionEvent::Idle) => {
            queues.complete_all();
            RouteOutcome::Finished
        }
        Ok(SessionEvent::Other(kind)) => {
            debug!(%kind, "ignoring session event");
            RouteOutcome::Continue
        }
        Err(reason) => {
            warn!(%reason, "ignoring malformed session event");
            RouteOutcome::Continue
        }
    }
}

/// Routes events until the turn ends, the session fails, or `cancel` fires.
///
/// If the event stream ends before a terminal event, both queues are failed
/// so that no consumer is left waiting.
pub async fn run_router(
    mut events: RawEventStream,
    queues: OutputQueues,
    cancel: CancellationToken,
) -> RouteOutcome {
    loop {
        let raw = tokio::select! {
            biased;
            () = cancel.cancelled() => return RouteOutcome::Cancelled,
            raw = events.next() => raw,
        };

        let Some(raw) = raw else {
            let err = AdapterError::Session {
                message: "agent event stream ended before the turn completed".to_string(),
                kind: None,
            };
            warn!("session event stream closed without a terminal event");
            queues.fail_all(&err);
            return RouteOutcome::Failed(err);
        };

        match route_event(&raw, &queues) {
            RouteOutcome::Continue => {}
            outcome => return outcome,
        }
    }
}
