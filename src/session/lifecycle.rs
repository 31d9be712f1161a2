//! Session lifecycle management.
//!
//! A [`SessionLifecycle`] owns one agent session for the duration of a call.
//! It creates the session, wires the router to the output queues, sends the
//! prompt, and provides the only teardown path. Teardown runs at most once
//! no matter which trigger reaches it first: natural completion through
//! `cleanup`, a mid-turn session error, or a caller `abort`.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::router::{OutputQueues, RouteOutcome, run_router};
use super::{AgentClient, AgentSession, SessionConfig};
use crate::error::{AdapterError, Result};
use crate::message::{ChatMessage, DispatchPolicy, resolve_system_prompt, select_prompt};
use crate::notify::{Notice, Notifier, TracingNotifier};
use crate::queue::{BoundedEventQueue, DEFAULT_QUEUE_CAPACITY};

/// Settings shared by every session a facade opens.
#[derive(Clone)]
pub struct SessionOptions {
    /// Buffered values per output queue.
    pub queue_capacity: usize,
    /// Which turns of the conversation are sent.
    pub dispatch_policy: DispatchPolicy,
    /// Optional upper bound on a non-streaming turn. Unbounded when `None`.
    pub wait_timeout: Option<Duration>,
    /// Receives session error notices.
    pub notifier: Arc<dyn Notifier>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            dispatch_policy: DispatchPolicy::default(),
            wait_timeout: None,
            notifier: Arc::new(TracingNotifier),
        }
    }
}

impl std::fmt::Debug for SessionOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionOptions")
            .field("queue_capacity", &self.queue_capacity)
            .field("dispatch_policy", &self.dispatch_policy)
            .field("wait_timeout", &self.wait_timeout)
            .finish_non_exhaustive()
    }
}

/// Owns a session and its one-shot teardown.
struct SessionGuard {
    session: Arc<dyn AgentSession>,
    session_id: String,
    subscription: CancellationToken,
    torn_down: AtomicBool,
}

impl SessionGuard {
    fn new(session: Box<dyn AgentSession>) -> Self {
        let session: Arc<dyn AgentSession> = Arc::from(session);
        Self {
            session_id: session.id().to_string(),
            session,
            subscription: CancellationToken::new(),
            torn_down: AtomicBool::new(false),
        }
    }

    fn is_torn_down(&self) -> bool {
        self.torn_down.load(Ordering::Acquire)
    }

    /// Unsubscribes the router and destroys the session, once.
    async fn teardown(&self) {
        if self.torn_down.swap(true, Ordering::AcqRel) {
            return;
        }
        self.subscription.cancel();
        match self.session.destroy().await {
            Ok(()) => debug!(session_id = %self.session_id, "session destroyed"),
            Err(e) => {
                let err = AdapterError::Cleanup {
                    message: e.to_string(),
                };
                warn!(session_id = %self.session_id, error = %err, "failed to destroy session");
            }
        }
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if self.torn_down.swap(true, Ordering::AcqRel) {
            return;
        }
        self.subscription.cancel();
        let session = Arc::clone(&self.session);
        let session_id = std::mem::take(&mut self.session_id);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                debug!(%session_id, "session dropped without cleanup, scheduling destroy");
                handle.spawn(async move {
                    if let Err(e) = session.destroy().await {
                        warn!(%session_id, error = %e, "failed to destroy dropped session");
                    }
                });
            }
            Err(_) => warn!(%session_id, "session dropped outside a runtime and was not destroyed"),
        }
    }
}

/// Handle to a streaming session: abort and cleanup controls.
///
/// Cloning yields another handle to the same session.
#[derive(Clone)]
pub struct SessionLifecycle {
    guard: Arc<SessionGuard>,
    queues: OutputQueues,
}

/// Output of a streaming agent call.
pub struct AgentStream {
    /// Assistant text deltas.
    pub text: BoundedEventQueue<String>,
    /// Reasoning deltas.
    pub reasoning: BoundedEventQueue<String>,
    /// Abort and cleanup controls.
    pub lifecycle: SessionLifecycle,
}

impl std::fmt::Debug for SessionLifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionLifecycle")
            .field("session_id", &self.guard.session_id)
            .field("torn_down", &self.guard.is_torn_down())
            .finish_non_exhaustive()
    }
}

impl SessionLifecycle {
    /// Opens a streaming session and dispatches the conversation's prompt.
    ///
    /// The returned queues are fed by a router task until the turn ends.
    ///
    /// # Errors
    ///
    /// - [`AdapterError::Configuration`] if the conversation has no user
    ///   message; no session is created.
    /// - Any error from session creation.
    /// - [`AdapterError::Dispatch`] if sending the prompt fails. The queues
    ///   are failed and the session is torn down before returning.
    pub async fn start(
        client: &dyn AgentClient,
        model: &str,
        messages: &[ChatMessage],
        system_message: Option<&str>,
        options: &SessionOptions,
    ) -> Result<AgentStream> {
        let prompt = select_prompt(messages, options.dispatch_policy)?;
        let config = SessionConfig {
            model: model.to_string(),
            streaming: true,
            system_message: resolve_system_prompt(messages, system_message),
        };

        let session = client.create_session(&config).await?;
        let guard = Arc::new(SessionGuard::new(session));
        let queues = OutputQueues::new(options.queue_capacity);
        info!(session_id = %guard.session_id, model, "agent session started");

        // Subscribe before sending so no event of this turn is missed.
        let events = guard.session.subscribe();
        let router_guard = Arc::clone(&guard);
        let router_queues = queues.clone();
        let notifier = Arc::clone(&options.notifier);
        tokio::spawn(async move {
            let outcome =
                run_router(events, router_queues, router_guard.subscription.clone()).await;
            match outcome {
                RouteOutcome::Failed(err) => {
                    if let AdapterError::Session { message, .. } = &err {
                        notifier.notify(&Notice::SessionError {
                            message: message.clone(),
                        });
                    }
                    router_guard.teardown().await;
                }
                RouteOutcome::Finished => {
                    debug!(session_id = %router_guard.session_id, "turn finished");
                }
                RouteOutcome::Cancelled | RouteOutcome::Continue => {}
            }
        });

        if let Err(e) = guard.session.send(&prompt).await {
            let err = AdapterError::dispatch(e);
            warn!(session_id = %guard.session_id, error = %err, "dispatch failed");
            queues.fail_all(&err);
            guard.teardown().await;
            return Err(err);
        }
        debug!(session_id = %guard.session_id, "prompt dispatched");

        Ok(AgentStream {
            text: queues.text.clone(),
            reasoning: queues.reasoning.clone(),
            lifecycle: Self { guard, queues },
        })
    }

    /// Runs one non-streaming turn and returns the final text.
    ///
    /// The session is destroyed before returning, on success or failure.
    ///
    /// # Errors
    ///
    /// - [`AdapterError::Configuration`] if the conversation has no user message.
    /// - [`AdapterError::Dispatch`] if the prompt could not be sent.
    /// - [`AdapterError::Session`] if the backend fails the turn or it
    ///   exceeds a configured wait timeout.
    pub async fn complete(
        client: &dyn AgentClient,
        model: &str,
        messages: &[ChatMessage],
        system_message: Option<&str>,
        options: &SessionOptions,
    ) -> Result<String> {
        let prompt = select_prompt(messages, options.dispatch_policy)?;
        let config = SessionConfig {
            model: model.to_string(),
            streaming: false,
            system_message: resolve_system_prompt(messages, system_message),
        };

        let session = client.create_session(&config).await?;
        let guard = SessionGuard::new(session);
        debug!(session_id = %guard.session_id, model, "agent completion started");

        let turn = guard.session.send_and_wait(&prompt);
        let result = match options.wait_timeout {
            Some(limit) => tokio::time::timeout(limit, turn).await.map_err(|_| limit),
            None => Ok(turn.await),
        };
        let outcome = match result {
            Ok(Ok(text)) => Ok(text.unwrap_or_default()),
            Ok(Err(err)) => {
                if let AdapterError::Session { message, .. } = &err {
                    options.notifier.notify(&Notice::SessionError {
                        message: message.clone(),
                    });
                }
                Err(err)
            }
            Err(limit) => {
                if let Err(e) = guard.session.abort().await {
                    debug!(session_id = %guard.session_id, error = %e, "abort after timeout failed");
                }
                Err(AdapterError::Session {
                    message: format!("agent did not finish within {}ms", limit.as_millis()),
                    kind: Some("timeout".to_string()),
                })
            }
        };

        guard.teardown().await;
        outcome
    }

    /// Session identifier.
    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.guard.session_id
    }

    /// Returns `true` once the session has been released.
    #[must_use]
    pub fn is_torn_down(&self) -> bool {
        self.guard.is_torn_down()
    }

    /// Stops generation and ends both queues normally.
    ///
    /// Routing stops before the session is told to abort, so events emitted
    /// afterwards are never delivered. The session is then destroyed.
    pub async fn abort(&self) {
        if self.guard.is_torn_down() {
            self.queues.complete_all();
            return;
        }
        self.guard.subscription.cancel();
        if let Err(e) = self.guard.session.abort().await {
            warn!(session_id = %self.guard.session_id, error = %e, "failed to abort session");
        }
        self.queues.complete_all();
        info!(session_id = %self.guard.session_id, "session aborted");
        self.guard.teardown().await;
    }

    /// Releases the session. Safe to call any number of times.
    ///
    /// Queues that have not reached a terminal state yet are completed so
    /// a consumer that stopped early is never left waiting.
    pub async fn cleanup(&self) {
        self.guard.teardown().await;
        self.queues.complete_all();
    }
}
