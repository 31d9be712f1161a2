//! In-memory agent and notifier fakes shared by the integration tests.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use llm_adapter::session::events::{
    MESSAGE, MESSAGE_DELTA, REASONING_DELTA, SESSION_ERROR, SESSION_IDLE, raw_event,
};
use llm_adapter::session::RawEventStream;
use llm_adapter::{AdapterError, AgentClient, AgentSession, Notice, Notifier, SessionConfig};

pub fn delta(text: &str) -> Value {
    raw_event(MESSAGE_DELTA, json!({ "deltaContent": text }))
}

pub fn reasoning(text: &str) -> Value {
    raw_event(REASONING_DELTA, json!({ "deltaContent": text }))
}

pub fn message(text: &str) -> Value {
    raw_event(MESSAGE, json!({ "content": text }))
}

pub fn session_error(message: &str) -> Value {
    raw_event(SESSION_ERROR, json!({ "message": message }))
}

pub fn idle() -> Value {
    raw_event(SESSION_IDLE, json!({}))
}

/// Observable state of a [`FakeAgent`].
#[derive(Default)]
pub struct FakeState {
    pub created: AtomicUsize,
    pub destroyed: AtomicUsize,
    pub aborted: AtomicUsize,
    pub fail_send: AtomicBool,
    pub prompts: Mutex<Vec<String>>,
    pub configs: Mutex<Vec<SessionConfig>>,
    /// Events emitted in response to every `send`.
    pub script: Mutex<Vec<Value>>,
    emitters: Mutex<Vec<mpsc::UnboundedSender<Value>>>,
}

/// Scripted agent client. Each `send` replays the script on the session's
/// event channel; tests can emit further events with [`FakeAgent::emit`].
#[derive(Clone, Default)]
pub struct FakeAgent {
    pub state: Arc<FakeState>,
}

impl FakeAgent {
    pub fn scripted(events: Vec<Value>) -> Self {
        let agent = Self::default();
        *agent.state.script.lock().unwrap() = events;
        agent
    }

    pub fn failing_send() -> Self {
        let agent = Self::default();
        agent.state.fail_send.store(true, Ordering::SeqCst);
        agent
    }

    /// Emits an event on the most recently created session.
    pub fn emit(&self, event: Value) {
        if let Some(tx) = self.state.emitters.lock().unwrap().last() {
            let _ = tx.send(event);
        }
    }

    pub fn created(&self) -> usize {
        self.state.created.load(Ordering::SeqCst)
    }

    pub fn destroyed(&self) -> usize {
        self.state.destroyed.load(Ordering::SeqCst)
    }

    pub fn aborted(&self) -> usize {
        self.state.aborted.load(Ordering::SeqCst)
    }

    pub fn prompts(&self) -> Vec<String> {
        self.state.prompts.lock().unwrap().clone()
    }

    pub fn configs(&self) -> Vec<SessionConfig> {
        self.state.configs.lock().unwrap().clone()
    }

    /// Waits until `destroyed` reaches `count`, failing after one second.
    pub async fn wait_destroyed(&self, count: usize) {
        let wait = async {
            while self.destroyed() < count {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        };
        tokio::time::timeout(Duration::from_secs(1), wait)
            .await
            .expect("session was not destroyed in time");
    }
}

#[async_trait]
impl AgentClient for FakeAgent {
    async fn create_session(
        &self,
        config: &SessionConfig,
    ) -> Result<Box<dyn AgentSession>, AdapterError> {
        let n = self.state.created.fetch_add(1, Ordering::SeqCst);
        self.state.configs.lock().unwrap().push(config.clone());
        let (tx, rx) = mpsc::unbounded_channel();
        self.state.emitters.lock().unwrap().push(tx.clone());
        Ok(Box::new(FakeSession {
            id: format!("fake-{n}"),
            tx,
            rx: Mutex::new(Some(rx)),
            state: Arc::clone(&self.state),
        }))
    }
}

struct FakeSession {
    id: String,
    tx: mpsc::UnboundedSender<Value>,
    rx: Mutex<Option<mpsc::UnboundedReceiver<Value>>>,
    state: Arc<FakeState>,
}

#[async_trait]
impl AgentSession for FakeSession {
    fn id(&self) -> &str {
        &self.id
    }

    fn subscribe(&self) -> RawEventStream {
        match self.rx.lock().unwrap().take() {
            Some(rx) => Box::pin(UnboundedReceiverStream::new(rx)),
            None => Box::pin(futures_util::stream::empty()),
        }
    }

    async fn send(&self, prompt: &str) -> Result<(), AdapterError> {
        if self.state.fail_send.load(Ordering::SeqCst) {
            return Err(AdapterError::process("pipe closed"));
        }
        self.state.prompts.lock().unwrap().push(prompt.to_string());
        let script = self.state.script.lock().unwrap().clone();
        for event in script {
            let _ = self.tx.send(event);
        }
        Ok(())
    }

    async fn abort(&self) -> Result<(), AdapterError> {
        self.state.aborted.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn destroy(&self) -> Result<(), AdapterError> {
        tokio::task::yield_now().await;
        self.state.destroyed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Notifier that records every notice.
#[derive(Clone, Default)]
pub struct RecordingNotifier {
    pub notices: Arc<Mutex<Vec<Notice>>>,
}

impl RecordingNotifier {
    pub fn notices(&self) -> Vec<Notice> {
        self.notices.lock().unwrap().clone()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, notice: &Notice) {
        self.notices.lock().unwrap().push(notice.clone());
    }
}
