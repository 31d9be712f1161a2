//! Agent client over a spawned agent CLI.
//!
//! The agent process speaks newline-delimited JSON on stdin/stdout:
//!
//! ```text
//! → {"id": 1, "method": "session.create", "params": {"sessionId": "...", "model": "...", "streaming": true}}
//! ← {"id": 1, "result": {"sessionId": "..."}}
//! → {"id": 2, "method": "session.send", "params": {"sessionId": "...", "prompt": "hi"}}
//! ← {"id": 2, "result": null}
//! ← {"method": "session.event", "params": {"sessionId": "...", "event": {"type": "assistant.message_delta", "data": {"deltaContent": "He"}}}}
//! ← {"method": "session.event", "params": {"sessionId": "...", "event": {"type": "session.idle", "data": {}}}}
//! ```
//!
//! Session ids are chosen by the client so that the event channel exists
//! before the agent can emit anything for the session.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{Mutex as AsyncMutex, mpsc, oneshot};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, error, warn};

use super::{AgentClient, AgentSession, RawEventStream, SessionConfig};
use crate::error::{AdapterError, Result};

type PendingReply = oneshot::Sender<Result<Value>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Deserialize)]
struct Incoming {
    id: Option<u64>,
    method: Option<String>,
    #[serde(default)]
    params: Value,
    #[serde(default)]
    result: Value,
    error: Option<RpcError>,
}

#[derive(Deserialize)]
struct RpcError {
    message: String,
}

#[derive(Deserialize)]
struct EventParams {
    #[serde(rename = "sessionId")]
    session_id: String,
    event: Value,
}

/// Shared state of one connection to the agent process.
struct Connection {
    outgoing: mpsc::UnboundedSender<String>,
    pending: Mutex<HashMap<u64, PendingReply>>,
    sessions: Mutex<HashMap<String, mpsc::UnboundedSender<Value>>>,
    next_id: AtomicU64,
    next_session: AtomicU64,
    closed: AtomicBool,
}

impl Connection {
    async fn request(&self, method: &str, params: Value) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (reply, response) = oneshot::channel();
        {
            let mut pending = lock(&self.pending);
            if self.closed.load(Ordering::Acquire) {
                return Err(AdapterError::process("agent process has exited"));
            }
            pending.insert(id, reply);
        }

        let line = serde_json::to_string(&json!({ "id": id, "method": method, "params": params }))?;
        debug!(id, method, "sending agent request");
        if self.outgoing.send(line).is_err() {
            lock(&self.pending).remove(&id);
            return Err(AdapterError::process("agent process stdin is closed"));
        }

        response
            .await
            .map_err(|_| AdapterError::process("agent process exited before responding"))?
    }

    fn handle_line(&self, line: &str) {
        if line.trim().is_empty() {
            return;
        }
        let incoming: Incoming = match serde_json::from_str(line) {
            Ok(incoming) => incoming,
            Err(e) => {
                warn!(line = %line, error = %e, "failed to parse agent message");
                return;
            }
        };

        match (incoming.id, incoming.method.as_deref()) {
            (Some(id), None) => {
                let Some(reply) = lock(&self.pending).remove(&id) else {
                    warn!(id, "response for unknown request");
                    return;
                };
                let outcome = incoming.error.map_or(Ok(incoming.result), |e| {
                    Err(AdapterError::Process { message: e.message })
                });
                let _ = reply.send(outcome);
            }
            (None, Some("session.event")) => {
                let params: EventParams = match serde_json::from_value(incoming.params) {
                    Ok(params) => params,
                    Err(e) => {
                        warn!(error = %e, "malformed session event notification");
                        return;
                    }
                };
                let sessions = lock(&self.sessions);
                match sessions.get(&params.session_id) {
                    Some(events) => {
                        let _ = events.send(params.event);
                    }
                    None => debug!(session_id = %params.session_id, "event for unknown session"),
                }
            }
            (_, method) => debug!(?method, "ignoring agent message"),
        }
    }

    /// Fails every pending request and ends every session's event stream.
    fn close(&self) {
        let pending: Vec<PendingReply> = {
            let mut pending = lock(&self.pending);
            self.closed.store(true, Ordering::Release);
            pending.drain().map(|(_, reply)| reply).collect()
        };
        for reply in pending {
            let _ = reply.send(Err(AdapterError::process("agent process exited")));
        }
        lock(&self.sessions).clear();
    }
}

/// [`AgentClient`] backed by a spawned agent CLI process.
pub struct StdioAgentClient {
    connection: Arc<Connection>,
    child: Mutex<Option<Child>>,
}

impl std::fmt::Debug for StdioAgentClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StdioAgentClient")
            .field("closed", &self.connection.closed.load(Ordering::Acquire))
            .finish_non_exhaustive()
    }
}

impl StdioAgentClient {
    /// Spawns the agent CLI and connects to its stdio.
    ///
    /// The process is killed when the client is dropped.
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError::Process`] if the process cannot be spawned.
    pub fn spawn(command: &str, args: &[String]) -> Result<Self> {
        let mut child = Command::new(command)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| AdapterError::process(format!("failed to spawn '{command}': {e}")))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| AdapterError::process("agent stdin was not piped"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AdapterError::process("agent stdout was not piped"))?;

        debug!(command, pid = ?child.id(), "agent process spawned");
        let client = Self::from_io(stdout, stdin);
        *lock(&client.child) = Some(child);
        Ok(client)
    }

    /// Connects to an agent over an arbitrary reader/writer pair.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn from_io<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (outgoing, mut outgoing_rx) = mpsc::unbounded_channel::<String>();
        let connection = Arc::new(Connection {
            outgoing,
            pending: Mutex::new(HashMap::new()),
            sessions: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            next_session: AtomicU64::new(1),
            closed: AtomicBool::new(false),
        });

        // Weak, so the writer does not keep its own sender alive.
        let writer_connection = Arc::downgrade(&connection);
        let mut writer = writer;
        tokio::spawn(async move {
            while let Some(line) = outgoing_rx.recv().await {
                let written = async {
                    writer.write_all(line.as_bytes()).await?;
                    writer.write_all(b"\n").await?;
                    writer.flush().await
                };
                if let Err(e) = written.await {
                    error!(error = %e, "failed to write to agent process");
                    if let Some(connection) = writer_connection.upgrade() {
                        connection.close();
                    }
                    break;
                }
            }
        });

        let reader_connection = Arc::clone(&connection);
        tokio::spawn(async move {
            let mut lines = BufReader::new(reader).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => reader_connection.handle_line(&line),
                    Ok(None) => {
                        debug!("agent process stdout closed");
                        break;
                    }
                    Err(e) => {
                        error!(error = %e, "failed to read from agent process");
                        break;
                    }
                }
            }
            reader_connection.close();
        });

        Self {
            connection,
            child: Mutex::new(None),
        }
    }

    /// OS process id of the spawned agent, if this client owns one.
    #[must_use]
    pub fn process_id(&self) -> Option<u32> {
        lock(&self.child).as_ref().and_then(Child::id)
    }

    /// Returns `true` once the agent's output has closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.connection.closed.load(Ordering::Acquire)
    }
}

#[async_trait]
impl AgentClient for StdioAgentClient {
    async fn create_session(&self, config: &SessionConfig) -> Result<Box<dyn AgentSession>> {
        let n = self.connection.next_session.fetch_add(1, Ordering::Relaxed);
        let session_id = format!("llm-adapter-{}-{n}", std::process::id());

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        lock(&self.connection.sessions).insert(session_id.clone(), events_tx);

        let mut params = json!({
            "sessionId": session_id,
            "model": config.model,
            "streaming": config.streaming,
        });
        if let Some(system) = &config.system_message {
            params["systemMessage"] = json!({ "content": system });
        }

        if let Err(e) = self.connection.request("session.create", params).await {
            lock(&self.connection.sessions).remove(&session_id);
            return Err(e);
        }
        debug!(%session_id, model = %config.model, "agent session created");

        Ok(Box::new(StdioSession {
            id: session_id,
            connection: Arc::clone(&self.connection),
            events: Mutex::new(Some(events_rx)),
        }))
    }
}

/// [`AgentClient`] that spawns the agent CLI on first use.
///
/// Registering the agent provider therefore costs nothing until a session
/// is actually requested. If the process exits, the next session request
/// spawns a fresh one.
#[derive(Debug)]
pub struct AgentProcess {
    command: String,
    args: Vec<String>,
    client: AsyncMutex<Option<Arc<StdioAgentClient>>>,
}

impl AgentProcess {
    /// Describes the agent process without starting it.
    #[must_use]
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
            client: AsyncMutex::new(None),
        }
    }

    /// Command that launches the agent.
    #[must_use]
    pub fn command(&self) -> &str {
        &self.command
    }

    /// OS process id of the current agent process, if one has been spawned.
    pub async fn process_id(&self) -> Option<u32> {
        self.client
            .lock()
            .await
            .as_ref()
            .and_then(|client| client.process_id())
    }

    async fn client(&self) -> Result<Arc<StdioAgentClient>> {
        let mut current = self.client.lock().await;
        if let Some(client) = current.as_ref().filter(|client| !client.is_closed()) {
            return Ok(Arc::clone(client));
        }
        if current.is_some() {
            warn!(command = %self.command, "agent process has exited, respawning");
        }
        let client = Arc::new(StdioAgentClient::spawn(&self.command, &self.args)?);
        *current = Some(Arc::clone(&client));
        Ok(client)
    }
}

#[async_trait]
impl AgentClient for AgentProcess {
    async fn create_session(&self, config: &SessionConfig) -> Result<Box<dyn AgentSession>> {
        self.client().await?.create_session(config).await
    }
}

/// One session on a [`StdioAgentClient`] connection.
struct StdioSession {
    id: String,
    connection: Arc<Connection>,
    events: Mutex<Option<mpsc::UnboundedReceiver<Value>>>,
}

#[async_trait]
impl AgentSession for StdioSession {
    fn id(&self) -> &str {
        &self.id
    }

    fn subscribe(&self) -> RawEventStream {
        if let Some(events) = lock(&self.events).take() {
            Box::pin(UnboundedReceiverStream::new(events))
        } else {
            warn!(session_id = %self.id, "session already has a subscriber");
            Box::pin(futures_util::stream::empty())
        }
    }

    async fn send(&self, prompt: &str) -> Result<()> {
        self.connection
            .request(
                "session.send",
                json!({ "sessionId": self.id, "prompt": prompt }),
            )
            .await
            .map(|_| ())
    }

    async fn abort(&self) -> Result<()> {
        self.connection
            .request("session.abort", json!({ "sessionId": self.id }))
            .await
            .map(|_| ())
    }

    async fn destroy(&self) -> Result<()> {
        lock(&self.connection.sessions).remove(&self.id);
        self.connection
            .request("session.destroy", json!({ "sessionId": self.id }))
            .await
            .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::events::{MESSAGE_DELTA, SESSION_IDLE, raw_event};
    use futures_util::StreamExt;
    use tokio::io::{DuplexStream, ReadHalf, WriteHalf};

    /// Minimal scripted agent: acknowledges every request and answers
    /// `session.send` with two deltas and an idle event.
    async fn fake_agent(reader: ReadHalf<DuplexStream>, mut writer: WriteHalf<DuplexStream>) {
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let request: Value = serde_json::from_str(&line).unwrap_or_default();
            let id = request["id"].clone();
            let method = request["method"].as_str().unwrap_or_default().to_string();
            let session_id = request["params"]["sessionId"].clone();

            let mut replies = vec![json!({ "id": id, "result": { "sessionId": session_id } })];
            if method == "session.send" {
                for event in [
                    raw_event(MESSAGE_DELTA, json!({ "deltaContent": "He" })),
                    raw_event(MESSAGE_DELTA, json!({ "deltaContent": "llo" })),
                    raw_event(SESSION_IDLE, json!({})),
                ] {
                    replies.push(json!({
                        "method": "session.event",
                        "params": { "sessionId": session_id, "event": event },
                    }));
                }
            }
            if method == "session.abort" {
                replies = vec![json!({ "id": id, "error": { "message": "nothing to abort" } })];
            }

            for reply in replies {
                let mut text = reply.to_string();
                text.push('\n');
                if writer.write_all(text.as_bytes()).await.is_err() {
                    return;
                }
            }
        }
    }

    fn connect() -> StdioAgentClient {
        let (client_io, agent_io) = tokio::io::duplex(4096);
        let (agent_read, agent_write) = tokio::io::split(agent_io);
        tokio::spawn(fake_agent(agent_read, agent_write));
        let (client_read, client_write) = tokio::io::split(client_io);
        StdioAgentClient::from_io(client_read, client_write)
    }

    fn config() -> SessionConfig {
        SessionConfig {
            model: "gpt-5".to_string(),
            streaming: true,
            system_message: None,
        }
    }

    #[tokio::test]
    async fn test_session_events_are_delivered() {
        let client = connect();
        let session = client
            .create_session(&config())
            .await
            .unwrap_or_else(|_| unreachable!());

        let events = session.subscribe();
        session.send("hi").await.unwrap_or_else(|_| unreachable!());

        let events: Vec<Value> = events.take(3).collect().await;
        assert_eq!(events.len(), 3);
        assert_eq!(events[0]["data"]["deltaContent"], "He");
        assert_eq!(events[2]["type"], SESSION_IDLE);
    }

    #[tokio::test]
    async fn test_send_and_wait_concatenates_deltas() {
        let client = connect();
        let session = client
            .create_session(&config())
            .await
            .unwrap_or_else(|_| unreachable!());

        let text = session.send_and_wait("hi").await;
        assert_eq!(text.ok().flatten().as_deref(), Some("Hello"));
        assert!(session.destroy().await.is_ok());
    }

    #[tokio::test]
    async fn test_error_response_is_returned() {
        let client = connect();
        let session = client
            .create_session(&config())
            .await
            .unwrap_or_else(|_| unreachable!());

        let result = session.abort().await;
        assert!(matches!(result, Err(AdapterError::Process { .. })));
    }

    #[tokio::test]
    async fn test_pending_requests_fail_when_agent_exits() {
        let (client_io, agent_io) = tokio::io::duplex(4096);
        let (client_read, client_write) = tokio::io::split(client_io);
        let client = StdioAgentClient::from_io(client_read, client_write);
        drop(agent_io);

        let result = client.create_session(&config()).await;
        assert!(matches!(result, Err(AdapterError::Process { .. })));
    }

    #[tokio::test]
    async fn test_second_subscription_is_empty() {
        let client = connect();
        let session = client
            .create_session(&config())
            .await
            .unwrap_or_else(|_| unreachable!());

        let _first = session.subscribe();
        let second: Vec<Value> = session.subscribe().collect().await;
        assert!(second.is_empty());
    }

    #[tokio::test]
    async fn test_write_failure_fails_pending_requests() {
        let (client_read, _agent_write) = tokio::io::duplex(4096);
        let (client_write, agent_read) = tokio::io::duplex(4096);
        drop(agent_read);
        let client = StdioAgentClient::from_io(client_read, client_write);

        let result = tokio::time::timeout(
            std::time::Duration::from_secs(1),
            client.create_session(&config()),
        )
        .await;
        assert!(matches!(result, Ok(Err(AdapterError::Process { .. }))));
        assert!(client.is_closed());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_agent_process_respawns_after_exit() {
        // `true` exits at once, so every request fails on a closed connection.
        let agent = AgentProcess::new("true", Vec::new());

        assert!(agent.create_session(&config()).await.is_err());
        let first = agent.process_id().await;
        assert!(agent.create_session(&config()).await.is_err());
        let second = agent.process_id().await;

        assert!(first.is_some());
        assert!(second.is_some());
        assert_ne!(first, second);
    }

    #[tokio::test]
    async fn test_agent_process_reports_spawn_failure() {
        let agent = AgentProcess::new("llm-adapter-no-such-agent-binary", Vec::new());
        assert_eq!(agent.command(), "llm-adapter-no-such-agent-binary");
        let result = agent.create_session(&config()).await;
        assert!(matches!(result, Err(AdapterError::Process { .. })));
    }

    #[test]
    fn test_spawn_missing_binary() {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap_or_else(|_| unreachable!());
        runtime.block_on(async {
            let result = StdioAgentClient::spawn("llm-adapter-no-such-agent-binary", &[]);
            assert!(matches!(result, Err(AdapterError::Process { .. })));
        });
    }
}
