//! Agent session event shapes.
//!
//! The agent process emits events as JSON objects of the form
//! `{"type": "<kind>", "data": {...}}`. [`SessionEvent::classify`] turns a
//! raw event into a typed one, distinguishing malformed events (which are
//! logged and skipped) from well-formed events of kinds the router does not
//! act on.

use serde::Deserialize;
use serde_json::Value;

/// Kind tag of a text delta event.
pub const MESSAGE_DELTA: &str = "assistant.message_delta";
/// Kind tag of a reasoning delta event.
pub const REASONING_DELTA: &str = "assistant.reasoning_delta";
/// Kind tag of a final assistant message.
pub const MESSAGE: &str = "assistant.message";
/// Kind tag of a session error.
pub const SESSION_ERROR: &str = "session.error";
/// Kind tag signaling the turn is complete.
pub const SESSION_IDLE: &str = "session.idle";

/// A classified session event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Incremental assistant text.
    MessageDelta(String),
    /// Incremental reasoning text.
    ReasoningDelta(String),
    /// Complete assistant message for the turn.
    Message(String),
    /// The backend failed the turn.
    Error {
        /// Error message.
        message: String,
        /// Backend error category, if supplied.
        kind: Option<String>,
    },
    /// The turn is complete.
    Idle,
    /// A well-formed event of a kind with no routing action.
    Other(String),
}

#[derive(Deserialize)]
struct RawEvent {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: Value,
}

#[derive(Deserialize)]
struct DeltaData {
    #[serde(rename = "deltaContent")]
    delta_content: String,
}

#[derive(Deserialize)]
struct MessageData {
    content: String,
}

#[derive(Deserialize)]
struct ErrorData {
    message: String,
    #[serde(rename = "errorType", default)]
    error_type: Option<String>,
}

impl SessionEvent {
    /// Classifies a raw event.
    ///
    /// # Errors
    ///
    /// Returns a description of the problem if the event has no string
    /// `type` tag or a recognized kind carries a malformed payload.
    pub fn classify(raw: &Value) -> Result<Self, String> {
        let event: RawEvent = serde_json::from_value(raw.clone())
            .map_err(|e| format!("event has no kind tag: {e}"))?;

        let payload = |e: serde_json::Error| format!("malformed {} payload: {e}", event.kind);
        match event.kind.as_str() {
            MESSAGE_DELTA => {
                let data: DeltaData = serde_json::from_value(event.data.clone()).map_err(payload)?;
                Ok(Self::MessageDelta(data.delta_content))
            }
            REASONING_DELTA => {
                let data: DeltaData = serde_json::from_value(event.data.clone()).map_err(payload)?;
                Ok(Self::ReasoningDelta(data.delta_content))
            }
            MESSAGE => {
                let data: MessageData =
                    serde_json::from_value(event.data.clone()).map_err(payload)?;
                Ok(Self::Message(data.content))
            }
            SESSION_ERROR => {
                let data: ErrorData = serde_json::from_value(event.data.clone()).map_err(payload)?;
                Ok(Self::Error {
                    message: data.message,
                    kind: data.error_type,
                })
            }
            SESSION_IDLE => Ok(Self::Idle),
            _ => Ok(Self::Other(event.kind.clone())),
        }
    }
}

/// Builds a raw event value. Used by transports and tests.
#[must_use]
pub fn raw_event(kind: &str, data: Value) -> Value {
    serde_json::json!({ "type": kind, "data": data })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use test_case::test_case;

    #[test_case(raw_event(MESSAGE_DELTA, json!({"deltaContent": "He"})), SessionEvent::MessageDelta("He".into()) ; "message delta")]
    #[test_case(raw_event(REASONING_DELTA, json!({"deltaContent": "hmm"})), SessionEvent::ReasoningDelta("hmm".into()) ; "reasoning delta")]
    #[test_case(raw_event(MESSAGE, json!({"content": "Hello!"})), SessionEvent::Message("Hello!".into()) ; "final message")]
    #[test_case(raw_event(SESSION_IDLE, json!({})), SessionEvent::Idle ; "idle")]
    #[test_case(json!({"type": SESSION_IDLE}), SessionEvent::Idle ; "idle without data")]
    #[test_case(raw_event("tool.execution_start", json!({"toolName": "grep"})), SessionEvent::Other("tool.execution_start".into()) ; "unrouted kind")]
    fn test_classify(raw: Value, expected: SessionEvent) {
        assert_eq!(SessionEvent::classify(&raw), Ok(expected));
    }

    #[test]
    fn test_classify_error_with_type() {
        let raw = raw_event(
            SESSION_ERROR,
            json!({"message": "rate limited", "errorType": "quota"}),
        );
        assert_eq!(
            SessionEvent::classify(&raw),
            Ok(SessionEvent::Error {
                message: "rate limited".into(),
                kind: Some("quota".into()),
            })
        );
    }

    #[test_case(json!("idle") ; "not an object")]
    #[test_case(json!({"data": {}}) ; "missing kind")]
    #[test_case(json!({"type": 7}) ; "numeric kind")]
    #[test_case(raw_event(MESSAGE_DELTA, json!({"content": "x"})) ; "delta without deltaContent")]
    #[test_case(raw_event(SESSION_ERROR, json!({})) ; "error without message")]
    fn test_classify_malformed(raw: Value) {
        assert!(SessionEvent::classify(&raw).is_err());
    }
}
