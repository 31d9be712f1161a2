//! Provider-agnostic message types and conversation handling.
//!
//! These types decouple callers from any specific LLM SDK, allowing the
//! same conversation to be sent to hosted APIs and to the local agent.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{AdapterError, Result};

/// Role of a chat message participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System instructions.
    System,
    /// User input.
    User,
    /// Assistant response.
    Assistant,
}

impl Role {
    /// Returns the wire name of the role.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Role of the message sender.
    pub role: Role,
    /// Message content.
    pub content: String,
}

/// JSON schema the model output must conform to.
#[derive(Debug, Clone)]
pub struct ResponseSchema {
    /// Schema name reported to the provider.
    pub name: String,
    /// JSON Schema document.
    pub schema: serde_json::Value,
}

/// A chat completion request (provider-agnostic).
#[derive(Debug, Clone)]
pub struct ChatRequest {
    /// Model identifier (e.g., "gpt-4o-mini").
    pub model: String,
    /// Ordered conversation messages.
    pub messages: Vec<ChatMessage>,
    /// Sampling temperature (0.0–2.0).
    pub temperature: Option<f32>,
    /// Maximum tokens to generate.
    pub max_tokens: Option<u32>,
    /// Constrain output to this schema.
    pub response_schema: Option<ResponseSchema>,
    /// Stream the response.
    pub stream: bool,
}

impl ChatRequest {
    /// Creates a request for `model` with default sampling settings.
    pub fn new(model: impl Into<String>, messages: Vec<ChatMessage>) -> Self {
        Self {
            model: model.into(),
            messages,
            temperature: None,
            max_tokens: None,
            response_schema: None,
            stream: false,
        }
    }
}

/// Token usage statistics from a completion.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Tokens consumed by the prompt.
    pub prompt_tokens: u32,
    /// Tokens generated in the completion.
    pub completion_tokens: u32,
    /// Total tokens used.
    pub total_tokens: u32,
}

/// A chat completion response (provider-agnostic).
#[derive(Debug, Clone, Default)]
pub struct ChatResponse {
    /// Generated text content.
    pub content: String,
    /// Token usage statistics.
    pub usage: TokenUsage,
    /// Finish reason from the model (e.g., `"stop"`, `"length"`).
    pub finish_reason: Option<String>,
}

/// Creates a system message.
#[must_use]
pub fn system_message(content: &str) -> ChatMessage {
    ChatMessage {
        role: Role::System,
        content: content.to_string(),
    }
}

/// Creates a user message.
#[must_use]
pub fn user_message(content: &str) -> ChatMessage {
    ChatMessage {
        role: Role::User,
        content: content.to_string(),
    }
}

/// Creates an assistant message.
#[must_use]
pub fn assistant_message(content: &str) -> ChatMessage {
    ChatMessage {
        role: Role::Assistant,
        content: content.to_string(),
    }
}

/// Parses an untyped conversation (a JSON array of `{role, content}`).
///
/// # Errors
///
/// Returns [`AdapterError::Validation`] for anything that is not an array of
/// messages with a known role and string content, or for an empty array.
pub fn parse_conversation(value: &serde_json::Value) -> Result<Vec<ChatMessage>> {
    let messages: Vec<ChatMessage> = serde_json::from_value(value.clone())
        .map_err(|e| AdapterError::validation(format!("malformed conversation: {e}")))?;
    validate_conversation(&messages)?;
    Ok(messages)
}

/// Checks that a typed conversation can be sent.
///
/// # Errors
///
/// Returns [`AdapterError::Validation`] if the conversation is empty.
pub fn validate_conversation(messages: &[ChatMessage]) -> Result<()> {
    if messages.is_empty() {
        return Err(AdapterError::validation("conversation is empty"));
    }
    Ok(())
}

/// Which part of a conversation is sent to a session-based provider.
///
/// Agent sessions keep their own context, so by default only the newest
/// user turn is sent. `Transcript` replays every non-system turn as a
/// role-labeled transcript instead.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DispatchPolicy {
    /// Send only the most recent user message.
    #[default]
    LastUserMessage,
    /// Send all user and assistant turns as one prompt.
    Transcript,
}

impl FromStr for DispatchPolicy {
    type Err = AdapterError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "last-user" | "last_user" | "last" => Ok(Self::LastUserMessage),
            "transcript" | "full" => Ok(Self::Transcript),
            other => Err(AdapterError::configuration(format!(
                "unknown dispatch policy '{other}' (expected 'last-user' or 'transcript')"
            ))),
        }
    }
}

/// Builds the prompt dispatched to a session-based provider.
///
/// # Errors
///
/// Returns [`AdapterError::Configuration`] if the conversation contains no
/// user message.
pub fn select_prompt(messages: &[ChatMessage], policy: DispatchPolicy) -> Result<String> {
    let last_user = messages
        .iter()
        .rev()
        .find(|m| m.role == Role::User)
        .ok_or_else(|| AdapterError::configuration("conversation has no user message to send"))?;

    match policy {
        DispatchPolicy::LastUserMessage => Ok(last_user.content.clone()),
        DispatchPolicy::Transcript => {
            let turns: Vec<String> = messages
                .iter()
                .filter(|m| m.role != Role::System)
                .map(|m| {
                    let label = match m.role {
                        Role::User => "User",
                        Role::Assistant => "Assistant",
                        Role::System => "System",
                    };
                    format!("{label}: {}", m.content)
                })
                .collect();
            Ok(turns.join("\n\n"))
        }
    }
}

/// Resolves the system prompt for a session.
///
/// An explicit prompt wins; otherwise system-role messages are joined.
#[must_use]
pub fn resolve_system_prompt(messages: &[ChatMessage], explicit: Option<&str>) -> Option<String> {
    if let Some(prompt) = explicit {
        return Some(prompt.to_string());
    }
    let parts: Vec<&str> = messages
        .iter()
        .filter(|m| m.role == Role::System)
        .map(|m| m.content.as_str())
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("\n\n"))
    }
}
