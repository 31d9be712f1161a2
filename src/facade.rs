//! Provider call facade.
//!
//! Four call shapes over every registered provider:
//!
//! | Operation | Hosted family | Agent family |
//! |---|---|---|
//! | [`LlmAdapter::stream_text`] | SDK stream | session + router + queues |
//! | [`LlmAdapter::complete_text`] | chat completion | send-and-wait |
//! | [`LlmAdapter::generate_object`] | JSON-schema response format | schema in system prompt |
//! | [`LlmAdapter::generate_image`] | images API | unsupported |
//!
//! Each operation validates the conversation, resolves the provider and
//! then branches once on the provider family.

use std::sync::Arc;

use futures_util::StreamExt;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::AdapterConfig;
use crate::error::{AdapterError, Result};
use crate::message::{
    ChatMessage, ChatRequest, ResponseSchema, Role, resolve_system_prompt, system_message,
    validate_conversation,
};
use crate::notify::Notice;
use crate::provider::{ImageRequest, TextStream};
use crate::registry::{ProviderRegistry, ResolvedProvider};
use crate::session::{SessionLifecycle, SessionOptions};

/// Inputs shared by the text call shapes.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    /// Registered provider name.
    pub provider: String,
    /// Model identifier.
    pub model: String,
    /// Conversation in chronological order.
    pub messages: Vec<ChatMessage>,
    /// Sampling temperature, for providers that accept one.
    pub temperature: Option<f32>,
    /// System prompt overriding the conversation's system messages.
    pub system_message: Option<String>,
}

impl GenerationRequest {
    /// Creates a request with no temperature or system prompt.
    #[must_use]
    pub fn new(
        provider: impl Into<String>,
        model: impl Into<String>,
        messages: Vec<ChatMessage>,
    ) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
            messages,
            temperature: None,
            system_message: None,
        }
    }

    /// Sets the sampling temperature.
    #[must_use]
    pub const fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Sets the system prompt.
    #[must_use]
    pub fn with_system_message(mut self, system: impl Into<String>) -> Self {
        self.system_message = Some(system.into());
        self
    }

    /// Message list sent to hosted providers.
    ///
    /// An explicit system prompt replaces the conversation's system
    /// messages, as it does for agent sessions.
    fn hosted_messages(&self) -> Vec<ChatMessage> {
        let Some(system) = &self.system_message else {
            return self.messages.clone();
        };
        std::iter::once(system_message(system))
            .chain(
                self.messages
                    .iter()
                    .filter(|m| m.role != Role::System)
                    .cloned(),
            )
            .collect()
    }

    fn chat_request(&self) -> ChatRequest {
        let mut request = ChatRequest::new(self.model.clone(), self.hosted_messages());
        request.temperature = self.temperature;
        request
    }
}

enum Control {
    Hosted(CancellationToken),
    Agent(SessionLifecycle),
}

/// Abort and cleanup controls of a streaming call.
///
/// Both operations are idempotent.
pub struct StreamControl {
    inner: Control,
}

impl std::fmt::Debug for StreamControl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.inner {
            Control::Hosted(token) => f
                .debug_struct("StreamControl")
                .field("cancelled", &token.is_cancelled())
                .finish(),
            Control::Agent(lifecycle) => f
                .debug_struct("StreamControl")
                .field("lifecycle", lifecycle)
                .finish(),
        }
    }
}

impl StreamControl {
    /// Stops generation. Both streams end normally.
    pub async fn abort(&self) {
        match &self.inner {
            Control::Hosted(token) => token.cancel(),
            Control::Agent(lifecycle) => lifecycle.abort().await,
        }
    }

    /// Releases backend resources once the caller is done consuming.
    pub async fn cleanup(&self) {
        match &self.inner {
            Control::Hosted(_) => {}
            Control::Agent(lifecycle) => lifecycle.cleanup().await,
        }
    }

    /// Agent session id, for agent-backed streams.
    #[must_use]
    pub fn session_id(&self) -> Option<&str> {
        match &self.inner {
            Control::Hosted(_) => None,
            Control::Agent(lifecycle) => Some(lifecycle.session_id()),
        }
    }
}

/// Result of a streaming call.
pub struct StreamResponse {
    /// Text deltas. Errors after the call started arrive here.
    pub text: TextStream,
    /// Reasoning deltas. Empty for hosted providers.
    pub reasoning: TextStream,
    /// Abort and cleanup controls.
    pub control: StreamControl,
}

impl std::fmt::Debug for StreamResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamResponse")
            .field("control", &self.control)
            .finish_non_exhaustive()
    }
}

/// Uniform call shapes over a [`ProviderRegistry`].
#[derive(Debug, Clone)]
pub struct LlmAdapter {
    registry: Arc<ProviderRegistry>,
    options: SessionOptions,
}

impl LlmAdapter {
    /// Creates a facade over `registry` with default session options.
    #[must_use]
    pub fn new(registry: ProviderRegistry) -> Self {
        Self::with_options(registry, SessionOptions::default())
    }

    /// Creates a facade with explicit session options.
    #[must_use]
    pub fn with_options(registry: ProviderRegistry, options: SessionOptions) -> Self {
        Self {
            registry: Arc::new(registry),
            options,
        }
    }

    /// Creates a facade and registry from configuration.
    #[must_use]
    pub fn from_config(config: &AdapterConfig) -> Self {
        let options = SessionOptions {
            queue_capacity: config.queue_capacity,
            dispatch_policy: config.dispatch_policy,
            wait_timeout: config.agent_wait_timeout,
            ..SessionOptions::default()
        };
        Self::with_options(ProviderRegistry::from_config(config), options)
    }

    /// The provider registry.
    #[must_use]
    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    fn resolve(&self, request: &GenerationRequest) -> Result<ResolvedProvider> {
        validate_conversation(&request.messages)?;
        self.registry.resolve(&request.provider, &request.model)
    }

    /// Raises a user notice for rate limits and hands the error back.
    fn report(&self, provider: &str, err: AdapterError) -> AdapterError {
        if err.is_rate_limited() {
            self.options.notifier.notify(&Notice::RateLimited {
                provider: provider.to_string(),
            });
        }
        err
    }

    /// Streams generated text.
    ///
    /// # Errors
    ///
    /// Errors before streaming begins (validation, configuration, dispatch,
    /// connection failures) are returned here. Later failures are yielded
    /// by [`StreamResponse::text`].
    pub async fn stream_text(&self, request: &GenerationRequest) -> Result<StreamResponse> {
        match self.resolve(request)? {
            ResolvedProvider::Hosted(provider) => {
                let mut chat = request.chat_request();
                chat.stream = true;
                let stream = provider
                    .chat_stream(&chat)
                    .await
                    .map_err(|e| self.report(provider.name(), e))?;
                debug!(provider = provider.name(), model = %request.model, "hosted stream opened");

                let token = CancellationToken::new();
                let cancelled = token.clone();
                let notifier = Arc::clone(&self.options.notifier);
                let name = provider.name().to_string();
                let text = stream
                    .inspect(move |item| {
                        if let Err(e) = item
                            && e.is_rate_limited()
                        {
                            notifier.notify(&Notice::RateLimited {
                                provider: name.clone(),
                            });
                        }
                    })
                    .take_until(async move { cancelled.cancelled().await });

                Ok(StreamResponse {
                    text: Box::pin(text),
                    reasoning: Box::pin(futures_util::stream::empty()),
                    control: StreamControl {
                        inner: Control::Hosted(token),
                    },
                })
            }
            ResolvedProvider::Agent { client, .. } => {
                let stream = SessionLifecycle::start(
                    client.as_ref(),
                    &request.model,
                    &request.messages,
                    request.system_message.as_deref(),
                    &self.options,
                )
                .await?;
                Ok(StreamResponse {
                    text: Box::pin(stream.text.into_stream()),
                    reasoning: Box::pin(stream.reasoning.into_stream()),
                    control: StreamControl {
                        inner: Control::Agent(stream.lifecycle),
                    },
                })
            }
        }
    }

    /// Generates text and returns it once complete.
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError`] on validation, configuration or provider
    /// failure.
    pub async fn complete_text(&self, request: &GenerationRequest) -> Result<String> {
        match self.resolve(request)? {
            ResolvedProvider::Hosted(provider) => {
                let response = provider
                    .chat(&request.chat_request())
                    .await
                    .map_err(|e| self.report(provider.name(), e))?;
                Ok(response.content)
            }
            ResolvedProvider::Agent { client, .. } => {
                SessionLifecycle::complete(
                    client.as_ref(),
                    &request.model,
                    &request.messages,
                    request.system_message.as_deref(),
                    &self.options,
                )
                .await
            }
        }
    }

    /// Generates a value of type `T`, constrained by its JSON schema.
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError::SchemaValidation`] if the output does not
    /// deserialize into `T`, or any error [`Self::complete_text`] returns.
    pub async fn generate_object<T>(&self, request: &GenerationRequest) -> Result<T>
    where
        T: JsonSchema + DeserializeOwned,
    {
        let schema = serde_json::to_value(schemars::schema_for!(T))?;
        let name = schema_name(&T::schema_name());

        let output = match self.resolve(request)? {
            ResolvedProvider::Hosted(provider) => {
                let mut chat = request.chat_request();
                chat.response_schema = Some(ResponseSchema { name, schema });
                provider
                    .chat(&chat)
                    .await
                    .map_err(|e| self.report(provider.name(), e))?
                    .content
            }
            ResolvedProvider::Agent { client, .. } => {
                let instructions = format!(
                    "Respond only with a JSON value that conforms to this JSON schema. \
                     Do not add any other text.\n\n{}",
                    serde_json::to_string_pretty(&schema)?
                );
                let system = match resolve_system_prompt(
                    &request.messages,
                    request.system_message.as_deref(),
                ) {
                    Some(base) => format!("{base}\n\n{instructions}"),
                    None => instructions,
                };
                SessionLifecycle::complete(
                    client.as_ref(),
                    &request.model,
                    &request.messages,
                    Some(&system),
                    &self.options,
                )
                .await?
            }
        };

        parse_structured(&output)
    }

    /// Generates an image and returns the raw encoded bytes.
    ///
    /// # Errors
    ///
    /// - [`AdapterError::Validation`] if the prompt is empty.
    /// - [`AdapterError::Unsupported`] for agent-backed providers.
    /// - Any provider failure.
    pub async fn generate_image(&self, provider: &str, request: &ImageRequest) -> Result<Vec<u8>> {
        if request.prompt.trim().is_empty() {
            return Err(AdapterError::validation("image prompt is empty"));
        }
        match self.registry.resolve(provider, &request.model)? {
            ResolvedProvider::Hosted(hosted) => {
                let bytes = hosted
                    .generate_image(request)
                    .await
                    .map_err(|e| self.report(hosted.name(), e))?;
                info!(provider, model = %request.model, bytes = bytes.len(), "image generated");
                Ok(bytes)
            }
            ResolvedProvider::Agent { name, .. } => Err(AdapterError::Unsupported {
                provider: name,
                operation: "image generation",
            }),
        }
    }
}

/// Restricts a schema name to the characters hosted APIs accept.
fn schema_name(raw: &str) -> String {
    let name: String = raw
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect();
    if name.is_empty() {
        "response".to_string()
    } else {
        name
    }
}

/// Deserializes structured output, tolerating a surrounding code fence.
fn parse_structured<T: DeserializeOwned>(output: &str) -> Result<T> {
    let trimmed = output.trim();
    let body = trimmed
        .strip_prefix("```")
        .and_then(|rest| rest.strip_suffix("```"))
        .map_or(trimmed, |fenced| {
            fenced
                .split_once('\n')
                .map_or(fenced, |(_, body)| body)
                .trim()
        });

    serde_json::from_str(body).map_err(|e| AdapterError::SchemaValidation {
        message: e.to_string(),
        output: output.to_string(),
    })
}
