//! `OpenAI` provider implementation using the `async-openai` crate.
//!
//! Supports any `OpenAI`-compatible API (`OpenAI`, `OpenRouter`, local
//! proxies) via a base URL override. The same type backs every hosted
//! provider name in the registry.

use async_openai::Client;
use async_openai::config::OpenAIConfig;
use async_openai::error::OpenAIError;
use async_openai::types::{
    ChatCompletionRequestAssistantMessage, ChatCompletionRequestAssistantMessageContent,
    ChatCompletionRequestMessage, ChatCompletionRequestSystemMessage,
    ChatCompletionRequestSystemMessageContent, ChatCompletionRequestUserMessage,
    ChatCompletionRequestUserMessageContent, CreateChatCompletionRequest,
    CreateChatCompletionStreamResponse, CreateImageRequest, Image, ImageModel,
    ImageResponseFormat, ImageSize, ResponseFormat, ResponseFormatJsonSchema,
};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use futures_util::StreamExt;
use tracing::debug;

use crate::error::{AdapterError, RATE_LIMIT_STATUS};
use crate::message::{ChatMessage, ChatRequest, ChatResponse, Role, TokenUsage};
use crate::provider::{ImageRequest, LlmProvider, TextStream};

/// Base URL of the `OpenRouter` API.
pub const OPENROUTER_BASE_URL: &str = "https://openrouter.ai/api/v1";

/// `OpenAI`-compatible LLM provider.
///
/// Wraps the `async-openai` client for chat completions and image
/// generation.
pub struct OpenAiProvider {
    name: String,
    client: Client<OpenAIConfig>,
}

impl OpenAiProvider {
    /// Creates a provider registered under `name`.
    #[must_use]
    pub fn new(name: impl Into<String>, api_key: &str, base_url: Option<&str>) -> Self {
        let mut openai_config = OpenAIConfig::new().with_api_key(api_key);

        if let Some(base_url) = base_url {
            openai_config = openai_config.with_api_base(base_url);
        }

        Self {
            name: name.into(),
            client: Client::with_config(openai_config),
        }
    }

    /// Converts our message type to the `OpenAI` SDK type.
    fn convert_message(msg: &ChatMessage) -> ChatCompletionRequestMessage {
        match msg.role {
            Role::System => {
                ChatCompletionRequestMessage::System(ChatCompletionRequestSystemMessage {
                    content: ChatCompletionRequestSystemMessageContent::Text(msg.content.clone()),
                    name: None,
                })
            }
            Role::User => ChatCompletionRequestMessage::User(ChatCompletionRequestUserMessage {
                content: ChatCompletionRequestUserMessageContent::Text(msg.content.clone()),
                name: None,
            }),
            Role::Assistant => {
                #[allow(deprecated)]
                ChatCompletionRequestMessage::Assistant(ChatCompletionRequestAssistantMessage {
                    content: Some(ChatCompletionRequestAssistantMessageContent::Text(
                        msg.content.clone(),
                    )),
                    name: None,
                    tool_calls: None,
                    refusal: None,
                    audio: None,
                    function_call: None,
                })
            }
        }
    }

    /// Builds an `OpenAI` chat completion request from our generic request.
    fn build_request(request: &ChatRequest) -> CreateChatCompletionRequest {
        let messages: Vec<_> = request.messages.iter().map(Self::convert_message).collect();

        let response_format = request
            .response_schema
            .as_ref()
            .map(|schema| ResponseFormat::JsonSchema {
                json_schema: ResponseFormatJsonSchema {
                    description: None,
                    name: schema.name.clone(),
                    schema: Some(schema.schema.clone()),
                    strict: Some(false),
                },
            });

        CreateChatCompletionRequest {
            model: request.model.clone(),
            messages,
            temperature: request.temperature,
            max_completion_tokens: request.max_tokens,
            stream: if request.stream { Some(true) } else { None },
            response_format,
            ..Default::default()
        }
    }

    /// Maps a size string such as `"1024x1024"` to the SDK enum.
    fn parse_size(size: &str) -> Result<ImageSize, AdapterError> {
        match size {
            "256x256" => Ok(ImageSize::S256x256),
            "512x512" => Ok(ImageSize::S512x512),
            "1024x1024" => Ok(ImageSize::S1024x1024),
            "1792x1024" => Ok(ImageSize::S1792x1024),
            "1024x1792" => Ok(ImageSize::S1024x1792),
            other => Err(AdapterError::validation(format!(
                "unsupported image size '{other}'"
            ))),
        }
    }
}

/// Classifies an SDK error, separating rate-limit conditions from the rest.
pub(crate) fn classify_error(provider: &str, err: OpenAIError) -> AdapterError {
    match err {
        OpenAIError::Reqwest(e) => {
            let status = e.status().map(|s| s.as_u16());
            if status == Some(RATE_LIMIT_STATUS) {
                AdapterError::RateLimited {
                    provider: provider.to_string(),
                    message: e.to_string(),
                }
            } else {
                AdapterError::ApiRequest {
                    message: e.to_string(),
                    status,
                }
            }
        }
        OpenAIError::ApiError(api) => {
            if is_rate_limit_body(api.r#type.as_deref(), api.code.as_deref()) {
                AdapterError::RateLimited {
                    provider: provider.to_string(),
                    message: api.message,
                }
            } else {
                AdapterError::ApiRequest {
                    message: api.message,
                    status: None,
                }
            }
        }
        OpenAIError::StreamError(message) => {
            if message.contains(&RATE_LIMIT_STATUS.to_string()) {
                AdapterError::RateLimited {
                    provider: provider.to_string(),
                    message,
                }
            } else {
                AdapterError::Stream { message }
            }
        }
        OpenAIError::JSONDeserialize(e) => AdapterError::ResponseParse {
            message: e.to_string(),
        },
        other => AdapterError::ApiRequest {
            message: other.to_string(),
            status: None,
        },
    }
}

/// Error `type` values `OpenAI` sends in the body of a 429 response.
const RATE_LIMIT_TYPES: &[&str] = &["requests", "tokens", "insufficient_quota"];

/// Error `code` values `OpenAI` sends in the body of a 429 response.
const RATE_LIMIT_CODES: &[&str] = &["rate_limit_exceeded", "insufficient_quota"];

/// `async-openai` surfaces non-2xx responses as [`OpenAIError::ApiError`]
/// without the status code, so rate limits are recognised from the body.
fn is_rate_limit_body(kind: Option<&str>, code: Option<&str>) -> bool {
    kind.is_some_and(|t| RATE_LIMIT_TYPES.contains(&t) || t.contains("rate_limit"))
        || code.is_some_and(|c| RATE_LIMIT_CODES.contains(&c))
}

impl std::fmt::Debug for OpenAiProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiProvider")
            .field("name", &self.name)
            .field("client", &"<async-openai::Client>")
            .finish()
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse, AdapterError> {
        let openai_request = Self::build_request(request);

        let response = self
            .client
            .chat()
            .create(openai_request)
            .await
            .map_err(|e| classify_error(&self.name, e))?;

        let choice = response.choices.first();

        let content = choice
            .and_then(|c| c.message.content.as_ref())
            .cloned()
            .unwrap_or_default();

        let finish_reason = choice.and_then(|c| {
            c.finish_reason
                .as_ref()
                .map(|fr| format!("{fr:?}").to_lowercase())
        });

        let usage = response
            .usage
            .map_or_else(TokenUsage::default, |u| TokenUsage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
                total_tokens: u.total_tokens,
            });

        Ok(ChatResponse {
            content,
            usage,
            finish_reason,
        })
    }

    async fn chat_stream(&self, request: &ChatRequest) -> Result<TextStream, AdapterError> {
        let mut stream_request = request.clone();
        stream_request.stream = true;
        let openai_request = Self::build_request(&stream_request);

        let stream = self
            .client
            .chat()
            .create_stream(openai_request)
            .await
            .map_err(|e| classify_error(&self.name, e))?;

        let provider = self.name.clone();
        let mapped = stream.filter_map(
            move |result: Result<CreateChatCompletionStreamResponse, OpenAIError>| {
                let item = match result {
                    Ok(response) => response
                        .choices
                        .first()
                        .and_then(|c| c.delta.content.clone())
                        .filter(|text| !text.is_empty())
                        .map(Ok),
                    Err(e) => Some(Err(classify_error(&provider, e))),
                };
                futures_util::future::ready(item)
            },
        );

        Ok(Box::pin(mapped))
    }

    async fn generate_image(&self, request: &ImageRequest) -> Result<Vec<u8>, AdapterError> {
        let size = request.size.as_deref().map(Self::parse_size).transpose()?;
        let image_request = CreateImageRequest {
            prompt: request.prompt.clone(),
            model: Some(ImageModel::Other(request.model.clone())),
            n: Some(1),
            response_format: Some(ImageResponseFormat::B64Json),
            size,
            ..Default::default()
        };

        debug!(provider = %self.name, model = %request.model, "requesting image");
        let response = self
            .client
            .images()
            .create(image_request)
            .await
            .map_err(|e| classify_error(&self.name, e))?;

        let image = response
            .data
            .first()
            .ok_or_else(|| AdapterError::ResponseParse {
                message: "image response contained no data".to_string(),
            })?;

        match image.as_ref() {
            Image::B64Json { b64_json, .. } => {
                STANDARD
                    .decode(b64_json.as_bytes())
                    .map_err(|e| AdapterError::ResponseParse {
                        message: format!("invalid base64 image payload: {e}"),
                    })
            }
            Image::Url { .. } => Err(AdapterError::ResponseParse {
                message: "provider returned an image URL instead of image data".to_string(),
            }),
        }
    }
}
