//! Pluggable hosted LLM provider trait.
//!
//! Implementations translate provider-agnostic [`ChatRequest`]/[`ChatResponse`]
//! into provider-specific SDK calls. Callers never see which SDK is in use.

use std::pin::Pin;

use async_trait::async_trait;
use futures_util::Stream;

use crate::error::AdapterError;
use crate::message::{ChatRequest, ChatResponse};

/// A lazily consumed sequence of text fragments.
pub type TextStream = Pin<Box<dyn Stream<Item = Result<String, AdapterError>> + Send>>;

/// An image generation request.
#[derive(Debug, Clone)]
pub struct ImageRequest {
    /// Image model identifier.
    pub model: String,
    /// Text prompt describing the image.
    pub prompt: String,
    /// Provider size string (e.g., `"1024x1024"`).
    pub size: Option<String>,
}

/// Trait for hosted LLM provider backends.
///
/// Implementations handle the transport layer (HTTP, SDK calls) for a
/// specific provider while presenting a uniform interface to the facade.
/// Errors are passed through; rate-limit responses are reported as
/// [`AdapterError::RateLimited`].
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Provider name (e.g., `"openai"`, `"openrouter"`).
    fn name(&self) -> &str;

    /// Executes a chat completion request.
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError`] on API failures or parse errors.
    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse, AdapterError>;

    /// Executes a streaming chat completion request.
    ///
    /// Returns a stream of text chunks as they arrive from the provider.
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError`] on connection failures. Failures after the
    /// stream starts are yielded as stream items.
    async fn chat_stream(&self, request: &ChatRequest) -> Result<TextStream, AdapterError>;

    /// Generates an image and returns the raw encoded bytes.
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError::Unsupported`] unless the provider overrides it.
    async fn generate_image(&self, request: &ImageRequest) -> Result<Vec<u8>, AdapterError> {
        let _ = request;
        Err(AdapterError::Unsupported {
            provider: self.name().to_string(),
            operation: "image generation",
        })
    }
}
