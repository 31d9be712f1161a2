//! Adapter configuration with builder pattern and environment variable support.
//!
//! Configuration is resolved in order: explicit values → environment variables → defaults.

use std::collections::HashMap;
use std::time::Duration;

use crate::message::DispatchPolicy;
use crate::queue::DEFAULT_QUEUE_CAPACITY;

/// Default provider used when none is named.
const DEFAULT_PROVIDER: &str = "openai";

/// Endpoint and key for one model served by an OpenAI-compatible backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompatibleEndpoint {
    /// Base URL of the compatible API.
    pub base_url: String,
    /// API key for the endpoint.
    pub api_key: String,
}

/// Configuration for the adapter layer.
#[derive(Debug, Clone)]
pub struct AdapterConfig {
    /// Provider used when a caller does not name one.
    pub default_provider: String,
    /// `OpenAI` API key.
    pub openai_api_key: Option<String>,
    /// Optional `OpenAI` base URL override (for proxies).
    pub openai_base_url: Option<String>,
    /// `OpenRouter` API key.
    pub openrouter_api_key: Option<String>,
    /// Per-model endpoints for the generic compatible provider.
    pub compatible_endpoints: HashMap<String, CompatibleEndpoint>,
    /// Command that launches the local agent CLI.
    pub agent_command: Option<String>,
    /// Extra arguments for the agent CLI.
    pub agent_args: Vec<String>,
    /// Optional upper bound on a non-streaming agent turn. Unbounded when unset.
    pub agent_wait_timeout: Option<Duration>,
    /// Buffered values per output queue before the oldest is dropped.
    pub queue_capacity: usize,
    /// Which turns are sent to session-based providers.
    pub dispatch_policy: DispatchPolicy,
}

impl AdapterConfig {
    /// Creates a new builder for `AdapterConfig`.
    #[must_use]
    pub fn builder() -> AdapterConfigBuilder {
        AdapterConfigBuilder::default()
    }

    /// Creates configuration from environment variables with defaults.
    #[must_use]
    pub fn from_env() -> Self {
        Self::builder().from_env().build()
    }
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Builder for [`AdapterConfig`].
#[derive(Debug, Clone, Default)]
pub struct AdapterConfigBuilder {
    default_provider: Option<String>,
    openai_api_key: Option<String>,
    openai_base_url: Option<String>,
    openrouter_api_key: Option<String>,
    compatible_endpoints: HashMap<String, CompatibleEndpoint>,
    agent_command: Option<String>,
    agent_args: Vec<String>,
    agent_wait_timeout: Option<Duration>,
    queue_capacity: Option<usize>,
    dispatch_policy: Option<DispatchPolicy>,
}

impl AdapterConfigBuilder {
    /// Populates unset fields from environment variables.
    #[must_use]
    pub fn from_env(mut self) -> Self {
        if self.default_provider.is_none() {
            self.default_provider = std::env::var("LLM_ADAPTER_PROVIDER").ok();
        }
        if self.openai_api_key.is_none() {
            self.openai_api_key = std::env::var("OPENAI_API_KEY").ok();
        }
        if self.openai_base_url.is_none() {
            self.openai_base_url = std::env::var("OPENAI_BASE_URL").ok();
        }
        if self.openrouter_api_key.is_none() {
            self.openrouter_api_key = std::env::var("OPENROUTER_API_KEY").ok();
        }
        if self.agent_command.is_none() {
            self.agent_command = std::env::var("LLM_ADAPTER_AGENT_COMMAND").ok();
        }
        if self.agent_wait_timeout.is_none() {
            self.agent_wait_timeout = std::env::var("LLM_ADAPTER_AGENT_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs);
        }
        if self.queue_capacity.is_none() {
            self.queue_capacity = std::env::var("LLM_ADAPTER_QUEUE_CAPACITY")
                .ok()
                .and_then(|v| v.parse().ok());
        }
        if self.dispatch_policy.is_none() {
            self.dispatch_policy = std::env::var("LLM_ADAPTER_DISPATCH_POLICY")
                .ok()
                .and_then(|v| v.parse().ok());
        }
        self
    }

    /// Sets the default provider name.
    #[must_use]
    pub fn default_provider(mut self, name: impl Into<String>) -> Self {
        self.default_provider = Some(name.into());
        self
    }

    /// Sets the `OpenAI` API key.
    #[must_use]
    pub fn openai_api_key(mut self, key: impl Into<String>) -> Self {
        self.openai_api_key = Some(key.into());
        self
    }

    /// Sets the `OpenAI` base URL override.
    #[must_use]
    pub fn openai_base_url(mut self, url: impl Into<String>) -> Self {
        self.openai_base_url = Some(url.into());
        self
    }

    /// Sets the `OpenRouter` API key.
    #[must_use]
    pub fn openrouter_api_key(mut self, key: impl Into<String>) -> Self {
        self.openrouter_api_key = Some(key.into());
        self
    }

    /// Registers an endpoint for one model of the compatible provider.
    #[must_use]
    pub fn compatible_endpoint(
        mut self,
        model: impl Into<String>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        self.compatible_endpoints.insert(
            model.into(),
            CompatibleEndpoint {
                base_url: base_url.into(),
                api_key: api_key.into(),
            },
        );
        self
    }

    /// Sets the agent CLI command.
    #[must_use]
    pub fn agent_command(mut self, command: impl Into<String>) -> Self {
        self.agent_command = Some(command.into());
        self
    }

    /// Sets the agent CLI arguments.
    #[must_use]
    pub fn agent_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.agent_args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the non-streaming agent turn timeout.
    #[must_use]
    pub const fn agent_wait_timeout(mut self, timeout: Duration) -> Self {
        self.agent_wait_timeout = Some(timeout);
        self
    }

    /// Sets the per-queue buffer capacity.
    #[must_use]
    pub const fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = Some(capacity);
        self
    }

    /// Sets the session dispatch policy.
    #[must_use]
    pub const fn dispatch_policy(mut self, policy: DispatchPolicy) -> Self {
        self.dispatch_policy = Some(policy);
        self
    }

    /// Builds the [`AdapterConfig`].
    #[must_use]
    pub fn build(self) -> AdapterConfig {
        AdapterConfig {
            default_provider: self
                .default_provider
                .unwrap_or_else(|| DEFAULT_PROVIDER.to_string()),
            openai_api_key: self.openai_api_key,
            openai_base_url: self.openai_base_url,
            openrouter_api_key: self.openrouter_api_key,
            compatible_endpoints: self.compatible_endpoints,
            agent_command: self.agent_command,
            agent_args: self.agent_args,
            agent_wait_timeout: self.agent_wait_timeout,
            queue_capacity: self.queue_capacity.unwrap_or(DEFAULT_QUEUE_CAPACITY),
            dispatch_policy: self.dispatch_policy.unwrap_or_default(),
        }
    }
}
