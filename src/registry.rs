//! Provider registry.
//!
//! Maps provider names to provider-family tagged handles. The registry is
//! built once (usually from [`AdapterConfig`]) and handed to the facade
//! explicitly, so tests can construct a fresh one with fake backends.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::config::AdapterConfig;
use crate::error::{AdapterError, Result};
use crate::provider::LlmProvider;
use crate::providers::{OPENROUTER_BASE_URL, OpenAiProvider};
use crate::session::{AgentClient, AgentProcess};

/// Provider name of `OpenAI`.
pub const OPENAI: &str = "openai";
/// Provider name of `OpenRouter`.
pub const OPENROUTER: &str = "openrouter";
/// Provider name of the generic OpenAI-compatible backend.
pub const COMPATIBLE: &str = "compatible";
/// Provider name of the local agent CLI.
pub const AGENT: &str = "agent";

/// Broad family a provider belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderFamily {
    /// Stateless hosted HTTP API.
    Hosted,
    /// Session-based local agent.
    Agent,
}

impl fmt::Display for ProviderFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Hosted => f.write_str("hosted"),
            Self::Agent => f.write_str("agent"),
        }
    }
}

/// A registered backend.
#[derive(Clone)]
pub enum ProviderHandle {
    /// One hosted client serving every model.
    Hosted(Arc<dyn LlmProvider>),
    /// Hosted clients configured per model; unknown models do not resolve.
    PerModel(HashMap<String, Arc<dyn LlmProvider>>),
    /// Local agent client.
    Agent(Arc<dyn AgentClient>),
}

impl ProviderHandle {
    /// Family of the backend.
    #[must_use]
    pub const fn family(&self) -> ProviderFamily {
        match self {
            Self::Hosted(_) | Self::PerModel(_) => ProviderFamily::Hosted,
            Self::Agent(_) => ProviderFamily::Agent,
        }
    }
}

impl fmt::Debug for ProviderHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Hosted(provider) => f.debug_tuple("Hosted").field(&provider.name()).finish(),
            Self::PerModel(models) => {
                let mut names: Vec<_> = models.keys().collect();
                names.sort();
                f.debug_tuple("PerModel").field(&names).finish()
            }
            Self::Agent(_) => f.write_str("Agent"),
        }
    }
}

/// A provider resolved for one model.
#[derive(Clone)]
pub enum ResolvedProvider {
    /// Hosted client to call.
    Hosted(Arc<dyn LlmProvider>),
    /// Agent client to open sessions on.
    Agent {
        /// Registered provider name.
        name: String,
        /// Agent client.
        client: Arc<dyn AgentClient>,
    },
}

impl ResolvedProvider {
    /// Registered provider name.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Hosted(provider) => provider.name(),
            Self::Agent { name, .. } => name,
        }
    }
}

/// Registry of providers keyed by name.
#[derive(Debug, Clone, Default)]
pub struct ProviderRegistry {
    providers: BTreeMap<String, ProviderHandle>,
}

impl ProviderRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the registry described by `config`.
    ///
    /// Hosted providers are registered only when their key is present, the
    /// agent only when a command is configured. The compatible provider is
    /// always registered; its models resolve only if configured.
    #[must_use]
    pub fn from_config(config: &AdapterConfig) -> Self {
        let mut registry = Self::new();

        if let Some(key) = &config.openai_api_key {
            let provider = OpenAiProvider::new(OPENAI, key, config.openai_base_url.as_deref());
            registry.register(OPENAI, ProviderHandle::Hosted(Arc::new(provider)));
        }

        if let Some(key) = &config.openrouter_api_key {
            let provider = OpenAiProvider::new(OPENROUTER, key, Some(OPENROUTER_BASE_URL));
            registry.register(OPENROUTER, ProviderHandle::Hosted(Arc::new(provider)));
        }

        let compatible = config
            .compatible_endpoints
            .iter()
            .map(|(model, endpoint)| {
                let provider: Arc<dyn LlmProvider> = Arc::new(OpenAiProvider::new(
                    COMPATIBLE,
                    &endpoint.api_key,
                    Some(&endpoint.base_url),
                ));
                (model.clone(), provider)
            })
            .collect();
        registry.register(COMPATIBLE, ProviderHandle::PerModel(compatible));

        if let Some(command) = &config.agent_command {
            let agent = AgentProcess::new(command.clone(), config.agent_args.clone());
            registry.register(AGENT, ProviderHandle::Agent(Arc::new(agent)));
        }

        debug!(providers = ?registry.names(), "provider registry built");
        registry
    }

    /// Registers a provider, replacing any previous one with the same name.
    pub fn register(&mut self, name: impl Into<String>, handle: ProviderHandle) {
        self.providers.insert(name.into(), handle);
    }

    /// Registered provider names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.providers.keys().map(String::as_str).collect()
    }

    /// Family of a registered provider.
    #[must_use]
    pub fn family(&self, name: &str) -> Option<ProviderFamily> {
        self.providers.get(name).map(ProviderHandle::family)
    }

    /// Resolves the backend for `model` on provider `name`.
    ///
    /// # Errors
    ///
    /// - [`AdapterError::ApiKeyMissing`] if `name` is a known hosted
    ///   provider that was not registered for lack of a key.
    /// - [`AdapterError::UnsupportedProvider`] if nothing else is registered
    ///   under `name`.
    /// - [`AdapterError::Configuration`] if a per-model provider has no
    ///   endpoint for `model`.
    pub fn resolve(&self, name: &str, model: &str) -> Result<ResolvedProvider> {
        let handle = self.providers.get(name).ok_or_else(|| {
            if matches!(name, OPENAI | OPENROUTER) {
                AdapterError::ApiKeyMissing {
                    provider: name.to_string(),
                }
            } else {
                AdapterError::UnsupportedProvider {
                    name: name.to_string(),
                }
            }
        })?;

        match handle {
            ProviderHandle::Hosted(provider) => Ok(ResolvedProvider::Hosted(Arc::clone(provider))),
            ProviderHandle::PerModel(models) => models
                .get(model)
                .map(|provider| ResolvedProvider::Hosted(Arc::clone(provider)))
                .ok_or_else(|| {
                    AdapterError::configuration(format!(
                        "no endpoint and API key configured for model '{model}' on provider '{name}'"
                    ))
                }),
            ProviderHandle::Agent(client) => Ok(ResolvedProvider::Agent {
                name: name.to_string(),
                client: Arc::clone(client),
            }),
        }
    }
}
