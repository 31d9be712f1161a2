//! # llm-adapter
//!
//! Uniform call shapes over hosted LLM APIs and a locally spawned agent CLI.
//!
//! Callers stream text, complete text, generate schema-conforming values and
//! generate images through [`LlmAdapter`] without knowing which backend
//! serves a provider name. Hosted providers are plain request/response or
//! SDK streams. The agent provider is session based: it reports progress as
//! discrete events, which the [`session`] module routes into bounded
//! [`queue::BoundedEventQueue`]s and exposes as ordinary streams.
//!
//! ## Modules
//!
//! - [`queue`]: bounded push-to-pull event queue
//! - [`session`]: agent sessions, event routing, lifecycle and the stdio client
//! - [`provider`], [`providers`]: hosted provider trait and `OpenAI`-compatible client
//! - [`registry`]: providers keyed by name, tagged by family
//! - [`facade`]: the four call shapes
//! - [`message`], [`config`], [`error`], [`notify`]: supporting types
//! - [`cli`]: command-line driver

pub mod cli;
pub mod config;
pub mod error;
pub mod facade;
pub mod message;
pub mod notify;
pub mod provider;
pub mod providers;
pub mod queue;
pub mod registry;
pub mod session;

pub use config::{AdapterConfig, AdapterConfigBuilder};
pub use error::{AdapterError, Result};
pub use facade::{GenerationRequest, LlmAdapter, StreamControl, StreamResponse};
pub use message::{ChatMessage, DispatchPolicy, Role};
pub use notify::{Notice, Notifier, TracingNotifier};
pub use provider::{ImageRequest, LlmProvider, TextStream};
pub use queue::BoundedEventQueue;
pub use registry::{ProviderFamily, ProviderHandle, ProviderRegistry, ResolvedProvider};
pub use session::{AgentClient, AgentSession, SessionConfig, SessionLifecycle, SessionOptions};
