//! Concrete hosted provider implementations.

pub mod openai;

pub use openai::{OPENROUTER_BASE_URL, OpenAiProvider};
