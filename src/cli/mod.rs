//! CLI layer for llm-adapter.
//!
//! Provides the command-line interface using clap, with commands for
//! streaming, completion, image generation and listing providers.

pub mod commands;
pub mod parser;

pub use commands::execute;
pub use parser::{Cli, Commands, OutputFormat};
