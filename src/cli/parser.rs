//! Command-line argument parsing.
//!
//! Defines the CLI structure using clap derive macros.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// llm-adapter: one interface over hosted LLM APIs and a local agent CLI.
///
/// Provider keys and the agent command are read from the environment
/// (`OPENAI_API_KEY`, `OPENROUTER_API_KEY`, `LLM_ADAPTER_AGENT_COMMAND`, ...).
#[derive(Parser, Debug)]
#[command(name = "llm-adapter")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Provider to call. Defaults to `LLM_ADAPTER_PROVIDER` or `openai`.
    #[arg(short, long, global = true)]
    pub provider: Option<String>,

    /// Enable verbose logging on stderr.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output format (text, json).
    #[arg(long, value_enum, default_value_t = OutputFormat::Text, global = true)]
    pub format: OutputFormat,

    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Output format for command results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text.
    Text,
    /// JSON.
    Json,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Stream a reply to stdout as it is generated.
    #[command(after_help = r#"Examples:
  llm-adapter chat --model gpt-4o-mini "Explain ownership in one paragraph"
  llm-adapter --provider agent chat --model gpt-5 --reasoning "Plan a refactor"
  llm-adapter chat --model gpt-4o-mini --system "Answer in French" "hello"
"#)]
    Chat {
        /// Model identifier.
        #[arg(short, long)]
        model: String,

        /// System prompt.
        #[arg(short, long)]
        system: Option<String>,

        /// Sampling temperature (hosted providers only).
        #[arg(short, long)]
        temperature: Option<f32>,

        /// Also stream reasoning deltas to stderr.
        #[arg(long)]
        reasoning: bool,

        /// Prompt text.
        prompt: String,
    },

    /// Print a complete reply once generation finishes.
    Complete {
        /// Model identifier.
        #[arg(short, long)]
        model: String,

        /// System prompt.
        #[arg(short, long)]
        system: Option<String>,

        /// Prompt text.
        prompt: String,
    },

    /// Generate an image and write the raw bytes to a file.
    #[command(after_help = r#"Examples:
  llm-adapter image --model dall-e-3 --output cat.png "a cat reading a book"
  llm-adapter image --model dall-e-3 --size 1792x1024 --output wide.png "a harbor at dawn"
"#)]
    Image {
        /// Image model identifier.
        #[arg(short, long)]
        model: String,

        /// Output file path.
        #[arg(short, long)]
        output: PathBuf,

        /// Image size (e.g. `1024x1024`).
        #[arg(long)]
        size: Option<String>,

        /// Prompt describing the image.
        prompt: String,
    },

    /// List registered providers and their family.
    Providers,
}
