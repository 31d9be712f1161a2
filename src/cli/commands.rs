//! CLI command implementations.
//!
//! Each command builds a [`GenerationRequest`] or [`ImageRequest`] from its
//! arguments and calls the facade. Commands return the text to print;
//! `chat` streams its output directly and returns an empty string.

use anyhow::{Context, Result};
use futures_util::StreamExt;
use serde_json::json;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::cli::parser::{Cli, Commands, OutputFormat};
use crate::config::AdapterConfig;
use crate::facade::{GenerationRequest, LlmAdapter};
use crate::message::user_message;
use crate::provider::{ImageRequest, TextStream};

/// Executes the parsed command.
///
/// # Errors
///
/// Returns an error if the provider cannot be resolved or the call fails.
pub async fn execute(cli: &Cli) -> Result<String> {
    let config = AdapterConfig::from_env();
    let provider = cli
        .provider
        .clone()
        .unwrap_or_else(|| config.default_provider.clone());
    let adapter = LlmAdapter::from_config(&config);

    match &cli.command {
        Commands::Chat {
            model,
            system,
            temperature,
            reasoning,
            prompt,
        } => {
            let mut request = GenerationRequest::new(&provider, model, vec![user_message(prompt)]);
            request.system_message.clone_from(system);
            request.temperature = *temperature;
            cmd_chat(&adapter, &request, *reasoning).await
        }
        Commands::Complete {
            model,
            system,
            prompt,
        } => {
            let mut request = GenerationRequest::new(&provider, model, vec![user_message(prompt)]);
            request.system_message.clone_from(system);
            cmd_complete(&adapter, &request, cli.format).await
        }
        Commands::Image {
            model,
            output,
            size,
            prompt,
        } => {
            let request = ImageRequest {
                model: model.clone(),
                prompt: prompt.clone(),
                size: size.clone(),
            };
            let bytes = adapter.generate_image(&provider, &request).await?;
            tokio::fs::write(output, &bytes)
                .await
                .with_context(|| format!("failed to write image to {}", output.display()))?;
            Ok(match cli.format {
                OutputFormat::Text => format!("Wrote {} bytes to {}", bytes.len(), output.display()),
                OutputFormat::Json => {
                    json!({ "path": output.display().to_string(), "bytes": bytes.len() }).to_string()
                }
            })
        }
        Commands::Providers => Ok(cmd_providers(&adapter, cli.format)),
    }
}

async fn cmd_chat(
    adapter: &LlmAdapter,
    request: &GenerationRequest,
    reasoning: bool,
) -> Result<String> {
    let response = adapter.stream_text(request).await?;
    if let Some(session_id) = response.control.session_id() {
        debug!(session_id, "streaming from agent session");
    }

    let reasoning_task = spawn_reasoning(response.reasoning, reasoning);

    let outcome = tokio::select! {
        result = drain(response.text, tokio::io::stdout()) => result,
        _ = tokio::signal::ctrl_c() => {
            warn!("interrupted, aborting generation");
            response.control.abort().await;
            Ok(())
        }
    };
    response.control.cleanup().await;

    match reasoning_task.await {
        Ok(Err(e)) if reasoning => warn!(error = %e, "reasoning stream failed"),
        Err(e) => warn!(error = %e, "reasoning task panicked"),
        Ok(_) => {}
    }

    outcome?;
    let mut stdout = tokio::io::stdout();
    stdout.write_all(b"\n").await?;
    stdout.flush().await?;
    Ok(String::new())
}

/// Consumes the reasoning stream, echoing it to stderr when `show` is set.
///
/// A hidden stream is still drained so its queue never fills up.
fn spawn_reasoning(stream: TextStream, show: bool) -> JoinHandle<Result<()>> {
    if show {
        tokio::spawn(drain(stream, tokio::io::stderr()))
    } else {
        tokio::spawn(drain(stream, tokio::io::sink()))
    }
}

/// Copies a text stream to `out` as it arrives.
async fn drain<W: AsyncWrite + Unpin>(mut stream: TextStream, mut out: W) -> Result<()> {
    while let Some(delta) = stream.next().await {
        out.write_all(delta?.as_bytes()).await?;
        out.flush().await?;
    }
    Ok(())
}

async fn cmd_complete(
    adapter: &LlmAdapter,
    request: &GenerationRequest,
    format: OutputFormat,
) -> Result<String> {
    let content = adapter.complete_text(request).await?;
    Ok(match format {
        OutputFormat::Text => content,
        OutputFormat::Json => json!({
            "provider": request.provider,
            "model": request.model,
            "content": content,
        })
        .to_string(),
    })
}

fn cmd_providers(adapter: &LlmAdapter, format: OutputFormat) -> String {
    let registry = adapter.registry();
    let rows: Vec<(&str, String)> = registry
        .names()
        .into_iter()
        .map(|name| {
            let family = registry
                .family(name)
                .map_or_else(String::new, |f| f.to_string());
            (name, family)
        })
        .collect();

    match format {
        OutputFormat::Text => rows
            .iter()
            .map(|(name, family)| format!("{name:<12} {family}"))
            .collect::<Vec<_>>()
            .join("\n"),
        OutputFormat::Json => {
            let providers: Vec<_> = rows
                .iter()
                .map(|(name, family)| json!({ "name": name, "family": family }))
                .collect();
            json!({ "providers": providers }).to_string()
        }
    }
}
