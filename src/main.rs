use anyhow::Context;
use clap::{Parser, Subcommand};
use futures::StreamExt;
use provider_mux::capability::{should_use_tools, CapabilityCache, ToolAttemptOptions};
use provider_mux::cli::AppConfig;
use provider_mux::message_tracing::MessageTracer;
use provider_mux::models::{ChatMessage, ToolCall, ToolDefinition, ToolUseMessage, ToolUseRequest};
use provider_mux::providers::factory::{default_model, known_models};
use provider_mux::providers::local::{list_local_models, test_local_connection, DEFAULT_LOCAL_ENDPOINT};
use provider_mux::providers::{create_provider, ProviderKind};
use std::io::Write;
use std::path::PathBuf;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Upper bound on tool rounds in a single probe
const MAX_PROBE_ROUNDS: usize = 4;

#[derive(Parser)]
#[command(name = "pmux")]
#[command(about = "Chat and tool-use across Anthropic, OpenAI and local model servers", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to configuration file (defaults to ~/.provider-mux/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default configuration file
    Init,
    /// Stream a single chat reply (Ctrl+C cancels)
    Chat {
        prompt: String,
        /// System prompt
        #[arg(short, long, default_value = "")]
        system: String,
        /// Wait for the whole reply instead of streaming
        #[arg(long)]
        complete: bool,
    },
    /// List known models, plus installed models for local servers
    Models {
        /// Provider to list (defaults to the configured one)
        #[arg(short, long)]
        provider: Option<ProviderKind>,
    },
    /// Check that the configured local server is reachable
    Ping,
    /// Run a tool-enabled conversation with a sample clock tool
    Probe {
        #[arg(default_value = "What is the current UTC time? Use the tool.")]
        prompt: String,
        /// Attempt tools even after the model ignored them
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr so streamed text on stdout stays clean
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let config_path = match &cli.config {
        Some(path) => path.clone(),
        None => AppConfig::default_path().unwrap_or_else(|_| PathBuf::from("config.toml")),
    };

    match cli.command {
        Commands::Init => {
            AppConfig::write_default(&config_path)?;
            println!("Configuration written to {}", config_path.display());
        }
        Commands::Chat {
            prompt,
            system,
            complete,
        } => chat(&AppConfig::load(&config_path)?, prompt, system, complete).await?,
        Commands::Models { provider } => {
            let config = AppConfig::load(&config_path)?;
            let kind = provider.unwrap_or(config.provider.provider);
            models(&config, kind).await
        }
        Commands::Ping => ping(&AppConfig::load(&config_path)?).await?,
        Commands::Probe { prompt, force } => probe(&AppConfig::load(&config_path)?, prompt, force).await?,
    }

    Ok(())
}

/// Token cancelled on the first Ctrl+C
fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let child = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupted, cancelling request");
            child.cancel();
        }
    });
    token
}

async fn chat(config: &AppConfig, prompt: String, system: String, complete: bool) -> anyhow::Result<()> {
    let provider = create_provider(&config.provider)?;
    let cancel = cancel_on_ctrl_c();
    let messages = [ChatMessage::user(prompt)];

    if complete {
        let reply = provider.chat_complete(&messages, &system, &cancel).await?;
        println!("{}", reply);
        return Ok(());
    }

    let mut stream = provider.chat(&messages, &system, &cancel).await?;
    let mut stdout = std::io::stdout();
    while let Some(chunk) = stream.next().await {
        write!(stdout, "{}", chunk?)?;
        stdout.flush()?;
    }
    writeln!(stdout)?;

    if cancel.is_cancelled() {
        eprintln!("(cancelled)");
    }
    Ok(())
}

async fn models(config: &AppConfig, kind: ProviderKind) {
    println!("Known {} models:", kind);
    for model in known_models(kind) {
        let marker = if *model == default_model(kind) { " (default)" } else { "" };
        println!("  • {}{}", model, marker);
    }

    if kind.is_local() {
        let endpoint = local_endpoint(config);
        let installed = list_local_models(endpoint).await;
        println!();
        if installed.is_empty() {
            println!("No models reported by {}", endpoint);
        } else {
            println!("Installed at {}:", endpoint);
            for model in installed {
                println!("  • {}", model);
            }
        }
    }
}

async fn ping(config: &AppConfig) -> anyhow::Result<()> {
    if !config.provider.provider.is_local() {
        anyhow::bail!(
            "ping only applies to local servers; configured provider is {}",
            config.provider.provider
        );
    }

    let endpoint = local_endpoint(config);
    if test_local_connection(endpoint).await {
        println!("✅ {} is reachable", endpoint);
    } else {
        println!("❌ {} is not reachable", endpoint);
    }
    Ok(())
}

fn local_endpoint(config: &AppConfig) -> &str {
    config.provider.endpoint.as_deref().unwrap_or(DEFAULT_LOCAL_ENDPOINT)
}

fn clock_tool() -> ToolDefinition {
    ToolDefinition {
        name: "get_current_time".to_string(),
        description: "Return the current date and time in UTC (RFC 3339)".to_string(),
        input_schema: serde_json::json!({
            "type": "object",
            "properties": {},
            "additionalProperties": false
        }),
    }
}

fn run_tool(call: &ToolCall) -> String {
    match call.name.as_str() {
        "get_current_time" => chrono::Utc::now().to_rfc3339(),
        other => format!("error: unknown tool '{}'", other),
    }
}

async fn probe(config: &AppConfig, prompt: String, force: bool) -> anyhow::Result<()> {
    let provider = create_provider(&config.provider)?;
    let cache = CapabilityCache::new();
    let key = provider.capability_key();
    let options = ToolAttemptOptions {
        force_tool_attempt: force,
    };
    let cancel = cancel_on_ctrl_c();
    let tracer = MessageTracer::new(config.tracing.clone());

    if !should_use_tools(provider.as_ref(), &cache, &key, options) {
        println!("Tools disabled for {}; falling back to plain chat", key);
        let reply = provider
            .chat_complete(&[ChatMessage::user(prompt)], "", &cancel)
            .await?;
        println!("{}", reply);
        return Ok(());
    }

    let tool_provider = provider
        .as_tool_capable()
        .context("provider selected for tools has no tool-use support")?;

    let mut request = ToolUseRequest {
        messages: vec![ToolUseMessage::user(prompt)],
        system_prompt: "Use the provided tools when they help answer.".to_string(),
        tools: vec![clock_tool()],
    };

    for round in 1..=MAX_PROBE_ROUNDS {
        let id = tracer.new_trace_id();
        tracer.trace_request(&id, provider.name(), provider.model(), &request);
        let started = Instant::now();

        let outcome = tool_provider.create_tool_use_message(&request, &cancel).await;
        let latency_ms = started.elapsed().as_millis() as u64;
        cache.record_outcome(&key, &outcome);

        let response = match outcome {
            Ok(response) => {
                tracer.trace_response(&id, &response, latency_ms);
                response
            }
            Err(e) => {
                tracer.trace_error(&id, &e, latency_ms);
                println!("Round {} failed: {}", round, e);
                break;
            }
        };

        println!(
            "Round {}: stop_reason={}, tool_calls={}",
            round,
            response.stop_reason,
            response.tool_calls.len()
        );

        if !response.wants_tools() {
            if !response.text_content.is_empty() {
                println!("{}", response.text_content);
            }
            break;
        }

        request.messages.push(ToolUseMessage::assistant(&response));
        for call in &response.tool_calls {
            let result = run_tool(call);
            println!("  → {}({:?}) = {}", call.name, call.input, result);
            request.messages.push(ToolUseMessage::tool_result(&call.id, result));
        }
    }

    println!();
    for (key, entry) in cache.snapshot() {
        println!(
            "Capability {}: {} (not observed {} time(s))",
            key, entry.state, entry.not_observed_count
        );
    }
    Ok(())
}
