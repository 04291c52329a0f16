//! ChatStream - Stream a Chat Turn to the Terminal
//!
//! Sends one conversation turn to a streaming chat provider and writes the
//! response to stdout as it arrives. Logs go to stderr.
//!
//! # Usage
//!
//! ```bash
//! # Ask a question (API key from $OPENAI_API_KEY)
//! chatstream "Why is the sky blue?"
//!
//! # Prompt from stdin, custom model
//! echo "Summarize this" | chatstream --model gpt-4o
//!
//! # Local plain-text endpoint
//! chatstream --provider plain --base-url http://localhost:9000/stream "hi"
//!
//! # Continue a saved conversation
//! chatstream --history conversation.json "And then?"
//!
//! # Verbose logging
//! RUST_LOG=debug chatstream "hello"
//! ```
//!
//! # Signals
//!
//! - `SIGINT` (Ctrl-C): Cancel the running turn and exit with status 130

mod chat;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};

use chatstream_core::config::{default_config_path, load_config_from_path, ChatStreamConfig};
use chatstream_core::{ConfigSource, GenerationParams, ProviderKind, SessionId};

use chat::Outcome;

/// ChatStream - Streaming chat client
#[derive(Parser, Debug)]
#[command(name = "chatstream")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Message to send; read from stdin when omitted
    prompt: Vec<String>,

    /// Configuration file path
    #[arg(short = 'c', long, env = "CHATSTREAM_CONFIG", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Provider wire format (openai, plain)
    #[arg(short = 'p', long, value_name = "KIND")]
    provider: Option<ProviderKind>,

    /// Provider base URL
    #[arg(long, value_name = "URL")]
    base_url: Option<String>,

    /// Model name
    #[arg(short = 'm', long)]
    model: Option<String>,

    /// System message placed before the conversation
    #[arg(short = 's', long, value_name = "TEXT")]
    system: Option<String>,

    /// JSON file holding earlier messages of the conversation
    #[arg(long, value_name = "FILE")]
    history: Option<PathBuf>,

    /// Session identifier (random when omitted)
    #[arg(long, value_name = "ID")]
    session: Option<String>,

    /// Sampling temperature
    #[arg(short = 't', long)]
    temperature: Option<f32>,

    /// Maximum tokens to generate
    #[arg(long)]
    max_tokens: Option<u32>,

    /// Characters buffered before output is written
    #[arg(long, value_name = "CHARS")]
    flush_threshold: Option<usize>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, env = "CHATSTREAM_LOG_LEVEL", default_value = "info")]
    log_level: String,
}

impl Args {
    /// Generation parameters requested on the command line
    fn generation_params(&self) -> GenerationParams {
        GenerationParams {
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            ..GenerationParams::default()
        }
    }
}

/// Initialize logging on stderr with the specified level
fn init_logging(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!("chatstream={level},chatstream_core={level}"))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .init();
}

/// Apply command-line overrides; returns whether any were given
fn apply_cli_overrides(config: &mut ChatStreamConfig, args: &Args) -> bool {
    let mut applied = false;

    if let Some(kind) = args.provider {
        config.provider_kind = kind;
        applied = true;
    }
    if let Some(ref url) = args.base_url {
        config.base_url.clone_from(url);
        applied = true;
    }
    if let Some(ref model) = args.model {
        config.model.clone_from(model);
        applied = true;
    }
    if let Some(threshold) = args.flush_threshold {
        config.flush_threshold = threshold;
        applied = true;
    }

    if applied {
        config.set_source(ConfigSource::Cli);
    }
    applied
}

/// Process exit status for a finished turn
fn exit_status(outcome: Outcome) -> u8 {
    match outcome {
        Outcome::Completed { .. } => 0,
        // 128 + SIGINT, as shells report it
        Outcome::Cancelled => 130,
    }
}

/// Resolve configuration from file, environment and arguments
fn resolve_config(args: &Args) -> Result<ChatStreamConfig> {
    let path = args.config.clone().or_else(default_config_path);
    let mut config = load_config_from_path(path).context("Failed to load configuration")?;

    apply_cli_overrides(&mut config, args);
    config.validate().context("Invalid command-line arguments")?;

    info!(
        source = %config.source,
        provider = %config.provider_kind,
        model = %config.model,
        "Configuration resolved"
    );
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();

    init_logging(&args.log_level);

    let config = resolve_config(&args)?;

    let prompt = chat::read_prompt(&args.prompt).await?;
    let session_id = args
        .session
        .clone()
        .map_or_else(SessionId::new, SessionId::from);
    let history = chat::load_history(
        args.history.as_deref(),
        session_id,
        args.system.as_deref(),
        &prompt,
    )
    .await?;

    match chat::run(&config, history, &args.generation_params()).await {
        Ok(outcome @ Outcome::Completed { chars }) => {
            info!(chars, "Turn finished");
            Ok(ExitCode::from(exit_status(outcome)))
        }
        Ok(Outcome::Cancelled) => {
            eprintln!("\n(cancelled)");
            Ok(ExitCode::from(exit_status(Outcome::Cancelled)))
        }
        Err(e) => {
            error!(error = %e, "Turn failed");
            Err(e)
        }
    }
}
