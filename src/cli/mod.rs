//! CLI subcommand definitions and handlers.
//!
//! Uses clap derive to define the subcommand hierarchy:
//! - `serve` (default) -- start the HTTP API server
//! - `chat` -- interactive conversation with one agent
//! - `status` -- query a running instance for health info
//! - `config show|path` -- inspect configuration
//! - `version` -- print build/version info

use std::io::Write;
use std::num::NonZeroUsize;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio_util::sync::CancellationToken;
use tracing::error;

use crate::agent::factory::build_providers;
use crate::agent::relay::{Relay, RelayItem};
use crate::agent::{
    resolve_session, AgentConfig, AgentDefinition, AgentError, AgentRegistry,
    InMemoryConversationMemory, InvocationRequest, Invoker, MemoryInvoker, SessionIds,
    APOLOGY_MESSAGE,
};
use crate::config::{self, AppConfig};
use crate::server::{self, AppState};

/// Persona agent server and chat client.
#[derive(Parser, Debug)]
#[command(
    name = "persona",
    version = env!("CARGO_PKG_VERSION"),
    about = "Persona: configurable conversational agents over HTTP and the terminal"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the HTTP API server (default when no subcommand is given).
    Serve {
        /// Bind host (default: from config or 127.0.0.1).
        #[arg(long)]
        host: Option<String>,

        /// Bind port (default: from config or 4111).
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Chat with an agent in the terminal.
    Chat(ChatArgs),

    /// Query a running instance for health/status information.
    Status {
        /// Host of the running instance.
        #[arg(long)]
        host: Option<String>,

        /// Port of the running instance.
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Inspect configuration.
    #[command(subcommand)]
    Config(ConfigCommand),

    /// Print version, build date, and git commit information.
    Version,
}

/// Persona and session flags for `chat`. Persona fields left out are
/// prompted for.
#[derive(Args, Debug, Default)]
pub struct ChatArgs {
    /// Agent display name.
    #[arg(long)]
    pub name: Option<String>,

    /// Behavior instructions.
    #[arg(long)]
    pub instructions: Option<String>,

    /// Response tone.
    #[arg(long)]
    pub personality: Option<String>,

    /// Model identifier (prefix with `ollama:` for a local model).
    #[arg(long)]
    pub model: Option<String>,

    /// Number of remembered messages replayed each turn.
    #[arg(long)]
    pub max_memory_messages: Option<NonZeroUsize>,

    /// Resume an existing thread.
    #[arg(long)]
    pub thread: Option<String>,

    /// Resource (user) id owning the thread.
    #[arg(long)]
    pub resource: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Print the fully loaded configuration (secrets redacted) as JSON.
    Show,

    /// Print the resolved configuration file path.
    Path,
}

/// Secrets that should be redacted when printing config.
const SECRET_KEYS: &[&str] = &["apikey", "api_key", "token", "secret", "password"];

// ---------------------------------------------------------------------------
// Subcommand handlers
// ---------------------------------------------------------------------------

/// Run the `serve` subcommand.
pub async fn handle_serve(
    mut cfg: AppConfig,
    host: Option<String>,
    port: Option<u16>,
) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(host) = host {
        cfg.server.host = host;
    }
    if let Some(port) = port {
        cfg.server.port = port;
    }
    let invoker = build_invoker(&cfg)?;
    let state = AppState::new(Arc::new(AgentRegistry::new()), Arc::new(invoker));
    server::run_server(&cfg.server, state).await?;
    Ok(())
}

/// Run the `chat` subcommand against stdin/stdout.
pub async fn handle_chat(
    cfg: AppConfig,
    args: ChatArgs,
) -> Result<(), Box<dyn std::error::Error>> {
    let invoker = build_invoker(&cfg)?;

    let mut input = tokio::io::BufReader::new(tokio::io::stdin());
    let mut out = std::io::stdout();

    let Some(agent_config) = prompt_persona(&args, &mut input, &mut out).await? else {
        return Ok(());
    };
    let registry = AgentRegistry::new();
    let agent = registry.create(&agent_config);
    let session = resolve_session(args.thread.as_deref(), args.resource.as_deref());

    run_chat_loop(&agent, session, &invoker, &mut input, &mut out).await?;
    Ok(())
}

/// Provider-backed invoker with process-local memory and the configured
/// reply token cap.
fn build_invoker(cfg: &AppConfig) -> Result<MemoryInvoker, AgentError> {
    let provider = build_providers(cfg)?;
    Ok(MemoryInvoker::new(
        Arc::new(provider),
        Arc::new(InMemoryConversationMemory::new()),
    )
    .with_max_tokens(cfg.max_tokens))
}

/// Fill persona fields missing from the flags by asking on `input`.
/// A blank answer keeps the default. Returns `None` on end of input.
pub async fn prompt_persona<R, W>(
    args: &ChatArgs,
    input: &mut R,
    out: &mut W,
) -> std::io::Result<Option<AgentConfig>>
where
    R: AsyncBufRead + Unpin,
    W: Write,
{
    let fields = [
        ("Agent name", &args.name),
        ("Instructions", &args.instructions),
        ("Personality", &args.personality),
        ("Model", &args.model),
    ];
    let mut answers = Vec::with_capacity(fields.len());
    for (label, flag) in fields {
        let value = match flag {
            Some(value) => Some(value.clone()),
            None => {
                let question = format!("{label} (blank for default): ");
                match prompt_line(input, out, &question).await? {
                    Some(answer) => Some(answer),
                    None => return Ok(None),
                }
            }
        };
        answers.push(value);
    }

    let mut answers = answers.into_iter();
    Ok(Some(AgentConfig {
        name: answers.next().flatten(),
        instructions: answers.next().flatten(),
        personality: answers.next().flatten(),
        model: answers.next().flatten(),
        max_memory_messages: args.max_memory_messages,
    }))
}

/// Read lines from `input` and relay each reply to `out` as it streams.
/// Ends on `exit`, `quit`, or end of input.
pub async fn run_chat_loop<R, W>(
    agent: &AgentDefinition,
    session: SessionIds,
    invoker: &dyn Invoker,
    input: &mut R,
    out: &mut W,
) -> std::io::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: Write,
{
    writeln!(out, "Agent: {} ({})", agent.name(), agent.identity())?;
    writeln!(out, "Thread: {}", session.thread_id)?;
    writeln!(out, "Resource: {}", session.resource_id)?;
    writeln!(out, "Type 'exit' or 'quit' to leave.")?;

    loop {
        let Some(line) = prompt_line(input, out, "> ").await? else {
            break;
        };
        let message = line.trim();
        if message.is_empty() {
            continue;
        }
        if message.eq_ignore_ascii_case("exit") || message.eq_ignore_ascii_case("quit") {
            break;
        }

        let request = InvocationRequest::for_agent(agent, message, session.clone());
        let outcome = match invoker.invoke(request, CancellationToken::new()).await {
            Ok(rx) => relay_to_writer(Relay::new(rx), out).await?,
            Err(e) => Err(e),
        };
        match outcome {
            Ok(()) => writeln!(out)?,
            Err(e) => {
                error!(
                    agent_id = %agent.identity(),
                    thread_id = %session.thread_id,
                    resource_id = %session.resource_id,
                    error = %e,
                    "Agent invocation failed"
                );
                writeln!(out)?;
                writeln!(out, "{APOLOGY_MESSAGE}")?;
            }
        }
    }
    Ok(())
}

/// Write fragments as they arrive. The outer result carries output errors,
/// the inner one the turn's outcome.
async fn relay_to_writer<W: Write>(
    mut relay: Relay,
    out: &mut W,
) -> std::io::Result<Result<(), AgentError>> {
    while let Some(item) = relay.next().await {
        match item {
            RelayItem::Fragment(text) => {
                write!(out, "{text}")?;
                out.flush()?;
            }
            RelayItem::Done => return Ok(Ok(())),
            RelayItem::Failed(e) => return Ok(Err(e)),
        }
    }
    Ok(Ok(()))
}

async fn prompt_line<R, W>(
    input: &mut R,
    out: &mut W,
    label: &str,
) -> std::io::Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
    W: Write,
{
    write!(out, "{label}")?;
    out.flush()?;
    let mut line = String::new();
    if input.read_line(&mut line).await? == 0 {
        return Ok(None);
    }
    Ok(Some(line.trim_end_matches(['\r', '\n']).to_string()))
}

/// Run the `status` subcommand -- connect to a running instance's health endpoint.
pub async fn handle_status(
    cfg: &AppConfig,
    host: Option<String>,
    port: Option<u16>,
) -> Result<(), Box<dyn std::error::Error>> {
    let host = host.unwrap_or_else(|| cfg.server.host.clone());
    let port = port.unwrap_or(cfg.server.port);
    let url = format!("http://{}:{}/health", host, port);

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(5))
        .build()?;

    let response = client.get(&url).send().await.map_err(|e| {
        format!("could not connect to persona at {host}:{port}: {e} (start it with: persona serve)")
    })?;
    if !response.status().is_success() {
        return Err(format!("health endpoint returned HTTP {}", response.status()).into());
    }

    let body: Value = response.json().await?;
    println!("Persona server status");
    println!("=====================");
    if let Some(version) = body.get("version").and_then(|v| v.as_str()) {
        println!("  Version:  {}", version);
    }
    println!("  Address:  {}:{}", host, port);
    if let Some(status) = body.get("status").and_then(|v| v.as_str()) {
        println!("  Status:   {}", status);
    }
    if let Some(agents) = body.get("agents").and_then(|v| v.as_u64()) {
        println!("  Agents:   {}", agents);
    }
    Ok(())
}

/// Run the `config show` subcommand.
pub fn handle_config_show(cfg: &AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let redacted = redact_secrets(serde_json::to_value(cfg)?);
    println!("{}", serde_json::to_string_pretty(&redacted)?);
    Ok(())
}

/// Run the `config path` subcommand.
pub fn handle_config_path() {
    println!("{}", config::get_config_path().display());
}

/// Run the `version` subcommand.
pub fn handle_version() {
    println!("persona {}", env!("CARGO_PKG_VERSION"));
    println!("  Build date: {}", env!("PERSONA_BUILD_DATE"));
    println!("  Git commit: {}", env!("PERSONA_GIT_HASH"));
    println!(
        "  Platform:   {} ({})",
        std::env::consts::OS,
        std::env::consts::ARCH
    );
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Redact known secret keys in a JSON value (recursive).
fn redact_secrets(mut value: Value) -> Value {
    match &mut value {
        Value::Object(map) => {
            for (key, child) in map.iter_mut() {
                let lower = key.to_lowercase();
                if SECRET_KEYS.iter().any(|s| lower.contains(s)) {
                    *child = Value::String("[REDACTED]".to_string());
                } else {
                    *child = redact_secrets(child.take());
                }
            }
        }
        Value::Array(arr) => {
            for item in arr.iter_mut() {
                *item = redact_secrets(item.take());
            }
        }
        _ => {}
    }
    value
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
