//! Chatloop CLI - chat with a local model that can call MCP tools
//!
//! Tools come from the MCP servers listed in the config file and, optionally,
//! from the built-in calculation tools. `chatloop serve` exposes those
//! built-in tools as an MCP server over stdio.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use console::style;
use tokio::sync::Notify;
use tracing::info;

use chatloop_core::config::{Config, ConfigManager};
use chatloop_core::mcp_manager::McpServerManager;
use chatloop_core::orchestrator::ToolCallOrchestrator;
use chatloop_core::provider::{ModelClient, OllamaClient};
use chatloop_core::session::{Session, SessionDriver};
use chatloop_core::tools::builtin::register_builtin_tools;
use chatloop_core::tools::mcp::{register_mcp_tools, RegistryHandler};
use chatloop_core::tools::ToolRegistry;
use chatloop_core::{CancellationToken, Error};
use chatloop_mcp::{McpServer, StdioServerTransport};

#[derive(Parser)]
#[command(name = "chatloop")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Chat with a local model that can call MCP tools", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Config file (defaults to the user config directory)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Model to use (overrides the config file)
    #[arg(short, long)]
    model: Option<String>,

    /// Maximum consecutive tool-call rounds per query
    #[arg(long)]
    max_rounds: Option<usize>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Answer a single query and exit (non-interactive mode)
    #[arg(long)]
    one_shot: Option<String>,

    /// Write the transcript as JSON when the session ends
    #[arg(long)]
    save_transcript: Option<PathBuf>,

    /// Register the built-in calculation tools locally
    #[arg(long)]
    builtin_tools: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Interactive chat mode
    Chat,

    /// Show available tools
    Tools,

    /// Show configuration
    Config,

    /// Serve the built-in tools as an MCP server over stdio
    Serve,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // stdout carries MCP traffic in `serve` mode, so logs go to stderr
    tracing_subscriber::fmt()
        .with_env_filter(if cli.verbose {
            "info,chatloop_core=debug,chatloop_mcp=debug"
        } else {
            "warn"
        })
        .with_writer(std::io::stderr)
        .init();

    let mut config_manager = match &cli.config {
        Some(path) => ConfigManager::with_path(path.clone())?,
        None => ConfigManager::new()?,
    };
    apply_overrides(config_manager.config_mut(), &cli);

    match cli.command {
        Some(Commands::Serve) => return run_serve().await,
        Some(Commands::Config) => {
            show_config(&config_manager)?;
            return Ok(());
        }
        Some(Commands::Tools) => return show_tools(config_manager.config(), cli.verbose).await,
        Some(Commands::Chat) | None => {}
    }

    let config = config_manager.config().clone();
    if let Some(query) = cli.one_shot.as_deref() {
        run_one_shot(&config, query, cli.save_transcript.as_deref()).await
    } else {
        run_interactive(&config, cli.save_transcript.as_deref()).await
    }
}

/// Command-line flags win over the config file
fn apply_overrides(config: &mut Config, cli: &Cli) {
    if let Some(model) = &cli.model {
        config.model.model = model.clone();
    }
    if let Some(max_rounds) = cli.max_rounds {
        config.orchestrator.max_rounds = max_rounds;
    }
    if cli.builtin_tools {
        config.builtin_tools = true;
    }
}

fn create_model_client(config: &Config) -> anyhow::Result<Arc<dyn ModelClient>> {
    match config.model.provider.as_str() {
        "ollama" => Ok(Arc::new(OllamaClient::from_config(&config.model))),
        other => anyhow::bail!("Unsupported model provider '{}'", other),
    }
}

/// Connect MCP servers and collect every tool into one registry
async fn build_registry(config: &Config) -> anyhow::Result<(Arc<ToolRegistry>, Arc<McpServerManager>)> {
    let manager = Arc::new(McpServerManager::new());
    for (name, error) in manager.connect_all(config).await {
        eprintln!(
            "{}",
            style(format!("Warning: MCP server '{}' unavailable: {}", name, error)).yellow()
        );
    }

    let mut registry = ToolRegistry::new();
    if config.builtin_tools {
        register_builtin_tools(&mut registry)?;
    }
    let remote = register_mcp_tools(&mut registry, &manager)?;
    info!(tools = registry.len(), remote, "Tool registry ready");

    Ok((Arc::new(registry), manager))
}

async fn create_session(config: &Config) -> anyhow::Result<(Session, Arc<McpServerManager>)> {
    let model = create_model_client(config)?;
    let (registry, manager) = build_registry(config).await?;
    let orchestrator = ToolCallOrchestrator::new(model, registry, config.orchestrator.to_orchestrator_config());
    Ok((Session::new(Arc::new(orchestrator)), manager))
}

fn save_transcript(session: &Session, path: Option<&Path>) {
    if let Some(path) = path {
        match session.save_transcript(path) {
            Ok(()) => eprintln!("{}", style(format!("Transcript saved to {}", path.display())).dim()),
            Err(e) => eprintln!("{}", style(format!("Failed to save transcript: {}", e)).red()),
        }
    }
}

async fn run_interactive(config: &Config, transcript_path: Option<&Path>) -> anyhow::Result<()> {
    let (session, manager) = create_session(config).await?;

    println!(
        "{} {}",
        style("Chatloop").bold().cyan(),
        style(format!("({} via {})", config.model.model, config.model.provider)).dim()
    );
    println!(
        "{}",
        style("Type your queries or 'quit' to exit. Ctrl-C cancels a running query.").dim()
    );
    println!();

    let interrupt = Arc::new(Notify::new());
    let notifier = interrupt.clone();
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            notifier.notify_waiters();
        }
    });

    let mut driver = SessionDriver::new(session).with_interrupt(interrupt);
    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    let result = driver.run(stdin, tokio::io::stdout()).await;

    let session = driver.into_session();
    save_transcript(&session, transcript_path);
    manager.shutdown().await;

    let stats = result?;
    println!(
        "{}",
        style(format!(
            "Goodbye! ({} answered, {} failed, {} cancelled)",
            stats.answered, stats.failed, stats.cancelled
        ))
        .dim()
    );
    Ok(())
}

async fn run_one_shot(config: &Config, query: &str, transcript_path: Option<&Path>) -> anyhow::Result<()> {
    let (mut session, manager) = create_session(config).await?;

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            interrupt.cancel();
        }
    });

    let result = session.ask_with_cancel(query, cancel).await;

    save_transcript(&session, transcript_path);
    manager.shutdown().await;

    match result {
        Ok(answer) => {
            println!("{}", answer);
            Ok(())
        }
        Err(Error::Cancelled) => {
            eprintln!("{}", style("Cancelled").yellow());
            Ok(())
        }
        Err(e) if e.is_model_failure() => Err(anyhow::anyhow!(
            "{} (is the model server running at {}?)",
            e,
            config.model.effective_base_url()
        )),
        Err(e) => Err(e.into()),
    }
}

async fn run_serve() -> anyhow::Result<()> {
    let mut registry = ToolRegistry::new();
    register_builtin_tools(&mut registry)?;

    let server = McpServer::new(Arc::new(RegistryHandler::new(Arc::new(registry))))
        .with_name("chatloop-calculation");
    info!(server = %server.name(), "Serving built-in tools over stdio");

    let mut transport = StdioServerTransport::new();
    server.serve(&mut transport).await?;
    Ok(())
}

async fn show_tools(config: &Config, verbose: bool) -> anyhow::Result<()> {
    let (registry, manager) = build_registry(config).await?;

    println!("{}", style("Available Tools:").bold());
    println!();

    let schemas = registry.schemas();
    if schemas.is_empty() {
        println!("  {}", style("No tools registered").dim());
        println!();
        println!("  Add MCP servers to the config file or pass --builtin-tools.");
    }
    for schema in schemas {
        println!("  {} - {}", style(&schema.name).cyan(), schema.description);
        if verbose {
            let parameters = serde_json::to_string_pretty(&schema.parameters)?;
            for line in parameters.lines() {
                println!("      {}", style(line).dim());
            }
        }
    }

    manager.shutdown().await;
    Ok(())
}

fn show_config(config_manager: &ConfigManager) -> anyhow::Result<()> {
    let config = config_manager.config();
    println!("{}", style("Configuration:").bold());
    println!();
    println!("  Config file: {}", style(config_manager.path().display()).dim());
    println!("  Model: {}", style(&config.model.model).green());
    println!("  Endpoint: {}", style(config.model.effective_base_url()).green());
    println!();
    println!("{}", config_manager.to_toml()?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses() {
        let cli = Cli::parse_from(["chatloop", "--max-rounds", "3", "--builtin-tools", "tools"]);
        assert_eq!(cli.max_rounds, Some(3));
        assert!(cli.builtin_tools);
        assert!(matches!(cli.command, Some(Commands::Tools)));
    }

    #[test]
    fn test_overrides_win() {
        let cli = Cli::parse_from(["chatloop", "--model", "qwen2.5", "--max-rounds", "2", "--builtin-tools"]);
        let mut config = Config::default();
        apply_overrides(&mut config, &cli);
        assert_eq!(config.model.model, "qwen2.5");
        assert_eq!(config.orchestrator.max_rounds, 2);
        assert!(config.builtin_tools);
    }

    #[test]
    fn test_unknown_provider_rejected() {
        let mut config = Config::default();
        config.model.provider = "carrier-pigeon".into();
        assert!(create_model_client(&config).is_err());
    }
}
