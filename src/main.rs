use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use avi_agent::config::{LogConfig, Provider, ToolAccess};
use avi_agent::llm::{self, ToolOutcome};
use avi_agent::prompts::WELCOME_MESSAGE;
use avi_agent::{AviClient, Config, ModelClient, RuntimeConfig, SessionManager, ToolRegistry, TurnEvent};

/// Session id used by the interactive front end
const CLI_SESSION: &str = "cli";

/// avi-agent - operate an Avi Load Balancer controller in natural language
#[derive(Parser, Debug)]
#[command(name = "avi-agent")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Config file (defaults to ~/.config/avi-agent/config.toml)
    #[arg(short, long, env = "AVI_AGENT_CONFIG")]
    config: Option<PathBuf>,

    /// Model backend: ollama or mistral
    #[arg(long)]
    provider: Option<Provider>,

    /// Model name for the selected backend
    #[arg(short, long)]
    model: Option<String>,

    /// Only offer tools that read controller state
    #[arg(long)]
    read_only: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Interactive session (default)
    Chat,
    /// Ask a single question and exit
    Ask {
        #[arg(required = true, trailing_var_arg = true)]
        text: Vec<String>,
    },
    /// Check controller and model connectivity
    Health,
    /// List models offered by the model endpoint
    Models,
    /// List the tools the model can call
    Tools,
}

fn init_logging(config: &LogConfig) -> Result<()> {
    let log_file = std::fs::File::create(&config.file)
        .with_context(|| format!("Failed to create log file: {}", config.file.display()))?;
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.filter));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(log_file).with_ansi(false))
        .init();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env files (local first, then home directory)
    // Errors are ignored - files are optional
    let _ = dotenvy::from_filename(".env");
    if let Some(home) = dirs::home_dir() {
        let _ = dotenvy::from_path(home.join(".env"));
    }

    let args = Args::parse();

    let mut config = Config::load(args.config.as_deref())?;

    // Apply CLI overrides
    if let Some(provider) = args.provider {
        config.provider = provider;
    }
    if let Some(model) = args.model {
        match config.provider {
            Provider::Ollama => config.ollama.model = model,
            Provider::Mistral => config.mistral.model = model,
        }
    }
    if args.read_only {
        config.orchestrator.tool_access = ToolAccess::ReadOnly;
    }

    init_logging(&config.log)?;
    info!("Starting avi-agent with provider {:?}", config.provider);

    match args.command.unwrap_or(Command::Chat) {
        Command::Tools => {
            list_tools(&config);
            Ok(())
        }
        Command::Models => list_models(&config).await,
        Command::Health => health(&config).await,
        Command::Ask { text } => ask(&config, &text.join(" ")).await,
        Command::Chat => chat(&config).await,
    }
}

fn list_tools(config: &Config) {
    let registry = ToolRegistry::for_access(config.orchestrator.tool_access);
    for tool in registry.list() {
        let marker = if tool.read_only { " " } else { "*" };
        println!("{} {:<28} {}", marker, tool.name, tool.description);
    }
    println!();
    println!("* changes controller state");
}

async fn list_models(config: &Config) -> Result<()> {
    let model = llm::from_config(config)?;
    match model.list_models().await {
        Ok(models) => {
            for name in models {
                let current = if llm::has_model(std::slice::from_ref(&name), model.model()) {
                    " (current)"
                } else {
                    ""
                };
                println!("{}{}", name, current);
            }
            Ok(())
        }
        Err(e) if config.provider == Provider::Ollama => {
            eprintln!("Could not reach Ollama ({}); configured models:", e);
            for name in &config.ollama.models {
                println!("{}", name);
            }
            Ok(())
        }
        Err(e) => Err(e).context("Failed to list models"),
    }
}

async fn health(config: &Config) -> Result<()> {
    config.validate()?;
    let controller = AviClient::new(&config.controller)?;
    let controller_status = match controller.login().await {
        Ok(()) => controller.ping().await.map(|_| "ok".to_string()),
        Err(e) => Err(e),
    };
    controller.logout().await;

    let model = llm::from_config(config)?;
    let model_status = match model.list_models().await {
        Ok(models) if llm::has_model(&models, model.model()) => {
            Ok(format!("ok ({} models available)", models.len()))
        }
        Ok(models) => Err(anyhow::anyhow!(
            "endpoint reachable, but the model is not among its {} models",
            models.len()
        )),
        Err(e) => Err(e.into()),
    };

    let mut healthy = true;
    match controller_status {
        Ok(status) => println!("controller {}: {}", controller.base_url(), status),
        Err(e) => {
            healthy = false;
            println!("controller {}: {}", controller.base_url(), e);
        }
    }
    match model_status {
        Ok(status) => println!("model {}: {}", model.model(), status),
        Err(e) => {
            healthy = false;
            println!("model {}: {}", model.model(), e);
        }
    }

    if healthy {
        Ok(())
    } else {
        anyhow::bail!("health check failed")
    }
}

/// Connect to the controller and build the session manager
async fn connect(
    config: &Config,
) -> Result<(Arc<AviClient>, Arc<SessionManager>, mpsc::UnboundedReceiver<TurnEvent>)> {
    config.validate()?;
    let controller = Arc::new(AviClient::new(&config.controller)?);
    controller
        .login()
        .await
        .with_context(|| format!("Failed to log in to {}", controller.base_url()))?;

    let model: Arc<dyn ModelClient> = llm::from_config(config)?;
    let registry = Arc::new(ToolRegistry::for_access(config.orchestrator.tool_access));
    let (tx, rx) = mpsc::unbounded_channel();
    let manager = SessionManager::new(
        registry,
        controller.clone(),
        model,
        RuntimeConfig::from_config(config),
    )
    .with_events(tx);
    Ok((controller, Arc::new(manager), rx))
}

async fn ask(config: &Config, text: &str) -> Result<()> {
    let (controller, manager, mut events) = connect(config).await?;
    let result = run_turn(&manager, text, &mut events).await;
    manager.shutdown().await;
    controller.logout().await;

    let answer = result?;
    println!("{}", answer);
    Ok(())
}

async fn chat(config: &Config) -> Result<()> {
    let (controller, manager, mut events) = connect(config).await?;
    let reaper = manager.spawn_reaper(Duration::from_secs(60));

    println!("{}", WELCOME_MESSAGE);
    println!("Type `exit` to quit. Ctrl-C aborts the running request.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else { break };
        let line = line.trim();
        match line {
            "" => continue,
            "exit" | "quit" => break,
            _ => {}
        }

        match run_turn(&manager, line, &mut events).await {
            Ok(answer) => println!("\n{}\n", answer),
            Err(e) => eprintln!("\nError: {}\n", e),
        }
    }

    manager.shutdown().await;
    reaper.abort();
    controller.logout().await;
    Ok(())
}

/// Submit one turn, printing progress; Ctrl-C aborts it
async fn run_turn(
    manager: &SessionManager,
    text: &str,
    events: &mut mpsc::UnboundedReceiver<TurnEvent>,
) -> Result<String> {
    let turn = manager.submit(CLI_SESSION, text);
    tokio::pin!(turn);

    let result = loop {
        tokio::select! {
            result = &mut turn => break result,
            Some(event) = events.recv() => print_event(&event),
            _ = tokio::signal::ctrl_c() => {
                manager.abort(CLI_SESSION).await;
            }
        }
    };
    while let Ok(event) = events.try_recv() {
        print_event(&event);
    }

    result.map_err(|e| {
        error!("Turn failed with {} transcript message(s)", e.transcript.len());
        anyhow::Error::new(e)
    })
}

fn print_event(event: &TurnEvent) {
    match event {
        TurnEvent::ToolStarted { name, .. } => eprintln!("  -> {}", name),
        TurnEvent::ToolRetry {
            attempt,
            delay,
            error,
            ..
        } => eprintln!("     retry {} in {:?}: {}", attempt, delay, error),
        TurnEvent::ToolFinished { name, result, .. } => match &result.outcome {
            ToolOutcome::Success { .. } => eprintln!("  ok {}", name),
            ToolOutcome::Error { kind, message } => {
                eprintln!("  !! {} failed ({}): {}", name, kind, message)
            }
        },
        TurnEvent::ModelRetry { attempt, error } => {
            eprintln!("  model retry {}: {}", attempt, error)
        }
        TurnEvent::QueryingModel { .. } | TurnEvent::Finished { .. } | TurnEvent::Failed { .. } => {}
    }
}
