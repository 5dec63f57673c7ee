use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;

use clap::{CommandFactory, Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use stepwise_agent::{Agent, RunLogger};
use stepwise_core::config::{AppConfig, ModelConfig};
use stepwise_core::event::EventBus;
use stepwise_tools::ToolRegistry;

#[derive(Parser)]
#[command(name = "stepwise", version, about = "Step graph runtime with a tool-using agent loop")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "stepwise.toml")]
    config: PathBuf,

    /// Session ID (config default if not provided)
    #[arg(short, long)]
    session: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start interactive REPL mode
    Repl,
    /// Run a single prompt and exit
    Run {
        /// The prompt to send to the agent
        #[arg(trailing_var_arg = true)]
        prompt: Vec<String>,
    },
    /// Show current configuration
    Config,
    /// Start the HTTP gateway server
    Serve,
    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("stepwise=info,warn")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();

    // Handle completions before config loading
    if let Some(Commands::Completions { shell }) = &cli.command {
        let mut cmd = Cli::command();
        clap_complete::generate(*shell, &mut cmd, "stepwise", &mut std::io::stdout());
        return Ok(());
    }

    let config = load_config(&cli.config)?;

    if let Some(Commands::Config) = &cli.command {
        println!("{}", toml::to_string_pretty(&config)?);
        return Ok(());
    }

    // Set up components
    let event_bus = Arc::new(EventBus::default());
    let tools = Arc::new(ToolRegistry::with_builtins());
    let llm = stepwise_llm::client_for(&config);
    let agent = Arc::new(Agent::new(config.clone(), llm, tools, event_bus.clone())?);

    let session_id = cli
        .session
        .clone()
        .unwrap_or_else(|| config.agent.default_session.clone());

    // JSONL run log
    let log_cancel = CancellationToken::new();
    let log_handle = match config.log.as_ref().filter(|l| l.enabled) {
        Some(log) => {
            let logger = RunLogger::new(log.dir(), &event_bus);
            Some(tokio::spawn(logger.run(log_cancel.clone())))
        }
        None => None,
    };

    let result = match cli.command {
        Some(Commands::Run { prompt }) => {
            let text = prompt.join(" ");
            let input = if text.is_empty() {
                // Read from stdin
                io::stdin()
                    .lock()
                    .lines()
                    .map_while(|l| l.ok())
                    .collect::<Vec<_>>()
                    .join("\n")
            } else {
                text
            };
            run_once(&agent, &session_id, &input).await
        }
        Some(Commands::Serve) => {
            let gateway_config = config.gateway.clone().unwrap_or_default();
            info!(bind = %gateway_config.bind, "Starting HTTP gateway");
            let server = stepwise_gateway::GatewayServer::new(gateway_config, agent.clone());
            let cancel = CancellationToken::new();
            let cancel_clone = cancel.clone();
            let agent_cancel = agent.cancel_token();

            // Graceful shutdown on Ctrl-C
            tokio::spawn(async move {
                tokio::signal::ctrl_c().await.ok();
                info!("Shutting down gateway...");
                agent_cancel.cancel();
                cancel_clone.cancel();
            });

            server.run(cancel).await
        }
        Some(Commands::Repl) | None => run_repl(&agent, session_id).await,
        Some(Commands::Config) | Some(Commands::Completions { .. }) => Ok(()),
    };

    log_cancel.cancel();
    if let Some(handle) = log_handle {
        if let Ok(Some(path)) = handle.await {
            info!(path = %path.display(), "Run log written");
        }
    }

    result
}

fn load_config(path: &PathBuf) -> anyhow::Result<AppConfig> {
    if path.exists() {
        return Ok(AppConfig::load(path)?);
    }

    // Check for config in the home directory
    if let Some(home_config) = dirs_home().map(|h| h.join(".stepwise").join("config.toml")) {
        if home_config.exists() {
            info!(path = %home_config.display(), "Loading config from home directory");
            return Ok(AppConfig::load(&home_config)?);
        }
    }

    eprintln!("Warning: No config file found. Set OPENAI_API_KEY or create stepwise.toml");
    create_env_config()
}

/// Minimal config from environment variables.
fn create_env_config() -> anyhow::Result<AppConfig> {
    let model_id = std::env::var("STEPWISE_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string());
    let mut config = AppConfig::from_toml(&format!("[model]\nmodel_id = {:?}\n", model_id))?;
    config.model = ModelConfig {
        api_key: std::env::var("OPENAI_API_KEY").ok(),
        base_url: std::env::var("OPENAI_BASE_URL").ok(),
        ..config.model
    };
    Ok(config)
}

async fn run_once(agent: &Agent, session_id: &str, input: &str) -> anyhow::Result<()> {
    if input.trim().is_empty() {
        anyhow::bail!("empty prompt");
    }

    match agent.invoke(input, Some(session_id)).await {
        Ok(run) => {
            if let Some(state) = run.final_state() {
                println!("{}", state.reply());
                eprintln!(
                    "\n[{} steps, {} tokens, session {}]",
                    run.steps(),
                    state.total_tokens,
                    session_id
                );
            }
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "Run failed");
            Err(e.into())
        }
    }
}

async fn run_repl(agent: &Agent, mut session_id: String) -> anyhow::Result<()> {
    println!("Stepwise v{}", env!("CARGO_PKG_VERSION"));
    println!("Session: {}", session_id);
    println!("Type /help for commands, /quit to exit.\n");

    let stdin = io::stdin();
    let mut stdout = io::stdout();
    let mut total_tokens: u64 = 0;

    loop {
        print!("> ");
        stdout.flush()?;

        let mut input = String::new();
        if stdin.lock().read_line(&mut input)? == 0 {
            break; // EOF
        }

        let input = input.trim();
        if input.is_empty() {
            continue;
        }

        let parts: Vec<&str> = input.split_whitespace().collect();

        match parts[0] {
            "/quit" | "/exit" | "/q" => {
                println!("Goodbye!");
                break;
            }
            "/help" => {
                println!("/runs            List runs in this session");
                println!("/reset           Forget this session's history");
                println!("/usage           Token usage");
                println!("/session [id]    Show or switch the session");
                println!("/quit            Exit");
                continue;
            }
            "/session" => {
                if let Some(next) = parts.get(1) {
                    session_id = next.to_string();
                    println!("Switched to session: {}", session_id);
                } else {
                    println!("Session ID: {}", session_id);
                }
                continue;
            }
            "/runs" => {
                let runs = agent.session_runs(&session_id);
                if runs.is_empty() {
                    println!("No runs in session {}", session_id);
                }
                for (i, run) in runs.iter().enumerate() {
                    let (query, tokens) = run
                        .final_state()
                        .map(|s| (s.user_query.as_str(), s.total_tokens))
                        .unwrap_or(("", 0));
                    println!(
                        "{:>3}. {} {} steps, {} tokens: {}",
                        i + 1,
                        &run.run_id()[..8.min(run.run_id().len())],
                        run.steps(),
                        tokens,
                        truncate(query, 60)
                    );
                }
                continue;
            }
            "/reset" => {
                agent.reset_session(&session_id);
                println!("Session {} reset.", session_id);
                continue;
            }
            "/usage" => {
                let last = agent
                    .last_run(&session_id)
                    .and_then(|r| r.final_state().map(|s| s.total_tokens))
                    .unwrap_or(0);
                println!("Last run: {} tokens", last);
                println!("This REPL: {} tokens", total_tokens);
                continue;
            }
            cmd if cmd.starts_with('/') => {
                println!("Unknown command: {} (try /help)", cmd);
                continue;
            }
            _ => {}
        }

        match agent.invoke(input, Some(&session_id)).await {
            Ok(run) => {
                if let Some(state) = run.final_state() {
                    total_tokens += state.total_tokens;
                    println!("{}\n", state.reply());
                }
            }
            Err(e) => {
                eprintln!("Error: {}\n", e);
            }
        }
    }

    Ok(())
}

fn dirs_home() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(PathBuf::from)
}

fn truncate(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
