//! `via` -- CLI binary for the openvia agent gateway.
//!
//! Subcommands:
//!
//! - `via gateway` -- start the configured chat channel and serve turns.
//! - `via chat <message>` -- run a single turn from the terminal.
//! - `via config show` -- print the resolved configuration.
//!
//! Configuration precedence: CLI args > `OPENVIA_*` environment variables
//! > config file (`~/.openvia/config.json` or `--config`) > defaults.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

mod chat;
mod config_loader;
mod gateway;

use config_loader::Overrides;

/// openvia agent gateway CLI.
#[derive(Parser)]
#[command(name = "via", about = "openvia agent gateway", version)]
struct Cli {
    /// Enable verbose (debug-level) logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file path (overrides auto-discovery).
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level subcommands.
#[derive(Subcommand)]
enum Commands {
    /// Start the gateway (chat channel + agent loop).
    Gateway(GatewayArgs),

    /// Run a single agent turn from the terminal.
    Chat(ChatArgs),

    /// Show resolved configuration.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// LLM settings shared by `gateway` and `chat`.
#[derive(Args, Clone, Default)]
struct LlmArgs {
    /// Model identifier (e.g. gpt-4o, gemini-2.5-flash).
    #[arg(long)]
    model: Option<String>,

    /// Provider API key.
    #[arg(long)]
    api_key: Option<String>,

    /// Provider base URL.
    #[arg(long)]
    base_url: Option<String>,

    /// Wire protocol: openai, claude, or gemini.
    #[arg(long)]
    format: Option<String>,

    /// Maximum LLM rounds per turn.
    #[arg(long)]
    max_iterations: Option<u32>,

    /// System prompt override.
    #[arg(long)]
    system_prompt: Option<String>,
}

#[derive(Args)]
struct GatewayArgs {
    /// Which channel adapter to start (telegram or feishu).
    #[arg(long)]
    adapter: Option<String>,

    #[command(flatten)]
    llm: LlmArgs,
}

#[derive(Args)]
struct ChatArgs {
    /// The message to send.
    message: String,

    #[command(flatten)]
    llm: LlmArgs,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the resolved configuration as JSON (api key redacted).
    Show,
}

impl LlmArgs {
    fn into_overrides(self, adapter: Option<String>) -> Overrides {
        Overrides {
            model: self.model,
            api_key: self.api_key,
            base_url: self.base_url,
            format: self.format,
            max_iterations: self.max_iterations,
            system_prompt: self.system_prompt,
            adapter,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .init();

    match cli.command {
        Commands::Gateway(args) => {
            let overrides = args.llm.into_overrides(args.adapter);
            let config = config_loader::load(cli.config.as_deref(), &overrides)?;
            gateway::run(config).await?;
        }
        Commands::Chat(args) => {
            let overrides = args.llm.clone().into_overrides(None);
            let config = config_loader::load(cli.config.as_deref(), &overrides)?;
            chat::run(config, args.message).await?;
        }
        Commands::Config { action } => match action {
            ConfigAction::Show => {
                let config =
                    config_loader::load(cli.config.as_deref(), &Overrides::default())?;
                let mut value = serde_json::to_value(&config)?;
                if let Some(key) = value.pointer_mut("/llm/api_key") {
                    if key.as_str().is_some_and(|k| !k.is_empty()) {
                        *key = serde_json::Value::String("***".into());
                    }
                }
                println!("{}", serde_json::to_string_pretty(&value)?);
            }
        },
    }

    Ok(())
}
