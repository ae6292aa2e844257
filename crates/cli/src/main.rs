//! ThinkChain CLI — the main entry point.
//!
//! Commands:
//! - `ask`     Run one reasoning chain and print the steps as they arrive
//! - `serve`   Start the SSE gateway
//! - `config`  Inspect configuration

use clap::{Parser, Subcommand, ValueEnum};
use thinkchain_config::ChainMode;

mod commands;

#[derive(Parser)]
#[command(
    name = "thinkchain",
    about = "ThinkChain: step-by-step reasoning over OpenAI-compatible endpoints",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Ask a question and watch the reasoning chain
    Ask {
        /// The question to reason about
        query: String,

        /// Override the model
        #[arg(short, long)]
        model: Option<String>,

        /// Override the endpoint base URL
        #[arg(long)]
        base_url: Option<String>,

        /// Step budget profile
        #[arg(long, value_enum, default_value_t = ModeArg::Full)]
        mode: ModeArg,

        /// Print each event as a JSON line
        #[arg(long)]
        json: bool,
    },

    /// Start the HTTP gateway server
    Serve {
        /// Override the port
        #[arg(short, long)]
        port: Option<u16>,

        /// Override the bind address
        #[arg(long)]
        host: Option<String>,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration (API key redacted)
    Show,
    /// Print the built-in defaults as TOML
    Default,
    /// Print the config file path
    Path,
    /// Load and validate the config file
    Validate,
}

#[derive(Clone, Copy, ValueEnum)]
enum ModeArg {
    Full,
    Constrained,
}

impl From<ModeArg> for ChainMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Full => ChainMode::Full,
            ModeArg::Constrained => ChainMode::Constrained,
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Logs go to stderr so `ask --json` output stays clean
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Ask {
            query,
            model,
            base_url,
            mode,
            json,
        } => {
            let options = commands::ask::AskOptions {
                query,
                model,
                base_url,
                mode: mode.into(),
                json,
            };
            commands::ask::run(options).await?
        }
        Commands::Serve { port, host } => commands::serve::run(port, host).await?,
        Commands::Config { action } => match action {
            ConfigAction::Show => commands::config_cmd::show()?,
            ConfigAction::Default => commands::config_cmd::defaults(),
            ConfigAction::Path => commands::config_cmd::path(),
            ConfigAction::Validate => commands::config_cmd::validate()?,
        },
    }

    Ok(())
}
