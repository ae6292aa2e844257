//! `thinkchain ask` — Run one reasoning chain in the terminal.

use std::sync::Arc;
use thinkchain_agent::{ChainEvent, ChainRequest, StepOrchestrator};
use thinkchain_config::{AppConfig, ChainMode};
use thinkchain_providers::OpenAiCompatConnector;
use tracing::debug;

pub struct AskOptions {
    pub query: String,
    pub model: Option<String>,
    pub base_url: Option<String>,
    pub mode: ChainMode,
    pub json: bool,
}

pub async fn run(options: AskOptions) -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;

    let Some(api_key) = config.endpoint.api_key.clone() else {
        eprintln!();
        eprintln!("  ERROR: No API key configured!");
        eprintln!();
        eprintln!("  Set one of these environment variables:");
        eprintln!("    THINKCHAIN_API_KEY = 'sk-...'");
        eprintln!("    OPENAI_API_KEY     = 'sk-...'");
        eprintln!();
        eprintln!("  Or add it to your config file:");
        eprintln!("    {}", AppConfig::config_dir().join("config.toml").display());
        eprintln!();
        return Err("No API key found. See above for setup instructions.".into());
    };

    let request = ChainRequest {
        query: options.query,
        api_key,
        model: options.model.unwrap_or_else(|| config.endpoint.model.clone()),
        base_url: options
            .base_url
            .unwrap_or_else(|| config.endpoint.base_url.clone()),
        mode: options.mode,
    };

    debug!(
        model = %request.model,
        base_url = %request.base_url,
        mode = ?request.mode,
        "Starting chain"
    );

    let orchestrator = Arc::new(StepOrchestrator::new(
        Arc::new(OpenAiCompatConnector),
        config.chain.clone(),
    ));

    let mut rx = orchestrator.spawn(request);
    let mut failure = None;

    while let Some(event) = rx.recv().await {
        if options.json {
            println!("{}", serde_json::to_string(&event)?);
        } else {
            print!("{}", render(&event));
        }
        if let ChainEvent::Error(e) = &event {
            failure = Some(format!("{}: {}", e.error, e.message));
        }
    }

    match failure {
        Some(message) => Err(message.into()),
        None => Ok(()),
    }
}

/// Human-readable rendering of one chain event.
fn render(event: &ChainEvent) -> String {
    match event {
        ChainEvent::Step(e) => format!(
            "Step {}: {}\n{}\n  ({:.2}s)\n\n",
            e.step, e.record.title, e.record.content, e.thinking_time
        ),
        ChainEvent::FinalAnswer(e) => format!(
            "{}: {}\n{}\n  ({:.2}s)\n\n",
            e.step, e.record.title, e.record.content, e.thinking_time
        ),
        ChainEvent::Error(e) => format!("Error: {}: {}\n", e.error, e.message),
        ChainEvent::Done(e) => format!(
            "Done: {} steps, {:.2}s total thinking time ({})\n",
            e.steps, e.total_thinking_time, e.reason
        ),
    }
}
