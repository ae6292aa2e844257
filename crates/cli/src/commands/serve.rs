//! `thinkchain serve` — Start the SSE gateway.

use thinkchain_config::AppConfig;

pub async fn run(
    port_override: Option<u16>,
    host_override: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;

    if let Some(port) = port_override {
        config.gateway.port = port;
    }
    if let Some(host) = host_override {
        config.gateway.host = host;
    }

    println!("ThinkChain Gateway");
    println!("   Listening: {}:{}", config.gateway.host, config.gateway.port);
    println!("   Endpoint:  POST|GET /api/generate");
    println!(
        "   Steps:     {} (full) / {} (constrained)",
        config.chain.max_steps, config.chain.constrained_max_steps
    );

    thinkchain_gateway::start(config).await?;

    Ok(())
}
