//! `thinkchain config` — Configuration management commands.

use thinkchain_config::AppConfig;

pub fn show() -> Result<(), Box<dyn std::error::Error>> {
    let mut config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    if config.endpoint.api_key.is_some() {
        config.endpoint.api_key = Some("[REDACTED]".into());
    }
    println!("{}", toml::to_string_pretty(&config)?);
    Ok(())
}

pub fn defaults() {
    println!("{}", AppConfig::default_toml());
}

pub fn path() {
    println!("{}", AppConfig::config_dir().join("config.toml").display());
}

pub fn validate() -> Result<(), Box<dyn std::error::Error>> {
    println!("Validating configuration...");

    let config = match AppConfig::load() {
        Ok(config) => config,
        Err(e) => {
            println!("   Config error: {e}");
            return Err(e.into());
        }
    };
    println!("   Config parsed successfully");

    let warnings = warnings(&config);
    if warnings.is_empty() {
        println!("   All checks passed");
    } else {
        println!();
        for w in &warnings {
            println!("   warning: {w}");
        }
    }

    println!();
    println!("   Endpoint:  {}", config.endpoint.base_url);
    println!("   Model:     {}", config.endpoint.model);
    println!(
        "   Steps:     {} (full) / {} (constrained)",
        config.chain.max_steps, config.chain.constrained_max_steps
    );
    println!("   Gateway:   {}:{}", config.gateway.host, config.gateway.port);

    Ok(())
}

/// Non-fatal findings; hard errors are rejected by `AppConfig::validate`.
fn warnings(config: &AppConfig) -> Vec<&'static str> {
    let mut warnings = Vec::new();

    if !config.has_api_key() {
        warnings.push("No API key set (set THINKCHAIN_API_KEY or OPENAI_API_KEY)");
    }
    if !config.endpoint.base_url.starts_with("http://")
        && !config.endpoint.base_url.starts_with("https://")
    {
        warnings.push("Endpoint base_url is not an http(s) URL");
    }
    if config.gateway.host == "0.0.0.0" && config.gateway.allowed_origins.is_empty() {
        warnings.push("Gateway bound to 0.0.0.0 with no allowed_origins for browsers");
    }
    if config.chain.constrained_max_steps > config.chain.max_steps {
        warnings.push("constrained_max_steps exceeds max_steps");
    }

    warnings
}
