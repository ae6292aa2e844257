//! Configuration loading, validation, and management for ThinkChain.
//!
//! Loads configuration from `~/.thinkchain/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// The root configuration structure.
///
/// Maps directly to `~/.thinkchain/config.toml`.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Default endpoint used by `thinkchain ask`
    #[serde(default)]
    pub endpoint: EndpointConfig,

    /// Reasoning chain limits and policies
    #[serde(default)]
    pub chain: ChainConfig,

    /// Gateway configuration
    #[serde(default)]
    pub gateway: GatewayConfig,
}

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("endpoint", &self.endpoint)
            .field("chain", &self.chain)
            .field("gateway", &self.gateway)
            .finish()
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default = "default_model")]
    pub model: String,
}

fn default_base_url() -> String {
    "https://api.openai.com".into()
}
fn default_model() -> String {
    "gpt-4".into()
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: default_base_url(),
            model: default_model(),
        }
    }
}

impl std::fmt::Debug for EndpointConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EndpointConfig")
            .field("api_key", &redact(&self.api_key))
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .finish()
    }
}

/// How many steps a session may take.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChainMode {
    /// The full step budget (`max_steps`)
    #[default]
    Full,
    /// The reduced step budget (`constrained_max_steps`)
    Constrained,
}

/// Whether a response yields only its first step or every step it contains.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParseMode {
    #[default]
    FirstMatch,
    AllMatches,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainConfig {
    #[serde(default = "default_max_steps")]
    pub max_steps: u32,

    #[serde(default = "default_constrained_max_steps")]
    pub constrained_max_steps: u32,

    /// Token budget for each reasoning step
    #[serde(default = "default_step_max_tokens")]
    pub step_max_tokens: u32,

    /// Token budget for the concluding answer
    #[serde(default = "default_final_max_tokens")]
    pub final_max_tokens: u32,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Wall-clock budget of a single attempt
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Fixed delay between attempts
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    /// Consecutive unparseable steps that end the session
    #[serde(default = "default_parse_failure_limit")]
    pub parse_failure_limit: u32,

    #[serde(default)]
    pub parse_mode: ParseMode,

    /// Request streamed completions and reassemble them
    #[serde(default)]
    pub stream: bool,

    /// Seed the conversation with an assistant acknowledgment
    #[serde(default = "default_true")]
    pub prime_assistant: bool,

    /// Send only the most recent N turns (after the seed messages)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub history_window: Option<usize>,

    /// Replace the built-in system prompt
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt_override: Option<String>,
}

fn default_max_steps() -> u32 {
    25
}
fn default_constrained_max_steps() -> u32 {
    10
}
fn default_step_max_tokens() -> u32 {
    300
}
fn default_final_max_tokens() -> u32 {
    200
}
fn default_temperature() -> f32 {
    0.2
}
fn default_timeout_secs() -> u64 {
    55
}
fn default_max_attempts() -> u32 {
    3
}
fn default_retry_backoff_ms() -> u64 {
    1000
}
fn default_parse_failure_limit() -> u32 {
    3
}
fn default_true() -> bool {
    true
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
            constrained_max_steps: default_constrained_max_steps(),
            step_max_tokens: default_step_max_tokens(),
            final_max_tokens: default_final_max_tokens(),
            temperature: default_temperature(),
            timeout_secs: default_timeout_secs(),
            max_attempts: default_max_attempts(),
            retry_backoff_ms: default_retry_backoff_ms(),
            parse_failure_limit: default_parse_failure_limit(),
            parse_mode: ParseMode::default(),
            stream: false,
            prime_assistant: true,
            history_window: None,
            system_prompt_override: None,
        }
    }
}

impl ChainConfig {
    /// The step budget for a session in the given mode.
    pub fn max_steps_for(&self, mode: ChainMode) -> u32 {
        match mode {
            ChainMode::Full => self.max_steps,
            ChainMode::Constrained => self.constrained_max_steps,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_host")]
    pub host: String,

    /// Origins allowed by CORS. Empty = same-origin only.
    #[serde(default)]
    pub allowed_origins: Vec<String>,
}

fn default_port() -> u16 {
    3000
}
fn default_host() -> String {
    "127.0.0.1".into()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
            allowed_origins: vec![],
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.thinkchain/config.toml).
    ///
    /// Environment variables override the file:
    /// - `THINKCHAIN_API_KEY` (highest priority), then `OPENAI_API_KEY`
    /// - `THINKCHAIN_BASE_URL`
    /// - `THINKCHAIN_MODEL`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(key) = lookup("THINKCHAIN_API_KEY").or_else(|| lookup("OPENAI_API_KEY")) {
            self.endpoint.api_key = Some(key);
        }
        if let Some(base_url) = lookup("THINKCHAIN_BASE_URL") {
            self.endpoint.base_url = base_url;
        }
        if let Some(model) = lookup("THINKCHAIN_MODEL") {
            self.endpoint.model = model;
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".thinkchain")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let chain = &self.chain;
        if chain.temperature < 0.0 || chain.temperature > 2.0 {
            return Err(ConfigError::ValidationError(
                "chain.temperature must be between 0.0 and 2.0".into(),
            ));
        }
        if chain.max_steps == 0 || chain.constrained_max_steps == 0 {
            return Err(ConfigError::ValidationError(
                "chain.max_steps and chain.constrained_max_steps must be >= 1".into(),
            ));
        }
        if chain.max_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "chain.max_attempts must be >= 1".into(),
            ));
        }
        if chain.parse_failure_limit == 0 {
            return Err(ConfigError::ValidationError(
                "chain.parse_failure_limit must be >= 1".into(),
            ));
        }
        if chain.timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "chain.timeout_secs must be >= 1".into(),
            ));
        }
        Ok(())
    }

    /// Check if an API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.endpoint.api_key.as_deref().is_some_and(|k| !k.trim().is_empty())
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
