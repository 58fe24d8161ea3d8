//! Layered configuration loading.
//!
//! Precedence, lowest to highest: built-in defaults, config file,
//! `OPENVIA_*` environment variables, CLI argument overrides.

use std::path::Path;

use anyhow::Context;
use tracing::debug;

use openvia_types::config::{Config, LlmFormat};

/// CLI argument overrides (the highest-precedence layer).
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub model: Option<String>,
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub format: Option<String>,
    pub max_iterations: Option<u32>,
    pub system_prompt: Option<String>,
    pub adapter: Option<String>,
}

/// Load configuration with full layering applied.
pub fn load(path: Option<&Path>, overrides: &Overrides) -> anyhow::Result<Config> {
    let mut config = load_file(path)?;
    apply_env(&mut config);
    apply_overrides(&mut config, overrides)?;
    Ok(config)
}

/// Read the config file, or fall back to defaults when the default path
/// does not exist. An explicitly given path must exist.
fn load_file(path: Option<&Path>) -> anyhow::Result<Config> {
    match path {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("cannot read config file {}", path.display()))?;
            parse(&raw, path)
        }
        None => {
            let default_path = Config::default_config_path();
            if default_path.exists() {
                let raw = std::fs::read_to_string(&default_path).with_context(|| {
                    format!("cannot read config file {}", default_path.display())
                })?;
                parse(&raw, &default_path)
            } else {
                debug!("no config file found, using defaults");
                Ok(Config::default())
            }
        }
    }
}

fn parse(raw: &str, path: &Path) -> anyhow::Result<Config> {
    serde_json::from_str(raw)
        .with_context(|| format!("invalid config file {}", path.display()))
}

/// Overlay recognized `OPENVIA_*` environment variables.
fn apply_env(config: &mut Config) {
    if let Ok(key) = std::env::var("OPENVIA_API_KEY") {
        config.llm.api_key = key;
    }
    if let Ok(url) = std::env::var("OPENVIA_BASE_URL") {
        config.llm.base_url = url;
    }
    if let Ok(model) = std::env::var("OPENVIA_MODEL") {
        config.llm.model = model;
    }
    if let Ok(format) = std::env::var("OPENVIA_LLM_FORMAT") {
        if let Ok(parsed) = parse_format(&format) {
            config.llm.format = parsed;
        }
    }
    if let Ok(token) = std::env::var("OPENVIA_TELEGRAM_BOT_TOKEN") {
        config
            .adapters
            .telegram
            .get_or_insert_with(Default::default)
            .bot_token = token;
    }
    if let Ok(app_id) = std::env::var("OPENVIA_FEISHU_APP_ID") {
        config
            .adapters
            .feishu
            .get_or_insert_with(Default::default)
            .app_id = app_id;
    }
    if let Ok(secret) = std::env::var("OPENVIA_FEISHU_APP_SECRET") {
        config
            .adapters
            .feishu
            .get_or_insert_with(Default::default)
            .app_secret = secret;
    }
    if let Ok(level) = std::env::var("OPENVIA_LOG_LEVEL") {
        config.logging.level = level;
    }
}

/// Apply CLI overrides (highest precedence).
fn apply_overrides(config: &mut Config, overrides: &Overrides) -> anyhow::Result<()> {
    if let Some(ref model) = overrides.model {
        config.llm.model = model.clone();
    }
    if let Some(ref key) = overrides.api_key {
        config.llm.api_key = key.clone();
    }
    if let Some(ref url) = overrides.base_url {
        config.llm.base_url = url.clone();
    }
    if let Some(ref format) = overrides.format {
        config.llm.format = parse_format(format)?;
    }
    if let Some(max_iterations) = overrides.max_iterations {
        config.llm.max_iterations = max_iterations;
    }
    if let Some(ref prompt) = overrides.system_prompt {
        config.llm.system_prompt = Some(prompt.clone());
    }
    if let Some(ref adapter) = overrides.adapter {
        config.adapters.default = adapter.clone();
    }
    Ok(())
}

fn parse_format(s: &str) -> anyhow::Result<LlmFormat> {
    match s.to_ascii_lowercase().as_str() {
        "openai" => Ok(LlmFormat::Openai),
        "claude" => Ok(LlmFormat::Claude),
        "gemini" => Ok(LlmFormat::Gemini),
        other => anyhow::bail!("unknown llm format: {other} (expected openai, claude, or gemini)"),
    }
}
