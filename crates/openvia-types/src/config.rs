//! Configuration schema.
//!
//! All structs accept both `snake_case` and `camelCase` field names in JSON
//! via `#[serde(alias)]`; unknown fields are ignored for forward
//! compatibility. Layering (CLI args > environment > config file >
//! defaults) is applied by the CLI crate; this module only defines the
//! shapes and defaults.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Chat channel adapter configuration.
    #[serde(default)]
    pub adapters: AdaptersConfig,

    /// LLM provider settings.
    #[serde(default)]
    pub llm: LlmConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Root data directory: `~/.openvia`.
    pub fn data_dir() -> PathBuf {
        dirs_home().join(".openvia")
    }

    /// Per-user session working directories live under this root.
    pub fn sessions_dir() -> PathBuf {
        Self::data_dir().join("sessions")
    }

    /// User-supplied skill documents live here.
    pub fn skills_dir() -> PathBuf {
        Self::data_dir().join("skills")
    }

    /// Default config file location: `~/.openvia/config.json`.
    pub fn default_config_path() -> PathBuf {
        Self::data_dir().join("config.json")
    }
}

fn dirs_home() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| PathBuf::from("."))
}

// ── Channel adapters ─────────────────────────────────────────────────────

/// Chat channel adapter configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdaptersConfig {
    /// Which adapter to start by default ("telegram" or "feishu").
    #[serde(default = "default_adapter")]
    pub default: String,

    /// Telegram bot settings.
    #[serde(default)]
    pub telegram: Option<TelegramConfig>,

    /// Feishu app settings.
    #[serde(default)]
    pub feishu: Option<FeishuConfig>,
}

impl Default for AdaptersConfig {
    fn default() -> Self {
        Self {
            default: default_adapter(),
            telegram: None,
            feishu: None,
        }
    }
}

fn default_adapter() -> String {
    "telegram".into()
}

/// Telegram bot adapter settings.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TelegramConfig {
    /// Bot API token from @BotFather.
    #[serde(default, alias = "botToken")]
    pub bot_token: String,

    /// Allowed user ids. Empty means everyone is allowed.
    #[serde(default, alias = "allowedUserIds")]
    pub allowed_user_ids: Vec<String>,
}

/// Feishu app adapter settings.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FeishuConfig {
    /// Feishu app id.
    #[serde(default, alias = "appId")]
    pub app_id: String,

    /// Feishu app secret.
    #[serde(default, alias = "appSecret")]
    pub app_secret: String,

    /// Websocket endpoint override for event subscription.
    #[serde(default, alias = "wsEndpoint")]
    pub ws_endpoint: Option<String>,

    /// Allowed user ids. Empty means everyone is allowed.
    #[serde(default, alias = "allowedUserIds")]
    pub allowed_user_ids: Vec<String>,
}

// ── LLM ──────────────────────────────────────────────────────────────────

/// Which wire protocol family the provider speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LlmFormat {
    /// OpenAI chat-completions or Responses API (also Qwen, DeepSeek,
    /// Moonshot, Ollama).
    #[default]
    Openai,
    /// Anthropic via its OpenAI-compatible endpoint.
    Claude,
    /// Google Gemini generateContent API.
    Gemini,
}

/// LLM provider settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Wire protocol family.
    #[serde(default)]
    pub format: LlmFormat,

    /// API key.
    #[serde(default, alias = "apiKey")]
    pub api_key: String,

    /// Provider base URL.
    #[serde(default, alias = "baseUrl")]
    pub base_url: String,

    /// Model identifier.
    #[serde(default = "default_model")]
    pub model: String,

    /// System prompt prepended to every turn.
    #[serde(default, alias = "systemPrompt")]
    pub system_prompt: Option<String>,

    /// Request deadline in seconds.
    #[serde(default = "default_timeout_secs", alias = "timeout")]
    pub timeout_secs: u64,

    /// Maximum tokens per response.
    #[serde(default, alias = "maxTokens")]
    pub max_tokens: Option<u32>,

    /// Sampling temperature.
    #[serde(default)]
    pub temperature: Option<f64>,

    /// Maximum LLM rounds per turn.
    #[serde(default = "default_max_iterations", alias = "maxIterations")]
    pub max_iterations: u32,

    /// Shell command substrings that require approval before execution.
    /// `None` uses the built-in confirm list.
    #[serde(default, alias = "shellConfirmList")]
    pub shell_confirm_list: Option<Vec<String>>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            format: LlmFormat::default(),
            api_key: String::new(),
            base_url: String::new(),
            model: default_model(),
            system_prompt: None,
            timeout_secs: default_timeout_secs(),
            max_tokens: None,
            temperature: None,
            max_iterations: default_max_iterations(),
            shell_confirm_list: None,
        }
    }
}

fn default_model() -> String {
    "gpt-4o".into()
}

fn default_timeout_secs() -> u64 {
    120
}

fn default_max_iterations() -> u32 {
    10
}

// ── Logging ──────────────────────────────────────────────────────────────

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Minimum level: "debug", "info", "warn", or "error".
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Shorthand for debug-level logging.
    #[serde(default)]
    pub verbose: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            verbose: false,
        }
    }
}

fn default_log_level() -> String {
    "info".into()
}
