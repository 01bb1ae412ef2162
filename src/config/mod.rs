//! Configuration management
//!
//! This module handles loading, validation, and management of the
//! engine configuration. Configuration is stored in TOML format at
//! ~/.checkin/config.toml.
//!
//! # Configuration Sections
//!
//! - **core**: Data directory, log level
//! - **schedule**: Timezone, daily fire time, weekly fire day/time,
//!   reply timeout
//! - **retry**: External-call retry budget, backoff base, per-attempt
//!   timeout
//! - **telegram**: The single authorized chat
//! - **anthropic**: Summarizer endpoint and model
//! - **docs**: Document store endpoint and target document
//!
//! Secrets (bot token, API keys) are never stored in the file; they
//! are read from the environment at startup. A misconfigured timezone
//! or fire spec fails validation and aborts startup — these are not
//! recoverable at runtime.

use crate::errors::EngineError;
use crate::schedule::JobSpec;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Core engine settings
    #[serde(default)]
    pub core: CoreConfig,

    /// Trigger schedule settings
    #[serde(default)]
    pub schedule: ScheduleConfig,

    /// Retry policy for external calls
    #[serde(default)]
    pub retry: RetryConfig,

    /// Telegram transport settings
    #[serde(default)]
    pub telegram: TelegramConfig,

    /// Anthropic summarizer settings
    #[serde(default)]
    pub anthropic: AnthropicConfig,

    /// Google Docs document store settings
    #[serde(default)]
    pub docs: DocsConfig,
}

/// Core engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Data directory path (supports ~ expansion); holds the state file
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Trigger schedule configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// IANA timezone identifier all fire times are interpreted in
    #[serde(default = "default_timezone")]
    pub timezone: String,

    /// Daily check-in fire hour (0-23, wall clock in `timezone`)
    #[serde(default = "default_daily_hour")]
    pub daily_hour: u32,

    /// Daily check-in fire minute (0-59)
    #[serde(default = "default_daily_minute")]
    pub daily_minute: u32,

    /// Weekly recap weekday (e.g. "sunday")
    #[serde(default = "default_weekly_weekday")]
    pub weekly_weekday: String,

    /// Weekly recap fire hour (0-23)
    #[serde(default = "default_weekly_hour")]
    pub weekly_hour: u32,

    /// Weekly recap fire minute (0-59)
    #[serde(default = "default_weekly_minute")]
    pub weekly_minute: u32,

    /// How long a session waits for a reply before timing out (minutes)
    #[serde(default = "default_reply_timeout_minutes")]
    pub reply_timeout_minutes: u64,
}

/// Retry policy configuration for the two external calls
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum attempts per external call (first try included)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Base backoff delay in milliseconds (doubles per attempt)
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Per-attempt timeout in seconds; a timed-out attempt counts
    /// against the retry budget
    #[serde(default = "default_attempt_timeout_secs")]
    pub attempt_timeout_secs: u64,
}

/// Telegram transport configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TelegramConfig {
    /// The single authorized chat id; messages from any other chat
    /// are ignored
    #[serde(default)]
    pub chat_id: i64,
}

/// Anthropic summarizer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnthropicConfig {
    /// Base URL for the Anthropic API
    #[serde(default = "default_anthropic_base_url")]
    pub base_url: String,

    /// Model name
    #[serde(default = "default_anthropic_model")]
    pub model: String,
    // Note: API key comes from the ANTHROPIC_API_KEY env var
}

/// Google Docs document store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocsConfig {
    /// Base URL for the Google Docs REST API
    #[serde(default = "default_docs_base_url")]
    pub base_url: String,

    /// Target document id the log is appended to
    #[serde(default)]
    pub document_id: String,
    // Note: access token comes from the GOOGLE_DOCS_TOKEN env var
}

// Default value functions
fn default_data_dir() -> PathBuf {
    PathBuf::from("~/.checkin")
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_timezone() -> String {
    "Europe/London".to_string()
}

fn default_daily_hour() -> u32 {
    20
}

fn default_daily_minute() -> u32 {
    30
}

fn default_weekly_weekday() -> String {
    "sunday".to_string()
}

fn default_weekly_hour() -> u32 {
    20
}

fn default_weekly_minute() -> u32 {
    0
}

fn default_reply_timeout_minutes() -> u64 {
    240
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_attempt_timeout_secs() -> u64 {
    60
}

fn default_anthropic_base_url() -> String {
    "https://api.anthropic.com/v1".to_string()
}

fn default_anthropic_model() -> String {
    "claude-3-5-sonnet-20241022".to_string()
}

fn default_docs_base_url() -> String {
    "https://docs.googleapis.com/v1".to_string()
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            log_level: default_log_level(),
        }
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            timezone: default_timezone(),
            daily_hour: default_daily_hour(),
            daily_minute: default_daily_minute(),
            weekly_weekday: default_weekly_weekday(),
            weekly_hour: default_weekly_hour(),
            weekly_minute: default_weekly_minute(),
            reply_timeout_minutes: default_reply_timeout_minutes(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            attempt_timeout_secs: default_attempt_timeout_secs(),
        }
    }
}

impl Default for AnthropicConfig {
    fn default() -> Self {
        Self {
            base_url: default_anthropic_base_url(),
            model: default_anthropic_model(),
        }
    }
}

impl Default for DocsConfig {
    fn default() -> Self {
        Self {
            base_url: default_docs_base_url(),
            document_id: String::new(),
        }
    }
}

impl Config {
    /// Load configuration from the default location (~/.checkin/config.toml)
    ///
    /// If the configuration file doesn't exist, creates a default
    /// configuration. Validates the configuration after loading and
    /// returns descriptive errors if validation fails.
    pub fn load_or_create() -> Result<Self, EngineError> {
        let config_path = Self::default_config_path()?;

        if config_path.exists() {
            Self::load_from_path(&config_path)
        } else {
            Self::create_default(&config_path)
        }
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self, EngineError> {
        let contents = fs::read_to_string(path)
            .map_err(|e| EngineError::Config(format!("Failed to read config file: {}", e)))?;

        let mut config: Config = toml::from_str(&contents)
            .map_err(|e| EngineError::Config(format!("Failed to parse config: {}", e)))?;

        config.validate_and_process()?;

        Ok(config)
    }

    /// Create default configuration and save to path
    fn create_default(path: &Path) -> Result<Self, EngineError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                EngineError::Config(format!("Failed to create config directory: {}", e))
            })?;
        }

        let mut config = Self::default();
        config.validate_and_process()?;

        let toml_string = toml::to_string_pretty(&config)
            .map_err(|e| EngineError::Config(format!("Failed to serialize config: {}", e)))?;

        fs::write(path, toml_string)
            .map_err(|e| EngineError::Config(format!("Failed to write config file: {}", e)))?;

        Ok(config)
    }

    /// Get the default configuration file path (~/.checkin/config.toml)
    fn default_config_path() -> Result<PathBuf, EngineError> {
        let home = dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Could not determine home directory".to_string()))?;

        Ok(home.join(".checkin").join("config.toml"))
    }

    /// Validate and process configuration
    ///
    /// Verifies the log level, fire times, timezone, weekday, and
    /// retry bounds, expands ~ in the data directory, and creates the
    /// data directory if it doesn't exist. Any violation is fatal —
    /// the scheduler cannot run against an invalid fire spec.
    fn validate_and_process(&mut self) -> Result<(), EngineError> {
        let valid_log_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_log_levels.contains(&self.core.log_level.as_str()) {
            return Err(EngineError::Config(format!(
                "Invalid log level '{}'. Must be one of: {}",
                self.core.log_level,
                valid_log_levels.join(", ")
            )));
        }

        // Building the job specs exercises every schedule field:
        // timezone parse, weekday parse, hour/minute ranges.
        self.job_specs()?;

        if self.retry.max_attempts == 0 {
            return Err(EngineError::Config(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.retry.attempt_timeout_secs == 0 {
            return Err(EngineError::Config(
                "retry.attempt_timeout_secs must be at least 1".to_string(),
            ));
        }
        if self.schedule.reply_timeout_minutes == 0 {
            return Err(EngineError::Config(
                "schedule.reply_timeout_minutes must be at least 1".to_string(),
            ));
        }

        self.core.data_dir = expand_path(&self.core.data_dir)?;
        if !self.core.data_dir.exists() {
            fs::create_dir_all(&self.core.data_dir).map_err(|e| {
                EngineError::Config(format!("Failed to create data directory: {}", e))
            })?;
        }

        Ok(())
    }

    /// Build the two immutable job specs from the schedule section.
    pub fn job_specs(&self) -> Result<(JobSpec, JobSpec), EngineError> {
        JobSpec::pair_from_schedule(&self.schedule)
    }

    /// Path of the durable state file inside the data directory.
    pub fn state_path(&self) -> PathBuf {
        self.core.data_dir.join("state.json")
    }

    /// How long a session waits for a reply before timing out.
    pub fn reply_timeout(&self) -> Duration {
        Duration::from_secs(self.schedule.reply_timeout_minutes * 60)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            core: CoreConfig::default(),
            schedule: ScheduleConfig::default(),
            retry: RetryConfig::default(),
            telegram: TelegramConfig::default(),
            anthropic: AnthropicConfig::default(),
            docs: DocsConfig::default(),
        }
    }
}

/// Secrets consumed from the environment at startup.
///
/// Credential provisioning is outside this system; the engine only
/// requires that these variables are present when it starts.
#[derive(Clone)]
pub struct Secrets {
    pub telegram_token: String,
    pub anthropic_api_key: String,
    pub docs_token: String,
}

impl Secrets {
    /// Read all required secrets, reporting every missing variable at once.
    pub fn from_env() -> Result<Self, EngineError> {
        let mut missing = Vec::new();
        let telegram_token = require_env("TELEGRAM_TOKEN", &mut missing);
        let anthropic_api_key = require_env("ANTHROPIC_API_KEY", &mut missing);
        let docs_token = require_env("GOOGLE_DOCS_TOKEN", &mut missing);

        if !missing.is_empty() {
            return Err(EngineError::Config(format!(
                "Missing required environment variables: {}",
                missing.join(", ")
            )));
        }

        Ok(Self {
            telegram_token,
            anthropic_api_key,
            docs_token,
        })
    }
}

impl std::fmt::Debug for Secrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Secrets")
            .field("telegram_token", &"<redacted>")
            .field("anthropic_api_key", &"<redacted>")
            .field("docs_token", &"<redacted>")
            .finish()
    }
}

fn require_env(name: &str, missing: &mut Vec<String>) -> String {
    match std::env::var(name) {
        Ok(v) if !v.is_empty() => v,
        _ => {
            missing.push(name.to_string());
            String::new()
        }
    }
}

/// Expand ~ in path to user's home directory
fn expand_path(path: &Path) -> Result<PathBuf, EngineError> {
    let path_str = path
        .to_str()
        .ok_or_else(|| EngineError::Config("Invalid UTF-8 in path".to_string()))?;

    if let Some(rest) = path_str.strip_prefix("~/") {
        let home = dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Could not determine home directory".to_string()))?;

        Ok(home.join(rest))
    } else if path_str == "~" {
        dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Could not determine home directory".to_string()))
    } else {
        Ok(path.to_path_buf())
    }
}
