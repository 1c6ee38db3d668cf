//! Configuration loading, validation, and management for HostBridge.
//!
//! Loads configuration from `~/.hostbridge/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// The root configuration structure.
///
/// Maps directly to `~/.hostbridge/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// API key (can be overridden per-provider)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Default model backend
    #[serde(default = "default_provider")]
    pub default_provider: String,

    /// Default model
    #[serde(default = "default_model")]
    pub default_model: String,

    /// Default temperature
    #[serde(default = "default_temperature")]
    pub default_temperature: f32,

    /// Default max tokens per model response
    #[serde(default = "default_max_tokens")]
    pub default_max_tokens: u32,

    /// System prompt prepended to every session
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,

    /// Agent loop budgets
    #[serde(default)]
    pub agent: AgentConfig,

    /// Bridge timing and lane sizing
    #[serde(default)]
    pub bridge: BridgeConfig,

    /// Provider-specific configurations
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,
}

fn default_provider() -> String {
    "openai".into()
}
fn default_model() -> String {
    "gpt-4o-mini".into()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> u32 {
    4096
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
            .field("api_key", &redact(&self.api_key))
            .field("default_provider", &self.default_provider)
            .field("default_model", &self.default_model)
            .field("default_temperature", &self.default_temperature)
            .field("default_max_tokens", &self.default_max_tokens)
            .field("system_prompt", &self.system_prompt)
            .field("agent", &self.agent)
            .field("bridge", &self.bridge)
            .field("providers", &self.providers)
            .finish()
    }
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("kind", &self.kind)
            .field("api_key", &redact(&self.api_key))
            .field("api_url", &self.api_url)
            .field("default_model", &self.default_model)
            .finish()
    }
}

/// Budget limits for one agent session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Hard ceiling on reasoning ↔ observing cycles
    #[serde(default = "default_max_steps")]
    pub max_steps: u32,

    /// Hard ceiling on tool calls dispatched across the session
    #[serde(default = "default_max_tool_calls")]
    pub max_tool_calls: u32,
}

fn default_max_steps() -> u32 {
    10
}
fn default_max_tool_calls() -> u32 {
    25
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
            max_tool_calls: default_max_tool_calls(),
        }
    }
}

/// Transport and correlation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Max seconds a dispatched tool may run before a timeout result is synthesized
    #[serde(default = "default_tool_timeout_secs")]
    pub tool_timeout_secs: u64,

    /// Deadline for host calls that do not carry their own (e.g. on-device inference)
    #[serde(default = "default_call_deadline_secs")]
    pub default_call_deadline_secs: u64,

    /// Worker threads serving control calls (the call lane)
    #[serde(default = "default_call_workers")]
    pub call_workers: usize,

    /// How often the stdio adapter flushes queued events to the host
    #[serde(default = "default_event_flush_ms")]
    pub event_flush_ms: u64,

    /// Where `initialize` writes logs when the host does not name a directory
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_directory: Option<String>,
}

fn default_tool_timeout_secs() -> u64 {
    30
}
fn default_call_deadline_secs() -> u64 {
    30
}
fn default_call_workers() -> usize {
    2
}
fn default_event_flush_ms() -> u64 {
    20
}

impl BridgeConfig {
    pub fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.tool_timeout_secs)
    }

    pub fn default_call_deadline(&self) -> Duration {
        Duration::from_secs(self.default_call_deadline_secs)
    }

    pub fn event_flush_interval(&self) -> Duration {
        Duration::from_millis(self.event_flush_ms)
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            tool_timeout_secs: default_tool_timeout_secs(),
            default_call_deadline_secs: default_call_deadline_secs(),
            call_workers: default_call_workers(),
            event_flush_ms: default_event_flush_ms(),
            log_directory: None,
        }
    }
}

/// Which wire format a configured provider speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// OpenAI-compatible `/chat/completions`
    Openai,
    /// Anthropic Messages API
    Anthropic,
    /// On-device inference run by the native host
    Host,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Wire format; inferred from the provider name when omitted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<ProviderKind>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_model: Option<String>,
}

impl ProviderConfig {
    /// The configured kind, or a guess from the provider's name.
    pub fn resolved_kind(&self, name: &str) -> ProviderKind {
        if let Some(kind) = self.kind {
            return kind;
        }
        match name {
            "anthropic" => ProviderKind::Anthropic,
            "host" | "local" | "on-device" => ProviderKind::Host,
            _ => ProviderKind::Openai,
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.hostbridge/config.toml).
    ///
    /// Also checks environment variables for API keys:
    /// - `HOSTBRIDGE_API_KEY` (highest priority)
    /// - `OPENAI_API_KEY`
    /// - `ANTHROPIC_API_KEY`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env_overrides();
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

    fn apply_env_overrides(&mut self) {
        if self.api_key.is_none() {
            self.api_key = std::env::var("HOSTBRIDGE_API_KEY")
                .ok()
                .or_else(|| std::env::var("OPENAI_API_KEY").ok())
                .or_else(|| std::env::var("ANTHROPIC_API_KEY").ok());
        }

        if let Ok(provider) = std::env::var("HOSTBRIDGE_PROVIDER") {
            self.default_provider = provider;
        }

        if let Ok(model) = std::env::var("HOSTBRIDGE_MODEL") {
            self.default_model = model;
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".hostbridge")
    }

    /// Default log directory when neither the host nor the config names one.
    pub fn log_dir(&self) -> PathBuf {
        self.bridge
            .log_directory
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(|| Self::config_dir().join("logs"))
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_temperature < 0.0 || self.default_temperature > 2.0 {
            return Err(ConfigError::ValidationError(
                "default_temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if self.agent.max_steps == 0 || self.agent.max_tool_calls == 0 {
            return Err(ConfigError::ValidationError(
                "agent.max_steps and agent.max_tool_calls must be > 0".into(),
            ));
        }

        if self.bridge.tool_timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "bridge.tool_timeout_secs must be > 0".into(),
            ));
        }

        if self.bridge.call_workers == 0 {
            return Err(ConfigError::ValidationError(
                "bridge.call_workers must be > 0".into(),
            ));
        }

        Ok(())
    }

    /// Check if an API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    /// Generate a default config TOML string (for `onboard` command).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            default_provider: default_provider(),
            default_model: default_model(),
            default_temperature: default_temperature(),
            default_max_tokens: default_max_tokens(),
            system_prompt: None,
            agent: AgentConfig::default(),
            bridge: BridgeConfig::default(),
            providers: HashMap::new(),
        }
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.default_provider, "openai");
        assert_eq!(config.agent.max_steps, 10);
        assert_eq!(config.bridge.tool_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn config_roundtrip_toml() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.default_provider, config.default_provider);
        assert_eq!(parsed.bridge.call_workers, config.bridge.call_workers);
    }

    #[test]
    fn invalid_temperature_rejected() {
        let config = AppConfig {
            default_temperature: 5.0,
            ..AppConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_budget_rejected() {
        let mut config = AppConfig::default();
        config.agent.max_tool_calls = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        let result = AppConfig::load_from(Path::new("/nonexistent/config.toml"));
        assert!(result.is_ok());
        let config = result.unwrap();
        assert_eq!(config.default_provider, "openai");
    }

    #[test]
    fn partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
default_provider = "device"

[agent]
max_tool_calls = 2

[bridge]
tool_timeout_secs = 5

[providers.device]
kind = "host"
default_model = "qwen2-0.5b"
"#,
        )
        .unwrap();

        let config = AppConfig::load_from(&path).unwrap();
        assert_eq!(config.agent.max_tool_calls, 2);
        assert_eq!(config.agent.max_steps, 10);
        assert_eq!(config.bridge.tool_timeout_secs, 5);
        assert_eq!(config.bridge.event_flush_ms, 20);
        let device = &config.providers["device"];
        assert_eq!(device.resolved_kind("device"), ProviderKind::Host);
    }

    #[test]
    fn invalid_file_reports_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "agent = [").unwrap();
        let err = AppConfig::load_from(&path).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
    }

    #[test]
    fn provider_kind_inferred_from_name() {
        let cfg = ProviderConfig {
            kind: None,
            api_key: None,
            api_url: None,
            default_model: None,
        };
        assert_eq!(cfg.resolved_kind("anthropic"), ProviderKind::Anthropic);
        assert_eq!(cfg.resolved_kind("host"), ProviderKind::Host);
        assert_eq!(cfg.resolved_kind("openrouter"), ProviderKind::Openai);
    }

    #[test]
    fn debug_redacts_api_key() {
        let config = AppConfig {
            api_key: Some("sk-secret".into()),
            ..AppConfig::default()
        };
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("sk-secret"));
        assert!(rendered.contains("[REDACTED]"));
    }

    #[test]
    fn default_toml_generation() {
        let toml_str = AppConfig::default_toml();
        assert!(toml_str.contains("openai"));
        assert!(toml_str.contains("tool_timeout_secs"));
    }
}
