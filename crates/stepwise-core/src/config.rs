use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, StepwiseError};

/// Top-level Stepwise configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    pub model: ModelConfig,
    #[serde(default)]
    pub fallback_models: Vec<ModelConfig>,
    #[serde(default)]
    pub gateway: Option<GatewayConfig>,
    #[serde(default)]
    pub log: Option<LogConfig>,
}

/// Limits applied by the execution engine to every run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Maximum step visits per run before the run is aborted.
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,
    /// Wall-clock budget per run. None = unbounded.
    #[serde(default)]
    pub max_duration_secs: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
            max_duration_secs: None,
        }
    }
}

fn default_max_steps() -> usize { 100 }

/// What the tool step does with a call naming an unregistered tool.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum UnknownToolPolicy {
    /// Drop the call silently (logged at warn level).
    #[default]
    Skip,
    /// Append a tool turn telling the model the tool does not exist.
    ErrorTurn,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// System instruction seeded into an empty conversation.
    #[serde(default = "default_instructions")]
    pub instructions: String,
    #[serde(default)]
    pub unknown_tool_policy: UnknownToolPolicy,
    /// Session used when the caller does not name one.
    #[serde(default = "default_session")]
    pub default_session: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            instructions: default_instructions(),
            unknown_tool_policy: UnknownToolPolicy::default(),
            default_session: default_session(),
        }
    }
}

fn default_instructions() -> String {
    "You are a helpful assistant. Use the available tools when they help answer the user."
        .to_string()
}
fn default_session() -> String { "default".to_string() }

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    pub model_id: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default)]
    pub retry: Option<RetryConfig>,
}

impl ModelConfig {
    pub fn new(model_id: impl Into<String>) -> Self {
        Self {
            provider: default_provider(),
            model_id: model_id.into(),
            api_key: None,
            base_url: None,
            max_tokens: None,
            temperature: default_temperature(),
            retry: None,
        }
    }
}

fn default_provider() -> String { "openai".to_string() }
fn default_temperature() -> f32 { 0.7 }

/// Retry configuration for LLM requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
        }
    }
}

fn default_max_retries() -> u32 { 3 }
fn default_initial_backoff() -> u64 { 1000 }
fn default_max_backoff() -> u64 { 30000 }

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String { "127.0.0.1:18790".to_string() }

/// JSONL run-event logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Enable run logging (default: true when section is present).
    #[serde(default = "default_log_enabled")]
    pub enabled: bool,
    /// Directory for log files. Default: ./logs
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            log_dir: default_log_dir(),
        }
    }
}

fn default_log_enabled() -> bool { true }
fn default_log_dir() -> String { "logs".to_string() }

impl LogConfig {
    /// Resolve the log directory (expand ~).
    pub fn dir(&self) -> PathBuf {
        if let Some(rest) = self.log_dir.strip_prefix("~/") {
            if let Some(home) = dirs_home() {
                return home.join(rest);
            }
        }
        PathBuf::from(&self.log_dir)
    }
}

impl AppConfig {
    /// Load config from a TOML file, with env var expansion.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|_| StepwiseError::ConfigNotFound(path.display().to_string()))?;

        Self::from_toml(&content)
    }

    /// Parse config from TOML text, with env var expansion.
    pub fn from_toml(content: &str) -> Result<Self> {
        // Expand ${ENV_VAR} references
        let expanded = expand_env_vars(content);

        let config: Self =
            toml::from_str(&expanded).map_err(|e| StepwiseError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.engine.max_steps == 0 {
            return Err(StepwiseError::Config(
                "engine.max_steps must be at least 1".into(),
            ));
        }
        if self.model.model_id.trim().is_empty() {
            return Err(StepwiseError::Config("model.model_id must not be empty".into()));
        }
        Ok(())
    }
}

/// Expand `${ENV_VAR}` patterns in a string.
fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '$' && chars.peek() == Some(&'{') {
            chars.next(); // consume '{'
            let mut var_name = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_name.push(c);
            }
            match std::env::var(&var_name) {
                Ok(val) => result.push_str(&val),
                Err(_) => {
                    // Keep original if env var not set
                    result.push_str(&format!("${{{}}}", var_name));
                }
            }
        } else {
            result.push(c);
        }
    }
    result
}

fn dirs_home() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_env_vars() {
        std::env::set_var("TEST_STEPWISE_VAR", "hello");
        let result = expand_env_vars("key = \"${TEST_STEPWISE_VAR}\"");
        assert_eq!(result, "key = \"hello\"");
        std::env::remove_var("TEST_STEPWISE_VAR");
    }

    #[test]
    fn test_expand_env_vars_missing() {
        let result = expand_env_vars("key = \"${NONEXISTENT_STEPWISE_VAR}\"");
        assert_eq!(result, "key = \"${NONEXISTENT_STEPWISE_VAR}\"");
    }

    #[test]
    fn test_defaults_from_minimal_toml() {
        let config = AppConfig::from_toml(
            r#"
[model]
model_id = "gpt-4o-mini"
"#,
        )
        .unwrap();
        assert_eq!(config.engine.max_steps, 100);
        assert!(config.engine.max_duration_secs.is_none());
        assert_eq!(config.agent.default_session, "default");
        assert_eq!(config.agent.unknown_tool_policy, UnknownToolPolicy::Skip);
        assert_eq!(config.model.provider, "openai");
        assert!((config.model.temperature - 0.7).abs() < f32::EPSILON);
        assert!(config.gateway.is_none());
        assert!(config.log.is_none());
    }

    #[test]
    fn test_unknown_tool_policy_parses() {
        let config = AppConfig::from_toml(
            r#"
[agent]
unknown_tool_policy = "error_turn"

[model]
model_id = "gpt-4o-mini"
"#,
        )
        .unwrap();
        assert_eq!(config.agent.unknown_tool_policy, UnknownToolPolicy::ErrorTurn);
    }

    #[test]
    fn test_zero_max_steps_rejected() {
        let err = AppConfig::from_toml(
            r#"
[engine]
max_steps = 0

[model]
model_id = "gpt-4o-mini"
"#,
        )
        .unwrap_err();
        assert!(matches!(err, StepwiseError::Config(_)));
    }

    #[test]
    fn test_missing_model_section_rejected() {
        let err = AppConfig::from_toml("[engine]\nmax_steps = 5\n").unwrap_err();
        assert!(matches!(err, StepwiseError::Config(_)));
    }

    #[test]
    fn test_log_dir_default() {
        let log = LogConfig::default();
        assert_eq!(log.dir(), PathBuf::from("logs"));
    }
}
