//! Ralph Wiggum configuration types and loading

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::ConfigError;

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// LLM provider configuration
    pub llm: LlmConfig,

    /// Defaults for a run when the CLI does not override them
    pub run: RunDefaults,

    /// History folding and restart cadence
    pub progress: ProgressConfig,

    /// Retry policy for every backend call
    pub retry: RetryConfig,

    /// Directory with `{name}.hbs` prompt overrides
    #[serde(rename = "prompts-dir")]
    pub prompts_dir: Option<PathBuf>,

    /// Log level used when --log-level is not given
    #[serde(rename = "log-level")]
    pub log_level: Option<String>,
}

impl Config {
    /// Validate configuration before use
    ///
    /// Checks that the credential is present and the loop settings are usable.
    /// Call this early in startup to fail fast with clear error messages.
    pub fn validate(&self) -> Result<(), ConfigError> {
        debug!("Config::validate: called");
        self.llm.api_key()?;
        if self.progress.history_cap == 0 {
            return Err(ConfigError::InvalidHistoryCap);
        }
        if self.progress.segment_iterations == 0 {
            return Err(ConfigError::InvalidSegmentIterations);
        }
        Ok(())
    }

    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Try project-local config: .ralph-wiggum.yml
        let local_config = PathBuf::from(".ralph-wiggum.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        // Try user config: ~/.config/ralph-wiggum/ralph-wiggum.yml
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("ralph-wiggum").join("ralph-wiggum.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        // No config file found, use defaults
        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Read only the log level, before logging is set up
    pub fn load_log_level(config_path: Option<&PathBuf>) -> Option<String> {
        Self::load(config_path).ok().and_then(|c| c.log_level)
    }

    /// Credential variable named by the config, for help output before the config is validated
    pub fn load_api_key_env(config_path: Option<&PathBuf>) -> String {
        Self::load(config_path).unwrap_or_default().llm.api_key_env
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }
}

/// LLM provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Provider name (currently only "anthropic" supported)
    pub provider: String,

    /// Model identifier
    pub model: String,

    /// Environment variable containing the API key
    #[serde(rename = "api-key-env")]
    pub api_key_env: String,

    /// API base URL
    #[serde(rename = "base-url")]
    pub base_url: String,

    /// Maximum tokens per response
    #[serde(rename = "max-tokens")]
    pub max_tokens: u32,

    /// HTTP request timeout in milliseconds
    #[serde(rename = "timeout-ms")]
    pub timeout_ms: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "anthropic".to_string(),
            model: "claude-haiku-4-5-20251001".to_string(),
            api_key_env: "ANTHROPIC_API_KEY".to_string(),
            base_url: "https://api.anthropic.com".to_string(),
            max_tokens: 4096,
            timeout_ms: 300_000,
        }
    }
}

impl LlmConfig {
    /// Read the credential from the configured environment variable
    pub fn api_key(&self) -> Result<String, ConfigError> {
        debug!(api_key_env = %self.api_key_env, "LlmConfig::api_key: called");
        match std::env::var(&self.api_key_env) {
            Ok(key) if !key.trim().is_empty() => Ok(key),
            _ => {
                debug!("LlmConfig::api_key: credential missing or empty");
                Err(ConfigError::MissingCredential(self.api_key_env.clone()))
            }
        }
    }
}

/// Defaults applied to a run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunDefaults {
    /// Iteration budget when --max-iterations is not given
    #[serde(rename = "max-iterations")]
    pub max_iterations: u32,

    /// Phrase expected inside the completion marker
    #[serde(rename = "completion-phrase")]
    pub completion_phrase: String,

    /// Queue identity recorded with each run
    #[serde(rename = "task-queue")]
    pub task_queue: String,

    /// Directory holding one checkpoint file per run
    #[serde(rename = "state-dir")]
    pub state_dir: PathBuf,
}

impl Default for RunDefaults {
    fn default() -> Self {
        // XDG data directory (~/.local/share/ralph-wiggum/runs on Linux)
        let state_dir = dirs::data_dir()
            .map(|d| d.join("ralph-wiggum").join("runs"))
            .unwrap_or_else(|| PathBuf::from(".ralph-wiggum/runs"));

        Self {
            max_iterations: 10,
            completion_phrase: "COMPLETE".to_string(),
            task_queue: "ralph-wiggum-queue".to_string(),
            state_dir,
        }
    }
}

/// History folding and restart cadence
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProgressConfig {
    /// Maximum iteration transcripts kept verbatim
    #[serde(rename = "history-cap")]
    pub history_cap: usize,

    /// Character budget for the progress summary
    #[serde(rename = "summary-max-chars")]
    pub summary_max_chars: usize,

    /// Characters of each evicted transcript kept when folding
    #[serde(rename = "entry-max-chars")]
    pub entry_max_chars: usize,

    /// Iterations per execution segment before a continue-as-new restart
    #[serde(rename = "segment-iterations")]
    pub segment_iterations: u32,
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            history_cap: 3,
            summary_max_chars: 4000,
            entry_max_chars: 800,
            segment_iterations: 1,
        }
    }
}

/// Retry policy for backend calls
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts including the first
    #[serde(rename = "max-attempts")]
    pub max_attempts: u32,

    #[serde(rename = "initial-interval-ms")]
    pub initial_interval_ms: u64,

    #[serde(rename = "max-interval-ms")]
    pub max_interval_ms: u64,

    #[serde(rename = "backoff-coefficient")]
    pub backoff_coefficient: f64,

    /// Per-attempt deadline
    #[serde(rename = "call-timeout-ms")]
    pub call_timeout_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_interval_ms: 1_000,
            max_interval_ms: 30_000,
            backoff_coefficient: 2.0,
            call_timeout_ms: 300_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.llm.provider, "anthropic");
        assert_eq!(config.run.max_iterations, 10);
        assert_eq!(config.run.completion_phrase, "COMPLETE");
        assert_eq!(config.run.task_queue, "ralph-wiggum-queue");
        assert_eq!(config.progress.history_cap, 3);
        assert_eq!(config.retry.max_attempts, 3);
    }

    #[test]
    fn test_deserialize_config() {
        let yaml = r#"
llm:
  provider: anthropic
  model: claude-sonnet-4-5
  api-key-env: MY_API_KEY
  base-url: https://api.example.com
  max-tokens: 8192
  timeout-ms: 60000

run:
  max-iterations: 25
  completion-phrase: SHIPPED
  task-queue: nightly
  state-dir: /tmp/rw-runs

progress:
  history-cap: 5
  summary-max-chars: 2000
  segment-iterations: 4

retry:
  max-attempts: 5
  backoff-coefficient: 1.5

log-level: debug
"#;

        let config: Config = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(config.llm.model, "claude-sonnet-4-5");
        assert_eq!(config.llm.api_key_env, "MY_API_KEY");
        assert_eq!(config.llm.max_tokens, 8192);
        assert_eq!(config.run.max_iterations, 25);
        assert_eq!(config.run.completion_phrase, "SHIPPED");
        assert_eq!(config.run.state_dir, PathBuf::from("/tmp/rw-runs"));
        assert_eq!(config.progress.history_cap, 5);
        assert_eq!(config.progress.entry_max_chars, 800);
        assert_eq!(config.progress.segment_iterations, 4);
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.initial_interval_ms, 1_000);
        assert_eq!(config.log_level.as_deref(), Some("debug"));
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let yaml = r#"
llm:
  model: claude-opus-4
"#;

        let config: Config = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(config.llm.model, "claude-opus-4");
        assert_eq!(config.llm.provider, "anthropic");
        assert_eq!(config.llm.api_key_env, "ANTHROPIC_API_KEY");
        assert_eq!(config.progress.summary_max_chars, 4000);
        assert!(config.log_level.is_none());
    }

    #[test]
    #[serial]
    fn test_validate_requires_credential() {
        let mut config = Config::default();
        config.llm.api_key_env = "RW_TEST_MISSING_KEY".to_string();
        // SAFETY: serialized test; no other thread reads this variable
        unsafe { std::env::remove_var("RW_TEST_MISSING_KEY") };

        assert_eq!(
            config.validate(),
            Err(ConfigError::MissingCredential("RW_TEST_MISSING_KEY".to_string()))
        );
    }

    #[test]
    #[serial]
    fn test_validate_accepts_present_credential() {
        let mut config = Config::default();
        config.llm.api_key_env = "RW_TEST_PRESENT_KEY".to_string();
        // SAFETY: serialized test; no other thread reads this variable
        unsafe { std::env::set_var("RW_TEST_PRESENT_KEY", "sk-test") };

        assert!(config.validate().is_ok());

        config.progress.history_cap = 0;
        assert_eq!(config.validate(), Err(ConfigError::InvalidHistoryCap));

        unsafe { std::env::remove_var("RW_TEST_PRESENT_KEY") };
    }

    #[test]
    fn test_load_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rw.yml");
        fs::write(&path, "run:\n  max-iterations: 7\n").unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.run.max_iterations, 7);
    }

    #[test]
    fn test_load_api_key_env_follows_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rw.yml");
        fs::write(&path, "llm:\n  api-key-env: MY_CLAUDE_KEY\n").unwrap();

        assert_eq!(Config::load_api_key_env(Some(&path)), "MY_CLAUDE_KEY");
        assert_eq!(
            Config::load_api_key_env(Some(&PathBuf::from("/nonexistent/rw.yml"))),
            "ANTHROPIC_API_KEY"
        );
    }

    #[test]
    fn test_load_explicit_missing_file_errors() {
        let path = PathBuf::from("/nonexistent/rw.yml");
        assert!(Config::load(Some(&path)).is_err());
    }
}
