//! Configuration types and loading

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::domain::{DiagramType, QualityWeights, RatingThresholds};

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// LLM provider configuration
    pub llm: LlmConfig,

    /// Session and quality-loop limits
    pub pipeline: PipelineConfig,

    /// Stage retry policy for transient service failures
    pub retry: RetryConfig,

    /// Quality scoring
    pub quality: QualityConfig,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[serde(rename = "log-level")]
    pub log_level: Option<String>,
}

impl Config {
    /// Validate configuration before use
    ///
    /// Call this early in startup to fail fast with clear error messages.
    pub fn validate(&self) -> Result<()> {
        if std::env::var(&self.llm.api_key_env).is_err() {
            return Err(eyre::eyre!(
                "LLM API key not found. Set the {} environment variable.",
                self.llm.api_key_env
            ));
        }
        self.validate_limits()
    }

    /// Validate everything except credentials
    pub fn validate_limits(&self) -> Result<()> {
        let p = &self.pipeline;
        if p.max_concurrent_sessions == 0 {
            return Err(eyre::eyre!("pipeline.max-concurrent-sessions must be at least 1"));
        }
        if p.fan_out_limit == 0 {
            return Err(eyre::eyre!("pipeline.fan-out-limit must be at least 1"));
        }
        if p.max_attempts == 0 {
            return Err(eyre::eyre!("pipeline.max-attempts must be at least 1"));
        }
        if !(0.0..=100.0).contains(&p.quality_threshold) {
            return Err(eyre::eyre!(
                "pipeline.quality-threshold must be within 0..=100 (got {})",
                p.quality_threshold
            ));
        }
        if p.enabled_types.is_empty() {
            return Err(eyre::eyre!("pipeline.enabled-types must not be empty"));
        }
        self.quality.weights.validate().map_err(|e| eyre::eyre!(e))?;
        self.quality.thresholds.validate().map_err(|e| eyre::eyre!(e))?;
        Ok(())
    }

    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Try project-local config: .diagramgen.yml
        let local_config = PathBuf::from(".diagramgen.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        // Try user config: ~/.config/diagramgen/diagramgen.yml
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("diagramgen").join("diagramgen.yml");
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

    /// Read only the log level, before logging is initialized
    ///
    /// Errors are swallowed; the full load reports them later.
    pub fn load_log_level(config_path: Option<&PathBuf>) -> Option<String> {
        Self::load(config_path).ok().and_then(|c| c.log_level)
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
    /// Provider name ("deepseek" or "openai")
    pub provider: String,

    /// Model identifier
    pub model: String,

    /// Environment variable containing the API key
    #[serde(rename = "api-key-env")]
    pub api_key_env: String,

    /// API base URL (chat completions live under it)
    #[serde(rename = "base-url")]
    pub base_url: String,

    /// Maximum tokens per response
    #[serde(rename = "max-tokens")]
    pub max_tokens: u32,

    /// Request timeout in milliseconds
    #[serde(rename = "timeout-ms")]
    pub timeout_ms: u64,

    /// Default sampling temperature
    pub temperature: f32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "deepseek".to_string(),
            model: "deepseek-chat".to_string(),
            api_key_env: "DEEPSEEK_API_KEY".to_string(),
            base_url: "https://api.deepseek.com/v1".to_string(),
            max_tokens: 4000,
            timeout_ms: 60_000,
            temperature: 0.7,
        }
    }
}

impl LlmConfig {
    /// Read the API key from the configured environment variable
    pub fn get_api_key(&self) -> Result<String> {
        std::env::var(&self.api_key_env)
            .map_err(|_| eyre::eyre!("Environment variable {} is not set", self.api_key_env))
    }

    /// Whether the API key variable is set (for display without leaking it)
    pub fn api_key_set(&self) -> bool {
        std::env::var(&self.api_key_env).map(|k| !k.is_empty()).unwrap_or(false)
    }
}

/// Session and quality-loop limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Maximum sessions holding a slot (pending or running)
    #[serde(rename = "max-concurrent-sessions")]
    pub max_concurrent_sessions: usize,

    /// Maximum diagram tasks of one session running stage calls at once
    #[serde(rename = "fan-out-limit")]
    pub fan_out_limit: usize,

    /// Default quality threshold when the request does not set one
    #[serde(rename = "quality-threshold")]
    pub quality_threshold: f64,

    /// Generation attempts per diagram, including the first
    #[serde(rename = "max-attempts")]
    pub max_attempts: u32,

    /// Idle timeout after which an unfinished session expires
    #[serde(rename = "session-timeout-secs")]
    pub session_timeout_secs: u64,

    /// How often the registry sweeps for expired sessions
    #[serde(rename = "sweep-interval-secs")]
    pub sweep_interval_secs: u64,

    /// Diagram types this deployment will generate
    #[serde(rename = "enabled-types")]
    pub enabled_types: Vec<DiagramType>,

    /// Types generated when a request names none
    #[serde(rename = "default-types")]
    pub default_types: Vec<DiagramType>,

    /// Run the interaction-optimization stage after analysis
    #[serde(rename = "interaction-optimization")]
    pub interaction_optimization: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_sessions: 10,
            fan_out_limit: 3,
            quality_threshold: 75.0,
            max_attempts: 3,
            session_timeout_secs: 3600,
            sweep_interval_secs: 30,
            enabled_types: DiagramType::ALL.to_vec(),
            default_types: vec![DiagramType::Flowchart, DiagramType::SystemArchitecture],
            interaction_optimization: true,
        }
    }
}

impl PipelineConfig {
    pub fn session_timeout(&self) -> Duration {
        Duration::from_secs(self.session_timeout_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

/// Stage retry policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the first attempt
    #[serde(rename = "max-retries")]
    pub max_retries: u32,

    /// Delay before the first retry
    #[serde(rename = "initial-backoff-ms")]
    pub initial_backoff_ms: u64,

    /// Multiplier applied to the delay after every retry
    #[serde(rename = "backoff-factor")]
    pub backoff_factor: f64,

    /// Upper bound on any single delay
    #[serde(rename = "max-backoff-ms")]
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff_ms: 1000,
            backoff_factor: 2.0,
            max_backoff_ms: 30_000,
        }
    }
}

/// Quality scoring configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityConfig {
    /// Dimension weights for the aggregate score
    pub weights: QualityWeights,

    /// Rating band lower bounds
    pub thresholds: RatingThresholds,

    /// Let the model score completeness and accuracy
    #[serde(rename = "llm-review")]
    pub llm_review: bool,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            weights: QualityWeights::default(),
            thresholds: RatingThresholds::default(),
            llm_review: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.llm.provider, "deepseek");
        assert_eq!(config.pipeline.max_concurrent_sessions, 10);
        assert_eq!(config.pipeline.max_attempts, 3);
        assert_eq!(config.pipeline.quality_threshold, 75.0);
        assert_eq!(
            config.pipeline.default_types,
            vec![DiagramType::Flowchart, DiagramType::SystemArchitecture]
        );
        assert!(config.validate_limits().is_ok());
    }

    #[test]
    fn test_deserialize_config() {
        let yaml = r#"
llm:
  provider: openai
  model: gpt-4o-mini
  api-key-env: MY_API_KEY
  base-url: https://api.example.com/v1
  max-tokens: 2000
  timeout-ms: 30000
  temperature: 0.4

pipeline:
  max-concurrent-sessions: 2
  fan-out-limit: 1
  quality-threshold: 80
  max-attempts: 5
  enabled-types: [flowchart, sequence]
  default-types: [sequence]

retry:
  max-retries: 1
  initial-backoff-ms: 10

quality:
  llm-review: false
  weights:
    syntax: 0.5
  thresholds:
    excellent: 95

log-level: DEBUG
"#;

        let config: Config = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(config.llm.model, "gpt-4o-mini");
        assert_eq!(config.llm.api_key_env, "MY_API_KEY");
        assert_eq!(config.pipeline.max_concurrent_sessions, 2);
        assert_eq!(config.pipeline.quality_threshold, 80.0);
        assert_eq!(
            config.pipeline.enabled_types,
            vec![DiagramType::Flowchart, DiagramType::Sequence]
        );
        assert_eq!(config.retry.max_retries, 1);
        assert_eq!(config.retry.backoff_factor, 2.0);
        assert!(!config.quality.llm_review);
        assert_eq!(config.quality.weights.syntax, 0.5);
        assert_eq!(config.quality.weights.usability, 0.10);
        assert_eq!(config.quality.thresholds.excellent, 95.0);
        assert_eq!(config.quality.thresholds.good, 75.0);
        assert_eq!(config.log_level.as_deref(), Some("DEBUG"));
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let yaml = r#"
llm:
  model: deepseek-reasoner
"#;

        let config: Config = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(config.llm.model, "deepseek-reasoner");
        assert_eq!(config.llm.provider, "deepseek");
        assert_eq!(config.llm.api_key_env, "DEEPSEEK_API_KEY");
        assert_eq!(config.pipeline.fan_out_limit, 3);
    }

    #[test]
    fn test_validate_limits_rejects_bad_values() {
        let mut config = Config::default();
        config.pipeline.max_concurrent_sessions = 0;
        assert!(config.validate_limits().is_err());

        let mut config = Config::default();
        config.pipeline.quality_threshold = 120.0;
        assert!(config.validate_limits().is_err());

        let mut config = Config::default();
        config.pipeline.enabled_types.clear();
        assert!(config.validate_limits().is_err());

        let mut config = Config::default();
        config.quality.thresholds.fair = 99.0;
        assert!(config.validate_limits().is_err());

        let mut config = Config::default();
        config.quality.weights.accuracy = -0.25;
        assert!(config.validate_limits().is_err());
    }

    #[test]
    fn test_validate_limits_accepts_unnormalized_weights() {
        let mut config = Config::default();
        config.quality.weights.syntax = 0.5;
        assert!(config.validate_limits().is_ok());
    }

    #[test]
    fn test_load_explicit_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "pipeline:\n  max-attempts: 7").unwrap();
        let path = file.path().to_path_buf();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.pipeline.max_attempts, 7);
    }

    #[test]
    fn test_load_explicit_path_missing_is_error() {
        let path = PathBuf::from("/nonexistent/diagramgen.yml");
        assert!(Config::load(Some(&path)).is_err());
    }

    #[test]
    #[serial]
    fn test_validate_requires_api_key() {
        let config = Config {
            llm: LlmConfig {
                api_key_env: "DIAGRAMGEN_TEST_UNSET_KEY".to_string(),
                ..Default::default()
            },
            ..Default::default()
        };
        unsafe { std::env::remove_var("DIAGRAMGEN_TEST_UNSET_KEY") };
        assert!(config.validate().is_err());
        assert!(!config.llm.api_key_set());

        unsafe { std::env::set_var("DIAGRAMGEN_TEST_UNSET_KEY", "sk-test") };
        assert!(config.validate().is_ok());
        assert_eq!(config.llm.get_api_key().unwrap(), "sk-test");
        unsafe { std::env::remove_var("DIAGRAMGEN_TEST_UNSET_KEY") };
    }
}
