//! Server configuration
//!
//! Loaded from YAML (default) or TOML, then overridden by `COSTROUTE_*`
//! environment variables. Provider API keys may reference the environment
//! with `$VAR` or `${VAR}`.

use costroute_egress::openai::{DEEPSEEK_ENDPOINT, MISTRAL_ENDPOINT, OPENAI_ENDPOINT};
use costroute_egress::gemini::GEMINI_BASE_URL;
use costroute_routing::{CircuitBreakerConfig, ProviderDescriptor};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// System prompt DeepSeek receives unless one is configured
pub const DEEPSEEK_SYSTEM_PROMPT: &str = "You are a helpful assistant.";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid YAML config: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid TOML config: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Environment variable not found: {var_name} (api_key of provider '{provider}')")]
    EnvVarNotFound { provider: String, var_name: String },

    #[error("{0}")]
    Invalid(String),
}

/// Wire format of a provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProviderType {
    #[serde(rename = "openai")]
    OpenAI,
    #[serde(rename = "mistral")]
    Mistral,
    #[serde(rename = "deepseek")]
    DeepSeek,
    #[serde(rename = "google_gemini", alias = "gemini")]
    GoogleGemini,
}

impl ProviderType {
    /// Endpoint used when none is configured. For Gemini this is the API root.
    pub fn default_endpoint(&self) -> &'static str {
        match self {
            ProviderType::OpenAI => OPENAI_ENDPOINT,
            ProviderType::Mistral => MISTRAL_ENDPOINT,
            ProviderType::DeepSeek => DEEPSEEK_ENDPOINT,
            ProviderType::GoogleGemini => GEMINI_BASE_URL,
        }
    }
}

/// One entry of the `providers` list
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderSettings {
    /// Name, pricing, timeout and retry budget
    #[serde(flatten)]
    pub descriptor: ProviderDescriptor,

    #[serde(rename = "type")]
    pub provider_type: ProviderType,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    pub model: String,

    /// Literal key, or `$VAR` / `${VAR}`
    #[serde(default)]
    pub api_key: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
}

impl ProviderSettings {
    pub fn name(&self) -> &str {
        self.descriptor.name.as_deref().unwrap_or_default().trim()
    }

    pub fn effective_endpoint(&self) -> &str {
        self.endpoint
            .as_deref()
            .unwrap_or_else(|| self.provider_type.default_endpoint())
    }

    pub fn effective_system_prompt(&self) -> Option<&str> {
        match (&self.system_prompt, self.provider_type) {
            (Some(prompt), _) => Some(prompt.as_str()),
            (None, ProviderType::DeepSeek) => Some(DEEPSEEK_SYSTEM_PROMPT),
            (None, _) => None,
        }
    }

    /// Replace an environment reference in `api_key` with its value
    pub fn resolve_env_vars(&mut self) -> Result<(), ConfigError> {
        self.api_key = resolve_env_var(&self.api_key).map_err(|var_name| {
            ConfigError::EnvVarNotFound {
                provider: self.name().to_string(),
                var_name,
            }
        })?;
        Ok(())
    }
}

/// Supports `$VAR_NAME` or `${VAR_NAME}`; anything else is returned as-is.
/// On failure returns the missing variable's name.
fn resolve_env_var(value: &str) -> Result<String, String> {
    let trimmed = value.trim();

    if let Some(var_name) = trimmed.strip_prefix('$') {
        let var_name = var_name
            .strip_prefix('{')
            .and_then(|s| s.strip_suffix('}'))
            .unwrap_or(var_name);

        std::env::var(var_name).map_err(|_| var_name.to_string())
    } else {
        Ok(value.to_string())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageLogConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_usage_log_path")]
    pub path: PathBuf,
}

impl Default for UsageLogConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: default_usage_log_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerSettings {
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,

    #[serde(default = "default_failure_window_secs")]
    pub failure_window_secs: u64,
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            cooldown_secs: default_cooldown_secs(),
            failure_window_secs: default_failure_window_secs(),
        }
    }
}

impl CircuitBreakerSettings {
    pub fn to_circuit_breaker_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: self.failure_threshold,
            cooldown: Duration::from_secs(self.cooldown_secs),
            failure_window: Duration::from_secs(self.failure_window_secs),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default)]
    pub providers: Vec<ProviderSettings>,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub usage_log: UsageLogConfig,

    #[serde(default)]
    pub circuit_breaker: CircuitBreakerSettings,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            providers: Vec::new(),
            logging: LoggingConfig::default(),
            usage_log: UsageLogConfig::default(),
            circuit_breaker: CircuitBreakerSettings::default(),
        }
    }
}

impl ServerConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        if path.extension().and_then(|s| s.to_str()) == Some("toml") {
            Self::from_toml_str(&contents)
        } else {
            // Default to YAML
            Self::from_yaml_str(&contents)
        }
    }

    pub fn from_yaml_str(contents: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(contents)?)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(contents)?)
    }

    /// Merge environment variables into config (env vars take precedence)
    pub fn merge_env(&mut self) {
        if let Ok(val) = std::env::var("COSTROUTE_LOG_LEVEL") {
            self.logging.level = val;
        }

        if let Ok(val) = std::env::var("COSTROUTE_LOG_JSON")
            && let Ok(json) = val.parse::<bool>()
        {
            self.logging.json = json;
        }

        if let Ok(val) = std::env::var("COSTROUTE_USAGE_LOG") {
            self.usage_log.path = PathBuf::from(val);
        }

        if let Ok(val) = std::env::var("COSTROUTE_PORT") {
            match val.parse::<u16>() {
                Ok(port) => self.port = port,
                Err(_) => tracing::warn!(value = %val, "Ignoring invalid COSTROUTE_PORT"),
            }
        }

        if let Ok(val) = std::env::var("COSTROUTE_HOST") {
            self.host = val;
        }
    }

    /// Resolve `$VAR` API keys for every provider
    pub fn resolve_env_vars(&mut self) -> Result<(), ConfigError> {
        for provider in &mut self.providers {
            provider.resolve_env_vars()?;
        }
        Ok(())
    }

    /// Checks the registry does not cover: models and endpoints
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.providers.is_empty() {
            return Err(ConfigError::Invalid(
                "config must contain a non-empty 'providers' list".to_string(),
            ));
        }

        if self.circuit_breaker.failure_threshold == 0 {
            return Err(ConfigError::Invalid(
                "circuit_breaker.failure_threshold must be at least 1".to_string(),
            ));
        }

        for provider in &self.providers {
            if provider.model.trim().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "provider '{}' is missing required field: model",
                    provider.name()
                )));
            }
            if provider
                .endpoint
                .as_deref()
                .is_some_and(|e| e.trim().is_empty())
            {
                return Err(ConfigError::Invalid(format!(
                    "provider '{}' has an empty endpoint",
                    provider.name()
                )));
            }
        }

        Ok(())
    }

    pub fn descriptors(&self) -> Vec<ProviderDescriptor> {
        self.providers.iter().map(|p| p.descriptor.clone()).collect()
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_usage_log_path() -> PathBuf {
    PathBuf::from("logs/usage.log")
}

fn default_failure_threshold() -> u32 {
    3
}

fn default_cooldown_secs() -> u64 {
    60
}

fn default_failure_window_secs() -> u64 {
    300
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const YAML: &str = r#"
providers:
  - name: gemini-flash
    type: google_gemini
    model: gemini-1.5-flash
    api_key: literal-key
    cost_per_1k_tokens: 0.35
  - name: mistral-small
    type: mistral
    endpoint: https://api.mistral.ai/v1/chat/completions
    model: mistral-small-latest
    api_key: ${MISTRAL_KEY_FOR_TEST}
    cost_per_1k_tokens: 0.2
    timeout: 20
    max_retries: 2
  - name: deepseek
    type: deepseek
    model: deepseek-chat
    api_key: $DEEPSEEK_KEY_FOR_TEST
    cost_per_1k_tokens: 0.14
    completion_cost_per_1k_tokens: 0.28
"#;

    fn clear_env() {
        // SAFETY: tests touching the environment are serialized
        unsafe {
            for var in [
                "COSTROUTE_LOG_LEVEL",
                "COSTROUTE_LOG_JSON",
                "COSTROUTE_USAGE_LOG",
                "COSTROUTE_PORT",
                "COSTROUTE_HOST",
                "MISTRAL_KEY_FOR_TEST",
                "DEEPSEEK_KEY_FOR_TEST",
            ] {
                std::env::remove_var(var);
            }
        }
    }

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 8000);
        assert_eq!(config.logging.level, "info");
        assert!(!config.logging.json);
        assert!(config.usage_log.enabled);
        assert_eq!(config.usage_log.path, PathBuf::from("logs/usage.log"));
        assert_eq!(config.circuit_breaker.failure_threshold, 3);
        assert_eq!(config.circuit_breaker.cooldown_secs, 60);
        assert_eq!(config.circuit_breaker.failure_window_secs, 300);
    }

    #[test]
    fn test_parse_yaml_providers() {
        let config = ServerConfig::from_yaml_str(YAML).unwrap();
        assert_eq!(config.providers.len(), 3);

        let gemini = &config.providers[0];
        assert_eq!(gemini.name(), "gemini-flash");
        assert_eq!(gemini.provider_type, ProviderType::GoogleGemini);
        assert_eq!(gemini.effective_endpoint(), GEMINI_BASE_URL);
        assert_eq!(gemini.descriptor.cost_per_1k_tokens, Some(0.35));
        assert_eq!(gemini.descriptor.timeout_secs, 30);
        assert_eq!(gemini.effective_system_prompt(), None);

        let mistral = &config.providers[1];
        assert_eq!(mistral.provider_type, ProviderType::Mistral);
        assert_eq!(mistral.descriptor.timeout_secs, 20);
        assert_eq!(mistral.descriptor.max_retries, 2);

        let deepseek = &config.providers[2];
        assert_eq!(deepseek.effective_endpoint(), DEEPSEEK_ENDPOINT);
        assert_eq!(deepseek.effective_system_prompt(), Some(DEEPSEEK_SYSTEM_PROMPT));
        assert_eq!(deepseek.descriptor.completion_cost_per_1k_tokens, Some(0.28));

        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_toml() {
        let toml = r#"
port = 9100

[logging]
level = "debug"
json = true

[circuit_breaker]
cooldown_secs = 30

[[providers]]
name = "openai-mini"
type = "openai"
model = "gpt-4o-mini"
api_key = "sk-test"
cost_per_1k_tokens = 0.15
"#;
        let config = ServerConfig::from_toml_str(toml).unwrap();
        assert_eq!(config.port, 9100);
        assert_eq!(config.logging.level, "debug");
        assert!(config.logging.json);
        assert_eq!(config.circuit_breaker.cooldown_secs, 30);
        assert_eq!(config.circuit_breaker.failure_threshold, 3);
        assert_eq!(config.providers[0].provider_type, ProviderType::OpenAI);
        assert_eq!(config.providers[0].effective_endpoint(), OPENAI_ENDPOINT);
    }

    #[test]
    fn test_unknown_provider_type_rejected() {
        let yaml = r#"
providers:
  - name: x
    type: anthropic
    model: m
    cost_per_1k_tokens: 1.0
"#;
        assert!(matches!(
            ServerConfig::from_yaml_str(yaml),
            Err(ConfigError::Yaml(_))
        ));
    }

    #[test]
    fn test_validate_rejects_empty_providers() {
        let config = ServerConfig::from_yaml_str("port: 8000").unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_validate_rejects_blank_model() {
        let yaml = r#"
providers:
  - name: x
    type: mistral
    model: " "
    cost_per_1k_tokens: 1.0
"#;
        let config = ServerConfig::from_yaml_str(yaml).unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("model"));
    }

    #[test]
    fn test_validate_rejects_zero_failure_threshold() {
        let yaml = r#"
circuit_breaker:
  failure_threshold: 0
providers:
  - name: x
    type: mistral
    model: mistral-small
    cost_per_1k_tokens: 1.0
"#;
        let config = ServerConfig::from_yaml_str(yaml).unwrap();
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
        assert!(err.to_string().contains("failure_threshold"));

        let mut config = config;
        config.circuit_breaker.failure_threshold = 1;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_file_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        let yaml_path = dir.path().join("providers.yaml");
        std::fs::write(&yaml_path, YAML).unwrap();
        assert_eq!(ServerConfig::from_file(&yaml_path).unwrap().providers.len(), 3);

        let missing = dir.path().join("missing.yaml");
        assert!(matches!(
            ServerConfig::from_file(&missing),
            Err(ConfigError::Read { .. })
        ));
    }

    #[test]
    #[serial]
    fn test_resolve_env_vars() {
        clear_env();
        unsafe {
            std::env::set_var("MISTRAL_KEY_FOR_TEST", "mistral-secret");
            std::env::set_var("DEEPSEEK_KEY_FOR_TEST", "deepseek-secret");
        }

        let mut config = ServerConfig::from_yaml_str(YAML).unwrap();
        config.resolve_env_vars().unwrap();
        assert_eq!(config.providers[0].api_key, "literal-key");
        assert_eq!(config.providers[1].api_key, "mistral-secret");
        assert_eq!(config.providers[2].api_key, "deepseek-secret");

        clear_env();
    }

    #[test]
    #[serial]
    fn test_resolve_missing_env_var() {
        clear_env();

        let mut config = ServerConfig::from_yaml_str(YAML).unwrap();
        let err = config.resolve_env_vars().unwrap_err();
        match err {
            ConfigError::EnvVarNotFound { provider, var_name } => {
                assert_eq!(provider, "mistral-small");
                assert_eq!(var_name, "MISTRAL_KEY_FOR_TEST");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    #[serial]
    fn test_merge_env_overrides() {
        clear_env();
        unsafe {
            std::env::set_var("COSTROUTE_PORT", "9999");
            std::env::set_var("COSTROUTE_HOST", "0.0.0.0");
            std::env::set_var("COSTROUTE_LOG_LEVEL", "debug");
            std::env::set_var("COSTROUTE_LOG_JSON", "true");
            std::env::set_var("COSTROUTE_USAGE_LOG", "/tmp/costroute-usage.log");
        }

        let mut config = ServerConfig::default();
        config.merge_env();
        assert_eq!(config.port, 9999);
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.logging.level, "debug");
        assert!(config.logging.json);
        assert_eq!(config.usage_log.path, PathBuf::from("/tmp/costroute-usage.log"));

        clear_env();
    }

    #[test]
    #[serial]
    fn test_merge_env_ignores_invalid_port() {
        clear_env();
        unsafe {
            std::env::set_var("COSTROUTE_PORT", "not-a-port");
        }

        let mut config = ServerConfig::default();
        config.merge_env();
        assert_eq!(config.port, 8000);

        clear_env();
    }
}
