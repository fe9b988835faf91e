//! Configuration loading and validation
//!
//! This module provides:
//! - `RuntimeConfig` - Orchestrator policy with resolved durations (library-public)
//! - `Config` - Full application configuration loaded from config.toml plus
//!   environment overrides

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::orchestrator::RetryPolicy;

/// Directory name under ~/.config for avi-agent configuration
pub const CONFIG_DIR: &str = "avi-agent";

// =============================================================================
// Runtime configuration
// =============================================================================

/// Runtime policy for an orchestrator.
///
/// CLI users get this via `RuntimeConfig::from_config(&config)`; library
/// users construct it directly.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use avi_agent::RuntimeConfig;
///
/// let config = RuntimeConfig {
///     max_iterations: 4,
///     tool_concurrency: 2,
///     model_timeout: Duration::from_secs(30),
///     ..Default::default()
/// };
/// ```
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Model invocations allowed per user turn
    pub max_iterations: u32,
    /// Re-attempts of a failed model call before the turn fails
    pub model_retries: u32,
    pub model_timeout: Duration,
    /// Bound on a single controller attempt
    pub tool_timeout: Duration,
    /// Bound on a whole user turn
    pub turn_timeout: Duration,
    pub retry: RetryPolicy,
    /// Tool calls of one batch run at most this many at a time
    pub tool_concurrency: usize,
    /// Undeclared tool names tolerated per turn before it fails
    pub max_unknown_tool_calls: u32,
    pub session_idle_timeout: Duration,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl RuntimeConfig {
    pub fn from_config(config: &Config) -> Self {
        let o = &config.orchestrator;
        Self {
            max_iterations: o.max_iterations,
            model_retries: o.model_retries,
            model_timeout: Duration::from_secs(o.model_timeout_secs),
            tool_timeout: Duration::from_secs(o.tool_timeout_secs),
            turn_timeout: Duration::from_secs(o.turn_timeout_secs),
            retry: RetryPolicy {
                max_attempts: o.max_attempts,
                initial_backoff: Duration::from_millis(o.initial_backoff_ms),
                max_backoff: Duration::from_millis(o.max_backoff_ms),
            },
            tool_concurrency: o.tool_concurrency,
            max_unknown_tool_calls: o.max_unknown_tool_calls,
            session_idle_timeout: Duration::from_secs(o.session_idle_secs),
        }
    }
}

// =============================================================================
// Application configuration
// =============================================================================

/// Main configuration structure loaded from config.toml
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub provider: Provider,
    pub controller: ControllerConfig,
    pub ollama: OllamaConfig,
    pub mistral: MistralConfig,
    pub orchestrator: OrchestratorConfig,
    pub log: LogConfig,
}

impl Config {
    /// Load configuration from `path` (or the default location), then apply
    /// environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => match Self::default_config_path() {
                Some(path) if path.exists() => Self::from_file(&path)?,
                _ => Config::default(),
            },
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Get the config directory path (~/.config/avi-agent)
    pub fn config_dir() -> Option<PathBuf> {
        dirs::home_dir().map(|p| p.join(".config").join(CONFIG_DIR))
    }

    /// Get the default config file path
    pub fn default_config_path() -> Option<PathBuf> {
        Self::config_dir().map(|p| p.join("config.toml"))
    }

    /// Overlay values from the environment; `lookup` is `std::env::var` outside tests
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(url) = get("AVI_URL").or_else(|| get("AVI_HOST")) {
            self.controller.url = url;
        }
        if let Some(username) = get("AVI_USERNAME") {
            self.controller.username = username;
        }
        if let Some(password) = get("AVI_PASSWORD") {
            self.controller.password = password;
        }
        if let Some(version) = get("AVI_VERSION") {
            self.controller.version = version;
        }
        if let Some(tenant) = get("AVI_TENANT") {
            self.controller.tenant = tenant;
        }
        if let Some(host) = get("OLLAMA_HOST") {
            self.ollama.host = host;
        }
        if let Some(model) = get("OLLAMA_MODEL") {
            self.ollama.model = model;
        }
        if let Some(key) = get("MISTRAL_API_KEY") {
            self.mistral.api_key = Some(key);
        }
        if let Some(model) = get("MISTRAL_MODEL") {
            self.mistral.model = model;
        }
        if let Some(provider) = get("LLM_PROVIDER") {
            match provider.parse() {
                Ok(provider) => self.provider = provider,
                Err(e) => tracing::warn!("Ignoring LLM_PROVIDER: {}", e),
            }
        }
    }

    /// Reject configurations the agent cannot start with
    pub fn validate(&self) -> Result<()> {
        if self.controller.url.trim().is_empty() {
            bail!("controller url is required (set [controller].url or AVI_HOST)");
        }
        url::Url::parse(&self.controller.base_url())
            .with_context(|| format!("Invalid controller url: {}", self.controller.url))?;
        if self.controller.username.is_empty() {
            bail!("controller username is required (set [controller].username or AVI_USERNAME)");
        }
        if self.controller.password.is_empty() {
            bail!("controller password is required (set [controller].password or AVI_PASSWORD)");
        }
        if self.controller.max_in_flight == 0 {
            bail!("controller.max_in_flight must be at least 1");
        }
        match self.provider {
            Provider::Ollama => {
                if self.ollama.host.trim().is_empty() {
                    bail!("ollama host is required");
                }
                if self.ollama.model.trim().is_empty() {
                    bail!("ollama model is required");
                }
            }
            Provider::Mistral => {
                if self.mistral.api_key.as_deref().map_or(true, str::is_empty) {
                    bail!("mistral api key is required (set [mistral].api_key or MISTRAL_API_KEY)");
                }
            }
        }
        let o = &self.orchestrator;
        if o.max_iterations == 0 {
            bail!("orchestrator.max_iterations must be at least 1");
        }
        if o.max_attempts == 0 {
            bail!("orchestrator.max_attempts must be at least 1");
        }
        if o.tool_concurrency == 0 {
            bail!("orchestrator.tool_concurrency must be at least 1");
        }
        Ok(())
    }
}

/// Language model backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    #[default]
    Ollama,
    Mistral,
}

impl FromStr for Provider {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ollama" => Ok(Provider::Ollama),
            "mistral" => Ok(Provider::Mistral),
            other => Err(format!("unsupported provider `{}` (expected ollama or mistral)", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Controller address, with or without scheme (https is assumed)
    pub url: String,
    pub username: String,
    #[serde(skip_serializing)]
    pub password: String,
    /// Sent as X-Avi-Version
    pub version: String,
    pub tenant: String,
    pub timeout_secs: u64,
    /// Skip TLS certificate verification
    pub insecure: bool,
    /// Process-wide bound on concurrent controller requests
    pub max_in_flight: usize,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            username: String::new(),
            password: String::new(),
            version: "31.2.1".to_string(),
            tenant: "admin".to_string(),
            timeout_secs: 30,
            insecure: false,
            max_in_flight: 8,
        }
    }
}

impl ControllerConfig {
    /// Base URL with scheme and without trailing slash
    pub fn base_url(&self) -> String {
        let url = self.url.trim().trim_end_matches('/');
        if url.contains("://") {
            url.to_string()
        } else {
            format!("https://{}", url)
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OllamaConfig {
    pub host: String,
    pub model: String,
    /// Models offered by `avi-agent models` when the server cannot be reached
    pub models: Vec<String>,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout_secs: u64,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            host: "http://localhost:11434".to_string(),
            model: "llama3.2".to_string(),
            models: vec![
                "llama3.2".to_string(),
                "mistral".to_string(),
                "codellama".to_string(),
            ],
            temperature: 0.7,
            max_tokens: 2048,
            timeout_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MistralConfig {
    pub api_base_url: String,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout_secs: u64,
}

impl Default for MistralConfig {
    fn default() -> Self {
        Self {
            api_base_url: "https://api.mistral.ai".to_string(),
            api_key: None,
            model: "mistral-small-latest".to_string(),
            temperature: 0.7,
            max_tokens: 2048,
            timeout_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub max_iterations: u32,
    pub model_retries: u32,
    pub model_timeout_secs: u64,
    pub tool_timeout_secs: u64,
    pub turn_timeout_secs: u64,
    /// Attempts per tool call for transient and rate-limit failures
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub tool_concurrency: usize,
    pub max_unknown_tool_calls: u32,
    pub session_idle_secs: u64,
    pub tool_access: ToolAccess,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_iterations: 8,
            model_retries: 2,
            model_timeout_secs: 60,
            tool_timeout_secs: 30,
            turn_timeout_secs: 300,
            max_attempts: 3,
            initial_backoff_ms: 500,
            max_backoff_ms: 8_000,
            tool_concurrency: 4,
            max_unknown_tool_calls: 3,
            session_idle_secs: 1_800,
            tool_access: ToolAccess::Full,
        }
    }
}

/// Tool access level for the model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ToolAccess {
    /// Every controller tool
    #[default]
    Full,
    /// List, get and analytics tools only
    ReadOnly,
    /// No tools
    None,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// tracing EnvFilter directive; RUST_LOG takes precedence
    pub filter: String,
    pub file: PathBuf,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: "info,avi_agent=debug".to_string(),
            file: std::env::temp_dir().join("avi-agent.log"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;
    use std::io::Write;

    fn valid_config() -> Config {
        let mut config = Config::default();
        config.controller.url = "avi.example.com".to_string();
        config.controller.username = "admin".to_string();
        config.controller.password = "secret".to_string();
        config
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.provider, Provider::Ollama);
        assert_eq!(config.controller.version, "31.2.1");
        assert_eq!(config.controller.tenant, "admin");
        assert_eq!(config.ollama.model, "llama3.2");
        assert_eq!(config.orchestrator.max_attempts, 3);
        assert_eq!(config.orchestrator.tool_access, ToolAccess::Full);
    }

    #[test]
    fn test_parse_config() {
        let toml = r#"
provider = "mistral"

[controller]
url = "https://10.10.1.5"
username = "admin"
password = "pw"
insecure = true

[mistral]
api_key = "mk-test"
model = "mistral-large-latest"

[orchestrator]
max_iterations = 5
tool_concurrency = 2
tool_access = "read_only"
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.provider, Provider::Mistral);
        assert!(config.controller.insecure);
        assert_eq!(config.controller.tenant, "admin");
        assert_eq!(config.mistral.api_key.as_deref(), Some("mk-test"));
        assert_eq!(config.orchestrator.max_iterations, 5);
        assert_eq!(config.orchestrator.max_attempts, 3);
        assert_eq!(config.orchestrator.tool_access, ToolAccess::ReadOnly);
        config.validate().unwrap();
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[controller]\nurl = \"avi.lab\"\ntimeout_secs = 5").unwrap();
        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.controller.base_url(), "https://avi.lab");
        assert_eq!(config.controller.timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_from_file_reports_parse_errors() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[controller\nurl = ").unwrap();
        let err = Config::from_file(file.path()).unwrap_err();
        assert!(format!("{:#}", err).contains("Failed to parse config file"));
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("AVI_HOST", "avi.prod"),
            ("AVI_USERNAME", "ops"),
            ("AVI_PASSWORD", "hunter2"),
            ("OLLAMA_HOST", "http://gpu:11434"),
            ("LLM_PROVIDER", "Ollama"),
            ("MISTRAL_API_KEY", ""),
        ]
        .into_iter()
        .collect();
        let mut config = Config::default();
        config.apply_env(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(config.controller.url, "avi.prod");
        assert_eq!(config.controller.username, "ops");
        assert_eq!(config.controller.password, "hunter2");
        assert_eq!(config.ollama.host, "http://gpu:11434");
        assert_eq!(config.mistral.api_key, None);
        config.validate().unwrap();
    }

    #[test]
    fn test_validate_rejects_missing_credentials() {
        let mut config = valid_config();
        config.controller.password.clear();
        assert!(config.validate().unwrap_err().to_string().contains("password"));

        let mut config = valid_config();
        config.provider = Provider::Mistral;
        assert!(config.validate().unwrap_err().to_string().contains("mistral api key"));
    }

    #[test]
    fn test_validate_rejects_zero_bounds() {
        let mut config = valid_config();
        config.orchestrator.tool_concurrency = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_provider_from_str() {
        assert_eq!("MISTRAL".parse::<Provider>().unwrap(), Provider::Mistral);
        assert!("openai".parse::<Provider>().is_err());
    }

    #[test]
    fn test_runtime_config_from_config() {
        let mut config = valid_config();
        config.orchestrator.initial_backoff_ms = 100;
        let runtime = RuntimeConfig::from_config(&config);
        assert_eq!(runtime.retry.initial_backoff, Duration::from_millis(100));
        assert_eq!(runtime.retry.max_attempts, 3);
        assert_eq!(runtime.turn_timeout, Duration::from_secs(300));
    }

    #[test]
    fn test_password_not_serialized() {
        let rendered = toml::to_string(&valid_config()).unwrap();
        assert!(!rendered.contains("secret"));
    }
}
