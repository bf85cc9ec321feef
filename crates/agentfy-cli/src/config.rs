//! Application configuration.
//!
//! Settings come from a TOML file (`config/default.toml` unless `--config`
//! names another) and are then overridden by environment variables, which
//! may themselves come from a `.env` file loaded at startup.  Every section
//! and field is optional; missing values fall back to the defaults below.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::Deserialize;

use agentfy_agent::{ExecutorConfig, LlmClientConfig, PlannerConfig};

/// Default configuration file, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
}

/// Top-level settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Default tracing filter when `RUST_LOG` is unset.
    pub log_level: String,
    pub log_format: LogFormat,
    pub llm: LlmSettings,
    pub registry: RegistrySettings,
    pub planner: PlannerSettings,
    pub executor: ExecutorSettings,
    pub agents: AgentSettings,
}

/// `[llm]`
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSettings {
    /// `anthropic` or `openai` (any OpenAI-compatible endpoint).
    pub provider: String,
    pub model: String,
    pub base_url: Option<String>,
    pub max_tokens: u32,
    pub temperature: f32,
    pub timeout_secs: u64,
    /// Only ever read from the environment.
    #[serde(skip)]
    pub api_key: Option<String>,
}

/// `[registry]`
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RegistrySettings {
    /// Catalog document, `.json` or `.toml`.
    pub path: PathBuf,
}

/// `[planner]`
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PlannerSettings {
    pub max_repair_attempts: u32,
    pub history_window: usize,
}

/// `[executor]`
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExecutorSettings {
    pub max_retries: u32,
    pub initial_retry_delay_ms: u64,
    pub retry_backoff_factor: f64,
    pub max_retry_delay_ms: u64,
    pub step_timeout_secs: u64,
}

/// `[agents]` -- where capability implementations are reached over HTTP.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgentSettings {
    /// Agents without an explicit endpoint are served at
    /// `{base_url}/{agent_id}`.
    pub base_url: Option<String>,
    /// Per-agent endpoint overrides.
    pub endpoints: BTreeMap<String, String>,
    pub timeout_secs: u64,
}

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            log_level: "info".into(),
            log_format: LogFormat::Compact,
            llm: LlmSettings::default(),
            registry: RegistrySettings::default(),
            planner: PlannerSettings::default(),
            executor: ExecutorSettings::default(),
            agents: AgentSettings::default(),
        }
    }
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            provider: "openai".into(),
            model: "gpt-4o".into(),
            base_url: None,
            max_tokens: 4096,
            temperature: 0.0,
            timeout_secs: 120,
            api_key: None,
        }
    }
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            path: PathBuf::from("config/agents_registry.json"),
        }
    }
}

impl Default for PlannerSettings {
    fn default() -> Self {
        Self {
            max_repair_attempts: 1,
            history_window: 5,
        }
    }
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_retry_delay_ms: 500,
            retry_backoff_factor: 2.0,
            max_retry_delay_ms: 10_000,
            step_timeout_secs: 60,
        }
    }
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            base_url: None,
            endpoints: BTreeMap::new(),
            timeout_secs: 30,
        }
    }
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

impl AppConfig {
    /// Load settings from `path`, or from [`DEFAULT_CONFIG_PATH`] when it
    /// exists, then apply environment overrides.
    ///
    /// An explicitly named file must exist; the default one is optional.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None if Path::new(DEFAULT_CONFIG_PATH).exists() => {
                Self::from_file(Path::new(DEFAULT_CONFIG_PATH))?
            }
            None => Self::default(),
        };
        config.apply_env(|name| std::env::var(name).ok().filter(|v| !v.is_empty()));
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let config: Self = toml::from_str(&text)
            .with_context(|| format!("invalid config file {}", path.display()))?;
        config
            .validate()
            .with_context(|| format!("invalid config file {}", path.display()))?;
        Ok(config)
    }

    /// Reject values the executor cannot work with.
    pub fn validate(&self) -> Result<()> {
        let factor = self.executor.retry_backoff_factor;
        if !factor.is_finite() || factor < 1.0 {
            bail!("executor.retry_backoff_factor must be a finite number >= 1.0, got {factor}");
        }
        if self.executor.max_retry_delay_ms < self.executor.initial_retry_delay_ms {
            bail!(
                "executor.max_retry_delay_ms ({}) is below initial_retry_delay_ms ({})",
                self.executor.max_retry_delay_ms,
                self.executor.initial_retry_delay_ms
            );
        }
        if self.executor.step_timeout_secs == 0 {
            bail!("executor.step_timeout_secs must be at least 1");
        }
        Ok(())
    }

    /// Apply environment overrides through `lookup`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(path) = lookup("AGENT_REGISTRY_PATH") {
            self.registry.path = PathBuf::from(path);
        }
        if let Some(provider) = lookup("AGENTFY_LLM_PROVIDER") {
            self.llm.provider = provider.to_ascii_lowercase();
        }
        if let Some(model) = lookup("AGENTFY_LLM_MODEL") {
            self.llm.model = model;
        }
        if let Some(base_url) = lookup("AGENTFY_LLM_BASE_URL") {
            self.llm.base_url = Some(base_url);
        }
        if let Some(level) = lookup("LOG_LEVEL") {
            self.log_level = level;
        }

        // The key follows whichever provider is selected after overrides.
        let key_var = match self.llm.provider.as_str() {
            "anthropic" => "ANTHROPIC_API_KEY",
            _ => "OPENAI_API_KEY",
        };
        if let Some(key) = lookup(key_var) {
            self.llm.api_key = Some(key);
        }
    }

    // -----------------------------------------------------------------------
    // Conversions into library configuration
    // -----------------------------------------------------------------------

    pub fn llm_client_config(&self) -> Result<LlmClientConfig> {
        let llm = &self.llm;
        let api_key = llm.api_key.clone().unwrap_or_default();

        let mut config = match llm.provider.as_str() {
            "anthropic" => {
                if api_key.is_empty() {
                    bail!("anthropic provider selected but ANTHROPIC_API_KEY is not set");
                }
                let mut config = LlmClientConfig::anthropic(api_key, &llm.model);
                if let Some(base_url) = &llm.base_url {
                    config.base_url = base_url.trim_end_matches('/').to_owned();
                }
                config
            }
            "openai" => {
                if api_key.is_empty() {
                    bail!("openai provider selected but OPENAI_API_KEY is not set");
                }
                match &llm.base_url {
                    Some(base_url) => LlmClientConfig::openai_compatible(
                        api_key,
                        &llm.model,
                        base_url.trim_end_matches('/'),
                    ),
                    None => LlmClientConfig::openai(api_key, &llm.model),
                }
            }
            other => bail!("unknown llm provider `{other}` (expected `anthropic` or `openai`)"),
        };

        config.max_tokens = llm.max_tokens;
        config.timeout = Duration::from_secs(llm.timeout_secs);
        Ok(config)
    }

    pub fn planner_config(&self) -> PlannerConfig {
        PlannerConfig {
            model: self.llm.model.clone(),
            max_tokens: self.llm.max_tokens,
            temperature: self.llm.temperature,
            max_repair_attempts: self.planner.max_repair_attempts,
            history_window: self.planner.history_window,
            request_timeout: Duration::from_secs(self.llm.timeout_secs),
        }
    }

    pub fn executor_config(&self) -> ExecutorConfig {
        let e = &self.executor;
        ExecutorConfig {
            max_retries: e.max_retries,
            initial_retry_delay: Duration::from_millis(e.initial_retry_delay_ms),
            retry_backoff_factor: e.retry_backoff_factor,
            max_retry_delay: Duration::from_millis(e.max_retry_delay_ms),
            step_timeout: Duration::from_secs(e.step_timeout_secs),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn defaults_match_documented_values() {
        let config = AppConfig::default();
        assert_eq!(config.planner.max_repair_attempts, 1);
        assert_eq!(config.planner.history_window, 5);
        assert_eq!(config.executor.max_retries, 2);
        assert_eq!(config.registry.path, PathBuf::from("config/agents_registry.json"));
        assert_eq!(config.log_format, LogFormat::Compact);
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
log_format = "json"

[llm]
provider = "anthropic"
model = "claude-sonnet-4-20250514"

[agents]
base_url = "http://localhost:8000/agents"

[agents.endpoints]
x_crawler = "http://crawler:9000"
"#
        )
        .unwrap();

        let config = AppConfig::from_file(file.path()).unwrap();
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(config.llm.provider, "anthropic");
        assert_eq!(config.llm.max_tokens, 4096);
        assert_eq!(config.agents.endpoints["x_crawler"], "http://crawler:9000");
        assert_eq!(config.executor.step_timeout_secs, 60);
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        assert!(AppConfig::load(Some(Path::new("/nonexistent/agentfy.toml"))).is_err());
    }

    #[test]
    fn env_overrides_apply_and_pick_provider_key() {
        let mut config = AppConfig::default();
        config.apply_env(env(&[
            ("AGENT_REGISTRY_PATH", "/etc/agentfy/registry.toml"),
            ("AGENTFY_LLM_PROVIDER", "Anthropic"),
            ("AGENTFY_LLM_MODEL", "claude-sonnet-4-20250514"),
            ("OPENAI_API_KEY", "sk-openai"),
            ("ANTHROPIC_API_KEY", "sk-ant"),
            ("LOG_LEVEL", "debug"),
        ]));

        assert_eq!(config.registry.path, PathBuf::from("/etc/agentfy/registry.toml"));
        assert_eq!(config.llm.provider, "anthropic");
        assert_eq!(config.llm.api_key.as_deref(), Some("sk-ant"));
        assert_eq!(config.log_level, "debug");

        let client = config.llm_client_config().unwrap();
        assert_eq!(client.default_model, "claude-sonnet-4-20250514");
    }

    #[test]
    fn llm_config_requires_key_and_known_provider() {
        let mut config = AppConfig::default();
        assert!(config.llm_client_config().is_err());

        config.llm.api_key = Some("k".into());
        config.llm.base_url = Some("http://localhost:11434/v1/".into());
        let client = config.llm_client_config().unwrap();
        assert_eq!(client.base_url, "http://localhost:11434/v1");

        config.llm.provider = "gemini".into();
        assert!(config.llm_client_config().is_err());
    }

    #[test]
    fn bad_backoff_factor_is_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[executor]\nretry_backoff_factor = -2.0").unwrap();
        let err = AppConfig::from_file(file.path()).unwrap_err();
        assert!(format!("{err:#}").contains("retry_backoff_factor"));

        let mut config = AppConfig::default();
        assert!(config.validate().is_ok());
        config.executor.retry_backoff_factor = 0.5;
        assert!(config.validate().is_err());
        config.executor.retry_backoff_factor = f64::NAN;
        assert!(config.validate().is_err());
        config.executor.retry_backoff_factor = 1.0;
        assert!(config.validate().is_ok());

        config.executor.max_retry_delay_ms = 10;
        assert!(config.validate().is_err());
    }

    #[test]
    fn executor_settings_convert_to_durations() {
        let config = AppConfig::default().executor_config();
        assert_eq!(config.initial_retry_delay, Duration::from_millis(500));
        assert_eq!(config.max_retry_delay, Duration::from_secs(10));
        assert_eq!(config.step_timeout, Duration::from_secs(60));
    }
}
