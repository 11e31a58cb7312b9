//! Generation service configuration.
//!
//! Settings come from, in priority order: CLI flags, an optional JSON config
//! file, environment variables, and built-in defaults. The resolved
//! [`ServiceConfig`] is read-only for the life of the process.
use crate::generation::{CommandClient, GenerationClient, OpenAiClient, RetryingClient};
use crate::pipeline::{StageSettings, StageTemperatures};
use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

pub const CONFIG_SCHEMA_VERSION: u32 = 1;

const DEFAULT_MODEL: &str = "gpt-3.5-turbo";
const DEFAULT_BASE_URL: &str = "https://api.openai.com";
const DEFAULT_TIMEOUT_SECS: u64 = 60;
const DEFAULT_RETRY_BACKOFF_MS: u64 = 1000;
const CONFIG_DIR_NAME: &str = "translation-review";

pub const ENV_API_KEY: &str = "OPENAI_API_KEY";
pub const ENV_MODEL: &str = "TREV_MODEL";
pub const ENV_BASE_URL: &str = "TREV_BASE_URL";
pub const ENV_LM_COMMAND: &str = "TREV_LM_COMMAND";

/// On-disk config (`config.json`). Every field is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    #[serde(default)]
    pub schema_version: u32,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    /// Local command backend; takes precedence over the HTTP backend.
    #[serde(default)]
    pub lm_command: Option<String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub max_retries: Option<u32>,
    #[serde(default)]
    pub retry_backoff_ms: Option<u64>,
    #[serde(default)]
    pub temperatures: Option<StageTemperatures>,
}

/// Settings supplied on the command line.
#[derive(Debug, Default, Clone)]
pub struct Overrides {
    pub model: Option<String>,
    pub base_url: Option<String>,
    pub lm_command: Option<String>,
    pub timeout_secs: Option<u64>,
}

#[derive(Clone, PartialEq, Eq)]
pub enum Backend {
    OpenAi { base_url: String, api_key: String },
    Command { command: String },
}

impl fmt::Debug for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OpenAi { base_url, .. } => f
                .debug_struct("OpenAi")
                .field("base_url", base_url)
                .field("api_key", &"<redacted>")
                .finish(),
            Self::Command { command } => {
                f.debug_struct("Command").field("command", command).finish()
            }
        }
    }
}

/// Fully resolved settings for the generation boundary.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceConfig {
    pub backend: Backend,
    pub model: String,
    pub timeout: Duration,
    pub max_retries: u32,
    pub retry_backoff: Duration,
    pub temperatures: StageTemperatures,
}

impl ServiceConfig {
    pub fn stage_settings(&self) -> StageSettings {
        StageSettings {
            model: self.model.clone(),
            temperatures: self.temperatures,
        }
    }

    /// Build the shared client for this configuration.
    pub fn build_client(&self) -> Result<Arc<dyn GenerationClient>> {
        let client: Arc<dyn GenerationClient> = match &self.backend {
            Backend::OpenAi { base_url, api_key } => {
                let inner = OpenAiClient::new(base_url, api_key.clone(), self.timeout);
                tracing::debug!(endpoint = inner.endpoint(), "using chat completions backend");
                Arc::new(RetryingClient::new(inner, self.max_retries, self.retry_backoff))
            }
            Backend::Command { command } => {
                let inner =
                    CommandClient::new(command, self.timeout).context("configure LM command")?;
                tracing::debug!(program = inner.program(), "using LM command backend");
                Arc::new(RetryingClient::new(inner, self.max_retries, self.retry_backoff))
            }
        };
        Ok(client)
    }

    /// One-line description safe for logs.
    pub fn describe(&self) -> String {
        match &self.backend {
            Backend::OpenAi { base_url, .. } => format!("model {} via {base_url}", self.model),
            Backend::Command { command } => format!("model {} via command `{command}`", self.model),
        }
    }
}

/// Default config location, if the platform has a config directory.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(CONFIG_DIR_NAME).join("config.json"))
}

/// Load the config file at `explicit`, or the default path when it exists.
pub fn load_config_file(explicit: Option<&Path>) -> Result<Option<ConfigFile>> {
    let path = match explicit {
        Some(path) => path.to_path_buf(),
        None => match default_config_path() {
            Some(path) if path.is_file() => path,
            _ => return Ok(None),
        },
    };
    let bytes = fs::read(&path).with_context(|| format!("read config {}", path.display()))?;
    let config: ConfigFile = serde_json::from_slice(&bytes)
        .with_context(|| format!("parse config JSON {}", path.display()))?;
    validate_config_file(&config)?;
    tracing::debug!(path = %path.display(), "loaded config file");
    Ok(Some(config))
}

fn validate_config_file(config: &ConfigFile) -> Result<()> {
    if config.schema_version != 0 && config.schema_version != CONFIG_SCHEMA_VERSION {
        return Err(anyhow!(
            "unsupported config schema_version {} (expected {})",
            config.schema_version,
            CONFIG_SCHEMA_VERSION
        ));
    }
    if let Some(temps) = &config.temperatures {
        for (name, value) in [
            ("classification", temps.classification),
            ("review", temps.review),
            ("correction", temps.correction),
            ("verdict", temps.verdict),
        ] {
            if !(0.0..=2.0).contains(&value) {
                return Err(anyhow!(
                    "temperatures.{name} must be between 0 and 2 (got {value})"
                ));
            }
        }
    }
    if config.timeout_secs == Some(0) {
        return Err(anyhow!("timeout_secs must be greater than zero"));
    }
    Ok(())
}

/// Resolve settings: explicit flag > config file > environment > default.
pub fn resolve<E>(file: Option<ConfigFile>, overrides: &Overrides, env: E) -> Result<ServiceConfig>
where
    E: Fn(&str) -> Option<String>,
{
    let file = file.unwrap_or_default();
    let env_non_empty = |key: &str| env(key).filter(|value| !value.trim().is_empty());

    let model = overrides
        .model
        .clone()
        .or(file.model)
        .or_else(|| env_non_empty(ENV_MODEL))
        .unwrap_or_else(|| DEFAULT_MODEL.to_string());

    let lm_command = overrides
        .lm_command
        .clone()
        .or(file.lm_command)
        .or_else(|| env_non_empty(ENV_LM_COMMAND));

    let backend = match lm_command {
        Some(command) => Backend::Command { command },
        None => {
            let base_url = overrides
                .base_url
                .clone()
                .or(file.base_url)
                .or_else(|| env_non_empty(ENV_BASE_URL))
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
            let api_key = env_non_empty(ENV_API_KEY).ok_or_else(|| {
                anyhow!("{ENV_API_KEY} is not set (or configure an LM command with --lm-command / {ENV_LM_COMMAND})")
            })?;
            Backend::OpenAi { base_url, api_key }
        }
    };

    let timeout_secs = overrides
        .timeout_secs
        .or(file.timeout_secs)
        .unwrap_or(DEFAULT_TIMEOUT_SECS);
    if timeout_secs == 0 {
        return Err(anyhow!("timeout must be greater than zero"));
    }

    Ok(ServiceConfig {
        backend,
        model,
        timeout: Duration::from_secs(timeout_secs),
        max_retries: file.max_retries.unwrap_or(0),
        retry_backoff: Duration::from_millis(
            file.retry_backoff_ms.unwrap_or(DEFAULT_RETRY_BACKOFF_MS),
        ),
        temperatures: file.temperatures.unwrap_or_default(),
    })
}

/// Resolve against the process environment.
pub fn resolve_from_env(config_path: Option<&Path>, overrides: &Overrides) -> Result<ServiceConfig> {
    let file = load_config_file(config_path)?;
    resolve(file, overrides, |key| std::env::var(key).ok())
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
