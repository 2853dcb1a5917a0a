use crate::model::DialectKind;
use crate::providers::{ProviderConfig, ProviderError, TransportConfig};
use config::{Config, Environment, File, FileFormat};
use etcetera::{choose_app_strategy, AppStrategy, AppStrategyArgs};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const ENV_PREFIX: &str = "CHORUS";

pub static APP_STRATEGY: Lazy<AppStrategyArgs> = Lazy::new(|| AppStrategyArgs {
    top_level_domain: "dev".to_string(),
    author: "chorus".to_string(),
    app_name: "chorus".to_string(),
});

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required setting {key} (set it in the config file or via {env_var})")]
    MissingValue { key: String, env_var: String },
    #[error("Invalid setting {key}: {reason}")]
    InvalidValue { key: String, reason: String },
    #[error("Invalid provider definition: {0}")]
    InvalidProvider(#[from] ProviderError),
    #[error("Configuration error: {0}")]
    Other(#[from] config::ConfigError),
}

/// Name of the environment variable that overrides a dotted settings key.
pub fn to_env_var(key: &str) -> String {
    format!(
        "{}_{}",
        ENV_PREFIX,
        key.replace('.', "__").to_uppercase()
    )
}

/// Connection to the conversational model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSettings {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default = "default_supports_tools")]
    pub supports_tools: bool,
    #[serde(default)]
    pub dialect: DialectKind,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key: None,
            model: default_model(),
            temperature: None,
            supports_tools: default_supports_tools(),
            dialect: DialectKind::default(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

/// How conversations are driven
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSettings {
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
    #[serde(default = "default_max_tool_turns")]
    pub max_tool_turns: usize,
    #[serde(default = "default_tool_call_timeout")]
    pub tool_call_timeout_secs: u64,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            system_prompt: default_system_prompt(),
            max_tool_turns: default_max_tool_turns(),
            tool_call_timeout_secs: default_tool_call_timeout(),
        }
    }
}

impl AgentSettings {
    pub fn tool_call_timeout(&self) -> Duration {
        Duration::from_secs(self.tool_call_timeout_secs)
    }
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_supports_tools() -> bool {
    true
}

fn default_request_timeout() -> u64 {
    120
}

fn default_system_prompt() -> String {
    "You are a helpful assistant. Use the available tools when they help you answer, \
     and reply to the user in plain language."
        .to_string()
}

fn default_max_tool_turns() -> usize {
    5
}

fn default_tool_call_timeout() -> u64 {
    30
}

/// Settings as they come out of the config sources, before validation.
#[derive(Debug, Deserialize)]
struct RawSettings {
    #[serde(default)]
    model: ModelSettings,
    #[serde(default)]
    agent: AgentSettings,
    #[serde(default)]
    providers: BTreeMap<String, ProviderConfig>,
}

/// Everything chorus needs to start: the model, the agent loop, and the providers.
#[derive(Debug, Clone, PartialEq)]
pub struct ChorusConfig {
    pub model: ModelSettings,
    pub agent: AgentSettings,
    pub providers: Vec<ProviderConfig>,
}

impl ChorusConfig {
    /// Loads defaults, then `path` (TOML) if given, then `CHORUS_*` environment
    /// variables, and validates the result.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder()
            .set_default("model.base_url", default_base_url())?
            .set_default("model.model", default_model())?;

        if let Some(path) = path {
            builder = builder.add_source(File::from(path).format(FileFormat::Toml).required(true));
        }

        let config = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let raw: RawSettings = config.try_deserialize().map_err(|err| {
            tracing::debug!("Configuration error: {:?}", &err);
            missing_value(&err).unwrap_or(ConfigError::Other(err))
        })?;

        Self::from_raw(raw)
    }

    fn from_raw(raw: RawSettings) -> Result<Self, ConfigError> {
        let model = raw.model;
        let url = url::Url::parse(&model.base_url).map_err(|e| ConfigError::InvalidValue {
            key: "model.base_url".to_string(),
            reason: e.to_string(),
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConfigError::InvalidValue {
                key: "model.base_url".to_string(),
                reason: format!("unsupported scheme '{}'", url.scheme()),
            });
        }
        if model.request_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "model.request_timeout_secs".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        if raw.agent.tool_call_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "agent.tool_call_timeout_secs".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }

        let providers = raw
            .providers
            .into_iter()
            .map(|(name, mut provider)| {
                provider.name = name;
                normalize_env_keys(&mut provider.transport);
                provider.validate()?;
                Ok(provider)
            })
            .collect::<Result<Vec<_>, ConfigError>>()?;

        Ok(Self {
            model,
            agent: raw.agent,
            providers,
        })
    }

    pub fn enabled_providers(&self) -> impl Iterator<Item = &ProviderConfig> {
        self.providers.iter().filter(|p| p.enabled)
    }
}

// The config crate lowercases keys, but environment variable names are
// conventionally upper case
fn normalize_env_keys(transport: &mut TransportConfig) {
    if let TransportConfig::Process { env, .. } = transport {
        *env = std::mem::take(env)
            .into_iter()
            .map(|(key, value)| (key.to_uppercase(), value))
            .collect::<HashMap<_, _>>();
    }
}

/// Turns "missing field `x` for key `a.b`" into the setting and variable to fix.
fn missing_value(err: &config::ConfigError) -> Option<ConfigError> {
    let message = err.to_string();
    let rest = message.strip_prefix("missing field `")?;
    let (field, rest) = rest.split_once('`')?;
    let key = match rest
        .strip_prefix(" for key `")
        .and_then(|r| r.split_once('`'))
    {
        Some((parent, _)) if !parent.is_empty() => format!("{}.{}", parent, field),
        _ => field.to_string(),
    };
    Some(ConfigError::MissingValue {
        env_var: to_env_var(&key),
        key,
    })
}

/// `config.toml` in the platform config directory, if a home directory exists.
pub fn default_config_path() -> Option<PathBuf> {
    choose_app_strategy(APP_STRATEGY.clone())
        .ok()
        .map(|strategy| strategy.config_dir().join("config.toml"))
}
