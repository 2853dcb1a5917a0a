use super::errors::ProviderError;
use crate::tools::NAMESPACE_SEPARATOR;
use chorus_client::{
    SseTransport, SseTransportParams, StdioTransport, StdioTransportParams, Transport,
};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

/// How to reach a provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TransportConfig {
    /// Local subprocess speaking over stdin/stdout
    #[serde(alias = "stdio")]
    Process {
        command: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        env: HashMap<String, String>,
    },
    /// Remote server speaking over an HTTP event stream
    #[serde(alias = "sse")]
    Stream {
        url: String,
        #[serde(default)]
        headers: HashMap<String, String>,
    },
}

impl fmt::Display for TransportConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportConfig::Process { command, args, .. } => {
                write!(f, "process({} {})", command, args.join(" "))
            }
            TransportConfig::Stream { url, .. } => write!(f, "stream({})", url),
        }
    }
}

/// A declared tool provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Filled in from the key of the providers table
    #[serde(skip)]
    pub name: String,
    #[serde(flatten)]
    pub transport: TransportConfig,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_handshake_timeout")]
    pub handshake_timeout_secs: u64,
    #[serde(default = "default_discovery_timeout")]
    pub discovery_timeout_secs: u64,
    /// Upper bound on simultaneous calls; unbounded when absent
    #[serde(default)]
    pub max_concurrent_calls: Option<usize>,
}

fn default_enabled() -> bool {
    true
}

fn default_handshake_timeout() -> u64 {
    10
}

fn default_discovery_timeout() -> u64 {
    5
}

impl ProviderConfig {
    fn with_transport(name: impl Into<String>, transport: TransportConfig) -> Self {
        Self {
            name: name.into(),
            transport,
            enabled: default_enabled(),
            handshake_timeout_secs: default_handshake_timeout(),
            discovery_timeout_secs: default_discovery_timeout(),
            max_concurrent_calls: None,
        }
    }

    pub fn process<S: Into<String>>(name: S, command: S, args: Vec<String>) -> Self {
        Self::with_transport(
            name,
            TransportConfig::Process {
                command: command.into(),
                args,
                env: HashMap::new(),
            },
        )
    }

    pub fn stream<S: Into<String>>(name: S, url: S) -> Self {
        Self::with_transport(
            name,
            TransportConfig::Stream {
                url: url.into(),
                headers: HashMap::new(),
            },
        )
    }

    pub fn with_max_concurrent_calls(mut self, limit: usize) -> Self {
        self.max_concurrent_calls = Some(limit);
        self
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }

    pub fn discovery_timeout(&self) -> Duration {
        Duration::from_secs(self.discovery_timeout_secs)
    }

    fn invalid(&self, reason: impl Into<String>) -> ProviderError {
        ProviderError::InvalidDefinition {
            provider: self.name.clone(),
            reason: reason.into(),
        }
    }

    /// Checks everything that can be checked without connecting.
    pub fn validate(&self) -> Result<(), ProviderError> {
        if self.name.trim().is_empty() {
            return Err(self.invalid("name must not be empty"));
        }
        if self.name.contains(NAMESPACE_SEPARATOR) {
            return Err(self.invalid(format!(
                "name must not contain '{}'",
                NAMESPACE_SEPARATOR
            )));
        }
        if self.handshake_timeout_secs == 0 {
            return Err(self.invalid("handshake_timeout_secs must be at least 1"));
        }
        if self.discovery_timeout_secs == 0 {
            return Err(self.invalid("discovery_timeout_secs must be at least 1"));
        }
        if self.max_concurrent_calls == Some(0) {
            return Err(self.invalid("max_concurrent_calls must be at least 1"));
        }
        match &self.transport {
            TransportConfig::Process { command, .. } if command.trim().is_empty() => {
                Err(self.invalid("command must not be empty"))
            }
            TransportConfig::Process { .. } => Ok(()),
            TransportConfig::Stream { url, headers } => {
                let parsed = url::Url::parse(url).map_err(|e| self.invalid(format!("url: {}", e)))?;
                if !matches!(parsed.scheme(), "http" | "https") {
                    return Err(self.invalid(format!("unsupported url scheme '{}'", parsed.scheme())));
                }
                self.header_map(headers).map(|_| ())
            }
        }
    }

    fn header_map(&self, headers: &HashMap<String, String>) -> Result<HeaderMap, ProviderError> {
        let mut map = HeaderMap::new();
        for (key, value) in headers {
            let name = HeaderName::from_bytes(key.as_bytes())
                .map_err(|e| self.invalid(format!("header name '{}': {}", key, e)))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| self.invalid(format!("header '{}': {}", key, e)))?;
            map.insert(name, value);
        }
        Ok(map)
    }

    /// Builds the transport variant this definition names.
    pub fn build_transport(&self) -> Result<Box<dyn Transport>, ProviderError> {
        self.validate()?;
        match &self.transport {
            TransportConfig::Process { command, args, env } => {
                Ok(Box::new(StdioTransport::new(StdioTransportParams {
                    command: command.clone(),
                    args: args.clone(),
                    env: env.clone(),
                })))
            }
            TransportConfig::Stream { url, headers } => {
                Ok(Box::new(SseTransport::new(SseTransportParams {
                    url: url.clone(),
                    headers: self.header_map(headers)?,
                })))
            }
        }
    }
}

/// Creates transports for provider definitions. Tests swap in in-memory transports.
pub trait TransportFactory: Send + Sync {
    fn create(&self, provider: &ProviderConfig) -> Result<Box<dyn Transport>, ProviderError>;
}

pub struct DefaultTransportFactory;

impl TransportFactory for DefaultTransportFactory {
    fn create(&self, provider: &ProviderConfig) -> Result<Box<dyn Transport>, ProviderError> {
        provider.build_transport()
    }
}
