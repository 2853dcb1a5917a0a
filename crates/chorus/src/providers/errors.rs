use super::session::SessionState;
use chorus_client::{SessionError, TransportError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProviderError {
    /// Unreachable, failed handshake or failed discovery
    #[error("Failed to connect to provider '{provider}': {reason}")]
    Connect { provider: String, reason: String },

    #[error("Provider '{provider}' is not ready (state: {state:?})")]
    SessionNotReady {
        provider: String,
        state: SessionState,
    },

    #[error("Provider returned error {code}: {message}")]
    Rpc { code: i32, message: String },

    #[error("Provider connection failed: {0}")]
    Transport(String),

    #[error("Invalid provider definition '{provider}': {reason}")]
    InvalidDefinition { provider: String, reason: String },
}

impl From<SessionError> for ProviderError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::Rpc { code, message } => ProviderError::Rpc { code, message },
            other => ProviderError::Transport(other.to_string()),
        }
    }
}

impl From<TransportError> for ProviderError {
    fn from(err: TransportError) -> Self {
        ProviderError::Transport(err.to_string())
    }
}
