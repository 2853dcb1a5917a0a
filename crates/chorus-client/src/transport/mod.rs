use async_trait::async_trait;
use chorus_protocol::JsonRpcMessage;
use thiserror::Error;
use tokio::sync::mpsc;

pub mod sse;
pub mod stdio;

/// Errors raised while moving frames to and from a provider.
#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Transport was not connected or is already closed")]
    NotConnected,

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("Endpoint origin does not match connection origin: {0}")]
    OriginMismatch(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP error: {status} - {message}")]
    HttpError { status: u16, message: String },

    #[error("Event stream error: {0}")]
    EventStream(String),

    #[error("Child process exited: {0}")]
    ChildExited(String),

    #[error("Channel closed")]
    ChannelClosed,
}

/// Incoming frames. The channel ending is the terminal `closed` signal.
pub type ReadStream = mpsc::Receiver<Result<JsonRpcMessage, Error>>;

/// Outgoing frames. Sends fail once the transport has gone away.
pub type WriteStream = mpsc::Sender<JsonRpcMessage>;

/// A bidirectional frame channel to one provider. Payloads are never interpreted here
/// and there is no reconnect; callers build a fresh transport instead.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn connect(&self) -> Result<(ReadStream, WriteStream), Error>;

    /// Tear down the underlying process or connection. Safe to call more than once.
    async fn close(&self) -> Result<(), Error>;
}

