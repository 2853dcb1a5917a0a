use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};
use tracing::debug;

/// Receives user-facing text in order. Never sees tool-call syntax.
#[async_trait]
pub trait OutputSink: Send + Sync {
    async fn push(&self, fragment: &str);
}

/// Forwards fragments to a channel, e.g. a speech or display pipeline.
pub struct ChannelSink {
    tx: mpsc::Sender<String>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<String>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl OutputSink for ChannelSink {
    async fn push(&self, fragment: &str) {
        if self.tx.send(fragment.to_string()).await.is_err() {
            debug!("Output receiver dropped; discarding fragment");
        }
    }
}

/// Collects everything pushed to it.
#[derive(Default)]
pub struct BufferSink {
    fragments: Mutex<Vec<String>>,
}

impl BufferSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn fragments(&self) -> Vec<String> {
        self.fragments.lock().await.clone()
    }

    pub async fn text(&self) -> String {
        self.fragments.lock().await.concat()
    }
}

#[async_trait]
impl OutputSink for BufferSink {
    async fn push(&self, fragment: &str) {
        self.fragments.lock().await.push(fragment.to_string());
    }
}
