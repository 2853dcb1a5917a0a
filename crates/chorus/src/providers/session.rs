use super::config::ProviderConfig;
use super::errors::ProviderError;
use crate::tools::ToolDescriptor;
use chorus_client::{Session, Transport};
use chorus_protocol::{CallToolResult, Implementation, InitializeResult};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::{Arc, OnceLock};
use tokio::sync::{RwLock, Semaphore};
use tokio::time::timeout;
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Ready,
    Draining,
    Closed,
}

/// One live connection to a tool provider.
///
/// `start` is the only way in and `shutdown` the only way out. Tool descriptors
/// become visible once `start` succeeds and are replaced wholesale on refresh.
pub struct ProviderSession {
    config: ProviderConfig,
    transport: Box<dyn Transport>,
    rpc: OnceLock<Session>,
    state: RwLock<SessionState>,
    descriptors: RwLock<Arc<Vec<ToolDescriptor>>>,
    server_info: OnceLock<InitializeResult>,
    limiter: Option<Semaphore>,
}

fn client_info() -> Implementation {
    Implementation {
        name: "chorus".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    }
}

impl ProviderSession {
    pub fn new(config: ProviderConfig, transport: Box<dyn Transport>) -> Self {
        let limiter = config.max_concurrent_calls.map(Semaphore::new);
        Self {
            config,
            transport,
            rpc: OnceLock::new(),
            state: RwLock::new(SessionState::Connecting),
            descriptors: RwLock::new(Arc::new(Vec::new())),
            server_info: OnceLock::new(),
            limiter,
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub async fn state(&self) -> SessionState {
        *self.state.read().await
    }

    pub fn server_info(&self) -> Option<&InitializeResult> {
        self.server_info.get()
    }

    pub async fn descriptors(&self) -> Arc<Vec<ToolDescriptor>> {
        self.descriptors.read().await.clone()
    }

    fn connect_error(&self, reason: impl Into<String>) -> ProviderError {
        ProviderError::Connect {
            provider: self.config.name.clone(),
            reason: reason.into(),
        }
    }

    /// Connects, performs the handshake and discovers tools. Any failure closes
    /// the session for good.
    #[instrument(skip(self), fields(provider = %self.config.name))]
    pub async fn start(&self) -> Result<Arc<Vec<ToolDescriptor>>, ProviderError> {
        {
            let state = self.state.read().await;
            if *state != SessionState::Connecting {
                return Err(ProviderError::SessionNotReady {
                    provider: self.config.name.clone(),
                    state: *state,
                });
            }
        }

        match self.connect_and_discover().await {
            Ok(descriptors) => {
                *self.descriptors.write().await = descriptors.clone();
                *self.state.write().await = SessionState::Ready;
                info!(tools = descriptors.len(), "provider ready");
                Ok(descriptors)
            }
            Err(e) => {
                warn!("provider failed to start: {}", e);
                self.close_resources().await;
                *self.state.write().await = SessionState::Closed;
                Err(e)
            }
        }
    }

    async fn connect_and_discover(&self) -> Result<Arc<Vec<ToolDescriptor>>, ProviderError> {
        let handshake_timeout = self.config.handshake_timeout();
        let handshake = async {
            let (read, write) = self.transport.connect().await?;
            let rpc = self.rpc.get_or_init(|| Session::new(read, write));
            let info = rpc.initialize(client_info()).await?;
            Ok::<_, ProviderError>((rpc, info))
        };

        let (rpc, info) = timeout(handshake_timeout, handshake)
            .await
            .map_err(|_| self.connect_error(format!("handshake timed out after {:?}", handshake_timeout)))?
            .map_err(|e| self.connect_error(e.to_string()))?;
        debug!(server = %info.server_info.name, version = %info.server_info.version, "handshake complete");
        let _ = self.server_info.set(info);

        let discovery_timeout = self.config.discovery_timeout();
        timeout(discovery_timeout, self.discover(rpc))
            .await
            .map_err(|_| self.connect_error(format!("tool discovery timed out after {:?}", discovery_timeout)))?
            .map_err(|e| self.connect_error(e.to_string()))
    }

    /// Walks every page of `tools/list`.
    async fn discover(&self, rpc: &Session) -> Result<Arc<Vec<ToolDescriptor>>, ProviderError> {
        let mut descriptors = Vec::new();
        let mut seen_names = HashSet::new();
        let mut seen_cursors = HashSet::new();
        let mut cursor = None;

        loop {
            let page = rpc.list_tools(cursor.clone()).await?;
            for tool in page.tools {
                if !seen_names.insert(tool.name.clone()) {
                    warn!(tool = %tool.name, "provider listed a tool twice; keeping the first");
                    continue;
                }
                descriptors.push(ToolDescriptor::from_tool(&self.config.name, tool));
            }
            match page.next_cursor {
                Some(next) if seen_cursors.insert(next.clone()) => cursor = Some(next),
                Some(next) => {
                    warn!(cursor = %next, "provider repeated a pagination cursor");
                    break;
                }
                None => break,
            }
        }

        Ok(Arc::new(descriptors))
    }

    /// Re-runs discovery on a ready session and swaps in the new tool set.
    #[instrument(skip(self), fields(provider = %self.config.name))]
    pub async fn refresh_tools(&self) -> Result<Arc<Vec<ToolDescriptor>>, ProviderError> {
        let rpc = self.ready_rpc().await?;
        let discovery_timeout = self.config.discovery_timeout();
        let descriptors = timeout(discovery_timeout, self.discover(rpc))
            .await
            .map_err(|_| self.connect_error(format!("tool discovery timed out after {:?}", discovery_timeout)))??;
        *self.descriptors.write().await = descriptors.clone();
        Ok(descriptors)
    }

    async fn ready_rpc(&self) -> Result<&Session, ProviderError> {
        let state = *self.state.read().await;
        match (state, self.rpc.get()) {
            (SessionState::Ready, Some(rpc)) => Ok(rpc),
            _ => Err(ProviderError::SessionNotReady {
                provider: self.config.name.clone(),
                state,
            }),
        }
    }

    /// Calls a tool by its provider-local name.
    pub async fn invoke(&self, tool: &str, arguments: Value) -> Result<CallToolResult, ProviderError> {
        let rpc = self.ready_rpc().await?;

        let _permit = match &self.limiter {
            Some(limiter) => Some(limiter.acquire().await.map_err(|_| {
                ProviderError::SessionNotReady {
                    provider: self.config.name.clone(),
                    state: SessionState::Draining,
                }
            })?),
            None => None,
        };

        let result = rpc.call_tool(tool, arguments).await;
        if result.is_err() && rpc.is_closed() {
            // The provider went away underneath us
            let mut state = self.state.write().await;
            if *state == SessionState::Ready {
                warn!(provider = %self.config.name, "provider connection lost");
                *state = SessionState::Closed;
            }
        }
        Ok(result?)
    }

    /// Stops taking calls and closes the connection without waiting for calls in
    /// flight; those fail as closed. Calling it again, or on a closed session,
    /// does nothing.
    pub async fn shutdown(&self) {
        {
            let mut state = self.state.write().await;
            match *state {
                SessionState::Closed | SessionState::Draining => return,
                SessionState::Connecting | SessionState::Ready => *state = SessionState::Draining,
            }
        }
        debug!(provider = %self.config.name, "draining provider session");
        if let Some(limiter) = &self.limiter {
            limiter.close();
        }
        self.close_resources().await;
        *self.state.write().await = SessionState::Closed;
    }

    async fn close_resources(&self) {
        if let Some(rpc) = self.rpc.get() {
            rpc.shutdown().await;
        }
        if let Err(e) = self.transport.close().await {
            warn!(provider = %self.config.name, "failed to close transport: {}", e);
        }
    }
}
