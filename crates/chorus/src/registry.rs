use crate::model::schema::{SchemaDialect, ToolCatalog};
use crate::providers::{
    DefaultTransportFactory, ProviderConfig, ProviderError, ProviderSession, TransportFactory,
};
use crate::tools::{split_namespaced, ToolDescriptor};
use futures::future::join_all;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tracing::{info, instrument, warn};

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Unknown provider: {0}")]
    UnknownProvider(String),

    #[error("Tool registry has been shut down")]
    ShutDown,

    #[error(transparent)]
    Provider(#[from] ProviderError),
}

/// A started provider together with the tools it contributed.
struct ActiveProvider {
    session: Arc<ProviderSession>,
    tools: Arc<Vec<ToolDescriptor>>,
}

/// Which providers came up and which did not.
#[derive(Debug, Default)]
pub struct StartupReport {
    pub connected: Vec<(String, usize)>,
    pub failed: Vec<(String, ProviderError)>,
}

/// Process-wide view of every provider and its tools.
///
/// Created once, shared with conversations behind an `Arc`, and torn down with
/// `shutdown`. Lifecycle changes for one provider are serialized through that
/// provider's own lock; readers never wait on a provider that is connecting.
pub struct ToolRegistry {
    definitions: BTreeMap<String, ProviderConfig>,
    lifecycle: HashMap<String, Mutex<()>>,
    active: RwLock<BTreeMap<String, ActiveProvider>>,
    factory: Arc<dyn TransportFactory>,
    shut_down: AtomicBool,
}

impl ToolRegistry {
    pub fn new(providers: Vec<ProviderConfig>) -> Self {
        Self::with_factory(providers, Arc::new(DefaultTransportFactory))
    }

    pub fn with_factory(providers: Vec<ProviderConfig>, factory: Arc<dyn TransportFactory>) -> Self {
        let definitions: BTreeMap<String, ProviderConfig> = providers
            .into_iter()
            .map(|p| (p.name.clone(), p))
            .collect();
        let lifecycle = definitions
            .keys()
            .map(|name| (name.clone(), Mutex::new(())))
            .collect();
        Self {
            definitions,
            lifecycle,
            active: RwLock::new(BTreeMap::new()),
            factory,
            shut_down: AtomicBool::new(false),
        }
    }

    /// Starts every enabled provider concurrently. A provider that fails is left out;
    /// the others are unaffected.
    pub async fn connect_all(&self) -> StartupReport {
        let names: Vec<String> = self
            .definitions
            .values()
            .filter(|p| p.enabled)
            .map(|p| p.name.clone())
            .collect();

        let results = join_all(names.iter().map(|name| self.start_provider(name))).await;

        let mut report = StartupReport::default();
        for (name, result) in names.into_iter().zip(results) {
            match result {
                Ok(count) => report.connected.push((name, count)),
                Err(RegistryError::Provider(e)) => {
                    warn!(provider = %name, "excluding provider: {}", e);
                    report.failed.push((name, e));
                }
                Err(e) => warn!(provider = %name, "excluding provider: {}", e),
            }
        }
        info!(
            connected = report.connected.len(),
            failed = report.failed.len(),
            "tool providers started"
        );
        report
    }

    fn definition(&self, provider: &str) -> Result<(&ProviderConfig, &Mutex<()>), RegistryError> {
        match (self.definitions.get(provider), self.lifecycle.get(provider)) {
            (Some(definition), Some(lock)) => Ok((definition, lock)),
            _ => Err(RegistryError::UnknownProvider(provider.to_string())),
        }
    }

    async fn start_provider(&self, provider: &str) -> Result<usize, RegistryError> {
        let (definition, lock) = self.definition(provider)?;
        let _guard = lock.lock().await;
        self.replace_session(definition).await
    }

    // Caller holds the provider's lifecycle lock
    async fn replace_session(&self, definition: &ProviderConfig) -> Result<usize, RegistryError> {
        if self.shut_down.load(Ordering::SeqCst) {
            return Err(RegistryError::ShutDown);
        }
        let previous = self.active.write().await.remove(&definition.name);
        if let Some(previous) = previous {
            previous.session.shutdown().await;
        }

        let transport = self.factory.create(definition)?;
        let session = Arc::new(ProviderSession::new(definition.clone(), transport));
        let tools = session.start().await?;
        let count = tools.len();
        self.active
            .write()
            .await
            .insert(definition.name.clone(), ActiveProvider { session, tools });
        Ok(count)
    }

    /// Re-runs discovery for one provider and swaps in its new tool set. Other
    /// providers' entries are left untouched.
    #[instrument(skip(self))]
    pub async fn rediscover(&self, provider: &str) -> Result<usize, RegistryError> {
        let (_, lock) = self.definition(provider)?;
        let _guard = lock.lock().await;

        let session = self
            .active
            .read()
            .await
            .get(provider)
            .map(|p| p.session.clone())
            .ok_or_else(|| RegistryError::UnknownProvider(provider.to_string()))?;

        let tools = session.refresh_tools().await?;
        let count = tools.len();
        if let Some(entry) = self.active.write().await.get_mut(provider) {
            entry.tools = tools;
        }
        Ok(count)
    }

    /// Replaces a provider's session with a fresh one built from the same
    /// definition. On failure the provider is left out of the catalog.
    #[instrument(skip(self))]
    pub async fn reconnect(&self, provider: &str) -> Result<usize, RegistryError> {
        let (definition, lock) = self.definition(provider)?;
        let _guard = lock.lock().await;
        self.replace_session(definition).await
    }

    /// Every registered tool, grouped by provider in name order.
    pub async fn descriptors(&self) -> Vec<ToolDescriptor> {
        self.active
            .read()
            .await
            .values()
            .flat_map(|p| p.tools.iter().cloned())
            .collect()
    }

    /// The catalog rendered for one model dialect.
    pub async fn catalog(&self, dialect: &dyn SchemaDialect) -> ToolCatalog {
        ToolCatalog::build(&self.descriptors().await, dialect)
    }

    /// Finds the session that owns a namespaced tool and the tool's own name.
    pub async fn resolve(&self, name: &str) -> Result<(Arc<ProviderSession>, String), RegistryError> {
        let unknown = || RegistryError::UnknownTool(name.to_string());
        let (provider, _) = split_namespaced(name).ok_or_else(unknown)?;

        let active = self.active.read().await;
        let entry = active.get(provider).ok_or_else(unknown)?;
        let descriptor = entry
            .tools
            .iter()
            .find(|t| t.name == name)
            .ok_or_else(unknown)?;
        Ok((entry.session.clone(), descriptor.original_name.clone()))
    }

    pub async fn active_providers(&self) -> Vec<String> {
        self.active.read().await.keys().cloned().collect()
    }

    /// Shuts every provider down. Waits for any start or reconnect in progress;
    /// later ones are refused. The registry is empty afterwards.
    pub async fn shutdown(&self) {
        self.shut_down.store(true, Ordering::SeqCst);
        let closed = join_all(
            self.lifecycle
                .iter()
                .map(|(name, lock)| self.shutdown_provider(name, lock)),
        )
        .await;
        info!(
            providers = closed.into_iter().filter(|c| *c).count(),
            "tool providers shut down"
        );
    }

    async fn shutdown_provider(&self, provider: &str, lock: &Mutex<()>) -> bool {
        let _guard = lock.lock().await;
        let entry = self.active.write().await.remove(provider);
        match entry {
            Some(entry) => {
                entry.session.shutdown().await;
                true
            }
            None => false,
        }
    }
}
