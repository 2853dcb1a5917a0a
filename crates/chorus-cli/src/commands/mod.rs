pub mod call;
pub mod chat;
pub mod tools;

use anyhow::Result;
use chorus::config::{default_config_path, ChorusConfig};
use chorus::ToolRegistry;
use console::style;
use std::path::Path;
use std::sync::Arc;

/// Loads the explicit config file, or the default one when it exists.
pub fn load_config(path: Option<&Path>) -> Result<ChorusConfig> {
    let default_path = default_config_path().filter(|p| p.exists());
    let path = path.or(default_path.as_deref());
    tracing::info!(config = ?path, "loading configuration");
    Ok(ChorusConfig::load(path)?)
}

/// Starts every enabled provider and reports the ones that did not come up.
pub async fn start_registry(config: &ChorusConfig) -> Arc<ToolRegistry> {
    let registry = Arc::new(ToolRegistry::new(config.providers.clone()));
    let report = registry.connect_all().await;
    for (name, error) in &report.failed {
        eprintln!(
            "{} provider {} is unavailable: {}",
            style("warning:").yellow().bold(),
            style(name).bold(),
            error
        );
    }
    registry
}
