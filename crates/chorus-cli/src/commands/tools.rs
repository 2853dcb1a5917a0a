use super::{load_config, start_registry};
use anyhow::Result;
use chorus::tools::ToolDescriptor;
use console::style;
use std::path::Path;

fn summary(descriptor: &ToolDescriptor) -> &str {
    descriptor.description.lines().next().unwrap_or_default()
}

pub async fn handle_tools(config_path: Option<&Path>, schemas: bool) -> Result<()> {
    let config = load_config(config_path)?;
    let registry = start_registry(&config).await;

    let descriptors = registry.descriptors().await;
    if descriptors.is_empty() {
        println!("No tools available.");
    }

    let mut current_provider = None;
    for descriptor in &descriptors {
        if current_provider != Some(descriptor.provider.as_str()) {
            println!("{}", style(&descriptor.provider).cyan().bold());
            current_provider = Some(descriptor.provider.as_str());
        }
        println!("  {}  {}", style(&descriptor.name).bold(), style(summary(descriptor)).dim());
        if schemas {
            println!("{}", serde_json::to_string_pretty(&descriptor.input_schema)?);
        }
    }

    registry.shutdown().await;
    Ok(())
}
