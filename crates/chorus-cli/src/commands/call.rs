use super::{load_config, start_registry};
use anyhow::{bail, Context, Result};
use chorus::tools::ResolvedToolCall;
use chorus::ToolExecutor;
use serde_json::Value;
use std::path::Path;

fn parse_arguments(raw: &str) -> Result<Value> {
    let arguments: Value =
        serde_json::from_str(raw).context("arguments must be valid JSON")?;
    if !arguments.is_object() {
        bail!("arguments must be a JSON object");
    }
    Ok(arguments)
}

pub async fn handle_call(config_path: Option<&Path>, tool: &str, raw_arguments: &str) -> Result<()> {
    let arguments = parse_arguments(raw_arguments)?;
    let config = load_config(config_path)?;
    let registry = start_registry(&config).await;

    let executor = ToolExecutor::new(registry.clone(), config.agent.tool_call_timeout());
    let result = executor
        .execute(&ResolvedToolCall {
            id: "cli".to_string(),
            name: tool.to_string(),
            arguments,
        })
        .await;
    registry.shutdown().await;

    println!("{}", result.to_message_content());
    if let Err(error) = result.outcome {
        bail!("tool call failed: {}", error);
    }
    Ok(())
}
