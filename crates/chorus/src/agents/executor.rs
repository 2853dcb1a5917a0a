use crate::providers::ProviderError;
use crate::registry::{RegistryError, ToolRegistry};
use crate::tools::{ResolvedToolCall, ToolError, ToolErrorKind, ToolResult};
use futures::stream::{FuturesUnordered, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

/// Runs tool calls against the registry. Every call yields a result; failures are
/// converted into categorized errors rather than propagated.
pub struct ToolExecutor {
    registry: Arc<ToolRegistry>,
    call_timeout: Duration,
}

impl ToolExecutor {
    pub fn new(registry: Arc<ToolRegistry>, call_timeout: Duration) -> Self {
        Self {
            registry,
            call_timeout,
        }
    }

    #[instrument(skip(self, call), fields(tool = %call.name, call_id = %call.id))]
    pub async fn execute(&self, call: &ResolvedToolCall) -> ToolResult {
        let outcome = self.run(call).await;
        if let Err(error) = &outcome {
            warn!(category = %error.kind, "tool call failed: {}", error.message);
        } else {
            debug!("tool call succeeded");
        }
        ToolResult {
            call_id: call.id.clone(),
            name: call.name.clone(),
            outcome,
        }
    }

    async fn run(&self, call: &ResolvedToolCall) -> Result<String, ToolError> {
        let (session, tool) = self.registry.resolve(&call.name).await.map_err(|e| match e {
            RegistryError::UnknownTool(name) => {
                ToolError::not_found(format!("Tool '{}' is not available", name))
            }
            other => ToolError::classified(other.to_string()),
        })?;

        let result = tokio::time::timeout(
            self.call_timeout,
            session.invoke(&tool, call.arguments.clone()),
        )
        .await
        .map_err(|_| {
            ToolError::timeout(format!(
                "Tool '{}' did not respond within {}s",
                call.name,
                self.call_timeout.as_secs()
            ))
        })?
        .map_err(provider_error)?;

        let text = result.text();
        if result.is_error {
            Err(ToolError::classified(if text.is_empty() {
                format!("Tool '{}' reported an error", call.name)
            } else {
                text
            }))
        } else {
            Ok(text)
        }
    }

    /// Runs every call concurrently. Results come back in the order of `calls`,
    /// whatever order they finish in. If `cancel` fires, calls still running are
    /// abandoned and only finished results are returned, still in request order.
    pub async fn execute_batch(
        &self,
        calls: &[ResolvedToolCall],
        cancel: &CancellationToken,
    ) -> Vec<ToolResult> {
        let mut slots: Vec<Option<ToolResult>> = vec![None; calls.len()];
        let mut running: FuturesUnordered<_> = calls
            .iter()
            .enumerate()
            .map(|(index, call)| async move { (index, self.execute(call).await) })
            .collect();

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!(abandoned = running.len(), "tool batch cancelled");
                    break;
                }
                next = running.next() => match next {
                    Some((index, result)) => slots[index] = Some(result),
                    None => break,
                },
            }
        }

        slots.into_iter().flatten().collect()
    }
}

fn provider_error(error: ProviderError) -> ToolError {
    match error {
        ProviderError::Rpc { message, .. } => ToolError::classified(message),
        other => ToolError::new(ToolErrorKind::ProviderError, other.to_string()),
    }
}
