use super::base::{ModelChunk, ModelClient, ModelStream, ToolCallDelta, TurnRequest};
use super::errors::ModelError;
use super::schema::{SchemaDialect, ToolCatalog};
use crate::config::ModelSettings;
use crate::conversation::{Message, MessageContent, Role};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, StatusCode};
use reqwest_eventsource::retry::Never;
use reqwest_eventsource::{Event, EventSource};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

/// Streaming client for any endpoint speaking the OpenAI chat-completions protocol.
pub struct OpenAiClient {
    client: Client,
    settings: ModelSettings,
    dialect: Box<dyn SchemaDialect>,
}

impl OpenAiClient {
    pub fn new(settings: ModelSettings) -> Result<Self, ModelError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| ModelError::RequestFailed(e.to_string()))?;
        let dialect = settings.dialect.build();
        Ok(Self {
            client,
            settings,
            dialect,
        })
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/chat/completions",
            self.settings.base_url.trim_end_matches('/')
        )
    }

    fn create_request(&self, request: &TurnRequest<'_>) -> Value {
        let mut payload = json!({
            "model": self.settings.model,
            "messages": format_messages(request.system, request.messages, request.tool_names(), self.dialect.as_ref()),
            "stream": true,
        });
        if let Some(temperature) = self.settings.temperature {
            payload["temperature"] = json!(temperature);
        }
        if let Some(catalog) = request.tools.filter(|c| !c.is_empty()) {
            payload["tools"] = format_tools(catalog);
            payload["tool_choice"] = json!("auto");
        }
        payload
    }
}

#[async_trait]
impl ModelClient for OpenAiClient {
    fn supports_tools(&self) -> bool {
        self.settings.supports_tools
    }

    fn dialect(&self) -> &dyn SchemaDialect {
        self.dialect.as_ref()
    }

    async fn stream(&self, request: TurnRequest<'_>) -> Result<ModelStream, ModelError> {
        let payload = self.create_request(&request);
        let tools_offered = payload.get("tools").is_some();
        debug!(model = %self.settings.model, tools_offered, "requesting model turn");

        let mut builder = self.client.post(self.endpoint()).json(&payload);
        if let Some(key) = &self.settings.api_key {
            builder = builder.bearer_auth(key);
        }

        let mut events =
            EventSource::new(builder).map_err(|e| ModelError::RequestFailed(e.to_string()))?;
        events.set_retry_policy(Box::new(Never));

        // Failures before the stream opens are reported from here, not on the stream
        let timeout = Duration::from_secs(self.settings.request_timeout_secs);
        let opened = tokio::time::timeout(timeout, events.next())
            .await
            .map_err(|_| ModelError::RequestFailed(format!("no response after {:?}", timeout)))?;
        match opened {
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                events.close();
                return Err(open_error(e, tools_offered).await);
            }
            None => {
                return Err(ModelError::RequestFailed(
                    "event stream ended before it opened".to_string(),
                ))
            }
        }

        let stream = async_stream::stream! {
            while let Some(event) = events.next().await {
                match event {
                    Ok(Event::Open) => continue,
                    Ok(Event::Message(message)) => {
                        if message.data.trim() == "[DONE]" {
                            break;
                        }
                        match decode_event(&message.data) {
                            Ok(chunks) => {
                                for chunk in chunks {
                                    yield Ok(chunk);
                                }
                            }
                            Err(e) => {
                                yield Err(e);
                                break;
                            }
                        }
                    }
                    // Some servers end without [DONE]
                    Err(reqwest_eventsource::Error::StreamEnded) => break,
                    Err(e) => {
                        yield Err(ModelError::Stream(e.to_string()));
                        break;
                    }
                }
            }
            events.close();
        };

        Ok(stream.boxed())
    }
}

async fn open_error(error: reqwest_eventsource::Error, tools_offered: bool) -> ModelError {
    match error {
        reqwest_eventsource::Error::InvalidStatusCode(status, response) => {
            let body = response.text().await.unwrap_or_default();
            status_to_model_error(status, &body, tools_offered)
        }
        other => ModelError::RequestFailed(other.to_string()),
    }
}

fn decode_event(data: &str) -> Result<Vec<ModelChunk>, ModelError> {
    let chunk: Value = serde_json::from_str(data)
        .map_err(|e| ModelError::Stream(format!("malformed chunk: {}", e)))?;
    parse_chunk(&chunk)
}

/// Maps a non-success status to a ModelError. A client error that mentions tools
/// or functions while tools were offered is treated as a rejected catalog.
pub fn status_to_model_error(status: StatusCode, body: &str, tools_offered: bool) -> ModelError {
    let lowered = body.to_lowercase();
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ModelError::Authentication(format!(
            "Authentication failed. Status: {}. Response: {}",
            status, body
        )),
        StatusCode::TOO_MANY_REQUESTS => {
            ModelError::RateLimitExceeded(format!("Status: {}. Response: {}", status, body))
        }
        s if s.is_server_error() => {
            ModelError::ServerError(format!("Status: {}. Response: {}", status, body))
        }
        StatusCode::BAD_REQUEST | StatusCode::NOT_FOUND | StatusCode::UNPROCESSABLE_ENTITY
            if tools_offered && (lowered.contains("tool") || lowered.contains("function")) =>
        {
            ModelError::ToolsUnsupported(body.to_string())
        }
        _ => ModelError::RequestFailed(format!(
            "Request failed with status: {}. Response: {}",
            status, body
        )),
    }
}

fn format_tools(catalog: &ToolCatalog) -> Value {
    Value::Array(
        catalog
            .functions()
            .iter()
            .map(|f| {
                json!({
                    "type": "function",
                    "function": {
                        "name": f.name,
                        "description": f.description,
                        "parameters": f.parameters,
                    }
                })
            })
            .collect(),
    )
}

/// Converts conversation history into chat-completions messages.
pub fn format_messages(
    system: &str,
    messages: &[Message],
    catalog: Option<&ToolCatalog>,
    dialect: &dyn SchemaDialect,
) -> Vec<Value> {
    let wire_name = |name: &str| {
        catalog
            .and_then(|c| c.wire_name(name))
            .map(str::to_string)
            .unwrap_or_else(|| dialect.function_name(name))
    };

    let mut out = Vec::with_capacity(messages.len() + 1);
    if !system.is_empty() {
        out.push(json!({"role": "system", "content": system}));
    }

    for message in messages {
        match message.role {
            Role::User => out.push(json!({"role": "user", "content": message.text()})),
            Role::Assistant => {
                let tool_calls: Vec<Value> = message
                    .tool_requests()
                    .map(|call| {
                        json!({
                            "id": call.id,
                            "type": "function",
                            "function": {
                                "name": wire_name(&call.name),
                                "arguments": call.arguments,
                            }
                        })
                    })
                    .collect();
                let text = message.text();
                let mut entry = json!({"role": "assistant"});
                entry["content"] = if text.is_empty() && !tool_calls.is_empty() {
                    Value::Null
                } else {
                    json!(text)
                };
                if !tool_calls.is_empty() {
                    entry["tool_calls"] = Value::Array(tool_calls);
                }
                out.push(entry);
            }
            Role::Tool => {
                for content in &message.content {
                    if let MessageContent::ToolResponse(result) = content {
                        out.push(json!({
                            "role": "tool",
                            "tool_call_id": result.call_id,
                            "name": wire_name(&result.name),
                            "content": result.to_message_content(),
                        }));
                    }
                }
            }
        }
    }
    out
}

/// Extracts text and tool-call fragments from one streamed completion chunk.
pub fn parse_chunk(chunk: &Value) -> Result<Vec<ModelChunk>, ModelError> {
    if let Some(error) = chunk.get("error") {
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| error.to_string());
        return Err(ModelError::Stream(message));
    }

    let mut out = Vec::new();
    let Some(delta) = chunk.pointer("/choices/0/delta") else {
        return Ok(out);
    };

    if let Some(text) = delta.get("content").and_then(Value::as_str) {
        if !text.is_empty() {
            out.push(ModelChunk::Text(text.to_string()));
        }
    }

    if let Some(calls) = delta.get("tool_calls").and_then(Value::as_array) {
        for (position, call) in calls.iter().enumerate() {
            let index = call
                .get("index")
                .and_then(Value::as_u64)
                .map(|i| i as usize)
                .unwrap_or(position);
            let field = |pointer: &str| {
                call.pointer(pointer)
                    .and_then(Value::as_str)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
            };
            out.push(ModelChunk::ToolCallDelta(ToolCallDelta {
                index,
                id: field("/id"),
                name: field("/function/name"),
                arguments: field("/function/arguments"),
            }));
        }
    }

    Ok(out)
}
