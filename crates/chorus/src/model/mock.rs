use super::base::{ModelChunk, ModelClient, ModelStream, TurnRequest};
use super::errors::ModelError;
use super::schema::{PassthroughDialect, SchemaDialect, ToolCatalog};
use crate::conversation::Message;
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use std::collections::VecDeque;
use tokio::sync::Mutex;

/// One scripted model turn
pub enum MockTurn {
    /// Emit these chunks, then end the stream
    Chunks(Vec<ModelChunk>),
    /// Fail before producing any output
    Reject(ModelError),
    /// Emit these chunks, then fail
    FailAfter(Vec<ModelChunk>, ModelError),
    /// Emit these chunks, then never finish
    Stall(Vec<ModelChunk>),
}

/// What the mock was asked for on one turn.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub system: String,
    pub messages: Vec<Message>,
    /// Wire names of the offered tools, `None` for a tool-free turn
    pub tools: Option<Vec<String>>,
    /// Wire names available for naming tools in history
    pub history_names: Option<Vec<String>>,
}

/// A model that plays back scripted turns and records every request.
pub struct MockModel {
    turns: Mutex<VecDeque<MockTurn>>,
    requests: Mutex<Vec<RecordedRequest>>,
    supports_tools: bool,
    dialect: Box<dyn SchemaDialect>,
}

impl MockModel {
    pub fn new(turns: Vec<MockTurn>) -> Self {
        Self {
            turns: Mutex::new(turns.into()),
            requests: Mutex::new(Vec::new()),
            supports_tools: true,
            dialect: Box::new(PassthroughDialect),
        }
    }

    pub fn without_tool_support(mut self) -> Self {
        self.supports_tools = false;
        self
    }

    pub fn with_dialect(mut self, dialect: Box<dyn SchemaDialect>) -> Self {
        self.dialect = dialect;
        self
    }

    pub async fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().await.clone()
    }
}

fn wire_names(catalog: &ToolCatalog) -> Vec<String> {
    catalog.functions().iter().map(|f| f.name.clone()).collect()
}

#[async_trait]
impl ModelClient for MockModel {
    fn supports_tools(&self) -> bool {
        self.supports_tools
    }

    fn dialect(&self) -> &dyn SchemaDialect {
        self.dialect.as_ref()
    }

    async fn stream(&self, request: TurnRequest<'_>) -> Result<ModelStream, ModelError> {
        self.requests.lock().await.push(RecordedRequest {
            system: request.system.to_string(),
            messages: request.messages.to_vec(),
            tools: request.tools.map(wire_names),
            history_names: request.tool_names().map(wire_names),
        });

        let turn = self
            .turns
            .lock()
            .await
            .pop_front()
            .ok_or_else(|| ModelError::RequestFailed("no scripted turn left".to_string()))?;

        let stream = match turn {
            MockTurn::Chunks(chunks) => stream::iter(chunks.into_iter().map(Ok)).boxed(),
            MockTurn::Reject(error) => return Err(error),
            MockTurn::FailAfter(chunks, error) => stream::iter(chunks.into_iter().map(Ok))
                .chain(stream::once(async move { Err(error) }))
                .boxed(),
            MockTurn::Stall(chunks) => stream::iter(chunks.into_iter().map(Ok))
                .chain(stream::pending())
                .boxed(),
        };
        Ok(stream)
    }
}
