use super::errors::ModelError;
use super::schema::{SchemaDialect, ToolCatalog};
use crate::conversation::Message;
use async_trait::async_trait;
use futures::stream::BoxStream;

/// One increment of a model response.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelChunk {
    Text(String),
    ToolCallDelta(ToolCallDelta),
}

/// A fragment of one tool call. Fragments sharing an `index` belong to the same
/// call and arrive in order; any field may be missing from any fragment.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolCallDelta {
    pub index: usize,
    pub id: Option<String>,
    pub name: Option<String>,
    pub arguments: Option<String>,
}

impl ModelChunk {
    pub fn text(text: impl Into<String>) -> Self {
        ModelChunk::Text(text.into())
    }

    pub fn tool_call(
        index: usize,
        id: Option<&str>,
        name: Option<&str>,
        arguments: Option<&str>,
    ) -> Self {
        ModelChunk::ToolCallDelta(ToolCallDelta {
            index,
            id: id.map(str::to_string),
            name: name.map(str::to_string),
            arguments: arguments.map(str::to_string),
        })
    }
}

pub type ModelStream = BoxStream<'static, Result<ModelChunk, ModelError>>;

/// Everything needed to request the next model turn.
#[derive(Clone, Copy)]
pub struct TurnRequest<'a> {
    pub system: &'a str,
    pub messages: &'a [Message],
    /// `None` means a tool-free turn.
    pub tools: Option<&'a ToolCatalog>,
    /// Catalog that named the tools already in history. Only consulted when
    /// `tools` is `None`.
    pub history_names: Option<&'a ToolCatalog>,
}

impl<'a> TurnRequest<'a> {
    /// The catalog to use when naming tools in history.
    pub fn tool_names(&self) -> Option<&'a ToolCatalog> {
        self.tools.or(self.history_names)
    }
}

/// Boundary to a streaming conversational model
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Whether the model can call functions at all
    fn supports_tools(&self) -> bool;

    /// How tools must be shaped for this model
    fn dialect(&self) -> &dyn SchemaDialect;

    /// Start a turn. Errors that happen before any output (including a rejected
    /// tool catalog) are returned here; later ones arrive on the stream.
    async fn stream(&self, request: TurnRequest<'_>) -> Result<ModelStream, ModelError>;
}
