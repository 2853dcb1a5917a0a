pub mod base;
pub mod errors;
pub mod mock;
pub mod openai;
pub mod schema;

pub use base::{ModelChunk, ModelClient, ModelStream, ToolCallDelta, TurnRequest};
pub use errors::ModelError;
pub use schema::{DialectKind, SchemaDialect, ToolCatalog};
