pub mod agents;
pub mod config;
pub mod conversation;
pub mod model;
pub mod providers;
pub mod registry;
pub mod sink;
pub mod tools;

pub use agents::{ReplyOutcome, ToolExecutor, TurnOrchestrator};
pub use config::ChorusConfig;
pub use registry::ToolRegistry;
