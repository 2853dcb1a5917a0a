mod aggregator;
mod executor;
mod orchestrator;

pub use aggregator::{AggregatedCall, StreamAggregator};
pub use executor::ToolExecutor;
pub use orchestrator::{OrchestratorError, ReplyOutcome, TurnBudget, TurnOrchestrator};
