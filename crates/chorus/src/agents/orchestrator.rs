use super::aggregator::{AggregatedCall, StreamAggregator};
use super::executor::ToolExecutor;
use crate::config::AgentSettings;
use crate::conversation::{ConversationState, Message, ToolCallRecord};
use crate::model::{ModelClient, ModelError, ModelStream, ToolCatalog, TurnRequest};
use crate::registry::ToolRegistry;
use crate::sink::OutputSink;
use crate::tools::{ResolvedToolCall, ToolResult};
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum OrchestratorError {
    #[error(transparent)]
    Model(#[from] ModelError),
}

/// Bounds how many tool rounds one user request may trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TurnBudget {
    max: usize,
    used: usize,
}

impl TurnBudget {
    pub fn new(max: usize) -> Self {
        Self { max, used: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.max.saturating_sub(self.used)
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining() == 0
    }

    pub fn consume(&mut self) {
        self.used = self.used.saturating_add(1);
    }

    pub fn reset(&mut self) {
        self.used = 0;
    }
}

/// What happened while answering one user request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReplyOutcome {
    /// All text streamed to the sink, across every turn
    pub text: String,
    pub model_calls: usize,
    pub tool_rounds: usize,
    pub tool_results: Vec<ToolResult>,
    pub cancelled: bool,
    /// The final turn was forced tool-free because the budget ran out
    pub budget_exhausted: bool,
}

/// The result of reading one model stream to its end.
enum StreamEnd {
    Finished(StreamAggregator),
    Cancelled(StreamAggregator),
    Failed(StreamAggregator, ModelError),
}

/// Drives one conversation. Owns its history; shares the model client and the
/// tool registry with every other conversation.
pub struct TurnOrchestrator {
    model: Arc<dyn ModelClient>,
    registry: Arc<ToolRegistry>,
    executor: ToolExecutor,
    settings: AgentSettings,
    state: ConversationState,
    /// The catalog most recently offered, for naming tools in history on
    /// tool-free turns
    last_catalog: Option<ToolCatalog>,
}

impl TurnOrchestrator {
    pub fn new(
        model: Arc<dyn ModelClient>,
        registry: Arc<ToolRegistry>,
        settings: AgentSettings,
    ) -> Self {
        let executor = ToolExecutor::new(registry.clone(), settings.tool_call_timeout());
        Self {
            model,
            registry,
            executor,
            settings,
            state: ConversationState::new(),
            last_catalog: None,
        }
    }

    pub fn history(&self) -> &[Message] {
        self.state.messages()
    }

    pub fn reset(&mut self) {
        self.state.clear();
        self.last_catalog = None;
    }

    /// Answers one user message, running as many tool rounds as the budget allows
    /// and always finishing with a turn that produces text.
    #[instrument(skip_all)]
    pub async fn respond(
        &mut self,
        user_text: &str,
        sink: &dyn OutputSink,
        cancel: &CancellationToken,
    ) -> Result<ReplyOutcome, OrchestratorError> {
        self.state.push(Message::user(user_text));

        let mut budget = TurnBudget::new(self.settings.max_tool_turns);
        let mut outcome = ReplyOutcome::default();
        let mut tools_enabled = self.model.supports_tools();
        if !tools_enabled {
            debug!("model does not support tools, running a plain conversation");
        }

        loop {
            let catalog = if tools_enabled && !budget.is_exhausted() {
                let catalog = self.registry.catalog(self.model.dialect()).await;
                (!catalog.is_empty()).then_some(catalog)
            } else {
                if tools_enabled && outcome.tool_rounds > 0 {
                    info!(rounds = outcome.tool_rounds, "tool budget exhausted, requesting a final answer");
                    outcome.budget_exhausted = true;
                }
                None
            };

            let opened = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                opened = self.open_turn(catalog, &mut tools_enabled, &mut outcome.model_calls) => Some(opened),
            };
            let (stream, offered) = match opened {
                None => {
                    outcome.cancelled = true;
                    return Ok(outcome);
                }
                Some(opened) => opened?,
            };
            if offered.is_some() {
                self.last_catalog = offered.clone();
            }

            let turn = self.state.next_turn();
            let aggregator = match read_stream(stream, StreamAggregator::new(turn), sink, cancel).await {
                StreamEnd::Finished(aggregator) => aggregator,
                StreamEnd::Cancelled(aggregator) => {
                    let text = aggregator.cancel();
                    outcome.text.push_str(&text);
                    self.push_assistant(Message::assistant().with_text(text));
                    outcome.cancelled = true;
                    return Ok(outcome);
                }
                StreamEnd::Failed(aggregator, error) => {
                    self.push_assistant(Message::assistant().with_text(aggregator.cancel()));
                    return Err(error.into());
                }
            };

            let mut used_ids = self.state.used_call_ids().clone();
            let (text, calls) = aggregator.finish(&mut used_ids);
            outcome.text.push_str(&text);

            let calls: Vec<AggregatedCall> = match &offered {
                Some(catalog) => calls
                    .into_iter()
                    .map(|call| match catalog.namespaced_name(call.name()) {
                        Some(name) => call.rename(name.to_string()),
                        None => call,
                    })
                    .collect(),
                None => {
                    if !calls.is_empty() {
                        warn!(count = calls.len(), "discarding tool calls from a tool-free turn");
                    }
                    Vec::new()
                }
            };

            if calls.is_empty() {
                self.push_assistant(Message::assistant().with_text(text));
                break;
            }

            let results = self.run_calls(&calls, cancel).await;
            let by_id: HashMap<&str, &ToolResult> =
                results.iter().map(|r| (r.call_id.as_str(), r)).collect();

            // Only calls with a result are recorded, so history never holds an
            // unanswered call
            let mut assistant = Message::assistant().with_text(text);
            for call in calls.iter().filter(|c| by_id.contains_key(c.id())) {
                assistant = assistant.with_tool_request(record(call));
            }
            self.state.push(assistant);
            for result in &results {
                self.state.push(Message::tool(result.clone()));
            }
            outcome.tool_results.extend(results);

            if cancel.is_cancelled() {
                outcome.cancelled = true;
                return Ok(outcome);
            }

            outcome.tool_rounds += 1;
            budget.consume();
            debug!(remaining = budget.remaining(), "tool round complete");
        }

        Ok(outcome)
    }

    fn turn_request<'a>(&'a self, tools: Option<&'a ToolCatalog>) -> TurnRequest<'a> {
        TurnRequest {
            system: &self.settings.system_prompt,
            messages: self.state.messages(),
            tools,
            history_names: self.last_catalog.as_ref(),
        }
    }

    /// Starts a model turn. If the endpoint refuses the tool catalog the same turn
    /// is retried once without tools, and tools stay off for this request.
    async fn open_turn(
        &self,
        catalog: Option<ToolCatalog>,
        tools_enabled: &mut bool,
        model_calls: &mut usize,
    ) -> Result<(ModelStream, Option<ToolCatalog>), ModelError> {
        *model_calls += 1;
        match self.model.stream(self.turn_request(catalog.as_ref())).await {
            Ok(stream) => Ok((stream, catalog)),
            Err(e) if e.is_tool_rejection() && catalog.is_some() => {
                warn!("model rejected the tool catalog, retrying without tools: {}", e);
                *tools_enabled = false;
                *model_calls += 1;
                let stream = self.model.stream(self.turn_request(None)).await?;
                Ok((stream, None))
            }
            Err(e) => Err(e),
        }
    }

    /// Executes well-formed calls and answers malformed ones with their parse
    /// error. Results follow the order of `calls`.
    async fn run_calls(
        &self,
        calls: &[AggregatedCall],
        cancel: &CancellationToken,
    ) -> Vec<ToolResult> {
        let ready: Vec<ResolvedToolCall> = calls
            .iter()
            .filter_map(|call| match call {
                AggregatedCall::Ready(call) => Some(call.clone()),
                AggregatedCall::Invalid { .. } => None,
            })
            .collect();

        let mut executed: HashMap<String, ToolResult> = self
            .executor
            .execute_batch(&ready, cancel)
            .await
            .into_iter()
            .map(|r| (r.call_id.clone(), r))
            .collect();

        calls
            .iter()
            .filter_map(|call| match call {
                AggregatedCall::Ready(call) => executed.remove(&call.id),
                AggregatedCall::Invalid {
                    id, name, error, ..
                } => Some(ToolResult::failure(id.clone(), name.clone(), error.clone())),
            })
            .collect()
    }

    fn push_assistant(&mut self, message: Message) {
        if !message.is_empty() {
            self.state.push(message);
        }
    }
}

fn record(call: &AggregatedCall) -> ToolCallRecord {
    match call {
        AggregatedCall::Ready(call) => ToolCallRecord {
            id: call.id.clone(),
            name: call.name.clone(),
            arguments: call.arguments.to_string(),
        },
        AggregatedCall::Invalid {
            id,
            name,
            raw_arguments,
            ..
        } => ToolCallRecord {
            id: id.clone(),
            name: name.clone(),
            arguments: raw_arguments.clone(),
        },
    }
}

/// Single reader of one model stream: text goes to the sink as it arrives, tool
/// call fragments stay in the aggregator.
async fn read_stream(
    mut stream: ModelStream,
    mut aggregator: StreamAggregator,
    sink: &dyn OutputSink,
    cancel: &CancellationToken,
) -> StreamEnd {
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return StreamEnd::Cancelled(aggregator),
            next = stream.next() => match next {
                Some(Ok(chunk)) => {
                    if let Some(text) = aggregator.push(chunk) {
                        sink.push(&text).await;
                    }
                }
                Some(Err(error)) => return StreamEnd::Failed(aggregator, error),
                None => return StreamEnd::Finished(aggregator),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::{MessageContent, Role};
    use crate::model::mock::{MockModel, MockTurn};
    use crate::model::schema::OpenAiDialect;
    use crate::model::ModelChunk;
    use crate::providers::session::tests::{config, CallBehavior, FakeFactory, FakeProvider};
    use crate::sink::BufferSink;
    use crate::tools::ToolErrorKind;
    use std::time::Duration;

    async fn registry(fakes: Vec<(&str, FakeProvider)>) -> Arc<ToolRegistry> {
        let configs = fakes.iter().map(|(name, _)| config(name)).collect();
        let factory = FakeFactory(
            fakes
                .into_iter()
                .map(|(name, fake)| (name.to_string(), fake))
                .collect(),
        );
        let registry = Arc::new(ToolRegistry::with_factory(configs, Arc::new(factory)));
        registry.connect_all().await;
        registry
    }

    async fn default_registry() -> Arc<ToolRegistry> {
        registry(vec![
            ("files", FakeProvider::new(vec!["read"])),
            ("search", FakeProvider::new(vec!["query"])),
        ])
        .await
    }

    fn settings(max_tool_turns: usize) -> AgentSettings {
        AgentSettings {
            system_prompt: "You are helpful.".to_string(),
            max_tool_turns,
            tool_call_timeout_secs: 30,
        }
    }

    fn text(t: &str) -> ModelChunk {
        ModelChunk::text(t)
    }

    fn call(index: usize, id: &str, name: &str, args: &str) -> ModelChunk {
        ModelChunk::tool_call(index, Some(id), Some(name), Some(args))
    }

    fn orchestrator(model: &Arc<MockModel>, registry: Arc<ToolRegistry>, max: usize) -> TurnOrchestrator {
        TurnOrchestrator::new(model.clone(), registry, settings(max))
    }

    #[tokio::test]
    async fn test_plain_answer_uses_one_model_call() {
        let model = Arc::new(MockModel::new(vec![MockTurn::Chunks(vec![
            text("Hello"),
            text(" there"),
        ])]));
        let mut agent = orchestrator(&model, default_registry().await, 5);
        let sink = BufferSink::new();

        let outcome = agent
            .respond("hi", &sink, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.model_calls, 1);
        assert_eq!(outcome.tool_rounds, 0);
        assert_eq!(outcome.text, "Hello there");
        assert_eq!(sink.fragments().await, vec!["Hello", " there"]);

        let history = agent.history();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].role, Role::Assistant);
        assert_eq!(history[1].text(), "Hello there");

        let requests = model.requests().await;
        assert_eq!(requests[0].system, "You are helpful.");
        assert_eq!(
            requests[0].tools,
            Some(vec!["files.read".to_string(), "search.query".to_string()])
        );
    }

    #[tokio::test]
    async fn test_tool_round_feeds_results_back() {
        let model = Arc::new(MockModel::new(vec![
            MockTurn::Chunks(vec![
                text("Let me look."),
                call(0, "call_a", "search.query", "{\"q\":"),
                ModelChunk::tool_call(0, None, None, Some("\"weather Tokyo\"}")),
            ]),
            MockTurn::Chunks(vec![text("It is sunny.")]),
        ]));
        let mut agent = orchestrator(&model, default_registry().await, 5);
        let sink = BufferSink::new();

        let outcome = agent
            .respond("weather?", &sink, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.model_calls, 2);
        assert_eq!(outcome.tool_rounds, 1);
        assert_eq!(outcome.text, "Let me look.It is sunny.");
        // Only natural language reaches the user
        assert_eq!(sink.text().await, "Let me look.It is sunny.");

        let roles: Vec<Role> = agent.history().iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            vec![Role::User, Role::Assistant, Role::Tool, Role::Assistant]
        );
        let request = agent.history()[1].tool_requests().next().unwrap().clone();
        assert_eq!(request.id, "call_a");
        assert_eq!(request.name, "search.query");

        let second = &model.requests().await[1];
        let fed_back = second.messages.last().unwrap().tool_responses().next().unwrap();
        assert_eq!(fed_back.call_id, "call_a");
        assert_eq!(
            fed_back.outcome,
            Ok(r#"query {"q":"weather Tokyo"}"#.to_string())
        );
    }

    #[tokio::test]
    async fn test_wire_names_map_back_to_namespaced_tools() {
        let model = Arc::new(
            MockModel::new(vec![
                MockTurn::Chunks(vec![call(0, "call_w", "search__query", r#"{"q":"rain"}"#)]),
                MockTurn::Chunks(vec![text("Rainy.")]),
            ])
            .with_dialect(Box::new(OpenAiDialect)),
        );
        let mut agent = orchestrator(&model, default_registry().await, 5);

        let outcome = agent
            .respond("rain?", &BufferSink::new(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.tool_rounds, 1);
        let offered = model.requests().await[0].tools.clone().unwrap();
        assert_eq!(offered, vec!["files__read", "search__query"]);

        let request = agent.history()[1].tool_requests().next().unwrap().clone();
        assert_eq!(request.name, "search.query");
        assert_eq!(outcome.tool_results[0].outcome, Ok(r#"query {"q":"rain"}"#.to_string()));
    }

    #[tokio::test]
    async fn test_budget_exhaustion_forces_final_tool_free_turn() {
        let model = Arc::new(MockModel::new(vec![
            MockTurn::Chunks(vec![call(0, "c1", "files.read", "{}")]),
            MockTurn::Chunks(vec![call(0, "c2", "files.read", "{}")]),
            // Tool-free turn; the stray call is ignored
            MockTurn::Chunks(vec![text("Here is what I found."), call(0, "c3", "files.read", "{}")]),
        ]));
        let mut agent = orchestrator(&model, default_registry().await, 2);

        let outcome = agent
            .respond("read everything", &BufferSink::new(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.model_calls, 3);
        assert_eq!(outcome.tool_rounds, 2);
        assert!(outcome.budget_exhausted);
        assert_eq!(outcome.text, "Here is what I found.");

        let requests = model.requests().await;
        assert!(requests[0].tools.is_some());
        assert!(requests[1].tools.is_some());
        assert_eq!(requests[2].tools, None);
        // History still names tools the way they were offered
        assert_eq!(requests[2].history_names, requests[1].tools);

        let last = agent.history().last().unwrap();
        assert_eq!(last.role, Role::Assistant);
        assert_eq!(last.tool_requests().count(), 0);
    }

    #[tokio::test]
    async fn test_tool_rejection_retries_once_without_tools() {
        let model = Arc::new(MockModel::new(vec![
            MockTurn::Reject(ModelError::ToolsUnsupported("tools not supported".into())),
            MockTurn::Chunks(vec![text("Plain answer")]),
        ]));
        let mut agent = orchestrator(&model, default_registry().await, 5);

        let outcome = agent
            .respond("hi", &BufferSink::new(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.model_calls, 2);
        assert_eq!(outcome.text, "Plain answer");
        let requests = model.requests().await;
        assert!(requests[0].tools.is_some());
        assert_eq!(requests[1].tools, None);
    }

    #[tokio::test]
    async fn test_other_model_errors_are_surfaced() {
        let model = Arc::new(MockModel::new(vec![MockTurn::Reject(
            ModelError::Authentication("bad key".into()),
        )]));
        let mut agent = orchestrator(&model, default_registry().await, 5);

        let result = agent
            .respond("hi", &BufferSink::new(), &CancellationToken::new())
            .await;
        assert_eq!(
            result,
            Err(OrchestratorError::Model(ModelError::Authentication("bad key".into())))
        );
        assert_eq!(model.requests().await.len(), 1);
    }

    #[tokio::test]
    async fn test_model_without_tool_support_gets_no_catalog() {
        let model = Arc::new(
            MockModel::new(vec![MockTurn::Chunks(vec![text("ok")])]).without_tool_support(),
        );
        let mut agent = orchestrator(&model, default_registry().await, 5);

        agent
            .respond("hi", &BufferSink::new(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(model.requests().await[0].tools, None);
    }

    #[tokio::test]
    async fn test_empty_registry_means_tool_free_turns() {
        let model = Arc::new(MockModel::new(vec![MockTurn::Chunks(vec![text("ok")])]));
        let mut agent = orchestrator(&model, registry(vec![]).await, 5);

        let outcome = agent
            .respond("hi", &BufferSink::new(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(model.requests().await[0].tools, None);
        assert!(!outcome.budget_exhausted);
    }

    #[tokio::test]
    async fn test_unknown_and_malformed_calls_become_tool_errors() {
        let model = Arc::new(MockModel::new(vec![
            MockTurn::Chunks(vec![
                call(0, "c1", "search.nonexistent", "{}"),
                call(1, "c2", "files.read", "{\"path\": "),
            ]),
            MockTurn::Chunks(vec![text("Sorry about that.")]),
        ]));
        let mut agent = orchestrator(&model, default_registry().await, 5);

        let outcome = agent
            .respond("go", &BufferSink::new(), &CancellationToken::new())
            .await
            .unwrap();

        let kinds: Vec<Option<ToolErrorKind>> =
            outcome.tool_results.iter().map(ToolResult::error_kind).collect();
        assert_eq!(
            kinds,
            vec![Some(ToolErrorKind::NotFound), Some(ToolErrorKind::InvalidArguments)]
        );
        // The malformed call is recorded with its raw arguments
        let records: Vec<ToolCallRecord> = agent.history()[1].tool_requests().cloned().collect();
        assert_eq!(records[1].arguments, "{\"path\": ");
        assert_eq!(outcome.text, "Sorry about that.");
    }

    #[tokio::test]
    async fn test_call_ids_stay_unique_across_rounds() {
        let model = Arc::new(MockModel::new(vec![
            MockTurn::Chunks(vec![call(0, "call_0", "files.read", "{}")]),
            MockTurn::Chunks(vec![call(0, "call_0", "files.read", "{}")]),
            MockTurn::Chunks(vec![text("done")]),
        ]));
        let mut agent = orchestrator(&model, default_registry().await, 5);

        let outcome = agent
            .respond("go", &BufferSink::new(), &CancellationToken::new())
            .await
            .unwrap();
        let ids: Vec<&str> = outcome.tool_results.iter().map(|r| r.call_id.as_str()).collect();
        assert_eq!(ids, vec!["call_0", "call_0_2"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_stream_keeps_partial_text() {
        let model = Arc::new(MockModel::new(vec![MockTurn::Stall(vec![
            text("Partial"),
            call(0, "c1", "files.read", "{"),
        ])]));
        let mut agent = orchestrator(&model, default_registry().await, 5);
        let sink = BufferSink::new();

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let outcome = agent.respond("hi", &sink, &cancel).await.unwrap();
        assert!(outcome.cancelled);
        assert_eq!(outcome.text, "Partial");
        assert!(outcome.tool_results.is_empty());
        let last = agent.history().last().unwrap();
        assert_eq!(last.content, vec![MessageContent::Text("Partial".into())]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_tools_keeps_only_finished_calls() {
        let registry = registry(vec![
            ("files", FakeProvider::new(vec!["read"])),
            ("slow", FakeProvider::new(vec!["wait"]).with_call(CallBehavior::Hang)),
        ])
        .await;
        let model = Arc::new(MockModel::new(vec![MockTurn::Chunks(vec![
            call(0, "c1", "slow.wait", "{}"),
            call(1, "c2", "files.read", "{}"),
        ])]));
        let mut agent = orchestrator(&model, registry.clone(), 5);

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });

        let outcome = agent
            .respond("go", &BufferSink::new(), &cancel)
            .await
            .unwrap();
        assert!(outcome.cancelled);
        assert_eq!(model.requests().await.len(), 1);

        let history = agent.history();
        let records: Vec<&str> = history[1].tool_requests().map(|r| r.id.as_str()).collect();
        assert_eq!(records, vec!["c2"]);
        assert_eq!(history.len(), 3);

        // Shared provider sessions are untouched
        assert_eq!(registry.active_providers().await, vec!["files", "slow"]);
    }

    #[tokio::test]
    async fn test_stream_error_keeps_partial_text_and_surfaces() {
        let model = Arc::new(MockModel::new(vec![MockTurn::FailAfter(
            vec![text("Half an ans")],
            ModelError::Stream("connection reset".into()),
        )]));
        let mut agent = orchestrator(&model, default_registry().await, 5);

        let result = agent
            .respond("hi", &BufferSink::new(), &CancellationToken::new())
            .await;
        assert!(matches!(result, Err(OrchestratorError::Model(ModelError::Stream(_)))));
        assert_eq!(agent.history().last().unwrap().text(), "Half an ans");
    }

    #[tokio::test]
    async fn test_history_carries_across_requests_until_reset() {
        let model = Arc::new(MockModel::new(vec![
            MockTurn::Chunks(vec![text("one")]),
            MockTurn::Chunks(vec![text("two")]),
        ]));
        let mut agent = orchestrator(&model, default_registry().await, 5);
        let cancel = CancellationToken::new();

        agent.respond("first", &BufferSink::new(), &cancel).await.unwrap();
        agent.respond("second", &BufferSink::new(), &cancel).await.unwrap();
        assert_eq!(model.requests().await[1].messages.len(), 3);

        agent.reset();
        assert!(agent.history().is_empty());
    }

    #[test]
    fn test_turn_budget() {
        let mut budget = TurnBudget::new(2);
        assert_eq!(budget.remaining(), 2);
        budget.consume();
        budget.consume();
        assert!(budget.is_exhausted());
        budget.consume();
        assert_eq!(budget.remaining(), 0);
        budget.reset();
        assert!(!budget.is_exhausted());
        assert!(TurnBudget::new(0).is_exhausted());
    }
}
