use crate::model::{ModelChunk, ToolCallDelta};
use crate::tools::{ResolvedToolCall, ToolError};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashSet};
use tracing::debug;

/// Fragments received so far for one stream index.
#[derive(Debug, Default, Clone)]
struct PendingToolCall {
    id: String,
    name: String,
    arguments: String,
}

/// A tool call reconstructed from a finished stream.
#[derive(Debug, Clone, PartialEq)]
pub enum AggregatedCall {
    Ready(ResolvedToolCall),
    /// Arguments could not be parsed; never executed, answered with the error instead
    Invalid {
        id: String,
        name: String,
        raw_arguments: String,
        error: ToolError,
    },
}

impl AggregatedCall {
    pub fn id(&self) -> &str {
        match self {
            AggregatedCall::Ready(call) => &call.id,
            AggregatedCall::Invalid { id, .. } => id,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            AggregatedCall::Ready(call) => &call.name,
            AggregatedCall::Invalid { name, .. } => name,
        }
    }

    pub fn rename(mut self, name: String) -> Self {
        match &mut self {
            AggregatedCall::Ready(call) => call.name = name,
            AggregatedCall::Invalid { name: current, .. } => *current = name,
        }
        self
    }
}

/// Splits one model response stream into text, forwarded as it arrives, and tool
/// calls, released only once the stream has finished. Does no I/O.
#[derive(Debug)]
pub struct StreamAggregator {
    turn: u64,
    text: String,
    pending: BTreeMap<usize, PendingToolCall>,
}

impl StreamAggregator {
    /// `turn` distinguishes synthetic ids minted on different turns.
    pub fn new(turn: u64) -> Self {
        Self {
            turn,
            text: String::new(),
            pending: BTreeMap::new(),
        }
    }

    /// Consumes one chunk; returns text that should go to the user right away.
    pub fn push(&mut self, chunk: ModelChunk) -> Option<String> {
        match chunk {
            ModelChunk::Text(text) if text.is_empty() => None,
            ModelChunk::Text(text) => {
                self.text.push_str(&text);
                Some(text)
            }
            ModelChunk::ToolCallDelta(delta) => {
                self.apply_delta(delta);
                None
            }
        }
    }

    fn apply_delta(&mut self, delta: ToolCallDelta) {
        let pending = self.pending.entry(delta.index).or_default();
        if let Some(id) = delta.id {
            pending.id.push_str(&id);
        }
        if let Some(name) = delta.name {
            pending.name.push_str(&name);
        }
        if let Some(arguments) = delta.arguments {
            pending.arguments.push_str(&arguments);
        }
    }

    /// Text received so far.
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn has_pending_calls(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Drops every partial call. Nothing from this stream will ever be executed.
    pub fn cancel(mut self) -> String {
        if !self.pending.is_empty() {
            debug!(discarded = self.pending.len(), "discarding partial tool calls");
        }
        self.pending.clear();
        self.text
    }

    /// Resolves every pending call in stream-index order. Calls without a name are
    /// dropped. Ids already present in `used_ids` are never handed out again, and
    /// every id returned is added to it.
    pub fn finish(self, used_ids: &mut HashSet<String>) -> (String, Vec<AggregatedCall>) {
        let mut calls = Vec::with_capacity(self.pending.len());

        for (index, pending) in self.pending {
            let name = pending.name.trim().to_string();
            if name.is_empty() {
                debug!(index, "dropping tool call without a name");
                continue;
            }

            let base = if pending.id.trim().is_empty() {
                synthetic_id(self.turn, index, &name)
            } else {
                pending.id.trim().to_string()
            };
            let id = unique_id(base, used_ids);

            calls.push(match parse_arguments(&pending.arguments) {
                Ok(arguments) => AggregatedCall::Ready(ResolvedToolCall {
                    id,
                    name,
                    arguments,
                }),
                Err(error) => AggregatedCall::Invalid {
                    id,
                    name,
                    raw_arguments: pending.arguments,
                    error,
                },
            });
        }

        (self.text, calls)
    }
}

fn synthetic_id(turn: u64, index: usize, name: &str) -> String {
    let name: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    format!("call_{}_{}_{}", turn, index, name)
}

fn unique_id(base: String, used_ids: &mut HashSet<String>) -> String {
    let mut id = base.clone();
    let mut n = 2;
    while used_ids.contains(&id) {
        id = format!("{}_{}", base, n);
        n += 1;
    }
    used_ids.insert(id.clone());
    id
}

/// Empty arguments mean "no arguments"; anything else must be a JSON object.
fn parse_arguments(raw: &str) -> Result<Value, ToolError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(Value::Object(Map::new()));
    }
    match serde_json::from_str::<Value>(trimmed) {
        Ok(Value::Object(map)) => Ok(Value::Object(map)),
        Ok(Value::Null) => Ok(Value::Object(Map::new())),
        Ok(other) => Err(ToolError::invalid_arguments(format!(
            "tool arguments must be a JSON object, got: {}",
            other
        ))),
        Err(e) => Err(ToolError::invalid_arguments(format!(
            "could not parse tool arguments: {}",
            e
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::ToolErrorKind;
    use serde_json::json;

    fn delta(index: usize, id: Option<&str>, name: Option<&str>, args: Option<&str>) -> ModelChunk {
        ModelChunk::tool_call(index, id, name, args)
    }

    fn finish(aggregator: StreamAggregator) -> Vec<AggregatedCall> {
        aggregator.finish(&mut HashSet::new()).1
    }

    #[test]
    fn test_fragments_across_chunks_resolve_to_one_call() {
        let mut aggregator = StreamAggregator::new(1);
        aggregator.push(delta(0, Some("call_x"), Some("search.query"), Some("{\"q\":")));
        aggregator.push(delta(0, None, None, Some("\"weather ")));
        aggregator.push(delta(0, None, None, Some("Tokyo\"}")));

        assert_eq!(
            finish(aggregator),
            vec![AggregatedCall::Ready(ResolvedToolCall {
                id: "call_x".into(),
                name: "search.query".into(),
                arguments: json!({"q": "weather Tokyo"}),
            })]
        );
    }

    #[test]
    fn test_every_split_produces_the_same_call() {
        let id = "call_abc";
        let name = "files.read";
        let args = r#"{"path":"/tmp/notes.txt","lines":[1,2,3]}"#;

        let non_empty = |s: &'static str| Some(s).filter(|s| !s.is_empty());

        let mut expected = None;
        // Split each field at every possible point
        for cut in 0..=args.len() {
            let (id_head, id_tail) = id.split_at(cut.min(id.len()));
            let (name_head, name_tail) = name.split_at(cut.min(name.len()));
            let (args_head, args_tail) = args.split_at(cut);

            let mut aggregator = StreamAggregator::new(1);
            aggregator.push(delta(0, non_empty(id_head), non_empty(name_head), Some(args_head)));
            aggregator.push(ModelChunk::text("thinking"));
            aggregator.push(delta(0, non_empty(id_tail), non_empty(name_tail), Some(args_tail)));

            let calls = finish(aggregator);
            match &expected {
                None => expected = Some(calls),
                Some(first) => assert_eq!(&calls, first, "split at {}", cut),
            }
        }
        let calls = expected.unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].id(), id);
        assert_eq!(calls[0].name(), name);
    }

    #[test]
    fn test_repeated_prefixes_are_concatenated() {
        let whole = {
            let mut aggregator = StreamAggregator::new(1);
            aggregator.push(delta(0, Some("call_call_1"), Some("ab.ab.ab.ab"), Some("{}")));
            finish(aggregator)
        };

        let mut aggregator = StreamAggregator::new(1);
        aggregator.push(delta(0, Some("call_"), Some("ab.ab."), None));
        aggregator.push(delta(0, Some("call_1"), Some("ab.ab"), Some("{}")));
        let split = finish(aggregator);

        assert_eq!(split, whole);
        assert_eq!(split[0].id(), "call_call_1");
        assert_eq!(split[0].name(), "ab.ab.ab.ab");
    }

    #[test]
    fn test_text_is_forwarded_immediately() {
        let mut aggregator = StreamAggregator::new(1);
        assert_eq!(aggregator.push(ModelChunk::text("Hel")), Some("Hel".to_string()));
        assert_eq!(aggregator.push(delta(0, None, Some("a.b"), None)), None);
        assert_eq!(aggregator.push(ModelChunk::text("lo")), Some("lo".to_string()));
        assert_eq!(aggregator.push(ModelChunk::text("")), None);
        assert_eq!(aggregator.text(), "Hello");
    }

    #[test]
    fn test_interleaved_indices_stay_separate() {
        let mut aggregator = StreamAggregator::new(1);
        aggregator.push(delta(1, Some("b"), Some("search.query"), Some("{\"q\":")));
        aggregator.push(delta(0, Some("a"), Some("files.read"), Some("{}")));
        aggregator.push(delta(1, None, None, Some("\"x\"}")));

        let calls = finish(aggregator);
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].name(), "files.read");
        assert_eq!(calls[1].name(), "search.query");
        assert!(matches!(&calls[1], AggregatedCall::Ready(c) if c.arguments == json!({"q": "x"})));
    }

    #[test]
    fn test_missing_id_gets_deterministic_synthetic_id() {
        let mut aggregator = StreamAggregator::new(3);
        aggregator.push(delta(2, None, Some("search.query"), Some("{}")));
        let calls = finish(aggregator);
        assert_eq!(calls[0].id(), "call_3_2_search_query");
    }

    #[test]
    fn test_ids_are_unique_across_turns() {
        let mut used = HashSet::new();

        let mut first = StreamAggregator::new(1);
        first.push(delta(0, Some("call_0"), Some("a.b"), None));
        let (_, first_calls) = first.finish(&mut used);

        // The model reuses an id it already used on an earlier turn
        let mut second = StreamAggregator::new(2);
        second.push(delta(0, Some("call_0"), Some("a.b"), None));
        let (_, second_calls) = second.finish(&mut used);

        assert_eq!(first_calls[0].id(), "call_0");
        assert_eq!(second_calls[0].id(), "call_0_2");
    }

    #[test]
    fn test_nameless_calls_are_dropped() {
        let mut aggregator = StreamAggregator::new(1);
        aggregator.push(delta(0, Some("call_1"), None, Some("{\"x\":1}")));
        aggregator.push(delta(1, None, Some("files.read"), None));
        let calls = finish(aggregator);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name(), "files.read");
    }

    #[test]
    fn test_empty_arguments_become_empty_object() {
        let mut aggregator = StreamAggregator::new(1);
        aggregator.push(delta(0, Some("c"), Some("clock.now"), None));
        assert!(matches!(&finish(aggregator)[0], AggregatedCall::Ready(c) if c.arguments == json!({})));
    }

    #[test]
    fn test_unparsable_arguments_become_tool_error() {
        let mut aggregator = StreamAggregator::new(1);
        aggregator.push(delta(0, Some("c"), Some("files.read"), Some("{\"path\": ")));
        match &finish(aggregator)[0] {
            AggregatedCall::Invalid {
                raw_arguments,
                error,
                ..
            } => {
                assert_eq!(raw_arguments, "{\"path\": ");
                assert_eq!(error.kind, ToolErrorKind::InvalidArguments);
            }
            other => panic!("expected invalid call, got {:?}", other),
        }

        let mut aggregator = StreamAggregator::new(1);
        aggregator.push(delta(0, Some("c"), Some("files.read"), Some("[1, 2]")));
        assert!(matches!(&finish(aggregator)[0], AggregatedCall::Invalid { .. }));
    }

    #[test]
    fn test_cancel_discards_pending_calls() {
        let mut aggregator = StreamAggregator::new(1);
        aggregator.push(ModelChunk::text("Looking"));
        aggregator.push(delta(0, Some("c"), Some("files.read"), Some("{")));
        assert!(aggregator.has_pending_calls());
        assert_eq!(aggregator.cancel(), "Looking");
    }
}
