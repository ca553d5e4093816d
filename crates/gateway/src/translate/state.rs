//! Shared accumulation state driven by upstream Responses events.
//!
//! The state machine tolerates out-of-order start/delta/done sequences,
//! upstreams that repeat full values where deltas are expected, and bodies
//! that only reveal their content in the terminal `response.completed`
//! envelope. Emitters turn the returned [`StreamDelta`]s into dialect frames.

use std::collections::HashMap;

use serde_json::Value;

use crate::messages::responses::normalize_call_id;

use super::event::UpstreamEvent;

/// One assembled tool call.
#[derive(Debug, Clone)]
pub(crate) struct ToolCall {
    pub call_id: String,
    pub name: Option<String>,
    pub arguments: String,
}

impl ToolCall {
    /// Arguments are always a valid JSON string on output.
    pub fn final_arguments(&self) -> String {
        if self.arguments.is_empty() {
            "{}".to_string()
        } else {
            self.arguments.clone()
        }
    }
}

/// What one upstream event contributed, in emission order.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum StreamDelta {
    Started,
    Text(String),
    Reasoning(String),
    ToolCall {
        /// Stable per call id, first-seen wins.
        index: usize,
        /// First fragment for this call id.
        first: bool,
        call_id: String,
        /// Present only when newly learned.
        name: Option<String>,
        /// Newly visible argument bytes, if any.
        arguments: Option<String>,
    },
    Finished,
}

#[derive(Debug, Default)]
pub(crate) struct StreamState {
    pub response_id: Option<String>,
    pub model: Option<String>,
    pub created_at: Option<i64>,

    pub text: String,
    pub reasoning: String,
    reasoning_so_far: String,
    text_emitted: bool,

    calls: Vec<ToolCall>,
    index_by_call: HashMap<String, usize>,
    call_by_upstream_index: HashMap<u64, String>,

    pub usage: Option<Value>,
    /// Thought signatures observed on function-call items, as
    /// `(call_id, signature, thought)`.
    pub signatures: Vec<(String, String, Option<String>)>,
    length_hint: bool,
    pub failed: bool,
    finished: bool,
}

impl StreamState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tool_calls(&self) -> &[ToolCall] {
        &self.calls
    }

    pub fn finish_reason(&self) -> &'static str {
        if !self.calls.is_empty() {
            "tool_calls"
        } else if self.length_hint {
            "length"
        } else {
            "stop"
        }
    }

    pub fn apply(&mut self, event: &UpstreamEvent) -> Vec<StreamDelta> {
        if self.finished {
            return Vec::new();
        }

        match event.kind.as_str() {
            "response.created" => {
                if let Some(response) = event.response() {
                    self.capture_envelope(response);
                }
                vec![StreamDelta::Started]
            }

            "response.output_text.delta" | "response.refusal.delta" => {
                let Some(delta) = event.delta().or_else(|| event.text()) else {
                    return Vec::new();
                };

                self.text.push_str(delta);
                self.text_emitted = true;
                vec![StreamDelta::Text(delta.to_string())]
            }

            "response.output_text.done" | "response.refusal.done" => {
                if self.text_emitted {
                    // The deltas already covered it.
                    return Vec::new();
                }

                let Some(text) = event.text().filter(|t| !t.is_empty()) else {
                    return Vec::new();
                };

                self.text = text.to_string();
                self.text_emitted = true;
                vec![StreamDelta::Text(text.to_string())]
            }

            "response.reasoning.delta"
            | "response.reasoning_text.delta"
            | "response.reasoning_summary.delta"
            | "response.reasoning_summary_text.delta" => {
                let Some(chunk) = event.delta().or_else(|| event.text()) else {
                    return Vec::new();
                };

                match self.reconcile_reasoning(chunk) {
                    Some(emitted) => vec![StreamDelta::Reasoning(emitted)],
                    None => Vec::new(),
                }
            }

            "response.function_call_arguments.delta" => {
                let Some(call_id) = self.resolve_call_id(event) else {
                    return Vec::new();
                };

                let delta = event.delta().unwrap_or_default().to_string();
                self.upsert_delta(call_id, event.name(), delta)
            }

            "response.function_call_arguments.done" | "response.function_call.done" => {
                let Some(call_id) = self.resolve_call_id(event) else {
                    return Vec::new();
                };

                let arguments = event.arguments().or_else(|| event.delta()).unwrap_or_default();
                self.upsert_full(call_id, event.name(), arguments)
            }

            "response.output_item.added" | "response.output_item.done" => {
                let Some(item) = event.item() else {
                    return Vec::new();
                };

                if item.get("type").and_then(Value::as_str) != Some("function_call") {
                    return Vec::new();
                }

                let Some(call_id) = item_call_id(item) else {
                    return Vec::new();
                };

                if let Some(index) = event.output_index() {
                    self.call_by_upstream_index.insert(index, call_id.clone());
                }

                self.capture_signature(&call_id, item);

                let name = item.get("name").and_then(Value::as_str);
                let arguments = item.get("arguments").and_then(Value::as_str).unwrap_or_default();
                self.upsert_full(call_id, name, arguments)
            }

            "response.completed" => {
                self.finished = true;

                let mut deltas = match event.response() {
                    Some(response) => self.harvest(response),
                    None => Vec::new(),
                };

                deltas.push(StreamDelta::Finished);
                deltas
            }

            "response.failed" | "response.incomplete" | "error" => {
                log::warn!("Upstream stream ended with {}", event.kind);
                self.failed = event.kind != "response.incomplete";
                self.finished = true;

                if event.kind == "response.incomplete" {
                    self.length_hint = true;
                }

                vec![StreamDelta::Finished]
            }

            _ => Vec::new(),
        }
    }

    /// Force the terminal transition when the upstream ended without one.
    pub fn force_finish(&mut self) -> Vec<StreamDelta> {
        if self.finished {
            return Vec::new();
        }

        self.finished = true;
        vec![StreamDelta::Finished]
    }

    fn capture_envelope(&mut self, response: &Value) {
        if self.response_id.is_none() {
            self.response_id = response.get("id").and_then(Value::as_str).map(str::to_string);
        }
        if self.model.is_none() {
            self.model = response.get("model").and_then(Value::as_str).map(str::to_string);
        }
        if self.created_at.is_none() {
            self.created_at = response.get("created_at").and_then(Value::as_i64);
        }
    }

    /// Pull text, reasoning, and tool calls out of a complete response
    /// envelope when the stream never delivered them incrementally.
    fn harvest(&mut self, response: &Value) -> Vec<StreamDelta> {
        self.capture_envelope(response);

        if let Some(usage) = response.get("usage").filter(|u| !u.is_null()) {
            self.usage = Some(usage.clone());
        }

        if response.get("status").and_then(Value::as_str) == Some("incomplete")
            && response
                .pointer("/incomplete_details/reason")
                .and_then(Value::as_str)
                .is_some_and(|reason| reason.contains("max_output_tokens"))
        {
            self.length_hint = true;
        }

        let mut deltas = Vec::new();

        let Some(output) = response.get("output").and_then(Value::as_array) else {
            return deltas;
        };

        for item in output {
            match item.get("type").and_then(Value::as_str) {
                Some("message") => {
                    if self.text_emitted {
                        continue;
                    }

                    let text: String = item
                        .get("content")
                        .and_then(Value::as_array)
                        .map(|parts| {
                            parts
                                .iter()
                                .filter_map(|part| part.get("text").and_then(Value::as_str))
                                .collect()
                        })
                        .unwrap_or_default();

                    if !text.is_empty() {
                        self.text = text.clone();
                        self.text_emitted = true;
                        deltas.push(StreamDelta::Text(text));
                    }
                }
                Some("function_call") => {
                    let Some(call_id) = item_call_id(item) else {
                        continue;
                    };

                    self.capture_signature(&call_id, item);

                    let name = item.get("name").and_then(Value::as_str);
                    let arguments = item.get("arguments").and_then(Value::as_str).unwrap_or_default();
                    deltas.extend(self.upsert_full(call_id, name, arguments));
                }
                Some("reasoning") => {
                    if !self.reasoning.is_empty() {
                        continue;
                    }

                    let summary: String = item
                        .get("summary")
                        .and_then(Value::as_array)
                        .map(|parts| {
                            parts
                                .iter()
                                .filter_map(|part| part.get("text").and_then(Value::as_str))
                                .collect()
                        })
                        .unwrap_or_default();

                    if !summary.is_empty() {
                        self.reasoning = summary.clone();
                        self.reasoning_so_far = summary.clone();
                        deltas.push(StreamDelta::Reasoning(summary));
                    }
                }
                _ => {}
            }
        }

        deltas
    }

    /// Some upstreams send cumulative reasoning strings instead of deltas;
    /// emit only what is new either way.
    fn reconcile_reasoning(&mut self, chunk: &str) -> Option<String> {
        if chunk.is_empty() {
            return None;
        }

        if let Some(suffix) = chunk.strip_prefix(self.reasoning_so_far.as_str()) {
            // Cumulative value extending what we have.
            self.reasoning_so_far = chunk.to_string();

            if suffix.is_empty() {
                return None;
            }

            self.reasoning.push_str(suffix);
            return Some(suffix.to_string());
        }

        if self.reasoning_so_far.starts_with(chunk) {
            // Upstream restarted from the beginning.
            return None;
        }

        // Plain additive delta.
        self.reasoning_so_far.push_str(chunk);
        self.reasoning.push_str(chunk);
        Some(chunk.to_string())
    }

    fn capture_signature(&mut self, call_id: &str, item: &Value) {
        let Some(signature) = item.get("thought_signature").and_then(Value::as_str) else {
            return;
        };

        if signature.is_empty() || self.signatures.iter().any(|(existing, ..)| existing == call_id) {
            return;
        }

        let thought = item.get("thought").and_then(Value::as_str).map(str::to_string);
        self.signatures
            .push((call_id.to_string(), signature.to_string(), thought));
    }

    fn resolve_call_id(&mut self, event: &UpstreamEvent) -> Option<String> {
        if let Some(call_id) = event.call_id() {
            let call_id = normalize_call_id(call_id).to_string();

            if let Some(index) = event.output_index() {
                self.call_by_upstream_index.insert(index, call_id.clone());
            }

            return Some(call_id);
        }

        if let Some(index) = event.output_index()
            && let Some(call_id) = self.call_by_upstream_index.get(&index)
        {
            return Some(call_id.clone());
        }

        if let Some(item_id) = event.item_id() {
            return Some(normalize_call_id(item_id).to_string());
        }

        log::debug!("Tool-call event without any identity: {}", event.kind);
        None
    }

    fn ensure_call(&mut self, call_id: &str) -> (usize, bool) {
        if let Some(index) = self.index_by_call.get(call_id) {
            return (*index, false);
        }

        let index = self.calls.len();
        self.calls.push(ToolCall {
            call_id: call_id.to_string(),
            name: None,
            arguments: String::new(),
        });
        self.index_by_call.insert(call_id.to_string(), index);

        (index, true)
    }

    fn upsert_delta(&mut self, call_id: String, name: Option<&str>, delta: String) -> Vec<StreamDelta> {
        let (index, first) = self.ensure_call(&call_id);

        let name_delta = self.learn_name(index, name);
        self.calls[index].arguments.push_str(&delta);

        self.tool_delta(index, first, name_delta, (!delta.is_empty()).then_some(delta))
    }

    /// Full-value upsert with prefix-based deduplication: a full value that
    /// extends the assembled arguments contributes only the suffix; a
    /// conflicting value replaces silently.
    fn upsert_full(&mut self, call_id: String, name: Option<&str>, arguments: &str) -> Vec<StreamDelta> {
        let (index, first) = self.ensure_call(&call_id);
        let name_delta = self.learn_name(index, name);

        let current = self.calls[index].arguments.clone();

        let fragment = if let Some(suffix) = arguments.strip_prefix(current.as_str()) {
            self.calls[index].arguments = arguments.to_string();
            (!suffix.is_empty()).then(|| suffix.to_string())
        } else if !arguments.is_empty() {
            self.calls[index].arguments = arguments.to_string();
            None
        } else {
            None
        };

        self.tool_delta(index, first, name_delta, fragment)
    }

    fn learn_name(&mut self, index: usize, name: Option<&str>) -> Option<String> {
        let name = name.filter(|n| !n.is_empty())?;

        if self.calls[index].name.is_none() {
            self.calls[index].name = Some(name.to_string());
            return Some(name.to_string());
        }

        None
    }

    fn tool_delta(
        &self,
        index: usize,
        first: bool,
        name: Option<String>,
        arguments: Option<String>,
    ) -> Vec<StreamDelta> {
        if !first && name.is_none() && arguments.is_none() {
            return Vec::new();
        }

        vec![StreamDelta::ToolCall {
            index,
            first,
            call_id: self.calls[index].call_id.clone(),
            name,
            arguments,
        }]
    }
}

fn item_call_id(item: &Value) -> Option<String> {
    let raw = item
        .get("call_id")
        .or_else(|| item.get("id"))
        .and_then(Value::as_str)?;

    Some(normalize_call_id(raw).to_string())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::sse::SseEvent;
    use crate::translate::event::UpstreamEvent;

    use super::{StreamDelta, StreamState};

    fn event(data: serde_json::Value) -> UpstreamEvent {
        UpstreamEvent::from_sse(&SseEvent {
            event: String::new(),
            data: data.to_string(),
        })
        .unwrap()
    }

    #[test]
    fn accumulates_text_deltas() {
        let mut state = StreamState::new();

        state.apply(&event(json!({"type": "response.created", "response": {"id": "r_1", "model": "m"}})));
        state.apply(&event(json!({"type": "response.output_text.delta", "delta": "He"})));
        state.apply(&event(json!({"type": "response.output_text.delta", "delta": "llo"})));

        assert_eq!(state.text, "Hello");
        assert_eq!(state.response_id.as_deref(), Some("r_1"));
    }

    #[test]
    fn text_done_is_ignored_after_deltas() {
        let mut state = StreamState::new();

        state.apply(&event(json!({"type": "response.output_text.delta", "delta": "Hello"})));
        let deltas = state.apply(&event(json!({"type": "response.output_text.done", "text": "Hello"})));

        assert!(deltas.is_empty());
        assert_eq!(state.text, "Hello");
    }

    #[test]
    fn text_done_stands_alone_without_deltas() {
        let mut state = StreamState::new();

        let deltas = state.apply(&event(json!({"type": "response.output_text.done", "text": "Hello"})));

        assert_eq!(deltas, vec![StreamDelta::Text("Hello".into())]);
    }

    #[test]
    fn assembles_tool_call_from_interleaved_deltas_without_duplication() {
        let mut state = StreamState::new();

        state.apply(&event(json!({
            "type": "response.function_call_arguments.delta",
            "call_id": "c1", "name": "f", "delta": "{\"a\":",
        })));
        state.apply(&event(json!({
            "type": "response.function_call_arguments.delta",
            "call_id": "c1", "delta": "1}",
        })));

        // The done event repeats the already-assembled value.
        let deltas = state.apply(&event(json!({
            "type": "response.output_item.done",
            "item": {"type": "function_call", "call_id": "c1", "name": "f", "arguments": "{\"a\":1}"},
        })));

        assert!(deltas.is_empty(), "full value matching the prefix re-emits nothing");

        let calls = state.tool_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].call_id, "c1");
        assert_eq!(calls[0].name.as_deref(), Some("f"));
        assert_eq!(calls[0].arguments, "{\"a\":1}");
        assert_eq!(state.finish_reason(), "tool_calls");
    }

    #[test]
    fn full_value_extending_the_prefix_contributes_the_suffix() {
        let mut state = StreamState::new();

        state.apply(&event(json!({
            "type": "response.function_call_arguments.delta",
            "call_id": "c1", "delta": "{\"a\":",
        })));

        let deltas = state.apply(&event(json!({
            "type": "response.function_call_arguments.done",
            "call_id": "c1", "arguments": "{\"a\":1}",
        })));

        assert_eq!(
            deltas,
            vec![StreamDelta::ToolCall {
                index: 0,
                first: false,
                call_id: "c1".into(),
                name: None,
                arguments: Some("1}".into()),
            }]
        );
    }

    #[test]
    fn conflicting_full_value_replaces_silently() {
        let mut state = StreamState::new();

        state.apply(&event(json!({
            "type": "response.function_call_arguments.delta",
            "call_id": "c1", "delta": "{\"a\":1}",
        })));
        let deltas = state.apply(&event(json!({
            "type": "response.function_call_arguments.done",
            "call_id": "c1", "arguments": "{\"b\":2}",
        })));

        assert!(deltas.is_empty());
        assert_eq!(state.tool_calls()[0].arguments, "{\"b\":2}");
    }

    #[test]
    fn resolves_identity_through_output_index() {
        let mut state = StreamState::new();

        state.apply(&event(json!({
            "type": "response.output_item.added",
            "output_index": 3,
            "item": {"type": "function_call", "call_id": "c9", "name": "f"},
        })));
        state.apply(&event(json!({
            "type": "response.function_call_arguments.delta",
            "output_index": 3, "delta": "{}",
        })));

        assert_eq!(state.tool_calls().len(), 1);
        assert_eq!(state.tool_calls()[0].arguments, "{}");
    }

    #[test]
    fn strips_fc_prefix_from_item_ids() {
        let mut state = StreamState::new();

        state.apply(&event(json!({
            "type": "response.function_call_arguments.delta",
            "item_id": "fc_c1", "delta": "{}",
        })));

        assert_eq!(state.tool_calls()[0].call_id, "c1");
    }

    #[test]
    fn harvests_from_completed_when_stream_was_silent() {
        let mut state = StreamState::new();

        let deltas = state.apply(&event(json!({
            "type": "response.completed",
            "response": {
                "id": "r_2",
                "model": "m",
                "output": [
                    {"type": "reasoning", "summary": [{"type": "summary_text", "text": "hmm"}]},
                    {"type": "message", "content": [{"type": "output_text", "text": "Hi"}]},
                    {"type": "function_call", "call_id": "c1", "name": "f", "arguments": "{}"},
                ],
                "usage": {"total_tokens": 7},
            },
        })));

        assert_eq!(state.text, "Hi");
        assert_eq!(state.reasoning, "hmm");
        assert_eq!(state.tool_calls().len(), 1);
        assert_eq!(state.response_id.as_deref(), Some("r_2"));
        assert!(matches!(deltas.last(), Some(StreamDelta::Finished)));
    }

    #[test]
    fn harvest_does_not_duplicate_streamed_text() {
        let mut state = StreamState::new();

        state.apply(&event(json!({"type": "response.output_text.delta", "delta": "Hi"})));
        let deltas = state.apply(&event(json!({
            "type": "response.completed",
            "response": {"output": [{"type": "message", "content": [{"type": "output_text", "text": "Hi"}]}]},
        })));

        assert_eq!(deltas, vec![StreamDelta::Finished]);
        assert_eq!(state.text, "Hi");
    }

    #[test]
    fn reasoning_reconciliation_handles_cumulative_upstreams() {
        let mut state = StreamState::new();

        let first = state.apply(&event(json!({"type": "response.reasoning.delta", "delta": "think"})));
        assert_eq!(first, vec![StreamDelta::Reasoning("think".into())]);

        // Cumulative resend extends the prefix.
        let second = state.apply(&event(json!({"type": "response.reasoning.delta", "delta": "thinking hard"})));
        assert_eq!(second, vec![StreamDelta::Reasoning("ing hard".into())]);

        // Restart from the beginning emits nothing.
        let third = state.apply(&event(json!({"type": "response.reasoning.delta", "delta": "think"})));
        assert!(third.is_empty());

        // A plain additive delta appends.
        let fourth = state.apply(&event(json!({"type": "response.reasoning.delta", "delta": "!done"})));
        assert_eq!(fourth, vec![StreamDelta::Reasoning("!done".into())]);
        assert_eq!(state.reasoning, "thinking hard!done");
    }

    #[test]
    fn events_after_completion_are_ignored() {
        let mut state = StreamState::new();

        state.apply(&event(json!({"type": "response.completed", "response": {}})));
        let deltas = state.apply(&event(json!({"type": "response.output_text.delta", "delta": "late"})));

        assert!(deltas.is_empty());
        assert!(state.text.is_empty());
    }

    #[test]
    fn failed_streams_still_finish() {
        let mut state = StreamState::new();

        state.apply(&event(json!({
            "type": "response.function_call_arguments.delta",
            "call_id": "c1", "delta": "{}",
        })));
        let deltas = state.apply(&event(json!({"type": "response.failed", "response": {}})));

        assert_eq!(deltas, vec![StreamDelta::Finished]);
        assert!(state.failed);
        assert_eq!(state.finish_reason(), "tool_calls");
    }

    #[test]
    fn incomplete_maps_to_length() {
        let mut state = StreamState::new();

        let deltas = state.apply(&event(json!({
            "type": "response.completed",
            "response": {"status": "incomplete", "incomplete_details": {"reason": "max_output_tokens"}},
        })));

        assert_eq!(deltas, vec![StreamDelta::Finished]);
        assert_eq!(state.finish_reason(), "length");
    }
}
