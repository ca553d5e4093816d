//! Responses-dialect pass-through emission.
//!
//! The upstream already speaks this dialect, but its framing is not trusted:
//! events are re-emitted from reconciled state with strictly increasing
//! sequence numbers, guaranteed item closure, and at least one output item
//! even for empty responses.

use serde_json::{Value, json};

use crate::sse::SseEvent;
use crate::translate::{
    StreamTranslator,
    chat::{done_frame, frame},
    event::UpstreamEvent,
    now_unix,
    state::{StreamDelta, StreamState},
};

enum OpenItem {
    Message { id: String, index: usize, text: String },
    Reasoning { id: String, index: usize, text: String },
    Call { call_id: String, id: String, index: usize },
}

pub(crate) struct ResponsesTranslator {
    state: StreamState,
    requested_model: String,
    sequence: u64,
    response_id: Option<String>,
    created: i64,
    items: Vec<OpenItem>,
    sent_created: bool,
    sent_final: bool,
}

impl ResponsesTranslator {
    pub fn new(requested_model: impl Into<String>) -> Self {
        Self {
            state: StreamState::new(),
            requested_model: requested_model.into(),
            sequence: 0,
            response_id: None,
            created: now_unix(),
            items: Vec::new(),
            sent_created: false,
            sent_final: false,
        }
    }

    fn next_sequence(&mut self) -> u64 {
        let sequence = self.sequence;
        self.sequence += 1;
        sequence
    }

    fn response_id(&mut self) -> String {
        if let Some(id) = &self.response_id {
            return id.clone();
        }

        let id = self
            .state
            .response_id
            .clone()
            .unwrap_or_else(|| format!("resp_{}", uuid::Uuid::new_v4().simple()));

        self.response_id = Some(id.clone());
        id
    }

    fn model(&self) -> String {
        self.state.model.clone().unwrap_or_else(|| self.requested_model.clone())
    }

    fn emit(&mut self, kind: &str, mut payload: Value) -> SseEvent {
        payload["type"] = json!(kind);
        payload["sequence_number"] = json!(self.next_sequence());

        let mut event = frame(&payload);
        event.event = kind.to_string();
        event
    }

    fn envelope(&mut self, status: &str, output: Value) -> Value {
        json!({
            "id": self.response_id(),
            "object": "response",
            "created_at": self.state.created_at.unwrap_or(self.created),
            "model": self.model(),
            "status": status,
            "output": output,
            "usage": self.state.usage,
        })
    }

    fn ensure_created(&mut self, frames: &mut Vec<SseEvent>) {
        if self.sent_created {
            return;
        }

        self.sent_created = true;
        let envelope = self.envelope("in_progress", json!([]));
        frames.push(self.emit("response.created", json!({ "response": envelope })));
    }

    fn ensure_message_item(&mut self, frames: &mut Vec<SseEvent>) -> (String, usize) {
        if let Some(OpenItem::Message { id, index, .. }) = self
            .items
            .iter()
            .find(|item| matches!(item, OpenItem::Message { .. }))
        {
            return (id.clone(), *index);
        }

        let id = format!("msg_{}", uuid::Uuid::new_v4().simple());
        let index = self.items.len();

        self.items.push(OpenItem::Message {
            id: id.clone(),
            index,
            text: String::new(),
        });

        let added = json!({
            "output_index": index,
            "item": {"type": "message", "id": id, "status": "in_progress", "role": "assistant", "content": []},
        });
        frames.push(self.emit("response.output_item.added", added));

        (id, index)
    }

    fn ensure_reasoning_item(&mut self, frames: &mut Vec<SseEvent>) -> (String, usize) {
        if let Some(OpenItem::Reasoning { id, index, .. }) = self
            .items
            .iter()
            .find(|item| matches!(item, OpenItem::Reasoning { .. }))
        {
            return (id.clone(), *index);
        }

        let id = format!("rs_{}", uuid::Uuid::new_v4().simple());
        let index = self.items.len();

        self.items.push(OpenItem::Reasoning {
            id: id.clone(),
            index,
            text: String::new(),
        });

        let added = json!({
            "output_index": index,
            "item": {"type": "reasoning", "id": id, "summary": []},
        });
        frames.push(self.emit("response.output_item.added", added));

        (id, index)
    }

    fn ensure_call_item(&mut self, frames: &mut Vec<SseEvent>, call_id: &str, name: Option<&str>) -> (String, usize) {
        if let Some(OpenItem::Call { id, index, .. }) = self.items.iter().find(
            |item| matches!(item, OpenItem::Call { call_id: existing, .. } if existing == call_id),
        ) {
            return (id.clone(), *index);
        }

        let id = format!("fc_{call_id}");
        let index = self.items.len();

        self.items.push(OpenItem::Call {
            call_id: call_id.to_string(),
            id: id.clone(),
            index,
        });

        let added = json!({
            "output_index": index,
            "item": {
                "type": "function_call",
                "id": id,
                "call_id": call_id,
                "name": name.unwrap_or_default(),
                "arguments": "",
            },
        });
        frames.push(self.emit("response.output_item.added", added));

        (id, index)
    }

    fn apply_deltas(&mut self, deltas: Vec<StreamDelta>) -> Vec<SseEvent> {
        let mut frames = Vec::new();

        for delta in deltas {
            match delta {
                StreamDelta::Started => self.ensure_created(&mut frames),
                StreamDelta::Text(text) => {
                    self.ensure_created(&mut frames);
                    let (item_id, index) = self.ensure_message_item(&mut frames);

                    if let Some(OpenItem::Message { text: buffered, .. }) = self.items.get_mut(index) {
                        buffered.push_str(&text);
                    }

                    let payload = json!({
                        "item_id": item_id,
                        "output_index": index,
                        "content_index": 0,
                        "delta": text,
                    });
                    frames.push(self.emit("response.output_text.delta", payload));
                }
                StreamDelta::Reasoning(text) => {
                    self.ensure_created(&mut frames);
                    let (item_id, index) = self.ensure_reasoning_item(&mut frames);

                    if let Some(OpenItem::Reasoning { text: buffered, .. }) = self.items.get_mut(index) {
                        buffered.push_str(&text);
                    }

                    let payload = json!({
                        "item_id": item_id,
                        "output_index": index,
                        "delta": text,
                    });
                    frames.push(self.emit("response.reasoning_text.delta", payload));
                }
                StreamDelta::ToolCall {
                    call_id, name, arguments, ..
                } => {
                    self.ensure_created(&mut frames);
                    let (item_id, index) = self.ensure_call_item(&mut frames, &call_id, name.as_deref());

                    if let Some(fragment) = arguments.filter(|fragment| !fragment.is_empty()) {
                        let payload = json!({
                            "item_id": item_id,
                            "output_index": index,
                            "delta": fragment,
                        });
                        frames.push(self.emit("response.function_call_arguments.delta", payload));
                    }
                }
                StreamDelta::Finished => frames.extend(self.terminal()),
            }
        }

        frames
    }

    fn terminal(&mut self) -> Vec<SseEvent> {
        if self.sent_final {
            return Vec::new();
        }

        self.sent_final = true;

        let mut frames = Vec::new();
        self.ensure_created(&mut frames);

        // Downstream parsers expect at least one output item.
        if self.items.is_empty() {
            self.ensure_message_item(&mut frames);
        }

        let mut output = Vec::new();

        let items = std::mem::take(&mut self.items);
        for item in &items {
            match item {
                OpenItem::Message { id, index, text } => {
                    let payload = json!({
                        "item_id": id,
                        "output_index": index,
                        "content_index": 0,
                        "text": text,
                    });
                    frames.push(self.emit("response.output_text.done", payload));

                    let done = json!({
                        "type": "message",
                        "id": id,
                        "status": "completed",
                        "role": "assistant",
                        "content": [{"type": "output_text", "text": text}],
                    });
                    frames.push(self.emit(
                        "response.output_item.done",
                        json!({"output_index": index, "item": done.clone()}),
                    ));
                    output.push(done);
                }
                OpenItem::Reasoning { id, index, text } => {
                    let payload = json!({
                        "item_id": id,
                        "output_index": index,
                        "text": text,
                    });
                    frames.push(self.emit("response.reasoning_text.done", payload));

                    let done = json!({
                        "type": "reasoning",
                        "id": id,
                        "summary": [{"type": "summary_text", "text": text}],
                    });
                    frames.push(self.emit(
                        "response.output_item.done",
                        json!({"output_index": index, "item": done.clone()}),
                    ));
                    output.push(done);
                }
                OpenItem::Call { call_id, id, index } => {
                    let call = self
                        .state
                        .tool_calls()
                        .iter()
                        .find(|candidate| candidate.call_id == *call_id);

                    let arguments = call.map(|c| c.final_arguments()).unwrap_or_else(|| "{}".into());
                    let name = call.and_then(|c| c.name.clone()).unwrap_or_default();

                    let payload = json!({
                        "item_id": id,
                        "output_index": index,
                        "arguments": arguments,
                    });
                    frames.push(self.emit("response.function_call_arguments.done", payload));

                    let done = json!({
                        "type": "function_call",
                        "id": id,
                        "call_id": call_id,
                        "name": name,
                        "arguments": arguments,
                    });
                    frames.push(self.emit(
                        "response.output_item.done",
                        json!({"output_index": index, "item": done.clone()}),
                    ));
                    output.push(done);
                }
            }
        }

        let status = if self.state.failed { "failed" } else { "completed" };
        let envelope = self.envelope(status, Value::Array(output));
        frames.push(self.emit("response.completed", json!({ "response": envelope })));
        frames.push(done_frame());

        frames
    }
}

impl StreamTranslator for ResponsesTranslator {
    fn handle(&mut self, event: &UpstreamEvent) -> Vec<SseEvent> {
        let deltas = self.state.apply(event);
        self.apply_deltas(deltas)
    }

    fn finish(&mut self) -> Vec<SseEvent> {
        let deltas = self.state.force_finish();
        let mut frames = self.apply_deltas(deltas);

        if !self.sent_final {
            frames.extend(self.terminal());
        }

        frames
    }

    fn state(&self) -> &StreamState {
        &self.state
    }
}

/// Buffered (non-streaming) Responses body from final state.
pub(crate) fn responses_response(state: &StreamState, requested_model: &str) -> Value {
    let id = state
        .response_id
        .clone()
        .unwrap_or_else(|| format!("resp_{}", uuid::Uuid::new_v4().simple()));

    let mut output = Vec::new();

    if !state.reasoning.is_empty() {
        output.push(json!({
            "type": "reasoning",
            "id": format!("rs_{}", uuid::Uuid::new_v4().simple()),
            "summary": [{"type": "summary_text", "text": state.reasoning}],
        }));
    }

    if !state.text.is_empty() || state.tool_calls().is_empty() {
        output.push(json!({
            "type": "message",
            "id": format!("msg_{}", uuid::Uuid::new_v4().simple()),
            "status": "completed",
            "role": "assistant",
            "content": [{"type": "output_text", "text": state.text}],
        }));
    }

    for call in state.tool_calls() {
        output.push(json!({
            "type": "function_call",
            "id": format!("fc_{}", call.call_id),
            "call_id": call.call_id,
            "name": call.name.clone().unwrap_or_default(),
            "arguments": call.final_arguments(),
        }));
    }

    json!({
        "id": id,
        "object": "response",
        "created_at": state.created_at.unwrap_or_else(now_unix),
        "model": state.model.clone().unwrap_or_else(|| requested_model.to_string()),
        "status": if state.failed { "failed" } else { "completed" },
        "output": output,
        "usage": state.usage,
    })
}
