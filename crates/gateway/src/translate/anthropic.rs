//! Anthropic Messages emission.

use std::collections::HashMap;

use serde_json::json;

use crate::messages::anthropic::{
    AnthropicBlockDelta, AnthropicContentBlock, AnthropicMessageDelta, AnthropicResponse, AnthropicStreamEvent,
    AnthropicUsage, finish_reason_to_stop_reason,
};
use crate::sse::SseEvent;
use crate::translate::{
    StreamTranslator,
    event::UpstreamEvent,
    state::{StreamDelta, StreamState},
};

pub(crate) struct AnthropicTranslator {
    state: StreamState,
    requested_model: String,
    sent_start: bool,
    sent_final: bool,
    text_block: Option<usize>,
    tool_blocks: HashMap<String, usize>,
    /// Argument fragments buffered until the call's name arrives.
    pending_arguments: HashMap<String, String>,
    open_blocks: Vec<usize>,
    next_block: usize,
}

impl AnthropicTranslator {
    pub fn new(requested_model: impl Into<String>) -> Self {
        Self {
            state: StreamState::new(),
            requested_model: requested_model.into(),
            sent_start: false,
            sent_final: false,
            text_block: None,
            tool_blocks: HashMap::new(),
            pending_arguments: HashMap::new(),
            open_blocks: Vec::new(),
            next_block: 0,
        }
    }

    fn ensure_start(&mut self, frames: &mut Vec<SseEvent>) {
        if self.sent_start {
            return;
        }

        self.sent_start = true;

        let id = match &self.state.response_id {
            Some(response_id) => format!("msg_{response_id}"),
            None => format!("msg_{}", uuid::Uuid::new_v4().simple()),
        };

        let message = AnthropicResponse {
            id,
            kind: "message",
            role: "assistant",
            content: Vec::new(),
            model: self
                .state
                .model
                .clone()
                .unwrap_or_else(|| self.requested_model.clone()),
            stop_reason: None,
            stop_sequence: None,
            usage: AnthropicUsage::default(),
        };

        frames.push(event_frame(&AnthropicStreamEvent::MessageStart { message }));
    }

    fn ensure_text_block(&mut self, frames: &mut Vec<SseEvent>) -> usize {
        if let Some(index) = self.text_block {
            return index;
        }

        let index = self.allocate_block();
        self.text_block = Some(index);

        frames.push(event_frame(&AnthropicStreamEvent::ContentBlockStart {
            index,
            content_block: AnthropicContentBlock::text(""),
        }));

        index
    }

    fn start_tool_block(&mut self, frames: &mut Vec<SseEvent>, call_id: &str, name: &str) -> usize {
        let index = self.allocate_block();
        self.tool_blocks.insert(call_id.to_string(), index);

        frames.push(event_frame(&AnthropicStreamEvent::ContentBlockStart {
            index,
            content_block: AnthropicContentBlock::tool_use(call_id, name, json!({})),
        }));

        index
    }

    fn allocate_block(&mut self) -> usize {
        let index = self.next_block;
        self.next_block += 1;
        self.open_blocks.push(index);
        index
    }

    fn emit(&mut self, deltas: Vec<StreamDelta>) -> Vec<SseEvent> {
        let mut frames = Vec::new();

        for delta in deltas {
            match delta {
                StreamDelta::Started => self.ensure_start(&mut frames),
                StreamDelta::Text(text) => {
                    self.ensure_start(&mut frames);
                    let index = self.ensure_text_block(&mut frames);

                    frames.push(event_frame(&AnthropicStreamEvent::ContentBlockDelta {
                        index,
                        delta: AnthropicBlockDelta::TextDelta { text },
                    }));
                }
                StreamDelta::Reasoning(_) => {
                    // Reasoning has no Messages-dialect surface here.
                }
                StreamDelta::ToolCall {
                    call_id, name, arguments, ..
                } => {
                    self.ensure_start(&mut frames);
                    self.tool_delta(&mut frames, call_id, name, arguments);
                }
                StreamDelta::Finished => frames.extend(self.terminal()),
            }
        }

        frames
    }

    fn tool_delta(
        &mut self,
        frames: &mut Vec<SseEvent>,
        call_id: String,
        name: Option<String>,
        arguments: Option<String>,
    ) {
        if let Some(index) = self.tool_blocks.get(&call_id).copied() {
            if let Some(fragment) = arguments.filter(|fragment| !fragment.is_empty()) {
                frames.push(event_frame(&AnthropicStreamEvent::ContentBlockDelta {
                    index,
                    delta: AnthropicBlockDelta::InputJsonDelta { partial_json: fragment },
                }));
            }
            return;
        }

        if let Some(fragment) = arguments.filter(|fragment| !fragment.is_empty()) {
            self.pending_arguments
                .entry(call_id.clone())
                .or_default()
                .push_str(&fragment);
        }

        // The block cannot start until the tool name is known.
        let Some(name) = name.or_else(|| {
            self.state
                .tool_calls()
                .iter()
                .find(|call| call.call_id == call_id)
                .and_then(|call| call.name.clone())
        }) else {
            return;
        };

        let index = self.start_tool_block(frames, &call_id, &name);

        if let Some(buffered) = self.pending_arguments.remove(&call_id)
            && !buffered.is_empty()
        {
            frames.push(event_frame(&AnthropicStreamEvent::ContentBlockDelta {
                index,
                delta: AnthropicBlockDelta::InputJsonDelta { partial_json: buffered },
            }));
        }
    }

    fn terminal(&mut self) -> Vec<SseEvent> {
        if self.sent_final {
            return Vec::new();
        }

        self.sent_final = true;

        let mut frames = Vec::new();
        self.ensure_start(&mut frames);

        // Calls whose names only arrived with the terminal harvest.
        let unstarted: Vec<(String, String)> = self
            .state
            .tool_calls()
            .iter()
            .filter(|call| !self.tool_blocks.contains_key(&call.call_id))
            .map(|call| (call.call_id.clone(), call.name.clone().unwrap_or_default()))
            .collect();

        for (call_id, name) in unstarted {
            let index = self.start_tool_block(&mut frames, &call_id, &name);
            let arguments = self
                .pending_arguments
                .remove(&call_id)
                .or_else(|| {
                    self.state
                        .tool_calls()
                        .iter()
                        .find(|call| call.call_id == call_id)
                        .map(|call| call.final_arguments())
                })
                .unwrap_or_default();

            if !arguments.is_empty() {
                frames.push(event_frame(&AnthropicStreamEvent::ContentBlockDelta {
                    index,
                    delta: AnthropicBlockDelta::InputJsonDelta { partial_json: arguments },
                }));
            }
        }

        for index in std::mem::take(&mut self.open_blocks) {
            frames.push(event_frame(&AnthropicStreamEvent::ContentBlockStop { index }));
        }

        let usage = self
            .state
            .usage
            .as_ref()
            .map(|usage| AnthropicUsage {
                input_tokens: usage
                    .get("input_tokens")
                    .or_else(|| usage.get("prompt_tokens"))
                    .and_then(serde_json::Value::as_u64)
                    .unwrap_or(0) as u32,
                output_tokens: usage
                    .get("output_tokens")
                    .or_else(|| usage.get("completion_tokens"))
                    .and_then(serde_json::Value::as_u64)
                    .unwrap_or(0) as u32,
            })
            .unwrap_or_default();

        frames.push(event_frame(&AnthropicStreamEvent::MessageDelta {
            delta: AnthropicMessageDelta {
                stop_reason: Some(finish_reason_to_stop_reason(self.state.finish_reason()).to_string()),
                stop_sequence: None,
            },
            usage,
        }));
        frames.push(event_frame(&AnthropicStreamEvent::MessageStop));

        frames
    }
}

impl StreamTranslator for AnthropicTranslator {
    fn handle(&mut self, event: &UpstreamEvent) -> Vec<SseEvent> {
        let deltas = self.state.apply(event);
        self.emit(deltas)
    }

    fn finish(&mut self) -> Vec<SseEvent> {
        let deltas = self.state.force_finish();
        let mut frames = self.emit(deltas);

        if !self.sent_final {
            frames.extend(self.terminal());
        }

        frames
    }

    fn state(&self) -> &StreamState {
        &self.state
    }
}

/// Buffered (non-streaming) Messages response from final state.
pub(crate) fn anthropic_response(state: &StreamState, requested_model: &str) -> AnthropicResponse {
    let id = match &state.response_id {
        Some(response_id) => format!("msg_{response_id}"),
        None => format!("msg_{}", uuid::Uuid::new_v4().simple()),
    };

    let mut content = Vec::new();

    if !state.text.is_empty() {
        content.push(AnthropicContentBlock::text(state.text.clone()));
    }

    for call in state.tool_calls() {
        let input = serde_json::from_str(&call.final_arguments()).unwrap_or_else(|_| json!({}));
        content.push(AnthropicContentBlock::tool_use(
            call.call_id.clone(),
            call.name.clone().unwrap_or_default(),
            input,
        ));
    }

    let usage = state
        .usage
        .as_ref()
        .map(|usage| AnthropicUsage {
            input_tokens: usage
                .get("input_tokens")
                .or_else(|| usage.get("prompt_tokens"))
                .and_then(serde_json::Value::as_u64)
                .unwrap_or(0) as u32,
            output_tokens: usage
                .get("output_tokens")
                .or_else(|| usage.get("completion_tokens"))
                .and_then(serde_json::Value::as_u64)
                .unwrap_or(0) as u32,
        })
        .unwrap_or_default();

    AnthropicResponse {
        id,
        kind: "message",
        role: "assistant",
        content,
        model: state.model.clone().unwrap_or_else(|| requested_model.to_string()),
        stop_reason: Some(finish_reason_to_stop_reason(state.finish_reason()).to_string()),
        stop_sequence: None,
        usage,
    }
}

fn event_frame(event: &AnthropicStreamEvent) -> SseEvent {
    let mut frame = crate::translate::chat::frame(event);
    frame.event = event.name().to_string();
    frame
}
