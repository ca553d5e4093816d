//! Chat Completions and Text Completions emission.

use crate::messages::chat::{
    ChatChoice, ChatCompletionChunk, ChatCompletionResponse, ChatDelta, ChatFunctionCall, ChatFunctionDelta,
    ChatOutputMessage, ChatToolCall, ChatToolCallDelta, TextChoice, TextCompletionChunk,
};
use crate::sse::SseEvent;
use crate::translate::{
    StreamTranslator, now_unix,
    event::UpstreamEvent,
    state::{StreamDelta, StreamState},
};

pub(crate) struct ChatTranslator {
    state: StreamState,
    requested_model: String,
    chat_id: Option<String>,
    created: i64,
    sent_role: bool,
    sent_final: bool,
}

impl ChatTranslator {
    pub fn new(requested_model: impl Into<String>) -> Self {
        Self {
            state: StreamState::new(),
            requested_model: requested_model.into(),
            chat_id: None,
            created: now_unix(),
            sent_role: false,
            sent_final: false,
        }
    }

    fn chat_id(&mut self) -> String {
        if let Some(id) = &self.chat_id {
            return id.clone();
        }

        let id = match &self.state.response_id {
            Some(response_id) => format!("chatcmpl_{response_id}"),
            None => format!("chatcmpl_{}", uuid::Uuid::new_v4().simple()),
        };

        self.chat_id = Some(id.clone());
        id
    }

    fn model(&self) -> String {
        self.state.model.clone().unwrap_or_else(|| self.requested_model.clone())
    }

    fn chunk(&mut self, delta: ChatDelta, finish_reason: Option<&'static str>) -> SseEvent {
        let id = self.chat_id();
        let created = self.state.created_at.unwrap_or(self.created);
        let chunk = ChatCompletionChunk::new(&id, created, &self.model(), delta, finish_reason);

        frame(&chunk)
    }

    fn role_chunk(&mut self, frames: &mut Vec<SseEvent>) {
        if self.sent_role {
            return;
        }

        self.sent_role = true;
        let chunk = self.chunk(
            ChatDelta {
                role: Some("assistant"),
                ..Default::default()
            },
            None,
        );
        frames.push(chunk);
    }

    fn emit(&mut self, deltas: Vec<StreamDelta>) -> Vec<SseEvent> {
        let mut frames = Vec::new();

        for delta in deltas {
            match delta {
                StreamDelta::Started => {}
                StreamDelta::Text(text) => {
                    self.role_chunk(&mut frames);
                    let chunk = self.chunk(
                        ChatDelta {
                            content: Some(text),
                            ..Default::default()
                        },
                        None,
                    );
                    frames.push(chunk);
                }
                StreamDelta::Reasoning(text) => {
                    self.role_chunk(&mut frames);
                    let chunk = self.chunk(
                        ChatDelta {
                            reasoning_content: Some(text),
                            ..Default::default()
                        },
                        None,
                    );
                    frames.push(chunk);
                }
                StreamDelta::ToolCall {
                    index,
                    first,
                    call_id,
                    name,
                    arguments,
                } => {
                    self.role_chunk(&mut frames);
                    let chunk = self.chunk(
                        ChatDelta {
                            tool_calls: Some(vec![ChatToolCallDelta {
                                index,
                                id: first.then_some(call_id),
                                kind: "function",
                                function: ChatFunctionDelta { name, arguments },
                            }]),
                            ..Default::default()
                        },
                        None,
                    );
                    frames.push(chunk);
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

        let finish_reason = self.state.finish_reason();
        let chunk = self.chunk(ChatDelta::default(), Some(finish_reason));

        vec![chunk, done_frame()]
    }
}

impl StreamTranslator for ChatTranslator {
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

/// Text-completions emission: content only, `cmpl_` ids, no role framing.
pub(crate) struct TextTranslator {
    state: StreamState,
    requested_model: String,
    completion_id: Option<String>,
    created: i64,
    sent_final: bool,
}

impl TextTranslator {
    pub fn new(requested_model: impl Into<String>) -> Self {
        Self {
            state: StreamState::new(),
            requested_model: requested_model.into(),
            completion_id: None,
            created: now_unix(),
            sent_final: false,
        }
    }

    fn completion_id(&mut self) -> String {
        if let Some(id) = &self.completion_id {
            return id.clone();
        }

        let id = match &self.state.response_id {
            Some(response_id) => format!("cmpl_{response_id}"),
            None => format!("cmpl_{}", uuid::Uuid::new_v4().simple()),
        };

        self.completion_id = Some(id.clone());
        id
    }

    fn chunk(&mut self, text: String, finish_reason: Option<&'static str>) -> SseEvent {
        let chunk = TextCompletionChunk {
            id: self.completion_id(),
            object: "text_completion",
            created: self.state.created_at.unwrap_or(self.created),
            model: self.state.model.clone().unwrap_or_else(|| self.requested_model.clone()),
            choices: vec![TextChoice {
                index: 0,
                text,
                finish_reason,
            }],
        };

        frame(&chunk)
    }

    fn terminal(&mut self) -> Vec<SseEvent> {
        if self.sent_final {
            return Vec::new();
        }

        self.sent_final = true;
        vec![self.chunk(String::new(), Some(self.state.finish_reason())), done_frame()]
    }
}

impl StreamTranslator for TextTranslator {
    fn handle(&mut self, event: &UpstreamEvent) -> Vec<SseEvent> {
        let mut frames = Vec::new();

        for delta in self.state.apply(event) {
            match delta {
                StreamDelta::Text(text) => frames.push(self.chunk(text, None)),
                StreamDelta::Finished => frames.extend(self.terminal()),
                _ => {}
            }
        }

        frames
    }

    fn finish(&mut self) -> Vec<SseEvent> {
        self.state.force_finish();
        self.terminal()
    }

    fn state(&self) -> &StreamState {
        &self.state
    }
}

/// Buffered (non-streaming) chat response from final state.
pub(crate) fn chat_response(state: &StreamState, requested_model: &str) -> ChatCompletionResponse {
    let id = match &state.response_id {
        Some(response_id) => format!("chatcmpl_{response_id}"),
        None => format!("chatcmpl_{}", uuid::Uuid::new_v4().simple()),
    };

    let tool_calls: Vec<ChatToolCall> = state
        .tool_calls()
        .iter()
        .map(|call| ChatToolCall {
            id: Some(call.call_id.clone()),
            kind: "function".into(),
            function: ChatFunctionCall {
                name: call.name.clone(),
                arguments: Some(call.final_arguments()),
            },
        })
        .collect();

    ChatCompletionResponse {
        id,
        object: "chat.completion",
        created: state.created_at.unwrap_or_else(now_unix),
        model: state
            .model
            .clone()
            .unwrap_or_else(|| requested_model.to_string()),
        choices: vec![ChatChoice {
            index: 0,
            message: ChatOutputMessage {
                role: "assistant",
                content: (!state.text.is_empty()).then(|| state.text.clone()),
                reasoning_content: (!state.reasoning.is_empty()).then(|| state.reasoning.clone()),
                tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
            },
            finish_reason: state.finish_reason(),
        }],
        usage: state.usage.clone(),
    }
}

/// Buffered text-completion response from final state.
pub(crate) fn text_response(state: &StreamState, requested_model: &str) -> serde_json::Value {
    let id = match &state.response_id {
        Some(response_id) => format!("cmpl_{response_id}"),
        None => format!("cmpl_{}", uuid::Uuid::new_v4().simple()),
    };

    serde_json::json!({
        "id": id,
        "object": "text_completion",
        "created": state.created_at.unwrap_or_else(now_unix),
        "model": state.model.clone().unwrap_or_else(|| requested_model.to_string()),
        "choices": [{
            "index": 0,
            "text": state.text,
            "finish_reason": state.finish_reason(),
        }],
        "usage": state.usage,
    })
}

pub(crate) fn frame<T: serde::Serialize>(payload: &T) -> SseEvent {
    let data = sonic_rs::to_string(payload).unwrap_or_else(|e| {
        log::error!("Failed to serialize stream chunk: {e}");
        r#"{"error":"serialization failed"}"#.to_string()
    });

    SseEvent {
        event: String::new(),
        data,
    }
}

pub(crate) fn done_frame() -> SseEvent {
    SseEvent {
        event: String::new(),
        data: "[DONE]".to_string(),
    }
}
