//! Gemini GenerateContent emission.

use serde_json::json;

use crate::messages::gemini::{GeminiCandidate, GeminiContent, GeminiFunctionCall, GeminiPart, GeminiResponse};
use crate::sse::SseEvent;
use crate::translate::{
    StreamTranslator,
    chat::frame,
    event::UpstreamEvent,
    state::{StreamDelta, StreamState},
};

pub(crate) struct GeminiTranslator {
    state: StreamState,
    sent_final: bool,
}

impl GeminiTranslator {
    pub fn new() -> Self {
        Self {
            state: StreamState::new(),
            sent_final: false,
        }
    }

    fn terminal(&mut self) -> Vec<SseEvent> {
        if self.sent_final {
            return Vec::new();
        }

        self.sent_final = true;
        vec![frame(&final_chunk(&self.state))]
    }
}

impl StreamTranslator for GeminiTranslator {
    fn handle(&mut self, event: &UpstreamEvent) -> Vec<SseEvent> {
        let mut frames = Vec::new();

        for delta in self.state.apply(event) {
            match delta {
                StreamDelta::Text(text) => frames.push(frame(&GeminiResponse::text_chunk(text))),
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

/// Closing chunk: any assembled function calls plus the finish reason.
fn final_chunk(state: &StreamState) -> GeminiResponse {
    let parts: Vec<GeminiPart> = state
        .tool_calls()
        .iter()
        .map(|call| GeminiPart {
            function_call: Some(GeminiFunctionCall {
                name: call.name.clone().unwrap_or_default(),
                args: serde_json::from_str(&call.final_arguments()).unwrap_or_else(|_| json!({})),
            }),
            ..Default::default()
        })
        .collect();

    let finish_reason = match state.finish_reason() {
        "length" => "MAX_TOKENS",
        _ => "STOP",
    };

    GeminiResponse {
        candidates: vec![GeminiCandidate {
            content: GeminiContent {
                role: Some("model".into()),
                parts,
            },
            finish_reason: Some(finish_reason.to_string()),
            index: 0,
        }],
        usage_metadata: state.usage.clone(),
    }
}

/// Buffered (non-streaming) Gemini body from final state.
pub(crate) fn gemini_response(state: &StreamState) -> GeminiResponse {
    let mut parts = Vec::new();

    if !state.text.is_empty() {
        parts.push(GeminiPart::text(state.text.clone()));
    }

    for call in state.tool_calls() {
        parts.push(GeminiPart {
            function_call: Some(GeminiFunctionCall {
                name: call.name.clone().unwrap_or_default(),
                args: serde_json::from_str(&call.final_arguments()).unwrap_or_else(|_| json!({})),
            }),
            ..Default::default()
        });
    }

    let finish_reason = match state.finish_reason() {
        "length" => "MAX_TOKENS",
        _ => "STOP",
    };

    GeminiResponse {
        candidates: vec![GeminiCandidate {
            content: GeminiContent {
                role: Some("model".into()),
                parts,
            },
            finish_reason: Some(finish_reason.to_string()),
            index: 0,
        }],
        usage_metadata: state.usage.clone(),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{Value, json};

    use crate::sse::SseEvent;
    use crate::translate::{StreamTranslator, event::UpstreamEvent};

    use super::GeminiTranslator;

    fn event(data: serde_json::Value) -> UpstreamEvent {
        UpstreamEvent::from_sse(&SseEvent {
            event: String::new(),
            data: data.to_string(),
        })
        .unwrap()
    }

    #[test]
    fn each_text_delta_becomes_one_candidate_chunk() {
        let mut translator = GeminiTranslator::new();

        let frames = translator.handle(&event(json!({"type": "response.output_text.delta", "delta": "Hi"})));
        assert_eq!(frames.len(), 1);

        let chunk: Value = serde_json::from_str(&frames[0].data).unwrap();
        assert_eq!(chunk["candidates"][0]["content"]["role"], json!("model"));
        assert_eq!(chunk["candidates"][0]["content"]["parts"][0]["text"], json!("Hi"));
        assert_eq!(chunk["candidates"][0]["index"], json!(0));
    }

    #[test]
    fn terminal_chunk_carries_function_calls() {
        let mut translator = GeminiTranslator::new();

        translator.handle(&event(json!({
            "type": "response.function_call_arguments.delta",
            "call_id": "c1", "name": "f", "delta": "{\"x\":1}",
        })));
        let frames = translator.handle(&event(json!({"type": "response.completed", "response": {}})));

        let chunk: Value = serde_json::from_str(&frames[0].data).unwrap();
        assert_eq!(
            chunk["candidates"][0]["content"]["parts"][0]["functionCall"],
            json!({"name": "f", "args": {"x": 1}})
        );
        assert_eq!(chunk["candidates"][0]["finishReason"], json!("STOP"));

        assert!(translator.finish().is_empty());
    }
}
