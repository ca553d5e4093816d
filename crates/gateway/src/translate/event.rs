//! Upstream Responses-dialect events, parsed defensively.

use serde_json::Value;

use crate::sse::SseEvent;

/// One upstream event: a `type` discriminator plus the raw payload.
///
/// Upstreams disagree on which identifying fields accompany each event, so
/// accessors search the known spellings rather than relying on one shape.
#[derive(Debug, Clone)]
pub(crate) struct UpstreamEvent {
    pub kind: String,
    pub value: Value,
}

impl UpstreamEvent {
    /// Parse an SSE frame into an event. `[DONE]` markers and undecodable
    /// payloads yield `None`.
    pub fn from_sse(frame: &SseEvent) -> Option<Self> {
        if frame.data.trim() == "[DONE]" {
            return None;
        }

        let value: Value = match serde_json::from_str(&frame.data) {
            Ok(value) => value,
            Err(e) => {
                log::debug!("Skipping undecodable upstream event: {e}");
                return None;
            }
        };

        let kind = value
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or(frame.event.as_str())
            .to_string();

        Some(Self { kind, value })
    }

    /// Wrap a complete Responses response object as a synthetic terminal
    /// event, the shape the non-SSE fallback feeds through the translator.
    pub fn synthetic_completed(response: Value) -> Self {
        Self {
            kind: "response.completed".to_string(),
            value: serde_json::json!({ "type": "response.completed", "response": response }),
        }
    }

    pub fn delta(&self) -> Option<&str> {
        self.value.get("delta").and_then(Value::as_str)
    }

    pub fn text(&self) -> Option<&str> {
        self.value
            .get("text")
            .or_else(|| self.value.get("refusal"))
            .and_then(Value::as_str)
    }

    pub fn response(&self) -> Option<&Value> {
        self.value.get("response")
    }

    pub fn item(&self) -> Option<&Value> {
        self.value.get("item")
    }

    /// Call id attached directly to the event (not to a nested item).
    pub fn call_id(&self) -> Option<&str> {
        self.value
            .get("call_id")
            .or_else(|| self.value.get("tool_call_id"))
            .and_then(Value::as_str)
    }

    pub fn item_id(&self) -> Option<&str> {
        self.value.get("item_id").and_then(Value::as_str)
    }

    pub fn name(&self) -> Option<&str> {
        self.value.get("name").and_then(Value::as_str)
    }

    pub fn output_index(&self) -> Option<u64> {
        self.value.get("output_index").and_then(Value::as_u64)
    }

    pub fn arguments(&self) -> Option<&str> {
        self.value.get("arguments").and_then(Value::as_str)
    }
}

#[cfg(test)]
mod tests {
    use crate::sse::SseEvent;

    use super::UpstreamEvent;

    fn frame(event: &str, data: &str) -> SseEvent {
        SseEvent {
            event: event.to_string(),
            data: data.to_string(),
        }
    }

    #[test]
    fn type_field_wins_over_sse_event_name() {
        let event = UpstreamEvent::from_sse(&frame("message", r#"{"type":"response.created"}"#)).unwrap();
        assert_eq!(event.kind, "response.created");
    }

    #[test]
    fn falls_back_to_sse_event_name() {
        let event = UpstreamEvent::from_sse(&frame("response.completed", r#"{"response":{}}"#)).unwrap();
        assert_eq!(event.kind, "response.completed");
    }

    #[test]
    fn done_markers_and_garbage_yield_nothing() {
        assert!(UpstreamEvent::from_sse(&frame("", "[DONE]")).is_none());
        assert!(UpstreamEvent::from_sse(&frame("", "not json")).is_none());
    }
}
