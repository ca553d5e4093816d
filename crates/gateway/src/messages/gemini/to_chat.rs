//! Gemini GenerateContent responses → Chat Completions shapes.

use serde_json::Value;

use crate::{
    messages::{
        chat::{ChatFunctionCall, ChatToolCall},
        gemini::GeminiResponse,
    },
    session::{SignatureRecord, signature_record},
};

/// What one response (or streaming chunk) contributes to the chat-side view.
#[derive(Debug, Default)]
pub(crate) struct GeminiExtract {
    pub text: String,
    pub reasoning: String,
    pub tool_calls: Vec<ChatToolCall>,
    /// Signatures to stash in the session cache; never surfaced to clients.
    pub signatures: Vec<(String, SignatureRecord)>,
    pub finish_reason: Option<&'static str>,
}

pub(crate) fn extract(response: &GeminiResponse) -> GeminiExtract {
    let mut out = GeminiExtract::default();

    let Some(candidate) = response.candidates.first() else {
        return out;
    };

    for part in &candidate.content.parts {
        let is_thought = matches!(part.thought, Some(Value::Bool(true)));

        if let Some(text) = &part.text {
            if is_thought {
                out.reasoning.push_str(text);
            } else {
                out.text.push_str(text);
            }
        }

        if let Some(call) = &part.function_call {
            let call_id = format!("call_{}", uuid::Uuid::new_v4().simple());

            if let Some(signature) = part.thought_signature.clone() {
                let thought = match &part.thought {
                    Some(Value::String(thought)) => Some(thought.clone()),
                    _ => None,
                };

                out.signatures
                    .push((call_id.clone(), signature_record(signature, thought, Some(call.name.clone()))));
            }

            out.tool_calls.push(ChatToolCall {
                id: Some(call_id),
                kind: "function".into(),
                function: ChatFunctionCall {
                    name: Some(call.name.clone()),
                    arguments: Some(serde_json::to_string(&call.args).unwrap_or_else(|_| "{}".into())),
                },
            });
        }
    }

    out.finish_reason = if !out.tool_calls.is_empty() {
        Some("tool_calls")
    } else {
        candidate.finish_reason.as_deref().map(|reason| match reason {
            "MAX_TOKENS" => "length",
            _ => "stop",
        })
    };

    out
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::messages::gemini::GeminiResponse;

    use super::extract;

    fn response(value: serde_json::Value) -> GeminiResponse {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn concatenates_text_parts() {
        let extract = extract(&response(json!({
            "candidates": [{"content": {"role": "model", "parts": [
                {"text": "Hel"},
                {"text": "lo"},
            ]}, "finishReason": "STOP"}],
        })));

        assert_eq!(extract.text, "Hello");
        assert_eq!(extract.finish_reason, Some("stop"));
    }

    #[test]
    fn function_calls_get_fresh_call_ids_and_stash_signatures() {
        let extract = extract(&response(json!({
            "candidates": [{"content": {"role": "model", "parts": [
                {
                    "functionCall": {"name": "f", "args": {"x": 1}},
                    "thoughtSignature": "sig-1",
                },
            ]}}],
        })));

        assert_eq!(extract.tool_calls.len(), 1);
        let call = &extract.tool_calls[0];
        assert!(call.id.as_deref().unwrap().starts_with("call_"));
        assert_eq!(call.function.arguments.as_deref(), Some(r#"{"x":1}"#));

        assert_eq!(extract.signatures.len(), 1);
        let (signature_call_id, record) = &extract.signatures[0];
        assert_eq!(signature_call_id, call.id.as_ref().unwrap());
        assert_eq!(record.thought_signature, "sig-1");
        assert_eq!(record.name.as_deref(), Some("f"));

        assert_eq!(extract.finish_reason, Some("tool_calls"));
    }

    #[test]
    fn thought_parts_become_reasoning() {
        let extract = extract(&response(json!({
            "candidates": [{"content": {"role": "model", "parts": [
                {"text": "pondering", "thought": true},
                {"text": "answer"},
            ]}}],
        })));

        assert_eq!(extract.reasoning, "pondering");
        assert_eq!(extract.text, "answer");
    }

    #[test]
    fn max_tokens_maps_to_length() {
        let extract = extract(&response(json!({
            "candidates": [{"content": {"parts": []}, "finishReason": "MAX_TOKENS"}],
        })));

        assert_eq!(extract.finish_reason, Some("length"));
    }
}
