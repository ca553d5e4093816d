//! Gemini GenerateContent requests → canonical Responses form.
//!
//! Gemini carries no call ids, so calls and responses pair by declaration
//! order within a turn; synthetic ids hold the pairs together internally and
//! are never sent back to the client.

use serde_json::Value;

use crate::{
    error::{GatewayError, GatewayResult},
    messages::{
        gemini::{GeminiPart, GeminiRequest},
        responses::{
            ContentPart, FunctionCallItem, FunctionCallOutputItem, ImageUrl, InputItem, MessageItem, ResponsesRequest,
            Role,
        },
    },
};

pub(crate) fn gemini_to_responses(model: &str, request: &GeminiRequest) -> GatewayResult<ResponsesRequest> {
    let mut out = ResponsesRequest::new(model);

    if let Some(system) = &request.system_instruction {
        let text: String = system.parts.iter().filter_map(|part| part.text.as_deref()).collect();
        if !text.is_empty() {
            out.instructions = Some(text);
        }
    }

    // Calls of the most recent model turn, for pairing functionResponse
    // parts by name and order.
    let mut open_calls: Vec<(String, String)> = Vec::new();

    for content in &request.contents {
        let role = match content.role.as_deref() {
            Some("model") => Role::Assistant,
            _ => Role::User,
        };

        if role == Role::Assistant {
            open_calls.clear();
        }

        let mut parts: Vec<ContentPart> = Vec::new();

        for part in &content.parts {
            if let Some(text) = &part.text {
                parts.push(ContentPart::InputText { text: text.clone() });
            }

            if let Some(inline) = &part.inline_data {
                parts.push(ContentPart::InputImage {
                    image_url: ImageUrl::Url(format!("data:{};base64,{}", inline.mime_type, inline.data)),
                });
            }

            if let Some(call) = &part.function_call {
                flush_message(&mut out, role, &mut parts);

                let call_id = format!("call_{}", uuid::Uuid::new_v4().simple());
                open_calls.push((call.name.clone(), call_id.clone()));

                let mut item = FunctionCallItem::new(
                    call_id,
                    call.name.clone(),
                    serde_json::to_string(&call.args).unwrap_or_else(|_| "{}".into()),
                );
                item.thought_signature = part.thought_signature.clone();
                item.thought = thought_text(part);

                out.input.push(InputItem::FunctionCall(item));
            }

            if let Some(response) = &part.function_response {
                flush_message(&mut out, role, &mut parts);

                let call_id = open_calls
                    .iter()
                    .position(|(name, _)| *name == response.name)
                    .map(|position| open_calls.remove(position).1);

                let Some(call_id) = call_id else {
                    log::debug!("Dropping functionResponse with no matching call: {:?}", response.name);
                    continue;
                };

                out.input.push(InputItem::FunctionCallOutput(FunctionCallOutputItem::new(
                    call_id,
                    response.response.to_string(),
                )));
            }
        }

        flush_message(&mut out, role, &mut parts);
    }

    if out.input.is_empty() {
        return Err(GatewayError::InvalidRequest(
            "contents convert to an empty input list".into(),
        ));
    }

    if let Some(config) = &request.generation_config {
        out.max_output_tokens = config.max_output_tokens;
        out.temperature = config.temperature;
        out.top_p = config.top_p;
    }

    let declarations: Vec<Value> = request
        .tools
        .iter()
        .flatten()
        .flat_map(|tool| tool.function_declarations.iter())
        .map(|declaration| {
            let mut converted = serde_json::json!({ "type": "function" });
            for key in ["name", "description", "parameters"] {
                if let Some(value) = declaration.get(key) {
                    converted[key] = value.clone();
                }
            }
            converted
        })
        .collect();

    if !declarations.is_empty() {
        out.tools = Some(declarations);
    }

    Ok(out)
}

fn flush_message(out: &mut ResponsesRequest, role: Role, parts: &mut Vec<ContentPart>) {
    if parts.is_empty() {
        return;
    }

    out.input.push(InputItem::Message(MessageItem {
        role,
        content: std::mem::take(parts),
    }));
}

fn thought_text(part: &GeminiPart) -> Option<String> {
    match &part.thought {
        Some(Value::String(text)) => Some(text.clone()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::panic)]

    use serde_json::json;

    use crate::messages::{gemini::GeminiRequest, responses::InputItem};

    use super::gemini_to_responses;

    fn convert(value: serde_json::Value) -> crate::messages::responses::ResponsesRequest {
        let request: GeminiRequest = serde_json::from_value(value).unwrap();
        gemini_to_responses("gpt-5", &request).unwrap()
    }

    #[test]
    fn maps_contents_and_system_instruction() {
        let converted = convert(json!({
            "systemInstruction": {"parts": [{"text": "be terse"}]},
            "contents": [
                {"role": "user", "parts": [{"text": "hi"}]},
                {"role": "model", "parts": [{"text": "hello"}]},
            ],
        }));

        assert_eq!(converted.instructions.as_deref(), Some("be terse"));
        assert_eq!(converted.input.len(), 2);
    }

    #[test]
    fn pairs_function_responses_by_name_order() {
        let converted = convert(json!({
            "contents": [
                {"role": "user", "parts": [{"text": "go"}]},
                {"role": "model", "parts": [
                    {"functionCall": {"name": "f", "args": {"x": 1}}},
                    {"functionCall": {"name": "g", "args": {}}},
                ]},
                {"role": "user", "parts": [
                    {"functionResponse": {"name": "g", "response": {"ok": true}}},
                    {"functionResponse": {"name": "f", "response": {"ok": false}}},
                ]},
            ],
        }));

        let calls: Vec<(&str, &str)> = converted
            .input
            .iter()
            .filter_map(|item| match item {
                InputItem::FunctionCall(call) => Some((call.name.as_str(), call.call_id.as_str())),
                _ => None,
            })
            .collect();

        let outputs: Vec<&str> = converted
            .input
            .iter()
            .filter_map(|item| match item {
                InputItem::FunctionCallOutput(output) => Some(output.call_id.as_str()),
                _ => None,
            })
            .collect();

        assert_eq!(calls.len(), 2);
        assert_eq!(outputs.len(), 2);

        // g's output references g's call, f's output references f's call.
        let g_call = calls.iter().find(|(name, _)| *name == "g").unwrap().1;
        let f_call = calls.iter().find(|(name, _)| *name == "f").unwrap().1;
        assert_eq!(outputs, vec![g_call, f_call]);
    }

    #[test]
    fn inline_data_becomes_input_image() {
        let converted = convert(json!({
            "contents": [{"role": "user", "parts": [
                {"inlineData": {"mimeType": "image/png", "data": "AAAA"}},
            ]}],
        }));

        let InputItem::Message(message) = &converted.input[0] else {
            panic!("expected message");
        };
        assert!(matches!(
            &message.content[0],
            crate::messages::responses::ContentPart::InputImage { .. }
        ));
    }

    #[test]
    fn signatures_ride_into_function_call_items() {
        let converted = convert(json!({
            "contents": [
                {"role": "model", "parts": [
                    {"functionCall": {"name": "f", "args": {}}, "thoughtSignature": "sig-1", "thought": "why"},
                ]},
            ],
        }));

        let InputItem::FunctionCall(call) = &converted.input[0] else {
            panic!("expected function call");
        };
        assert_eq!(call.thought_signature.as_deref(), Some("sig-1"));
        assert_eq!(call.thought.as_deref(), Some("why"));
    }
}
