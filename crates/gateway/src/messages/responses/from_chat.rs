//! Chat Completions → canonical Responses conversion.

use serde_json::{Value, json};

use crate::{
    error::{GatewayError, GatewayResult},
    image,
    messages::{
        chat::{ChatCompletionRequest, ChatContent, ChatRole, TextCompletionRequest},
        responses::{
            ContentPart, FunctionCallItem, FunctionCallOutputItem, ImageUrl, InputItem, MessageItem, Reasoning,
            ResponsesRequest, Role, normalize_call_id,
        },
    },
};

pub(crate) fn chat_to_responses(request: &ChatCompletionRequest) -> GatewayResult<ResponsesRequest> {
    let model = request
        .model
        .clone()
        .ok_or_else(|| GatewayError::InvalidRequest("missing model".into()))?;

    let mut out = ResponsesRequest::new(model);
    let mut instructions: Vec<String> = Vec::new();

    for message in &request.messages {
        match &message.role {
            ChatRole::System | ChatRole::Developer => {
                if let Some(content) = &message.content {
                    let text = content.flat_text();
                    if !text.is_empty() {
                        instructions.push(text);
                    }
                }
            }
            ChatRole::Tool => {
                let Some(call_id) = message.tool_call_id.as_deref() else {
                    log::debug!("Dropping tool message without tool_call_id");
                    continue;
                };

                let output = message.text().unwrap_or_default();
                out.input.push(InputItem::FunctionCallOutput(FunctionCallOutputItem::new(
                    normalize_call_id(call_id),
                    output,
                )));
            }
            ChatRole::Assistant => {
                let mut text = message.text().unwrap_or_default();
                if text.is_empty()
                    && let Some(reasoning) = &message.reasoning_content
                {
                    text = reasoning.clone();
                }

                if !text.is_empty() {
                    out.input.push(InputItem::Message(MessageItem {
                        role: Role::Assistant,
                        content: vec![ContentPart::InputText { text }],
                    }));
                }

                for call in message.tool_calls.iter().flatten() {
                    let call_id = call
                        .id
                        .as_deref()
                        .map(|id| normalize_call_id(id).to_string())
                        .unwrap_or_else(|| format!("call_{}", uuid::Uuid::new_v4().simple()));

                    let arguments = match call.function.arguments.as_deref() {
                        Some(args) if !args.is_empty() => args.to_string(),
                        _ => "{}".to_string(),
                    };

                    out.input.push(InputItem::FunctionCall(FunctionCallItem::new(
                        call_id,
                        call.function.name.clone().unwrap_or_default(),
                        arguments,
                    )));
                }
            }
            ChatRole::User | ChatRole::Other(_) => {
                let parts = user_parts(message.content.as_ref());
                if !parts.is_empty() {
                    out.input.push(InputItem::Message(MessageItem {
                        role: Role::User,
                        content: parts,
                    }));
                }
            }
        }
    }

    if out.input.is_empty() {
        return Err(GatewayError::InvalidRequest(
            "messages convert to an empty input list".into(),
        ));
    }

    if !instructions.is_empty() {
        out.instructions = Some(instructions.join("\n"));
    }

    out.tools = request.tools.as_deref().map(convert_tools).filter(|t| !t.is_empty());
    out.tool_choice = request.tool_choice.as_ref().map(convert_tool_choice);
    out.reasoning = request
        .reasoning_effort
        .clone()
        .map(|effort| Reasoning { effort });
    out.max_output_tokens = request.max_output_tokens();
    out.temperature = request.temperature;
    out.top_p = request.top_p;
    out.user = request.user.clone();

    Ok(out)
}

fn user_parts(content: Option<&ChatContent>) -> Vec<ContentPart> {
    let mut out = Vec::new();

    match content {
        Some(ChatContent::Text(text)) => {
            out.push(ContentPart::InputText { text: text.clone() });
        }
        Some(ChatContent::Parts(parts)) => {
            for part in parts {
                if part.kind == "image_url"
                    && let Some(image_url) = &part.image_url
                {
                    let payload = image::classify(image_url.url());
                    out.push(ContentPart::InputImage {
                        image_url: ImageUrl::Url(image::to_data_url(&payload)),
                    });
                } else if let Some(text) = &part.text {
                    out.push(ContentPart::InputText { text: text.clone() });
                } else {
                    log::debug!("Dropping content part of unhandled type {:?}", part.kind);
                }
            }
        }
        None => {}
    }

    out
}

/// Flatten `{type: function, function: {…}}` tool definitions; unknown tool
/// types pass through unchanged.
pub(crate) fn convert_tools(tools: &[Value]) -> Vec<Value> {
    tools
        .iter()
        .map(|tool| {
            let is_function = tool.get("type").and_then(Value::as_str) == Some("function");
            let Some(function) = tool.get("function").filter(|f| f.is_object()) else {
                return tool.clone();
            };

            if !is_function {
                return tool.clone();
            }

            let mut flattened = json!({ "type": "function" });
            let target = flattened.as_object_mut().expect("literal object");

            for key in ["name", "description", "parameters", "strict"] {
                if let Some(value) = function.get(key) {
                    target.insert(key.to_string(), value.clone());
                }
            }

            flattened
        })
        .collect()
}

/// Strings pass through; `{type: function, function: {name}}` flattens to
/// `{type: function, name}`.
pub(crate) fn convert_tool_choice(choice: &Value) -> Value {
    if choice.is_string() {
        return choice.clone();
    }

    if choice.get("type").and_then(Value::as_str) == Some("function")
        && let Some(name) = choice.pointer("/function/name")
    {
        return json!({ "type": "function", "name": name });
    }

    choice.clone()
}

pub(crate) fn text_to_responses(request: &TextCompletionRequest) -> GatewayResult<ResponsesRequest> {
    let model = request
        .model
        .clone()
        .ok_or_else(|| GatewayError::InvalidRequest("missing model".into()))?;

    let prompt = request.prompt_text();
    if prompt.is_empty() {
        return Err(GatewayError::InvalidRequest("missing prompt".into()));
    }

    let mut out = ResponsesRequest::new(model);
    out.input = vec![InputItem::Message(MessageItem {
        role: Role::User,
        content: vec![ContentPart::InputText { text: prompt }],
    })];
    out.max_output_tokens = request.max_tokens;
    out.temperature = request.temperature;
    out.top_p = request.top_p;
    out.user = request.user.clone();

    Ok(out)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::panic)]

    use insta::assert_json_snapshot;
    use serde_json::json;

    use crate::messages::chat::ChatCompletionRequest;
    use crate::messages::responses::InputItem;

    use super::{chat_to_responses, convert_tool_choice, convert_tools};

    fn request(value: serde_json::Value) -> ChatCompletionRequest {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn maps_roles_and_instructions() {
        let converted = chat_to_responses(&request(json!({
            "model": "gpt-5",
            "messages": [
                {"role": "system", "content": "rule one"},
                {"role": "developer", "content": "rule two"},
                {"role": "user", "content": "hello"},
                {"role": "assistant", "content": "hi there"},
            ],
        })))
        .unwrap();

        assert_eq!(converted.instructions.as_deref(), Some("rule one\nrule two"));

        assert_json_snapshot!(converted.input, @r#"
        [
          {
            "role": "user",
            "content": [
              {
                "type": "input_text",
                "text": "hello"
              }
            ]
          },
          {
            "role": "assistant",
            "content": [
              {
                "type": "input_text",
                "text": "hi there"
              }
            ]
          }
        ]
        "#);
    }

    #[test]
    fn maps_tool_turns() {
        let converted = chat_to_responses(&request(json!({
            "model": "gpt-5",
            "messages": [
                {"role": "assistant", "tool_calls": [
                    {"id": "call_1", "type": "function", "function": {"name": "f", "arguments": "{\"a\":1}"}},
                ]},
                {"role": "tool", "tool_call_id": "call_1", "content": "42"},
            ],
        })))
        .unwrap();

        assert_json_snapshot!(converted.input, @r#"
        [
          {
            "type": "function_call",
            "call_id": "call_1",
            "name": "f",
            "arguments": "{\"a\":1}"
          },
          {
            "type": "function_call_output",
            "call_id": "call_1",
            "output": "42"
          }
        ]
        "#);
    }

    #[test]
    fn strips_fc_prefix_from_echoed_ids() {
        let converted = chat_to_responses(&request(json!({
            "model": "gpt-5",
            "messages": [
                {"role": "assistant", "tool_calls": [
                    {"id": "fc_1", "type": "function", "function": {"name": "f", "arguments": "{}"}},
                ]},
                {"role": "tool", "tool_call_id": "fc_1", "content": "ok"},
            ],
        })))
        .unwrap();

        let InputItem::FunctionCall(call) = &converted.input[0] else {
            panic!("expected function call");
        };
        assert_eq!(call.call_id, "1");

        let InputItem::FunctionCallOutput(output) = &converted.input[1] else {
            panic!("expected function call output");
        };
        assert_eq!(output.call_id, "1");
    }

    #[test]
    fn reasoning_content_replaces_missing_assistant_text() {
        let converted = chat_to_responses(&request(json!({
            "model": "gpt-5",
            "messages": [
                {"role": "assistant", "reasoning_content": "thinking..."},
                {"role": "user", "content": "go on"},
            ],
        })))
        .unwrap();

        let InputItem::Message(message) = &converted.input[0] else {
            panic!("expected message");
        };
        assert_eq!(message.content[0].text(), Some("thinking..."));
    }

    #[test]
    fn drops_tool_messages_without_call_ids() {
        let error = chat_to_responses(&request(json!({
            "model": "gpt-5",
            "messages": [{"role": "tool", "content": "orphan"}],
        })))
        .unwrap_err();

        assert!(error.to_string().contains("empty input list"));
    }

    #[test]
    fn empty_message_list_is_rejected() {
        let error = chat_to_responses(&request(json!({"model": "gpt-5", "messages": []}))).unwrap_err();
        assert!(matches!(error, crate::error::GatewayError::InvalidRequest(_)));
    }

    #[test]
    fn flattens_function_tools_and_passes_unknown_types_through() {
        let tools = convert_tools(&[
            json!({"type": "function", "function": {
                "name": "get_weather",
                "description": "look up weather",
                "parameters": {"type": "object"},
            }}),
            json!({"type": "web_search_preview"}),
        ]);

        assert_eq!(
            tools,
            vec![
                json!({
                    "type": "function",
                    "name": "get_weather",
                    "description": "look up weather",
                    "parameters": {"type": "object"},
                }),
                json!({"type": "web_search_preview"}),
            ]
        );
    }

    #[test]
    fn tool_choice_conversion() {
        assert_eq!(convert_tool_choice(&json!("auto")), json!("auto"));
        assert_eq!(
            convert_tool_choice(&json!({"type": "function", "function": {"name": "f"}})),
            json!({"type": "function", "name": "f"})
        );
    }

    #[test]
    fn round_trip_preserves_the_visible_message_sequence() {
        let converted = chat_to_responses(&request(json!({
            "model": "gpt-5",
            "messages": [
                {"role": "user", "content": "hi"},
                {"role": "assistant", "content": "let me check", "tool_calls": [
                    {"id": "call_1", "type": "function", "function": {"name": "f", "arguments": "{\"a\": 1}"}},
                ]},
                {"role": "tool", "tool_call_id": "call_1", "content": "42"},
                {"role": "user", "content": "and now?"},
            ],
        })))
        .unwrap();

        // Project the canonical items back into the visible sequence.
        let projected: Vec<(String, String)> = converted
            .input
            .iter()
            .map(|item| match item {
                InputItem::Message(message) => {
                    let role = serde_json::to_value(message.role).unwrap();
                    let text: String = message.content.iter().filter_map(|part| part.text()).collect();
                    (role.as_str().unwrap().to_string(), text)
                }
                InputItem::FunctionCall(call) => {
                    let arguments: serde_json::Value = serde_json::from_str(&call.arguments).unwrap();
                    ("tool_call".into(), format!("{}({arguments})", call.name))
                }
                InputItem::FunctionCallOutput(output) => ("tool_output".into(), output.output.clone()),
            })
            .collect();

        assert_eq!(
            projected,
            [
                ("user".to_string(), "hi".to_string()),
                ("assistant".to_string(), "let me check".to_string()),
                ("tool_call".to_string(), "f({\"a\":1})".to_string()),
                ("tool_output".to_string(), "42".to_string()),
                ("user".to_string(), "and now?".to_string()),
            ]
        );
    }

    #[test]
    fn images_become_input_image_parts() {
        let converted = chat_to_responses(&request(json!({
            "model": "gpt-5",
            "messages": [{"role": "user", "content": [
                {"type": "text", "text": "what is this"},
                {"type": "image_url", "image_url": {"url": "https://x/cat.png"}},
            ]}],
        })))
        .unwrap();

        assert_json_snapshot!(converted.input, @r#"
        [
          {
            "role": "user",
            "content": [
              {
                "type": "input_text",
                "text": "what is this"
              },
              {
                "type": "input_image",
                "image_url": "https://x/cat.png"
              }
            ]
          }
        ]
        "#);
    }
}
