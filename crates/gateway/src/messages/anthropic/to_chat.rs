//! Anthropic Messages requests → Chat Completions shape.
//!
//! The Messages dialect funnels through the chat form before canonical
//! normalization, so everything downstream of chat conversion is shared.

use serde_json::{Value, json};

use crate::messages::{
    anthropic::{AnthropicContent, AnthropicContentBlock, AnthropicMessagesRequest},
    chat::{
        ChatCompletionRequest, ChatContent, ChatContentPart, ChatFunctionCall, ChatMessage, ChatRole, ChatToolCall,
    },
};

pub(crate) fn anthropic_to_chat(request: &AnthropicMessagesRequest) -> ChatCompletionRequest {
    let mut messages: Vec<ChatMessage> = Vec::new();

    if let Some(system) = request.system_text() {
        messages.push(ChatMessage {
            role: ChatRole::System,
            content: Some(ChatContent::Text(system)),
            tool_calls: None,
            tool_call_id: None,
            reasoning_content: None,
        });
    }

    for message in &request.messages {
        let role = match message.role.as_str() {
            "assistant" => ChatRole::Assistant,
            _ => ChatRole::User,
        };

        match &message.content {
            AnthropicContent::Text(text) => messages.push(plain_message(role, text.clone())),
            AnthropicContent::Blocks(blocks) => {
                convert_blocks(role, blocks, &mut messages);
            }
        }
    }

    ChatCompletionRequest {
        model: request.model.clone(),
        messages,
        tools: convert_tools(request),
        tool_choice: request.tool_choice.as_ref().map(convert_tool_choice),
        stream: request.stream,
        max_tokens: request.max_tokens,
        max_completion_tokens: None,
        temperature: request.temperature,
        top_p: request.top_p,
        user: request.metadata.as_ref().and_then(|metadata| metadata.user_id.clone()),
        reasoning_effort: None,
    }
}

fn convert_blocks(role: ChatRole, blocks: &[AnthropicContentBlock], messages: &mut Vec<ChatMessage>) {
    let mut parts: Vec<ChatContentPart> = Vec::new();
    let mut tool_calls: Vec<ChatToolCall> = Vec::new();
    let mut tool_results: Vec<(String, String)> = Vec::new();

    for block in blocks {
        match block.kind.as_str() {
            "text" => {
                if let Some(text) = &block.text {
                    parts.push(ChatContentPart::text(text.clone()));
                }
            }
            "image" => {
                if let Some(source) = &block.source {
                    let url = match source.kind.as_str() {
                        "base64" => {
                            let media_type = source.media_type.as_deref().unwrap_or("image/png");
                            let data = source.data.as_deref().unwrap_or_default();
                            format!("data:{media_type};base64,{data}")
                        }
                        _ => source.url.clone().unwrap_or_default(),
                    };

                    if !url.is_empty() {
                        parts.push(ChatContentPart::image(url));
                    }
                }
            }
            "tool_use" => {
                tool_calls.push(ChatToolCall {
                    id: block.id.clone(),
                    kind: "function".into(),
                    function: ChatFunctionCall {
                        name: block.name.clone(),
                        arguments: Some(
                            block
                                .input
                                .as_ref()
                                .map(|input| serde_json::to_string(input).unwrap_or_else(|_| "{}".into()))
                                .unwrap_or_else(|| "{}".into()),
                        ),
                    },
                });
            }
            "tool_result" => {
                if let Some(tool_use_id) = &block.tool_use_id {
                    tool_results.push((tool_use_id.clone(), tool_result_text(block.content.as_ref())));
                } else {
                    log::debug!("Dropping tool_result block without tool_use_id");
                }
            }
            other => log::debug!("Dropping content block of unhandled type {other:?}"),
        }
    }

    let has_parts = !parts.is_empty();
    let has_calls = !tool_calls.is_empty();

    if has_parts || has_calls {
        messages.push(ChatMessage {
            role,
            content: has_parts.then_some(ChatContent::Parts(parts)),
            tool_calls: has_calls.then_some(tool_calls),
            tool_call_id: None,
            reasoning_content: None,
        });
    }

    // tool_result blocks split out into separate tool-role messages.
    for (tool_use_id, text) in tool_results {
        messages.push(ChatMessage {
            role: ChatRole::Tool,
            content: Some(ChatContent::Text(text)),
            tool_calls: None,
            tool_call_id: Some(tool_use_id),
            reasoning_content: None,
        });
    }
}

fn tool_result_text(content: Option<&Value>) -> String {
    match content {
        Some(Value::String(text)) => text.clone(),
        Some(Value::Array(blocks)) => blocks
            .iter()
            .filter_map(|block| block.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join("\n"),
        Some(other) => other.to_string(),
        None => String::new(),
    }
}

fn plain_message(role: ChatRole, text: String) -> ChatMessage {
    ChatMessage {
        role,
        content: Some(ChatContent::Text(text)),
        tool_calls: None,
        tool_call_id: None,
        reasoning_content: None,
    }
}

fn convert_tools(request: &AnthropicMessagesRequest) -> Option<Vec<Value>> {
    let tools = request.tools.as_ref()?;

    let converted = tools
        .iter()
        .map(|tool| {
            let mut function = json!({ "name": tool.name });

            if let Some(description) = &tool.description {
                function["description"] = json!(description);
            }
            if let Some(schema) = &tool.input_schema {
                function["parameters"] = schema.clone();
            }

            json!({ "type": "function", "function": function })
        })
        .collect();

    Some(converted)
}

fn convert_tool_choice(choice: &Value) -> Value {
    match choice.get("type").and_then(Value::as_str) {
        Some("any") => json!("required"),
        Some("none") => json!("none"),
        Some("tool") => match choice.get("name") {
            Some(name) => json!({"type": "function", "function": {"name": name}}),
            None => json!("auto"),
        },
        _ => json!("auto"),
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::panic)]

    use serde_json::json;

    use crate::messages::{anthropic::AnthropicMessagesRequest, chat::ChatRole};

    use super::anthropic_to_chat;

    fn convert(value: serde_json::Value) -> crate::messages::chat::ChatCompletionRequest {
        let request: AnthropicMessagesRequest = serde_json::from_value(value).unwrap();
        anthropic_to_chat(&request)
    }

    #[test]
    fn tool_results_become_separate_tool_messages() {
        let converted = convert(json!({
            "model": "claude-sonnet-4-5",
            "messages": [
                {"role": "assistant", "content": [
                    {"type": "text", "text": "checking"},
                    {"type": "tool_use", "id": "t1", "name": "f", "input": {"x": 1}},
                ]},
                {"role": "user", "content": [
                    {"type": "tool_result", "tool_use_id": "t1", "content": "42"},
                    {"type": "text", "text": "and then?"},
                ]},
            ],
        }));

        let roles: Vec<&ChatRole> = converted.messages.iter().map(|m| &m.role).collect();
        assert_eq!(
            roles,
            [&ChatRole::Assistant, &ChatRole::User, &ChatRole::Tool]
        );

        let tool = &converted.messages[2];
        assert_eq!(tool.tool_call_id.as_deref(), Some("t1"));
        assert_eq!(tool.text().as_deref(), Some("42"));
    }

    #[test]
    fn tool_use_blocks_become_tool_calls() {
        let converted = convert(json!({
            "model": "claude-sonnet-4-5",
            "messages": [
                {"role": "assistant", "content": [
                    {"type": "tool_use", "id": "t1", "name": "f", "input": {"x": 1}},
                ]},
            ],
        }));

        let calls = converted.messages[0].tool_calls.as_ref().unwrap();
        assert_eq!(calls[0].id.as_deref(), Some("t1"));
        assert_eq!(calls[0].function.arguments.as_deref(), Some(r#"{"x":1}"#));
    }

    #[test]
    fn base64_images_become_data_urls() {
        let converted = convert(json!({
            "model": "claude-sonnet-4-5",
            "messages": [
                {"role": "user", "content": [
                    {"type": "image", "source": {"type": "base64", "media_type": "image/webp", "data": "Zm9v"}},
                ]},
            ],
        }));

        let crate::messages::chat::ChatContent::Parts(parts) = converted.messages[0].content.as_ref().unwrap() else {
            panic!("expected parts");
        };
        assert_eq!(
            parts[0].image_url.as_ref().unwrap().url(),
            "data:image/webp;base64,Zm9v"
        );
    }

    #[test]
    fn system_and_sampling_carry_over() {
        let converted = convert(json!({
            "model": "claude-sonnet-4-5",
            "system": "be brief",
            "max_tokens": 100,
            "temperature": 0.2,
            "messages": [{"role": "user", "content": "hi"}],
        }));

        assert_eq!(converted.messages[0].role, ChatRole::System);
        assert_eq!(converted.max_tokens, Some(100));
        assert_eq!(converted.temperature, Some(0.2));
    }

    #[test]
    fn tools_and_tool_choice_convert() {
        let converted = convert(json!({
            "model": "claude-sonnet-4-5",
            "messages": [{"role": "user", "content": "hi"}],
            "tools": [{"name": "f", "description": "d", "input_schema": {"type": "object"}}],
            "tool_choice": {"type": "tool", "name": "f"},
        }));

        let tools = converted.tools.unwrap();
        assert_eq!(tools[0].pointer("/function/name"), Some(&json!("f")));
        assert_eq!(
            converted.tool_choice,
            Some(json!({"type": "function", "function": {"name": "f"}}))
        );
    }
}
