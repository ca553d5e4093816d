//! Chat Completions → Anthropic Messages conversion.

use serde_json::{Value, json};

use crate::{
    error::{GatewayError, GatewayResult},
    image::{self, ImagePayload},
    messages::{
        anthropic::{
            AnthropicContent, AnthropicContentBlock, AnthropicImageSource, AnthropicMessage, AnthropicMessagesRequest,
            AnthropicMetadata, AnthropicTool,
        },
        chat::{ChatCompletionRequest, ChatContent, ChatRole},
    },
};

pub(crate) fn chat_to_anthropic(
    request: &ChatCompletionRequest,
    default_max_tokens: u32,
) -> GatewayResult<AnthropicMessagesRequest> {
    let model = request
        .model
        .clone()
        .ok_or_else(|| GatewayError::InvalidRequest("missing model".into()))?;

    let mut messages: Vec<AnthropicMessage> = Vec::new();
    let mut system_texts: Vec<String> = Vec::new();

    for message in &request.messages {
        match &message.role {
            ChatRole::System | ChatRole::Developer => {
                if let Some(content) = &message.content {
                    let text = content.flat_text();
                    if !text.is_empty() {
                        system_texts.push(text);
                    }
                }
            }
            ChatRole::Tool => {
                let Some(call_id) = message.tool_call_id.as_deref() else {
                    log::debug!("Dropping tool message without tool_call_id");
                    continue;
                };

                let block = AnthropicContentBlock::tool_result(
                    call_id,
                    Value::String(message.text().unwrap_or_default()),
                );

                // Consecutive tool results merge into one user turn; the
                // Messages API rejects back-to-back user messages.
                match messages.last_mut() {
                    Some(last) if last.role == "user" && has_tool_results(&last.content) => {
                        if let AnthropicContent::Blocks(blocks) = &mut last.content {
                            blocks.push(block);
                        }
                    }
                    _ => messages.push(AnthropicMessage {
                        role: "user".into(),
                        content: AnthropicContent::Blocks(vec![block]),
                    }),
                }
            }
            ChatRole::Assistant => {
                let mut blocks = Vec::new();

                if let Some(text) = message.text().filter(|t| !t.is_empty()) {
                    blocks.push(AnthropicContentBlock::text(text));
                }

                for call in message.tool_calls.iter().flatten() {
                    let id = call
                        .id
                        .clone()
                        .unwrap_or_else(|| format!("toolu_{}", uuid::Uuid::new_v4().simple()));

                    let input = call
                        .function
                        .arguments
                        .as_deref()
                        .and_then(|raw| serde_json::from_str(raw).ok())
                        .unwrap_or_else(|| json!({}));

                    blocks.push(AnthropicContentBlock::tool_use(
                        id,
                        call.function.name.clone().unwrap_or_default(),
                        input,
                    ));
                }

                if !blocks.is_empty() {
                    messages.push(AnthropicMessage {
                        role: "assistant".into(),
                        content: AnthropicContent::Blocks(blocks),
                    });
                }
            }
            ChatRole::User | ChatRole::Other(_) => {
                let blocks = user_blocks(message.content.as_ref());
                if !blocks.is_empty() {
                    messages.push(AnthropicMessage {
                        role: "user".into(),
                        content: AnthropicContent::Blocks(blocks),
                    });
                }
            }
        }
    }

    if messages.is_empty() {
        return Err(GatewayError::InvalidRequest(
            "messages convert to an empty message list".into(),
        ));
    }

    Ok(AnthropicMessagesRequest {
        model: Some(model),
        messages,
        system: (!system_texts.is_empty()).then(|| Value::String(system_texts.join("\n"))),
        max_tokens: Some(request.max_output_tokens().unwrap_or(default_max_tokens)),
        tools: convert_tools(request.tools.as_deref()),
        tool_choice: request.tool_choice.as_ref().map(convert_tool_choice),
        stream: request.stream,
        temperature: request.temperature,
        top_p: request.top_p,
        metadata: request.user.clone().map(|user_id| AnthropicMetadata {
            user_id: Some(user_id),
        }),
    })
}

fn has_tool_results(content: &AnthropicContent) -> bool {
    matches!(content, AnthropicContent::Blocks(blocks) if blocks.iter().any(|block| block.kind == "tool_result"))
}

fn user_blocks(content: Option<&ChatContent>) -> Vec<AnthropicContentBlock> {
    let mut blocks = Vec::new();

    match content {
        Some(ChatContent::Text(text)) => blocks.push(AnthropicContentBlock::text(text.clone())),
        Some(ChatContent::Parts(parts)) => {
            for part in parts {
                if part.kind == "image_url"
                    && let Some(image_url) = &part.image_url
                {
                    blocks.push(image_block(image::classify(image_url.url())));
                } else if let Some(text) = &part.text {
                    blocks.push(AnthropicContentBlock::text(text.clone()));
                }
            }
        }
        None => {}
    }

    blocks
}

fn image_block(payload: ImagePayload) -> AnthropicContentBlock {
    let source = match payload {
        ImagePayload::Inline { mime_type, data } => AnthropicImageSource {
            kind: "base64".into(),
            media_type: Some(mime_type),
            data: Some(data),
            url: None,
        },
        ImagePayload::Url(url) => AnthropicImageSource {
            kind: "url".into(),
            media_type: None,
            data: None,
            url: Some(url),
        },
    };

    AnthropicContentBlock {
        kind: "image".into(),
        source: Some(source),
        ..Default::default()
    }
}

fn convert_tools(tools: Option<&[Value]>) -> Option<Vec<AnthropicTool>> {
    let converted: Vec<AnthropicTool> = tools?
        .iter()
        .filter_map(|tool| {
            if tool.get("type").and_then(Value::as_str) != Some("function") {
                log::debug!("Dropping non-function tool for Anthropic");
                return None;
            }

            let function = tool.get("function").unwrap_or(tool);

            Some(AnthropicTool {
                name: function.get("name").and_then(Value::as_str)?.to_string(),
                description: function
                    .get("description")
                    .and_then(Value::as_str)
                    .map(str::to_string),
                input_schema: function.get("parameters").cloned(),
            })
        })
        .collect();

    (!converted.is_empty()).then_some(converted)
}

fn convert_tool_choice(choice: &Value) -> Value {
    match choice {
        Value::String(mode) => match mode.as_str() {
            "required" => json!({"type": "any"}),
            "none" => json!({"type": "none"}),
            _ => json!({"type": "auto"}),
        },
        other => {
            if other.get("type").and_then(Value::as_str) == Some("function")
                && let Some(name) = other.pointer("/function/name")
            {
                return json!({"type": "tool", "name": name});
            }

            other.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::panic)]

    use insta::assert_json_snapshot;
    use serde_json::json;

    use crate::messages::chat::ChatCompletionRequest;

    use super::chat_to_anthropic;

    fn convert(value: serde_json::Value) -> crate::messages::anthropic::AnthropicMessagesRequest {
        let request: ChatCompletionRequest = serde_json::from_value(value).unwrap();
        chat_to_anthropic(&request, 4096).unwrap()
    }

    #[test]
    fn tool_turns_become_tool_use_and_tool_result_blocks() {
        let converted = convert(json!({
            "model": "claude-sonnet-4-5",
            "messages": [
                {"role": "user", "content": "add it up"},
                {"role": "assistant", "tool_calls": [
                    {"id": "t1", "type": "function", "function": {"name": "sum", "arguments": "{\"n\":[1,2]}"}},
                ]},
                {"role": "tool", "tool_call_id": "t1", "content": "42"},
            ],
        }));

        assert_json_snapshot!(converted.messages, @r#"
        [
          {
            "role": "user",
            "content": [
              {
                "type": "text",
                "text": "add it up"
              }
            ]
          },
          {
            "role": "assistant",
            "content": [
              {
                "type": "tool_use",
                "id": "t1",
                "name": "sum",
                "input": {
                  "n": [
                    1,
                    2
                  ]
                }
              }
            ]
          },
          {
            "role": "user",
            "content": [
              {
                "type": "tool_result",
                "tool_use_id": "t1",
                "content": "42"
              }
            ]
          }
        ]
        "#);
    }

    #[test]
    fn consecutive_tool_results_share_one_user_turn() {
        let converted = convert(json!({
            "model": "claude-sonnet-4-5",
            "messages": [
                {"role": "assistant", "tool_calls": [
                    {"id": "a", "function": {"name": "f", "arguments": "{}"}},
                    {"id": "b", "function": {"name": "g", "arguments": "{}"}},
                ]},
                {"role": "tool", "tool_call_id": "a", "content": "1"},
                {"role": "tool", "tool_call_id": "b", "content": "2"},
            ],
        }));

        assert_eq!(converted.messages.len(), 2);

        let crate::messages::anthropic::AnthropicContent::Blocks(blocks) = &converted.messages[1].content else {
            panic!("expected blocks");
        };
        assert_eq!(blocks.len(), 2);
    }

    #[test]
    fn system_joins_and_max_tokens_defaults() {
        let converted = convert(json!({
            "model": "claude-sonnet-4-5",
            "messages": [
                {"role": "system", "content": "a"},
                {"role": "developer", "content": "b"},
                {"role": "user", "content": "hi"},
            ],
        }));

        assert_eq!(converted.system, Some(json!("a\nb")));
        assert_eq!(converted.max_tokens, Some(4096));
    }

    #[test]
    fn data_url_images_become_base64_sources() {
        let converted = convert(json!({
            "model": "claude-sonnet-4-5",
            "messages": [{"role": "user", "content": [
                {"type": "image_url", "image_url": "data:image/jpeg;base64,AAAA"},
            ]}],
        }));

        let crate::messages::anthropic::AnthropicContent::Blocks(blocks) = &converted.messages[0].content else {
            panic!("expected blocks");
        };

        let source = blocks[0].source.as_ref().unwrap();
        assert_eq!(source.kind, "base64");
        assert_eq!(source.media_type.as_deref(), Some("image/jpeg"));
        assert_eq!(source.data.as_deref(), Some("AAAA"));
    }

    #[test]
    fn tool_choice_maps_to_anthropic_modes() {
        let converted = convert(json!({
            "model": "claude-sonnet-4-5",
            "messages": [{"role": "user", "content": "x"}],
            "tool_choice": {"type": "function", "function": {"name": "f"}},
        }));

        assert_eq!(converted.tool_choice, Some(json!({"type": "tool", "name": "f"})));
    }
}
