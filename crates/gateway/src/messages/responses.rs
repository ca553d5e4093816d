//! Canonical internal request form, modeled on the OpenAI Responses API.
//!
//! Every inbound dialect is normalized into [`ResponsesRequest`] before the
//! variant generator and upstream selector see it.

pub(crate) mod from_chat;
pub(crate) mod from_gemini;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Canonical request sent (after variant expansion) to the Responses upstream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponsesRequest {
    pub model: String,

    /// System/developer instructions, newline-joined.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,

    pub input: Vec<InputItem>,

    /// Responses-shaped tool definitions. Unknown tool types pass through
    /// unchanged, so the element type stays a raw value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<Value>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<Reasoning>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_response_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_cache_retention: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub safety_identifier: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
}

impl ResponsesRequest {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            instructions: None,
            input: Vec::new(),
            tools: None,
            tool_choice: None,
            reasoning: None,
            max_output_tokens: None,
            temperature: None,
            top_p: None,
            previous_response_id: None,
            user: None,
            prompt_cache_retention: None,
            safety_identifier: None,
            stream: None,
        }
    }

    /// First user text in the input, used for session-key derivation.
    pub fn first_user_text(&self) -> Option<&str> {
        self.input.iter().find_map(|item| match item {
            InputItem::Message(message) if message.role == Role::User => {
                message.content.iter().find_map(ContentPart::text)
            }
            _ => None,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reasoning {
    pub effort: String,
}

/// One canonical input item.
///
/// Deserialization is forgiving: message items may omit `type`, which is why
/// the enum is untagged with the `type`-bearing variants tried first.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum InputItem {
    FunctionCall(FunctionCallItem),
    FunctionCallOutput(FunctionCallOutputItem),
    Message(MessageItem),
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub enum FunctionCallTag {
    #[serde(rename = "function_call")]
    FunctionCall,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub enum FunctionCallOutputTag {
    #[serde(rename = "function_call_output")]
    FunctionCallOutput,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionCallItem {
    #[serde(rename = "type")]
    pub kind: FunctionCallTag,

    /// Output-item id (`fc_…`), distinct from the call id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    pub call_id: String,
    pub name: String,

    /// Always a JSON string on the wire.
    pub arguments: String,

    /// Opaque signature the reasoning upstream expects echoed next turn.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thought_signature: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thought: Option<String>,
}

impl FunctionCallItem {
    pub fn new(call_id: impl Into<String>, name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            kind: FunctionCallTag::FunctionCall,
            id: None,
            call_id: call_id.into(),
            name: name.into(),
            arguments: arguments.into(),
            thought_signature: None,
            thought: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionCallOutputItem {
    #[serde(rename = "type")]
    pub kind: FunctionCallOutputTag,

    pub call_id: String,
    pub output: String,
}

impl FunctionCallOutputItem {
    pub fn new(call_id: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            kind: FunctionCallOutputTag::FunctionCallOutput,
            call_id: call_id.into(),
            output: output.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageItem {
    pub role: Role,
    pub content: Vec<ContentPart>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

/// A content part of a message input item.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ContentPart {
    #[serde(rename = "input_text")]
    InputText { text: String },

    #[serde(rename = "input_image")]
    InputImage { image_url: ImageUrl },

    /// Forward-compatible pass-through for part types we do not interpret
    /// (`output_text` echoed back by clients, audio, …).
    #[serde(untagged)]
    Other(Value),
}

impl ContentPart {
    pub fn text(&self) -> Option<&str> {
        match self {
            ContentPart::InputText { text } => Some(text),
            ContentPart::Other(value) => value.get("text").and_then(Value::as_str),
            ContentPart::InputImage { .. } => None,
        }
    }
}

/// Image reference: either a bare URL string or `{url}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ImageUrl {
    Url(String),
    Object { url: String },
}

impl ImageUrl {
    pub fn url(&self) -> &str {
        match self {
            ImageUrl::Url(url) => url,
            ImageUrl::Object { url } => url,
        }
    }
}

/// Strip the `fc_` prefix some clients echo back from output-item ids.
pub fn normalize_call_id(call_id: &str) -> &str {
    call_id.strip_prefix("fc_").unwrap_or(call_id)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::panic)]

    use insta::assert_json_snapshot;
    use serde_json::json;

    use super::{ContentPart, InputItem, ResponsesRequest, normalize_call_id};

    #[test]
    fn deserializes_messages_without_a_type_tag() {
        let item: InputItem = serde_json::from_value(json!({
            "role": "user",
            "content": [{"type": "input_text", "text": "hi"}],
        }))
        .unwrap();

        assert!(matches!(item, InputItem::Message(_)));
    }

    #[test]
    fn deserializes_function_call_items() {
        let item: InputItem = serde_json::from_value(json!({
            "type": "function_call",
            "call_id": "call_1",
            "name": "lookup",
            "arguments": "{}",
        }))
        .unwrap();

        let InputItem::FunctionCall(call) = item else {
            panic!("expected function call");
        };
        assert_eq!(call.call_id, "call_1");
    }

    #[test]
    fn unknown_content_parts_pass_through() {
        let part: ContentPart = serde_json::from_value(json!({
            "type": "output_text",
            "text": "echoed",
        }))
        .unwrap();

        assert!(matches!(part, ContentPart::Other(_)));
        assert_eq!(part.text(), Some("echoed"));
    }

    #[test]
    fn serializes_the_canonical_shape() {
        let mut request = ResponsesRequest::new("gpt-5");
        request.instructions = Some("be brief".into());
        request.input = vec![InputItem::Message(super::MessageItem {
            role: super::Role::User,
            content: vec![ContentPart::InputText { text: "hello".into() }],
        })];

        assert_json_snapshot!(request, @r#"
        {
          "model": "gpt-5",
          "instructions": "be brief",
          "input": [
            {
              "role": "user",
              "content": [
                {
                  "type": "input_text",
                  "text": "hello"
                }
              ]
            }
          ]
        }
        "#);
    }

    #[test]
    fn normalizes_echoed_output_item_ids() {
        assert_eq!(normalize_call_id("fc_abc"), "abc");
        assert_eq!(normalize_call_id("call_abc"), "call_abc");
    }
}
