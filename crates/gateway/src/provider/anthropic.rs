//! Anthropic provider: chat traffic routed by `claude*` model ids to the
//! native Messages upstream, a Messages-dialect passthrough, and token
//! counting with a local fallback.

use std::collections::HashMap;
use std::ops::ControlFlow;

use axum::Json;
use axum::response::{IntoResponse, Response};
use config::ClaudeConfig;
use futures::StreamExt;
use http::{HeaderMap, HeaderValue, header};
use secrecy::ExposeSecret;
use serde_json::Value;

use crate::{
    error::{GatewayError, GatewayResult},
    http_client::upstream_client,
    messages::{
        anthropic::{AnthropicTokenCount, stop_reason_to_finish_reason},
        chat::{
            ChatChoice, ChatCompletionChunk, ChatCompletionRequest, ChatCompletionResponse, ChatDelta,
            ChatFunctionCall, ChatFunctionDelta, ChatOutputMessage, ChatToolCall, ChatToolCallDelta,
        },
    },
    provider::sse_response,
    request::RequestContext,
    sse::{self, SseParser},
    token_estimate::estimate_input_tokens,
    translate::chat::done_frame,
    upstream::url::build_messages_url,
};

const ANTHROPIC_VERSION: &str = "2023-06-01";

pub(crate) struct AnthropicProvider {
    client: reqwest::Client,
    config: ClaudeConfig,
}

impl AnthropicProvider {
    pub fn new(config: ClaudeConfig) -> Self {
        Self {
            client: upstream_client(),
            config,
        }
    }

    fn messages_url(&self) -> GatewayResult<String> {
        build_messages_url(&self.config.base_url, self.config.messages_path.as_deref())
            .ok_or_else(|| GatewayError::ServerMisconfigured("CLAUDE_BASE_URL is unusable".into()))
    }

    /// Chat-dialect entry: convert, call the Messages API, translate back.
    pub async fn chat(&self, mut request: ChatCompletionRequest, context: &RequestContext) -> GatewayResult<Response> {
        if request.model.is_none() {
            request.model = self.config.default_model.clone();
        }

        let streaming = request.stream.unwrap_or(false);
        let model = request
            .model
            .clone()
            .ok_or_else(|| GatewayError::InvalidRequest("missing model".into()))?;

        let mut anthropic_request =
            crate::messages::anthropic::from_chat::chat_to_anthropic(&request, self.config.max_tokens)?;
        anthropic_request.stream = Some(streaming);

        let response = self
            .client
            .post(self.messages_url()?)
            .headers(self.headers(context))
            .json(&anthropic_request)
            .send()
            .await
            .map_err(|e| GatewayError::BadGateway(format!("anthropic upstream unreachable: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            log::warn!("Anthropic upstream error ({status}): {body}");

            return Err(GatewayError::Upstream {
                status: status.as_u16(),
                body,
            });
        }

        if streaming {
            Ok(stream_chat(response, model))
        } else {
            let body: Value = response
                .json()
                .await
                .map_err(|e| GatewayError::BadGateway(format!("anthropic upstream returned an unreadable body: {e}")))?;

            Ok(Json(chat_response_from_messages(&body, &model)).into_response())
        }
    }

    /// Messages-dialect passthrough for `claude*` models: same dialect on
    /// both sides, so the body and stream forward as-is.
    pub async fn messages_passthrough(&self, mut body: Value, context: &RequestContext) -> GatewayResult<Response> {
        let Some(object) = body.as_object_mut() else {
            return Err(GatewayError::InvalidRequest("body must be a JSON object".into()));
        };

        if object.get("model").map(Value::is_null).unwrap_or(true)
            && let Some(default_model) = &self.config.default_model
        {
            object.insert("model".into(), Value::String(default_model.clone()));
        }

        if object.get("max_tokens").and_then(Value::as_u64).is_none() {
            object.insert("max_tokens".into(), Value::from(self.config.max_tokens));
        }

        let streaming = object.get("stream").and_then(Value::as_bool).unwrap_or(false);

        let response = self
            .client
            .post(self.messages_url()?)
            .headers(self.headers(context))
            .json(&body)
            .send()
            .await
            .map_err(|e| GatewayError::BadGateway(format!("anthropic upstream unreachable: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            return Err(GatewayError::Upstream {
                status: status.as_u16(),
                body: error_body,
            });
        }

        if streaming {
            let frames = response
                .bytes_stream()
                .filter_map(|chunk| async move {
                    match chunk {
                        Ok(bytes) => Some(String::from_utf8_lossy(&bytes).into_owned()),
                        Err(e) => {
                            log::warn!("Anthropic passthrough read failed: {e}");
                            None
                        }
                    }
                })
                .boxed();

            Ok(sse_response(frames))
        } else {
            let body: Value = response
                .json()
                .await
                .map_err(|e| GatewayError::BadGateway(format!("anthropic upstream returned an unreadable body: {e}")))?;

            Ok(Json(body).into_response())
        }
    }

    /// `count_tokens`: forward upstream, falling back to the local estimate.
    pub async fn count_tokens(&self, body: Value, context: &RequestContext) -> GatewayResult<Response> {
        let url = format!("{}/count_tokens", self.messages_url()?);

        let upstream = self
            .client
            .post(&url)
            .headers(self.headers(context))
            .json(&body)
            .send()
            .await;

        match upstream {
            Ok(response) if response.status().is_success() => {
                let count: Value = response.json().await.unwrap_or_else(|e| {
                    log::debug!("Unreadable count_tokens body: {e}");
                    Value::Null
                });

                if count.get("input_tokens").is_some() {
                    return Ok(Json(count).into_response());
                }
            }
            Ok(response) => {
                log::debug!("count_tokens upstream returned {}", response.status());
            }
            Err(e) => {
                log::debug!("count_tokens upstream unreachable: {e}");
            }
        }

        let estimate = AnthropicTokenCount {
            input_tokens: estimate_input_tokens(&body),
        };

        Ok(Json(estimate).into_response())
    }

    fn headers(&self, context: &RequestContext) -> HeaderMap {
        let mut headers = HeaderMap::new();
        let key = self.config.api_key.expose_secret();

        if let Ok(value) = HeaderValue::from_str(key) {
            headers.insert("x-api-key", value);
        }
        if let Ok(value) = HeaderValue::from_str(&format!("Bearer {key}")) {
            headers.insert(header::AUTHORIZATION, value);
        }

        headers.insert("anthropic-version", HeaderValue::from_static(ANTHROPIC_VERSION));

        if let Some(session_id) = &context.session_id
            && let Ok(value) = HeaderValue::from_str(session_id)
        {
            headers.insert("x-session-id", value);
        }

        headers
    }
}

/// Translate the Messages SSE stream into Chat Completions chunks.
fn stream_chat(response: reqwest::Response, model: String) -> Response {
    let (sender, receiver) = futures::channel::mpsc::unbounded::<String>();

    tokio::spawn(async move {
        let chat_id = format!("chatcmpl_{}", uuid::Uuid::new_v4().simple());
        let created = jiff::Timestamp::now().as_second();

        let mut parser = SseParser::new();
        let mut body = response.bytes_stream();

        let mut sent_role = false;
        let mut stop_reason: Option<String> = None;
        // Anthropic block index -> chat tool-call index.
        let mut tool_indexes: HashMap<u64, usize> = HashMap::new();

        let send = |sender: &futures::channel::mpsc::UnboundedSender<String>, chunk: &ChatCompletionChunk| {
            let data = sonic_rs::to_string(chunk).unwrap_or_else(|e| {
                log::error!("Failed to serialize chunk: {e}");
                r#"{"error":"serialization failed"}"#.to_string()
            });

            if sender.unbounded_send(sse::encode("", &data)).is_err() {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        };

        while let Some(chunk) = body.next().await {
            let bytes = match chunk {
                Ok(bytes) => bytes,
                Err(e) => {
                    log::warn!("Anthropic stream read failed: {e}");
                    break;
                }
            };

            for frame in parser.push(&bytes) {
                let Ok(event) = serde_json::from_str::<Value>(&frame.data) else {
                    continue;
                };

                let mut delta: Option<ChatDelta> = None;

                match event.get("type").and_then(Value::as_str) {
                    Some("message_start") => {
                        sent_role = true;
                        delta = Some(ChatDelta {
                            role: Some("assistant"),
                            ..Default::default()
                        });
                    }
                    Some("content_block_start") => {
                        let block = event.get("content_block");
                        if block.and_then(|b| b.get("type")).and_then(Value::as_str) == Some("tool_use")
                            && let Some(index) = event.get("index").and_then(Value::as_u64)
                        {
                            let tool_index = tool_indexes.len();
                            tool_indexes.insert(index, tool_index);

                            delta = Some(ChatDelta {
                                tool_calls: Some(vec![ChatToolCallDelta {
                                    index: tool_index,
                                    id: block
                                        .and_then(|b| b.get("id"))
                                        .and_then(Value::as_str)
                                        .map(str::to_string),
                                    kind: "function",
                                    function: ChatFunctionDelta {
                                        name: block
                                            .and_then(|b| b.get("name"))
                                            .and_then(Value::as_str)
                                            .map(str::to_string),
                                        arguments: None,
                                    },
                                }]),
                                ..Default::default()
                            });
                        }
                    }
                    Some("content_block_delta") => {
                        let index = event.get("index").and_then(Value::as_u64);

                        match event.pointer("/delta/type").and_then(Value::as_str) {
                            Some("text_delta") => {
                                delta = event
                                    .pointer("/delta/text")
                                    .and_then(Value::as_str)
                                    .map(|text| ChatDelta {
                                        content: Some(text.to_string()),
                                        ..Default::default()
                                    });
                            }
                            Some("thinking_delta") => {
                                delta = event
                                    .pointer("/delta/thinking")
                                    .and_then(Value::as_str)
                                    .map(|text| ChatDelta {
                                        reasoning_content: Some(text.to_string()),
                                        ..Default::default()
                                    });
                            }
                            Some("input_json_delta") => {
                                delta = event
                                    .pointer("/delta/partial_json")
                                    .and_then(Value::as_str)
                                    .zip(index.and_then(|i| tool_indexes.get(&i)))
                                    .map(|(fragment, tool_index)| ChatDelta {
                                        tool_calls: Some(vec![ChatToolCallDelta {
                                            index: *tool_index,
                                            id: None,
                                            kind: "function",
                                            function: ChatFunctionDelta {
                                                name: None,
                                                arguments: Some(fragment.to_string()),
                                            },
                                        }]),
                                        ..Default::default()
                                    });
                            }
                            _ => {}
                        }
                    }
                    Some("message_delta") => {
                        if let Some(reason) = event.pointer("/delta/stop_reason").and_then(Value::as_str) {
                            stop_reason = Some(reason.to_string());
                        }
                    }
                    _ => {}
                }

                if let Some(delta) = delta {
                    if !sent_role {
                        sent_role = true;
                        let role = ChatCompletionChunk::new(
                            &chat_id,
                            created,
                            &model,
                            ChatDelta {
                                role: Some("assistant"),
                                ..Default::default()
                            },
                            None,
                        );
                        if send(&sender, &role).is_break() {
                            return;
                        }
                    }

                    let chunk = ChatCompletionChunk::new(&chat_id, created, &model, delta, None);
                    if send(&sender, &chunk).is_break() {
                        return;
                    }
                }
            }
        }

        let finish_reason = if !tool_indexes.is_empty() {
            "tool_calls"
        } else {
            stop_reason
                .as_deref()
                .map(stop_reason_to_finish_reason)
                .unwrap_or("stop")
        };

        let terminal = ChatCompletionChunk::new(&chat_id, created, &model, ChatDelta::default(), Some(finish_reason));
        if send(&sender, &terminal).is_break() {
            return;
        }

        let done = done_frame();
        let _ = sender.unbounded_send(sse::encode(&done.event, &done.data));
    });

    sse_response(receiver)
}

/// Non-streaming Messages response -> Chat Completions response.
fn chat_response_from_messages(body: &Value, model: &str) -> ChatCompletionResponse {
    let mut text = String::new();
    let mut reasoning = String::new();
    let mut tool_calls: Vec<ChatToolCall> = Vec::new();

    for block in body.get("content").and_then(Value::as_array).into_iter().flatten() {
        match block.get("type").and_then(Value::as_str) {
            Some("text") => {
                if let Some(t) = block.get("text").and_then(Value::as_str) {
                    text.push_str(t);
                }
            }
            Some("thinking") => {
                if let Some(t) = block.get("thinking").and_then(Value::as_str) {
                    reasoning.push_str(t);
                }
            }
            Some("tool_use") => {
                tool_calls.push(ChatToolCall {
                    id: block.get("id").and_then(Value::as_str).map(str::to_string),
                    kind: "function".into(),
                    function: ChatFunctionCall {
                        name: block.get("name").and_then(Value::as_str).map(str::to_string),
                        arguments: Some(
                            block
                                .get("input")
                                .map(|input| input.to_string())
                                .unwrap_or_else(|| "{}".into()),
                        ),
                    },
                });
            }
            _ => {}
        }
    }

    let finish_reason = if !tool_calls.is_empty() {
        "tool_calls"
    } else {
        body.get("stop_reason")
            .and_then(Value::as_str)
            .map(stop_reason_to_finish_reason)
            .unwrap_or("stop")
    };

    ChatCompletionResponse {
        id: format!(
            "chatcmpl_{}",
            body.get("id").and_then(Value::as_str).unwrap_or("unknown")
        ),
        object: "chat.completion",
        created: jiff::Timestamp::now().as_second(),
        model: model.to_string(),
        choices: vec![ChatChoice {
            index: 0,
            message: ChatOutputMessage {
                role: "assistant",
                content: (!text.is_empty()).then_some(text),
                reasoning_content: (!reasoning.is_empty()).then_some(reasoning),
                tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
            },
            finish_reason,
        }],
        usage: body.get("usage").cloned(),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::chat_response_from_messages;

    #[test]
    fn converts_messages_bodies_to_chat_responses() {
        let body = json!({
            "id": "msg_1",
            "content": [
                {"type": "text", "text": "I'll check."},
                {"type": "tool_use", "id": "toolu_1", "name": "f", "input": {"x": 1}},
            ],
            "stop_reason": "tool_use",
            "usage": {"input_tokens": 3, "output_tokens": 5},
        });

        let response = chat_response_from_messages(&body, "claude-sonnet-4-5");

        assert_eq!(response.id, "chatcmpl_msg_1");
        assert_eq!(response.choices[0].finish_reason, "tool_calls");

        let message = &response.choices[0].message;
        assert_eq!(message.content.as_deref(), Some("I'll check."));

        let calls = message.tool_calls.as_ref().unwrap();
        assert_eq!(calls[0].id.as_deref(), Some("toolu_1"));
        assert_eq!(calls[0].function.arguments.as_deref(), Some(r#"{"x":1}"#));
    }

    #[test]
    fn end_turn_maps_to_stop() {
        let body = json!({
            "id": "msg_2",
            "content": [{"type": "text", "text": "done"}],
            "stop_reason": "end_turn",
        });

        let response = chat_response_from_messages(&body, "claude-sonnet-4-5");
        assert_eq!(response.choices[0].finish_reason, "stop");
    }
}
