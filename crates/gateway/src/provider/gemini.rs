//! Gemini provider: chat traffic routed by `gemini*` model ids to the native
//! GenerateContent upstream.

use std::ops::ControlFlow;

use axum::Json;
use axum::response::{IntoResponse, Response};
use config::GeminiConfig;
use futures::StreamExt;
use http::{HeaderMap, HeaderValue};
use secrecy::ExposeSecret;

use crate::{
    error::{GatewayError, GatewayResult},
    http_client::{image_client, upstream_client},
    messages::{
        chat::{
            ChatChoice, ChatCompletionChunk, ChatCompletionRequest, ChatCompletionResponse, ChatDelta,
            ChatFunctionDelta, ChatOutputMessage, ChatToolCallDelta,
        },
        gemini::{GeminiResponse, from_chat::chat_to_gemini, to_chat},
    },
    provider::sse_response,
    request::RequestContext,
    session::{SessionState, derive_session_key},
    sse::{self, SseParser},
    translate::chat::done_frame,
    upstream::url::build_gemini_url,
};

pub(crate) struct GeminiProvider {
    client: reqwest::Client,
    config: GeminiConfig,
    session: SessionState,
}

impl GeminiProvider {
    pub fn new(config: GeminiConfig, session: SessionState) -> Self {
        Self {
            client: upstream_client(),
            config,
            session,
        }
    }

    pub async fn chat(&self, request: ChatCompletionRequest, context: &RequestContext) -> GatewayResult<Response> {
        let streaming = request.stream.unwrap_or(false);

        let model = request
            .model
            .clone()
            .or_else(|| self.config.default_model.clone())
            .ok_or_else(|| GatewayError::InvalidRequest("missing model".into()))?;

        let first_user_text = request
            .messages
            .iter()
            .find(|message| message.role == crate::messages::chat::ChatRole::User)
            .and_then(|message| message.text());

        let session_key = derive_session_key(
            context.session_id.as_deref(),
            request.user.as_deref(),
            &model,
            first_user_text.as_deref(),
            context.bearer.as_deref(),
        );

        let signatures = self.session.thought_signatures(&session_key);
        let gemini_request = chat_to_gemini(&image_client(), &request, &signatures).await?;

        let method = if streaming { "streamGenerateContent" } else { "generateContent" };
        let mut url = build_gemini_url(&self.config.base_url, &model, method)
            .ok_or_else(|| GatewayError::ServerMisconfigured("GEMINI_BASE_URL is unusable".into()))?;

        if streaming {
            url.push_str("?alt=sse");
        }

        let response = self
            .client
            .post(&url)
            .headers(self.headers(context))
            .json(&gemini_request)
            .send()
            .await
            .map_err(|e| GatewayError::BadGateway(format!("gemini upstream unreachable: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            log::warn!("Gemini upstream error ({status}): {body}");

            return Err(GatewayError::Upstream {
                status: status.as_u16(),
                body,
            });
        }

        if streaming {
            Ok(self.stream_chat(response, model, session_key))
        } else {
            let gemini_response: GeminiResponse = response
                .json()
                .await
                .map_err(|e| GatewayError::BadGateway(format!("gemini upstream returned an unreadable body: {e}")))?;

            let extract = to_chat::extract(&gemini_response);

            if !extract.signatures.is_empty() {
                self.session.merge_thought_signatures(&session_key, extract.signatures);
            }

            let response = ChatCompletionResponse {
                id: format!("chatcmpl_{}", uuid::Uuid::new_v4().simple()),
                object: "chat.completion",
                created: jiff::Timestamp::now().as_second(),
                model,
                choices: vec![ChatChoice {
                    index: 0,
                    message: ChatOutputMessage {
                        role: "assistant",
                        content: (!extract.text.is_empty()).then_some(extract.text),
                        reasoning_content: (!extract.reasoning.is_empty()).then_some(extract.reasoning),
                        tool_calls: (!extract.tool_calls.is_empty()).then_some(extract.tool_calls),
                    },
                    finish_reason: extract.finish_reason.unwrap_or("stop"),
                }],
                usage: gemini_response.usage_metadata,
            };

            Ok(Json(response).into_response())
        }
    }

    /// Translate the Gemini SSE stream into Chat Completions chunks.
    fn stream_chat(&self, response: reqwest::Response, model: String, session_key: String) -> Response {
        let (sender, receiver) = futures::channel::mpsc::unbounded::<String>();
        let session = self.session.clone();

        tokio::spawn(async move {
            let chat_id = format!("chatcmpl_{}", uuid::Uuid::new_v4().simple());
            let created = jiff::Timestamp::now().as_second();

            let mut parser = SseParser::new();
            let mut body = response.bytes_stream();

            let mut sent_role = false;
            let mut tool_index = 0usize;
            let mut saw_tool_calls = false;
            let mut finish_hint: Option<&'static str> = None;
            let mut signatures = Vec::new();

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
                        log::warn!("Gemini stream read failed: {e}");
                        break;
                    }
                };

                for frame in parser.push(&bytes) {
                    let Ok(gemini_chunk) = serde_json::from_str::<GeminiResponse>(&frame.data) else {
                        log::debug!("Skipping undecodable Gemini chunk");
                        continue;
                    };

                    let extract = to_chat::extract(&gemini_chunk);
                    signatures.extend(extract.signatures);

                    if let Some(reason) = extract.finish_reason {
                        finish_hint = Some(reason);
                    }

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

                    if !extract.text.is_empty() {
                        let delta = ChatCompletionChunk::new(
                            &chat_id,
                            created,
                            &model,
                            ChatDelta {
                                content: Some(extract.text),
                                ..Default::default()
                            },
                            None,
                        );
                        if send(&sender, &delta).is_break() {
                            return;
                        }
                    }

                    if !extract.reasoning.is_empty() {
                        let delta = ChatCompletionChunk::new(
                            &chat_id,
                            created,
                            &model,
                            ChatDelta {
                                reasoning_content: Some(extract.reasoning),
                                ..Default::default()
                            },
                            None,
                        );
                        if send(&sender, &delta).is_break() {
                            return;
                        }
                    }

                    for call in extract.tool_calls {
                        saw_tool_calls = true;

                        let delta = ChatCompletionChunk::new(
                            &chat_id,
                            created,
                            &model,
                            ChatDelta {
                                tool_calls: Some(vec![ChatToolCallDelta {
                                    index: tool_index,
                                    id: call.id,
                                    kind: "function",
                                    function: ChatFunctionDelta {
                                        name: call.function.name,
                                        arguments: call.function.arguments,
                                    },
                                }]),
                                ..Default::default()
                            },
                            None,
                        );
                        tool_index += 1;

                        if send(&sender, &delta).is_break() {
                            return;
                        }
                    }
                }
            }

            if !signatures.is_empty() {
                session.merge_thought_signatures(&session_key, signatures);
            }

            let finish_reason = if saw_tool_calls { "tool_calls" } else { finish_hint.unwrap_or("stop") };
            let terminal = ChatCompletionChunk::new(&chat_id, created, &model, ChatDelta::default(), Some(finish_reason));

            if send(&sender, &terminal).is_break() {
                return;
            }

            let done = done_frame();
            let _ = sender.unbounded_send(sse::encode(&done.event, &done.data));
        });

        sse_response(receiver)
    }

    fn headers(&self, context: &RequestContext) -> HeaderMap {
        let mut headers = HeaderMap::new();

        if let Ok(value) = HeaderValue::from_str(self.config.api_key.expose_secret()) {
            headers.insert("x-goog-api-key", value);
        }

        if let Some(session_id) = &context.session_id
            && let Ok(value) = HeaderValue::from_str(session_id)
        {
            headers.insert("x-session-id", value);
        }

        headers
    }
}
