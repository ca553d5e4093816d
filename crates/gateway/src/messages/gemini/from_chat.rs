//! Chat Completions → Gemini GenerateContent conversion.

use serde_json::{Value, json};

use crate::{
    error::{GatewayError, GatewayResult},
    image,
    messages::{
        chat::{ChatCompletionRequest, ChatContent, ChatRole},
        gemini::{
            GeminiContent, GeminiFunctionCall, GeminiFunctionResponse, GeminiGenerationConfig, GeminiInlineData,
            GeminiPart, GeminiRequest, GeminiTool, schema,
        },
        responses::normalize_call_id,
    },
    session::SignatureMap,
};

pub(crate) async fn chat_to_gemini(
    client: &reqwest::Client,
    request: &ChatCompletionRequest,
    signatures: &SignatureMap,
) -> GatewayResult<GeminiRequest> {
    let mut contents: Vec<GeminiContent> = Vec::new();
    let mut system_texts: Vec<String> = Vec::new();

    // Calls made by the most recent model turn, in emission order. Tool
    // results must come back as one user turn in the same order.
    let mut pending_calls: Vec<(String, String)> = Vec::new();
    let mut pending_results: Vec<(String, String)> = Vec::new();

    for message in &request.messages {
        if message.role != ChatRole::Tool && !pending_results.is_empty() {
            contents.push(function_response_turn(&pending_calls, std::mem::take(&mut pending_results)));
        }

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

                pending_results.push((
                    normalize_call_id(call_id).to_string(),
                    message.text().unwrap_or_default(),
                ));
            }
            ChatRole::Assistant => {
                pending_calls.clear();

                let mut parts = Vec::new();

                if let Some(text) = message.text().filter(|t| !t.is_empty()) {
                    parts.push(GeminiPart::text(text));
                }

                for call in message.tool_calls.iter().flatten() {
                    let call_id = call
                        .id
                        .as_deref()
                        .map(|id| normalize_call_id(id).to_string())
                        .unwrap_or_default();
                    let name = call.function.name.clone().unwrap_or_default();

                    let args = call
                        .function
                        .arguments
                        .as_deref()
                        .and_then(|raw| serde_json::from_str(raw).ok())
                        .unwrap_or_else(|| json!({}));

                    let cached = signatures.get(&call_id);

                    parts.push(GeminiPart {
                        function_call: Some(GeminiFunctionCall { name: name.clone(), args }),
                        thought_signature: cached.map(|record| record.thought_signature.clone()),
                        thought: cached.and_then(|record| record.thought.clone()).map(Value::String),
                        ..Default::default()
                    });

                    pending_calls.push((call_id, name));
                }

                if !parts.is_empty() {
                    contents.push(GeminiContent {
                        role: Some("model".into()),
                        parts,
                    });
                }
            }
            ChatRole::User | ChatRole::Other(_) => {
                let parts = user_parts(client, message.content.as_ref()).await;
                if !parts.is_empty() {
                    contents.push(GeminiContent {
                        role: Some("user".into()),
                        parts,
                    });
                }
            }
        }
    }

    if !pending_results.is_empty() {
        contents.push(function_response_turn(&pending_calls, pending_results));
    }

    if contents.is_empty() {
        return Err(GatewayError::InvalidRequest(
            "messages convert to an empty contents list".into(),
        ));
    }

    let system_instruction = (!system_texts.is_empty()).then(|| GeminiContent {
        role: None,
        parts: vec![GeminiPart::text(system_texts.join("\n"))],
    });

    let generation_config = GeminiGenerationConfig {
        max_output_tokens: request.max_output_tokens(),
        temperature: request.temperature,
        top_p: request.top_p,
    };

    let has_config =
        generation_config.max_output_tokens.is_some() || generation_config.temperature.is_some() || generation_config.top_p.is_some();

    Ok(GeminiRequest {
        contents,
        system_instruction,
        generation_config: has_config.then_some(generation_config),
        tools: convert_tools(request.tools.as_deref()),
    })
}

/// One user turn of `functionResponse` parts, ordered like the calls of the
/// preceding model turn.
fn function_response_turn(calls: &[(String, String)], mut results: Vec<(String, String)>) -> GeminiContent {
    let mut parts = Vec::new();

    for (call_id, name) in calls {
        let Some(position) = results.iter().position(|(result_id, _)| result_id == call_id) else {
            continue;
        };

        let (_, output) = results.remove(position);
        parts.push(function_response_part(name.clone(), output));
    }

    // Results with no matching call keep their own order at the end.
    for (call_id, output) in results {
        log::debug!("Tool result for unknown call {call_id:?}");
        parts.push(function_response_part(call_id, output));
    }

    GeminiContent {
        role: Some("user".into()),
        parts,
    }
}

fn function_response_part(name: String, output: String) -> GeminiPart {
    let response = match serde_json::from_str::<Value>(&output) {
        Ok(value @ Value::Object(_)) => value,
        _ => json!({ "result": output }),
    };

    GeminiPart {
        function_response: Some(GeminiFunctionResponse { name, response }),
        ..Default::default()
    }
}

async fn user_parts(client: &reqwest::Client, content: Option<&ChatContent>) -> Vec<GeminiPart> {
    let mut parts = Vec::new();

    match content {
        Some(ChatContent::Text(text)) => parts.push(GeminiPart::text(text.clone())),
        Some(ChatContent::Parts(source)) => {
            for part in source {
                if part.kind == "image_url"
                    && let Some(image_url) = &part.image_url
                {
                    let payload = image::classify(image_url.url());
                    if let Some((mime_type, data)) = image::resolve_inline(client, payload).await {
                        parts.push(GeminiPart {
                            inline_data: Some(GeminiInlineData { mime_type, data }),
                            ..Default::default()
                        });
                    }
                } else if let Some(text) = &part.text {
                    parts.push(GeminiPart::text(text.clone()));
                }
            }
        }
        None => {}
    }

    parts
}

fn convert_tools(tools: Option<&[Value]>) -> Option<Vec<GeminiTool>> {
    let declarations: Vec<Value> = tools?
        .iter()
        .filter_map(|tool| {
            if tool.get("type").and_then(Value::as_str) != Some("function") {
                log::debug!("Dropping non-function tool for Gemini");
                return None;
            }

            let function = tool.get("function").unwrap_or(tool);
            let name = function.get("name").and_then(Value::as_str)?;

            let mut declaration = json!({ "name": name });
            if let Some(description) = function.get("description") {
                declaration["description"] = description.clone();
            }
            if let Some(parameters) = function.get("parameters") {
                declaration["parameters"] = schema::to_gemini_schema(parameters, parameters);
            }

            Some(declaration)
        })
        .collect();

    (!declarations.is_empty()).then(|| {
        vec![GeminiTool {
            function_declarations: declarations,
        }]
    })
}
