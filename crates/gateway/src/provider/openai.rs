//! The OpenAI Responses provider: canonical normalization target and the
//! per-request orchestrator.
//!
//! Each request flows through session-key derivation, cached-signature
//! patching, delta-or-full turn construction, the variant/URL sweep, and one
//! of the dialect translators, with session state written back on
//! completion.

use std::collections::HashSet;
use std::time::Duration;

use axum::Json;
use axum::response::{IntoResponse, Response};
use config::{LimitsConfig, OpenAiConfig};
use http::{HeaderMap, HeaderValue, header};
use itertools::Itertools;
use secrecy::ExposeSecret;

use crate::{
    error::{GatewayError, GatewayResult},
    http_client::upstream_client,
    messages::{
        anthropic::AnthropicMessagesRequest,
        chat::{ChatCompletionRequest, TextCompletionRequest},
        gemini::GeminiRequest,
        responses::{
            InputItem, ResponsesRequest, Role,
            from_chat::{chat_to_responses, text_to_responses},
            from_gemini::gemini_to_responses,
            normalize_call_id,
        },
    },
    request::RequestContext,
    session::{SessionState, SignatureMap, derive_session_key, signature_record},
    translate::{
        StreamTranslator,
        anthropic::{AnthropicTranslator, anthropic_response},
        chat::{ChatTranslator, TextTranslator, chat_response, text_response},
        driver::{collect_state, frame_stream},
        gemini::{GeminiTranslator, gemini_response},
        responses::{ResponsesTranslator, responses_response},
        state::StreamState,
    },
    upstream::{selector::select_upstream, url::build_responses_urls, variant::build_variants},
};

/// Client dialect the response is emitted in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Dialect {
    Chat,
    Text,
    Responses,
    Gemini,
    Anthropic,
}

pub(crate) struct OpenAiProvider {
    client: reqwest::Client,
    config: OpenAiConfig,
    urls: Vec<String>,
    session: SessionState,
    limits: LimitsConfig,
}

impl OpenAiProvider {
    pub fn new(config: OpenAiConfig, limits: LimitsConfig, session: SessionState) -> GatewayResult<Self> {
        let urls = build_responses_urls(&config.base_urls, config.responses_path.as_deref());

        if urls.is_empty() {
            return Err(GatewayError::ServerMisconfigured(
                "OPENAI_BASE_URL yields no usable endpoint URLs".into(),
            ));
        }

        log::debug!("Responses endpoint candidates: [{}]", urls.iter().join(", "));

        Ok(Self {
            client: upstream_client(),
            config,
            urls,
            session,
            limits,
        })
    }

    pub async fn chat(&self, request: ChatCompletionRequest, context: &RequestContext) -> GatewayResult<Response> {
        let streaming = request.stream.unwrap_or(false);
        let canonical = chat_to_responses(&request)?;

        self.execute(canonical, context, Dialect::Chat, streaming).await
    }

    pub async fn completions(
        &self,
        request: TextCompletionRequest,
        context: &RequestContext,
    ) -> GatewayResult<Response> {
        let streaming = request.stream.unwrap_or(false);
        let canonical = text_to_responses(&request)?;

        self.execute(canonical, context, Dialect::Text, streaming).await
    }

    pub async fn responses(&self, canonical: ResponsesRequest, context: &RequestContext) -> GatewayResult<Response> {
        let streaming = canonical.stream.unwrap_or(false);

        self.execute(canonical, context, Dialect::Responses, streaming).await
    }

    pub async fn messages(
        &self,
        request: AnthropicMessagesRequest,
        context: &RequestContext,
    ) -> GatewayResult<Response> {
        let streaming = request.stream.unwrap_or(false);
        let chat = crate::messages::anthropic::to_chat::anthropic_to_chat(&request);
        let canonical = chat_to_responses(&chat)?;

        self.execute(canonical, context, Dialect::Anthropic, streaming).await
    }

    pub async fn generate_content(
        &self,
        model: &str,
        request: GeminiRequest,
        streaming: bool,
        context: &RequestContext,
    ) -> GatewayResult<Response> {
        let canonical = gemini_to_responses(model, &request)?;

        self.execute(canonical, context, Dialect::Gemini, streaming).await
    }

    async fn execute(
        &self,
        mut canonical: ResponsesRequest,
        context: &RequestContext,
        dialect: Dialect,
        streaming: bool,
    ) -> GatewayResult<Response> {
        canonical.stream = None;

        if canonical.reasoning.is_none()
            && let Some(effort) = &self.config.reasoning_effort
        {
            canonical.reasoning = Some(crate::messages::responses::Reasoning { effort: effort.clone() });
        }

        let model = canonical.model.clone();
        let session_key = derive_session_key(
            context.session_id.as_deref(),
            canonical.user.as_deref(),
            &model,
            canonical.first_user_text(),
            context.bearer.as_deref(),
        );

        let signatures = self.session.thought_signatures(&session_key);
        let previous = self.session.previous_response_id(&session_key);

        let (mut request, used_delta) = build_turn_request(canonical.clone(), previous, &self.limits);
        apply_cached_thought_signatures(&mut request, &signatures);

        let headers = self.upstream_headers(context);
        let probe_timeout = Duration::from_millis(self.config.probe_timeout_ms);

        let variants = build_variants(&request, streaming);
        let selected = match select_upstream(&self.client, &self.urls, &variants, &headers, probe_timeout).await {
            Ok(selected) => selected,
            Err(error) if used_delta && attributable_to_previous_response(&error) => {
                log::debug!("Upstream rejected previous_response_id; retrying with the full conversation");

                let mut full = canonical;
                full.previous_response_id = None;
                full.input = trim_input(std::mem::take(&mut full.input), &self.limits);
                apply_cached_thought_signatures(&mut full, &signatures);

                let variants = build_variants(&full, streaming);
                select_upstream(&self.client, &self.urls, &variants, &headers, probe_timeout).await?
            }
            Err(error) => return Err(error),
        };

        log::debug!("Serving from upstream {}", selected.url);

        let cap = self.config.max_buffered_sse_bytes;

        if streaming {
            let translator: Box<dyn StreamTranslator> = match dialect {
                Dialect::Chat => Box::new(ChatTranslator::new(&model)),
                Dialect::Text => Box::new(TextTranslator::new(&model)),
                Dialect::Responses => Box::new(ResponsesTranslator::new(&model)),
                Dialect::Gemini => Box::new(GeminiTranslator::new()),
                Dialect::Anthropic => Box::new(AnthropicTranslator::new(&model)),
            };

            let session = self.session.clone();
            let hook: Box<dyn FnOnce(&StreamState) + Send> = Box::new(move |state: &StreamState| {
                update_session(&session, &session_key, state);
            });

            let frames = frame_stream(selected, translator, cap, Some(hook));
            return Ok(crate::provider::sse_response(frames));
        }

        let state = collect_state(selected, cap).await?;
        update_session(&self.session, &session_key, &state);

        let response = match dialect {
            Dialect::Chat => Json(chat_response(&state, &model)).into_response(),
            Dialect::Text => Json(text_response(&state, &model)).into_response(),
            Dialect::Responses => Json(responses_response(&state, &model)).into_response(),
            Dialect::Gemini => Json(gemini_response(&state)).into_response(),
            Dialect::Anthropic => Json(anthropic_response(&state, &model)).into_response(),
        };

        Ok(response)
    }

    fn upstream_headers(&self, context: &RequestContext) -> HeaderMap {
        let mut headers = HeaderMap::new();
        let key = self.config.api_key.expose_secret();

        if let Ok(value) = HeaderValue::from_str(&format!("Bearer {key}")) {
            headers.insert(header::AUTHORIZATION, value);
        }
        if let Ok(value) = HeaderValue::from_str(key) {
            headers.insert("x-api-key", value.clone());
            headers.insert("x-goog-api-key", value);
        }

        headers.insert("openai-beta", HeaderValue::from_static("responses=v1"));

        if let Some(session_id) = &context.session_id
            && let Ok(value) = HeaderValue::from_str(session_id)
        {
            headers.insert("x-session-id", value);
        }

        headers
    }
}

/// Decide between a delta request anchored on the stored response id and a
/// full (trimmed) conversation.
fn build_turn_request(
    mut canonical: ResponsesRequest,
    previous: Option<String>,
    limits: &LimitsConfig,
) -> (ResponsesRequest, bool) {
    let has_assistant_turn = canonical.input.iter().any(is_assistant_turn_item);

    if canonical.previous_response_id.is_none()
        && has_assistant_turn
        && within_limits(&canonical.input, limits)
        && let Some(previous) = previous
    {
        let delta = input_after_last_assistant_turn(&canonical.input);
        if !delta.is_empty() {
            canonical.previous_response_id = Some(previous);
            canonical.input = delta;
            return (canonical, true);
        }
    }

    canonical.input = trim_input(std::mem::take(&mut canonical.input), limits);
    (canonical, false)
}

fn is_assistant_turn_item(item: &InputItem) -> bool {
    match item {
        InputItem::Message(message) => message.role == Role::Assistant,
        InputItem::FunctionCall(_) => true,
        InputItem::FunctionCallOutput(_) => false,
    }
}

fn input_after_last_assistant_turn(input: &[InputItem]) -> Vec<InputItem> {
    let last = input.iter().rposition(is_assistant_turn_item);

    match last {
        Some(index) => input[index + 1..].to_vec(),
        None => Vec::new(),
    }
}

fn within_limits(input: &[InputItem], limits: &LimitsConfig) -> bool {
    let turns = input.iter().filter(|item| is_assistant_turn_item(item)).count();

    input.len() <= limits.max_messages && turns <= limits.max_turns && char_cost(input) <= limits.max_input_chars
}

fn char_cost(input: &[InputItem]) -> usize {
    input
        .iter()
        .map(|item| match item {
            InputItem::Message(message) => message
                .content
                .iter()
                .map(|part| part.text().map(str::len).unwrap_or(0))
                .sum(),
            InputItem::FunctionCall(call) => call.arguments.len() + call.name.len(),
            InputItem::FunctionCallOutput(output) => output.output.len(),
        })
        .sum()
}

/// Trim oversized conversations: oldest non-system turns go first, system
/// messages and the final user turn always survive, and tool-call pairs are
/// dropped or kept together.
fn trim_input(input: Vec<InputItem>, limits: &LimitsConfig) -> Vec<InputItem> {
    if within_limits(&input, limits) {
        return input;
    }

    let mut system: Vec<InputItem> = Vec::new();
    let mut rest: Vec<InputItem> = Vec::new();

    for item in input {
        match &item {
            InputItem::Message(message) if message.role == Role::System => system.push(item),
            _ => rest.push(item),
        }
    }

    let system_cost = char_cost(&system);
    let mut kept_reversed: Vec<InputItem> = Vec::new();
    let mut chars = system_cost;
    let mut turns = 0usize;

    for item in rest.into_iter().rev() {
        let cost = char_cost(std::slice::from_ref(&item));
        let is_turn = is_assistant_turn_item(&item);

        let over_budget = !kept_reversed.is_empty()
            && (kept_reversed.len() + system.len() + 1 > limits.max_messages
                || chars + cost > limits.max_input_chars
                || (is_turn && turns + 1 > limits.max_turns));

        if over_budget {
            break;
        }

        chars += cost;
        if is_turn {
            turns += 1;
        }
        kept_reversed.push(item);
    }

    let mut kept: Vec<InputItem> = system;
    kept.extend(kept_reversed.into_iter().rev());

    drop_unpaired_tool_items(&mut kept);
    kept
}

/// After trimming, function calls and outputs must still pair up; orphans on
/// either side are removed.
fn drop_unpaired_tool_items(input: &mut Vec<InputItem>) {
    let call_ids: HashSet<String> = input
        .iter()
        .filter_map(|item| match item {
            InputItem::FunctionCall(call) => Some(call.call_id.clone()),
            _ => None,
        })
        .collect();

    let output_ids: HashSet<String> = input
        .iter()
        .filter_map(|item| match item {
            InputItem::FunctionCallOutput(output) => Some(output.call_id.clone()),
            _ => None,
        })
        .collect();

    input.retain(|item| match item {
        InputItem::FunctionCall(call) => output_ids.contains(&call.call_id),
        InputItem::FunctionCallOutput(output) => call_ids.contains(&output.call_id),
        InputItem::Message(_) => true,
    });
}

/// Fill cached thought signatures into function-call items; drop calls that
/// still lack one only when the turn is anchored by `previous_response_id`
/// and the request carries the matching output.
pub(crate) fn apply_cached_thought_signatures(request: &mut ResponsesRequest, signatures: &SignatureMap) {
    let anchored = request.previous_response_id.is_some();

    let output_ids: HashSet<String> = request
        .input
        .iter()
        .filter_map(|item| match item {
            InputItem::FunctionCallOutput(output) => Some(normalize_call_id(&output.call_id).to_string()),
            _ => None,
        })
        .collect();

    request.input.retain_mut(|item| {
        let InputItem::FunctionCall(call) = item else {
            return true;
        };

        if call.thought_signature.is_some() {
            return true;
        }

        let call_id = normalize_call_id(&call.call_id).to_string();

        if let Some(record) = signatures.get(&call_id) {
            call.thought_signature = Some(record.thought_signature.clone());
            if call.thought.is_none() {
                call.thought = record.thought.clone();
            }
            return true;
        }

        // Without a signature the upstream rejects the echoed call, but the
        // output can only be resolved against history when anchored.
        !(anchored && output_ids.contains(&call_id))
    });
}

fn attributable_to_previous_response(error: &GatewayError) -> bool {
    let GatewayError::Upstream { body, .. } = error else {
        return false;
    };

    let lowered = body.to_lowercase();
    lowered.contains("previous_response") || lowered.contains("previous response")
}

fn update_session(session: &SessionState, session_key: &str, state: &StreamState) {
    if let Some(response_id) = &state.response_id {
        session.set_previous_response_id(session_key, response_id);
    }

    if state.signatures.is_empty() {
        return;
    }

    let names: std::collections::HashMap<&str, Option<String>> = state
        .tool_calls()
        .iter()
        .map(|call| (call.call_id.as_str(), call.name.clone()))
        .collect();

    let updates = state.signatures.iter().map(|(call_id, signature, thought)| {
        let name = names.get(call_id.as_str()).cloned().flatten();
        (
            call_id.clone(),
            signature_record(signature.clone(), thought.clone(), name),
        )
    });

    session.merge_thought_signatures(session_key, updates);
}

#[cfg(test)]
mod tests {
    #![allow(clippy::panic)]

    use config::LimitsConfig;

    use crate::messages::responses::{
        ContentPart, FunctionCallItem, FunctionCallOutputItem, InputItem, MessageItem, ResponsesRequest, Role,
    };
    use crate::session::{SessionState, SignatureMap, signature_record};
    use crate::translate::state::StreamState;

    use super::{apply_cached_thought_signatures, build_turn_request, trim_input, update_session};

    fn user(text: &str) -> InputItem {
        InputItem::Message(MessageItem {
            role: Role::User,
            content: vec![ContentPart::InputText { text: text.into() }],
        })
    }

    fn assistant(text: &str) -> InputItem {
        InputItem::Message(MessageItem {
            role: Role::Assistant,
            content: vec![ContentPart::InputText { text: text.into() }],
        })
    }

    fn call(id: &str) -> InputItem {
        InputItem::FunctionCall(FunctionCallItem::new(id, "f", "{}"))
    }

    fn output(id: &str) -> InputItem {
        InputItem::FunctionCallOutput(FunctionCallOutputItem::new(id, "ok"))
    }

    fn request(input: Vec<InputItem>) -> ResponsesRequest {
        let mut request = ResponsesRequest::new("gpt-5");
        request.input = input;
        request
    }

    #[test]
    fn delta_request_carries_only_messages_after_the_last_assistant_turn() {
        let canonical = request(vec![user("one"), assistant("two"), user("three")]);

        let (built, used_delta) = build_turn_request(canonical, Some("resp_1".into()), &LimitsConfig::default());

        assert!(used_delta);
        assert_eq!(built.previous_response_id.as_deref(), Some("resp_1"));
        assert_eq!(built.input.len(), 1);
        assert!(matches!(&built.input[0], InputItem::Message(m) if m.role == Role::User));
    }

    #[test]
    fn first_turn_requests_stay_full() {
        let canonical = request(vec![user("one")]);

        let (built, used_delta) = build_turn_request(canonical, Some("resp_1".into()), &LimitsConfig::default());

        assert!(!used_delta);
        assert_eq!(built.previous_response_id, None);
        assert_eq!(built.input.len(), 1);
    }

    #[test]
    fn missing_store_entry_means_full_request() {
        let canonical = request(vec![user("one"), assistant("two"), user("three")]);

        let (built, used_delta) = build_turn_request(canonical, None, &LimitsConfig::default());

        assert!(!used_delta);
        assert_eq!(built.input.len(), 3);
    }

    #[test]
    fn tool_outputs_after_the_call_ride_in_the_delta() {
        let canonical = request(vec![user("one"), call("c1"), output("c1")]);

        let (built, used_delta) = build_turn_request(canonical, Some("resp_1".into()), &LimitsConfig::default());

        assert!(used_delta);
        assert_eq!(built.input.len(), 1);
        assert!(matches!(&built.input[0], InputItem::FunctionCallOutput(o) if o.call_id == "c1"));
    }

    #[test]
    fn trimming_preserves_system_and_the_final_user_turn() {
        let limits = LimitsConfig {
            max_turns: 12,
            max_messages: 3,
            max_input_chars: 300_000,
        };

        let mut input = vec![InputItem::Message(MessageItem {
            role: Role::System,
            content: vec![ContentPart::InputText { text: "sys".into() }],
        })];
        for i in 0..10 {
            input.push(user(&format!("u{i}")));
            input.push(assistant(&format!("a{i}")));
        }
        input.push(user("final"));

        let trimmed = trim_input(input, &limits);

        assert!(trimmed.len() <= 3);
        assert!(matches!(&trimmed[0], InputItem::Message(m) if m.role == Role::System));

        let InputItem::Message(last) = trimmed.last().unwrap() else {
            panic!("expected message");
        };
        assert_eq!(last.content[0].text(), Some("final"));
    }

    #[test]
    fn trimming_drops_unpaired_tool_items() {
        let limits = LimitsConfig {
            max_turns: 12,
            max_messages: 2,
            max_input_chars: 300_000,
        };

        // The call falls outside the window while its output survives.
        let input = vec![user("one"), call("c1"), output("c1"), user("final")];
        let trimmed = trim_input(input, &limits);

        assert!(
            !trimmed
                .iter()
                .any(|item| matches!(item, InputItem::FunctionCallOutput(_)))
        );
        assert!(!trimmed.iter().any(|item| matches!(item, InputItem::FunctionCall(_))));
    }

    #[test]
    fn completion_updates_the_session_store() {
        let session = SessionState::in_memory();

        let mut state = StreamState::new();
        state.response_id = Some("r_9".into());
        state.signatures.push(("fc_c1".into(), "sig-1".into(), None));

        update_session(&session, "key", &state);

        assert_eq!(session.previous_response_id("key").as_deref(), Some("r_9"));

        let signatures = session.thought_signatures("key");
        assert_eq!(signatures["c1"].thought_signature, "sig-1");
    }

    #[test]
    fn signature_patch_fills_from_cache() {
        let mut signatures = SignatureMap::new();
        signatures.insert("c1".into(), signature_record("sig-1".into(), Some("why".into()), None));

        let mut req = request(vec![call("c1"), output("c1")]);
        apply_cached_thought_signatures(&mut req, &signatures);

        assert_eq!(req.input.len(), 2);
        let InputItem::FunctionCall(call) = &req.input[0] else {
            panic!("expected call");
        };
        assert_eq!(call.thought_signature.as_deref(), Some("sig-1"));
        assert_eq!(call.thought.as_deref(), Some("why"));
    }

    #[test]
    fn signature_patch_drops_unsatisfied_calls_only_when_anchored() {
        // Anchored with matching output: the call is dropped.
        let mut anchored = request(vec![call("c1"), output("c1")]);
        anchored.previous_response_id = Some("resp_1".into());
        apply_cached_thought_signatures(&mut anchored, &SignatureMap::new());
        assert_eq!(anchored.input.len(), 1);
        assert!(matches!(&anchored.input[0], InputItem::FunctionCallOutput(_)));

        // Unanchored: never dropped, or the output would dangle.
        let mut unanchored = request(vec![call("c1"), output("c1")]);
        apply_cached_thought_signatures(&mut unanchored, &SignatureMap::new());
        assert_eq!(unanchored.input.len(), 2);

        // Anchored but no matching output: kept.
        let mut no_output = request(vec![call("c1")]);
        no_output.previous_response_id = Some("resp_1".into());
        apply_cached_thought_signatures(&mut no_output, &SignatureMap::new());
        assert_eq!(no_output.input.len(), 1);
    }
}
