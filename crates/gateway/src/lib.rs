//! Protocol-translation gateway core.
//!
//! Clients speak Chat Completions, Text Completions, Gemini GenerateContent,
//! or Anthropic Messages; requests normalize into the Responses form, fan
//! out across upstream endpoint and shape variants, and stream back in the
//! dialect they arrived in.

use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State},
    http::HeaderMap,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use axum_serde::Sonic;
use serde::de::DeserializeOwned;
use serde_json::Value;

mod error;
mod http_client;
mod image;
mod messages;
mod provider;
mod request;
mod session;
mod sse;
mod token_estimate;
mod translate;
mod upstream;

pub use error::{GatewayError, GatewayResult};
pub use request::extract_client_token;
pub use session::SessionState;

use messages::chat::{ChatCompletionRequest, Model, ModelsResponse, TextCompletionRequest};
use provider::{anthropic::AnthropicProvider, gemini::GeminiProvider, openai::OpenAiProvider};

/// Shared gateway state: configuration plus the constructed providers.
pub struct Gateway {
    config: config::Config,
    openai: Option<OpenAiProvider>,
    gemini: Option<GeminiProvider>,
    anthropic: Option<AnthropicProvider>,
}

impl Gateway {
    pub fn new(config: config::Config) -> anyhow::Result<Self> {
        Self::with_session(config, SessionState::in_memory())
    }

    /// Construction with an explicit session store, rebindable for tests.
    pub fn with_session(config: config::Config, session: SessionState) -> anyhow::Result<Self> {
        let openai = config
            .openai
            .clone()
            .map(|provider_config| OpenAiProvider::new(provider_config, config.limits, session.clone()))
            .transpose()
            .map_err(|e| anyhow::anyhow!("failed to initialize the OpenAI provider: {e}"))?;

        let gemini = config
            .gemini
            .clone()
            .map(|provider_config| GeminiProvider::new(provider_config, session.clone()));

        let anthropic = config.claude.clone().map(AnthropicProvider::new);

        Ok(Self {
            config,
            openai,
            gemini,
            anthropic,
        })
    }

    fn openai(&self) -> GatewayResult<&OpenAiProvider> {
        self.openai
            .as_ref()
            .ok_or_else(|| GatewayError::ServerMisconfigured("OPENAI_BASE_URL / OPENAI_API_KEY not configured".into()))
    }

    /// Advertised model ids: bare when provider-unique, `<provider>.<name>`
    /// otherwise, sorted.
    fn model_ids(&self) -> Vec<String> {
        let mut per_provider: Vec<(&str, Vec<String>)> = Vec::new();

        if self.openai.is_some() || !self.config.models.is_empty() {
            let mut names: Vec<String> = Vec::new();

            let configured = self
                .config
                .models
                .iter()
                .chain(self.config.adapter_models.iter())
                .chain(self.config.default_model.iter());

            for name in configured {
                if !names.contains(name) {
                    names.push(name.clone());
                }
            }

            per_provider.push(("openai", names));
        }

        if let Some(gemini) = &self.config.gemini {
            per_provider.push((
                "gemini",
                gemini.default_model.clone().into_iter().collect(),
            ));
        }

        if let Some(claude) = &self.config.claude {
            per_provider.push((
                "claude",
                claude.default_model.clone().into_iter().collect(),
            ));
        }

        let mut counts: std::collections::HashMap<&str, usize> = std::collections::HashMap::new();
        for (_, names) in &per_provider {
            for name in names {
                *counts.entry(name.as_str()).or_default() += 1;
            }
        }

        let counts_ref = &counts;
        let mut ids: Vec<String> = per_provider
            .iter()
            .flat_map(|(provider, names)| {
                names.iter().map(move |name| {
                    if counts_ref[name.as_str()] > 1 {
                        format!("{provider}.{name}")
                    } else {
                        name.clone()
                    }
                })
            })
            .collect();

        ids.sort();
        ids.dedup();
        ids
    }
}

/// Creates the axum router for all gateway endpoints.
pub fn router(gateway: Arc<Gateway>) -> axum::Router {
    axum::Router::new()
        .route("/health", get(health))
        .route("/v1/health", get(health))
        .route("/models", get(list_models))
        .route("/v1/models", get(list_models))
        .route("/chat/completions", post(chat_completions))
        .route("/v1/chat/completions", post(chat_completions))
        .route("/completions", post(completions))
        .route("/v1/completions", post(completions))
        .route("/responses", post(responses))
        .route("/v1/responses", post(responses))
        .route("/messages", post(anthropic_messages))
        .route("/v1/messages", post(anthropic_messages))
        .route("/messages/count_tokens", post(count_tokens))
        .route("/v1/messages/count_tokens", post(count_tokens))
        .route("/v1beta/models/{target}", post(gemini_generate))
        .fallback(not_found)
        .with_state(gateway)
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "ok": true,
        "time": jiff::Timestamp::now().to_string(),
    }))
}

async fn list_models(State(gateway): State<Arc<Gateway>>) -> impl IntoResponse {
    let created = jiff::Timestamp::now().as_second();

    let data: Vec<Model> = gateway
        .model_ids()
        .into_iter()
        .map(|id| {
            let owned_by = if id.starts_with("gemini") {
                "google"
            } else if id.starts_with("claude") {
                "anthropic"
            } else {
                "openai"
            };

            Model {
                id,
                object: "model",
                created,
                owned_by: owned_by.to_string(),
            }
        })
        .collect();

    log::debug!("Returning {} models", data.len());

    Json(ModelsResponse { object: "list", data })
}

async fn chat_completions(
    State(gateway): State<Arc<Gateway>>,
    headers: HeaderMap,
    Sonic(raw): Sonic<Value>,
) -> GatewayResult<Response> {
    let mut request: ChatCompletionRequest = parse_body(raw)?;
    let context = request::extract_context(&headers);

    if request.model.is_none() {
        request.model = gateway.config.default_model.clone();
    }

    let model = request.model.clone().unwrap_or_default();
    log::debug!(
        "Chat completions for model {model:?} ({} messages, stream: {})",
        request.messages.len(),
        request.stream.unwrap_or(false)
    );

    if is_gemini_model(&model) {
        if let Some(gemini) = &gateway.gemini {
            return gemini.chat(request, &context).await;
        }
        return Err(GatewayError::ServerMisconfigured(
            "GEMINI_BASE_URL / GEMINI_API_KEY not configured".into(),
        ));
    }

    if is_claude_model(&model) {
        if let Some(anthropic) = &gateway.anthropic {
            return anthropic.chat(request, &context).await;
        }
        return Err(GatewayError::ServerMisconfigured(
            "CLAUDE_BASE_URL / CLAUDE_API_KEY not configured".into(),
        ));
    }

    gateway.openai()?.chat(request, &context).await
}

async fn completions(
    State(gateway): State<Arc<Gateway>>,
    headers: HeaderMap,
    Sonic(raw): Sonic<Value>,
) -> GatewayResult<Response> {
    let mut request: TextCompletionRequest = parse_body(raw)?;
    let context = request::extract_context(&headers);

    if request.model.is_none() {
        request.model = gateway.config.default_model.clone();
    }

    gateway.openai()?.completions(request, &context).await
}

async fn responses(
    State(gateway): State<Arc<Gateway>>,
    headers: HeaderMap,
    Sonic(raw): Sonic<Value>,
) -> GatewayResult<Response> {
    let request: messages::responses::ResponsesRequest = parse_body(raw)?;
    let context = request::extract_context(&headers);

    gateway.openai()?.responses(request, &context).await
}

async fn anthropic_messages(
    State(gateway): State<Arc<Gateway>>,
    headers: HeaderMap,
    Sonic(raw): Sonic<Value>,
) -> GatewayResult<Response> {
    let context = request::extract_context(&headers);

    let model = raw.get("model").and_then(Value::as_str).unwrap_or_default();
    let claude_routed = is_claude_model(model) || (model.is_empty() && gateway.anthropic.is_some());

    if claude_routed {
        if let Some(anthropic) = &gateway.anthropic {
            return anthropic.messages_passthrough(raw, &context).await;
        }
        return Err(GatewayError::ServerMisconfigured(
            "CLAUDE_BASE_URL / CLAUDE_API_KEY not configured".into(),
        ));
    }

    let request: messages::anthropic::AnthropicMessagesRequest = parse_body(raw)?;
    gateway.openai()?.messages(request, &context).await
}

async fn count_tokens(
    State(gateway): State<Arc<Gateway>>,
    headers: HeaderMap,
    Sonic(raw): Sonic<Value>,
) -> GatewayResult<Response> {
    let context = request::extract_context(&headers);

    match &gateway.anthropic {
        Some(anthropic) => anthropic.count_tokens(raw, &context).await,
        None => {
            let estimate = messages::anthropic::AnthropicTokenCount {
                input_tokens: token_estimate::estimate_input_tokens(&raw),
            };
            Ok(Json(estimate).into_response())
        }
    }
}

/// Gemini-dialect entry served off the Responses upstream. The path target
/// is `<model>:generateContent` or `<model>:streamGenerateContent`.
async fn gemini_generate(
    State(gateway): State<Arc<Gateway>>,
    Path(target): Path<String>,
    headers: HeaderMap,
    Sonic(raw): Sonic<Value>,
) -> GatewayResult<Response> {
    let Some((model, method)) = target.split_once(':') else {
        return Err(GatewayError::NotFound);
    };

    let streaming = match method {
        "generateContent" => false,
        "streamGenerateContent" => true,
        _ => return Err(GatewayError::NotFound),
    };

    let request: messages::gemini::GeminiRequest = parse_body(raw)?;
    let context = request::extract_context(&headers);

    gateway
        .openai()?
        .generate_content(model, request, streaming, &context)
        .await
}

async fn not_found() -> GatewayError {
    GatewayError::NotFound
}

fn parse_body<T: DeserializeOwned>(raw: Value) -> GatewayResult<T> {
    serde_json::from_value(raw).map_err(|e| GatewayError::InvalidRequest(e.to_string()))
}

fn is_gemini_model(model: &str) -> bool {
    model == "gemini" || model.starts_with("gemini-")
}

fn is_claude_model(model: &str) -> bool {
    model == "claude" || model.starts_with("claude-")
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::{Gateway, is_claude_model, is_gemini_model};

    fn gateway(lookup: &[(&str, &str)]) -> Arc<Gateway> {
        let config = config::Config::from_lookup(|name| {
            lookup
                .iter()
                .find(|(key, _)| *key == name)
                .map(|(_, value)| value.to_string())
        });

        Arc::new(Gateway::new(config).unwrap())
    }

    #[test]
    fn model_prefix_routing() {
        assert!(is_gemini_model("gemini"));
        assert!(is_gemini_model("gemini-2.5-pro"));
        assert!(!is_gemini_model("geminio"));

        assert!(is_claude_model("claude"));
        assert!(is_claude_model("claude-sonnet-4-5"));
        assert!(!is_claude_model("clause"));
    }

    #[test]
    fn unique_models_keep_bare_names() {
        let gateway = gateway(&[
            ("OPENAI_BASE_URL", "https://a.example/v1"),
            ("OPENAI_API_KEY", "sk"),
            ("MODELS", "gpt-5,gpt-5-mini"),
            ("GEMINI_BASE_URL", "https://g.example"),
            ("GEMINI_API_KEY", "gk"),
            ("GEMINI_DEFAULT_MODEL", "gemini-2.5-pro"),
        ]);

        assert_eq!(gateway.model_ids(), ["gemini-2.5-pro", "gpt-5", "gpt-5-mini"]);
    }

    #[test]
    fn shared_names_get_provider_prefixes() {
        let gateway = gateway(&[
            ("OPENAI_BASE_URL", "https://a.example/v1"),
            ("OPENAI_API_KEY", "sk"),
            ("MODELS", "omni"),
            ("GEMINI_BASE_URL", "https://g.example"),
            ("GEMINI_API_KEY", "gk"),
            ("GEMINI_DEFAULT_MODEL", "omni"),
        ]);

        assert_eq!(gateway.model_ids(), ["gemini.omni", "openai.omni"]);
    }

    #[test]
    fn listing_is_sorted() {
        let gateway = gateway(&[
            ("OPENAI_BASE_URL", "https://a.example/v1"),
            ("OPENAI_API_KEY", "sk"),
            ("MODELS", "zeta,alpha,mid"),
        ]);

        let ids = gateway.model_ids();
        let mut sorted = ids.clone();
        sorted.sort();
        assert_eq!(ids, sorted);
    }
}
