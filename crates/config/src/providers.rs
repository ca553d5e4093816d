use secrecy::SecretString;

const DEFAULT_PROBE_TIMEOUT_MS: u64 = 150;
const DEFAULT_MAX_BUFFERED_SSE_BYTES: usize = 4 * 1024 * 1024;
const DEFAULT_CLAUDE_MAX_TOKENS: u32 = 4096;

/// OpenAI Responses upstream configuration.
#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    /// Candidate base URLs, in preference order.
    pub base_urls: Vec<String>,
    /// Upstream bearer key.
    pub api_key: SecretString,
    /// Explicit endpoint path overriding the inferred `/v1/responses` suffix.
    pub responses_path: Option<String>,
    /// Default reasoning effort applied when a request carries none.
    /// The literal value `off` disables the default entirely.
    pub reasoning_effort: Option<String>,
    /// Buffered-response cap for non-streaming clients.
    pub max_buffered_sse_bytes: usize,
    /// Empty-stream probe budget in milliseconds.
    pub probe_timeout_ms: u64,
}

/// Gemini upstream configuration.
#[derive(Debug, Clone)]
pub struct GeminiConfig {
    /// Base URL of the Gemini API.
    pub base_url: String,
    /// Upstream API key.
    pub api_key: SecretString,
    /// Model used when a Gemini-routed request omits one.
    pub default_model: Option<String>,
}

/// Anthropic upstream configuration.
#[derive(Debug, Clone)]
pub struct ClaudeConfig {
    /// Base URL of the Anthropic API.
    pub base_url: String,
    /// Upstream API key.
    pub api_key: SecretString,
    /// Explicit endpoint path overriding the inferred `/v1/messages` suffix.
    pub messages_path: Option<String>,
    /// Model used when a Claude-routed request omits one.
    pub default_model: Option<String>,
    /// `max_tokens` applied when the client omits it. The Messages API
    /// rejects requests without one.
    pub max_tokens: u32,
}

pub(crate) fn openai_from_lookup(lookup: &impl Fn(&str) -> Option<String>) -> Option<OpenAiConfig> {
    let base_urls = crate::split_list(lookup("OPENAI_BASE_URL"));
    let api_key = lookup("OPENAI_API_KEY")?;

    if base_urls.is_empty() {
        return None;
    }

    Some(OpenAiConfig {
        base_urls,
        api_key: SecretString::from(api_key),
        responses_path: lookup("RESP_RESPONSES_PATH"),
        reasoning_effort: lookup("RESP_REASONING_EFFORT").filter(|effort| effort != "off"),
        max_buffered_sse_bytes: parse_or(lookup("RESP_MAX_BUFFERED_SSE_BYTES"), DEFAULT_MAX_BUFFERED_SSE_BYTES),
        probe_timeout_ms: parse_or(lookup("RESP_PROBE_TIMEOUT_MS"), DEFAULT_PROBE_TIMEOUT_MS),
    })
}

pub(crate) fn gemini_from_lookup(lookup: &impl Fn(&str) -> Option<String>) -> Option<GeminiConfig> {
    let base_url = lookup("GEMINI_BASE_URL")?;
    let api_key = lookup("GEMINI_API_KEY")?;

    Some(GeminiConfig {
        base_url,
        api_key: SecretString::from(api_key),
        default_model: lookup("GEMINI_DEFAULT_MODEL"),
    })
}

pub(crate) fn claude_from_lookup(lookup: &impl Fn(&str) -> Option<String>) -> Option<ClaudeConfig> {
    let base_url = lookup("CLAUDE_BASE_URL")?;
    let api_key = lookup("CLAUDE_API_KEY")?;

    Some(ClaudeConfig {
        base_url,
        api_key: SecretString::from(api_key),
        messages_path: lookup("CLAUDE_MESSAGES_PATH"),
        default_model: lookup("CLAUDE_DEFAULT_MODEL"),
        max_tokens: parse_or(lookup("CLAUDE_MAX_TOKENS"), DEFAULT_CLAUDE_MAX_TOKENS),
    })
}

fn parse_or<T: std::str::FromStr + Copy>(value: Option<String>, default: T) -> T {
    value.and_then(|v| v.trim().parse().ok()).unwrap_or(default)
}
