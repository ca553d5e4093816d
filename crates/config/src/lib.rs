//! Prism configuration, loaded from environment variables.

#![deny(missing_docs)]

mod auth;
mod limits;
mod providers;

pub use auth::AuthConfig;
pub use limits::LimitsConfig;
pub use providers::{ClaudeConfig, GeminiConfig, OpenAiConfig};

use anyhow::bail;
use indoc::indoc;

/// Main configuration structure for the Prism gateway.
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// OpenAI Responses upstream. The primary provider.
    pub openai: Option<OpenAiConfig>,
    /// Gemini upstream, used for `gemini*` model ids.
    pub gemini: Option<GeminiConfig>,
    /// Anthropic upstream, used for `claude*` model ids.
    pub claude: Option<ClaudeConfig>,
    /// Accepted client bearer tokens.
    pub auth: AuthConfig,
    /// Multi-turn trim limits.
    pub limits: LimitsConfig,
    /// Default model advertised when a request omits one.
    pub default_model: Option<String>,
    /// Extra model ids advertised on `/models` beyond provider defaults.
    pub models: Vec<String>,
    /// Additional adapter model ids advertised on `/models`.
    pub adapter_models: Vec<String>,
    /// Verbose request/response logging toggle.
    pub debug: bool,
}

impl Config {
    /// Load configuration from the process environment.
    pub fn from_env() -> Config {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Config {
        let lookup = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        Config {
            openai: providers::openai_from_lookup(&lookup),
            gemini: providers::gemini_from_lookup(&lookup),
            claude: providers::claude_from_lookup(&lookup),
            auth: auth::from_lookup(&lookup),
            limits: limits::from_lookup(&lookup),
            default_model: lookup("DEFAULT_MODEL"),
            models: split_list(lookup("MODELS")),
            adapter_models: split_list(lookup("ADAPTER_MODELS")),
            debug: lookup("RSP4COPILOT_DEBUG")
                .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
                .unwrap_or(false),
        }
    }

    /// Validates that the configuration can serve at least one upstream.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.openai.is_none() && self.gemini.is_none() && self.claude.is_none() {
            bail!(indoc! {r#"
                No upstream providers configured. Prism requires at least one provider to function.

                For the OpenAI Responses upstream:

                  OPENAI_BASE_URL=https://api.openai.com/v1
                  OPENAI_API_KEY=sk-...

                For Gemini or Anthropic:

                  GEMINI_BASE_URL=... GEMINI_API_KEY=...
                  CLAUDE_BASE_URL=... CLAUDE_API_KEY=...
            "#});
        }

        if self.auth.keys.is_empty() {
            bail!(indoc! {r#"
                No client auth keys configured. Set WORKER_AUTH_KEY or the
                comma-separated WORKER_AUTH_KEYS to the bearer tokens clients
                must present.
            "#});
        }

        for (name, warning) in [
            ("Gemini", self.gemini.is_some() && self.openai.is_none()),
            ("Claude", self.claude.is_some() && self.openai.is_none()),
        ] {
            if warning {
                log::warn!("{name} is configured without an OpenAI upstream; non-prefixed models will fail");
            }
        }

        Ok(())
    }
}

pub(crate) fn split_list(value: Option<String>) -> Vec<String> {
    value
        .map(|v| {
            v.split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use insta::assert_debug_snapshot;

    use crate::Config;

    #[test]
    fn defaults() {
        let config = Config::from_lookup(|_| None);

        assert_debug_snapshot!(&config, @r#"
        Config {
            openai: None,
            gemini: None,
            claude: None,
            auth: AuthConfig {
                keys: [],
            },
            limits: LimitsConfig {
                max_turns: 12,
                max_messages: 40,
                max_input_chars: 300000,
            },
            default_model: None,
            models: [],
            adapter_models: [],
            debug: false,
        }
        "#);
    }

    #[test]
    fn validate_requires_a_provider() {
        let config = Config::from_lookup(|_| None);
        let error = config.validate().expect_err("validation should fail");
        assert!(error.to_string().contains("No upstream providers configured"));
    }

    #[test]
    fn full_environment() {
        let config = Config::from_lookup(|name| {
            let value = match name {
                "OPENAI_BASE_URL" => "https://a.example/v1,https://b.example",
                "OPENAI_API_KEY" => "sk-test",
                "RESP_RESPONSES_PATH" => "/v1/responses",
                "RESP_REASONING_EFFORT" => "high",
                "WORKER_AUTH_KEYS" => r#""Bearer key-1", key-2"#,
                "RSP4COPILOT_MAX_TURNS" => "3",
                "RSP4COPILOT_DEBUG" => "yes",
                "DEFAULT_MODEL" => "gpt-5",
                "MODELS" => "gpt-5,gpt-5-mini",
                _ => return None,
            };

            Some(value.to_string())
        });

        config.validate().expect("config should validate");

        let openai = config.openai.expect("openai config should be present");
        assert_eq!(openai.base_urls, vec!["https://a.example/v1", "https://b.example"]);
        assert_eq!(openai.responses_path.as_deref(), Some("/v1/responses"));
        assert_eq!(openai.reasoning_effort.as_deref(), Some("high"));

        assert_eq!(config.auth.keys, vec!["key-1", "key-2"]);
        assert_eq!(config.limits.max_turns, 3);
        assert_eq!(config.limits.max_messages, 40);
        assert!(config.debug);
        assert_eq!(config.models, vec!["gpt-5", "gpt-5-mini"]);
    }

    #[test]
    fn from_env_reads_process_environment() {
        temp_env::with_vars(
            [
                ("OPENAI_BASE_URL", Some("https://api.openai.com/v1")),
                ("OPENAI_API_KEY", Some("sk-env")),
                ("WORKER_AUTH_KEY", Some("client-key")),
            ],
            || {
                let config = Config::from_env();
                config.validate().expect("config should validate");
                assert!(config.openai.is_some());
            },
        );
    }

    #[test]
    fn reasoning_effort_off_disables_the_default() {
        let config = Config::from_lookup(|name| {
            let value = match name {
                "OPENAI_BASE_URL" => "https://api.openai.com/v1",
                "OPENAI_API_KEY" => "sk-test",
                "RESP_REASONING_EFFORT" => "off",
                _ => return None,
            };

            Some(value.to_string())
        });

        assert_eq!(config.openai.unwrap().reasoning_effort, None);
    }
}
