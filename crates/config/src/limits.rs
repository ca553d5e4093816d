/// Multi-turn trim limits for delta-request construction.
#[derive(Debug, Clone, Copy)]
pub struct LimitsConfig {
    /// Maximum assistant/user turn pairs carried in one request.
    pub max_turns: usize,
    /// Maximum messages carried in one request.
    pub max_messages: usize,
    /// Maximum total input characters carried in one request.
    pub max_input_chars: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_turns: 12,
            max_messages: 40,
            max_input_chars: 300_000,
        }
    }
}

pub(crate) fn from_lookup(lookup: &impl Fn(&str) -> Option<String>) -> LimitsConfig {
    let defaults = LimitsConfig::default();

    LimitsConfig {
        max_turns: parse_or(lookup("RSP4COPILOT_MAX_TURNS"), defaults.max_turns),
        max_messages: parse_or(lookup("RSP4COPILOT_MAX_MESSAGES"), defaults.max_messages),
        max_input_chars: parse_or(lookup("RSP4COPILOT_MAX_INPUT_CHARS"), defaults.max_input_chars),
    }
}

fn parse_or(value: Option<String>, default: usize) -> usize {
    value
        .and_then(|v| match v.trim().parse::<usize>() {
            Ok(parsed) if parsed > 0 => Some(parsed),
            _ => {
                log::warn!("Ignoring non-positive or malformed limit value: {v:?}");
                None
            }
        })
        .unwrap_or(default)
}
