/// Accepted client bearer tokens.
#[derive(Debug, Clone, Default)]
pub struct AuthConfig {
    /// Normalized tokens: surrounding quotes and an accidental `Bearer `
    /// prefix are stripped at load time.
    pub keys: Vec<String>,
}

impl AuthConfig {
    /// Whether the presented token matches any configured key.
    pub fn accepts(&self, token: &str) -> bool {
        self.keys.iter().any(|key| key == token)
    }
}

pub(crate) fn from_lookup(lookup: &impl Fn(&str) -> Option<String>) -> AuthConfig {
    let mut keys = Vec::new();

    if let Some(key) = lookup("WORKER_AUTH_KEY") {
        keys.push(key);
    }

    keys.extend(crate::split_list(lookup("WORKER_AUTH_KEYS")));

    let keys = keys
        .into_iter()
        .map(|key| normalize_key(&key))
        .filter(|key| !key.is_empty())
        .collect();

    AuthConfig { keys }
}

fn normalize_key(raw: &str) -> String {
    let mut key = raw.trim();

    for quote in ['"', '\''] {
        key = key
            .strip_prefix(quote)
            .and_then(|k| k.strip_suffix(quote))
            .unwrap_or(key);
    }

    key = key.trim();
    key = key.strip_prefix("Bearer ").unwrap_or(key);

    key.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::normalize_key;

    #[test]
    fn strips_quotes_and_bearer_prefix() {
        assert_eq!(normalize_key(r#""Bearer secret""#), "secret");
        assert_eq!(normalize_key("'secret'"), "secret");
        assert_eq!(normalize_key("Bearer secret"), "secret");
        assert_eq!(normalize_key("secret"), "secret");
    }
}
