//! Per-request context extracted from headers.

use http::HeaderMap;

/// Runtime context carried alongside every provider call.
#[derive(Debug, Clone, Default)]
pub(crate) struct RequestContext {
    /// Client-supplied `x-session-id`, forwarded upstream and used as the
    /// strongest session-key source.
    pub session_id: Option<String>,

    /// The client's own bearer token; prefixes derived session keys so
    /// callers sharing a prompt do not share a session bucket.
    pub bearer: Option<String>,
}

pub(crate) fn extract_context(headers: &HeaderMap) -> RequestContext {
    RequestContext {
        session_id: headers
            .get("x-session-id")
            .and_then(|value| value.to_str().ok())
            .map(str::to_string),
        bearer: extract_client_token(headers),
    }
}

/// The client token, accepted as `Authorization: Bearer <t>`, a bare
/// `Authorization: <t>`, or `x-api-key: <t>`.
pub fn extract_client_token(headers: &HeaderMap) -> Option<String> {
    if let Some(value) = headers.get(http::header::AUTHORIZATION).and_then(|v| v.to_str().ok()) {
        let token = value.strip_prefix("Bearer ").unwrap_or(value).trim();
        if !token.is_empty() {
            return Some(token.to_string());
        }
    }

    headers
        .get("x-api-key")
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use http::HeaderMap;

    use super::extract_client_token;

    fn headers(pairs: &[(&str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(
                http::HeaderName::from_bytes(name.as_bytes()).unwrap(),
                value.parse().unwrap(),
            );
        }
        map
    }

    #[test]
    fn accepts_all_three_token_forms() {
        assert_eq!(
            extract_client_token(&headers(&[("authorization", "Bearer tok")])).as_deref(),
            Some("tok")
        );
        assert_eq!(
            extract_client_token(&headers(&[("authorization", "tok")])).as_deref(),
            Some("tok")
        );
        assert_eq!(
            extract_client_token(&headers(&[("x-api-key", "tok")])).as_deref(),
            Some("tok")
        );
        assert_eq!(extract_client_token(&headers(&[])), None);
    }
}
