//! Candidate endpoint URL construction.
//!
//! Bases come from comma-separated configuration and range from bare hosts to
//! full endpoint URLs. Normalization is forgiving, but the output is strict:
//! ordered, deduplicated, and never containing a doubled `/v1/v1` segment.

const MAX_COLLAPSE_PASSES: usize = 6;

/// Build the ordered candidate list for the Responses endpoint.
///
/// Without a configured path, each base contributes up to three candidates in
/// priority order: the inferred endpoint, `<base>/v1/responses`, and
/// `<base>/responses`, skipping any that would double the version segment.
pub(crate) fn build_responses_urls(bases: &[String], configured_path: Option<&str>) -> Vec<String> {
    let mut urls = Vec::new();

    for base in bases {
        let Some(base) = normalize_base(base) else {
            continue;
        };

        if base.ends_with("/responses") {
            push_unique(&mut urls, base);
            continue;
        }

        if let Some(path) = configured_path {
            push_unique(&mut urls, join(&base, path));
            continue;
        }

        let inferred = if base.ends_with("/v1") || base.ends_with("/openai/v1") {
            "/responses"
        } else {
            "/v1/responses"
        };

        for path in [inferred, "/v1/responses", "/responses"] {
            let raw = format!("{base}{path}");
            if raw.contains("/v1/v1/responses") {
                continue;
            }
            push_unique(&mut urls, collapse(&raw));
        }
    }

    urls
}

/// Single candidate for the Anthropic Messages endpoint.
pub(crate) fn build_messages_url(base: &str, configured_path: Option<&str>) -> Option<String> {
    let base = normalize_base(base)?;

    if base.ends_with("/messages") {
        return Some(base);
    }

    let path = match configured_path {
        Some(path) => path.to_string(),
        None if base.ends_with("/v1") => "/messages".to_string(),
        None => "/v1/messages".to_string(),
    };

    Some(join(&base, &path))
}

/// Gemini model endpoint: `<base>/v1beta/models/<model>:<method>`.
pub(crate) fn build_gemini_url(base: &str, model: &str, method: &str) -> Option<String> {
    let base = normalize_base(base)?;

    let base = if base.ends_with("/v1beta") || base.ends_with("/v1") {
        base
    } else {
        join(&base, "/v1beta")
    };

    Some(join(&base, &format!("/models/{model}:{method}")))
}

fn normalize_base(base: &str) -> Option<String> {
    let base = base.trim().trim_end_matches('/');

    if base.is_empty() || base == "http" || base == "https" {
        return None;
    }

    let with_scheme = if base.contains("://") {
        base.to_string()
    } else {
        format!("https://{base}")
    };

    Some(collapse(&with_scheme))
}

fn join(base: &str, path: &str) -> String {
    collapse(&format!("{base}/{path}"))
}

/// Collapse `//+` to `/` and `/v1/v1` to `/v1` in the path, bounded at a
/// fixed number of passes.
fn collapse(url: &str) -> String {
    let (scheme, mut path) = match url.split_once("://") {
        Some((scheme, rest)) => (Some(scheme), rest.to_string()),
        None => (None, url.to_string()),
    };

    for _ in 0..MAX_COLLAPSE_PASSES {
        let collapsed = path.replace("//", "/").replace("/v1/v1", "/v1");
        if collapsed == path {
            break;
        }
        path = collapsed;
    }

    match scheme {
        Some(scheme) => format!("{scheme}://{path}"),
        None => path,
    }
}

fn push_unique(urls: &mut Vec<String>, url: String) {
    if !urls.contains(&url) {
        urls.push(url);
    }
}

#[cfg(test)]
mod tests {
    use super::{build_gemini_url, build_messages_url, build_responses_urls};

    fn bases(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn infers_paths_per_base_shape() {
        let urls = build_responses_urls(&bases(&["https://a.example/v1", "https://b.example"]), None);

        assert_eq!(
            urls,
            [
                "https://a.example/v1/responses",
                "https://b.example/v1/responses",
                "https://b.example/responses",
            ]
        );
    }

    #[test]
    fn keeps_full_endpoints_as_is() {
        let urls = build_responses_urls(&bases(&["https://a.example/v1/responses"]), None);
        assert_eq!(urls, ["https://a.example/v1/responses"]);
    }

    #[test]
    fn configured_path_wins_over_inference() {
        let urls = build_responses_urls(&bases(&["https://a.example"]), Some("/custom/responses"));
        assert_eq!(urls, ["https://a.example/custom/responses"]);
    }

    #[test]
    fn never_produces_doubled_version_segments() {
        for base in ["https://a.example/v1", "https://a.example/v1/", "https://a.example/v1//v1"] {
            let urls = build_responses_urls(&bases(&[base]), None);
            for url in &urls {
                assert!(!url.contains("/v1/v1/responses"), "{url}");
            }
        }
    }

    #[test]
    fn defaults_the_scheme_and_rejects_bare_scheme_words() {
        let urls = build_responses_urls(&bases(&["a.example/v1", "http", "https"]), None);
        assert_eq!(urls[0], "https://a.example/v1/responses");
        assert!(urls.iter().all(|url| url.starts_with("https://a.example")));
    }

    #[test]
    fn collapses_doubled_slashes() {
        let urls = build_responses_urls(&bases(&["https://a.example//openai//v1"]), None);
        assert_eq!(urls[0], "https://a.example/openai/v1/responses");
    }

    #[test]
    fn deduplicates_across_bases() {
        let urls = build_responses_urls(&bases(&["https://a.example/v1", "https://a.example/v1/"]), None);
        let unique: std::collections::HashSet<&String> = urls.iter().collect();
        assert_eq!(unique.len(), urls.len());
    }

    #[test]
    fn messages_url_inference() {
        assert_eq!(
            build_messages_url("https://api.anthropic.com", None).unwrap(),
            "https://api.anthropic.com/v1/messages"
        );
        assert_eq!(
            build_messages_url("https://proxy.example/v1", None).unwrap(),
            "https://proxy.example/v1/messages"
        );
        assert_eq!(
            build_messages_url("https://proxy.example/v1/messages", None).unwrap(),
            "https://proxy.example/v1/messages"
        );
    }

    #[test]
    fn gemini_url_inference() {
        assert_eq!(
            build_gemini_url("https://generativelanguage.googleapis.com", "gemini-2.5-pro", "streamGenerateContent").unwrap(),
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.5-pro:streamGenerateContent"
        );
        assert_eq!(
            build_gemini_url("https://proxy.example/v1beta", "g", "generateContent").unwrap(),
            "https://proxy.example/v1beta/models/g:generateContent"
        );
    }
}
