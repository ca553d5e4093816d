//! Image payload ingestion helpers.
//!
//! Client dialects hand us image content as a data URL, as bare base64, or as
//! a remote URL. Upstreams disagree on which of those they accept, so the
//! helpers here classify a value once and let each converter pick the shape
//! it needs.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use futures::StreamExt;

const DEFAULT_IMAGE_MIME: &str = "image/png";
const MAX_INLINE_FETCH_BYTES: usize = 8 * 1024 * 1024;

/// A classified image value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImagePayload {
    /// `data:<mime>;base64,<data>`
    Inline { mime_type: String, data: String },
    /// Anything else is treated as a URL and passed through.
    Url(String),
}

/// Classify a raw image value from a client payload.
///
/// A value is a data URL if it matches `data:<mt>;base64,<b64>`. Otherwise, a
/// trimmed string of length >= 40 consisting only of base64 characters (with
/// up to two `=` padding chars) is treated as raw base64 with a `image/png`
/// default. Everything else passes through as a URL.
pub fn classify(value: &str) -> ImagePayload {
    if let Some(rest) = value.strip_prefix("data:")
        && let Some((mime_type, data)) = rest.split_once(";base64,")
    {
        let mime_type = if mime_type.is_empty() {
            DEFAULT_IMAGE_MIME.to_string()
        } else {
            mime_type.to_string()
        };

        return ImagePayload::Inline {
            mime_type,
            data: data.to_string(),
        };
    }

    let trimmed = value.trim();
    if looks_like_base64(trimmed) {
        return ImagePayload::Inline {
            mime_type: DEFAULT_IMAGE_MIME.to_string(),
            data: trimmed.to_string(),
        };
    }

    ImagePayload::Url(value.to_string())
}

fn looks_like_base64(value: &str) -> bool {
    if value.len() < 40 {
        return false;
    }

    let padding = value.bytes().rev().take_while(|b| *b == b'=').count();
    if padding > 2 {
        return false;
    }

    value[..value.len() - padding]
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'+' || b == b'/')
}

/// Turn a classified payload into a data URL string.
pub fn to_data_url(payload: &ImagePayload) -> String {
    match payload {
        ImagePayload::Inline { mime_type, data } => format!("data:{mime_type};base64,{data}"),
        ImagePayload::Url(url) => url.clone(),
    }
}

/// Resolve a payload to inline base64 for upstreams that reject URLs.
///
/// Remote `http(s)` URLs are fetched once and inlined with the
/// server-reported content type; responses over 8 MiB are rejected.
pub async fn resolve_inline(client: &reqwest::Client, payload: ImagePayload) -> Option<(String, String)> {
    match payload {
        ImagePayload::Inline { mime_type, data } => Some((mime_type, data)),
        ImagePayload::Url(url) => {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                log::warn!("Skipping image with unsupported scheme");
                return None;
            }

            fetch_inline(client, &url).await
        }
    }
}

async fn fetch_inline(client: &reqwest::Client, url: &str) -> Option<(String, String)> {
    let response = match client.get(url).send().await {
        Ok(response) => response,
        Err(e) => {
            log::warn!("Failed to fetch image for inlining: {e}");
            return None;
        }
    };

    if !response.status().is_success() {
        log::warn!("Image fetch returned status {}", response.status());
        return None;
    }

    let mime_type = response
        .headers()
        .get(http::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.split(';').next().unwrap_or(v).trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| DEFAULT_IMAGE_MIME.to_string());

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(e) => {
                log::warn!("Image fetch interrupted: {e}");
                return None;
            }
        };

        if bytes.len() + chunk.len() > MAX_INLINE_FETCH_BYTES {
            log::warn!("Image exceeds inline limit of {MAX_INLINE_FETCH_BYTES} bytes");
            return None;
        }

        bytes.extend_from_slice(&chunk);
    }

    Some((mime_type, BASE64.encode(bytes)))
}

#[cfg(test)]
mod tests {
    use super::{ImagePayload, classify, to_data_url};

    #[test]
    fn classifies_data_urls() {
        let payload = classify("data:image/jpeg;base64,AAAA");

        assert_eq!(
            payload,
            ImagePayload::Inline {
                mime_type: "image/jpeg".into(),
                data: "AAAA".into()
            }
        );
    }

    #[test]
    fn classifies_bare_base64_with_png_default() {
        let data = "A".repeat(40);
        let payload = classify(&data);

        assert_eq!(
            payload,
            ImagePayload::Inline {
                mime_type: "image/png".into(),
                data,
            }
        );
    }

    #[test]
    fn short_or_invalid_strings_pass_through_as_urls() {
        assert_eq!(classify("QUJD"), ImagePayload::Url("QUJD".into()));

        let with_space = format!("{} {}", "A".repeat(20), "B".repeat(20));
        assert!(matches!(classify(&with_space), ImagePayload::Url(_)));

        assert_eq!(
            classify("https://example.com/cat.png"),
            ImagePayload::Url("https://example.com/cat.png".into())
        );
    }

    #[test]
    fn accepts_base64_padding() {
        let data = format!("{}==", "A".repeat(42));
        assert!(matches!(classify(&data), ImagePayload::Inline { .. }));

        let over_padded = format!("{}===", "A".repeat(42));
        assert!(matches!(classify(&over_padded), ImagePayload::Url(_)));
    }

    #[test]
    fn renders_data_urls() {
        let payload = ImagePayload::Inline {
            mime_type: "image/webp".into(),
            data: "Zm9v".into(),
        };

        assert_eq!(to_data_url(&payload), "data:image/webp;base64,Zm9v");
    }
}
