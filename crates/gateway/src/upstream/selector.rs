//! The (URL × variant) sweep.
//!
//! Tries every candidate endpoint with every request shape until one yields a
//! usable response, probing apparent event streams for the silent-empty
//! failure mode some upstreams exhibit instead of a proper error.

use std::time::Duration;

use bytes::Bytes;
use futures::{StreamExt, stream};
use http::{HeaderMap, header};
use reqwest::Client;
use serde_json::Value;

use crate::error::{GatewayError, GatewayResult};

pub(crate) type ByteStream = futures::stream::BoxStream<'static, Result<Bytes, reqwest::Error>>;

/// Probe byte budget; the time budget comes from configuration.
const PROBE_MAX_BYTES: usize = 4096;

/// Statuses worth trying the next URL for; anything else is final.
const URL_HOP_STATUSES: [u16; 8] = [400, 403, 404, 405, 422, 500, 502, 503];

/// Body phrases marking a 400/422 as a routing or auth problem rather than a
/// shape mismatch; retrying other variants cannot help.
const NON_RETRYABLE_PHRASES: &[&str] = &[
    "no static resource",
    "unknown route",
    "method not allowed",
    "not found",
    "invalid api key",
    "api key format",
    "missing api key",
    "unauthorized",
    "forbidden",
    "model_not_found",
    "does not exist",
    "unknown model",
];

/// The accepted upstream response: the first usable (URL, variant) hit.
pub(crate) struct SelectedUpstream {
    /// Endpoint that answered; surfaced in diagnostics.
    pub url: String,
    /// Whether the body is an event stream (as opposed to a single JSON document).
    pub is_event_stream: bool,
    pub body: ByteStream,
}

pub(crate) async fn select_upstream(
    client: &Client,
    urls: &[String],
    variants: &[Value],
    headers: &HeaderMap,
    probe_timeout: Duration,
) -> GatewayResult<SelectedUpstream> {
    let mut first_error: Option<GatewayError> = None;

    'urls: for url in urls {
        for variant in variants {
            let streaming = variant.get("stream").and_then(Value::as_bool).unwrap_or(false);

            let response = match post(client, url, headers, variant, streaming).await {
                Ok(response) => response,
                Err(e) => {
                    log::warn!("Upstream {url} unreachable: {e}");
                    record(&mut first_error, GatewayError::BadGateway(format!("upstream unreachable: {e}")));
                    continue 'urls;
                }
            };

            let status = response.status();

            if status.is_success() {
                if !is_event_stream(&response) {
                    return Ok(SelectedUpstream {
                        url: url.clone(),
                        is_event_stream: false,
                        body: response.bytes_stream().boxed(),
                    });
                }

                match probe(response.bytes_stream().boxed(), probe_timeout).await {
                    Probe::NonEmpty(body) => {
                        return Ok(SelectedUpstream {
                            url: url.clone(),
                            is_event_stream: true,
                            body,
                        });
                    }
                    Probe::Empty => {
                        log::debug!("Empty event stream from {url}; retrying variant as JSON");

                        if let Some(selected) = retry_as_json(client, url, headers, variant, probe_timeout).await {
                            return Ok(selected);
                        }

                        record(
                            &mut first_error,
                            GatewayError::BadGateway("upstream returned an empty event stream".into()),
                        );
                        continue;
                    }
                }
            }

            let status = status.as_u16();
            let body = response.text().await.unwrap_or_default();

            log::debug!("Upstream {url} returned {status}: {body}");
            record(&mut first_error, GatewayError::Upstream { status, body: body.clone() });

            if matches!(status, 400 | 422) && is_retryable_body(&body) {
                continue;
            }

            if should_hop_url(status) {
                continue 'urls;
            }

            return Err(first_error.take().unwrap_or(GatewayError::Upstream { status, body }));
        }
    }

    Err(first_error.unwrap_or_else(|| GatewayError::BadGateway("all upstream urls exhausted".into())))
}

/// Empty-SSE recovery: the same body with `stream: false`, then with `stream`
/// removed, accepting JSON.
async fn retry_as_json(
    client: &Client,
    url: &str,
    headers: &HeaderMap,
    variant: &Value,
    probe_timeout: Duration,
) -> Option<SelectedUpstream> {
    let mut without_stream = variant.clone();
    if let Some(object) = without_stream.as_object_mut() {
        object.remove("stream");
    }

    let mut stream_false = without_stream.clone();
    stream_false["stream"] = Value::Bool(false);

    for body in [stream_false, without_stream] {
        let response = match post(client, url, headers, &body, false).await {
            Ok(response) => response,
            Err(e) => {
                log::debug!("JSON retry against {url} failed: {e}");
                return None;
            }
        };

        if !response.status().is_success() {
            log::debug!("JSON retry against {url} returned {}", response.status());
            continue;
        }

        if !is_event_stream(&response) {
            return Some(SelectedUpstream {
                url: url.to_string(),
                is_event_stream: false,
                body: response.bytes_stream().boxed(),
            });
        }

        if let Probe::NonEmpty(body) = probe(response.bytes_stream().boxed(), probe_timeout).await {
            return Some(SelectedUpstream {
                url: url.to_string(),
                is_event_stream: true,
                body,
            });
        }
    }

    None
}

async fn post(
    client: &Client,
    url: &str,
    headers: &HeaderMap,
    body: &Value,
    streaming: bool,
) -> Result<reqwest::Response, reqwest::Error> {
    let accept = if streaming { "text/event-stream" } else { "application/json" };

    client
        .post(url)
        .headers(headers.clone())
        .header(header::ACCEPT, accept)
        .json(body)
        .send()
        .await
}

fn is_event_stream(response: &reqwest::Response) -> bool {
    response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.contains("text/event-stream"))
}

fn record(first_error: &mut Option<GatewayError>, error: GatewayError) {
    if first_error.is_none() {
        *first_error = Some(error);
    }
}

enum Probe {
    /// Stream produced data; probed bytes are replayed ahead of the rest.
    NonEmpty(ByteStream),
    Empty,
}

/// Read the head of an apparent event stream under a bounded budget.
///
/// Judged empty on EOF without a `data:` line, or when the byte budget passes
/// without one. A timeout with bytes already received means the upstream is
/// merely slow, which counts as non-empty. Probed bytes are never lost: the
/// returned stream replays them before the remainder.
async fn probe(mut body: ByteStream, budget: Duration) -> Probe {
    let deadline = tokio::time::Instant::now() + budget;

    let mut buffered: Vec<Bytes> = Vec::new();
    let mut window: Vec<u8> = Vec::new();

    loop {
        match tokio::time::timeout_at(deadline, body.next()).await {
            // Budget expired.
            Err(_) => {
                if window.is_empty() {
                    return Probe::Empty;
                }
                break;
            }
            // EOF before any data: line.
            Ok(None) => return Probe::Empty,
            Ok(Some(Err(e))) => {
                log::debug!("Upstream read failed during probe: {e}");
                return Probe::Empty;
            }
            Ok(Some(Ok(chunk))) => {
                window.extend_from_slice(&chunk);
                buffered.push(chunk);

                if window.windows(5).any(|bytes| bytes == b"data:") {
                    break;
                }

                if window.len() >= PROBE_MAX_BYTES {
                    return Probe::Empty;
                }
            }
        }
    }

    Probe::NonEmpty(stream::iter(buffered.into_iter().map(Ok)).chain(body).boxed())
}

/// Only 400 and 422 responses are shape-related; their bodies decide whether
/// another variant is worth trying.
pub(crate) fn is_retryable_body(body: &str) -> bool {
    if body.is_empty() {
        return true;
    }

    let lowered = body.to_lowercase();

    !NON_RETRYABLE_PHRASES
        .iter()
        .any(|phrase| lowered.contains(phrase))
}

pub(crate) fn should_hop_url(status: u16) -> bool {
    URL_HOP_STATUSES.contains(&status)
}
