//! Upstream providers.
//!
//! The OpenAI Responses provider is the canonical path and carries the
//! session-stitching orchestration; the Gemini and Anthropic providers serve
//! prefix-routed chat traffic against their native upstreams.

pub(crate) mod anthropic;
pub(crate) mod gemini;
pub(crate) mod openai;

use axum::body::Body;
use axum::http::{HeaderValue, header};
use axum::response::Response;
use bytes::Bytes;
use futures::StreamExt;

/// Wrap a frame stream in an SSE response with the client-facing headers.
pub(crate) fn sse_response(frames: impl futures::Stream<Item = String> + Send + 'static) -> Response {
    let body = Body::from_stream(frames.map(|frame| Ok::<_, std::convert::Infallible>(Bytes::from(frame))));

    let mut response = Response::new(body);
    let headers = response.headers_mut();

    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/event-stream; charset=utf-8"),
    );
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert("x-accel-buffering", HeaderValue::from_static("no"));
    headers.insert(header::CONNECTION, HeaderValue::from_static("close"));

    response
}
