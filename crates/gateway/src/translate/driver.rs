//! Drives upstream bytes through the SSE codec into a translator.
//!
//! Handles the non-SSE fallback: when the upstream body never produced a
//! `data:` line, the buffered body is treated as one JSON document (either a
//! complete Responses object or a string of nested SSE text) and replayed
//! through the same event path.

use std::ops::ControlFlow;

use futures::StreamExt;

use crate::error::{GatewayError, GatewayResult};
use crate::sse::{self, SseParser};
use crate::translate::{StreamTranslator, event::UpstreamEvent, state::StreamState};
use crate::upstream::selector::{ByteStream, SelectedUpstream};

/// Stream encoded client frames for a streaming client.
///
/// The upstream read runs on its own task; dropping the returned stream
/// closes the channel, which aborts the task and cancels the upstream read.
pub(crate) fn frame_stream(
    upstream: SelectedUpstream,
    mut translator: Box<dyn StreamTranslator>,
    fallback_cap: usize,
    on_complete: Option<Box<dyn FnOnce(&StreamState) + Send>>,
) -> impl futures::Stream<Item = String> + Send + use<> {
    let (sender, receiver) = futures::channel::mpsc::unbounded::<String>();

    tokio::spawn(async move {
        let mut forward = |frames: Vec<sse::SseEvent>| {
            for frame in frames {
                if sender.unbounded_send(sse::encode(&frame.event, &frame.data)).is_err() {
                    // Client went away; stop reading upstream.
                    return ControlFlow::Break(());
                }
            }
            ControlFlow::Continue(())
        };

        let outcome = drive(
            upstream.body,
            upstream.is_event_stream,
            fallback_cap,
            false,
            |event| forward(translator.handle(event)),
        )
        .await;

        if let Err(e) = outcome {
            log::warn!("Upstream translation aborted: {e}");
        }

        forward(translator.finish());

        if let Some(hook) = on_complete {
            hook(translator.state());
        }
    });

    receiver
}

/// Buffer the whole upstream into final state for a non-streaming client.
///
/// Fails with a gateway error when the body exceeds the byte cap; the client
/// should retry with `stream: true`.
pub(crate) async fn collect_state(upstream: SelectedUpstream, max_buffered: usize) -> GatewayResult<StreamState> {
    let mut state = StreamState::new();

    drive(upstream.body, upstream.is_event_stream, max_buffered, true, |event| {
        state.apply(event);
        ControlFlow::Continue(())
    })
    .await?;

    state.force_finish();
    Ok(state)
}

async fn drive<F>(
    mut body: ByteStream,
    is_event_stream: bool,
    cap: usize,
    enforce_cap: bool,
    mut on_event: F,
) -> GatewayResult<()>
where
    F: FnMut(&UpstreamEvent) -> ControlFlow<()>,
{
    let mut parser = SseParser::new();
    let mut raw: Vec<u8> = Vec::new();
    let mut total: usize = 0;

    while let Some(chunk) = body.next().await {
        let bytes = match chunk {
            Ok(bytes) => bytes,
            Err(e) => {
                // Transport failures mid-stream are elided; the translator
                // finalizes with whatever state accumulated.
                log::warn!("Upstream read failed mid-stream: {e}");
                break;
            }
        };

        total += bytes.len();
        if enforce_cap && total > cap {
            return Err(GatewayError::BadGateway(
                "upstream response exceeds the buffered-response limit; retry with stream:true".into(),
            ));
        }

        if is_event_stream {
            for frame in parser.push(&bytes) {
                if let Some(event) = UpstreamEvent::from_sse(&frame)
                    && on_event(&event).is_break()
                {
                    return Ok(());
                }
            }

            // Keep a bounded copy in case this never turns out to be SSE.
            if !parser.saw_data() && raw.len() + bytes.len() <= cap {
                raw.extend_from_slice(&bytes);
            }
        } else if raw.len() + bytes.len() <= cap {
            raw.extend_from_slice(&bytes);
        } else {
            return Err(GatewayError::BadGateway(
                "upstream response exceeds the buffered-response limit; retry with stream:true".into(),
            ));
        }
    }

    if is_event_stream {
        for frame in parser.finish() {
            if let Some(event) = UpstreamEvent::from_sse(&frame)
                && on_event(&event).is_break()
            {
                return Ok(());
            }
        }

        if !parser.saw_data() {
            replay_fallback(&raw, &mut on_event);
        }
    } else {
        replay_fallback(&raw, &mut on_event);
    }

    Ok(())
}

/// Treat a buffered non-SSE body as one JSON document.
fn replay_fallback<F>(raw: &[u8], on_event: &mut F)
where
    F: FnMut(&UpstreamEvent) -> ControlFlow<()>,
{
    if raw.is_empty() {
        return;
    }

    let Ok(value) = serde_json::from_slice::<serde_json::Value>(raw) else {
        log::debug!("Non-SSE upstream body is not JSON; dropping {} bytes", raw.len());
        return;
    };

    match value {
        serde_json::Value::String(nested) => {
            // A JSON string containing SSE text; parse it like a stream.
            let mut parser = SseParser::new();
            let mut frames = parser.push(nested.as_bytes());
            frames.extend(parser.finish());

            for frame in frames {
                if let Some(event) = UpstreamEvent::from_sse(&frame)
                    && on_event(&event).is_break()
                {
                    return;
                }
            }
        }
        object => {
            let event = UpstreamEvent::synthetic_completed(object);
            let _ = on_event(&event);
        }
    }
}
