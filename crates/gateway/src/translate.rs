//! Streaming translation from upstream Responses events to client dialects.
//!
//! One translator instance lives for one request. The shared [`state`]
//! machine absorbs upstream quirks; the per-dialect emitters only render
//! already-reconciled deltas.

pub(crate) mod anthropic;
pub(crate) mod chat;
pub(crate) mod driver;
pub(crate) mod event;
pub(crate) mod gemini;
pub(crate) mod responses;
pub(crate) mod state;

use crate::sse::SseEvent;

use event::UpstreamEvent;

/// A per-dialect streaming emitter.
pub(crate) trait StreamTranslator: Send {
    /// Consume one upstream event, producing zero or more client frames.
    fn handle(&mut self, event: &UpstreamEvent) -> Vec<SseEvent>;

    /// Emit whatever terminal framing is still owed. Safe to call after a
    /// terminal upstream event; the translator guards against double
    /// emission.
    fn finish(&mut self) -> Vec<SseEvent>;

    /// The shared accumulation state, read after completion for session
    /// bookkeeping.
    fn state(&self) -> &state::StreamState;
}

fn now_unix() -> i64 {
    jiff::Timestamp::now().as_second()
}
