//! Shared HTTP clients, split by how the gateway uses them.
//!
//! Upstream model calls hold a single connection open for the lifetime of an
//! event stream, so the upstream client carries no overall timeout; only the
//! connect phase is bounded, and the hosting platform's defaults cap the
//! rest. Image inlining is the opposite shape: a one-shot download that must
//! not stall a conversion, so it gets a hard deadline of its own.

use std::{sync::OnceLock, time::Duration};

use reqwest::Client;

/// Client for upstream model endpoints.
pub(crate) fn upstream_client() -> Client {
    static CLIENT: OnceLock<Client> = OnceLock::new();

    CLIENT
        .get_or_init(|| {
            Client::builder()
                .connect_timeout(Duration::from_secs(10))
                .tcp_nodelay(true)
                .tcp_keepalive(Some(Duration::from_secs(60)))
                // Hyper's pool has no connection TTL; a short idle timeout is
                // the only lever for picking up upstream DNS changes between
                // base-URL sweeps.
                .pool_idle_timeout(Some(Duration::from_secs(5)))
                .build()
                .expect("upstream HTTP client construction is infallible with these options")
        })
        .clone()
}

/// Client for inlining remote images into Gemini requests.
pub(crate) fn image_client() -> Client {
    static CLIENT: OnceLock<Client> = OnceLock::new();

    CLIENT
        .get_or_init(|| {
            Client::builder()
                .timeout(Duration::from_secs(20))
                .connect_timeout(Duration::from_secs(5))
                .redirect(reqwest::redirect::Policy::limited(4))
                .build()
                .expect("image HTTP client construction is infallible with these options")
        })
        .clone()
}
