use std::net::SocketAddr;

use clap::Parser;

/// An LLM API protocol-translation gateway.
#[derive(Debug, Parser)]
#[command(name = "prism", version)]
pub(crate) struct Args {
    /// Address to listen on.
    #[arg(long, short, env = "PRISM_LISTEN", default_value = "127.0.0.1:8000")]
    pub listen_address: SocketAddr,

    /// Log filter, e.g. "info" or "gateway=debug".
    #[arg(long, env = "PRISM_LOG", default_value = "info")]
    pub log_filter: String,
}
