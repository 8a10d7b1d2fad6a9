//! uppercase-echo: a single-threaded TCP echo server.
//!
//! Every chunk a client sends is answered with the same bytes, ASCII
//! letters uppercased. All connections are multiplexed over one readiness
//! event loop (epoll/kqueue via mio); no connection can stall another.
//!
//! Features:
//! - Non-blocking accept/read/write with backpressure on slow readers
//! - Optional idle-connection eviction and connection cap
//! - Graceful shutdown on SIGTERM/SIGINT
//! - Configuration via CLI arguments or TOML file

mod config;
mod protocol;
mod runtime;

use config::Config;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!(
        host = %config.host,
        port = config.port,
        buffer_size = config.buffer_size,
        max_connections = config.max_connections,
        idle_timeout_secs = config.idle_timeout.map(|t| t.as_secs()),
        "Starting uppercase-echo server"
    );

    runtime::run(config)?;
    Ok(())
}
