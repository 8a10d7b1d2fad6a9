//! Single-threaded readiness runtime.
//!
//! Built on mio (epoll on Linux, kqueue on macOS):
//! - `Poller`: readiness multiplexer
//! - `Listener`: accepts queued peers and registers them
//! - `Session`: per-connection read/uppercase/write cycle
//! - `EventLoop`: ties them together and owns all state

pub(crate) mod buffer;
mod event_loop;
mod listener;
mod poller;
mod session;
mod shutdown;
mod stats;
mod token;

pub use event_loop::EventLoop;

use crate::config::Config;
use tracing::info;

/// Bind, serve until SIGTERM/SIGINT, then tear everything down.
pub fn run(config: Config) -> std::io::Result<()> {
    let mut event_loop = EventLoop::new(&config)?;
    event_loop.install_signal_handlers()?;
    info!(addr = %event_loop.local_addr(), "Serving");

    let stats = event_loop.run()?;
    info!(
        accepted = stats.accepted,
        rejected = stats.rejected,
        "Server stopped"
    );
    Ok(())
}
