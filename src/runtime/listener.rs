//! Listening endpoint.
//!
//! Owns the bound, non-blocking server socket and turns queued peers into
//! registered sessions.

use crate::runtime::poller::Poller;
use crate::runtime::session::Session;
use crate::runtime::stats::Stats;
use crate::runtime::token::{session_token, LISTENER_TOKEN};
use mio::net::TcpListener;
use mio::Interest;
use slab::Slab;
use socket2::{Domain, Protocol, SockRef, Socket, Type};
use std::io;
use std::net::{Shutdown, SocketAddr};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, trace, warn};

/// How long accepting stays paused after running out of descriptors or
/// memory, unless a session closes first.
pub const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

pub struct Listener {
    inner: TcpListener,
    addr: SocketAddr,
    registered: bool,
    /// Set while accepting is paused for lack of resources. The listener is
    /// left un-armed meanwhile so a full queue cannot spin the loop.
    paused_since: Option<Instant>,
}

/// Accept failures that persist until some descriptor or buffer is freed.
fn is_resource_exhaustion(e: &io::Error) -> bool {
    matches!(
        e.raw_os_error(),
        Some(code) if code == libc::EMFILE
            || code == libc::ENFILE
            || code == libc::ENOBUFS
            || code == libc::ENOMEM
    )
}

impl Listener {
    /// Create a TCP socket, make it non-blocking, bind it and start
    /// listening with the platform's maximum backlog.
    pub fn bind(addr: SocketAddr) -> io::Result<Self> {
        let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
        socket.set_reuse_address(true)?;
        socket.set_nonblocking(true)?;

        socket.bind(&addr.into())?;
        debug!(addr = %addr, "Socket is bound");

        socket.listen(libc::SOMAXCONN)?;

        let inner = TcpListener::from_std(socket.into());
        let addr = inner.local_addr()?;
        info!(addr = %addr, backlog = libc::SOMAXCONN, "Listening started");

        Ok(Self {
            inner,
            addr,
            registered: false,
            paused_since: None,
        })
    }

    /// Address actually bound (resolves port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Register for readable interest. Stays registered until [`close`].
    ///
    /// [`close`]: Listener::close
    pub fn register(&mut self, poller: &Poller) -> io::Result<()> {
        if self.registered {
            return Ok(());
        }
        poller.register(&mut self.inner, LISTENER_TOKEN, Interest::READABLE)?;
        self.registered = true;
        Ok(())
    }

    /// Accept every queued connection and register each as a session.
    ///
    /// Stops at "would block", which is the normal end of the queue. Other
    /// accept failures are logged and never escape: the sessions already
    /// being served must keep running. `max_connections == 0` means no cap.
    ///
    /// Returns the number of sessions added.
    pub fn drain_accept(
        &mut self,
        poller: &Poller,
        sessions: &mut Slab<Session>,
        stats: &Stats,
        max_connections: usize,
    ) -> usize {
        let mut added = 0;

        loop {
            match self.inner.accept() {
                Ok((stream, peer)) => {
                    if max_connections != 0 && sessions.len() >= max_connections {
                        warn!(peer = %peer, max_connections, "Connection limit reached, rejecting");
                        stats.connection_rejected();
                        continue;
                    }

                    if let Err(e) = stream.set_nodelay(true) {
                        debug!(peer = %peer, error = %e, "Failed to set TCP_NODELAY");
                    }

                    let entry = sessions.vacant_entry();
                    let token = session_token(entry.key());
                    let mut session = Session::new(stream, peer, token);

                    if let Err(e) = poller.register(session.stream_mut(), token, Interest::READABLE) {
                        error!(peer = %peer, error = %e, "Failed to register connection");
                        continue;
                    }

                    entry.insert(session);
                    stats.connection_opened();
                    added += 1;

                    debug!(
                        token = token.0,
                        peer = %peer,
                        open = stats.open_connections(),
                        "Accepted connection"
                    );
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                    trace!(accepted = added, "Accept queue is empty");
                    break;
                }
                Err(ref e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::Interrupted
                            | io::ErrorKind::ConnectionAborted
                            | io::ErrorKind::ConnectionReset
                    ) =>
                {
                    trace!(error = %e, "Transient accept failure");
                }
                Err(e) => {
                    self.on_accept_error(poller, e);
                    break;
                }
            }
        }

        added
    }

    /// Handle an accept failure that ended a drain.
    ///
    /// Out of descriptors or memory, retrying right away fails the same
    /// way, so the listener stays un-armed until [`resume`] runs. Any other
    /// error re-arms it: the queue may still hold connections and the edge
    /// would otherwise be lost.
    ///
    /// [`resume`]: Listener::resume
    fn on_accept_error(&mut self, poller: &Poller, e: io::Error) {
        if is_resource_exhaustion(&e) {
            if self.paused_since.is_none() {
                warn!(error = %e, backoff_ms = ACCEPT_BACKOFF.as_millis() as u64, "Out of resources, pausing accept");
            }
            self.paused_since = Some(Instant::now());
            return;
        }

        error!(error = %e, "Accept error");
        self.rearm(poller);
    }

    fn rearm(&mut self, poller: &Poller) {
        if let Err(e) = poller.reregister(&mut self.inner, LISTENER_TOKEN, Interest::READABLE) {
            error!(error = %e, "Failed to re-arm listener");
        }
    }

    pub fn is_paused(&self) -> bool {
        self.paused_since.is_some()
    }

    /// Time left before a paused listener retries on its own.
    pub fn retry_in(&self, now: Instant) -> Option<Duration> {
        self.paused_since
            .map(|since| ACCEPT_BACKOFF.saturating_sub(now.saturating_duration_since(since)))
    }

    /// Re-arm a paused listener; the next poll reports it if peers are
    /// still queued. No-op when accepting is not paused.
    pub fn resume(&mut self, poller: &Poller) {
        if self.paused_since.take().is_some() {
            debug!("Resuming accept");
            self.rearm(poller);
        }
    }

    /// Resume once the backoff has elapsed.
    pub fn resume_if_due(&mut self, poller: &Poller, now: Instant) {
        if self.retry_in(now) == Some(Duration::ZERO) {
            self.resume(poller);
        }
    }

    /// Deregister, half-shut-down and close the socket.
    pub fn close(mut self, poller: &Poller) {
        if self.registered {
            if let Err(e) = poller.deregister(&mut self.inner) {
                debug!(error = %e, "Failed to deregister listener");
            }
        }
        // Listening sockets usually answer ENOTCONN here.
        if let Err(e) = SockRef::from(&self.inner).shutdown(Shutdown::Both) {
            trace!(error = %e, "Listener shutdown");
        }
        info!(addr = %self.addr, "Listener closed");
    }
}
