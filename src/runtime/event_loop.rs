//! mio event loop implementation.
//!
//! Single thread, readiness-based: poll tells us which sockets are ready,
//! then each one is serviced with non-blocking syscalls. The only place the
//! thread blocks is the poll itself.
//!
//! Each iteration:
//! 1. poll (blocking, or bounded by the idle sweep interval and the accept
//!    backoff)
//! 2. dispatch every event of the batch: listener events drain the accept
//!    queue, session events run a read/uppercase/write cycle
//! 3. resume a paused listener once its backoff is over
//! 4. evict idle sessions, if enabled
//! 5. check the shutdown flag
//!
//! The flag is never consulted mid-batch, so a batch that was being
//! dispatched when shutdown was requested still completes.

use crate::config::Config;
use crate::runtime::buffer::ScratchBuffer;
use crate::runtime::listener::Listener;
use crate::runtime::poller::{Poller, ReadyEvent};
use crate::runtime::session::{CloseReason, Outcome, Session};
use crate::runtime::shutdown::{Shutdown, ShutdownHandle};
use crate::runtime::stats::{Stats, StatsSnapshot};
use crate::runtime::token::TokenKind;
use slab::Slab;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, trace};

/// Longest the loop sleeps between idle sweeps.
const MAX_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

pub struct EventLoop {
    poller: Poller,
    listener: Listener,
    sessions: Slab<Session>,
    scratch: ScratchBuffer,
    stats: Arc<Stats>,
    shutdown: Shutdown,
    batch: Vec<ReadyEvent>,
    max_connections: usize,
    idle_timeout: Option<Duration>,
}

impl EventLoop {
    /// Allocate the poller and bind the listener. Any failure here is a
    /// startup failure.
    pub fn new(config: &Config) -> io::Result<Self> {
        let poller = Poller::new(config.batch_size)?;
        let listener = Listener::bind(config.listen_addr())?;
        let shutdown = Shutdown::new(&poller)?;

        Ok(Self {
            poller,
            listener,
            sessions: Slab::new(),
            scratch: ScratchBuffer::new(config.buffer_size),
            stats: Arc::new(Stats::new()),
            shutdown,
            batch: Vec::with_capacity(config.batch_size),
            max_connections: config.max_connections,
            idle_timeout: config.idle_timeout,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.listener.local_addr()
    }

    /// Shared view of the loop's counters.
    #[allow(dead_code)]
    pub fn stats(&self) -> Arc<Stats> {
        Arc::clone(&self.stats)
    }

    #[allow(dead_code)]
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.handle()
    }

    /// Let SIGTERM/SIGINT stop the loop.
    pub fn install_signal_handlers(&mut self) -> io::Result<()> {
        self.shutdown.install_signal_handlers(&self.poller)
    }

    /// Serve until shutdown is requested, then release every resource.
    ///
    /// Returns the final counters. A poll failure also tears everything
    /// down before it is returned.
    pub fn run(mut self) -> io::Result<StatsSnapshot> {
        let result = self.serve();
        if let Err(ref e) = result {
            error!(error = %e, "Event loop failed");
        }
        let snapshot = self.teardown();
        result.map(|()| snapshot)
    }

    fn serve(&mut self) -> io::Result<()> {
        self.listener.register(&self.poller)?;

        info!(
            addr = %self.listener.local_addr(),
            chunk_size = self.scratch.chunk_size(),
            max_connections = self.max_connections,
            idle_timeout_secs = self.idle_timeout.map(|t| t.as_secs_f64()),
            "Event loop started"
        );

        let sweep = self.idle_timeout.map(|t| t.min(MAX_SWEEP_INTERVAL));

        loop {
            let timeout = match (sweep, self.listener.retry_in(Instant::now())) {
                (Some(a), Some(b)) => Some(a.min(b)),
                (a, b) => a.or(b),
            };
            self.poller.poll(&mut self.batch, timeout)?;

            let batch = std::mem::take(&mut self.batch);
            for event in &batch {
                self.dispatch(event);
            }
            self.batch = batch;

            self.listener.resume_if_due(&self.poller, Instant::now());

            if let Some(idle_timeout) = self.idle_timeout {
                self.evict_idle(idle_timeout);
            }

            if self.shutdown.is_requested() {
                info!(open = self.stats.open_connections(), "Shutdown requested");
                return Ok(());
            }
        }
    }

    fn dispatch(&mut self, event: &ReadyEvent) {
        match TokenKind::of(event.token) {
            TokenKind::Listener => {
                self.listener.drain_accept(
                    &self.poller,
                    &mut self.sessions,
                    &self.stats,
                    self.max_connections,
                );
            }
            TokenKind::Signal => self.shutdown.drain_signal_pipe(),
            TokenKind::Waker => trace!("Woken by shutdown handle"),
            TokenKind::Session(key) => self.service(key, event),
        }
    }

    fn service(&mut self, key: usize, event: &ReadyEvent) {
        let Some(session) = self.sessions.get_mut(key) else {
            trace!(token = key, "Event for a closed connection");
            return;
        };

        trace!(
            token = key,
            readable = event.readable,
            writable = event.writable,
            closed = event.closed,
            error = event.error,
            "Connection ready"
        );

        match session.on_ready(&self.poller, &mut self.scratch, &self.stats) {
            Outcome::Open => {}
            Outcome::Close(reason) => self.close_session(key, reason),
        }
    }

    fn evict_idle(&mut self, idle_timeout: Duration) {
        let now = Instant::now();
        let idle: Vec<usize> = self
            .sessions
            .iter()
            .filter(|(_, session)| session.is_idle(now, idle_timeout))
            .map(|(key, _)| key)
            .collect();

        for key in idle {
            if let Some(session) = self.sessions.get(key) {
                debug!(token = key, peer = %session.peer(), "Evicting idle connection");
            }
            self.close_session(key, CloseReason::Idle);
        }
    }

    /// Remove a session from the table and close it. The slab removal is
    /// what guarantees a session is closed and counted at most once.
    ///
    /// A closed session frees a descriptor, so accepting resumes right away
    /// if it was paused for lack of them.
    fn close_session(&mut self, key: usize, reason: CloseReason) {
        if let Some(session) = self.sessions.try_remove(key) {
            session.close(&self.poller, reason);
            self.stats.connection_closed();
            if self.listener.is_paused() {
                self.listener.resume(&self.poller);
            }
        }
    }

    fn teardown(mut self) -> StatsSnapshot {
        let open: Vec<usize> = self.sessions.iter().map(|(key, _)| key).collect();
        for key in open {
            self.close_session(key, CloseReason::Shutdown);
        }

        let EventLoop {
            poller,
            listener,
            shutdown,
            stats,
            ..
        } = self;

        shutdown.uninstall(&poller);
        listener.close(&poller);
        drop(poller);

        let snapshot = stats.snapshot();
        info!(
            uptime_secs = stats.uptime().num_seconds(),
            accepted = snapshot.accepted,
            closed = snapshot.closed,
            rejected = snapshot.rejected,
            bytes_in = snapshot.bytes_in,
            bytes_out = snapshot.bytes_out,
            "Event loop stopped"
        );
        snapshot
    }
}
