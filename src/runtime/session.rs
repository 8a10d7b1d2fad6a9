//! Client session: one accepted, non-blocking TCP stream.
//!
//! A session is registered with the poller exactly while it is open. It is
//! either reading (Readable interest) or flushing output that the socket
//! could not take in one go (Writable interest). Reading pauses while
//! output is pending, so a peer that does not read its responses is slowed
//! down by its own backpressure instead of growing our buffers.

use crate::protocol;
use crate::runtime::buffer::ScratchBuffer;
use crate::runtime::poller::Poller;
use crate::runtime::stats::Stats;
use bytes::{Buf, BytesMut};
use mio::net::TcpStream;
use mio::{Interest, Token};
use std::fmt;
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr};
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

/// Reads serviced for one readiness event before yielding to other
/// sessions. A session that still has data afterwards is re-armed so the
/// poller reports it again.
const READS_PER_EVENT: usize = 16;

/// Why a session was torn down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Zero-length read: the peer shut down its write side.
    PeerClosed,
    ReadError,
    WriteError,
    Idle,
    Shutdown,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CloseReason::PeerClosed => "peer closed",
            CloseReason::ReadError => "read error",
            CloseReason::WriteError => "write error",
            CloseReason::Idle => "idle",
            CloseReason::Shutdown => "shutdown",
        };
        f.write_str(s)
    }
}

/// Result of servicing a readiness event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Session stays open and registered.
    Open,
    /// Session must be closed and never serviced again.
    Close(CloseReason),
}

pub struct Session {
    stream: TcpStream,
    peer: SocketAddr,
    token: Token,
    /// Transformed bytes the socket has not accepted yet.
    pending: BytesMut,
    last_active: Instant,
}

impl Session {
    pub fn new(stream: TcpStream, peer: SocketAddr, token: Token) -> Self {
        Self {
            stream,
            peer,
            token,
            pending: BytesMut::new(),
            last_active: Instant::now(),
        }
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn stream_mut(&mut self) -> &mut TcpStream {
        &mut self.stream
    }

    pub fn has_pending_output(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Whether the session has seen no traffic for at least `timeout`.
    pub fn is_idle(&self, now: Instant, timeout: Duration) -> bool {
        now.saturating_duration_since(self.last_active) >= timeout
    }

    /// Handle one readiness event.
    pub fn on_ready(
        &mut self,
        poller: &Poller,
        scratch: &mut ScratchBuffer,
        stats: &Stats,
    ) -> Outcome {
        if self.has_pending_output() {
            self.flush_pending(poller, stats)
        } else {
            self.service_readable(poller, scratch, stats)
        }
    }

    /// Run up to `READS_PER_EVENT` read/uppercase/write cycles, stopping
    /// early when the socket has no more data, the peer closes or output
    /// backs up.
    ///
    /// Every cycle handles exactly the bytes of one read. When the budget
    /// runs out the session is re-armed so the next poll reports it again.
    pub fn service_readable(
        &mut self,
        poller: &Poller,
        scratch: &mut ScratchBuffer,
        stats: &Stats,
    ) -> Outcome {
        let token = self.token.0;

        for _ in 0..READS_PER_EVENT {
            let buf = scratch.as_mut_slice();
            let n = match self.stream.read(buf) {
                Ok(0) => return Outcome::Close(CloseReason::PeerClosed),
                Ok(n) => n,
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                    trace!(token, "Read would block");
                    return Outcome::Open;
                }
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!(token, peer = %self.peer, error = %e, "Read failed");
                    return Outcome::Close(CloseReason::ReadError);
                }
            };

            stats.record_read(n);
            self.last_active = Instant::now();

            let chunk = &mut buf[..n];
            protocol::uppercase_in_place(chunk);
            trace!(token, bytes = n, "Echoing chunk");

            if let Err(e) = self.write_chunk(chunk, stats) {
                warn!(token, peer = %self.peer, error = %e, "Write failed");
                return Outcome::Close(CloseReason::WriteError);
            }

            if self.has_pending_output() {
                trace!(token, pending = self.pending.len(), "Output backed up, waiting for writable");
                return self.rearm(poller, Interest::WRITABLE, CloseReason::WriteError);
            }
        }

        // Budget spent with data possibly still queued: re-arm so the next
        // poll reports this session again.
        self.rearm(poller, Interest::READABLE, CloseReason::ReadError)
    }

    /// Write as much of `chunk` as the socket takes; keep the rest.
    fn write_chunk(&mut self, chunk: &[u8], stats: &Stats) -> io::Result<()> {
        let mut written = 0;

        while written < chunk.len() {
            match self.stream.write(&chunk[written..]) {
                Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
                Ok(n) => {
                    written += n;
                    stats.record_written(n);
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }

        if written < chunk.len() {
            self.pending.extend_from_slice(&chunk[written..]);
        }
        Ok(())
    }

    /// Push pending output; resume reading once it is all gone.
    pub fn flush_pending(&mut self, poller: &Poller, stats: &Stats) -> Outcome {
        let token = self.token.0;

        while !self.pending.is_empty() {
            match self.stream.write(&self.pending) {
                Ok(0) => {
                    warn!(token, peer = %self.peer, "Write returned 0");
                    return Outcome::Close(CloseReason::WriteError);
                }
                Ok(n) => {
                    self.pending.advance(n);
                    stats.record_written(n);
                    self.last_active = Instant::now();
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                    trace!(token, pending = self.pending.len(), "Write would block");
                    return Outcome::Open;
                }
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!(token, peer = %self.peer, error = %e, "Write failed");
                    return Outcome::Close(CloseReason::WriteError);
                }
            }
        }

        self.rearm(poller, Interest::READABLE, CloseReason::WriteError)
    }

    /// Switch interest; a failure closes the session with `reason`.
    fn rearm(&mut self, poller: &Poller, interest: Interest, reason: CloseReason) -> Outcome {
        match poller.reregister(&mut self.stream, self.token, interest) {
            Ok(()) => Outcome::Open,
            Err(e) => {
                warn!(token = self.token.0, error = %e, "Failed to re-arm connection");
                Outcome::Close(reason)
            }
        }
    }

    /// Deregister, shut down both directions and close the descriptor.
    pub fn close(mut self, poller: &Poller, reason: CloseReason) {
        if let Err(e) = poller.deregister(&mut self.stream) {
            trace!(token = self.token.0, error = %e, "Deregister failed");
        }
        // ENOTCONN after a reset is expected here.
        if let Err(e) = self.stream.shutdown(Shutdown::Both) {
            trace!(token = self.token.0, error = %e, "Shutdown failed");
        }
        debug!(
            token = self.token.0,
            peer = %self.peer,
            reason = %reason,
            unsent = self.pending.len(),
            "Connection closed"
        );
    }
}
