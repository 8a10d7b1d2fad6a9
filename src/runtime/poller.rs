//! Readiness multiplexer.
//!
//! Thin wrapper over `mio::Poll` (epoll on Linux, kqueue on macOS). mio
//! registrations are edge-triggered; callers keep level-triggered behaviour
//! by draining sources until they report "would block", or by re-arming a
//! source with [`Poller::reregister`] when they stop early. Re-arming a
//! source that is still ready makes it show up in the next poll.

use mio::event::Source;
use mio::{Events, Interest, Poll, Registry, Token};
use std::io;
use std::time::Duration;
use tracing::trace;

/// One ready source from a poll cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadyEvent {
    pub token: Token,
    pub readable: bool,
    pub writable: bool,
    /// Peer hung up in at least one direction.
    pub closed: bool,
    pub error: bool,
}

impl ReadyEvent {
    fn from_mio(event: &mio::event::Event) -> Self {
        Self {
            token: event.token(),
            readable: event.is_readable(),
            writable: event.is_writable(),
            closed: event.is_read_closed() || event.is_write_closed(),
            error: event.is_error(),
        }
    }
}

/// Owns the OS readiness context and the event batch it fills.
pub struct Poller {
    poll: Poll,
    events: Events,
}

impl Poller {
    /// Allocate the readiness context, reporting at most `batch_size`
    /// events per poll.
    pub fn new(batch_size: usize) -> io::Result<Self> {
        Ok(Self {
            poll: Poll::new()?,
            events: Events::with_capacity(batch_size.max(1)),
        })
    }

    pub fn registry(&self) -> &Registry {
        self.poll.registry()
    }

    /// Add a source to the interest set. Sources must not be registered twice.
    pub fn register<S>(&self, source: &mut S, token: Token, interest: Interest) -> io::Result<()>
    where
        S: Source + ?Sized,
    {
        self.poll.registry().register(source, token, interest)
    }

    /// Change the interest of a registered source and re-arm it.
    pub fn reregister<S>(&self, source: &mut S, token: Token, interest: Interest) -> io::Result<()>
    where
        S: Source + ?Sized,
    {
        self.poll.registry().reregister(source, token, interest)
    }

    pub fn deregister<S>(&self, source: &mut S) -> io::Result<()>
    where
        S: Source + ?Sized,
    {
        self.poll.registry().deregister(source)
    }

    /// Wait for readiness and replace the contents of `batch` with the
    /// ready sources.
    ///
    /// `None` blocks until something is ready. A wait interrupted by a
    /// signal yields an empty batch rather than an error, so the caller
    /// gets a chance to look at its shutdown flag.
    pub fn poll(&mut self, batch: &mut Vec<ReadyEvent>, timeout: Option<Duration>) -> io::Result<()> {
        batch.clear();

        match self.poll.poll(&mut self.events, timeout) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {
                trace!("Poll interrupted by signal");
                return Ok(());
            }
            Err(e) => return Err(e),
        }

        batch.extend(self.events.iter().map(ReadyEvent::from_mio));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mio::Waker;

    #[test]
    fn test_poll_timeout_yields_empty_batch() {
        let mut poller = Poller::new(16).unwrap();
        let mut batch = vec![ReadyEvent {
            token: Token(7),
            readable: true,
            writable: false,
            closed: false,
            error: false,
        }];

        poller
            .poll(&mut batch, Some(Duration::from_millis(10)))
            .unwrap();
        assert!(batch.is_empty());
    }

    #[test]
    fn test_waker_is_reported() {
        let mut poller = Poller::new(16).unwrap();
        let waker = Waker::new(poller.registry(), Token(3)).unwrap();
        waker.wake().unwrap();

        let mut batch = Vec::new();
        poller.poll(&mut batch, Some(Duration::from_secs(5))).unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].token, Token(3));
        assert!(batch[0].readable);
    }

    #[test]
    fn test_readable_socket_is_reported() {
        use std::io::Write;

        let mut poller = Poller::new(16).unwrap();
        let mut listener = mio::net::TcpListener::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let addr = listener.local_addr().unwrap();
        poller
            .register(&mut listener, Token(1), Interest::READABLE)
            .unwrap();

        let mut client = std::net::TcpStream::connect(addr).unwrap();
        client.write_all(b"x").unwrap();

        let mut batch = Vec::new();
        poller.poll(&mut batch, Some(Duration::from_secs(5))).unwrap();
        assert!(batch.iter().any(|e| e.token == Token(1) && e.readable));

        poller.deregister(&mut listener).unwrap();
    }
}
