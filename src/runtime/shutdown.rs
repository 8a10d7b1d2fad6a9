//! Cooperative shutdown.
//!
//! A single `AtomicBool` is the only state shared with asynchronous
//! contexts. It is set either by a SIGTERM/SIGINT handler or by a
//! [`ShutdownHandle`]. The loop reads it once per iteration, after a poll
//! batch has been fully dispatched.
//!
//! Setting the flag alone would leave a window where a signal lands between
//! the flag check and the next blocking poll. Both paths therefore also
//! wake the poller: signals write a byte into a self-pipe registered under
//! [`SIGNAL_TOKEN`], handles use a `mio::Waker`.

use crate::runtime::poller::Poller;
use crate::runtime::token::{SIGNAL_TOKEN, WAKER_TOKEN};
use mio::net::UnixStream;
use mio::{Interest, Waker};
use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::SigId;
use std::io::{self, Read};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

const SIGNALS: [libc::c_int; 2] = [SIGTERM, SIGINT];

/// Loop-side shutdown state.
pub struct Shutdown {
    flag: Arc<AtomicBool>,
    waker: Arc<Waker>,
    signals: Option<SignalPipe>,
}

struct SignalPipe {
    receiver: UnixStream,
    ids: Vec<SigId>,
}

impl Shutdown {
    pub fn new(poller: &Poller) -> io::Result<Self> {
        Ok(Self {
            flag: Arc::new(AtomicBool::new(false)),
            waker: Arc::new(Waker::new(poller.registry(), WAKER_TOKEN)?),
            signals: None,
        })
    }

    /// Route SIGTERM and SIGINT into the flag and the poller.
    ///
    /// Calling this more than once is a no-op.
    pub fn install_signal_handlers(&mut self, poller: &Poller) -> io::Result<()> {
        if self.signals.is_some() {
            return Ok(());
        }

        let (receiver, sender) = std::os::unix::net::UnixStream::pair()?;
        receiver.set_nonblocking(true)?;
        sender.set_nonblocking(true)?;

        let mut receiver = UnixStream::from_std(receiver);
        poller.register(&mut receiver, SIGNAL_TOKEN, Interest::READABLE)?;

        let mut ids = Vec::with_capacity(SIGNALS.len());
        for &signal in &SIGNALS {
            // The flag action stays installed for the life of the process so
            // a late signal after teardown is absorbed instead of killing us.
            signal_hook::flag::register(signal, Arc::clone(&self.flag))?;
            ids.push(signal_hook::low_level::pipe::register(
                signal,
                sender.try_clone()?,
            )?);
        }

        debug!(signals = ?SIGNALS, "Signal handlers installed");
        self.signals = Some(SignalPipe { receiver, ids });
        Ok(())
    }

    pub fn handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            flag: Arc::clone(&self.flag),
            waker: Arc::clone(&self.waker),
        }
    }

    pub fn is_requested(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Empty the self-pipe after a signal wakeup.
    pub fn drain_signal_pipe(&mut self) {
        let Some(pipe) = self.signals.as_mut() else {
            return;
        };

        let mut buf = [0u8; 64];
        loop {
            match pipe.receiver.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => trace!(signals = n, "Drained signal pipe"),
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!(error = %e, "Failed to drain signal pipe");
                    break;
                }
            }
        }

        if self.is_requested() {
            info!("Termination signal received");
        }
    }

    /// Detach the self-pipe from signal delivery and the poller.
    pub fn uninstall(self, poller: &Poller) {
        if let Some(mut pipe) = self.signals {
            for id in pipe.ids {
                signal_hook::low_level::unregister(id);
            }
            if let Err(e) = poller.deregister(&mut pipe.receiver) {
                debug!(error = %e, "Failed to deregister signal pipe");
            }
        }
    }
}

/// Requests shutdown of a running event loop from any thread.
#[derive(Clone)]
#[allow(dead_code)]
pub struct ShutdownHandle {
    flag: Arc<AtomicBool>,
    waker: Arc<Waker>,
}

#[allow(dead_code)]
impl ShutdownHandle {
    /// Set the flag and wake the poller. Safe to call repeatedly, including
    /// after the loop has stopped.
    pub fn shutdown(&self) {
        self.flag.store(true, Ordering::SeqCst);
        if let Err(e) = self.waker.wake() {
            debug!(error = %e, "Failed to wake event loop");
        }
    }

    pub fn is_requested(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}
