//! Readiness token layout.
//!
//! Every source registered with the poller is identified by a `mio::Token`.
//! Sessions use their slab key directly; the top of the token space is
//! reserved for the loop's own sources.

use mio::Token;

/// Listening socket.
pub const LISTENER_TOKEN: Token = Token(usize::MAX);
/// Read end of the signal self-pipe.
pub const SIGNAL_TOKEN: Token = Token(usize::MAX - 1);
/// In-process shutdown waker.
pub const WAKER_TOKEN: Token = Token(usize::MAX - 2);

/// What a readiness token refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Listener,
    Signal,
    Waker,
    /// Client session, identified by its slab key.
    Session(usize),
}

impl TokenKind {
    /// Classify a token reported by the poller.
    pub fn of(token: Token) -> Self {
        match token {
            LISTENER_TOKEN => TokenKind::Listener,
            SIGNAL_TOKEN => TokenKind::Signal,
            WAKER_TOKEN => TokenKind::Waker,
            Token(key) => TokenKind::Session(key),
        }
    }
}

/// Token for the session stored under `key`.
pub fn session_token(key: usize) -> Token {
    Token(key)
}
