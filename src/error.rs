//! Error taxonomy for the messaging core.
//!
//! Every public operation returns a tagged [`Error`] so callers can tell
//! capacity outcomes (`QueueFull`, `WouldBlock`), deadline outcomes
//! (`Timeout`), and lifecycle outcomes (`Closed`, `ClosedAndEmpty`) apart
//! from genuine failures. Nothing degrades silently.

use std::io;

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for channels, queues, transports, and the registry.
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid parameter: malformed endpoint URL, bad payload size for a
    /// typed channel, zero capacity, and similar caller mistakes.
    #[error("invalid argument: {0}")]
    Argument(String),

    /// Operating-system resource failure: socket creation, bind, connect,
    /// or path problems.
    #[error("resource failure: {0}")]
    Resource(String),

    /// A blocking operation's deadline elapsed without progress.
    #[error("operation timed out")]
    Timeout,

    /// A non-blocking operation could not proceed right now.
    #[error("operation would block")]
    WouldBlock,

    /// Non-blocking enqueue found the queue at capacity.
    #[error("queue is full")]
    QueueFull,

    /// Non-blocking dequeue found the queue empty.
    #[error("queue is empty")]
    QueueEmpty,

    /// The channel or queue has been closed.
    #[error("channel is closed")]
    Closed,

    /// The channel or queue has been closed and all residual messages have
    /// been drained.
    #[error("channel is closed and drained")]
    ClosedAndEmpty,

    /// Pattern discipline breached: req/rep ordering, a malformed multipart
    /// chain on receive, or a double-connected pair endpoint.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// Peer disconnect, framing parse failure, or another OS-level socket
    /// error after the connection was established.
    #[error("transport error: {0}")]
    Transport(String),

    /// Declared protocol slot without an implementation (PGM/EPGM/VMCI).
    #[error("transport protocol not implemented: {0}")]
    NotImplemented(&'static str),

    /// The requested operation does not exist for this channel's pattern.
    #[error("operation {op} is not valid for a {pattern} channel")]
    WrongPattern {
        op: &'static str,
        pattern: &'static str,
    },

    /// `runtime::init` has not been called yet.
    #[error("messaging runtime is not initialized")]
    NotInitialized,

    /// An inproc address is already owned by another server endpoint.
    #[error("endpoint already exists: {0}")]
    AlreadyExists(String),

    /// No endpoint is registered under the given address or URL.
    #[error("endpoint not found: {0}")]
    NotFound(String),

    /// A pair endpoint already has its one allowed peer.
    #[error("pair endpoint is already connected")]
    AlreadyConnected,
}

impl Error {
    pub(crate) fn argument(msg: impl Into<String>) -> Self {
        Error::Argument(msg.into())
    }

    pub(crate) fn resource(context: &str, err: io::Error) -> Self {
        Error::Resource(format!("{context}: {err}"))
    }

    pub(crate) fn transport(context: &str, err: io::Error) -> Self {
        Error::Transport(format!("{context}: {err}"))
    }

    pub(crate) fn protocol(msg: impl Into<String>) -> Self {
        Error::ProtocolViolation(msg.into())
    }

    /// True for the two outcomes a drained receiver sees after close.
    pub fn is_closed(&self) -> bool {
        matches!(self, Error::Closed | Error::ClosedAndEmpty)
    }

    /// True for the non-failure outcomes of non-blocking and timed calls.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::Timeout | Error::WouldBlock | Error::QueueFull | Error::QueueEmpty
        )
    }
}
