//! # Goo messaging runtime
//!
//! The channel and distributed-messaging core of the Goo runtime. It
//! unifies in-process channels with distributed messaging patterns —
//! pub/sub, push/pull, req/rep, dealer/router, pair, and broadcast — over
//! pluggable transports: in-process queues, Unix domain sockets, TCP, and
//! UDP, with declared slots for reliable multicast.
//!
//! ## Shape of the core
//!
//! - [`Message`]: owned payload with a kind tag, priority, optional
//!   topic, flags, and an optional multipart chain.
//! - [`PriorityQueue`]: bounded three-band FIFO with blocking,
//!   non-blocking, and timed operations.
//! - [`Channel`]: a queue plus pattern routing plus optional transport
//!   endpoints, behind a cheaply cloneable handle.
//! - The pattern engine routes sends and receives according to the
//!   channel's [`Pattern`]; listener threads drive the reverse path from
//!   transport bytes back into local queues.
//!
//! ## Lifecycle
//!
//! Call [`runtime::init`] once before creating channels and
//! [`runtime::shutdown`] to stop listener threads, close channels, and
//! tear down the in-process endpoint registry.
//!
//! ```no_run
//! use goo_messaging::{runtime, Channel, Pattern};
//!
//! runtime::init();
//! let tx = Channel::with_capacity(Pattern::Normal, 8)?;
//! let rx = tx.clone();
//! tx.send(b"hello")?;
//! assert_eq!(rx.recv()?, b"hello");
//! runtime::shutdown();
//! # Ok::<(), goo_messaging::Error>(())
//! ```

pub mod channel;
pub mod error;
pub mod logging;
pub mod message;
pub mod queue;
pub mod runtime;
pub mod stats;
pub mod transport;

mod endpoint;
mod pattern;
mod registry;

pub use channel::{Channel, ChannelOptions, Pattern};
pub use error::{Error, Result};
pub use message::{Message, MessageFlags, MessageKind, Priority};
pub use queue::PriorityQueue;
pub use stats::StatsSnapshot;
pub use transport::{EndpointRole, EndpointUrl, Protocol, SocketOptions, TransportState};

/// The current version of the messaging runtime.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default configuration values.
pub mod defaults {
    /// Default channel queue capacity.
    pub const CAPACITY: usize = 64;

    /// Default socket buffer size in bytes.
    pub const BUFFER_SIZE: usize = 8192;

    /// Default accept backlog for stream listeners.
    pub const ACCEPT_BACKLOG: i32 = 16;

    /// Frames above this size are rejected.
    pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

    /// Publish-side high water mark.
    pub const HIGH_WATER_MARK: usize = 1024;

    /// Extra rounds a pipeline send walks its targets after a failure.
    pub const MAX_RETRIES: usize = 1;
}
