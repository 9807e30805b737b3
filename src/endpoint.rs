//! Transport endpoints and their worker threads.
//!
//! An [`Endpoint`] is a channel's attachment to one URL: an inproc registry
//! entry, a stream listener with its accept thread, a connected stream, or
//! a UDP socket. Server endpoints run a dedicated accept loop; every stream
//! connection, accepted or dialed, gets a reader thread that decodes frames
//! and hands the resulting messages to the pattern engine. Workers talk to
//! consumers exclusively through the channel's queue.
//!
//! Shutdown protocol: the closing thread raises the endpoint's shutdown
//! flag, shuts the sockets down to wake blocked readers, then joins the
//! workers. The accept loop polls a non-blocking listener so it can notice
//! the flag between `accept` attempts.

use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, error, warn};

use crate::channel::ChannelCore;
use crate::error::{Error, Result};
use crate::message::Message;
use crate::pattern;
use crate::queue::PriorityQueue;
use crate::runtime;
use crate::transport::udp_socket::UdpEndpointSocket;
use crate::transport::{
    self, frame, EndpointRole, EndpointUrl, Protocol, SocketOptions, StreamListener,
    StreamSocket, TransportState,
};

/// Sleep between accept attempts on the non-blocking listener.
const ACCEPT_POLL: Duration = Duration::from_millis(10);

/// Poll interval for UDP readers, which cannot be woken by a socket
/// shutdown.
const UDP_POLL: Duration = Duration::from_millis(100);

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Writable half of one stream connection, shared between the pattern
/// engine (sends, replies) and the endpoint bookkeeping.
#[derive(Clone)]
pub(crate) struct ConnectionHandle {
    pub(crate) id: u64,
    inner: Arc<ConnectionInner>,
}

struct ConnectionInner {
    writer: Mutex<Box<dyn StreamSocket>>,
    peer: String,
    errored: AtomicBool,
}

impl ConnectionHandle {
    fn new(writer: Box<dyn StreamSocket>) -> Self {
        let peer = writer.peer_label();
        ConnectionHandle {
            id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
            inner: Arc::new(ConnectionInner {
                writer: Mutex::new(writer),
                peer,
                errored: AtomicBool::new(false),
            }),
        }
    }

    /// Write the whole multipart chain while holding the writer lock, so
    /// parts from concurrent senders never interleave.
    pub fn send_chain(&self, msg: &Message) -> io::Result<()> {
        let mut writer = self.inner.writer.lock();
        frame::write_chain(&mut transport::StreamWriter(&mut **writer), msg)
    }

    pub fn shutdown(&self) {
        let writer = self.inner.writer.lock();
        let _ = writer.shutdown_stream();
    }

    pub fn peer(&self) -> &str {
        &self.inner.peer
    }

    pub fn mark_errored(&self) {
        self.inner.errored.store(true, Ordering::Release);
    }

    pub fn is_errored(&self) -> bool {
        self.inner.errored.load(Ordering::Acquire)
    }
}

/// State shared between an endpoint and its worker threads.
pub(crate) struct EndpointShared {
    pub shutdown: AtomicBool,
    pub errored: AtomicBool,
    pub connections: Mutex<HashMap<u64, ConnectionHandle>>,
    reader_threads: Mutex<Vec<JoinHandle<()>>>,
}

impl EndpointShared {
    fn new() -> Arc<Self> {
        Arc::new(EndpointShared {
            shutdown: AtomicBool::new(false),
            errored: AtomicBool::new(false),
            connections: Mutex::new(HashMap::new()),
            reader_threads: Mutex::new(Vec::new()),
        })
    }
}

enum EndpointKind {
    /// Registry entry owned by this server; the channel's own queue is the
    /// shared queue, so there is nothing to route on send.
    InprocServer,
    /// Shared handle on a server's queue.
    InprocClient { queue: Arc<PriorityQueue> },
    /// Bound listener; live connections are tracked in the shared state.
    StreamListener {
        #[allow(dead_code)]
        listener: Arc<dyn StreamListener>,
    },
    /// Dialed connection.
    StreamClient { conn: ConnectionHandle },
    /// Datagram socket, either role.
    Udp { socket: Arc<UdpEndpointSocket> },
}

/// One transport attachment of a channel.
pub(crate) struct Endpoint {
    pub url: EndpointUrl,
    pub role: EndpointRole,
    pub state: TransportState,
    kind: EndpointKind,
    pub shared: Arc<EndpointShared>,
    accept_thread: Option<JoinHandle<()>>,
}

/// Anywhere a pattern can push one message.
pub(crate) enum SendTarget {
    Queue(Arc<PriorityQueue>),
    Conn(ConnectionHandle),
    Udp(Arc<UdpEndpointSocket>),
}

impl SendTarget {
    /// Deliver one message (with its chain) to the target.
    pub fn deliver(&self, msg: Message, blocking: bool, timeout: Option<Duration>) -> Result<()> {
        match self {
            SendTarget::Queue(queue) => queue.enqueue(msg, blocking, timeout),
            SendTarget::Conn(conn) => conn.send_chain(&msg).map_err(|e| {
                conn.mark_errored();
                Error::transport(conn.peer(), e)
            }),
            SendTarget::Udp(socket) => socket
                .send_message(&msg)
                .map_err(|e| Error::transport(&socket.label(), e)),
        }
    }
}

impl Endpoint {
    /// Bind a server endpoint and start its workers.
    pub fn bind(
        core: &Arc<ChannelCore>,
        url: EndpointUrl,
        options: &SocketOptions,
    ) -> Result<Endpoint> {
        match url.protocol {
            Protocol::Inproc => {
                let queue = core.queue.clone().ok_or_else(|| {
                    Error::argument("inproc bind requires a buffered channel")
                })?;
                runtime::handle()
                    .registry()
                    .register_server(&url.address, queue, Arc::downgrade(core))?;
                Ok(Endpoint {
                    url,
                    role: EndpointRole::Server,
                    state: TransportState::Connected,
                    kind: EndpointKind::InprocServer,
                    shared: EndpointShared::new(),
                    accept_thread: None,
                })
            }
            Protocol::Ipc | Protocol::Tcp => {
                let listener: Arc<dyn StreamListener> =
                    Arc::from(transport::bind_listener(&url, options)?);
                listener
                    .set_listener_nonblocking(true)
                    .map_err(|e| Error::resource("set listener non-blocking", e))?;

                let shared = EndpointShared::new();
                let single_peer = core.pattern.is_exclusive_pair();
                let accept_thread = {
                    let core = Arc::downgrade(core);
                    let shared = Arc::clone(&shared);
                    let listener = Arc::clone(&listener);
                    let max_frame = options.max_frame_size;
                    thread::Builder::new()
                        .name(format!("goo-accept-{url}"))
                        .spawn(move || {
                            run_accept_loop(core, shared, listener, single_peer, max_frame)
                        })
                        .map_err(|e| Error::resource("spawn accept thread", e))?
                };

                Ok(Endpoint {
                    url,
                    role: EndpointRole::Server,
                    state: TransportState::Connected,
                    kind: EndpointKind::StreamListener { listener },
                    shared,
                    accept_thread: Some(accept_thread),
                })
            }
            Protocol::Udp => {
                let socket = Arc::new(UdpEndpointSocket::bind(&url, options)?);
                socket
                    .set_read_timeout(Some(UDP_POLL))
                    .map_err(|e| Error::resource("set udp read timeout", e))?;

                let shared = EndpointShared::new();
                let reader = {
                    let core = Arc::downgrade(core);
                    let shared = Arc::clone(&shared);
                    let socket = Arc::clone(&socket);
                    thread::Builder::new()
                        .name(format!("goo-udp-{url}"))
                        .spawn(move || run_udp_reader(core, shared, socket))
                        .map_err(|e| Error::resource("spawn udp reader thread", e))?
                };
                shared.reader_threads.lock().push(reader);

                Ok(Endpoint {
                    url,
                    role: EndpointRole::Server,
                    state: TransportState::Connected,
                    kind: EndpointKind::Udp { socket },
                    shared,
                    accept_thread: None,
                })
            }
            Protocol::Pgm | Protocol::Epgm | Protocol::Vmci => {
                Err(transport::multicast::not_implemented(url.protocol))
            }
        }
    }

    /// Connect a client endpoint and start its reader.
    pub fn connect(
        core: &Arc<ChannelCore>,
        url: EndpointUrl,
        options: &SocketOptions,
    ) -> Result<Endpoint> {
        match url.protocol {
            Protocol::Inproc => {
                let entry = runtime::handle().registry().lookup(&url.address)?;
                pattern::on_inproc_connected(core, &entry)?;
                Ok(Endpoint {
                    url,
                    role: EndpointRole::Client,
                    state: TransportState::Connected,
                    kind: EndpointKind::InprocClient { queue: entry.queue },
                    shared: EndpointShared::new(),
                    accept_thread: None,
                })
            }
            Protocol::Ipc | Protocol::Tcp => {
                let stream = transport::connect_stream(&url, options)?;
                let reader = stream
                    .try_clone_stream()
                    .map_err(|e| Error::resource("clone stream for reader", e))?;
                let conn = ConnectionHandle::new(stream);

                let shared = EndpointShared::new();
                shared.connections.lock().insert(conn.id, conn.clone());
                spawn_reader(
                    Arc::downgrade(core),
                    &shared,
                    conn.clone(),
                    reader,
                    options.max_frame_size,
                    true,
                )?;

                Ok(Endpoint {
                    url,
                    role: EndpointRole::Client,
                    state: TransportState::Connected,
                    kind: EndpointKind::StreamClient { conn },
                    shared,
                    accept_thread: None,
                })
            }
            Protocol::Udp => {
                let socket = Arc::new(UdpEndpointSocket::connect(&url, options)?);
                socket
                    .set_read_timeout(Some(UDP_POLL))
                    .map_err(|e| Error::resource("set udp read timeout", e))?;

                let shared = EndpointShared::new();
                let reader = {
                    let core = Arc::downgrade(core);
                    let shared = Arc::clone(&shared);
                    let socket = Arc::clone(&socket);
                    thread::Builder::new()
                        .name(format!("goo-udp-{url}"))
                        .spawn(move || run_udp_reader(core, shared, socket))
                        .map_err(|e| Error::resource("spawn udp reader thread", e))?
                };
                shared.reader_threads.lock().push(reader);

                Ok(Endpoint {
                    url,
                    role: EndpointRole::Client,
                    state: TransportState::Connected,
                    kind: EndpointKind::Udp { socket },
                    shared,
                    accept_thread: None,
                })
            }
            Protocol::Pgm | Protocol::Epgm | Protocol::Vmci => {
                Err(transport::multicast::not_implemented(url.protocol))
            }
        }
    }

    pub fn is_errored(&self) -> bool {
        if self.shared.errored.load(Ordering::Acquire) {
            return true;
        }
        match &self.kind {
            EndpointKind::StreamClient { conn } => conn.is_errored(),
            _ => false,
        }
    }

    /// Append every live destination this endpoint can carry a message to.
    pub fn collect_targets(&self, out: &mut Vec<SendTarget>) {
        match &self.kind {
            EndpointKind::InprocServer => {}
            EndpointKind::InprocClient { queue } => {
                out.push(SendTarget::Queue(Arc::clone(queue)));
            }
            EndpointKind::StreamListener { .. } => {
                for conn in self.shared.connections.lock().values() {
                    if !conn.is_errored() {
                        out.push(SendTarget::Conn(conn.clone()));
                    }
                }
            }
            EndpointKind::StreamClient { conn } => {
                if !conn.is_errored() {
                    out.push(SendTarget::Conn(conn.clone()));
                }
            }
            EndpointKind::Udp { socket } => {
                if self.role == EndpointRole::Client {
                    out.push(SendTarget::Udp(Arc::clone(socket)));
                }
            }
        }
    }

    /// Stop the workers, wake every blocked socket call, and join.
    pub fn close(&mut self) {
        self.shared.shutdown.store(true, Ordering::Release);

        if let EndpointKind::InprocServer = self.kind {
            // Removing the entry closes the shared queue, which unblocks
            // clients with ClosedAndEmpty.
            let _ = runtime::handle().registry().remove(&self.url.address);
        }

        // The accept loop exits at its next poll; join it before shutting
        // connections down so no new ones appear afterwards. A worker can
        // end up running this teardown itself (last handle dropped from a
        // reader); joining the current thread would deadlock, so such
        // handles are detached instead.
        if let Some(handle) = self.accept_thread.take() {
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }

        for conn in self.shared.connections.lock().values() {
            conn.shutdown();
        }
        let readers: Vec<_> = self.shared.reader_threads.lock().drain(..).collect();
        for handle in readers {
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
        self.shared.connections.lock().clear();
        self.state = TransportState::Disconnected;
        debug!("endpoint {} closed", self.url);
    }
}

fn spawn_reader(
    core: Weak<ChannelCore>,
    shared: &Arc<EndpointShared>,
    conn: ConnectionHandle,
    reader: Box<dyn StreamSocket>,
    max_frame: usize,
    errors_endpoint: bool,
) -> Result<()> {
    let handle = {
        let shared_for_thread = Arc::clone(shared);
        thread::Builder::new()
            .name(format!("goo-reader-{}", conn.peer()))
            .spawn(move || {
                run_reader(core, shared_for_thread, conn, reader, max_frame, errors_endpoint)
            })
            .map_err(|e| Error::resource("spawn reader thread", e))?
    };
    shared.reader_threads.lock().push(handle);
    Ok(())
}

fn run_accept_loop(
    core: Weak<ChannelCore>,
    shared: Arc<EndpointShared>,
    listener: Arc<dyn StreamListener>,
    single_peer: bool,
    max_frame: usize,
) {
    loop {
        if shared.shutdown.load(Ordering::Acquire) {
            break;
        }
        match listener.accept_stream() {
            Ok(stream) => {
                let Some(strong) = core.upgrade() else { break };
                if strong.is_closed() {
                    break;
                }
                // A pair endpoint accepts exactly one peer.
                if single_peer && !shared.connections.lock().is_empty() {
                    warn!(
                        "pair endpoint {} refused an extra connection from {}",
                        listener.local_label(),
                        stream.peer_label()
                    );
                    strong.stats.record_receive_error();
                    let _ = stream.shutdown_stream();
                    continue;
                }
                // Non-blocking may be inherited from the listener on some
                // platforms; readers need a blocking stream.
                if let Err(e) = stream.set_stream_nonblocking(false) {
                    warn!("failed to make accepted stream blocking: {e}");
                    continue;
                }
                let reader = match stream.try_clone_stream() {
                    Ok(reader) => reader,
                    Err(e) => {
                        warn!("failed to clone accepted stream: {e}");
                        continue;
                    }
                };
                let conn = ConnectionHandle::new(stream);
                debug!(
                    "connection {} from {} on {}",
                    conn.id,
                    conn.peer(),
                    listener.local_label()
                );
                shared.connections.lock().insert(conn.id, conn.clone());
                if let Err(e) =
                    spawn_reader(core.clone(), &shared, conn, reader, max_frame, false)
                {
                    warn!("failed to start reader: {e}");
                }
            }
            Err(e)
                if e.kind() == io::ErrorKind::WouldBlock
                    || e.kind() == io::ErrorKind::Interrupted =>
            {
                thread::sleep(ACCEPT_POLL);
            }
            Err(e) => {
                if !shared.shutdown.load(Ordering::Acquire) {
                    error!("accept failed on {}: {e}", listener.local_label());
                    shared.errored.store(true, Ordering::Release);
                    if let Some(strong) = core.upgrade() {
                        strong.note_endpoint_errored();
                    }
                }
                break;
            }
        }
    }
}

fn run_reader(
    core: Weak<ChannelCore>,
    shared: Arc<EndpointShared>,
    conn: ConnectionHandle,
    mut reader: Box<dyn StreamSocket>,
    max_frame: usize,
    errors_endpoint: bool,
) {
    loop {
        if shared.shutdown.load(Ordering::Acquire) {
            break;
        }
        match frame::read_chain(&mut transport::StreamReader(&mut *reader), max_frame) {
            Ok(msg) => {
                let Some(strong) = core.upgrade() else { break };
                if strong.is_closed() {
                    break;
                }
                match pattern::deliver_inbound(&strong, msg, Some(&conn)) {
                    Ok(()) => {}
                    Err(err) if err.is_closed() => break,
                    Err(err) => {
                        strong.stats.record_receive_error();
                        warn!("dropping inbound message from {}: {err}", conn.peer());
                    }
                }
            }
            Err(e)
                if e.kind() == io::ErrorKind::WouldBlock
                    || e.kind() == io::ErrorKind::TimedOut =>
            {
                continue;
            }
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                debug!("peer {} disconnected", conn.peer());
                conn.mark_errored();
                if errors_endpoint && !shared.shutdown.load(Ordering::Acquire) {
                    shared.errored.store(true, Ordering::Release);
                    if let Some(strong) = core.upgrade() {
                        strong.note_endpoint_errored();
                    }
                }
                break;
            }
            Err(e) => {
                conn.mark_errored();
                if !shared.shutdown.load(Ordering::Acquire) {
                    warn!("transport error on {}: {e}", conn.peer());
                    if errors_endpoint {
                        shared.errored.store(true, Ordering::Release);
                    }
                    if let Some(strong) = core.upgrade() {
                        strong.stats.record_receive_error();
                        if errors_endpoint {
                            strong.note_endpoint_errored();
                        }
                    }
                }
                break;
            }
        }
    }
    shared.connections.lock().remove(&conn.id);
}

fn run_udp_reader(
    core: Weak<ChannelCore>,
    shared: Arc<EndpointShared>,
    socket: Arc<UdpEndpointSocket>,
) {
    loop {
        if shared.shutdown.load(Ordering::Acquire) {
            break;
        }
        match socket.recv_message() {
            Ok(msg) => {
                let Some(strong) = core.upgrade() else { break };
                if strong.is_closed() {
                    break;
                }
                match pattern::deliver_inbound(&strong, msg, None) {
                    Ok(()) => {}
                    Err(err) if err.is_closed() => break,
                    Err(err) => {
                        strong.stats.record_receive_error();
                        warn!("dropping inbound datagram on {}: {err}", socket.label());
                    }
                }
            }
            Err(e)
                if e.kind() == io::ErrorKind::WouldBlock
                    || e.kind() == io::ErrorKind::TimedOut =>
            {
                continue;
            }
            Err(e) if e.kind() == io::ErrorKind::InvalidData => {
                if let Some(strong) = core.upgrade() {
                    strong.stats.record_receive_error();
                }
                warn!("malformed datagram on {}: {e}", socket.label());
            }
            Err(e) => {
                if !shared.shutdown.load(Ordering::Acquire) {
                    warn!("udp receive failed on {}: {e}", socket.label());
                    shared.errored.store(true, Ordering::Release);
                    if let Some(strong) = core.upgrade() {
                        strong.stats.record_receive_error();
                        strong.note_endpoint_errored();
                    }
                }
                break;
            }
        }
    }
}
