//! Channels: the unit the application talks to.
//!
//! A [`Channel`] combines a priority queue with a routing pattern and,
//! for distributed patterns, a set of transport endpoints. Handles are
//! cheap clones over a shared core; the core owns its queue, pattern
//! state, endpoints, and statistics. Subscribers and broadcast receivers
//! are held as weak references, so a dropped downstream channel is pruned
//! at the next fan-out instead of keeping anything alive.
//!
//! Channels move through exactly two states: Open and Closed. Closing is
//! terminal and idempotent: it closes the queue (receivers keep draining
//! residual messages), tears down endpoints and their worker threads, and
//! wakes every blocked sender and receiver.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use bitflags::bitflags;
use parking_lot::Mutex;
use tracing::debug;

use crate::defaults;
use crate::endpoint::{ConnectionHandle, Endpoint};
use crate::error::{Error, Result};
use crate::message::{Message, MessageFlags, MessageKind};
use crate::pattern;
use crate::queue::PriorityQueue;
use crate::runtime;
use crate::stats::{ChannelStats, StatsSnapshot};
use crate::transport::{EndpointUrl, Protocol, SocketOptions};

static NEXT_CHANNEL_ID: AtomicU64 = AtomicU64::new(1);

/// Sentinel for "no timeout configured": block indefinitely.
const TIMEOUT_UNSET: u64 = u64::MAX;

/// Routing discipline of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pattern {
    /// Single producer-consumer FIFO with priorities.
    Normal,
    Pub,
    Sub,
    Push,
    Pull,
    Req,
    Rep,
    Dealer,
    Router,
    Pair,
    Broadcast,
}

impl Pattern {
    pub(crate) fn name(self) -> &'static str {
        match self {
            Pattern::Normal => "normal",
            Pattern::Pub => "pub",
            Pattern::Sub => "sub",
            Pattern::Push => "push",
            Pattern::Pull => "pull",
            Pattern::Req => "req",
            Pattern::Rep => "rep",
            Pattern::Dealer => "dealer",
            Pattern::Router => "router",
            Pattern::Pair => "pair",
            Pattern::Broadcast => "broadcast",
        }
    }

    /// Patterns that may bind or connect transport endpoints.
    pub(crate) fn supports_endpoints(self) -> bool {
        !matches!(self, Pattern::Normal | Pattern::Broadcast)
    }

    pub(crate) fn is_exclusive_pair(self) -> bool {
        matches!(self, Pattern::Pair)
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

bitflags! {
    /// Channel configuration bits.
    ///
    /// `BLOCKING`/`BUFFERED` are the defaults; `UNBUFFERED` maps to a
    /// capacity-1 queue. `RELIABLE` makes publish block on slow
    /// subscribers instead of dropping. `CONFLATE` keeps only the latest
    /// queued message.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ChannelOptions: u32 {
        const BLOCKING = 1 << 0;
        const NON_BLOCKING = 1 << 1;
        const BUFFERED = 1 << 2;
        const UNBUFFERED = 1 << 3;
        const RELIABLE = 1 << 4;
        const DISTRIBUTED = 1 << 5;
        const LOCAL = 1 << 6;
        const SECURE = 1 << 7;
        const MULTICAST = 1 << 8;
        const HIGH_WATER = 1 << 9;
        const CONFLATE = 1 << 10;
        const PRIORITY = 1 << 11;
    }
}

/// One topic filter on a Sub channel, with an optional delivery callback.
pub(crate) struct Subscription {
    pub topic: String,
    pub callback: Option<Arc<dyn Fn(&Message) + Send + Sync>>,
}

/// Where a reply should go: back into a local requester's queue, or back
/// over the connection the request arrived on.
#[derive(Clone)]
pub(crate) enum ReplyRoute {
    Local(Weak<ChannelCore>),
    Remote(ConnectionHandle),
}

/// Mutable pattern state, guarded by the channel mutex.
#[derive(Default)]
pub(crate) struct PatternState {
    pub subscriptions: Vec<Subscription>,
    pub subscribers: Vec<Weak<ChannelCore>>,
    pub receivers: Vec<Weak<ChannelCore>>,
    /// Req: the request awaiting its reply.
    pub pending_request: Option<Message>,
    /// Rep: where the next reply goes.
    pub pending_reply: Option<ReplyRoute>,
    /// Rep: reply routes for requests still sitting in the queue, in
    /// arrival order. Local requests carry their route on the message.
    pub inbound_routes: VecDeque<ReplyRoute>,
    /// Router: identity → route table.
    pub routes: HashMap<u64, ReplyRoute>,
    /// Router: identity allocator for locally connected peers.
    pub next_route_id: u64,
    pub endpoints: Vec<Endpoint>,
    /// Push/Dealer round-robin cursor.
    pub next_target: usize,
    /// Pair: the one local peer, if connected over inproc.
    pub pair_peer: Option<Weak<ChannelCore>>,
}

/// Shared channel core behind every handle clone.
pub(crate) struct ChannelCore {
    pub(crate) id: u64,
    pub(crate) pattern: Pattern,
    pub(crate) options: ChannelOptions,
    pub(crate) element_size: usize,
    pub(crate) queue: Option<Arc<PriorityQueue>>,
    pub(crate) state: Mutex<PatternState>,
    pub(crate) stats: ChannelStats,
    socket_options: Mutex<SocketOptions>,
    closed: AtomicBool,
    errored: AtomicBool,
    timeout_ms: AtomicU64,
    high_water_mark: AtomicUsize,
    low_water_mark: AtomicUsize,
}

impl ChannelCore {
    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub(crate) fn is_errored(&self) -> bool {
        self.errored.load(Ordering::Acquire)
    }

    /// Resolve the blocking mode and deadline for one operation: a
    /// NONBLOCK flag or the NON_BLOCKING option forces the non-blocking
    /// path; a configured timeout of zero does the same; otherwise the
    /// channel timeout applies (unset means wait indefinitely).
    pub(crate) fn wait_params(&self, flags: MessageFlags) -> (bool, Option<Duration>) {
        if flags.contains(MessageFlags::NONBLOCK)
            || self.options.contains(ChannelOptions::NON_BLOCKING)
        {
            return (false, None);
        }
        match self.timeout_ms.load(Ordering::Relaxed) {
            0 => (false, None),
            TIMEOUT_UNSET => (true, None),
            ms => (true, Some(Duration::from_millis(ms))),
        }
    }

    pub(crate) fn high_water_mark(&self) -> usize {
        self.high_water_mark.load(Ordering::Relaxed)
    }

    pub(crate) fn observe_queue(&self) {
        if let Some(queue) = &self.queue {
            self.stats.observe_queue_size(queue.len());
        }
    }

    /// Mark the channel errored when every endpoint has failed. The
    /// channel stays Open; a later successful bind/connect clears this.
    pub(crate) fn note_endpoint_errored(&self) {
        let state = self.state.lock();
        if !state.endpoints.is_empty() && state.endpoints.iter().all(|e| e.is_errored()) {
            drop(state);
            self.errored.store(true, Ordering::Release);
            debug!("channel {} errored: all endpoints lost", self.id);
        }
    }

    /// Terminal close. Idempotent; later calls find nothing to tear down.
    pub(crate) fn close_internal(&self) {
        let first = !self.closed.swap(true, Ordering::AcqRel);
        if first {
            if let Some(queue) = &self.queue {
                queue.close();
            }
        }
        // Endpoints are drained outside the lock: closing joins worker
        // threads, and those workers may briefly take the channel lock.
        let mut endpoints = {
            let mut state = self.state.lock();
            std::mem::take(&mut state.endpoints)
        };
        for endpoint in endpoints.iter_mut() {
            endpoint.close();
        }
        if first {
            debug!("channel {} closed", self.id);
        }
    }
}

impl Drop for ChannelCore {
    fn drop(&mut self) {
        self.close_internal();
    }
}

/// Cheap cloneable handle over a channel core.
#[derive(Clone)]
pub struct Channel {
    core: Arc<ChannelCore>,
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("id", &self.core.id)
            .field("pattern", &self.core.pattern)
            .field("closed", &self.core.is_closed())
            .finish()
    }
}

impl Channel {
    /// Create a channel with default capacity and options.
    pub fn new(pattern: Pattern) -> Result<Channel> {
        Channel::with_options(pattern, 0, defaults::CAPACITY, ChannelOptions::default())
    }

    /// Create a buffered channel with an explicit capacity.
    pub fn with_capacity(pattern: Pattern, capacity: usize) -> Result<Channel> {
        Channel::with_options(pattern, 0, capacity, ChannelOptions::default())
    }

    /// Full constructor: pattern, element size (0 for opaque payloads),
    /// queue capacity, and options.
    pub fn with_options(
        pattern: Pattern,
        element_size: usize,
        capacity: usize,
        options: ChannelOptions,
    ) -> Result<Channel> {
        runtime::ensure_initialized()?;

        let mut options = options;
        if !options.contains(ChannelOptions::UNBUFFERED) {
            options |= ChannelOptions::BUFFERED;
        }
        if !options.contains(ChannelOptions::NON_BLOCKING) {
            options |= ChannelOptions::BLOCKING;
        }
        if pattern.supports_endpoints() {
            options |= ChannelOptions::DISTRIBUTED;
        } else {
            options |= ChannelOptions::LOCAL;
        }

        // An unbuffered channel degenerates to a single-slot queue; true
        // rendezvous hand-off is not part of this design.
        let capacity = if options.contains(ChannelOptions::UNBUFFERED) {
            1
        } else {
            capacity
        };
        let queue = Some(Arc::new(PriorityQueue::new(capacity)?));

        let core = Arc::new(ChannelCore {
            id: NEXT_CHANNEL_ID.fetch_add(1, Ordering::Relaxed),
            pattern,
            options,
            element_size,
            queue,
            state: Mutex::new(PatternState::default()),
            stats: ChannelStats::default(),
            socket_options: Mutex::new(SocketOptions::default()),
            closed: AtomicBool::new(false),
            errored: AtomicBool::new(false),
            timeout_ms: AtomicU64::new(TIMEOUT_UNSET),
            high_water_mark: AtomicUsize::new(defaults::HIGH_WATER_MARK),
            low_water_mark: AtomicUsize::new(0),
        });
        runtime::register_channel(&core);
        debug!("created {} channel {} (capacity {})", pattern, core.id, capacity);
        Ok(Channel { core })
    }

    pub(crate) fn core(&self) -> &Arc<ChannelCore> {
        &self.core
    }

    pub fn id(&self) -> u64 {
        self.core.id
    }

    pub fn pattern(&self) -> Pattern {
        self.core.pattern
    }

    pub fn options(&self) -> ChannelOptions {
        self.core.options
    }

    pub fn element_size(&self) -> usize {
        self.core.element_size
    }

    pub fn is_closed(&self) -> bool {
        self.core.is_closed()
    }

    pub fn is_errored(&self) -> bool {
        self.core.is_errored()
    }

    fn check_open(&self) -> Result<()> {
        if self.core.is_closed() {
            Err(Error::Closed)
        } else {
            Ok(())
        }
    }

    fn check_element_size(&self, len: usize) -> Result<()> {
        if self.core.element_size != 0 && len != self.core.element_size {
            return Err(Error::Argument(format!(
                "payload of {len} bytes does not match element size {}",
                self.core.element_size
            )));
        }
        Ok(())
    }

    /// Send an opaque payload.
    pub fn send(&self, bytes: &[u8]) -> Result<()> {
        self.send_with(bytes, MessageFlags::empty())
    }

    /// Send an opaque payload with per-call flags.
    pub fn send_with(&self, bytes: &[u8], flags: MessageFlags) -> Result<()> {
        self.send_msg(Message::with_flags(
            MessageKind::Binary,
            bytes.to_vec(),
            flags,
        ))
    }

    /// Non-blocking send shortcut.
    pub fn try_send(&self, bytes: &[u8]) -> Result<()> {
        self.send_with(bytes, MessageFlags::NONBLOCK)
    }

    /// Send a message (with its multipart chain, if any).
    pub fn send_msg(&self, msg: Message) -> Result<()> {
        let outcome = self.send_msg_inner(msg);
        if outcome.is_err() {
            self.core.stats.record_send_error();
        }
        self.core.observe_queue();
        outcome
    }

    fn send_msg_inner(&self, msg: Message) -> Result<()> {
        self.check_open()?;
        self.check_element_size(msg.payload().len())?;
        msg.validate_chain()?;
        let bytes = msg.total_len();
        let flags = msg.flags();
        pattern::send(&self.core, msg, flags)?;
        self.core.stats.record_send(bytes);
        Ok(())
    }

    /// Receive the next payload.
    pub fn recv(&self) -> Result<Vec<u8>> {
        self.recv_msg().map(Message::into_payload)
    }

    /// Non-blocking receive shortcut.
    pub fn try_recv(&self) -> Result<Vec<u8>> {
        self.recv_msg_with(MessageFlags::NONBLOCK)
            .map(Message::into_payload)
    }

    /// Receive the next message.
    pub fn recv_msg(&self) -> Result<Message> {
        self.recv_msg_with(MessageFlags::empty())
    }

    /// Receive with per-call flags (`NONBLOCK`, `PEEK`).
    pub fn recv_msg_with(&self, flags: MessageFlags) -> Result<Message> {
        let outcome = pattern::recv(&self.core, flags);
        match &outcome {
            Ok(msg) => self.core.stats.record_receive(msg.total_len()),
            Err(err) if !err.is_closed() => self.core.stats.record_receive_error(),
            Err(_) => {}
        }
        self.core.observe_queue();
        outcome
    }

    /// Publish a payload under a topic (Pub channels).
    pub fn publish(&self, topic: &str, bytes: &[u8]) -> Result<()> {
        self.publish_with(topic, bytes, MessageFlags::empty())
    }

    pub fn publish_with(&self, topic: &str, bytes: &[u8], flags: MessageFlags) -> Result<()> {
        let mut msg = Message::with_flags(MessageKind::Binary, bytes.to_vec(), flags);
        msg.set_topic(topic);
        self.send_msg(msg)
    }

    /// Add an exact-match topic filter (Sub channels).
    pub fn subscribe(&self, topic: &str) -> Result<()> {
        pattern::pubsub::subscribe(&self.core, topic, None)
    }

    /// Add a topic filter with a delivery callback, invoked on the
    /// delivering thread before the message is queued.
    pub fn subscribe_with<F>(&self, topic: &str, callback: F) -> Result<()>
    where
        F: Fn(&Message) + Send + Sync + 'static,
    {
        pattern::pubsub::subscribe(&self.core, topic, Some(Arc::new(callback)))
    }

    /// Remove a topic filter.
    pub fn unsubscribe(&self, topic: &str) -> Result<()> {
        pattern::pubsub::unsubscribe(&self.core, topic)
    }

    /// Register a local subscriber on this Pub channel. The reference is
    /// weak: a dropped subscriber is pruned at the next publish.
    pub fn add_subscriber(&self, subscriber: &Channel) -> Result<()> {
        pattern::pubsub::add_subscriber(&self.core, subscriber.core())
    }

    /// Register a local receiver on this Broadcast channel.
    pub fn add_receiver(&self, receiver: &Channel) -> Result<()> {
        pattern::broadcast::add_receiver(&self.core, receiver.core())
    }

    /// Fan a payload out to every registered receiver (Broadcast).
    pub fn broadcast(&self, bytes: &[u8]) -> Result<()> {
        self.send_with(bytes, MessageFlags::empty())
    }

    /// Bind a server endpoint from a URL string.
    pub fn bind(&self, url: &str) -> Result<()> {
        self.bind_url(EndpointUrl::parse(url)?)
    }

    /// Bind from already-split parts.
    pub fn bind_endpoint(&self, protocol: Protocol, address: &str, port: Option<u16>) -> Result<()> {
        self.bind_url(EndpointUrl::from_parts(protocol, address, port)?)
    }

    fn bind_url(&self, url: EndpointUrl) -> Result<()> {
        self.check_open()?;
        if !self.core.pattern.supports_endpoints() {
            return Err(Error::WrongPattern {
                op: "bind",
                pattern: self.core.pattern.name(),
            });
        }
        let options = self.core.socket_options.lock().clone();
        let endpoint = Endpoint::bind(&self.core, url, &options)?;
        debug!("channel {} bound {}", self.core.id, endpoint.url);
        self.core.state.lock().endpoints.push(endpoint);
        self.core.errored.store(false, Ordering::Release);
        Ok(())
    }

    /// Connect a client endpoint from a URL string.
    pub fn connect(&self, url: &str) -> Result<()> {
        self.connect_url(EndpointUrl::parse(url)?)
    }

    /// Connect from already-split parts.
    pub fn connect_endpoint(
        &self,
        protocol: Protocol,
        address: &str,
        port: Option<u16>,
    ) -> Result<()> {
        self.connect_url(EndpointUrl::from_parts(protocol, address, port)?)
    }

    fn connect_url(&self, url: EndpointUrl) -> Result<()> {
        self.check_open()?;
        if !self.core.pattern.supports_endpoints() {
            return Err(Error::WrongPattern {
                op: "connect",
                pattern: self.core.pattern.name(),
            });
        }
        let options = self.core.socket_options.lock().clone();
        let endpoint = Endpoint::connect(&self.core, url, &options)?;
        debug!("channel {} connected {}", self.core.id, endpoint.url);
        self.core.state.lock().endpoints.push(endpoint);
        self.core.errored.store(false, Ordering::Release);
        Ok(())
    }

    /// Detach and shut down the endpoint bound or connected to `url`.
    pub fn disconnect(&self, url: &str) -> Result<()> {
        let parsed = EndpointUrl::parse(url)?;
        let mut endpoint = {
            let mut state = self.core.state.lock();
            let position = state
                .endpoints
                .iter()
                .position(|e| e.url == parsed)
                .ok_or_else(|| Error::NotFound(parsed.to_string()))?;
            state.endpoints.remove(position)
        };
        // Closing joins worker threads; never under the channel lock.
        endpoint.close();
        Ok(())
    }

    /// Close the channel: terminal and idempotent. Receivers keep
    /// draining residual queue contents; everything else fails `Closed`.
    pub fn close(&self) {
        self.core.close_internal();
    }

    /// Point-in-time statistics.
    pub fn stats(&self) -> StatsSnapshot {
        let (senders, receivers) = self
            .core
            .queue
            .as_ref()
            .map(|q| q.waiters())
            .unwrap_or((0, 0));
        self.core.stats.snapshot(senders, receivers)
    }

    pub fn reset_stats(&self) {
        self.core.stats.reset();
    }

    /// Operation timeout: `None` waits indefinitely, zero makes every
    /// operation non-blocking.
    pub fn set_timeout(&self, timeout: Option<Duration>) {
        let value = match timeout {
            None => TIMEOUT_UNSET,
            Some(t) => t.as_millis() as u64,
        };
        self.core.timeout_ms.store(value, Ordering::Relaxed);
    }

    pub fn set_high_water_mark(&self, hwm: usize) {
        self.core.high_water_mark.store(hwm, Ordering::Relaxed);
    }

    pub fn high_water_mark(&self) -> usize {
        self.core.high_water_mark()
    }

    pub fn set_low_water_mark(&self, lwm: usize) {
        self.core.low_water_mark.store(lwm, Ordering::Relaxed);
    }

    pub fn low_water_mark(&self) -> usize {
        self.core.low_water_mark.load(Ordering::Relaxed)
    }

    /// Socket tuning applied to endpoints created after this call.
    pub fn set_socket_options(&self, options: SocketOptions) {
        *self.core.socket_options.lock() = options;
    }

    /// Queue depth, zero when unbuffered.
    pub fn queue_len(&self) -> usize {
        self.core.queue.as_ref().map(|q| q.len()).unwrap_or(0)
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} channel {}", self.core.pattern, self.core.id)
    }
}
