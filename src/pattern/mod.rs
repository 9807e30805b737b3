//! The pattern engine: routing rules layered over channels and endpoints.
//!
//! This module is the only place that knows what a channel's pattern
//! means. Sends and receives from the public surface dispatch here, and
//! the transport reader threads hand inbound messages to
//! [`deliver_inbound`] for pattern-aware delivery into the local queue.
//!
//! Fan-out discipline: the destination list is snapshotted under the
//! source channel's lock, the lock is dropped, and destinations are then
//! taken one at a time. A single slow or dead destination never aborts
//! the operation; it is counted on the appropriate counter and the engine
//! moves on.

pub(crate) mod broadcast;
pub(crate) mod pair;
pub(crate) mod pipeline;
pub(crate) mod pubsub;
pub(crate) mod reqrep;

use std::sync::Arc;

use crate::channel::{ChannelCore, ChannelOptions, Pattern};
use crate::endpoint::{ConnectionHandle, SendTarget};
use crate::error::{Error, Result};
use crate::message::{Message, MessageFlags};
use crate::queue::PriorityQueue;
use crate::registry::RegistryEntry;

/// Dispatch one outbound message according to the channel's pattern.
pub(crate) fn send(core: &Arc<ChannelCore>, msg: Message, flags: MessageFlags) -> Result<()> {
    match core.pattern {
        Pattern::Normal => local_send(core, msg, flags),
        Pattern::Pub => pubsub::publish_msg(core, msg, flags),
        Pattern::Push => pipeline::push_send(core, msg, flags),
        Pattern::Req => reqrep::req_send(core, msg, flags),
        Pattern::Rep => reqrep::rep_send(core, msg, flags),
        Pattern::Dealer => reqrep::dealer_send(core, msg, flags),
        Pattern::Router => reqrep::router_send(core, msg, flags),
        Pattern::Pair => pair::send(core, msg, flags),
        Pattern::Broadcast => broadcast::fan_out(core, msg, flags),
        Pattern::Sub | Pattern::Pull => Err(Error::WrongPattern {
            op: "send",
            pattern: core.pattern.name(),
        }),
    }
}

/// Dispatch one receive according to the channel's pattern.
pub(crate) fn recv(core: &Arc<ChannelCore>, flags: MessageFlags) -> Result<Message> {
    match core.pattern {
        Pattern::Req => reqrep::req_recv(core, flags),
        Pattern::Rep => reqrep::rep_recv(core, flags),
        Pattern::Router => reqrep::router_recv(core, flags),
        Pattern::Sub => pubsub::sub_recv(core, flags),
        Pattern::Normal | Pattern::Pull | Pattern::Dealer | Pattern::Pair => {
            local_recv(core, flags)
        }
        Pattern::Pub | Pattern::Push | Pattern::Broadcast => Err(Error::WrongPattern {
            op: "recv",
            pattern: core.pattern.name(),
        }),
    }
}

/// Pattern-aware delivery of a message arriving from a transport.
pub(crate) fn deliver_inbound(
    core: &Arc<ChannelCore>,
    msg: Message,
    conn: Option<&ConnectionHandle>,
) -> Result<()> {
    msg.validate_chain()?;
    match core.pattern {
        Pattern::Sub => pubsub::deliver_to_sub(core, msg),
        Pattern::Rep => reqrep::deliver_to_rep(core, msg, conn),
        Pattern::Router => reqrep::deliver_to_router(core, msg, conn),
        Pattern::Normal
        | Pattern::Pull
        | Pattern::Req
        | Pattern::Dealer
        | Pattern::Pair => enqueue_local(core, msg),
        // Send-only patterns have no receive path; inbound bytes are
        // counted and discarded.
        Pattern::Pub | Pattern::Push | Pattern::Broadcast => {
            core.stats.record_dropped();
            Ok(())
        }
    }
}

/// Hook for inproc connects that need pattern-level peering.
pub(crate) fn on_inproc_connected(core: &Arc<ChannelCore>, entry: &RegistryEntry) -> Result<()> {
    match core.pattern {
        Pattern::Pair => pair::peer_with_owner(core, entry),
        _ => Ok(()),
    }
}

/// The channel's own queue, required for every local operation.
pub(crate) fn local_queue(core: &ChannelCore) -> Result<&Arc<PriorityQueue>> {
    core.queue
        .as_ref()
        .ok_or_else(|| Error::argument("channel has no local queue"))
}

/// Plain enqueue into the channel's own queue, honoring Conflate.
pub(crate) fn local_send(
    core: &Arc<ChannelCore>,
    msg: Message,
    flags: MessageFlags,
) -> Result<()> {
    let queue = local_queue(core)?;
    let (blocking, timeout) = core.wait_params(flags);
    if core.options.contains(ChannelOptions::CONFLATE) {
        let dropped = queue.clear();
        for _ in 0..dropped {
            core.stats.record_dropped();
        }
    }
    queue.enqueue(msg, blocking, timeout)
}

/// Plain dequeue from the channel's own queue.
pub(crate) fn local_recv(core: &Arc<ChannelCore>, flags: MessageFlags) -> Result<Message> {
    let queue = local_queue(core)?;
    if flags.contains(MessageFlags::PEEK) {
        return queue.peek().ok_or(Error::QueueEmpty);
    }
    let (blocking, timeout) = core.wait_params(flags);
    queue.dequeue(blocking, timeout)
}

/// Blocking enqueue used by reader threads: backpressure propagates to
/// the socket, and a closed queue wakes the reader with `Closed`.
pub(crate) fn enqueue_local(core: &Arc<ChannelCore>, msg: Message) -> Result<()> {
    let queue = local_queue(core)?;
    queue.enqueue(msg, true, None)?;
    core.observe_queue();
    Ok(())
}

/// Snapshot of every live transport destination of this channel. Taken
/// under the channel lock, used after it is released.
pub(crate) fn collect_endpoint_targets(core: &ChannelCore) -> Vec<SendTarget> {
    let state = core.state.lock();
    let mut targets = Vec::new();
    for endpoint in &state.endpoints {
        if !endpoint.is_errored() {
            endpoint.collect_targets(&mut targets);
        }
    }
    targets
}
