//! Req/Rep and Dealer/Router.
//!
//! Req and Rep enforce strict alternation: Req may not send while a
//! request is pending, Rep may not send before it has received. The
//! reply route travels with the request — as the message's in-process
//! `reply_to` reference, or as the connection a transport request arrived
//! on, queued in arrival order beside the messages themselves.
//!
//! Dealer and Router drop the alternation and push correlation into the
//! message: Router prepends an 8-byte little-endian identity part on
//! delivery and routes outbound chains by popping it; Dealer passes
//! identity parts through untouched.

use std::sync::Arc;

use tracing::debug;

use crate::channel::{ChannelCore, ReplyRoute};
use crate::endpoint::ConnectionHandle;
use crate::error::{Error, Result};
use crate::message::{Message, MessageFlags, MessageKind};
use crate::pattern;
use crate::pattern::pipeline;

/// Identities handed to locally connected Router peers start past the
/// connection-id space.
const LOCAL_ROUTE_BASE: u64 = 1 << 48;

pub(crate) fn req_send(core: &Arc<ChannelCore>, mut msg: Message, flags: MessageFlags) -> Result<()> {
    if core.state.lock().pending_request.is_some() {
        return Err(Error::protocol(
            "a request is already pending; receive its reply first",
        ));
    }

    msg.insert_flags(MessageFlags::REQUEST);
    msg.reply_to = Some(Arc::downgrade(core));

    let (blocking, timeout) = core.wait_params(flags);
    let targets = pattern::collect_endpoint_targets(core);
    let target = targets
        .first()
        .ok_or_else(|| Error::Resource("request channel has no endpoints".to_string()))?;
    target.deliver(msg.clone(), blocking, timeout)?;

    core.state.lock().pending_request = Some(msg);
    Ok(())
}

pub(crate) fn req_recv(core: &Arc<ChannelCore>, flags: MessageFlags) -> Result<Message> {
    match pattern::local_recv(core, flags) {
        Ok(msg) => {
            // Reply receipt releases the pending request.
            core.state.lock().pending_request = None;
            Ok(msg)
        }
        Err(Error::Timeout) => {
            // So does a timeout: the requester may issue a fresh request.
            core.state.lock().pending_request = None;
            Err(Error::Timeout)
        }
        Err(err) => Err(err),
    }
}

/// Reader-thread delivery into a Rep channel: remember the originating
/// connection so the reply can travel back over it.
pub(crate) fn deliver_to_rep(
    core: &Arc<ChannelCore>,
    msg: Message,
    conn: Option<&ConnectionHandle>,
) -> Result<()> {
    if msg.flags().contains(MessageFlags::REQUEST) {
        if let Some(conn) = conn {
            core.state
                .lock()
                .inbound_routes
                .push_back(ReplyRoute::Remote(conn.clone()));
        }
    }
    pattern::enqueue_local(core, msg)
}

pub(crate) fn rep_recv(core: &Arc<ChannelCore>, flags: MessageFlags) -> Result<Message> {
    let msg = pattern::local_recv(core, flags)?;
    if msg.flags().contains(MessageFlags::REQUEST) {
        let mut state = core.state.lock();
        // In-process requests carry their route on the message; transport
        // requests queued one beside each message in arrival order.
        state.pending_reply = match &msg.reply_to {
            Some(requester) => Some(ReplyRoute::Local(requester.clone())),
            None => state.inbound_routes.pop_front(),
        };
    }
    Ok(msg)
}

pub(crate) fn rep_send(core: &Arc<ChannelCore>, mut msg: Message, flags: MessageFlags) -> Result<()> {
    let route = core
        .state
        .lock()
        .pending_reply
        .take()
        .ok_or_else(|| Error::protocol("reply attempted before receiving a request"))?;
    msg.insert_flags(MessageFlags::REPLY);
    let (blocking, timeout) = core.wait_params(flags);
    send_via_route(route, msg, blocking, timeout)
}

pub(crate) fn dealer_send(core: &Arc<ChannelCore>, msg: Message, flags: MessageFlags) -> Result<()> {
    // No correlation state; the multipart chain carries it.
    pipeline::distribute(core, msg, flags)
}

/// Router outbound: pop the identity part and route the remainder.
pub(crate) fn router_send(core: &Arc<ChannelCore>, mut msg: Message, flags: MessageFlags) -> Result<()> {
    let rest = msg
        .split_first()
        .ok_or_else(|| Error::protocol("router send requires an identity part"))?;
    let identity: [u8; 8] = msg
        .payload()
        .try_into()
        .map_err(|_| Error::protocol("router identity part must be 8 bytes"))?;
    let id = u64::from_le_bytes(identity);

    let route = core
        .state
        .lock()
        .routes
        .get(&id)
        .cloned()
        .ok_or_else(|| Error::NotFound(format!("router identity {id}")))?;
    let (blocking, timeout) = core.wait_params(flags);
    send_via_route(route, rest, blocking, timeout)
}

/// Reader-thread delivery into a Router: record the route and prepend the
/// identity part.
pub(crate) fn deliver_to_router(
    core: &Arc<ChannelCore>,
    msg: Message,
    conn: Option<&ConnectionHandle>,
) -> Result<()> {
    let Some(conn) = conn else {
        // Datagram transports carry no return route.
        core.stats.record_dropped();
        return Ok(());
    };
    core.state
        .lock()
        .routes
        .insert(conn.id, ReplyRoute::Remote(conn.clone()));
    let framed = prepend_identity(msg, conn.id);
    pattern::enqueue_local(core, framed)
}

/// Router receive: in-process requests arrive without a prepended
/// identity, so one is synthesized from the message's reply route.
pub(crate) fn router_recv(core: &Arc<ChannelCore>, flags: MessageFlags) -> Result<Message> {
    let mut msg = pattern::local_recv(core, flags)?;
    if let Some(requester) = msg.reply_to.take() {
        let id = {
            let mut state = core.state.lock();
            let id = LOCAL_ROUTE_BASE + state.next_route_id;
            state.next_route_id += 1;
            state.routes.insert(id, ReplyRoute::Local(requester));
            id
        };
        debug!("router {} assigned local identity {id}", core.id);
        msg = prepend_identity(msg, id);
    }
    Ok(msg)
}

fn prepend_identity(msg: Message, id: u64) -> Message {
    let identity = Message::new(MessageKind::Binary, id.to_le_bytes().to_vec());
    msg.prepend_part(identity)
}

fn send_via_route(
    route: ReplyRoute,
    msg: Message,
    blocking: bool,
    timeout: Option<std::time::Duration>,
) -> Result<()> {
    match route {
        ReplyRoute::Local(requester) => {
            let requester = requester
                .upgrade()
                .ok_or_else(|| Error::NotFound("requesting channel is gone".to_string()))?;
            let queue = requester
                .queue
                .as_ref()
                .ok_or_else(|| Error::argument("requesting channel has no queue"))?;
            queue.enqueue(msg, blocking, timeout)?;
            requester.observe_queue();
            Ok(())
        }
        ReplyRoute::Remote(conn) => conn
            .send_chain(&msg)
            .map_err(|e| Error::transport(conn.peer(), e)),
    }
}
