//! Pair: exclusive one-to-one connection.
//!
//! A pair channel has exactly one peer. Over inproc the registry's owner
//! reference is used to peer both cores directly, so either side can send
//! into the other's queue; a second connect fails `AlreadyConnected`.
//! Over stream transports the bound side refuses extra accepts (handled
//! in the endpoint accept loop) and sends go to the single connection.

use std::sync::Arc;

use crate::channel::{ChannelCore, Pattern};
use crate::error::{Error, Result};
use crate::message::{Message, MessageFlags};
use crate::pattern;
use crate::registry::RegistryEntry;

pub(crate) fn send(core: &Arc<ChannelCore>, msg: Message, flags: MessageFlags) -> Result<()> {
    let (blocking, timeout) = core.wait_params(flags);

    let peer = core.state.lock().pair_peer.clone();
    if let Some(peer) = peer {
        match peer.upgrade() {
            Some(peer) => {
                let queue = peer
                    .queue
                    .as_ref()
                    .ok_or_else(|| Error::argument("pair peer has no queue"))?;
                queue.enqueue(msg, blocking, timeout)?;
                peer.observe_queue();
                return Ok(());
            }
            None => {
                core.state.lock().pair_peer = None;
            }
        }
    }

    let targets = pattern::collect_endpoint_targets(core);
    let target = targets
        .first()
        .ok_or_else(|| Error::Resource("pair channel has no peer".to_string()))?;
    target.deliver(msg, blocking, timeout)
}

/// Inproc connect: peer both cores, enforcing exclusivity on each side.
pub(crate) fn peer_with_owner(core: &Arc<ChannelCore>, entry: &RegistryEntry) -> Result<()> {
    let owner = entry
        .owner
        .upgrade()
        .ok_or_else(|| Error::NotFound("pair server is gone".to_string()))?;
    if owner.pattern != Pattern::Pair {
        return Err(Error::argument("inproc pair connect requires a pair server"));
    }

    // One core locked at a time; never both.
    {
        let mut owner_state = owner.state.lock();
        let occupied = owner_state
            .pair_peer
            .as_ref()
            .map(|w| w.strong_count() > 0)
            .unwrap_or(false);
        if occupied {
            return Err(Error::AlreadyConnected);
        }
        owner_state.pair_peer = Some(Arc::downgrade(core));
    }
    {
        let mut state = core.state.lock();
        if state.pair_peer.is_some() {
            return Err(Error::AlreadyConnected);
        }
        state.pair_peer = Some(Arc::downgrade(&owner));
    }
    Ok(())
}
