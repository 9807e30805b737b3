//! Broadcast: Pub without topics.
//!
//! Fan-out goes to every registered receiver; a full or dead receiver is
//! counted as dropped and never aborts the operation.

use std::sync::{Arc, Weak};

use tracing::debug;

use crate::channel::{ChannelCore, ChannelOptions, Pattern};
use crate::error::{Error, Result};
use crate::message::{Message, MessageFlags};
use crate::pattern;

/// Register a downstream channel on a Broadcast channel.
pub(crate) fn add_receiver(
    bcast_core: &Arc<ChannelCore>,
    recv_core: &Arc<ChannelCore>,
) -> Result<()> {
    if bcast_core.pattern != Pattern::Broadcast {
        return Err(Error::WrongPattern {
            op: "add_receiver",
            pattern: bcast_core.pattern.name(),
        });
    }
    if recv_core.queue.is_none() {
        return Err(Error::argument("broadcast receiver must be buffered"));
    }
    bcast_core
        .state
        .lock()
        .receivers
        .push(Arc::downgrade(recv_core));
    Ok(())
}

pub(crate) fn fan_out(core: &Arc<ChannelCore>, msg: Message, flags: MessageFlags) -> Result<()> {
    let reliable = core.options.contains(ChannelOptions::RELIABLE);
    let (_, timeout) = core.wait_params(flags);

    let receivers: Vec<Arc<ChannelCore>> = {
        let mut state = core.state.lock();
        state.receivers.retain(|w| w.strong_count() > 0);
        state.receivers.iter().filter_map(Weak::upgrade).collect()
    };

    for receiver in receivers {
        let Some(queue) = receiver.queue.as_ref() else {
            core.stats.record_dropped();
            continue;
        };
        match queue.enqueue(msg.clone(), reliable, timeout) {
            Ok(()) => receiver.observe_queue(),
            Err(err) => {
                core.stats.record_dropped();
                debug!("broadcast receiver {} skipped: {err}", receiver.id);
            }
        }
    }
    Ok(())
}
