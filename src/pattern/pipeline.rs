//! Push/Pull: fair-distribution pipeline.
//!
//! A Push channel with no endpoints behaves like Normal and feeds its own
//! queue. With endpoints it walks the flattened target list round-robin;
//! a failed delivery advances the cursor and retries until every target
//! has been tried `1 + MAX_RETRIES` times. Pull is the receive side and
//! just drains the local queue the reader threads feed.

use std::sync::Arc;

use tracing::debug;

use crate::channel::ChannelCore;
use crate::defaults;
use crate::error::{Error, Result};
use crate::message::{Message, MessageFlags};
use crate::pattern;

/// Round-robin distribution over the channel's live targets, shared by
/// Push and Dealer.
pub(crate) fn distribute(
    core: &Arc<ChannelCore>,
    msg: Message,
    flags: MessageFlags,
) -> Result<()> {
    let (blocking, timeout) = core.wait_params(flags);
    let targets = pattern::collect_endpoint_targets(core);
    if targets.is_empty() {
        return pattern::local_send(core, msg, flags);
    }

    let attempts = targets.len() * (1 + defaults::MAX_RETRIES);
    let mut last_err = None;
    for attempt in 0..attempts {
        let index = {
            let mut state = core.state.lock();
            let index = state.next_target % targets.len();
            state.next_target = state.next_target.wrapping_add(1);
            index
        };
        match targets[index].deliver(msg.clone(), blocking, timeout) {
            Ok(()) => return Ok(()),
            Err(err) => {
                debug!("pipeline target {index} failed (attempt {attempt}): {err}");
                if attempt + 1 < attempts {
                    core.stats.record_retried();
                }
                last_err = Some(err);
            }
        }
    }
    Err(last_err.unwrap_or(Error::WouldBlock))
}

pub(crate) fn push_send(core: &Arc<ChannelCore>, msg: Message, flags: MessageFlags) -> Result<()> {
    distribute(core, msg, flags)
}
