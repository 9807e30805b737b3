//! Pub/Sub: topic-filtered fan-out.
//!
//! A publish clones the message once per matching local subscriber and
//! sends one framed topic record per connected endpoint. Filtering is
//! exact string equality on the topic. Local delivery filters on the
//! publisher's thread; transport delivery filters on the subscriber's
//! reader thread, where non-matching topics are dropped and counted.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Weak};

use tracing::{debug, warn};

use crate::channel::{ChannelCore, ChannelOptions, Pattern, Subscription};
use crate::error::{Error, Result};
use crate::message::{Message, MessageFlags};
use crate::pattern;

type Callback = Arc<dyn Fn(&Message) + Send + Sync>;

/// Append a topic filter to a Sub channel.
pub(crate) fn subscribe(
    core: &Arc<ChannelCore>,
    topic: &str,
    callback: Option<Callback>,
) -> Result<()> {
    if core.pattern != Pattern::Sub {
        return Err(Error::WrongPattern {
            op: "subscribe",
            pattern: core.pattern.name(),
        });
    }
    if topic.is_empty() {
        return Err(Error::argument("topic filter must not be empty"));
    }
    core.state.lock().subscriptions.push(Subscription {
        topic: topic.to_string(),
        callback,
    });
    debug!("channel {} subscribed to '{topic}'", core.id);
    Ok(())
}

/// Remove every filter matching the topic.
pub(crate) fn unsubscribe(core: &Arc<ChannelCore>, topic: &str) -> Result<()> {
    if core.pattern != Pattern::Sub {
        return Err(Error::WrongPattern {
            op: "unsubscribe",
            pattern: core.pattern.name(),
        });
    }
    let mut state = core.state.lock();
    let before = state.subscriptions.len();
    state.subscriptions.retain(|s| s.topic != topic);
    if state.subscriptions.len() == before {
        return Err(Error::NotFound(format!("subscription '{topic}'")));
    }
    debug!("channel {} unsubscribed from '{topic}'", core.id);
    Ok(())
}

/// Register a downstream Sub channel on a Pub channel. Weak reference:
/// the publisher never owns its subscribers.
pub(crate) fn add_subscriber(
    pub_core: &Arc<ChannelCore>,
    sub_core: &Arc<ChannelCore>,
) -> Result<()> {
    if pub_core.pattern != Pattern::Pub {
        return Err(Error::WrongPattern {
            op: "add_subscriber",
            pattern: pub_core.pattern.name(),
        });
    }
    if sub_core.pattern != Pattern::Sub {
        return Err(Error::argument("subscriber must be a sub channel"));
    }
    if sub_core.queue.is_none() {
        return Err(Error::argument("subscriber must be buffered"));
    }
    pub_core
        .state
        .lock()
        .subscribers
        .push(Arc::downgrade(sub_core));
    Ok(())
}

/// Matching filters for a topic: whether any matched, plus the callbacks
/// to run on delivery.
fn matching_callbacks(core: &ChannelCore, topic: Option<&str>) -> (bool, Vec<Callback>) {
    let state = core.state.lock();
    let mut matched = false;
    let mut callbacks = Vec::new();
    if let Some(topic) = topic {
        for sub in &state.subscriptions {
            if sub.topic == topic {
                matched = true;
                if let Some(cb) = &sub.callback {
                    callbacks.push(Arc::clone(cb));
                }
            }
        }
    }
    (matched, callbacks)
}

fn run_callbacks(core: &ChannelCore, callbacks: &[Callback], msg: &Message) {
    for callback in callbacks {
        // A panicking callback must not take the delivering thread down;
        // it is recorded as a receive error on the subscriber.
        if catch_unwind(AssertUnwindSafe(|| callback(msg))).is_err() {
            core.stats.record_receive_error();
            warn!("subscription callback panicked on channel {}", core.id);
        }
    }
}

/// Publish a topic-tagged message: local fan-out plus endpoint framing.
pub(crate) fn publish_msg(
    core: &Arc<ChannelCore>,
    msg: Message,
    flags: MessageFlags,
) -> Result<()> {
    if msg.topic().is_none() {
        return Err(Error::argument("publish requires a topic"));
    }

    let reliable = core.options.contains(ChannelOptions::RELIABLE);
    let hwm = core.high_water_mark();
    let (_, timeout) = core.wait_params(flags);

    // Snapshot live subscribers under the source lock, pruning the dead.
    let subscribers: Vec<Arc<ChannelCore>> = {
        let mut state = core.state.lock();
        state.subscribers.retain(|w| w.strong_count() > 0);
        state.subscribers.iter().filter_map(Weak::upgrade).collect()
    };

    for subscriber in subscribers {
        deliver_local(core, &subscriber, &msg, reliable, hwm, timeout);
    }

    // One framed record per connected endpoint target.
    for target in pattern::collect_endpoint_targets(core) {
        if let Err(err) = target.deliver(msg.clone(), reliable, timeout) {
            core.stats.record_send_error();
            debug!("publish endpoint delivery failed: {err}");
        }
    }
    Ok(())
}

/// Clone-and-enqueue into one matching local subscriber.
fn deliver_local(
    pub_core: &ChannelCore,
    sub_core: &Arc<ChannelCore>,
    msg: &Message,
    reliable: bool,
    hwm: usize,
    timeout: Option<std::time::Duration>,
) {
    let (matched, callbacks) = matching_callbacks(sub_core, msg.topic());
    if !matched {
        return;
    }
    let Some(queue) = sub_core.queue.as_ref() else {
        pub_core.stats.record_dropped();
        return;
    };

    // Above the high water mark a non-reliable publisher drops rather
    // than blocks.
    if !reliable && hwm != 0 && queue.len() >= hwm {
        pub_core.stats.record_dropped();
        return;
    }

    run_callbacks(sub_core, &callbacks, msg);
    let result = queue.enqueue(msg.clone(), reliable, timeout);
    match result {
        Ok(()) => sub_core.observe_queue(),
        Err(_) => pub_core.stats.record_dropped(),
    }
}

/// Reader-thread delivery into a Sub channel: filter, count, enqueue.
pub(crate) fn deliver_to_sub(core: &Arc<ChannelCore>, msg: Message) -> Result<()> {
    let (matched, callbacks) = matching_callbacks(core, msg.topic());
    if !matched {
        core.stats.record_dropped();
        return Ok(());
    }
    run_callbacks(core, &callbacks, &msg);
    pattern::enqueue_local(core, msg)
}

/// Sub receive. Publishes that reached the queue without passing a
/// delivery filter (an inproc publisher enqueues directly into the shared
/// queue) are filtered here instead: unmatched topics are dropped,
/// counted, and the receive moves on to the next message.
pub(crate) fn sub_recv(core: &Arc<ChannelCore>, flags: MessageFlags) -> Result<Message> {
    // A peek must not consume, so it cannot skip unmatched messages.
    if flags.contains(MessageFlags::PEEK) {
        return pattern::local_recv(core, flags);
    }
    loop {
        let msg = pattern::local_recv(core, flags)?;
        let (matched, _) = matching_callbacks(core, msg.topic());
        if matched {
            return Ok(msg);
        }
        core.stats.record_dropped();
        debug!(
            "channel {} dropped message with unmatched topic {:?}",
            core.id,
            msg.topic()
        );
    }
}
