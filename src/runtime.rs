//! Messaging runtime lifecycle.
//!
//! One explicit lifecycle: [`init`] must run before any channel is
//! created, and [`shutdown`] closes every live channel, stops listener
//! threads, and tears down the inproc endpoint registry. Both are
//! idempotent; using the core before `init` fails with
//! [`Error::NotInitialized`] instead of lazily initializing. Call sites
//! reach the shared state through this module rather than ambient statics
//! of their own.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, Weak};

use parking_lot::Mutex;
use tracing::debug;

use crate::channel::ChannelCore;
use crate::error::{Error, Result};
use crate::registry::EndpointRegistry;

static RUNTIME: OnceLock<Runtime> = OnceLock::new();

/// Process-wide runtime state: the endpoint registry and the live-channel
/// list used for shutdown.
pub(crate) struct Runtime {
    registry: EndpointRegistry,
    channels: Mutex<Vec<Weak<ChannelCore>>>,
    initialized: AtomicBool,
}

impl Runtime {
    fn new() -> Self {
        Runtime {
            registry: EndpointRegistry::new(),
            channels: Mutex::new(Vec::new()),
            initialized: AtomicBool::new(false),
        }
    }

    pub(crate) fn registry(&self) -> &EndpointRegistry {
        &self.registry
    }
}

/// The runtime singleton; its lifecycle state is what `init`/`shutdown`
/// toggle.
pub(crate) fn handle() -> &'static Runtime {
    RUNTIME.get_or_init(Runtime::new)
}

/// Start the messaging runtime. Idempotent.
pub fn init() {
    if !handle().initialized.swap(true, Ordering::AcqRel) {
        debug!("messaging runtime initialized");
    }
}

/// Stop the messaging runtime: close every live channel (which stops
/// their listener threads) and tear down the registry. Idempotent.
pub fn shutdown() {
    let runtime = handle();
    if !runtime.initialized.swap(false, Ordering::AcqRel) {
        return;
    }
    let live: Vec<Arc<ChannelCore>> = {
        let mut channels = runtime.channels.lock();
        channels.drain(..).filter_map(|w| w.upgrade()).collect()
    };
    for core in live {
        core.close_internal();
    }
    runtime.registry.shutdown();
    debug!("messaging runtime shut down");
}

pub fn is_initialized() -> bool {
    handle().initialized.load(Ordering::Acquire)
}

pub(crate) fn ensure_initialized() -> Result<()> {
    if is_initialized() {
        Ok(())
    } else {
        Err(Error::NotInitialized)
    }
}

/// Track a channel for runtime shutdown; dead entries are pruned as a
/// side effect.
pub(crate) fn register_channel(core: &Arc<ChannelCore>) {
    let mut channels = handle().channels.lock();
    channels.retain(|w| w.strong_count() > 0);
    channels.push(Arc::downgrade(core));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_and_shutdown_are_idempotent() {
        init();
        init();
        assert!(is_initialized());
        shutdown();
        shutdown();
        assert!(!is_initialized());
        // Leave the runtime up for other tests in this process.
        init();
    }
}
