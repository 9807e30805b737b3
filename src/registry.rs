//! Process-wide registry of in-process endpoints.
//!
//! `inproc://` servers publish their local queue under an address string;
//! clients resolve the address to a shared handle on the same queue.
//! Exactly one server may own an address at a time. The registry is owned
//! by the runtime lifecycle object and torn down at shutdown, which closes
//! every registered queue so blocked clients wake with `ClosedAndEmpty`.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::debug;

use crate::channel::ChannelCore;
use crate::error::{Error, Result};
use crate::queue::PriorityQueue;

/// A resolved inproc endpoint: the shared queue plus the owning server
/// channel, used for pattern-level peering (Pair).
#[derive(Clone)]
pub(crate) struct RegistryEntry {
    pub queue: Arc<PriorityQueue>,
    pub owner: Weak<ChannelCore>,
}

/// Address → shared queue table. Its mutex is never taken while a channel
/// lock is held.
#[derive(Default)]
pub(crate) struct EndpointRegistry {
    entries: Mutex<HashMap<String, RegistryEntry>>,
}

impl EndpointRegistry {
    pub fn new() -> Self {
        EndpointRegistry::default()
    }

    /// Claim an address for a server endpoint.
    pub fn register_server(
        &self,
        address: &str,
        queue: Arc<PriorityQueue>,
        owner: Weak<ChannelCore>,
    ) -> Result<()> {
        let mut entries = self.entries.lock();
        if entries.contains_key(address) {
            return Err(Error::AlreadyExists(format!("inproc://{address}")));
        }
        entries.insert(address.to_string(), RegistryEntry { queue, owner });
        debug!("registered inproc endpoint '{address}'");
        Ok(())
    }

    /// Resolve an address for a client endpoint.
    pub fn lookup(&self, address: &str) -> Result<RegistryEntry> {
        self.entries
            .lock()
            .get(address)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("inproc://{address}")))
    }

    /// Remove a server's entry, closing its queue so clients unblock.
    pub fn remove(&self, address: &str) -> Result<()> {
        let removed = self.entries.lock().remove(address);
        match removed {
            Some(entry) => {
                entry.queue.close();
                debug!("removed inproc endpoint '{address}'");
                Ok(())
            }
            None => Err(Error::NotFound(format!("inproc://{address}"))),
        }
    }

    /// Close every registered queue and forget all entries.
    pub fn shutdown(&self) {
        let mut entries = self.entries.lock();
        for (address, entry) in entries.drain() {
            entry.queue.close();
            debug!("closed inproc endpoint '{address}' at registry shutdown");
        }
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }
}
