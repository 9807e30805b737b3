//! Per-channel statistics.
//!
//! Counters are monotonic and lock-free; the channel samples them together
//! with its queue gauges into a serializable [`StatsSnapshot`] so runtimes
//! can export observability data as JSON.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use serde::Serialize;

/// Lock-free counter block owned by a channel.
#[derive(Debug, Default)]
pub(crate) struct ChannelStats {
    messages_sent: AtomicU64,
    messages_received: AtomicU64,
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
    send_errors: AtomicU64,
    receive_errors: AtomicU64,
    dropped: AtomicU64,
    retried: AtomicU64,
    current_queue_size: AtomicUsize,
    max_queue_size: AtomicUsize,
}

impl ChannelStats {
    pub fn record_send(&self, bytes: usize) {
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_receive(&self, bytes: usize) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_send_error(&self) {
        self.send_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_receive_error(&self) {
        self.receive_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_retried(&self) {
        self.retried.fetch_add(1, Ordering::Relaxed);
    }

    /// Update the queue gauges after an enqueue or dequeue.
    pub fn observe_queue_size(&self, len: usize) {
        self.current_queue_size.store(len, Ordering::Relaxed);
        self.max_queue_size.fetch_max(len, Ordering::Relaxed);
    }

    pub fn reset(&self) {
        self.messages_sent.store(0, Ordering::Relaxed);
        self.messages_received.store(0, Ordering::Relaxed);
        self.bytes_sent.store(0, Ordering::Relaxed);
        self.bytes_received.store(0, Ordering::Relaxed);
        self.send_errors.store(0, Ordering::Relaxed);
        self.receive_errors.store(0, Ordering::Relaxed);
        self.dropped.store(0, Ordering::Relaxed);
        self.retried.store(0, Ordering::Relaxed);
        self.current_queue_size.store(0, Ordering::Relaxed);
        self.max_queue_size.store(0, Ordering::Relaxed);
    }

    /// Point-in-time copy. Waiter gauges are sampled by the channel, which
    /// owns the queue.
    pub fn snapshot(&self, waiting_senders: usize, waiting_receivers: usize) -> StatsSnapshot {
        StatsSnapshot {
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            messages_received: self.messages_received.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            send_errors: self.send_errors.load(Ordering::Relaxed),
            receive_errors: self.receive_errors.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            retried: self.retried.load(Ordering::Relaxed),
            current_queue_size: self.current_queue_size.load(Ordering::Relaxed),
            max_queue_size: self.max_queue_size.load(Ordering::Relaxed),
            waiting_senders,
            waiting_receivers,
        }
    }
}

/// Point-in-time view of a channel's counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub messages_sent: u64,
    pub messages_received: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub send_errors: u64,
    pub receive_errors: u64,
    pub dropped: u64,
    pub retried: u64,
    pub current_queue_size: usize,
    pub max_queue_size: usize,
    pub waiting_senders: usize,
    pub waiting_receivers: usize,
}
