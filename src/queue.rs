//! Bounded three-band priority queue.
//!
//! The queue is the blocking heart of every buffered channel: one mutex
//! guards the bands, and the `not_full` / `not_empty` condition variables
//! carry the suspension points for blocking enqueue and dequeue. Critical
//! and High priority messages share the top band; Normal and Low each own
//! one. Dequeue always drains the highest non-empty band, FIFO within a
//! band.
//!
//! Closing is idempotent and broadcasts both condvars. A closed queue still
//! drains residual messages; once empty it reports
//! [`Error::ClosedAndEmpty`] and never blocks again.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::error::{Error, Result};
use crate::message::Message;

/// Number of priority bands: {Critical+High, Normal, Low}.
pub const BAND_COUNT: usize = 3;

/// Internal drain levels: Critical, High, Normal, Low. The top two report
/// as one band but Critical drains ahead of High within it.
const LEVEL_COUNT: usize = 4;

struct Inner {
    levels: [VecDeque<Message>; LEVEL_COUNT],
    capacity: usize,
    len: usize,
    closed: bool,
    waiting_senders: usize,
    waiting_receivers: usize,
}

impl Inner {
    fn pop_highest(&mut self) -> Option<Message> {
        for level in self.levels.iter_mut() {
            if let Some(msg) = level.pop_front() {
                self.len -= 1;
                return Some(msg);
            }
        }
        None
    }
}

/// Bounded FIFO with three priority bands and blocking semantics.
pub struct PriorityQueue {
    inner: Mutex<Inner>,
    not_full: Condvar,
    not_empty: Condvar,
}

impl PriorityQueue {
    /// Create a queue holding at most `capacity` messages across all bands.
    ///
    /// Capacity zero is a caller mistake, not a rendezvous request.
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(Error::argument("queue capacity must be at least 1"));
        }
        Ok(PriorityQueue {
            inner: Mutex::new(Inner {
                levels: [
                    VecDeque::new(),
                    VecDeque::new(),
                    VecDeque::new(),
                    VecDeque::new(),
                ],
                capacity,
                len: 0,
                closed: false,
                waiting_senders: 0,
                waiting_receivers: 0,
            }),
            not_full: Condvar::new(),
            not_empty: Condvar::new(),
        })
    }

    /// Enqueue into the band matching the message priority.
    ///
    /// With `blocking` set, waits on `not_full` until space appears, the
    /// deadline passes (`Timeout`), or the queue is closed (`Closed`).
    /// Without it, a full queue reports `QueueFull` immediately.
    pub fn enqueue(&self, msg: Message, blocking: bool, timeout: Option<Duration>) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Err(Error::Closed);
        }

        if inner.len == inner.capacity {
            if !blocking {
                return Err(Error::QueueFull);
            }
            let deadline = timeout.map(|t| Instant::now() + t);
            inner.waiting_senders += 1;
            while inner.len == inner.capacity && !inner.closed {
                let timed_out = match deadline {
                    Some(at) => self.not_full.wait_until(&mut inner, at).timed_out(),
                    None => {
                        self.not_full.wait(&mut inner);
                        false
                    }
                };
                if timed_out && inner.len == inner.capacity && !inner.closed {
                    inner.waiting_senders -= 1;
                    return Err(Error::Timeout);
                }
            }
            inner.waiting_senders -= 1;
            if inner.closed {
                return Err(Error::Closed);
            }
        }

        let level = msg.priority().level();
        inner.levels[level].push_back(msg);
        inner.len += 1;
        self.not_empty.notify_one();
        Ok(())
    }

    /// Dequeue the front of the highest non-empty band.
    ///
    /// With `blocking` set, waits on `not_empty`. A closed queue keeps
    /// draining residual messages and only then reports `ClosedAndEmpty`.
    pub fn dequeue(&self, blocking: bool, timeout: Option<Duration>) -> Result<Message> {
        let mut inner = self.inner.lock();
        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            if let Some(msg) = inner.pop_highest() {
                self.not_full.notify_one();
                return Ok(msg);
            }
            if inner.closed {
                return Err(Error::ClosedAndEmpty);
            }
            if !blocking {
                return Err(Error::QueueEmpty);
            }
            inner.waiting_receivers += 1;
            let timed_out = match deadline {
                Some(at) => self.not_empty.wait_until(&mut inner, at).timed_out(),
                None => {
                    self.not_empty.wait(&mut inner);
                    false
                }
            };
            inner.waiting_receivers -= 1;
            if timed_out && inner.len == 0 && !inner.closed {
                return Err(Error::Timeout);
            }
        }
    }

    /// Clone of the message a dequeue would return, without removing it.
    pub fn peek(&self) -> Option<Message> {
        let inner = self.inner.lock();
        inner
            .levels
            .iter()
            .find_map(|level| level.front())
            .cloned()
    }

    /// Close the queue and wake every waiter. Idempotent.
    pub fn close(&self) {
        let mut inner = self.inner.lock();
        if inner.closed {
            return;
        }
        inner.closed = true;
        self.not_full.notify_all();
        self.not_empty.notify_all();
    }

    /// Drop everything currently queued, returning how many messages went.
    /// Backs the Conflate channel option.
    pub fn clear(&self) -> usize {
        let mut inner = self.inner.lock();
        let dropped = inner.len;
        for level in inner.levels.iter_mut() {
            level.clear();
        }
        inner.len = 0;
        if dropped > 0 {
            self.not_full.notify_all();
        }
        dropped
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.inner.lock().capacity
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    /// Message count per band, highest band first. Critical and High are
    /// reported together.
    pub fn band_counts(&self) -> [usize; BAND_COUNT] {
        let inner = self.inner.lock();
        [
            inner.levels[0].len() + inner.levels[1].len(),
            inner.levels[2].len(),
            inner.levels[3].len(),
        ]
    }

    /// Current `(waiting_senders, waiting_receivers)` gauges.
    pub fn waiters(&self) -> (usize, usize) {
        let inner = self.inner.lock();
        (inner.waiting_senders, inner.waiting_receivers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Priority;
    use std::sync::Arc;
    use std::thread;

    fn msg(body: &str, priority: Priority) -> Message {
        let mut m = Message::with_body(body.as_bytes().to_vec());
        m.set_priority(priority);
        m
    }

    #[test]
    fn zero_capacity_is_rejected() {
        assert!(matches!(PriorityQueue::new(0), Err(Error::Argument(_))));
    }

    #[test]
    fn bands_drain_highest_first() {
        let queue = PriorityQueue::new(4).unwrap();
        queue.enqueue(msg("L", Priority::Low), false, None).unwrap();
        queue.enqueue(msg("N", Priority::Normal), false, None).unwrap();
        queue.enqueue(msg("H", Priority::High), false, None).unwrap();
        queue.enqueue(msg("K", Priority::Critical), false, None).unwrap();

        assert_eq!(queue.band_counts(), [2, 1, 1]);

        // Critical preempts an earlier-queued High within the shared band.
        let order: Vec<Vec<u8>> = (0..4)
            .map(|_| queue.dequeue(false, None).unwrap().into_payload())
            .collect();
        assert_eq!(order, vec![b"K".to_vec(), b"H".to_vec(), b"N".to_vec(), b"L".to_vec()]);
    }

    #[test]
    fn fifo_within_band() {
        let queue = PriorityQueue::new(4).unwrap();
        for body in ["a", "b", "c", "d"] {
            queue.enqueue(msg(body, Priority::Normal), false, None).unwrap();
        }
        for expected in [b"a", b"b", b"c", b"d"] {
            assert_eq!(queue.dequeue(false, None).unwrap().payload(), expected);
        }
    }

    #[test]
    fn nonblocking_capacity_outcomes() {
        let queue = PriorityQueue::new(1).unwrap();
        queue.enqueue(msg("x", Priority::Normal), false, None).unwrap();
        assert!(matches!(
            queue.enqueue(msg("y", Priority::Normal), false, None),
            Err(Error::QueueFull)
        ));
        queue.dequeue(false, None).unwrap();
        assert!(matches!(queue.dequeue(false, None), Err(Error::QueueEmpty)));
    }

    #[test]
    fn blocking_enqueue_times_out() {
        let queue = PriorityQueue::new(1).unwrap();
        queue.enqueue(msg("x", Priority::Normal), false, None).unwrap();
        let start = Instant::now();
        let result = queue.enqueue(
            msg("y", Priority::Normal),
            true,
            Some(Duration::from_millis(50)),
        );
        assert!(matches!(result, Err(Error::Timeout)));
        assert!(start.elapsed() >= Duration::from_millis(40));
    }

    #[test]
    fn blocking_dequeue_wakes_on_enqueue() {
        let queue = Arc::new(PriorityQueue::new(2).unwrap());
        let producer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(30));
                queue.enqueue(msg("late", Priority::Normal), false, None).unwrap();
            })
        };
        let received = queue.dequeue(true, Some(Duration::from_secs(2))).unwrap();
        assert_eq!(received.payload(), b"late");
        producer.join().unwrap();
    }

    #[test]
    fn close_drains_then_reports_closed_and_empty() {
        let queue = PriorityQueue::new(4).unwrap();
        queue.enqueue(msg("a", Priority::Normal), false, None).unwrap();
        queue.enqueue(msg("b", Priority::Normal), false, None).unwrap();
        queue.close();
        queue.close(); // idempotent

        assert!(matches!(
            queue.enqueue(msg("c", Priority::Normal), false, None),
            Err(Error::Closed)
        ));
        assert_eq!(queue.dequeue(true, None).unwrap().payload(), b"a");
        assert_eq!(queue.dequeue(true, None).unwrap().payload(), b"b");
        // Never blocks once drained.
        assert!(matches!(queue.dequeue(true, None), Err(Error::ClosedAndEmpty)));
    }

    #[test]
    fn close_wakes_blocked_sender() {
        let queue = Arc::new(PriorityQueue::new(1).unwrap());
        queue.enqueue(msg("x", Priority::Normal), false, None).unwrap();
        let sender = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.enqueue(msg("y", Priority::Normal), true, None))
        };
        thread::sleep(Duration::from_millis(30));
        assert_eq!(queue.waiters().0, 1);
        queue.close();
        assert!(matches!(sender.join().unwrap(), Err(Error::Closed)));
    }

    #[test]
    fn peek_leaves_message_in_place() {
        let queue = PriorityQueue::new(2).unwrap();
        queue.enqueue(msg("front", Priority::Normal), false, None).unwrap();
        assert_eq!(queue.peek().unwrap().payload(), b"front");
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn clear_empties_all_bands() {
        let queue = PriorityQueue::new(4).unwrap();
        queue.enqueue(msg("a", Priority::Low), false, None).unwrap();
        queue.enqueue(msg("b", Priority::Critical), false, None).unwrap();
        assert_eq!(queue.clear(), 2);
        assert!(queue.is_empty());
    }
}
