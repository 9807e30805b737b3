//! Message values carried by channels and transports.
//!
//! A [`Message`] owns its payload bytes and carries the routing metadata the
//! pattern engine needs: a kind tag, a priority band, an optional topic for
//! pub/sub routing, a flag set, and an optional multipart continuation.
//! Ownership of a multipart chain is transitive: dropping the head drops
//! every part behind it.

use std::sync::Weak;

use bitflags::bitflags;

use crate::channel::ChannelCore;
use crate::error::{Error, Result};

/// Interpretation of the payload bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    None,
    Int,
    Float,
    Bool,
    String,
    Binary,
    Json,
    Custom,
}

impl MessageKind {
    /// Wire tag used by the frame codec.
    pub(crate) fn as_u8(self) -> u8 {
        match self {
            MessageKind::None => 0,
            MessageKind::Int => 1,
            MessageKind::Float => 2,
            MessageKind::Bool => 3,
            MessageKind::String => 4,
            MessageKind::Binary => 5,
            MessageKind::Json => 6,
            MessageKind::Custom => 7,
        }
    }

    pub(crate) fn from_u8(tag: u8) -> Result<Self> {
        Ok(match tag {
            0 => MessageKind::None,
            1 => MessageKind::Int,
            2 => MessageKind::Float,
            3 => MessageKind::Bool,
            4 => MessageKind::String,
            5 => MessageKind::Binary,
            6 => MessageKind::Json,
            7 => MessageKind::Custom,
            other => {
                return Err(Error::Transport(format!(
                    "unknown message kind tag {other}"
                )))
            }
        })
    }
}

/// Delivery priority. Critical and High share the top queue band; Normal and
/// Low each own one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Priority {
    Low,
    Normal,
    High,
    Critical,
}

impl Priority {
    /// Queue band index, highest band first.
    pub(crate) fn band(self) -> usize {
        match self {
            Priority::Critical | Priority::High => 0,
            Priority::Normal => 1,
            Priority::Low => 2,
        }
    }

    /// Internal drain order within the queue. Critical and High share the
    /// top band for accounting, but Critical drains first within it.
    pub(crate) fn level(self) -> usize {
        match self {
            Priority::Critical => 0,
            Priority::High => 1,
            Priority::Normal => 2,
            Priority::Low => 3,
        }
    }

    pub(crate) fn as_u8(self) -> u8 {
        match self {
            Priority::Low => 0,
            Priority::Normal => 1,
            Priority::High => 2,
            Priority::Critical => 3,
        }
    }

    pub(crate) fn from_u8(tag: u8) -> Result<Self> {
        Ok(match tag {
            0 => Priority::Low,
            1 => Priority::Normal,
            2 => Priority::High,
            3 => Priority::Critical,
            other => {
                return Err(Error::Transport(format!(
                    "unknown priority tag {other}"
                )))
            }
        })
    }
}

bitflags! {
    /// Per-message flags.
    ///
    /// `MORE` marks a non-terminal multipart fragment; `REQUEST` and `REPLY`
    /// mark req/rep correlation. `NONBLOCK` on a send or receive call makes
    /// that single operation non-blocking regardless of channel options.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct MessageFlags: u32 {
        const NONBLOCK = 1 << 0;
        const PEEK = 1 << 1;
        const OOB = 1 << 2;
        const MORE = 1 << 3;
        const PRIORITY = 1 << 4;
        const REQUEST = 1 << 5;
        const REPLY = 1 << 6;
    }
}

/// Owned message value; immutable once handed to a channel.
#[derive(Debug, Default)]
pub struct Message {
    kind: MessageKind,
    payload: Vec<u8>,
    priority: Priority,
    topic: Option<String>,
    flags: MessageFlags,
    /// Next part of a multipart chain. Always a finite chain; cycles are
    /// structurally impossible.
    pub(crate) next: Option<Box<Message>>,
    /// Channel expecting the reply, when this message is a request. The
    /// reference is non-owning: a dead requester simply loses the reply.
    pub(crate) reply_to: Option<Weak<ChannelCore>>,
}

impl Default for MessageKind {
    fn default() -> Self {
        MessageKind::None
    }
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Normal
    }
}

impl Clone for Message {
    fn clone(&self) -> Self {
        Message {
            kind: self.kind,
            payload: self.payload.clone(),
            priority: self.priority,
            topic: self.topic.clone(),
            flags: self.flags,
            next: self.next.clone(),
            reply_to: self.reply_to.clone(),
        }
    }
}

impl Message {
    /// Create a message with Normal priority, no topic, and no flags.
    pub fn new(kind: MessageKind, payload: impl Into<Vec<u8>>) -> Self {
        Message {
            kind,
            payload: payload.into(),
            priority: Priority::Normal,
            topic: None,
            flags: MessageFlags::empty(),
            next: None,
            reply_to: None,
        }
    }

    /// Create a Binary message from a raw buffer.
    pub fn with_body(payload: impl Into<Vec<u8>>) -> Self {
        Message::new(MessageKind::Binary, payload)
    }

    /// Create a message with an explicit flag set.
    pub fn with_flags(kind: MessageKind, payload: impl Into<Vec<u8>>, flags: MessageFlags) -> Self {
        let mut msg = Message::new(kind, payload);
        msg.flags = flags;
        msg
    }

    /// Rebuild a message from decoded wire fields. The wire flags are
    /// authoritative; no flag fixup is applied.
    pub(crate) fn from_wire(
        kind: MessageKind,
        priority: Priority,
        topic: Option<String>,
        flags: MessageFlags,
        payload: Vec<u8>,
    ) -> Self {
        Message {
            kind,
            payload,
            priority,
            topic,
            flags,
            next: None,
            reply_to: None,
        }
    }

    pub fn kind(&self) -> MessageKind {
        self.kind
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Consume the head of the chain and return its payload. Any trailing
    /// parts are dropped with it.
    pub fn into_payload(mut self) -> Vec<u8> {
        std::mem::take(&mut self.payload)
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn topic(&self) -> Option<&str> {
        self.topic.as_deref()
    }

    pub fn flags(&self) -> MessageFlags {
        self.flags
    }

    /// Replace any prior topic with an owned copy.
    pub fn set_topic(&mut self, topic: impl Into<String>) {
        self.topic = Some(topic.into());
    }

    /// Set the delivery priority; also records the PRIORITY flag.
    pub fn set_priority(&mut self, priority: Priority) {
        self.priority = priority;
        self.flags |= MessageFlags::PRIORITY;
    }

    pub(crate) fn insert_flags(&mut self, flags: MessageFlags) {
        self.flags |= flags;
    }

    pub(crate) fn remove_flags(&mut self, flags: MessageFlags) {
        self.flags -= flags;
    }

    /// Append a part to the tail of the multipart chain. The previous tail
    /// gets the MORE flag; the new tail inherits the head's kind.
    pub fn append_part(&mut self, payload: impl Into<Vec<u8>>, flags: MessageFlags) {
        let part = Message::with_flags(self.kind, payload, flags);
        let mut tail = self;
        while tail.next.is_some() {
            tail = tail.next.as_mut().unwrap();
        }
        tail.flags |= MessageFlags::MORE;
        tail.next = Some(Box::new(part));
    }

    /// Prepend a part in front of the chain, returning the new head. Used by
    /// Router delivery to attach the routing identity.
    pub(crate) fn prepend_part(self, mut head: Message) -> Message {
        head.flags |= MessageFlags::MORE;
        head.next = Some(Box::new(self));
        head
    }

    /// Detach and return the remainder of the chain, clearing MORE on the
    /// head.
    pub(crate) fn split_first(&mut self) -> Option<Message> {
        self.flags -= MessageFlags::MORE;
        self.next.take().map(|boxed| *boxed)
    }

    pub fn next_part(&self) -> Option<&Message> {
        self.next.as_deref()
    }

    /// Number of parts in the chain, the head included.
    pub fn part_count(&self) -> usize {
        let mut count = 1;
        let mut cursor = self.next.as_deref();
        while let Some(part) = cursor {
            count += 1;
            cursor = part.next.as_deref();
        }
        count
    }

    /// Total payload bytes across the whole chain.
    pub fn total_len(&self) -> usize {
        let mut len = self.payload.len();
        let mut cursor = self.next.as_deref();
        while let Some(part) = cursor {
            len += part.payload.len();
            cursor = part.next.as_deref();
        }
        len
    }

    pub fn is_multipart(&self) -> bool {
        self.next.is_some() || self.flags.contains(MessageFlags::MORE)
    }

    /// Verify the MORE discipline: present on every non-terminal part,
    /// absent on the terminal one.
    pub(crate) fn validate_chain(&self) -> Result<()> {
        let mut cursor = self;
        loop {
            match cursor.next.as_deref() {
                Some(next) => {
                    if !cursor.flags.contains(MessageFlags::MORE) {
                        return Err(Error::protocol(
                            "non-terminal multipart fragment is missing the MORE flag",
                        ));
                    }
                    cursor = next;
                }
                None => {
                    if cursor.flags.contains(MessageFlags::MORE) {
                        return Err(Error::protocol(
                            "terminal multipart fragment carries the MORE flag",
                        ));
                    }
                    return Ok(());
                }
            }
        }
    }
}

impl Drop for Message {
    fn drop(&mut self) {
        // Unlink the chain iteratively so a long chain cannot blow the
        // stack with recursive Box drops.
        let mut next = self.next.take();
        while let Some(mut part) = next {
            next = part.next.take();
        }
    }
}
