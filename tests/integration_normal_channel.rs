use std::thread;
use std::time::Duration;

use anyhow::Result;
use goo_messaging::{
    logging, runtime, Channel, Error, Message, MessageFlags, MessageKind, Pattern, Priority,
};

fn setup() {
    logging::init();
    runtime::init();
}

/// Bounded producer/consumer with a slow consumer: the producer's timed
/// sends ride out the backpressure and everything arrives in order.
#[test]
fn blocking_producer_with_slow_consumer() -> Result<()> {
    setup();
    let channel = Channel::with_capacity(Pattern::Normal, 2)?;
    channel.set_timeout(Some(Duration::from_millis(100)));

    let producer = {
        let channel = channel.clone();
        thread::spawn(move || -> Result<()> {
            for body in [b"a", b"b", b"c"] {
                channel.send(body)?;
            }
            Ok(())
        })
    };

    let mut received = Vec::new();
    for _ in 0..3 {
        thread::sleep(Duration::from_millis(50));
        received.push(channel.recv()?);
    }
    producer.join().unwrap()?;

    assert_eq!(received, vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);

    let stats = channel.stats();
    assert_eq!(stats.messages_sent, 3);
    assert_eq!(stats.messages_received, 3);
    assert_eq!(stats.send_errors, 0);
    Ok(())
}

/// Priority preemption across a close: Critical, High, Normal, Low.
#[test]
fn priority_preemption_survives_close() -> Result<()> {
    setup();
    let channel = Channel::with_capacity(Pattern::Normal, 4)?;

    for (priority, body) in [
        (Priority::Low, &b"L"[..]),
        (Priority::Normal, &b"N"[..]),
        (Priority::Critical, &b"C"[..]),
        (Priority::High, &b"H"[..]),
    ] {
        let mut msg = Message::with_body(body.to_vec());
        msg.set_priority(priority);
        channel.send_msg(msg)?;
    }
    channel.close();

    let mut drained = Vec::new();
    loop {
        match channel.recv() {
            Ok(body) => drained.push(body),
            Err(Error::ClosedAndEmpty) => break,
            Err(err) => return Err(err.into()),
        }
    }
    assert_eq!(
        drained,
        vec![b"C".to_vec(), b"H".to_vec(), b"N".to_vec(), b"L".to_vec()]
    );
    Ok(())
}

/// FIFO within one priority band.
#[test]
fn fifo_within_band() -> Result<()> {
    setup();
    let channel = Channel::with_capacity(Pattern::Normal, 4)?;
    for body in [b"1", b"2", b"3", b"4"] {
        channel.send(body)?;
    }
    for expected in [b"1", b"2", b"3", b"4"] {
        assert_eq!(channel.recv()?, expected.to_vec());
    }
    Ok(())
}

/// Close drains residual messages; blocked senders wake with Closed.
#[test]
fn close_drains_and_wakes_senders() -> Result<()> {
    setup();
    let channel = Channel::with_capacity(Pattern::Normal, 3)?;
    channel.send(b"one")?;
    channel.send(b"two")?;
    channel.send(b"three")?;

    let blocked_sender = {
        let channel = channel.clone();
        thread::spawn(move || channel.send(b"never"))
    };
    thread::sleep(Duration::from_millis(30));

    channel.close();
    assert!(matches!(blocked_sender.join().unwrap(), Err(Error::Closed)));

    assert_eq!(channel.recv()?, b"one".to_vec());
    assert_eq!(channel.recv()?, b"two".to_vec());
    assert_eq!(channel.recv()?, b"three".to_vec());
    assert!(matches!(channel.recv(), Err(Error::ClosedAndEmpty)));

    // Closed is terminal: sends keep failing.
    assert!(matches!(channel.send(b"late"), Err(Error::Closed)));
    Ok(())
}

/// A non-blocking send against a full queue reports QueueFull and counts
/// one send error.
#[test]
fn nonblocking_full_queue_counts_send_error() -> Result<()> {
    setup();
    let channel = Channel::with_capacity(Pattern::Normal, 1)?;
    channel.send(b"occupant")?;

    assert!(matches!(channel.try_send(b"overflow"), Err(Error::QueueFull)));
    assert_eq!(channel.stats().send_errors, 1);

    assert_eq!(channel.recv()?, b"occupant".to_vec());
    Ok(())
}

/// Kind and payload survive a queue round-trip unchanged.
#[test]
fn message_round_trip_preserves_kind_and_bytes() -> Result<()> {
    setup();
    let channel = Channel::with_capacity(Pattern::Normal, 1)?;
    let payload = b"{\"level\": 3}".to_vec();
    channel.send_msg(Message::new(MessageKind::Json, payload.clone()))?;

    let msg = channel.recv_msg()?;
    assert_eq!(msg.kind(), MessageKind::Json);
    assert_eq!(msg.payload(), payload.as_slice());
    Ok(())
}

/// A multipart chain is observed contiguously, ahead of later traffic.
#[test]
fn multipart_chain_is_atomic() -> Result<()> {
    setup();
    let channel = Channel::with_capacity(Pattern::Normal, 4)?;

    let mut chain = Message::with_body(b"part1".to_vec());
    chain.append_part(b"part2".to_vec(), MessageFlags::empty());
    chain.append_part(b"part3".to_vec(), MessageFlags::empty());
    channel.send_msg(chain)?;
    channel.send(b"tail")?;

    let msg = channel.recv_msg()?;
    assert_eq!(msg.part_count(), 3);
    assert_eq!(msg.payload(), b"part1");
    let second = msg.next_part().unwrap();
    assert!(second.flags().contains(MessageFlags::MORE));
    assert_eq!(second.payload(), b"part2");
    assert_eq!(second.next_part().unwrap().payload(), b"part3");

    assert_eq!(channel.recv()?, b"tail".to_vec());
    Ok(())
}

/// Typed channels reject payloads of the wrong length.
#[test]
fn element_size_is_enforced() -> Result<()> {
    setup();
    let channel = Channel::with_options(
        Pattern::Normal,
        4,
        8,
        goo_messaging::ChannelOptions::default(),
    )?;
    assert!(matches!(channel.send(b"12345"), Err(Error::Argument(_))));
    channel.send(b"1234")?;
    assert_eq!(channel.recv()?, b"1234".to_vec());
    Ok(())
}

/// Receive-only and send-only patterns refuse the opposite operation.
#[test]
fn wrong_pattern_operations_are_rejected() -> Result<()> {
    setup();
    let sub = Channel::new(Pattern::Sub)?;
    assert!(matches!(sub.send(b"x"), Err(Error::WrongPattern { .. })));

    let push = Channel::new(Pattern::Push)?;
    assert!(matches!(push.recv(), Err(Error::WrongPattern { .. })));

    let normal = Channel::new(Pattern::Normal)?;
    assert!(matches!(
        normal.bind("tcp://127.0.0.1:15950"),
        Err(Error::WrongPattern { .. })
    ));
    Ok(())
}
