use std::thread;
use std::time::Duration;

use anyhow::Result;
use goo_messaging::{logging, runtime, Channel, Error, Pattern};

fn setup() {
    logging::init();
    runtime::init();
}

/// A push channel connected to two pull servers distributes round-robin:
/// each pull sees half the stream in order, and merging the halves in
/// send order reproduces the original sequence.
#[test]
fn round_robin_across_two_pulls() -> Result<()> {
    setup();
    let pull_a = Channel::with_capacity(Pattern::Pull, 16)?;
    pull_a.bind("inproc://s5-pull-a")?;
    let pull_b = Channel::with_capacity(Pattern::Pull, 16)?;
    pull_b.bind("inproc://s5-pull-b")?;

    let push = Channel::new(Pattern::Push)?;
    push.connect("inproc://s5-pull-a")?;
    push.connect("inproc://s5-pull-b")?;

    let sent: Vec<String> = (0..10).map(|i| format!("m{i}")).collect();
    for body in &sent {
        push.send(body.as_bytes())?;
    }

    let mut from_a = Vec::new();
    let mut from_b = Vec::new();
    for _ in 0..5 {
        from_a.push(String::from_utf8(pull_a.try_recv()?)?);
        from_b.push(String::from_utf8(pull_b.try_recv()?)?);
    }
    assert!(matches!(pull_a.try_recv(), Err(Error::QueueEmpty)));
    assert!(matches!(pull_b.try_recv(), Err(Error::QueueEmpty)));

    assert_eq!(from_a, vec!["m0", "m2", "m4", "m6", "m8"]);
    assert_eq!(from_b, vec!["m1", "m3", "m5", "m7", "m9"]);

    // Interleaved in send order the halves reproduce the sequence.
    let mut merged = Vec::new();
    for i in 0..5 {
        merged.push(from_a[i].clone());
        merged.push(from_b[i].clone());
    }
    assert_eq!(merged, sent);
    Ok(())
}

/// Push with no endpoints behaves like a Normal channel.
#[test]
fn push_without_endpoints_is_local() -> Result<()> {
    setup();
    let push = Channel::with_capacity(Pattern::Push, 4)?;
    push.send(b"queued locally")?;
    assert_eq!(push.queue_len(), 1);
    Ok(())
}

/// Pull over TCP: the pull side binds, the push side connects, and the
/// stream arrives in order through the listener's reader thread.
#[test]
fn push_pull_over_tcp() -> Result<()> {
    setup();
    let pull = Channel::with_capacity(Pattern::Pull, 32)?;
    pull.bind("tcp://127.0.0.1:15621")?;

    let push = Channel::new(Pattern::Push)?;
    push.connect("tcp://127.0.0.1:15621")?;

    for i in 0..8 {
        push.send(format!("job{i}").as_bytes())?;
    }

    pull.set_timeout(Some(Duration::from_secs(2)));
    for i in 0..8 {
        assert_eq!(pull.recv()?, format!("job{i}").into_bytes());
    }

    push.close();
    pull.close();
    Ok(())
}

/// A dead inproc target is skipped after retries; the send surfaces the
/// failure once every target is gone.
#[test]
fn push_surfaces_failure_when_all_targets_are_gone() -> Result<()> {
    setup();
    let pull = Channel::with_capacity(Pattern::Pull, 4)?;
    pull.bind("inproc://push-fail")?;

    let push = Channel::new(Pattern::Push)?;
    push.connect("inproc://push-fail")?;

    pull.close();
    thread::sleep(Duration::from_millis(20));

    // The shared queue is closed; delivery fails and is reported.
    let err = push.try_send(b"nobody home").unwrap_err();
    assert!(matches!(err, Error::Closed));
    assert!(push.stats().send_errors >= 1);
    Ok(())
}
