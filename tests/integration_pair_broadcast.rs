use anyhow::Result;
use goo_messaging::{logging, runtime, Channel, Error, Pattern};

fn setup() {
    logging::init();
    runtime::init();
}

/// Inproc pair: both sides can talk once peered.
#[test]
fn pair_is_bidirectional_over_inproc() -> Result<()> {
    setup();
    let left = Channel::with_capacity(Pattern::Pair, 8)?;
    left.bind("inproc://pair-duplex")?;
    let right = Channel::with_capacity(Pattern::Pair, 8)?;
    right.connect("inproc://pair-duplex")?;

    right.send(b"from-right")?;
    assert_eq!(left.recv()?, b"from-right".to_vec());

    left.send(b"from-left")?;
    assert_eq!(right.recv()?, b"from-left".to_vec());
    Ok(())
}

/// A pair endpoint admits exactly one peer.
#[test]
fn pair_refuses_a_second_peer() -> Result<()> {
    setup();
    let server = Channel::with_capacity(Pattern::Pair, 8)?;
    server.bind("inproc://pair-exclusive")?;

    let first = Channel::with_capacity(Pattern::Pair, 8)?;
    first.connect("inproc://pair-exclusive")?;

    let second = Channel::with_capacity(Pattern::Pair, 8)?;
    assert!(matches!(
        second.connect("inproc://pair-exclusive"),
        Err(Error::AlreadyConnected)
    ));
    Ok(())
}

/// Broadcast fans out to every registered receiver without topics.
#[test]
fn broadcast_reaches_all_receivers() -> Result<()> {
    setup();
    let tower = Channel::new(Pattern::Broadcast)?;
    let one = Channel::with_capacity(Pattern::Normal, 8)?;
    let two = Channel::with_capacity(Pattern::Normal, 8)?;
    tower.add_receiver(&one)?;
    tower.add_receiver(&two)?;

    tower.broadcast(b"all stations")?;
    assert_eq!(one.recv()?, b"all stations".to_vec());
    assert_eq!(two.recv()?, b"all stations".to_vec());
    Ok(())
}

/// One full receiver never aborts the fan-out; it is counted as dropped
/// and the rest still get the message.
#[test]
fn broadcast_skips_full_receivers() -> Result<()> {
    setup();
    let tower = Channel::new(Pattern::Broadcast)?;
    let tiny = Channel::with_capacity(Pattern::Normal, 1)?;
    let roomy = Channel::with_capacity(Pattern::Normal, 8)?;
    tower.add_receiver(&tiny)?;
    tower.add_receiver(&roomy)?;

    tower.broadcast(b"first")?;
    tower.broadcast(b"second")?;

    assert_eq!(tower.stats().dropped, 1);
    assert_eq!(tiny.recv()?, b"first".to_vec());
    assert_eq!(roomy.recv()?, b"first".to_vec());
    assert_eq!(roomy.recv()?, b"second".to_vec());
    Ok(())
}

/// Dropped receivers are pruned; the broadcast itself never fails.
#[test]
fn broadcast_outlives_its_receivers() -> Result<()> {
    setup();
    let tower = Channel::new(Pattern::Broadcast)?;
    let fleeting = Channel::with_capacity(Pattern::Normal, 4)?;
    tower.add_receiver(&fleeting)?;
    drop(fleeting);

    tower.broadcast(b"anyone?")?;
    Ok(())
}

/// Broadcast channels do not receive.
#[test]
fn broadcast_is_send_only() -> Result<()> {
    setup();
    let tower = Channel::new(Pattern::Broadcast)?;
    assert!(matches!(tower.recv(), Err(Error::WrongPattern { .. })));
    Ok(())
}
