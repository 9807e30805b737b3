use anyhow::Result;
use goo_messaging::{logging, runtime, Channel, Error, Pattern};

/// The whole lifecycle in one test, since ordering matters within this
/// process: channels cannot exist before init, shutdown closes what is
/// left, and both calls are idempotent.
#[test]
fn runtime_lifecycle() -> Result<()> {
    logging::init();

    // Using the core before init is rejected, not lazily initialized.
    assert!(matches!(
        Channel::new(Pattern::Normal),
        Err(Error::NotInitialized)
    ));

    runtime::init();
    runtime::init(); // idempotent
    assert!(runtime::is_initialized());

    let server = Channel::with_capacity(Pattern::Pull, 8)?;
    server.bind("inproc://lifecycle-svc")?;

    let client = Channel::new(Pattern::Push)?;
    client.connect("inproc://lifecycle-svc")?;
    client.send(b"payload")?;
    assert_eq!(server.recv()?, b"payload".to_vec());

    // A second server on the same address is refused while the first owns it.
    let contender = Channel::with_capacity(Pattern::Pull, 8)?;
    assert!(matches!(
        contender.bind("inproc://lifecycle-svc"),
        Err(Error::AlreadyExists(_))
    ));

    // Clients need an existing server.
    let lost = Channel::new(Pattern::Push)?;
    assert!(matches!(
        lost.connect("inproc://no-such-service"),
        Err(Error::NotFound(_))
    ));

    runtime::shutdown();
    runtime::shutdown(); // idempotent
    assert!(!runtime::is_initialized());

    // Shutdown closed the channels it was tracking.
    assert!(server.is_closed());
    assert!(matches!(server.recv(), Err(Error::ClosedAndEmpty)));
    assert!(matches!(
        Channel::new(Pattern::Normal),
        Err(Error::NotInitialized)
    ));

    // The registry entry went with it: after re-init the address is free.
    runtime::init();
    let fresh = Channel::with_capacity(Pattern::Pull, 8)?;
    fresh.bind("inproc://lifecycle-svc")?;
    Ok(())
}
