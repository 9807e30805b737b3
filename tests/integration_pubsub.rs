use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::Result;
use goo_messaging::{logging, runtime, Channel, ChannelOptions, Error, Pattern};

fn setup() {
    logging::init();
    runtime::init();
}

/// Two subscribers with different filters: each sees exactly the topics
/// it asked for, in publish order.
#[test]
fn local_fanout_filters_by_topic() -> Result<()> {
    setup();
    let publisher = Channel::new(Pattern::Pub)?;
    let weather_only = Channel::with_capacity(Pattern::Sub, 8)?;
    let sports_and_weather = Channel::with_capacity(Pattern::Sub, 8)?;

    weather_only.subscribe("weather")?;
    sports_and_weather.subscribe("sports")?;
    sports_and_weather.subscribe("weather")?;

    publisher.add_subscriber(&weather_only)?;
    publisher.add_subscriber(&sports_and_weather)?;

    publisher.publish("weather", b"sunny")?;
    publisher.publish("sports", b"goal")?;

    assert_eq!(weather_only.recv()?, b"sunny".to_vec());
    assert!(matches!(weather_only.try_recv(), Err(Error::QueueEmpty)));

    assert_eq!(sports_and_weather.recv()?, b"sunny".to_vec());
    assert_eq!(sports_and_weather.recv()?, b"goal".to_vec());
    Ok(())
}

/// An unmatched topic is never delivered.
#[test]
fn unmatched_topics_are_not_delivered() -> Result<()> {
    setup();
    let publisher = Channel::new(Pattern::Pub)?;
    let subscriber = Channel::with_capacity(Pattern::Sub, 8)?;
    subscriber.subscribe("alpha")?;
    subscriber.subscribe("beta")?;
    publisher.add_subscriber(&subscriber)?;

    publisher.publish("alpha", b"1")?;
    publisher.publish("gamma", b"2")?;
    publisher.publish("beta", b"3")?;

    assert_eq!(subscriber.recv()?, b"1".to_vec());
    assert_eq!(subscriber.recv()?, b"3".to_vec());
    assert!(matches!(subscriber.try_recv(), Err(Error::QueueEmpty)));
    Ok(())
}

/// Unsubscribing stops delivery; unsubscribing an unknown topic errors.
#[test]
fn unsubscribe_removes_the_filter() -> Result<()> {
    setup();
    let publisher = Channel::new(Pattern::Pub)?;
    let subscriber = Channel::with_capacity(Pattern::Sub, 8)?;
    subscriber.subscribe("news")?;
    publisher.add_subscriber(&subscriber)?;

    publisher.publish("news", b"first")?;
    subscriber.unsubscribe("news")?;
    publisher.publish("news", b"second")?;

    assert_eq!(subscriber.recv()?, b"first".to_vec());
    assert!(matches!(subscriber.try_recv(), Err(Error::QueueEmpty)));
    assert!(matches!(
        subscriber.unsubscribe("never-there"),
        Err(Error::NotFound(_))
    ));
    Ok(())
}

/// Subscription callbacks fire once per delivered message.
#[test]
fn subscription_callbacks_observe_deliveries() -> Result<()> {
    setup();
    let publisher = Channel::new(Pattern::Pub)?;
    let subscriber = Channel::with_capacity(Pattern::Sub, 8)?;

    let seen = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&seen);
    subscriber.subscribe_with("ticks", move |msg| {
        assert_eq!(msg.topic(), Some("ticks"));
        counter.fetch_add(1, Ordering::SeqCst);
    })?;
    publisher.add_subscriber(&subscriber)?;

    publisher.publish("ticks", b"t1")?;
    publisher.publish("ticks", b"t2")?;
    publisher.publish("other", b"x")?;

    assert_eq!(seen.load(Ordering::SeqCst), 2);
    assert_eq!(subscriber.recv()?, b"t1".to_vec());
    assert_eq!(subscriber.recv()?, b"t2".to_vec());
    Ok(())
}

/// A full, non-reliable subscriber loses messages and the publisher
/// counts the drops; a dropped subscriber handle is pruned silently.
#[test]
fn slow_subscribers_are_dropped_not_blocking() -> Result<()> {
    setup();
    let publisher = Channel::new(Pattern::Pub)?;
    let tiny = Channel::with_capacity(Pattern::Sub, 1)?;
    tiny.subscribe("feed")?;
    publisher.add_subscriber(&tiny)?;

    publisher.publish("feed", b"kept")?;
    publisher.publish("feed", b"dropped")?;
    assert_eq!(publisher.stats().dropped, 1);

    drop(tiny);
    // Dead subscriber is pruned; publish neither fails nor counts.
    publisher.publish("feed", b"into the void")?;
    assert_eq!(publisher.stats().dropped, 1);
    Ok(())
}

/// Distributed pub/sub over TCP: framed topic records cross the wire and
/// the subscriber's reader filters and counts unmatched topics.
#[test]
fn pubsub_over_tcp_filters_on_the_subscriber() -> Result<()> {
    setup();
    let subscriber = Channel::with_capacity(Pattern::Sub, 16)?;
    subscriber.subscribe("alpha")?;
    subscriber.bind("tcp://127.0.0.1:15611")?;

    let publisher = Channel::new(Pattern::Pub)?;
    publisher.connect("tcp://127.0.0.1:15611")?;
    // Let the subscriber's accept loop pick the connection up.
    thread::sleep(Duration::from_millis(100));

    publisher.publish("alpha", b"match")?;
    publisher.publish("beta", b"no match")?;
    publisher.publish("alpha", b"again")?;

    subscriber.set_timeout(Some(Duration::from_secs(2)));
    assert_eq!(subscriber.recv()?, b"match".to_vec());
    assert_eq!(subscriber.recv()?, b"again".to_vec());

    // The unmatched record was dropped and counted by the subscriber.
    thread::sleep(Duration::from_millis(100));
    assert_eq!(subscriber.stats().dropped, 1);

    publisher.close();
    subscriber.close();
    Ok(())
}

/// A reliable publisher blocks on a slow subscriber instead of dropping,
/// within the configured timeout.
#[test]
fn reliable_publisher_waits_for_room() -> Result<()> {
    setup();
    let publisher = Channel::with_options(
        Pattern::Pub,
        0,
        8,
        ChannelOptions::RELIABLE,
    )?;
    publisher.set_timeout(Some(Duration::from_secs(2)));
    let subscriber = Channel::with_capacity(Pattern::Sub, 1)?;
    subscriber.subscribe("feed")?;
    publisher.add_subscriber(&subscriber)?;

    publisher.publish("feed", b"first")?;

    let drainer = {
        let subscriber = subscriber.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(80));
            subscriber.recv()
        })
    };

    // Queue is full; the reliable publisher waits for the drain.
    publisher.publish("feed", b"second")?;
    assert_eq!(publisher.stats().dropped, 0);

    assert_eq!(drainer.join().unwrap()?, b"first".to_vec());
    assert_eq!(subscriber.recv()?, b"second".to_vec());
    Ok(())
}
