use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use vehicle_comms::config::Config;
use vehicle_comms::local_engine::LocalEngine;

/// Filling the ring to capacity must block the next send until a consumer
/// drains at least one slot, never drop the message or return an error.
#[test]
fn send_blocks_on_a_full_ring_until_drained() {
    let mut config = Config::default().with_suffix("backpressure");
    config.ring_capacity = 2;

    let producer = Arc::new(LocalEngine::start(&config).unwrap());
    let consumer = Arc::new(LocalEngine::start(&config).unwrap());

    producer.send(1, b"a").unwrap();
    producer.send(1, b"b").unwrap();

    let blocked_producer = producer.clone();
    let handle = thread::spawn(move || {
        let start = Instant::now();
        blocked_producer.send(1, b"c").unwrap();
        start.elapsed()
    });

    thread::sleep(Duration::from_millis(150));
    assert!(!handle.is_finished(), "send on a full ring must block instead of returning");

    let mut buf = [0u8; 16];
    let mut proto = 0u16;
    let drained = consumer.receive(&mut buf, &mut proto).unwrap();
    assert_eq!(drained, Some(1));
    assert_eq!(&buf[..1], b"a");

    let elapsed = handle.join().unwrap();
    assert!(elapsed < Duration::from_secs(2), "blocked send should unblock promptly once a slot frees up");
}
