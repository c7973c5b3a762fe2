use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use vehicle_comms::config::Config;
use vehicle_comms::interface::Interface;
use vehicle_comms::local_engine::LocalEngine;

/// After its sole owner drops, an interface's event-loop thread has joined
/// and the shared-memory segment it created is unlinked from `/dev/shm`.
#[test]
fn dropping_the_interface_unlinks_shared_memory() {
    let config = Config::default().with_suffix("graceful_shutdown");
    let shm_path = format!("/dev/shm{}", config.shm_name);

    {
        let _interface = Interface::start(&config, config.ethernet_protocol, false).unwrap();
        assert!(Path::new(&shm_path).exists(), "shared-memory segment should exist while the interface is running");
    }

    assert!(!Path::new(&shm_path).exists(), "shared-memory segment should be unlinked once the sole process detaches");
}

/// `stop()` must release a thread currently blocked on a full ring instead
/// of leaving it hanging forever.
#[test]
fn stop_releases_a_thread_blocked_on_a_full_ring() {
    let mut config = Config::default().with_suffix("graceful_shutdown_blocked_send");
    config.ring_capacity = 1;
    let engine = Arc::new(LocalEngine::start(&config).unwrap());
    engine.send(1, b"a").unwrap();

    let blocked = engine.clone();
    let handle = thread::spawn(move || blocked.send(1, b"b"));

    thread::sleep(Duration::from_millis(150));
    assert!(!handle.is_finished(), "send on a full ring must still be blocked");

    engine.stop();
    let result = handle.join().unwrap();
    assert!(result.is_err(), "a send blocked past stop() must return an error, not succeed");
}

/// Calling `stop()` twice on the same engine must not double-decrement the
/// reference count (it would unlink semaphores while a sibling is attached).
#[test]
fn stop_is_idempotent() {
    let config = Config::default().with_suffix("graceful_shutdown_idempotent");
    let first = LocalEngine::start(&config).unwrap();
    let _second = LocalEngine::start(&config).unwrap();

    first.stop();
    first.stop();
    // Only one decrement should have happened; the region is still attached
    // by `_second`, so nothing should have unlinked yet. If `stop()` were not
    // idempotent, the second call would drop the (already-zero) count again
    // and this would be the only process left holding the semaphores.
}
