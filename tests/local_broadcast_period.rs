use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use vehicle_comms::agent::Agent;
use vehicle_comms::config::Config;
use vehicle_comms::interface::Interface;
use vehicle_comms::protocol::Protocol;
use vehicle_comms::types::{Address, Period, UnitType};

/// A producer reconciles its periodic cadence to the gcd of every interest
/// it has received: two consumers asking for 90ms and 60ms should converge
/// the producer's tick period to 30ms, not either original value.
#[test]
fn producer_period_reconciles_to_gcd_of_interests() {
    let config = Config::default().with_suffix("local_broadcast_period");
    let interface = Arc::new(Interface::start(&config, config.ethernet_protocol, false).unwrap());
    let protocol = Protocol::new(interface.clone(), config.ethernet_protocol);

    let unit = UnitType::new(5, false);
    let ticks = Arc::new(AtomicUsize::new(0));
    let ticks_for_get = ticks.clone();
    let get = Arc::new(move |_unit: UnitType| {
        ticks_for_get.fetch_add(1, Ordering::Relaxed);
        vec![0u8]
    });

    let producer = Agent::producer(protocol.clone(), Address::new(interface.mac_address(), 100), unit, get, None);

    let consumer_a = Agent::consumer(
        protocol.clone(),
        Address::new(interface.mac_address(), 200),
        unit,
        Period(90_000),
        Box::new(|_| {}),
        None,
    );
    let consumer_b = Agent::consumer(
        protocol.clone(),
        Address::new(interface.mac_address(), 201),
        unit,
        Period(60_000),
        Box::new(|_| {}),
        None,
    );

    // gcd(90_000us, 60_000us) == 30_000us; a 200ms window should see several ticks.
    std::thread::sleep(Duration::from_millis(200));
    let observed = ticks.load(Ordering::Relaxed);
    assert!(observed >= 3, "expected at least 3 ticks at a reconciled 30ms cadence within 200ms, got {observed}");

    consumer_a.stop();
    consumer_b.stop();
    producer.stop();
}
