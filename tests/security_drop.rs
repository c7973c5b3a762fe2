use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use vehicle_comms::config::Config;
use vehicle_comms::interface::{InboundFrame, Interface};
use vehicle_comms::observer::Observer;
use vehicle_comms::protocol::{Packet, Protocol};
use vehicle_comms::types::{GATEWAY_PORT, LinkAddress};

struct CountingObserver(AtomicUsize);

impl Observer<Packet, u32> for CountingObserver {
    fn notify(&self, _condition: u32, item: Option<Packet>) {
        if item.is_some() {
            self.0.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// A frame that did not originate on this host and targets `GATEWAY_PORT`
/// must be dropped before any observer sees it, per the protocol layer's
/// one security rule.
#[test]
fn externally_sourced_frame_to_gateway_port_is_dropped() {
    let config = Config::default().with_suffix("security_drop");
    let interface = Arc::new(Interface::start(&config, config.ethernet_protocol, false).unwrap());
    let protocol = Protocol::new(interface.clone(), config.ethernet_protocol);

    let observer = Arc::new(CountingObserver(AtomicUsize::new(0)));
    protocol.attach(GATEWAY_PORT, observer.clone());

    let mut payload = Vec::new();
    payload.extend_from_slice(&50u32.to_ne_bytes()); // from_port
    payload.extend_from_slice(&GATEWAY_PORT.to_ne_bytes()); // to_port
    payload.extend_from_slice(&0u32.to_ne_bytes()); // size
    let frame = InboundFrame {
        src: LinkAddress([1, 2, 3, 4, 5, 6]),
        protocol: config.ethernet_protocol,
        payload: Arc::new(payload),
    };

    protocol.notify(config.ethernet_protocol, Some(frame));

    assert_eq!(observer.0.load(Ordering::Relaxed), 0, "gateway-port observer must not see an externally-sourced frame");
}
