use std::sync::Arc;

use vehicle_comms::config::Config;
use vehicle_comms::endpoint::{Endpoint, Role};
use vehicle_comms::interface::Interface;
use vehicle_comms::message::Message;
use vehicle_comms::protocol::Protocol;
use vehicle_comms::types::{Address, Period, UnitType};

/// Two endpoints on one process, ports 100 and 200: a direct send must land
/// only on the addressed port, with the origin filled in by the receiver.
#[test]
fn unicast_delivers_to_the_addressed_port() {
    let config = Config::default().with_suffix("local_unicast");
    let interface = Arc::new(Interface::start(&config, config.ethernet_protocol, false).unwrap());
    let protocol = Protocol::new(interface.clone(), config.ethernet_protocol);

    let unit = UnitType::new(7, false);
    let a = Endpoint::new(protocol.clone(), Address::new(interface.mac_address(), 100), Role::Producer { unit });
    let b = Endpoint::new(
        protocol,
        Address::new(interface.mac_address(), 200),
        Role::Consumer { unit, period: Period::STOPPED },
    );

    let message = Message::response(unit, b"abc".to_vec());
    assert!(a.send(&message, b.address()));

    let received = b.receive().unwrap();
    assert_eq!(received.unit_type, unit);
    assert_eq!(received.value, b"abc");
    assert_eq!(received.origin.port, 100);
}
