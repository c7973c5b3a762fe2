//! Per-process bridge between local components and the off-host link.
//!
//! Grounded on `original_source/include/gateway.h`: maintains `producers`
//! and `interests` maps keyed by unit type, relays `INTEREST`s to matching
//! local producers and `RESPONSE`s to matching local consumers, and decides
//! whether an outbound message needs to leave the host at all by checking
//! bit 31 of its unit type ([`UnitType::is_external`]).
//!
//! [`Agent::build`](crate::agent::Agent) registers its endpoint here
//! (`register_producer`/`register_interest`) whenever it is built with a
//! gateway. An externally-visible unit's traffic goes through
//! [`Gateway::send`] exclusively instead of the plain local broadcast, so
//! both the off-host relay and the `subscribe`/`publish` fan-out below are
//! on the path every such message actually takes.

use std::collections::HashMap;
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::endpoint::{Endpoint, Role};
use crate::message::Message;
use crate::observer::Observer;
use crate::protocol::{Packet, Protocol};
use crate::types::{Address, MessageKind, UnitType, GATEWAY_PORT, INTERNAL_BROADCAST_PORT};

/// Per-process bridge endpoint, bound to `GATEWAY_PORT`.
pub struct Gateway {
    endpoint: Arc<Endpoint>,
    producers: Mutex<HashMap<UnitType, Vec<Arc<dyn Observer<Packet, u32>>>>>,
    interests: Mutex<HashMap<UnitType, Vec<Arc<dyn Observer<Packet, u32>>>>>,
    running: std::sync::atomic::AtomicBool,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl Gateway {
    pub fn new(protocol: Arc<Protocol>, own_link: crate::types::LinkAddress) -> Arc<Self> {
        let endpoint = Endpoint::new(protocol, Address::new(own_link, GATEWAY_PORT), Role::Gateway);
        Arc::new(Gateway {
            endpoint,
            producers: Mutex::new(HashMap::new()),
            interests: Mutex::new(HashMap::new()),
            running: std::sync::atomic::AtomicBool::new(false),
            thread: Mutex::new(None),
        })
    }

    /// Registers a local producer endpoint as reachable for `unit`'s
    /// `INTEREST` traffic.
    pub fn register_producer(&self, unit: UnitType, observer: Arc<dyn Observer<Packet, u32>>) {
        self.producers.lock().entry(unit).or_default().push(observer);
        debug!(%unit, "gateway: producer registered");
    }

    /// Registers a local consumer endpoint as reachable for `unit`'s
    /// `RESPONSE` traffic.
    pub fn register_interest(&self, unit: UnitType, observer: Arc<dyn Observer<Packet, u32>>) {
        self.interests.lock().entry(unit).or_default().push(observer);
        debug!(%unit, "gateway: interest registered");
    }

    /// Starts the background relay thread.
    pub fn start(self: &Arc<Self>) {
        self.running.store(true, std::sync::atomic::Ordering::Release);
        let gateway = self.clone();
        let handle = std::thread::Builder::new()
            .name("gateway-relay".into())
            .spawn(move || {
                while gateway.running.load(std::sync::atomic::Ordering::Acquire) {
                    match gateway.endpoint.receive() {
                        Ok(message) => gateway.handle(message),
                        Err(_) => break,
                    }
                }
            })
            .expect("spawning the gateway relay thread");
        *self.thread.lock() = Some(handle);
    }

    pub fn stop(&self) {
        self.running.store(false, std::sync::atomic::Ordering::Release);
        self.endpoint.close();
        if let Some(handle) = self.thread.lock().take() {
            let _ = handle.join();
        }
    }

    /// Sends `message`, relaying off-host first if its unit is externally
    /// visible, then always dispatching it to this gateway's own registered
    /// local producers/interests.
    pub fn send(&self, message: Message) {
        if message.unit_type.is_external() && !self.endpoint.send(&message, Address::EXTERNAL_BROADCAST) {
            warn!(unit = %message.unit_type, "gateway: external broadcast send failed");
        }
        self.handle(message);
    }

    /// Dispatches by kind: `INTEREST` to producers, `RESPONSE` to
    /// consumers, `PTP`/`JOIN` are reserved no-ops.
    fn handle(&self, message: Message) {
        match message.kind {
            MessageKind::Interest => self.subscribe(&message),
            MessageKind::Response => self.publish(&message),
            MessageKind::Ptp | MessageKind::Join => {}
        }
    }

    fn subscribe(&self, message: &Message) {
        let producers = self.producers.lock();
        if let Some(observers) = producers.get(&message.unit_type) {
            let packet = synthetic_packet(message);
            for obs in observers {
                obs.notify(INTERNAL_BROADCAST_PORT, Some(packet.clone()));
            }
        }
    }

    fn publish(&self, message: &Message) {
        let interests = self.interests.lock();
        if let Some(observers) = interests.get(&message.unit_type) {
            let packet = synthetic_packet(message);
            for obs in observers {
                obs.notify(INTERNAL_BROADCAST_PORT, Some(packet.clone()));
            }
        } else {
            info!(unit = %message.unit_type, "gateway: response had no local interest");
        }
    }
}

fn synthetic_packet(message: &Message) -> Packet {
    Packet {
        from: message.origin,
        to_port: INTERNAL_BROADCAST_PORT,
        payload: Arc::new(message.to_bytes().expect("re-encoding a just-decoded message")),
    }
}
