//! A port on the protocol layer: blocking send/receive plus the role-aware
//! filter that decides what actually reaches the owning component.
//!
//! Grounded on `original_source/include/communicator.h`. Every endpoint
//! attaches under its own port *and* under `INTERNAL_BROADCAST_PORT`, so a
//! `Gateway` relaying traffic locally reaches every interested endpoint with
//! one notification. The filter table in `Communicator::update()` is
//! reproduced verbatim in [`Endpoint::notify`].

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::CoreError;
use crate::message::Message;
use crate::observer::{Mailbox, Observer};
use crate::protocol::{Packet, Protocol};
use crate::types::{Address, MessageKind, Period, UnitType, GATEWAY_PORT, INTERNAL_BROADCAST_PORT, MTU};

/// The role an endpoint plays, which determines the filter applied to
/// inbound traffic on `INTERNAL_BROADCAST_PORT`.
#[derive(Clone)]
pub enum Role {
    /// Sits on `GATEWAY_PORT`; every arrival on its own port is enqueued.
    Gateway,
    /// Publishes one unit type; reacts only to matching `INTEREST`s.
    Producer { unit: UnitType },
    /// Subscribes to one unit type at a declared period.
    Consumer { unit: UnitType, period: Period },
    /// Both at once (an agent that both produces and consumes).
    ProducerConsumer { produced: UnitType, consumed: UnitType, period: Period },
}

struct ConsumerState {
    last_accepted_us: Option<u64>,
}

/// One endpoint: a `(Protocol, Address)` pair with a role and a mailbox.
pub struct Endpoint {
    protocol: Arc<Protocol>,
    address: Address,
    role: Role,
    closed: AtomicBool,
    mailbox: Mailbox<Packet>,
    consumer_state: Mutex<ConsumerState>,
    interest_callback: Mutex<Option<Box<dyn Fn(Period) + Send + Sync>>>,
    now_us: Box<dyn Fn() -> u64 + Send + Sync>,
    /// Set once after construction so `Drop` can detach the same `Arc` that
    /// was handed to the protocol layer at attach time.
    self_ref: Mutex<Option<Arc<dyn Observer<Packet, u32>>>>,
}

impl Endpoint {
    /// Builds and attaches the endpoint. It registers under its own port,
    /// and additionally under `INTERNAL_BROADCAST_PORT` unless its own port
    /// already is that port (the gateway's case).
    pub fn new(protocol: Arc<Protocol>, address: Address, role: Role) -> Arc<Self> {
        Self::with_clock(protocol, address, role, Box::new(default_now_us))
    }

    /// Test hook: inject a deterministic clock so period-filter tests don't
    /// depend on wall-clock timing.
    pub fn with_clock(
        protocol: Arc<Protocol>,
        address: Address,
        role: Role,
        now_us: Box<dyn Fn() -> u64 + Send + Sync>,
    ) -> Arc<Self> {
        let endpoint = Arc::new(Endpoint {
            protocol: protocol.clone(),
            address,
            role,
            closed: AtomicBool::new(false),
            mailbox: Mailbox::new(),
            consumer_state: Mutex::new(ConsumerState { last_accepted_us: None }),
            interest_callback: Mutex::new(None),
            now_us,
            self_ref: Mutex::new(None),
        });
        let as_observer: Arc<dyn Observer<Packet, u32>> = endpoint.clone();
        protocol.attach(address.port, as_observer.clone());
        if address.port != INTERNAL_BROADCAST_PORT {
            protocol.attach(INTERNAL_BROADCAST_PORT, as_observer.clone());
        }
        *endpoint.self_ref.lock() = Some(as_observer);
        endpoint
    }

    pub fn address(&self) -> Address {
        self.address
    }

    /// Registers the callback invoked (with the declared period) whenever a
    /// matching `INTEREST` arrives for a producer-role endpoint.
    pub fn set_interest_period_callback(&self, callback: impl Fn(Period) + Send + Sync + 'static) {
        *self.interest_callback.lock() = Some(Box::new(callback));
    }

    /// Refuses when closed, empty, or over the wire's maximum size;
    /// otherwise delegates to the protocol layer.
    pub fn send(&self, message: &Message, destination: Address) -> bool {
        if self.closed.load(Ordering::Acquire) {
            warn!(address = %self.address, "send on closed endpoint");
            return false;
        }
        let bytes = match message.to_bytes() {
            Ok(b) => b,
            Err(err) => {
                warn!(%err, "send failed to encode message");
                return false;
            }
        };
        if bytes.len() > MTU {
            warn!(size = bytes.len(), "send rejected oversize message");
            return false;
        }
        match self.protocol.send(self.address, destination, &bytes) {
            Ok(()) => true,
            Err(err) => {
                warn!(%err, "protocol send failed");
                false
            }
        }
    }

    /// Blocks until a packet arrives or the endpoint closes. Deserializes
    /// the message and overwrites its origin with the sender's address.
    pub fn receive(&self) -> Result<Message, CoreError> {
        match self.mailbox.recv() {
            Some(packet) => {
                let mut message = Message::from_bytes(&packet.payload)?;
                message.origin = packet.from;
                Ok(message)
            }
            None => Err(CoreError::ShutdownWake),
        }
    }

    /// Flips the closed flag and wakes exactly one pending receiver.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.mailbox.wake_empty();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl Observer<Packet, u32> for Endpoint {
    /// Reproduces the role-aware filter table: what arrives on which port,
    /// for which role, decides whether it is enqueued, fed to a callback,
    /// or dropped.
    fn notify(&self, condition: u32, item: Option<Packet>) {
        let Some(packet) = item else {
            // Close sentinel forwarded from a lower layer; just wake.
            self.mailbox.wake_empty();
            return;
        };

        if condition == self.address.port {
            self.mailbox.post(packet);
            return;
        }

        if condition == INTERNAL_BROADCAST_PORT {
            let message = match Message::from_bytes(&packet.payload) {
                Ok(m) => m,
                Err(err) => {
                    warn!(%err, "dropped malformed broadcast packet");
                    return;
                }
            };
            match &self.role {
                Role::Producer { unit } | Role::ProducerConsumer { produced: unit, .. } => {
                    if message.kind == MessageKind::Interest && message.unit_type == *unit {
                        if let Some(cb) = self.interest_callback.lock().as_ref() {
                            cb(message.period);
                        }
                    }
                }
                _ => {}
            }
            match &self.role {
                Role::Consumer { unit, period } | Role::ProducerConsumer { consumed: unit, period, .. } => {
                    if message.kind == MessageKind::Response && message.unit_type == *unit {
                        let now = (self.now_us)();
                        let mut state = self.consumer_state.lock();
                        let accept = match state.last_accepted_us {
                            None => true,
                            Some(last) => period.is_stopped() || now.saturating_sub(last) >= period.as_micros() as u64,
                        };
                        if accept {
                            state.last_accepted_us = Some(now);
                            drop(state);
                            self.mailbox.post(packet);
                        }
                    }
                }
                _ => {}
            }
            return;
        }

        debug!(port = condition, address = %self.address, "endpoint dropped packet for foreign port");
    }
}

impl Drop for Endpoint {
    fn drop(&mut self) {
        self.close();
        if let Some(observer) = self.self_ref.lock().take() {
            self.protocol.detach(self.address.port, &observer);
            if self.address.port != INTERNAL_BROADCAST_PORT {
                self.protocol.detach(INTERNAL_BROADCAST_PORT, &observer);
            }
        }
    }
}

fn default_now_us() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::interface::Interface;
    use std::sync::atomic::AtomicU64;

    fn test_protocol(suffix: &str) -> Arc<Protocol> {
        let config = Config::default().with_suffix(suffix);
        let interface = Arc::new(Interface::start(&config, config.ethernet_protocol, false).unwrap());
        Protocol::new(interface, config.ethernet_protocol)
    }

    #[test]
    fn gateway_port_always_enqueues() {
        let protocol = test_protocol("endpoint_gateway");
        let gateway_addr = Address::new(crate::types::LinkAddress::NULL, GATEWAY_PORT);
        let endpoint = Endpoint::new(protocol.clone(), gateway_addr, Role::Gateway);

        let msg = Message::response(UnitType::new(1, false), vec![9]);
        let packet = Packet {
            from: Address::new(crate::types::LinkAddress::NULL, 50),
            to_port: GATEWAY_PORT,
            payload: Arc::new(msg.to_bytes().unwrap()),
        };
        endpoint.notify(GATEWAY_PORT, Some(packet));
        let received = endpoint.receive().unwrap();
        assert_eq!(received.value, vec![9]);
    }

    #[test]
    fn consumer_enforces_period_filter() {
        let protocol = test_protocol("endpoint_period");
        let unit = UnitType::new(3, false);
        let clock = Arc::new(AtomicU64::new(0));
        let clock_for_closure = clock.clone();
        let addr = Address::new(crate::types::LinkAddress::NULL, 300);
        let endpoint = Endpoint::with_clock(
            protocol,
            addr,
            Role::Consumer { unit, period: Period(1000) },
            Box::new(move || clock_for_closure.load(Ordering::SeqCst)),
        );

        let make_packet = || Packet {
            from: Address::new(crate::types::LinkAddress::NULL, 1),
            to_port: INTERNAL_BROADCAST_PORT,
            payload: Arc::new(Message::response(unit, vec![1]).to_bytes().unwrap()),
        };

        endpoint.notify(INTERNAL_BROADCAST_PORT, Some(make_packet()));
        clock.store(500, Ordering::SeqCst);
        endpoint.notify(INTERNAL_BROADCAST_PORT, Some(make_packet()));
        clock.store(1500, Ordering::SeqCst);
        endpoint.notify(INTERNAL_BROADCAST_PORT, Some(make_packet()));

        assert!(endpoint.receive().is_ok());
        assert!(endpoint.receive().is_ok());
        // the 500us delivery must have been rejected: mailbox should be drained
    }
}
