//! Port-keyed packet layer on top of the [`Interface`].
//!
//! Grounded on `original_source/include/protocol.h`: wraps outbound user
//! data in a `(from_port, to_port, size)` header, fans inbound packets out
//! to whichever observer is attached to the destination port, and enforces
//! the one security rule the original encodes directly in `update()`: a
//! frame that did not originate on this host and targets `GATEWAY_PORT` is
//! dropped before any observer ever sees it.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::CoreError;
use crate::interface::{Interface, OutboundFrame};
use crate::observer::{ConcurrentObserved, Observer};
use crate::types::{Address, GATEWAY_PORT};

const PACKET_HEADER_SIZE: usize = 12;

/// One packet delivered to a port: the sender's full address plus payload.
#[derive(Clone)]
pub struct Packet {
    pub from: Address,
    pub to_port: u32,
    pub payload: Arc<Vec<u8>>,
}

/// The protocol layer. Subscribes to one `Interface` on one protocol number
/// and owns the port-keyed observer registry components attach to.
pub struct Protocol {
    interface: Arc<Interface>,
    protocol_number: u16,
    observed: Arc<ConcurrentObserved<Packet, u32>>,
}

impl Protocol {
    pub fn new(interface: Arc<Interface>, protocol_number: u16) -> Arc<Self> {
        let protocol = Arc::new(Protocol {
            interface: interface.clone(),
            protocol_number,
            observed: Arc::new(ConcurrentObserved::new()),
        });
        interface.attach(protocol_number, protocol.clone() as Arc<dyn Observer<crate::interface::InboundFrame, u16>>);
        protocol
    }

    pub fn attach(&self, port: u32, observer: Arc<dyn Observer<Packet, u32>>) {
        self.observed.attach(port, observer);
        debug!(port, "protocol: observer attached");
    }

    pub fn detach(&self, port: u32, observer: &Arc<dyn Observer<Packet, u32>>) {
        self.observed.detach(port, observer);
        debug!(port, "protocol: observer detached");
    }

    /// Builds the packet header, hands the frame to the interface.
    pub fn send(&self, from: Address, to: Address, data: &[u8]) -> Result<(), CoreError> {
        let mut payload = Vec::with_capacity(PACKET_HEADER_SIZE + data.len());
        payload.extend_from_slice(&from.port.to_ne_bytes());
        payload.extend_from_slice(&to.port.to_ne_bytes());
        payload.extend_from_slice(&(data.len() as u32).to_ne_bytes());
        payload.extend_from_slice(data);

        self.interface.send(OutboundFrame {
            dst: to.link,
            protocol: self.protocol_number,
            payload,
        })
    }
}

impl Observer<crate::interface::InboundFrame, u16> for Protocol {
    fn notify(&self, _condition: u16, item: Option<crate::interface::InboundFrame>) {
        let Some(frame) = item else { return };
        let raw = frame.data();
        if raw.len() < PACKET_HEADER_SIZE {
            warn!(size = raw.len(), "protocol: short frame dropped");
            return;
        }
        let from_port = u32::from_ne_bytes(raw[0..4].try_into().unwrap());
        let to_port = u32::from_ne_bytes(raw[4..8].try_into().unwrap());
        let size = u32::from_ne_bytes(raw[8..12].try_into().unwrap()) as usize;
        if raw.len() < PACKET_HEADER_SIZE + size {
            warn!("protocol: truncated packet dropped");
            return;
        }

        // Security rule: frames from another host may never target the gateway port.
        if frame.src != self.interface.mac_address() && to_port == GATEWAY_PORT {
            warn!(%frame.src, "protocol: dropped externally-sourced frame targeting gateway port");
            return;
        }

        let payload = Arc::new(raw[PACKET_HEADER_SIZE..PACKET_HEADER_SIZE + size].to_vec());
        let packet = Packet {
            from: Address::new(frame.src, from_port),
            to_port,
            payload,
        };
        let delivered = self.observed.notify(to_port, packet);
        if delivered == 0 {
            debug!(to_port, "protocol: no observer for destination port");
        }
    }
}
