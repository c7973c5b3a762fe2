//! Wire-format message: a typed, fixed-max-size record carried inside a
//! protocol packet's user data.
//!
//! The byte layout below is fixed by the external interface and is not
//! delegated to `bincode`/`serde`, because the receiving layer must be able
//! to read a MAC address and four u32 fields at exact offsets:
//!
//! ```text
//! offset  size  field
//! 0       1     kind
//! 1       6+4   origin (link addr + port) -- sender-filled on receive
//! 11      4     unit_type
//! 15      4     period_us
//! 19      4     value_size
//! 23      V     value bytes
//! ```

use crate::error::CoreError;
use crate::types::{Address, LinkAddress, MessageKind, Period, UnitType, MAC_LEN, MTU};

/// Offset of the first value byte; also the minimum encoded message size.
pub const HEADER_SIZE: usize = 23;

/// Largest value payload a [`Message`] may carry while still fitting the MTU
/// once wrapped in a protocol packet header and link frame header.
pub const MAX_VALUE_SIZE: usize = MTU - HEADER_SIZE;

/// A single pub/sub message: kind, origin, unit type, period, and value bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub kind: MessageKind,
    /// Populated by the receiving layer from the transport headers; a
    /// freshly-built outbound message carries [`Address::BROADCAST`] here
    /// until the protocol layer overwrites it on the wire.
    pub origin: Address,
    pub unit_type: UnitType,
    pub period: Period,
    pub value: Vec<u8>,
}

impl Message {
    /// Builds an `INTEREST` message for `unit_type` at the given period.
    pub fn interest(unit_type: UnitType, period: Period) -> Self {
        Message {
            kind: MessageKind::Interest,
            origin: Address::BROADCAST,
            unit_type,
            period,
            value: Vec::new(),
        }
    }

    /// Builds a `RESPONSE` message carrying `value` for `unit_type`.
    pub fn response(unit_type: UnitType, value: Vec<u8>) -> Self {
        Message {
            kind: MessageKind::Response,
            origin: Address::BROADCAST,
            unit_type,
            period: Period::STOPPED,
            value,
        }
    }

    /// Total encoded size, including the fixed header.
    pub fn encoded_len(&self) -> usize {
        HEADER_SIZE + self.value.len()
    }

    /// Serializes this message to its fixed-offset wire form.
    pub fn to_bytes(&self) -> Result<Vec<u8>, CoreError> {
        if self.value.len() > MAX_VALUE_SIZE {
            return Err(CoreError::OversizeMessage {
                size: self.encoded_len(),
                max: HEADER_SIZE + MAX_VALUE_SIZE,
            });
        }
        let mut out = Vec::with_capacity(self.encoded_len());
        out.push(self.kind.to_wire());
        out.extend_from_slice(&self.origin.link.0);
        out.extend_from_slice(&self.origin.port.to_ne_bytes());
        out.extend_from_slice(&self.unit_type.0.to_ne_bytes());
        out.extend_from_slice(&self.period.0.to_ne_bytes());
        out.extend_from_slice(&(self.value.len() as u32).to_ne_bytes());
        out.extend_from_slice(&self.value);
        Ok(out)
    }

    /// Parses a message from its wire form. `origin` is whatever was encoded;
    /// the caller (protocol/endpoint layer) is expected to overwrite it with
    /// the address the frame actually arrived from.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CoreError> {
        if bytes.len() < HEADER_SIZE {
            return Err(CoreError::ShortFrame { size: bytes.len() });
        }
        let kind = MessageKind::from_wire(bytes[0]).ok_or(CoreError::ShortFrame { size: bytes.len() })?;
        let mut mac = [0u8; MAC_LEN];
        mac.copy_from_slice(&bytes[1..7]);
        let port = u32::from_ne_bytes(bytes[7..11].try_into().unwrap());
        let unit_type = UnitType(u32::from_ne_bytes(bytes[11..15].try_into().unwrap()));
        let period = Period(u32::from_ne_bytes(bytes[15..19].try_into().unwrap()));
        let value_size = u32::from_ne_bytes(bytes[19..23].try_into().unwrap()) as usize;
        if bytes.len() < HEADER_SIZE + value_size {
            return Err(CoreError::UserBufferTooSmall {
                needed: HEADER_SIZE + value_size,
                available: bytes.len(),
            });
        }
        let value = bytes[HEADER_SIZE..HEADER_SIZE + value_size].to_vec();
        Ok(Message {
            kind,
            origin: Address::new(LinkAddress(mac), port),
            unit_type,
            period,
            value,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Round-trip property from the testable-properties table: for every
    /// message, `deserialize(serialize(m)) == m` except for the origin field,
    /// which the receiving layer always overwrites anyway.
    #[test]
    fn round_trips_except_origin() {
        let msg = Message::response(UnitType::new(42, true), vec![1, 2, 3, 4]);
        let bytes = msg.to_bytes().unwrap();
        let decoded = Message::from_bytes(&bytes).unwrap();
        assert_eq!(decoded.kind, msg.kind);
        assert_eq!(decoded.unit_type, msg.unit_type);
        assert_eq!(decoded.period, msg.period);
        assert_eq!(decoded.value, msg.value);
    }

    #[test]
    fn oversize_value_is_rejected() {
        let msg = Message::response(UnitType::new(1, false), vec![0u8; MAX_VALUE_SIZE + 1]);
        assert!(matches!(msg.to_bytes(), Err(CoreError::OversizeMessage { .. })));
    }

    #[test]
    fn short_buffer_is_rejected() {
        assert!(matches!(Message::from_bytes(&[1, 2, 3]), Err(CoreError::ShortFrame { .. })));
    }
}
