//! Core identifiers: unit types, periods, message kinds, and addresses.

use std::fmt;

/// Size of the largest Ethernet frame payload the stack will carry.
pub const MTU: usize = 1500;

/// Length in bytes of a link-layer address.
pub const MAC_LEN: usize = 6;

/// Bit 31 of a [`UnitType`] marks the unit as visible off-host.
const EXTERNAL_BIT: u32 = 0x8000_0000;

/// Port reserved for the per-process gateway endpoint.
pub const GATEWAY_PORT: u32 = 0;

/// Port every endpoint additionally subscribes to, used for local relay.
pub const INTERNAL_BROADCAST_PORT: u32 = 1;

/// The lowest port a component may bind to.
pub const MIN_COMPONENT_PORT: u32 = 2;

/// Opaque identifier for a kind of data exchanged over the message plane.
///
/// Bit 31 marks the unit as externally visible; a [`Gateway`](crate::gateway::Gateway)
/// only broadcasts externally-visible units off-host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct UnitType(pub u32);

impl UnitType {
    /// Builds a unit type, optionally marking it externally visible.
    pub const fn new(id: u32, external: bool) -> Self {
        if external {
            UnitType(id | EXTERNAL_BIT)
        } else {
            UnitType(id & !EXTERNAL_BIT)
        }
    }

    /// True if bit 31 is set, i.e. this unit may be forwarded off-host by a gateway.
    pub const fn is_external(self) -> bool {
        self.0 & EXTERNAL_BIT != 0
    }

    /// The logical id with the visibility bit masked off.
    pub const fn id(self) -> u32 {
        self.0 & !EXTERNAL_BIT
    }
}

impl From<u32> for UnitType {
    fn from(raw: u32) -> Self {
        UnitType(raw)
    }
}

impl fmt::Display for UnitType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unit#{}{}", self.id(), if self.is_external() { "*" } else { "" })
    }
}

/// A period in microseconds. Zero means "no timer yet" or "stop".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Period(pub u32);

impl Period {
    pub const STOPPED: Period = Period(0);

    pub const fn is_stopped(self) -> bool {
        self.0 == 0
    }

    pub const fn as_micros(self) -> u32 {
        self.0
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}us", self.0)
    }
}

/// Computes the greatest common divisor of two periods, treating a stopped
/// (zero) period as the identity element so `gcd(0, p) == p`.
pub fn gcd_reconcile(a: Period, b: Period) -> Period {
    Period(gcd_u32(a.0, b.0))
}

fn gcd_u32(mut a: u32, mut b: u32) -> u32 {
    while b != 0 {
        let t = b;
        b = a % b;
        a = t;
    }
    a
}

/// Discriminant for the kind of payload a [`Message`](crate::message::Message) carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    /// A declaration that the sender wants a unit type at a given period.
    Interest,
    /// A publication of a unit type's current value.
    Response,
    /// Reserved for future clock synchronization; never acted upon.
    Ptp,
    /// Reserved for future group-membership messages; never acted upon.
    Join,
}

impl MessageKind {
    pub(crate) fn to_wire(self) -> u8 {
        match self {
            MessageKind::Interest => 1,
            MessageKind::Response => 2,
            MessageKind::Ptp => 3,
            MessageKind::Join => 4,
        }
    }

    pub(crate) fn from_wire(byte: u8) -> Option<Self> {
        match byte {
            1 => Some(MessageKind::Interest),
            2 => Some(MessageKind::Response),
            3 => Some(MessageKind::Ptp),
            4 => Some(MessageKind::Join),
            _ => None,
        }
    }
}

/// A 6-byte link-layer address, e.g. an Ethernet MAC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LinkAddress(pub [u8; MAC_LEN]);

impl LinkAddress {
    pub const NULL: LinkAddress = LinkAddress([0u8; MAC_LEN]);
    pub const BROADCAST: LinkAddress = LinkAddress([0xff; MAC_LEN]);

    pub fn bytes(&self) -> &[u8; MAC_LEN] {
        &self.0
    }
}

impl fmt::Display for LinkAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}", a, b, c, d, e, g)
    }
}

/// A full address: a link-layer address plus a port within that host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Address {
    pub link: LinkAddress,
    pub port: u32,
}

impl Address {
    pub const fn new(link: LinkAddress, port: u32) -> Self {
        Address { link, port }
    }

    /// The reserved destination meaning "every local observer on this host".
    /// Targets [`LinkAddress::NULL`] so [`crate::interface::Interface::send`]
    /// always routes it through the local engine, and `INTERNAL_BROADCAST_PORT`
    /// so every attached endpoint's role-aware filter sees it.
    pub const BROADCAST: Address = Address {
        link: LinkAddress::NULL,
        port: INTERNAL_BROADCAST_PORT,
    };

    /// The off-host counterpart of [`Address::BROADCAST`]: same port, but a
    /// link-layer broadcast MAC so the interface routes it through the link
    /// engine instead. Used only by [`crate::gateway::Gateway`] to relay
    /// externally-visible traffic; deliberately not `GATEWAY_PORT` so the
    /// protocol layer's security check never drops a legitimate relay.
    pub const EXTERNAL_BROADCAST: Address = Address {
        link: LinkAddress::BROADCAST,
        port: INTERNAL_BROADCAST_PORT,
    };

    pub const fn is_broadcast(&self) -> bool {
        self.link.0[0] == 0xff
            && self.link.0[1] == 0xff
            && self.link.0[2] == 0xff
            && self.link.0[3] == 0xff
            && self.link.0[4] == 0xff
            && self.link.0[5] == 0xff
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.link, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn external_bit_round_trips() {
        let u = UnitType::new(7, true);
        assert!(u.is_external());
        assert_eq!(u.id(), 7);
        let u2 = UnitType::new(7, false);
        assert!(!u2.is_external());
        assert_eq!(u2.id(), 7);
    }

    #[test]
    fn gcd_treats_stopped_as_identity() {
        assert_eq!(gcd_reconcile(Period(0), Period(90)), Period(90));
        assert_eq!(gcd_reconcile(Period(90_000), Period(60_000)), Period(30_000));
    }

    #[test]
    fn message_kind_wire_round_trips() {
        for k in [MessageKind::Interest, MessageKind::Response, MessageKind::Ptp, MessageKind::Join] {
            assert_eq!(MessageKind::from_wire(k.to_wire()), Some(k));
        }
        assert_eq!(MessageKind::from_wire(0), None);
    }
}
