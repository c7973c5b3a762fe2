//! Runtime-overridable constants for the message plane.
//!
//! The specification calls these "compile-time constants", but in keeping
//! with the teacher's `TransportConfig` (`src/ipc/mod.rs`), every value is a
//! plain struct field with a sensible [`Default`] so tests can override any
//! of them (e.g. to suffix shared-memory names per test run).

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::types::MTU;

/// Number of slots in the local engine's shared-memory ring.
pub const DEFAULT_RING_CAPACITY: usize = 64;

/// Ethernet protocol number (network byte order on the wire) this stack uses.
pub const DEFAULT_ETHERNET_PROTOCOL: u16 = 0x8000;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    /// Largest frame payload, in bytes.
    pub mtu: usize,
    /// Number of slots in the shared-memory ring (`Q`).
    pub ring_capacity: usize,
    /// Ethernet protocol number frames must carry to be accepted.
    pub ethernet_protocol: u16,
    /// How often the local engine's receive side is polled.
    #[serde(with = "duration_millis")]
    pub poll_interval: Duration,
    /// Frame buffers reserved for outbound traffic in the interface pool.
    pub send_buffers: usize,
    /// Frame buffers reserved for inbound traffic in the interface pool.
    pub receive_buffers: usize,
    /// Host network interface the link engine binds to (e.g. `"eth0"`).
    pub link_interface: String,
    /// Base name of the shared-memory region backing the local engine.
    pub shm_name: String,
    /// Name of the named semaphore guarding ring index mutation.
    pub shm_mutex_name: String,
    /// Name of the named semaphore counting filled slots.
    pub shm_items_name: String,
    /// Name of the named semaphore counting free slots.
    pub shm_space_name: String,
    /// Bound on how long a late-joining process spin-waits for the first
    /// process to finish initializing the shared region.
    #[serde(with = "duration_millis")]
    pub attach_timeout: Duration,
}

impl Config {
    /// Total frame buffers the interface pool pre-allocates.
    pub fn pool_size(&self) -> usize {
        self.send_buffers + self.receive_buffers
    }

    /// Suffixes every shared-memory / semaphore name, so concurrent test
    /// processes (or concurrent vehicles on one host) never collide. Mirrors
    /// the teacher's pattern of suffixing `shared_memory_name` with a
    /// freshly generated UUID in `src/ipc/shared_memory.rs`'s test module.
    pub fn with_suffix(mut self, suffix: &str) -> Self {
        self.shm_name = format!("{}_{}", self.shm_name, suffix);
        self.shm_mutex_name = format!("{}_{}", self.shm_mutex_name, suffix);
        self.shm_items_name = format!("{}_{}", self.shm_items_name, suffix);
        self.shm_space_name = format!("{}_{}", self.shm_space_name, suffix);
        self
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            mtu: MTU,
            ring_capacity: DEFAULT_RING_CAPACITY,
            ethernet_protocol: DEFAULT_ETHERNET_PROTOCOL,
            poll_interval: Duration::from_millis(10),
            send_buffers: 16,
            receive_buffers: 16,
            link_interface: "lo".to_string(),
            shm_name: "/vehicle_internal_shm".to_string(),
            shm_mutex_name: "/vehicle_shm_mutex".to_string(),
            shm_items_name: "/vehicle_shm_items".to_string(),
            shm_space_name: "/vehicle_shm_space".to_string(),
            attach_timeout: Duration::from_secs(5),
        }
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn suffix_applies_to_all_shm_names() {
        let cfg = Config::default().with_suffix("test123");
        assert!(cfg.shm_name.ends_with("test123"));
        assert!(cfg.shm_mutex_name.ends_with("test123"));
        assert!(cfg.shm_items_name.ends_with("test123"));
        assert!(cfg.shm_space_name.ends_with("test123"));
    }

    #[test]
    fn pool_size_sums_buffers() {
        let cfg = Config::default();
        assert_eq!(cfg.pool_size(), cfg.send_buffers + cfg.receive_buffers);
    }
}
