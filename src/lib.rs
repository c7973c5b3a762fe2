//! # In-vehicle pub/sub message plane
//!
//! A four-layer interprocess communication stack for automotive components:
//! a dual-engine network interface (raw Ethernet for cross-host traffic,
//! POSIX shared memory for same-host traffic), a port-keyed protocol layer,
//! and the `Endpoint`/`Gateway`/`Agent` types components are built from.

pub mod agent;
pub mod cli;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod gateway;
pub mod interface;
pub mod link_engine;
pub mod local_engine;
pub mod logging;
pub mod message;
pub mod observer;
pub mod orchestrator;
pub mod periodic;
pub mod pool;
pub mod protocol;
pub mod types;

pub use agent::Agent;
pub use cli::Args;
pub use config::Config;
pub use endpoint::{Endpoint, Role};
pub use error::{CoreError, CoreResult};
pub use gateway::Gateway;
pub use interface::Interface;
pub use message::Message;
pub use protocol::Protocol;
pub use types::{Address, LinkAddress, MessageKind, Period, UnitType};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Defaults for the demo CLI surface (`src/cli.rs`, `src/orchestrator.rs`).
pub mod defaults {
    /// Number of vehicle processes the orchestrator spawns when unset.
    pub const NUM_VEHICLES: usize = 3;
    /// Producer tick period, in milliseconds, when unset.
    pub const PERIOD_MS: u64 = 200;
    /// How long the demo runs before shutting every vehicle down, in seconds.
    pub const TIMEOUT_S: u64 = 15;
    /// Bound on how long a vehicle process is given to exit gracefully
    /// after being asked to stop, before it is killed outright.
    pub const SHUTDOWN_GRACE_S: u64 = 3;
    /// The unit type the demo producer/consumer pair exchanges.
    pub const DEMO_TEMPERATURE: crate::types::UnitType = crate::types::UnitType::new(1, true);
}
