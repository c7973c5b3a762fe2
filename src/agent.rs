//! A component on the message plane: an endpoint plus the two behaviors
//! layered on top of it, producing and consuming.
//!
//! Grounded on `original_source/include/agent.h`. The original couples one
//! `Communicator` to one `PeriodicThread` and a `get()`/`handle()` pair the
//! concrete vehicle component overrides; here those are plain closures so a
//! caller can build a producer, a consumer, or both from the same type
//! without subclassing.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::Mutex;
use tracing::warn;

use crate::endpoint::{Endpoint, Role};
use crate::error::CoreError;
use crate::gateway::Gateway;
use crate::message::Message;
use crate::observer::Observer;
use crate::periodic::PeriodicThread;
use crate::protocol::{Packet, Protocol};
use crate::types::{Address, Period, UnitType};

/// Hook invoked on every periodic tick to obtain the unit's current value.
pub type GetHook = Arc<dyn Fn(UnitType) -> Vec<u8> + Send + Sync>;
/// Hook invoked for every accepted `RESPONSE` a consumer role receives.
pub type ResponseHook = Box<dyn Fn(Message) + Send + Sync>;

/// One component: an [`Endpoint`], and for a producing role, the periodic
/// thread that actually publishes its value on the reconciled cadence.
pub struct Agent {
    communicator: Arc<Endpoint>,
    gateway: Option<Arc<Gateway>>,
    periodic: Option<Arc<PeriodicThread>>,
    running: Arc<AtomicBool>,
    receive_thread: Mutex<Option<JoinHandle<()>>>,
}

impl Agent {
    /// Builds a pure producer: reacts to `INTEREST`s for `unit` by starting
    /// (or reconciling) a periodic thread that calls `get` and publishes.
    /// When `gateway` is given, this agent registers with it so that an
    /// externally visible `unit`'s traffic routes through the gateway
    /// instead of the plain local broadcast.
    pub fn producer(
        protocol: Arc<Protocol>,
        address: Address,
        unit: UnitType,
        get: GetHook,
        gateway: Option<Arc<Gateway>>,
    ) -> Arc<Self> {
        Self::build(protocol, address, Role::Producer { unit }, Some(unit), Some(get), None, gateway)
    }

    /// Builds a pure consumer: declares interest in `unit` at `period` and
    /// forwards every accepted `RESPONSE` to `on_response`.
    pub fn consumer(
        protocol: Arc<Protocol>,
        address: Address,
        unit: UnitType,
        period: Period,
        on_response: ResponseHook,
        gateway: Option<Arc<Gateway>>,
    ) -> Arc<Self> {
        let agent = Self::build(protocol, address, Role::Consumer { unit, period }, None, None, Some(on_response), gateway);
        agent.declare_interest(unit, period);
        agent
    }

    /// Builds a component that both produces one unit and consumes another.
    pub fn producer_consumer(
        protocol: Arc<Protocol>,
        address: Address,
        produced: UnitType,
        consumed: UnitType,
        period: Period,
        get: GetHook,
        on_response: ResponseHook,
        gateway: Option<Arc<Gateway>>,
    ) -> Arc<Self> {
        let role = Role::ProducerConsumer { produced, consumed, period };
        let agent = Self::build(protocol, address, role, Some(produced), Some(get), Some(on_response), gateway);
        agent.declare_interest(consumed, period);
        agent
    }

    fn build(
        protocol: Arc<Protocol>,
        address: Address,
        role: Role,
        produced_unit: Option<UnitType>,
        get: Option<GetHook>,
        on_response: Option<ResponseHook>,
        gateway: Option<Arc<Gateway>>,
    ) -> Arc<Self> {
        let communicator = Endpoint::new(protocol, address, role.clone());
        let periodic = produced_unit.map(PeriodicThread::new);

        if let Some(gateway) = &gateway {
            let observer: Arc<dyn Observer<Packet, u32>> = communicator.clone();
            match &role {
                Role::Producer { unit } => gateway.register_producer(*unit, observer),
                Role::Consumer { unit, .. } => gateway.register_interest(*unit, observer),
                Role::ProducerConsumer { produced, consumed, .. } => {
                    gateway.register_producer(*produced, observer.clone());
                    gateway.register_interest(*consumed, observer);
                }
                Role::Gateway => {}
            }
        }

        if let (Some(periodic), Some(get)) = (&periodic, &get) {
            let periodic = periodic.clone();
            let get = get.clone();
            let communicator_for_cb = communicator.clone();
            let gateway_for_cb = gateway.clone();
            communicator.set_interest_period_callback(move |requested_period| {
                periodic.adjust_period(requested_period, communicator_for_cb.clone(), gateway_for_cb.clone(), get.clone());
            });
        }

        let running = Arc::new(AtomicBool::new(true));
        let receive_thread = if let Some(on_response) = on_response {
            let running = running.clone();
            let communicator = communicator.clone();
            Some(
                std::thread::Builder::new()
                    .name("agent-receive".into())
                    .spawn(move || {
                        while running.load(Ordering::Acquire) {
                            match communicator.receive() {
                                Ok(message) => on_response(message),
                                Err(CoreError::ShutdownWake) => break,
                                Err(err) => warn!(%err, "agent receive failed"),
                            }
                        }
                    })
                    .expect("spawning the agent receive thread"),
            )
        } else {
            None
        };

        Arc::new(Agent {
            communicator,
            gateway,
            periodic,
            running,
            receive_thread: Mutex::new(receive_thread),
        })
    }

    pub fn address(&self) -> Address {
        self.communicator.address()
    }

    /// Declares interest explicitly, independent of construction-time
    /// interest declarations; useful for a consumer that changes its
    /// requested period at runtime. An externally visible `unit` routes
    /// exclusively through this agent's gateway (off-host relay plus local
    /// fan-out to its registered producers) instead of the plain local
    /// broadcast, so it is never delivered twice.
    pub fn declare_interest(&self, unit: UnitType, period: Period) -> bool {
        let message = Message::interest(unit, period);
        match (unit.is_external(), &self.gateway) {
            (true, Some(gateway)) => {
                gateway.send(message);
                true
            }
            _ => self.communicator.send(&message, Address::BROADCAST),
        }
    }

    /// Publishes one value immediately, outside the periodic cadence. Same
    /// gateway-exclusive routing as [`Agent::declare_interest`] applies.
    pub fn publish_now(&self, unit: UnitType, value: Vec<u8>) -> bool {
        let message = Message::response(unit, value);
        match (unit.is_external(), &self.gateway) {
            (true, Some(gateway)) => {
                gateway.send(message);
                true
            }
            _ => self.communicator.send(&message, Address::BROADCAST),
        }
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
        self.communicator.close();
        if let Some(periodic) = &self.periodic {
            periodic.stop();
        }
        if let Some(handle) = self.receive_thread.lock().take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Agent {
    fn drop(&mut self) {
        self.stop();
    }
}
