//! A self-adjusting periodic publisher thread.
//!
//! Grounded on `original_source/include/periodicThread.h`. Starts idle
//! (period `0`, meaning "no timer yet"); the first `INTEREST` for the
//! produced unit starts it, and every subsequent `INTEREST` reconciles its
//! period against the requested one via [`gcd_reconcile`] so the fastest
//! subscriber's cadence always wins without ever sending faster than any
//! one consumer asked for.
//!
//! `periodicThread.h`'s `run()` built a `RESPONSE` and hands it to
//! `reply()`, but `agent.h`'s `reply()` only constructed the message and
//! never called send on it — a message built on every tick and never
//! transmitted. The tick body here does both in one step.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::debug;

use crate::endpoint::Endpoint;
use crate::gateway::Gateway;
use crate::message::Message;
use crate::types::{gcd_reconcile, Address, Period, UnitType};

/// How often the thread re-checks its period and the running flag while
/// idle (period `0`), so a late-arriving first `INTEREST` is picked up
/// promptly instead of sleeping indefinitely.
const IDLE_POLL: Duration = Duration::from_millis(50);

/// Builds and sends one `RESPONSE` per tick through the owning endpoint.
pub struct PeriodicThread {
    unit: UnitType,
    period: Mutex<Period>,
    running: AtomicBool,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl PeriodicThread {
    pub fn new(unit: UnitType) -> Arc<Self> {
        Arc::new(PeriodicThread {
            unit,
            period: Mutex::new(Period::STOPPED),
            running: AtomicBool::new(false),
            handle: Mutex::new(None),
        })
    }

    pub fn current_period(&self) -> Period {
        *self.period.lock()
    }

    /// Reconciles `requested` into the running period and starts the
    /// background thread on first call.
    pub fn adjust_period(
        self: &Arc<Self>,
        requested: Period,
        endpoint: Arc<Endpoint>,
        gateway: Option<Arc<Gateway>>,
        get: Arc<dyn Fn(UnitType) -> Vec<u8> + Send + Sync>,
    ) {
        let mut period = self.period.lock();
        *period = gcd_reconcile(*period, requested);
        debug!(unit = %self.unit, period = %*period, "periodic thread period reconciled");
        drop(period);

        if !self.running.swap(true, Ordering::AcqRel) {
            let thread_self = self.clone();
            let handle = std::thread::Builder::new()
                .name(format!("periodic-{}", self.unit))
                .spawn(move || thread_self.tick_loop(endpoint, gateway, get))
                .expect("spawning the periodic publisher thread");
            *self.handle.lock() = Some(handle);
        }
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.handle.lock().take() {
            let _ = handle.join();
        }
    }

    fn tick_loop(
        &self,
        endpoint: Arc<Endpoint>,
        gateway: Option<Arc<Gateway>>,
        get: Arc<dyn Fn(UnitType) -> Vec<u8> + Send + Sync>,
    ) {
        while self.running.load(Ordering::Acquire) {
            let period = *self.period.lock();
            if period.is_stopped() {
                std::thread::sleep(IDLE_POLL);
                continue;
            }
            std::thread::sleep(Duration::from_micros(period.as_micros() as u64));
            if !self.running.load(Ordering::Acquire) {
                break;
            }
            let value = get(self.unit);
            let message = Message::response(self.unit, value);
            let sent = match (self.unit.is_external(), &gateway) {
                (true, Some(gateway)) => {
                    gateway.send(message);
                    true
                }
                _ => endpoint.send(&message, Address::BROADCAST),
            };
            if !sent {
                debug!(unit = %self.unit, "periodic tick failed to send response");
            }
        }
    }
}

impl Drop for PeriodicThread {
    fn drop(&mut self) {
        self.stop();
    }
}
