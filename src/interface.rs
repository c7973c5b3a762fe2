//! Dual-engine network interface: buffer pool, routing, and the one thread
//! that multiplexes engine readiness.
//!
//! Grounded on `original_source/include/nic.h`. The original multiplexes an
//! `epoll` set of `{stop_event_fd, external_engine_fd}` plus a `timerfd` for
//! the internal engine. This crate's `LocalEngine::receive` is already
//! non-blocking, so the event loop here polls both engines once per
//! `config.poll_interval` and checks an `AtomicBool` stop flag between
//! iterations — the same wake cadence without needing a raw `epoll_wait`
//! over heterogeneous fd kinds.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::CoreError;
use crate::link_engine::LinkEngine;
use crate::local_engine::LocalEngine;
use crate::observer::ConcurrentObserved;
use crate::pool::{BufferPool, PooledBuffer};
use crate::types::{LinkAddress, MTU};

/// Per-route counters, split internal vs. external like `nic.h`'s `Statistics`.
#[derive(Default)]
pub struct InterfaceStats {
    pub packets_sent_internal: AtomicU64,
    pub packets_sent_external: AtomicU64,
    pub packets_received_internal: AtomicU64,
    pub packets_received_external: AtomicU64,
    pub tx_drops: AtomicU64,
    pub rx_drops: AtomicU64,
}

impl InterfaceStats {
    pub fn snapshot(&self) -> InterfaceStatsSnapshot {
        InterfaceStatsSnapshot {
            packets_sent_internal: self.packets_sent_internal.load(Ordering::Relaxed),
            packets_sent_external: self.packets_sent_external.load(Ordering::Relaxed),
            packets_received_internal: self.packets_received_internal.load(Ordering::Relaxed),
            packets_received_external: self.packets_received_external.load(Ordering::Relaxed),
            tx_drops: self.tx_drops.load(Ordering::Relaxed),
            rx_drops: self.rx_drops.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct InterfaceStatsSnapshot {
    pub packets_sent_internal: u64,
    pub packets_sent_external: u64,
    pub packets_received_internal: u64,
    pub packets_received_external: u64,
    pub tx_drops: u64,
    pub rx_drops: u64,
}

/// A frame ready to be routed, with its destination already filled in.
pub struct OutboundFrame {
    pub dst: LinkAddress,
    pub protocol: u16,
    pub payload: Vec<u8>,
}

/// Notification payload handed up to [`Protocol`](crate::protocol::Protocol):
/// the source link address plus the received frame.
///
/// `payload` is the pool buffer the frame was received into, kept alive by
/// the `Arc` for as long as any observer still holds this frame; it returns
/// to the pool once the last clone (typically the one `Protocol::notify`
/// reads from) is dropped. `offset`/`len` mark the valid bytes within it —
/// `offset` skips the link-layer header on frames that arrived externally.
#[derive(Clone)]
pub struct InboundFrame {
    pub src: LinkAddress,
    pub protocol: u16,
    pub payload: Arc<PooledBuffer>,
    pub offset: usize,
    pub len: usize,
}

impl InboundFrame {
    pub fn data(&self) -> &[u8] {
        &self.payload[self.offset..self.offset + self.len]
    }
}

/// Owns both engines, the frame buffer pool, and the event loop thread.
pub struct Interface {
    mac: LinkAddress,
    link_engine: Option<Arc<LinkEngine>>,
    local_engine: Arc<LocalEngine>,
    pool: BufferPool,
    stats: Arc<InterfaceStats>,
    running: Arc<AtomicBool>,
    observed: Arc<ConcurrentObserved<InboundFrame, u16>>,
    thread: Option<JoinHandle<()>>,
}

impl Interface {
    /// Starts both engines (the link engine only if a real interface is
    /// configured) and the event loop thread.
    pub fn start(config: &Config, protocol_number: u16, use_link_engine: bool) -> Result<Self, CoreError> {
        let local_engine = Arc::new(LocalEngine::start(config)?);
        let link_engine = if use_link_engine {
            Some(Arc::new(LinkEngine::start(&config.link_interface)?))
        } else {
            None
        };
        let mac = link_engine
            .as_ref()
            .map(|e| e.mac_address())
            .unwrap_or(LinkAddress::NULL);

        let pool = BufferPool::new(config.pool_size(), config.mtu);
        let stats = Arc::new(InterfaceStats::default());
        let observed = Arc::new(ConcurrentObserved::new());
        let running = Arc::new(AtomicBool::new(true));

        let thread = {
            let running = running.clone();
            let local_engine = local_engine.clone();
            let link_engine = link_engine.clone();
            let observed = observed.clone();
            let stats = stats.clone();
            let pool_for_loop = pool.clone();
            let poll_interval = config.poll_interval;
            let mac_for_loop = mac;
            std::thread::Builder::new()
                .name("interface-event-loop".into())
                .spawn(move || {
                    event_loop(
                        running,
                        local_engine,
                        link_engine,
                        observed,
                        stats,
                        pool_for_loop,
                        poll_interval,
                        mac_for_loop,
                        protocol_number,
                    );
                })
                .expect("spawning the interface event loop thread")
        };

        info!(mac = %mac, "interface started");
        Ok(Interface {
            mac,
            link_engine,
            local_engine,
            pool,
            stats,
            running,
            observed,
            thread: Some(thread),
        })
    }

    pub fn mac_address(&self) -> LinkAddress {
        self.mac
    }

    pub fn stats(&self) -> InterfaceStatsSnapshot {
        self.stats.snapshot()
    }

    pub fn attach(&self, protocol_number: u16, observer: Arc<dyn crate::observer::Observer<InboundFrame, u16>>) {
        self.observed.attach(protocol_number, observer);
    }

    /// Routes by destination: own MAC goes to the local engine, anything
    /// else to the link engine (or is dropped if none is configured). Checks
    /// out a pool buffer, fills it with the frame actually transmitted, and
    /// lets it return to the pool once this call is done with it.
    pub fn send(&self, frame: OutboundFrame) -> Result<(), CoreError> {
        let mut buf = self.pool.allocate()?;
        if frame.dst == self.mac || frame.dst == LinkAddress::NULL {
            buf.clear();
            buf.extend_from_slice(&frame.payload);
            self.local_engine.send(frame.protocol, &buf)?;
            self.stats.packets_sent_internal.fetch_add(1, Ordering::Relaxed);
            Ok(())
        } else if let Some(link) = &self.link_engine {
            buf.clear();
            buf.extend_from_slice(&frame.dst.0);
            buf.extend_from_slice(&self.mac.0);
            buf.extend_from_slice(&frame.protocol.to_be_bytes());
            buf.extend_from_slice(&frame.payload);
            link.send(&buf)?;
            self.stats.packets_sent_external.fetch_add(1, Ordering::Relaxed);
            Ok(())
        } else {
            self.stats.tx_drops.fetch_add(1, Ordering::Relaxed);
            Err(CoreError::TransportDown("no link engine configured for external send".into()))
        }
    }

    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
        self.local_engine.stop();
        if let Some(link) = &self.link_engine {
            link.stop();
        }
        warn!("interface stopped");
    }
}

impl Drop for Interface {
    fn drop(&mut self) {
        self.stop();
    }
}

fn event_loop(
    running: Arc<AtomicBool>,
    local_engine: Arc<LocalEngine>,
    link_engine: Option<Arc<LinkEngine>>,
    observed: Arc<ConcurrentObserved<InboundFrame, u16>>,
    stats: Arc<InterfaceStats>,
    pool: BufferPool,
    poll_interval: std::time::Duration,
    self_mac: LinkAddress,
    protocol_number: u16,
) {
    while running.load(Ordering::Acquire) {
        let mut proto = 0u16;
        match pool.allocate() {
            Ok(mut buf) => match local_engine.receive(&mut buf, &mut proto) {
                Ok(Some(size)) => {
                    stats.packets_received_internal.fetch_add(1, Ordering::Relaxed);
                    let frame = InboundFrame {
                        src: self_mac,
                        protocol: proto,
                        payload: Arc::new(buf),
                        offset: 0,
                        len: size,
                    };
                    deliver(&observed, &stats, protocol_number, frame);
                }
                Ok(None) => {}
                Err(err) => {
                    warn!(%err, "local engine receive failed");
                }
            },
            Err(err) => {
                stats.rx_drops.fetch_add(1, Ordering::Relaxed);
                warn!(%err, "no free frame buffer for local engine receive");
            }
        }

        if let Some(link) = &link_engine {
            match pool.allocate() {
                Ok(mut buf) => {
                    let recv_buf: &mut [u8; MTU] = (&mut buf[..]).try_into().expect("pool frame size matches MTU");
                    match link.receive(recv_buf) {
                        Ok(n) if n >= 14 => {
                            let src = LinkAddress(buf[6..12].try_into().unwrap());
                            let dst = LinkAddress(buf[0..6].try_into().unwrap());
                            // Self-loop suppression: never deliver our own transmissions.
                            if src == self_mac {
                                continue;
                            }
                            if dst != self_mac && !dst.bytes().iter().all(|b| *b == 0xff) {
                                continue;
                            }
                            let wire_protocol = u16::from_be_bytes([buf[12], buf[13]]);
                            stats.packets_received_external.fetch_add(1, Ordering::Relaxed);
                            let frame = InboundFrame {
                                src,
                                protocol: wire_protocol,
                                payload: Arc::new(buf),
                                offset: 14,
                                len: n - 14,
                            };
                            deliver(&observed, &stats, protocol_number, frame);
                        }
                        Ok(0) => {}
                        Ok(_) => {
                            stats.rx_drops.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(err) => {
                            warn!(%err, "link engine receive failed");
                        }
                    }
                }
                Err(err) => {
                    stats.rx_drops.fetch_add(1, Ordering::Relaxed);
                    warn!(%err, "no free frame buffer for link engine receive");
                }
            }
        }

        std::thread::sleep(poll_interval);
    }
}

fn deliver(
    observed: &ConcurrentObserved<InboundFrame, u16>,
    stats: &InterfaceStats,
    protocol_number: u16,
    frame: InboundFrame,
) {
    if frame.protocol != protocol_number {
        stats.rx_drops.fetch_add(1, Ordering::Relaxed);
        return;
    }
    let delivered = observed.notify(protocol_number, frame);
    if delivered == 0 {
        stats.rx_drops.fetch_add(1, Ordering::Relaxed);
        debug!(protocol_number, "inbound frame had no subscriber");
    }
}
