//! Process orchestration for the demo binary.
//!
//! Grounded on `src/coordination.rs`'s `HostCoordinator`: the coordinator
//! process spawns one child per vehicle by re-executing the current binary
//! with a hidden `--vehicle-id` flag, tracks the children in a
//! `tokio::sync::Mutex`-guarded map, and on timeout or `Ctrl-C` asks each one
//! to stop before waiting (bounded) for it to exit. Each vehicle process
//! itself runs [`run_vehicle`]: one [`Interface`]/[`Protocol`] pair, a
//! [`Gateway`], and a demo temperature producer/consumer [`Agent`] pair.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::agent::Agent;
use crate::cli::Args;
use crate::config::Config;
use crate::defaults;
use crate::gateway::Gateway;
use crate::interface::Interface;
use crate::protocol::Protocol;
use crate::types::{Address, Period};

/// Entry point for both the coordinator and a re-exec'd vehicle process,
/// dispatching on whether `--vehicle-id` was passed.
pub async fn run(args: Args) -> Result<()> {
    match args.vehicle_id {
        Some(id) => run_vehicle(id, &args).await,
        None => run_coordinator(args).await,
    }
}

/// Spawns `args.num_vehicles` vehicle processes, waits `args.timeout_s`
/// seconds (or until interrupted), then stops every child gracefully.
async fn run_coordinator(args: Args) -> Result<()> {
    let current_exe = std::env::current_exe().context("resolving the current executable path")?;

    // One suffix shared by every vehicle spawned in this run, so siblings
    // attach to the same shared-memory region and semaphore set instead of
    // each initializing its own (which would make the local engine a
    // same-process loopback instead of a real inter-process ring). Scoped
    // per-run rather than fixed so successive demo runs on one host never
    // collide over a stale, not-yet-unlinked region from a previous run.
    let run_suffix = uuid::Uuid::new_v4().to_string();

    let mut children = HashMap::new();
    for id in 0..args.num_vehicles {
        let mut cmd = Command::new(&current_exe);
        cmd.arg("--vehicle-id")
            .arg(id.to_string())
            .arg("--run-suffix")
            .arg(&run_suffix)
            .arg("--period-ms")
            .arg(args.period_ms.to_string())
            .arg("--timeout-s")
            .arg(args.timeout_s.to_string());
        if let Some(interface) = &args.link_interface {
            cmd.arg("--link-interface").arg(interface);
        }
        for _ in 0..args.verbose {
            cmd.arg("-v");
        }
        cmd.stdin(std::process::Stdio::null());

        let child = cmd.spawn().with_context(|| format!("spawning vehicle process {id}"))?;
        info!(vehicle = id, pid = child.id(), "vehicle process spawned");
        children.insert(id, child);
    }
    let children = Arc::new(Mutex::new(children));

    tokio::select! {
        _ = tokio::time::sleep(Duration::from_secs(args.timeout_s)) => {
            info!(timeout_s = args.timeout_s, "demo timeout elapsed");
        }
        result = tokio::signal::ctrl_c() => {
            if let Err(err) = result {
                warn!(%err, "failed to install ctrl-c handler, shutting down anyway");
            } else {
                info!("interrupted, shutting down");
            }
        }
    }

    shutdown_all(&children).await;
    Ok(())
}

/// Sends every tracked child `SIGTERM`, then gives each one
/// `defaults::SHUTDOWN_GRACE_S` to exit before killing it outright.
async fn shutdown_all(children: &Arc<Mutex<HashMap<usize, Child>>>) {
    let mut guard = children.lock().await;
    for (id, child) in guard.iter() {
        if let Some(pid) = child.id() {
            // SAFETY: `pid` is a valid process id this process just spawned
            // and still holds a handle to; sending SIGTERM to it is safe.
            let result = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
            if result != 0 {
                warn!(vehicle = id, pid, "failed to signal vehicle process");
            }
        }
    }

    let grace = Duration::from_secs(defaults::SHUTDOWN_GRACE_S);
    for (id, child) in guard.iter_mut() {
        match tokio::time::timeout(grace, child.wait()).await {
            Ok(Ok(status)) => info!(vehicle = id, %status, "vehicle process exited"),
            Ok(Err(err)) => warn!(vehicle = id, %err, "error waiting for vehicle process"),
            Err(_) => {
                warn!(vehicle = id, "vehicle process did not exit within grace period, killing");
                let _ = child.kill().await;
            }
        }
    }
}

/// Builds the four layers for one vehicle process and runs its demo
/// producer/consumer pair for `args.timeout_s` seconds.
async fn run_vehicle(id: usize, args: &Args) -> Result<()> {
    // Every vehicle in one run shares the same suffix (or none, for a lone
    // vehicle process started directly rather than through the coordinator)
    // so they all open the *same* shared-memory region and semaphore set.
    // Suffixing by `id` here would give each vehicle its own private region,
    // degenerating the local engine into a same-process loopback.
    let mut config = match &args.run_suffix {
        Some(suffix) => Config::default().with_suffix(suffix),
        None => Config::default(),
    };
    let use_link_engine = if let Some(interface_name) = &args.link_interface {
        config.link_interface = interface_name.clone();
        true
    } else {
        false
    };

    let interface = Arc::new(
        Interface::start(&config, config.ethernet_protocol, use_link_engine)
            .context("starting the vehicle's network interface")?,
    );
    let protocol = Protocol::new(interface.clone(), config.ethernet_protocol);

    let gateway = Gateway::new(protocol.clone(), interface.mac_address());
    gateway.start();

    let unit = defaults::DEMO_TEMPERATURE;
    let period = Period(args.period_ms.saturating_mul(1000) as u32);

    let reading = Arc::new(AtomicU32::new(18));
    let producer_address = Address::new(interface.mac_address(), crate::types::MIN_COMPONENT_PORT);
    let get = {
        let reading = reading.clone();
        Arc::new(move |_unit: crate::types::UnitType| {
            let value = 18 + (reading.fetch_add(1, Ordering::Relaxed) % 10);
            value.to_ne_bytes().to_vec()
        })
    };
    let producer = Agent::producer(protocol.clone(), producer_address, unit, get, Some(gateway.clone()));

    let consumer_address = Address::new(interface.mac_address(), crate::types::MIN_COMPONENT_PORT + 1);
    let on_response = Box::new(move |message: crate::message::Message| {
        if let Ok(bytes) = message.value.as_slice().try_into() {
            let celsius = u32::from_ne_bytes(bytes);
            debug!(vehicle = id, celsius, "vehicle consumer received temperature");
        }
    });
    let consumer = Agent::consumer(protocol.clone(), consumer_address, unit, period, on_response, Some(gateway.clone()));

    info!(vehicle = id, period_ms = args.period_ms, "vehicle running");
    tokio::time::sleep(Duration::from_secs(args.timeout_s)).await;

    consumer.stop();
    producer.stop();
    gateway.stop();
    info!(vehicle = id, "vehicle stopped");
    Ok(())
}
