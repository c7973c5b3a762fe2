//! # Vehicle message-plane demo
//!
//! Parses the CLI surface, wires up colorized logging, then hands off to the
//! orchestrator: with no `--vehicle-id`, this process spawns and supervises
//! `num_vehicles` children; with one, it *is* a vehicle and runs the demo
//! producer/consumer pair directly.

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{filter::LevelFilter, prelude::*, Layer};

use vehicle_comms::cli::Args;
use vehicle_comms::logging::ColorizedFormatter;
use vehicle_comms::orchestrator;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = match args.verbose {
        0 => LevelFilter::WARN,
        1 => LevelFilter::INFO,
        2 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .event_format(ColorizedFormatter)
                .with_filter(log_level),
        )
        .init();

    orchestrator::run(args).await
}
