//! # Command-line interface
//!
//! Argument parsing for the demo orchestrator binary, built with the same
//! `clap` derive API the teacher used for its benchmark CLI.

use clap::{
    builder::styling::{AnsiColor, Styles},
    Parser,
};

/// Defines the styles for the help message to replicate clap v3's appearance.
fn styles() -> Styles {
    Styles::styled()
        .header(AnsiColor::Yellow.on_default())
        .usage(AnsiColor::Yellow.on_default())
        .literal(AnsiColor::Green.on_default())
        .placeholder(AnsiColor::Green.on_default())
}

/// Spawns `num_vehicles` demo vehicle processes, each running a gateway, a
/// temperature producer, and a temperature consumer, for `timeout_s` seconds
/// (or until interrupted).
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None, styles = styles())]
pub struct Args {
    /// Number of vehicle processes to spawn
    #[arg(default_value_t = crate::defaults::NUM_VEHICLES)]
    pub num_vehicles: usize,

    /// Producer tick period, in milliseconds
    #[arg(default_value_t = crate::defaults::PERIOD_MS)]
    pub period_ms: u64,

    /// How long to run before shutting every vehicle down, in seconds
    #[arg(default_value_t = crate::defaults::TIMEOUT_S)]
    pub timeout_s: u64,

    /// Host network interface the link engine binds to. When unset, vehicles
    /// only exchange messages through the local shared-memory engine.
    #[arg(long)]
    pub link_interface: Option<String>,

    /// Increase diagnostic log verbosity on stderr.
    ///
    /// Can be used multiple times to increase detail: -v: info, -vv: debug,
    /// -vvv: trace. By default, only warnings and errors are shown.
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Internal: identifies this process as one spawned vehicle rather than
    /// the orchestrator. Not meant to be passed by a user directly.
    #[arg(long, hide = true)]
    pub vehicle_id: Option<usize>,

    /// Internal: the shared-memory name suffix the coordinator generated for
    /// this run, so every sibling vehicle process attaches to the same
    /// region instead of each opening its own. Not meant to be passed by a
    /// user directly.
    #[arg(long, hide = true)]
    pub run_suffix: Option<String>,
}
