use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::PathBuf;

use clap::{ArgAction, Parser, Subcommand};
use hearth_core::permission::Profile;
use hearth_core::plugin_system::{LoadOrder, StartOutcome, StopResult};
use hearth_core::supervisor::StopOutcome;

/// Hearth: process-isolated plugin runtime for the chat bot
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct CliArgs {
    /// Increase log verbosity (info by default, -v debug, -vv trace). RUST_LOG wins when set.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Validate the manifests of a directory and print the start layers
    Check {
        /// Directory of plugin manifests
        dir: PathBuf,
    },
    /// List capability profiles with their defaults and ceilings
    Profiles,
    /// Load, start and supervise plugins until interrupted
    Run {
        /// Runtime configuration file (json, yaml or toml)
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Manifest directory; overrides the configuration's manifest_dir
        #[arg(short, long)]
        manifests: Option<PathBuf>,
        /// Stop everything right after the initial start instead of waiting for Ctrl-C
        #[arg(long)]
        no_wait: bool,
    },
}

pub fn render_layers(order: &LoadOrder) -> String {
    let mut out = String::new();
    for (index, layer) in order.layers().iter().enumerate() {
        let _ = writeln!(out, "  layer {}: {}", index, layer.join(", "));
    }
    let shutdown = order.shutdown_order(|_| true);
    let _ = writeln!(out, "  shutdown order: {}", shutdown.join(", "));
    out
}

pub fn render_profiles() -> String {
    let mut out = String::new();
    for profile in Profile::ALL {
        let defaults: Vec<String> = profile.default_capabilities().iter().map(ToString::to_string).collect();
        let ceiling: Vec<String> = profile.ceiling_capabilities().iter().map(ToString::to_string).collect();
        let _ = writeln!(out, "{}", profile);
        let _ = writeln!(out, "  defaults: {}", defaults.join(", "));
        let _ = writeln!(out, "  ceiling:  {}", ceiling.join(", "));
    }
    out
}

pub fn render_start(outcomes: &BTreeMap<String, StartOutcome>) -> String {
    let mut out = String::new();
    let running = outcomes.values().filter(|outcome| outcome.is_running()).count();
    let _ = writeln!(out, "{} of {} plugin(s) running", running, outcomes.len());
    for (name, outcome) in outcomes {
        let _ = writeln!(out, "  {}: {}", name, outcome);
    }
    out
}

pub fn render_stop(results: &BTreeMap<String, StopResult>) -> String {
    let mut out = String::new();
    for (name, result) in results {
        let line = match result {
            Ok(StopOutcome::Stopped) => "stopped".to_string(),
            Ok(StopOutcome::ForceKilled) => "killed after stop timeout".to_string(),
            Ok(StopOutcome::AlreadyStopped) => "not running".to_string(),
            Err(e) => format!("error: {}", e),
        };
        let _ = writeln!(out, "  {}: {}", name, line);
    }
    out
}
