//! navgraph-hook: command-line client for the navgraph daemon.
//!
//! Browser-side glue pipes navigation events into `send`; the remaining
//! subcommands read the graph back out.
//!
//! ## Subcommands
//!
//! - `send`: forward JSON events from stdin
//! - `session`: print a session's records and edges
//! - `health`: print daemon health
//! - `check`: audit a session graph, exit 1 on structural problems

mod check;
mod daemon_client;
mod logging;
mod send;

use clap::{Parser, Subcommand};
use serde::Serialize;

#[derive(Parser)]
#[command(name = "navgraph-hook")]
#[command(about = "Navigation graph event forwarder")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Forward navigation events (reads JSON from stdin)
    Send,

    /// Print a session graph as JSON
    Session {
        /// Session to fetch; defaults to the daemon's current session
        #[arg(long)]
        id: Option<String>,
    },

    /// Print daemon health as JSON
    Health,

    /// Audit a session graph for cycles and dangling links
    Check {
        /// Session to audit; defaults to the daemon's current session
        #[arg(long)]
        id: Option<String>,
    },
}

fn main() {
    let _logging_guard = logging::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Send => match send::run() {
            Ok(count) => tracing::debug!(count, "navgraph-hook send complete"),
            Err(e) => fail("send", &e),
        },
        Commands::Session { id } => match daemon_client::fetch_session(id.as_deref()) {
            Ok(details) => print_json(&details),
            Err(e) => fail("session", &e),
        },
        Commands::Health => match daemon_client::daemon_health() {
            Ok(health) => print_json(&health),
            Err(e) => fail("health", &e),
        },
        Commands::Check { id } => match check::run(id.as_deref()) {
            Ok(report) => {
                print_json(&report);
                if !report.is_clean() {
                    std::process::exit(1);
                }
            }
            Err(e) => fail("check", &e),
        },
    }
}

fn print_json<T: Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(text) => println!("{}", text),
        Err(e) => fail("output", &format!("Failed to serialize output: {}", e)),
    }
}

fn fail(command: &str, error: &str) -> ! {
    tracing::error!(error = %error, "navgraph-hook {} failed", command);
    eprintln!("navgraph-hook {}: {}", command, error);
    std::process::exit(1);
}
