//! playgate: front-end for the playgate daemon.
//!
//! Reads the shared store directly for display and asks the daemon for
//! unlocks over its socket.
//!
//! ## Subcommands
//!
//! - `unlock`: request a grant
//! - `status`: print the gate status, countdown and task
//! - `task set|show`: write or read the current task label
//! - `watch`: live countdown until the grant ends
//! - `health`: daemon health report

mod client;
mod logging;
mod status;
mod task;
mod unlock;
mod watch;

use clap::{Parser, Subcommand};
use playgate_core::config::store_path;
use playgate_core::{load_config, FileStore, GateConfig, SystemClock, ViewSync};
use std::io;
use std::sync::Arc;
use std::time::Duration;

use client::DaemonClient;

#[derive(Parser)]
#[command(name = "playgate")]
#[command(about = "Earn time on gated sites; watch the clock run down")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ask the daemon to unlock the gated sites
    Unlock,

    /// Show the current gate status
    Status,

    /// Read or write the current task label
    Task {
        #[command(subcommand)]
        action: TaskAction,
    },

    /// Follow the countdown until the grant ends
    Watch {
        /// Countdown refresh interval
        #[arg(long, default_value_t = 1000)]
        interval_ms: u64,

        /// Keep watching after the grant ends
        #[arg(long)]
        follow: bool,
    },

    /// Check that the daemon is up
    Health,
}

#[derive(Subcommand)]
enum TaskAction {
    /// Set the current task
    Set {
        #[arg(value_name = "TEXT")]
        text: String,
    },

    /// Print the current task
    Show,
}

fn main() {
    let _logging_guard = logging::init();
    let cli = Cli::parse();

    if let Err(err) = run(cli.command) {
        tracing::error!(error = %err, "playgate command failed");
        eprintln!("{}", err);
        std::process::exit(1);
    }
}

fn run(command: Commands) -> Result<(), String> {
    let mut out = io::stdout().lock();
    match command {
        Commands::Unlock => {
            let client = DaemonClient::from_env().map_err(|err| format!("Could not unlock: {}", err))?;
            let (_, view) = open_view()?;
            unlock::run(&client, &view, &mut out)
        }
        Commands::Status => {
            let (_, view) = open_view()?;
            status::run(&view, &mut out)
        }
        Commands::Task { action } => {
            let (store, _) = open_view()?;
            match action {
                TaskAction::Set { text } => task::set(store.as_ref(), &text, &mut out),
                TaskAction::Show => task::show(store.as_ref(), &mut out),
            }
        }
        Commands::Watch {
            interval_ms,
            follow,
        } => {
            let (store, view) = open_view()?;
            let options = watch::WatchOptions {
                interval: Duration::from_millis(interval_ms.max(1)),
                store_poll: load_config_or_default().store_poll_interval(),
                follow,
            };
            watch::run(&store, &view, &options, &mut out)
        }
        Commands::Health => {
            let client = DaemonClient::from_env().map_err(|err| err.to_string())?;
            status::health(&client, &mut out)
        }
    }
}

fn open_view() -> Result<(Arc<FileStore>, ViewSync), String> {
    let path = store_path().map_err(|err| err.to_string())?;
    let store = Arc::new(FileStore::open(path));
    let view = ViewSync::new(store.clone(), Arc::new(SystemClock));
    Ok((store, view))
}

fn load_config_or_default() -> GateConfig {
    load_config(None).unwrap_or_else(|err| {
        tracing::warn!(error = %err, "Failed to load config; using defaults");
        GateConfig::default()
    })
}
