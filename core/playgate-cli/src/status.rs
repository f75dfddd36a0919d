//! `playgate status` and `playgate health`.

use playgate_core::{ViewSnapshot, ViewSync};
use std::io::Write;

use crate::client::DaemonClient;

pub fn run(view: &ViewSync, out: &mut impl Write) -> Result<(), String> {
    let snapshot = view.refresh().map_err(|err| err.to_string())?;
    out.write_all(render(&snapshot).as_bytes())
        .map_err(|err| err.to_string())
}

/// Multi-line status block. The countdown line only appears while unlocked.
pub fn render(snapshot: &ViewSnapshot) -> String {
    let mut text = format!("Status: {}\n", snapshot.status_line());
    if let Some(countdown) = snapshot.countdown() {
        text.push_str(&countdown);
        text.push('\n');
    }
    text.push_str(&format!("Task: {}\n", snapshot.task_line()));
    text
}

pub fn health(client: &DaemonClient, out: &mut impl Write) -> Result<(), String> {
    let data = client
        .health()
        .map_err(|err| format!("Daemon unhealthy: {}", err))?;
    let pretty = serde_json::to_string_pretty(&data).map_err(|err| err.to_string())?;
    writeln!(out, "{}", pretty).map_err(|err| err.to_string())?;

    let reply = client
        .status()
        .map_err(|err| format!("Daemon status failed: {}", err))?;
    writeln!(
        out,
        "Gate {} for: {}",
        if reply.active { "released" } else { "blocking" },
        reply.gated_domains.join(", ")
    )
    .map_err(|err| err.to_string())
}
