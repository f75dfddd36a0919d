//! `playgate unlock`: ask the daemon for a grant.
//!
//! The front-end only asks. It never writes `unlocked_until`, even when the
//! daemon cannot be reached.

use chrono::{Local, TimeZone};
use playgate_core::{format_remaining, ViewSync};
use std::io::Write;

use crate::client::DaemonClient;

pub fn run(client: &DaemonClient, view: &ViewSync, out: &mut impl Write) -> Result<(), String> {
    let reply = match client.request_unlock() {
        Ok(reply) if reply.success => reply,
        Ok(_) => return Err("Could not unlock: daemon declined the request".to_string()),
        Err(err) => {
            tracing::warn!(error = %err, socket = %client.socket().display(), "Unlock request failed");
            return Err(format!("Could not unlock: {}", err));
        }
    };

    // The reply is advisory; show what the store says now.
    let snapshot = view.refresh().map_err(|err| err.to_string())?;
    let deadline = snapshot.status.expires_at().or(reply.unlocked_until);
    tracing::info!(unlocked_until = ?deadline, "Unlock granted");

    let written = match (deadline, snapshot.status.remaining_ms()) {
        (Some(deadline), Some(remaining)) => writeln!(
            out,
            "Unlocked until {} ({} remaining)",
            local_time(deadline),
            format_remaining(remaining)
        ),
        _ => writeln!(out, "Unlock granted, but the store does not show it yet"),
    };
    written.map_err(|err| err.to_string())
}

fn local_time(epoch_ms: i64) -> String {
    Local
        .timestamp_millis_opt(epoch_ms)
        .single()
        .map(|time| time.format("%H:%M:%S").to_string())
        .unwrap_or_else(|| epoch_ms.to_string())
}
