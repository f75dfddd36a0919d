//! `playgate task set|show`.

use playgate_core::{load_task, save_task, Store};
use std::io::Write;

pub fn set(store: &dyn Store, text: &str, out: &mut impl Write) -> Result<(), String> {
    let task = save_task(store, text).map_err(|err| err.to_string())?;
    tracing::info!(task = %task, "Current task saved");
    writeln!(out, "Task set: {}", task).map_err(|err| err.to_string())
}

pub fn show(store: &dyn Store, out: &mut impl Write) -> Result<(), String> {
    let task = load_task(store).map_err(|err| err.to_string())?;
    writeln!(out, "{}", task.as_deref().unwrap_or("No task set")).map_err(|err| err.to_string())
}
