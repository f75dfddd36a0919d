//! `playgate watch`: live status with a countdown.
//!
//! Re-renders on every store notification and on a fixed interval. Either
//! one alone is enough to notice the grant ending.

use playgate_core::{
    FileStore, StorageChanges, Store, ViewSnapshot, ViewSync, TASK_KEY, UNLOCKED_UNTIL_KEY,
};
use std::io::Write;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

pub struct WatchOptions {
    pub interval: Duration,
    pub store_poll: Duration,
    /// Keep watching after the grant ends.
    pub follow: bool,
}

pub fn run(
    store: &Arc<FileStore>,
    view: &ViewSync,
    options: &WatchOptions,
    out: &mut impl Write,
) -> Result<(), String> {
    let (tx, rx) = mpsc::channel();
    store.on_change(Arc::new(move |changes: &StorageChanges| {
        if changes.contains_key(UNLOCKED_UNTIL_KEY) || changes.contains_key(TASK_KEY) {
            let _ = tx.send(());
        }
    }));
    let watcher = store
        .spawn_watcher(options.store_poll)
        .map_err(|err| format!("Failed to watch store: {}", err))?;

    let result = watch_loop(view, &rx, options.interval, options.follow, out);
    watcher.shutdown();
    result
}

fn watch_loop(
    view: &ViewSync,
    updates: &Receiver<()>,
    interval: Duration,
    follow: bool,
    out: &mut impl Write,
) -> Result<(), String> {
    let mut was_unlocked = false;
    loop {
        let snapshot = view.refresh().map_err(|err| err.to_string())?;
        writeln!(out, "{}", render_line(&snapshot)).map_err(|err| err.to_string())?;

        if snapshot.status.is_unlocked() {
            was_unlocked = true;
        } else if was_unlocked {
            tracing::info!("Grant expired while watching");
            was_unlocked = false;
            if !follow {
                writeln!(out, "Grant expired").map_err(|err| err.to_string())?;
                return Ok(());
            }
        } else if !follow {
            return Ok(());
        }

        match updates.recv_timeout(interval) {
            // Collapse a burst of notifications into one render.
            Ok(()) => while updates.try_recv().is_ok() {},
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => thread::sleep(interval),
        }
    }
}

pub fn render_line(snapshot: &ViewSnapshot) -> String {
    match snapshot.countdown() {
        Some(countdown) => format!(
            "{} | {} | Task: {}",
            snapshot.status_line(),
            countdown,
            snapshot.task_line()
        ),
        None => format!("{} | Task: {}", snapshot.status_line(), snapshot.task_line()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use playgate_core::store::set_value;
    use playgate_core::{ManualClock, MemoryStore};
    use serde_json::json;

    fn lines(out: Vec<u8>) -> Vec<String> {
        String::from_utf8(out)
            .unwrap()
            .lines()
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn locked_gate_prints_once_and_exits() {
        let view = ViewSync::new(Arc::new(MemoryStore::new()), Arc::new(ManualClock::new(0)));
        let (_tx, rx) = mpsc::channel();
        let mut out = Vec::new();

        watch_loop(&view, &rx, Duration::from_secs(10), false, &mut out).unwrap();
        assert_eq!(lines(out), vec!["Locked | Task: No task set"]);
    }

    #[test]
    fn notification_renders_expiry_and_exits() {
        let store = Arc::new(MemoryStore::new());
        set_value(store.as_ref(), UNLOCKED_UNTIL_KEY, json!(61_000)).unwrap();
        let clock = Arc::new(ManualClock::new(0));
        let view = ViewSync::new(store, clock.clone());
        let (tx, rx) = mpsc::channel();

        let expire = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            clock.set(61_000);
            tx.send(()).unwrap();
        });

        let mut out = Vec::new();
        watch_loop(&view, &rx, Duration::from_secs(10), false, &mut out).unwrap();
        expire.join().unwrap();

        assert_eq!(
            lines(out),
            vec![
                "Unlocked | Time remaining: 1:01 | Task: No task set",
                "Locked | Task: No task set",
                "Grant expired",
            ]
        );
    }

    #[test]
    fn interval_alone_notices_expiry() {
        let store = Arc::new(MemoryStore::new());
        set_value(store.as_ref(), UNLOCKED_UNTIL_KEY, json!(1_000)).unwrap();
        let clock = Arc::new(ManualClock::new(0));
        let view = ViewSync::new(store, clock.clone());
        let (_tx, rx) = mpsc::channel::<()>();

        let expire = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            clock.set(1_000);
        });

        let mut out = Vec::new();
        watch_loop(&view, &rx, Duration::from_millis(50), false, &mut out).unwrap();
        expire.join().unwrap();

        let lines = lines(out);
        assert_eq!(lines.last().map(String::as_str), Some("Grant expired"));
        assert!(lines.iter().any(|line| line.starts_with("Unlocked")));
    }
}
