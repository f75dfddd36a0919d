//! Front-end view state.
//!
//! A view never trusts what it showed last time. [`ViewSync::refresh`]
//! re-reads the store on every focus, poll, or change notification; the
//! daemon's unlock reply only triggers an earlier refresh.

use std::sync::Arc;

use crate::clock::Clock;
use crate::error::Result;
use crate::store::{get_value, Store};
use crate::task::load_task;
use crate::unlock::{evaluate_grant, parse_unlocked_until, GateStatus, UNLOCKED_UNTIL_KEY};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewSnapshot {
    pub status: GateStatus,
    pub task: Option<String>,
}

impl ViewSnapshot {
    pub fn status_line(&self) -> &'static str {
        if self.status.is_unlocked() {
            "Unlocked"
        } else {
            "Locked"
        }
    }

    pub fn task_line(&self) -> &str {
        self.task.as_deref().unwrap_or("No task set")
    }

    /// `None` once the grant has run out.
    pub fn countdown(&self) -> Option<String> {
        self.status
            .remaining_ms()
            .map(|remaining| format!("Time remaining: {}", format_remaining(remaining)))
    }
}

/// `M:SS`, minutes floored, seconds zero-padded.
pub fn format_remaining(remaining_ms: i64) -> String {
    let remaining_ms = remaining_ms.max(0);
    let minutes = remaining_ms / 60_000;
    let seconds = (remaining_ms % 60_000) / 1_000;
    format!("{}:{:02}", minutes, seconds)
}

/// Read-only view over the store for a front-end.
pub struct ViewSync {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
}

impl ViewSync {
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    pub fn refresh(&self) -> Result<ViewSnapshot> {
        let now = self.clock.now_ms();
        let raw = get_value(self.store.as_ref(), UNLOCKED_UNTIL_KEY)?;
        let status = evaluate_grant(parse_unlocked_until(raw.as_ref()), now);
        let task = load_task(self.store.as_ref())?;
        Ok(ViewSnapshot { status, task })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::{set_value, MemoryStore};
    use crate::task::save_task;
    use serde_json::json;

    #[test]
    fn formats_minutes_and_padded_seconds() {
        assert_eq!(format_remaining(1_800_000), "30:00");
        assert_eq!(format_remaining(1_799_000), "29:59");
        assert_eq!(format_remaining(65_999), "1:05");
        assert_eq!(format_remaining(999), "0:00");
        assert_eq!(format_remaining(-5), "0:00");
    }

    #[test]
    fn refresh_rereads_store_every_time() {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(10_000));
        let view = ViewSync::new(store.clone(), clock.clone());

        let locked = view.refresh().unwrap();
        assert_eq!(locked.status_line(), "Locked");
        assert_eq!(locked.task_line(), "No task set");
        assert_eq!(locked.countdown(), None);

        save_task(store.as_ref(), "outline essay").unwrap();
        set_value(store.as_ref(), UNLOCKED_UNTIL_KEY, json!(10_000 + 90_000)).unwrap();

        let unlocked = view.refresh().unwrap();
        assert_eq!(unlocked.status_line(), "Unlocked");
        assert_eq!(unlocked.task_line(), "outline essay");
        assert_eq!(unlocked.countdown().as_deref(), Some("Time remaining: 1:30"));

        clock.advance(90_000);
        let expired = view.refresh().unwrap();
        assert_eq!(expired.status_line(), "Locked");
        assert_eq!(expired.countdown(), None);
    }
}
