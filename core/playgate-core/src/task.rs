//! Current task label.
//!
//! Written by the front-end, displayed next to the gate status. Independent
//! of the unlock state machine.

use serde_json::Value;

use crate::error::{GateError, Result};
use crate::store::{get_value, set_value, Store};

pub const TASK_KEY: &str = "current_task";

/// Stores the trimmed task text and returns it.
pub fn save_task(store: &dyn Store, text: &str) -> Result<String> {
    let task = text.trim();
    if task.is_empty() {
        return Err(GateError::EmptyTask);
    }
    set_value(store, TASK_KEY, Value::String(task.to_string()))?;
    Ok(task.to_string())
}

pub fn load_task(store: &dyn Store) -> Result<Option<String>> {
    let value = get_value(store, TASK_KEY)?;
    Ok(value
        .as_ref()
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|task| !task.is_empty())
        .map(str::to_string))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use serde_json::json;

    #[test]
    fn saves_trimmed_text() {
        let store = MemoryStore::new();
        assert_eq!(save_task(&store, "  write tests \n").unwrap(), "write tests");
        assert_eq!(load_task(&store).unwrap().as_deref(), Some("write tests"));
    }

    #[test]
    fn rejects_blank_text_without_writing() {
        let store = MemoryStore::new();
        save_task(&store, "first").unwrap();
        assert!(matches!(save_task(&store, "   "), Err(GateError::EmptyTask)));
        assert_eq!(load_task(&store).unwrap().as_deref(), Some("first"));
    }

    #[test]
    fn non_string_values_read_as_no_task() {
        let store = MemoryStore::new();
        assert_eq!(load_task(&store).unwrap(), None);
        set_value(&store, TASK_KEY, json!(42)).unwrap();
        assert_eq!(load_task(&store).unwrap(), None);
    }
}
