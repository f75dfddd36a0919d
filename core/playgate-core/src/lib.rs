//! # playgate-core
//!
//! Shared logic for the playgate daemon (background controller) and the
//! `playgate` front-end.
//!
//! ## Design Principles
//!
//! - **Store is the source of truth**: every evaluation re-reads the store.
//!   Nothing about the grant is cached across calls.
//! - **Single writer**: only the daemon writes `unlocked_until`. Front-ends
//!   read it and request transitions over the socket.
//! - **Fail closed as Locked**: missing or malformed data means no grant.
//! - **Synchronous**: plain threads, no async runtime.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use playgate_core::{MemoryStore, SystemClock, UnlockMachine};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let machine = UnlockMachine::new(
//!     Arc::new(MemoryStore::new()),
//!     Arc::new(SystemClock),
//!     Duration::from_secs(30 * 60),
//! );
//! let grant = machine.request_unlock()?;
//! assert!(machine.is_active());
//! ```

pub mod clock;
pub mod config;
pub mod error;
pub mod scheduler;
pub mod store;
pub mod task;
pub mod unlock;
pub mod view;

pub use clock::{Clock, EpochMillis, ManualClock, SystemClock};
pub use config::{load_config, GateConfig, GateSet};
pub use error::{GateError, Result};
pub use scheduler::{ExpiryScheduler, SweepHandle};
pub use store::{
    ChangeListener, FileStore, MemoryStore, StorageChange, StorageChanges, Store, StoreValues,
    WatchHandle,
};
pub use task::{load_task, save_task, TASK_KEY};
pub use unlock::{
    evaluate_grant, parse_unlocked_until, GateStatus, Grant, TickOutcome, UnlockMachine,
    UNLOCKED_UNTIL_KEY,
};
pub use view::{format_remaining, ViewSnapshot, ViewSync};
