//! Gate enforcement boundary.
//!
//! Actual interception of gated domains happens elsewhere. This module owns
//! the decision the interceptor reads: whether the gate set is currently
//! released, applied on every status change.

use playgate_core::{GateSet, GateStatus};
use std::sync::Mutex;
use tracing::{debug, info};

pub struct GateEnforcer {
    gate_set: GateSet,
    released: Mutex<Option<bool>>,
}

impl GateEnforcer {
    pub fn new(gate_set: GateSet) -> Self {
        Self {
            gate_set,
            released: Mutex::new(None),
        }
    }

    pub fn gate_set(&self) -> &GateSet {
        &self.gate_set
    }

    /// Applies `status`. Returns `true` when the gate flipped.
    pub fn apply(&self, status: &GateStatus) -> bool {
        let release = status.is_unlocked();
        let previous = match self.released.lock() {
            Ok(mut released) => released.replace(release),
            Err(_) => return false,
        };

        if previous == Some(release) {
            debug!(released = release, "Gate unchanged");
            return false;
        }

        if release {
            info!(
                domains = ?self.gate_set.domains,
                expires_at = ?status.expires_at(),
                "Grant active; gated domains released"
            );
        } else {
            info!(domains = ?self.gate_set.domains, "Blocking gated domains");
        }
        true
    }
}
