//! Background controller.
//!
//! Single writer of `unlocked_until`. Every path that can change the gate
//! (unlock request, expiry one-shot, sweep, writes seen through the store
//! watcher) ends in [`Controller::sync_from_store`], which re-reads the store
//! and brings the scheduler and enforcer in line with it.

use playgate_core::store::{get_value, set_value};
use playgate_core::{
    ExpiryScheduler, GateError, GateStatus, StorageChanges, SweepHandle, UnlockMachine,
    TASK_KEY, UNLOCKED_UNTIL_KEY,
};
use playgate_protocol::{StatusReply, UnlockReply};
use serde_json::Value;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{info, warn};

use crate::enforcer::GateEnforcer;

pub struct Controller {
    machine: UnlockMachine,
    scheduler: ExpiryScheduler,
    enforcer: GateEnforcer,
}

impl Controller {
    pub fn new(machine: UnlockMachine, enforcer: GateEnforcer) -> Arc<Self> {
        let scheduler = ExpiryScheduler::new(machine.clone());
        Arc::new(Self {
            machine,
            scheduler,
            enforcer,
        })
    }

    /// Registers for store change notifications. Holds only a weak
    /// reference so the store does not keep the controller alive.
    pub fn subscribe(self: &Arc<Self>) {
        let weak: Weak<Self> = Arc::downgrade(self);
        self.machine.store().on_change(Arc::new(move |changes| {
            if let Some(controller) = weak.upgrade() {
                controller.on_store_change(changes);
            }
        }));
    }

    /// Startup reconciliation: seed the key, clear anything that expired
    /// while the daemon was down, and re-arm a still-active grant.
    pub fn install(&self) -> Result<GateStatus, GateError> {
        let store = self.machine.store().as_ref();
        if get_value(store, UNLOCKED_UNTIL_KEY)?.is_none() {
            set_value(store, UNLOCKED_UNTIL_KEY, Value::Null)?;
            info!("Initialized unlock state");
        }

        let now = self.machine.clock().now_ms();
        self.machine.tick(now)?;
        Ok(self.sync_from_store("install"))
    }

    pub fn handle_unlock(&self) -> Result<UnlockReply, GateError> {
        let grant = self.machine.request_unlock()?;
        self.scheduler.arm(grant.unlocked_until);
        self.sync_from_store("unlock");
        Ok(UnlockReply {
            success: true,
            unlocked_until: Some(grant.unlocked_until),
        })
    }

    pub fn status_reply(&self) -> Result<StatusReply, GateError> {
        let status = self.machine.status()?;
        Ok(StatusReply {
            active: status.is_unlocked(),
            unlocked_until: status.expires_at(),
            remaining_ms: status.remaining_ms(),
            gated_domains: self.enforcer.gate_set().domains.clone(),
        })
    }

    /// Periodic reconciliation. Every pass ticks and then re-applies the
    /// store's status to the enforcer, so a missed notification cannot leave
    /// the gate released.
    pub fn spawn_sweep(self: &Arc<Self>, period: Duration) -> Result<SweepHandle, GateError> {
        let weak = Arc::downgrade(self);
        self.scheduler.spawn_sweep_then(period, move || {
            if let Some(controller) = weak.upgrade() {
                controller.sync_from_store("sweep");
            }
        })
    }

    /// Enforcement hook for the interceptor.
    pub fn is_active(&self) -> bool {
        self.machine.is_active()
    }

    pub fn armed_deadline(&self) -> Option<i64> {
        self.scheduler.armed_deadline()
    }

    pub fn on_store_change(&self, changes: &StorageChanges) {
        if let Some(change) = changes.get(UNLOCKED_UNTIL_KEY) {
            info!(
                old_value = ?change.old_value,
                new_value = ?change.new_value,
                "Unlock state changed"
            );
            self.sync_from_store("store_change");
        }
        if let Some(change) = changes.get(TASK_KEY) {
            info!(task = ?change.new_value, "Current task updated");
        }
    }

    fn sync_from_store(&self, reason: &'static str) -> GateStatus {
        match self.machine.status() {
            Ok(status) => {
                if let Some(expires_at) = status.expires_at() {
                    self.scheduler.arm(expires_at);
                }
                self.enforcer.apply(&status);
                status
            }
            Err(err) => {
                warn!(reason, error = %err, "Failed to read unlock state; blocking gate");
                self.enforcer.apply(&GateStatus::Locked);
                GateStatus::Locked
            }
        }
    }
}
