//! Expiry scheduling.
//!
//! Two independent triggers call [`UnlockMachine::tick`]:
//!
//! 1. **One-shot**: a single timer thread waits for the most recently armed
//!    deadline. Lost if the daemon stops before it fires, so it only
//!    shortens the time to lock.
//! 2. **Reconciliation sweep**: fixed-period unconditional tick. Bounds how
//!    long an expired grant can stay visible to one period.
//!
//! Both re-read the store when they fire, so they commute. Re-arming
//! replaces the pending deadline; it never adds a second one.

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, warn};

use crate::clock::EpochMillis;
use crate::error::{GateError, Result};
use crate::unlock::{TickOutcome, UnlockMachine};

#[derive(Clone)]
pub struct ExpiryScheduler {
    machine: UnlockMachine,
    armed: Arc<Mutex<Option<EpochMillis>>>,
    timer: Arc<Mutex<Option<Sender<EpochMillis>>>>,
}

impl ExpiryScheduler {
    pub fn new(machine: UnlockMachine) -> Self {
        Self {
            machine,
            armed: Arc::default(),
            timer: Arc::default(),
        }
    }

    /// The most recently armed deadline that has not fired yet.
    pub fn armed_deadline(&self) -> Option<EpochMillis> {
        self.armed.lock().ok().and_then(|armed| *armed)
    }

    /// Arranges a tick at `deadline`, replacing any pending one. Returns
    /// `false` when that deadline is already armed.
    pub fn arm(&self, deadline: EpochMillis) -> bool {
        match self.armed.lock() {
            Ok(mut armed) => {
                if *armed == Some(deadline) {
                    return false;
                }
                *armed = Some(deadline);
            }
            Err(_) => return false,
        }

        if self.send_to_timer(deadline) {
            debug!(deadline, "Expiry one-shot armed");
            return true;
        }

        // The sweep still covers this grant.
        if let Ok(mut current) = self.armed.lock() {
            *current = None;
        }
        false
    }

    fn send_to_timer(&self, deadline: EpochMillis) -> bool {
        let Ok(mut timer) = self.timer.lock() else {
            return false;
        };
        if let Some(tx) = timer.as_ref() {
            if tx.send(deadline).is_ok() {
                return true;
            }
        }

        let (tx, rx) = mpsc::channel();
        let machine = self.machine.clone();
        let armed = Arc::clone(&self.armed);
        let spawned = thread::Builder::new()
            .name("playgate-expiry".to_string())
            .spawn(move || run_timer(&machine, &armed, &rx));
        if let Err(err) = spawned {
            warn!(error = %err, deadline, "Failed to spawn expiry timer");
            return false;
        }

        let sent = tx.send(deadline).is_ok();
        *timer = Some(tx);
        sent
    }

    /// Starts the periodic reconciliation sweep.
    pub fn spawn_sweep(&self, period: Duration) -> Result<SweepHandle> {
        self.spawn_sweep_then(period, || {})
    }

    /// Like [`ExpiryScheduler::spawn_sweep`], calling `after_pass` once each
    /// pass has ticked, whether or not the tick changed anything.
    pub fn spawn_sweep_then<F>(&self, period: Duration, after_pass: F) -> Result<SweepHandle>
    where
        F: Fn() + Send + 'static,
    {
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let machine = self.machine.clone();
        let handle = thread::Builder::new()
            .name("playgate-sweep".to_string())
            .spawn(move || loop {
                match stop_rx.recv_timeout(period) {
                    Err(RecvTimeoutError::Timeout) => {
                        run_tick(&machine, "sweep");
                        after_pass();
                    }
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            })
            .map_err(|err| GateError::io("spawn reconciliation sweep", err))?;

        debug!(period_ms = period.as_millis() as u64, "Reconciliation sweep started");
        Ok(SweepHandle {
            stop: Some(stop_tx),
            handle: Some(handle),
        })
    }
}

fn run_tick(machine: &UnlockMachine, trigger: &'static str) {
    let now = machine.clock().now_ms();
    match machine.tick(now) {
        Ok(TickOutcome::Cleared { expired_at }) => {
            debug!(trigger, ?expired_at, "Tick locked the gate");
        }
        Ok(TickOutcome::Unchanged) => {}
        Err(err) => {
            warn!(trigger, error = %err, "Tick failed; will retry on next trigger");
        }
    }
}

/// Waits for the latest deadline and ticks once it passes. Exits when
/// every scheduler handle is gone.
fn run_timer(
    machine: &UnlockMachine,
    armed: &Mutex<Option<EpochMillis>>,
    deadlines: &Receiver<EpochMillis>,
) {
    let mut pending: Option<EpochMillis> = None;
    loop {
        let next = match pending {
            None => deadlines
                .recv()
                .map_err(|_| RecvTimeoutError::Disconnected),
            Some(deadline) => {
                let delay_ms = deadline.saturating_sub(machine.clock().now_ms()).max(0);
                deadlines.recv_timeout(Duration::from_millis(delay_ms as u64))
            }
        };

        match next {
            Ok(deadline) => pending = Some(deadline),
            Err(RecvTimeoutError::Timeout) => {
                if let Some(deadline) = pending.take() {
                    run_tick(machine, "expiry");
                    if let Ok(mut current) = armed.lock() {
                        if *current == Some(deadline) {
                            *current = None;
                        }
                    }
                }
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
}

/// Stops the sweep thread when dropped.
pub struct SweepHandle {
    stop: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl SweepHandle {
    pub fn shutdown(mut self) {
        self.stop_and_join();
    }

    fn stop_and_join(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for SweepHandle {
    fn drop(&mut self) {
        self.stop_and_join();
    }
}
