//! Unlock state machine.
//!
//! The persisted `unlocked_until` timestamp is the whole state. Whether a
//! grant is active is computed from `(unlocked_until, now)` on every read and
//! never stored as a flag, so a restarted daemon that lost its timers still
//! derives the right answer from the store alone.
//!
//! ```text
//!   Locked ──request_unlock──▶ Unlocked(now + D)
//!   Unlocked(e) ──request_unlock──▶ Unlocked(now + D)   (overwrite, never extend)
//!   Unlocked(e) ──tick(now ≥ e)──▶ Locked               (clears to null)
//!   Locked ──tick──▶ Locked                             (no write)
//! ```

use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use crate::clock::{Clock, EpochMillis};
use crate::error::Result;
use crate::store::{get_value, set_value, Store};

pub const UNLOCKED_UNTIL_KEY: &str = "unlocked_until";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum GateStatus {
    Locked,
    Unlocked {
        expires_at: EpochMillis,
        remaining_ms: i64,
    },
}

impl GateStatus {
    pub fn is_unlocked(&self) -> bool {
        matches!(self, GateStatus::Unlocked { .. })
    }

    pub fn expires_at(&self) -> Option<EpochMillis> {
        match self {
            GateStatus::Unlocked { expires_at, .. } => Some(*expires_at),
            GateStatus::Locked => None,
        }
    }

    pub fn remaining_ms(&self) -> Option<i64> {
        match self {
            GateStatus::Unlocked { remaining_ms, .. } => Some(*remaining_ms),
            GateStatus::Locked => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Grant {
    pub granted_at: EpochMillis,
    pub unlocked_until: EpochMillis,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// A stale or malformed value was cleared. `expired_at` is `None` when
    /// the cleared value was not a usable timestamp.
    Cleared { expired_at: Option<EpochMillis> },
    Unchanged,
}

/// Reads a persisted `unlocked_until`. Anything that is not a finite number
/// counts as no grant.
pub fn parse_unlocked_until(value: Option<&Value>) -> Option<EpochMillis> {
    let number = match value? {
        Value::Number(number) => number,
        _ => return None,
    };
    if let Some(millis) = number.as_i64() {
        return Some(millis);
    }
    number
        .as_f64()
        .filter(|millis| millis.is_finite())
        .map(|millis| millis.floor() as EpochMillis)
}

/// Pure activity check: unlocked iff `unlocked_until > now`.
pub fn evaluate_grant(unlocked_until: Option<EpochMillis>, now: EpochMillis) -> GateStatus {
    match unlocked_until {
        Some(expires_at) if expires_at > now => GateStatus::Unlocked {
            expires_at,
            remaining_ms: expires_at - now,
        },
        _ => GateStatus::Locked,
    }
}

/// Owns the store handle and clock. Clone freely; all state is in the store.
#[derive(Clone)]
pub struct UnlockMachine {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    grant_duration: Duration,
}

impl UnlockMachine {
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>, grant_duration: Duration) -> Self {
        Self {
            store,
            clock,
            grant_duration,
        }
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn grant_duration(&self) -> Duration {
        self.grant_duration
    }

    /// Derives the status from the persisted value. Never writes.
    pub fn evaluate(&self, now: EpochMillis) -> Result<GateStatus> {
        let raw = get_value(self.store.as_ref(), UNLOCKED_UNTIL_KEY)?;
        Ok(evaluate_grant(parse_unlocked_until(raw.as_ref()), now))
    }

    pub fn status(&self) -> Result<GateStatus> {
        self.evaluate(self.clock.now_ms())
    }

    /// Starts a fresh full-length grant, replacing any existing one.
    pub fn request_unlock(&self) -> Result<Grant> {
        let granted_at = self.clock.now_ms();
        let duration_ms = i64::try_from(self.grant_duration.as_millis()).unwrap_or(i64::MAX);
        let unlocked_until = granted_at.saturating_add(duration_ms);

        set_value(
            self.store.as_ref(),
            UNLOCKED_UNTIL_KEY,
            Value::from(unlocked_until),
        )?;
        tracing::info!(granted_at, unlocked_until, "Grant issued");

        Ok(Grant {
            granted_at,
            unlocked_until,
        })
    }

    /// Clears an expired or malformed grant. Called by the expiry one-shot
    /// and the reconciliation sweep; safe to call any number of times.
    pub fn tick(&self, now: EpochMillis) -> Result<TickOutcome> {
        let raw = get_value(self.store.as_ref(), UNLOCKED_UNTIL_KEY)?;
        let raw = match raw {
            None | Some(Value::Null) => return Ok(TickOutcome::Unchanged),
            Some(raw) => raw,
        };

        let expired_at = parse_unlocked_until(Some(&raw));
        if evaluate_grant(expired_at, now).is_unlocked() {
            return Ok(TickOutcome::Unchanged);
        }

        set_value(self.store.as_ref(), UNLOCKED_UNTIL_KEY, Value::Null)?;
        match expired_at {
            Some(expired_at) => tracing::info!(expired_at, now, "Grant expired; gate locked"),
            None => tracing::warn!(value = %raw, "Cleared malformed grant value"),
        }
        Ok(TickOutcome::Cleared { expired_at })
    }

    /// Enforcement hook. Store failures fail closed.
    pub fn is_active(&self) -> bool {
        match self.status() {
            Ok(status) => status.is_unlocked(),
            Err(err) => {
                tracing::warn!(error = %err, "Grant check failed; treating as locked");
                false
            }
        }
    }
}
