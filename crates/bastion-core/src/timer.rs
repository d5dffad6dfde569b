//! Keyed countdown timers with scoped expiration subscriptions.
//!
//! The [`TimerRegistry`] trait is the contract the construction lifecycle
//! consumes. [`TimerManager`] is the stock implementation: a deterministic
//! keyed table plus a simulation clock that the host advances once per tick.
//!
//! # Expiration delivery
//!
//! Nothing fires on its own. [`TimerManager::advance`] moves the clock, removes
//! every timer whose end time has been reached, and returns one
//! [`TimerExpired`] per removed timer. Each event lists the subscriptions
//! registered for exactly that key, so the host routes it to those
//! subscribers only instead of broadcasting every expiration to everyone.

use crate::fixed::Seconds;
use crate::id::{SubscriptionId, TimerKey};
use serde::{Deserialize, Serialize};
use slotmap::SlotMap;
use std::collections::BTreeMap;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors returned when starting a timer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TimerError {
    #[error("timer {0} is already running")]
    AlreadyRunning(TimerKey),

    #[error("timer {key} needs a positive duration, got {duration}")]
    InvalidDuration { key: TimerKey, duration: Seconds },
}

// ---------------------------------------------------------------------------
// Timer records and events
// ---------------------------------------------------------------------------

/// A running countdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timer {
    pub started_at: Seconds,
    pub ends_at: Seconds,
    /// Start order, used to break ties between timers ending together.
    pub sequence: u64,
}

impl Timer {
    /// Total length of the countdown.
    pub fn duration(&self) -> Seconds {
        self.ends_at.saturating_sub(self.started_at)
    }
}

/// Emitted by the sweep when a timer reaches its end time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimerExpired {
    pub key: TimerKey,
    /// Scheduled end time, not the (possibly later) sweep time.
    pub end_time: Seconds,
    /// Live subscriptions for this key, in subscription order.
    pub subscribers: Vec<SubscriptionId>,
}

// ---------------------------------------------------------------------------
// Registry contract
// ---------------------------------------------------------------------------

/// Keyed timer service consumed by the construction lifecycle.
///
/// All queries are total over the key space: unknown keys report "not
/// running" and zero remaining time rather than failing.
pub trait TimerRegistry {
    /// Current simulation time.
    fn now(&self) -> Seconds;

    /// Start a countdown of `duration` under `key`, beginning now.
    fn start_timer(&mut self, key: TimerKey, duration: Seconds) -> Result<(), TimerError>;

    /// Cancel a running timer. Returns `false` if `key` was not running.
    fn cancel_timer(&mut self, key: TimerKey) -> bool;

    /// Whether `key` is currently counting down.
    fn is_running(&self, key: TimerKey) -> bool;

    /// Time left on `key`, or zero if it is not running.
    fn remaining_time(&self, key: TimerKey) -> Seconds;

    /// Subscribe to expirations of exactly one key.
    fn subscribe(&mut self, key: TimerKey) -> SubscriptionId;

    /// Drop a subscription. Returns `false` if it was already gone.
    fn unsubscribe(&mut self, subscription: SubscriptionId) -> bool;
}

// ---------------------------------------------------------------------------
// TimerManager
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct Subscription {
    key: TimerKey,
    order: u64,
}

/// Stock [`TimerRegistry`]: ordered timer table, clock, and subscriptions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TimerManager {
    now: Seconds,
    #[serde(with = "timer_table")]
    timers: BTreeMap<TimerKey, Timer>,
    subscriptions: SlotMap<SubscriptionId, Subscription>,
    next_sequence: u64,
    next_subscription_order: u64,
}

impl TimerManager {
    /// Create an empty registry with the clock at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance the clock by `dt` and sweep expired timers.
    ///
    /// Negative `dt` is treated as zero. Expirations are ordered by end time,
    /// then by start order.
    pub fn advance(&mut self, dt: Seconds) -> Vec<TimerExpired> {
        let dt = dt.max(Seconds::ZERO);
        self.now = self.now.saturating_add(dt);
        self.sweep()
    }

    /// Remove and report every timer whose end time is at or before `now`.
    fn sweep(&mut self) -> Vec<TimerExpired> {
        let now = self.now;
        let mut due: Vec<(TimerKey, Timer)> = self
            .timers
            .iter()
            .filter(|(_, timer)| timer.ends_at <= now)
            .map(|(key, timer)| (*key, *timer))
            .collect();
        due.sort_by_key(|(_, timer)| (timer.ends_at, timer.sequence));

        let mut expired = Vec::with_capacity(due.len());
        for (key, timer) in due {
            self.timers.remove(&key);
            tracing::trace!(key = %key, end_time = %timer.ends_at, "timer expired");
            expired.push(TimerExpired {
                key,
                end_time: timer.ends_at,
                subscribers: self.subscribers_of(key),
            });
        }
        expired
    }

    /// Live subscriptions for `key`, in subscription order.
    pub fn subscribers_of(&self, key: TimerKey) -> Vec<SubscriptionId> {
        let mut subs: Vec<(u64, SubscriptionId)> = self
            .subscriptions
            .iter()
            .filter(|(_, sub)| sub.key == key)
            .map(|(id, sub)| (sub.order, id))
            .collect();
        subs.sort_unstable_by_key(|(order, _)| *order);
        subs.into_iter().map(|(_, id)| id).collect()
    }

    /// The key a subscription listens to.
    pub fn subscription_key(&self, subscription: SubscriptionId) -> Option<TimerKey> {
        self.subscriptions.get(subscription).map(|sub| sub.key)
    }

    /// Get a running timer.
    pub fn get(&self, key: TimerKey) -> Option<&Timer> {
        self.timers.get(&key)
    }

    /// Time elapsed on a running timer, or zero.
    pub fn elapsed(&self, key: TimerKey) -> Seconds {
        self.timers
            .get(&key)
            .map(|t| self.now.saturating_sub(t.started_at).min(t.duration()))
            .unwrap_or(Seconds::ZERO)
    }

    /// Total duration of a running timer, or zero.
    pub fn duration(&self, key: TimerKey) -> Seconds {
        self.timers
            .get(&key)
            .map(Timer::duration)
            .unwrap_or(Seconds::ZERO)
    }

    /// Completed fraction of a running timer in `0..=1`. Zero if not running.
    pub fn progress(&self, key: TimerKey) -> Seconds {
        let duration = self.duration(key);
        if duration <= Seconds::ZERO {
            return Seconds::ZERO;
        }
        self.elapsed(key)
            .checked_div(duration)
            .unwrap_or(Seconds::ONE)
            .clamp(Seconds::ZERO, Seconds::ONE)
    }

    /// Pull a running timer's end time forward to now so it fires on the
    /// next sweep. Returns `false` if `key` is not running.
    pub fn expire_now(&mut self, key: TimerKey) -> bool {
        let now = self.now;
        match self.timers.get_mut(&key) {
            Some(timer) => {
                timer.ends_at = timer.ends_at.min(now);
                true
            }
            None => false,
        }
    }

    /// Number of running timers.
    pub fn running_count(&self) -> usize {
        self.timers.len()
    }

    /// Number of live subscriptions.
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }

    /// Iterate running timers in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&TimerKey, &Timer)> {
        self.timers.iter()
    }
}

impl TimerRegistry for TimerManager {
    fn now(&self) -> Seconds {
        self.now
    }

    fn start_timer(&mut self, key: TimerKey, duration: Seconds) -> Result<(), TimerError> {
        if duration <= Seconds::ZERO {
            return Err(TimerError::InvalidDuration { key, duration });
        }
        if self.timers.contains_key(&key) {
            return Err(TimerError::AlreadyRunning(key));
        }

        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.timers.insert(
            key,
            Timer {
                started_at: self.now,
                ends_at: self.now.saturating_add(duration),
                sequence,
            },
        );
        tracing::trace!(key = %key, duration = %duration, "timer started");
        Ok(())
    }

    fn cancel_timer(&mut self, key: TimerKey) -> bool {
        let cancelled = self.timers.remove(&key).is_some();
        if cancelled {
            tracing::trace!(key = %key, "timer cancelled");
        }
        cancelled
    }

    fn is_running(&self, key: TimerKey) -> bool {
        self.timers.contains_key(&key)
    }

    fn remaining_time(&self, key: TimerKey) -> Seconds {
        self.timers
            .get(&key)
            .map(|t| t.ends_at.saturating_sub(self.now).max(Seconds::ZERO))
            .unwrap_or(Seconds::ZERO)
    }

    fn subscribe(&mut self, key: TimerKey) -> SubscriptionId {
        let order = self.next_subscription_order;
        self.next_subscription_order += 1;
        self.subscriptions.insert(Subscription { key, order })
    }

    fn unsubscribe(&mut self, subscription: SubscriptionId) -> bool {
        self.subscriptions.remove(subscription).is_some()
    }
}

/// Struct keys are not valid map keys in every format, so the table is
/// stored as a list of entries.
mod timer_table {
    use super::{Timer, TimerKey};
    use serde::{Deserialize, Deserializer, Serializer};
    use std::collections::BTreeMap;

    pub(super) fn serialize<S: Serializer>(
        table: &BTreeMap<TimerKey, Timer>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(table.iter())
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<BTreeMap<TimerKey, Timer>, D::Error> {
        let entries: Vec<(TimerKey, Timer)> = Vec::deserialize(deserializer)?;
        Ok(entries.into_iter().collect())
    }
}

// ===========================================================================
// Tests
// ===========================================================================
