//! Bastion Core -- the construction lifecycle for strategy-game structures.
//!
//! A structure goes `Idle -> Building -> Built` for each level. Timed builds
//! hold one countdown in a keyed timer registry and, optionally, one builder
//! from a shared pool. Completion is reached by the countdown expiring or by
//! the host skipping ahead, and either way releases what the build held and
//! notifies presentation sinks.
//!
//! # Step Pipeline
//!
//! Each call to [`settlement::Settlement::step`]:
//!
//! 1. **Sweep** -- Advance the clock, remove expired timers.
//! 2. **Route** -- Hand each expiration to the structures subscribed to its key.
//! 3. **Deliver** -- Flush buffered notifications to passive listeners.
//!
//! # Key Types
//!
//! - [`construction::Construction`] -- Per-structure lifecycle state machine.
//! - [`timer::TimerRegistry`] / [`timer::TimerManager`] -- Keyed countdowns
//!   with per-key expiration subscriptions.
//! - [`builder::BuilderAllocator`] / [`builder::BuilderPool`] -- Scarce
//!   builder units.
//! - [`notify::NotificationSink`] / [`notify::NotificationBus`] -- Visual,
//!   UI, and audio notifications.
//! - [`blueprint::BlueprintRegistry`] -- Immutable structure kinds and their
//!   levels.
//! - [`fixed::Seconds`] -- Q32.32 fixed-point simulation time.

pub mod blueprint;
pub mod builder;
pub mod config;
pub mod construction;
pub mod fixed;
pub mod id;
pub mod notify;
pub mod settlement;
pub mod timer;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
