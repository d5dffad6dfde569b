//! Construction lifecycle of a single structure.
//!
//! A [`Construction`] moves `Idle -> Building -> Built`. Starting a build with
//! a positive build time reserves a builder (if the structure needs one),
//! registers one countdown under the structure's build key, and notifies the
//! presentation sinks. Completion happens either when the countdown expires
//! ([`Construction::on_timer_expired`]) or when the host skips ahead
//! ([`Construction::build_complete`]); both paths run the same teardown.
//!
//! The structure keeps no "is building" flag of its own. Whether a build is
//! running is always asked of the [`TimerRegistry`], since debug and cheat
//! tools may start or cancel the countdown behind the lifecycle's back.
//!
//! Collaborators are injected per call through [`ConstructionContext`].

use crate::builder::{BuilderAllocator, BuilderError};
use crate::fixed::{seconds_to_f64, Seconds};
use crate::id::{BlueprintId, BuilderId, ResourceId, StructureId, SubscriptionId, TimerKey};
use crate::notify::{NotificationSink, UiAnchor, VisualState};
use crate::timer::{TimerError, TimerExpired, TimerRegistry};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Level data
// ---------------------------------------------------------------------------

/// What it takes to build a level: resources, prerequisites, and time.
///
/// Only `build_time` matters to the lifecycle. Resources and prerequisites
/// belong to the purchase economy and are carried through untouched.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BuildRequirement {
    pub resources: Vec<(ResourceId, u32)>,
    pub prerequisites: Vec<BlueprintId>,
    /// Zero or less means the build completes instantly.
    pub build_time: Seconds,
}

/// Data for one level of a structure. Replaced wholesale on level-up.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BuildLevel {
    pub max_hit_points: u32,
    pub build_cost: BuildRequirement,
}

/// Where a structure is in its current build cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConstructionPhase {
    Idle,
    Building,
    Built,
}

/// Which optional graphics a structure has.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct GraphicsSetup {
    pub construction_graphic: bool,
    pub upgrade_graphic: bool,
}

// ---------------------------------------------------------------------------
// Errors and outcomes
// ---------------------------------------------------------------------------

/// Reasons a build could not start.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConstructionError {
    #[error("structure {0} is already building")]
    AlreadyBuilding(StructureId),

    #[error("structure {0} has been demolished")]
    NotAlive(StructureId),

    #[error("structure {structure} could not reserve a builder: {source}")]
    Builder {
        structure: StructureId,
        #[source]
        source: BuilderError,
    },

    #[error(transparent)]
    Timer(#[from] TimerError),
}

/// How a successful [`Construction::start_build`] proceeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildStart {
    /// No build time: the structure is already built.
    Instant { completed_at: Seconds },
    /// A countdown is running under `key`.
    Timed {
        key: TimerKey,
        duration: Seconds,
        builder: Option<BuilderId>,
    },
}

/// What a completion request did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionOutcome {
    /// The build finished and all teardown ran.
    Completed {
        /// The countdown was still running and got cancelled.
        skipped: bool,
        /// The builder handed back to the pool, if one was held.
        released: Option<BuilderId>,
    },
    /// This cycle had already completed; nothing happened.
    AlreadyComplete,
    /// The structure is demolished; nothing happened.
    Demolished,
}

// ---------------------------------------------------------------------------
// Context
// ---------------------------------------------------------------------------

/// The collaborators a construction talks to during one operation.
pub struct ConstructionContext<'a> {
    pub timers: &'a mut dyn TimerRegistry,
    pub builders: &'a mut dyn BuilderAllocator,
    pub sink: &'a mut dyn NotificationSink,
}

/// Extension hook run after a timed build has started.
pub type BuildStartedHook = Box<dyn FnMut(&Construction)>;

// ---------------------------------------------------------------------------
// Construction
// ---------------------------------------------------------------------------

/// Per-structure construction state.
pub struct Construction {
    id: StructureId,
    uid: String,
    current_level: u32,
    level: BuildLevel,
    requires_builder: bool,
    alive: bool,
    phase: ConstructionPhase,
    graphics: GraphicsSetup,
    ui_offset: [f32; 3],
    subscription: Option<SubscriptionId>,
    /// The build-timer panel currently shows this structure's countdown.
    timer_shown: bool,
    /// End time of a countdown that expired while nobody was subscribed.
    lapsed_at: Option<Seconds>,
    on_build_started: Option<BuildStartedHook>,
}

impl std::fmt::Debug for Construction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Construction")
            .field("id", &self.id)
            .field("uid", &self.uid)
            .field("current_level", &self.current_level)
            .field("level", &self.level)
            .field("requires_builder", &self.requires_builder)
            .field("alive", &self.alive)
            .field("phase", &self.phase)
            .field("subscription", &self.subscription)
            .field("timer_shown", &self.timer_shown)
            .field("lapsed_at", &self.lapsed_at)
            .field("hook", &self.on_build_started.is_some())
            .finish_non_exhaustive()
    }
}

impl Construction {
    /// Create an idle, level-0 construction.
    pub fn new(
        id: StructureId,
        uid: impl Into<String>,
        level: BuildLevel,
        requires_builder: bool,
    ) -> Self {
        Self {
            id,
            uid: uid.into(),
            current_level: 0,
            level,
            requires_builder,
            alive: true,
            phase: ConstructionPhase::Idle,
            graphics: GraphicsSetup::default(),
            ui_offset: [0.0, 2.0, 0.0],
            subscription: None,
            timer_shown: false,
            lapsed_at: None,
            on_build_started: None,
        }
    }

    pub fn with_graphics(mut self, graphics: GraphicsSetup) -> Self {
        self.graphics = graphics;
        self
    }

    /// Offset at which the build-timer panel pins this structure's countdown.
    pub fn with_ui_offset(mut self, offset: [f32; 3]) -> Self {
        self.ui_offset = offset;
        self
    }

    /// Install a hook that runs after every timed build start.
    pub fn set_build_started_hook(&mut self, hook: BuildStartedHook) {
        self.on_build_started = Some(hook);
    }

    // -- Activation --

    /// Subscribe to this structure's build key. Idempotent.
    pub fn activate(&mut self, timers: &mut dyn TimerRegistry) -> SubscriptionId {
        if let Some(subscription) = self.subscription {
            return subscription;
        }
        let subscription = timers.subscribe(self.build_key());
        self.subscription = Some(subscription);
        subscription
    }

    /// Drop the build-key subscription. Returns `false` if not subscribed.
    ///
    /// A running countdown keeps running. If it expires before the structure
    /// is activated again, the host hands it to
    /// [`Construction::on_timer_lapsed`] instead.
    pub fn deactivate(&mut self, timers: &mut dyn TimerRegistry) -> bool {
        match self.subscription.take() {
            Some(subscription) => timers.unsubscribe(subscription),
            None => false,
        }
    }

    // -- Lifecycle --

    /// Begin building the current level.
    ///
    /// Starting while the build key is already running is rejected with
    /// [`ConstructionError::AlreadyBuilding`] and has no side effects. So does
    /// failing to reserve a builder.
    pub fn start_build(
        &mut self,
        ctx: &mut ConstructionContext<'_>,
    ) -> Result<BuildStart, ConstructionError> {
        if !self.alive {
            return Err(ConstructionError::NotAlive(self.id));
        }
        let key = self.build_key();
        if ctx.timers.is_running(key) {
            tracing::warn!(structure = %self.id, key = %key, "build already running");
            return Err(ConstructionError::AlreadyBuilding(self.id));
        }
        self.reclaim_stale_cycle(ctx);

        let duration = self.level.build_cost.build_time;
        if duration <= Seconds::ZERO {
            let completed_at = ctx.timers.now();
            self.finish(ctx, completed_at);
            return Ok(BuildStart::Instant { completed_at });
        }

        let builder = if self.requires_builder {
            match ctx.builders.assign(self.id) {
                Ok(builder) => Some(builder),
                Err(source) => {
                    tracing::warn!(structure = %self.id, error = %source, "no builder for build");
                    return Err(ConstructionError::Builder {
                        structure: self.id,
                        source,
                    });
                }
            }
        } else {
            None
        };

        if let Err(err) = ctx.timers.start_timer(key, duration) {
            if builder.is_some() {
                ctx.builders.release(self.id);
            }
            return Err(err.into());
        }

        ctx.sink
            .add_build_timer(key, &key.label(&self.uid), self.ui_anchor());
        self.timer_shown = true;
        ctx.sink.set_visuals(self.id, self.building_visuals());
        ctx.sink.build_started(self.id, key);
        self.phase = ConstructionPhase::Building;

        tracing::debug!(
            structure = %self.id,
            uid = %self.uid,
            level = self.current_level,
            duration = %duration,
            builder = ?builder,
            "build started"
        );

        if let Some(mut hook) = self.on_build_started.take() {
            hook(&*self);
            self.on_build_started = Some(hook);
        }

        Ok(BuildStart::Timed {
            key,
            duration,
            builder,
        })
    }

    /// Handle an expiration routed from the timer registry. Events for any
    /// other key are ignored and return `None`.
    pub fn on_timer_expired(
        &mut self,
        ctx: &mut ConstructionContext<'_>,
        event: &TimerExpired,
    ) -> Option<CompletionOutcome> {
        if event.key != self.build_key() {
            return None;
        }
        Some(self.build_complete(ctx, event.end_time))
    }

    /// Handle an expiration of this structure's build key that reached no
    /// subscriber, e.g. while the structure was deactivated.
    ///
    /// The builder goes back to the pool and the panel entry is removed right
    /// away. Completion itself waits for
    /// [`Construction::resume`]. Returns `false` if the event was not for a
    /// running build of this structure or was already handled.
    pub fn on_timer_lapsed(
        &mut self,
        ctx: &mut ConstructionContext<'_>,
        event: &TimerExpired,
    ) -> bool {
        if event.key != self.build_key()
            || !self.alive
            || self.phase != ConstructionPhase::Building
            || self.lapsed_at.is_some()
            || ctx.timers.is_running(event.key)
        {
            return false;
        }
        let released = ctx.builders.release(self.id);
        self.hide_build_timer(ctx);
        self.lapsed_at = Some(event.end_time);

        tracing::debug!(
            structure = %self.id,
            end_time = %event.end_time,
            released = ?released,
            "build timer lapsed unobserved"
        );
        true
    }

    /// Complete a build whose countdown lapsed while unobserved. Returns
    /// `None` if there is nothing to catch up on.
    pub fn resume(&mut self, ctx: &mut ConstructionContext<'_>) -> Option<CompletionOutcome> {
        let lapsed_at = self.lapsed_at?;
        if self.phase != ConstructionPhase::Building || ctx.timers.is_running(self.build_key()) {
            self.lapsed_at = None;
            return None;
        }
        Some(self.build_complete(ctx, lapsed_at))
    }

    /// Finish the current build, cancelling the countdown if it is still
    /// running (the skip path).
    ///
    /// Safe to call repeatedly: once a cycle has completed and no countdown is
    /// running, further calls return [`CompletionOutcome::AlreadyComplete`]
    /// without side effects. Calling it on a structure that never started a
    /// build is the caller's responsibility and is treated as a forced
    /// completion.
    pub fn build_complete(
        &mut self,
        ctx: &mut ConstructionContext<'_>,
        completed_at: Seconds,
    ) -> CompletionOutcome {
        if !self.alive {
            return CompletionOutcome::Demolished;
        }
        if self.phase == ConstructionPhase::Built && !ctx.timers.is_running(self.build_key()) {
            tracing::debug!(structure = %self.id, "completion ignored, already built");
            return CompletionOutcome::AlreadyComplete;
        }
        self.finish(ctx, completed_at)
    }

    /// Teardown shared by every completion path.
    fn finish(&mut self, ctx: &mut ConstructionContext<'_>, completed_at: Seconds) -> CompletionOutcome {
        let key = self.build_key();

        ctx.sink.set_visuals(self.id, VisualState::FINISHED);
        let skipped = ctx.timers.is_running(key) && ctx.timers.cancel_timer(key);
        let released = ctx.builders.release(self.id);
        self.hide_build_timer(ctx);
        ctx.sink.build_complete(self.id, completed_at);
        ctx.sink.play_build_sound(self.id);
        self.phase = ConstructionPhase::Built;
        self.lapsed_at = None;

        tracing::info!(
            structure = %self.id,
            uid = %self.uid,
            level = self.current_level,
            completed_at = %completed_at,
            skipped,
            "build complete"
        );

        CompletionOutcome::Completed { skipped, released }
    }

    /// Drop what a build cycle still holds after its countdown vanished
    /// without completing (cancelled directly on the registry, or lapsed).
    /// The structure goes back to `Idle`.
    fn reclaim_stale_cycle(&mut self, ctx: &mut ConstructionContext<'_>) {
        if self.phase != ConstructionPhase::Building || ctx.timers.is_running(self.build_key()) {
            return;
        }
        let released = ctx.builders.release(self.id);
        self.hide_build_timer(ctx);
        self.lapsed_at = None;
        self.phase = ConstructionPhase::Idle;
        tracing::warn!(structure = %self.id, released = ?released, "reclaimed stale build cycle");
    }

    fn hide_build_timer(&mut self, ctx: &mut ConstructionContext<'_>) {
        if std::mem::take(&mut self.timer_shown) {
            ctx.sink.remove_build_timer(self.build_key());
        }
    }

    /// Move to the next level and build it.
    ///
    /// Rejected while a build is running. If the new build cannot start, the
    /// previous level is restored.
    pub fn begin_upgrade(
        &mut self,
        ctx: &mut ConstructionContext<'_>,
        next: BuildLevel,
    ) -> Result<BuildStart, ConstructionError> {
        if !self.alive {
            return Err(ConstructionError::NotAlive(self.id));
        }
        if ctx.timers.is_running(self.build_key()) {
            return Err(ConstructionError::AlreadyBuilding(self.id));
        }
        self.reclaim_stale_cycle(ctx);

        let previous_level = std::mem::replace(&mut self.level, next);
        let previous_phase = self.phase;
        self.current_level += 1;
        self.phase = ConstructionPhase::Idle;

        match self.start_build(ctx) {
            Ok(start) => {
                tracing::info!(structure = %self.id, level = self.current_level, "upgrade started");
                Ok(start)
            }
            Err(err) => {
                self.level = previous_level;
                self.current_level -= 1;
                self.phase = previous_phase;
                Err(err)
            }
        }
    }

    /// Take the structure out of play.
    ///
    /// A running build is cancelled without completing: the countdown and the
    /// panel entry are removed and the builder goes back to the pool. Returns
    /// `true` if a build was interrupted.
    pub fn demolish(&mut self, ctx: &mut ConstructionContext<'_>) -> bool {
        if !self.alive {
            return false;
        }
        let key = self.build_key();
        let interrupted = ctx.timers.cancel_timer(key);
        ctx.builders.release(self.id);
        self.hide_build_timer(ctx);
        ctx.sink.set_visuals(self.id, VisualState::HIDDEN);
        self.deactivate(ctx.timers);
        self.alive = false;
        self.lapsed_at = None;
        self.phase = ConstructionPhase::Idle;

        tracing::info!(structure = %self.id, interrupted, "structure demolished");
        interrupted
    }

    // -- Queries --

    pub fn id(&self) -> StructureId {
        self.id
    }

    /// Textual uid used for display labels.
    pub fn uid(&self) -> &str {
        &self.uid
    }

    pub fn build_key(&self) -> TimerKey {
        TimerKey::build(self.id)
    }

    /// Whether the registry reports this structure's countdown as running.
    pub fn is_building(&self, timers: &dyn TimerRegistry) -> bool {
        timers.is_running(self.build_key())
    }

    /// Seconds left on the build, or 0 when not building.
    pub fn construction_time_remaining(&self, timers: &dyn TimerRegistry) -> f64 {
        if !self.is_building(timers) {
            return 0.0;
        }
        seconds_to_f64(timers.remaining_time(self.build_key()))
    }

    /// Cost descriptor of the current level.
    pub fn building_cost(&self) -> &BuildRequirement {
        &self.level.build_cost
    }

    pub fn level(&self) -> &BuildLevel {
        &self.level
    }

    pub fn max_hit_points(&self) -> u32 {
        self.level.max_hit_points
    }

    pub fn current_level(&self) -> u32 {
        self.current_level
    }

    pub fn phase(&self) -> ConstructionPhase {
        self.phase
    }

    pub fn is_alive(&self) -> bool {
        self.alive
    }

    pub fn requires_builder(&self) -> bool {
        self.requires_builder
    }

    pub fn graphics(&self) -> GraphicsSetup {
        self.graphics
    }

    pub fn subscription(&self) -> Option<SubscriptionId> {
        self.subscription
    }

    /// End time of a countdown that expired unobserved and has not been
    /// caught up on yet.
    pub fn lapsed_at(&self) -> Option<Seconds> {
        self.lapsed_at
    }

    fn ui_anchor(&self) -> UiAnchor {
        UiAnchor {
            structure: self.id,
            offset: self.ui_offset,
        }
    }

    /// Scaffolding replaces the model when present; the upgrade overlay only
    /// shows when rebuilding past level 0.
    fn building_visuals(&self) -> VisualState {
        VisualState {
            construction_graphic: self.graphics.construction_graphic,
            model: !self.graphics.construction_graphic,
            upgrade_graphic: self.graphics.upgrade_graphic && self.current_level > 0,
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::{ConstructionEvent, EventKind};
    use crate::test_utils::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn castle(h: &mut Harness, build_time: f64, requires_builder: bool) -> Construction {
        let mut c = Construction::new(
            StructureId(1),
            "castle1",
            level(500, build_time),
            requires_builder,
        );
        c.activate(&mut h.timers);
        c
    }

    #[test]
    fn timed_build_registers_one_timer() {
        let mut h = Harness::new(1);
        let mut c = castle(&mut h, 30.0, true);

        let start = c.start_build(&mut h.ctx()).unwrap();
        assert_eq!(
            start,
            BuildStart::Timed {
                key: TimerKey::build(StructureId(1)),
                duration: secs(30.0),
                builder: Some(BuilderId(0)),
            }
        );
        assert!(c.is_building(&h.timers));
        assert_eq!(c.phase(), ConstructionPhase::Building);
        assert_eq!(c.construction_time_remaining(&h.timers), 30.0);
        assert_eq!(h.timers.running_count(), 1);
        assert_eq!(h.builders.busy_count(), 1);
        assert_eq!(h.sink.count(EventKind::BuildStarted), 1);
        assert!(h.sink.events.iter().any(|e| matches!(
            e,
            ConstructionEvent::TimerAdded { label, .. } if label == "castle1_build"
        )));
    }

    #[test]
    fn instant_build_never_touches_timer_or_builder() {
        let mut h = Harness::new(1);
        let mut c = castle(&mut h, 0.0, true);

        let start = c.start_build(&mut h.ctx()).unwrap();
        assert_eq!(start, BuildStart::Instant { completed_at: Seconds::ZERO });
        assert!(!c.is_building(&h.timers));
        assert_eq!(c.phase(), ConstructionPhase::Built);
        assert_eq!(h.timers.running_count(), 0);
        assert_eq!(h.builders.idle_count(), 1);
        assert_eq!(h.sink.count(EventKind::BuildStarted), 0);
        assert_eq!(h.sink.count(EventKind::BuildCompleted), 1);
        assert_eq!(h.sink.count(EventKind::SoundRequested), 1);
    }

    #[test]
    fn negative_build_time_is_instant() {
        let mut h = Harness::new(0);
        let mut c = castle(&mut h, -5.0, true);
        assert!(matches!(
            c.start_build(&mut h.ctx()),
            Ok(BuildStart::Instant { .. })
        ));
    }

    #[test]
    fn duplicate_start_rejected_without_side_effects() {
        let mut h = Harness::new(2);
        let mut c = castle(&mut h, 10.0, true);
        c.start_build(&mut h.ctx()).unwrap();
        let events_before = h.sink.events.len();

        let err = c.start_build(&mut h.ctx()).unwrap_err();
        assert_eq!(err, ConstructionError::AlreadyBuilding(StructureId(1)));
        assert_eq!(h.builders.busy_count(), 1);
        assert_eq!(h.timers.running_count(), 1);
        assert_eq!(h.sink.events.len(), events_before);
    }

    #[test]
    fn missing_builder_fails_without_timer() {
        let mut h = Harness::new(0);
        let mut c = castle(&mut h, 10.0, true);

        let err = c.start_build(&mut h.ctx()).unwrap_err();
        assert!(matches!(
            err,
            ConstructionError::Builder {
                source: BuilderError::Exhausted { capacity: 0 },
                ..
            }
        ));
        assert!(!c.is_building(&h.timers));
        assert_eq!(c.phase(), ConstructionPhase::Idle);
        assert!(h.sink.events.is_empty());
    }

    #[test]
    fn builder_not_requested_when_not_required() {
        let mut h = Harness::new(0);
        let mut c = castle(&mut h, 10.0, false);
        let start = c.start_build(&mut h.ctx()).unwrap();
        assert!(matches!(start, BuildStart::Timed { builder: None, .. }));
    }

    #[test]
    fn expiration_completes_and_releases_builder() {
        let mut h = Harness::new(1);
        let mut c = castle(&mut h, 30.0, true);
        c.start_build(&mut h.ctx()).unwrap();

        let expired = h.timers.advance(secs(30.0));
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].subscribers, vec![c.subscription().unwrap()]);

        let outcome = c.on_timer_expired(&mut h.ctx(), &expired[0]);
        assert_eq!(
            outcome,
            Some(CompletionOutcome::Completed {
                skipped: false,
                released: Some(BuilderId(0)),
            })
        );
        assert!(!c.is_building(&h.timers));
        assert_eq!(c.construction_time_remaining(&h.timers), 0.0);
        assert_eq!(h.builders.idle_count(), 1);
        assert_eq!(h.sink.count(EventKind::TimerRemoved), 1);
        assert_eq!(
            h.sink.last(EventKind::BuildCompleted),
            Some(&ConstructionEvent::BuildCompleted {
                structure: StructureId(1),
                completed_at: secs(30.0),
            })
        );
    }

    #[test]
    fn foreign_expiration_ignored() {
        let mut h = Harness::new(1);
        let mut c = castle(&mut h, 30.0, true);
        c.start_build(&mut h.ctx()).unwrap();

        let foreign = TimerExpired {
            key: TimerKey::build(StructureId(2)),
            end_time: secs(1.0),
            subscribers: Vec::new(),
        };
        assert_eq!(c.on_timer_expired(&mut h.ctx(), &foreign), None);
        let custom = TimerExpired {
            key: TimerKey::custom(StructureId(1), 0),
            end_time: secs(1.0),
            subscribers: Vec::new(),
        };
        assert_eq!(c.on_timer_expired(&mut h.ctx(), &custom), None);
        assert!(c.is_building(&h.timers));
        assert_eq!(h.sink.count(EventKind::BuildCompleted), 0);
    }

    #[test]
    fn skip_cancels_timer() {
        let mut h = Harness::new(1);
        let mut c = castle(&mut h, 30.0, true);
        c.start_build(&mut h.ctx()).unwrap();
        h.timers.advance(secs(5.0));

        let now = h.timers.now();
        let outcome = c.build_complete(&mut h.ctx(), now);
        assert_eq!(
            outcome,
            CompletionOutcome::Completed {
                skipped: true,
                released: Some(BuilderId(0)),
            }
        );
        assert_eq!(h.timers.running_count(), 0);
        assert!(h.timers.advance(secs(60.0)).is_empty());
    }

    #[test]
    fn double_completion_is_harmless() {
        let mut h = Harness::new(1);
        let mut c = castle(&mut h, 30.0, true);
        c.start_build(&mut h.ctx()).unwrap();

        let now = h.timers.now();
        assert!(matches!(
            c.build_complete(&mut h.ctx(), now),
            CompletionOutcome::Completed { .. }
        ));
        let events_after_first = h.sink.events.len();

        assert_eq!(
            c.build_complete(&mut h.ctx(), now),
            CompletionOutcome::AlreadyComplete
        );
        assert_eq!(h.sink.events.len(), events_after_first);
        assert_eq!(h.builders.idle_count(), 1);
    }

    #[test]
    fn stale_expiration_after_skip_is_ignored() {
        let mut h = Harness::new(1);
        let mut c = castle(&mut h, 30.0, true);
        c.start_build(&mut h.ctx()).unwrap();
        c.build_complete(&mut h.ctx(), secs(0.0));

        let stale = TimerExpired {
            key: c.build_key(),
            end_time: secs(30.0),
            subscribers: Vec::new(),
        };
        assert_eq!(
            c.on_timer_expired(&mut h.ctx(), &stale),
            Some(CompletionOutcome::AlreadyComplete)
        );
        assert_eq!(h.sink.count(EventKind::BuildCompleted), 1);
    }

    #[test]
    fn externally_restarted_timer_is_reported_as_building() {
        let mut h = Harness::new(1);
        let mut c = castle(&mut h, 0.0, false);
        c.start_build(&mut h.ctx()).unwrap();
        assert!(!c.is_building(&h.timers));

        // A debug tool starts the countdown directly.
        h.timers.start_timer(c.build_key(), secs(4.0)).unwrap();
        assert!(c.is_building(&h.timers));
        assert_eq!(c.construction_time_remaining(&h.timers), 4.0);

        // Completion must cancel it even though the phase already says Built.
        assert!(matches!(
            c.build_complete(&mut h.ctx(), secs(0.0)),
            CompletionOutcome::Completed { skipped: true, .. }
        ));
    }

    #[test]
    fn visuals_follow_graphics_setup() {
        let mut h = Harness::new(1);
        let mut c = castle(&mut h, 10.0, false).with_graphics(GraphicsSetup {
            construction_graphic: true,
            upgrade_graphic: true,
        });
        c.start_build(&mut h.ctx()).unwrap();
        assert_eq!(
            h.sink.last(EventKind::VisualsChanged),
            Some(&ConstructionEvent::VisualsChanged {
                structure: StructureId(1),
                visuals: VisualState {
                    construction_graphic: true,
                    model: false,
                    upgrade_graphic: false,
                },
            })
        );

        c.build_complete(&mut h.ctx(), secs(1.0));
        assert_eq!(
            h.sink.last(EventKind::VisualsChanged),
            Some(&ConstructionEvent::VisualsChanged {
                structure: StructureId(1),
                visuals: VisualState::FINISHED,
            })
        );

        c.begin_upgrade(&mut h.ctx(), level(800, 20.0)).unwrap();
        assert!(matches!(
            h.sink.last(EventKind::VisualsChanged),
            Some(ConstructionEvent::VisualsChanged {
                visuals: VisualState {
                    upgrade_graphic: true,
                    ..
                },
                ..
            })
        ));
    }

    #[test]
    fn build_started_hook_runs_for_timed_builds_only() {
        let mut h = Harness::new(1);
        let calls = Rc::new(RefCell::new(Vec::new()));
        let calls_clone = calls.clone();

        let mut timed = castle(&mut h, 10.0, false);
        timed.set_build_started_hook(Box::new(move |c| {
            calls_clone.borrow_mut().push(c.current_level());
        }));
        timed.start_build(&mut h.ctx()).unwrap();

        let calls_clone = calls.clone();
        let mut instant = Construction::new(StructureId(2), "wall2", level(50, 0.0), false);
        instant.set_build_started_hook(Box::new(move |c| {
            calls_clone.borrow_mut().push(c.current_level());
        }));
        instant.start_build(&mut h.ctx()).unwrap();

        assert_eq!(*calls.borrow(), vec![0]);
    }

    #[test]
    fn upgrade_replaces_level_and_rebuilds() {
        let mut h = Harness::new(1);
        let mut c = castle(&mut h, 10.0, true);
        c.start_build(&mut h.ctx()).unwrap();
        c.build_complete(&mut h.ctx(), secs(10.0));

        let start = c.begin_upgrade(&mut h.ctx(), level(900, 45.0)).unwrap();
        assert!(matches!(start, BuildStart::Timed { .. }));
        assert_eq!(c.current_level(), 1);
        assert_eq!(c.max_hit_points(), 900);
        assert_eq!(c.building_cost().build_time, secs(45.0));
        assert_eq!(c.phase(), ConstructionPhase::Building);
        assert_eq!(h.builders.busy_count(), 1);
    }

    #[test]
    fn upgrade_while_building_rejected() {
        let mut h = Harness::new(2);
        let mut c = castle(&mut h, 10.0, true);
        c.start_build(&mut h.ctx()).unwrap();

        let err = c.begin_upgrade(&mut h.ctx(), level(900, 45.0)).unwrap_err();
        assert_eq!(err, ConstructionError::AlreadyBuilding(StructureId(1)));
        assert_eq!(c.current_level(), 0);
        assert_eq!(c.max_hit_points(), 500);
        assert_eq!(h.builders.busy_count(), 1);
    }

    #[test]
    fn failed_upgrade_restores_previous_level() {
        let mut h = Harness::new(0);
        let mut c = castle(&mut h, 0.0, true);
        c.start_build(&mut h.ctx()).unwrap();

        let err = c.begin_upgrade(&mut h.ctx(), level(900, 45.0)).unwrap_err();
        assert!(matches!(err, ConstructionError::Builder { .. }));
        assert_eq!(c.current_level(), 0);
        assert_eq!(c.max_hit_points(), 500);
        assert_eq!(c.phase(), ConstructionPhase::Built);
    }

    #[test]
    fn demolish_interrupts_build() {
        let mut h = Harness::new(1);
        let mut c = castle(&mut h, 30.0, true);
        c.start_build(&mut h.ctx()).unwrap();

        assert!(c.demolish(&mut h.ctx()));
        assert!(!c.is_alive());
        assert!(!c.is_building(&h.timers));
        assert_eq!(h.builders.idle_count(), 1);
        assert_eq!(h.timers.subscription_count(), 0);
        assert_eq!(h.sink.count(EventKind::BuildCompleted), 0);
        assert_eq!(h.sink.count(EventKind::TimerRemoved), 1);

        assert_eq!(
            c.start_build(&mut h.ctx()),
            Err(ConstructionError::NotAlive(StructureId(1)))
        );
        assert_eq!(
            c.build_complete(&mut h.ctx(), secs(1.0)),
            CompletionOutcome::Demolished
        );
        assert!(!c.demolish(&mut h.ctx()));
    }

    #[test]
    fn activation_is_idempotent() {
        let mut h = Harness::new(0);
        let mut c = Construction::new(StructureId(3), "tower3", level(10, 1.0), false);
        let a = c.activate(&mut h.timers);
        let b = c.activate(&mut h.timers);
        assert_eq!(a, b);
        assert_eq!(h.timers.subscription_count(), 1);

        assert!(c.deactivate(&mut h.timers));
        assert!(!c.deactivate(&mut h.timers));
        assert_eq!(h.timers.subscription_count(), 0);
    }

    #[test]
    fn forced_completion_of_idle_structure_removes_no_panel_entry() {
        let mut h = Harness::new(1);
        let mut c = castle(&mut h, 30.0, true);

        assert!(matches!(
            c.build_complete(&mut h.ctx(), secs(0.0)),
            CompletionOutcome::Completed {
                skipped: false,
                released: None,
            }
        ));
        assert_eq!(h.sink.count(EventKind::TimerRemoved), 0);
        assert_eq!(h.sink.count(EventKind::BuildCompleted), 1);
        assert_eq!(
            c.build_complete(&mut h.ctx(), secs(0.0)),
            CompletionOutcome::AlreadyComplete
        );
    }

    #[test]
    fn unobserved_expiration_releases_builder_until_resume() {
        let mut h = Harness::new(1);
        let mut c = castle(&mut h, 30.0, true);
        c.start_build(&mut h.ctx()).unwrap();
        c.deactivate(&mut h.timers);

        let expired = h.timers.advance(secs(31.0));
        assert!(expired[0].subscribers.is_empty());
        assert!(c.on_timer_lapsed(&mut h.ctx(), &expired[0]));
        assert!(!c.on_timer_lapsed(&mut h.ctx(), &expired[0]));

        assert_eq!(h.builders.assigned(StructureId(1)), None);
        assert_eq!(h.sink.count(EventKind::TimerRemoved), 1);
        assert_eq!(h.sink.count(EventKind::BuildCompleted), 0);
        assert_eq!(c.phase(), ConstructionPhase::Building);
        assert_eq!(c.lapsed_at(), Some(secs(30.0)));

        c.activate(&mut h.timers);
        assert_eq!(
            c.resume(&mut h.ctx()),
            Some(CompletionOutcome::Completed {
                skipped: false,
                released: None,
            })
        );
        assert_eq!(
            h.sink.last(EventKind::BuildCompleted),
            Some(&ConstructionEvent::BuildCompleted {
                structure: StructureId(1),
                completed_at: secs(30.0),
            })
        );
        assert_eq!(h.sink.count(EventKind::TimerRemoved), 1);
        assert_eq!(c.resume(&mut h.ctx()), None);
    }

    #[test]
    fn lapse_ignored_for_other_keys_and_idle_structures() {
        let mut h = Harness::new(1);
        let mut c = castle(&mut h, 30.0, true);
        let idle = TimerExpired {
            key: c.build_key(),
            end_time: secs(1.0),
            subscribers: Vec::new(),
        };
        assert!(!c.on_timer_lapsed(&mut h.ctx(), &idle));

        c.start_build(&mut h.ctx()).unwrap();
        let foreign = TimerExpired {
            key: TimerKey::build(StructureId(9)),
            end_time: secs(1.0),
            subscribers: Vec::new(),
        };
        assert!(!c.on_timer_lapsed(&mut h.ctx(), &foreign));
        // Still running: not a lapse.
        assert!(!c.on_timer_lapsed(&mut h.ctx(), &idle));
        assert_eq!(h.builders.busy_count(), 1);
    }

    #[test]
    fn restart_after_external_cancel_reclaims_builder() {
        let mut h = Harness::new(1);
        let mut c = castle(&mut h, 30.0, true);
        c.start_build(&mut h.ctx()).unwrap();
        assert!(h.timers.cancel_timer(c.build_key()));
        assert_eq!(h.builders.busy_count(), 1);

        let start = c.start_build(&mut h.ctx()).unwrap();
        assert!(matches!(start, BuildStart::Timed { builder: Some(_), .. }));
        assert_eq!(h.builders.busy_count(), 1);
        assert_eq!(h.timers.running_count(), 1);
        assert_eq!(h.sink.count(EventKind::TimerAdded), 2);
        assert_eq!(h.sink.count(EventKind::TimerRemoved), 1);
    }

    #[test]
    fn upgrade_after_external_cancel_reclaims_builder() {
        let mut h = Harness::new(1);
        let mut c = castle(&mut h, 30.0, true);
        c.start_build(&mut h.ctx()).unwrap();
        h.timers.cancel_timer(c.build_key());

        c.begin_upgrade(&mut h.ctx(), level(900, 45.0)).unwrap();
        assert_eq!(c.current_level(), 1);
        assert_eq!(h.builders.busy_count(), 1);
        assert_eq!(c.construction_time_remaining(&h.timers), 45.0);
    }

    /// Registry that refuses every new countdown.
    struct RefusingTimers(crate::timer::TimerManager);

    impl TimerRegistry for RefusingTimers {
        fn now(&self) -> Seconds {
            self.0.now()
        }
        fn start_timer(&mut self, key: TimerKey, _: Seconds) -> Result<(), TimerError> {
            Err(TimerError::AlreadyRunning(key))
        }
        fn cancel_timer(&mut self, key: TimerKey) -> bool {
            self.0.cancel_timer(key)
        }
        fn is_running(&self, key: TimerKey) -> bool {
            self.0.is_running(key)
        }
        fn remaining_time(&self, key: TimerKey) -> Seconds {
            self.0.remaining_time(key)
        }
        fn subscribe(&mut self, key: TimerKey) -> SubscriptionId {
            self.0.subscribe(key)
        }
        fn unsubscribe(&mut self, subscription: SubscriptionId) -> bool {
            self.0.unsubscribe(subscription)
        }
    }

    #[test]
    fn timer_failure_returns_builder() {
        let mut timers = RefusingTimers(crate::timer::TimerManager::new());
        let mut builders = crate::builder::BuilderPool::new(1);
        let mut sink = RecordingSink::default();
        let mut c = Construction::new(StructureId(1), "castle1", level(500, 10.0), true);

        let mut ctx = ConstructionContext {
            timers: &mut timers,
            builders: &mut builders,
            sink: &mut sink,
        };
        let err = c.start_build(&mut ctx).unwrap_err();
        assert!(matches!(err, ConstructionError::Timer(TimerError::AlreadyRunning(_))));
        assert_eq!(builders.idle_count(), 1);
        assert_eq!(c.phase(), ConstructionPhase::Idle);
        assert!(sink.events.is_empty());
    }
}
