//! The host side of the construction lifecycle.
//!
//! A [`Settlement`] owns the timer registry, the builder pool, the
//! notification bus, and every placed structure. Each [`Settlement::step`]:
//!
//! 1. **Sweep** -- advance the clock and collect expired timers.
//! 2. **Route** -- hand each expiration to the structures subscribed to its key.
//! 3. **Deliver** -- flush buffered notifications to passive listeners.

use crate::blueprint::BlueprintRegistry;
use crate::builder::BuilderPool;
use crate::config::SettlementConfig;
use crate::construction::{
    BuildRequirement, BuildStart, BuildStartedHook, CompletionOutcome, Construction,
    ConstructionContext, ConstructionError,
};
use crate::fixed::Seconds;
use crate::id::{BlueprintId, StructureId, SubscriptionId, TimerKey};
use crate::notify::NotificationBus;
use crate::timer::{TimerManager, TimerRegistry};
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SettlementError {
    #[error("unknown blueprint: {0:?}")]
    UnknownBlueprint(BlueprintId),
    #[error("unknown structure: {0}")]
    UnknownStructure(StructureId),
    #[error("uid already in use: {0}")]
    DuplicateUid(String),
    #[error("structure {structure} is already at its top level ({level})")]
    MaxLevelReached { structure: StructureId, level: u32 },
    #[error(transparent)]
    Construction(#[from] ConstructionError),
}

/// What happened during one [`Settlement::step`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StepReport {
    /// Keys that expired this step, in sweep order.
    pub expired: Vec<TimerKey>,
    /// Structures whose build completed through expiration.
    pub completed: Vec<StructureId>,
    /// Structures whose build countdown expired while they were inactive.
    pub lapsed: Vec<StructureId>,
}

#[derive(Debug)]
struct Placed {
    blueprint: BlueprintId,
    construction: Construction,
}

/// All structures of one settlement plus the services they share.
#[derive(Debug)]
pub struct Settlement {
    config: SettlementConfig,
    registry: BlueprintRegistry,
    timers: TimerManager,
    builders: BuilderPool,
    bus: NotificationBus,
    structures: BTreeMap<StructureId, Placed>,
    uids: HashMap<String, StructureId>,
    routes: HashMap<SubscriptionId, StructureId>,
    next_id: u64,
}

impl Settlement {
    pub fn new(config: SettlementConfig, registry: BlueprintRegistry) -> Self {
        Self {
            timers: TimerManager::new(),
            builders: BuilderPool::new(config.builder_count),
            bus: NotificationBus::new(config.event_buffer_capacity),
            registry,
            config,
            structures: BTreeMap::new(),
            uids: HashMap::new(),
            routes: HashMap::new(),
            next_id: 0,
        }
    }

    // -----------------------------------------------------------------------
    // Structure management
    // -----------------------------------------------------------------------

    /// Place a level-0 structure of `blueprint`, idle and subscribed.
    pub fn spawn(&mut self, blueprint: BlueprintId, uid: &str) -> Result<StructureId, SettlementError> {
        if self.uids.contains_key(uid) {
            return Err(SettlementError::DuplicateUid(uid.to_string()));
        }
        let bp = self
            .registry
            .get(blueprint)
            .ok_or(SettlementError::UnknownBlueprint(blueprint))?;
        let first = bp
            .levels
            .first()
            .cloned()
            .ok_or(SettlementError::UnknownBlueprint(blueprint))?;

        let id = StructureId(self.next_id);
        self.next_id += 1;

        let mut construction = Construction::new(id, uid, first, bp.requires_builder)
            .with_graphics(bp.graphics)
            .with_ui_offset(self.config.ui_timer_offset);
        let subscription = construction.activate(&mut self.timers);
        self.routes.insert(subscription, id);
        self.uids.insert(uid.to_string(), id);
        self.structures.insert(
            id,
            Placed {
                blueprint,
                construction,
            },
        );

        tracing::debug!(structure = %id, uid, blueprint = ?blueprint, "structure spawned");
        Ok(id)
    }

    /// Install a build-started hook on a structure.
    pub fn set_build_started_hook(
        &mut self,
        id: StructureId,
        hook: BuildStartedHook,
    ) -> Result<(), SettlementError> {
        self.placed_mut(id)?.construction.set_build_started_hook(hook);
        Ok(())
    }

    /// Subscribe or unsubscribe a structure from its build key.
    ///
    /// An inactive structure still counts down. If the countdown runs out
    /// meanwhile, its builder is released at once and the build completes
    /// when the structure is reactivated; the completion is returned then.
    pub fn set_active(
        &mut self,
        id: StructureId,
        active: bool,
    ) -> Result<Option<CompletionOutcome>, SettlementError> {
        let Self {
            timers,
            builders,
            bus,
            structures,
            routes,
            ..
        } = self;
        let placed = structures
            .get_mut(&id)
            .ok_or(SettlementError::UnknownStructure(id))?;
        if !active {
            if let Some(subscription) = placed.construction.subscription() {
                routes.remove(&subscription);
                placed.construction.deactivate(&mut *timers);
            }
            return Ok(None);
        }

        let subscription = placed.construction.activate(&mut *timers);
        routes.insert(subscription, id);
        let mut ctx = ConstructionContext {
            timers,
            builders,
            sink: bus,
        };
        Ok(placed.construction.resume(&mut ctx))
    }

    /// Remove a structure, interrupting any running build. Returns whether a
    /// build was interrupted.
    pub fn demolish(&mut self, id: StructureId) -> Result<bool, SettlementError> {
        let mut placed = self
            .structures
            .remove(&id)
            .ok_or(SettlementError::UnknownStructure(id))?;
        if let Some(subscription) = placed.construction.subscription() {
            self.routes.remove(&subscription);
        }
        self.uids.remove(placed.construction.uid());

        let mut ctx = ConstructionContext {
            timers: &mut self.timers,
            builders: &mut self.builders,
            sink: &mut self.bus,
        };
        Ok(placed.construction.demolish(&mut ctx))
    }

    // -----------------------------------------------------------------------
    // Lifecycle operations
    // -----------------------------------------------------------------------

    pub fn start_build(&mut self, id: StructureId) -> Result<BuildStart, SettlementError> {
        let Self {
            timers,
            builders,
            bus,
            structures,
            ..
        } = self;
        let placed = structures
            .get_mut(&id)
            .ok_or(SettlementError::UnknownStructure(id))?;
        let mut ctx = ConstructionContext {
            timers,
            builders,
            sink: bus,
        };
        Ok(placed.construction.start_build(&mut ctx)?)
    }

    /// Complete a structure's build now, cancelling its countdown.
    pub fn skip_build(&mut self, id: StructureId) -> Result<CompletionOutcome, SettlementError> {
        let now = self.timers.now();
        let Self {
            timers,
            builders,
            bus,
            structures,
            ..
        } = self;
        let placed = structures
            .get_mut(&id)
            .ok_or(SettlementError::UnknownStructure(id))?;
        let mut ctx = ConstructionContext {
            timers,
            builders,
            sink: bus,
        };
        let outcome = placed.construction.build_complete(&mut ctx, now);
        tracing::debug!(structure = %id, outcome = ?outcome, "build skipped");
        Ok(outcome)
    }

    /// Build the next level of the structure's blueprint.
    pub fn upgrade(&mut self, id: StructureId) -> Result<BuildStart, SettlementError> {
        let Self {
            timers,
            builders,
            bus,
            structures,
            registry,
            ..
        } = self;
        let placed = structures
            .get_mut(&id)
            .ok_or(SettlementError::UnknownStructure(id))?;
        let current = placed.construction.current_level();
        let next = registry
            .level(placed.blueprint, current + 1)
            .cloned()
            .ok_or(SettlementError::MaxLevelReached {
                structure: id,
                level: current,
            })?;
        let mut ctx = ConstructionContext {
            timers,
            builders,
            sink: bus,
        };
        Ok(placed.construction.begin_upgrade(&mut ctx, next)?)
    }

    /// Advance the settlement clock by `dt` seconds.
    pub fn step(&mut self, dt: Seconds) -> StepReport {
        let expired = self.timers.advance(dt);

        let Self {
            timers,
            builders,
            bus,
            structures,
            routes,
            ..
        } = self;
        let mut ctx = ConstructionContext {
            timers,
            builders,
            sink: bus,
        };

        let mut report = StepReport::default();
        for event in &expired {
            report.expired.push(event.key);
            let mut observed = false;
            for subscription in &event.subscribers {
                let Some(&id) = routes.get(subscription) else {
                    continue;
                };
                let Some(placed) = structures.get_mut(&id) else {
                    continue;
                };
                observed = true;
                if let Some(CompletionOutcome::Completed { .. }) =
                    placed.construction.on_timer_expired(&mut ctx, event)
                {
                    report.completed.push(id);
                }
            }

            // Nobody listened: the owner still has to let go of its builder.
            if !observed
                && let Some(placed) = structures.get_mut(&event.key.owner)
                && placed.construction.on_timer_lapsed(&mut ctx, event)
            {
                report.lapsed.push(event.key.owner);
            }
        }

        self.bus.deliver();
        if !report.expired.is_empty() {
            tracing::trace!(
                now = %self.timers.now(),
                expired = report.expired.len(),
                completed = report.completed.len(),
                "settlement step"
            );
        }
        report
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub fn construction(&self, id: StructureId) -> Option<&Construction> {
        self.structures.get(&id).map(|p| &p.construction)
    }

    pub fn blueprint_of(&self, id: StructureId) -> Option<BlueprintId> {
        self.structures.get(&id).map(|p| p.blueprint)
    }

    pub fn structure_by_uid(&self, uid: &str) -> Option<StructureId> {
        self.uids.get(uid).copied()
    }

    /// False for unknown structures.
    pub fn is_building(&self, id: StructureId) -> bool {
        self.construction(id)
            .is_some_and(|c| c.is_building(&self.timers))
    }

    /// Zero for unknown structures.
    pub fn construction_time_remaining(&self, id: StructureId) -> f64 {
        self.construction(id)
            .map(|c| c.construction_time_remaining(&self.timers))
            .unwrap_or(0.0)
    }

    pub fn building_cost(&self, id: StructureId) -> Option<&BuildRequirement> {
        self.construction(id).map(Construction::building_cost)
    }

    /// Iterate structures in id order.
    pub fn structures(&self) -> impl Iterator<Item = &Construction> {
        self.structures.values().map(|p| &p.construction)
    }

    pub fn structure_count(&self) -> usize {
        self.structures.len()
    }

    pub fn now(&self) -> Seconds {
        self.timers.now()
    }

    pub fn config(&self) -> &SettlementConfig {
        &self.config
    }

    pub fn registry(&self) -> &BlueprintRegistry {
        &self.registry
    }

    pub fn builders(&self) -> &BuilderPool {
        &self.builders
    }

    pub fn builders_mut(&mut self) -> &mut BuilderPool {
        &mut self.builders
    }

    pub fn timers(&self) -> &TimerManager {
        &self.timers
    }

    /// Direct registry access for debug and cheat tools.
    pub fn timers_mut(&mut self) -> &mut TimerManager {
        &mut self.timers
    }

    pub fn bus(&self) -> &NotificationBus {
        &self.bus
    }

    pub fn bus_mut(&mut self) -> &mut NotificationBus {
        &mut self.bus
    }

    fn placed_mut(&mut self, id: StructureId) -> Result<&mut Placed, SettlementError> {
        self.structures
            .get_mut(&id)
            .ok_or(SettlementError::UnknownStructure(id))
    }
}

// ===========================================================================
// Tests
// ===========================================================================
