//! Shared test helpers for unit and integration tests.
//!
//! Gated behind `#[cfg(any(test, feature = "test-utils"))]` so these helpers
//! are available in unit tests and, via the `test-utils` feature, in the
//! `tests/` directories of this and downstream crates.

use crate::blueprint::{Blueprint, BlueprintRegistry, BlueprintRegistryBuilder};
use crate::builder::BuilderPool;
use crate::config::SettlementConfig;
use crate::construction::{BuildLevel, BuildRequirement, ConstructionContext};
use crate::fixed::{f64_to_seconds, Seconds};
use crate::id::{StructureId, TimerKey};
use crate::notify::{ConstructionEvent, EventKind, NotificationSink, UiAnchor, VisualState};
use crate::settlement::Settlement;
use crate::timer::TimerManager;

// ===========================================================================
// Time and level helpers
// ===========================================================================

pub fn secs(v: f64) -> Seconds {
    f64_to_seconds(v)
}

/// A level with no resource cost.
pub fn level(max_hit_points: u32, build_time: f64) -> BuildLevel {
    BuildLevel {
        max_hit_points,
        build_cost: BuildRequirement {
            build_time: secs(build_time),
            ..Default::default()
        },
    }
}

// ===========================================================================
// Blueprints
// ===========================================================================

/// castle: 30s then 60s, needs a builder.
/// tower: 10s, needs a builder.
/// wall: instant, flagged as needing a builder.
pub fn stock_blueprints() -> BlueprintRegistry {
    let mut b = BlueprintRegistryBuilder::new();
    let blueprints = [
        Blueprint::new("castle", true, vec![level(500, 30.0), level(900, 60.0)]),
        Blueprint::new("tower", true, vec![level(200, 10.0)]),
        Blueprint::new("wall", true, vec![level(100, 0.0)]),
    ];
    for blueprint in blueprints {
        b.register(blueprint).expect("stock blueprint");
    }
    b.build().expect("stock registry")
}

/// A settlement over [`stock_blueprints`] with `builders` builders.
pub fn settlement(builders: usize) -> Settlement {
    let config = SettlementConfig {
        builder_count: builders,
        ..Default::default()
    };
    Settlement::new(config, stock_blueprints())
}

// ===========================================================================
// Recording sink
// ===========================================================================

/// A sink that keeps every notification in call order.
#[derive(Debug, Default)]
pub struct RecordingSink {
    pub events: Vec<ConstructionEvent>,
}

impl RecordingSink {
    pub fn count(&self, kind: EventKind) -> usize {
        self.events.iter().filter(|e| e.kind() == kind).count()
    }

    pub fn last(&self, kind: EventKind) -> Option<&ConstructionEvent> {
        self.events.iter().rev().find(|e| e.kind() == kind)
    }
}

impl NotificationSink for RecordingSink {
    fn build_started(&mut self, structure: StructureId, key: TimerKey) {
        self.events
            .push(ConstructionEvent::BuildStarted { structure, key });
    }

    fn build_complete(&mut self, structure: StructureId, completed_at: Seconds) {
        self.events.push(ConstructionEvent::BuildCompleted {
            structure,
            completed_at,
        });
    }

    fn add_build_timer(&mut self, key: TimerKey, label: &str, anchor: UiAnchor) {
        self.events.push(ConstructionEvent::TimerAdded {
            key,
            label: label.to_string(),
            anchor,
        });
    }

    fn remove_build_timer(&mut self, key: TimerKey) {
        self.events.push(ConstructionEvent::TimerRemoved { key });
    }

    fn set_visuals(&mut self, structure: StructureId, visuals: VisualState) {
        self.events
            .push(ConstructionEvent::VisualsChanged { structure, visuals });
    }

    fn play_build_sound(&mut self, structure: StructureId) {
        self.events
            .push(ConstructionEvent::SoundRequested { structure });
    }
}

// ===========================================================================
// Harness
// ===========================================================================

/// Stock services for driving a single construction by hand.
#[derive(Debug, Default)]
pub struct Harness {
    pub timers: TimerManager,
    pub builders: BuilderPool,
    pub sink: RecordingSink,
}

impl Harness {
    pub fn new(builders: usize) -> Self {
        Self {
            timers: TimerManager::new(),
            builders: BuilderPool::new(builders),
            sink: RecordingSink::default(),
        }
    }

    pub fn ctx(&mut self) -> ConstructionContext<'_> {
        ConstructionContext {
            timers: &mut self.timers,
            builders: &mut self.builders,
            sink: &mut self.sink,
        }
    }
}
