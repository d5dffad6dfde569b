//! Integration tests for the construction lifecycle.
//!
//! These tests drive whole build cycles through the public API: a single
//! construction wired to stock services by hand, and a full settlement
//! stepping its clock.

use bastion_core::builder::BuilderAllocator;
use bastion_core::construction::*;
use bastion_core::fixed::Seconds;
use bastion_core::id::*;
use bastion_core::notify::{ConstructionEvent, EventKind, NotificationBus, VisualState};
use bastion_core::settlement::SettlementError;
use bastion_core::test_utils::*;
use bastion_core::timer::TimerRegistry;

// ===========================================================================
// Test 1: Timed build with a builder
// ===========================================================================
//
// castle1, 30s, requires a builder. Start, let 30s pass, complete through
// the expiration event.

#[test]
fn castle_timed_build_with_builder() {
    let mut h = Harness::new(1);
    let mut castle = Construction::new(StructureId(1), "castle1", level(500, 30.0), true);
    castle.activate(&mut h.timers);

    castle.start_build(&mut h.ctx()).unwrap();
    assert_eq!(h.builders.assigned(StructureId(1)), Some(BuilderId(0)));
    assert!(h.timers.is_running(TimerKey::build(StructureId(1))));
    assert_eq!(castle.construction_time_remaining(&h.timers), 30.0);
    assert!(h.sink.events.iter().any(|e| matches!(
        e,
        ConstructionEvent::TimerAdded { label, .. } if label == "castle1_build"
    )));

    let expired = h.timers.advance(secs(30.0));
    assert_eq!(expired.len(), 1);
    let outcome = castle.on_timer_expired(&mut h.ctx(), &expired[0]);

    assert!(matches!(
        outcome,
        Some(CompletionOutcome::Completed {
            released: Some(_),
            ..
        })
    ));
    assert_eq!(h.builders.assigned(StructureId(1)), None);
    assert!(!h.timers.is_running(castle.build_key()));
    assert!(!castle.is_building(&h.timers));
    assert_eq!(h.sink.count(EventKind::TimerRemoved), 1);
}

// ===========================================================================
// Test 2: Instant build never requests a builder
// ===========================================================================

#[test]
fn wall_instant_build_skips_builder() {
    // No builders at all: any request would fail.
    let mut h = Harness::new(0);
    let mut wall = Construction::new(StructureId(2), "wall2", level(100, 0.0), true);
    wall.activate(&mut h.timers);

    let start = wall.start_build(&mut h.ctx()).unwrap();
    assert!(matches!(start, BuildStart::Instant { .. }));
    assert!(!wall.is_building(&h.timers));
    assert_eq!(wall.phase(), ConstructionPhase::Built);
    assert_eq!(h.timers.running_count(), 0);
    assert_eq!(h.sink.count(EventKind::TimerAdded), 0);
    assert_eq!(h.sink.count(EventKind::BuildCompleted), 1);
}

// ===========================================================================
// Test 3: Instant and timed completion look the same to sinks
// ===========================================================================

#[test]
fn instant_and_timed_completion_emit_same_teardown() {
    let teardown = |events: &[ConstructionEvent]| -> Vec<EventKind> {
        let finished_at = events
            .iter()
            .rposition(|e| {
                matches!(
                    e,
                    ConstructionEvent::VisualsChanged { visuals, .. } if *visuals == VisualState::FINISHED
                )
            })
            .unwrap();
        events[finished_at..]
            .iter()
            .map(ConstructionEvent::kind)
            .filter(|kind| *kind != EventKind::TimerRemoved)
            .collect()
    };

    let mut instant = Harness::new(0);
    let mut a = Construction::new(StructureId(1), "a", level(1, 0.0), false);
    a.start_build(&mut instant.ctx()).unwrap();

    let mut timed = Harness::new(0);
    let mut b = Construction::new(StructureId(1), "b", level(1, 5.0), false);
    b.activate(&mut timed.timers);
    b.start_build(&mut timed.ctx()).unwrap();
    let expired = timed.timers.advance(secs(5.0));
    b.on_timer_expired(&mut timed.ctx(), &expired[0]);

    assert_eq!(teardown(&instant.sink.events), teardown(&timed.sink.events));
    // Only the timed build had a countdown on the panel to take down.
    assert_eq!(instant.sink.count(EventKind::TimerRemoved), 0);
    assert_eq!(timed.sink.count(EventKind::TimerRemoved), 1);
}

// ===========================================================================
// Test 4: Expiration races a skip
// ===========================================================================
//
// The host skips ahead on the same tick the timer would have expired. The
// completion side effects must happen exactly once.

#[test]
fn skip_and_expiration_on_same_tick_complete_once() {
    let mut h = Harness::new(1);
    let mut c = Construction::new(StructureId(1), "keep1", level(300, 10.0), true);
    c.activate(&mut h.timers);
    c.start_build(&mut h.ctx()).unwrap();

    // Expiration swept first, skip arrives before the event is routed.
    let expired = h.timers.advance(secs(10.0));
    let skip = c.build_complete(&mut h.ctx(), secs(10.0));
    let routed = c.on_timer_expired(&mut h.ctx(), &expired[0]);

    assert!(matches!(skip, CompletionOutcome::Completed { skipped: false, .. }));
    assert_eq!(routed, Some(CompletionOutcome::AlreadyComplete));
    assert_eq!(h.sink.count(EventKind::BuildCompleted), 1);
    assert_eq!(h.builders.idle_count(), 1);
}

// ===========================================================================
// Test 5: Settlement with a notification bus
// ===========================================================================

#[test]
fn settlement_builds_queue_behind_single_builder() {
    let mut s = settlement(1);
    let tower = s.registry().id_of("tower").unwrap();
    let towers: Vec<StructureId> = (0..3)
        .map(|i| s.spawn(tower, &format!("tower{i}")).unwrap())
        .collect();

    let mut finished = Vec::new();
    for &id in &towers {
        // Retry until a builder frees up.
        loop {
            match s.start_build(id) {
                Ok(_) => break,
                Err(SettlementError::Construction(ConstructionError::Builder { .. })) => {
                    finished.extend(s.step(secs(1.0)).completed);
                }
                Err(other) => panic!("unexpected error: {other}"),
            }
        }
    }
    while s.structures().any(|c| c.is_building(s.timers())) {
        finished.extend(s.step(secs(1.0)).completed);
    }

    assert_eq!(finished, towers);
    assert_eq!(s.now(), secs(30.0));
    assert_eq!(s.bus().total_emitted(EventKind::BuildCompleted), 3);
    assert_eq!(s.builders().idle_count(), 1);
}

// ===========================================================================
// Test 6: Cheat tools acting on the registry directly
// ===========================================================================

#[test]
fn external_cancel_is_visible_to_queries() {
    let mut s = settlement(1);
    let castle = s.registry().id_of("castle").unwrap();
    let id = s.spawn(castle, "castle1").unwrap();
    s.start_build(id).unwrap();

    assert!(s.timers_mut().cancel_timer(TimerKey::build(id)));
    assert!(!s.is_building(id));
    assert_eq!(s.construction_time_remaining(id), 0.0);

    // The builder is still held until the host completes the build.
    assert_eq!(s.builders().busy_count(), 1);
    assert!(matches!(
        s.skip_build(id).unwrap(),
        CompletionOutcome::Completed { skipped: false, .. }
    ));
    assert_eq!(s.builders().busy_count(), 0);
}

#[test]
fn progress_query_tracks_remaining_time() {
    let mut s = settlement(1);
    let castle = s.registry().id_of("castle").unwrap();
    let id = s.spawn(castle, "castle1").unwrap();
    s.start_build(id).unwrap();
    s.step(secs(7.5));

    let remaining = s.construction_time_remaining(id);
    assert_eq!(remaining, 22.5);
    assert_eq!(s.timers().progress(TimerKey::build(id)), secs(0.25));
    assert_eq!(s.building_cost(id).unwrap().build_time, secs(30.0));
    assert!(remaining > 0.0 && remaining <= 30.0);
    assert!(s.now() > Seconds::ZERO);
}

#[test]
fn bus_suppression_hides_sound_requests() {
    let mut s = settlement(0);
    let wall = s.registry().id_of("wall").unwrap();
    let id = s.spawn(wall, "wall2").unwrap();
    s.bus_mut().suppress(EventKind::SoundRequested);

    s.start_build(id).unwrap();
    assert_eq!(s.bus().total_emitted(EventKind::SoundRequested), 0);
    assert_eq!(s.bus().total_emitted(EventKind::BuildCompleted), 1);
}

#[test]
fn bus_is_a_sink_for_hand_wired_constructions() {
    let mut timers = bastion_core::timer::TimerManager::new();
    let mut builders = bastion_core::builder::BuilderPool::new(1);
    let mut bus = NotificationBus::default();
    let mut c = Construction::new(StructureId(9), "gate9", level(50, 2.0), true);

    let mut ctx = ConstructionContext {
        timers: &mut timers,
        builders: &mut builders,
        sink: &mut bus,
    };
    c.start_build(&mut ctx).unwrap();
    assert_eq!(bus.buffered_count(EventKind::BuildStarted), 1);
    assert_eq!(bus.buffered_count(EventKind::TimerAdded), 1);
}
