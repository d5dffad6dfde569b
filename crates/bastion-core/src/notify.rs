//! Notifications for presentation layers: visuals, build-timer panel, audio.
//!
//! The construction lifecycle calls a [`NotificationSink`] and never owns the
//! receivers. [`NotificationBus`] is the stock sink: it records each call as a
//! [`ConstructionEvent`] in a per-kind ring buffer and flushes buffered events
//! to passive listeners when the host calls [`NotificationBus::deliver`].
//!
//! # Suppression
//!
//! Event kinds can be suppressed via [`NotificationBus::suppress`]. Suppressed
//! kinds are never buffered and never reach listeners.

use crate::fixed::Seconds;
use crate::id::{StructureId, TimerKey};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Payload types
// ---------------------------------------------------------------------------

/// Which of a structure's graphics are shown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct VisualState {
    /// Scaffolding shown while a build is running.
    pub construction_graphic: bool,
    /// The finished model.
    pub model: bool,
    /// Overlay shown while an upgrade is running.
    pub upgrade_graphic: bool,
}

impl VisualState {
    /// Only the finished model is visible.
    pub const FINISHED: Self = Self {
        construction_graphic: false,
        model: true,
        upgrade_graphic: false,
    };

    /// Nothing is visible.
    pub const HIDDEN: Self = Self {
        construction_graphic: false,
        model: false,
        upgrade_graphic: false,
    };
}

/// Where the build-timer panel should pin a countdown.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct UiAnchor {
    pub structure: StructureId,
    /// World-space offset from the structure's anchor point.
    pub offset: [f32; 3],
}

// ---------------------------------------------------------------------------
// Sink contract
// ---------------------------------------------------------------------------

/// Receivers of construction notifications.
pub trait NotificationSink {
    /// A timed build has begun.
    fn build_started(&mut self, structure: StructureId, key: TimerKey);

    /// A build has finished, naturally or by skipping.
    fn build_complete(&mut self, structure: StructureId, completed_at: Seconds);

    /// Show a countdown for `key` on the build-timer panel.
    fn add_build_timer(&mut self, key: TimerKey, label: &str, anchor: UiAnchor);

    /// Remove the countdown for `key`. Must tolerate unknown keys.
    fn remove_build_timer(&mut self, key: TimerKey);

    /// Toggle the structure's graphics.
    fn set_visuals(&mut self, structure: StructureId, visuals: VisualState);

    /// Play the construction-finished sound.
    fn play_build_sound(&mut self, structure: StructureId);
}

/// A sink that discards every notification.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl NotificationSink for NullSink {
    fn build_started(&mut self, _: StructureId, _: TimerKey) {}
    fn build_complete(&mut self, _: StructureId, _: Seconds) {}
    fn add_build_timer(&mut self, _: TimerKey, _: &str, _: UiAnchor) {}
    fn remove_build_timer(&mut self, _: TimerKey) {}
    fn set_visuals(&mut self, _: StructureId, _: VisualState) {}
    fn play_build_sound(&mut self, _: StructureId) {}
}

// ---------------------------------------------------------------------------
// Event types
// ---------------------------------------------------------------------------

/// A recorded notification.
#[derive(Debug, Clone, PartialEq)]
pub enum ConstructionEvent {
    BuildStarted {
        structure: StructureId,
        key: TimerKey,
    },
    BuildCompleted {
        structure: StructureId,
        completed_at: Seconds,
    },
    TimerAdded {
        key: TimerKey,
        label: String,
        anchor: UiAnchor,
    },
    TimerRemoved {
        key: TimerKey,
    },
    VisualsChanged {
        structure: StructureId,
        visuals: VisualState,
    },
    SoundRequested {
        structure: StructureId,
    },
}

/// Discriminant tag for event types, used for suppression and routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    BuildStarted,
    BuildCompleted,
    TimerAdded,
    TimerRemoved,
    VisualsChanged,
    SoundRequested,
}

/// Total number of event kinds.
const EVENT_KIND_COUNT: usize = 6;

impl ConstructionEvent {
    /// Get the discriminant kind for this event.
    pub fn kind(&self) -> EventKind {
        match self {
            ConstructionEvent::BuildStarted { .. } => EventKind::BuildStarted,
            ConstructionEvent::BuildCompleted { .. } => EventKind::BuildCompleted,
            ConstructionEvent::TimerAdded { .. } => EventKind::TimerAdded,
            ConstructionEvent::TimerRemoved { .. } => EventKind::TimerRemoved,
            ConstructionEvent::VisualsChanged { .. } => EventKind::VisualsChanged,
            ConstructionEvent::SoundRequested { .. } => EventKind::SoundRequested,
        }
    }
}

impl EventKind {
    fn index(self) -> usize {
        self as usize
    }
}

// ---------------------------------------------------------------------------
// EventBuffer: fixed-capacity ring buffer
// ---------------------------------------------------------------------------

/// A pre-allocated ring buffer for events. When full, the oldest events are
/// dropped.
#[derive(Debug)]
pub struct EventBuffer {
    events: Vec<Option<ConstructionEvent>>,
    /// Write position (wraps around).
    head: usize,
    len: usize,
    /// Total events ever written, including dropped ones.
    total_written: u64,
    /// Events overwritten before they were read.
    dropped: u64,
}

impl EventBuffer {
    /// Create a new ring buffer. A capacity of 0 is clamped to 1.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            events: (0..capacity).map(|_| None).collect(),
            head: 0,
            len: 0,
            total_written: 0,
            dropped: 0,
        }
    }

    /// Push an event. If full, the oldest event is dropped.
    pub fn push(&mut self, event: ConstructionEvent) {
        self.events[self.head] = Some(event);
        self.head = (self.head + 1) % self.capacity();
        if self.len < self.capacity() {
            self.len += 1;
        } else {
            self.dropped += 1;
        }
        self.total_written += 1;
    }

    pub fn capacity(&self) -> usize {
        self.events.len()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn total_written(&self) -> u64 {
        self.total_written
    }

    /// Number of events that were dropped because the buffer was full.
    pub fn dropped_count(&self) -> u64 {
        self.dropped
    }

    /// Iterate over events from oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = &ConstructionEvent> + '_ {
        // Once full, head points at the oldest entry.
        let start = if self.len < self.capacity() { 0 } else { self.head };
        (0..self.len).filter_map(move |i| self.events[(start + i) % self.capacity()].as_ref())
    }

    pub fn clear(&mut self) {
        for slot in &mut self.events {
            *slot = None;
        }
        self.head = 0;
        self.len = 0;
    }
}

// ---------------------------------------------------------------------------
// Listeners
// ---------------------------------------------------------------------------

/// A passive listener receives events read-only.
pub type PassiveListener = Box<dyn FnMut(&ConstructionEvent)>;

/// Optional predicate that filters events for a listener.
pub type EventFilter = Box<dyn Fn(&ConstructionEvent) -> bool>;

/// Priority level for listeners. Lower priorities run first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SubscriberPriority {
    Pre = 0,
    Normal = 1,
    Post = 2,
}

struct ListenerEntry {
    listener: PassiveListener,
    priority: SubscriberPriority,
    filter: Option<EventFilter>,
    insertion_order: u64,
}

impl std::fmt::Debug for ListenerEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerEntry")
            .field("priority", &self.priority)
            .field("filtered", &self.filter.is_some())
            .field("insertion_order", &self.insertion_order)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// NotificationBus
// ---------------------------------------------------------------------------

/// Buffered [`NotificationSink`] with per-kind listeners.
pub struct NotificationBus {
    buffers: [Option<EventBuffer>; EVENT_KIND_COUNT],
    suppressed: [bool; EVENT_KIND_COUNT],
    listeners: [Vec<ListenerEntry>; EVENT_KIND_COUNT],
    default_capacity: usize,
    next_insertion_order: u64,
}

impl std::fmt::Debug for NotificationBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationBus")
            .field("buffers", &self.buffers)
            .field("suppressed", &self.suppressed)
            .field("default_capacity", &self.default_capacity)
            .finish_non_exhaustive()
    }
}

impl NotificationBus {
    /// Create a bus with the given buffer capacity per event kind.
    pub fn new(default_capacity: usize) -> Self {
        Self {
            buffers: Default::default(),
            suppressed: [false; EVENT_KIND_COUNT],
            listeners: Default::default(),
            default_capacity,
            next_insertion_order: 0,
        }
    }

    /// Suppress an event kind and drop anything already buffered for it.
    pub fn suppress(&mut self, kind: EventKind) {
        self.suppressed[kind.index()] = true;
        self.buffers[kind.index()] = None;
    }

    pub fn is_suppressed(&self, kind: EventKind) -> bool {
        self.suppressed[kind.index()]
    }

    /// Record an event. No-ops if its kind is suppressed.
    pub fn emit(&mut self, event: ConstructionEvent) {
        let idx = event.kind().index();
        if self.suppressed[idx] {
            return;
        }
        let capacity = self.default_capacity;
        self.buffers[idx]
            .get_or_insert_with(|| EventBuffer::new(capacity))
            .push(event);
    }

    /// Register a listener with Normal priority and no filter.
    pub fn on_passive(&mut self, kind: EventKind, listener: PassiveListener) {
        self.on_passive_filtered(kind, SubscriberPriority::Normal, None, listener);
    }

    /// Register a listener with explicit priority and optional filter.
    pub fn on_passive_filtered(
        &mut self,
        kind: EventKind,
        priority: SubscriberPriority,
        filter: Option<EventFilter>,
        listener: PassiveListener,
    ) {
        let order = self.next_insertion_order;
        self.next_insertion_order += 1;
        self.listeners[kind.index()].push(ListenerEntry {
            listener,
            priority,
            filter,
            insertion_order: order,
        });
    }

    /// Deliver all buffered events to listeners, then clear the buffers.
    ///
    /// Kinds are delivered in declaration order; within a kind, listeners run
    /// in `(priority, registration order)` and each sees events oldest first.
    pub fn deliver(&mut self) {
        for idx in 0..EVENT_KIND_COUNT {
            let Some(buffer) = self.buffers[idx].as_mut() else {
                continue;
            };
            if buffer.is_empty() {
                continue;
            }
            let events: Vec<ConstructionEvent> = buffer.iter().cloned().collect();
            buffer.clear();

            let listeners = &mut self.listeners[idx];
            listeners.sort_by_key(|entry| (entry.priority, entry.insertion_order));
            for entry in listeners.iter_mut() {
                for event in &events {
                    if let Some(filter) = &entry.filter
                        && !filter(event)
                    {
                        continue;
                    }
                    (entry.listener)(event);
                }
            }
        }
    }

    /// Buffered events of one kind (read-only).
    pub fn buffer(&self, kind: EventKind) -> Option<&EventBuffer> {
        self.buffers[kind.index()].as_ref()
    }

    pub fn buffered_count(&self, kind: EventKind) -> usize {
        self.buffers[kind.index()]
            .as_ref()
            .map(EventBuffer::len)
            .unwrap_or(0)
    }

    /// Total events ever recorded for a kind, including dropped ones.
    pub fn total_emitted(&self, kind: EventKind) -> u64 {
        self.buffers[kind.index()]
            .as_ref()
            .map(EventBuffer::total_written)
            .unwrap_or(0)
    }

    /// Clear all buffers. Listeners and suppression stay in place.
    pub fn clear_all(&mut self) {
        for buffer in self.buffers.iter_mut().flatten() {
            buffer.clear();
        }
    }
}

impl Default for NotificationBus {
    fn default() -> Self {
        Self::new(256)
    }
}

impl NotificationSink for NotificationBus {
    fn build_started(&mut self, structure: StructureId, key: TimerKey) {
        self.emit(ConstructionEvent::BuildStarted { structure, key });
    }

    fn build_complete(&mut self, structure: StructureId, completed_at: Seconds) {
        self.emit(ConstructionEvent::BuildCompleted {
            structure,
            completed_at,
        });
    }

    fn add_build_timer(&mut self, key: TimerKey, label: &str, anchor: UiAnchor) {
        self.emit(ConstructionEvent::TimerAdded {
            key,
            label: label.to_string(),
            anchor,
        });
    }

    fn remove_build_timer(&mut self, key: TimerKey) {
        self.emit(ConstructionEvent::TimerRemoved { key });
    }

    fn set_visuals(&mut self, structure: StructureId, visuals: VisualState) {
        self.emit(ConstructionEvent::VisualsChanged { structure, visuals });
    }

    fn play_build_sound(&mut self, structure: StructureId) {
        self.emit(ConstructionEvent::SoundRequested { structure });
    }
}

// ===========================================================================
// Tests
// ===========================================================================
