//! Generic event system for the dashboard interaction core.
//!
//! Every observable change in the core — state mutations, selection changes,
//! section navigation, simulation lifecycle, toasts, CRUD results — is
//! broadcast through [`EventController`]. Each event carries a set of
//! [`EventKind`] flags (bitflags-style) so that a single occurrence can match
//! multiple categories (e.g. a stats write is both `STATE_CHANGED` and
//! `LIMITS_UPDATED`).
//!
//! The caller specifies an [`EventFilter`] to receive only the events they
//! care about.  The filter is a simple OR mask: an event is delivered when
//! `(event.kinds & filter) != 0`.

use std::sync::mpsc::{Receiver, Sender};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::forms::EntityKind;
use crate::notify::ToastLevel;
use crate::sim::Severity;
use crate::timers::TimerId;

// ─────────────────────────────────────────────────────────────────────────────
// EventKind – bitflags
// ─────────────────────────────────────────────────────────────────────────────

/// Bitflags describing the *categories* an event belongs to.
///
/// A single [`DashEvent`] may have several bits set.  For example an
/// `update_stats` that changed the limits has both `STATE_CHANGED` and
/// `LIMITS_UPDATED` set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventKind(pub u64);

impl EventKind {
    // ── State store ─────────────────────────────────────────────────────
    /// A state key was written with a value that differs from the old one.
    pub const STATE_CHANGED: Self = Self(1 << 0);
    /// The statistical limits were merged/updated (also a `STATE_CHANGED`).
    pub const LIMITS_UPDATED: Self = Self(1 << 1);

    // ── UI selection / navigation ───────────────────────────────────────
    /// A dropdown-style selector changed its value.
    pub const SELECTION_CHANGED: Self = Self(1 << 2);
    /// The visible section changed (fragment navigation).
    pub const SECTION_CHANGED: Self = Self(1 << 3);

    // ── Simulation ──────────────────────────────────────────────────────
    /// The data simulation was started.
    pub const SIMULATION_STARTED: Self = Self(1 << 4);
    /// The data simulation was stopped.
    pub const SIMULATION_STOPPED: Self = Self(1 << 5);
    /// The simulation produced an accelerometer sample.
    pub const SAMPLE_GENERATED: Self = Self(1 << 6);

    // ── Notifications ───────────────────────────────────────────────────
    /// A toast was shown.
    pub const TOAST_SHOWN: Self = Self(1 << 7);
    /// A toast was dismissed (manually or by timeout).
    pub const TOAST_DISMISSED: Self = Self(1 << 8);
    /// A loading indicator became active.
    pub const LOADING_STARTED: Self = Self(1 << 9);
    /// The last nested loading indicator finished.
    pub const LOADING_FINISHED: Self = Self(1 << 10);

    // ── CRUD ────────────────────────────────────────────────────────────
    /// A machine/sensor/model record was created.
    pub const RECORD_CREATED: Self = Self(1 << 11);
    /// A record was updated.
    pub const RECORD_UPDATED: Self = Self(1 << 12);
    /// A record was deleted.
    pub const RECORD_DELETED: Self = Self(1 << 13);

    // ── Listener registry ───────────────────────────────────────────────
    /// A bulk listener teardown ran (`clear_all` / `clear_category`).
    pub const LISTENERS_CLEARED: Self = Self(1 << 14);

    /// Wildcard: matches *every* event kind.
    pub const ALL: Self = Self(u64::MAX);

    /// Combine two event kinds (bitwise OR).
    #[inline]
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    /// Check whether `self` contains all bits in `other`.
    #[inline]
    pub const fn contains(self, other: Self) -> bool {
        (self.0 & other.0) == other.0
    }

    /// Check whether `self` intersects with `other` (at least one bit in common).
    #[inline]
    pub const fn intersects(self, other: Self) -> bool {
        (self.0 & other.0) != 0
    }

    /// Returns `true` if no bits are set.
    #[inline]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl std::ops::BitOr for EventKind {
    type Output = Self;
    #[inline]
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl std::ops::BitOrAssign for EventKind {
    #[inline]
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl std::ops::BitAnd for EventKind {
    type Output = Self;
    #[inline]
    fn bitand(self, rhs: Self) -> Self {
        Self(self.0 & rhs.0)
    }
}

impl std::ops::Not for EventKind {
    type Output = Self;
    #[inline]
    fn not(self) -> Self {
        Self(!self.0)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// String conversion
// ─────────────────────────────────────────────────────────────────────────────

const KIND_NAMES: &[(EventKind, &str)] = &[
    (EventKind::STATE_CHANGED, "STATE_CHANGED"),
    (EventKind::LIMITS_UPDATED, "LIMITS_UPDATED"),
    (EventKind::SELECTION_CHANGED, "SELECTION_CHANGED"),
    (EventKind::SECTION_CHANGED, "SECTION_CHANGED"),
    (EventKind::SIMULATION_STARTED, "SIMULATION_STARTED"),
    (EventKind::SIMULATION_STOPPED, "SIMULATION_STOPPED"),
    (EventKind::SAMPLE_GENERATED, "SAMPLE_GENERATED"),
    (EventKind::TOAST_SHOWN, "TOAST_SHOWN"),
    (EventKind::TOAST_DISMISSED, "TOAST_DISMISSED"),
    (EventKind::LOADING_STARTED, "LOADING_STARTED"),
    (EventKind::LOADING_FINISHED, "LOADING_FINISHED"),
    (EventKind::RECORD_CREATED, "RECORD_CREATED"),
    (EventKind::RECORD_UPDATED, "RECORD_UPDATED"),
    (EventKind::RECORD_DELETED, "RECORD_DELETED"),
    (EventKind::LISTENERS_CLEARED, "LISTENERS_CLEARED"),
];

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_empty() {
            return write!(f, "EMPTY");
        }

        // The ALL constant is a useful shorthand; print it directly instead
        if *self == EventKind::ALL {
            return write!(f, "ALL");
        }

        let mut names = Vec::new();
        let mut known_bits: u64 = 0;

        for (kind, name) in KIND_NAMES {
            known_bits |= kind.0;
            if self.contains(*kind) {
                names.push((*name).to_string());
            }
        }

        // Bits that weren't covered by the known list
        let extra = self.0 & !known_bits;
        if extra != 0 {
            names.push(format!("0x{:x}", extra));
        }

        if names.is_empty() {
            write!(f, "0x{:x}", self.0)
        } else {
            write!(f, "{}", names.join("|"))
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Metadata – per-event-type payloads
// ─────────────────────────────────────────────────────────────────────────────

/// Metadata attached to state-change events.
///
/// This is the single-topic publish/subscribe payload of the state store:
/// `key` is the stable name of the state key, `value` is the new value as
/// JSON, and `timestamp` serializes as an ISO-8601 string.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateChangeMeta {
    /// Stable name of the state key that changed.
    pub key: String,
    /// The new value, serialized to JSON.
    pub value: serde_json::Value,
    /// Wall-clock time of the mutation (ISO-8601 when serialized).
    pub timestamp: DateTime<Utc>,
}

/// Metadata for dropdown-style selection events, decoupled from the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectionMeta {
    /// Identifier of the selector that changed.
    pub source_id: String,
    /// The newly selected value.
    pub value: String,
    /// Human-readable label for the selected value.
    pub label: String,
}

/// Metadata for section navigation events.
#[derive(Debug, Clone)]
pub struct SectionMeta {
    /// Section that was visible before the navigation (if any).
    pub from: Option<String>,
    /// Section that is now visible.
    pub to: String,
}

/// Metadata for simulation lifecycle events.
#[derive(Debug, Clone, Copy)]
pub struct SimulationMeta {
    /// Handle of the interval timer that drives the simulation.
    pub timer: Option<TimerId>,
    /// Tick period in milliseconds.
    pub period_ms: Option<u64>,
}

/// Metadata for toast events.
#[derive(Debug, Clone)]
pub struct ToastMeta {
    /// Toast id (for later dismissal).
    pub id: u64,
    /// Severity level of the toast.
    pub level: ToastLevel,
    /// The message shown to the user.
    pub message: String,
}

/// Metadata for loading-indicator events.
#[derive(Debug, Clone)]
pub struct LoadingMeta {
    /// Label of the operation (shown next to the spinner).
    pub label: Option<String>,
    /// Nesting depth after this event.
    pub depth: usize,
}

/// Metadata for CRUD events.
#[derive(Debug, Clone)]
pub struct RecordMeta {
    /// Which entity table the record belongs to.
    pub entity: EntityKind,
    /// Record id.
    pub id: u64,
    /// Record name, when the entity has one.
    pub name: Option<String>,
}

/// Metadata for simulated accelerometer samples.
#[derive(Debug, Clone, Copy)]
pub struct SampleMeta {
    /// Sensor the sample is attributed to.
    pub sensor_id: u64,
    pub x: f64,
    pub y: f64,
    pub z: f64,
    /// Severity classification against the current limits.
    pub severity: Severity,
}

/// Metadata for bulk listener teardown events.
#[derive(Debug, Clone)]
pub struct ClearedMeta {
    /// Category that was cleared, or `None` for `clear_all`.
    pub category: Option<String>,
    /// Number of listeners successfully removed.
    pub removed: usize,
}

// ─────────────────────────────────────────────────────────────────────────────
// DashEvent – the top-level event type
// ─────────────────────────────────────────────────────────────────────────────

/// A rich event emitted by the dashboard core.
///
/// `kinds` is a bitflag set of [`EventKind`] categories.  The various
/// `Option<…Meta>` fields carry metadata relevant to the kinds that are set.
#[derive(Debug, Clone)]
pub struct DashEvent {
    /// Bitflag set of categories this event belongs to.
    pub kinds: EventKind,
    /// Monotonic timestamp (seconds since controller creation, set on emit).
    pub timestamp: f64,

    // ── Optional metadata ────────────────────────────────────────────────
    pub state_change: Option<StateChangeMeta>,
    pub selection: Option<SelectionMeta>,
    pub section: Option<SectionMeta>,
    pub simulation: Option<SimulationMeta>,
    pub toast: Option<ToastMeta>,
    pub loading: Option<LoadingMeta>,
    pub record: Option<RecordMeta>,
    pub sample: Option<SampleMeta>,
    pub cleared: Option<ClearedMeta>,
}

impl DashEvent {
    /// Create a new event with the given kinds; the timestamp is stamped by
    /// the controller on emit.
    pub fn new(kinds: EventKind) -> Self {
        Self {
            kinds,
            timestamp: 0.0,
            state_change: None,
            selection: None,
            section: None,
            simulation: None,
            toast: None,
            loading: None,
            record: None,
            sample: None,
            cleared: None,
        }
    }

    /// Convenience: a `SELECTION_CHANGED` event with its payload.
    pub fn selection(
        source_id: impl Into<String>,
        value: impl Into<String>,
        label: impl Into<String>,
    ) -> Self {
        let mut evt = Self::new(EventKind::SELECTION_CHANGED);
        evt.selection = Some(SelectionMeta {
            source_id: source_id.into(),
            value: value.into(),
            label: label.into(),
        });
        evt
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// EventFilter
// ─────────────────────────────────────────────────────────────────────────────

/// A filter that selects which event categories a subscriber receives.
///
/// The filter is an OR-mask: an event is delivered when
/// `event.kinds.intersects(filter.mask)`.
#[derive(Debug, Clone, Copy)]
pub struct EventFilter {
    pub mask: EventKind,
}

impl EventFilter {
    /// Accept all events.
    pub const fn all() -> Self {
        Self {
            mask: EventKind::ALL,
        }
    }

    /// Accept only the specified event kinds.
    pub const fn only(mask: EventKind) -> Self {
        Self { mask }
    }

    /// Check whether an event passes this filter.
    #[inline]
    pub fn matches(&self, event: &DashEvent) -> bool {
        event.kinds.intersects(self.mask)
    }
}

impl Default for EventFilter {
    fn default() -> Self {
        Self::all()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// EventController
// ─────────────────────────────────────────────────────────────────────────────

pub(crate) struct Subscriber {
    filter: EventFilter,
    sender: Sender<DashEvent>,
}

/// Controller that collects and distributes core events to subscribers.
///
/// All controllers in a [`Controllers`](crate::config::Controllers) bundle
/// share one instance.  Call [`subscribe`](Self::subscribe) (with an optional
/// filter) to receive events on an `mpsc` channel.
#[derive(Clone)]
pub struct EventController {
    pub(crate) inner: Arc<Mutex<EventCtrlInner>>,
}

pub(crate) struct EventCtrlInner {
    pub(crate) subscribers: Vec<Subscriber>,
    pub(crate) start_instant: std::time::Instant,
}

impl EventController {
    /// Create a new event controller.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(EventCtrlInner {
                subscribers: Vec::new(),
                start_instant: std::time::Instant::now(),
            })),
        }
    }

    /// Subscribe to events matching the given filter.
    ///
    /// Returns a receiver that will receive [`DashEvent`]s whenever the core
    /// emits an event whose `kinds` intersect with the filter mask.
    pub fn subscribe(&self, filter: EventFilter) -> Receiver<DashEvent> {
        let (tx, rx) = std::sync::mpsc::channel();
        let mut inner = self.inner.lock().unwrap();
        inner.subscribers.push(Subscriber { filter, sender: tx });
        rx
    }

    /// Subscribe to *all* events (no filtering).
    pub fn subscribe_all(&self) -> Receiver<DashEvent> {
        self.subscribe(EventFilter::all())
    }

    /// Emit an event to all matching subscribers.
    ///
    /// Delivery is synchronous fire-and-forget: the event is cloned into each
    /// matching subscriber's channel, and subscribers whose receiver was
    /// dropped are pruned.
    pub fn emit(&self, mut event: DashEvent) {
        let mut inner = self.inner.lock().unwrap();
        event.timestamp = inner.start_instant.elapsed().as_secs_f64();
        inner.subscribers.retain(|sub| {
            if sub.filter.matches(&event) {
                sub.sender.send(event.clone()).is_ok()
            } else {
                true
            }
        });
    }

    /// Number of live subscribers (diagnostic).
    pub fn subscriber_count(&self) -> usize {
        self.inner.lock().unwrap().subscribers.len()
    }
}

impl Default for EventController {
    fn default() -> Self {
        Self::new()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Unit tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_kind_union_and_intersection() {
        let changed = EventKind::STATE_CHANGED;
        let limits = EventKind::LIMITS_UPDATED;
        let combined = changed | limits;
        assert!(combined.contains(changed));
        assert!(combined.contains(limits));
        assert!(combined.intersects(changed));
        assert!(!EventKind::SECTION_CHANGED.intersects(changed));
    }

    #[test]
    fn event_kind_all_matches_everything() {
        assert!(EventKind::ALL.contains(EventKind::STATE_CHANGED));
        assert!(EventKind::ALL.contains(EventKind::SAMPLE_GENERATED));
        assert!(EventKind::ALL.contains(EventKind::LISTENERS_CLEARED));
    }

    #[test]
    fn event_filter_matches() {
        let filter = EventFilter::only(EventKind::STATE_CHANGED | EventKind::LIMITS_UPDATED);
        let evt = DashEvent::new(EventKind::STATE_CHANGED);
        assert!(filter.matches(&evt));

        let evt2 = DashEvent::new(EventKind::SECTION_CHANGED);
        assert!(!filter.matches(&evt2));

        let evt3 = DashEvent::new(EventKind::STATE_CHANGED | EventKind::LIMITS_UPDATED);
        assert!(filter.matches(&evt3));
    }

    #[test]
    fn event_controller_subscribe_and_emit() {
        let ctrl = EventController::new();
        let rx_all = ctrl.subscribe_all();
        let rx_state = ctrl.subscribe(EventFilter::only(EventKind::STATE_CHANGED));
        let rx_section = ctrl.subscribe(EventFilter::only(EventKind::SECTION_CHANGED));

        ctrl.emit(DashEvent::new(EventKind::STATE_CHANGED));

        assert!(rx_all.try_recv().is_ok());
        assert!(rx_state.try_recv().is_ok());
        assert!(rx_section.try_recv().is_err());
    }

    #[test]
    fn event_controller_combined_kinds() {
        let ctrl = EventController::new();
        let rx_state = ctrl.subscribe(EventFilter::only(EventKind::STATE_CHANGED));
        let rx_limits = ctrl.subscribe(EventFilter::only(EventKind::LIMITS_UPDATED));

        ctrl.emit(DashEvent::new(EventKind::STATE_CHANGED | EventKind::LIMITS_UPDATED));

        assert!(rx_state.try_recv().is_ok());
        assert!(rx_limits.try_recv().is_ok());
    }

    #[test]
    fn event_controller_timestamp_set_on_emit() {
        let ctrl = EventController::new();
        let rx = ctrl.subscribe_all();

        std::thread::sleep(std::time::Duration::from_millis(10));
        ctrl.emit(DashEvent::new(EventKind::STATE_CHANGED));

        let evt = rx.try_recv().unwrap();
        assert!(evt.timestamp > 0.0);
    }

    #[test]
    fn event_kind_display() {
        assert_eq!(format!("{}", EventKind::STATE_CHANGED), "STATE_CHANGED");
        let combo = EventKind::STATE_CHANGED | EventKind::LIMITS_UPDATED;
        assert_eq!(format!("{}", combo), "STATE_CHANGED|LIMITS_UPDATED");
        assert_eq!(format!("{}", EventKind::ALL), "ALL");
        let unknown = EventKind(1 << 63);
        assert!(format!("{}", unknown).starts_with("0x"));
    }

    #[test]
    fn event_kinds_do_not_overlap() {
        for (i, (a, _)) in KIND_NAMES.iter().enumerate() {
            for (j, (b, _)) in KIND_NAMES.iter().enumerate() {
                if i != j {
                    assert!(
                        !a.intersects(*b),
                        "EventKind bits {} and {} overlap: {:b} & {:b}",
                        i,
                        j,
                        a.0,
                        b.0
                    );
                }
            }
        }
    }

    #[test]
    fn dropped_receiver_is_cleaned_up() {
        let ctrl = EventController::new();
        let rx1 = ctrl.subscribe_all();
        let rx2 = ctrl.subscribe_all();

        drop(rx1);

        ctrl.emit(DashEvent::new(EventKind::STATE_CHANGED));
        assert!(rx2.try_recv().is_ok());

        // Emit again – the dead subscriber should have been pruned
        ctrl.emit(DashEvent::new(EventKind::SECTION_CHANGED));
        assert!(rx2.try_recv().is_ok());
        assert_eq!(ctrl.subscriber_count(), 1);
    }

    #[test]
    fn selection_event_carries_payload() {
        let evt = DashEvent::selection("machine-select", "3", "Máquina 3");
        assert!(evt.kinds.contains(EventKind::SELECTION_CHANGED));
        let sel = evt.selection.as_ref().unwrap();
        assert_eq!(sel.source_id, "machine-select");
        assert_eq!(sel.value, "3");
        assert_eq!(sel.label, "Máquina 3");
    }

    #[test]
    fn state_change_meta_serializes_iso8601() {
        let meta = StateChangeMeta {
            key: "selectedMachine".into(),
            value: serde_json::json!("2"),
            timestamp: Utc::now(),
        };
        let json = serde_json::to_value(&meta).unwrap();
        let ts = json["timestamp"].as_str().unwrap();
        // chrono serializes DateTime<Utc> as RFC 3339 / ISO-8601
        assert!(ts.contains('T'));
    }
}
