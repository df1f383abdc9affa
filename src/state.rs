//! Global client-side state store with change notification.
//!
//! The store holds the dashboard's session state (current filter selection,
//! statistical limits, chart display toggles, simulation run state) behind a
//! cheap-clone handle.  All mutation goes through [`StateStore::set`] with the
//! full sub-object: the setter compares old and new value structurally,
//! short-circuits without a notification when nothing changed, and otherwise
//! replaces the value and broadcasts a `STATE_CHANGED` event carrying
//! `{key, value, timestamp}`.
//!
//! The store is an explicit injectable object, not a module singleton: every
//! component receives a handle, which keeps tests isolated.

use std::sync::{Arc, Mutex};

use chrono::Utc;
use log::warn;
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};

use crate::events::{DashEvent, EventController, EventKind, StateChangeMeta};
use crate::limits::{StatsLimits, StatsPatch};
use crate::timers::TimerId;

// ─────────────────────────────────────────────────────────────────────────────
// State data model
// ─────────────────────────────────────────────────────────────────────────────

/// Chart display toggles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChartOptions {
    pub show_mean: bool,
    pub show_sigma_lines: bool,
}

impl Default for ChartOptions {
    fn default() -> Self {
        Self {
            show_mean: true,
            show_sigma_lines: true,
        }
    }
}

/// Simulation run flag and its owned interval handle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct SimulationState {
    pub running: bool,
    /// Handle of the interval timer driving the simulation, when running.
    #[serde(skip)]
    pub timer: Option<TimerId>,
}

/// The full session state.  Lifetime = one dashboard session; nothing here is
/// persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GlobalState {
    pub selected_machine: String,
    pub selected_sensor: String,
    pub time_range: String,
    pub current_section: String,
    pub stats: StatsLimits,
    pub chart_options: ChartOptions,
    pub simulation: SimulationState,
}

impl Default for GlobalState {
    fn default() -> Self {
        Self {
            selected_machine: String::new(),
            selected_sensor: String::new(),
            time_range: "24h".to_string(),
            current_section: "dashboard".to_string(),
            stats: StatsLimits::default(),
            chart_options: ChartOptions::default(),
            simulation: SimulationState::default(),
        }
    }
}

/// Addressable keys of the state record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StateKey {
    SelectedMachine,
    SelectedSensor,
    TimeRange,
    CurrentSection,
    Stats,
    ChartOptions,
    Simulation,
}

impl StateKey {
    /// Stable name used in change-notification payloads.
    pub fn name(&self) -> &'static str {
        match self {
            StateKey::SelectedMachine => "selectedMachine",
            StateKey::SelectedSensor => "selectedSensor",
            StateKey::TimeRange => "timeRange",
            StateKey::CurrentSection => "currentSection",
            StateKey::Stats => "stats",
            StateKey::ChartOptions => "chartOptions",
            StateKey::Simulation => "simulation",
        }
    }
}

impl std::fmt::Display for StateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// A value to read or write through the store.  `Unset` is the sentinel for
/// "no value"; writing it always fails.
#[derive(Debug, Clone, PartialEq)]
pub enum StateValue {
    Unset,
    Text(String),
    Stats(StatsLimits),
    Chart(ChartOptions),
    Simulation(SimulationState),
}

impl StateValue {
    /// JSON rendering for change-notification payloads.
    fn to_json(&self) -> serde_json::Value {
        match self {
            StateValue::Unset => serde_json::Value::Null,
            StateValue::Text(s) => serde_json::json!(s),
            StateValue::Stats(s) => serde_json::to_value(s).unwrap_or(serde_json::Value::Null),
            StateValue::Chart(c) => serde_json::to_value(c).unwrap_or(serde_json::Value::Null),
            StateValue::Simulation(s) => {
                serde_json::to_value(s).unwrap_or(serde_json::Value::Null)
            }
        }
    }
}

impl From<&str> for StateValue {
    fn from(s: &str) -> Self {
        StateValue::Text(s.to_string())
    }
}

impl From<String> for StateValue {
    fn from(s: String) -> Self {
        StateValue::Text(s)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// StateStore
// ─────────────────────────────────────────────────────────────────────────────

/// Handle to the global state.  Clones share the same underlying record and
/// event controller.
#[derive(Clone)]
pub struct StateStore {
    inner: Arc<Mutex<GlobalState>>,
    events: EventController,
    wiring: Arc<OnceCell<()>>,
}

impl StateStore {
    /// Create a store with default state, broadcasting on `events`.
    pub fn new(events: EventController) -> Self {
        Self::with_state(events, GlobalState::default())
    }

    /// Create a store with explicit initial state.
    pub fn with_state(events: EventController, state: GlobalState) -> Self {
        Self {
            inner: Arc::new(Mutex::new(state)),
            events,
            wiring: Arc::new(OnceCell::new()),
        }
    }

    /// The event controller this store broadcasts on.
    pub fn events(&self) -> &EventController {
        &self.events
    }

    /// A copy of the full state — never the live reference, so external code
    /// cannot mutate state behind the setter's back.
    pub fn snapshot(&self) -> GlobalState {
        self.inner.lock().unwrap().clone()
    }

    /// Read one key.
    pub fn get(&self, key: StateKey) -> StateValue {
        let state = self.inner.lock().unwrap();
        match key {
            StateKey::SelectedMachine => StateValue::Text(state.selected_machine.clone()),
            StateKey::SelectedSensor => StateValue::Text(state.selected_sensor.clone()),
            StateKey::TimeRange => StateValue::Text(state.time_range.clone()),
            StateKey::CurrentSection => StateValue::Text(state.current_section.clone()),
            StateKey::Stats => StateValue::Stats(state.stats),
            StateKey::ChartOptions => StateValue::Chart(state.chart_options),
            StateKey::Simulation => StateValue::Simulation(state.simulation),
        }
    }

    /// Write one key.
    ///
    /// Returns `false` (and logs) when the value is the `Unset` sentinel or
    /// does not fit the key.  When the new value is structurally equal to the
    /// current one the write is a no-op: no notification, `true` returned.
    /// On a real change the value is stored and a `STATE_CHANGED` event is
    /// broadcast synchronously (stats writes additionally carry
    /// `LIMITS_UPDATED`).
    pub fn set(&self, key: StateKey, value: StateValue) -> bool {
        if value == StateValue::Unset {
            warn!("state set rejected: unset value for key '{}'", key);
            return false;
        }

        let changed = {
            let mut state = self.inner.lock().unwrap();
            match Self::apply(&mut state, key, &value) {
                Ok(changed) => changed,
                Err(()) => {
                    warn!("state set rejected: value {:?} does not fit key '{}'", value, key);
                    return false;
                }
            }
        };

        if changed {
            let mut evt = DashEvent::new(if key == StateKey::Stats {
                EventKind::STATE_CHANGED | EventKind::LIMITS_UPDATED
            } else {
                EventKind::STATE_CHANGED
            });
            evt.state_change = Some(StateChangeMeta {
                key: key.name().to_string(),
                value: value.to_json(),
                timestamp: Utc::now(),
            });
            self.events.emit(evt);
        }
        true
    }

    /// Apply `value` to `key`, returning whether the stored value changed, or
    /// `Err(())` on a key/value type mismatch.
    fn apply(state: &mut GlobalState, key: StateKey, value: &StateValue) -> Result<bool, ()> {
        macro_rules! write_field {
            ($field:expr, $new:expr) => {{
                if *$field == *$new {
                    Ok(false)
                } else {
                    *$field = $new.clone();
                    Ok(true)
                }
            }};
        }

        match (key, value) {
            (StateKey::SelectedMachine, StateValue::Text(s)) => {
                write_field!(&mut state.selected_machine, s)
            }
            (StateKey::SelectedSensor, StateValue::Text(s)) => {
                write_field!(&mut state.selected_sensor, s)
            }
            (StateKey::TimeRange, StateValue::Text(s)) => write_field!(&mut state.time_range, s),
            (StateKey::CurrentSection, StateValue::Text(s)) => {
                write_field!(&mut state.current_section, s)
            }
            (StateKey::Stats, StateValue::Stats(s)) => write_field!(&mut state.stats, s),
            (StateKey::ChartOptions, StateValue::Chart(c)) => {
                write_field!(&mut state.chart_options, c)
            }
            (StateKey::Simulation, StateValue::Simulation(s)) => {
                write_field!(&mut state.simulation, s)
            }
            _ => Err(()),
        }
    }

    /// Merge a partial limits update into the current stats.
    ///
    /// The patch must touch at least one axis, every touched axis must supply
    /// at least one band, and every supplied band must be well-formed
    /// (`lower <= upper`, finite).  Returns the merged limits on success;
    /// `None` (logged) on a structural violation.  Untouched axes and bands
    /// keep their prior values; the write itself goes through [`set`](Self::set),
    /// so an update that changes nothing emits nothing.
    pub fn update_stats(&self, patch: StatsPatch) -> Option<StatsLimits> {
        if !patch.is_valid() {
            warn!("update_stats rejected: invalid partial limits {:?}", patch);
            return None;
        }
        let merged = self.inner.lock().unwrap().stats.merged(&patch);
        self.set(StateKey::Stats, StateValue::Stats(merged));
        Some(merged)
    }

    /// Run one-time wiring (display-update subscriptions etc.) at most once
    /// per store, regardless of how many clones call it.  Returns whether `f`
    /// ran.
    pub fn attach_wiring(&self, f: impl FnOnce(&EventController)) -> bool {
        let mut ran = false;
        self.wiring.get_or_init(|| {
            f(&self.events);
            ran = true;
        });
        ran
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Unit tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventFilter;
    use crate::limits::{AxisPatch, Band};

    fn store() -> StateStore {
        StateStore::new(EventController::new())
    }

    #[test]
    fn set_then_get_round_trips() {
        let store = store();
        assert!(store.set(StateKey::SelectedMachine, "2".into()));
        assert_eq!(
            store.get(StateKey::SelectedMachine),
            StateValue::Text("2".into())
        );
    }

    #[test]
    fn snapshot_is_a_copy() {
        let store = store();
        let mut snap = store.snapshot();
        snap.selected_machine = "hacked".into();
        assert_eq!(
            store.get(StateKey::SelectedMachine),
            StateValue::Text(String::new())
        );
    }

    #[test]
    fn equal_value_emits_exactly_once() {
        let store = store();
        let rx = store.events().subscribe_all();

        assert!(store.set(StateKey::TimeRange, "7d".into()));
        assert!(store.set(StateKey::TimeRange, "7d".into())); // no-op emission

        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn unset_value_is_rejected() {
        let store = store();
        let rx = store.events().subscribe_all();
        assert!(!store.set(StateKey::TimeRange, StateValue::Unset));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn mismatched_value_is_rejected() {
        let store = store();
        assert!(!store.set(StateKey::TimeRange, StateValue::Chart(ChartOptions::default())));
        assert_eq!(store.get(StateKey::TimeRange), StateValue::Text("24h".into()));
    }

    #[test]
    fn change_event_carries_key_value_timestamp() {
        let store = store();
        let rx = store.events().subscribe(EventFilter::only(EventKind::STATE_CHANGED));

        store.set(StateKey::SelectedSensor, "5".into());
        let evt = rx.try_recv().unwrap();
        let meta = evt.state_change.unwrap();
        assert_eq!(meta.key, "selectedSensor");
        assert_eq!(meta.value, serde_json::json!("5"));
    }

    #[test]
    fn stats_write_also_flags_limits_updated() {
        let store = store();
        let rx = store.events().subscribe(EventFilter::only(EventKind::LIMITS_UPDATED));

        let mut stats = StatsLimits::default();
        stats.x.sigma2 = Band::new(-1.0, 1.0);
        store.set(StateKey::Stats, StateValue::Stats(stats));
        let evt = rx.try_recv().unwrap();
        assert!(evt.kinds.contains(EventKind::STATE_CHANGED));
        assert!(evt.kinds.contains(EventKind::LIMITS_UPDATED));
    }

    #[test]
    fn update_stats_merges_partially() {
        let store = store();
        let prior = store.snapshot().stats;

        let merged = store
            .update_stats(StatsPatch {
                x: Some(AxisPatch {
                    sigma2: Some(Band::new(1.0, 2.0)),
                    sigma3: None,
                }),
                ..Default::default()
            })
            .unwrap();

        assert_eq!(merged.x.sigma2, Band::new(1.0, 2.0));
        assert_eq!(merged.x.sigma3, prior.x.sigma3);
        assert_eq!(merged.y, prior.y);
        assert_eq!(merged.z, prior.z);
        assert_eq!(store.snapshot().stats, merged);
    }

    #[test]
    fn update_stats_rejects_empty_patch() {
        let store = store();
        assert!(store.update_stats(StatsPatch::default()).is_none());
    }

    #[test]
    fn update_stats_rejects_inverted_band() {
        let store = store();
        let patch = StatsPatch {
            y: Some(AxisPatch {
                sigma2: Some(Band::new(5.0, 1.0)),
                sigma3: None,
            }),
            ..Default::default()
        };
        assert!(store.update_stats(patch).is_none());
    }

    #[test]
    fn attach_wiring_runs_once() {
        let store = store();
        let clone = store.clone();
        assert!(store.attach_wiring(|_| {}));
        assert!(!clone.attach_wiring(|_| {}));
    }
}
