//! Vibradash crate root: re-exports and module wiring.
//!
//! This crate is the interaction core of a predictive-maintenance dashboard:
//! shared session state, change notification, managed event listeners and the
//! timing utilities (debounce/throttle/rate gate) that keep display updates
//! well-behaved.
//!
//! Modules:
//! - `events`: event kinds, payload metadata and the broadcast controller
//! - `state`: the global state store with change notification
//! - `limits`: 2σ/3σ confidence bands and the flattened wire shape
//! - `listeners`: category-keyed listener registry over an `EventTarget` seam
//! - `timers`: cooperative timer registry, debouncer, throttler, rate gate
//! - `nav`: section navigation and per-view listener lifecycles
//! - `notify`: toasts and the nested loading gate
//! - `forms`: CRUD forms over a `DataBackend` seam
//! - `sim`: deterministic data simulation
//! - `config`: YAML-persisted tunables and the controller bundle

pub mod config;
pub mod events;
pub mod forms;
pub mod limits;
pub mod listeners;
pub mod nav;
pub mod notify;
pub mod sim;
pub mod state;
pub mod timers;

// Public re-exports for a compact external API
pub use config::{Controllers, DashConfig};
pub use events::{DashEvent, EventController, EventFilter, EventKind};
pub use forms::{DataBackend, EntityKind, FormController, MemoryBackend};
pub use limits::{AxisLimits, Band, LimitConfig, StatsLimits, StatsPatch};
pub use listeners::{
    Category, EventTarget, Handler, ListenOptions, ListenerKey, ListenerRegistry, ListenerScope,
    LocalTarget, TargetIdentity,
};
pub use nav::NavController;
pub use notify::{NotifyController, Toast, ToastLevel};
pub use sim::{Severity, SimulationController, VibrationSample};
pub use state::{GlobalState, StateKey, StateStore, StateValue};
pub use timers::{
    CancelCounts, Clock, DebounceOptions, Debouncer, ManualClock, MonotonicClock, ThrottleOptions,
    Throttler, TimerId, TimerKey, TimerRegistry, TimerToken,
};
