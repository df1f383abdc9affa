//! Data simulation: a repeating interval that synthesizes accelerometer
//! samples and classifies them against the current statistical limits.
//!
//! The run flag and the owned interval handle live in the state store
//! (`simulation` key), so display code observes start/stop like any other
//! state change.  Ticks fire from [`TimerRegistry::run_pending`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::warn;

use crate::events::{DashEvent, EventController, EventKind, SampleMeta, SimulationMeta};
use crate::limits::StatsLimits;
use crate::state::{SimulationState, StateKey, StateStore, StateValue};
use crate::timers::{TimerRegistry, TimerToken};

/// Severity of a sample relative to the configured bands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    /// Inside the 2σ band on every axis.
    Normal,
    /// Outside 2σ but inside 3σ on at least one axis.
    Warning,
    /// Outside the 3σ band on at least one axis.
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Severity::Normal => "normal",
            Severity::Warning => "warning",
            Severity::Critical => "critical",
        };
        write!(f, "{}", s)
    }
}

/// One synthesized accelerometer sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VibrationSample {
    pub sensor_id: u64,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

/// Classify a sample against the limits: any axis outside its 3σ band is
/// critical, outside 2σ is a warning, otherwise normal.
pub fn classify(sample: &VibrationSample, limits: &StatsLimits) -> Severity {
    let axes = [
        (sample.x, limits.x),
        (sample.y, limits.y),
        (sample.z, limits.z),
    ];
    let mut severity = Severity::Normal;
    for (value, axis) in axes {
        let level = if value < axis.sigma3.lower || value > axis.sigma3.upper {
            Severity::Critical
        } else if value < axis.sigma2.lower || value > axis.sigma2.upper {
            Severity::Warning
        } else {
            Severity::Normal
        };
        severity = severity.max(level);
    }
    severity
}

/// Deterministic waveform in the ranges of the real sensor: x and z oscillate
/// around zero, y around gravity.
fn synthesize(tick: u64, sensor_id: u64) -> VibrationSample {
    let t = tick as f64;
    VibrationSample {
        sensor_id,
        x: 2.4 * (0.7 * t).sin(),
        y: 9.6 + 2.6 * (0.5 * t + 1.0).sin(),
        z: -0.6 + 1.7 * (0.9 * t + 2.0).sin(),
    }
}

/// Controller for the data simulation.
#[derive(Clone)]
pub struct SimulationController {
    state: StateStore,
    timers: TimerRegistry,
    events: EventController,
}

impl SimulationController {
    pub fn new(state: StateStore, timers: TimerRegistry) -> Self {
        let events = state.events().clone();
        Self {
            state,
            timers,
            events,
        }
    }

    /// Whether the simulation is currently running.
    pub fn is_running(&self) -> bool {
        matches!(
            self.state.get(StateKey::Simulation),
            StateValue::Simulation(SimulationState { running: true, .. })
        )
    }

    /// Start generating samples every `period`.  Returns `false` (logged)
    /// when a simulation is already running.
    pub fn start(&self, period: Duration) -> bool {
        if self.is_running() {
            warn!("simulation start ignored: already running");
            return false;
        }

        let sensor_id = match self.state.get(StateKey::SelectedSensor) {
            StateValue::Text(s) => s.parse().unwrap_or(1),
            _ => 1,
        };
        let tick = Arc::new(AtomicU64::new(0));
        let state = self.state.clone();
        let events = self.events.clone();

        let id = self.timers.schedule_interval(
            TimerToken::new("simulation-tick"),
            "simulation",
            period,
            move || {
                let n = tick.fetch_add(1, Ordering::SeqCst);
                let sample = synthesize(n, sensor_id);
                let severity = classify(&sample, &state.snapshot().stats);
                let mut evt = DashEvent::new(EventKind::SAMPLE_GENERATED);
                evt.sample = Some(SampleMeta {
                    sensor_id: sample.sensor_id,
                    x: sample.x,
                    y: sample.y,
                    z: sample.z,
                    severity,
                });
                events.emit(evt);
            },
        );

        self.state.set(
            StateKey::Simulation,
            StateValue::Simulation(SimulationState {
                running: true,
                timer: Some(id),
            }),
        );

        let mut evt = DashEvent::new(EventKind::SIMULATION_STARTED);
        evt.simulation = Some(SimulationMeta {
            timer: Some(id),
            period_ms: Some(period.as_millis() as u64),
        });
        self.events.emit(evt);
        true
    }

    /// Stop the simulation and release its interval.  Returns `false` when
    /// nothing is running.
    pub fn stop(&self) -> bool {
        let timer = match self.state.get(StateKey::Simulation) {
            StateValue::Simulation(SimulationState {
                running: true,
                timer,
            }) => timer,
            _ => {
                warn!("simulation stop ignored: not running");
                return false;
            }
        };

        if let Some(id) = timer {
            self.timers.cancel_interval(id);
        }
        self.state.set(
            StateKey::Simulation,
            StateValue::Simulation(SimulationState::default()),
        );

        let mut evt = DashEvent::new(EventKind::SIMULATION_STOPPED);
        evt.simulation = Some(SimulationMeta {
            timer,
            period_ms: None,
        });
        self.events.emit(evt);
        true
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Unit tests
// ─────────────────────────────────────────────────────────────────────────────
