//! Dashboard configuration and the controller bundle built from it.
//!
//! The config is a plain serde struct persisted as YAML under
//! `~/.vibradash/config.yaml`.  All timing values are stored in milliseconds
//! so the file stays readable; accessors hand out [`Duration`]s.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::events::EventController;
use crate::limits::{LimitConfig, StatsLimits};
use crate::listeners::ListenerRegistry;
use crate::notify::NotifyController;
use crate::state::{GlobalState, StateStore};
use crate::timers::{Clock, TimerRegistry};

/// Tunables of the dashboard session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DashConfig {
    /// Section shown when no fragment is present.
    pub default_section: String,
    /// How long a toast stays on screen.
    pub toast_duration_ms: u64,
    /// Trailing-edge wait of debounced inputs (search fields etc.).
    pub debounce_wait_ms: u64,
    /// Minimum spacing of throttled handlers (scroll, resize).
    pub throttle_limit_ms: u64,
    /// Rate gate for recurring display refreshes.
    pub min_update_interval_ms: u64,
    /// Interval of the data simulation.
    pub simulation_period_ms: u64,
    /// Statistical limits applied at startup.
    pub limits: LimitConfig,
}

impl Default for DashConfig {
    fn default() -> Self {
        Self {
            default_section: "dashboard".to_string(),
            toast_duration_ms: 4000,
            debounce_wait_ms: 300,
            throttle_limit_ms: 200,
            min_update_interval_ms: 1000,
            simulation_period_ms: 5000,
            limits: LimitConfig::default(),
        }
    }
}

impl DashConfig {
    pub fn toast_duration(&self) -> Duration {
        Duration::from_millis(self.toast_duration_ms)
    }

    pub fn debounce_wait(&self) -> Duration {
        Duration::from_millis(self.debounce_wait_ms)
    }

    pub fn throttle_limit(&self) -> Duration {
        Duration::from_millis(self.throttle_limit_ms)
    }

    pub fn min_update_interval(&self) -> Duration {
        Duration::from_millis(self.min_update_interval_ms)
    }

    pub fn simulation_period(&self) -> Duration {
        Duration::from_millis(self.simulation_period_ms)
    }

    fn default_path() -> Result<PathBuf, String> {
        let home = std::env::var("HOME").map_err(|e| format!("HOME env var not set: {}", e))?;
        Ok(PathBuf::from(home).join(".vibradash").join("config.yaml"))
    }

    /// Save to an explicit path, creating parent directories.
    pub fn save_to_path(&self, path: &Path) -> Result<(), String> {
        if let Some(dir) = path.parent() {
            if let Err(e) = fs::create_dir_all(dir) {
                return Err(format!("Failed to create dir {:?}: {}", dir, e));
            }
        }
        let s = serde_yaml::to_string(self).map_err(|e| format!("Serialization error: {}", e))?;
        let mut f = fs::File::create(path)
            .map_err(|e| format!("Failed to create file {:?}: {}", path, e))?;
        f.write_all(s.as_bytes())
            .map_err(|e| format!("Failed to write file {:?}: {}", path, e))?;
        Ok(())
    }

    /// Save to the default path `~/.vibradash/config.yaml`.
    pub fn save_to_default_path(&self) -> Result<(), String> {
        self.save_to_path(&Self::default_path()?)
    }

    /// Load from an explicit path.  Unknown fields in the file are ignored;
    /// missing fields take their defaults.
    pub fn load_from_path(path: &Path) -> Result<DashConfig, String> {
        if !path.exists() {
            return Err(format!("Config file {:?} does not exist", path));
        }
        let s =
            fs::read_to_string(path).map_err(|e| format!("Failed to read {:?}: {}", path, e))?;
        let cfg: DashConfig =
            serde_yaml::from_str(&s).map_err(|e| format!("Deserialization error: {}", e))?;
        Ok(cfg)
    }

    /// Load from `~/.vibradash/config.yaml` if present.
    pub fn load_from_default_path() -> Result<DashConfig, String> {
        Self::load_from_path(&Self::default_path()?)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Controllers
// ─────────────────────────────────────────────────────────────────────────────

/// The controller bundle of one dashboard session, all sharing a single event
/// controller.  Build one per session and clone the handles outward.
#[derive(Clone)]
pub struct Controllers {
    pub events: EventController,
    pub state: StateStore,
    pub listeners: ListenerRegistry,
    pub timers: TimerRegistry,
    pub notify: NotifyController,
}

impl Controllers {
    pub fn new(config: &DashConfig) -> Self {
        Self::build(config, None)
    }

    /// Bundle with an injected clock for timers and toast expiry (tests).
    pub fn with_clock(config: &DashConfig, clock: Arc<dyn Clock>) -> Self {
        Self::build(config, Some(clock))
    }

    fn build(config: &DashConfig, clock: Option<Arc<dyn Clock>>) -> Self {
        let events = EventController::new();

        let state = GlobalState {
            current_section: config.default_section.clone(),
            stats: StatsLimits::from_limit_config(&config.limits),
            ..GlobalState::default()
        };
        let state = StateStore::with_state(events.clone(), state);

        let listeners = ListenerRegistry::new(events.clone());
        let (timers, notify) = match clock {
            Some(clock) => (
                TimerRegistry::with_clock(clock.clone()),
                NotifyController::with_clock(events.clone(), clock, config.toast_duration()),
            ),
            None => (
                TimerRegistry::new(),
                NotifyController::new(events.clone()),
            ),
        };

        Self {
            events,
            state,
            listeners,
            timers,
            notify,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Unit tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::limits::DEFAULT_LIMITS;
    use crate::state::{StateKey, StateValue};

    #[test]
    fn defaults_are_sane() {
        let cfg = DashConfig::default();
        assert_eq!(cfg.default_section, "dashboard");
        assert_eq!(cfg.toast_duration(), Duration::from_secs(4));
        assert_eq!(cfg.simulation_period(), Duration::from_secs(5));
        assert_eq!(cfg.limits, LimitConfig::default());
    }

    #[test]
    fn yaml_round_trip() {
        let mut cfg = DashConfig::default();
        cfg.default_section = "machines".into();
        cfg.debounce_wait_ms = 150;
        cfg.limits.x_2sup = 9.99;

        let dir = std::env::temp_dir().join(format!("vibradash-cfg-{}", std::process::id()));
        let path = dir.join("config.yaml");
        cfg.save_to_path(&path).unwrap();
        let loaded = DashConfig::load_from_path(&path).unwrap();
        fs::remove_dir_all(&dir).ok();

        assert_eq!(loaded, cfg);
    }

    #[test]
    fn load_missing_file_is_an_error() {
        let path = std::env::temp_dir().join("vibradash-definitely-missing.yaml");
        assert!(DashConfig::load_from_path(&path).is_err());
    }

    #[test]
    fn partial_yaml_fills_defaults() {
        let cfg: DashConfig = serde_yaml::from_str("toast_duration_ms: 1500\n").unwrap();
        assert_eq!(cfg.toast_duration_ms, 1500);
        assert_eq!(cfg.default_section, "dashboard");
        assert_eq!(cfg.simulation_period_ms, 5000);
    }

    #[test]
    fn controllers_seed_state_from_config() {
        let mut cfg = DashConfig::default();
        cfg.default_section = "limits".into();
        cfg.limits.y_3sup = 42.0;

        let c = Controllers::new(&cfg);
        assert_eq!(
            c.state.get(StateKey::CurrentSection),
            StateValue::Text("limits".into())
        );
        let stats = c.state.snapshot().stats;
        assert_eq!(stats.y.sigma3.upper, 42.0);
        assert_eq!(stats.x, DEFAULT_LIMITS.x);
    }
}
