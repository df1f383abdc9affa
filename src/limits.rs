//! Statistical limits: per-axis 2σ/3σ confidence bands and the flattened
//! wire shape consumed by the chart-redraw collaborator.
//!
//! The nested [`StatsLimits`] form is what the state store holds; the
//! flattened [`LimitConfig`] form (`x_2inf`, `x_2sup`, …, `z_3sup`) is what
//! the charting side and the limits endpoint expect.  [`StatsLimits::to_limit_config`]
//! and [`StatsLimits::from_limit_config`] are the single authoritative mapping
//! between the two.

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

/// A single confidence band. Invariant: `lower <= upper`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Band {
    pub lower: f64,
    pub upper: f64,
}

impl Band {
    pub fn new(lower: f64, upper: f64) -> Self {
        Self { lower, upper }
    }

    /// `true` when the band is well-formed (`lower <= upper`, both finite).
    #[inline]
    pub fn is_valid(&self) -> bool {
        self.lower.is_finite() && self.upper.is_finite() && self.lower <= self.upper
    }
}

/// The 2σ and 3σ bands of one accelerometer axis.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AxisLimits {
    pub sigma2: Band,
    pub sigma3: Band,
}

/// Statistical thresholds for all three accelerometer axes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StatsLimits {
    pub x: AxisLimits,
    pub y: AxisLimits,
    pub z: AxisLimits,
}

/// Factory-seeded default limits, matching the backend's initial limit
/// configuration row.
pub static DEFAULT_LIMITS: Lazy<StatsLimits> = Lazy::new(|| StatsLimits {
    x: AxisLimits {
        sigma2: Band::new(-2.36, 2.18),
        sigma3: Band::new(-3.5, 3.32),
    },
    y: AxisLimits {
        sigma2: Band::new(7.18, 12.09),
        sigma3: Band::new(5.95, 13.32),
    },
    z: AxisLimits {
        sigma2: Band::new(-2.39, 1.11),
        sigma3: Band::new(-3.26, 1.98),
    },
});

impl Default for StatsLimits {
    fn default() -> Self {
        *DEFAULT_LIMITS
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Partial update shapes
// ─────────────────────────────────────────────────────────────────────────────

/// Partial bands for one axis; `None` leaves the band untouched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct AxisPatch {
    pub sigma2: Option<Band>,
    pub sigma3: Option<Band>,
}

impl AxisPatch {
    /// `true` when the patch supplies at least one band.
    pub fn touches_anything(&self) -> bool {
        self.sigma2.is_some() || self.sigma3.is_some()
    }
}

/// A partial limits update; axes set to `None` are left untouched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct StatsPatch {
    pub x: Option<AxisPatch>,
    pub y: Option<AxisPatch>,
    pub z: Option<AxisPatch>,
}

impl StatsPatch {
    /// `true` when no axis is touched (an invalid update).
    pub fn is_empty(&self) -> bool {
        !self
            .axes()
            .iter()
            .any(|a| a.map(|p| p.touches_anything()).unwrap_or(false))
    }

    /// All supplied bands are well-formed and every present axis touches at
    /// least one band.
    pub fn is_valid(&self) -> bool {
        if self.is_empty() {
            return false;
        }
        for axis in self.axes().into_iter().flatten() {
            if !axis.touches_anything() {
                return false;
            }
            for band in [axis.sigma2, axis.sigma3].into_iter().flatten() {
                if !band.is_valid() {
                    return false;
                }
            }
        }
        true
    }

    fn axes(&self) -> [Option<AxisPatch>; 3] {
        [self.x, self.y, self.z]
    }
}

impl StatsLimits {
    /// Deep-merge a partial update over `self`, band by band.  Axes and bands
    /// the patch does not supply keep their prior values.  The patch is
    /// assumed validated (see [`StatsPatch::is_valid`]).
    pub fn merged(&self, patch: &StatsPatch) -> StatsLimits {
        fn merge_axis(prev: AxisLimits, patch: Option<AxisPatch>) -> AxisLimits {
            match patch {
                Some(p) => AxisLimits {
                    sigma2: p.sigma2.unwrap_or(prev.sigma2),
                    sigma3: p.sigma3.unwrap_or(prev.sigma3),
                },
                None => prev,
            }
        }
        StatsLimits {
            x: merge_axis(self.x, patch.x),
            y: merge_axis(self.y, patch.y),
            z: merge_axis(self.z, patch.z),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// LimitConfig – flattened collaborator wire shape
// ─────────────────────────────────────────────────────────────────────────────

/// The flattened axis/band/bound naming used by the charting collaborator and
/// the limits endpoint (`inf` = lower bound, `sup` = upper bound).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LimitConfig {
    pub x_2inf: f64,
    pub x_2sup: f64,
    pub x_3inf: f64,
    pub x_3sup: f64,
    pub y_2inf: f64,
    pub y_2sup: f64,
    pub y_3inf: f64,
    pub y_3sup: f64,
    pub z_2inf: f64,
    pub z_2sup: f64,
    pub z_3inf: f64,
    pub z_3sup: f64,
}

impl Default for LimitConfig {
    fn default() -> Self {
        StatsLimits::default().to_limit_config()
    }
}

impl StatsLimits {
    /// Convert to the flattened wire shape.
    pub fn to_limit_config(&self) -> LimitConfig {
        LimitConfig {
            x_2inf: self.x.sigma2.lower,
            x_2sup: self.x.sigma2.upper,
            x_3inf: self.x.sigma3.lower,
            x_3sup: self.x.sigma3.upper,
            y_2inf: self.y.sigma2.lower,
            y_2sup: self.y.sigma2.upper,
            y_3inf: self.y.sigma3.lower,
            y_3sup: self.y.sigma3.upper,
            z_2inf: self.z.sigma2.lower,
            z_2sup: self.z.sigma2.upper,
            z_3inf: self.z.sigma3.lower,
            z_3sup: self.z.sigma3.upper,
        }
    }

    /// Build the nested shape from the flattened wire shape.
    pub fn from_limit_config(cfg: &LimitConfig) -> StatsLimits {
        StatsLimits {
            x: AxisLimits {
                sigma2: Band::new(cfg.x_2inf, cfg.x_2sup),
                sigma3: Band::new(cfg.x_3inf, cfg.x_3sup),
            },
            y: AxisLimits {
                sigma2: Band::new(cfg.y_2inf, cfg.y_2sup),
                sigma3: Band::new(cfg.y_3inf, cfg.y_3sup),
            },
            z: AxisLimits {
                sigma2: Band::new(cfg.z_2inf, cfg.z_2sup),
                sigma3: Band::new(cfg.z_3inf, cfg.z_3sup),
            },
        }
    }
}
