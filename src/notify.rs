//! User-facing notifications: toasts and a nested loading gate.
//!
//! Nothing in this layer can fail outward; every operation degrades to a
//! logged no-op.  Toast lifetimes are cooperative like the timer subsystem:
//! the frame loop calls [`NotifyController::prune`] to expire them.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use log::warn;
use serde::{Deserialize, Serialize};

use crate::events::{DashEvent, EventController, EventKind, LoadingMeta, ToastMeta};
use crate::timers::{Clock, MonotonicClock};

/// Severity level of a toast.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ToastLevel {
    Success,
    Info,
    Warning,
    Error,
}

impl std::fmt::Display for ToastLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ToastLevel::Success => "success",
            ToastLevel::Info => "info",
            ToastLevel::Warning => "warning",
            ToastLevel::Error => "error",
        };
        write!(f, "{}", s)
    }
}

/// One active toast.
#[derive(Debug, Clone)]
pub struct Toast {
    pub id: u64,
    pub level: ToastLevel,
    pub message: String,
    pub shown_at: Instant,
    pub duration: Duration,
}

struct NotifyInner {
    toasts: Vec<Toast>,
    next_id: u64,
    loading_depth: usize,
}

/// Controller for toasts and the loading indicator.  Clones share state.
#[derive(Clone)]
pub struct NotifyController {
    inner: Arc<Mutex<NotifyInner>>,
    events: EventController,
    clock: Arc<dyn Clock>,
    default_duration: Duration,
}

impl NotifyController {
    /// Controller with the default 4 s toast duration.
    pub fn new(events: EventController) -> Self {
        Self::with_clock(events, Arc::new(MonotonicClock), Duration::from_secs(4))
    }

    /// Controller with an injected clock and toast duration (tests, config).
    pub fn with_clock(
        events: EventController,
        clock: Arc<dyn Clock>,
        default_duration: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(Mutex::new(NotifyInner {
                toasts: Vec::new(),
                next_id: 1,
                loading_depth: 0,
            })),
            events,
            clock,
            default_duration,
        }
    }

    // ── Toasts ──────────────────────────────────────────────────────────

    /// Show a toast; returns its id for manual dismissal.
    pub fn toast(&self, level: ToastLevel, message: impl Into<String>) -> u64 {
        let message = message.into();
        let id = {
            let mut inner = self.inner.lock().unwrap();
            let id = inner.next_id;
            inner.next_id += 1;
            inner.toasts.push(Toast {
                id,
                level,
                message: message.clone(),
                shown_at: self.clock.now(),
                duration: self.default_duration,
            });
            id
        };
        let mut evt = DashEvent::new(EventKind::TOAST_SHOWN);
        evt.toast = Some(ToastMeta { id, level, message });
        self.events.emit(evt);
        id
    }

    pub fn success(&self, message: impl Into<String>) -> u64 {
        self.toast(ToastLevel::Success, message)
    }

    pub fn info(&self, message: impl Into<String>) -> u64 {
        self.toast(ToastLevel::Info, message)
    }

    pub fn warning(&self, message: impl Into<String>) -> u64 {
        self.toast(ToastLevel::Warning, message)
    }

    pub fn error(&self, message: impl Into<String>) -> u64 {
        self.toast(ToastLevel::Error, message)
    }

    /// Dismiss a toast by id; `false` when it is not (or no longer) active.
    pub fn dismiss(&self, id: u64) -> bool {
        let removed = {
            let mut inner = self.inner.lock().unwrap();
            let before = inner.toasts.len();
            inner.toasts.retain(|t| t.id != id);
            before != inner.toasts.len()
        };
        if removed {
            self.emit_dismissed(id);
        }
        removed
    }

    /// Currently visible toasts (copies).
    pub fn active(&self) -> Vec<Toast> {
        self.inner.lock().unwrap().toasts.clone()
    }

    /// Expire toasts whose duration has elapsed; returns how many were
    /// removed.  Called from the frame loop.
    pub fn prune(&self) -> usize {
        let now = self.clock.now();
        let expired: Vec<u64> = {
            let mut inner = self.inner.lock().unwrap();
            let (gone, keep): (Vec<Toast>, Vec<Toast>) = inner
                .toasts
                .drain(..)
                .partition(|t| now.duration_since(t.shown_at) >= t.duration);
            inner.toasts = keep;
            gone.iter().map(|t| t.id).collect()
        };
        for id in &expired {
            self.emit_dismissed(*id);
        }
        expired.len()
    }

    fn emit_dismissed(&self, id: u64) {
        let mut evt = DashEvent::new(EventKind::TOAST_DISMISSED);
        evt.toast = Some(ToastMeta {
            id,
            level: ToastLevel::Info,
            message: String::new(),
        });
        self.events.emit(evt);
    }

    // ── Loading gate ────────────────────────────────────────────────────

    /// Mark a loading operation as started; nests.  Returns the new depth.
    pub fn begin_loading(&self, label: Option<&str>) -> usize {
        let depth = {
            let mut inner = self.inner.lock().unwrap();
            inner.loading_depth += 1;
            inner.loading_depth
        };
        let mut evt = DashEvent::new(EventKind::LOADING_STARTED);
        evt.loading = Some(LoadingMeta {
            label: label.map(|s| s.to_string()),
            depth,
        });
        self.events.emit(evt);
        depth
    }

    /// Mark the innermost loading operation as finished.  Returns the
    /// remaining depth; an unbalanced call is a logged no-op.
    pub fn finish_loading(&self) -> usize {
        let depth = {
            let mut inner = self.inner.lock().unwrap();
            if inner.loading_depth == 0 {
                warn!("finish_loading without matching begin_loading");
                return 0;
            }
            inner.loading_depth -= 1;
            inner.loading_depth
        };
        if depth == 0 {
            let mut evt = DashEvent::new(EventKind::LOADING_FINISHED);
            evt.loading = Some(LoadingMeta { label: None, depth });
            self.events.emit(evt);
        }
        depth
    }

    /// Whether any loading operation is in flight.
    pub fn is_loading(&self) -> bool {
        self.inner.lock().unwrap().loading_depth > 0
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Unit tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timers::ManualClock;

    fn manual() -> (NotifyController, Arc<ManualClock>, EventController) {
        let events = EventController::new();
        let clock = ManualClock::new();
        let ctrl = NotifyController::with_clock(events.clone(), clock.clone(), Duration::from_secs(4));
        (ctrl, clock, events)
    }

    #[test]
    fn toast_show_and_dismiss() {
        let (notify, _clock, events) = manual();
        let rx = events.subscribe_all();

        let id = notify.error("Could not save machine");
        assert_eq!(notify.active().len(), 1);
        let evt = rx.try_recv().unwrap();
        assert!(evt.kinds.contains(EventKind::TOAST_SHOWN));
        assert_eq!(evt.toast.unwrap().level, ToastLevel::Error);

        assert!(notify.dismiss(id));
        assert!(!notify.dismiss(id));
        assert!(notify.active().is_empty());
    }

    #[test]
    fn toasts_expire_on_prune() {
        let (notify, clock, events) = manual();
        notify.success("Saved");
        let rx = events.subscribe_all();

        clock.advance(Duration::from_secs(3));
        assert_eq!(notify.prune(), 0);
        clock.advance(Duration::from_secs(1));
        assert_eq!(notify.prune(), 1);
        assert!(notify.active().is_empty());

        let evt = rx.try_recv().unwrap();
        assert!(evt.kinds.contains(EventKind::TOAST_DISMISSED));
    }

    #[test]
    fn loading_gate_nests() {
        let (notify, _clock, events) = manual();
        let rx = events.subscribe_all();

        assert_eq!(notify.begin_loading(Some("Loading machines")), 1);
        assert_eq!(notify.begin_loading(None), 2);
        assert!(notify.is_loading());

        assert_eq!(notify.finish_loading(), 1);
        assert_eq!(notify.finish_loading(), 0);
        assert!(!notify.is_loading());

        // Unbalanced call is a no-op.
        assert_eq!(notify.finish_loading(), 0);

        let kinds: Vec<EventKind> = rx.try_iter().map(|e| e.kinds).collect();
        let finished = kinds
            .iter()
            .filter(|k| k.contains(EventKind::LOADING_FINISHED))
            .count();
        // LOADING_FINISHED only when depth returns to zero.
        assert_eq!(finished, 1);
    }
}
