//! Timer-based rate control: debounce, throttle, rate gate and intervals.
//!
//! The registry is cooperative: nothing fires on its own thread.  The owner
//! of the frame/idle loop calls [`TimerRegistry::run_pending`] and due
//! callbacks run there, outside the registry lock, so a callback may freely
//! schedule or cancel timers.  Tests drive a [`ManualClock`] instead of
//! sleeping.
//!
//! Every timer is keyed by a caller-supplied [`TimerToken`] plus a context
//! string.  The token is an explicit stable identity — the key never derives
//! from the wrapped callback itself, so two distinct callbacks can never
//! collide unless the caller reuses a token.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use log::debug;

// ─────────────────────────────────────────────────────────────────────────────
// Clock
// ─────────────────────────────────────────────────────────────────────────────

/// Time source for the registry.  Production code uses [`MonotonicClock`];
/// tests use [`ManualClock`] and advance it explicitly.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// The real monotonic clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct MonotonicClock;

impl Clock for MonotonicClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// A manually advanced clock for deterministic tests.
pub struct ManualClock {
    base: Instant,
    offset: Mutex<Duration>,
}

impl ManualClock {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            base: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
        })
    }

    /// Move the clock forward by `d`.
    pub fn advance(&self, d: Duration) {
        *self.offset.lock().unwrap() += d;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.base + *self.offset.lock().unwrap()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Keys and records
// ─────────────────────────────────────────────────────────────────────────────

/// Opaque, caller-supplied stable identity for a rate-controlled callback.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TimerToken(String);

impl TimerToken {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TimerToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Full key of a timer record: token plus caller-supplied context.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TimerKey {
    pub token: TimerToken,
    pub context: String,
}

impl TimerKey {
    pub fn new(token: TimerToken, context: impl Into<String>) -> Self {
        Self {
            token,
            context: context.into(),
        }
    }

    /// Substring match used by [`TimerRegistry::cancel_pending`].
    pub fn matches_context(&self, needle: &str) -> bool {
        self.context.contains(needle)
    }
}

/// Unique handle of one scheduled timer instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(u64);

/// What scheduled a pending timer (for cancellation accounting).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    Debounce,
    Throttle,
    Interval,
}

struct PendingTimer {
    id: TimerId,
    kind: TimerKind,
    deadline: Instant,
    /// Refire period; only set for intervals.
    period: Option<Duration>,
    callback: Box<dyn FnMut() + Send>,
}

/// Counts of cancelled pending timers, per kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CancelCounts {
    pub debounce: usize,
    pub throttle: usize,
    pub interval: usize,
}

impl CancelCounts {
    pub fn total(&self) -> usize {
        self.debounce + self.throttle + self.interval
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// TimerRegistry
// ─────────────────────────────────────────────────────────────────────────────

struct TimerInner {
    pending: HashMap<TimerKey, PendingTimer>,
    last_run: HashMap<TimerKey, Instant>,
    /// Interval ids whose callback is currently executing in `run_pending`.
    running: HashSet<TimerId>,
    /// Interval ids cancelled while their callback was in flight.
    tombstones: HashSet<TimerId>,
    next_id: u64,
}

/// Shared registry of in-flight timers and last-execution timestamps.
#[derive(Clone)]
pub struct TimerRegistry {
    inner: Arc<Mutex<TimerInner>>,
    clock: Arc<dyn Clock>,
}

impl TimerRegistry {
    /// Registry driven by the real monotonic clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(MonotonicClock))
    }

    /// Registry driven by an injected clock (tests).
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(TimerInner {
                pending: HashMap::new(),
                last_run: HashMap::new(),
                running: HashSet::new(),
                tombstones: HashSet::new(),
                next_id: 1,
            })),
            clock,
        }
    }

    pub(crate) fn now(&self) -> Instant {
        self.clock.now()
    }

    fn alloc_id(inner: &mut TimerInner) -> TimerId {
        let id = TimerId(inner.next_id);
        inner.next_id += 1;
        id
    }

    /// Schedule (or replace) the pending timer under `key`.
    pub(crate) fn schedule(
        &self,
        key: TimerKey,
        kind: TimerKind,
        deadline: Instant,
        period: Option<Duration>,
        callback: Box<dyn FnMut() + Send>,
    ) -> TimerId {
        let mut inner = self.inner.lock().unwrap();
        let id = Self::alloc_id(&mut inner);
        inner.pending.insert(
            key,
            PendingTimer {
                id,
                kind,
                deadline,
                period,
                callback,
            },
        );
        id
    }

    /// Replace the stored callback of an already-pending timer without moving
    /// its deadline (throttle coalescing: latest arguments win).
    pub(crate) fn replace_callback(&self, key: &TimerKey, callback: Box<dyn FnMut() + Send>) -> bool {
        let mut inner = self.inner.lock().unwrap();
        match inner.pending.get_mut(key) {
            Some(pending) => {
                pending.callback = callback;
                true
            }
            None => false,
        }
    }

    pub(crate) fn has_pending(&self, key: &TimerKey) -> bool {
        self.inner.lock().unwrap().pending.contains_key(key)
    }

    /// Remove the pending timer under `key` without running it.
    pub(crate) fn cancel_key(&self, key: &TimerKey) -> bool {
        self.inner.lock().unwrap().pending.remove(key).is_some()
    }

    /// Last actual execution recorded for `key`.
    pub(crate) fn last_run(&self, key: &TimerKey) -> Option<Instant> {
        self.inner.lock().unwrap().last_run.get(key).copied()
    }

    /// Record an execution that happened outside `run_pending` (leading edge
    /// fires, max-wait fires).
    pub(crate) fn record_run(&self, key: &TimerKey, at: Instant) {
        self.inner.lock().unwrap().last_run.insert(key.clone(), at);
    }

    /// Number of pending timers (diagnostic).
    pub fn pending_count(&self) -> usize {
        self.inner.lock().unwrap().pending.len()
    }

    // ── Intervals ───────────────────────────────────────────────────────

    /// Schedule a repeating callback; refires every `period` until cancelled.
    pub fn schedule_interval(
        &self,
        token: TimerToken,
        context: impl Into<String>,
        period: Duration,
        callback: impl FnMut() + Send + 'static,
    ) -> TimerId {
        let key = TimerKey::new(token, context);
        let deadline = self.now() + period;
        self.schedule(
            key,
            TimerKind::Interval,
            deadline,
            Some(period),
            Box::new(callback),
        )
    }

    /// Cancel an interval by id.  Safe to call from inside the interval's own
    /// callback.  Stale or unknown handles return `false`.
    pub fn cancel_interval(&self, id: TimerId) -> bool {
        let mut inner = self.inner.lock().unwrap();
        let key = inner
            .pending
            .iter()
            .find(|(_, p)| p.id == id)
            .map(|(k, _)| k.clone());
        match key {
            Some(k) => inner.pending.remove(&k).is_some(),
            // Mid-flight in run_pending: tombstone it so it is not re-armed.
            None if inner.running.contains(&id) => inner.tombstones.insert(id),
            None => false,
        }
    }

    // ── Rate gate ───────────────────────────────────────────────────────

    /// Gate (not a wrapper): returns whether at least `min_interval` elapsed
    /// since the key's last recorded timestamp.  When `update_timestamp` is
    /// set, "now" is recorded — but only when the gate opens.
    pub fn should_update(
        &self,
        token: &TimerToken,
        context: &str,
        min_interval: Duration,
        update_timestamp: bool,
    ) -> bool {
        let key = TimerKey::new(token.clone(), context);
        let now = self.now();
        let mut inner = self.inner.lock().unwrap();
        let open = match inner.last_run.get(&key) {
            Some(last) => now.duration_since(*last) >= min_interval,
            None => true,
        };
        if open && update_timestamp {
            inner.last_run.insert(key, now);
        }
        open
    }

    // ── Bulk cancellation ───────────────────────────────────────────────

    /// Cancel all pending timers whose key context contains `context`
    /// (or every pending timer when `None`).  Returns counts per kind.
    pub fn cancel_pending(&self, context: Option<&str>) -> CancelCounts {
        let mut inner = self.inner.lock().unwrap();
        let keys: Vec<TimerKey> = inner
            .pending
            .keys()
            .filter(|k| context.map(|c| k.matches_context(c)).unwrap_or(true))
            .cloned()
            .collect();
        let mut counts = CancelCounts::default();
        for key in keys {
            if let Some(pending) = inner.pending.remove(&key) {
                match pending.kind {
                    TimerKind::Debounce => counts.debounce += 1,
                    TimerKind::Throttle => counts.throttle += 1,
                    TimerKind::Interval => counts.interval += 1,
                }
            }
        }
        if counts.total() > 0 {
            debug!(
                "cancelled {} pending timer(s) (context: {:?})",
                counts.total(),
                context
            );
        }
        counts
    }

    // ── Pump ────────────────────────────────────────────────────────────

    /// Fire every due timer.  Callbacks run outside the registry lock;
    /// intervals are re-armed afterwards unless cancelled from within their
    /// own callback.  Returns the number of callbacks fired.
    pub fn run_pending(&self) -> usize {
        let now = self.now();

        // Phase 1: extract due entries under the lock; intervals are marked
        // running so cancel_interval can tombstone them mid-flight.
        let mut due: Vec<(TimerKey, PendingTimer)> = {
            let mut inner = self.inner.lock().unwrap();
            let keys: Vec<TimerKey> = inner
                .pending
                .iter()
                .filter(|(_, p)| p.deadline <= now)
                .map(|(k, _)| k.clone())
                .collect();
            let due: Vec<(TimerKey, PendingTimer)> = keys
                .into_iter()
                .filter_map(|k| inner.pending.remove(&k).map(|p| (k, p)))
                .collect();
            for (_, p) in &due {
                if p.period.is_some() {
                    inner.running.insert(p.id);
                }
            }
            due
        };

        // Deterministic firing order (oldest deadline first).
        due.sort_by_key(|(_, p)| p.deadline);

        // Phase 2: run callbacks with the lock released.
        let fired = due.len();
        for (key, mut pending) in due {
            (pending.callback)();
            let mut inner = self.inner.lock().unwrap();
            inner.last_run.insert(key.clone(), now);
            if let Some(period) = pending.period {
                inner.running.remove(&pending.id);
                if inner.tombstones.remove(&pending.id) {
                    continue;
                }
                // Re-arm, unless the callback itself rescheduled the key.
                if !inner.pending.contains_key(&key) {
                    pending.deadline = now + period;
                    inner.pending.insert(key, pending);
                }
            }
        }
        fired
    }
}

impl Default for TimerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Debounce
// ─────────────────────────────────────────────────────────────────────────────

/// Options for [`Debouncer`].
#[derive(Clone, Debug)]
pub struct DebounceOptions {
    /// Fire immediately on the triggering call when no timer is pending,
    /// in addition to the trailing execution.
    pub leading: bool,
    /// Force an immediate fire when this much time passed since the last
    /// actual execution, or, before anything has fired, since the start of
    /// the current call burst.  The first call of a burst never fires early.
    pub max_wait: Option<Duration>,
    /// Context string for bulk cancellation.
    pub context: String,
}

impl Default for DebounceOptions {
    fn default() -> Self {
        Self {
            leading: false,
            max_wait: None,
            context: "global".to_string(),
        }
    }
}

/// Debounced wrapper around a callback: each call resets the pending wait
/// timer; only the most recent call's arguments are used for the eventual
/// trailing execution.
pub struct Debouncer<T: Clone + Send + 'static> {
    registry: TimerRegistry,
    key: TimerKey,
    wait: Duration,
    leading: bool,
    max_wait: Option<Duration>,
    /// First call of the ongoing burst; the max-wait anchor before anything
    /// has executed.
    burst_start: Mutex<Option<Instant>>,
    callback: Arc<dyn Fn(T) + Send + Sync>,
}

impl<T: Clone + Send + 'static> Debouncer<T> {
    pub fn new(
        registry: &TimerRegistry,
        token: TimerToken,
        wait: Duration,
        options: DebounceOptions,
        callback: impl Fn(T) + Send + Sync + 'static,
    ) -> Self {
        Self {
            registry: registry.clone(),
            key: TimerKey::new(token, options.context),
            wait,
            leading: options.leading,
            max_wait: options.max_wait,
            burst_start: Mutex::new(None),
            callback: Arc::new(callback),
        }
    }

    /// The registry key this debouncer schedules under.
    pub fn key(&self) -> &TimerKey {
        &self.key
    }

    /// Invoke the debounced callback with `args`.
    pub fn call(&self, args: T) {
        let now = self.registry.now();

        // Max-wait override: a sustained burst must not starve the callback
        // past max_wait.  The anchor is the last actual execution or, when
        // nothing has fired yet, the first call of the current burst.
        if let Some(max_wait) = self.max_wait {
            let mut burst = self.burst_start.lock().unwrap();
            if !self.registry.has_pending(&self.key) {
                // First call of a new burst; the anchor starts here.
                *burst = Some(now);
            } else {
                let anchor = match (self.registry.last_run(&self.key), *burst) {
                    (Some(last), Some(start)) => last.max(start),
                    (Some(last), None) => last,
                    (None, Some(start)) => start,
                    (None, None) => now,
                };
                if now.duration_since(anchor) > max_wait {
                    *burst = Some(now);
                    drop(burst);
                    self.registry.cancel_key(&self.key);
                    (self.callback)(args);
                    self.registry.record_run(&self.key, now);
                    return;
                }
            }
        }

        if self.leading && !self.registry.has_pending(&self.key) {
            (self.callback)(args.clone());
            self.registry.record_run(&self.key, now);
        }

        let cb = self.callback.clone();
        let latest = args;
        self.registry.schedule(
            self.key.clone(),
            TimerKind::Debounce,
            now + self.wait,
            None,
            Box::new(move || cb(latest.clone())),
        );
    }

    /// Cancel the pending trailing execution, if any.
    pub fn cancel(&self) -> bool {
        self.registry.cancel_key(&self.key)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Throttle
// ─────────────────────────────────────────────────────────────────────────────

/// Options for [`Throttler`].
#[derive(Clone, Debug)]
pub struct ThrottleOptions {
    /// Fire immediately when at least `limit` elapsed since the last run.
    pub leading: bool,
    /// Schedule one coalesced execution at the remaining wait time.
    pub trailing: bool,
    /// Context string for bulk cancellation.
    pub context: String,
}

impl Default for ThrottleOptions {
    fn default() -> Self {
        Self {
            leading: true,
            trailing: false,
            context: "global".to_string(),
        }
    }
}

/// Throttled wrapper: at most one execution per `limit` window, with optional
/// leading fire and an optional coalesced trailing execution carrying the most
/// recent arguments.
pub struct Throttler<T: Clone + Send + 'static> {
    registry: TimerRegistry,
    key: TimerKey,
    limit: Duration,
    leading: bool,
    trailing: bool,
    callback: Arc<dyn Fn(T) + Send + Sync>,
}

impl<T: Clone + Send + 'static> Throttler<T> {
    pub fn new(
        registry: &TimerRegistry,
        token: TimerToken,
        limit: Duration,
        options: ThrottleOptions,
        callback: impl Fn(T) + Send + Sync + 'static,
    ) -> Self {
        Self {
            registry: registry.clone(),
            key: TimerKey::new(token, options.context),
            limit,
            leading: options.leading,
            trailing: options.trailing,
            callback: Arc::new(callback),
        }
    }

    /// The registry key this throttler schedules under.
    pub fn key(&self) -> &TimerKey {
        &self.key
    }

    /// Invoke the throttled callback with `args`.
    pub fn call(&self, args: T) {
        let now = self.registry.now();
        let elapsed = self.registry.last_run(&self.key).map(|t| now.duration_since(t));
        let window_open = elapsed.map(|e| e >= self.limit).unwrap_or(true);

        if window_open && self.leading {
            (self.callback)(args);
            self.registry.record_run(&self.key, now);
            return;
        }

        if !self.trailing {
            return;
        }

        let cb = self.callback.clone();
        let latest = args;
        let trailing_cb: Box<dyn FnMut() + Send> = Box::new(move || cb(latest.clone()));

        if self.registry.has_pending(&self.key) {
            // Coalesce: keep the scheduled deadline, refresh the arguments.
            self.registry.replace_callback(&self.key, trailing_cb);
        } else {
            let remaining = match elapsed {
                Some(e) if e < self.limit => self.limit - e,
                _ => self.limit,
            };
            self.registry.schedule(
                self.key.clone(),
                TimerKind::Throttle,
                now + remaining,
                None,
                trailing_cb,
            );
        }
    }

    /// Cancel the pending trailing execution, if any.
    pub fn cancel(&self) -> bool {
        self.registry.cancel_key(&self.key)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Unit tests
// ─────────────────────────────────────────────────────────────────────────────
