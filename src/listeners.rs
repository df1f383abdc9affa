//! Managed listener registry: every event subscription is tracked under a
//! composite key (category, target identity, event name) so whole categories
//! can be torn down in one call when a view goes away.
//!
//! The registry does not talk to a real document/window: targets implement
//! [`EventTarget`], a minimal attach/detach surface, which keeps the registry
//! testable and the DOM (or any other event source) behind a seam.
//! [`LocalTarget`] is the in-process implementation used by tests and
//! headless embedding.
//!
//! Invariant: at most one entry per key.  Registering a duplicate key evicts
//! and replaces the prior registration.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use log::warn;

use crate::events::{ClearedMeta, DashEvent, EventController, EventKind};

/// A registered event handler.
pub type Handler = Arc<dyn Fn(&DashEvent) + Send + Sync>;

/// Listener options (mirrors the usual capture/passive/once trio; all false
/// by default).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ListenOptions {
    pub capture: bool,
    pub passive: bool,
    pub once: bool,
}

// ─────────────────────────────────────────────────────────────────────────────
// Target identity
// ─────────────────────────────────────────────────────────────────────────────

/// Identity of an event target for keying purposes.
///
/// Targets without an identifier all share the `Anonymous` bucket: two
/// distinct anonymous targets registered under the same category and event
/// name collide and overwrite each other.  This mirrors the behavior of the
/// dashboard this registry grew out of; give targets an `Id` when that
/// matters.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TargetIdentity {
    /// An element with its own identifier.
    Id(String),
    /// The document root.
    Document,
    /// The window root.
    Window,
    /// Generic bucket for identity-less targets.
    Anonymous,
}

impl TargetIdentity {
    /// The fragment this identity contributes to a [`ListenerKey`].
    pub fn key_fragment(&self) -> &str {
        match self {
            TargetIdentity::Id(id) => id.as_str(),
            TargetIdentity::Document => "document",
            TargetIdentity::Window => "window",
            TargetIdentity::Anonymous => "anonymous",
        }
    }
}

/// Error attaching to or detaching from a target.
#[derive(Debug, Clone)]
pub struct TargetError(pub String);

impl std::fmt::Display for TargetError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for TargetError {}

/// Handle of one attachment on a target.
pub type AttachmentId = u64;

/// Minimal attach/detach surface of an event source.
///
/// Implementations wrap whatever actually dispatches events (a DOM bridge, a
/// UI toolkit widget, [`LocalTarget`] in tests).  `attach` returns a handle
/// that `detach` later takes back; either side may fail, and the registry
/// treats failures as logged no-ops.
pub trait EventTarget: Send + Sync {
    fn identity(&self) -> TargetIdentity;
    fn attach(
        &self,
        event: &str,
        handler: Handler,
        options: ListenOptions,
    ) -> Result<AttachmentId, TargetError>;
    fn detach(&self, attachment: AttachmentId) -> Result<(), TargetError>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Keys and categories
// ─────────────────────────────────────────────────────────────────────────────

/// Listener category, used for bulk teardown.  Required on registration so
/// per-view listeners cannot silently accumulate in a default bucket.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Category(String);

impl Category {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// The session-lifetime bucket for window/document listeners.
    pub fn global() -> Self {
        Self("global".to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Composite key of one managed listener.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ListenerKey {
    pub category: Category,
    pub target: String,
    pub event: String,
}

impl ListenerKey {
    fn new(category: &Category, identity: &TargetIdentity, event: &str) -> Self {
        Self {
            category: category.clone(),
            target: identity.key_fragment().to_string(),
            event: event.to_string(),
        }
    }
}

impl std::fmt::Display for ListenerKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}_{}_{}", self.category, self.target, self.event)
    }
}

struct ManagedListener {
    target: Arc<dyn EventTarget>,
    attachment: AttachmentId,
    options: ListenOptions,
}

/// Read-only aggregation over the registry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListenerInfo {
    pub total: usize,
    pub by_category: HashMap<String, usize>,
    pub by_target: HashMap<String, usize>,
    pub by_event: HashMap<String, usize>,
}

// ─────────────────────────────────────────────────────────────────────────────
// ListenerRegistry
// ─────────────────────────────────────────────────────────────────────────────

/// Shared registry of managed listeners.  Clones share the same table.
#[derive(Clone)]
pub struct ListenerRegistry {
    inner: Arc<Mutex<HashMap<ListenerKey, ManagedListener>>>,
    events: EventController,
}

impl ListenerRegistry {
    pub fn new(events: EventController) -> Self {
        Self {
            inner: Arc::new(Mutex::new(HashMap::new())),
            events,
        }
    }

    /// Attach `handler` to `target` for `event`, tracked under `category`.
    ///
    /// If an entry already exists for the computed key it is unregistered
    /// first (idempotent re-registration — the new handler wins).  Returns
    /// the key for later targeted removal, or `None` (logged) when the target
    /// refuses the attachment.
    pub fn register(
        &self,
        target: Arc<dyn EventTarget>,
        event: &str,
        handler: Handler,
        category: Category,
        options: ListenOptions,
    ) -> Option<ListenerKey> {
        let key = ListenerKey::new(&category, &target.identity(), event);

        // Evict a previous registration under the same key.
        if self.inner.lock().unwrap().contains_key(&key) {
            self.unregister(&key);
        }

        let attachment = match target.attach(event, handler, options) {
            Ok(id) => id,
            Err(e) => {
                warn!("listener registration failed for '{}': {}", key, e);
                return None;
            }
        };

        self.inner.lock().unwrap().insert(
            key.clone(),
            ManagedListener {
                target,
                attachment,
                options,
            },
        );
        Some(key)
    }

    /// Detach and forget the listener under `key`.
    ///
    /// Unknown keys return `false`.  Detach failures are logged and counted
    /// as `false`, never propagated; the entry is dropped either way so the
    /// registry cannot wedge on a broken target.
    pub fn unregister(&self, key: &ListenerKey) -> bool {
        let entry = self.inner.lock().unwrap().remove(key);
        match entry {
            Some(listener) => match listener.target.detach(listener.attachment) {
                Ok(()) => true,
                Err(e) => {
                    warn!("listener detach failed for '{}': {}", key, e);
                    false
                }
            },
            None => false,
        }
    }

    /// Detach and remove every tracked entry; returns the number of
    /// successful removals.
    pub fn clear_all(&self) -> usize {
        let removed = self.clear_where(|_| true);
        self.emit_cleared(None, removed);
        removed
    }

    /// Detach and remove every entry in `category`; returns the number of
    /// successful removals.
    pub fn clear_category(&self, category: &Category) -> usize {
        let removed = self.clear_where(|key| key.category == *category);
        self.emit_cleared(Some(category.as_str().to_string()), removed);
        removed
    }

    fn clear_where(&self, predicate: impl Fn(&ListenerKey) -> bool) -> usize {
        let keys: Vec<ListenerKey> = {
            let table = self.inner.lock().unwrap();
            table.keys().filter(|k| predicate(k)).cloned().collect()
        };
        keys.iter().filter(|k| self.unregister(k)).count()
    }

    fn emit_cleared(&self, category: Option<String>, removed: usize) {
        let mut evt = DashEvent::new(EventKind::LISTENERS_CLEARED);
        evt.cleared = Some(ClearedMeta { category, removed });
        self.events.emit(evt);
    }

    /// Read-only diagnostic aggregation; no side effects.
    pub fn info(&self) -> ListenerInfo {
        let table = self.inner.lock().unwrap();
        let mut info = ListenerInfo {
            total: table.len(),
            ..Default::default()
        };
        for key in table.keys() {
            *info
                .by_category
                .entry(key.category.as_str().to_string())
                .or_insert(0) += 1;
            *info.by_target.entry(key.target.clone()).or_insert(0) += 1;
            *info.by_event.entry(key.event.clone()).or_insert(0) += 1;
        }
        info
    }

    /// Options recorded for `key`, if registered (diagnostic).
    pub fn options_of(&self, key: &ListenerKey) -> Option<ListenOptions> {
        self.inner.lock().unwrap().get(key).map(|l| l.options)
    }

    /// Scoped registration: listeners registered through the returned guard
    /// belong to `category`, and dropping the guard clears the category.
    pub fn scope(&self, category: Category) -> ListenerScope {
        ListenerScope {
            registry: self.clone(),
            category,
        }
    }
}

/// RAII guard over a listener category; `Drop` clears the category, so
/// per-view listeners are released on view teardown without caller
/// discipline.
pub struct ListenerScope {
    registry: ListenerRegistry,
    category: Category,
}

impl ListenerScope {
    /// Register under this scope's category.
    pub fn register(
        &self,
        target: Arc<dyn EventTarget>,
        event: &str,
        handler: Handler,
        options: ListenOptions,
    ) -> Option<ListenerKey> {
        self.registry
            .register(target, event, handler, self.category.clone(), options)
    }

    pub fn category(&self) -> &Category {
        &self.category
    }
}

impl Drop for ListenerScope {
    fn drop(&mut self) {
        self.registry.clear_category(&self.category);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// LocalTarget – in-process event target
// ─────────────────────────────────────────────────────────────────────────────

struct LocalTargetInner {
    next_id: AttachmentId,
    attached: HashMap<AttachmentId, (String, Handler, ListenOptions)>,
}

/// An in-process [`EventTarget`] that dispatches events to whatever handlers
/// are attached.  Used by tests and by headless embeddings that have no DOM
/// bridge.
pub struct LocalTarget {
    identity: TargetIdentity,
    inner: Mutex<LocalTargetInner>,
    fail_detach: AtomicBool,
}

impl LocalTarget {
    pub fn new(identity: TargetIdentity) -> Arc<Self> {
        Arc::new(Self {
            identity,
            inner: Mutex::new(LocalTargetInner {
                next_id: 1,
                attached: HashMap::new(),
            }),
            fail_detach: AtomicBool::new(false),
        })
    }

    /// Target with an element id.
    pub fn with_id(id: impl Into<String>) -> Arc<Self> {
        Self::new(TargetIdentity::Id(id.into()))
    }

    /// Dispatch `payload` to every handler attached for `event`; returns the
    /// number of handlers invoked.  `once` handlers are removed after firing.
    pub fn dispatch(&self, event: &str, payload: &DashEvent) -> usize {
        let (handlers, once_ids): (Vec<Handler>, Vec<AttachmentId>) = {
            let inner = self.inner.lock().unwrap();
            let mut handlers = Vec::new();
            let mut once_ids = Vec::new();
            for (id, (ev, handler, options)) in inner.attached.iter() {
                if ev == event {
                    handlers.push(handler.clone());
                    if options.once {
                        once_ids.push(*id);
                    }
                }
            }
            (handlers, once_ids)
        };
        for handler in &handlers {
            handler(payload);
        }
        if !once_ids.is_empty() {
            let mut inner = self.inner.lock().unwrap();
            for id in once_ids {
                inner.attached.remove(&id);
            }
        }
        handlers.len()
    }

    /// Number of currently attached handlers.
    pub fn attached_count(&self) -> usize {
        self.inner.lock().unwrap().attached.len()
    }

    /// Make subsequent `detach` calls fail (exercises the registry's
    /// tolerance paths).
    pub fn set_fail_detach(&self, fail: bool) {
        self.fail_detach.store(fail, Ordering::SeqCst);
    }
}

impl EventTarget for LocalTarget {
    fn identity(&self) -> TargetIdentity {
        self.identity.clone()
    }

    fn attach(
        &self,
        event: &str,
        handler: Handler,
        options: ListenOptions,
    ) -> Result<AttachmentId, TargetError> {
        let mut inner = self.inner.lock().unwrap();
        let id = inner.next_id;
        inner.next_id += 1;
        inner
            .attached
            .insert(id, (event.to_string(), handler, options));
        Ok(id)
    }

    fn detach(&self, attachment: AttachmentId) -> Result<(), TargetError> {
        if self.fail_detach.load(Ordering::SeqCst) {
            return Err(TargetError("target detached from its backend".into()));
        }
        let mut inner = self.inner.lock().unwrap();
        match inner.attached.remove(&attachment) {
            Some(_) => Ok(()),
            None => Err(TargetError(format!("unknown attachment {attachment}"))),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Unit tests
// ─────────────────────────────────────────────────────────────────────────────
