//! Section navigation: fragment normalization, the section switch itself and
//! per-view listener lifecycles.
//!
//! A section change is a small transaction: tear down the old view's listener
//! category, write `currentSection` through the state store, emit
//! `SECTION_CHANGED` with the from/to pair, then hand the new section to the
//! renderer callback.  Navigating to the current section is a no-op.

use std::sync::Arc;

use crate::events::{DashEvent, EventController, EventKind, SectionMeta};
use crate::listeners::{
    Category, EventTarget, Handler, ListenOptions, ListenerKey, ListenerRegistry, ListenerScope,
};
use crate::state::{StateKey, StateStore, StateValue};

/// Callback rendering a section after navigation.
pub type Renderer = Arc<dyn Fn(&str) + Send + Sync>;

/// Normalize a location fragment into a section name: leading `#` stripped,
/// empty input falls back to the default section.
pub fn normalize_fragment(fragment: &str) -> String {
    let section = fragment.trim().trim_start_matches('#');
    if section.is_empty() {
        "dashboard".to_string()
    } else {
        section.to_string()
    }
}

/// Category holding the listeners of one view, torn down when that view is
/// navigated away from.
pub fn view_category(section: &str) -> Category {
    Category::new(format!("view:{}", section))
}

/// Controller for section navigation.  Clones share state.
#[derive(Clone)]
pub struct NavController {
    state: StateStore,
    listeners: ListenerRegistry,
    events: EventController,
    renderer: Renderer,
}

impl NavController {
    pub fn new(state: StateStore, listeners: ListenerRegistry, renderer: Renderer) -> Self {
        let events = state.events().clone();
        Self {
            state,
            listeners,
            events,
            renderer,
        }
    }

    /// Controller without a renderer, for embeddings that repaint on the
    /// `SECTION_CHANGED` event instead.
    pub fn headless(state: StateStore, listeners: ListenerRegistry) -> Self {
        Self::new(state, listeners, Arc::new(|_| {}))
    }

    /// The section currently shown.
    pub fn current_section(&self) -> String {
        match self.state.get(StateKey::CurrentSection) {
            StateValue::Text(s) => s,
            _ => String::new(),
        }
    }

    /// Navigate to the section named by `fragment`.
    ///
    /// Returns `false` without side effects when the normalized section is
    /// already current.  Otherwise clears the old view's listener category,
    /// updates the store, emits `SECTION_CHANGED {from, to}` and invokes the
    /// renderer with the new section.
    pub fn navigate(&self, fragment: &str) -> bool {
        let to = normalize_fragment(fragment);
        let from = self.current_section();
        if to == from {
            return false;
        }

        self.listeners.clear_category(&view_category(&from));
        self.state
            .set(StateKey::CurrentSection, StateValue::Text(to.clone()));

        let mut evt = DashEvent::new(EventKind::SECTION_CHANGED);
        evt.section = Some(SectionMeta {
            from: Some(from),
            to: to.clone(),
        });
        self.events.emit(evt);

        (self.renderer)(&to);
        true
    }

    /// Wire a click on `target` to navigate to `section`.  The listener lives
    /// in the `nav` category (session lifetime, not per-view).
    pub fn wire_link(&self, target: Arc<dyn EventTarget>, section: &str) -> Option<ListenerKey> {
        let nav = self.clone();
        let section = section.to_string();
        let handler: Handler = Arc::new(move |_| {
            nav.navigate(&section);
        });
        self.listeners.register(
            target,
            "click",
            handler,
            Category::new("nav"),
            ListenOptions::default(),
        )
    }

    /// Scope for registering the current view's own listeners; dropping it
    /// (or navigating away) releases them.
    pub fn view_scope(&self, section: &str) -> ListenerScope {
        self.listeners.scope(view_category(section))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Unit tests
// ─────────────────────────────────────────────────────────────────────────────
