use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use vibradash::{
    Category, DashEvent, EventController, EventFilter, EventKind, Handler, ListenOptions,
    ListenerRegistry, LocalTarget, TargetIdentity,
};

fn registry(events: EventController) -> ListenerRegistry {
    let _ = env_logger::builder().is_test(true).try_init();
    ListenerRegistry::new(events)
}

fn counting() -> (Handler, Arc<AtomicUsize>) {
    let count = Arc::new(AtomicUsize::new(0));
    let c = count.clone();
    let handler: Handler = Arc::new(move |_| {
        c.fetch_add(1, Ordering::SeqCst);
    });
    (handler, count)
}

#[test]
fn global_and_view_categories_tear_down_independently() {
    let events = EventController::new();
    let reg = registry(events.clone());
    let window = LocalTarget::new(TargetIdentity::Window);
    let button = LocalTarget::with_id("export-btn");
    let (h, _) = counting();

    reg.register(
        window.clone(),
        "resize",
        h.clone(),
        Category::global(),
        ListenOptions::default(),
    );
    reg.register(
        button.clone(),
        "click",
        h,
        Category::new("view:dashboard"),
        ListenOptions::default(),
    );

    let cleared_rx = events.subscribe(EventFilter::only(EventKind::LISTENERS_CLEARED));
    assert_eq!(reg.clear_category(&Category::new("view:dashboard")), 1);
    assert_eq!(window.attached_count(), 1);
    assert_eq!(button.attached_count(), 0);

    let meta = cleared_rx.try_recv().unwrap().cleared.unwrap();
    assert_eq!(meta.category.as_deref(), Some("view:dashboard"));
    assert_eq!(meta.removed, 1);
}

#[test]
fn once_listener_survives_in_registry_bookkeeping() {
    // `once` is a dispatch property of the target; the registry entry stays
    // until it is unregistered or cleared.
    let reg = registry(EventController::new());
    let modal = LocalTarget::with_id("modal-backdrop");
    let (h, count) = counting();

    let key = reg
        .register(
            modal.clone(),
            "click",
            h,
            Category::new("forms"),
            ListenOptions {
                once: true,
                ..Default::default()
            },
        )
        .unwrap();

    modal.dispatch("click", &DashEvent::new(EventKind::SELECTION_CHANGED));
    modal.dispatch("click", &DashEvent::new(EventKind::SELECTION_CHANGED));
    assert_eq!(count.load(Ordering::SeqCst), 1);
    assert!(reg.options_of(&key).unwrap().once);
    assert_eq!(reg.info().total, 1);
}

#[test]
fn same_target_different_events_are_distinct_entries() {
    let reg = registry(EventController::new());
    let select = LocalTarget::with_id("machine-select");
    let (h1, c1) = counting();
    let (h2, c2) = counting();

    reg.register(
        select.clone(),
        "change",
        h1,
        Category::new("forms"),
        ListenOptions::default(),
    );
    reg.register(
        select.clone(),
        "focus",
        h2,
        Category::new("forms"),
        ListenOptions::default(),
    );

    assert_eq!(reg.info().total, 2);
    select.dispatch("change", &DashEvent::new(EventKind::SELECTION_CHANGED));
    assert_eq!(c1.load(Ordering::SeqCst), 1);
    assert_eq!(c2.load(Ordering::SeqCst), 0);
}
