use vibradash::limits::AxisPatch;
use vibradash::{
    Band, EventController, EventFilter, EventKind, StateKey, StateStore, StateValue, StatsPatch,
};

fn store() -> StateStore {
    let _ = env_logger::builder().is_test(true).try_init();
    StateStore::new(EventController::new())
}

#[test]
fn selection_flow_notifies_subscribers_in_order() {
    let store = store();
    let rx = store
        .events()
        .subscribe(EventFilter::only(EventKind::STATE_CHANGED));

    store.set(StateKey::SelectedMachine, "1".into());
    store.set(StateKey::SelectedSensor, "1".into());
    store.set(StateKey::TimeRange, "7d".into());

    let keys: Vec<String> = rx
        .try_iter()
        .map(|e| e.state_change.unwrap().key)
        .collect();
    assert_eq!(keys, vec!["selectedMachine", "selectedSensor", "timeRange"]);
}

#[test]
fn filtered_subscriber_only_sees_its_kinds() {
    let store = store();
    let limits_rx = store
        .events()
        .subscribe(EventFilter::only(EventKind::LIMITS_UPDATED));

    store.set(StateKey::SelectedMachine, "2".into());
    store
        .update_stats(StatsPatch {
            z: Some(AxisPatch {
                sigma3: Some(Band::new(-5.0, 5.0)),
                sigma2: None,
            }),
            ..Default::default()
        })
        .unwrap();

    // Only the stats write reaches the limits subscriber.
    let events: Vec<_> = limits_rx.try_iter().collect();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].state_change.as_ref().unwrap().key, "stats");
}

#[test]
fn redundant_writes_do_not_renotify() {
    let store = store();
    let rx = store.events().subscribe_all();

    store.set(StateKey::TimeRange, "24h".into()); // equals the default
    store.set(StateKey::SelectedMachine, "3".into());
    store.set(StateKey::SelectedMachine, "3".into());

    assert_eq!(rx.try_iter().count(), 1);
}

#[test]
fn update_stats_that_changes_nothing_emits_nothing() {
    let store = store();
    let current = store.snapshot().stats;
    let rx = store.events().subscribe_all();

    let merged = store
        .update_stats(StatsPatch {
            x: Some(AxisPatch {
                sigma2: Some(current.x.sigma2),
                sigma3: None,
            }),
            ..Default::default()
        })
        .unwrap();

    assert_eq!(merged, current);
    assert_eq!(rx.try_iter().count(), 0);
}

#[test]
fn dropped_subscribers_are_pruned() {
    let _ = env_logger::builder().is_test(true).try_init();
    let events = EventController::new();
    let keep = events.subscribe_all();
    {
        let _drop_me = events.subscribe_all();
        assert_eq!(events.subscriber_count(), 2);
    }
    events.emit(vibradash::DashEvent::new(EventKind::SELECTION_CHANGED));
    assert_eq!(events.subscriber_count(), 1);
    assert_eq!(keep.try_iter().count(), 1);
}

#[test]
fn state_value_mismatch_leaves_state_intact() {
    let store = store();
    assert!(!store.set(StateKey::Stats, StateValue::Text("oops".into())));
    assert_eq!(store.snapshot().stats, Default::default());
}
