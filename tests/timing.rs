use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use vibradash::{
    DebounceOptions, Debouncer, ManualClock, ThrottleOptions, Throttler, TimerRegistry, TimerToken,
};

fn registry() -> (TimerRegistry, Arc<ManualClock>) {
    let _ = env_logger::builder().is_test(true).try_init();
    let clock = ManualClock::new();
    (TimerRegistry::with_clock(clock.clone()), clock)
}

fn counter() -> (Arc<AtomicUsize>, impl Fn(u32) + Send + Sync + 'static) {
    let count = Arc::new(AtomicUsize::new(0));
    let c = count.clone();
    (count, move |_| {
        c.fetch_add(1, Ordering::SeqCst);
    })
}

#[test]
fn search_input_debounce_fires_once_with_last_text() {
    let (reg, clock) = registry();
    let seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let log = seen.clone();
    let search = Debouncer::new(
        &reg,
        TimerToken::new("search"),
        Duration::from_millis(300),
        DebounceOptions::default(),
        move |text: String| log.lock().unwrap().push(text),
    );

    // Simulated typing, each keystroke 100 ms apart.
    for text in ["b", "bo", "bom", "bomba"] {
        search.call(text.to_string());
        clock.advance(Duration::from_millis(100));
        reg.run_pending();
    }
    assert!(seen.lock().unwrap().is_empty());

    clock.advance(Duration::from_millis(300));
    reg.run_pending();
    assert_eq!(*seen.lock().unwrap(), vec!["bomba".to_string()]);
}

#[test]
fn debounce_max_wait_forces_execution_under_sustained_input() {
    let (reg, clock) = registry();
    let (count, cb) = counter();
    let deb = Debouncer::new(
        &reg,
        TimerToken::new("autosave"),
        Duration::from_millis(200),
        DebounceOptions {
            max_wait: Some(Duration::from_millis(500)),
            ..Default::default()
        },
        cb,
    );

    // Calls every 100 ms never let the trailing timer expire, but the
    // max-wait override still fires periodically (never on the first call).
    for _ in 0..16 {
        deb.call(0);
        clock.advance(Duration::from_millis(100));
        reg.run_pending();
    }
    assert_eq!(count.load(Ordering::SeqCst), 2);
}

#[test]
fn throttle_leading_caps_burst_rate() {
    let (reg, clock) = registry();
    let (count, cb) = counter();
    let scroll = Throttler::new(
        &reg,
        TimerToken::new("scroll"),
        Duration::from_millis(200),
        ThrottleOptions::default(),
        cb,
    );

    // 10 events 50 ms apart: leading fire, then one per open window.
    for _ in 0..10 {
        scroll.call(0);
        clock.advance(Duration::from_millis(50));
        reg.run_pending();
    }
    assert_eq!(count.load(Ordering::SeqCst), 3);
}

#[test]
fn throttle_trailing_coalesces_latest_args() {
    let (reg, clock) = registry();
    let seen: Arc<Mutex<Vec<u32>>> = Arc::new(Mutex::new(Vec::new()));
    let log = seen.clone();
    let resize = Throttler::new(
        &reg,
        TimerToken::new("resize"),
        Duration::from_millis(200),
        ThrottleOptions {
            leading: false,
            trailing: true,
            ..Default::default()
        },
        move |w: u32| log.lock().unwrap().push(w),
    );

    resize.call(800);
    resize.call(900);
    resize.call(1024);
    assert!(seen.lock().unwrap().is_empty());

    clock.advance(Duration::from_millis(200));
    reg.run_pending();
    assert_eq!(*seen.lock().unwrap(), vec![1024]);
}

#[test]
fn rate_gate_opens_once_per_interval() {
    let (reg, clock) = registry();
    let token = TimerToken::new("chart-redraw");

    assert!(reg.should_update(&token, "dashboard", Duration::from_secs(1), true));
    assert!(!reg.should_update(&token, "dashboard", Duration::from_secs(1), true));

    clock.advance(Duration::from_millis(999));
    assert!(!reg.should_update(&token, "dashboard", Duration::from_secs(1), true));
    clock.advance(Duration::from_millis(1));
    assert!(reg.should_update(&token, "dashboard", Duration::from_secs(1), true));
}

#[test]
fn rate_gate_peek_does_not_consume() {
    let (reg, clock) = registry();
    let token = TimerToken::new("chart-redraw");

    assert!(reg.should_update(&token, "dashboard", Duration::from_secs(1), true));
    clock.advance(Duration::from_secs(2));
    // Peeking twice with update_timestamp=false leaves the gate open.
    assert!(reg.should_update(&token, "dashboard", Duration::from_secs(1), false));
    assert!(reg.should_update(&token, "dashboard", Duration::from_secs(1), false));
    assert!(reg.should_update(&token, "dashboard", Duration::from_secs(1), true));
    assert!(!reg.should_update(&token, "dashboard", Duration::from_secs(1), true));
}

#[test]
fn context_cancellation_only_hits_matching_timers() {
    let (reg, clock) = registry();
    let (view_count, view_cb) = counter();
    let (global_count, global_cb) = counter();

    let view = Debouncer::new(
        &reg,
        TimerToken::new("filter"),
        Duration::from_millis(100),
        DebounceOptions {
            context: "machines-view".to_string(),
            ..Default::default()
        },
        view_cb,
    );
    let global = Debouncer::new(
        &reg,
        TimerToken::new("autosave"),
        Duration::from_millis(100),
        DebounceOptions::default(),
        global_cb,
    );

    view.call(0);
    global.call(0);
    let counts = reg.cancel_pending(Some("machines-view"));
    assert_eq!(counts.debounce, 1);
    assert_eq!(counts.total(), 1);

    clock.advance(Duration::from_millis(100));
    reg.run_pending();
    assert_eq!(view_count.load(Ordering::SeqCst), 0);
    assert_eq!(global_count.load(Ordering::SeqCst), 1);
}
