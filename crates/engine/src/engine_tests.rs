// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::time::Instant;

use serial_test::serial;

use super::*;
use crate::divert::memory::MemoryDivert;

struct Harness {
    engine: Engine,
    divert: Arc<MemoryDivert>,
    seen: Arc<parking_lot::Mutex<Vec<EngineEvent>>>,
}

fn harness() -> Harness {
    let divert = MemoryDivert::new();
    let engine = Engine::with_tunables(divert.opener(), Tunables::fast());
    let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    engine.on_event(move |event| sink.lock().push(event.clone()));
    Harness { engine, divert, seen }
}

fn wait_until(deadline_ms: u64, mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..deadline_ms * 10 {
        if check() {
            return true;
        }
        thread::sleep(Duration::from_micros(100));
    }
    check()
}

#[test]
#[serial]
fn start_stop_lifecycle() {
    let h = harness();
    assert!(!h.engine.is_running());

    h.engine.start(100).expect("start");
    assert!(h.engine.is_running());
    assert_eq!(h.engine.current_delay(), 100);

    h.engine.stop();
    assert!(!h.engine.is_running());
    assert_eq!(h.engine.queued_packets(), 0);
    assert_eq!(TimerResolution::active_requests(), 0);

    let texts: Vec<String> = h.seen.lock().iter().map(|e| e.text().to_owned()).collect();
    assert_eq!(texts, vec!["Engine started with 100ms delay.", "Engine stopped."]);
}

#[test]
fn stop_when_idle_is_silent() {
    let h = harness();
    h.engine.stop();
    assert!(h.seen.lock().is_empty());
}

#[test]
#[serial]
fn stop_is_idempotent() {
    let h = harness();
    h.engine.start(10).expect("start");
    h.engine.stop();
    h.engine.stop();

    let stops =
        h.seen.lock().iter().filter(|e| e.text() == "Engine stopped.").count();
    assert_eq!(stops, 1);
}

#[test]
#[serial]
fn nested_start_is_rejected() {
    let h = harness();
    h.engine.start(10).expect("start");
    assert!(matches!(h.engine.start(10), Err(EngineError::AlreadyRunning)));
    h.engine.stop();
}

#[test]
#[serial]
fn open_failure_reports_and_stays_idle() {
    let engine = Engine::with_tunables(
        Box::new(|| Err(DivertError::Open("access denied".into()))),
        Tunables::fast(),
    );
    let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    engine.on_event(move |event| sink.lock().push(event.clone()));

    assert!(matches!(engine.start(100), Err(EngineError::Open(_))));
    assert!(!engine.is_running());
    assert_eq!(TimerResolution::active_requests(), 0);

    let seen = seen.lock();
    assert_eq!(seen.len(), 1);
    assert!(seen[0].is_error());
    assert!(seen[0].text().contains("administrator"));
}

#[test]
fn update_delay_clamps_and_reports() {
    let h = harness();
    h.engine.update_delay(5_000);
    assert_eq!(h.engine.current_delay(), config::MAX_DELAY_MS);

    let texts: Vec<String> = h.seen.lock().iter().map(|e| e.text().to_owned()).collect();
    assert_eq!(texts, vec!["Delay updated to 1000ms."]);
}

#[test]
#[serial]
fn restart_behaves_like_a_fresh_start() {
    let h = harness();
    h.engine.start(50).expect("first start");
    h.engine.stop();
    h.engine.start(50).expect("second start");

    assert!(h.engine.is_running());
    assert_eq!(h.engine.queued_packets(), 0);

    h.divert.inject(vec![1], 1);
    assert!(wait_until(500, || h.engine.queued_packets() == 1));

    h.engine.stop();
    assert_eq!(h.engine.queued_packets(), 0);
}

#[test]
#[serial]
fn queue_depth_tracks_backlog_and_stop_clears_it() {
    let h = harness();
    h.engine.start(800).expect("start");

    for tag in 0..3 {
        h.divert.inject(vec![tag], tag as u64);
    }
    assert!(wait_until(500, || h.engine.queued_packets() == 3));

    let before = Instant::now();
    h.engine.stop();
    assert!(before.elapsed() < Duration::from_secs(2));
    assert_eq!(h.engine.queued_packets(), 0);
    // The backlog was cleared, not injected.
    assert_eq!(h.divert.sent_len(), 0);
}
