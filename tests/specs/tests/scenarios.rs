// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end engine scenarios against the in-memory diversion handle.
//!
//! Lower bounds on observed delays are exact (minus the sub-millisecond
//! release tolerance); upper bounds are deliberately loose because shared CI
//! machines stall coarse sleeps.

use std::time::{Duration, Instant};

use serial_test::serial;

use delayline_specs::{elapsed_ms, wait_until, Rig};

const SETTLE: Duration = Duration::from_secs(2);

/// Sub-millisecond tolerance on the release side of a deadline.
const EPSILON_MS: f64 = 0.5;

#[test]
#[serial]
fn quiet_start_stop() {
    let rig = Rig::new();
    rig.engine.start(100).expect("start");
    rig.engine.stop();

    assert!(rig.error_texts().is_empty());
    assert_eq!(
        rig.status_texts(),
        vec!["Engine started with 100ms delay.", "Engine stopped."]
    );
    assert_eq!(rig.engine.queued_packets(), 0);
}

#[test]
#[serial]
fn single_packet_is_held_for_the_delay() {
    let rig = Rig::new();
    rig.engine.start(50).expect("start");

    let captured_at = rig.inject(1);
    assert!(wait_until(SETTLE, || rig.divert.sent_len() == 1));

    let sent = rig.divert.sent();
    let held_ms = elapsed_ms(captured_at, sent[0].at);
    assert!(held_ms >= 50.0 - EPSILON_MS, "held {held_ms}ms, wanted at least 50ms");
    assert!(held_ms < 150.0, "held {held_ms}ms, wanted about 50ms");

    assert!(wait_until(SETTLE, || rig.engine.queued_packets() == 0));
    rig.engine.stop();
}

#[test]
#[serial]
fn capture_order_is_preserved() {
    let rig = Rig::new();
    rig.engine.start(100).expect("start");

    for tag in [1, 2, 3] {
        rig.inject(tag);
        std::thread::sleep(Duration::from_millis(2));
    }

    assert!(wait_until(SETTLE, || rig.divert.sent_len() == 3));
    let tags: Vec<u64> = rig.divert.sent().iter().map(|s| s.tag).collect();
    assert_eq!(tags, vec![1, 2, 3]);

    rig.engine.stop();
}

#[test]
#[serial]
fn packets_keep_their_deadline_across_delay_updates() {
    let rig = Rig::new();
    rig.engine.start(200).expect("start");

    let a_captured = rig.inject(1);
    std::thread::sleep(Duration::from_millis(50));
    rig.engine.update_delay(10);
    std::thread::sleep(Duration::from_millis(10));
    let b_captured = rig.inject(2);

    assert!(wait_until(SETTLE, || rig.divert.sent_len() == 2));
    let sent = rig.divert.sent();

    // B's shorter delay wins even though A was captured first.
    assert_eq!(sent[0].tag, 2);
    assert_eq!(sent[1].tag, 1);

    let b_held = elapsed_ms(b_captured, sent[0].at);
    assert!(b_held >= 10.0 - EPSILON_MS, "B held {b_held}ms, wanted at least 10ms");

    // A kept the deadline it was captured with.
    let a_held = elapsed_ms(a_captured, sent[1].at);
    assert!(a_held >= 200.0 - EPSILON_MS, "A held {a_held}ms, wanted at least 200ms");
    assert!(a_held < 300.0, "A held {a_held}ms, wanted about 200ms");

    rig.engine.stop();
}

#[test]
#[serial]
fn zero_delay_takes_the_fast_path() {
    let rig = Rig::new();
    rig.engine.start(0).expect("start");

    for tag in 0..100 {
        rig.inject(tag);
    }

    assert!(wait_until(SETTLE, || rig.divert.sent_len() == 100));
    assert_eq!(rig.engine.queued_packets(), 0);
    let tags: Vec<u64> = rig.divert.sent().iter().map(|s| s.tag).collect();
    assert_eq!(tags, (0..100).collect::<Vec<u64>>());

    rig.engine.stop();
}

#[test]
#[serial]
fn stop_with_a_backlog_drains_the_queue() {
    let rig = Rig::new();
    rig.engine.start(1_000).expect("start");

    for tag in 0..500 {
        rig.inject(tag);
    }
    assert!(wait_until(SETTLE, || rig.engine.queued_packets() == 500));

    let before = Instant::now();
    rig.engine.stop();
    // Well inside the 500 ms + 200 ms join budget of the test tunables.
    assert!(before.elapsed() < Duration::from_secs(2));

    assert_eq!(rig.engine.queued_packets(), 0);
    assert!(!rig.engine.is_running());
    // The backlog was cleared on stop, not injected late.
    assert_eq!(rig.divert.sent_len(), 0);
    assert_eq!(rig.divert.injected_len(), 500);
}

#[test]
#[serial]
fn capture_failure_reports_once_and_release_keeps_draining() {
    let rig = Rig::new();
    rig.engine.start(60).expect("start");

    rig.inject(1);
    assert!(wait_until(SETTLE, || rig.engine.queued_packets() == 1));

    // Kill the capture side; the queued packet must still go out.
    rig.divert.fail_next_recvs(1);
    rig.inject(2);

    assert!(wait_until(SETTLE, || rig.divert.sent_len() == 1));
    assert_eq!(rig.divert.sent()[0].tag, 1);

    let errors = rig.error_texts();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].contains("capture error"));

    rig.engine.stop();
}
