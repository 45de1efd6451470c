// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Test harness for end-to-end engine scenarios.
//!
//! Runs the real engine against the in-memory diversion handle, with an
//! event recorder and polling helpers shared by the scenario tests.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use delayline::clock::{self, Tick};
use delayline::divert::memory::MemoryDivert;
use delayline::{Engine, EngineEvent, Tunables};

/// Everything a scenario needs: the engine, the handle feeding it, and the
/// events it emitted.
pub struct Rig {
    pub engine: Engine,
    pub divert: Arc<MemoryDivert>,
    events: Arc<Mutex<Vec<EngineEvent>>>,
}

impl Rig {
    /// Engine wired to a fresh in-memory handle with test-speed tunables.
    pub fn new() -> Self {
        let divert = MemoryDivert::new();
        let engine = Engine::with_tunables(divert.opener(), Tunables::fast());
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        engine.on_event(move |event| sink.lock().push(event.clone()));
        Self { engine, divert, events }
    }

    /// Snapshot of every event emitted so far, in order.
    pub fn events(&self) -> Vec<EngineEvent> {
        self.events.lock().clone()
    }

    pub fn status_texts(&self) -> Vec<String> {
        self.events()
            .iter()
            .filter(|e| !e.is_error())
            .map(|e| e.text().to_owned())
            .collect()
    }

    pub fn error_texts(&self) -> Vec<String> {
        self.events()
            .iter()
            .filter(|e| e.is_error())
            .map(|e| e.text().to_owned())
            .collect()
    }

    /// Inject a tagged packet and return its capture tick.
    pub fn inject(&self, tag: u64) -> Tick {
        let at = clock::now();
        self.divert.inject(vec![tag as u8], tag);
        at
    }
}

impl Default for Rig {
    fn default() -> Self {
        Self::new()
    }
}

/// Poll `check` until it holds or `timeout` passes.
pub fn wait_until(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if check() {
            return true;
        }
        std::thread::sleep(Duration::from_micros(200));
    }
    check()
}

/// Milliseconds between two ticks.
pub fn elapsed_ms(from: Tick, to: Tick) -> f64 {
    clock::ticks_to_ms(to - from)
}
