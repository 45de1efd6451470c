// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! High-resolution timing: monotonic ticks, process-wide multimedia timer
//! resolution, and the hybrid sleep primitive that paces packet release.
//!
//! All scheduling arithmetic in the engine is done in [`Tick`]s;
//! milliseconds are an input/output unit only.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::OnceLock;
use std::time::{Duration, Instant};

/// Monotonic timestamp, strictly non-decreasing per process.
pub type Tick = i64;

/// Ticks per second.
pub const TICK_FREQUENCY: i64 = 1_000_000_000;

/// Worst-case coarse-sleep overshoot at 1 ms timer granularity. This is the
/// single tunable constant of [`precise_sleep`]: the coarse phase stops this
/// far short of the target and the spin phase covers the rest.
pub const SLEEP_SLACK_MS: f64 = 1.5;

#[cfg(windows)]
const TIMER_PERIOD_MS: u32 = 1;

fn epoch() -> Instant {
    static EPOCH: OnceLock<Instant> = OnceLock::new();
    *EPOCH.get_or_init(Instant::now)
}

/// Current monotonic tick.
pub fn now() -> Tick {
    epoch().elapsed().as_nanos() as Tick
}

/// Convert milliseconds to ticks, rounding to the nearest tick.
pub fn ms_to_ticks(ms: f64) -> Tick {
    (ms * (TICK_FREQUENCY as f64 / 1_000.0)).round() as Tick
}

/// Convert ticks to milliseconds.
pub fn ticks_to_ms(ticks: Tick) -> f64 {
    ticks as f64 * 1_000.0 / TICK_FREQUENCY as f64
}

// -- Timer resolution ---------------------------------------------------------

static RESOLUTION_REQUESTS: AtomicUsize = AtomicUsize::new(0);

/// Process-wide 1 ms timer-granularity request, reference counted.
///
/// The first live guard raises the OS timer resolution, the last one dropped
/// restores it. Engine start acquires a guard; stop releases it. Holding the
/// granularity raised after stop is a bug.
#[derive(Debug)]
pub struct TimerResolution(());

impl TimerResolution {
    pub fn acquire() -> Self {
        if RESOLUTION_REQUESTS.fetch_add(1, Ordering::SeqCst) == 0 {
            raise_os_resolution();
        }
        Self(())
    }

    #[cfg(test)]
    pub(crate) fn active_requests() -> usize {
        RESOLUTION_REQUESTS.load(Ordering::SeqCst)
    }
}

impl Drop for TimerResolution {
    fn drop(&mut self) {
        if RESOLUTION_REQUESTS.fetch_sub(1, Ordering::SeqCst) == 1 {
            lower_os_resolution();
        }
    }
}

#[cfg(windows)]
#[allow(unsafe_code)]
fn raise_os_resolution() {
    use windows::Win32::Media::{timeBeginPeriod, TIMERR_NOERROR};

    // SAFETY: timeBeginPeriod takes no pointers and accepts any period
    // value; failure comes back in the return code.
    let rc = unsafe { timeBeginPeriod(TIMER_PERIOD_MS) };
    if rc != TIMERR_NOERROR {
        tracing::warn!(rc, "timeBeginPeriod failed; sleep accuracy degraded");
    }
}

#[cfg(windows)]
#[allow(unsafe_code)]
fn lower_os_resolution() {
    use windows::Win32::Media::timeEndPeriod;

    // SAFETY: pairs the timeBeginPeriod call above with the same period;
    // the call only decrements a process-wide counter.
    let _ = unsafe { timeEndPeriod(TIMER_PERIOD_MS) };
}

#[cfg(not(windows))]
fn raise_os_resolution() {}

#[cfg(not(windows))]
fn lower_os_resolution() {}

// -- Sleep and scheduling -----------------------------------------------------

/// Sleep for `ms` milliseconds with sub-millisecond accuracy.
///
/// Hybrid discipline: coarse OS sleep until [`SLEEP_SLACK_MS`] short of the
/// target, then busy-wait with spin hints until the target tick. Coarse sleep
/// alone drifts by up to a full timer tick; pure spin burns a core.
pub fn precise_sleep(ms: f64) {
    if ms <= 0.0 {
        return;
    }
    let target = now() + ms_to_ticks(ms);
    if ms > 2.0 {
        std::thread::sleep(Duration::from_secs_f64((ms - SLEEP_SLACK_MS) / 1_000.0));
    }
    while now() < target {
        std::hint::spin_loop();
    }
}

/// Raise the calling thread to the highest process-relative priority.
///
/// Worker threads call this on entry; preemption while a packet is due shows
/// up directly as jitter.
#[cfg(windows)]
#[allow(unsafe_code)]
pub fn raise_thread_priority() {
    use windows::Win32::System::Threading::{
        GetCurrentThread, SetThreadPriority, THREAD_PRIORITY_HIGHEST,
    };

    // SAFETY: GetCurrentThread returns a pseudo-handle that is always valid
    // for the calling thread, so SetThreadPriority has no liveness
    // precondition to violate.
    let raised = unsafe { SetThreadPriority(GetCurrentThread(), THREAD_PRIORITY_HIGHEST) };
    if raised.is_err() {
        tracing::warn!("failed to raise thread priority");
    }
}

#[cfg(not(windows))]
pub fn raise_thread_priority() {}

#[cfg(test)]
#[path = "clock_tests.rs"]
mod tests;
