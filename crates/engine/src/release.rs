// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Release worker: re-injects packets as their deadlines pass, pacing
//! itself with the hybrid sleep.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::buffer::DelayBuffer;
use crate::clock;
use crate::divert::SharedHandle;
use crate::events::EventHub;

/// Poll step while the buffer is empty or the head deadline is far off.
const POLL_STEP: Duration = Duration::from_millis(1);

/// Head deadlines further out than this are re-peeked instead of slept
/// through; a delay update can queue a nearer deadline behind the head.
const REPEEK_THRESHOLD_MS: f64 = 2.0;

pub(crate) struct ReleaseCtx {
    pub handle: SharedHandle,
    pub buffer: Arc<DelayBuffer>,
    pub running: Arc<AtomicBool>,
    pub events: Arc<EventHub>,
    pub report_limit: u32,
}

/// Loop until `running` goes false.
///
/// Send failures never end the loop; the first `report_limit` in a row are
/// reported and the rest stay quiet until a send succeeds again. The packet
/// is released either way.
pub(crate) fn run(ctx: ReleaseCtx) {
    clock::raise_thread_priority();

    let mut consecutive_errors: u32 = 0;
    let mut sent: u64 = 0;

    while ctx.running.load(Ordering::Acquire) {
        let Some(release_at) = ctx.buffer.peek_release_at() else {
            thread::sleep(POLL_STEP);
            continue;
        };

        let delta_ms = clock::ticks_to_ms(release_at - clock::now());
        if delta_ms > REPEEK_THRESHOLD_MS {
            thread::sleep(POLL_STEP);
            continue;
        }
        if delta_ms > 0.0 {
            clock::precise_sleep(delta_ms);
            continue;
        }

        let Some(packet) = ctx.buffer.dequeue() else {
            continue;
        };
        match ctx.handle.send(&packet.payload, &packet.addr) {
            Ok(()) => {
                sent += 1;
                consecutive_errors = 0;
            }
            Err(err) => {
                consecutive_errors += 1;
                if !err.is_shutdown() && consecutive_errors <= ctx.report_limit {
                    ctx.events.error(format!("send error: {err}"));
                }
            }
        }
    }

    tracing::debug!(sent, "release worker exited");
}

#[cfg(test)]
#[path = "release_tests.rs"]
mod tests;
