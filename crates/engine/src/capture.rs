// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Capture worker: blocks on the diversion handle, timestamps each packet,
//! and hands it to the buffer.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use crate::buffer::{DelayBuffer, DelayedPacket};
use crate::clock;
use crate::divert::SharedHandle;
use crate::events::EventHub;

pub(crate) struct CaptureCtx {
    pub handle: SharedHandle,
    pub buffer: Arc<DelayBuffer>,
    pub running: Arc<AtomicBool>,
    pub delay_ms: Arc<AtomicU64>,
    pub events: Arc<EventHub>,
}

/// Loop until the handle is shut down or a receive fails.
///
/// A receive error after `running` went false is the expected cancellation
/// path and exits silently; a failure while running is reported once and
/// also ends the loop. The controller does not auto-restart.
pub(crate) fn run(ctx: CaptureCtx) {
    clock::raise_thread_priority();

    while ctx.running.load(Ordering::Acquire) {
        let packet = match ctx.handle.recv() {
            Ok(packet) => packet,
            Err(err) if err.is_shutdown() => break,
            Err(err) => {
                if ctx.running.load(Ordering::Acquire) {
                    ctx.events.error(format!("capture error: {err}"));
                }
                break;
            }
        };

        if packet.payload.is_empty() {
            continue;
        }

        let delay_ms = ctx.delay_ms.load(Ordering::Relaxed);
        if delay_ms == 0 {
            // Fast path: re-inject without touching the buffer. A send
            // failure here races handle shutdown; drop the packet quietly.
            if let Err(err) = ctx.handle.send(&packet.payload, &packet.addr) {
                tracing::debug!(err = %err, "fast-path send dropped a packet");
            }
            continue;
        }

        let release_at = clock::now() + clock::ms_to_ticks(delay_ms as f64);
        ctx.buffer.enqueue(DelayedPacket {
            payload: packet.payload,
            addr: packet.addr,
            release_at,
        });
    }

    tracing::debug!("capture worker exited");
}

#[cfg(test)]
#[path = "capture_tests.rs"]
mod tests;
