// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Engine limits and shutdown tunables.

use std::time::Duration;

/// Hard cap on the per-packet hold time, in milliseconds.
pub const MAX_DELAY_MS: u64 = 1_000;

/// Clamp a requested hold time into the supported range.
pub fn clamp_delay(delay_ms: u64) -> u64 {
    delay_ms.min(MAX_DELAY_MS)
}

/// Timeouts and thresholds around engine shutdown and error reporting.
///
/// Defaults match production driver behavior; tests and demos shrink them
/// with [`Tunables::fast`].
#[derive(Debug, Clone)]
pub struct Tunables {
    /// First wait for a worker to exit during stop.
    pub join_timeout: Duration,
    /// Retry wait after the handle is shut down a second time.
    pub join_retry_timeout: Duration,
    /// Settle time for residual driver completions between worker join and
    /// handle close.
    pub drain_window: Duration,
    /// Consecutive send failures reported before going quiet; the run of
    /// failures resets on any successful send.
    pub send_error_report_limit: u32,
}

impl Default for Tunables {
    fn default() -> Self {
        Self {
            join_timeout: Duration::from_secs(5),
            join_retry_timeout: Duration::from_secs(2),
            drain_window: Duration::from_secs(2),
            send_error_report_limit: 3,
        }
    }
}

impl Tunables {
    /// Shortened timeouts for in-memory handles, which have no driver
    /// completions to drain.
    pub fn fast() -> Self {
        Self {
            join_timeout: Duration::from_millis(500),
            join_retry_timeout: Duration::from_millis(200),
            drain_window: Duration::ZERO,
            send_error_report_limit: 3,
        }
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
