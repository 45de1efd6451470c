// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Engine controller: owns the diversion handle, the buffer, and both
//! worker threads; drives the Idle ↔ Running lifecycle.
//!
//! Public methods may be called from any thread. A single controller mutex
//! serializes transitions; the hot-path fields (`delay_ms`, queue depth,
//! running flag) are separately atomic so observers never block a worker.

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;

use crate::buffer::DelayBuffer;
use crate::capture::{self, CaptureCtx};
use crate::clock::TimerResolution;
use crate::config::{self, Tunables};
use crate::divert::{DivertError, DivertOpener, SharedHandle};
use crate::events::{EngineEvent, EventHub};
use crate::release::{self, ReleaseCtx};

/// Failures surfaced by [`Engine::start`]. Everything else the engine has
/// to say arrives as events.
#[derive(Debug)]
pub enum EngineError {
    /// Start was called while the engine was already running.
    AlreadyRunning,
    /// The diversion handle could not be opened.
    Open(DivertError),
    /// A worker thread could not be spawned.
    Spawn(std::io::Error),
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyRunning => f.write_str("engine is already running"),
            Self::Open(err) => write!(f, "could not open packet diversion: {err}"),
            Self::Spawn(err) => write!(f, "could not spawn worker thread: {err}"),
        }
    }
}

impl std::error::Error for EngineError {}

/// A running worker thread plus the channel that signals its exit.
///
/// The sender half lives inside the worker closure; it is dropped when the
/// worker returns (or unwinds), which fails `done.recv_timeout` out with
/// `Disconnected`. That gives a bounded join without thread interruption.
struct Worker {
    thread: thread::JoinHandle<()>,
    done: mpsc::Receiver<()>,
}

impl Worker {
    fn spawn(
        name: &str,
        fatal_report: &'static str,
        events: Arc<EventHub>,
        body: impl FnOnce() + Send + 'static,
    ) -> Result<Self, EngineError> {
        let (done_tx, done) = mpsc::channel::<()>();
        let thread = thread::Builder::new()
            .name(name.to_owned())
            .spawn(move || {
                let _exit_signal = done_tx;
                if catch_unwind(AssertUnwindSafe(body)).is_err() {
                    events.error(fatal_report.to_owned());
                }
            })
            .map_err(EngineError::Spawn)?;
        Ok(Self { thread, done })
    }

    /// Wait up to `timeout` for the worker to finish. Hands the worker back
    /// if it is still running.
    fn join_within(self, timeout: Duration) -> Result<(), Self> {
        match self.done.recv_timeout(timeout) {
            Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => {
                let _ = self.thread.join();
                Ok(())
            }
            Err(mpsc::RecvTimeoutError::Timeout) => Err(self),
        }
    }
}

#[derive(Default)]
struct Inner {
    handle: Option<SharedHandle>,
    capture: Option<Worker>,
    release: Option<Worker>,
    resolution: Option<TimerResolution>,
}

/// The packet delay engine.
pub struct Engine {
    opener: DivertOpener,
    tunables: Tunables,
    inner: Mutex<Inner>,
    running: Arc<AtomicBool>,
    delay_ms: Arc<AtomicU64>,
    buffer: Arc<DelayBuffer>,
    events: Arc<EventHub>,
}

impl Engine {
    /// Engine with default [`Tunables`], opening handles through `opener`.
    pub fn new(opener: DivertOpener) -> Self {
        Self::with_tunables(opener, Tunables::default())
    }

    pub fn with_tunables(opener: DivertOpener, tunables: Tunables) -> Self {
        Self {
            opener,
            tunables,
            inner: Mutex::new(Inner::default()),
            running: Arc::new(AtomicBool::new(false)),
            delay_ms: Arc::new(AtomicU64::new(0)),
            buffer: Arc::new(DelayBuffer::new()),
            events: Arc::new(EventHub::new()),
        }
    }

    /// Engine backed by the WinDivert driver, capturing `filter` at the
    /// network layer.
    #[cfg(windows)]
    pub fn windivert(filter: impl Into<String>) -> Self {
        let filter = filter.into();
        Self::new(Box::new(move || {
            crate::divert::windivert::open(&filter).map(|handle| handle as SharedHandle)
        }))
    }

    /// Register an event callback. Callbacks run on worker and controller
    /// threads; hosts marshal to their own thread as needed.
    pub fn on_event(&self, subscriber: impl Fn(&EngineEvent) + Send + Sync + 'static) {
        self.events.subscribe(subscriber);
    }

    /// Start capturing and delaying traffic.
    ///
    /// `delay_ms` is the exact per-packet hold time, clamped to
    /// [`config::MAX_DELAY_MS`]. Fails with [`EngineError::AlreadyRunning`]
    /// unless the engine is idle, or [`EngineError::Open`] when the
    /// diversion handle cannot be opened (also reported as an error event
    /// with privilege guidance).
    pub fn start(&self, delay_ms: u64) -> Result<(), EngineError> {
        let mut inner = self.inner.lock();
        if inner.handle.is_some() {
            return Err(EngineError::AlreadyRunning);
        }

        let delay_ms = config::clamp_delay(delay_ms);
        self.delay_ms.store(delay_ms, Ordering::Relaxed);

        let resolution = TimerResolution::acquire();
        let handle = match (self.opener)() {
            Ok(handle) => handle,
            Err(err) => {
                self.events.error(format!(
                    "could not open packet diversion ({err}); \
                     run as administrator and check that the driver is installed"
                ));
                drop(resolution);
                return Err(EngineError::Open(err));
            }
        };

        self.running.store(true, Ordering::Release);
        self.buffer.clear();

        let capture = Worker::spawn(
            "delayline-capture",
            "capture thread fatal",
            Arc::clone(&self.events),
            {
                let ctx = CaptureCtx {
                    handle: Arc::clone(&handle),
                    buffer: Arc::clone(&self.buffer),
                    running: Arc::clone(&self.running),
                    delay_ms: Arc::clone(&self.delay_ms),
                    events: Arc::clone(&self.events),
                };
                move || capture::run(ctx)
            },
        );
        let capture = match capture {
            Ok(worker) => worker,
            Err(err) => {
                self.unwind_failed_start(&handle, None);
                return Err(err);
            }
        };

        let release = Worker::spawn(
            "delayline-release",
            "release thread fatal",
            Arc::clone(&self.events),
            {
                let ctx = ReleaseCtx {
                    handle: Arc::clone(&handle),
                    buffer: Arc::clone(&self.buffer),
                    running: Arc::clone(&self.running),
                    events: Arc::clone(&self.events),
                    report_limit: self.tunables.send_error_report_limit,
                };
                move || release::run(ctx)
            },
        );
        let release = match release {
            Ok(worker) => worker,
            Err(err) => {
                self.unwind_failed_start(&handle, Some(capture));
                return Err(err);
            }
        };

        inner.handle = Some(handle);
        inner.capture = Some(capture);
        inner.release = Some(release);
        inner.resolution = Some(resolution);
        drop(inner);

        self.events.status(format!("Engine started with {delay_ms}ms delay."));
        Ok(())
    }

    /// Stop the engine and release every resource.
    ///
    /// Synchronous: returns once both workers are joined (or detached after
    /// the timeout discipline), the handle is closed, the buffer is empty,
    /// and the timer resolution is restored. A no-op when idle.
    pub fn stop(&self) {
        let mut inner = self.inner.lock();
        let Some(handle) = inner.handle.take() else {
            return;
        };

        self.running.store(false, Ordering::Release);
        // The handle shutdown is what unblocks the capture worker's recv.
        handle.shutdown();

        if let Some(worker) = inner.capture.take() {
            self.join_worker(worker, &handle, "capture");
        }
        if let Some(worker) = inner.release.take() {
            self.join_worker(worker, &handle, "release");
        }

        // Residual driver completions may still reference the handle right
        // after the workers exit; let them settle before the close.
        if !self.tunables.drain_window.is_zero() {
            thread::sleep(self.tunables.drain_window);
        }
        drop(handle);

        self.buffer.clear();
        inner.resolution = None;
        drop(inner);

        self.events.status("Engine stopped.");
    }

    /// Change the hold time for packets captured from now on.
    ///
    /// Packets already queued keep their original deadlines. The value is
    /// clamped to [`config::MAX_DELAY_MS`].
    pub fn update_delay(&self, delay_ms: u64) {
        let delay_ms = config::clamp_delay(delay_ms);
        self.delay_ms.store(delay_ms, Ordering::Relaxed);
        self.events.status(format!("Delay updated to {delay_ms}ms."));
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Hold time applied to packets captured now, in milliseconds.
    pub fn current_delay(&self) -> u64 {
        self.delay_ms.load(Ordering::Relaxed)
    }

    /// Packets currently waiting in the buffer.
    pub fn queued_packets(&self) -> usize {
        self.buffer.len()
    }

    fn join_worker(&self, worker: Worker, handle: &SharedHandle, name: &str) {
        let Err(worker) = worker.join_within(self.tunables.join_timeout) else {
            return;
        };
        tracing::warn!(worker = name, "worker still running; shutting the handle down again");
        handle.shutdown();
        if worker.join_within(self.tunables.join_retry_timeout).is_err() {
            // Detached worker keeps its own Arc to the handle, so it can
            // never race the close below.
            self.events.error(format!("{name} worker did not stop in time"));
        }
    }

    fn unwind_failed_start(&self, handle: &SharedHandle, capture: Option<Worker>) {
        self.running.store(false, Ordering::Release);
        handle.shutdown();
        if let Some(worker) = capture {
            self.join_worker(worker, handle, "capture");
        }
        self.buffer.clear();
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        // Disposal gates event delivery first so teardown stays silent.
        self.events.dispose();
        self.stop();
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("running", &self.is_running())
            .field("delay_ms", &self.current_delay())
            .field("queued", &self.queued_packets())
            .finish()
    }
}

#[cfg(test)]
#[path = "engine_tests.rs"]
mod tests;
