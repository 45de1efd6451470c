// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Engine event types and the subscriber hub.
//!
//! Subscribers are invoked synchronously from worker or controller context;
//! a subscriber that needs its own thread (a UI) must marshal the event
//! itself. Delivery stops permanently once the hub is disposed, so nothing
//! fires into an observer that is tearing down.

use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Events published by the engine to its host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EngineEvent {
    /// Lifecycle status suitable for direct display.
    Status { text: String },
    /// Error report suitable for direct display.
    Error { text: String },
}

impl EngineEvent {
    pub fn text(&self) -> &str {
        match self {
            Self::Status { text } | Self::Error { text } => text,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }
}

type Subscriber = Box<dyn Fn(&EngineEvent) + Send + Sync>;

/// Fan-out hub for [`EngineEvent`]s.
#[derive(Default)]
pub struct EventHub {
    subscribers: RwLock<Vec<Subscriber>>,
    disposed: AtomicBool,
}

impl EventHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback for every subsequent event.
    pub fn subscribe(&self, subscriber: impl Fn(&EngineEvent) + Send + Sync + 'static) {
        self.subscribers.write().push(Box::new(subscriber));
    }

    /// Permanently stop delivery. Events emitted afterwards are dropped.
    pub fn dispose(&self) {
        self.disposed.store(true, Ordering::Release);
    }

    pub(crate) fn status(&self, text: impl Into<String>) {
        self.emit(EngineEvent::Status { text: text.into() });
    }

    pub(crate) fn error(&self, text: impl Into<String>) {
        self.emit(EngineEvent::Error { text: text.into() });
    }

    fn emit(&self, event: EngineEvent) {
        if self.disposed.load(Ordering::Acquire) {
            return;
        }
        for subscriber in self.subscribers.read().iter() {
            subscriber(&event);
        }
    }
}

impl std::fmt::Debug for EventHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventHub")
            .field("subscribers", &self.subscribers.read().len())
            .field("disposed", &self.disposed.load(Ordering::Relaxed))
            .finish()
    }
}

#[cfg(test)]
#[path = "events_tests.rs"]
mod tests;
