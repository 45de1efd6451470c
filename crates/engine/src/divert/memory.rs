// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-memory diversion handle.
//!
//! Behaves like the kernel driver from the engine's side: `recv` blocks
//! until a packet is injected, `shutdown` unblocks it with
//! [`DivertError::Shutdown`], and `send` records the re-injected packet.
//! The test suite injects traffic with [`MemoryDivert::inject`] and asserts
//! on the send log; non-Windows demos can run the whole engine against it.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::{Condvar, Mutex};

use crate::clock::{self, Tick};

use super::{CapturedPacket, DivertAddress, DivertError, DivertHandle, DivertOpener};

/// One re-injected packet as seen by the handle.
#[derive(Debug, Clone)]
pub struct SentRecord {
    pub payload: Bytes,
    /// Tag of the address the packet was captured with.
    pub tag: u64,
    /// Tick at which the send arrived.
    pub at: Tick,
}

#[derive(Default)]
struct Inbox {
    packets: VecDeque<CapturedPacket>,
}

/// Loopback diversion handle with packet injection and a send log.
#[derive(Default)]
pub struct MemoryDivert {
    inbox: Mutex<Inbox>,
    arrived: Condvar,
    shut_down: AtomicBool,
    sent: Mutex<Vec<SentRecord>>,
    injected: AtomicUsize,
    fail_next_recvs: AtomicUsize,
    fail_next_sends: AtomicUsize,
}

impl MemoryDivert {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Opener that hands the engine this handle, reopened, on every start.
    pub fn opener(self: &Arc<Self>) -> DivertOpener {
        let handle = Arc::clone(self);
        Box::new(move || {
            handle.reopen();
            Ok(Arc::clone(&handle) as super::SharedHandle)
        })
    }

    /// Clear shutdown state and drop any stale inbox traffic, as a freshly
    /// opened driver handle would present.
    pub fn reopen(&self) {
        self.inbox.lock().packets.clear();
        self.shut_down.store(false, Ordering::Release);
    }

    /// Queue a packet for the engine to capture.
    pub fn inject(&self, payload: impl Into<Bytes>, tag: u64) {
        self.injected.fetch_add(1, Ordering::Relaxed);
        let mut inbox = self.inbox.lock();
        inbox
            .packets
            .push_back(CapturedPacket { payload: payload.into(), addr: DivertAddress::memory(tag) });
        self.arrived.notify_one();
    }

    /// Fail the next `n` receives with [`DivertError::Recv`].
    pub fn fail_next_recvs(&self, n: usize) {
        self.fail_next_recvs.store(n, Ordering::Release);
    }

    /// Fail the next `n` sends with [`DivertError::Send`].
    pub fn fail_next_sends(&self, n: usize) {
        self.fail_next_sends.store(n, Ordering::Release);
    }

    /// Snapshot of everything re-injected so far, in send order.
    pub fn sent(&self) -> Vec<SentRecord> {
        self.sent.lock().clone()
    }

    pub fn sent_len(&self) -> usize {
        self.sent.lock().len()
    }

    /// Packets handed to `inject` over the handle's lifetime.
    pub fn injected_len(&self) -> usize {
        self.injected.load(Ordering::Relaxed)
    }
}

fn take_one(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
        .is_ok()
}

impl DivertHandle for MemoryDivert {
    fn recv(&self) -> Result<CapturedPacket, DivertError> {
        let mut inbox = self.inbox.lock();
        loop {
            if self.shut_down.load(Ordering::Acquire) {
                return Err(DivertError::Shutdown);
            }
            if take_one(&self.fail_next_recvs) {
                return Err(DivertError::Recv("injected receive failure".into()));
            }
            if let Some(packet) = inbox.packets.pop_front() {
                return Ok(packet);
            }
            self.arrived.wait(&mut inbox);
        }
    }

    fn send(&self, payload: &[u8], addr: &DivertAddress) -> Result<(), DivertError> {
        if self.shut_down.load(Ordering::Acquire) {
            return Err(DivertError::Shutdown);
        }
        if take_one(&self.fail_next_sends) {
            return Err(DivertError::Send("injected send failure".into()));
        }
        self.sent.lock().push(SentRecord {
            payload: Bytes::copy_from_slice(payload),
            tag: addr.memory_tag().unwrap_or_default(),
            at: clock::now(),
        });
        Ok(())
    }

    fn shutdown(&self) {
        self.shut_down.store(true, Ordering::Release);
        let _inbox = self.inbox.lock();
        self.arrived.notify_all();
    }
}

#[cfg(test)]
#[path = "memory_tests.rs"]
mod tests;
