// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The packet-diversion capability the engine consumes.
//!
//! The kernel driver binding lives in [`windivert`] (Windows only); the
//! [`memory`] implementation backs the test suite and non-Windows demos.
//! The engine itself only sees [`DivertHandle`] trait objects, opened
//! through a [`DivertOpener`] so each start gets a fresh handle.

pub mod memory;
#[cfg(windows)]
pub mod windivert;

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;

/// Opaque routing descriptor carried from capture to re-injection.
///
/// For driver-backed handles this wraps the kernel's address block; the
/// engine never inspects it.
#[derive(Default)]
pub struct DivertAddress(AddrRepr);

enum AddrRepr {
    /// Tag used by the in-memory handle; tests correlate injected and
    /// re-injected packets through it.
    Memory(u64),
    #[cfg(windows)]
    Driver(windivert_sys::WINDIVERT_ADDRESS),
}

impl Default for AddrRepr {
    fn default() -> Self {
        AddrRepr::Memory(0)
    }
}

impl DivertAddress {
    /// Address for the in-memory handle, tagged for test correlation.
    pub fn memory(tag: u64) -> Self {
        Self(AddrRepr::Memory(tag))
    }

    /// The in-memory tag, if this address came from the in-memory handle.
    pub fn memory_tag(&self) -> Option<u64> {
        match self.0 {
            AddrRepr::Memory(tag) => Some(tag),
            #[cfg(windows)]
            AddrRepr::Driver(_) => None,
        }
    }

    #[cfg(windows)]
    fn driver(addr: windivert_sys::WINDIVERT_ADDRESS) -> Self {
        Self(AddrRepr::Driver(addr))
    }

    #[cfg(windows)]
    fn as_driver(&self) -> Option<&windivert_sys::WINDIVERT_ADDRESS> {
        match &self.0 {
            AddrRepr::Driver(addr) => Some(addr),
            AddrRepr::Memory(_) => None,
        }
    }
}

impl fmt::Debug for DivertAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            AddrRepr::Memory(tag) => f.debug_tuple("Memory").field(&tag).finish(),
            #[cfg(windows)]
            AddrRepr::Driver(_) => f.write_str("Driver"),
        }
    }
}

/// One packet pulled off the wire: opaque payload plus routing descriptor.
#[derive(Debug, Default)]
pub struct CapturedPacket {
    pub payload: Bytes,
    pub addr: DivertAddress,
}

/// Failures surfaced by a diversion handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DivertError {
    /// Opening the handle failed: missing privileges, driver not installed,
    /// or the driver held by another process.
    Open(String),
    /// A receive failed while the handle was live.
    Recv(String),
    /// A re-injection failed.
    Send(String),
    /// The handle was shut down; blocking calls return this to unblock.
    /// This is the expected cancellation path, not a fault.
    Shutdown,
}

impl DivertError {
    pub fn is_shutdown(&self) -> bool {
        matches!(self, Self::Shutdown)
    }
}

impl fmt::Display for DivertError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Open(detail) => write!(f, "open failed: {detail}"),
            Self::Recv(detail) => write!(f, "receive failed: {detail}"),
            Self::Send(detail) => write!(f, "send failed: {detail}"),
            Self::Shutdown => f.write_str("handle shut down"),
        }
    }
}

impl std::error::Error for DivertError {}

/// A live packet-diversion handle.
///
/// `recv` blocks until a packet arrives or the handle is shut down;
/// `shutdown` is the only way to unblock it. Implementations must allow
/// `recv`, `send`, and `shutdown` from different threads concurrently.
pub trait DivertHandle: Send + Sync {
    /// Block until the next diverted packet.
    fn recv(&self) -> Result<CapturedPacket, DivertError>;

    /// Re-inject a packet toward its original route.
    fn send(&self, payload: &[u8], addr: &DivertAddress) -> Result<(), DivertError>;

    /// Stop both directions. Idempotent; errors are ignored.
    fn shutdown(&self);
}

/// Shared handle as owned by the controller and both workers.
pub type SharedHandle = Arc<dyn DivertHandle>;

/// Factory producing a fresh handle per engine start.
pub type DivertOpener = Box<dyn Fn() -> Result<SharedHandle, DivertError> + Send + Sync>;
