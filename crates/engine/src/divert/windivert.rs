// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! WinDivert-backed diversion handle.
//!
//! One kernel handle serves both directions; the driver supports
//! concurrent `recv` and `send` on it, and `WinDivertShutdown` is the
//! cancellation mechanism that fails a blocked `recv` out.

use std::ffi::CString;
use std::io;
use std::sync::Arc;

use bytes::Bytes;
use windivert_sys as wd;

use super::{CapturedPacket, DivertAddress, DivertError, DivertHandle};

/// WinDivert's maximum packet size (MTU plus the largest header stack).
const RECV_BUF_LEN: usize = 65_575;

const ERROR_ACCESS_DENIED: i32 = 5;
const ERROR_NO_DATA: i32 = 232;
const ERROR_OPERATION_ABORTED: i32 = 995;

/// Open a handle capturing `filter` at the network layer, priority 0,
/// no flags.
#[allow(unsafe_code)]
pub fn open(filter: &str) -> Result<Arc<DriverDivert>, DivertError> {
    let filter_c =
        CString::new(filter).map_err(|_| DivertError::Open("filter contains NUL".into()))?;

    // SAFETY: filter_c is NUL-terminated and outlives the call; WinDivertOpen
    // reports failure through the returned handle, checked below.
    let handle = unsafe {
        wd::WinDivertOpen(
            filter_c.as_ptr(),
            wd::WinDivertLayer::Network,
            0,
            wd::WinDivertFlags::new(),
        )
    };
    if is_invalid(handle) {
        let err = io::Error::last_os_error();
        let detail = match err.raw_os_error() {
            Some(ERROR_ACCESS_DENIED) => "access denied".to_owned(),
            _ => err.to_string(),
        };
        return Err(DivertError::Open(detail));
    }

    Ok(Arc::new(DriverDivert { handle }))
}

// WinDivertOpen reports failure with INVALID_HANDLE_VALUE, not NULL.
fn is_invalid(handle: wd::HANDLE) -> bool {
    let raw = handle as isize;
    raw == 0 || raw == -1
}

/// A live WinDivert handle. Closed on drop.
pub struct DriverDivert {
    handle: wd::HANDLE,
}

// SAFETY: the field is an owning reference to a kernel object, not a pointer
// into process memory; the driver documents recv, send, and shutdown as safe
// to call from different threads concurrently.
#[allow(unsafe_code)]
unsafe impl Send for DriverDivert {}
// SAFETY: as above; every method takes `&self` and the kernel serializes
// access to the underlying object.
#[allow(unsafe_code)]
unsafe impl Sync for DriverDivert {}

impl DivertHandle for DriverDivert {
    #[allow(unsafe_code)]
    fn recv(&self) -> Result<CapturedPacket, DivertError> {
        let mut buf = vec![0u8; RECV_BUF_LEN];
        // SAFETY: WINDIVERT_ADDRESS is a plain C struct the driver fills in;
        // all-zero bytes are a valid initial value.
        let mut addr: wd::WINDIVERT_ADDRESS = unsafe { std::mem::zeroed() };
        let mut len: u32 = 0;

        // SAFETY: the handle stays open until drop; buf, len, and addr are
        // live for the whole call and the buffer length passed matches the
        // allocation.
        let ok = unsafe {
            wd::WinDivertRecv(
                self.handle,
                buf.as_mut_ptr().cast(),
                buf.len() as u32,
                &mut len,
                &mut addr,
            )
        };
        if ok == 0 {
            let err = io::Error::last_os_error();
            return match err.raw_os_error() {
                Some(ERROR_NO_DATA) | Some(ERROR_OPERATION_ABORTED) => Err(DivertError::Shutdown),
                _ => Err(DivertError::Recv(err.to_string())),
            };
        }

        buf.truncate(len as usize);
        Ok(CapturedPacket { payload: Bytes::from(buf), addr: DivertAddress::driver(addr) })
    }

    #[allow(unsafe_code)]
    fn send(&self, payload: &[u8], addr: &DivertAddress) -> Result<(), DivertError> {
        let Some(addr) = addr.as_driver() else {
            return Err(DivertError::Send("address not captured by this handle".into()));
        };

        let mut written: u32 = 0;
        // SAFETY: the handle stays open until drop; payload and addr are
        // borrows live for the whole call and the length passed matches the
        // payload slice.
        let ok = unsafe {
            wd::WinDivertSend(
                self.handle,
                payload.as_ptr().cast(),
                payload.len() as u32,
                &mut written,
                addr,
            )
        };
        if ok == 0 {
            let err = io::Error::last_os_error();
            return match err.raw_os_error() {
                Some(ERROR_NO_DATA) | Some(ERROR_OPERATION_ABORTED) => Err(DivertError::Shutdown),
                _ => Err(DivertError::Send(err.to_string())),
            };
        }
        Ok(())
    }

    #[allow(unsafe_code)]
    fn shutdown(&self) {
        // SAFETY: the handle stays open until drop; the driver allows
        // shutdown concurrently with a blocked recv on the same handle,
        // which is exactly how the engine cancels its capture worker.
        let _ = unsafe { wd::WinDivertShutdown(self.handle, wd::WinDivertShutdownMode::Both) };
    }
}

impl Drop for DriverDivert {
    #[allow(unsafe_code)]
    fn drop(&mut self) {
        // SAFETY: drop has exclusive access and the handle has not been
        // closed before; this is the only close call.
        let _ = unsafe { wd::WinDivertClose(self.handle) };
    }
}
