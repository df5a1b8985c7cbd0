// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Common type aliases used throughout the kernel

use std::time::{Duration, Instant};

/// Error code type (negative values indicate errors)
pub type Status = i32;

/// Result type for kernel operations
pub type Result<T = ()> = core::result::Result<T, Status>;

/// Kernel object identifier
pub type Koid = u64;

/// Invalid koid; also names the kernel itself as a channel owner
pub const KOID_INVALID: Koid = 0;

/// Transaction identifier carried in the first bytes of a message
pub type Txid = u32;

/// Common error values
pub mod err {
    use super::Status;

    pub const RX_OK: Status = 0;
    pub const RX_ERR_INTERNAL: Status = -1;
    pub const RX_ERR_NOT_SUPPORTED: Status = -2;
    pub const RX_ERR_NO_RESOURCES: Status = -3;
    pub const RX_ERR_NO_MEMORY: Status = -4;
    pub const RX_ERR_INTERNAL_INTR_RETRY: Status = -6;
    pub const RX_ERR_INVALID_ARGS: Status = -10;
    pub const RX_ERR_BAD_HANDLE: Status = -11;
    pub const RX_ERR_WRONG_TYPE: Status = -12;
    pub const RX_ERR_OUT_OF_RANGE: Status = -14;
    pub const RX_ERR_BUFFER_TOO_SMALL: Status = -15;
    pub const RX_ERR_BAD_STATE: Status = -20;
    pub const RX_ERR_TIMED_OUT: Status = -21;
    pub const RX_ERR_SHOULD_WAIT: Status = -22;
    pub const RX_ERR_CANCELED: Status = -23;
    pub const RX_ERR_PEER_CLOSED: Status = -24;
    pub const RX_ERR_NOT_BOUND: Status = -25;
    pub const RX_ERR_ACCESS_DENIED: Status = -30;
}

use err::*;

/// Get a printable name for a status code
pub const fn status_to_str(status: Status) -> &'static str {
    match status {
        RX_OK => "RX_OK",
        RX_ERR_INTERNAL => "RX_ERR_INTERNAL",
        RX_ERR_NOT_SUPPORTED => "RX_ERR_NOT_SUPPORTED",
        RX_ERR_NO_RESOURCES => "RX_ERR_NO_RESOURCES",
        RX_ERR_NO_MEMORY => "RX_ERR_NO_MEMORY",
        RX_ERR_INTERNAL_INTR_RETRY => "RX_ERR_INTERNAL_INTR_RETRY",
        RX_ERR_INVALID_ARGS => "RX_ERR_INVALID_ARGS",
        RX_ERR_BAD_HANDLE => "RX_ERR_BAD_HANDLE",
        RX_ERR_WRONG_TYPE => "RX_ERR_WRONG_TYPE",
        RX_ERR_OUT_OF_RANGE => "RX_ERR_OUT_OF_RANGE",
        RX_ERR_BUFFER_TOO_SMALL => "RX_ERR_BUFFER_TOO_SMALL",
        RX_ERR_BAD_STATE => "RX_ERR_BAD_STATE",
        RX_ERR_TIMED_OUT => "RX_ERR_TIMED_OUT",
        RX_ERR_SHOULD_WAIT => "RX_ERR_SHOULD_WAIT",
        RX_ERR_CANCELED => "RX_ERR_CANCELED",
        RX_ERR_PEER_CLOSED => "RX_ERR_PEER_CLOSED",
        RX_ERR_NOT_BOUND => "RX_ERR_NOT_BOUND",
        RX_ERR_ACCESS_DENIED => "RX_ERR_ACCESS_DENIED",
        _ => "(UNKNOWN)",
    }
}

/// ============================================================================
/// Deadline
/// ============================================================================

/// Absolute deadline for blocking operations
///
/// `None` means the wait never times out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline(Option<Instant>);

impl Deadline {
    /// A deadline that never expires
    pub const fn infinite() -> Self {
        Self(None)
    }

    /// A deadline at an absolute instant
    pub const fn at(when: Instant) -> Self {
        Self(Some(when))
    }

    /// A deadline `timeout` from now
    pub fn after(timeout: Duration) -> Self {
        // Durations too large to represent collapse to infinite.
        Self(Instant::now().checked_add(timeout))
    }

    /// Get the absolute instant, if any
    pub const fn when(&self) -> Option<Instant> {
        self.0
    }

    /// Check whether the deadline is infinite
    pub const fn is_infinite(&self) -> bool {
        self.0.is_none()
    }

    /// Check whether the deadline has already passed
    pub fn has_passed(&self) -> bool {
        match self.0 {
            Some(when) => Instant::now() >= when,
            None => false,
        }
    }
}

impl Default for Deadline {
    fn default() -> Self {
        Self::infinite()
    }
}
