// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Caller-Supplied Buffers
//!
//! Message payloads arrive from, and are delivered to, buffers owned by
//! the caller. These types stand in for raw user pointers: a pointer may
//! be null, and every copy is bounds-checked against the range the caller
//! actually supplied.
//!
//! # Design
//!
//! - **Null is representable**: `UserInPtr::null()` is a legal value and
//!   is rejected at copy time, not at construction
//! - **Range checked**: copies outside the supplied range fail with
//!   `RX_ERR_INVALID_ARGS` and copy nothing
//! - **No kernel dereference**: only the declared slice is ever touched

use crate::rustux::types::err::*;
use crate::rustux::types::Result;
use crate::log_trace;

/// ============================================================================
/// User Pointer Types
/// ============================================================================

/// Source range supplied by a caller
#[derive(Debug, Clone, Copy, Default)]
pub struct UserInPtr<'a> {
    data: Option<&'a [u8]>,
}

impl<'a> UserInPtr<'a> {
    /// A null source pointer
    pub const fn null() -> Self {
        Self { data: None }
    }

    /// Wrap a caller buffer
    pub const fn new(data: &'a [u8]) -> Self {
        Self { data: Some(data) }
    }

    /// Check if the pointer is null
    pub const fn is_null(&self) -> bool {
        self.data.is_none()
    }

    /// Number of bytes the caller supplied (0 when null)
    pub fn len(&self) -> usize {
        self.data.map_or(0, <[u8]>::len)
    }

    /// Check if the supplied range is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy `dst.len()` bytes starting at `offset` into `dst`
    ///
    /// # Returns
    ///
    /// - `Ok(())` on success
    /// - `Err(RX_ERR_INVALID_ARGS)` if the pointer is null or the range
    ///   lies outside the caller's buffer
    pub fn copy_array_from_user(&self, offset: usize, dst: &mut [u8]) -> Result {
        let src = self.data.ok_or(RX_ERR_INVALID_ARGS)?;
        let end = offset.checked_add(dst.len()).ok_or(RX_ERR_INVALID_ARGS)?;
        let range = src.get(offset..end).ok_or(RX_ERR_INVALID_ARGS)?;
        dst.copy_from_slice(range);
        log_trace!("copy_from_user: offset={} len={}", offset, dst.len());
        Ok(())
    }
}

impl<'a> From<&'a [u8]> for UserInPtr<'a> {
    fn from(data: &'a [u8]) -> Self {
        Self::new(data)
    }
}

/// Destination range supplied by a caller
#[derive(Debug, Default)]
pub struct UserOutPtr<'a> {
    data: Option<&'a mut [u8]>,
}

impl<'a> UserOutPtr<'a> {
    /// A null destination pointer
    pub const fn null() -> Self {
        Self { data: None }
    }

    /// Wrap a caller buffer
    pub fn new(data: &'a mut [u8]) -> Self {
        Self { data: Some(data) }
    }

    /// Check if the pointer is null
    pub const fn is_null(&self) -> bool {
        self.data.is_none()
    }

    /// Number of bytes the caller supplied (0 when null)
    pub fn len(&self) -> usize {
        self.data.as_ref().map_or(0, |d| d.len())
    }

    /// Check if the supplied range is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy `src` into the caller's buffer starting at `offset`
    ///
    /// # Returns
    ///
    /// - `Ok(())` on success
    /// - `Err(RX_ERR_INVALID_ARGS)` if the pointer is null or the range
    ///   lies outside the caller's buffer
    pub fn copy_array_to_user(&mut self, offset: usize, src: &[u8]) -> Result {
        let dst = self.data.as_deref_mut().ok_or(RX_ERR_INVALID_ARGS)?;
        let end = offset.checked_add(src.len()).ok_or(RX_ERR_INVALID_ARGS)?;
        let range = dst.get_mut(offset..end).ok_or(RX_ERR_INVALID_ARGS)?;
        range.copy_from_slice(src);
        log_trace!("copy_to_user: offset={} len={}", offset, src.len());
        Ok(())
    }
}

impl<'a> From<&'a mut [u8]> for UserOutPtr<'a> {
    fn from(data: &'a mut [u8]) -> Self {
        Self::new(data)
    }
}
