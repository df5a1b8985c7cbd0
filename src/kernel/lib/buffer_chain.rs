// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Buffer Chains
//!
//! A `BufferChain` is a sequence of fixed-size buffers that together hold
//! one opaque byte stream, such as a channel message payload. No single
//! allocation is ever larger than a page, yet the common case (a payload
//! that fits in one buffer) costs a single allocation.
//!
//! # Design
//!
//! - **Allocate once**: every buffer the payload may need is taken from
//!   the pool up front in `alloc`
//! - **Append sequentially**: `skip` and `append` advance a write cursor
//! - **Read anywhere**: `copy_out` reads from any absolute offset
//! - **Trim**: `free_unused_buffers` returns buffers past the cursor
//!
//! A chain is exclusively owned by the message that carries it, so it has
//! no internal locking. Dropping the chain returns its buffers to the pool.
//!
//! # Usage
//!
//! ```rust
//! use rustux_channel::kernel::lib::buffer_chain::BufferChain;
//!
//! let mut chain = BufferChain::alloc(16).unwrap();
//! chain.skip(4).unwrap();
//! chain.append_kernel(b"payload").unwrap();
//!
//! let mut out = [0u8; 7];
//! chain.copy_out_kernel(&mut out, 4).unwrap();
//! assert_eq!(&out, b"payload");
//! ```

use alloc::boxed::Box;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt;
use spin::{Mutex, Once};

use crate::kernel::config::PAGE_SIZE;
use crate::kernel::usercopy::{UserInPtr, UserOutPtr};
use crate::rustux::types::err::*;
use crate::rustux::types::Result;
use crate::{log_error, log_trace};

/// Size of one buffer, including its bookkeeping
pub const BUFFER_SIZE: usize = PAGE_SIZE;

/// Per-buffer bookkeeping carved out of each page
pub const BUFFER_HEADER_SIZE: usize = 16;

/// Payload capacity of one buffer
pub const RAW_DATA_SIZE: usize = BUFFER_SIZE - BUFFER_HEADER_SIZE;

/// Largest chain served by a single buffer
pub const CONTIG: usize = RAW_DATA_SIZE;

/// Recycled pages a pool keeps around before releasing them
const POOL_CACHE_MAX: usize = 64;

/// ============================================================================
/// Buffer
/// ============================================================================

/// One fixed-capacity link of a chain
pub struct Buffer {
    data: Box<[u8]>,
}

impl Buffer {
    fn new() -> Self {
        Self {
            data: vec![0u8; RAW_DATA_SIZE].into_boxed_slice(),
        }
    }

    /// Raw payload bytes of this buffer
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

/// ============================================================================
/// Buffer Pool
/// ============================================================================

struct PoolState {
    /// Recycled buffers ready for reuse
    free: Vec<Buffer>,

    /// Buffers currently owned by chains
    outstanding: usize,
}

/// Page source for buffer chains
///
/// A pool hands out buffers, optionally up to a fixed limit, and caches a
/// few recycled ones to keep the common alloc/free cycle cheap.
pub struct BufferPool {
    /// Maximum outstanding buffers, if bounded
    limit: Option<usize>,

    state: Mutex<PoolState>,
}

impl BufferPool {
    /// Create an unbounded pool
    pub const fn new() -> Self {
        Self {
            limit: None,
            state: Mutex::new(PoolState {
                free: Vec::new(),
                outstanding: 0,
            }),
        }
    }

    /// Create a pool that never has more than `limit` buffers outstanding
    pub const fn with_limit(limit: usize) -> Self {
        Self {
            limit: Some(limit),
            state: Mutex::new(PoolState {
                free: Vec::new(),
                outstanding: 0,
            }),
        }
    }

    /// The pool chains come from unless told otherwise
    pub fn global() -> Arc<BufferPool> {
        static GLOBAL: Once<Arc<BufferPool>> = Once::new();
        GLOBAL.call_once(|| Arc::new(BufferPool::new())).clone()
    }

    /// Get the outstanding-buffer limit
    pub fn limit(&self) -> Option<usize> {
        self.limit
    }

    /// Number of buffers currently owned by chains
    pub fn outstanding(&self) -> usize {
        self.state.lock().outstanding
    }

    /// Number of recycled buffers waiting for reuse
    pub fn cached(&self) -> usize {
        self.state.lock().free.len()
    }

    /// Take `count` buffers from the pool
    ///
    /// # Returns
    ///
    /// - `Ok(buffers)` with exactly `count` buffers
    /// - `Err(RX_ERR_NO_MEMORY)` if the pool limit would be exceeded
    fn alloc_buffers(&self, count: usize) -> Result<Vec<Buffer>> {
        let mut buffers = Vec::with_capacity(count);
        {
            let mut state = self.state.lock();
            if let Some(limit) = self.limit {
                if state.outstanding + count > limit {
                    log_error!(
                        "buffer pool exhausted: {} outstanding, {} requested, limit {}",
                        state.outstanding,
                        count,
                        limit
                    );
                    return Err(RX_ERR_NO_MEMORY);
                }
            }
            state.outstanding += count;
            let reuse = count.min(state.free.len());
            let start = state.free.len() - reuse;
            buffers.extend(state.free.drain(start..));
        }

        // Fresh pages are allocated outside the lock.
        while buffers.len() < count {
            buffers.push(Buffer::new());
        }
        Ok(buffers)
    }

    /// Return buffers to the pool
    fn free_buffers<I: ExactSizeIterator<Item = Buffer>>(&self, buffers: I) {
        let count = buffers.len();
        let mut state = self.state.lock();
        debug_assert!(state.outstanding >= count);
        state.outstanding -= count;
        for buffer in buffers {
            if state.free.len() >= POOL_CACHE_MAX {
                break;
            }
            state.free.push(buffer);
        }
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("BufferPool")
            .field("limit", &self.limit)
            .field("outstanding", &state.outstanding)
            .field("cached", &state.free.len())
            .finish()
    }
}

/// ============================================================================
/// Buffer Chain
/// ============================================================================

/// An allocate-once, append-sequentially, read-anywhere byte store
pub struct BufferChain {
    /// Buffers in stream order
    buffers: Vec<Buffer>,

    /// Allocated capacity in bytes
    size: usize,

    /// Bytes skipped or appended so far
    cursor: usize,

    /// Set by the first successful append; skips are refused afterwards
    appended: bool,

    /// Pool the buffers go back to
    pool: Arc<BufferPool>,
}

impl BufferChain {
    /// Allocate a chain able to hold `size` bytes from the global pool
    pub fn alloc(size: usize) -> Result<Self> {
        Self::alloc_in(&BufferPool::global(), size)
    }

    /// Allocate a chain able to hold `size` bytes from `pool`
    ///
    /// A chain of at most `CONTIG` bytes (including an empty one) is a
    /// single buffer; anything larger gets `ceil(size / RAW_DATA_SIZE)`
    /// buffers, all allocated now.
    ///
    /// # Returns
    ///
    /// - `Ok(chain)` on success
    /// - `Err(RX_ERR_NO_MEMORY)` if the pool is exhausted
    pub fn alloc_in(pool: &Arc<BufferPool>, size: usize) -> Result<Self> {
        let num_buffers = if size <= CONTIG {
            1
        } else {
            size.div_ceil(RAW_DATA_SIZE)
        };

        let buffers = pool.alloc_buffers(num_buffers)?;
        log_trace!("buffer chain alloc: size={} buffers={}", size, num_buffers);

        Ok(Self {
            buffers,
            size: num_buffers * RAW_DATA_SIZE,
            cursor: 0,
            appended: false,
            pool: pool.clone(),
        })
    }

    /// Release the chain and all of its buffers
    pub fn free(self) {
        drop(self);
    }

    /// Allocated capacity in bytes
    pub fn size(&self) -> usize {
        self.size
    }

    /// Current write position
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Number of buffers in the chain
    pub fn num_buffers(&self) -> usize {
        self.buffers.len()
    }

    /// Check if the chain is a single buffer
    pub fn is_contiguous(&self) -> bool {
        self.buffers.len() == 1
    }

    /// Iterate over the buffers in stream order
    pub fn buffers(&self) -> impl Iterator<Item = &Buffer> {
        self.buffers.iter()
    }

    /// Reserve `len` bytes at the cursor without writing them
    ///
    /// # Returns
    ///
    /// - `Ok(())` on success
    /// - `Err(RX_ERR_BAD_STATE)` if data has already been appended
    /// - `Err(RX_ERR_OUT_OF_RANGE)` if the chain is too small
    pub fn skip(&mut self, len: usize) -> Result {
        if self.appended {
            return Err(RX_ERR_BAD_STATE);
        }
        let end = self.checked_end(self.cursor, len)?;
        self.cursor = end;
        Ok(())
    }

    /// Copy `len` bytes from `src` to the cursor and advance it
    ///
    /// On failure the cursor and contents are unchanged.
    ///
    /// # Returns
    ///
    /// - `Ok(())` on success
    /// - `Err(RX_ERR_OUT_OF_RANGE)` if the bytes do not fit
    /// - `Err(RX_ERR_INVALID_ARGS)` if `src` is null (and `len > 0`) or
    ///   shorter than `len`
    pub fn append(&mut self, src: UserInPtr<'_>, len: usize) -> Result {
        let end = self.checked_end(self.cursor, len)?;
        if len > 0 && (src.is_null() || src.len() < len) {
            return Err(RX_ERR_INVALID_ARGS);
        }

        let mut copied = 0;
        for (buffer, range) in self.spans_mut(self.cursor, len) {
            let n = range.len();
            src.copy_array_from_user(copied, &mut buffer.data_mut()[range])?;
            copied += n;
        }

        self.cursor = end;
        self.appended = true;
        Ok(())
    }

    /// Append kernel-owned bytes
    pub fn append_kernel(&mut self, data: &[u8]) -> Result {
        self.append(UserInPtr::new(data), data.len())
    }

    /// Rewrite bytes that were already skipped or appended
    ///
    /// This is how a reserved header is filled in after the payload.
    ///
    /// # Returns
    ///
    /// - `Ok(())` on success
    /// - `Err(RX_ERR_OUT_OF_RANGE)` if the range reaches past the cursor
    pub fn overwrite(&mut self, offset: usize, data: &[u8]) -> Result {
        let end = offset.checked_add(data.len()).ok_or(RX_ERR_OUT_OF_RANGE)?;
        if end > self.cursor {
            return Err(RX_ERR_OUT_OF_RANGE);
        }

        let mut copied = 0;
        for (buffer, range) in self.spans_mut(offset, data.len()) {
            let n = range.len();
            buffer.data_mut()[range].copy_from_slice(&data[copied..copied + n]);
            copied += n;
        }
        Ok(())
    }

    /// Copy `len` bytes starting at absolute `offset` to `dst`
    ///
    /// The caller is responsible for only reading bytes it appended.
    ///
    /// # Returns
    ///
    /// - `Ok(())` on success
    /// - `Err(RX_ERR_OUT_OF_RANGE)` if the range exceeds the chain
    /// - `Err(RX_ERR_INVALID_ARGS)` if `dst` is null or too short
    pub fn copy_out(&self, dst: &mut UserOutPtr<'_>, offset: usize, len: usize) -> Result {
        self.checked_end(offset, len)?;
        if len > 0 && (dst.is_null() || dst.len() < len) {
            return Err(RX_ERR_INVALID_ARGS);
        }

        let mut copied = 0;
        for (buffer, range) in self.spans(offset, len) {
            let n = range.len();
            dst.copy_array_to_user(copied, &buffer.data()[range])?;
            copied += n;
        }
        Ok(())
    }

    /// Copy `dst.len()` bytes starting at absolute `offset` into kernel memory
    pub fn copy_out_kernel(&self, dst: &mut [u8], offset: usize) -> Result {
        let len = dst.len();
        self.copy_out(&mut UserOutPtr::new(dst), offset, len)
    }

    /// Return buffers that lie entirely past the cursor's buffer
    ///
    /// The buffer holding the cursor position is kept, so an exact fit
    /// keeps every buffer.
    pub fn free_unused_buffers(&mut self) {
        let keep = (self.cursor / RAW_DATA_SIZE + 1).min(self.buffers.len());
        if keep == self.buffers.len() {
            return;
        }

        let unused = self.buffers.split_off(keep);
        log_trace!(
            "buffer chain trim: cursor={} kept={} freed={}",
            self.cursor,
            keep,
            unused.len()
        );
        self.pool.free_buffers(unused.into_iter());
        self.size = keep * RAW_DATA_SIZE;
    }

    /// End offset of `[offset, offset + len)`, if it fits in the chain
    fn checked_end(&self, offset: usize, len: usize) -> Result<usize> {
        match offset.checked_add(len) {
            Some(end) if end <= self.size => Ok(end),
            _ => Err(RX_ERR_OUT_OF_RANGE),
        }
    }

    /// Split `[offset, offset + len)` into per-buffer ranges
    fn spans(
        &self,
        offset: usize,
        len: usize,
    ) -> impl Iterator<Item = (&Buffer, core::ops::Range<usize>)> {
        Spans::new(offset, len).map(move |(index, range)| (&self.buffers[index], range))
    }

    fn spans_mut(
        &mut self,
        offset: usize,
        len: usize,
    ) -> impl Iterator<Item = (&mut Buffer, core::ops::Range<usize>)> {
        let first = offset / RAW_DATA_SIZE;
        Spans::new(offset, len).zip(self.buffers[first..].iter_mut()).map(
            |((_, range), buffer)| (buffer, range),
        )
    }
}

impl Drop for BufferChain {
    fn drop(&mut self) {
        let buffers = core::mem::take(&mut self.buffers);
        self.pool.free_buffers(buffers.into_iter());
    }
}

impl fmt::Debug for BufferChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferChain")
            .field("size", &self.size)
            .field("cursor", &self.cursor)
            .field("buffers", &self.buffers.len())
            .finish()
    }
}

/// Walks a byte range one buffer at a time
///
/// Yields `(buffer index, range within that buffer)`, consuming
/// `min(remaining, space left in buffer)` per step.
struct Spans {
    offset: usize,
    remaining: usize,
}

impl Spans {
    fn new(offset: usize, len: usize) -> Self {
        Self {
            offset,
            remaining: len,
        }
    }
}

impl Iterator for Spans {
    type Item = (usize, core::ops::Range<usize>);

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let index = self.offset / RAW_DATA_SIZE;
        let start = self.offset % RAW_DATA_SIZE;
        let n = self.remaining.min(RAW_DATA_SIZE - start);
        self.offset += n;
        self.remaining -= n;
        Some((index, start..start + n))
    }
}
