// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Handle & Rights Model
//!
//! Kernel objects are reached through handles. A handle pins its object
//! (a *dispatcher*) and carries the rights the holder was granted. When
//! the last handle to a dispatcher goes away the dispatcher is told via
//! `on_zero_handles`, which is where objects like channels tear down.
//!
//! # Design
//!
//! - **Dispatchers**: kernel objects implementing the `Dispatcher` trait,
//!   each with a unique koid and a signal word in its `DispatcherBase`
//! - **KernelHandle**: typed, counted reference; dropping the last one
//!   runs `on_zero_handles` exactly once
//! - **Handle**: type-erased `KernelHandle` plus rights, the form in which
//!   handles travel inside messages
//!
//! # Usage
//!
//! ```rust
//! use rustux_channel::kernel::object::channel::ChannelDispatcher;
//! use rustux_channel::kernel::object::handle::{Handle, Rights};
//!
//! let (h0, h1, rights) = ChannelDispatcher::create().unwrap();
//! let handle = Handle::make(h1, rights);
//! assert!(handle.require(Rights::TRANSFER).is_ok());
//! # drop(h0);
//! ```

use alloc::sync::Arc;
use core::fmt;
use core::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use bitflags::bitflags;

use crate::rustux::types::err::*;
use crate::rustux::types::{Koid, Result, KOID_INVALID};

// ============================================================================
// Rights and Signals
// ============================================================================

bitflags! {
    /// Handle rights bitmask
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Rights: u32 {
        const DUPLICATE = 1 << 0;
        const TRANSFER = 1 << 1;
        const READ = 1 << 2;
        const WRITE = 1 << 3;
        const SIGNAL = 1 << 12;
        const SIGNAL_PEER = 1 << 13;
        const WAIT = 1 << 14;
        const INSPECT = 1 << 15;
    }
}

impl Rights {
    /// Rights granted on both ends of a new channel
    pub const CHANNEL_DEFAULT: Self = Self::TRANSFER
        .union(Self::WAIT)
        .union(Self::INSPECT)
        .union(Self::READ)
        .union(Self::WRITE)
        .union(Self::SIGNAL)
        .union(Self::SIGNAL_PEER);

    /// Require specific rights
    ///
    /// # Returns
    ///
    /// - `Ok(())` if all rights are present
    /// - `Err(RX_ERR_ACCESS_DENIED)` if any right is missing
    pub fn require(self, required: Self) -> Result {
        if self.contains(required) {
            Ok(())
        } else {
            Err(RX_ERR_ACCESS_DENIED)
        }
    }
}

bitflags! {
    /// Observable object state
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Signals: u32 {
        /// At least one message is queued
        const READABLE = 1 << 0;
        /// The peer accepts writes
        const WRITABLE = 1 << 1;
        /// The peer endpoint has been closed
        const PEER_CLOSED = 1 << 2;
    }
}

/// ============================================================================
/// Kernel Object Types
/// ============================================================================

/// Kernel object type
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectType {
    /// Unknown type
    Unknown = 0,

    /// Channel endpoint
    Channel = 4,
}

impl ObjectType {
    /// Get name as string
    pub const fn name(self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Channel => "channel",
        }
    }
}

/// Next kernel object id
static NEXT_KOID: AtomicU64 = AtomicU64::new(KOID_INVALID + 1);

/// Allocate a fresh, never reused koid
pub fn alloc_koid() -> Koid {
    NEXT_KOID.fetch_add(1, Ordering::Relaxed)
}

/// ============================================================================
/// Dispatcher
/// ============================================================================

/// State common to every dispatcher
#[derive(Debug)]
pub struct DispatcherBase {
    koid: Koid,
    handle_count: AtomicU32,
    signals: AtomicU32,
}

impl DispatcherBase {
    /// Create a base with a fresh koid and the given initial signals
    pub fn new(signals: Signals) -> Self {
        Self {
            koid: alloc_koid(),
            handle_count: AtomicU32::new(0),
            signals: AtomicU32::new(signals.bits()),
        }
    }

    /// Get the kernel object id
    pub fn koid(&self) -> Koid {
        self.koid
    }

    /// Get the currently asserted signals
    pub fn signals(&self) -> Signals {
        Signals::from_bits_truncate(self.signals.load(Ordering::Acquire))
    }

    /// Clear then set signals in one atomic step
    pub fn update_state(&self, clear: Signals, set: Signals) {
        let _ = self
            .signals
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |bits| {
                Some((bits & !clear.bits()) | set.bits())
            });
    }

    /// Number of live handles
    pub fn handle_count(&self) -> u32 {
        self.handle_count.load(Ordering::Acquire)
    }

    fn increment_handle_count(&self) {
        self.handle_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns true if this released the last handle
    fn decrement_handle_count(&self) -> bool {
        let previous = self.handle_count.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(previous > 0);
        previous == 1
    }
}

/// Interface every kernel object exposes to the handle layer
pub trait Dispatcher: Send + Sync {
    /// Common dispatcher state
    fn base(&self) -> &DispatcherBase;

    /// Object type
    fn get_type(&self) -> ObjectType;

    /// Kernel object id
    fn get_koid(&self) -> Koid {
        self.base().koid()
    }

    /// Koid of a related object (the peer, for paired objects)
    fn get_related_koid(&self) -> Koid {
        KOID_INVALID
    }

    /// Currently asserted signals
    fn signals(&self) -> Signals {
        self.base().signals()
    }

    /// Called exactly once, when the last handle is dropped
    fn on_zero_handles(&self) {}

    /// Record the koid of the process holding the handle
    fn set_owner(&self, _owner: Koid) {}
}

/// ============================================================================
/// Kernel Handles
/// ============================================================================

/// Counted, typed reference to a dispatcher
pub struct KernelHandle<D: ?Sized + Dispatcher> {
    dispatcher: Arc<D>,
}

impl<D: ?Sized + Dispatcher> KernelHandle<D> {
    /// Take a new handle on `dispatcher`
    pub fn new(dispatcher: Arc<D>) -> Self {
        dispatcher.base().increment_handle_count();
        Self { dispatcher }
    }

    /// Get the dispatcher
    pub fn dispatcher(&self) -> &Arc<D> {
        &self.dispatcher
    }

    /// Take another handle on the same dispatcher
    pub fn duplicate(&self) -> Self {
        Self::new(self.dispatcher.clone())
    }
}

impl<D: Dispatcher + 'static> KernelHandle<D> {
    /// Erase the dispatcher type
    pub fn into_dyn(self) -> KernelHandle<dyn Dispatcher> {
        // The new handle is counted before this one is released, so the
        // count never touches zero.
        let dispatcher: Arc<dyn Dispatcher> = self.dispatcher.clone();
        KernelHandle::new(dispatcher)
    }
}

impl<D: ?Sized + Dispatcher> Drop for KernelHandle<D> {
    fn drop(&mut self) {
        if self.dispatcher.base().decrement_handle_count() {
            self.dispatcher.on_zero_handles();
        }
    }
}

impl<D: ?Sized + Dispatcher> fmt::Debug for KernelHandle<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KernelHandle")
            .field("type", &self.dispatcher.get_type())
            .field("koid", &self.dispatcher.get_koid())
            .finish()
    }
}

/// Type-erased handle with rights, as carried in messages
pub struct Handle {
    handle: KernelHandle<dyn Dispatcher>,
    rights: Rights,
}

impl Handle {
    /// Wrap an erased kernel handle
    pub fn new(handle: KernelHandle<dyn Dispatcher>, rights: Rights) -> Self {
        Self { handle, rights }
    }

    /// Wrap a typed kernel handle
    pub fn make<D: Dispatcher + 'static>(handle: KernelHandle<D>, rights: Rights) -> Self {
        Self::new(handle.into_dyn(), rights)
    }

    /// Get the dispatcher
    pub fn dispatcher(&self) -> &Arc<dyn Dispatcher> {
        self.handle.dispatcher()
    }

    /// Get the rights for this handle
    pub fn rights(&self) -> Rights {
        self.rights
    }

    /// Kernel object id of the referenced object
    pub fn koid(&self) -> Koid {
        self.handle.dispatcher().get_koid()
    }

    /// Require specific rights
    pub fn require(&self, required: Rights) -> Result {
        self.rights.require(required)
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handle")
            .field("type", &self.dispatcher().get_type())
            .field("koid", &self.koid())
            .field("rights", &self.rights)
            .finish()
    }
}
