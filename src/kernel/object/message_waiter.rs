// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Message Waiters
//!
//! A `MessageWaiter` is the rendezvous point for one transacted call: the
//! calling thread parks on it, and whoever writes the matching reply (or
//! tears the channel down) completes it.
//!
//! # Lifecycle
//!
//! ```text
//!            begin_wait               deliver
//! Unlinked ------------> Waiting ------------> Delivered --+
//!    ^                      |                              |
//!    |                      | cancel / timeout             | end_wait
//!    |                      v                              |
//!    +-------------- Cancelled (or timed out) <------------+
//! ```
//!
//! `begin_wait` links the waiter into its channel's waiter list; only the
//! list's owner, holding the channel's broad lock, unlinks it again before
//! calling `deliver` or `cancel`. A timed-out or interrupted wait leaves
//! the waiter linked, and the channel unlinks it on the way out.
//!
//! Lock order: channel broad lock, then the waiter's own lock, then its
//! event.

use alloc::sync::Arc;
use core::fmt;

use spin::Mutex;

use crate::kernel::object::channel::ChannelDispatcher;
use crate::kernel::object::message_packet::MessagePacket;
use crate::kernel::object::waiter_list::{WaiterKey, WaiterList};
use crate::kernel::sync::event::{Event, EventFlags};
use crate::rustux::types::err::*;
use crate::rustux::types::{Deadline, Result, Status, Txid};
use crate::{log_error, log_trace};

/// Where a waiter is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaiterPhase {
    /// Not associated with any channel
    Unlinked,

    /// Linked and waiting for a reply
    Waiting,

    /// Holding a reply, awaiting `end_wait`
    Delivered,

    /// Cancelled with a status, awaiting `end_wait`
    Cancelled,
}

struct WaiterState {
    phase: WaiterPhase,

    /// Channel the wait is bound to
    channel: Option<Arc<ChannelDispatcher>>,

    /// Position in the channel's waiter list while linked
    key: Option<WaiterKey>,

    txid: Txid,
    status: Status,
    msg: Option<MessagePacket>,
}

/// Rendezvous for one transacted call
pub struct MessageWaiter {
    state: Mutex<WaiterState>,
    event: Event,
}

impl MessageWaiter {
    /// Create an idle waiter
    pub fn new() -> Self {
        Self {
            state: Mutex::new(WaiterState {
                phase: WaiterPhase::Unlinked,
                channel: None,
                key: None,
                txid: 0,
                status: RX_ERR_BAD_STATE,
                msg: None,
            }),
            event: Event::new(false, EventFlags::empty()),
        }
    }

    /// Bind to `channel` and link into `list`, waiting for `txid`
    ///
    /// Must be called with the channel's broad lock held, `list` being the
    /// caller endpoint's waiter list.
    ///
    /// # Returns
    ///
    /// - `Ok(())` on success
    /// - `Err(RX_ERR_BAD_STATE)` if the waiter is already bound
    pub fn begin_wait(
        self: &Arc<Self>,
        channel: Arc<ChannelDispatcher>,
        txid: Txid,
        list: &mut WaiterList,
    ) -> Result {
        let mut state = self.state.lock();
        if state.channel.is_some() {
            log_error!("message waiter already bound to txid {:#x}", state.txid);
            return Err(RX_ERR_BAD_STATE);
        }

        state.channel = Some(channel);
        state.txid = txid;
        state.status = RX_ERR_TIMED_OUT;
        state.phase = WaiterPhase::Waiting;
        state.key = Some(list.push_back(self.clone(), txid));
        self.event.unsignal();
        Ok(())
    }

    /// Hand the reply to the waiter and wake it
    ///
    /// The caller must already have unlinked the waiter.
    pub fn deliver(&self, msg: MessagePacket) {
        let mut state = self.state.lock();
        debug_assert_eq!(state.phase, WaiterPhase::Waiting);
        debug_assert!(state.channel.is_some());

        state.key = None;
        state.msg = Some(msg);
        state.status = RX_OK;
        state.phase = WaiterPhase::Delivered;
        drop(state);

        self.event.signal(RX_OK);
    }

    /// Complete the wait with `status` and wake it
    ///
    /// The caller must already have unlinked the waiter.
    pub fn cancel(&self, status: Status) {
        let mut state = self.state.lock();
        debug_assert_eq!(state.phase, WaiterPhase::Waiting);

        state.key = None;
        state.status = status;
        state.phase = WaiterPhase::Cancelled;
        let txid = state.txid;
        drop(state);

        log_trace!("message waiter {:#x} cancelled: {}", txid, status);
        self.event.signal(status);
    }

    /// Block until the reply arrives, the wait is cancelled, the thread is
    /// interrupted or `deadline` passes
    ///
    /// # Returns
    ///
    /// - `Ok(())` if a reply was delivered
    /// - `Err(status)` with the cancellation status
    /// - `Err(RX_ERR_TIMED_OUT)` if the deadline passed first
    /// - `Err(RX_ERR_INTERNAL_INTR_RETRY)` if interrupted
    /// - `Err(RX_ERR_BAD_STATE)` if the waiter is not bound
    pub fn wait(&self, deadline: Deadline) -> Result {
        if self.state.lock().channel.is_none() {
            return Err(RX_ERR_BAD_STATE);
        }
        self.event.wait(deadline)
    }

    /// Make a current or future `wait` return `RX_ERR_INTERNAL_INTR_RETRY`
    ///
    /// Used when the waiting thread is suspended; the waiter stays linked
    /// so the call can be resumed.
    pub fn interrupt(&self) {
        self.event.interrupt();
    }

    /// Unbind from the channel and collect the outcome
    ///
    /// # Returns
    ///
    /// - `Ok(msg)` with the delivered reply
    /// - `Err(status)` with the cancellation status or `RX_ERR_TIMED_OUT`
    /// - `Err(RX_ERR_BAD_STATE)` if the waiter is unbound or still linked
    pub fn end_wait(&self) -> Result<MessagePacket> {
        let (channel, result) = {
            let mut state = self.state.lock();
            if state.channel.is_none() || state.key.is_some() {
                return Err(RX_ERR_BAD_STATE);
            }

            let result = match (state.phase, state.msg.take()) {
                (WaiterPhase::Delivered, Some(msg)) => Ok(msg),
                _ => Err(state.status),
            };
            state.phase = WaiterPhase::Unlinked;
            state.txid = 0;
            (state.channel.take(), result)
        };

        self.event.unsignal();
        drop(channel);
        result
    }

    /// Take the list key if still linked
    ///
    /// Only the channel calls this, under its broad lock.
    pub(crate) fn take_key(&self) -> Option<WaiterKey> {
        self.state.lock().key.take()
    }

    /// Transaction id being waited for (0 when unbound)
    pub fn txid(&self) -> Txid {
        self.state.lock().txid
    }

    /// Current lifecycle phase
    pub fn phase(&self) -> WaiterPhase {
        self.state.lock().phase
    }

    /// Check if the waiter sits in a channel's waiter list
    pub fn is_linked(&self) -> bool {
        self.state.lock().key.is_some()
    }

    /// Check if the waiter is bound to a channel
    pub fn is_bound(&self) -> bool {
        self.state.lock().channel.is_some()
    }

    /// Check if the waiter is bound to `channel`
    pub fn is_bound_to(&self, channel: &ChannelDispatcher) -> bool {
        self.state
            .lock()
            .channel
            .as_ref()
            .is_some_and(|bound| core::ptr::eq(Arc::as_ptr(bound), channel))
    }
}

impl Default for MessageWaiter {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for MessageWaiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("MessageWaiter")
            .field("phase", &state.phase)
            .field("txid", &state.txid)
            .field("linked", &state.key.is_some())
            .finish()
    }
}
