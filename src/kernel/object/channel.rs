// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! IPC Channels
//!
//! Channels provide bidirectional message passing between exactly two
//! endpoints. Each endpoint is a `ChannelDispatcher`; a message written on
//! one end is queued on the other.
//!
//! # Design
//!
//! - **Bidirectional**: created as pairs of endpoints
//! - **FIFO ordering**: queued messages are read in write order
//! - **Bounded queue**: writes beyond the configured depth are refused
//!   with `RX_ERR_SHOULD_WAIT`
//! - **Transacted calls**: `call` stamps a kernel txid, parks the caller
//!   on a `MessageWaiter`, and the peer's reply with that txid is handed
//!   straight to the waiter without touching the queue
//! - **Peer closure**: when one end loses its last handle the other end
//!   sees `PEER_CLOSED` and its parked callers are cancelled
//!
//! # Locking
//!
//! Two lock domains:
//!
//! - the *broad* lock lives in the `PeerHolder` shared by both endpoints
//!   and guards each side's dispatcher link, waiter list and txid counter
//! - the *narrow* lock is per endpoint and guards its message queue
//!
//! `read` takes only the narrow lock. Everything that crosses to the peer
//! takes the broad lock first. Order: broad, narrow, waiter, event.
//! Messages and waiters are never dropped while either lock is held; they
//! are parked in a `DeferredDrop` and released afterwards, since a message
//! may carry the last handle to another channel.
//!
//! # Usage
//!
//! ```rust
//! use rustux_channel::kernel::object::channel::ChannelDispatcher;
//! use rustux_channel::kernel::object::message_packet::MessagePacket;
//! use rustux_channel::rustux::KOID_INVALID;
//!
//! let (a, b, _rights) = ChannelDispatcher::create().unwrap();
//! let msg = MessagePacket::create_kernel(b"ping", Vec::new()).unwrap();
//! a.dispatcher().write(KOID_INVALID, msg).unwrap();
//!
//! let got = b.dispatcher().read(KOID_INVALID, 64, 0, false).unwrap();
//! assert_eq!(got.data().unwrap(), b"ping");
//! ```

use alloc::collections::VecDeque;
use alloc::sync::{Arc, Weak};
use alloc::vec::Vec;
use core::fmt;
use core::sync::atomic::{AtomicU64, Ordering};

use spin::Mutex;

use crate::kernel::config::ChannelConfig;
use crate::kernel::lib::counters::{CHANNEL_CALL_INTERRUPTED, CHANNEL_FULL, CHANNEL_MESSAGES_MAX};
use crate::kernel::object::handle::{
    Dispatcher, DispatcherBase, KernelHandle, ObjectType, Rights, Signals,
};
use crate::kernel::object::message_packet::{MessagePacket, TXID_SIZE};
use crate::kernel::object::message_waiter::MessageWaiter;
use crate::kernel::object::waiter_list::WaiterList;
use crate::rustux::types::err::*;
use crate::rustux::types::{Deadline, Koid, Result, Status, Txid, KOID_INVALID};
use crate::{log_debug, log_trace, log_warn};

/// High bit set on every txid the kernel allocates
pub const KERNEL_TXID_BIT: Txid = 0x8000_0000;

/// ============================================================================
/// Read Results
/// ============================================================================

/// Why a read produced no message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadError {
    /// The read failed with a status
    Status(Status),

    /// The front message does not fit the caller's limits
    BufferTooSmall { bytes_avail: u32, handles_avail: u32 },
}

impl ReadError {
    /// Collapse to a plain status
    pub fn status(&self) -> Status {
        match self {
            Self::Status(status) => *status,
            Self::BufferTooSmall { .. } => RX_ERR_BUFFER_TOO_SMALL,
        }
    }
}

impl From<Status> for ReadError {
    fn from(status: Status) -> Self {
        Self::Status(status)
    }
}

/// ============================================================================
/// Shared State
/// ============================================================================

/// One side of the channel, as seen under the broad lock
#[derive(Default)]
struct EndpointSlot {
    /// Cleared when the endpoint loses its last handle
    dispatcher: Option<Weak<ChannelDispatcher>>,

    /// Callers on this endpoint waiting for replies
    waiters: WaiterList,

    /// Last txid handed out to a caller on this endpoint
    txid: Txid,
}

impl EndpointSlot {
    fn dispatcher(&self) -> Option<Arc<ChannelDispatcher>> {
        self.dispatcher.as_ref().and_then(Weak::upgrade)
    }
}

/// State shared by both endpoints, behind the broad lock
struct PeerHolder {
    endpoints: Mutex<[EndpointSlot; 2]>,
}

impl PeerHolder {
    fn new() -> Self {
        Self {
            endpoints: Mutex::new(Default::default()),
        }
    }
}

/// Per-endpoint state, behind the narrow lock
#[derive(Default)]
struct ChannelState {
    messages: VecDeque<MessagePacket>,
    peer_has_closed: bool,

    /// Cleared when the endpoint is torn down
    bound: bool,

    /// Deepest the queue has ever been
    max_message_count: usize,

    /// The depth warning fired
    depth_warned: bool,

    /// A full-queue rejection was logged since the queue last drained
    full_warned: bool,
}

/// Objects released only after every channel lock is dropped
#[derive(Default)]
struct DeferredDrop {
    messages: Vec<MessagePacket>,
    waiters: Vec<Arc<MessageWaiter>>,
    dispatchers: Vec<Arc<ChannelDispatcher>>,
}

/// ============================================================================
/// Channel Dispatcher
/// ============================================================================

/// One endpoint of a channel
pub struct ChannelDispatcher {
    base: DispatcherBase,

    /// This endpoint's index in the peer holder
    side: usize,

    peer_koid: Koid,
    holder: Arc<PeerHolder>,
    state: Mutex<ChannelState>,

    /// Koid of the process holding the handle; written under both locks
    owner: AtomicU64,

    config: ChannelConfig,
}

impl ChannelDispatcher {
    /// Create a channel pair with default limits
    ///
    /// # Returns
    ///
    /// Tuple of (endpoint 0, endpoint 1, rights for both handles)
    pub fn create() -> Result<(KernelHandle<Self>, KernelHandle<Self>, Rights)> {
        Self::create_with_config(ChannelConfig::default())
    }

    /// Create a channel pair with the given queue limits
    ///
    /// # Returns
    ///
    /// - `Ok((h0, h1, rights))` on success
    /// - `Err(RX_ERR_INVALID_ARGS)` if `config` is unusable
    pub fn create_with_config(
        config: ChannelConfig,
    ) -> Result<(KernelHandle<Self>, KernelHandle<Self>, Rights)> {
        config.validate()?;

        let holder = Arc::new(PeerHolder::new());
        let base0 = DispatcherBase::new(Signals::WRITABLE);
        let base1 = DispatcherBase::new(Signals::WRITABLE);
        let (koid0, koid1) = (base0.koid(), base1.koid());

        let ch0 = Arc::new(Self::new(base0, 0, koid1, holder.clone(), config));
        let ch1 = Arc::new(Self::new(base1, 1, koid0, holder.clone(), config));
        {
            let mut endpoints = holder.endpoints.lock();
            endpoints[0].dispatcher = Some(Arc::downgrade(&ch0));
            endpoints[1].dispatcher = Some(Arc::downgrade(&ch1));
        }

        log_debug!(
            "channel created: koids {}/{} max_pending={}",
            koid0,
            koid1,
            config.max_pending_messages
        );
        Ok((KernelHandle::new(ch0), KernelHandle::new(ch1), Rights::CHANNEL_DEFAULT))
    }

    fn new(
        base: DispatcherBase,
        side: usize,
        peer_koid: Koid,
        holder: Arc<PeerHolder>,
        config: ChannelConfig,
    ) -> Self {
        Self {
            base,
            side,
            peer_koid,
            holder,
            state: Mutex::new(ChannelState {
                bound: true,
                ..Default::default()
            }),
            owner: AtomicU64::new(KOID_INVALID),
            config,
        }
    }

    fn peer_side(&self) -> usize {
        self.side ^ 1
    }

    /// Get the owning process koid
    pub fn get_owner(&self) -> Koid {
        self.owner.load(Ordering::Acquire)
    }

    /// Get the queue limits
    pub fn config(&self) -> ChannelConfig {
        self.config
    }

    /// Read the next message
    ///
    /// # Arguments
    ///
    /// * `owner` - Koid of the calling process
    /// * `max_bytes` - Largest payload the caller can take
    /// * `max_handles` - Most handles the caller can take
    /// * `may_discard` - Drop a message that does not fit
    ///
    /// # Returns
    ///
    /// - `Ok(msg)` with the oldest queued message
    /// - `Err(ReadError::BufferTooSmall { .. })` with the front message's
    ///   sizes; the message stays queued unless `may_discard`
    /// - `Err(RX_ERR_SHOULD_WAIT)` if the queue is empty
    /// - `Err(RX_ERR_PEER_CLOSED)` if the queue is empty and the peer is gone
    /// - `Err(RX_ERR_BAD_HANDLE)` if `owner` does not own this endpoint
    /// - `Err(RX_ERR_NOT_BOUND)` if this endpoint was torn down
    pub fn read(
        &self,
        owner: Koid,
        max_bytes: u32,
        max_handles: u32,
        may_discard: bool,
    ) -> core::result::Result<MessagePacket, ReadError> {
        let mut discarded = None;
        let result = {
            let mut state = self.state.lock();
            self.read_locked(&mut state, owner, max_bytes, max_handles, may_discard, &mut discarded)
        };
        drop(discarded);
        result
    }

    fn read_locked(
        &self,
        state: &mut ChannelState,
        owner: Koid,
        max_bytes: u32,
        max_handles: u32,
        may_discard: bool,
        discarded: &mut Option<MessagePacket>,
    ) -> core::result::Result<MessagePacket, ReadError> {
        if owner != self.get_owner() {
            log_debug!("channel {} read by non-owner {}", self.base.koid(), owner);
            return Err(RX_ERR_BAD_HANDLE.into());
        }
        if !state.bound {
            return Err(RX_ERR_NOT_BOUND.into());
        }

        let (bytes_avail, handles_avail) = match state.messages.front() {
            Some(msg) => (msg.data_size(), msg.num_handles()),
            None if state.peer_has_closed => return Err(RX_ERR_PEER_CLOSED.into()),
            None => return Err(RX_ERR_SHOULD_WAIT.into()),
        };

        if bytes_avail > max_bytes || handles_avail > max_handles {
            if may_discard {
                *discarded = state.messages.pop_front();
                self.after_pop(state);
            }
            return Err(ReadError::BufferTooSmall {
                bytes_avail,
                handles_avail,
            });
        }

        let msg = state.messages.pop_front().ok_or(RX_ERR_SHOULD_WAIT)?;
        self.after_pop(state);
        Ok(msg)
    }

    fn after_pop(&self, state: &mut ChannelState) {
        state.full_warned = false;
        if state.messages.is_empty() {
            self.base.update_state(Signals::READABLE, Signals::empty());
        }
    }

    /// Write a message to the peer
    ///
    /// A reply whose txid matches a caller parked on the peer goes straight
    /// to that caller; anything else is queued on the peer.
    ///
    /// # Returns
    ///
    /// - `Ok(())` on success
    /// - `Err(RX_ERR_BAD_HANDLE)` if `owner` does not own this endpoint
    /// - `Err(RX_ERR_NOT_BOUND)` if this endpoint was torn down
    /// - `Err(RX_ERR_PEER_CLOSED)` if the peer is gone
    /// - `Err(RX_ERR_SHOULD_WAIT)` if the peer's queue is full
    pub fn write(&self, owner: Koid, msg: MessagePacket) -> Result {
        let mut deferred = DeferredDrop::default();
        let result = {
            let mut endpoints = self.holder.endpoints.lock();
            self.write_locked(&mut endpoints, owner, msg, &mut deferred)
        };
        drop(deferred);
        result
    }

    fn write_locked(
        &self,
        endpoints: &mut [EndpointSlot; 2],
        owner: Koid,
        msg: MessagePacket,
        deferred: &mut DeferredDrop,
    ) -> Result {
        if owner != self.get_owner() {
            log_debug!("channel {} written by non-owner {}", self.base.koid(), owner);
            deferred.messages.push(msg);
            return Err(RX_ERR_BAD_HANDLE);
        }
        if endpoints[self.side].dispatcher.is_none() {
            deferred.messages.push(msg);
            return Err(RX_ERR_NOT_BOUND);
        }

        let peer = match endpoints[self.peer_side()].dispatcher() {
            Some(peer) => peer,
            None => {
                deferred.messages.push(msg);
                return Err(RX_ERR_PEER_CLOSED);
            }
        };

        let result = self.deliver_to_peer(endpoints, &peer, msg, deferred);
        deferred.dispatchers.push(peer);
        result
    }

    /// Hand `msg` to a matching waiter on the peer, or queue it there
    fn deliver_to_peer(
        &self,
        endpoints: &mut [EndpointSlot; 2],
        peer: &ChannelDispatcher,
        msg: MessagePacket,
        deferred: &mut DeferredDrop,
    ) -> Result {
        let slot = &mut endpoints[self.peer_side()];
        if !slot.waiters.is_empty() {
            let txid = msg.get_txid();
            if let Some(waiter) = slot.waiters.find_txid(txid).and_then(|key| slot.waiters.remove(key)) {
                log_trace!("channel {} reply {:#x} delivered to waiter", peer.base.koid(), txid);
                waiter.deliver(msg);
                deferred.waiters.push(waiter);
                return Ok(());
            }
        }

        peer.write_self(msg, deferred)
    }

    /// Queue `msg` on this endpoint
    fn write_self(&self, msg: MessagePacket, deferred: &mut DeferredDrop) -> Result {
        let mut state = self.state.lock();

        if state.messages.len() >= self.config.max_pending_messages {
            CHANNEL_FULL.add(1);
            if !state.full_warned {
                state.full_warned = true;
                log_warn!(
                    "channel {} queue full ({} messages), rejecting writes",
                    self.base.koid(),
                    state.messages.len()
                );
            }
            deferred.messages.push(msg);
            return Err(RX_ERR_SHOULD_WAIT);
        }

        state.messages.push_back(msg);
        let depth = state.messages.len();
        if depth > state.max_message_count {
            state.max_message_count = depth;
            CHANNEL_MESSAGES_MAX.set_max(depth as u64);
        }
        if depth >= self.config.warn_pending_messages && !state.depth_warned {
            state.depth_warned = true;
            log_warn!(
                "channel {} has {} pending messages (limit {})",
                self.base.koid(),
                depth,
                self.config.max_pending_messages
            );
        }

        self.base.update_state(Signals::empty(), Signals::READABLE);
        Ok(())
    }

    /// Write a request and block for the reply with the same txid
    ///
    /// The first four payload bytes are overwritten with a fresh kernel
    /// txid. On `RX_ERR_INTERNAL_INTR_RETRY` the waiter stays linked and
    /// the call must be finished with `resume_interrupted_call`.
    ///
    /// # Arguments
    ///
    /// * `owner` - Koid of the calling process
    /// * `msg` - Request; must be at least four bytes
    /// * `deadline` - When to give up waiting
    /// * `waiter` - Idle waiter to park on
    ///
    /// # Returns
    ///
    /// - `Ok(reply)` on success
    /// - `Err(RX_ERR_INVALID_ARGS)` if `msg` is too short to carry a txid
    /// - `Err(RX_ERR_BAD_HANDLE)` if `owner` does not own this endpoint
    /// - `Err(RX_ERR_PEER_CLOSED)` if the peer is gone or closes meanwhile
    /// - `Err(RX_ERR_SHOULD_WAIT)` if the peer's queue is full
    /// - `Err(RX_ERR_TIMED_OUT)` if no reply came before `deadline`
    /// - `Err(RX_ERR_CANCELED)` if this endpoint was closed meanwhile
    /// - `Err(RX_ERR_INTERNAL_INTR_RETRY)` if interrupted
    pub fn call(
        self: &Arc<Self>,
        owner: Koid,
        msg: MessagePacket,
        deadline: Deadline,
        waiter: &Arc<MessageWaiter>,
    ) -> Result<MessagePacket> {
        if (msg.data_size() as usize) < TXID_SIZE {
            return Err(RX_ERR_INVALID_ARGS);
        }

        let mut deferred = DeferredDrop::default();
        let result = {
            let mut endpoints = self.holder.endpoints.lock();
            self.call_locked(&mut endpoints, owner, msg, waiter, &mut deferred)
        };
        drop(deferred);
        result?;

        self.resume_interrupted_call(waiter, deadline)
    }

    fn call_locked(
        self: &Arc<Self>,
        endpoints: &mut [EndpointSlot; 2],
        owner: Koid,
        mut msg: MessagePacket,
        waiter: &Arc<MessageWaiter>,
        deferred: &mut DeferredDrop,
    ) -> Result {
        if owner != self.get_owner() {
            log_debug!("channel {} called by non-owner {}", self.base.koid(), owner);
            deferred.messages.push(msg);
            return Err(RX_ERR_BAD_HANDLE);
        }
        if endpoints[self.side].dispatcher.is_none() {
            deferred.messages.push(msg);
            return Err(RX_ERR_NOT_BOUND);
        }

        let peer = match endpoints[self.peer_side()].dispatcher() {
            Some(peer) => peer,
            None => {
                deferred.messages.push(msg);
                return Err(RX_ERR_PEER_CLOSED);
            }
        };
        deferred.dispatchers.push(peer.clone());

        let slot = &mut endpoints[self.side];
        let txid = loop {
            slot.txid = slot.txid.wrapping_add(1);
            let txid = slot.txid | KERNEL_TXID_BIT;
            if !slot.waiters.contains_txid(txid) {
                break txid;
            }
        };
        msg.set_txid(txid);

        if let Err(status) = waiter.begin_wait(self.clone(), txid, &mut slot.waiters) {
            deferred.messages.push(msg);
            return Err(status);
        }

        // Requests always go to the peer's queue; only plain writes are
        // matched against parked callers.
        if let Err(status) = peer.write_self(msg, deferred) {
            if let Some(waiter) = waiter
                .take_key()
                .and_then(|key| endpoints[self.side].waiters.remove(key))
            {
                deferred.waiters.push(waiter);
            }
            let _ = waiter.end_wait();
            return Err(status);
        }
        Ok(())
    }

    /// Finish a call, waiting on its still-linked waiter
    ///
    /// Called by `call`, and again by the caller each time the wait was
    /// interrupted.
    ///
    /// # Returns
    ///
    /// Same as `call`, past the point where the request was written, or
    /// `Err(RX_ERR_BAD_STATE)` if `waiter` is not waiting on this endpoint.
    pub fn resume_interrupted_call(
        &self,
        waiter: &Arc<MessageWaiter>,
        deadline: Deadline,
    ) -> Result<MessagePacket> {
        if !waiter.is_bound_to(self) {
            log_debug!("channel {} resumed with a foreign waiter", self.base.koid());
            return Err(RX_ERR_BAD_STATE);
        }

        if waiter.wait(deadline) == Err(RX_ERR_INTERNAL_INTR_RETRY) {
            CHANNEL_CALL_INTERRUPTED.add(1);
            return Err(RX_ERR_INTERNAL_INTR_RETRY);
        }

        // Timed out or never completed: unlink before collecting.
        let stale = {
            let mut endpoints = self.holder.endpoints.lock();
            waiter
                .take_key()
                .and_then(|key| endpoints[self.side].waiters.remove(key))
        };
        drop(stale);

        waiter.end_wait()
    }

    /// Tear down after this endpoint's last handle went away
    fn on_zero_handles_impl(&self) {
        let mut deferred = DeferredDrop::default();
        {
            let mut endpoints = self.holder.endpoints.lock();

            let own = &mut endpoints[self.side];
            while let Some(waiter) = own.waiters.pop_front() {
                waiter.cancel(RX_ERR_CANCELED);
                deferred.waiters.push(waiter);
            }
            own.dispatcher = None;

            let peer_slot = &mut endpoints[self.peer_side()];
            if let Some(peer) = peer_slot.dispatcher() {
                peer.on_peer_zero_handles_locked(&mut peer_slot.waiters, &mut deferred);
                deferred.dispatchers.push(peer);
            }

            let mut state = self.state.lock();
            state.bound = false;
            deferred.messages.extend(state.messages.drain(..));
        }

        log_debug!(
            "channel {} closed, dropping {} queued messages",
            self.base.koid(),
            deferred.messages.len()
        );
        drop(deferred);
    }

    /// Mark the peer gone; runs under the broad lock
    fn on_peer_zero_handles_locked(&self, waiters: &mut WaiterList, deferred: &mut DeferredDrop) {
        {
            let mut state = self.state.lock();
            state.peer_has_closed = true;
            self.base.update_state(Signals::WRITABLE, Signals::PEER_CLOSED);
        }

        while let Some(waiter) = waiters.pop_front() {
            waiter.cancel(RX_ERR_PEER_CLOSED);
            deferred.waiters.push(waiter);
        }
    }

    /// ========================================================================
    /// Introspection
    /// ========================================================================

    /// Number of queued messages
    pub fn message_count(&self) -> usize {
        self.state.lock().messages.len()
    }

    /// Deepest the queue has ever been
    pub fn max_message_count(&self) -> usize {
        self.state.lock().max_message_count
    }

    /// Number of callers parked on this endpoint
    pub fn waiter_count(&self) -> usize {
        self.holder.endpoints.lock()[self.side].waiters.len()
    }

    /// Check if the peer endpoint has been closed
    pub fn peer_has_closed(&self) -> bool {
        self.state.lock().peer_has_closed
    }

    /// Check if this endpoint is still live
    pub fn is_bound(&self) -> bool {
        self.state.lock().bound
    }
}

impl Dispatcher for ChannelDispatcher {
    fn base(&self) -> &DispatcherBase {
        &self.base
    }

    fn get_type(&self) -> ObjectType {
        ObjectType::Channel
    }

    fn get_related_koid(&self) -> Koid {
        self.peer_koid
    }

    fn on_zero_handles(&self) {
        self.on_zero_handles_impl();
    }

    fn set_owner(&self, owner: Koid) {
        // Moving into a message clears the owner lazily; only a real new
        // owner needs the locks.
        if owner == KOID_INVALID {
            return;
        }
        let _endpoints = self.holder.endpoints.lock();
        let _state = self.state.lock();
        self.owner.store(owner, Ordering::Release);
    }
}

impl fmt::Debug for ChannelDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelDispatcher")
            .field("koid", &self.base.koid())
            .field("peer_koid", &self.peer_koid)
            .field("owner", &self.get_owner())
            .finish()
    }
}

/// ============================================================================
/// Tests
/// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::lib::buffer_chain::BufferPool;
    use crate::kernel::object::handle::Handle;
    use crate::kernel::object::message_waiter::WaiterPhase;
    use std::thread;
    use std::time::Duration;

    const OWNER: Koid = KOID_INVALID;

    fn msg(bytes: &[u8]) -> MessagePacket {
        MessagePacket::create_kernel(bytes, Vec::new()).unwrap()
    }

    fn reply_to(request: &MessagePacket, body: &[u8]) -> MessagePacket {
        let mut bytes = request.get_txid().to_le_bytes().to_vec();
        bytes.extend_from_slice(body);
        msg(&bytes)
    }

    fn read(ch: &ChannelDispatcher) -> core::result::Result<MessagePacket, ReadError> {
        ch.read(OWNER, u32::MAX, u32::MAX, false)
    }

    #[test]
    fn test_channel_create() {
        let (h0, h1, rights) = ChannelDispatcher::create().unwrap();
        let (a, b) = (h0.dispatcher(), h1.dispatcher());
        assert_eq!(rights, Rights::CHANNEL_DEFAULT);
        assert_eq!(a.get_related_koid(), b.get_koid());
        assert_eq!(b.get_related_koid(), a.get_koid());
        assert_eq!(a.signals(), Signals::WRITABLE);
        assert_eq!(a.get_type(), ObjectType::Channel);
        assert_eq!(a.message_count(), 0);
    }

    #[test]
    fn test_invalid_config() {
        assert_eq!(
            ChannelDispatcher::create_with_config(ChannelConfig::new(0)).unwrap_err(),
            RX_ERR_INVALID_ARGS
        );
    }

    #[test]
    fn test_fifo_and_readable_signal() {
        let (h0, h1, _) = ChannelDispatcher::create().unwrap();
        let (a, b) = (h0.dispatcher(), h1.dispatcher());

        for i in 0..5u8 {
            a.write(OWNER, msg(&[i; 3])).unwrap();
        }
        assert!(b.signals().contains(Signals::READABLE));
        assert_eq!(b.message_count(), 5);
        assert_eq!(b.max_message_count(), 5);

        for i in 0..5u8 {
            assert_eq!(read(b).unwrap().data().unwrap(), [i; 3]);
        }
        assert!(!b.signals().contains(Signals::READABLE));
        assert_eq!(read(b).unwrap_err(), ReadError::Status(RX_ERR_SHOULD_WAIT));
    }

    #[test]
    fn test_buffer_too_small() {
        let (h0, h1, rights) = ChannelDispatcher::create().unwrap();
        let (a, b) = (h0.dispatcher(), h1.dispatcher());
        let (x0, _x1, _) = ChannelDispatcher::create().unwrap();

        a.write(OWNER, MessagePacket::create_kernel(&[1; 10], vec![Handle::make(x0, rights)]).unwrap())
            .unwrap();

        let too_small = ReadError::BufferTooSmall {
            bytes_avail: 10,
            handles_avail: 1,
        };
        assert_eq!(b.read(OWNER, 9, 1, false).unwrap_err(), too_small);
        assert_eq!(b.read(OWNER, 10, 0, false).unwrap_err(), too_small);
        assert_eq!(too_small.status(), RX_ERR_BUFFER_TOO_SMALL);
        assert_eq!(b.message_count(), 1);

        assert_eq!(b.read(OWNER, 0, 0, true).unwrap_err(), too_small);
        assert_eq!(b.message_count(), 0);
        assert!(!b.signals().contains(Signals::READABLE));
    }

    #[test]
    fn test_discarded_message_closes_its_handles() {
        let (h0, h1, rights) = ChannelDispatcher::create().unwrap();
        let (x0, x1, _) = ChannelDispatcher::create().unwrap();
        let x1 = x1.dispatcher().clone();

        h0.dispatcher()
            .write(OWNER, MessagePacket::create_kernel(b"carry", vec![Handle::make(x0, rights)]).unwrap())
            .unwrap();
        assert!(!x1.peer_has_closed());

        h1.dispatcher().read(OWNER, 0, 0, true).unwrap_err();
        assert!(x1.peer_has_closed());
        assert!(x1.signals().contains(Signals::PEER_CLOSED));
    }

    #[test]
    fn test_backpressure() {
        let (h0, h1, _) = ChannelDispatcher::create_with_config(ChannelConfig::new(2)).unwrap();
        let (a, b) = (h0.dispatcher(), h1.dispatcher());

        a.write(OWNER, msg(b"1")).unwrap();
        a.write(OWNER, msg(b"2")).unwrap();
        let before = CHANNEL_FULL.get();
        assert_eq!(a.write(OWNER, msg(b"3")), Err(RX_ERR_SHOULD_WAIT));
        assert!(CHANNEL_FULL.get() > before);
        assert_eq!(b.message_count(), 2);
        assert!(CHANNEL_MESSAGES_MAX.get() >= 2);

        read(b).unwrap();
        a.write(OWNER, msg(b"3")).unwrap();
        assert_eq!(read(b).unwrap().data().unwrap(), b"2");
        assert_eq!(read(b).unwrap().data().unwrap(), b"3");
    }

    #[test]
    fn test_peer_close_keeps_queue_readable() {
        let (h0, h1, _) = ChannelDispatcher::create().unwrap();
        let b = h1.dispatcher().clone();

        h0.dispatcher().write(OWNER, msg(b"last words")).unwrap();
        drop(h0);

        assert!(b.peer_has_closed());
        assert!(b.signals().contains(Signals::PEER_CLOSED | Signals::READABLE));
        assert!(!b.signals().contains(Signals::WRITABLE));

        assert_eq!(read(&b).unwrap().data().unwrap(), b"last words");
        assert_eq!(read(&b).unwrap_err(), ReadError::Status(RX_ERR_PEER_CLOSED));
        assert_eq!(b.write(OWNER, msg(b"hello?")), Err(RX_ERR_PEER_CLOSED));
        drop(h1);
    }

    #[test]
    fn test_torn_down_endpoint_is_not_bound() {
        let (h0, h1, _) = ChannelDispatcher::create().unwrap();
        let a = h0.dispatcher().clone();
        h1.dispatcher().write(OWNER, msg(b"queued")).unwrap();

        drop(h0);
        assert!(!a.is_bound());
        assert_eq!(a.message_count(), 0);
        assert_eq!(read(&a).unwrap_err(), ReadError::Status(RX_ERR_NOT_BOUND));
        assert_eq!(a.write(OWNER, msg(b"x")), Err(RX_ERR_NOT_BOUND));
        assert_eq!(h1.dispatcher().message_count(), 0);
        drop(h1);
    }

    #[test]
    fn test_owner_checks() {
        let (h0, h1, _) = ChannelDispatcher::create().unwrap();
        let (a, b) = (h0.dispatcher(), h1.dispatcher());

        a.set_owner(42);
        assert_eq!(a.get_owner(), 42);
        assert_eq!(a.write(7, msg(b"x")), Err(RX_ERR_BAD_HANDLE));
        a.write(42, msg(b"x")).unwrap();

        b.set_owner(43);
        assert_eq!(b.read(42, 64, 0, false).unwrap_err(), ReadError::Status(RX_ERR_BAD_HANDLE));
        assert_eq!(b.message_count(), 1);
        b.read(43, 64, 0, false).unwrap();

        // Clearing the owner is a no-op.
        a.set_owner(KOID_INVALID);
        assert_eq!(a.get_owner(), 42);

        let waiter = Arc::new(MessageWaiter::new());
        assert_eq!(
            a.call(7, msg(b"abcd"), Deadline::infinite(), &waiter).unwrap_err(),
            RX_ERR_BAD_HANDLE
        );
        assert!(!waiter.is_bound());
    }

    #[test]
    fn test_call_round_trip() {
        let (h0, h1, _) = ChannelDispatcher::create().unwrap();
        let a = h0.dispatcher().clone();
        let b = h1.dispatcher().clone();

        let server = thread::spawn(move || loop {
            match read(&b) {
                Ok(request) => {
                    let txid = request.get_txid();
                    b.write(OWNER, reply_to(&request, b"pong")).unwrap();
                    return txid;
                }
                Err(_) => thread::sleep(Duration::from_millis(1)),
            }
        });

        let waiter = Arc::new(MessageWaiter::new());
        let reply = a.call(OWNER, msg(b"\0\0\0\0ping"), Deadline::infinite(), &waiter).unwrap();
        let txid = server.join().unwrap();

        assert_ne!(txid & KERNEL_TXID_BIT, 0);
        assert_eq!(reply.get_txid(), txid);
        assert_eq!(&reply.data().unwrap()[4..], b"pong");
        assert_eq!(waiter.phase(), WaiterPhase::Unlinked);
        assert_eq!(a.waiter_count(), 0);
        // The reply bypassed the queue.
        assert_eq!(a.message_count(), 0);
    }

    #[test]
    fn test_call_rejects_short_message() {
        let (h0, _h1, _) = ChannelDispatcher::create().unwrap();
        let waiter = Arc::new(MessageWaiter::new());
        assert_eq!(
            h0.dispatcher()
                .call(OWNER, msg(b"abc"), Deadline::infinite(), &waiter)
                .unwrap_err(),
            RX_ERR_INVALID_ARGS
        );
        assert!(!waiter.is_bound());
    }

    #[test]
    fn test_call_on_closed_peer() {
        let (h0, h1, _) = ChannelDispatcher::create().unwrap();
        drop(h1);
        let waiter = Arc::new(MessageWaiter::new());
        assert_eq!(
            h0.dispatcher()
                .call(OWNER, msg(b"abcd"), Deadline::infinite(), &waiter)
                .unwrap_err(),
            RX_ERR_PEER_CLOSED
        );
        assert!(!waiter.is_bound());
        assert_eq!(h0.dispatcher().waiter_count(), 0);
    }

    #[test]
    fn test_call_full_peer_unlinks_waiter() {
        let (h0, h1, _) = ChannelDispatcher::create_with_config(ChannelConfig::new(1)).unwrap();
        let a = h0.dispatcher();
        a.write(OWNER, msg(b"fill")).unwrap();

        let waiter = Arc::new(MessageWaiter::new());
        assert_eq!(
            a.call(OWNER, msg(b"abcd"), Deadline::infinite(), &waiter).unwrap_err(),
            RX_ERR_SHOULD_WAIT
        );
        assert!(!waiter.is_bound());
        assert_eq!(a.waiter_count(), 0);

        // The waiter is reusable.
        read(h1.dispatcher()).unwrap();
        let b = h1.dispatcher().clone();
        let server = thread::spawn(move || loop {
            if let Ok(request) = read(&b) {
                b.write(OWNER, reply_to(&request, b"ok")).unwrap();
                return;
            }
            thread::sleep(Duration::from_millis(1));
        });
        let reply = a.call(OWNER, msg(b"abcd"), Deadline::infinite(), &waiter).unwrap();
        assert_eq!(&reply.data().unwrap()[4..], b"ok");
        server.join().unwrap();
    }

    #[test]
    fn test_call_timeout_then_late_reply_is_queued() {
        let (h0, h1, _) = ChannelDispatcher::create().unwrap();
        let (a, b) = (h0.dispatcher(), h1.dispatcher());

        let waiter = Arc::new(MessageWaiter::new());
        assert_eq!(
            a.call(OWNER, msg(b"abcd"), Deadline::after(Duration::from_millis(10)), &waiter)
                .unwrap_err(),
            RX_ERR_TIMED_OUT
        );
        assert_eq!(a.waiter_count(), 0);
        assert!(!waiter.is_bound());

        let request = read(b).unwrap();
        b.write(OWNER, reply_to(&request, b"late")).unwrap();
        let late = read(a).unwrap();
        assert_eq!(late.get_txid(), request.get_txid());
    }

    #[test]
    fn test_interrupted_call_resumes() {
        let (h0, h1, _) = ChannelDispatcher::create().unwrap();
        let (a, b) = (h0.dispatcher(), h1.dispatcher());

        let waiter = Arc::new(MessageWaiter::new());
        waiter.interrupt();
        let before = CHANNEL_CALL_INTERRUPTED.get();
        assert_eq!(
            a.call(OWNER, msg(b"abcd"), Deadline::infinite(), &waiter).unwrap_err(),
            RX_ERR_INTERNAL_INTR_RETRY
        );
        assert!(CHANNEL_CALL_INTERRUPTED.get() > before);
        assert!(waiter.is_linked());
        assert_eq!(a.waiter_count(), 1);

        let request = read(b).unwrap();
        b.write(OWNER, reply_to(&request, b"resumed")).unwrap();
        assert_eq!(a.waiter_count(), 0);

        let reply = a.resume_interrupted_call(&waiter, Deadline::infinite()).unwrap();
        assert_eq!(&reply.data().unwrap()[4..], b"resumed");
    }

    #[test]
    fn test_interrupted_call_cancelled_by_own_close() {
        let (h0, _h1, _) = ChannelDispatcher::create().unwrap();
        let a = h0.dispatcher().clone();

        let waiter = Arc::new(MessageWaiter::new());
        waiter.interrupt();
        assert_eq!(
            a.call(OWNER, msg(b"abcd"), Deadline::infinite(), &waiter).unwrap_err(),
            RX_ERR_INTERNAL_INTR_RETRY
        );

        drop(h0);
        assert_eq!(
            a.resume_interrupted_call(&waiter, Deadline::infinite()).unwrap_err(),
            RX_ERR_CANCELED
        );
        assert!(!waiter.is_bound());
    }

    #[test]
    fn test_peer_close_cancels_callers() {
        let (h0, h1, _) = ChannelDispatcher::create().unwrap();
        let a = h0.dispatcher().clone();

        let callers: Vec<_> = (0..4)
            .map(|_| {
                let a = a.clone();
                thread::spawn(move || {
                    let waiter = Arc::new(MessageWaiter::new());
                    a.call(OWNER, msg(b"abcd"), Deadline::infinite(), &waiter)
                })
            })
            .collect();

        while a.waiter_count() < 4 {
            thread::sleep(Duration::from_millis(1));
        }
        drop(h1);

        for caller in callers {
            assert_eq!(caller.join().unwrap().unwrap_err(), RX_ERR_PEER_CLOSED);
        }
        assert_eq!(a.waiter_count(), 0);
        drop(h0);
    }

    #[test]
    fn test_txids_unique_while_waiting() {
        let (h0, h1, _) = ChannelDispatcher::create().unwrap();
        let (a, b) = (h0.dispatcher(), h1.dispatcher());

        let waiters: Vec<_> = (0..3).map(|_| Arc::new(MessageWaiter::new())).collect();
        for waiter in &waiters {
            waiter.interrupt();
            a.call(OWNER, msg(b"abcd"), Deadline::infinite(), waiter).unwrap_err();
        }

        let mut txids: Vec<_> = waiters.iter().map(|w| w.txid()).collect();
        txids.sort_unstable();
        txids.dedup();
        assert_eq!(txids.len(), 3);
        assert!(txids.iter().all(|t| t & KERNEL_TXID_BIT != 0));

        // Replies in reverse order still reach the right waiter.
        let requests: Vec<_> = (0..3).map(|_| read(b).unwrap()).collect();
        for (i, request) in requests.iter().enumerate().rev() {
            b.write(OWNER, reply_to(request, &[i as u8])).unwrap();
        }
        for (i, waiter) in waiters.iter().enumerate() {
            let reply = a.resume_interrupted_call(waiter, Deadline::infinite()).unwrap();
            assert_eq!(reply.data().unwrap()[4], i as u8);
        }
    }

    #[test]
    fn test_crossing_calls_queue_requests() {
        let (h0, h1, _) = ChannelDispatcher::create().unwrap();
        let (a, b) = (h0.dispatcher(), h1.dispatcher());

        // Both ends hand out the same first txid.
        let wa = Arc::new(MessageWaiter::new());
        wa.interrupt();
        a.call(OWNER, msg(b"\0\0\0\0from a"), Deadline::infinite(), &wa).unwrap_err();
        let wb = Arc::new(MessageWaiter::new());
        wb.interrupt();
        b.call(OWNER, msg(b"\0\0\0\0from b"), Deadline::infinite(), &wb).unwrap_err();
        assert_eq!(wa.txid(), wb.txid());

        // Neither request was taken as the other side's reply.
        assert_eq!(wa.phase(), WaiterPhase::Waiting);
        assert_eq!(wb.phase(), WaiterPhase::Waiting);
        assert_eq!(a.message_count(), 1);
        assert_eq!(b.message_count(), 1);

        let for_a = read(a).unwrap();
        let for_b = read(b).unwrap();
        assert_eq!(&for_a.data().unwrap()[4..], b"from b");
        assert_eq!(&for_b.data().unwrap()[4..], b"from a");

        a.write(OWNER, reply_to(&for_a, b"a answers")).unwrap();
        b.write(OWNER, reply_to(&for_b, b"b answers")).unwrap();

        let reply_a = a.resume_interrupted_call(&wa, Deadline::infinite()).unwrap();
        let reply_b = b.resume_interrupted_call(&wb, Deadline::infinite()).unwrap();
        assert_eq!(&reply_a.data().unwrap()[4..], b"b answers");
        assert_eq!(&reply_b.data().unwrap()[4..], b"a answers");
        assert_eq!(a.message_count(), 0);
        assert_eq!(b.message_count(), 0);
    }

    #[test]
    fn test_resume_on_wrong_endpoint() {
        let (h0, h1, _) = ChannelDispatcher::create().unwrap();
        let (a, b) = (h0.dispatcher(), h1.dispatcher());

        let wa = Arc::new(MessageWaiter::new());
        wa.interrupt();
        a.call(OWNER, msg(b"abcd"), Deadline::infinite(), &wa).unwrap_err();
        let wb = Arc::new(MessageWaiter::new());
        wb.interrupt();
        b.call(OWNER, msg(b"abcd"), Deadline::infinite(), &wb).unwrap_err();

        assert_eq!(
            b.resume_interrupted_call(&wa, Deadline::infinite()).unwrap_err(),
            RX_ERR_BAD_STATE
        );
        assert_eq!(
            b.resume_interrupted_call(&Arc::new(MessageWaiter::new()), Deadline::infinite())
                .unwrap_err(),
            RX_ERR_BAD_STATE
        );
        assert!(wa.is_linked());
        assert!(wb.is_linked());
        assert_eq!(a.waiter_count(), 1);
        assert_eq!(b.waiter_count(), 1);

        // Both calls still complete on their own endpoints.
        let request_from_a = read(b).unwrap();
        b.write(OWNER, reply_to(&request_from_a, b"to a")).unwrap();
        let reply = a.resume_interrupted_call(&wa, Deadline::infinite()).unwrap();
        assert_eq!(&reply.data().unwrap()[4..], b"to a");

        let request_from_b = read(a).unwrap();
        a.write(OWNER, reply_to(&request_from_b, b"to b")).unwrap();
        let reply = b.resume_interrupted_call(&wb, Deadline::infinite()).unwrap();
        assert_eq!(&reply.data().unwrap()[4..], b"to b");
    }

    #[test]
    fn test_teardown_returns_buffers() {
        let pool = Arc::new(BufferPool::with_limit(64));
        let (h0, h1, _) = ChannelDispatcher::create().unwrap();
        for _ in 0..8 {
            let m = MessagePacket::create_kernel_in(&pool, &[0u8; 5000], Vec::new()).unwrap();
            h0.dispatcher().write(OWNER, m).unwrap();
        }
        assert_eq!(pool.outstanding(), 16);

        drop(h0);
        assert_eq!(pool.outstanding(), 16);
        drop(h1);
        assert_eq!(pool.outstanding(), 0);
    }

    #[test]
    fn test_message_carrying_own_channel_endpoint() {
        let (h0, h1, rights) = ChannelDispatcher::create().unwrap();
        let a = h0.dispatcher().clone();
        let b = h1.dispatcher().clone();

        // Endpoint 1 travels inside a message queued on endpoint 0; tearing
        // down endpoint 0 closes it without re-entering the held locks.
        b.write(OWNER, MessagePacket::create_kernel(b"self", vec![Handle::make(h1, rights)]).unwrap())
            .unwrap();
        assert!(b.is_bound());
        assert_eq!(a.message_count(), 1);

        drop(h0);
        assert!(!a.is_bound());
        assert!(!b.is_bound());
    }
}
