// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Waiter Lists
//!
//! FIFO of message waiters parked on one channel endpoint. Nodes live in a
//! slab and link to each other by index, so a waiter can be unlinked from
//! the middle of the list in O(1) given the key it was handed on insert.
//!
//! The list is always accessed under the channel's broad lock.

use alloc::sync::Arc;

use slab::Slab;

use crate::kernel::object::message_waiter::MessageWaiter;
use crate::rustux::types::Txid;

/// Stable position of a waiter in its list
pub type WaiterKey = usize;

struct Node {
    waiter: Arc<MessageWaiter>,
    txid: Txid,
    prev: Option<WaiterKey>,
    next: Option<WaiterKey>,
}

/// Slab-backed doubly-linked list of waiters
#[derive(Default)]
pub struct WaiterList {
    nodes: Slab<Node>,
    head: Option<WaiterKey>,
    tail: Option<WaiterKey>,
}

impl WaiterList {
    /// Create an empty list
    pub fn new() -> Self {
        Self {
            nodes: Slab::new(),
            head: None,
            tail: None,
        }
    }

    /// Number of linked waiters
    #[inline]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns `true` if no waiter is linked
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Link `waiter`, waiting for `txid`, at the back of the list
    ///
    /// Returns the key needed to unlink it later.
    pub fn push_back(&mut self, waiter: Arc<MessageWaiter>, txid: Txid) -> WaiterKey {
        let key = self.nodes.insert(Node {
            waiter,
            txid,
            prev: self.tail,
            next: None,
        });
        match self.tail {
            Some(tail) => self.nodes[tail].next = Some(key),
            None => self.head = Some(key),
        }
        self.tail = Some(key);
        key
    }

    /// Unlink the waiter at `key`
    ///
    /// Returns `None` if nothing is linked there.
    pub fn remove(&mut self, key: WaiterKey) -> Option<Arc<MessageWaiter>> {
        let node = self.nodes.try_remove(key)?;
        match node.prev {
            Some(prev) => self.nodes[prev].next = node.next,
            None => self.head = node.next,
        }
        match node.next {
            Some(next) => self.nodes[next].prev = node.prev,
            None => self.tail = node.prev,
        }
        Some(node.waiter)
    }

    /// Unlink and return the oldest waiter
    pub fn pop_front(&mut self) -> Option<Arc<MessageWaiter>> {
        let head = self.head?;
        self.remove(head)
    }

    /// Find the first waiter waiting for `txid`
    pub fn find_txid(&self, txid: Txid) -> Option<WaiterKey> {
        self.keys().find(|&key| self.nodes[key].txid == txid)
    }

    /// Returns `true` if some waiter is waiting for `txid`
    pub fn contains_txid(&self, txid: Txid) -> bool {
        self.find_txid(txid).is_some()
    }

    /// Iterate over the waiters, oldest first
    pub fn iter(&self) -> impl Iterator<Item = &Arc<MessageWaiter>> + '_ {
        self.keys().map(move |key| &self.nodes[key].waiter)
    }

    fn keys(&self) -> impl Iterator<Item = WaiterKey> + '_ {
        core::iter::successors(self.head, move |&key| self.nodes[key].next)
    }
}
