// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Kernel Objects & IPC (Zircon-style)
//!
//! Kernel objects are reached through handles with rights. The only object
//! type here is the channel endpoint, together with the pieces a channel
//! message is built from.
//!
//! # Modules
//!
//! - [`handle`] - Handle, rights and dispatcher model
//! - [`message_packet`] - One message: payload chain plus handles
//! - [`waiter_list`] - Per-endpoint list of parked callers
//! - [`message_waiter`] - Rendezvous for a transacted call
//! - [`channel`] - IPC channels

pub mod channel;
pub mod handle;
pub mod message_packet;
pub mod message_waiter;
pub mod waiter_list;

// Re-exports
pub use channel::{ChannelDispatcher, ReadError};
pub use handle::{Dispatcher, DispatcherBase, Handle, KernelHandle, ObjectType, Rights, Signals};
pub use message_packet::MessagePacket;
pub use message_waiter::{MessageWaiter, WaiterPhase};
