// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Rustux Channel IPC
//!
//! Zircon-style channels from the Rustux microkernel: a bidirectional,
//! bounded pair of endpoints with fire-and-forget writes, non-blocking
//! reads and transacted calls, whose payloads live in paged buffer chains.
//!
//! # Usage
//!
//! ```rust
//! use std::sync::Arc;
//! use std::thread;
//!
//! use rustux_channel::{ChannelDispatcher, MessagePacket, MessageWaiter};
//! use rustux_channel::rustux::{Deadline, KOID_INVALID};
//!
//! let (client, server, _rights) = ChannelDispatcher::create().unwrap();
//! let server = server.dispatcher().clone();
//!
//! let echo = thread::spawn(move || loop {
//!     if let Ok(request) = server.read(KOID_INVALID, 1024, 0, false) {
//!         let reply = MessagePacket::create_kernel(&request.data().unwrap(), Vec::new()).unwrap();
//!         server.write(KOID_INVALID, reply).unwrap();
//!         break;
//!     }
//!     thread::yield_now();
//! });
//!
//! let waiter = Arc::new(MessageWaiter::new());
//! let request = MessagePacket::create_kernel(b"\0\0\0\0echo", Vec::new()).unwrap();
//! let reply = client
//!     .dispatcher()
//!     .call(KOID_INVALID, request, Deadline::infinite(), &waiter)
//!     .unwrap();
//! assert_eq!(&reply.data().unwrap()[4..], b"echo");
//! echo.join().unwrap();
//! ```

extern crate alloc;

// Common types
pub mod rustux;

// Kernel modules
pub mod kernel;

pub use kernel::config::ChannelConfig;
pub use kernel::lib::buffer_chain::{BufferChain, BufferPool};
pub use kernel::object::{
    ChannelDispatcher, Handle, KernelHandle, MessagePacket, MessageWaiter, ReadError, Rights,
    Signals,
};
pub use rustux::types::{Deadline, Koid, Result, Status, Txid};
