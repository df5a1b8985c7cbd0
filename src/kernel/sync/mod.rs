// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Kernel Synchronization Primitives
//!
//! # Primitives
//!
//! - **Event**: status-carrying signal a thread can block on
//!
//! Plain mutual exclusion uses `spin::Mutex` directly; see the channel
//! module for the lock ordering rules.

pub mod event;

pub use event::{Event, EventFlags};
