// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Rustux Microkernel - Channel Subsystem
//!
//! The kernel side of channel IPC: configuration, logging, caller memory
//! access, synchronization and the channel objects themselves.

pub mod config;
pub mod debug;
pub mod lib;
pub mod object;
pub mod sync;
pub mod usercopy;
