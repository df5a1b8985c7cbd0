// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Kernel Library Module
//!
//! Data structures and diagnostics shared by the kernel subsystems.

pub mod buffer_chain;
pub mod counters;

pub use buffer_chain::{BufferChain, BufferPool};
