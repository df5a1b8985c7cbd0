// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Kernel Counters
//!
//! System-wide named counters for diagnostics. Counters are statics that
//! the hot paths bump with a single relaxed atomic; the registry below
//! lists them for an introspection surface.

use core::sync::atomic::{AtomicU64, Ordering};

/// Counter types
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterType {
    /// Monotonic running total
    Sum = 0,
    /// High-water mark
    Max = 1,
}

/// Counter descriptor
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterDesc {
    /// Counter name
    pub name: &'static str,
    /// Counter type
    pub counter_type: CounterType,
}

/// A named counter
#[derive(Debug)]
pub struct Counter {
    desc: CounterDesc,
    value: AtomicU64,
}

impl Counter {
    /// Create a new counter
    pub const fn new(name: &'static str, counter_type: CounterType) -> Self {
        Self {
            desc: CounterDesc { name, counter_type },
            value: AtomicU64::new(0),
        }
    }

    /// Get the descriptor
    pub const fn desc(&self) -> &CounterDesc {
        &self.desc
    }

    /// Add `value` to a Sum counter
    pub fn add(&self, value: u64) {
        debug_assert_eq!(self.desc.counter_type, CounterType::Sum);
        self.value.fetch_add(value, Ordering::Relaxed);
    }

    /// Raise a Max counter to `value` if it is larger
    pub fn set_max(&self, value: u64) {
        debug_assert_eq!(self.desc.counter_type, CounterType::Max);
        self.value.fetch_max(value, Ordering::Relaxed);
    }

    /// Get the current value
    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Writes rejected because the peer queue was full
pub static CHANNEL_FULL: Counter = Counter::new("channel.full", CounterType::Sum);

/// Deepest queue observed on any channel endpoint
pub static CHANNEL_MESSAGES_MAX: Counter = Counter::new("channel.messages.max", CounterType::Max);

/// Calls that returned early because the caller was suspended
pub static CHANNEL_CALL_INTERRUPTED: Counter =
    Counter::new("channel.call.interrupted", CounterType::Sum);

/// Every counter defined by the kernel, sorted by name
static ALL_COUNTERS: [&Counter; 3] = [
    &CHANNEL_CALL_INTERRUPTED,
    &CHANNEL_FULL,
    &CHANNEL_MESSAGES_MAX,
];

/// Get every registered counter
pub fn all_counters() -> &'static [&'static Counter] {
    &ALL_COUNTERS
}

/// Get the number of registered counters
pub fn get_num_counters() -> usize {
    ALL_COUNTERS.len()
}

/// Find counters matching a prefix
pub fn find_counters_by_prefix(prefix: &str) -> impl Iterator<Item = &'static Counter> + '_ {
    ALL_COUNTERS
        .iter()
        .copied()
        .filter(move |counter| counter.desc.name.starts_with(prefix))
}

/// Look up a counter value by exact name
pub fn counter_value(name: &str) -> Option<u64> {
    ALL_COUNTERS
        .iter()
        .find(|counter| counter.desc.name == name)
        .map(|counter| counter.get())
}
