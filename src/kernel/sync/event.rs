// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Kernel Event
//!
//! An event lets one thread block until another signals it. The signal
//! carries a status, so the waker can tell the sleeper why it woke.
//!
//! # Design
//!
//! - **Manual reset**: the event stays signaled until `unsignal`
//! - **Auto reset**: with `EventFlags::AUTO_UNSIGNAL` the first waiter to
//!   observe the signal consumes it
//! - **Interruptible**: `interrupt` wakes a waiter with
//!   `RX_ERR_INTERNAL_INTR_RETRY` without signaling; a pending signal
//!   always wins over a pending interrupt
//!
//! # Usage
//!
//! ```rust
//! use rustux_channel::kernel::sync::event::{Event, EventFlags};
//! use rustux_channel::rustux::{Deadline, RX_OK};
//!
//! let event = Event::new(false, EventFlags::empty());
//! event.signal(RX_OK);
//! assert_eq!(event.wait(Deadline::infinite()), Ok(()));
//! event.unsignal();
//! ```

use bitflags::bitflags;
use parking_lot::{Condvar, Mutex};

use crate::rustux::types::err::*;
use crate::rustux::types::{Deadline, Result, Status};

// ============================================================================
// Event Flags
// ============================================================================

bitflags! {
    /// Event behavior flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct EventFlags: u32 {
        /// Unsignal after waking one waiter
        const AUTO_UNSIGNAL = 0x01;
    }
}

/// ============================================================================
/// Event
/// ============================================================================

#[derive(Debug)]
struct EventState {
    /// Status of the pending signal, if signaled
    signal: Option<Status>,

    /// A waiter should return for a retry
    interrupted: bool,
}

/// Event synchronization primitive
#[derive(Debug)]
pub struct Event {
    flags: EventFlags,
    state: Mutex<EventState>,
    cond: Condvar,
}

impl Event {
    /// Create a new event
    ///
    /// # Arguments
    ///
    /// * `initial` - Start signaled (with `RX_OK`)
    /// * `flags` - Event flags
    pub fn new(initial: bool, flags: EventFlags) -> Self {
        Self {
            flags,
            state: Mutex::new(EventState {
                signal: if initial { Some(RX_OK) } else { None },
                interrupted: false,
            }),
            cond: Condvar::new(),
        }
    }

    /// Get the event flags
    pub fn flags(&self) -> EventFlags {
        self.flags
    }

    /// Check if the event is signaled
    pub fn is_signaled(&self) -> bool {
        self.state.lock().signal.is_some()
    }

    /// Signal the event with `status` and wake all waiters
    ///
    /// Signaling an already signaled event keeps the first status.
    pub fn signal(&self, status: Status) {
        let mut state = self.state.lock();
        if state.signal.is_none() {
            state.signal = Some(status);
        }
        drop(state);
        self.cond.notify_all();
    }

    /// Clear a pending signal
    pub fn unsignal(&self) {
        self.state.lock().signal = None;
    }

    /// Wake waiters for a retry without signaling
    ///
    /// The interrupt stays pending until one `wait` consumes it.
    pub fn interrupt(&self) {
        self.state.lock().interrupted = true;
        self.cond.notify_all();
    }

    /// Wait until signaled, interrupted or past `deadline`
    ///
    /// # Returns
    ///
    /// - `Ok(())` if signaled with `RX_OK`
    /// - `Err(status)` if signaled with an error status
    /// - `Err(RX_ERR_INTERNAL_INTR_RETRY)` if interrupted
    /// - `Err(RX_ERR_TIMED_OUT)` if the deadline passed first
    pub fn wait(&self, deadline: Deadline) -> Result {
        let mut state = self.state.lock();
        loop {
            if let Some(status) = state.signal {
                if self.flags.contains(EventFlags::AUTO_UNSIGNAL) {
                    state.signal = None;
                }
                return if status == RX_OK { Ok(()) } else { Err(status) };
            }

            if state.interrupted {
                state.interrupted = false;
                return Err(RX_ERR_INTERNAL_INTR_RETRY);
            }

            match deadline.when() {
                None => self.cond.wait(&mut state),
                Some(when) => {
                    if self.cond.wait_until(&mut state, when).timed_out()
                        && state.signal.is_none()
                        && !state.interrupted
                    {
                        return Err(RX_ERR_TIMED_OUT);
                    }
                }
            }
        }
    }
}

impl Default for Event {
    fn default() -> Self {
        Self::new(false, EventFlags::empty())
    }
}
