// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Channel Tunables
//!
//! Compile-time limits shared by the channel subsystem, plus the
//! per-channel queue configuration.

use crate::rustux::types::err::*;
use crate::rustux::types::Result;

/// Page size (4KB)
pub const PAGE_SIZE: usize = 4096;

/// Maximum message payload size in bytes
pub const MAX_MESSAGE_SIZE: u32 = 64 * 1024;

/// Maximum handles per message
pub const MAX_MESSAGE_HANDLES: u32 = 64;

/// Default maximum number of messages pending on one endpoint
pub const MAX_PENDING_MESSAGE_COUNT: usize = 3500;

/// Queue depth at which a channel starts warning
pub const WARN_PENDING_MESSAGE_COUNT: usize = MAX_PENDING_MESSAGE_COUNT / 2;

/// Per-channel queue configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelConfig {
    /// Writes beyond this many queued messages are rejected
    pub max_pending_messages: usize,

    /// Queue depth that triggers a one-time warning
    pub warn_pending_messages: usize,
}

impl ChannelConfig {
    /// Create a configuration with the given cap and a warning at half of it
    pub const fn new(max_pending_messages: usize) -> Self {
        Self {
            max_pending_messages,
            warn_pending_messages: max_pending_messages / 2,
        }
    }

    /// Validate the configuration
    ///
    /// # Returns
    ///
    /// - `Ok(())` if usable
    /// - `Err(RX_ERR_INVALID_ARGS)` if the cap is zero or the warning
    ///   threshold exceeds it
    pub fn validate(&self) -> Result {
        if self.max_pending_messages == 0 || self.warn_pending_messages > self.max_pending_messages {
            return Err(RX_ERR_INVALID_ARGS);
        }
        Ok(())
    }
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            max_pending_messages: MAX_PENDING_MESSAGE_COUNT,
            warn_pending_messages: WARN_PENDING_MESSAGE_COUNT,
        }
    }
}
