// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Message Packets
//!
//! A `MessagePacket` is one channel message: a payload held in a
//! `BufferChain` plus the handles travelling with it.
//!
//! # Layout
//!
//! ```text
//! chain offset 0             PAYLOAD_OFFSET
//! +--------------------------+-----------------------------------+
//! | data_size u32 | nh u16 | | txid u32 | rest of payload ...    |
//! +--------------------------+-----------------------------------+
//! ```
//!
//! The header is reserved with `skip` and stamped once the payload has
//! been copied in. The transaction id is the first four payload bytes in
//! little endian; shorter payloads have txid 0.

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt;

use crate::kernel::config::{MAX_MESSAGE_HANDLES, MAX_MESSAGE_SIZE};
use crate::kernel::lib::buffer_chain::{BufferChain, BufferPool};
use crate::kernel::object::handle::Handle;
use crate::kernel::usercopy::{UserInPtr, UserOutPtr};
use crate::rustux::types::err::*;
use crate::rustux::types::{Result, Txid};

/// Bytes reserved in front of the payload for the message header
pub const PAYLOAD_OFFSET: usize = 8;

/// Size of the transaction id prefix
pub const TXID_SIZE: usize = core::mem::size_of::<Txid>();

/// One channel message
pub struct MessagePacket {
    chain: BufferChain,
    data_size: u32,
    handles: Vec<Handle>,
}

impl MessagePacket {
    /// Build a message from a caller buffer, using the global pool
    ///
    /// # Arguments
    ///
    /// * `data` - Source of the payload
    /// * `data_size` - Payload length in bytes
    /// * `handles` - Handles to carry
    ///
    /// # Returns
    ///
    /// - `Ok(packet)` on success
    /// - `Err(RX_ERR_OUT_OF_RANGE)` if the payload or handle count is too large
    /// - `Err(RX_ERR_NO_MEMORY)` if buffers cannot be allocated
    /// - `Err(RX_ERR_INVALID_ARGS)` if `data` cannot supply `data_size` bytes
    pub fn create(data: UserInPtr<'_>, data_size: u32, handles: Vec<Handle>) -> Result<Self> {
        Self::create_in(&BufferPool::global(), data, data_size, handles)
    }

    /// Build a message whose buffers come from `pool`
    pub fn create_in(
        pool: &Arc<BufferPool>,
        data: UserInPtr<'_>,
        data_size: u32,
        handles: Vec<Handle>,
    ) -> Result<Self> {
        if data_size > MAX_MESSAGE_SIZE || handles.len() > MAX_MESSAGE_HANDLES as usize {
            return Err(RX_ERR_OUT_OF_RANGE);
        }

        let len = data_size as usize;
        let mut chain = BufferChain::alloc_in(pool, PAYLOAD_OFFSET + len)?;
        chain.skip(PAYLOAD_OFFSET)?;
        chain.append(data, len)?;
        chain.free_unused_buffers();

        let mut header = [0u8; PAYLOAD_OFFSET];
        header[0..4].copy_from_slice(&data_size.to_le_bytes());
        header[4..6].copy_from_slice(&(handles.len() as u16).to_le_bytes());
        chain.overwrite(0, &header)?;

        Ok(Self {
            chain,
            data_size,
            handles,
        })
    }

    /// Build a message from kernel-owned bytes
    pub fn create_kernel(data: &[u8], handles: Vec<Handle>) -> Result<Self> {
        Self::create_kernel_in(&BufferPool::global(), data, handles)
    }

    /// Build a message from kernel-owned bytes with buffers from `pool`
    pub fn create_kernel_in(
        pool: &Arc<BufferPool>,
        data: &[u8],
        handles: Vec<Handle>,
    ) -> Result<Self> {
        let data_size = u32::try_from(data.len()).map_err(|_| RX_ERR_OUT_OF_RANGE)?;
        Self::create_in(pool, UserInPtr::new(data), data_size, handles)
    }

    /// Payload length in bytes
    pub fn data_size(&self) -> u32 {
        self.data_size
    }

    /// Number of handles carried
    pub fn num_handles(&self) -> u32 {
        self.handles.len() as u32
    }

    /// Transaction id, or 0 for payloads shorter than a txid
    pub fn get_txid(&self) -> Txid {
        if (self.data_size as usize) < TXID_SIZE {
            return 0;
        }
        let mut bytes = [0u8; TXID_SIZE];
        match self.chain.copy_out_kernel(&mut bytes, PAYLOAD_OFFSET) {
            Ok(()) => Txid::from_le_bytes(bytes),
            Err(_) => 0,
        }
    }

    /// Overwrite the transaction id; no-op for payloads shorter than a txid
    pub fn set_txid(&mut self, txid: Txid) {
        if (self.data_size as usize) < TXID_SIZE {
            return;
        }
        // The txid lies inside the appended payload, so this cannot fail.
        let _ = self.chain.overwrite(PAYLOAD_OFFSET, &txid.to_le_bytes());
    }

    /// Copy the payload out to a caller buffer
    pub fn copy_data_to(&self, dst: &mut UserOutPtr<'_>) -> Result {
        self.chain
            .copy_out(dst, PAYLOAD_OFFSET, self.data_size as usize)
    }

    /// Owned copy of the payload
    pub fn data(&self) -> Result<Vec<u8>> {
        let mut bytes = vec![0u8; self.data_size as usize];
        self.chain.copy_out_kernel(&mut bytes, PAYLOAD_OFFSET)?;
        Ok(bytes)
    }

    /// Handles carried by the message
    pub fn handles(&self) -> &[Handle] {
        &self.handles
    }

    /// Move the handles out of the message
    pub fn take_handles(&mut self) -> Vec<Handle> {
        core::mem::take(&mut self.handles)
    }

    /// The backing buffer chain
    pub fn chain(&self) -> &BufferChain {
        &self.chain
    }
}

impl fmt::Debug for MessagePacket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessagePacket")
            .field("data_size", &self.data_size)
            .field("num_handles", &self.handles.len())
            .field("txid", &self.get_txid())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::lib::buffer_chain::RAW_DATA_SIZE;
    use crate::kernel::object::channel::ChannelDispatcher;
    use crate::kernel::object::handle::{Dispatcher, Rights};

    #[test]
    fn test_create_and_read_back() {
        let msg = MessagePacket::create_kernel(b"hello channel", Vec::new()).unwrap();
        assert_eq!(msg.data_size(), 13);
        assert_eq!(msg.num_handles(), 0);
        assert_eq!(msg.data().unwrap(), b"hello channel");

        let mut out = [0u8; 13];
        msg.copy_data_to(&mut UserOutPtr::new(&mut out)).unwrap();
        assert_eq!(&out, b"hello channel");
    }

    #[test]
    fn test_header_is_stamped() {
        let (h0, _h1, rights) = ChannelDispatcher::create().unwrap();
        let handles = vec![Handle::make(h0, rights)];
        let msg = MessagePacket::create_kernel(&[7u8; 40], handles).unwrap();

        let mut header = [0u8; PAYLOAD_OFFSET];
        msg.chain().copy_out_kernel(&mut header, 0).unwrap();
        assert_eq!(u32::from_le_bytes([header[0], header[1], header[2], header[3]]), 40);
        assert_eq!(u16::from_le_bytes([header[4], header[5]]), 1);
    }

    #[test]
    fn test_txid() {
        let mut msg = MessagePacket::create_kernel(&[1, 0, 0, 0, 9, 9], Vec::new()).unwrap();
        assert_eq!(msg.get_txid(), 1);
        msg.set_txid(0x8000_0002);
        assert_eq!(msg.get_txid(), 0x8000_0002);
        assert_eq!(msg.data().unwrap(), [2, 0, 0, 0x80, 9, 9]);
    }

    #[test]
    fn test_short_message_has_no_txid() {
        let mut msg = MessagePacket::create_kernel(&[5, 5, 5], Vec::new()).unwrap();
        assert_eq!(msg.get_txid(), 0);
        msg.set_txid(42);
        assert_eq!(msg.get_txid(), 0);
        assert_eq!(msg.data().unwrap(), [5, 5, 5]);
    }

    #[test]
    fn test_limits() {
        let big = vec![0u8; MAX_MESSAGE_SIZE as usize + 1];
        assert_eq!(
            MessagePacket::create_kernel(&big, Vec::new()).unwrap_err(),
            RX_ERR_OUT_OF_RANGE
        );

        let max = vec![3u8; MAX_MESSAGE_SIZE as usize];
        let msg = MessagePacket::create_kernel(&max, Vec::new()).unwrap();
        assert_eq!(msg.data().unwrap(), max);

        let mut handles = Vec::new();
        for _ in 0..(MAX_MESSAGE_HANDLES / 2 + 1) {
            let (h0, h1, rights) = ChannelDispatcher::create().unwrap();
            handles.push(Handle::make(h0, rights));
            handles.push(Handle::make(h1, rights));
        }
        assert_eq!(handles.len(), MAX_MESSAGE_HANDLES as usize + 2);
        assert_eq!(
            MessagePacket::create_kernel(b"x", handles).unwrap_err(),
            RX_ERR_OUT_OF_RANGE
        );
    }

    #[test]
    fn test_user_source_too_short() {
        let src = [0u8; 4];
        assert_eq!(
            MessagePacket::create(UserInPtr::new(&src), 8, Vec::new()).unwrap_err(),
            RX_ERR_INVALID_ARGS
        );
        assert_eq!(
            MessagePacket::create(UserInPtr::null(), 1, Vec::new()).unwrap_err(),
            RX_ERR_INVALID_ARGS
        );
    }

    #[test]
    fn test_buffers_returned_to_pool() {
        let pool = Arc::new(BufferPool::new());
        let payload = vec![1u8; 3 * RAW_DATA_SIZE];
        let msg = MessagePacket::create_kernel_in(&pool, &payload, Vec::new()).unwrap();
        assert_eq!(pool.outstanding(), msg.chain().num_buffers());
        assert_eq!(msg.chain().num_buffers(), 4);
        drop(msg);
        assert_eq!(pool.outstanding(), 0);

        // A failed build leaks nothing.
        assert!(MessagePacket::create_in(&pool, UserInPtr::null(), 100, Vec::new()).is_err());
        assert_eq!(pool.outstanding(), 0);
    }

    #[test]
    fn test_take_handles() {
        let (h0, h1, rights) = ChannelDispatcher::create().unwrap();
        let koid = h1.dispatcher().get_koid();
        let mut msg = MessagePacket::create_kernel(b"x", vec![Handle::make(h1, rights)]).unwrap();
        let handles = msg.take_handles();
        assert_eq!(handles.len(), 1);
        assert_eq!(handles[0].koid(), koid);
        assert!(handles[0].require(Rights::READ).is_ok());
        assert_eq!(msg.num_handles(), 0);
        drop(h0);
    }
}
