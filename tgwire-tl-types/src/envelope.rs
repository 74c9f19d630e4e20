//! Core objects that wrap other objects: `rpc_result`, `msg_container` and
//! `gzip_packed`.
//!
//! Their payloads are kept as raw bytes. The inner object of an `rpc_result`
//! belongs to whatever schema the request came from, and the elements of a
//! container have to be dispatched one by one, so neither can be decoded here.

use crate::deserialize::{Buffer, Error, Result};
use crate::{Deserializable, Identifiable, Serializable};

// ─── rpc_result ──────────────────────────────────────────────────────────────

/// `rpc_result#f35c6d01 req_msg_id:long result:Object`
#[derive(Clone, Debug, PartialEq)]
pub struct RpcResult {
    pub req_msg_id: i64,
    /// The boxed result, constructor ID included.
    pub result: Vec<u8>,
}

impl Identifiable for RpcResult {
    const CONSTRUCTOR_ID: u32 = 0xf35c6d01;
}

impl RpcResult {
    /// The result takes up the rest of the buffer.
    pub fn deserialize_bare(buf: Buffer) -> Result<Self> {
        let req_msg_id = i64::deserialize(buf)?;
        let mut result = Vec::new();
        buf.read_to_end(&mut result);
        Ok(Self { req_msg_id, result })
    }

    /// Constructor ID of the wrapped result, if there is one.
    pub fn inner_constructor(&self) -> Option<u32> {
        let id = self.result.get(..4)?;
        Some(u32::from_le_bytes([id[0], id[1], id[2], id[3]]))
    }
}

impl Serializable for RpcResult {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        Self::CONSTRUCTOR_ID.serialize(buf);
        self.req_msg_id.serialize(buf);
        buf.extend(self.result.iter().copied());
    }
}

// ─── msg_container ───────────────────────────────────────────────────────────

/// One `message msg_id:long seqno:int bytes:int body:Object` entry.
#[derive(Clone, Debug, PartialEq)]
pub struct Message {
    pub msg_id: i64,
    pub seq_no: i32,
    pub body: Vec<u8>,
}

impl Message {
    /// `msg_id` + `seqno` + `bytes` header. Budgeting uses the smaller
    /// historical figure of 12, so a full container may overshoot by a few
    /// bytes per element; the server limit leaves room for that.
    pub const SIZE_OVERHEAD: usize = 12;

    /// Constructor ID of the body, if there is one.
    pub fn constructor_id(&self) -> Option<u32> {
        let id = self.body.get(..4)?;
        Some(u32::from_le_bytes([id[0], id[1], id[2], id[3]]))
    }
}

impl Serializable for Message {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        self.msg_id.serialize(buf);
        self.seq_no.serialize(buf);
        (self.body.len() as i32).serialize(buf);
        buf.extend(self.body.iter().copied());
    }
}

/// `msg_container#73f1f8dc messages:vector<%Message>`
#[derive(Clone, Debug, PartialEq)]
pub struct MessageContainer {
    pub messages: Vec<Message>,
}

impl Identifiable for MessageContainer {
    const CONSTRUCTOR_ID: u32 = 0x73f1f8dc;
}

impl MessageContainer {
    /// Largest payload the server accepts in one container.
    pub const MAXIMUM_SIZE: usize = 1_044_456 - 8;
    /// Most messages the server accepts in one container.
    pub const MAXIMUM_LENGTH: usize = 100;

    /// Each element is skipped by its declared length, so bodies of unknown
    /// type never desynchronise the cursor.
    pub fn deserialize_bare(buf: Buffer) -> Result<Self> {
        let count = i32::deserialize(buf)?;
        if count < 0 {
            return Err(Error::UnexpectedEof);
        }
        let mut messages = Vec::with_capacity((count as usize).min(Self::MAXIMUM_LENGTH));
        for _ in 0..count {
            let msg_id = i64::deserialize(buf)?;
            let seq_no = i32::deserialize(buf)?;
            let len = i32::deserialize(buf)?;
            if len < 0 {
                return Err(Error::UnexpectedEof);
            }
            let body = buf.read_slice(len as usize)?.to_vec();
            messages.push(Message { msg_id, seq_no, body });
        }
        Ok(Self { messages })
    }
}

impl Serializable for MessageContainer {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        Self::CONSTRUCTOR_ID.serialize(buf);
        (self.messages.len() as i32).serialize(buf);
        for message in &self.messages {
            message.serialize(buf);
        }
    }
}

// ─── gzip_packed ─────────────────────────────────────────────────────────────

/// `gzip_packed#3072cfa1 packed_data:string`
#[derive(Clone, Debug, PartialEq)]
pub struct GzipPacked {
    pub packed_data: Vec<u8>,
}

impl Identifiable for GzipPacked {
    const CONSTRUCTOR_ID: u32 = 0x3072cfa1;
}

impl GzipPacked {
    pub fn deserialize_bare(buf: Buffer) -> Result<Self> {
        Ok(Self { packed_data: Vec::<u8>::deserialize(buf)? })
    }
}

impl Serializable for GzipPacked {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        Self::CONSTRUCTOR_ID.serialize(buf);
        self.packed_data.serialize(buf);
    }
}

impl Deserializable for GzipPacked {
    fn deserialize(buf: Buffer) -> Result<Self> {
        let id = u32::deserialize(buf)?;
        if id != Self::CONSTRUCTOR_ID {
            return Err(Error::UnexpectedConstructor { id });
        }
        Self::deserialize_bare(buf)
    }
}
