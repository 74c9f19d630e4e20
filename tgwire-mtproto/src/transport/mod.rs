//! Sans-IO MTProto transport framing.
//!
//! A [`Transport`] turns payloads into framed packets and finds packet
//! boundaries in a receive buffer. It never touches a socket; the connection
//! owns the bytes and hands them over.
//!
//! | Framing        | Init bytes   | Frame                                       |
//! |----------------|--------------|---------------------------------------------|
//! | [`Abridged`]   | `0xef`       | `len/4` in 1 or 4 bytes, payload            |
//! | [`Intermediate`] | `0xeeeeeeee` | 4-byte LE length, payload                 |
//! | [`Full`]       | none         | length, send counter, payload, CRC32        |
//!
//! [`obfuscated`] builds the Obfuscated2 header that can wrap abridged or
//! intermediate framing.

mod abridged;
mod full;
mod intermediate;
pub mod obfuscated;

use std::fmt;

pub use abridged::Abridged;
pub use full::Full;
pub use intermediate::Intermediate;

/// Largest packet any framing accepts. Longer length headers mean the
/// stream is out of sync.
pub const MAX_PACKET_LEN: usize = 16 * 1024 * 1024;

/// Why a packet could not be taken from the receive buffer.
#[derive(Clone, Debug, PartialEq)]
pub enum Error {
    /// More bytes are needed before a whole packet is available.
    MissingBytes,
    /// The length header is impossible. The stream is out of sync.
    BadLen { got: i32 },
    /// The packet arrived whole but its checksum is wrong.
    ///
    /// `skip` is the packet length, so the caller can drop it and carry on.
    BadCrc { expected: u32, got: u32, skip: usize },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingBytes => write!(f, "need more bytes"),
            Self::BadLen { got } => write!(f, "bad packet length: {got}"),
            Self::BadCrc { expected, got, .. } => {
                write!(f, "bad crc32: expected {expected:#010x}, got {got:#010x}")
            }
        }
    }
}

impl std::error::Error for Error {}

/// Where a packet's payload sits in the receive buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UnpackedOffset {
    pub data_start: usize,
    pub data_end: usize,
    /// Offset of the next packet; drain this many bytes once done.
    pub next_offset: usize,
}

/// One MTProto transport framing.
pub trait Transport: Send + 'static {
    /// Bytes written once, before the first packet, on a plain stream.
    fn init_bytes(&self) -> &'static [u8];

    /// The four-byte tag placed in an Obfuscated2 header, if this framing can
    /// be obfuscated.
    fn obfuscation_tag(&self) -> Option<[u8; 4]>;

    /// Frame `input` and append the packet to `output`.
    ///
    /// `input.len()` must be a multiple of 4.
    fn pack(&mut self, input: &[u8], output: &mut Vec<u8>);

    /// Locate the first packet in `input`.
    fn unpack(&mut self, input: &[u8]) -> Result<UnpackedOffset, Error>;

    /// Forget per-connection counters before reusing on a new stream.
    fn reset(&mut self);
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn init_bytes(&self) -> &'static [u8] {
        (**self).init_bytes()
    }
    fn obfuscation_tag(&self) -> Option<[u8; 4]> {
        (**self).obfuscation_tag()
    }
    fn pack(&mut self, input: &[u8], output: &mut Vec<u8>) {
        (**self).pack(input, output)
    }
    fn unpack(&mut self, input: &[u8]) -> Result<UnpackedOffset, Error> {
        (**self).unpack(input)
    }
    fn reset(&mut self) {
        (**self).reset()
    }
}
