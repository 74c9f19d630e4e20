//! TL binary reader/writer and the MTProto service schema.
//!
//! The full Telegram API schema is not part of this crate: applications bring
//! their own generated types and plug them in through the [`Serializable`],
//! [`Deserializable`], [`Identifiable`] and [`RemoteCall`] traits. What lives
//! here is everything the session engine itself has to speak.
//!
//! | Module          | Contents                                                   |
//! |-----------------|------------------------------------------------------------|
//! | [`serialize`]   | Writer side of the wire format                             |
//! | [`deserialize`] | [`Cursor`] reader and the [`Deserializable`] trait         |
//! | [`mtproto`]     | Handshake, service messages and the service [`mtproto::Object`] table |
//! | [`envelope`]    | `rpc_result`, `msg_container`, `gzip_packed`               |
//!
//! # Example
//!
//! ```rust
//! use tgwire_tl_types::{mtproto, Deserializable, Serializable};
//!
//! let ping = mtproto::Ping { ping_id: 42 };
//! let bytes = ping.to_bytes();
//! assert_eq!(&bytes[..4], &0x7abe77ecu32.to_le_bytes());
//!
//! let pong = mtproto::Pong { msg_id: 1, ping_id: 42 }.to_bytes();
//! assert!(matches!(mtproto::Object::from_bytes(&pong), Ok(mtproto::Object::Pong(_))));
//! ```

#![deny(unsafe_code)]

pub mod deserialize;
pub mod envelope;
pub mod mtproto;
pub mod serialize;

pub use deserialize::{Cursor, Deserializable};
pub use serialize::Serializable;

/// `boolTrue#997275b5`
pub const BOOL_TRUE_ID: u32 = 0x997275b5;
/// `boolFalse#bc799737`
pub const BOOL_FALSE_ID: u32 = 0xbc799737;
/// `vector#1cb5c415`
pub const VECTOR_ID: u32 = 0x1cb5c415;

/// Bare `vector` (lowercase), as opposed to the boxed `Vector`.
///
/// Used in rare cases where Telegram sends a length-prefixed list without
/// the usual `0x1cb5c415` constructor ID header.
#[derive(Clone, Debug, PartialEq)]
pub struct RawVec<T>(pub Vec<T>);

// ─── Core traits ──────────────────────────────────────────────────────────────

/// Every schema type has a unique 32-bit constructor ID.
pub trait Identifiable {
    /// The constructor ID as specified in the TL schema.
    const CONSTRUCTOR_ID: u32;
}

/// Marks a function type that can be sent to Telegram as an RPC call.
///
/// `Return` is the type Telegram will respond with.
pub trait RemoteCall: Serializable {
    /// The deserialized response type.
    type Return: Deserializable;
}

// ─── Updates family ───────────────────────────────────────────────────────────

/// Constructor IDs of the boxed `Updates` type.
///
/// The session engine never decodes these; it forwards them untouched to
/// whoever owns the API schema.
pub const UPDATES_FAMILY: [u32; 7] = [
    0xe317af7e, // updatesTooLong
    0x313bc7f8, // updateShortMessage
    0x4d6deea5, // updateShortChatMessage
    0x78d4dec1, // updateShort
    0x725b04c3, // updatesCombined
    0x74ae4240, // updates
    0x9015e101, // updateShortSentMessage
];

/// Whether `id` names one of the `Updates` constructors.
pub fn is_updates(id: u32) -> bool {
    UPDATES_FAMILY.contains(&id)
}
