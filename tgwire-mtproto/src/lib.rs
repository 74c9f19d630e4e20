//! Sans-IO MTProto 2.0 session engine.
//!
//! This crate handles:
//! * Transport framing (abridged, intermediate, full) and the Obfuscated2 header
//! * The plain envelope used during key exchange
//! * The step-by-step DH key exchange
//! * Encrypted session state: message IDs, sequence numbers, salt, replay window
//! * Batching outgoing requests into containers
//!
//! Nothing here touches a socket: bring your own I/O and drive the types from
//! it, as `tgwire-client` does.

#![deny(unsafe_code)]

pub mod authentication;
pub mod compression;
pub mod message;
pub mod packer;
pub mod state;
pub mod transport;

pub use packer::{MessagePacker, Outgoing, Packed};
pub use state::{MtpState, TlMessage};
