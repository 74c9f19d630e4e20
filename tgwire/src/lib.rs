//! # tgwire: MTProto 2.0 session engine
//!
//! `tgwire` is a modular Rust implementation of the client side of MTProto
//! 2.0. It consists of four focused sub-crates wired together here for
//! convenience:
//!
//! | Sub-crate         | Role                                                  |
//! |-------------------|-------------------------------------------------------|
//! | `tgwire-tl-types` | TL reader/writer and the service schema               |
//! | `tgwire-crypto`   | AES-IGE/CTR, SHA, RSA-PAD, key derivation, factoring  |
//! | `tgwire-mtproto`  | Transports, key exchange steps, state, packer         |
//! | `tgwire-client`   | Connections, the encrypted sender, sessions, `Client` |
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use tgwire::{Client, Config, FileSession};
//! use tgwire::tl::mtproto::Ping;
//!
//! # async fn run() -> Result<(), tgwire::InvocationError> {
//! let client = Client::connect(Config {
//!     session: Box::new(FileSession::new("tgwire.session")),
//!     ..Config::default()
//! })
//! .await?;
//!
//! let pong = client.invoke(&Ping { ping_id: 42 }).await?;
//! assert_eq!(pong.ping_id, 42);
//! client.disconnect().await?;
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Re-export of [`tgwire_tl_types`]: binary codec and service schema.
pub use tgwire_tl_types as tl;

/// Re-export of [`tgwire_mtproto`]: transports, authentication, state and packer.
pub use tgwire_mtproto as mtproto;

/// Re-export of [`tgwire_crypto`]: AES, SHA, RSA, factorize, AuthKey.
pub use tgwire_crypto as crypto;

/// Re-export of [`tgwire_client`]: the async sender and client.
pub use tgwire_client as client;

// ─── Convenience re-exports ───────────────────────────────────────────────────

pub use tgwire_tl_types::{Deserializable, Identifiable, RemoteCall, Serializable};

pub use tgwire_crypto::AuthKey;
pub use tgwire_mtproto::MtpState;

pub use tgwire_client::{
    Client, Config, Connection, ConnectionError, ConnectionState, FileSession, InvocationError, MemorySession,
    MtpSender, RpcError, SenderConfig, SenderHooks, Session, Socks5Config, StringSession, TransportKind, Update,
};
