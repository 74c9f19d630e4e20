//! Unencrypted request/response over a [`Connection`], for the key exchange.

use tgwire_mtproto::MtpState;
use tgwire_mtproto::message::{decode_plain, encode_plain};
use tgwire_tl_types::{Deserializable, RemoteCall};

use crate::connection::Connection;
use crate::errors::ConnectionError;

/// Sends one plain message at a time and waits for its answer.
pub struct PlainSender<'a> {
    connection: &'a Connection,
    state: MtpState,
}

impl<'a> PlainSender<'a> {
    pub fn new(connection: &'a Connection) -> Self {
        Self { connection, state: MtpState::new(None, false) }
    }

    pub async fn send<R: RemoteCall>(&mut self, request: &R) -> Result<R::Return, ConnectionError> {
        let msg_id = self.state.new_msg_id();
        self.connection.send(encode_plain(msg_id, &request.to_bytes())).await?;

        let packet = self.connection.recv().await?;
        let (_, body) = decode_plain(&packet)?;
        Ok(R::Return::from_bytes(body)?)
    }
}
