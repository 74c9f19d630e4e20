//! One outgoing message and the channel its answer goes back on.

use std::fmt;

use tgwire_mtproto::Outgoing;
use tgwire_tl_types::mtproto::MsgsAck;
use tgwire_tl_types::{BOOL_TRUE_ID, Identifiable, RemoteCall, Serializable};
use tokio::sync::oneshot;

use crate::errors::InvocationError;

pub(crate) type ResponseTx = oneshot::Sender<Result<Vec<u8>, InvocationError>>;
pub(crate) type ResponseRx = oneshot::Receiver<Result<Vec<u8>, InvocationError>>;

/// `auth.logOut#3e72ba19`. The server only acknowledges it.
const AUTH_LOG_OUT_ID: u32 = 0x3e72ba19;

pub(crate) struct Request {
    pub body: Vec<u8>,
    pub name: &'static str,
    pub msg_id: Option<i64>,
    pub container_id: Option<i64>,
    content_related: bool,
    resolves_on_ack: bool,
    tx: Option<ResponseTx>,
}

impl Request {
    /// A content-related request whose answer is awaited through the
    /// returned receiver.
    pub fn new<R: RemoteCall>(request: &R) -> (Self, ResponseRx) {
        let body = request.to_bytes();
        let resolves_on_ack = body.get(..4) == Some(&AUTH_LOG_OUT_ID.to_le_bytes()[..]);
        Self::from_parts(body, short_type_name::<R>(), resolves_on_ack)
    }

    /// Pre-serialized body, for callers that manage their own schema.
    pub fn raw(body: Vec<u8>, name: &'static str) -> (Self, ResponseRx) {
        Self::from_parts(body, name, false)
    }

    fn from_parts(body: Vec<u8>, name: &'static str, resolves_on_ack: bool) -> (Self, ResponseRx) {
        let (tx, rx) = oneshot::channel();
        let request = Self {
            body,
            name,
            msg_id: None,
            container_id: None,
            content_related: true,
            resolves_on_ack,
            tx: Some(tx),
        };
        (request, rx)
    }

    /// A `msgs_ack` nobody waits on.
    pub fn ack(msg_ids: Vec<i64>) -> Self {
        Self::service(MsgsAck { msg_ids }.to_bytes(), "MsgsAck")
    }

    /// A content-unrelated service message nobody waits on.
    pub fn service(body: Vec<u8>, name: &'static str) -> Self {
        Self {
            body,
            name,
            msg_id: None,
            container_id: None,
            content_related: false,
            resolves_on_ack: false,
            tx: None,
        }
    }

    /// Whether a reply (or ack) will arrive for this message.
    pub fn expects_reply(&self) -> bool {
        self.tx.is_some()
    }

    pub fn resolves_on_ack(&self) -> bool {
        self.resolves_on_ack
    }

    pub fn is_ack(&self) -> bool {
        self.body.get(..4) == Some(&MsgsAck::CONSTRUCTOR_ID.to_le_bytes()[..])
    }

    pub fn resolve(mut self, body: Vec<u8>) {
        if let Some(tx) = self.tx.take() {
            // The caller may have stopped waiting.
            let _ = tx.send(Ok(body));
        }
    }

    /// Resolve with `boolTrue`, the answer acknowledged-only calls stand for.
    pub fn resolve_true(self) {
        self.resolve(BOOL_TRUE_ID.to_le_bytes().to_vec())
    }

    pub fn reject(mut self, error: InvocationError) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(Err(error));
        }
    }
}

impl Outgoing for Request {
    fn body(&self) -> &[u8] {
        &self.body
    }

    fn content_related(&self) -> bool {
        self.content_related
    }

    fn assign(&mut self, msg_id: i64, container_id: Option<i64>) {
        self.msg_id = Some(msg_id);
        self.container_id = container_id;
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("name", &self.name)
            .field("msg_id", &self.msg_id)
            .field("container_id", &self.container_id)
            .field("len", &self.body.len())
            .finish_non_exhaustive()
    }
}

/// `tgwire_tl_types::mtproto::Ping` → `Ping`.
fn short_type_name<T>() -> &'static str {
    let full = std::any::type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}
