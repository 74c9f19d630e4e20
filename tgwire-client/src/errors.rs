//! Error types for tgwire-client.

use std::{fmt, io};

use tgwire_mtproto::{authentication, message, state, transport};
use tgwire_tl_types::deserialize;

// ─── RpcError ─────────────────────────────────────────────────────────────────

/// An error returned by Telegram's servers in response to an RPC call.
///
/// Numeric values are stripped from the name and placed in [`RpcError::value`].
///
/// # Example
/// `FLOOD_WAIT_30` → `RpcError { code: 420, name: "FLOOD_WAIT", value: Some(30) }`
#[derive(Clone, Debug, PartialEq)]
pub struct RpcError {
    /// HTTP-like status code.
    pub code: i32,
    /// Error name in SCREAMING_SNAKE_CASE with digits removed.
    pub name: String,
    /// Numeric suffix extracted from the name, if any.
    pub value: Option<u32>,
    /// Type name of the request that failed.
    pub caused_by: Option<String>,
}

/// What an [`RpcError`] code says about the failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RpcErrorKind {
    /// 303: the request must be repeated on another DC.
    SeeOther,
    /// 400
    BadRequest,
    /// 401: the key is not bound to an authorized user.
    Unauthorized,
    /// 403
    Forbidden,
    /// 404
    NotFound,
    /// 406: the server wants the auth key dropped or the action refused quietly.
    AuthKey,
    /// 420
    Flood,
    /// 500, also seen as -500.
    Server,
    /// 503, only ever seen as -503.
    TimedOut,
    Other,
}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RPC {}: {}", self.code, self.name)?;
        if let Some(v) = self.value {
            write!(f, " (value: {v})")?;
        }
        if let Some(request) = &self.caused_by {
            write!(f, " (caused by {request})")?;
        }
        Ok(())
    }
}

impl std::error::Error for RpcError {}

impl RpcError {
    /// Parse a raw Telegram error message like `"FLOOD_WAIT_30"` into an `RpcError`.
    pub fn from_telegram(code: i32, message: &str) -> Self {
        // "FLOOD_WAIT_30" → name = "FLOOD_WAIT", value = Some(30)
        if let Some(idx) = message.rfind('_') {
            let suffix = &message[idx + 1..];
            if !suffix.is_empty() && suffix.chars().all(|c| c.is_ascii_digit()) {
                if let Ok(v) = suffix.parse::<u32>() {
                    let name = message[..idx].to_string();
                    return Self { code, name, value: Some(v), caused_by: None };
                }
            }
        }
        Self { code, name: message.to_string(), value: None, caused_by: None }
    }

    /// Attach the name of the request that triggered the error.
    pub fn with_caused_by(mut self, request: impl Into<String>) -> Self {
        self.caused_by = Some(request.into());
        self
    }

    pub fn kind(&self) -> RpcErrorKind {
        match self.code {
            303 => RpcErrorKind::SeeOther,
            400 => RpcErrorKind::BadRequest,
            401 => RpcErrorKind::Unauthorized,
            403 => RpcErrorKind::Forbidden,
            404 => RpcErrorKind::NotFound,
            406 => RpcErrorKind::AuthKey,
            420 => RpcErrorKind::Flood,
            500 | -500 => RpcErrorKind::Server,
            503 | -503 => RpcErrorKind::TimedOut,
            _ => RpcErrorKind::Other,
        }
    }

    /// Match on the error name, with optional wildcard prefix/suffix `'*'`.
    ///
    /// # Examples
    /// - `err.is("FLOOD_WAIT")`: exact match
    /// - `err.is("PHONE_CODE_*")`: starts-with match
    /// - `err.is("*_INVALID")`: ends-with match
    pub fn is(&self, pattern: &str) -> bool {
        if let Some(prefix) = pattern.strip_suffix('*') {
            self.name.starts_with(prefix)
        } else if let Some(suffix) = pattern.strip_prefix('*') {
            self.name.ends_with(suffix)
        } else {
            self.name == pattern
        }
    }

    /// Seconds to wait for `FLOOD_WAIT_X`, `FLOOD_TEST_PHONE_WAIT_X` and
    /// `SLOWMODE_WAIT_X`.
    pub fn flood_wait_seconds(&self) -> Option<u64> {
        if matches!(self.name.as_str(), "FLOOD_WAIT" | "FLOOD_TEST_PHONE_WAIT" | "SLOWMODE_WAIT") {
            self.value.map(u64::from)
        } else {
            None
        }
    }

    /// Target DC of `PHONE_MIGRATE_X`, `NETWORK_MIGRATE_X`, `USER_MIGRATE_X`
    /// and friends.
    pub fn migrate_dc(&self) -> Option<i32> {
        if self.name.ends_with("_MIGRATE") {
            self.value.and_then(|v| i32::try_from(v).ok())
        } else {
            None
        }
    }

    /// Internal server trouble that is worth retrying after a short pause.
    pub fn is_server_error(&self) -> bool {
        self.kind() == RpcErrorKind::Server || self.name == "RPC_CALL_FAIL" || self.name == "RPC_MCGET_FAIL"
    }
}

// ─── Bad message notifications ───────────────────────────────────────────────

/// Human-readable meaning of a `bad_msg_notification` error code.
pub fn bad_msg_description(code: i32) -> &'static str {
    match code {
        16 => {
            "msg_id too low (most likely, client time is wrong; it would be worthwhile to \
             synchronize it using msg_id notifications and re-send the original message \
             with the correct msg_id or wrap it in a container with a new msg_id if the \
             original message had waited too long on the client to be transmitted)"
        }
        17 => {
            "msg_id too high (similar to the previous case, the client time has to be \
             synchronized, and the message re-sent with the correct msg_id)"
        }
        18 => {
            "incorrect two lower order msg_id bits (the server expects client message \
             msg_id to be divisible by 4)"
        }
        19 => "container msg_id is the same as msg_id of a previously received message (this must never happen)",
        20 => {
            "message too old, and it cannot be verified whether the server has received \
             a message with this msg_id or not"
        }
        32 => {
            "msg_seqno too low (the server has already received a message with a lower \
             msg_id but with either a higher or an equal and odd seqno)"
        }
        33 => {
            "msg_seqno too high (similarly, there is a message with a higher msg_id but with \
             either a lower or an equal and odd seqno)"
        }
        34 => "an even msg_seqno expected (irrelevant message), but odd received",
        35 => "odd msg_seqno expected (relevant message), but even received",
        48 => {
            "incorrect server salt (in this case, the bad_server_salt response is received with \
             the correct salt, and the message is to be re-sent with it)"
        }
        64 => "invalid container",
        _ => "unknown error code",
    }
}

// ─── ConnectionError ─────────────────────────────────────────────────────────

/// Failure to open, authenticate or keep a connection.
#[derive(Debug)]
pub enum ConnectionError {
    /// Socket or proxy failure.
    Io(io::Error),
    /// The connection is not open, or was closed while waiting on it.
    NotConnected,
    /// The framing on the stream is corrupt beyond recovery.
    Transport(transport::Error),
    /// Full framing cannot be wrapped in Obfuscated2.
    NotObfuscatable,
    /// A plain (key exchange) response had a bad envelope.
    PlainMessage(message::Error),
    /// A plain response body did not decode.
    Deserialize(deserialize::Error),
    /// The DH key exchange failed a check.
    Handshake(authentication::Error),
    /// The packet could not be encrypted or decrypted.
    Decrypt(state::DecryptError),
    /// The server no longer knows our auth key (transport status 404).
    AuthKeyLost,
    /// No address is known for this DC.
    UnknownDc(i32),
    /// The session store failed.
    Session(io::Error),
}

impl fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::NotConnected => write!(f, "not connected"),
            Self::Transport(e) => write!(f, "transport error: {e}"),
            Self::NotObfuscatable => write!(f, "this framing has no obfuscation tag"),
            Self::PlainMessage(e) => write!(f, "{e}"),
            Self::Deserialize(e) => write!(f, "deserialize error: {e}"),
            Self::Handshake(e) => write!(f, "key exchange failed: {e}"),
            Self::Decrypt(e) => write!(f, "{e}"),
            Self::AuthKeyLost => write!(f, "the server forgot our auth key"),
            Self::UnknownDc(dc) => write!(f, "no address known for DC{dc}"),
            Self::Session(e) => write!(f, "session store error: {e}"),
        }
    }
}

impl std::error::Error for ConnectionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) | Self::Session(e) => Some(e),
            Self::Handshake(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for ConnectionError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<transport::Error> for ConnectionError {
    fn from(e: transport::Error) -> Self {
        Self::Transport(e)
    }
}

impl From<message::Error> for ConnectionError {
    fn from(e: message::Error) -> Self {
        Self::PlainMessage(e)
    }
}

impl From<deserialize::Error> for ConnectionError {
    fn from(e: deserialize::Error) -> Self {
        Self::Deserialize(e)
    }
}

impl From<authentication::Error> for ConnectionError {
    fn from(e: authentication::Error) -> Self {
        Self::Handshake(e)
    }
}

impl From<state::DecryptError> for ConnectionError {
    fn from(e: state::DecryptError) -> Self {
        Self::Decrypt(e)
    }
}

// ─── InvocationError ──────────────────────────────────────────────────────────

/// The error type returned from anything that sends a request.
#[derive(Debug)]
pub enum InvocationError {
    /// Telegram rejected the request.
    Rpc(RpcError),
    /// The server refused the message itself with a code that cannot be
    /// corrected automatically.
    BadMessage { code: i32, request: String },
    /// The connection failed underneath the request.
    Connection(ConnectionError),
    /// Response deserialization failed.
    Deserialize(deserialize::Error),
    /// The request can never fit in a message.
    TooLarge { len: usize },
    /// The sender is not connected (never was, or was disconnected by the user).
    NotConnected,
    /// The request was dropped (sender disconnected or shut down).
    Dropped,
    /// Every retry failed; this is the last error seen.
    RetriesExhausted { attempts: usize, last: Box<InvocationError> },
}

impl fmt::Display for InvocationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rpc(e) => write!(f, "{e}"),
            Self::BadMessage { code, request } => {
                write!(f, "bad message {code}: {} (caused by {request})", bad_msg_description(*code))
            }
            Self::Connection(e) => write!(f, "{e}"),
            Self::Deserialize(e) => write!(f, "deserialize error: {e}"),
            Self::TooLarge { len } => write!(f, "request of {len} bytes is too large to send"),
            Self::NotConnected => write!(f, "cannot send requests while disconnected"),
            Self::Dropped => write!(f, "request dropped"),
            Self::RetriesExhausted { attempts, last } => {
                write!(f, "request was unsuccessful {attempts} time(s): {last}")
            }
        }
    }
}

impl std::error::Error for InvocationError {}

impl From<ConnectionError> for InvocationError {
    fn from(e: ConnectionError) -> Self {
        Self::Connection(e)
    }
}

impl From<io::Error> for InvocationError {
    fn from(e: io::Error) -> Self {
        Self::Connection(ConnectionError::Io(e))
    }
}

impl From<deserialize::Error> for InvocationError {
    fn from(e: deserialize::Error) -> Self {
        Self::Deserialize(e)
    }
}

impl InvocationError {
    /// Returns `true` if this is the named RPC error (supports `'*'` wildcards).
    pub fn is(&self, pattern: &str) -> bool {
        match self {
            Self::Rpc(e) => e.is(pattern),
            _ => false,
        }
    }

    /// If this is a flood-wait error, returns how many seconds to wait.
    pub fn flood_wait_seconds(&self) -> Option<u64> {
        match self {
            Self::Rpc(e) => e.flood_wait_seconds(),
            _ => None,
        }
    }
}
