//! Hand-written MTProto service schema.
//!
//! These are the constructors from `mtproto.tl` that the session engine
//! produces or consumes itself: the auth-key handshake, acknowledgements,
//! pings, salts and service notifications. [`Object`] is the type table used
//! to dispatch an incoming message body by its constructor ID.

use crate::deserialize::{Buffer, Error, Result};
use crate::envelope::{GzipPacked, MessageContainer, RpcResult};
use crate::{Deserializable, Identifiable, RawVec, RemoteCall, Serializable};

macro_rules! tl_object {
    (
        $(#[$meta:meta])*
        $name:ident = $id:literal {
            $( $(#[$fmeta:meta])* $field:ident : $ty:ty ),* $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq)]
        pub struct $name {
            $( $(#[$fmeta])* pub $field: $ty, )*
        }

        impl Identifiable for $name {
            const CONSTRUCTOR_ID: u32 = $id;
        }

        impl Serializable for $name {
            fn serialize(&self, buf: &mut impl Extend<u8>) {
                Serializable::serialize(&<Self as Identifiable>::CONSTRUCTOR_ID, buf);
                $( Serializable::serialize(&self.$field, buf); )*
            }
        }

        impl $name {
            /// Read the fields only; the constructor ID was already consumed.
            pub fn deserialize_bare(buf: Buffer) -> Result<Self> {
                Ok(Self { $( $field: <$ty as Deserializable>::deserialize(buf)?, )* })
            }
        }

        impl Deserializable for $name {
            fn deserialize(buf: Buffer) -> Result<Self> {
                let id = u32::deserialize(buf)?;
                if id != $id {
                    return Err(Error::UnexpectedConstructor { id });
                }
                Self::deserialize_bare(buf)
            }
        }
    };
}

// ─── Auth key exchange ───────────────────────────────────────────────────────

tl_object! {
    /// `req_pq_multi#be7e8ef1 nonce:int128 = ResPQ`
    ReqPqMulti = 0xbe7e8ef1 { nonce: [u8; 16] }
}

tl_object! {
    /// `resPQ#05162463`
    ResPq = 0x05162463 {
        nonce: [u8; 16],
        server_nonce: [u8; 16],
        pq: Vec<u8>,
        server_public_key_fingerprints: Vec<i64>,
    }
}

tl_object! {
    /// `p_q_inner_data_dc#a9f55f95`, the variant that names the target DC.
    PQInnerDataDc = 0xa9f55f95 {
        pq: Vec<u8>,
        p: Vec<u8>,
        q: Vec<u8>,
        nonce: [u8; 16],
        server_nonce: [u8; 16],
        new_nonce: [u8; 32],
        dc: i32,
    }
}

tl_object! {
    /// `req_DH_params#d712e4be`
    ReqDhParams = 0xd712e4be {
        nonce: [u8; 16],
        server_nonce: [u8; 16],
        p: Vec<u8>,
        q: Vec<u8>,
        public_key_fingerprint: i64,
        encrypted_data: Vec<u8>,
    }
}

tl_object! {
    /// `server_DH_params_fail#79cb045d`
    ServerDhParamsFail = 0x79cb045d {
        nonce: [u8; 16],
        server_nonce: [u8; 16],
        new_nonce_hash: [u8; 16],
    }
}

tl_object! {
    /// `server_DH_params_ok#d0e8075c`
    ServerDhParamsOk = 0xd0e8075c {
        nonce: [u8; 16],
        server_nonce: [u8; 16],
        encrypted_answer: Vec<u8>,
    }
}

/// Boxed `Server_DH_Params`.
#[derive(Clone, Debug, PartialEq)]
pub enum ServerDhParams {
    Fail(ServerDhParamsFail),
    Ok(ServerDhParamsOk),
}

impl Deserializable for ServerDhParams {
    fn deserialize(buf: Buffer) -> Result<Self> {
        match u32::deserialize(buf)? {
            ServerDhParamsFail::CONSTRUCTOR_ID => Ok(Self::Fail(ServerDhParamsFail::deserialize_bare(buf)?)),
            ServerDhParamsOk::CONSTRUCTOR_ID => Ok(Self::Ok(ServerDhParamsOk::deserialize_bare(buf)?)),
            id => Err(Error::UnexpectedConstructor { id }),
        }
    }
}

tl_object! {
    /// `server_DH_inner_data#b5890dba`
    ServerDhInnerData = 0xb5890dba {
        nonce: [u8; 16],
        server_nonce: [u8; 16],
        g: i32,
        dh_prime: Vec<u8>,
        g_a: Vec<u8>,
        server_time: i32,
    }
}

tl_object! {
    /// `client_DH_inner_data#6643b654`
    ClientDhInnerData = 0x6643b654 {
        nonce: [u8; 16],
        server_nonce: [u8; 16],
        retry_id: i64,
        g_b: Vec<u8>,
    }
}

tl_object! {
    /// `set_client_DH_params#f5045f1f`
    SetClientDhParams = 0xf5045f1f {
        nonce: [u8; 16],
        server_nonce: [u8; 16],
        encrypted_data: Vec<u8>,
    }
}

tl_object! {
    /// `dh_gen_ok#3bcbf734`
    DhGenOk = 0x3bcbf734 {
        nonce: [u8; 16],
        server_nonce: [u8; 16],
        new_nonce_hash1: [u8; 16],
    }
}

tl_object! {
    /// `dh_gen_retry#46dc1fb9`
    DhGenRetry = 0x46dc1fb9 {
        nonce: [u8; 16],
        server_nonce: [u8; 16],
        new_nonce_hash2: [u8; 16],
    }
}

tl_object! {
    /// `dh_gen_fail#a69dae02`
    DhGenFail = 0xa69dae02 {
        nonce: [u8; 16],
        server_nonce: [u8; 16],
        new_nonce_hash3: [u8; 16],
    }
}

/// Boxed `Set_client_DH_params_answer`.
#[derive(Clone, Debug, PartialEq)]
pub enum SetClientDhParamsAnswer {
    DhGenOk(DhGenOk),
    DhGenRetry(DhGenRetry),
    DhGenFail(DhGenFail),
}

impl Deserializable for SetClientDhParamsAnswer {
    fn deserialize(buf: Buffer) -> Result<Self> {
        match u32::deserialize(buf)? {
            DhGenOk::CONSTRUCTOR_ID => Ok(Self::DhGenOk(DhGenOk::deserialize_bare(buf)?)),
            DhGenRetry::CONSTRUCTOR_ID => Ok(Self::DhGenRetry(DhGenRetry::deserialize_bare(buf)?)),
            DhGenFail::CONSTRUCTOR_ID => Ok(Self::DhGenFail(DhGenFail::deserialize_bare(buf)?)),
            id => Err(Error::UnexpectedConstructor { id }),
        }
    }
}

impl RemoteCall for ReqPqMulti { type Return = ResPq; }
impl RemoteCall for ReqDhParams { type Return = ServerDhParams; }
impl RemoteCall for SetClientDhParams { type Return = SetClientDhParamsAnswer; }

// ─── Service messages ────────────────────────────────────────────────────────

tl_object! {
    /// `rpc_error#2144ca19`
    RpcError = 0x2144ca19 { error_code: i32, error_message: String }
}

tl_object! {
    /// `msgs_ack#62d6b459`
    MsgsAck = 0x62d6b459 { msg_ids: Vec<i64> }
}

tl_object! {
    /// `bad_msg_notification#a7eff811`
    BadMsgNotification = 0xa7eff811 {
        bad_msg_id: i64,
        bad_msg_seqno: i32,
        error_code: i32,
    }
}

tl_object! {
    /// `bad_server_salt#edab447b`
    BadServerSalt = 0xedab447b {
        bad_msg_id: i64,
        bad_msg_seqno: i32,
        error_code: i32,
        new_server_salt: i64,
    }
}

tl_object! {
    /// `msgs_state_req#da69fb52`
    MsgsStateReq = 0xda69fb52 { msg_ids: Vec<i64> }
}

tl_object! {
    /// `msgs_state_info#04deb57d`
    MsgsStateInfo = 0x04deb57d { req_msg_id: i64, info: Vec<u8> }
}

tl_object! {
    /// `msgs_all_info#8cc0d131`
    MsgsAllInfo = 0x8cc0d131 { msg_ids: Vec<i64>, info: Vec<u8> }
}

tl_object! {
    /// `msg_detailed_info#276d3ec6`
    MsgDetailedInfo = 0x276d3ec6 {
        msg_id: i64,
        answer_msg_id: i64,
        bytes: i32,
        status: i32,
    }
}

tl_object! {
    /// `msg_new_detailed_info#809db6df`
    MsgNewDetailedInfo = 0x809db6df {
        answer_msg_id: i64,
        bytes: i32,
        status: i32,
    }
}

tl_object! {
    /// `msg_resend_req#7d861a08`
    MsgResendReq = 0x7d861a08 { msg_ids: Vec<i64> }
}

tl_object! {
    /// `new_session_created#9ec20908`
    NewSessionCreated = 0x9ec20908 {
        first_msg_id: i64,
        unique_id: i64,
        server_salt: i64,
    }
}

tl_object! {
    /// `pong#347773c5`
    Pong = 0x347773c5 { msg_id: i64, ping_id: i64 }
}

/// `future_salt#0949d9dc`, always sent bare inside [`FutureSalts`].
#[derive(Clone, Debug, PartialEq)]
pub struct FutureSalt {
    pub valid_since: i32,
    pub valid_until: i32,
    pub salt: i64,
}

impl Serializable for FutureSalt {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        self.valid_since.serialize(buf);
        self.valid_until.serialize(buf);
        self.salt.serialize(buf);
    }
}

impl Deserializable for FutureSalt {
    fn deserialize(buf: Buffer) -> Result<Self> {
        Ok(Self {
            valid_since: i32::deserialize(buf)?,
            valid_until: i32::deserialize(buf)?,
            salt: i64::deserialize(buf)?,
        })
    }
}

tl_object! {
    /// `future_salts#ae500895`
    FutureSalts = 0xae500895 {
        req_msg_id: i64,
        now: i32,
        salts: RawVec<FutureSalt>,
    }
}

tl_object! {
    /// `destroy_session_ok#e22045fc`
    DestroySessionOk = 0xe22045fc { session_id: i64 }
}

tl_object! {
    /// `destroy_session_none#62d350c9`
    DestroySessionNone = 0x62d350c9 { session_id: i64 }
}

/// Boxed `DestroySessionRes`.
#[derive(Clone, Debug, PartialEq)]
pub enum DestroySessionRes {
    Ok(DestroySessionOk),
    None(DestroySessionNone),
}

impl Deserializable for DestroySessionRes {
    fn deserialize(buf: Buffer) -> Result<Self> {
        match u32::deserialize(buf)? {
            DestroySessionOk::CONSTRUCTOR_ID => Ok(Self::Ok(DestroySessionOk::deserialize_bare(buf)?)),
            DestroySessionNone::CONSTRUCTOR_ID => Ok(Self::None(DestroySessionNone::deserialize_bare(buf)?)),
            id => Err(Error::UnexpectedConstructor { id }),
        }
    }
}

// ─── Service functions ───────────────────────────────────────────────────────

tl_object! {
    /// `ping#7abe77ec ping_id:long = Pong`
    Ping = 0x7abe77ec { ping_id: i64 }
}

tl_object! {
    /// `ping_delay_disconnect#f3427b8c ping_id:long disconnect_delay:int = Pong`
    ///
    /// The server closes the connection `disconnect_delay` seconds after the
    /// last one of these unless another arrives first.
    PingDelayDisconnect = 0xf3427b8c { ping_id: i64, disconnect_delay: i32 }
}

tl_object! {
    /// `get_future_salts#b921bd04 num:int = FutureSalts`
    GetFutureSalts = 0xb921bd04 { num: i32 }
}

tl_object! {
    /// `destroy_session#e7512126 session_id:long = DestroySessionRes`
    DestroySession = 0xe7512126 { session_id: i64 }
}

impl RemoteCall for Ping { type Return = Pong; }
impl RemoteCall for PingDelayDisconnect { type Return = Pong; }
impl RemoteCall for GetFutureSalts { type Return = FutureSalts; }
impl RemoteCall for DestroySession { type Return = DestroySessionRes; }

// ─── Object table ────────────────────────────────────────────────────────────

/// Every boxed object the session engine dispatches on.
///
/// Decoding anything else fails with [`Error::TypeNotFound`], which carries
/// the unknown body so it can be forwarded (e.g. `Updates`) or logged.
#[derive(Clone, Debug, PartialEq)]
pub enum Object {
    RpcResult(RpcResult),
    MessageContainer(MessageContainer),
    GzipPacked(GzipPacked),
    Pong(Pong),
    BadServerSalt(BadServerSalt),
    BadMsgNotification(BadMsgNotification),
    MsgDetailedInfo(MsgDetailedInfo),
    MsgNewDetailedInfo(MsgNewDetailedInfo),
    NewSessionCreated(NewSessionCreated),
    MsgsAck(MsgsAck),
    FutureSalts(FutureSalts),
    MsgsStateReq(MsgsStateReq),
    MsgResendReq(MsgResendReq),
    MsgsAllInfo(MsgsAllInfo),
    RpcError(RpcError),
    DestroySessionOk(DestroySessionOk),
    DestroySessionNone(DestroySessionNone),
}

impl Deserializable for Object {
    fn deserialize(buf: Buffer) -> Result<Self> {
        let id = u32::deserialize(buf)?;
        Ok(match id {
            RpcResult::CONSTRUCTOR_ID => Self::RpcResult(RpcResult::deserialize_bare(buf)?),
            MessageContainer::CONSTRUCTOR_ID => Self::MessageContainer(MessageContainer::deserialize_bare(buf)?),
            GzipPacked::CONSTRUCTOR_ID => Self::GzipPacked(GzipPacked::deserialize_bare(buf)?),
            Pong::CONSTRUCTOR_ID => Self::Pong(Pong::deserialize_bare(buf)?),
            BadServerSalt::CONSTRUCTOR_ID => Self::BadServerSalt(BadServerSalt::deserialize_bare(buf)?),
            BadMsgNotification::CONSTRUCTOR_ID => Self::BadMsgNotification(BadMsgNotification::deserialize_bare(buf)?),
            MsgDetailedInfo::CONSTRUCTOR_ID => Self::MsgDetailedInfo(MsgDetailedInfo::deserialize_bare(buf)?),
            MsgNewDetailedInfo::CONSTRUCTOR_ID => Self::MsgNewDetailedInfo(MsgNewDetailedInfo::deserialize_bare(buf)?),
            NewSessionCreated::CONSTRUCTOR_ID => Self::NewSessionCreated(NewSessionCreated::deserialize_bare(buf)?),
            MsgsAck::CONSTRUCTOR_ID => Self::MsgsAck(MsgsAck::deserialize_bare(buf)?),
            FutureSalts::CONSTRUCTOR_ID => Self::FutureSalts(FutureSalts::deserialize_bare(buf)?),
            MsgsStateReq::CONSTRUCTOR_ID => Self::MsgsStateReq(MsgsStateReq::deserialize_bare(buf)?),
            MsgResendReq::CONSTRUCTOR_ID => Self::MsgResendReq(MsgResendReq::deserialize_bare(buf)?),
            MsgsAllInfo::CONSTRUCTOR_ID => Self::MsgsAllInfo(MsgsAllInfo::deserialize_bare(buf)?),
            RpcError::CONSTRUCTOR_ID => Self::RpcError(RpcError::deserialize_bare(buf)?),
            DestroySessionOk::CONSTRUCTOR_ID => Self::DestroySessionOk(DestroySessionOk::deserialize_bare(buf)?),
            DestroySessionNone::CONSTRUCTOR_ID => Self::DestroySessionNone(DestroySessionNone::deserialize_bare(buf)?),
            _ => {
                let mut remaining = Vec::new();
                buf.read_to_end(&mut remaining);
                return Err(Error::TypeNotFound { id, remaining });
            }
        })
    }
}
