//! Per-connection MTProto 2.0 session state.
//!
//! [`MtpState`] owns everything that has to agree between the two ends of an
//! encrypted session: the auth key, server salt, session ID, message-ID clock
//! and sequence counter, plus a window of recently seen server message IDs
//! for replay detection.

use std::collections::VecDeque;
use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tgwire_crypto::{AuthKey, Side, decrypt_data_v2, encrypt_data_v2, random};

use crate::compression::gzip_if_smaller;

/// How many server message IDs are remembered for duplicate detection.
pub const MSG_ID_WINDOW: usize = 500;

// salt + session_id + msg_id + seq_no + length
const INNER_HEADER_LEN: usize = 8 + 8 + 8 + 4 + 4;

/// An integrity or replay failure. The packet must be dropped, but the
/// connection itself is fine.
#[derive(Clone, Debug, PartialEq)]
pub enum SecurityError {
    AuthKeyMismatch,
    MessageKeyMismatch,
    SessionMismatch { got: i64, expected: i64 },
    DuplicateMessageId { msg_id: i64 },
}

impl fmt::Display for SecurityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AuthKeyMismatch => write!(f, "server replied with an invalid auth key"),
            Self::MessageKeyMismatch => write!(f, "received msg_key doesn't match the expected one"),
            Self::SessionMismatch { got, expected } => {
                write!(f, "server replied with session {got}, ours is {expected}")
            }
            Self::DuplicateMessageId { msg_id } => write!(f, "duplicate msg_id {msg_id}"),
        }
    }
}

/// Errors from [`MtpState::decrypt_message_data`].
#[derive(Clone, Debug, PartialEq)]
pub enum DecryptError {
    /// A 4-byte packet: the server reporting a transport-level error code.
    /// `404` means it no longer knows our auth key.
    TransportStatus { code: i32 },
    /// Too short or not block-aligned.
    InvalidBuffer { len: usize },
    /// No auth key is installed yet.
    AuthKeyUnset,
    /// Decrypted, but the inner envelope is inconsistent.
    Malformed,
    Security(SecurityError),
}

impl DecryptError {
    /// `true` for the transport status that means the server lost our key.
    pub fn is_auth_key_lost(&self) -> bool {
        matches!(self, Self::TransportStatus { code: 404 })
    }
}

impl fmt::Display for DecryptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TransportStatus { code } => write!(f, "transport error {code}"),
            Self::InvalidBuffer { len } => write!(f, "invalid encrypted buffer of {len} bytes"),
            Self::AuthKeyUnset => write!(f, "auth key unset"),
            Self::Malformed => write!(f, "malformed inner message"),
            Self::Security(e) => write!(f, "security error: {e}"),
        }
    }
}

impl std::error::Error for DecryptError {}

impl From<SecurityError> for DecryptError {
    fn from(e: SecurityError) -> Self {
        Self::Security(e)
    }
}

/// One decrypted message as sent by the server.
#[derive(Clone, Debug, PartialEq)]
pub struct TlMessage {
    pub msg_id: i64,
    pub seq_no: i32,
    pub body: Vec<u8>,
}

/// Encrypted-session state.
pub struct MtpState {
    auth_key: Option<AuthKey>,
    /// Seconds to add to the local clock to get server time.
    pub time_offset: i32,
    pub salt: i64,
    session_id: i64,
    sequence: i32,
    last_msg_id: i64,
    msg_ids: VecDeque<i64>,
    security_checks: bool,
    check_session_id: bool,
}

impl MtpState {
    pub fn new(auth_key: Option<AuthKey>, security_checks: bool) -> Self {
        Self {
            auth_key,
            time_offset: 0,
            salt: 0,
            session_id: random::long(),
            sequence: 0,
            last_msg_id: 0,
            msg_ids: VecDeque::with_capacity(MSG_ID_WINDOW + 1),
            security_checks,
            check_session_id: false,
        }
    }

    pub fn auth_key(&self) -> Option<&AuthKey> {
        self.auth_key.as_ref()
    }

    pub fn set_auth_key(&mut self, auth_key: Option<AuthKey>) {
        self.auth_key = auth_key;
    }

    pub fn session_id(&self) -> i64 {
        self.session_id
    }

    /// Also reject packets whose session ID is not ours. Off by default:
    /// servers may still deliver messages addressed to the previous session
    /// right after a reset.
    pub fn set_session_check(&mut self, enabled: bool) {
        self.check_session_id = enabled;
    }

    /// Number of content-related messages sent in this session.
    pub fn sequence(&self) -> i32 {
        self.sequence
    }

    /// Shift the sequence counter after a `bad_msg_notification` about it.
    pub fn adjust_sequence(&mut self, delta: i32) {
        self.sequence = self.sequence.wrapping_add(delta);
    }

    /// Start a new session: fresh ID, counters and replay window.
    pub fn reset(&mut self) {
        self.session_id = random::long();
        self.sequence = 0;
        self.last_msg_id = 0;
        self.msg_ids.clear();
    }

    /// A new message ID for the current server-adjusted time.
    ///
    /// IDs from one state strictly increase even when the clock does not.
    pub fn new_msg_id(&mut self) -> i64 {
        self.new_msg_id_at(now())
    }

    fn new_msg_id_at(&mut self, since_epoch: Duration) -> i64 {
        let secs = since_epoch.as_secs() as i64 + i64::from(self.time_offset);
        let nanos = i64::from(since_epoch.subsec_nanos());
        let mut msg_id = (secs << 32) | (nanos << 2);
        if self.last_msg_id >= msg_id {
            msg_id = self.last_msg_id + 4;
        }
        self.last_msg_id = msg_id;
        msg_id
    }

    /// `2n + 1` (and advance) for content-related messages, `2n` otherwise.
    pub fn seq_no(&mut self, content_related: bool) -> i32 {
        if content_related {
            let seq = self.sequence * 2 + 1;
            self.sequence += 1;
            seq
        } else {
            self.sequence * 2
        }
    }

    /// Adopt the clock implied by a server-accepted message ID.
    ///
    /// Returns the new offset. Changing it restarts the message-ID clock.
    pub fn update_time_offset(&mut self, correct_msg_id: i64) -> i32 {
        let old = self.time_offset;
        let now = now().as_secs() as i64;
        self.time_offset = ((correct_msg_id >> 32) - now) as i32;

        if self.time_offset != old {
            self.last_msg_id = 0;
            log::debug!(
                "updated time offset (old offset {old}, good msg_id {correct_msg_id}, new offset {})",
                self.time_offset
            );
        }
        self.time_offset
    }

    /// Append `msg_id ‖ seq_no ‖ len ‖ body` to `buf` and return the message ID.
    ///
    /// Content-related bodies may be replaced by their `gzip_packed` form.
    pub fn write_data_as_message(&mut self, buf: &mut Vec<u8>, data: &[u8], content_related: bool) -> i64 {
        let msg_id = self.new_msg_id();
        let seq_no = self.seq_no(content_related);
        let body = gzip_if_smaller(content_related, data);

        buf.extend_from_slice(&msg_id.to_le_bytes());
        buf.extend_from_slice(&seq_no.to_le_bytes());
        buf.extend_from_slice(&(body.len() as i32).to_le_bytes());
        buf.extend_from_slice(&body);
        msg_id
    }

    /// Encrypt one payload (a message written by [`Self::write_data_as_message`]).
    pub fn encrypt_message_data(&self, payload: &[u8]) -> Result<Vec<u8>, DecryptError> {
        let auth_key = self.auth_key.as_ref().ok_or(DecryptError::AuthKeyUnset)?;

        let mut plaintext = Vec::with_capacity(16 + payload.len());
        plaintext.extend_from_slice(&self.salt.to_le_bytes());
        plaintext.extend_from_slice(&self.session_id.to_le_bytes());
        plaintext.extend_from_slice(payload);

        Ok(encrypt_data_v2(&plaintext, auth_key, Side::Client))
    }

    /// Decrypt and validate one packet from the server.
    pub fn decrypt_message_data(&mut self, body: &mut [u8]) -> Result<TlMessage, DecryptError> {
        if body.len() == 4 {
            let code = i32::from_le_bytes([body[0], body[1], body[2], body[3]]);
            return Err(DecryptError::TransportStatus { code: code.wrapping_neg() });
        }
        if body.len() < 8 {
            return Err(DecryptError::InvalidBuffer { len: body.len() });
        }
        let auth_key = self.auth_key.as_ref().ok_or(DecryptError::AuthKeyUnset)?;

        let len = body.len();
        let plaintext = decrypt_data_v2(body, auth_key, Side::Server).map_err(|e| match e {
            tgwire_crypto::DecryptError::InvalidBuffer => DecryptError::InvalidBuffer { len },
            tgwire_crypto::DecryptError::AuthKeyMismatch => SecurityError::AuthKeyMismatch.into(),
            tgwire_crypto::DecryptError::MessageKeyMismatch => SecurityError::MessageKeyMismatch.into(),
        })?;

        if plaintext.len() < INNER_HEADER_LEN {
            return Err(DecryptError::Malformed);
        }
        let read_i64 = |at: usize| {
            let mut b = [0u8; 8];
            b.copy_from_slice(&plaintext[at..at + 8]);
            i64::from_le_bytes(b)
        };
        let read_i32 = |at: usize| {
            i32::from_le_bytes([plaintext[at], plaintext[at + 1], plaintext[at + 2], plaintext[at + 3]])
        };

        let session_id = read_i64(8);
        let msg_id = read_i64(16);
        let seq_no = read_i32(24);
        let body_len = read_i32(28);

        if self.check_session_id && session_id != self.session_id {
            return Err(SecurityError::SessionMismatch { got: session_id, expected: self.session_id }.into());
        }
        if body_len < 0 || INNER_HEADER_LEN + body_len as usize > plaintext.len() {
            return Err(DecryptError::Malformed);
        }

        if self.security_checks && self.msg_ids.contains(&msg_id) {
            return Err(SecurityError::DuplicateMessageId { msg_id }.into());
        }
        if self.msg_ids.len() >= MSG_ID_WINDOW {
            self.msg_ids.pop_front();
        }
        self.msg_ids.push_back(msg_id);

        let body = plaintext[INNER_HEADER_LEN..INNER_HEADER_LEN + body_len as usize].to_vec();
        Ok(TlMessage { msg_id, seq_no, body })
    }
}

impl fmt::Debug for MtpState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MtpState")
            .field("auth_key", &self.auth_key)
            .field("time_offset", &self.time_offset)
            .field("salt", &self.salt)
            .field("session_id", &self.session_id)
            .field("sequence", &self.sequence)
            .finish_non_exhaustive()
    }
}

fn now() -> Duration {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> AuthKey {
        AuthKey::from_bytes(std::array::from_fn(|i| (i * 7 % 256) as u8))
    }

    // What a server would send: salt ‖ session ‖ msg_id ‖ seq ‖ len ‖ body, encrypted server-side.
    fn server_packet(state: &MtpState, msg_id: i64, seq_no: i32, body: &[u8]) -> Vec<u8> {
        let mut plain = Vec::new();
        plain.extend_from_slice(&state.salt.to_le_bytes());
        plain.extend_from_slice(&state.session_id().to_le_bytes());
        plain.extend_from_slice(&msg_id.to_le_bytes());
        plain.extend_from_slice(&seq_no.to_le_bytes());
        plain.extend_from_slice(&(body.len() as i32).to_le_bytes());
        plain.extend_from_slice(body);
        encrypt_data_v2(&plain, &key(), Side::Server)
    }

    #[test]
    fn msg_ids_strictly_increase_within_one_instant() {
        let mut state = MtpState::new(None, true);
        let instant = Duration::new(1_700_000_000, 123_456_789);
        let first = state.new_msg_id_at(instant);
        let second = state.new_msg_id_at(instant);
        let third = state.new_msg_id_at(instant);
        assert_eq!(first >> 32, 1_700_000_000);
        assert_eq!(first % 4, 0);
        assert_eq!(second, first + 4);
        assert_eq!(third, first + 8);
    }

    #[test]
    fn msg_ids_from_clock_increase() {
        let mut state = MtpState::new(None, true);
        let ids: Vec<i64> = (0..1000).map(|_| state.new_msg_id()).collect();
        assert!(ids.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn seq_no_parity() {
        let mut state = MtpState::new(None, true);
        assert_eq!(state.seq_no(false), 0);
        assert_eq!(state.seq_no(true), 1);
        assert_eq!(state.seq_no(false), 2);
        assert_eq!(state.seq_no(true), 3);
        assert_eq!(state.seq_no(true), 5);
        state.adjust_sequence(64);
        assert_eq!(state.seq_no(false), 2 * 67);
    }

    #[test]
    fn time_offset_follows_server_msg_id() {
        let mut state = MtpState::new(None, true);
        state.new_msg_id();
        let server_now = now().as_secs() as i64 + 3600;
        let offset = state.update_time_offset(server_now << 32);
        assert!((3599..=3600).contains(&offset), "offset={offset}");
        assert!(state.new_msg_id() >> 32 >= server_now - 1);
    }

    #[test]
    fn reset_starts_a_new_session() {
        let mut state = MtpState::new(None, true);
        let old = state.session_id();
        state.seq_no(true);
        state.reset();
        assert_ne!(state.session_id(), old);
        assert_eq!(state.sequence(), 0);
    }

    #[test]
    fn written_message_layout() {
        let mut state = MtpState::new(None, true);
        let mut buf = Vec::new();
        let msg_id = state.write_data_as_message(&mut buf, &[1, 2, 3, 4], true);
        assert_eq!(&buf[..8], &msg_id.to_le_bytes());
        assert_eq!(&buf[8..12], &1i32.to_le_bytes());
        assert_eq!(&buf[12..16], &4i32.to_le_bytes());
        assert_eq!(&buf[16..], &[1, 2, 3, 4]);
    }

    #[test]
    fn client_payload_is_readable_server_side() {
        let mut state = MtpState::new(Some(key()), true);
        state.salt = 0x1234;
        let payload = [7u8; 40];
        let mut packet = state.encrypt_message_data(&payload).unwrap();

        let plain = decrypt_data_v2(&mut packet, &key(), Side::Client).unwrap();
        assert_eq!(&plain[..8], &0x1234i64.to_le_bytes());
        assert_eq!(&plain[8..16], &state.session_id().to_le_bytes());
        assert_eq!(&plain[16..56], &payload);
    }

    #[test]
    fn server_packet_decrypts() {
        let mut state = MtpState::new(Some(key()), true);
        let mut packet = server_packet(&state, 101, 1, b"pong body...");
        let message = state.decrypt_message_data(&mut packet).unwrap();
        assert_eq!(message, TlMessage { msg_id: 101, seq_no: 1, body: b"pong body...".to_vec() });
    }

    #[test]
    fn replayed_packet_is_a_security_error() {
        let mut state = MtpState::new(Some(key()), true);
        let packet = server_packet(&state, 101, 1, &[0; 8]);
        state.decrypt_message_data(&mut packet.clone()).unwrap();
        assert_eq!(
            state.decrypt_message_data(&mut packet.clone()),
            Err(DecryptError::Security(SecurityError::DuplicateMessageId { msg_id: 101 }))
        );

        let mut lenient = MtpState::new(Some(key()), false);
        let packet = server_packet(&lenient, 101, 1, &[0; 8]);
        lenient.decrypt_message_data(&mut packet.clone()).unwrap();
        assert!(lenient.decrypt_message_data(&mut packet.clone()).is_ok());
    }

    #[test]
    fn foreign_session_ids_are_only_refused_on_request() {
        let mut state = MtpState::new(Some(key()), true);
        let mut packet = server_packet(&state, 101, 1, &[0; 8]);
        state.reset();
        assert!(state.decrypt_message_data(&mut packet).is_ok());

        let mut strict = MtpState::new(Some(key()), true);
        strict.set_session_check(true);
        let mut packet = server_packet(&strict, 101, 1, &[0; 8]);
        strict.reset();
        assert!(matches!(
            strict.decrypt_message_data(&mut packet),
            Err(DecryptError::Security(SecurityError::SessionMismatch { .. }))
        ));
    }

    #[test]
    fn replay_window_is_bounded() {
        let mut state = MtpState::new(Some(key()), true);
        for msg_id in 0..=MSG_ID_WINDOW as i64 {
            let mut packet = server_packet(&state, msg_id, 0, &[]);
            state.decrypt_message_data(&mut packet).unwrap();
        }
        // The first ID has been evicted and is accepted again.
        let mut packet = server_packet(&state, 0, 0, &[]);
        assert!(state.decrypt_message_data(&mut packet).is_ok());
    }

    #[test]
    fn short_bodies() {
        let mut state = MtpState::new(Some(key()), true);
        let mut status = (-404i32).to_le_bytes();
        let err = state.decrypt_message_data(&mut status).unwrap_err();
        assert_eq!(err, DecryptError::TransportStatus { code: 404 });
        assert!(err.is_auth_key_lost());

        assert_eq!(
            state.decrypt_message_data(&mut [0; 6]),
            Err(DecryptError::InvalidBuffer { len: 6 })
        );
    }

    #[test]
    fn tampered_packet_is_a_security_error() {
        let mut state = MtpState::new(Some(key()), true);
        let mut packet = server_packet(&state, 1, 0, &[0; 16]);
        let last = packet.len() - 1;
        packet[last] ^= 1;
        assert_eq!(
            state.decrypt_message_data(&mut packet),
            Err(DecryptError::Security(SecurityError::MessageKeyMismatch))
        );
    }
}
