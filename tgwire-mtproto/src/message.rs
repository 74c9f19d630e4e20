//! Unencrypted message envelope, used only during key exchange.
//!
//! ```text
//! auth_key_id:long  (always 0)
//! message_id:long
//! message_data_length:int
//! message_data:bytes
//! ```

use std::fmt;

/// Why a plain response was rejected.
#[derive(Clone, Debug, PartialEq)]
pub enum Error {
    /// Shorter than the 20-byte header.
    TooShort { len: usize },
    /// `auth_key_id` was not zero.
    NonZeroAuthKeyId { got: i64 },
    /// `message_id` was zero.
    ZeroMessageId,
    /// The length field disagrees with the bytes that follow.
    LengthMismatch { declared: i32, actual: usize },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TooShort { len } => write!(f, "plain message too short: {len} bytes"),
            Self::NonZeroAuthKeyId { got } => write!(f, "bad auth_key_id in plain message: {got}"),
            Self::ZeroMessageId => write!(f, "plain message has msg_id 0"),
            Self::LengthMismatch { declared, actual } => {
                write!(f, "plain message declares {declared} bytes but carries {actual}")
            }
        }
    }
}

impl std::error::Error for Error {}

/// Wrap `body` in the plain envelope.
pub fn encode_plain(msg_id: i64, body: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(20 + body.len());
    buf.extend_from_slice(&0i64.to_le_bytes());
    buf.extend_from_slice(&msg_id.to_le_bytes());
    buf.extend_from_slice(&(body.len() as i32).to_le_bytes());
    buf.extend_from_slice(body);
    buf
}

/// Validate a plain envelope and return `(msg_id, body)`.
pub fn decode_plain(packet: &[u8]) -> Result<(i64, &[u8]), Error> {
    if packet.len() < 20 {
        return Err(Error::TooShort { len: packet.len() });
    }
    let read_i64 = |at: usize| {
        let mut b = [0u8; 8];
        b.copy_from_slice(&packet[at..at + 8]);
        i64::from_le_bytes(b)
    };

    let auth_key_id = read_i64(0);
    if auth_key_id != 0 {
        return Err(Error::NonZeroAuthKeyId { got: auth_key_id });
    }
    let msg_id = read_i64(8);
    if msg_id == 0 {
        return Err(Error::ZeroMessageId);
    }

    let declared = i32::from_le_bytes([packet[16], packet[17], packet[18], packet[19]]);
    let body = &packet[20..];
    if declared < 0 || declared as usize > body.len() {
        return Err(Error::LengthMismatch { declared, actual: body.len() });
    }
    Ok((msg_id, &body[..declared as usize]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout() {
        let wire = encode_plain(0x0102030405060708, &[0xaa, 0xbb, 0xcc, 0xdd]);
        assert_eq!(wire.len(), 24);
        assert_eq!(&wire[..8], &[0u8; 8]);
        assert_eq!(&wire[8..16], &0x0102030405060708i64.to_le_bytes());
        assert_eq!(&wire[16..20], &[4, 0, 0, 0]);
        assert_eq!(decode_plain(&wire), Ok((0x0102030405060708, &[0xaa, 0xbb, 0xcc, 0xdd][..])));
    }

    #[test]
    fn rejects_bad_envelopes() {
        assert_eq!(decode_plain(&[0; 10]), Err(Error::TooShort { len: 10 }));

        let mut wire = encode_plain(5, &[1, 2, 3, 4]);
        wire[0] = 1;
        assert_eq!(decode_plain(&wire), Err(Error::NonZeroAuthKeyId { got: 1 }));

        assert_eq!(decode_plain(&encode_plain(0, &[])), Err(Error::ZeroMessageId));

        let mut wire = encode_plain(5, &[1, 2, 3, 4]);
        wire[16] = 9;
        assert_eq!(decode_plain(&wire), Err(Error::LengthMismatch { declared: 9, actual: 4 }));
    }
}
