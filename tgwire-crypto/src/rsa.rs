//! RSA with the MTProto `RSA_PAD` scheme, used once per handshake.

use num_bigint::BigUint;

use crate::{aes, sha1, sha256};

/// An RSA public key `(n, e)`.
#[derive(Clone, Debug, PartialEq)]
pub struct Key {
    n: BigUint,
    e: BigUint,
}

impl Key {
    /// Parse decimal `n` and `e` strings.
    pub fn new(n: &str, e: &str) -> Option<Self> {
        Some(Self {
            n: BigUint::parse_bytes(n.as_bytes(), 10)?,
            e: BigUint::parse_bytes(e.as_bytes(), 10)?,
        })
    }

    /// Server-side fingerprint: the lower 64 bits of
    /// `SHA1(tl_bytes(n) ‖ tl_bytes(e))`, read little-endian.
    pub fn fingerprint(&self) -> i64 {
        let digest = sha1!(&tl_bytes(&self.n.to_bytes_be()), &tl_bytes(&self.e.to_bytes_be()));
        let mut low = [0u8; 8];
        low.copy_from_slice(&digest[12..20]);
        i64::from_le_bytes(low)
    }
}

// TL `bytes` framing, duplicated here to keep this crate schema-agnostic.
fn tl_bytes(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() + 8);
    if data.len() <= 253 {
        out.push(data.len() as u8);
    } else {
        out.push(0xfe);
        out.extend_from_slice(&(data.len() as u32).to_le_bytes()[..3]);
    }
    out.extend_from_slice(data);
    out.resize(out.len().next_multiple_of(4), 0);
    out
}

fn increment(data: &mut [u8]) {
    for byte in data.iter_mut().rev() {
        let (next, overflow) = byte.overflowing_add(1);
        *byte = next;
        if !overflow {
            break;
        }
    }
}

/// Largest payload `RSA_PAD` accepts.
pub const MAX_DATA_LEN: usize = 144;

/// RSA-encrypt `data` with the `RSA_PAD` scheme.
///
/// `random_bytes` supplies the 192-byte padding source followed by the
/// 32-byte temporary AES key. Returns `None` if `data` is longer than
/// [`MAX_DATA_LEN`].
pub fn encrypt_hashed(data: &[u8], key: &Key, random_bytes: &[u8; 224]) -> Option<Vec<u8>> {
    if data.len() > MAX_DATA_LEN {
        return None;
    }

    let mut data_with_padding = Vec::with_capacity(192);
    data_with_padding.extend_from_slice(data);
    data_with_padding.extend_from_slice(&random_bytes[..192 - data.len()]);

    let data_pad_reversed: Vec<u8> = data_with_padding.iter().rev().copied().collect();

    let mut temp_key = [0u8; 32];
    temp_key.copy_from_slice(&random_bytes[192..]);

    let key_aes_encrypted = loop {
        let mut data_with_hash = Vec::with_capacity(224);
        data_with_hash.extend_from_slice(&data_pad_reversed);
        data_with_hash.extend_from_slice(&sha256!(&temp_key, &data_with_padding));

        aes::ige_encrypt(&mut data_with_hash, &temp_key, &[0u8; 32]);

        let hash = sha256!(&data_with_hash);
        let mut temp_key_xor = temp_key;
        for (k, h) in temp_key_xor.iter_mut().zip(hash) {
            *k ^= h;
        }

        let mut candidate = Vec::with_capacity(256);
        candidate.extend_from_slice(&temp_key_xor);
        candidate.extend_from_slice(&data_with_hash);

        // The result must be a valid RSA message, i.e. below the modulus.
        if BigUint::from_bytes_be(&candidate) < key.n {
            break candidate;
        }
        increment(&mut temp_key);
    };

    let encrypted = BigUint::from_bytes_be(&key_aes_encrypted).modpow(&key.e, &key.n);
    crate::bigint::to_fixed_be::<256>(&encrypted).map(|block| block.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn increment_carries() {
        let mut data = [0x00, 0xff, 0xff];
        increment(&mut data);
        assert_eq!(data, [0x01, 0x00, 0x00]);
    }

    #[test]
    fn tl_bytes_padding() {
        assert_eq!(tl_bytes(&[1, 2, 3]), [3, 1, 2, 3]);
        assert_eq!(tl_bytes(&[1, 2, 3, 4]), [4, 1, 2, 3, 4, 0, 0, 0]);
        assert_eq!(tl_bytes(&[0; 256]).len(), 260);
    }

    #[test]
    fn oversized_payload_is_rejected() {
        let key = Key::new("3233", "17").unwrap();
        assert!(encrypt_hashed(&[0; MAX_DATA_LEN + 1], &key, &[0; 224]).is_none());
    }
}
