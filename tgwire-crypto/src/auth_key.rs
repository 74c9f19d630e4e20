use std::fmt;

use crate::sha1;

/// The 2048-bit key shared with one data center.
///
/// `aux_hash` and `key_id` are derived once on construction:
/// `SHA1(key)[0..8]` and `SHA1(key)[12..20]`.
#[derive(Clone)]
pub struct AuthKey {
    pub(crate) data: [u8; 256],
    aux_hash: [u8; 8],
    key_id: [u8; 8],
}

impl AuthKey {
    /// Wrap the 256-byte output of the DH exchange.
    pub fn from_bytes(data: [u8; 256]) -> Self {
        let digest = sha1!(&data);
        let mut aux_hash = [0u8; 8];
        aux_hash.copy_from_slice(&digest[..8]);
        let mut key_id = [0u8; 8];
        key_id.copy_from_slice(&digest[12..20]);
        Self { data, aux_hash, key_id }
    }

    /// Build from a persisted key. `None` unless `bytes` is exactly 256 long.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let data: [u8; 256] = bytes.try_into().ok()?;
        Some(Self::from_bytes(data))
    }

    pub fn to_bytes(&self) -> [u8; 256] {
        self.data
    }

    pub fn as_bytes(&self) -> &[u8; 256] {
        &self.data
    }

    /// The 8 bytes that prefix every encrypted packet.
    pub fn key_id(&self) -> [u8; 8] {
        self.key_id
    }

    pub fn aux_hash(&self) -> [u8; 8] {
        self.aux_hash
    }

    /// `SHA1(new_nonce ‖ number ‖ aux_hash)[4..20]`, where `number` is 1, 2
    /// or 3 for `dh_gen_ok`, `dh_gen_retry` and `dh_gen_fail` respectively.
    pub fn calc_new_nonce_hash(&self, new_nonce: &[u8; 32], number: u8) -> [u8; 16] {
        let digest = sha1!(new_nonce, [number], &self.aux_hash);
        let mut out = [0u8; 16];
        out.copy_from_slice(&digest[4..]);
        out
    }
}

impl fmt::Debug for AuthKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AuthKey(id={:#018x})", u64::from_le_bytes(self.key_id))
    }
}

impl PartialEq for AuthKey {
    fn eq(&self, other: &Self) -> bool {
        self.data == other.data
    }
}

impl Eq for AuthKey {}
