//! Cryptographic primitives for MTProto 2.0.
//!
//! Provides:
//! - AES-256-IGE for message payloads and AES-256-CTR for Obfuscated2 transports
//! - SHA-1 / SHA-256 hash macros
//! - Big-integer byte codecs and Miller-Rabin primality checks
//! - Pollard-rho PQ factorization
//! - RSA padding (MTProto `RSA_PAD` scheme)
//! - `AuthKey`, the 256-byte session key
//! - MTProto 2.0 packet encryption / decryption in either direction
//! - DH nonce to key derivation
//! - SRP proof for the account password check

#![deny(unsafe_code)]

pub mod aes;
mod auth_key;
pub mod bigint;
mod factorize;
mod obfuscated;
pub mod random;
pub mod rsa;
#[doc(hidden)]
pub mod sha;
pub mod two_factor_auth;

pub use auth_key::AuthKey;
pub use factorize::{factorize, factorize_big};
pub use obfuscated::{CtrStream, ObfuscatedCipher};

// ─── MTProto 2.0 encrypt / decrypt ───────────────────────────────────────────

/// Errors from [`decrypt_data_v2`].
#[derive(Clone, Debug, PartialEq)]
pub enum DecryptError {
    /// Ciphertext too short or not block-aligned.
    InvalidBuffer,
    /// The `auth_key_id` in the ciphertext does not match our key.
    AuthKeyMismatch,
    /// The `msg_key` in the ciphertext does not match our computed value.
    MessageKeyMismatch,
}

impl std::fmt::Display for DecryptError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidBuffer => write!(f, "invalid ciphertext buffer length"),
            Self::AuthKeyMismatch => write!(f, "auth_key_id mismatch"),
            Self::MessageKeyMismatch => write!(f, "msg_key mismatch"),
        }
    }
}

impl std::error::Error for DecryptError {}

/// Which peer produced a packet. Selects the `x` offset into the auth key.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Side {
    Client,
    Server,
}

impl Side {
    fn x(self) -> usize {
        match self {
            Side::Client => 0,
            Side::Server => 8,
        }
    }
}

/// MTProto 2.0 KDF: derive the AES key and IV for one packet.
pub fn calc_key(auth_key: &AuthKey, msg_key: &[u8; 16], side: Side) -> ([u8; 32], [u8; 32]) {
    let x = side.x();
    let sha_a = sha256!(msg_key, &auth_key.data[x..x + 36]);
    let sha_b = sha256!(&auth_key.data[40 + x..40 + x + 36], msg_key);

    let mut aes_key = [0u8; 32];
    aes_key[..8].copy_from_slice(&sha_a[..8]);
    aes_key[8..24].copy_from_slice(&sha_b[8..24]);
    aes_key[24..].copy_from_slice(&sha_a[24..]);

    let mut aes_iv = [0u8; 32];
    aes_iv[..8].copy_from_slice(&sha_b[..8]);
    aes_iv[8..24].copy_from_slice(&sha_a[8..24]);
    aes_iv[24..].copy_from_slice(&sha_b[24..]);

    (aes_key, aes_iv)
}

/// Random padding appended to a plaintext of `len` bytes: between 12 and 27
/// bytes, bringing the total to a multiple of 16.
pub fn padding_len(len: usize) -> usize {
    12 + (16 - (len + 12) % 16) % 16
}

fn msg_key_for(auth_key: &AuthKey, plaintext: &[u8], side: Side) -> [u8; 16] {
    let x = side.x();
    let large = sha256!(&auth_key.data[88 + x..88 + x + 32], plaintext);
    let mut msg_key = [0u8; 16];
    msg_key.copy_from_slice(&large[8..24]);
    msg_key
}

/// Encrypt `plaintext` as `side`, returning `key_id ‖ msg_key ‖ ciphertext`.
pub fn encrypt_data_v2(plaintext: &[u8], auth_key: &AuthKey, side: Side) -> Vec<u8> {
    let mut padding = [0u8; 27];
    random::fill(&mut padding);
    do_encrypt_data_v2(plaintext, auth_key, side, &padding)
}

#[doc(hidden)]
pub fn do_encrypt_data_v2(plaintext: &[u8], auth_key: &AuthKey, side: Side, padding: &[u8; 27]) -> Vec<u8> {
    let pad = padding_len(plaintext.len());
    let mut buffer = Vec::with_capacity(24 + plaintext.len() + pad);
    buffer.extend_from_slice(&auth_key.key_id());
    buffer.extend_from_slice(&[0u8; 16]);
    buffer.extend_from_slice(plaintext);
    buffer.extend_from_slice(&padding[..pad]);

    let msg_key = msg_key_for(auth_key, &buffer[24..], side);
    let (key, iv) = calc_key(auth_key, &msg_key, side);
    aes::ige_encrypt(&mut buffer[24..], &key, &iv);
    buffer[8..24].copy_from_slice(&msg_key);
    buffer
}

/// Decrypt a packet produced by `sender`.
///
/// `buffer` must start with `key_id ‖ msg_key ‖ ciphertext`. On success the
/// returned slice holds the plaintext, padding included.
pub fn decrypt_data_v2<'a>(buffer: &'a mut [u8], auth_key: &AuthKey, sender: Side) -> Result<&'a mut [u8], DecryptError> {
    if buffer.len() < 24 || (buffer.len() - 24) % 16 != 0 {
        return Err(DecryptError::InvalidBuffer);
    }
    if auth_key.key_id() != buffer[..8] {
        return Err(DecryptError::AuthKeyMismatch);
    }
    let mut msg_key = [0u8; 16];
    msg_key.copy_from_slice(&buffer[8..24]);

    let (key, iv) = calc_key(auth_key, &msg_key, sender);
    aes::ige_decrypt(&mut buffer[24..], &key, &iv);

    if msg_key != msg_key_for(auth_key, &buffer[24..], sender) {
        return Err(DecryptError::MessageKeyMismatch);
    }
    Ok(&mut buffer[24..])
}

/// Derive `(key, iv)` from nonces for decrypting `server_DH_params_ok.encrypted_answer`
/// and encrypting `client_DH_inner_data`.
pub fn generate_key_data_from_nonce(server_nonce: &[u8; 16], new_nonce: &[u8; 32]) -> ([u8; 32], [u8; 32]) {
    let h1 = sha1!(new_nonce, server_nonce);
    let h2 = sha1!(server_nonce, new_nonce);
    let h3 = sha1!(new_nonce, new_nonce);

    let mut key = [0u8; 32];
    key[..20].copy_from_slice(&h1);
    key[20..].copy_from_slice(&h2[..12]);

    let mut iv = [0u8; 32];
    iv[..8].copy_from_slice(&h2[12..]);
    iv[8..28].copy_from_slice(&h3);
    iv[28..].copy_from_slice(&new_nonce[..4]);

    (key, iv)
}
