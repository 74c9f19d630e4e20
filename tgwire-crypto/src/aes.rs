//! AES-256 in Infinite Garble Extension mode.
//!
//! The 32-byte IV is two 16-byte halves: the "previous ciphertext" block
//! followed by the "previous plaintext" block.

use aes::Aes256;
use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockDecrypt, BlockEncrypt, KeyInit};

fn xor_block(block: &mut [u8], mask: &[u8; 16]) {
    for (b, m) in block.iter_mut().zip(mask) {
        *b ^= m;
    }
}

fn split_iv(iv: &[u8; 32]) -> ([u8; 16], [u8; 16]) {
    let mut prev_cipher = [0u8; 16];
    let mut prev_plain = [0u8; 16];
    prev_cipher.copy_from_slice(&iv[..16]);
    prev_plain.copy_from_slice(&iv[16..]);
    (prev_cipher, prev_plain)
}

/// Encrypt `buffer` in place.
///
/// `buffer.len()` must be a multiple of 16; a trailing partial block is left
/// untouched.
pub fn ige_encrypt(buffer: &mut [u8], key: &[u8; 32], iv: &[u8; 32]) {
    debug_assert_eq!(buffer.len() % 16, 0);
    let cipher = Aes256::new(GenericArray::from_slice(key));
    let (mut prev_cipher, mut prev_plain) = split_iv(iv);

    for block in buffer.chunks_exact_mut(16) {
        let mut plain = [0u8; 16];
        plain.copy_from_slice(block);

        xor_block(block, &prev_cipher);
        cipher.encrypt_block(GenericArray::from_mut_slice(block));
        xor_block(block, &prev_plain);

        prev_cipher.copy_from_slice(block);
        prev_plain = plain;
    }
}

/// Decrypt `buffer` in place. Same length rule as [`ige_encrypt`].
pub fn ige_decrypt(buffer: &mut [u8], key: &[u8; 32], iv: &[u8; 32]) {
    debug_assert_eq!(buffer.len() % 16, 0);
    let cipher = Aes256::new(GenericArray::from_slice(key));
    let (mut prev_cipher, mut prev_plain) = split_iv(iv);

    for block in buffer.chunks_exact_mut(16) {
        let mut ciphertext = [0u8; 16];
        ciphertext.copy_from_slice(block);

        xor_block(block, &prev_plain);
        cipher.decrypt_block(GenericArray::from_mut_slice(block));
        xor_block(block, &prev_cipher);

        prev_plain.copy_from_slice(block);
        prev_cipher = ciphertext;
    }
}
