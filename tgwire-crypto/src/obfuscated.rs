//! AES-256-CTR stream state for Obfuscated2 transports.

use aes::cipher::generic_array::GenericArray;
use aes::cipher::{KeyIvInit, StreamCipher};

use crate::sha256;

type Aes256Ctr = ctr::Ctr128BE<aes::Aes256>;

/// Independent CTR keystreams for the two directions of a connection.
pub struct ObfuscatedCipher {
    tx: Aes256Ctr,
    rx: Aes256Ctr,
}

impl ObfuscatedCipher {
    /// Derive both keystreams from the 64-byte connection header.
    ///
    /// Outgoing traffic uses `init[8..40]` / `init[40..56]`; incoming traffic
    /// uses the same 48 bytes reversed. With an MTProxy `secret` each key is
    /// replaced by `SHA256(key ‖ secret)`.
    pub fn new(init: &[u8; 64], secret: Option<&[u8]>) -> Self {
        let reversed: Vec<u8> = init[8..56].iter().rev().copied().collect();

        let mut tx_key = [0u8; 32];
        tx_key.copy_from_slice(&init[8..40]);
        let mut rx_key = [0u8; 32];
        rx_key.copy_from_slice(&reversed[..32]);

        if let Some(secret) = secret {
            tx_key = sha256!(&tx_key, secret);
            rx_key = sha256!(&rx_key, secret);
        }

        Self {
            tx: Aes256Ctr::new(GenericArray::from_slice(&tx_key), GenericArray::from_slice(&init[40..56])),
            rx: Aes256Ctr::new(GenericArray::from_slice(&rx_key), GenericArray::from_slice(&reversed[32..])),
        }
    }

    /// Encrypt outgoing bytes in place.
    pub fn encrypt(&mut self, buf: &mut [u8]) {
        self.tx.apply_keystream(buf);
    }

    /// Decrypt incoming bytes in place.
    pub fn decrypt(&mut self, buf: &mut [u8]) {
        self.rx.apply_keystream(buf);
    }

    /// Separate the two directions so a writer and a reader task can each
    /// own one. Returns `(outgoing, incoming)`.
    pub fn split(self) -> (CtrStream, CtrStream) {
        (CtrStream(self.tx), CtrStream(self.rx))
    }
}

/// One direction of an [`ObfuscatedCipher`].
pub struct CtrStream(Aes256Ctr);

impl CtrStream {
    /// Encrypt or decrypt `buf` in place, depending on which half this is.
    pub fn apply(&mut self, buf: &mut [u8]) {
        self.0.apply_keystream(buf);
    }
}

impl std::fmt::Debug for CtrStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("CtrStream")
    }
}

impl std::fmt::Debug for ObfuscatedCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ObfuscatedCipher")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // The peer swaps directions: its receive key is our send key.
    fn peer_of(init: &[u8; 64]) -> [u8; 64] {
        let mut mirrored = *init;
        let reversed: Vec<u8> = init[8..56].iter().rev().copied().collect();
        mirrored[8..56].copy_from_slice(&reversed);
        mirrored
    }

    #[test]
    fn peer_decrypts_our_stream() {
        let init: [u8; 64] = std::array::from_fn(|i| (i * 7 + 3) as u8);
        let mut ours = ObfuscatedCipher::new(&init, None);
        let mut theirs = ObfuscatedCipher::new(&peer_of(&init), None);

        let mut first = *b"first packet....";
        let mut second = *b"and the next one";
        ours.encrypt(&mut first);
        ours.encrypt(&mut second);
        theirs.decrypt(&mut first);
        theirs.decrypt(&mut second);
        assert_eq!(&first, b"first packet....");
        assert_eq!(&second, b"and the next one");
    }

    #[test]
    fn split_halves_match_the_whole() {
        let init: [u8; 64] = std::array::from_fn(|i| (i * 11 + 1) as u8);
        let (mut tx, _) = ObfuscatedCipher::new(&init, None).split();
        let mut whole = ObfuscatedCipher::new(&init, None);

        let mut a = *b"0123456789abcdef";
        let mut b = a;
        tx.apply(&mut a);
        whole.encrypt(&mut b);
        assert_eq!(a, b);
    }

    #[test]
    fn secret_changes_keystream() {
        let init = [5u8; 64];
        let mut plain = [0u8; 16];
        let mut keyed = [0u8; 16];
        ObfuscatedCipher::new(&init, None).encrypt(&mut plain);
        ObfuscatedCipher::new(&init, Some(&[1, 2, 3, 4])).encrypt(&mut keyed);
        assert_ne!(plain, keyed);
    }
}
