//! Obfuscated2 connection header.
//!
//! The client opens the stream with 64 bytes that look random to an
//! observer. Bytes 56..60 hold the framing tag, and the header doubles as
//! key material for the AES-CTR streams in both directions. After the header,
//! every byte on the wire goes through [`ObfuscatedCipher`].

use tgwire_crypto::{ObfuscatedCipher, random};

// First words the server would mistake for another protocol.
const FORBIDDEN_PREFIXES: [[u8; 4]; 7] = [
    *b"HEAD",
    *b"POST",
    *b"GET ",
    *b"OPTI",
    [0xdd; 4],
    [0xee; 4],
    [0x16, 0x03, 0x01, 0x02],
];

/// Whether `init` is usable as a header before the tag is written.
pub fn is_valid_init(init: &[u8; 64]) -> bool {
    init[0] != 0xef
        && !FORBIDDEN_PREFIXES.iter().any(|p| init[..4] == *p)
        && init[4..8] != [0; 4]
}

/// Build the header for `tag` and the cipher for the rest of the stream.
pub fn generate_header(tag: [u8; 4], secret: Option<&[u8]>) -> ([u8; 64], ObfuscatedCipher) {
    loop {
        let init = random::bytes::<64>();
        if is_valid_init(&init) {
            return header_from_init(init, tag, secret);
        }
    }
}

/// [`generate_header`] with caller-chosen randomness.
pub fn header_from_init(mut init: [u8; 64], tag: [u8; 4], secret: Option<&[u8]>) -> ([u8; 64], ObfuscatedCipher) {
    init[56..60].copy_from_slice(&tag);

    let mut cipher = ObfuscatedCipher::new(&init, secret);
    let mut encrypted = init;
    cipher.encrypt(&mut encrypted);

    // Only the tail is sent encrypted; the keystream has still advanced by 64.
    init[56..].copy_from_slice(&encrypted[56..]);
    (init, cipher)
}

/// The server's view of a header: recover the tag and build the mirrored
/// cipher (its `encrypt` is our `decrypt`).
pub fn accept_header(header: &[u8; 64], secret: Option<&[u8]>) -> ([u8; 4], ObfuscatedCipher) {
    let mut mirrored = *header;
    let reversed: Vec<u8> = header[8..56].iter().rev().copied().collect();
    mirrored[8..56].copy_from_slice(&reversed);

    let mut server = ObfuscatedCipher::new(&mirrored, secret);
    let mut plain = *header;
    server.decrypt(&mut plain);

    let mut tag = [0u8; 4];
    tag.copy_from_slice(&plain[56..60]);
    (tag, server)
}
