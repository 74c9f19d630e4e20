//! SRP-2048 proof for the account password check (`auth.checkPassword`).

use num_bigint::{BigInt, Sign};
use num_traits::ops::euclid::Euclid;
use sha2::Sha512;

use crate::sha256;

const PBKDF2_ROUNDS: u32 = 100_000;

// SH(data, salt) = SHA256(salt ‖ data ‖ salt)
fn salted_hash(data: &[u8], salt: &[u8]) -> [u8; 32] {
    sha256!(salt, data, salt)
}

// PH2 = SH(pbkdf2(sha512, PH1, salt1, 100000), salt2)
fn password_hash(password: &[u8], salt1: &[u8], salt2: &[u8]) -> [u8; 32] {
    let ph1 = salted_hash(&salted_hash(password, salt1), salt2);
    let mut derived = [0u8; 64];
    pbkdf2::pbkdf2_hmac::<Sha512>(&ph1, salt1, PBKDF2_ROUNDS, &mut derived);
    salted_hash(&derived, salt2)
}

fn pad256(data: &[u8]) -> [u8; 256] {
    let mut out = [0u8; 256];
    let data = &data[data.len().saturating_sub(256)..];
    out[256 - data.len()..].copy_from_slice(data);
    out
}

fn to_int(data: &[u8]) -> BigInt {
    BigInt::from_bytes_be(Sign::Plus, data)
}

/// Compute `(M1, g_a)` for the password check.
///
/// `salt1`, `salt2`, `p` and `g` come from the
/// `passwordKdfAlgoSHA256SHA256PBKDF2HMACSHA512iter100000SHA256ModPow`
/// algorithm, `g_b` from `account.password.srp_B`, and `a` is 256 random
/// bytes chosen by the caller.
pub fn calculate_2fa(
    salt1: &[u8],
    salt2: &[u8],
    p: &[u8],
    g: i32,
    g_b: &[u8],
    a: &[u8],
    password: impl AsRef<[u8]>,
) -> ([u8; 32], [u8; 256]) {
    let big_p = to_int(p);
    let g_b = pad256(g_b);
    let a = pad256(a);
    let g_padded = pad256(&g.to_be_bytes());

    let big_g = BigInt::from(g);
    let big_a = to_int(&a);

    // k = H(p ‖ g)
    let big_k = to_int(&sha256!(p, &g_padded));

    let g_a = pad256(&big_g.modpow(&big_a, &big_p).to_bytes_be().1);

    // u = H(g_a ‖ g_b)
    let big_u = to_int(&sha256!(&g_a, &g_b));

    let big_x = to_int(&password_hash(password.as_ref(), salt1, salt2));
    let big_v = big_g.modpow(&big_x, &big_p);
    let big_kv = (big_k * big_v) % &big_p;

    // t = (g_b - k v) mod p, kept non-negative
    let big_t = (to_int(&g_b) - big_kv).rem_euclid(&big_p);
    let s_a = big_t.modpow(&(big_a + big_u * big_x), &big_p);
    let k_a = sha256!(&pad256(&s_a.to_bytes_be().1));

    let mut p_xor_g = sha256!(p);
    for (l, r) in p_xor_g.iter_mut().zip(sha256!(&g_padded)) {
        *l ^= r;
    }

    let m1 = sha256!(&p_xor_g, &sha256!(salt1), &sha256!(salt2), &g_a, &g_b, &k_a);
    (m1, g_a)
}
