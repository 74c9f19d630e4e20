//! Randomness from the operating system.
//!
//! Every random value in the workspace comes through here, so a platform
//! without an entropy source fails in exactly one place.

use num_bigint::BigUint;
use num_traits::One;

/// Fill `buf` from the OS CSPRNG.
///
/// # Panics
///
/// If the platform has no entropy source at all. Nothing in MTProto can
/// proceed without one.
pub fn fill(buf: &mut [u8]) {
    if let Err(err) = getrandom::getrandom(buf) {
        panic!("operating system random source unavailable: {err}");
    }
}

/// `N` random bytes.
pub fn bytes<const N: usize>() -> [u8; N] {
    let mut out = [0u8; N];
    fill(&mut out);
    out
}

/// A random TL `long`, e.g. for session IDs and ping IDs.
pub fn long() -> i64 {
    i64::from_le_bytes(bytes())
}

/// A random integer in `[1, n - 1]`. `n` must be at least 2.
pub fn below(n: &BigUint) -> BigUint {
    let mut buf = vec![0u8; n.bits().div_ceil(8) as usize + 8];
    fill(&mut buf);
    let span = n - BigUint::one();
    if span <= BigUint::one() {
        return BigUint::one();
    }
    BigUint::from_bytes_be(&buf) % span + BigUint::one()
}
