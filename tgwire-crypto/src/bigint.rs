//! Fixed-width conversions between big integers and byte buffers, plus the
//! primality checks the DH handshake needs.

use num_bigint::BigUint;
use num_traits::{One, Zero};

use crate::random;

/// The 2048-bit safe prime Telegram servers use for DH (`g` is 3).
pub const KNOWN_DH_PRIME_HEX: &str = concat!(
    "C71CAEB9C6B1C9048E6C522F70F13F73980D40238E3E21C14934D037563D930F",
    "48198A0AA7C14058229493D22530F4DBFA336F6E0AC925139543AED44CCE7C37",
    "20FD51F69458705AC68CD4FE6B6B13ABDC9746512969328454F18FAF8C595F64",
    "2477FE96BB2A941D5BCD1D4AC8CC49880708FA9B378E3C4F3A9060BEE67CF9A4",
    "A4A695811051907E162753B56B0F6B410DBA74D8A84B2A14B3144E0EF1284754",
    "FD17ED950D5965B4B9DD46582DB1178D169C6BC465B0D6FF9CA3928FEF5B9AE4",
    "E418FC15E83EBEA0F87FA9FF5EED70050DED2849F47BF959D956850CE929851F",
    "0D8115F635B105EE2E4E15D04B2454BF6F4FADF034B10403119CD8E3B92FCC5B",
);

/// [`KNOWN_DH_PRIME_HEX`] as an integer.
pub fn known_dh_prime() -> BigUint {
    BigUint::parse_bytes(KNOWN_DH_PRIME_HEX.as_bytes(), 16).unwrap_or_default()
}

/// Big-endian bytes of `n`, left-padded with zeros to exactly `N` bytes.
///
/// Returns `None` if `n` does not fit.
pub fn to_fixed_be<const N: usize>(n: &BigUint) -> Option<[u8; N]> {
    let bytes = n.to_bytes_be();
    if bytes.len() > N {
        return None;
    }
    let mut out = [0u8; N];
    out[N - bytes.len()..].copy_from_slice(&bytes);
    Some(out)
}

/// Minimal big-endian bytes of a `u64`, as TL `bytes` for `pq`, `p` and `q`.
pub fn u64_to_be_trimmed(n: u64) -> Vec<u8> {
    let bytes = n.to_be_bytes();
    let skip = bytes.iter().take_while(|b| **b == 0).count().min(7);
    bytes[skip..].to_vec()
}

/// Parse up to eight big-endian bytes.
pub fn u64_from_be(bytes: &[u8]) -> Option<u64> {
    if bytes.len() > 8 {
        return None;
    }
    Some(bytes.iter().fold(0u64, |acc, b| (acc << 8) | u64::from(*b)))
}

pub(crate) fn gcd(mut a: BigUint, mut b: BigUint) -> BigUint {
    while !b.is_zero() {
        let r = &a % &b;
        a = b;
        b = r;
    }
    a
}

/// Miller-Rabin with `rounds` random bases.
pub fn is_probable_prime(n: &BigUint, rounds: usize) -> bool {
    let two = BigUint::from(2u32);
    if *n < two {
        return false;
    }
    for small in [2u32, 3, 5, 7, 11, 13, 17, 19, 23, 29, 31, 37] {
        let small = BigUint::from(small);
        if *n == small {
            return true;
        }
        if (n % &small).is_zero() {
            return false;
        }
    }

    let n_minus_one = n - BigUint::one();
    let mut d = n_minus_one.clone();
    let mut s = 0u32;
    while !d.bit(0) {
        d >>= 1;
        s += 1;
    }

    'witness: for _ in 0..rounds {
        // `below(n - 1)` yields [1, n - 2]; shift to [2, n - 1) and keep it off n - 1.
        let a = random::below(&n_minus_one) + BigUint::one();
        if a >= n_minus_one {
            continue;
        }
        let mut x = a.modpow(&d, n);
        if x.is_one() || x == n_minus_one {
            continue;
        }
        for _ in 1..s {
            x = x.modpow(&two, n);
            if x == n_minus_one {
                continue 'witness;
            }
        }
        return false;
    }
    true
}

/// `p` is prime and so is `(p - 1) / 2`.
pub fn is_safe_prime(p: &BigUint, rounds: usize) -> bool {
    is_probable_prime(p, rounds) && is_probable_prime(&(p >> 1u32), rounds)
}
