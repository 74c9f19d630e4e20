//! Pollard-rho (Brent variant) factorization of the handshake's `pq`.

use num_bigint::BigUint;
use num_traits::{One, Zero};

use crate::bigint::gcd;
use crate::random;

const MAX_ATTEMPTS: usize = 64;

fn step(y: &BigUint, c: &BigUint, pq: &BigUint) -> BigUint {
    (y * y % pq + c) % pq
}

fn abs_diff(a: &BigUint, b: &BigUint) -> BigUint {
    if a > b { a - b } else { b - a }
}

// One Brent run with fresh random parameters. `None` means the run
// degenerated to the trivial divisor and should be restarted.
fn brent(pq: &BigUint) -> Option<BigUint> {
    let mut y = random::below(pq);
    let c = random::below(pq);
    let m = random::below(pq);

    let mut g = BigUint::one();
    let mut r = BigUint::one();
    let mut q = BigUint::one();
    let mut x = BigUint::zero();
    let mut ys = BigUint::zero();

    while g.is_one() {
        x = y.clone();
        let mut i = BigUint::zero();
        while i < r {
            y = step(&y, &c, pq);
            i += 1u32;
        }

        let mut k = BigUint::zero();
        while k < r && g.is_one() {
            ys = y.clone();
            let batch = (&r - &k).min(m.clone());
            let mut i = BigUint::zero();
            while i < batch {
                y = step(&y, &c, pq);
                q = q * abs_diff(&x, &y) % pq;
                i += 1u32;
            }
            g = gcd(q.clone(), pq.clone());
            k += &m;
        }
        r <<= 1;
    }

    if g == *pq {
        // The batch overshot; walk again one step at a time from its start.
        loop {
            ys = step(&ys, &c, pq);
            g = gcd(abs_diff(&x, &ys), pq.clone());
            if g > BigUint::one() {
                break;
            }
        }
    }

    (g != *pq).then_some(g)
}

/// Split a composite `pq` into `(p, q)` with `p ≤ q`.
///
/// Returns `None` for inputs below 4 and when no split is found after a
/// bounded number of restarts (e.g. `pq` is prime).
pub fn factorize_big(pq: &BigUint) -> Option<(BigUint, BigUint)> {
    if *pq < BigUint::from(4u32) {
        return None;
    }
    if !pq.bit(0) {
        let two = BigUint::from(2u32);
        let half = pq / &two;
        return Some((two.clone().min(half.clone()), two.max(half)));
    }

    for attempt in 0..MAX_ATTEMPTS {
        if let Some(p) = brent(pq) {
            let q = pq / &p;
            log::debug!("factorized pq after {} attempt(s)", attempt + 1);
            return Some((p.clone().min(q.clone()), p.max(q)));
        }
    }
    log::warn!("could not factorize pq={pq}");
    None
}

/// [`factorize_big`] for the 64-bit `pq` Telegram actually sends.
pub fn factorize(pq: u64) -> Option<(u64, u64)> {
    let (p, q) = factorize_big(&BigUint::from(pq))?;
    Some((u64::try_from(p).ok()?, u64::try_from(q).ok()?))
}
