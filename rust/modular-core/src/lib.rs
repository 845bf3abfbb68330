//! Shared modular and p-adic arithmetic for the logic miner.
//!
//! Everything here works on machine integers: observations are `i64`,
//! moduli are `u64`, and intermediate products are carried in `i128`/`u128`
//! so that a single multiplication of two reduced residues never overflows.

use num_integer::Integer;
use num_traits::Zero;

/// Reduce a signed value into the canonical residue range `[0, m)`.
pub fn mod_reduce(value: i128, m: u64) -> u64 {
    debug_assert!(m > 0, "modulus must be positive");
    value.rem_euclid(m as i128) as u64
}

/// `(a * b) mod m` without overflow for any `a, b < 2^64`.
pub fn mod_mul(a: u64, b: u64, m: u64) -> u64 {
    ((a as u128 * b as u128) % m as u128) as u64
}

/// Modular exponentiation: base^exp mod m.
pub fn mod_pow(base: u64, exp: u64, m: u64) -> u64 {
    if m == 1 {
        return 0;
    }
    let mut result: u64 = 1;
    let mut base = base % m;
    let mut e = exp;
    while e > 0 {
        if e & 1 == 1 {
            result = mod_mul(result, base, m);
        }
        e >>= 1;
        base = mod_mul(base, base, m);
    }
    result
}

/// Extended GCD: returns (gcd, x, y) such that a*x + b*y = gcd(a, b).
pub fn extended_gcd(a: i128, b: i128) -> (i128, i128, i128) {
    if a == 0 {
        return (b, 0, 1);
    }
    let (g, x1, y1) = extended_gcd(b % a, a);
    let x = y1 - (b / a) * x1;
    let y = x1;
    (g, x, y)
}

/// Compute the modular multiplicative inverse a^(-1) mod m.
///
/// Works for composite moduli as well as primes. Returns `None` when
/// gcd(a, m) != 1, which is how callers detect a singular pivot.
pub fn mod_inverse(a: i128, m: u64) -> Option<u64> {
    if m <= 1 {
        return None;
    }
    let a_mod = mod_reduce(a, m);
    if a_mod == 0 {
        return None;
    }
    let (g, x, _) = extended_gcd(a_mod as i128, m as i128);
    if g != 1 {
        return None;
    }
    Some(mod_reduce(x, m))
}

/// p-adic valuation v_p(n): the exponent of the largest power of p dividing n.
///
/// Returns `None` for n = 0, whose valuation is infinite.
pub fn valuation(n: i128, p: u64) -> Option<u32> {
    if n == 0 {
        return None;
    }
    let p = p as i128;
    let mut v = 0;
    let mut rest = n;
    while rest % p == 0 {
        rest /= p;
        v += 1;
    }
    Some(v)
}

/// p-adic norm |n|_p = p^(-v_p(n)), with |0|_p = 0.
pub fn padic_norm(n: i128, p: u64) -> f64 {
    match valuation(n, p) {
        None => 0.0,
        Some(v) => (p as f64).powi(-(v as i32)),
    }
}

/// Floor of log_base(n) for n >= 1. `floor_log(0, b)` is 0.
pub fn floor_log(n: u64, base: u64) -> u32 {
    debug_assert!(base >= 2, "logarithm base must be at least 2");
    let mut k = 0;
    let mut acc = n;
    while acc >= base {
        acc /= base;
        k += 1;
    }
    k
}

/// GCD of every value in the iterator; 0 for an empty iterator.
pub fn gcd_all<I: IntoIterator<Item = u128>>(values: I) -> u128 {
    values
        .into_iter()
        .fold(0u128, |acc, v| if acc.is_zero() { v } else { acc.gcd(&v) })
}

/// True when every pair of moduli is coprime.
pub fn pairwise_coprime(moduli: &[u64]) -> bool {
    for i in 0..moduli.len() {
        for j in (i + 1)..moduli.len() {
            if moduli[i].gcd(&moduli[j]) != 1 {
                return false;
            }
        }
    }
    true
}

/// Deterministic primality check by trial division (moduli here are small).
pub fn is_prime(n: u64) -> bool {
    if n < 2 {
        return false;
    }
    if n < 4 {
        return true;
    }
    if n % 2 == 0 {
        return false;
    }
    let mut d = 3u64;
    while d.saturating_mul(d) <= n {
        if n % d == 0 {
            return false;
        }
        d += 2;
    }
    true
}

/// Generate all primes up to `limit` using a simple sieve.
pub fn primes_up_to(limit: u64) -> Vec<u64> {
    if limit < 2 {
        return vec![];
    }
    let n = limit as usize;
    let mut is_prime = vec![true; n + 1];
    is_prime[0] = false;
    is_prime[1] = false;
    let mut i = 2;
    while i * i <= n {
        if is_prime[i] {
            let mut j = i * i;
            while j <= n {
                is_prime[j] = false;
                j += i;
            }
        }
        i += 1;
    }
    is_prime
        .into_iter()
        .enumerate()
        .filter(|(_, p)| *p)
        .map(|(i, _)| i as u64)
        .collect()
}

/// Distinct prime factors of `n` that do not exceed `bound`, ascending.
///
/// Trial division stops at `bound`; a cofactor left over is reported only
/// if it is itself a prime within the bound.
pub fn prime_factors(n: u128, bound: u64) -> Vec<u64> {
    let mut factors = Vec::new();
    if n < 2 {
        return factors;
    }
    let mut remaining = n;
    let mut divisor = 2u64;
    while divisor <= bound && (divisor as u128) * (divisor as u128) <= remaining {
        if remaining % divisor as u128 == 0 {
            factors.push(divisor);
            while remaining % divisor as u128 == 0 {
                remaining /= divisor as u128;
            }
        }
        divisor += if divisor == 2 { 1 } else { 2 };
    }
    if remaining > 1 && remaining <= bound as u128 {
        factors.push(remaining as u64);
    }
    factors
}

/// Reconstruct a value from its residues modulo pairwise-coprime moduli.
///
/// Returns `(x, M)` with `x` in `[0, M)` and `M` the product of the moduli.
/// `None` when the moduli are not pairwise coprime, the inputs disagree in
/// length, or `M` does not fit in a `u64`.
pub fn crt_reconstruct(residues: &[u64], moduli: &[u64]) -> Option<(u64, u64)> {
    if residues.len() != moduli.len() || moduli.is_empty() {
        return None;
    }
    if moduli.iter().any(|&m| m == 0) || !pairwise_coprime(moduli) {
        return None;
    }
    let product = moduli.iter().try_fold(1u64, |acc, &m| acc.checked_mul(m))?;

    let mut result: u128 = 0;
    for (&r, &mi) in residues.iter().zip(moduli.iter()) {
        let ni = product / mi;
        let ni_inv = if mi == 1 { 0 } else { mod_inverse(ni as i128, mi)? };
        let term = mod_mul(mod_mul(r % mi, ni % product, product), ni_inv, product);
        result = (result + term as u128) % product as u128;
    }
    Some((result as u64, product))
}
