//! Continuous (Mahler-basis) modeling.
//!
//! A p-adically continuous `f` has a Mahler expansion
//! `f(x) = sum a_n * binom(x, n)` whose coefficients tend to 0 in `|.|_p`.
//! Coefficients are computed from Newton divided differences so that
//! irregularly spaced inputs are handled; for the inputs `0, 1, 2, ...`
//! they are exactly the forward differences `a_n = Δ^n f(0)`.
//!
//! All arithmetic is exact over `BigInt` rationals.

use std::collections::HashSet;
use std::fmt;

use num_bigint::BigInt;
use num_integer::Integer;
use num_traits::{One, Signed, Zero};
use serde::{Serialize, Serializer};

use crate::observation::ObservationSet;

// ---------------------------------------------------------------------------
// Exact rationals
// ---------------------------------------------------------------------------

/// Reduced fraction with a positive denominator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rational {
    numer: BigInt,
    denom: BigInt,
}

impl Rational {
    /// `numer / denom` in lowest terms; `None` for a zero denominator.
    pub fn new(numer: BigInt, denom: BigInt) -> Option<Self> {
        if denom.is_zero() {
            return None;
        }
        Some(Self::normalized(numer, denom))
    }

    /// Reduce a fraction whose denominator is known to be non-zero.
    fn normalized(numer: BigInt, denom: BigInt) -> Self {
        debug_assert!(!denom.is_zero(), "zero denominator");
        let g = numer.gcd(&denom);
        let (mut numer, mut denom) = if g.is_zero() || g.is_one() {
            (numer, denom)
        } else {
            (numer / &g, denom / &g)
        };
        if denom.is_negative() {
            numer = -numer;
            denom = -denom;
        }
        if numer.is_zero() {
            denom = BigInt::one();
        }
        Self { numer, denom }
    }

    pub fn from_integer(n: impl Into<BigInt>) -> Self {
        Self {
            numer: n.into(),
            denom: BigInt::one(),
        }
    }

    pub fn numer(&self) -> &BigInt {
        &self.numer
    }

    pub fn denom(&self) -> &BigInt {
        &self.denom
    }

    pub fn is_zero(&self) -> bool {
        self.numer.is_zero()
    }

    pub fn is_integer(&self) -> bool {
        self.denom.is_one()
    }

    pub fn add(&self, other: &Rational) -> Rational {
        Rational::normalized(
            &self.numer * &other.denom + &other.numer * &self.denom,
            &self.denom * &other.denom,
        )
    }

    pub fn sub(&self, other: &Rational) -> Rational {
        Rational::normalized(
            &self.numer * &other.denom - &other.numer * &self.denom,
            &self.denom * &other.denom,
        )
    }

    pub fn mul_int(&self, k: &BigInt) -> Rational {
        Rational::normalized(&self.numer * k, self.denom.clone())
    }

    /// `None` if `k` is zero.
    pub fn div_int(&self, k: &BigInt) -> Option<Rational> {
        Rational::new(self.numer.clone(), &self.denom * k)
    }

    /// `v_p(numer) - v_p(denom)`, or `None` for zero.
    pub fn valuation(&self, p: u64) -> Option<i64> {
        if self.is_zero() {
            return None;
        }
        Some(bigint_valuation(&self.numer, p) as i64 - bigint_valuation(&self.denom, p) as i64)
    }
}

fn bigint_valuation(n: &BigInt, p: u64) -> u32 {
    let p = BigInt::from(p);
    let mut rest = n.abs();
    let mut v = 0;
    while !rest.is_zero() && (&rest % &p).is_zero() {
        rest /= &p;
        v += 1;
    }
    v
}

impl fmt::Display for Rational {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.denom.is_one() {
            write!(f, "{}", self.numer)
        } else {
            write!(f, "{}/{}", self.numer, self.denom)
        }
    }
}

impl Serialize for Rational {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

// ---------------------------------------------------------------------------
// Expansion
// ---------------------------------------------------------------------------

/// Mahler-style expansion fitted on scalar observations.
#[derive(Debug, Clone, Serialize)]
pub struct MahlerExpansion {
    pub p: u64,
    /// Interpolation nodes, in first-occurrence order.
    pub nodes: Vec<i64>,
    /// `a_n = n! * f[x_0, ..., x_n]`.
    pub coefficients: Vec<Rational>,
    pub regularity: f64,
}

/// First `min(max_degree + 1, N)` distinct inputs with their first outputs.
fn interpolation_nodes(xs: &[i64], ys: &[i64], max_degree: usize) -> (Vec<i64>, Vec<i64>) {
    let mut seen = HashSet::new();
    let mut nodes = Vec::new();
    let mut values = Vec::new();
    for (&x, &y) in xs.iter().zip(ys) {
        if nodes.len() > max_degree {
            break;
        }
        if seen.insert(x) {
            nodes.push(x);
            values.push(y);
        }
    }
    (nodes, values)
}

/// Newton divided differences `f[x_0..x_n]` for `n = 0..nodes.len()`.
///
/// `None` if two nodes coincide.
fn divided_differences(nodes: &[i64], values: &[i64]) -> Option<Vec<Rational>> {
    let mut column: Vec<Rational> = values.iter().map(|&y| Rational::from_integer(y)).collect();
    let mut leading = Vec::with_capacity(nodes.len());
    for k in 0..nodes.len() {
        leading.push(column[0].clone());
        column = (0..column.len().saturating_sub(1))
            .map(|i| {
                let span = BigInt::from(nodes[i + k + 1]) - BigInt::from(nodes[i]);
                column[i + 1].sub(&column[i]).div_int(&span)
            })
            .collect::<Option<Vec<_>>>()?;
    }
    Some(leading)
}

/// Mahler coefficients `a_n = n! * f[x_0..x_n]` of scalar observations.
///
/// Returns an empty vector for vector data.
pub fn compute_coefficients(obs: &ObservationSet, max_degree: usize) -> Vec<Rational> {
    let Some(xs) = obs.scalar_inputs() else {
        return Vec::new();
    };
    let (nodes, values) = interpolation_nodes(xs, obs.outputs(), max_degree);
    divided_differences(&nodes, &values)
        .map(scale_by_factorial)
        .unwrap_or_default()
}

fn scale_by_factorial(divided: Vec<Rational>) -> Vec<Rational> {
    let mut factorial = BigInt::one();
    divided
        .into_iter()
        .enumerate()
        .map(|(n, d)| {
            if n > 0 {
                factorial *= BigInt::from(n);
            }
            d.mul_int(&factorial)
        })
        .collect()
}

/// Fraction of coefficients with `v_p(a_n) >= floor(log_p n)`.
///
/// `n = 0` has bound 0 and zero coefficients always pass.
pub fn validation_metric(coefficients: &[Rational], p: u64) -> f64 {
    if coefficients.is_empty() || p < 2 {
        return 0.0;
    }
    let passing = coefficients
        .iter()
        .enumerate()
        .filter(|(n, a)| match a.valuation(p) {
            None => true,
            Some(v) => v >= modular_core::floor_log(*n as u64, p) as i64,
        })
        .count();
    passing as f64 / coefficients.len() as f64
}

impl MahlerExpansion {
    /// Fit on scalar data; `None` for vector data.
    pub fn fit(obs: &ObservationSet, p: u64, max_degree: usize) -> Option<Self> {
        let xs = obs.scalar_inputs()?;
        let (nodes, values) = interpolation_nodes(xs, obs.outputs(), max_degree);
        let coefficients = scale_by_factorial(divided_differences(&nodes, &values)?);
        let regularity = validation_metric(&coefficients, p);
        Some(Self {
            p,
            nodes,
            coefficients,
            regularity,
        })
    }

    /// Evaluate the Newton form exactly at `x`.
    pub fn predict(&self, x: i64) -> Rational {
        let x = BigInt::from(x);
        let mut total = Rational::from_integer(0);
        let mut basis = BigInt::one();
        let mut factorial = BigInt::one();
        for (n, a) in self.coefficients.iter().enumerate() {
            if n > 0 {
                factorial *= BigInt::from(n);
                basis *= &x - BigInt::from(self.nodes[n - 1]);
            }
            let term = a.mul_int(&basis);
            total = total.add(&Rational::normalized(term.numer, term.denom * &factorial));
        }
        total
    }

    /// Share of observations reproduced exactly by [`predict`](Self::predict).
    pub fn fidelity(&self, obs: &ObservationSet) -> f64 {
        let Some(xs) = obs.scalar_inputs() else {
            return 0.0;
        };
        let hits = xs
            .iter()
            .zip(obs.outputs())
            .filter(|(&x, &y)| self.predict(x) == Rational::from_integer(y))
            .count();
        hits as f64 / obs.len() as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ints(values: &[i64]) -> Vec<Rational> {
        values.iter().map(|&v| Rational::from_integer(v)).collect()
    }

    #[test]
    fn test_rational_normalisation() {
        let r = Rational::new(BigInt::from(6), BigInt::from(-4)).unwrap();
        assert_eq!(r.to_string(), "-3/2");
        assert_eq!(r.valuation(2), Some(-1));
        assert_eq!(r.valuation(3), Some(1));
        let zero = Rational::new(BigInt::from(0), BigInt::from(5)).unwrap();
        assert_eq!(zero.valuation(5), None);
        assert_eq!(zero.denom(), &BigInt::one());
    }

    #[test]
    fn test_zero_denominator_is_rejected() {
        assert_eq!(Rational::new(BigInt::from(3), BigInt::zero()), None);
        let half = Rational::new(BigInt::from(1), BigInt::from(2)).unwrap();
        assert_eq!(half.div_int(&BigInt::zero()), None);
        assert_eq!(half.div_int(&BigInt::from(-3)).unwrap().to_string(), "-1/6");
    }

    #[test]
    fn test_consecutive_inputs_give_forward_differences() {
        // f(x) = x^2: Δf(0) = 1, Δ²f(0) = 2, higher differences vanish
        let xs: Vec<i64> = (0..6).collect();
        let ys: Vec<i64> = xs.iter().map(|x| x * x).collect();
        let obs = ObservationSet::from_scalars(xs, ys).unwrap();
        assert_eq!(compute_coefficients(&obs, 10), ints(&[0, 1, 2, 0, 0, 0]));
    }

    #[test]
    fn test_parity_is_two_adically_regular() {
        let xs: Vec<i64> = (0..40).collect();
        let ys: Vec<i64> = xs.iter().map(|x| x % 2).collect();
        let obs = ObservationSet::from_scalars(xs, ys).unwrap();
        let coefficients = compute_coefficients(&obs, 15);
        assert_eq!(coefficients.len(), 16);
        // a_n = (-2)^(n-1)
        assert_eq!(coefficients[4], Rational::from_integer(-8));
        assert_eq!(validation_metric(&coefficients, 2), 1.0);
        assert!(validation_metric(&coefficients, 3) < 0.5);
    }

    #[test]
    fn test_irregular_nodes_and_predict() {
        // f(x) = 3x + 1 sampled on scattered, repeated inputs
        let xs = vec![5, 2, 5, 11, 7];
        let ys = vec![16, 7, 16, 34, 22];
        let obs = ObservationSet::from_scalars(xs, ys).unwrap();
        let expansion = MahlerExpansion::fit(&obs, 3, 10).unwrap();
        assert_eq!(expansion.nodes, vec![5, 2, 11, 7]);
        assert_eq!(expansion.predict(100), Rational::from_integer(301));
        assert_eq!(expansion.fidelity(&obs), 1.0);
    }

    #[test]
    fn test_metric_edge_cases() {
        assert_eq!(validation_metric(&[], 2), 0.0);
        assert_eq!(validation_metric(&ints(&[0, 0, 0]), 5), 1.0);
    }
}
