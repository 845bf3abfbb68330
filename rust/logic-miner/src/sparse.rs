//! Sparse monomial recovery: `y = c * x^e + d (mod p)` for large `e`.
//!
//! Dense RANSAC stops at degree 3, so high-degree single-term laws need a
//! separate path. Two modes:
//! - active (Prony-style) when the inputs contain the run `1, 2, 4, 8, ...`;
//! - passive exponent scan on arbitrary inputs.

use std::collections::HashMap;

use log::debug;
use modular_core::{mod_inverse, mod_mul, mod_pow, mod_reduce};
use serde::Serialize;

use crate::model::ModularModel;
use crate::observation::ObservationSet;
use crate::ransac::solve_linear_system;

/// Minimum length of the `2^k` input run that enables active mode.
const MIN_GEOMETRIC_RUN: usize = 4;
/// Longest `2^k` run read in active mode.
const MAX_GEOMETRIC_RUN: usize = 100;
/// Exponents searched when solving `2^e == u`.
const MAX_DISCRETE_LOG: u64 = 200;
/// Exponents tried by the passive scan.
const MAX_PASSIVE_EXPONENT: u32 = 100;
/// Passive mode needs this many observations.
const MIN_PASSIVE_POINTS: usize = 5;
/// Share of consecutive difference ratios that must agree.
const RATIO_AGREEMENT: f64 = 0.8;
/// A reconstruction must reproduce more than this share of the data.
const ACCEPT_RATIO: f64 = 0.7;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SparseMode {
    Active,
    Passive,
    /// Constant run detected by active mode (all differences zero).
    Constant,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SparseFit {
    pub coefficient: u64,
    pub exponent: u32,
    pub offset: u64,
    pub ratio: f64,
    pub mode: SparseMode,
}

impl SparseFit {
    pub fn model(&self) -> ModularModel {
        ModularModel::SparseMonomial {
            coefficient: self.coefficient,
            exponent: self.exponent,
            offset: self.offset,
        }
    }
}

/// Recover a sparse monomial law mod `p`. Scalar data only.
pub fn solve(obs: &ObservationSet, p: u64) -> Option<SparseFit> {
    let xs = obs.scalar_inputs()?;
    if xs.is_empty() || p < 2 {
        return None;
    }

    let lookup: HashMap<i64, i64> = xs
        .iter()
        .zip(obs.outputs())
        .map(|(&x, &y)| (x, y))
        .collect();
    let run = geometric_run(&lookup);
    if run.len() >= MIN_GEOMETRIC_RUN {
        debug!("sparse mod {}: geometric run of {}, active mode", p, run.len());
        return solve_active(obs, &run, p);
    }
    if obs.len() >= MIN_PASSIVE_POINTS {
        return solve_passive(obs, xs, p);
    }
    None
}

/// Outputs at `x = 1, 2, 4, ...` up to the first missing power.
fn geometric_run(lookup: &HashMap<i64, i64>) -> Vec<i64> {
    let mut run = Vec::new();
    let mut x: i64 = 1;
    while run.len() < MAX_GEOMETRIC_RUN {
        let Some(&y) = lookup.get(&x) else {
            break;
        };
        run.push(y);
        let Some(next) = x.checked_mul(2) else {
            break;
        };
        x = next;
    }
    run
}

fn solve_active(obs: &ObservationSet, run: &[i64], p: u64) -> Option<SparseFit> {
    let seq: Vec<u64> = run.iter().map(|&y| mod_reduce(y as i128, p)).collect();
    let diffs: Vec<u64> = seq
        .windows(2)
        .map(|w| mod_reduce(w[1] as i128 - w[0] as i128, p))
        .collect();

    // y(2^(k+1)) - y(2^k) = c (u - 1) u^k with u = 2^e, so consecutive
    // differences have ratio u.
    let ratios: Vec<u64> = diffs
        .windows(2)
        .filter_map(|w| mod_inverse(w[0] as i128, p).map(|inv| mod_mul(w[1], inv, p)))
        .collect();

    if ratios.is_empty() {
        if seq.iter().all(|&y| y == seq[0]) {
            return Some(SparseFit {
                coefficient: 0,
                exponent: 0,
                offset: seq[0],
                ratio: 1.0,
                mode: SparseMode::Constant,
            });
        }
        return None;
    }

    let mut counts: HashMap<u64, usize> = HashMap::new();
    for &r in &ratios {
        *counts.entry(r).or_insert(0) += 1;
    }
    // most frequent ratio, smallest value on ties
    let (u, count) = counts
        .into_iter()
        .max_by(|a, b| a.1.cmp(&b.1).then(b.0.cmp(&a.0)))?;
    if (count as f64) < ratios.len() as f64 * RATIO_AGREEMENT {
        return None;
    }

    let exponent = (0..MAX_DISCRETE_LOG).find(|&e| mod_pow(2, e, p) == u)? as u32;
    let inv = mod_inverse(u as i128 - 1, p)?;
    let coefficient = mod_mul(diffs[0], inv, p);
    let offset = mod_reduce(seq[0] as i128 - coefficient as i128, p);

    let fit = SparseFit {
        coefficient,
        exponent,
        offset,
        ratio: 0.0,
        mode: SparseMode::Active,
    };
    accept(fit, obs, p)
}

fn solve_passive(obs: &ObservationSet, xs: &[i64], p: u64) -> Option<SparseFit> {
    let ys: Vec<u64> = obs
        .outputs()
        .iter()
        .map(|&y| mod_reduce(y as i128, p))
        .collect();
    let mut best: Option<(usize, SparseFit)> = None;

    for e in 1..=MAX_PASSIVE_EXPONENT {
        let powers: Vec<u64> = xs
            .iter()
            .map(|&x| mod_pow(mod_reduce(x as i128, p), e as u64, p))
            .collect();
        let Some((offset, coefficient)) = first_pair_solution(&powers, &ys, p) else {
            continue;
        };
        let hits = powers
            .iter()
            .zip(&ys)
            .filter(|(&xe, &y)| (mod_mul(coefficient, xe, p) + offset) % p == y)
            .count();
        if best.as_ref().map_or(true, |(h, _)| hits > *h) {
            best = Some((
                hits,
                SparseFit {
                    coefficient,
                    exponent: e,
                    offset,
                    ratio: 0.0,
                    mode: SparseMode::Passive,
                },
            ));
        }
        if hits == xs.len() {
            break;
        }
    }

    let (hits, fit) = best?;
    debug!(
        "sparse mod {}: passive best x^{} with {}/{} hits",
        p,
        fit.exponent,
        hits,
        xs.len()
    );
    accept(fit, obs, p)
}

/// Solve `d + c * x^e` exactly from the first pair with distinct `x^e`.
fn first_pair_solution(powers: &[u64], ys: &[u64], p: u64) -> Option<(u64, u64)> {
    for i in 0..powers.len() {
        for j in (i + 1)..powers.len() {
            if powers[i] == powers[j] {
                continue;
            }
            let matrix = vec![vec![1, powers[i]], vec![1, powers[j]]];
            if let Some(beta) = solve_linear_system(matrix, vec![ys[i], ys[j]], p) {
                return Some((beta[0], beta[1]));
            }
        }
    }
    None
}

fn accept(mut fit: SparseFit, obs: &ObservationSet, p: u64) -> Option<SparseFit> {
    let model = fit.model();
    let hits = (0..obs.len())
        .filter(|&i| {
            model.evaluate_mod(obs.input(i), p) == Some(mod_reduce(obs.output(i) as i128, p))
        })
        .count();
    fit.ratio = hits as f64 / obs.len() as f64;
    (fit.ratio > ACCEPT_RATIO).then_some(fit)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn monomial_data(xs: Vec<i64>, c: u64, e: u32, d: u64, p: u64) -> ObservationSet {
        let ys = xs
            .iter()
            .map(|&x| ((mod_mul(c, mod_pow(x as u64 % p, e as u64, p), p) + d) % p) as i64)
            .collect();
        ObservationSet::from_scalars(xs, ys).unwrap()
    }

    #[test]
    fn test_active_mode_recovers_high_exponent() {
        let p = 101;
        let xs: Vec<i64> = (0..12).map(|k| 1i64 << k).collect();
        let obs = monomial_data(xs, 7, 37, 11, p);
        let fit = solve(&obs, p).unwrap();
        assert_eq!(fit.mode, SparseMode::Active);
        // 2 is a primitive root mod 101, so the exponent is recovered exactly
        assert_eq!((fit.coefficient, fit.exponent, fit.offset), (7, 37, 11));
        assert_eq!(fit.ratio, 1.0);
    }

    #[test]
    fn test_active_mode_constant_run() {
        let xs: Vec<i64> = (0..6).map(|k| 1i64 << k).collect();
        let obs = ObservationSet::from_scalars(xs, vec![4; 6]).unwrap();
        let fit = solve(&obs, 13).unwrap();
        assert_eq!(fit.mode, SparseMode::Constant);
        assert_eq!(fit.offset, 4);
        assert_eq!(fit.ratio, 1.0);
    }

    #[test]
    fn test_passive_mode_scans_exponents() {
        let p = 31;
        let xs: Vec<i64> = vec![3, 5, 6, 7, 10, 11, 12, 13, 14, 17, 19, 20];
        let obs = monomial_data(xs, 4, 7, 9, p);
        let fit = solve(&obs, p).unwrap();
        assert_eq!(fit.mode, SparseMode::Passive);
        assert_eq!(fit.ratio, 1.0);
        // x^7 and x^(7 + 30k) agree on F_31; the scan keeps the first
        assert_eq!((fit.coefficient, fit.exponent, fit.offset), (4, 7, 9));
    }

    #[test]
    fn test_rejects_small_or_vector_data() {
        let obs = ObservationSet::from_scalars(vec![3, 5, 9], vec![1, 2, 3]).unwrap();
        assert!(solve(&obs, 7).is_none());
        let vectors = ObservationSet::from_vectors(vec![vec![1]; 6], vec![0; 6]).unwrap();
        assert!(solve(&vectors, 7).is_none());
    }
}
