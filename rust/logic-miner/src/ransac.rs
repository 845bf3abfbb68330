//! Robust modular fitter (RANSAC) and iterative peeling.
//!
//! Every candidate model comes from an exact interpolation of a minimal
//! random sample: modular Lagrange interpolation for scalar polynomials of
//! degree 0..=3, modular Gaussian elimination for multivariate linear laws.
//! Inlier membership is exact equality mod m, never a tolerance.

use log::debug;
use modular_core::{mod_inverse, mod_mul, mod_reduce};
use rand::seq::index;
use rand::Rng;
use serde::Serialize;

use crate::model::{FittedModel, ModelShape, ModularModel};
use crate::observation::{InputRef, ObservationSet};

/// Highest polynomial degree the scalar fitter interpolates.
pub const MAX_POLY_DEGREE: usize = 3;

/// Peeling stops after this many layers even if more structure remains.
pub const MAX_PEEL_LAYERS: usize = 5;

// ---------------------------------------------------------------------------
// Exact solvers
// ---------------------------------------------------------------------------

/// Interpolate the unique polynomial of `degree` through `degree + 1` points mod `m`.
///
/// Returns coefficients leading first, or `None` when two inputs are
/// congruent mod `m` (or their difference is not invertible for composite `m`).
pub fn solve_polynomial(points: &[(i64, i64)], degree: usize, m: u64) -> Option<Vec<u64>> {
    if points.len() < degree + 1 {
        return None;
    }
    let pts = &points[..degree + 1];
    let xs: Vec<u64> = pts.iter().map(|&(x, _)| mod_reduce(x as i128, m)).collect();

    // Ascending accumulator: acc[k] is the coefficient of x^k.
    let mut acc = vec![0u64; degree + 1];
    for (i, &(_, y)) in pts.iter().enumerate() {
        let mut den: u64 = 1 % m;
        // numerator polynomial prod_{j != i} (x - x_j), ascending
        let mut numer = vec![1 % m];
        for (j, &xj) in xs.iter().enumerate() {
            if i == j {
                continue;
            }
            let diff = (xs[i] as i128 - xj as i128).rem_euclid(m as i128) as u64;
            den = mod_mul(den, diff, m);
            let neg_root = (m - xj % m) % m;
            let mut next = vec![0u64; numer.len() + 1];
            for (k, &c) in numer.iter().enumerate() {
                next[k] = (next[k] + mod_mul(c, neg_root, m)) % m;
                next[k + 1] = (next[k + 1] + c) % m;
            }
            numer = next;
        }
        let inv = mod_inverse(den as i128, m)?;
        let weight = mod_mul(mod_reduce(y as i128, m), inv, m);
        for (k, &c) in numer.iter().enumerate() {
            acc[k] = (acc[k] + mod_mul(weight, c, m)) % m;
        }
    }
    acc.reverse();
    Some(acc)
}

/// Solve `A * beta = rhs (mod m)` by Gauss-Jordan elimination.
///
/// Every column needs an invertible pivot; a rank-deficient (or, for
/// composite `m`, non-invertible) system yields `None`.
pub fn solve_linear_system(mut matrix: Vec<Vec<u64>>, rhs: Vec<u64>, m: u64) -> Option<Vec<u64>> {
    let n_rows = matrix.len();
    let n_cols = matrix.first()?.len();
    if rhs.len() != n_rows || n_rows < n_cols {
        return None;
    }
    for (row, &b) in matrix.iter_mut().zip(rhs.iter()) {
        for v in row.iter_mut() {
            *v %= m;
        }
        row.push(b % m);
    }

    let mut pivot_row = 0;
    for col in 0..n_cols {
        let row = (pivot_row..n_rows).find(|&r| mod_inverse(matrix[r][col] as i128, m).is_some())?;
        matrix.swap(pivot_row, row);
        let inv = mod_inverse(matrix[pivot_row][col] as i128, m)?;
        for v in matrix[pivot_row].iter_mut() {
            *v = mod_mul(*v, inv, m);
        }
        for r in 0..n_rows {
            if r == pivot_row || matrix[r][col] == 0 {
                continue;
            }
            let factor = matrix[r][col];
            for c in 0..=n_cols {
                let sub = mod_mul(factor, matrix[pivot_row][c], m);
                matrix[r][c] = (matrix[r][c] + m - sub) % m;
            }
        }
        pivot_row += 1;
    }

    // Overdetermined rows must reduce to 0 = 0.
    if matrix[n_cols..].iter().any(|row| row[n_cols] != 0) {
        return None;
    }
    Some((0..n_cols).map(|i| matrix[i][n_cols]).collect())
}

// ---------------------------------------------------------------------------
// Fitter
// ---------------------------------------------------------------------------

/// One law extracted by [`RansacFitter::peel`].
#[derive(Debug, Clone, Serialize)]
pub struct PeeledLayer {
    pub layer_index: usize,
    /// Inliers index the original observation set; `consensus` is relative
    /// to the remainder this layer was fitted on.
    pub fit: FittedModel,
    pub remaining_before: usize,
}

/// RANSAC fitter for one modulus.
#[derive(Debug, Clone)]
pub struct RansacFitter {
    pub modulus: u64,
    /// Sampling attempts per degree.
    pub iterations: usize,
    /// A degree whose best ratio exceeds this is returned immediately.
    pub early_accept: f64,
}

impl RansacFitter {
    pub fn new(modulus: u64, iterations: usize) -> Self {
        Self {
            modulus,
            iterations,
            early_accept: 0.70,
        }
    }

    pub fn with_early_accept(mut self, early_accept: f64) -> Self {
        self.early_accept = early_accept;
        self
    }

    /// Best model over degrees `0..=max_degree` (scalar) or the multivariate
    /// linear model (vector data).
    pub fn fit<R: Rng + ?Sized>(
        &self,
        obs: &ObservationSet,
        max_degree: usize,
        rng: &mut R,
    ) -> Option<FittedModel> {
        if obs.is_multivariate() {
            return self.fit_multivariate(obs, rng);
        }
        let mut best: Option<FittedModel> = None;
        for degree in 0..=max_degree.min(MAX_POLY_DEGREE) {
            if obs.len() < degree + 1 {
                continue;
            }
            let Some(fit) = self.fit_degree(obs, degree, rng) else {
                continue;
            };
            if fit.consensus > self.early_accept {
                return Some(fit);
            }
            if best.as_ref().map_or(true, |b| fit.consensus > b.consensus) {
                best = Some(fit);
            }
        }
        best
    }

    /// Fit with a shape fixed in advance (used by the lifter after depth 0).
    pub fn fit_shape<R: Rng + ?Sized>(
        &self,
        obs: &ObservationSet,
        shape: ModelShape,
        rng: &mut R,
    ) -> Option<FittedModel> {
        match shape {
            ModelShape::Polynomial { degree } => self.fit_degree(obs, degree, rng),
            ModelShape::MultivariateLinear => self.fit_multivariate(obs, rng),
        }
    }

    /// RANSAC at a single polynomial degree.
    pub fn fit_degree<R: Rng + ?Sized>(
        &self,
        obs: &ObservationSet,
        degree: usize,
        rng: &mut R,
    ) -> Option<FittedModel> {
        let xs = obs.scalar_inputs()?;
        let n = obs.len();
        let sample_size = degree + 1;
        if n < sample_size {
            return None;
        }

        let mut best: Option<(ModularModel, Vec<usize>)> = None;
        for _ in 0..self.iterations {
            let points: Vec<(i64, i64)> = index::sample(rng, n, sample_size)
                .iter()
                .map(|i| (xs[i], obs.output(i)))
                .collect();
            let Some(coefficients) = solve_polynomial(&points, degree, self.modulus) else {
                continue;
            };
            let model = ModularModel::Polynomial { coefficients };
            let inliers = self.inliers(&model, obs);
            if best.as_ref().map_or(true, |(_, b)| inliers.len() > b.len()) {
                let perfect = inliers.len() == n;
                best = Some((model, inliers));
                if perfect {
                    break;
                }
            }
        }
        best.map(|(model, inliers)| self.package(model, inliers, n))
    }

    /// RANSAC for `y = b0 + b1 x1 + ... + bk xk (mod m)`.
    pub fn fit_multivariate<R: Rng + ?Sized>(
        &self,
        obs: &ObservationSet,
        rng: &mut R,
    ) -> Option<FittedModel> {
        if !obs.is_multivariate() {
            return None;
        }
        let n = obs.len();
        let sample_size = obs.dimension() + 1;
        if n < sample_size {
            return None;
        }
        let m = self.modulus;

        let mut best: Option<(ModularModel, Vec<usize>)> = None;
        for _ in 0..self.iterations {
            let sample = index::sample(rng, n, sample_size);
            let mut matrix = Vec::with_capacity(sample_size);
            let mut rhs = Vec::with_capacity(sample_size);
            for i in sample.iter() {
                let InputRef::Vector(row) = obs.input(i) else {
                    return None;
                };
                let mut design = Vec::with_capacity(sample_size);
                design.push(1 % m);
                design.extend(row.iter().map(|&x| mod_reduce(x as i128, m)));
                matrix.push(design);
                rhs.push(mod_reduce(obs.output(i) as i128, m));
            }
            let Some(coefficients) = solve_linear_system(matrix, rhs, m) else {
                continue;
            };
            let model = ModularModel::MultivariateLinear { coefficients };
            let inliers = self.inliers(&model, obs);
            if best.as_ref().map_or(true, |(_, b)| inliers.len() > b.len()) {
                let perfect = inliers.len() == n;
                best = Some((model, inliers));
                if perfect {
                    break;
                }
            }
        }
        best.map(|(model, inliers)| self.package(model, inliers, n))
    }

    /// Indices whose output matches the model exactly mod m.
    pub fn inliers(&self, model: &ModularModel, obs: &ObservationSet) -> Vec<usize> {
        let m = self.modulus;
        (0..obs.len())
            .filter(|&i| {
                model.evaluate_mod(obs.input(i), m) == Some(mod_reduce(obs.output(i) as i128, m))
            })
            .collect()
    }

    fn package(&self, model: ModularModel, inliers: Vec<usize>, total: usize) -> FittedModel {
        let consensus = inliers.len() as f64 / total as f64;
        FittedModel {
            model,
            modulus: self.modulus,
            inliers,
            consensus,
        }
    }

    /// Iterative peeling: extract the dominant law, remove its inliers, repeat.
    ///
    /// Stops when the remainder has fewer than `min_size` points, no model is
    /// found, the ratio on the remainder drops below `min_ratio`, a layer
    /// removes nothing, or [`MAX_PEEL_LAYERS`] layers have been found.
    pub fn peel<R: Rng + ?Sized>(
        &self,
        obs: &ObservationSet,
        max_degree: usize,
        min_size: usize,
        min_ratio: f64,
        rng: &mut R,
    ) -> Vec<PeeledLayer> {
        let mut layers = Vec::new();
        let mut remaining: Vec<usize> = (0..obs.len()).collect();

        for layer_index in 0..MAX_PEEL_LAYERS {
            if remaining.len() < min_size.max(1) {
                break;
            }
            let subset = obs.select(&remaining);
            let Some(fit) = self.fit(&subset, max_degree, rng) else {
                break;
            };
            if fit.consensus < min_ratio || fit.inliers.is_empty() {
                debug!(
                    "peel mod {}: layer {} ratio {:.3} below {:.3}, stopping",
                    self.modulus, layer_index, fit.consensus, min_ratio
                );
                break;
            }

            let original: Vec<usize> = fit.inliers.iter().map(|&i| remaining[i]).collect();
            debug!(
                "peel mod {}: layer {} {} ({} of {} points)",
                self.modulus,
                layer_index,
                fit.model,
                original.len(),
                remaining.len()
            );
            let remaining_before = remaining.len();
            let mut is_inlier = vec![false; obs.len()];
            for &i in &original {
                is_inlier[i] = true;
            }
            remaining.retain(|&i| !is_inlier[i]);

            layers.push(PeeledLayer {
                layer_index,
                fit: FittedModel {
                    inliers: original,
                    ..fit
                },
                remaining_before,
            });
        }
        layers
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn poly(obs: &FittedModel) -> Vec<u64> {
        obs.model.coefficients().unwrap().to_vec()
    }

    #[test]
    fn test_solve_polynomial_each_degree() {
        let p = 101;
        assert_eq!(solve_polynomial(&[(5, 42)], 0, p), Some(vec![42]));
        assert_eq!(solve_polynomial(&[(1, 5), (2, 8)], 1, p), Some(vec![3, 2]));
        // y = 2x^2 + 3x + 4
        let pts: Vec<(i64, i64)> = [1, 2, 3].iter().map(|&x| (x, 2 * x * x + 3 * x + 4)).collect();
        assert_eq!(solve_polynomial(&pts, 2, p), Some(vec![2, 3, 4]));
        // y = x^3 + 5
        let pts: Vec<(i64, i64)> = [0, 1, 2, 7].iter().map(|&x| (x, x * x * x + 5)).collect();
        assert_eq!(solve_polynomial(&pts, 3, p), Some(vec![1, 0, 0, 5]));
    }

    #[test]
    fn test_solve_polynomial_degenerate_sample() {
        // 3 and 20 collide mod 17
        assert_eq!(solve_polynomial(&[(3, 1), (20, 2)], 1, 17), None);
        // composite modulus: difference 2 is not invertible mod 6
        assert_eq!(solve_polynomial(&[(1, 1), (3, 2)], 1, 6), None);
        assert_eq!(solve_polynomial(&[(1, 2), (2, 1)], 1, 6), Some(vec![5, 3]));
    }

    #[test]
    fn test_solve_linear_system() {
        // b0 + 2 b1 = 7, b0 + 5 b1 = 16 (mod 13) -> b1 = 3, b0 = 1
        let beta = solve_linear_system(vec![vec![1, 2], vec![1, 5]], vec![7, 16], 13);
        assert_eq!(beta, Some(vec![1, 3]));
        let singular = solve_linear_system(vec![vec![1, 2], vec![1, 2]], vec![1, 1], 13);
        assert_eq!(singular, None);
    }

    #[test]
    fn test_fit_recovers_clean_linear_law() {
        let mut rng = StdRng::seed_from_u64(1);
        for &p in &[5u64, 13, 31, 101] {
            let a = 3 % p;
            let b = 7 % p;
            let xs: Vec<i64> = (0..60).collect();
            let ys: Vec<i64> = xs.iter().map(|&x| ((a as i64 * x + b as i64) % p as i64)).collect();
            let obs = ObservationSet::from_scalars(xs, ys).unwrap();
            let fit = RansacFitter::new(p, 100).fit(&obs, 3, &mut rng).unwrap();
            assert_eq!(poly(&fit), vec![a, b], "p = {}", p);
            assert_eq!(fit.consensus, 1.0);
        }
    }

    #[test]
    fn test_fit_constant_data_degree_zero() {
        let mut rng = StdRng::seed_from_u64(2);
        let obs = ObservationSet::from_scalars((0..20).collect(), vec![9; 20]).unwrap();
        let fitter = RansacFitter::new(11, 1);
        let fit = fitter.fit(&obs, 0, &mut rng).unwrap();
        assert_eq!(poly(&fit), vec![9]);
        assert_eq!(fit.consensus, 1.0);
    }

    #[test]
    fn test_fit_multivariate() {
        let mut rng = StdRng::seed_from_u64(3);
        let p = 13;
        let xs: Vec<Vec<i64>> = (0..40).map(|i| vec![i % 7, (i * 3) % 11]).collect();
        let ys: Vec<i64> = xs.iter().map(|v| (2 + 5 * v[0] + 9 * v[1]) % p).collect();
        let obs = ObservationSet::from_vectors(xs, ys).unwrap();
        let fit = RansacFitter::new(p as u64, 100).fit(&obs, 3, &mut rng).unwrap();
        assert_eq!(
            fit.model,
            ModularModel::MultivariateLinear {
                coefficients: vec![2, 5, 9]
            }
        );
        assert_eq!(fit.consensus, 1.0);
    }

    #[test]
    fn test_peel_two_layers() {
        let mut rng = StdRng::seed_from_u64(4);
        let p = 17i64;
        let mut xs = Vec::new();
        let mut ys = Vec::new();
        for x in 0..60 {
            xs.push(x);
            ys.push((3 * x + 1) % p);
        }
        // keep the minority law off the residue where both laws agree (x = 6 mod 17)
        for x in (0..40).filter(|x| x % 17 != 6).take(20) {
            xs.push(x);
            ys.push((8 * x + 5) % p);
        }
        let obs = ObservationSet::from_scalars(xs, ys).unwrap();
        let layers = RansacFitter::new(17, 100).peel(&obs, 2, 5, 0.5, &mut rng);
        assert_eq!(layers.len(), 2);
        assert_eq!(poly(&layers[0].fit), vec![3, 1]);
        assert_eq!(poly(&layers[1].fit), vec![8, 5]);
        assert_eq!(layers[1].fit.consensus, 1.0);
        assert!(layers[1].fit.inliers.iter().all(|&i| i >= 60));
    }
}
