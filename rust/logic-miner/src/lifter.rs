//! Precision lifting (Hensel) with forking at singular layers.
//!
//! A branch refines a model mod `p` into a model mod `p^k` one digit at a
//! time: fit a layer on the current residuals, keep the indices whose
//! residual is exactly divisible by `p`, divide, repeat. The shape (degree)
//! chosen at depth 0 is locked for every later layer.
//!
//! When a layer is singular (its formal derivative vanishes mod p on every
//! inlier) the lift is no longer unique. Indices the layer rejected are
//! refitted and, when they support an alternative of their own, continue as
//! a sibling branch sharing the layer prefix.

use std::collections::VecDeque;

use log::{debug, info, warn};
use modular_core::mod_reduce;
use rand::Rng;
use serde::Serialize;

use crate::config::MinerConfig;
use crate::model::{FittedModel, ModelShape, ModularModel};
use crate::observation::ObservationSet;
use crate::ransac::RansacFitter;

/// Residual sets smaller than this are never checked for ghost terms.
const GHOST_MIN_POINTS: usize = 5;
/// Highest degree a ghost term may upgrade the base model to.
const GHOST_MAX_DEGREE: usize = 2;
/// Consensus the residual fit needs before the base model is upgraded.
const GHOST_CONSENSUS: f64 = 0.6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BranchStatus {
    Active,
    /// Reached `max_depth`.
    Converged,
    /// A layer fell below `min_consensus`.
    PhaseShift,
    /// No index survived the residual check.
    Exhausted,
}

impl BranchStatus {
    pub fn is_terminal(self) -> bool {
        self != BranchStatus::Active
    }
}

/// One p-adic digit of the lifted model.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LiftLayer {
    pub depth: usize,
    pub model: ModularModel,
    /// Inliers relative to the indices still active at this depth.
    pub consensus: f64,
    /// Number of inliers at this depth.
    pub support: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct LiftBranch {
    pub id: usize,
    pub parent: Option<usize>,
    pub depth: usize,
    pub layers: Vec<LiftLayer>,
    /// Original observation indices still consistent with every layer.
    pub active_indices: Vec<usize>,
    /// `(y - prediction so far) / p^depth`, aligned with `active_indices`.
    pub residual_outputs: Vec<i64>,
    pub status: BranchStatus,
    pub final_consensus: f64,
    /// Depth of the singular layer this branch split from.
    pub forked_at: Option<usize>,
    #[serde(skip)]
    shape: Option<ModelShape>,
}

impl LiftBranch {
    fn root(obs: &ObservationSet) -> Self {
        Self {
            id: 0,
            parent: None,
            depth: 0,
            layers: Vec::new(),
            active_indices: (0..obs.len()).collect(),
            residual_outputs: obs.outputs().to_vec(),
            status: BranchStatus::Active,
            final_consensus: 0.0,
            forked_at: None,
            shape: None,
        }
    }

    /// Combine the layers into `sum layer_k * p^k` over `Z / p^layers`.
    ///
    /// `None` for an empty branch, mismatched layer arity, sparse layers or
    /// when `p^layers` overflows a `u64`.
    pub fn reconstruct(&self, p: u64) -> Option<(ModularModel, u64)> {
        let first = self.layers.first()?;
        let arity = first.model.coefficients()?.len();
        let mut totals = vec![0u128; arity];
        let mut power: u64 = 1;
        for layer in &self.layers {
            let coefficients = layer.model.coefficients()?;
            if coefficients.len() != arity {
                return None;
            }
            for (total, &c) in totals.iter_mut().zip(coefficients) {
                *total = total.checked_add((c as u128).checked_mul(power as u128)?)?;
            }
            power = power.checked_mul(p)?;
        }
        let coefficients: Vec<u64> = totals
            .into_iter()
            .map(|t| (t % power as u128) as u64)
            .collect();
        let model = match first.model {
            ModularModel::MultivariateLinear { .. } => {
                ModularModel::MultivariateLinear { coefficients }
            }
            _ => ModularModel::Polynomial { coefficients },
        };
        Some((model, power))
    }
}

/// All branches of one lift; branch 0 is the primary (non-forking) path.
#[derive(Debug, Clone, Serialize)]
pub struct LiftOutcome {
    pub prime: u64,
    pub observations: usize,
    pub branches: Vec<LiftBranch>,
}

impl LiftOutcome {
    pub fn primary(&self) -> &LiftBranch {
        &self.branches[0]
    }

    /// Share of all observations that survived `depth` of the primary branch.
    pub fn coverage_at(&self, depth: usize) -> Option<f64> {
        let layer = self.primary().layers.get(depth)?;
        Some(layer.support as f64 / self.observations as f64)
    }

    pub fn converged(&self) -> impl Iterator<Item = &LiftBranch> {
        self.branches
            .iter()
            .filter(|b| b.status == BranchStatus::Converged)
    }
}

/// Hensel lifter for one prime.
#[derive(Debug, Clone)]
pub struct HenselLifter {
    pub p: u64,
    pub iterations: usize,
    /// Highest degree tried at depth 0.
    pub base_degree: usize,
    pub max_branches: usize,
    pub min_fork_support: usize,
}

impl HenselLifter {
    pub fn new(p: u64) -> Self {
        Self {
            p,
            iterations: 100,
            base_degree: 2,
            max_branches: 8,
            min_fork_support: 3,
        }
    }

    pub fn from_config(p: u64, config: &MinerConfig) -> Self {
        Self {
            p,
            iterations: config.fit_iterations,
            base_degree: config.lift_base_degree,
            max_branches: config.max_branches,
            min_fork_support: config.min_fork_support,
        }
    }

    fn fitter(&self) -> RansacFitter {
        RansacFitter::new(self.p, self.iterations)
    }

    /// Lift `obs` to depth `max_depth`, exploring singular forks breadth-first.
    pub fn lift<R: Rng + ?Sized>(
        &self,
        obs: &ObservationSet,
        max_depth: usize,
        min_consensus: f64,
        rng: &mut R,
    ) -> LiftOutcome {
        let mut branches = vec![LiftBranch::root(obs)];
        let mut queue = VecDeque::from([0usize]);

        while let Some(id) = queue.pop_front() {
            if branches[id].depth >= max_depth {
                branches[id].status = BranchStatus::Converged;
                continue;
            }
            let sibling = self.step(obs, &mut branches, id, max_depth, min_consensus, rng);
            if !branches[id].status.is_terminal() {
                queue.push_back(id);
            }
            if let Some(sibling) = sibling {
                let sibling_id = sibling.id;
                let terminal = sibling.status.is_terminal();
                branches.push(sibling);
                if !terminal {
                    queue.push_back(sibling_id);
                }
            }
        }

        let primary = &branches[0];
        debug!(
            "lift mod {}: primary {:?} at depth {} ({} branches)",
            self.p,
            primary.status,
            primary.depth,
            branches.len()
        );
        LiftOutcome {
            prime: self.p,
            observations: obs.len(),
            branches,
        }
    }

    /// Advance branch `id` by one layer. Returns a forked sibling if one was found.
    fn step<R: Rng + ?Sized>(
        &self,
        obs: &ObservationSet,
        branches: &mut [LiftBranch],
        id: usize,
        max_depth: usize,
        min_consensus: f64,
        rng: &mut R,
    ) -> Option<LiftBranch> {
        let total_branches = branches.len();
        let branch = &mut branches[id];
        let residuals = branch.residual_outputs.clone();
        let subset = match obs.select_with_outputs(&branch.active_indices, residuals) {
            Ok(subset) => subset,
            Err(e) => {
                warn!("lift mod {}: branch {} dropped: {}", self.p, branch.id, e);
                branch.status = BranchStatus::PhaseShift;
                return None;
            }
        };

        let fitted = match branch.shape {
            None => self.fitter().fit(&subset, self.base_degree, rng),
            Some(shape) => self.fitter().fit_shape(&subset, shape, rng),
        };
        let mut fit = match fitted {
            Some(fit) if fit.consensus >= min_consensus => fit,
            other => {
                branch.status = BranchStatus::PhaseShift;
                branch.final_consensus = other.map_or(0.0, |f| f.consensus);
                debug!(
                    "lift mod {}: branch {} phase shift at depth {} ({:.3})",
                    self.p, branch.id, branch.depth, branch.final_consensus
                );
                return None;
            }
        };

        if branch.depth == 0 && !obs.is_multivariate() {
            if let Some(upgraded) = self.ghost_upgrade(&subset, &fit.model, rng) {
                info!(
                    "lift mod {}: ghost term upgrades degree {} -> {}",
                    self.p,
                    fit.model.degree(),
                    upgraded.degree()
                );
                fit.model = upgraded;
            }
        }
        if branch.shape.is_none() {
            branch.shape = fit.model.shape();
        }

        let singular = fit
            .model
            .is_singular(fit.inliers.iter().map(|&i| subset.input(i)), self.p);
        let mut sibling = None;
        if singular && total_branches < self.max_branches {
            sibling = self.fork(
                obs,
                &subset,
                branch,
                &fit,
                total_branches,
                max_depth,
                min_consensus,
                rng,
            );
        }

        let prefix_depth = branch.depth;
        advance(obs, branch, &subset, fit, self.p, max_depth);
        debug!(
            "lift mod {}: branch {} depth {} -> {} active",
            self.p,
            branch.id,
            prefix_depth,
            branch.active_indices.len()
        );
        sibling
    }

    /// Refit the indices a singular layer rejected; keep them as a sibling
    /// branch if they carry a law of their own.
    #[allow(clippy::too_many_arguments)]
    fn fork<R: Rng + ?Sized>(
        &self,
        obs: &ObservationSet,
        subset: &ObservationSet,
        branch: &LiftBranch,
        primary: &FittedModel,
        next_id: usize,
        max_depth: usize,
        min_consensus: f64,
        rng: &mut R,
    ) -> Option<LiftBranch> {
        let mut accepted = vec![false; subset.len()];
        for &i in &primary.inliers {
            accepted[i] = true;
        }
        let rejected: Vec<usize> = (0..subset.len()).filter(|&i| !accepted[i]).collect();
        if rejected.len() < self.min_fork_support.max(1) {
            return None;
        }

        let shape = branch.shape?;
        let alt_subset = subset.select(&rejected);
        let alt = self
            .fitter()
            .fit_shape(&alt_subset, shape, rng)
            .filter(|f| f.consensus >= min_consensus)?;

        info!(
            "lift mod {}: branch {} forks at depth {}: {} vs {}",
            self.p, branch.id, branch.depth, primary.model, alt.model
        );
        let mut sibling = LiftBranch {
            id: next_id,
            parent: Some(branch.id),
            depth: branch.depth,
            layers: branch.layers.clone(),
            active_indices: rejected.iter().map(|&i| branch.active_indices[i]).collect(),
            residual_outputs: rejected.iter().map(|&i| branch.residual_outputs[i]).collect(),
            status: BranchStatus::Active,
            final_consensus: 0.0,
            forked_at: Some(branch.depth),
            shape: Some(shape),
        };
        advance(obs, &mut sibling, &alt_subset, alt, self.p, max_depth);
        Some(sibling)
    }

    /// Upgrade the base model when its residuals need a strictly higher degree.
    fn ghost_upgrade<R: Rng + ?Sized>(
        &self,
        subset: &ObservationSet,
        model: &ModularModel,
        rng: &mut R,
    ) -> Option<ModularModel> {
        let degree = model.degree();
        if degree >= GHOST_MAX_DEGREE {
            return None;
        }
        let xs = subset.scalar_inputs()?;
        let p = self.p as i128;
        let mut inputs = Vec::new();
        let mut outputs = Vec::new();
        for (i, &x) in xs.iter().enumerate() {
            let Some(predicted) = model.evaluate_exact(subset.input(i)) else {
                continue;
            };
            let diff = subset.output(i) as i128 - predicted;
            if diff % p == 0 {
                inputs.push(x);
                outputs.push(mod_reduce(diff / p, self.p) as i64);
            }
        }
        if inputs.len() < GHOST_MIN_POINTS {
            return None;
        }
        let residuals = ObservationSet::from_scalars(inputs, outputs).ok()?;
        let fit = self.fitter().fit(&residuals, GHOST_MAX_DEGREE, rng)?;
        if fit.consensus > GHOST_CONSENSUS && fit.model.degree() > degree {
            model.padded_to(fit.model.degree())
        } else {
            None
        }
    }
}

/// Record `fit` as the next layer, keep exactly divisible residuals, divide by p.
fn advance(
    obs: &ObservationSet,
    branch: &mut LiftBranch,
    subset: &ObservationSet,
    fit: FittedModel,
    p: u64,
    max_depth: usize,
) {
    let p_wide = p as i128;
    let mut next_indices = Vec::with_capacity(fit.inliers.len());
    let mut next_residuals = Vec::with_capacity(fit.inliers.len());
    for &i in &fit.inliers {
        let original = branch.active_indices[i];
        let Some(predicted) = fit.model.evaluate_exact(obs.input(original)) else {
            continue;
        };
        let diff = subset.output(i) as i128 - predicted;
        if diff % p_wide != 0 {
            continue;
        }
        let Ok(residual) = i64::try_from(diff / p_wide) else {
            continue;
        };
        next_indices.push(original);
        next_residuals.push(residual);
    }

    branch.layers.push(LiftLayer {
        depth: branch.depth,
        model: fit.model,
        consensus: fit.consensus,
        support: next_indices.len(),
    });
    branch.final_consensus = fit.consensus;
    branch.depth += 1;
    branch.active_indices = next_indices;
    branch.residual_outputs = next_residuals;
    branch.status = if branch.active_indices.is_empty() {
        BranchStatus::Exhausted
    } else if branch.depth >= max_depth {
        BranchStatus::Converged
    } else {
        BranchStatus::Active
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observation::InputRef;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn coefficients(layer: &LiftLayer) -> Vec<u64> {
        layer.model.coefficients().unwrap().to_vec()
    }

    #[test]
    fn test_lift_round_trip_two_digits() {
        let mut rng = StdRng::seed_from_u64(20);
        let p = 7i64;
        // a = 3 + 7*2, b = 5 + 7*4
        let (a, b) = (3 + p * 2, 5 + p * 4);
        let xs: Vec<i64> = (0..80).map(|i| (i * 37) % 211).collect();
        let ys: Vec<i64> = xs.iter().map(|&x| a * x + b).collect();
        let obs = ObservationSet::from_scalars(xs, ys).unwrap();

        let outcome = HenselLifter::new(7).lift(&obs, 2, 0.5, &mut rng);
        let primary = outcome.primary();
        assert_eq!(primary.status, BranchStatus::Converged);
        assert_eq!(coefficients(&primary.layers[0]), vec![3, 5]);
        assert_eq!(coefficients(&primary.layers[1]), vec![2, 4]);
        let (model, modulus) = primary.reconstruct(7).unwrap();
        assert_eq!(modulus, 49);
        assert_eq!(model.coefficients(), Some(&[17u64, 33][..]));
        assert_eq!(outcome.coverage_at(1), Some(1.0));
    }

    #[test]
    fn test_residual_invariant_holds_at_every_depth() {
        let mut rng = StdRng::seed_from_u64(21);
        let xs: Vec<i64> = (0..60).collect();
        let ys: Vec<i64> = xs.iter().map(|&x| 2 * x * x + 11 * x + 40).collect();
        let obs = ObservationSet::from_scalars(xs, ys).unwrap();
        let outcome = HenselLifter::new(3).lift(&obs, 3, 0.5, &mut rng);
        let primary = outcome.primary();
        let (model, modulus) = primary.reconstruct(3).unwrap();
        assert_eq!(primary.status, BranchStatus::Converged);
        assert_eq!(modulus, 27);
        for &i in &primary.active_indices {
            let predicted = model.evaluate_mod(obs.input(i), modulus).unwrap();
            assert_eq!(predicted, mod_reduce(obs.output(i) as i128, modulus));
        }
    }

    #[test]
    fn test_singular_layer_forks_sibling_branch() {
        let mut rng = StdRng::seed_from_u64(22);
        // every input is 0 mod 5, so only constants can be fitted
        let xs: Vec<i64> = (0..30).map(|i| 5 * i).collect();
        let ys: Vec<i64> = (0..30).map(|i| if i % 5 < 3 { 7 } else { 3 }).collect();
        let obs = ObservationSet::from_scalars(xs, ys).unwrap();

        let outcome = HenselLifter::new(5).lift(&obs, 2, 0.3, &mut rng);
        assert_eq!(outcome.branches.len(), 2);
        let primary = outcome.primary();
        let sibling = &outcome.branches[1];
        assert_eq!(primary.status, BranchStatus::Converged);
        assert_eq!(sibling.parent, Some(0));
        assert_eq!(sibling.forked_at, Some(0));
        assert_eq!(sibling.status, BranchStatus::Converged);
        assert_eq!(primary.reconstruct(5).unwrap().0.coefficients(), Some(&[7u64][..]));
        assert_eq!(sibling.reconstruct(5).unwrap().0.coefficients(), Some(&[3u64][..]));
        assert_eq!(primary.active_indices.len() + sibling.active_indices.len(), 30);
    }

    #[test]
    fn test_phase_shift_on_noise() {
        let mut rng = StdRng::seed_from_u64(23);
        let xs: Vec<i64> = (0..50).collect();
        let ys: Vec<i64> = (0..50).map(|i| (i * i * 7919 + 13) % 1000).collect();
        let obs = ObservationSet::from_scalars(xs, ys).unwrap();
        let outcome = HenselLifter::new(11).lift(&obs, 3, 0.9, &mut rng);
        assert_eq!(outcome.primary().status, BranchStatus::PhaseShift);
        assert!(outcome.primary().final_consensus < 0.9);
    }

    #[test]
    fn test_ghost_term_upgrades_degree() {
        let mut rng = StdRng::seed_from_u64(24);
        // y = 7x^2 + x: mod 7 the quadratic term vanishes
        let xs: Vec<i64> = (0..40).collect();
        let ys: Vec<i64> = xs.iter().map(|&x| 7 * x * x + x).collect();
        let obs = ObservationSet::from_scalars(xs, ys).unwrap();
        let outcome = HenselLifter::new(7).lift(&obs, 2, 0.5, &mut rng);
        let primary = outcome.primary();
        assert_eq!(coefficients(&primary.layers[0]), vec![0, 1, 0]);
        assert_eq!(coefficients(&primary.layers[1]), vec![1, 0, 0]);
        assert_eq!(primary.status, BranchStatus::Converged);
    }

    #[test]
    fn test_multivariate_lift_keeps_shape() {
        let mut rng = StdRng::seed_from_u64(25);
        let xs: Vec<Vec<i64>> = (0..40).map(|i| vec![i, (i * 7) % 13]).collect();
        let ys: Vec<i64> = xs.iter().map(|v| 1 + 4 * v[0] + 9 * v[1]).collect();
        let obs = ObservationSet::from_vectors(xs, ys).unwrap();
        let outcome = HenselLifter::new(3).lift(&obs, 2, 0.5, &mut rng);
        let primary = outcome.primary();
        assert_eq!(primary.status, BranchStatus::Converged);
        assert_eq!(coefficients(&primary.layers[0]), vec![1, 1, 0]);
        assert_eq!(coefficients(&primary.layers[1]), vec![0, 1, 0]);
        let (model, modulus) = primary.reconstruct(3).unwrap();
        assert_eq!(modulus, 9);
        assert_eq!(
            model.evaluate_mod(InputRef::Vector(&[2, 5]), 9),
            Some(mod_reduce(1 + 8 + 45, 9))
        );
    }
}
