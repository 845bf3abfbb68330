//! Adelic synthesis: glue per-prime models into one model mod `M = prod n_i`.
//!
//! Each local model is first lifted to a prime power when the data allows
//! it, then every coefficient position is solved by the Chinese Remainder
//! Theorem. A synthesis is only as good as its fidelity on the original
//! observations, which the orchestrator checks before accepting it.

use log::{debug, warn};
use modular_core::{crt_reconstruct, mod_reduce, pairwise_coprime};
use rand::Rng;
use serde::Serialize;

use crate::lifter::{BranchStatus, HenselLifter};
use crate::model::ModularModel;
use crate::observation::ObservationSet;

/// Lift depth used to upgrade a local model before synthesis.
pub const SYNTHESIS_LIFT_DEPTH: usize = 3;
/// Lift consensus required before a local model is upgraded.
pub const SYNTHESIS_LIFT_CONSENSUS: f64 = 0.9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CompositeKind {
    CompositeConstant,
    CompositeLinear,
    CompositePolynomial,
}

impl CompositeKind {
    fn for_degree(degree: usize) -> Self {
        match degree {
            0 => CompositeKind::CompositeConstant,
            1 => CompositeKind::CompositeLinear,
            _ => CompositeKind::CompositePolynomial,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            CompositeKind::CompositeConstant => "COMPOSITE_CONSTANT",
            CompositeKind::CompositeLinear => "COMPOSITE_LINEAR",
            CompositeKind::CompositePolynomial => "COMPOSITE_POLYNOMIAL",
        }
    }
}

/// A local law: a model over `Z / modulus`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LocalModel {
    pub modulus: u64,
    pub model: ModularModel,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompositeModel {
    pub modulus: u64,
    pub degree: usize,
    /// Leading coefficient first, each in `[0, modulus)`.
    pub coefficients: Vec<u64>,
    pub source_moduli: Vec<u64>,
    pub kind: CompositeKind,
    /// [`fidelity`](Self::fidelity) on the observations used for synthesis.
    pub observed_fidelity: Option<f64>,
}

impl CompositeModel {
    pub fn model(&self) -> ModularModel {
        ModularModel::Polynomial {
            coefficients: self.coefficients.clone(),
        }
    }

    /// Fraction of observations with `model(x) == y (mod M)`.
    pub fn fidelity(&self, obs: &ObservationSet) -> f64 {
        let model = self.model();
        let hits = (0..obs.len())
            .filter(|&i| {
                model.evaluate_mod(obs.input(i), self.modulus)
                    == Some(mod_reduce(obs.output(i) as i128, self.modulus))
            })
            .count();
        hits as f64 / obs.len() as f64
    }
}

/// Combines local models by CRT.
#[derive(Debug, Clone)]
pub struct AdelicSynthesizer {
    /// Lifter settings for prime-power upgrades; its prime is replaced per model.
    pub lifter: HenselLifter,
}

impl Default for AdelicSynthesizer {
    fn default() -> Self {
        Self {
            lifter: HenselLifter::new(2),
        }
    }
}

impl AdelicSynthesizer {
    pub fn new(lifter: HenselLifter) -> Self {
        Self { lifter }
    }

    /// Synthesize a composite model from local models.
    ///
    /// With observations, each local model is lifted first and the result
    /// carries its fidelity. `None` when the models cannot be combined:
    /// non-polynomial models, incompatible degrees, non-coprime moduli or
    /// an overflowing product.
    pub fn solve_crt<R: Rng + ?Sized>(
        &self,
        models: &[LocalModel],
        obs: Option<&ObservationSet>,
        rng: &mut R,
    ) -> Option<CompositeModel> {
        if models.is_empty() {
            return None;
        }
        let locals: Vec<LocalModel> = match obs {
            Some(obs) => models.iter().map(|m| self.lift_local(m, obs, rng)).collect(),
            None => models.to_vec(),
        };

        let mut coefficient_sets = Vec::with_capacity(locals.len());
        for local in &locals {
            match &local.model {
                ModularModel::Polynomial { coefficients } => {
                    coefficient_sets.push(coefficients.clone())
                }
                other => {
                    warn!("adelic: cannot synthesize non-polynomial model {}", other);
                    return None;
                }
            }
        }

        let degrees: Vec<usize> = coefficient_sets.iter().map(|c| c.len() - 1).collect();
        let max_degree = degrees.iter().copied().max()?;
        let min_degree = degrees.iter().copied().min()?;
        if max_degree != min_degree {
            // constants mix with lines as (0, c); any other mismatch is fatal
            if max_degree > 1 {
                warn!("adelic: incompatible degrees {:?}", degrees);
                return None;
            }
            for coefficients in coefficient_sets.iter_mut() {
                if coefficients.len() == 1 {
                    coefficients.insert(0, 0);
                }
            }
        }

        let moduli: Vec<u64> = locals.iter().map(|l| l.modulus).collect();
        if !pairwise_coprime(&moduli) {
            warn!("adelic: moduli {:?} are not pairwise coprime", moduli);
            return None;
        }

        let mut coefficients = Vec::with_capacity(max_degree + 1);
        let mut modulus = 1;
        for position in 0..=max_degree {
            let residues: Vec<u64> = coefficient_sets.iter().map(|c| c[position]).collect();
            let (value, m) = crt_reconstruct(&residues, &moduli)?;
            coefficients.push(value);
            modulus = m;
        }

        let mut composite = CompositeModel {
            modulus,
            degree: max_degree,
            coefficients,
            source_moduli: moduli,
            kind: CompositeKind::for_degree(max_degree),
            observed_fidelity: None,
        };
        if let Some(obs) = obs {
            composite.observed_fidelity = Some(composite.fidelity(obs));
        }
        debug!(
            "adelic: {} mod {} from {:?} (fidelity {:?})",
            composite.model(),
            composite.modulus,
            composite.source_moduli,
            composite.observed_fidelity
        );
        Some(composite)
    }

    /// Replace a prime model by its prime-power lift when the data supports it.
    ///
    /// The lift is kept only if its first layer is the model that was passed
    /// in; a refit that picked another law or upgraded the degree leaves the
    /// prime model untouched.
    fn lift_local<R: Rng + ?Sized>(
        &self,
        local: &LocalModel,
        obs: &ObservationSet,
        rng: &mut R,
    ) -> LocalModel {
        let lifter = HenselLifter {
            p: local.modulus,
            ..self.lifter.clone()
        };
        let outcome = lifter.lift(obs, SYNTHESIS_LIFT_DEPTH, SYNTHESIS_LIFT_CONSENSUS, rng);
        let primary = outcome.primary();
        let same_base = primary
            .layers
            .first()
            .map_or(false, |layer| layer.model == local.model);
        if !same_base {
            debug!(
                "adelic: lift mod {} does not start from {}, keeping it",
                local.modulus, local.model
            );
            return local.clone();
        }
        if primary.status == BranchStatus::Converged && primary.layers.len() > 1 {
            if let Some((model, modulus)) = primary.reconstruct(local.modulus) {
                if matches!(model, ModularModel::Polynomial { .. }) {
                    debug!("adelic: lifted mod {} to mod {}", local.modulus, modulus);
                    return LocalModel { modulus, model };
                }
            }
        }
        local.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn poly(modulus: u64, coefficients: &[u64]) -> LocalModel {
        LocalModel {
            modulus,
            model: ModularModel::Polynomial {
                coefficients: coefficients.to_vec(),
            },
        }
    }

    #[test]
    fn test_crt_round_trip() {
        let mut rng = StdRng::seed_from_u64(40);
        // y = 17x + 4 mod 35
        let locals = [poly(5, &[2, 4]), poly(7, &[3, 4])];
        let composite = AdelicSynthesizer::default()
            .solve_crt(&locals, None, &mut rng)
            .unwrap();
        assert_eq!(composite.modulus, 35);
        assert_eq!(composite.coefficients, vec![17, 4]);
        assert_eq!(composite.kind, CompositeKind::CompositeLinear);

        let xs: Vec<i64> = (0..70).collect();
        let ys: Vec<i64> = xs.iter().map(|x| (17 * x + 4) % 35).collect();
        let obs = ObservationSet::from_scalars(xs, ys).unwrap();
        assert_eq!(composite.fidelity(&obs), 1.0);
    }

    #[test]
    fn test_constant_pads_against_linear() {
        let mut rng = StdRng::seed_from_u64(41);
        let locals = [poly(2, &[1]), poly(3, &[2, 0])];
        let composite = AdelicSynthesizer::default()
            .solve_crt(&locals, None, &mut rng)
            .unwrap();
        assert_eq!(composite.coefficients, vec![2, 3]);
        assert_eq!(composite.modulus, 6);
    }

    #[test]
    fn test_rejections() {
        let mut rng = StdRng::seed_from_u64(42);
        let synth = AdelicSynthesizer::default();
        assert!(synth
            .solve_crt(&[poly(5, &[1, 2, 3]), poly(7, &[1, 2])], None, &mut rng)
            .is_none());
        assert!(synth
            .solve_crt(&[poly(4, &[1, 2]), poly(6, &[1, 2])], None, &mut rng)
            .is_none());
        let sparse = LocalModel {
            modulus: 11,
            model: ModularModel::SparseMonomial {
                coefficient: 1,
                exponent: 9,
                offset: 0,
            },
        };
        assert!(synth.solve_crt(&[sparse, poly(7, &[1])], None, &mut rng).is_none());
        assert!(synth.solve_crt(&[], None, &mut rng).is_none());
    }

    #[test]
    fn test_lifted_synthesis_reaches_prime_powers() {
        let mut rng = StdRng::seed_from_u64(43);
        // y = 5x + 3 over the integers: both primes lift cleanly
        let xs: Vec<i64> = (0..60).collect();
        let ys: Vec<i64> = xs.iter().map(|x| 5 * x + 3).collect();
        let obs = ObservationSet::from_scalars(xs, ys).unwrap();
        let locals = [poly(2, &[1, 1]), poly(3, &[2, 0])];
        let composite = AdelicSynthesizer::default()
            .solve_crt(&locals, Some(&obs), &mut rng)
            .unwrap();
        assert_eq!(composite.modulus, 8 * 27);
        assert_eq!(composite.coefficients, vec![5, 3]);
        assert_eq!(composite.observed_fidelity, Some(1.0));
    }

    #[test]
    fn test_lift_that_changes_degree_keeps_prime_model() {
        let mut rng = StdRng::seed_from_u64(44);
        // y = 3x^2 + 2x + 1: linear mod 2 and mod 3, but mod 3 the residuals
        // carry x^2, so a fresh lift there comes back quadratic
        let xs: Vec<i64> = (0..60).collect();
        let ys: Vec<i64> = xs.iter().map(|x| 3 * x * x + 2 * x + 1).collect();
        let obs = ObservationSet::from_scalars(xs, ys).unwrap();

        let synth = AdelicSynthesizer::default();
        let kept = synth.lift_local(&poly(3, &[2, 1]), &obs, &mut rng);
        assert_eq!(kept, poly(3, &[2, 1]));

        let locals = [poly(2, &[1, 1]), poly(3, &[2, 1])];
        let composite = synth.solve_crt(&locals, Some(&obs), &mut rng).unwrap();
        assert_eq!(composite.modulus, 6);
        assert_eq!(composite.coefficients, vec![5, 1]);
        assert_eq!(composite.source_moduli, vec![2, 3]);
        assert_eq!(composite.observed_fidelity, Some(1.0));
    }

    #[test]
    fn test_lift_from_a_different_law_keeps_prime_model() {
        let mut rng = StdRng::seed_from_u64(45);
        // the data follow 5x + 3, the caller hands over 2x mod 3
        let xs: Vec<i64> = (0..60).collect();
        let ys: Vec<i64> = xs.iter().map(|x| 5 * x + 3).collect();
        let obs = ObservationSet::from_scalars(xs, ys).unwrap();
        let local = poly(3, &[1, 0]);
        let kept = AdelicSynthesizer::default().lift_local(&local, &obs, &mut rng);
        assert_eq!(kept, local);
    }
}
