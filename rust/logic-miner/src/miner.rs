//! Mining orchestrator.
//!
//! `LogicMiner::fit` detects the shape of its input and routes it:
//!
//! - distance matrices become ultrametric trees;
//! - vector inputs with outputs go through multivariate peeling;
//! - scalar inputs go through modulus discovery, then Adelic synthesis,
//!   the Mahler and real fallbacks, or a Hensel lift of the best prime.
//!
//! Every call builds its own RNG and scanner, so no state survives between
//! fits.

use std::fmt;

use log::{info, warn};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};

use crate::adelic::{AdelicSynthesizer, CompositeModel, LocalModel};
use crate::config::MinerConfig;
use crate::discovery::{CandidateModulus, ModulusScanner};
use crate::error::{MinerError, MinerResult};
use crate::lifter::{HenselLifter, LiftOutcome};
use crate::mahler::MahlerExpansion;
use crate::metrics::lipschitz_violation;
use crate::model::ModularModel;
use crate::observation::ObservationSet;
use crate::ransac::{PeeledLayer, RansacFitter};
use crate::real::{self, RealFit};
use crate::ultrametric::{build_tree, UltrametricTree};

/// Peeling stops once fewer points than this remain.
const PEEL_MIN_SIZE: usize = 5;
const PEEL_MIN_RATIO: f64 = 0.4;
/// Dominant multivariate layers above this ratio are lifted.
const MULTIVARIATE_LIFT_RATIO: f64 = 0.8;
const MULTIVARIATE_LIFT_DEPTH: usize = 20;
/// Best dominant ratio at or below this is reported as noise.
const MULTIVARIATE_NOISE_RATIO: f64 = 0.5;
/// Largest candidate subset tried by the Adelic synthesis.
const MAX_SYNTHESIS_SUBSET: usize = 3;
const REAL_UNIVERSAL_FIDELITY: f64 = 0.85;
const REAL_MODULAR_FIDELITY: f64 = 0.2;

// ---------------------------------------------------------------------------
// Inputs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum MinerInput {
    Scalars(Vec<i64>),
    Vectors(Vec<Vec<i64>>),
    /// Pairwise distances.
    Matrix(Vec<Vec<f64>>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Targets {
    Outputs(Vec<i64>),
    /// Leaf names for a distance matrix.
    Labels(Vec<String>),
    None,
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

/// Modulus a result lives over. Real-valued results live at `p = infinity`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Modulus {
    Finite(u64),
    Infinite,
}

impl Serialize for Modulus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Modulus::Finite(m) => serializer.serialize_u64(*m),
            Modulus::Infinite => serializer.serialize_str("infinity"),
        }
    }
}

impl fmt::Display for Modulus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Modulus::Finite(m) => write!(f, "{}", m),
            Modulus::Infinite => write!(f, "inf"),
        }
    }
}

/// How the data behaves over the reals, reported next to a p-adic lift.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RealConsistency {
    /// The law also holds over the reals.
    Universal,
    StrictlyModular,
    Ambiguous,
}

impl RealConsistency {
    fn from_fidelity(fidelity: f64) -> Self {
        if fidelity > REAL_UNIVERSAL_FIDELITY {
            RealConsistency::Universal
        } else if fidelity < REAL_MODULAR_FIDELITY {
            RealConsistency::StrictlyModular
        } else {
            RealConsistency::Ambiguous
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PolynomialResult {
    pub p: u64,
    pub discovery_confidence: f64,
    /// Primary lift branch combined over `Z / modulus`, when it has layers.
    pub model: Option<ModularModel>,
    pub modulus: Option<u64>,
    pub lift: LiftOutcome,
    pub lipschitz_violation: f64,
    pub real_fidelity: f64,
    pub real_consistency: RealConsistency,
    pub candidates: Vec<CandidateModulus>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AdelicResult {
    pub composite: CompositeModel,
    pub fidelity: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MahlerResult {
    pub regularity: f64,
    pub expansion: MahlerExpansion,
}

#[derive(Debug, Clone, Serialize)]
pub struct MultivariateResult {
    pub p: u64,
    /// Ratio of the dominant layer.
    pub confidence: f64,
    pub layers: Vec<PeeledLayer>,
    /// Lift of the dominant law, when its ratio was high enough.
    pub lift: Option<LiftOutcome>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NoiseResult {
    /// Best dominant-layer ratio over all scanned primes.
    pub best_ratio: f64,
}

/// Outcome of one `fit` call.
#[derive(Debug, Clone)]
pub enum MiningResult {
    Polynomial(PolynomialResult),
    Adelic(AdelicResult),
    Mahler(MahlerResult),
    Real(RealFit),
    Multivariate(MultivariateResult),
    Multimodal(MultivariateResult),
    Ultrametric(UltrametricTree),
    Noise(NoiseResult),
}

impl MiningResult {
    pub fn mode(&self) -> String {
        match self {
            MiningResult::Polynomial(_) => "POLYNOMIAL".to_string(),
            MiningResult::Adelic(r) => format!("ADELIC_{}", r.composite.kind.name()),
            MiningResult::Mahler(_) => "MAHLER".to_string(),
            MiningResult::Real(r) => format!("REAL_{}", r.kind.name()),
            MiningResult::Multivariate(_) => "MULTIVARIATE".to_string(),
            MiningResult::Multimodal(_) => "MULTIMODAL".to_string(),
            MiningResult::Ultrametric(_) => "ULTRAMETRIC".to_string(),
            MiningResult::Noise(_) => "NOISE".to_string(),
        }
    }

    pub fn p(&self) -> Option<Modulus> {
        match self {
            MiningResult::Polynomial(r) => Some(Modulus::Finite(r.p)),
            MiningResult::Adelic(r) => Some(Modulus::Finite(r.composite.modulus)),
            MiningResult::Mahler(r) => Some(Modulus::Finite(r.expansion.p)),
            MiningResult::Real(_) => Some(Modulus::Infinite),
            MiningResult::Multivariate(r) | MiningResult::Multimodal(r) => {
                Some(Modulus::Finite(r.p))
            }
            MiningResult::Ultrametric(_) | MiningResult::Noise(_) => None,
        }
    }

    pub fn discovery_confidence(&self) -> Option<f64> {
        match self {
            MiningResult::Polynomial(r) => Some(r.discovery_confidence),
            MiningResult::Adelic(r) => Some(r.fidelity),
            MiningResult::Mahler(r) => Some(r.regularity),
            MiningResult::Real(r) => Some(r.fidelity),
            MiningResult::Multivariate(r) | MiningResult::Multimodal(r) => Some(r.confidence),
            MiningResult::Ultrametric(_) | MiningResult::Noise(_) => None,
        }
    }
}

impl Serialize for MiningResult {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("MiningResult", 4)?;
        state.serialize_field("mode", &self.mode())?;
        state.serialize_field("p", &self.p())?;
        state.serialize_field("discovery_confidence", &self.discovery_confidence())?;
        match self {
            MiningResult::Polynomial(r) => state.serialize_field("detail", r)?,
            MiningResult::Adelic(r) => state.serialize_field("detail", r)?,
            MiningResult::Mahler(r) => state.serialize_field("detail", r)?,
            MiningResult::Real(r) => state.serialize_field("detail", r)?,
            MiningResult::Multivariate(r) | MiningResult::Multimodal(r) => {
                state.serialize_field("detail", r)?
            }
            MiningResult::Ultrametric(r) => state.serialize_field("detail", r)?,
            MiningResult::Noise(r) => state.serialize_field("detail", r)?,
        }
        state.end()
    }
}

// ---------------------------------------------------------------------------
// Miner
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct LogicMiner {
    config: MinerConfig,
}

impl LogicMiner {
    pub fn new(config: MinerConfig) -> MinerResult<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Default configuration with a fixed seed.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            config: MinerConfig::default().with_seed(seed),
        }
    }

    pub fn config(&self) -> &MinerConfig {
        &self.config
    }

    fn rng(&self) -> StdRng {
        match self.config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        }
    }

    /// Detect the input shape and run the matching pipeline.
    pub fn fit(&self, input: MinerInput, targets: Targets) -> MinerResult<MiningResult> {
        match (input, targets) {
            (MinerInput::Matrix(matrix), Targets::Labels(labels)) => {
                self.fit_tree(&matrix, Some(labels))
            }
            (MinerInput::Matrix(matrix), Targets::None) => self.fit_tree(&matrix, None),
            (MinerInput::Matrix(_), Targets::Outputs(_)) => Err(MinerError::InvalidInput(
                "a distance matrix takes labels, not outputs".to_string(),
            )),
            (MinerInput::Vectors(rows), Targets::Outputs(outputs)) => {
                self.fit_multivariate(ObservationSet::from_vectors(rows, outputs)?)
            }
            (MinerInput::Vectors(rows), targets) => {
                if rows.is_empty() || rows.iter().any(|r| r.len() != rows.len()) {
                    return Err(MinerError::InvalidInput(
                        "vectors without outputs must form a square distance matrix".to_string(),
                    ));
                }
                let matrix: Vec<Vec<f64>> = rows
                    .iter()
                    .map(|r| r.iter().map(|&d| d as f64).collect())
                    .collect();
                let labels = match targets {
                    Targets::Labels(labels) => Some(labels),
                    _ => None,
                };
                self.fit_tree(&matrix, labels)
            }
            (MinerInput::Scalars(xs), Targets::Outputs(outputs)) => {
                self.fit_scalar(ObservationSet::from_scalars(xs, outputs)?)
            }
            (MinerInput::Scalars(_), _) => Err(MinerError::InvalidInput(
                "scalar inputs need integer outputs".to_string(),
            )),
        }
    }

    pub fn fit_scalars(&self, inputs: Vec<i64>, outputs: Vec<i64>) -> MinerResult<MiningResult> {
        self.fit(MinerInput::Scalars(inputs), Targets::Outputs(outputs))
    }

    pub fn fit_vectors(
        &self,
        inputs: Vec<Vec<i64>>,
        outputs: Vec<i64>,
    ) -> MinerResult<MiningResult> {
        self.fit(MinerInput::Vectors(inputs), Targets::Outputs(outputs))
    }

    pub fn fit_matrix(
        &self,
        matrix: Vec<Vec<f64>>,
        labels: Option<Vec<String>>,
    ) -> MinerResult<MiningResult> {
        let targets = labels.map_or(Targets::None, Targets::Labels);
        self.fit(MinerInput::Matrix(matrix), targets)
    }

    fn fit_tree(
        &self,
        matrix: &[Vec<f64>],
        labels: Option<Vec<String>>,
    ) -> MinerResult<MiningResult> {
        info!("miner: ultrametric tree over {} leaves", matrix.len());
        let labels = labels.unwrap_or_else(|| (0..matrix.len()).map(|i| i.to_string()).collect());
        Ok(MiningResult::Ultrametric(build_tree(&labels, matrix)?))
    }

    fn fit_multivariate(&self, obs: ObservationSet) -> MinerResult<MiningResult> {
        info!(
            "miner: multivariate data, {} observations of dimension {}",
            obs.len(),
            obs.dimension()
        );
        let mut rng = self.rng();
        let mut best: Option<(u64, Vec<PeeledLayer>)> = None;
        let mut best_ratio = 0.0;
        for &p in &self.config.multivariate_primes {
            let fitter = RansacFitter::new(p, self.config.fit_iterations)
                .with_early_accept(self.config.early_accept);
            let layers = fitter.peel(
                &obs.reduced(p),
                self.config.scan_max_degree,
                PEEL_MIN_SIZE,
                PEEL_MIN_RATIO,
                &mut rng,
            );
            let Some(dominant) = layers.first() else {
                continue;
            };
            if dominant.fit.consensus > best_ratio {
                best_ratio = dominant.fit.consensus;
                best = Some((p, layers));
            }
        }

        let Some((p, layers)) = best.filter(|_| best_ratio > MULTIVARIATE_NOISE_RATIO) else {
            warn!("miner: no multivariate law above {:.2}", MULTIVARIATE_NOISE_RATIO);
            return Ok(MiningResult::Noise(NoiseResult { best_ratio }));
        };
        info!(
            "miner: multivariate mod {} with {} layer(s), dominant ratio {:.3}",
            p,
            layers.len(),
            best_ratio
        );

        let lift = (best_ratio > MULTIVARIATE_LIFT_RATIO).then(|| {
            HenselLifter::from_config(p, &self.config).lift(
                &obs,
                MULTIVARIATE_LIFT_DEPTH,
                0.9 * best_ratio,
                &mut rng,
            )
        });
        let result = MultivariateResult {
            p,
            confidence: best_ratio,
            layers,
            lift,
        };
        Ok(if result.layers.len() == 1 {
            MiningResult::Multivariate(result)
        } else {
            MiningResult::Multimodal(result)
        })
    }

    fn fit_scalar(&self, obs: ObservationSet) -> MinerResult<MiningResult> {
        let mut rng = self.rng();
        let config = &self.config;
        let scanner = ModulusScanner::from_config(config);

        info!("miner: discovery over {} observations", obs.len());
        let discovery = scanner.select_detailed(&obs, &mut rng);
        let (p, score) = (discovery.best_prime, discovery.best_score);
        info!("miner: discovered p={} (confidence {:.3})", p, score);

        let strong = discovery.above(config.synthesis_floor);
        if strong.len() >= 2 {
            let primes: Vec<u64> = strong.iter().map(|c| c.prime).collect();
            info!("miner: strong signals at {:?}, attempting synthesis", primes);
            let synthesizer = AdelicSynthesizer::new(HenselLifter::from_config(2, config));
            for size in 2..=strong.len().min(MAX_SYNTHESIS_SUBSET) {
                let locals: Vec<LocalModel> = strong[..size]
                    .iter()
                    .map(|c| LocalModel {
                        modulus: c.prime,
                        model: c.model.clone(),
                    })
                    .collect();
                let Some(composite) = synthesizer.solve_crt(&locals, Some(&obs), &mut rng) else {
                    continue;
                };
                let fidelity = composite.fidelity(&obs);
                info!(
                    "miner: composite mod {} has fidelity {:.3}",
                    composite.modulus, fidelity
                );
                if fidelity > config.crt_fidelity {
                    return Ok(MiningResult::Adelic(AdelicResult {
                        composite,
                        fidelity,
                    }));
                }
            }
            warn!("miner: synthesis rejected, continuing with p={}", p);
        }

        if score < config.min_consensus {
            info!(
                "miner: polynomial confidence {:.3} below {:.2}, trying continuous fallbacks",
                score, config.min_consensus
            );
            if let Some(result) = self.fallback(&obs, score, &mut rng)? {
                return Ok(result);
            }
        }

        let violation = lipschitz_violation(&obs, p, config.lipschitz_samples, &mut rng);
        info!("miner: Lipschitz violation {:.1}% at p={}", violation * 100.0, p);
        if violation > config.lipschitz_max_violation {
            return Err(MinerError::NoLogicFound {
                reason: format!(
                    "Lipschitz violation {:.1}% at p={} exceeds {:.1}%",
                    violation * 100.0,
                    p,
                    config.lipschitz_max_violation * 100.0
                ),
            });
        }

        let real_fit = real::solve(&obs, &mut rng);
        let real_consistency = RealConsistency::from_fidelity(real_fit.fidelity);
        info!(
            "miner: real fidelity {:.3} ({:?})",
            real_fit.fidelity, real_consistency
        );

        let lift = HenselLifter::from_config(p, config).lift(
            &obs,
            config.lift_max_depth,
            config.min_consensus,
            &mut rng,
        );
        let (model, modulus) = match lift.primary().reconstruct(p) {
            Some((model, modulus)) => (Some(model), Some(modulus)),
            None => (None, None),
        };
        Ok(MiningResult::Polynomial(PolynomialResult {
            p,
            discovery_confidence: score,
            model,
            modulus,
            lift,
            lipschitz_violation: violation,
            real_fidelity: real_fit.fidelity,
            real_consistency,
            candidates: discovery.candidates,
        }))
    }

    /// Best of the polynomial score, Mahler regularity and real fidelity.
    ///
    /// `Ok(None)` means the polynomial path won and lifting should go ahead.
    fn fallback(
        &self,
        obs: &ObservationSet,
        poly_score: f64,
        rng: &mut StdRng,
    ) -> MinerResult<Option<MiningResult>> {
        let config = &self.config;
        let scanner = ModulusScanner::from_config(config);
        let mahler = scanner.scan_mahler(obs);
        let mahler_score = mahler.as_ref().map_or(0.0, |m| m.regularity);
        let real_fit = real::solve(obs, rng);
        info!(
            "miner: mahler regularity {:.3} (p={:?}), real {} fidelity {:.3}",
            mahler_score,
            mahler.as_ref().map(|m| m.p),
            real_fit.kind.name(),
            real_fit.fidelity
        );

        let best = poly_score.max(mahler_score).max(real_fit.fidelity);
        if best < config.min_consensus {
            let mode = if best == poly_score {
                "POLYNOMIAL".to_string()
            } else if best == mahler_score {
                "MAHLER".to_string()
            } else {
                format!("REAL_{}", real_fit.kind.name())
            };
            return Err(MinerError::NoLogicFound {
                reason: format!("best strategy {} scored {:.3}", mode, best),
            });
        }

        if poly_score >= mahler_score && poly_score >= real_fit.fidelity {
            return Ok(None);
        }
        if let Some(scan) = mahler.filter(|_| mahler_score >= real_fit.fidelity) {
            let expansion = MahlerExpansion::fit(obs, scan.p, config.mahler_output_degree)
                .unwrap_or(scan);
            info!("miner: modeled by Mahler expansion at p={}", expansion.p);
            return Ok(Some(MiningResult::Mahler(MahlerResult {
                regularity: mahler_score,
                expansion,
            })));
        }
        info!("miner: modeled by real {} fit", real_fit.kind.name());
        Ok(Some(MiningResult::Real(real_fit)))
    }
}
