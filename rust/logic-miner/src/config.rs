//! Miner configuration.
//!
//! The acceptance thresholds are empirically chosen; they are kept here as
//! plain values so experiments can override them without touching the
//! pipeline code.

use serde::{Deserialize, Serialize};

use crate::error::{MinerError, MinerResult};

/// Primes scanned by the candidate modulus scanner.
pub const DEFAULT_SCAN_PRIMES: [u64; 20] = [
    2, 3, 5, 7, 11, 13, 17, 19, 23, 29, 31, 37, 41, 43, 47, 53, 59, 61, 67, 71,
];

/// Primes scanned for multivariate (vector input) data.
pub const DEFAULT_MULTIVARIATE_PRIMES: [u64; 10] = [2, 3, 5, 7, 11, 13, 17, 19, 23, 101];

/// Primes scanned by the Mahler regularity scan.
pub const DEFAULT_MAHLER_PRIMES: [u64; 9] = [2, 3, 5, 7, 11, 13, 17, 19, 23];

/// Runtime configuration for `LogicMiner`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MinerConfig {
    /// Minimum consensus for any strategy to be accepted.
    /// Default: 0.30.
    pub min_consensus: f64,

    /// RANSAC returns a degree immediately once its ratio exceeds this.
    /// Default: 0.70.
    pub early_accept: f64,

    /// Minimum fidelity on the original data for a CRT synthesis.
    /// Default: 0.95.
    pub crt_fidelity: f64,

    /// Dense consensus below which the sparse recoverer is also tried.
    /// Default: 0.80.
    pub sparse_trigger: f64,

    /// Candidates must score above this to take part in synthesis.
    /// Default: 0.40.
    pub synthesis_floor: f64,

    /// RANSAC iterations per degree inside the lifter and peeling.
    pub fit_iterations: usize,

    /// RANSAC iterations per degree inside the modulus scanner.
    pub scan_iterations: usize,

    /// Highest polynomial degree the scanner tries (at most 3).
    pub scan_max_degree: usize,

    /// Highest polynomial degree the lifter tries at depth 0 (at most 3).
    pub lift_base_degree: usize,

    /// Hensel lifting depth for the final scalar model.
    pub lift_max_depth: usize,

    /// Upper bound on lifting branches, forks included.
    pub max_branches: usize,

    /// Smallest rejected subset allowed to seed a sibling branch.
    pub min_fork_support: usize,

    /// Random pairs sampled by the Lipschitz pre-flight check.
    pub lipschitz_samples: usize,

    /// Maximum tolerated fraction of Lipschitz violations.
    /// Default: 0.05.
    pub lipschitz_max_violation: f64,

    /// Candidate primes for scalar discovery.
    pub scan_primes: Vec<u64>,

    /// Candidate primes for multivariate discovery.
    pub multivariate_primes: Vec<u64>,

    /// Candidate primes for the Mahler regularity scan.
    pub mahler_primes: Vec<u64>,

    /// Expansion degree used while scanning Mahler regularity.
    pub mahler_scan_degree: usize,

    /// Expansion degree reported in a Mahler result.
    pub mahler_output_degree: usize,

    /// Largest prime factor of a detected hidden modulus that is scanned.
    pub max_detected_prime: u64,

    /// Seed for reproducible runs; `None` draws from the thread RNG.
    pub seed: Option<u64>,
}

impl Default for MinerConfig {
    fn default() -> Self {
        Self {
            min_consensus: 0.30,
            early_accept: 0.70,
            crt_fidelity: 0.95,
            sparse_trigger: 0.80,
            synthesis_floor: 0.40,
            fit_iterations: 100,
            scan_iterations: 150,
            scan_max_degree: 3,
            lift_base_degree: 2,
            lift_max_depth: 5,
            max_branches: 8,
            min_fork_support: 3,
            lipschitz_samples: 100,
            lipschitz_max_violation: 0.05,
            scan_primes: DEFAULT_SCAN_PRIMES.to_vec(),
            multivariate_primes: DEFAULT_MULTIVARIATE_PRIMES.to_vec(),
            mahler_primes: DEFAULT_MAHLER_PRIMES.to_vec(),
            mahler_scan_degree: 15,
            mahler_output_degree: 20,
            max_detected_prime: 1009,
            seed: None,
        }
    }
}

impl MinerConfig {
    /// Parse a configuration from JSON. Missing fields take their defaults.
    pub fn from_json(text: &str) -> MinerResult<Self> {
        let config: MinerConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Same configuration with a different `min_consensus`.
    pub fn with_min_consensus(mut self, min_consensus: f64) -> Self {
        self.min_consensus = min_consensus;
        self
    }

    /// Same configuration with a fixed seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Check every field is inside its meaningful range.
    pub fn validate(&self) -> MinerResult<()> {
        let ratios = [
            ("min_consensus", self.min_consensus),
            ("early_accept", self.early_accept),
            ("crt_fidelity", self.crt_fidelity),
            ("sparse_trigger", self.sparse_trigger),
            ("synthesis_floor", self.synthesis_floor),
            ("lipschitz_max_violation", self.lipschitz_max_violation),
        ];
        for (name, value) in ratios {
            if !(0.0..=1.0).contains(&value) {
                return Err(MinerError::Config(format!(
                    "{} must be in [0, 1], got {}",
                    name, value
                )));
            }
        }
        if self.fit_iterations == 0 || self.scan_iterations == 0 {
            return Err(MinerError::Config(
                "iteration budgets must be positive".to_string(),
            ));
        }
        if self.scan_max_degree > 3 || self.lift_base_degree > 3 {
            return Err(MinerError::Config(
                "polynomial degrees above 3 are not supported".to_string(),
            ));
        }
        if self.lift_max_depth == 0 {
            return Err(MinerError::Config("lift_max_depth must be >= 1".to_string()));
        }
        if self.max_branches == 0 {
            return Err(MinerError::Config("max_branches must be >= 1".to_string()));
        }
        for (name, primes) in [
            ("scan_primes", &self.scan_primes),
            ("multivariate_primes", &self.multivariate_primes),
            ("mahler_primes", &self.mahler_primes),
        ] {
            if primes.is_empty() {
                return Err(MinerError::Config(format!("{} must not be empty", name)));
            }
            if let Some(bad) = primes.iter().find(|&&p| !modular_core::is_prime(p)) {
                return Err(MinerError::Config(format!("{} contains non-prime {}", name, bad)));
            }
        }
        Ok(())
    }
}
