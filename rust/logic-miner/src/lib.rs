//! logic-miner: discover hidden arithmetic laws in noisy observations.
//!
//! Rather than assuming a modulus, the miner scans candidate primes, fits
//! low-degree laws mod p with RANSAC, lifts the winner p-adically, glues
//! several primes together by CRT, and falls back to Mahler expansions or
//! real-valued fits when no finite field explains the data. Distance
//! matrices are turned into ultrametric trees.
//!
//! Entry point: [`LogicMiner::fit`].

pub mod adelic;
pub mod config;
pub mod discovery;
pub mod error;
pub mod lifter;
pub mod mahler;
pub mod metrics;
pub mod miner;
pub mod model;
pub mod observation;
pub mod ransac;
pub mod real;
pub mod sparse;
pub mod ultrametric;

pub use adelic::{AdelicSynthesizer, CompositeKind, CompositeModel, LocalModel};
pub use config::MinerConfig;
pub use discovery::{CandidateModulus, Discovery, ModulusScanner};
pub use error::{MinerError, MinerResult};
pub use lifter::{BranchStatus, HenselLifter, LiftBranch, LiftOutcome};
pub use mahler::{MahlerExpansion, Rational};
pub use miner::{LogicMiner, MinerInput, MiningResult, Modulus, RealConsistency, Targets};
pub use model::{FittedModel, ModularModel};
pub use observation::ObservationSet;
pub use ransac::{PeeledLayer, RansacFitter};
pub use real::{RealFit, RealKind};
pub use ultrametric::{build_tree, UltrametricTree};
