//! Scaling runs for the logic miner.
//!
//! Mines laws of increasing size and modulus, measuring wall time and
//! whether the generating law was recovered, to see how each stage of the
//! pipeline grows with the number of observations.

use std::sync::mpsc;
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use logic_miner::ultrametric::{build_tree, padic_distance_matrix};
use logic_miner::{
    LogicMiner, MinerConfig, MinerResult, MiningResult, ModularModel, ModulusScanner,
    ObservationSet,
};

/// Maximum time per single mining run (seconds).
const TIMEOUT_SECS: u64 = 30;

/// Outcome of one pipeline run under a deadline.
enum MiningRun {
    Finished {
        result: MinerResult<MiningResult>,
        elapsed: Duration,
    },
    /// The miner was still running at the deadline; its thread is abandoned.
    TimedOut,
}

/// Mine `(xs, ys)` on a worker thread, giving up after `deadline`.
fn mine_with_deadline(
    config: MinerConfig,
    xs: Vec<i64>,
    ys: Vec<i64>,
    deadline: Duration,
) -> MiningRun {
    let (tx, rx) = mpsc::channel();
    let start = Instant::now();
    std::thread::spawn(move || {
        let result = LogicMiner::new(config).and_then(|miner| miner.fit_scalars(xs, ys));
        let _ = tx.send(result);
    });
    match rx.recv_timeout(deadline) {
        Ok(result) => MiningRun::Finished {
            result,
            elapsed: start.elapsed(),
        },
        Err(_) => MiningRun::TimedOut,
    }
}

/// `y = a x + b mod p` with a share of outliers that never hit the law.
fn noisy_law(
    n: i64,
    p: i64,
    a: i64,
    b: i64,
    noise: f64,
    rng: &mut StdRng,
) -> (Vec<i64>, Vec<i64>) {
    let xs: Vec<i64> = (0..n).collect();
    let ys = xs
        .iter()
        .map(|&x| {
            let clean = (a * x + b) % p;
            if rng.gen_bool(noise) {
                (clean + rng.gen_range(1..p)) % p
            } else {
                clean
            }
        })
        .collect();
    (xs, ys)
}

fn main() {
    println!("================================================================");
    println!("  SCALING: logic miner stages vs. number of observations");
    println!("================================================================\n");

    let mut rng = StdRng::seed_from_u64(12345);
    let sizes: Vec<i64> = vec![50, 100, 200, 400, 800, 1600];

    bench_discovery(&sizes, &mut rng);
    bench_pipeline(&sizes, &mut rng);
    bench_trees();
}

// ============================================================================
// Discovery: scan cost and recovered prime per modulus
// ============================================================================

fn bench_discovery(sizes: &[i64], rng: &mut StdRng) {
    println!("================================================================");
    println!("  Modulus discovery (20% outliers)");
    println!("================================================================\n");
    println!(
        "  {:>6} {:>6} {:>8} {:>10} {:>8} {:>10}",
        "N", "p", "found", "score", "#cand", "time_us"
    );
    println!("  {}", "-".repeat(56));

    let primes: Vec<u64> = modular_core::primes_up_to(71)
        .into_iter()
        .filter(|&p| p >= 5)
        .step_by(4)
        .collect();
    let scanner = ModulusScanner::default();
    for &n in sizes {
        for &p in &primes {
            let (xs, ys) = noisy_law(n, p as i64, 3, 2, 0.2, rng);
            let Ok(obs) = ObservationSet::from_scalars(xs, ys) else {
                continue;
            };
            let start = Instant::now();
            let discovery = scanner.select_detailed(&obs, rng);
            let elapsed = start.elapsed();
            println!(
                "  {:>6} {:>6} {:>8} {:>10.3} {:>8} {:>10}",
                n,
                p,
                discovery.best_prime,
                discovery.best_score,
                discovery.candidates.len(),
                elapsed.as_micros()
            );
        }
    }
    println!();
}

// ============================================================================
// Full pipeline: recovery rate and timing
// ============================================================================

fn bench_pipeline(sizes: &[i64], rng: &mut StdRng) {
    println!("================================================================");
    println!("  Full pipeline: y = 7x + 4 mod 13, 25% outliers");
    println!("================================================================\n");
    println!(
        "  {:>6} {:>14} {:>6} {:>8} {:>10}  {}",
        "N", "mode", "p", "conf", "time_ms", "status"
    );
    println!("  {}", "-".repeat(62));

    for &n in sizes {
        let (xs, ys) = noisy_law(n, 13, 7, 4, 0.25, rng);
        let seed: u64 = rng.gen();
        let config = MinerConfig::default().with_seed(seed);
        let deadline = Duration::from_secs(TIMEOUT_SECS);

        match mine_with_deadline(config, xs, ys, deadline) {
            MiningRun::TimedOut => println!(
                "  {:>6} {:>14} {:>6} {:>8} {:>10}  TIMEOUT",
                n,
                "-",
                "-",
                "-",
                deadline.as_millis()
            ),
            MiningRun::Finished {
                result: Err(e),
                elapsed,
            } => println!(
                "  {:>6} {:>14} {:>6} {:>8} {:>10}  {}",
                n,
                "ERROR",
                "-",
                "-",
                elapsed.as_millis(),
                e
            ),
            MiningRun::Finished {
                result: Ok(result),
                elapsed,
            } => {
                let recovered = match &result {
                    MiningResult::Polynomial(r) => r.lift.primary().layers.first().map_or(
                        false,
                        |layer| {
                            layer.model
                                == ModularModel::Polynomial {
                                    coefficients: vec![7, 4],
                                }
                        },
                    ),
                    _ => false,
                };
                println!(
                    "  {:>6} {:>14} {:>6} {:>8.3} {:>10}  {}",
                    n,
                    result.mode(),
                    result.p().map_or("-".to_string(), |m| m.to_string()),
                    result.discovery_confidence().unwrap_or(0.0),
                    elapsed.as_millis(),
                    if recovered { "OK" } else { "MISS" }
                );
            }
        }
    }
    println!();
}

// ============================================================================
// Ultrametric trees: complete linkage is cubic in the leaf count
// ============================================================================

fn bench_trees() {
    println!("================================================================");
    println!("  Ultrametric tree construction (2-adic distances)");
    println!("================================================================\n");
    println!("  {:>6} {:>12} {:>12}", "leaves", "time_us", "ultrametric");
    println!("  {}", "-".repeat(34));

    for n in [16i64, 32, 64, 128, 256] {
        let coords: Vec<i64> = (0..n).map(|i| i * i + 1).collect();
        let labels: Vec<String> = coords.iter().map(|c| c.to_string()).collect();
        let matrix = padic_distance_matrix(&coords, 2);
        let start = Instant::now();
        let tree = build_tree(&labels, &matrix);
        let elapsed = start.elapsed();
        let status = match tree {
            Ok(tree) if tree.is_ultrametric() => "yes",
            Ok(_) => "NO",
            Err(_) => "ERROR",
        };
        println!("  {:>6} {:>12} {:>12}", n, elapsed.as_micros(), status);
    }
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mine_with_deadline_reports_finished_run() {
        let xs: Vec<i64> = (0..60).collect();
        let ys: Vec<i64> = xs.iter().map(|x| (7 * x + 4) % 13).collect();
        let config = MinerConfig::default().with_seed(1);
        match mine_with_deadline(config, xs, ys, Duration::from_secs(TIMEOUT_SECS)) {
            MiningRun::Finished { result, .. } => {
                let result = result.unwrap();
                assert_eq!(result.mode(), "POLYNOMIAL");
            }
            MiningRun::TimedOut => panic!("small law timed out"),
        }
    }

    #[test]
    fn test_mine_with_deadline_surfaces_config_errors() {
        let config = MinerConfig::default().with_min_consensus(2.0);
        match mine_with_deadline(config, vec![0, 1, 2], vec![0, 1, 2], Duration::from_secs(5)) {
            MiningRun::Finished { result, .. } => assert!(result.is_err()),
            MiningRun::TimedOut => panic!("config validation should not time out"),
        }
    }
}
