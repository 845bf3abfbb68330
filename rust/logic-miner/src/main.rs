//! logic-miner CLI: run the miner on built-in scenarios.
//!
//! Scenarios:
//!   --scenario=linear         y = 3x + 7 mod 11 with 30% outliers
//!   --scenario=composite      y = (5x + 3) mod 6, recovered by CRT synthesis
//!   --scenario=parity         y = x mod 2, recovered by the Mahler fallback
//!   --scenario=peeling        two interleaved laws mod 17
//!   --scenario=multivariate   y = 2 + 3a + 5b mod 7 on vector inputs
//!   --scenario=tree           p-adic distances between integers
//!   --scenario=all            every scenario above (default)
//!
//! Options:
//!   --seed=<N>                RNG seed (default: 42)
//!   --config=<path>           JSON file overriding MinerConfig fields
//!   --json                    Print each result as JSON as well
//!
//! Set RUST_LOG=info (or debug) to follow the pipeline.

use std::time::Instant;

use log::info;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use logic_miner::ultrametric::padic_distance_matrix;
use logic_miner::{LogicMiner, MinerConfig, MinerError, MinerInput, MiningResult, Targets};

const SCENARIOS: [&str; 6] = [
    "linear",
    "composite",
    "parity",
    "peeling",
    "multivariate",
    "tree",
];

struct CliConfig {
    scenarios: Vec<String>,
    seed: u64,
    config_path: Option<String>,
    json: bool,
}

fn parse_args() -> CliConfig {
    let args: Vec<String> = std::env::args().collect();

    let scenario = args
        .iter()
        .find_map(|a| a.strip_prefix("--scenario="))
        .unwrap_or("all")
        .to_string();
    let scenarios = if scenario == "all" {
        SCENARIOS.iter().map(|s| s.to_string()).collect()
    } else {
        vec![scenario]
    };

    let seed = args
        .iter()
        .find_map(|a| a.strip_prefix("--seed=")?.parse::<u64>().ok())
        .unwrap_or(42);

    let config_path = args
        .iter()
        .find_map(|a| a.strip_prefix("--config="))
        .map(|s| s.to_string());

    CliConfig {
        scenarios,
        seed,
        config_path,
        json: args.iter().any(|a| a == "--json"),
    }
}

fn load_config(cli: &CliConfig) -> Result<MinerConfig, MinerError> {
    let config = match &cli.config_path {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .map_err(|e| MinerError::Config(format!("cannot read {}: {}", path, e)))?;
            MinerConfig::from_json(&text)?
        }
        None => MinerConfig::default(),
    };
    Ok(config.with_seed(cli.seed))
}

/// Inputs, targets and a consensus override for a named scenario.
fn scenario_data(name: &str, seed: u64) -> Option<(MinerInput, Targets, Option<f64>)> {
    let mut rng = StdRng::seed_from_u64(seed ^ 0x5eed);
    let data = match name {
        "linear" => {
            let xs: Vec<i64> = (0..100).collect();
            let ys = xs
                .iter()
                .map(|&x| {
                    if rng.gen_bool(0.3) {
                        rng.gen_range(0..11)
                    } else {
                        (3 * x + 7) % 11
                    }
                })
                .collect();
            (MinerInput::Scalars(xs), Targets::Outputs(ys), None)
        }
        "composite" => {
            let xs: Vec<i64> = (0..100).collect();
            let ys = xs.iter().map(|&x| (5 * x + 3) % 6).collect();
            (MinerInput::Scalars(xs), Targets::Outputs(ys), None)
        }
        "parity" => {
            let xs: Vec<i64> = (0..100).collect();
            let ys = xs.iter().map(|&x| x % 2).collect();
            (MinerInput::Scalars(xs), Targets::Outputs(ys), Some(0.6))
        }
        "peeling" => {
            let xs: Vec<i64> = (0..70).filter(|x| x % 17 != 6).collect();
            let ys = xs
                .iter()
                .map(|&x| {
                    if x % 5 == 0 {
                        (8 * x + 5) % 17
                    } else {
                        (3 * x + 1) % 17
                    }
                })
                .collect();
            (MinerInput::Scalars(xs), Targets::Outputs(ys), None)
        }
        "multivariate" => {
            let rows: Vec<Vec<i64>> = (0..80)
                .map(|_| vec![rng.gen_range(0..50), rng.gen_range(0..50)])
                .collect();
            let ys = rows.iter().map(|r| (2 + 3 * r[0] + 5 * r[1]) % 7).collect();
            (MinerInput::Vectors(rows), Targets::Outputs(ys), None)
        }
        "tree" => {
            let coords = [0i64, 8, 4, 12, 2, 6, 1];
            let labels = coords.iter().map(|c| format!("n{}", c)).collect();
            let matrix = padic_distance_matrix(&coords, 2);
            (MinerInput::Matrix(matrix), Targets::Labels(labels), None)
        }
        _ => return None,
    };
    Some(data)
}

fn summary(result: &MiningResult) -> String {
    match result {
        MiningResult::Polynomial(r) => match (&r.model, r.modulus) {
            (Some(model), Some(m)) => format!(
                "{} mod {} ({} branch(es), real {:?})",
                model,
                m,
                r.lift.branches.len(),
                r.real_consistency
            ),
            _ => format!("no stable layer mod {}", r.p),
        },
        MiningResult::Adelic(r) => format!(
            "{} mod {} from {:?}",
            r.composite.model(),
            r.composite.modulus,
            r.composite.source_moduli
        ),
        MiningResult::Mahler(r) => format!(
            "{} Mahler coefficients over {} nodes",
            r.expansion.coefficients.len(),
            r.expansion.nodes.len()
        ),
        MiningResult::Real(r) => format!("{:?}", r.kind),
        MiningResult::Multivariate(r) | MiningResult::Multimodal(r) => r
            .layers
            .iter()
            .map(|l| format!("{} ({:.2})", l.fit.model, l.fit.consensus))
            .collect::<Vec<_>>()
            .join(" | "),
        MiningResult::Ultrametric(tree) => tree.newick.clone(),
        MiningResult::Noise(r) => format!("best ratio {:.2}", r.best_ratio),
    }
}

fn main() {
    env_logger::init();
    let cli = parse_args();

    let base_config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {}", e);
            std::process::exit(2);
        }
    };

    println!("=== logic-miner (seed {}) ===\n", cli.seed);
    println!(
        "{:<14} {:<28} {:>10} {:>8} {:>9}  {}",
        "scenario", "mode", "p", "conf", "time_ms", "law"
    );
    println!("{}", "-".repeat(100));

    let mut failures = 0;
    for name in &cli.scenarios {
        let Some((input, targets, min_consensus)) = scenario_data(name, cli.seed) else {
            eprintln!("unknown scenario '{}', expected one of {:?}", name, SCENARIOS);
            failures += 1;
            continue;
        };
        let mut config = base_config.clone();
        if let Some(c) = min_consensus {
            config = config.with_min_consensus(c);
        }
        let miner = match LogicMiner::new(config) {
            Ok(miner) => miner,
            Err(e) => {
                eprintln!("error: {}", e);
                std::process::exit(2);
            }
        };

        info!("running scenario {}", name);
        let start = Instant::now();
        let outcome = miner.fit(input, targets);
        let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;

        match outcome {
            Ok(result) => {
                let p = result.p().map_or("-".to_string(), |m| m.to_string());
                let conf = result
                    .discovery_confidence()
                    .map_or("-".to_string(), |c| format!("{:.3}", c));
                println!(
                    "{:<14} {:<28} {:>10} {:>8} {:>9.1}  {}",
                    name,
                    result.mode(),
                    p,
                    conf,
                    elapsed_ms,
                    summary(&result)
                );
                if cli.json {
                    match serde_json::to_string_pretty(&result) {
                        Ok(json) => println!("{}\n", json),
                        Err(e) => eprintln!("  cannot serialize result: {}", e),
                    }
                }
            }
            Err(e) => {
                failures += 1;
                println!(
                    "{:<14} {:<28} {:>10} {:>8} {:>9.1}  {}",
                    name, "ERROR", "-", "-", elapsed_ms, e
                );
            }
        }
    }

    println!("{}", "=".repeat(100));
    if failures > 0 {
        println!("{} scenario(s) failed", failures);
        std::process::exit(1);
    }
}
