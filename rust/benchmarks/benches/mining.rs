use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use logic_miner::mahler::MahlerExpansion;
use logic_miner::ultrametric::{build_tree, padic_distance_matrix};
use logic_miner::{
    AdelicSynthesizer, HenselLifter, LocalModel, LogicMiner, ModularModel, ModulusScanner,
    ObservationSet, RansacFitter,
};

/// `y = a x + b mod p` on `0..n` with a share of uniform outliers.
fn noisy_linear(n: i64, p: i64, noise: f64, rng: &mut StdRng) -> ObservationSet {
    let xs: Vec<i64> = (0..n).collect();
    let ys = xs
        .iter()
        .map(|&x| {
            if rng.gen_bool(noise) {
                rng.gen_range(0..p)
            } else {
                (3 * x + 7) % p
            }
        })
        .collect();
    ObservationSet::from_scalars(xs, ys).unwrap()
}

fn bench_ransac(c: &mut Criterion) {
    let mut group = c.benchmark_group("ransac_fit");
    let mut rng = StdRng::seed_from_u64(1);

    for n in [100, 1_000, 10_000] {
        let obs = noisy_linear(n, 101, 0.3, &mut rng);
        let fitter = RansacFitter::new(101, 100);
        group.bench_with_input(BenchmarkId::from_parameter(n), &obs, |b, obs| {
            b.iter(|| fitter.fit(obs, 3, &mut rng));
        });
    }

    group.finish();
}

fn bench_peel(c: &mut Criterion) {
    let mut group = c.benchmark_group("ransac_peel");
    let mut rng = StdRng::seed_from_u64(2);

    let xs: Vec<i64> = (0..500).collect();
    let ys = xs
        .iter()
        .map(|&x| if x % 4 == 0 { (8 * x + 5) % 17 } else { (3 * x + 1) % 17 })
        .collect();
    let obs = ObservationSet::from_scalars(xs, ys).unwrap();
    let fitter = RansacFitter::new(17, 100);
    group.bench_function("two_laws_mod_17", |b| {
        b.iter(|| fitter.peel(&obs, 2, 5, 0.4, &mut rng));
    });

    group.finish();
}

fn bench_lift(c: &mut Criterion) {
    let mut group = c.benchmark_group("hensel_lift");
    group.sample_size(20);
    let mut rng = StdRng::seed_from_u64(3);

    let xs: Vec<i64> = (0..200).collect();
    let ys: Vec<i64> = xs.iter().map(|x| 1234 * x + 5678).collect();
    let obs = ObservationSet::from_scalars(xs, ys).unwrap();
    for p in [2u64, 3, 7] {
        let lifter = HenselLifter::new(p);
        group.bench_with_input(BenchmarkId::from_parameter(p), &obs, |b, obs| {
            b.iter(|| lifter.lift(obs, 5, 0.3, &mut rng));
        });
    }

    group.finish();
}

fn bench_scanner(c: &mut Criterion) {
    let mut group = c.benchmark_group("modulus_scan");
    group.sample_size(10);
    let mut rng = StdRng::seed_from_u64(4);

    for n in [100, 400] {
        let obs = noisy_linear(n, 13, 0.2, &mut rng);
        let scanner = ModulusScanner::default();
        group.bench_with_input(BenchmarkId::from_parameter(n), &obs, |b, obs| {
            b.iter(|| scanner.select_detailed(obs, &mut rng));
        });
    }

    group.finish();
}

fn bench_crt(c: &mut Criterion) {
    let mut rng = StdRng::seed_from_u64(5);
    let locals: Vec<LocalModel> = [(3u64, [2u64, 1]), (5, [4, 0]), (7, [1, 6]), (11, [3, 3])]
        .iter()
        .map(|&(modulus, coefficients)| LocalModel {
            modulus,
            model: ModularModel::Polynomial {
                coefficients: coefficients.to_vec(),
            },
        })
        .collect();
    let synthesizer = AdelicSynthesizer::default();
    c.bench_function("crt_four_primes", |b| {
        b.iter(|| synthesizer.solve_crt(&locals, None, &mut rng));
    });
}

fn bench_mahler(c: &mut Criterion) {
    let mut group = c.benchmark_group("mahler_fit");
    let xs: Vec<i64> = (0..100).collect();
    let ys: Vec<i64> = xs.iter().map(|x| x % 2).collect();
    let obs = ObservationSet::from_scalars(xs, ys).unwrap();

    for degree in [10usize, 20, 40] {
        group.bench_with_input(BenchmarkId::from_parameter(degree), &obs, |b, obs| {
            b.iter(|| MahlerExpansion::fit(obs, 2, degree));
        });
    }

    group.finish();
}

fn bench_tree(c: &mut Criterion) {
    let mut group = c.benchmark_group("ultrametric_tree");

    for n in [16i64, 64, 128] {
        let coords: Vec<i64> = (0..n).map(|i| i * 7 + 3).collect();
        let labels: Vec<String> = coords.iter().map(|c| c.to_string()).collect();
        let matrix = padic_distance_matrix(&coords, 2);
        group.bench_with_input(BenchmarkId::from_parameter(n), &matrix, |b, m| {
            b.iter(|| build_tree(&labels, m));
        });
    }

    group.finish();
}

fn bench_end_to_end(c: &mut Criterion) {
    let mut group = c.benchmark_group("logic_miner_fit");
    group.sample_size(10);

    let xs: Vec<i64> = (0..100).collect();
    let composite: Vec<i64> = xs.iter().map(|x| (5 * x + 3) % 6).collect();
    let miner = LogicMiner::with_seed(6);
    group.bench_function("composite_mod_6", |b| {
        b.iter(|| miner.fit_scalars(xs.clone(), composite.clone()));
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_ransac,
    bench_peel,
    bench_lift,
    bench_scanner,
    bench_crt,
    bench_mahler,
    bench_tree,
    bench_end_to_end
);
criterion_main!(benches);
