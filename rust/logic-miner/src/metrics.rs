//! p-adic continuity metrics.

use modular_core::padic_norm;
use rand::Rng;

use crate::observation::ObservationSet;

/// Fraction of sampled pairs violating `|f(x) - f(y)|_p <= |x - y|_p`.
///
/// Pairs are drawn uniformly with replacement; a pair that picks the same
/// index twice is skipped. Vector data and sets with fewer than two points
/// report 0.
pub fn lipschitz_violation<R: Rng + ?Sized>(
    obs: &ObservationSet,
    p: u64,
    samples: usize,
    rng: &mut R,
) -> f64 {
    let Some(xs) = obs.scalar_inputs() else {
        return 0.0;
    };
    let n = xs.len();
    if n < 2 {
        return 0.0;
    }
    let ys = obs.outputs();

    let mut violations = 0usize;
    let mut checks = 0usize;
    for _ in 0..samples {
        let i = rng.gen_range(0..n);
        let j = rng.gen_range(0..n);
        if i == j {
            continue;
        }
        let dist_x = padic_norm(xs[i] as i128 - xs[j] as i128, p);
        let dist_y = padic_norm(ys[i] as i128 - ys[j] as i128, p);
        if dist_y > dist_x {
            violations += 1;
        }
        checks += 1;
    }
    if checks == 0 {
        0.0
    } else {
        violations as f64 / checks as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_polynomials_are_lipschitz() {
        let mut rng = StdRng::seed_from_u64(30);
        let xs: Vec<i64> = (0..100).collect();
        let ys: Vec<i64> = xs.iter().map(|&x| 3 * x * x + 5 * x + 1).collect();
        let obs = ObservationSet::from_scalars(xs, ys).unwrap();
        assert_eq!(lipschitz_violation(&obs, 2, 200, &mut rng), 0.0);
        assert_eq!(lipschitz_violation(&obs, 5, 200, &mut rng), 0.0);
    }

    #[test]
    fn test_expanding_map_violates() {
        let mut rng = StdRng::seed_from_u64(31);
        // y = x / 2 doubles every 2-adic distance
        let xs: Vec<i64> = (0..50).map(|i| 2 * i).collect();
        let ys: Vec<i64> = (0..50).collect();
        let obs = ObservationSet::from_scalars(xs, ys).unwrap();
        assert_eq!(lipschitz_violation(&obs, 2, 200, &mut rng), 1.0);
    }

    #[test]
    fn test_degenerate_inputs() {
        let mut rng = StdRng::seed_from_u64(32);
        let single = ObservationSet::from_scalars(vec![1], vec![1]).unwrap();
        assert_eq!(lipschitz_violation(&single, 3, 10, &mut rng), 0.0);
    }
}
