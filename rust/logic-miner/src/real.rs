//! Archimedean (`p = infinity`) fallback: robust real-valued line and step fits.

use log::debug;
use rand::seq::index;
use rand::Rng;
use serde::Serialize;

use crate::observation::ObservationSet;

const LINEAR_ITERATIONS: usize = 50;
const STEP_ITERATIONS: usize = 20;
const STEP_PERIODS: std::ops::RangeInclusive<i64> = 2..=20;
/// A prediction within this distance of the output counts as a hit.
const TOLERANCE: f64 = 0.5;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RealKind {
    LinearReal { slope: f64, intercept: f64 },
    /// `y = height * floor(x / period) + offset`.
    StepFunction { period: i64, height: f64, offset: f64 },
    NoFit,
    /// Fewer than two observations.
    Trivial,
}

impl RealKind {
    pub fn name(&self) -> &'static str {
        match self {
            RealKind::LinearReal { .. } => "LINEAR_REAL",
            RealKind::StepFunction { .. } => "STEP_FUNCTION",
            RealKind::NoFit => "NO_FIT",
            RealKind::Trivial => "TRIVIAL",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RealFit {
    pub kind: RealKind,
    pub fidelity: f64,
}

/// Best of robust linear and robust step regression over scalar data.
///
/// Vector data has no real-valued fallback and reports `NoFit`.
pub fn solve<R: Rng + ?Sized>(obs: &ObservationSet, rng: &mut R) -> RealFit {
    if obs.len() < 2 {
        return RealFit {
            kind: RealKind::Trivial,
            fidelity: 1.0,
        };
    }
    let Some(xs) = obs.scalar_inputs() else {
        return RealFit {
            kind: RealKind::NoFit,
            fidelity: 0.0,
        };
    };
    let ys = obs.outputs();

    let mut best = RealFit {
        kind: RealKind::NoFit,
        fidelity: 0.0,
    };

    if let Some((fidelity, slope, intercept)) = ransac_line(xs, ys, LINEAR_ITERATIONS, rng) {
        if fidelity > best.fidelity {
            best = RealFit {
                kind: RealKind::LinearReal { slope, intercept },
                fidelity,
            };
        }
    }

    let mut best_step: Option<(f64, i64, f64, f64)> = None;
    for period in STEP_PERIODS {
        let zs: Vec<i64> = xs.iter().map(|&x| x.div_euclid(period)).collect();
        let Some((fidelity, height, offset)) = ransac_line(&zs, ys, STEP_ITERATIONS, rng) else {
            continue;
        };
        if best_step.map_or(true, |(f, ..)| fidelity > f) {
            best_step = Some((fidelity, period, height, offset));
        }
    }
    if let Some((fidelity, period, height, offset)) = best_step {
        if fidelity > best.fidelity {
            best = RealFit {
                kind: RealKind::StepFunction {
                    period,
                    height,
                    offset,
                },
                fidelity,
            };
        }
    }

    debug!("real fallback: {} fidelity {:.3}", best.kind.name(), best.fidelity);
    best
}

/// Two-point RANSAC line; `(fidelity, slope, intercept)` of the best sample.
fn ransac_line<R: Rng + ?Sized>(
    xs: &[i64],
    ys: &[i64],
    iterations: usize,
    rng: &mut R,
) -> Option<(f64, f64, f64)> {
    let n = xs.len();
    if n < 2 {
        return None;
    }
    let mut best: Option<(f64, f64, f64)> = None;
    for _ in 0..iterations {
        let pair = index::sample(rng, n, 2);
        let (i, j) = (pair.index(0), pair.index(1));
        if xs[i] == xs[j] {
            continue;
        }
        // widened: outputs and inputs may span the whole i64 range
        let rise = (ys[j] as i128 - ys[i] as i128) as f64;
        let run = (xs[j] as i128 - xs[i] as i128) as f64;
        let slope = rise / run;
        let intercept = ys[i] as f64 - slope * xs[i] as f64;
        let hits = xs
            .iter()
            .zip(ys)
            .filter(|(&x, &y)| (slope * x as f64 + intercept - y as f64).abs() <= TOLERANCE)
            .count();
        let fidelity = hits as f64 / n as f64;
        if best.map_or(true, |(f, ..)| fidelity > f) {
            best = Some((fidelity, slope, intercept));
        }
    }
    best
}
