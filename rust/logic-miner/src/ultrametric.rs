//! Ultrametric trees by complete-linkage agglomeration.
//!
//! Merging the closest pair and taking `max` distances to the merged
//! cluster makes the merge heights monotone, so the cophenetic distances
//! of the result satisfy `d(x, z) <= max(d(x, y), d(y, z))` whatever the
//! input matrix looked like.

use log::debug;
use modular_core::valuation;
use serde::Serialize;

use crate::error::{MinerError, MinerResult};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UltrametricTree {
    /// Nested labels, e.g. `((a,b),c);`.
    pub newick: String,
    pub labels: Vec<String>,
    /// Merge height at which each pair of leaves first shares a cluster.
    pub distances: Vec<Vec<f64>>,
}

impl UltrametricTree {
    /// True when every triple satisfies the strong triangle inequality.
    pub fn is_ultrametric(&self) -> bool {
        let n = self.distances.len();
        for i in 0..n {
            for j in 0..n {
                for k in 0..n {
                    let d = &self.distances;
                    if d[i][k] > d[i][j].max(d[j][k]) + 1e-12 {
                        return false;
                    }
                }
            }
        }
        true
    }
}

fn validate(labels: &[String], matrix: &[Vec<f64>]) -> MinerResult<()> {
    let n = matrix.len();
    if n == 0 {
        return Err(MinerError::InvalidInput("distance matrix is empty".to_string()));
    }
    if let Some(row) = matrix.iter().position(|r| r.len() != n) {
        return Err(MinerError::InvalidInput(format!(
            "distance matrix is not square: row {} has {} entries, expected {}",
            row,
            matrix[row].len(),
            n
        )));
    }
    if labels.len() != n {
        return Err(MinerError::InvalidInput(format!(
            "{} labels for a {}x{} matrix",
            labels.len(),
            n,
            n
        )));
    }
    Ok(())
}

/// Build the complete-linkage tree over `labels`.
///
/// Only the upper triangle of `matrix` is read. Ties go to the
/// lexicographically first pair `(i, j)`.
pub fn build_tree(labels: &[String], matrix: &[Vec<f64>]) -> MinerResult<UltrametricTree> {
    validate(labels, matrix)?;
    let n = matrix.len();

    let mut names: Vec<String> = labels.to_vec();
    let mut members: Vec<Vec<usize>> = (0..n).map(|i| vec![i]).collect();
    let mut active = vec![true; n];
    let mut working: Vec<Vec<f64>> = matrix.to_vec();
    let mut cophenetic = vec![vec![0.0; n]; n];

    for _ in 1..n {
        let mut closest: Option<(usize, usize, f64)> = None;
        for i in (0..n).filter(|&i| active[i]) {
            for j in ((i + 1)..n).filter(|&j| active[j]) {
                let d = working[i][j];
                if closest.map_or(true, |(_, _, best)| d < best) {
                    closest = Some((i, j, d));
                }
            }
        }
        let Some((i, j, height)) = closest else {
            break;
        };

        for &a in &members[i] {
            for &b in &members[j] {
                cophenetic[a][b] = height;
                cophenetic[b][a] = height;
            }
        }
        let absorbed = std::mem::take(&mut members[j]);
        members[i].extend(absorbed);
        names[i] = format!("({},{})", names[i], names[j]);
        active[j] = false;

        for k in (0..n).filter(|&k| active[k] && k != i) {
            let (ik, jk) = (upper(&working, i, k), upper(&working, j, k));
            let merged = ik.max(jk);
            set_upper(&mut working, i, k, merged);
        }
        debug!("ultrametric: merged {} and {} at {}", i, j, height);
    }

    let root = (0..n).find(|&i| active[i]).unwrap_or(0);
    Ok(UltrametricTree {
        newick: format!("{};", names[root]),
        labels: labels.to_vec(),
        distances: cophenetic,
    })
}

fn upper(matrix: &[Vec<f64>], a: usize, b: usize) -> f64 {
    let (lo, hi) = if a < b { (a, b) } else { (b, a) };
    matrix[lo][hi]
}

fn set_upper(matrix: &mut [Vec<f64>], a: usize, b: usize, value: f64) {
    let (lo, hi) = if a < b { (a, b) } else { (b, a) };
    matrix[lo][hi] = value;
}

/// Pairwise p-adic distances `p^(-v_p(x - y))` between integer coordinates.
pub fn padic_distance_matrix(coords: &[i64], p: u64) -> Vec<Vec<f64>> {
    let n = coords.len();
    let mut matrix = vec![vec![0.0; n]; n];
    for i in 0..n {
        for j in (i + 1)..n {
            let d = match valuation(coords[i] as i128 - coords[j] as i128, p) {
                None => 0.0,
                Some(v) => (p as f64).powi(-(v as i32)),
            };
            matrix[i][j] = d;
            matrix[j][i] = d;
        }
    }
    matrix
}
