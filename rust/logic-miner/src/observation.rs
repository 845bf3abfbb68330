//! Observation sets: ordered `(input, output)` pairs.
//!
//! A set is never mutated after construction. Stages that re-filter or
//! rescale the data (peeling, lifting, reduction mod p) build a new set.

use serde::Serialize;

use crate::error::{MinerError, MinerResult};

/// Inputs of an observation set, either all scalars or all vectors of one length.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Inputs {
    Scalar(Vec<i64>),
    Vector(Vec<Vec<i64>>),
}

/// Borrowed view of a single input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputRef<'a> {
    Scalar(i64),
    Vector(&'a [i64]),
}

/// An immutable, validated sequence of observations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ObservationSet {
    inputs: Inputs,
    outputs: Vec<i64>,
}

impl ObservationSet {
    /// Build a scalar observation set.
    pub fn from_scalars(inputs: Vec<i64>, outputs: Vec<i64>) -> MinerResult<Self> {
        if inputs.len() != outputs.len() {
            return Err(MinerError::InvalidInput(format!(
                "{} inputs but {} outputs",
                inputs.len(),
                outputs.len()
            )));
        }
        if inputs.is_empty() {
            return Err(MinerError::InvalidInput("observation set is empty".to_string()));
        }
        Ok(Self {
            inputs: Inputs::Scalar(inputs),
            outputs,
        })
    }

    /// Build a vector observation set; every row must have the same length.
    pub fn from_vectors(inputs: Vec<Vec<i64>>, outputs: Vec<i64>) -> MinerResult<Self> {
        if inputs.len() != outputs.len() {
            return Err(MinerError::InvalidInput(format!(
                "{} input vectors but {} outputs",
                inputs.len(),
                outputs.len()
            )));
        }
        let dim = match inputs.first() {
            Some(row) => row.len(),
            None => {
                return Err(MinerError::InvalidInput("observation set is empty".to_string()))
            }
        };
        if dim == 0 {
            return Err(MinerError::InvalidInput("input vectors are empty".to_string()));
        }
        if let Some(bad) = inputs.iter().position(|row| row.len() != dim) {
            return Err(MinerError::InvalidInput(format!(
                "row {} has length {}, expected {}",
                bad,
                inputs[bad].len(),
                dim
            )));
        }
        Ok(Self {
            inputs: Inputs::Vector(inputs),
            outputs,
        })
    }

    pub fn len(&self) -> usize {
        self.outputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outputs.is_empty()
    }

    pub fn is_multivariate(&self) -> bool {
        matches!(self.inputs, Inputs::Vector(_))
    }

    /// Number of features per input (1 for scalar data).
    pub fn dimension(&self) -> usize {
        match &self.inputs {
            Inputs::Scalar(_) => 1,
            Inputs::Vector(rows) => rows.first().map_or(0, |r| r.len()),
        }
    }

    pub fn inputs(&self) -> &Inputs {
        &self.inputs
    }

    /// Scalar inputs, or `None` for vector data.
    pub fn scalar_inputs(&self) -> Option<&[i64]> {
        match &self.inputs {
            Inputs::Scalar(xs) => Some(xs),
            Inputs::Vector(_) => None,
        }
    }

    pub fn input(&self, i: usize) -> InputRef<'_> {
        match &self.inputs {
            Inputs::Scalar(xs) => InputRef::Scalar(xs[i]),
            Inputs::Vector(rows) => InputRef::Vector(&rows[i]),
        }
    }

    pub fn outputs(&self) -> &[i64] {
        &self.outputs
    }

    pub fn output(&self, i: usize) -> i64 {
        self.outputs[i]
    }

    /// Observations at `indices` (in that order), paired with new outputs.
    ///
    /// Fails unless there is exactly one output per index.
    pub fn select_with_outputs(&self, indices: &[usize], outputs: Vec<i64>) -> MinerResult<Self> {
        if indices.len() != outputs.len() {
            return Err(MinerError::InvalidInput(format!(
                "{} outputs for {} selected observations",
                outputs.len(),
                indices.len()
            )));
        }
        Ok(self.pick(indices, outputs))
    }

    /// Observations at `indices`, keeping their outputs.
    pub fn select(&self, indices: &[usize]) -> Self {
        let outputs = indices.iter().map(|&i| self.outputs[i]).collect();
        self.pick(indices, outputs)
    }

    fn pick(&self, indices: &[usize], outputs: Vec<i64>) -> Self {
        let inputs = match &self.inputs {
            Inputs::Scalar(xs) => Inputs::Scalar(indices.iter().map(|&i| xs[i]).collect()),
            Inputs::Vector(rows) => {
                Inputs::Vector(indices.iter().map(|&i| rows[i].clone()).collect())
            }
        };
        Self { inputs, outputs }
    }

    /// Same inputs with every output reduced into `[0, m)`.
    pub fn reduced(&self, m: u64) -> Self {
        Self {
            inputs: self.inputs.clone(),
            outputs: self
                .outputs
                .iter()
                .map(|&y| modular_core::mod_reduce(y as i128, m) as i64)
                .collect(),
        }
    }
}
