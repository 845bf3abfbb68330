//! Modular model types shared by the fitter, the lifter and the synthesizer.

use modular_core::{mod_mul, mod_pow, mod_reduce};
use serde::Serialize;
use std::fmt;

use crate::observation::InputRef;

/// A law over `Z/mZ`. Coefficients are always reduced into `[0, m)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ModularModel {
    /// `c_d x^d + ... + c_1 x + c_0`, leading coefficient first.
    Polynomial { coefficients: Vec<u64> },
    /// `coefficient * x^exponent + offset`.
    SparseMonomial {
        coefficient: u64,
        exponent: u32,
        offset: u64,
    },
    /// `b_0 + b_1 x_1 + ... + b_n x_n`, intercept first.
    MultivariateLinear { coefficients: Vec<u64> },
}

/// Shape a lifter locks at depth 0 and reuses at every later depth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ModelShape {
    Polynomial { degree: usize },
    MultivariateLinear,
}

impl ModularModel {
    /// Polynomial degree; the exponent for a monomial; 1 for multivariate linear.
    pub fn degree(&self) -> usize {
        match self {
            ModularModel::Polynomial { coefficients } => coefficients.len().saturating_sub(1),
            ModularModel::SparseMonomial { exponent, .. } => *exponent as usize,
            ModularModel::MultivariateLinear { .. } => 1,
        }
    }

    /// Shape for degree locking, `None` for sparse monomials.
    pub fn shape(&self) -> Option<ModelShape> {
        match self {
            ModularModel::Polynomial { .. } => Some(ModelShape::Polynomial {
                degree: self.degree(),
            }),
            ModularModel::MultivariateLinear { .. } => Some(ModelShape::MultivariateLinear),
            ModularModel::SparseMonomial { .. } => None,
        }
    }

    /// Coefficient vector of a dense model (polynomial or multivariate).
    pub fn coefficients(&self) -> Option<&[u64]> {
        match self {
            ModularModel::Polynomial { coefficients }
            | ModularModel::MultivariateLinear { coefficients } => Some(coefficients),
            ModularModel::SparseMonomial { .. } => None,
        }
    }

    /// Evaluate mod `m`. `None` if the input shape does not fit the model.
    pub fn evaluate_mod(&self, input: InputRef<'_>, m: u64) -> Option<u64> {
        match (self, input) {
            (ModularModel::Polynomial { coefficients }, InputRef::Scalar(x)) => {
                let x = mod_reduce(x as i128, m);
                Some(
                    coefficients
                        .iter()
                        .fold(0u64, |acc, &c| (mod_mul(acc, x, m) + c % m) % m),
                )
            }
            (
                ModularModel::SparseMonomial {
                    coefficient,
                    exponent,
                    offset,
                },
                InputRef::Scalar(x),
            ) => {
                let x = mod_reduce(x as i128, m);
                let term = mod_mul(*coefficient % m, mod_pow(x, *exponent as u64, m), m);
                Some((term + offset % m) % m)
            }
            (ModularModel::MultivariateLinear { coefficients }, InputRef::Vector(xs)) => {
                if coefficients.len() != xs.len() + 1 {
                    return None;
                }
                let mut acc = coefficients[0] % m;
                for (&b, &x) in coefficients[1..].iter().zip(xs) {
                    acc = (acc + mod_mul(b % m, mod_reduce(x as i128, m), m)) % m;
                }
                Some(acc)
            }
            _ => None,
        }
    }

    /// Evaluate over the integers, treating coefficients as non-negative integers.
    ///
    /// `None` on shape mismatch or `i128` overflow.
    pub fn evaluate_exact(&self, input: InputRef<'_>) -> Option<i128> {
        match (self, input) {
            (ModularModel::Polynomial { coefficients }, InputRef::Scalar(x)) => {
                let x = x as i128;
                coefficients.iter().try_fold(0i128, |acc, &c| {
                    acc.checked_mul(x)?.checked_add(c as i128)
                })
            }
            (
                ModularModel::SparseMonomial {
                    coefficient,
                    exponent,
                    offset,
                },
                InputRef::Scalar(x),
            ) => (x as i128)
                .checked_pow(*exponent)?
                .checked_mul(*coefficient as i128)?
                .checked_add(*offset as i128),
            (ModularModel::MultivariateLinear { coefficients }, InputRef::Vector(xs)) => {
                if coefficients.len() != xs.len() + 1 {
                    return None;
                }
                coefficients[1..]
                    .iter()
                    .zip(xs)
                    .try_fold(coefficients[0] as i128, |acc, (&b, &x)| {
                        acc.checked_add((b as i128).checked_mul(x as i128)?)
                    })
            }
            _ => None,
        }
    }

    /// Formal derivative at `x`, reduced mod `p`.
    fn derivative_mod(&self, x: i64, p: u64) -> u64 {
        match self {
            ModularModel::Polynomial { coefficients } => {
                let d = coefficients.len().saturating_sub(1);
                let x = mod_reduce(x as i128, p);
                // leading-first: coefficient i has power d - i
                coefficients[..d].iter().enumerate().fold(0u64, |acc, (i, &c)| {
                    let power = (d - i) as u64;
                    let term = mod_mul(
                        mod_mul(c % p, power % p, p),
                        mod_pow(x, power - 1, p),
                        p,
                    );
                    (acc + term) % p
                })
            }
            ModularModel::SparseMonomial {
                coefficient,
                exponent,
                ..
            } => {
                if *exponent == 0 {
                    return 0;
                }
                let x = mod_reduce(x as i128, p);
                mod_mul(
                    mod_mul(*coefficient % p, *exponent as u64 % p, p),
                    mod_pow(x, *exponent as u64 - 1, p),
                    p,
                )
            }
            ModularModel::MultivariateLinear { .. } => 0,
        }
    }

    /// True when the formal derivative vanishes mod `p` at every inlier.
    ///
    /// For multivariate linear models the gradient is the weight vector, so
    /// the model is singular when every feature weight is 0 mod `p`.
    pub fn is_singular<'a, I>(&self, inlier_inputs: I, p: u64) -> bool
    where
        I: IntoIterator<Item = InputRef<'a>>,
    {
        match self {
            ModularModel::MultivariateLinear { coefficients } => {
                coefficients[1..].iter().all(|&b| b % p == 0)
            }
            _ => inlier_inputs.into_iter().all(|input| match input {
                InputRef::Scalar(x) => self.derivative_mod(x, p) == 0,
                InputRef::Vector(_) => true,
            }),
        }
    }

    /// Raise a polynomial to `degree` by zero-padding leading coefficients.
    pub fn padded_to(&self, degree: usize) -> Option<ModularModel> {
        match self {
            ModularModel::Polynomial { coefficients } if coefficients.len() <= degree + 1 => {
                let mut padded = vec![0u64; degree + 1 - coefficients.len()];
                padded.extend_from_slice(coefficients);
                Some(ModularModel::Polynomial {
                    coefficients: padded,
                })
            }
            _ => None,
        }
    }
}

impl fmt::Display for ModularModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModularModel::Polynomial { coefficients } => {
                let d = coefficients.len().saturating_sub(1);
                let terms: Vec<String> = coefficients
                    .iter()
                    .enumerate()
                    .map(|(i, c)| match d - i {
                        0 => format!("{}", c),
                        1 => format!("{}x", c),
                        k => format!("{}x^{}", c, k),
                    })
                    .collect();
                write!(f, "{}", terms.join(" + "))
            }
            ModularModel::SparseMonomial {
                coefficient,
                exponent,
                offset,
            } => write!(f, "{}x^{} + {}", coefficient, exponent, offset),
            ModularModel::MultivariateLinear { coefficients } => {
                write!(f, "{}", coefficients[0])?;
                for (i, b) in coefficients[1..].iter().enumerate() {
                    write!(f, " + {}x{}", b, i + 1)?;
                }
                Ok(())
            }
        }
    }
}

/// A model together with the observations that support it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FittedModel {
    pub model: ModularModel,
    pub modulus: u64,
    /// Indices into the observation set the model was fitted on.
    pub inliers: Vec<usize>,
    /// `inliers.len() / total`.
    pub consensus: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_polynomial_evaluation() {
        let model = ModularModel::Polynomial {
            coefficients: vec![2, 0, 1],
        };
        // 2x^2 + 1 at x = 3 -> 19 -> 19 mod 7 = 5
        assert_eq!(model.evaluate_mod(InputRef::Scalar(3), 7), Some(5));
        assert_eq!(model.evaluate_mod(InputRef::Scalar(-3), 7), Some(5));
        assert_eq!(model.evaluate_exact(InputRef::Scalar(3)), Some(19));
        assert_eq!(model.degree(), 2);
        assert_eq!(model.to_string(), "2x^2 + 0x + 1");
    }

    #[test]
    fn test_multivariate_evaluation() {
        let model = ModularModel::MultivariateLinear {
            coefficients: vec![1, 3, 4],
        };
        assert_eq!(model.evaluate_mod(InputRef::Vector(&[2, 5]), 11), Some(5));
        assert_eq!(model.evaluate_exact(InputRef::Vector(&[2, 5])), Some(27));
        assert_eq!(model.evaluate_mod(InputRef::Scalar(2), 11), None);
    }

    #[test]
    fn test_sparse_evaluation() {
        let model = ModularModel::SparseMonomial {
            coefficient: 3,
            exponent: 5,
            offset: 2,
        };
        // 3 * 2^5 + 2 = 98 -> 98 mod 13 = 7
        assert_eq!(model.evaluate_mod(InputRef::Scalar(2), 13), Some(7));
        assert_eq!(model.evaluate_exact(InputRef::Scalar(2)), Some(98));
    }

    #[test]
    fn test_singularity_detection() {
        let flat = ModularModel::Polynomial {
            coefficients: vec![5, 2],
        };
        assert!(flat.is_singular([InputRef::Scalar(1), InputRef::Scalar(4)], 5));
        let sloped = ModularModel::Polynomial {
            coefficients: vec![3, 2],
        };
        assert!(!sloped.is_singular([InputRef::Scalar(1)], 5));

        // x^2 over F_2: derivative 2x == 0 everywhere
        let square = ModularModel::Polynomial {
            coefficients: vec![1, 0, 0],
        };
        assert!(square.is_singular((0..6).map(InputRef::Scalar), 2));
        // x^2 + x over F_3: derivative 2x + 1 vanishes only at x = 1
        let mixed = ModularModel::Polynomial {
            coefficients: vec![1, 1, 0],
        };
        assert!(mixed.is_singular([InputRef::Scalar(1), InputRef::Scalar(4)], 3));
        assert!(!mixed.is_singular([InputRef::Scalar(1), InputRef::Scalar(2)], 3));
    }

    #[test]
    fn test_padding() {
        let constant = ModularModel::Polynomial {
            coefficients: vec![4],
        };
        assert_eq!(
            constant.padded_to(1),
            Some(ModularModel::Polynomial {
                coefficients: vec![0, 4]
            })
        );
        let quad = ModularModel::Polynomial {
            coefficients: vec![1, 2, 3],
        };
        assert_eq!(quad.padded_to(1), None);
    }
}
