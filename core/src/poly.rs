//! Piecewise-polynomial interval sets for extraction boundaries.
//!
//! A reference aperture can describe its source and background regions as
//! a flat list of polynomial coefficient lists, alternating lower and upper
//! limits:
//!
//! ```text
//! [[1, 2], [3, 4, 5], [6], [7, 8]]
//!   lower₁   upper₁    lower₂  upper₂
//! ```
//!
//! [`IntervalSet`] pairs them up at construction time, so an odd number of
//! lists is rejected before any extraction starts.

use serde::{Deserialize, Serialize};

use crate::params::ParamsError;

/// Polynomial with the constant term first.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Polynomial {
    coeffs: Vec<f64>,
}

impl Polynomial {
    pub fn new(coeffs: Vec<f64>) -> Result<Self, ParamsError> {
        if coeffs.is_empty() {
            return Err(ParamsError::EmptyCoefficients);
        }
        Ok(Self { coeffs })
    }

    pub fn constant(value: f64) -> Self {
        Self {
            coeffs: vec![value],
        }
    }

    pub fn coeffs(&self) -> &[f64] {
        &self.coeffs
    }

    /// Horner evaluation.
    pub fn eval(&self, x: f64) -> f64 {
        self.coeffs.iter().rev().fold(0.0, |acc, &c| acc * x + c)
    }

    /// Add `offset` to the constant term.
    pub fn shift_constant(&mut self, offset: f64) {
        self.coeffs[0] += offset;
    }
}

/// Lower and upper boundary of one region.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoundaryPair {
    pub lower: Polynomial,
    pub upper: Polynomial,
}

/// One or more regions, each bounded by a pair of polynomials.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IntervalSet {
    pairs: Vec<BoundaryPair>,
}

impl IntervalSet {
    /// Pair a flat alternating lower/upper coefficient list.
    pub fn from_coefficients(lists: &[Vec<f64>]) -> Result<Self, ParamsError> {
        if lists.len() % 2 != 0 {
            return Err(ParamsError::OddCoefficientCount(lists.len()));
        }
        let pairs = lists
            .chunks_exact(2)
            .map(|chunk| {
                Ok(BoundaryPair {
                    lower: Polynomial::new(chunk[0].clone())?,
                    upper: Polynomial::new(chunk[1].clone())?,
                })
            })
            .collect::<Result<Vec<_>, ParamsError>>()?;
        Ok(Self { pairs })
    }

    /// A single region with constant limits.
    pub fn constant(lower: f64, upper: f64) -> Self {
        Self {
            pairs: vec![BoundaryPair {
                lower: Polynomial::constant(lower),
                upper: Polynomial::constant(upper),
            }],
        }
    }

    pub fn pairs(&self) -> &[BoundaryPair] {
        &self.pairs
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Shift every boundary by `offset` (constant terms only).
    pub fn shift(&mut self, offset: f64) {
        for pair in &mut self.pairs {
            pair.lower.shift_constant(offset);
            pair.upper.shift_constant(offset);
        }
    }

    /// `(lower, upper)` of every region at `x`.
    pub fn evaluate(&self, x: f64) -> Vec<(f64, f64)> {
        self.pairs
            .iter()
            .map(|p| (p.lower.eval(x), p.upper.eval(x)))
            .collect()
    }

    /// Coefficients in the flat alternating form they were read from.
    pub fn to_coefficients(&self) -> Vec<Vec<f64>> {
        self.pairs
            .iter()
            .flat_map(|p| [p.lower.coeffs.clone(), p.upper.coeffs.clone()])
            .collect()
    }
}
