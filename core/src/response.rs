//! Relative response curve used to convert net count rate to flux.
//!
//! `flux = net / response(wavelength)`.  Extrapolated or non-positive
//! interpolated values are replaced by 1 so that flux stays finite.

use serde::{Deserialize, Serialize};

use crate::diagnostics::{Diagnostic, Diagnostics};

/// 100 µm expressed in meters; smaller table maxima are taken to be meters.
const MICRONS_100: f64 = 1.0e-4;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ResponseError {
    #[error("response table '{0}' column contains NaNs")]
    NanInTable(&'static str),

    #[error("response table columns differ in length ({wavelength} wavelengths, {response} responses)")]
    LengthMismatch { wavelength: usize, response: usize },
}

/// Tabulated response, wavelengths increasing.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponseCurve {
    pub wavelength: Vec<f64>,
    pub response: Vec<f64>,
}

impl ResponseCurve {
    pub fn new(wavelength: Vec<f64>, response: Vec<f64>) -> Result<Self, ResponseError> {
        if wavelength.len() != response.len() {
            return Err(ResponseError::LengthMismatch {
                wavelength: wavelength.len(),
                response: response.len(),
            });
        }
        Ok(Self {
            wavelength,
            response,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.wavelength.is_empty()
    }

    /// Response at each of `wavelengths` (micrometres).
    pub fn interpolate(&self, wavelengths: &[f64], diags: &mut Diagnostics) -> Result<Vec<f64>, ResponseError> {
        if self.wavelength.len() != self.response.len() {
            return Err(ResponseError::LengthMismatch {
                wavelength: self.wavelength.len(),
                response: self.response.len(),
            });
        }
        if self.wavelength.iter().any(|w| w.is_nan()) {
            return Err(ResponseError::NanInTable("wavelength"));
        }
        if self.response.iter().any(|r| r.is_nan()) {
            return Err(ResponseError::NanInTable("response"));
        }

        let max = self.wavelength.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let scale = if max > 0.0 && max < MICRONS_100 {
            diags.push(Diagnostic::ResponseWavelengthsConverted);
            1.0e6
        } else {
            1.0
        };
        let table: Vec<f64> = self.wavelength.iter().map(|w| w * scale).collect();

        let mut extrapolated = 0usize;
        let mut non_positive = 0usize;
        let factors = wavelengths
            .iter()
            .map(|&wl| match interp(&table, &self.response, wl) {
                None => {
                    extrapolated += 1;
                    1.0
                }
                Some(r) if r <= 0.0 => {
                    non_positive += 1;
                    1.0
                }
                Some(r) => r,
            })
            .collect();

        if extrapolated > 0 {
            diags.push(Diagnostic::ResponseExtrapolated {
                count: extrapolated,
            });
        }
        if non_positive > 0 {
            diags.push(Diagnostic::ResponseNonPositive {
                count: non_positive,
            });
        }
        Ok(factors)
    }
}

/// Piecewise-linear interpolation; `None` outside the table (or at a NaN).
fn interp(xs: &[f64], ys: &[f64], x: f64) -> Option<f64> {
    let (&first, &last) = (xs.first()?, xs.last()?);
    if x.is_nan() || x < first || x > last {
        return None;
    }
    // First index whose abscissa is >= x.
    let hi = xs.partition_point(|&v| v < x);
    if hi == 0 {
        return Some(ys[0]);
    }
    let lo = hi - 1;
    let (x0, x1) = (xs[lo], xs[hi]);
    if x1 == x0 {
        return Some(ys[hi]);
    }
    let t = (x - x0) / (x1 - x0);
    Some(ys[lo] + t * (ys[hi] - ys[lo]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn linear_interpolation() {
        let curve = ResponseCurve::new(vec![1.0, 2.0, 3.0], vec![2.0, 4.0, 8.0]).unwrap();
        let mut diags = Diagnostics::new();
        let r = curve.interpolate(&[1.0, 1.5, 2.5, 3.0], &mut diags).unwrap();
        assert_eq!(r, vec![2.0, 3.0, 6.0, 8.0]);
        assert!(diags.is_empty());
    }

    #[test]
    fn extrapolated_and_non_positive_become_one() {
        let curve = ResponseCurve::new(vec![1.0, 2.0, 3.0], vec![-1.0, 0.0, 5.0]).unwrap();
        let mut diags = Diagnostics::new();
        let r = curve
            .interpolate(&[0.5, 1.5, 2.5, 4.0, f64::NAN], &mut diags)
            .unwrap();
        assert_eq!(r, vec![1.0, 1.0, 2.5, 1.0, 1.0]);
        assert!(diags.any(|d| matches!(d, Diagnostic::ResponseExtrapolated { count: 3 })));
        assert!(diags.any(|d| matches!(d, Diagnostic::ResponseNonPositive { count: 1 })));
    }

    #[test]
    fn meters_converted_to_microns() {
        let curve = ResponseCurve::new(vec![1.0e-6, 3.0e-6], vec![1.0, 3.0]).unwrap();
        let mut diags = Diagnostics::new();
        let r = curve.interpolate(&[2.0], &mut diags).unwrap();
        assert!((r[0] - 2.0).abs() < 1e-9);
        assert!(diags.any(|d| matches!(d, Diagnostic::ResponseWavelengthsConverted)));
    }

    #[test]
    fn nan_table_rejected() {
        let curve = ResponseCurve::new(vec![1.0, f64::NAN], vec![1.0, 2.0]).unwrap();
        let mut diags = Diagnostics::new();
        assert_eq!(
            curve.interpolate(&[1.0], &mut diags),
            Err(ResponseError::NanInTable("wavelength"))
        );
        assert!(ResponseCurve::new(vec![1.0], vec![]).is_err());
    }
}
