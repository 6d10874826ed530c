//! Cleanup shared by both extraction engines.
//!
//! Bad science pixels are zeroed before extraction; after extraction, NaN
//! wavelengths are flagged and trimmed from the ends of the output rows,
//! and the per-row sky samples are reduced to one position for the trace.

use ndarray::{Array2, Zip};

use crate::diagnostics::{Diagnostic, Diagnostics};
use crate::types::{DO_NOT_USE, SKY_SENTINEL};

/// Whether a per-pixel wavelength array carries real values.
///
/// An all-zero array is the unpopulated default.
pub fn has_wavelengths(wl: &Array2<f64>) -> bool {
    !wl.is_empty() && wl.iter().any(|&v| v != 0.0)
}

/// Zero NaN pixels and pixels flagged [`DO_NOT_USE`].
///
/// A `dq` plane of a different shape is ignored.
pub fn replace_bad_values(data: &Array2<f32>, dq: Option<&Array2<u32>>) -> Array2<f32> {
    let mut out = data.mapv(|v| if v.is_nan() { 0.0 } else { v });
    if let Some(dq) = dq.filter(|dq| dq.dim() == data.dim()) {
        Zip::from(&mut out).and(dq).for_each(|v, &flag| {
            if flag & DO_NOT_USE != 0 {
                *v = 0.0;
            }
        });
    }
    out
}

/// Output rows of one trace before flux calibration.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SpectrumRows {
    pub wavelength: Vec<f64>,
    pub net: Vec<f64>,
    pub background: Vec<f64>,
    pub dq: Vec<u32>,
}

impl SpectrumRows {
    /// Rows with a clean `dq` column.
    pub fn new(wavelength: Vec<f64>, net: Vec<f64>, background: Vec<f64>) -> Self {
        let dq = vec![0; net.len()];
        Self {
            wavelength,
            net,
            background,
            dq,
        }
    }

    pub fn len(&self) -> usize {
        self.net.len()
    }

    pub fn is_empty(&self) -> bool {
        self.net.is_empty()
    }
}

/// Flag NaN wavelengths and trim them from both ends.
///
/// Interior NaNs stay in place with [`DO_NOT_USE`] set.  When every
/// wavelength is NaN nothing is trimmed and every row is flagged.
pub fn nans_at_endpoints(mut rows: SpectrumRows, diags: &mut Diagnostics) -> SpectrumRows {
    for (wl, dq) in rows.wavelength.iter().zip(rows.dq.iter_mut()) {
        if wl.is_nan() {
            *dq |= DO_NOT_USE;
        }
    }

    let first = rows.wavelength.iter().position(|w| !w.is_nan());
    let last = rows.wavelength.iter().rposition(|w| !w.is_nan());
    let (Some(first), Some(last)) = (first, last) else {
        diags.push(Diagnostic::AllWavelengthsNan);
        return rows;
    };

    let n = rows.wavelength.len();
    let trimmed = first + (n - last - 1);
    if trimmed > 0 {
        diags.push(Diagnostic::OutputTrimmed { count: trimmed });
        let keep = first..last + 1;
        rows.wavelength = rows.wavelength[keep.clone()].to_vec();
        rows.net = rows.net[keep.clone()].to_vec();
        rows.background = rows.background[keep.clone()].to_vec();
        rows.dq = rows.dq[keep].to_vec();
    }
    rows
}

/// Reduce per-row `(ra, dec)` samples to one sky position.
///
/// With `prefer_middle`, the middle sample is used when finite.  Otherwise
/// (or when it is NaN) the midrange of the finite samples is used, and
/// [`SKY_SENTINEL`] when there are none.
pub fn summarize_sky(samples: &[(f64, f64)], prefer_middle: bool, diags: &mut Diagnostics) -> (f64, f64) {
    let ra: Vec<f64> = samples.iter().map(|s| s.0).collect();
    let dec: Vec<f64> = samples.iter().map(|s| s.1).collect();
    let middle = samples.len() / 2;

    if prefer_middle && !samples.is_empty() && (ra[middle].is_nan() || dec[middle].is_nan()) {
        diags.push(Diagnostic::SkyMidpointNan);
    }

    let pick = |values: &[f64], missing: Diagnostic, diags: &mut Diagnostics| -> f64 {
        if prefer_middle {
            if let Some(&v) = values.get(middle).filter(|v| !v.is_nan()) {
                return v;
            }
        }
        let finite = values.iter().copied().filter(|v| !v.is_nan());
        let (min, max) = finite.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
            (lo.min(v), hi.max(v))
        });
        if min > max {
            diags.push(missing);
            SKY_SENTINEL
        } else {
            (min + max) / 2.0
        }
    };

    let ra = pick(&ra, Diagnostic::RightAscensionUndefined, diags);
    let dec = pick(&dec, Diagnostic::DeclinationUndefined, diags);
    (ra, dec)
}
