//! Windowed 1-D sum: the numerical kernel of the parametric engine.
//!
//! # Geometry
//!
//! The image is viewed with the dispersion direction along columns and the
//! cross-dispersion direction along rows (vertical traces are transposed
//! by the caller).  Row `j` covers the interval `[j - 0.5, j + 0.5]`.  At
//! every column the source and background boundary pairs are evaluated and
//! each row receives a weight equal to its overlap with the regions, so
//! fractional limits give sub-pixel weights.
//!
//! # Background
//!
//! Background pixels are fitted with a weighted least-squares polynomial of
//! order `bkg_order` in the row coordinate.  The fit is evaluated at the
//! source rows and summed with the source weights; for order 0 this is the
//! background mean times the source area.  With `smoothing_length > 1` the
//! image is boxcar-smoothed along the dispersion direction before the fit.

use ndarray::{Array2, ArrayView2, Axis};

use crate::poly::IntervalSet;
use crate::types::IndependentVar;

// ---------------------------------------------------------------------------
// Boxcar
// ---------------------------------------------------------------------------

/// Running mean over `width` elements, centred on each element.
///
/// The window is truncated at either end of the array.  A width of 0 or 1
/// returns the input unchanged.
pub fn bxcar(values: &[f64], width: u32) -> Vec<f64> {
    let n = values.len();
    if width <= 1 || n == 0 {
        return values.to_vec();
    }
    let half = (width / 2) as usize;

    // Prefix sums make each window O(1).
    let mut prefix = Vec::with_capacity(n + 1);
    prefix.push(0.0);
    for &v in values {
        let last = prefix[prefix.len() - 1];
        prefix.push(last + v);
    }

    (0..n)
        .map(|i| {
            let lo = i.saturating_sub(half);
            let hi = (i + half + 1).min(n);
            (prefix[hi] - prefix[lo]) / (hi - lo) as f64
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Pixel weights
// ---------------------------------------------------------------------------

/// Per-row weights for a set of `(lower, upper)` limits over `n_rows` rows.
///
/// Limits are clipped to the image; reversed limits are swapped.  A row
/// covered by several overlapping regions is counted once.
fn row_weights(limits: &[(f64, f64)], n_rows: usize) -> Vec<f64> {
    let mut weights = vec![0.0; n_rows];
    let top = n_rows as f64 - 0.5;
    for &(a, b) in limits {
        if a.is_nan() || b.is_nan() {
            continue;
        }
        let lo = a.min(b).max(-0.5);
        let hi = a.max(b).min(top);
        if hi <= lo {
            continue;
        }
        let first = (lo + 0.5).floor().max(0.0) as usize;
        let last = ((hi + 0.5).ceil() as usize).min(n_rows);
        for (j, w) in weights.iter_mut().enumerate().take(last).skip(first) {
            let pix_lo = j as f64 - 0.5;
            let pix_hi = j as f64 + 0.5;
            let overlap = hi.min(pix_hi) - lo.max(pix_lo);
            if overlap > 0.0 {
                *w += overlap;
            }
        }
    }
    for w in &mut weights {
        *w = w.min(1.0);
    }
    weights
}

// ---------------------------------------------------------------------------
// Background fit
// ---------------------------------------------------------------------------

/// Solve `a · x = b` in place by Gaussian elimination with partial
/// pivoting; `None` when the system is singular.
fn solve(mut a: Array2<f64>, mut b: Vec<f64>) -> Option<Vec<f64>> {
    let n = b.len();
    for col in 0..n {
        let pivot = (col..n).max_by(|&r1, &r2| a[[r1, col]].abs().total_cmp(&a[[r2, col]].abs()))?;
        if a[[pivot, col]].abs() < 1e-12 {
            return None;
        }
        if pivot != col {
            for k in 0..n {
                a.swap([pivot, k], [col, k]);
            }
            b.swap(pivot, col);
        }
        for row in (col + 1)..n {
            let factor = a[[row, col]] / a[[col, col]];
            for k in col..n {
                a[[row, k]] -= factor * a[[col, k]];
            }
            b[row] -= factor * b[col];
        }
    }
    let mut x = vec![0.0; n];
    for row in (0..n).rev() {
        let tail: f64 = ((row + 1)..n).map(|k| a[[row, k]] * x[k]).sum();
        x[row] = (b[row] - tail) / a[[row, row]];
    }
    Some(x)
}

/// Weighted least-squares polynomial through `(t, value, weight)` points.
///
/// The order is reduced until there are enough points and the normal
/// equations are solvable.  Returns coefficients, constant term first.
fn fit_polynomial(points: &[(f64, f64, f64)], order: u32) -> Vec<f64> {
    let max_order = (order as usize).min(points.len().saturating_sub(1));
    for ord in (0..=max_order).rev() {
        let m = ord + 1;
        let mut ata = Array2::<f64>::zeros((m, m));
        let mut atb = vec![0.0; m];
        for &(t, v, w) in points {
            let mut powers = vec![1.0; m];
            for k in 1..m {
                powers[k] = powers[k - 1] * t;
            }
            for r in 0..m {
                atb[r] += w * powers[r] * v;
                for c in 0..m {
                    ata[[r, c]] += w * powers[r] * powers[c];
                }
            }
        }
        if let Some(coeffs) = solve(ata, atb) {
            return coeffs;
        }
    }
    Vec::new()
}

fn eval_poly(coeffs: &[f64], t: f64) -> f64 {
    coeffs.iter().rev().fold(0.0, |acc, &c| acc * t + c)
}

// ---------------------------------------------------------------------------
// extract1d
// ---------------------------------------------------------------------------

/// Sum `image` over the source regions, column by column.
///
/// `disp_range` is the half-open column range to extract; `wavelengths`
/// holds one value per column of that range and is only consulted when the
/// boundary polynomials are functions of wavelength.  Returns
/// `(net, background)`, each `disp_range.1 - disp_range.0` long.
#[allow(clippy::too_many_arguments)]
pub fn extract1d(
    image: ArrayView2<'_, f32>,
    wavelengths: &[f64],
    disp_range: (usize, usize),
    src: &IntervalSet,
    bkg: Option<&IntervalSet>,
    independent_var: IndependentVar,
    smoothing_length: u32,
    bkg_order: u32,
) -> (Vec<f64>, Vec<f64>) {
    let (n_rows, n_cols) = image.dim();
    let (start, stop) = (disp_range.0.min(n_cols), disp_range.1.min(n_cols));
    let bkg = bkg.filter(|b| !b.is_empty());

    // The background fit reads a smoothed copy when requested.
    let smoothed = match bkg {
        Some(_) if smoothing_length > 1 => {
            let mut out = Array2::<f64>::zeros((n_rows, n_cols));
            for (row_in, mut row_out) in image.axis_iter(Axis(0)).zip(out.axis_iter_mut(Axis(0))) {
                let values: Vec<f64> = row_in.iter().map(|&v| v as f64).collect();
                for (o, s) in row_out.iter_mut().zip(bxcar(&values, smoothing_length)) {
                    *o = s;
                }
            }
            Some(out)
        }
        _ => None,
    };

    let n_out = stop.saturating_sub(start);
    let mut net = Vec::with_capacity(n_out);
    let mut background = Vec::with_capacity(n_out);

    for col in start..stop {
        let x = match independent_var {
            IndependentVar::Pixel => col as f64,
            IndependentVar::Wavelength => wavelengths.get(col - start).copied().unwrap_or(f64::NAN),
        };

        let src_w = row_weights(&src.evaluate(x), n_rows);
        let column = image.column(col);
        let gross: f64 = src_w
            .iter()
            .zip(column.iter())
            .filter(|(w, _)| **w > 0.0)
            .fold(0.0, |acc, (w, &v)| acc + w * v as f64);

        let bkg_value = match bkg {
            None => 0.0,
            Some(bkg) => {
                let bkg_w = row_weights(&bkg.evaluate(x), n_rows);
                let value_at = |j: usize| match &smoothed {
                    Some(s) => s[[j, col]],
                    None => column[j] as f64,
                };
                // Fit about the mean row for conditioning.
                let (sw, swt) = bkg_w
                    .iter()
                    .enumerate()
                    .fold((0.0, 0.0), |(sw, swt), (j, &w)| (sw + w, swt + w * j as f64));
                let centre = if sw > 0.0 { swt / sw } else { 0.0 };
                let points: Vec<(f64, f64, f64)> = bkg_w
                    .iter()
                    .enumerate()
                    .filter(|&(_, &w)| w > 0.0)
                    .map(|(j, &w)| (j as f64 - centre, value_at(j), w))
                    .filter(|(_, v, _)| v.is_finite())
                    .collect();
                if points.is_empty() {
                    0.0
                } else {
                    let coeffs = fit_polynomial(&points, bkg_order);
                    src_w
                        .iter()
                        .enumerate()
                        .filter(|&(_, &w)| w > 0.0)
                        .fold(0.0, |acc, (j, &w)| acc + w * eval_poly(&coeffs, j as f64 - centre))
                }
            }
        };

        net.push(gross - bkg_value);
        background.push(bkg_value);
    }

    (net, background)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn boxcar_truncates_at_edges() {
        let out = bxcar(&[1.0, 2.0, 3.0, 4.0, 5.0], 3);
        assert_eq!(out, vec![1.5, 2.0, 3.0, 4.0, 4.5]);
        assert_eq!(bxcar(&[1.0, 7.0], 1), vec![1.0, 7.0]);
    }

    #[test]
    fn flat_field_sums_window() {
        let image = Array2::<f32>::ones((10, 12));
        let src = IntervalSet::constant(2.5, 7.5);
        let (net, bkg) = extract1d(
            image.view(),
            &[0.0; 12],
            (0, 12),
            &src,
            None,
            IndependentVar::Pixel,
            0,
            0,
        );
        assert_eq!(net.len(), 12);
        assert!(net.iter().all(|&v| close(v, 5.0)));
        assert!(bkg.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn fractional_limits_give_partial_weights() {
        // Each pixel holds its row index.
        let image = Array2::from_shape_fn((8, 3), |(j, _)| j as f32);
        let src = IntervalSet::constant(2.0, 4.0);
        let (net, _) = extract1d(
            image.view(),
            &[0.0; 3],
            (0, 3),
            &src,
            None,
            IndependentVar::Pixel,
            0,
            0,
        );
        // 0.5 * 2 + 3 + 0.5 * 4
        assert!(net.iter().all(|&v| close(v, 6.0)));
    }

    #[test]
    fn constant_background_scaled_to_source_area() {
        let image = Array2::from_shape_fn((12, 4), |(j, _)| if (4..=6).contains(&j) { 13.0 } else { 3.0 });
        let src = IntervalSet::constant(3.5, 6.5);
        let bkg = IntervalSet::from_coefficients(&[vec![-0.5], vec![1.5], vec![8.5], vec![11.5]]).unwrap();
        let (net, background) = extract1d(
            image.view(),
            &[0.0; 4],
            (0, 4),
            &src,
            Some(&bkg),
            IndependentVar::Pixel,
            0,
            0,
        );
        assert!(background.iter().all(|&v| close(v, 9.0)));
        assert!(net.iter().all(|&v| close(v, 30.0)));
    }

    #[test]
    fn linear_background_is_removed() {
        let image = Array2::from_shape_fn((12, 2), |(j, _)| 1.0 + 0.5 * j as f32);
        let src = IntervalSet::constant(3.5, 6.5);
        let bkg = IntervalSet::from_coefficients(&[vec![-0.5], vec![2.5], vec![8.5], vec![11.5]]).unwrap();
        let (net, background) = extract1d(
            image.view(),
            &[0.0; 2],
            (0, 2),
            &src,
            Some(&bkg),
            IndependentVar::Pixel,
            0,
            1,
        );
        assert!(background.iter().all(|&v| (v - 10.5).abs() < 1e-6));
        assert!(net.iter().all(|&v| v.abs() < 1e-6));
    }

    #[test]
    fn order_reduced_with_single_background_row() {
        let image = Array2::from_elem((6, 2), 2.0f32);
        let src = IntervalSet::constant(1.5, 3.5);
        let bkg = IntervalSet::constant(4.5, 5.5);
        let (net, background) = extract1d(
            image.view(),
            &[0.0; 2],
            (0, 2),
            &src,
            Some(&bkg),
            IndependentVar::Pixel,
            0,
            3,
        );
        assert!(background.iter().all(|&v| close(v, 4.0)));
        assert!(net.iter().all(|&v| close(v, 0.0)));
    }

    #[test]
    fn wavelength_dependent_limits() {
        let image = Array2::<f32>::ones((10, 3));
        // Upper limit grows one pixel per micron.
        let src = IntervalSet::from_coefficients(&[vec![-0.5], vec![-0.5, 1.0]]).unwrap();
        let (net, _) = extract1d(
            image.view(),
            &[1.0, 2.0, 3.0],
            (0, 3),
            &src,
            None,
            IndependentVar::Wavelength,
            0,
            0,
        );
        assert!(close(net[0], 1.0) && close(net[1], 2.0) && close(net[2], 3.0));
    }

    #[test]
    fn smoothed_background_follows_dispersion_gradient() {
        // Background rises one count per column; the source adds 10.
        let image = Array2::from_shape_fn((10, 6), |(j, i)| {
            if (3..6).contains(&j) {
                i as f32 + 10.0
            } else {
                i as f32
            }
        });
        let src = IntervalSet::constant(2.5, 5.5);
        let bkg = IntervalSet::from_coefficients(&[vec![-0.5], vec![1.5], vec![7.5], vec![9.5]]).unwrap();
        let (net, background) = extract1d(
            image.view(),
            &[],
            (0, 6),
            &src,
            Some(&bkg),
            IndependentVar::Pixel,
            3,
            0,
        );
        // The 3-wide window is truncated to two columns at either end.
        let expected_bkg = [1.5, 3.0, 6.0, 9.0, 12.0, 13.5];
        let expected_net = [28.5, 30.0, 30.0, 30.0, 30.0, 31.5];
        for i in 0..6 {
            assert!(close(background[i], expected_bkg[i]), "column {}: {}", i, background[i]);
            assert!(close(net[i], expected_net[i]), "column {}: {}", i, net[i]);
        }
    }

    #[test]
    fn empty_source_sums_to_positive_zero() {
        let image = Array2::<f32>::ones((4, 3));
        let src = IntervalSet::from_coefficients(&[]).unwrap();
        let (net, _) = extract1d(
            image.view(),
            &[],
            (0, 3),
            &src,
            None,
            IndependentVar::Pixel,
            0,
            0,
        );
        assert!(net.iter().all(|&v| v == 0.0 && v.is_sign_positive()));
    }

    #[test]
    fn partial_dispersion_range() {
        let image = Array2::from_shape_fn((4, 10), |(_, i)| i as f32);
        let src = IntervalSet::constant(-0.5, 0.5);
        let (net, _) = extract1d(
            image.view(),
            &[0.0; 3],
            (4, 7),
            &src,
            None,
            IndependentVar::Pixel,
            0,
            0,
        );
        assert_eq!(net, vec![4.0, 5.0, 6.0]);
    }
}
