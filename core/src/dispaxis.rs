//! Dispersion-axis resolution.
//!
//! The reference may name the dispersion axis explicitly; that value always
//! wins.  Otherwise the axis is inferred by comparing the wavelength
//! increment from one pixel to the next along rows and along columns,
//! using the per-pixel wavelength array when it is populated and the
//! coordinate transform when it is not.

use log::debug;
use ndarray::Array2;

use crate::diagnostics::{Diagnostic, Diagnostics};
use crate::postprocess::has_wavelengths;
use crate::types::DispersionAxis;
use crate::wcs::OrderedWcs;

/// Mean finite wavelength increment along x and along y.
///
/// Differences are taken between neighbouring pixels, leaving out the last
/// row/column, matching the interior sampling used for the WCS fallback.
/// Returns NaN for an axis with no finite differences.
pub(crate) fn mean_increments(wl: &Array2<f64>) -> (f64, f64) {
    let (ny, nx) = wl.dim();

    let mut sum_x = 0.0;
    let mut n_x = 0usize;
    for y in 0..ny {
        for x in 0..nx.saturating_sub(2) {
            let d = wl[[y, x + 1]] - wl[[y, x]];
            if d.is_finite() {
                sum_x += d;
                n_x += 1;
            }
        }
    }

    let mut sum_y = 0.0;
    let mut n_y = 0usize;
    for y in 0..ny.saturating_sub(2) {
        for x in 0..nx {
            let d = wl[[y + 1, x]] - wl[[y, x]];
            if d.is_finite() {
                sum_y += d;
                n_y += 1;
            }
        }
    }

    let mean = |s: f64, n: usize| if n == 0 { f64::NAN } else { s / n as f64 };
    (mean(sum_x, n_x), mean(sum_y, n_y))
}

fn compare(dwlx: f64, dwly: f64) -> Option<DispersionAxis> {
    let (dwlx, dwly) = (dwlx.abs(), dwly.abs());
    if dwlx > dwly {
        Some(DispersionAxis::Horizontal)
    } else if dwlx < dwly {
        Some(DispersionAxis::Vertical)
    } else {
        None
    }
}

fn from_wcs(wcs: &OrderedWcs<'_>, shape: (usize, usize), diags: &mut Diagnostics) -> (f64, f64) {
    let (ny, nx) = shape;
    let (x_cent, y_cent) = match wcs.bounding_box() {
        Some(bb) => (
            ((bb.x.0 + bb.x.1) / 2.0).floor(),
            ((bb.y.0 + bb.y.1) / 2.0).floor(),
        ),
        None => ((nx / 2) as f64, (ny / 2) as f64),
    };

    let wl_00 = wcs.eval(x_cent, y_cent).wavelength;
    let wl_01 = wcs.eval(x_cent, y_cent + 1.0).wavelength;
    let wl_10 = wcs.eval(x_cent + 1.0, y_cent).wavelength;
    let dwlx = wl_10 - wl_00;
    let dwly = wl_01 - wl_00;
    if !dwlx.is_nan() && !dwly.is_nan() {
        return (dwlx, dwly);
    }

    diags.push(Diagnostic::WcsWavelengthNan);
    let grid = Array2::from_shape_fn((ny, nx), |(y, x)| wcs.eval(x as f64, y as f64).wavelength);
    mean_increments(&grid)
}

/// Resolve the dispersion axis.
///
/// `current` is the value from the reference, if any; it is returned as is.
/// `shape` is `(ny, nx)` of the science plane.
pub fn resolve_axis(
    wcs: Option<&OrderedWcs<'_>>,
    wavelength: Option<&Array2<f64>>,
    shape: (usize, usize),
    current: Option<DispersionAxis>,
    diags: &mut Diagnostics,
) -> Option<DispersionAxis> {
    if current.is_some() {
        return current;
    }

    let (dwlx, dwly) = match (wavelength.filter(|wl| has_wavelengths(wl)), wcs) {
        (Some(wl), _) => mean_increments(wl),
        (None, Some(wcs)) => from_wcs(wcs, shape, diags),
        (None, None) => {
            diags.push(Diagnostic::WcsMissing);
            (f64::NAN, f64::NAN)
        }
    };
    debug!("find_dispaxis: dwlx = {} dwly = {}", dwlx, dwly);

    let axis = if dwlx.is_nan() || dwly.is_nan() {
        None
    } else {
        compare(dwlx, dwly)
    };
    match axis {
        Some(axis) => diags.push(Diagnostic::DispersionAxisInferred { axis }),
        None => diags.push(Diagnostic::DispersionAxisUndetermined),
    }
    axis
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::WorldCoord;
    use crate::wcs::{AffineWcs, BoundingBox, SpectralWcs};

    #[test]
    fn reference_value_wins() {
        let mut diags = Diagnostics::new();
        let wl = Array2::from_shape_fn((5, 10), |(_, x)| 1.0 + x as f64);
        let axis = resolve_axis(
            None,
            Some(&wl),
            (5, 10),
            Some(DispersionAxis::Vertical),
            &mut diags,
        );
        assert_eq!(axis, Some(DispersionAxis::Vertical));
        assert!(diags.is_empty());
    }

    #[test]
    fn from_wavelength_array() {
        let mut diags = Diagnostics::new();
        let wl = Array2::from_shape_fn((10, 6), |(y, x)| 5.0 + 0.1 * y as f64 + 0.001 * x as f64);
        let axis = resolve_axis(None, Some(&wl), (10, 6), None, &mut diags);
        assert_eq!(axis, Some(DispersionAxis::Vertical));
    }

    #[test]
    fn all_zero_wavelengths_fall_back_to_wcs() {
        let mut diags = Diagnostics::new();
        let wl = Array2::zeros((5, 10));
        let wcs = AffineWcs::new([0.0; 3], [0.0; 3], [1.0, 0.01, 0.0]);
        let ordered = OrderedWcs::new(&wcs, 1).unwrap();
        let axis = resolve_axis(Some(&ordered), Some(&wl), (5, 10), None, &mut diags);
        assert_eq!(axis, Some(DispersionAxis::Horizontal));
    }

    /// Linear in y, undefined at one pixel.
    struct HoleWcs {
        hole: (f64, f64),
    }

    impl SpectralWcs for HoleWcs {
        fn forward(&self, x: f64, y: f64, _order: i32) -> WorldCoord {
            if (x, y) == self.hole {
                return WorldCoord::NAN;
            }
            WorldCoord {
                ra: 0.0,
                dec: 0.0,
                wavelength: 1.0 + 0.02 * y,
            }
        }

        fn bounding_box(&self) -> Option<BoundingBox> {
            Some(BoundingBox::new((0.0, 11.0), (0.0, 4.0)))
        }
    }

    #[test]
    fn nan_at_centre_uses_full_grid() {
        let mut diags = Diagnostics::new();
        let wcs = HoleWcs { hole: (5.0, 2.0) };
        let ordered = OrderedWcs::new(&wcs, 1).unwrap();
        let axis = resolve_axis(Some(&ordered), None, (5, 12), None, &mut diags);
        assert!(diags.any(|d| matches!(d, Diagnostic::WcsWavelengthNan)));
        assert_eq!(axis, Some(DispersionAxis::Vertical));
    }

    #[test]
    fn tie_is_undetermined() {
        let mut diags = Diagnostics::new();
        let wl = Array2::from_shape_fn((6, 6), |(y, x)| 1.0 + (x + y) as f64);
        let axis = resolve_axis(None, Some(&wl), (6, 6), None, &mut diags);
        assert_eq!(axis, None);
        assert!(diags.any(|d| matches!(d, Diagnostic::DispersionAxisUndetermined)));
    }
}
