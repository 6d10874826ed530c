//! Trace location from the coordinate transform.
//!
//! Walk a transect across the whole cross-dispersion extent at the middle
//! of the transform's valid domain (in the dispersion direction), evaluate
//! the sky position of every transect pixel, and pick the pixel closest to
//! the target.  That index is the observed cross-dispersion location of the
//! trace; the difference from the reference's nominal location is the
//! nod/dither offset.

use log::debug;

use crate::diagnostics::{Diagnostic, Diagnostics};
use crate::types::{DispersionAxis, Target};
use crate::wcs::OrderedWcs;

/// Larger than any pixel distance between the target and the image.
pub const HUGE_DIST: f64 = 1.0e20;

/// Where the transform places the target.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TraceLocation {
    /// Dispersion-direction pixel of the transect.
    pub middle: usize,
    /// Wavelength at the located pixel.
    pub middle_wavelength: f64,
    /// Cross-dispersion index closest to the target.
    pub location: usize,
}

/// Locate the trace; `None` when the transform cannot place the target.
pub fn locate(
    wcs: &OrderedWcs<'_>,
    target: Option<&Target>,
    axis: DispersionAxis,
    diags: &mut Diagnostics,
) -> Option<TraceLocation> {
    let Some(bb) = wcs.bounding_box() else {
        diags.push(Diagnostic::BoundingBoxMissing);
        return None;
    };
    let Some(target) = target else {
        diags.push(Diagnostic::TargetMissing);
        return None;
    };

    // Transect runs from the first pixel of the cutout to the upper domain
    // limit in the cross-dispersion direction.
    let (disp, cross) = match axis {
        DispersionAxis::Horizontal => (bb.x, bb.y),
        DispersionAxis::Vertical => (bb.y, bb.x),
    };
    let extent = (disp.1 - disp.0 + 1.0).trunc() as i64;
    let middle = (disp.0 + (extent / 2) as f64).trunc().max(0.0) as usize;
    let width = (cross.1 + 1.0).round_ties_even().max(0.0) as usize;
    if width == 0 {
        return None;
    }

    let samples: Vec<_> = (0..width)
        .map(|i| match axis {
            DispersionAxis::Horizontal => wcs.eval(middle as f64, i as f64),
            DispersionAxis::Vertical => wcs.eval(i as f64, middle as f64),
        })
        .collect();

    let dist: Vec<f64> = samples
        .iter()
        .map(|w| {
            // Rough handling of targets near a pole.
            let dec_m = (w.dec + target.dec) / 2.0;
            let dra = (w.ra - target.ra) * dec_m.to_radians().cos();
            let ddec = w.dec - target.dec;
            if dra.is_nan() || ddec.is_nan() {
                HUGE_DIST
            } else {
                (dra * dra + ddec * ddec).sqrt()
            }
        })
        .collect();

    let location = dist
        .iter()
        .enumerate()
        .min_by(|a, b| a.1.total_cmp(b.1))
        .map(|(i, _)| i)?;

    if location == 0 || location >= width - 1 {
        diags.push(Diagnostic::TraceAtEdge { index: location });
        return None;
    }
    if dist[location - 1] > HUGE_DIST / 2.0 || dist[location + 1] > HUGE_DIST / 2.0 {
        diags.push(Diagnostic::TraceAdjacentToNan { index: location });
        return None;
    }

    debug!("target ra = {:.5} dec = {:.5}", target.ra, target.dec);
    diags.push(Diagnostic::TraceLocated { middle, location });
    Some(TraceLocation {
        middle,
        middle_wavelength: samples[location].wavelength,
        location,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wcs::{AffineWcs, BoundingBox};

    /// Dec grows by 1e-4 deg per row; ra by 1e-4 deg per column.
    fn slit_wcs() -> AffineWcs {
        AffineWcs::new([30.0, 1e-4, 0.0], [-10.0, 0.0, 1e-4], [1.0, 0.01, 0.0])
            .with_bounding_box(BoundingBox::new((-0.5, 19.5), (-0.5, 10.5)))
    }

    #[test]
    fn finds_closest_row() {
        let wcs = slit_wcs();
        let ordered = OrderedWcs::new(&wcs, 1).unwrap();
        let target = Target {
            ra: 30.0 + 10.0e-4,
            dec: -10.0 + 6.2e-4,
        };
        let mut diags = Diagnostics::new();
        let loc = locate(&ordered, Some(&target), DispersionAxis::Horizontal, &mut diags).unwrap();
        assert_eq!(loc.location, 6);
        assert_eq!(loc.middle, 9);
        assert!((loc.middle_wavelength - 1.09).abs() < 1e-12);
    }

    #[test]
    fn vertical_transect() {
        // Same sky layout with the axes swapped.
        let wcs = AffineWcs::new([30.0, 0.0, 1e-4], [-10.0, 1e-4, 0.0], [1.0, 0.0, 0.01])
            .with_bounding_box(BoundingBox::new((-0.5, 10.5), (-0.5, 19.5)));
        let ordered = OrderedWcs::new(&wcs, 1).unwrap();
        let target = Target {
            ra: 30.0 + 9.0e-4,
            dec: -10.0 + 3.9e-4,
        };
        let mut diags = Diagnostics::new();
        let loc = locate(&ordered, Some(&target), DispersionAxis::Vertical, &mut diags).unwrap();
        assert_eq!(loc.location, 4);
        assert_eq!(loc.middle, 9);
    }

    #[test]
    fn rejects_first_transect_pixel() {
        let wcs = slit_wcs();
        let ordered = OrderedWcs::new(&wcs, 1).unwrap();
        let mut diags = Diagnostics::new();
        let target = Target {
            ra: 30.001,
            dec: -10.1,
        };
        assert_eq!(
            locate(&ordered, Some(&target), DispersionAxis::Horizontal, &mut diags),
            None
        );
        assert!(diags.any(|d| matches!(d, Diagnostic::TraceAtEdge { index: 0 })));
    }

    #[test]
    fn rejects_last_transect_pixel() {
        // Domain ends at row 4, so the transect covers rows 0..=4.
        let wcs = AffineWcs::new([30.0, 1e-4, 0.0], [-10.0, 0.0, 1e-4], [1.0, 0.01, 0.0])
            .with_bounding_box(BoundingBox::new((-0.5, 19.5), (-0.5, 4.2)));
        let ordered = OrderedWcs::new(&wcs, 1).unwrap();
        let target = Target {
            ra: 30.001,
            dec: -10.0 + 9.0e-4,
        };
        let mut diags = Diagnostics::new();
        assert_eq!(
            locate(&ordered, Some(&target), DispersionAxis::Horizontal, &mut diags),
            None
        );
        assert!(diags.any(|d| matches!(d, Diagnostic::TraceAtEdge { index: 4 })));
    }

    #[test]
    fn transect_length_rounds_half_to_even() {
        // Domain ends at y = 9.5, so the transect has 10 rows, not 11.
        let wcs = AffineWcs::new([30.0, 1e-4, 0.0], [-10.0, 0.0, 1e-4], [1.0, 0.01, 0.0])
            .with_bounding_box(BoundingBox::new((-0.5, 19.5), (-0.5, 9.5)));
        let ordered = OrderedWcs::new(&wcs, 1).unwrap();
        let target = Target {
            ra: 30.001,
            dec: -10.0 + 9.0e-4,
        };
        let mut diags = Diagnostics::new();
        assert_eq!(
            locate(&ordered, Some(&target), DispersionAxis::Horizontal, &mut diags),
            None
        );
        assert!(diags.any(|d| matches!(d, Diagnostic::TraceAtEdge { index: 9 })));
    }

    #[test]
    fn rejects_location_next_to_undefined_region() {
        // Row 11 of the transect lies outside the domain (y <= 10.5).
        let wcs = slit_wcs();
        let ordered = OrderedWcs::new(&wcs, 1).unwrap();
        let target = Target {
            ra: 30.001,
            dec: -9.9,
        };
        let mut diags = Diagnostics::new();
        assert_eq!(
            locate(&ordered, Some(&target), DispersionAxis::Horizontal, &mut diags),
            None
        );
        assert!(diags.any(|d| matches!(d, Diagnostic::TraceAdjacentToNan { index: 10 })));
    }

    #[test]
    fn missing_inputs() {
        let wcs = AffineWcs::new([0.0; 3], [0.0; 3], [0.0; 3]);
        let ordered = OrderedWcs::new(&wcs, 1).unwrap();
        let mut diags = Diagnostics::new();
        let target = Target { ra: 0.0, dec: 0.0 };
        assert_eq!(
            locate(&ordered, Some(&target), DispersionAxis::Vertical, &mut diags),
            None
        );
        assert!(diags.any(|d| matches!(d, Diagnostic::BoundingBoxMissing)));

        let wcs = slit_wcs();
        let ordered = OrderedWcs::new(&wcs, 1).unwrap();
        assert_eq!(locate(&ordered, None, DispersionAxis::Horizontal, &mut diags), None);
        assert!(diags.any(|d| matches!(d, Diagnostic::TargetMissing)));
    }
}
