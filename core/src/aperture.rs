//! Aperture geometry: the rectangular pixel region to extract from.
//!
//! The region is seeded from the reference bounds (or the full image),
//! clipped to the image, tightened to the coordinate transform's valid
//! domain and finally re-centred when an explicit extraction width was
//! requested.  Conflicting limits are resolved restrictively: a start bound
//! takes the larger value, a stop bound the smaller.

use crate::diagnostics::{Diagnostic, Diagnostics};
use crate::params::ParametricRegion;
use crate::types::{Aperture, DispersionAxis};
use crate::wcs::BoundingBox;

/// Seed the aperture from the reference; unset bounds span the image.
///
/// `shape` is `(ny, nx)`.
pub fn aperture_from_ref(region: &ParametricRegion, shape: (usize, usize)) -> Aperture {
    let (ny, nx) = shape;
    Aperture {
        xstart: region.xstart.unwrap_or(0.0),
        xstop: region.xstop.unwrap_or(nx as f64 - 1.0),
        ystart: region.ystart.unwrap_or(0.0),
        ystop: region.ystop.unwrap_or(ny as f64 - 1.0),
    }
}

/// Round the cross-dispersion bounds of a reference region to integers.
///
/// Those bounds name pixel centres; fractional values only arise later
/// from an explicit extraction width.
pub fn round_cross_bounds(
    region: &mut ParametricRegion,
    axis: DispersionAxis,
    diags: &mut Diagnostics,
) {
    let bounds: [(&'static str, &mut Option<f64>); 2] = match axis {
        DispersionAxis::Horizontal => [("ystart", &mut region.ystart), ("ystop", &mut region.ystop)],
        DispersionAxis::Vertical => [("xstart", &mut region.xstart), ("xstop", &mut region.xstop)],
    };
    for (name, bound) in bounds {
        if let Some(value) = bound {
            let rounded = value.round_ties_even();
            if rounded != *value {
                diags.push(Diagnostic::BoundRounded {
                    name,
                    from: *value,
                    to: rounded,
                });
                *value = rounded;
            }
        }
    }
}

fn clip_pair(start: f64, stop: f64, n: usize) -> (f64, f64, bool) {
    let last = n.max(1) as f64 - 1.0;
    let new_start = start.clamp(0.0, last);
    let new_stop = stop.clamp(0.0, last);
    let truncated = new_start != start || new_stop != stop;
    if new_start <= new_stop {
        (new_start, new_stop, truncated)
    } else {
        (new_stop, new_start, truncated)
    }
}

/// Clip the aperture to the image; the flag reports whether anything moved.
pub fn update_from_shape(ap: Aperture, shape: (usize, usize)) -> (Aperture, bool) {
    let (ny, nx) = shape;
    let (xstart, xstop, tx) = clip_pair(ap.xstart, ap.xstop, nx);
    let (ystart, ystop, ty) = clip_pair(ap.ystart, ap.ystop, ny);
    (Aperture::new(xstart, xstop, ystart, ystop), tx || ty)
}

/// The transform's valid domain, as an aperture.
pub fn aperture_from_wcs(bbox: &BoundingBox) -> Aperture {
    Aperture::new(bbox.x.0, bbox.x.1, bbox.y.0, bbox.y.1)
}

/// True when the domain properly overlaps the aperture.
///
/// A domain that merely abuts the aperture edge does not count.
pub fn sanity_check_limits(ap_ref: &Aperture, ap_wcs: &Aperture) -> bool {
    !(ap_wcs.xstart >= ap_ref.xstop
        || ap_wcs.xstop <= ap_ref.xstart
        || ap_wcs.ystart >= ap_ref.ystop
        || ap_wcs.ystop <= ap_ref.ystart)
}

/// The more restrictive start limit; a domain start is rounded up.
pub fn compare_start(start_ref: f64, start_wcs: f64) -> f64 {
    if start_ref >= start_wcs {
        start_ref
    } else {
        start_wcs.ceil()
    }
}

/// The more restrictive stop limit; a domain stop is rounded down.
pub fn compare_stop(stop_ref: f64, stop_wcs: f64) -> f64 {
    if stop_ref <= stop_wcs {
        stop_ref
    } else {
        stop_wcs.floor()
    }
}

/// Limit the aperture to the transform's valid domain.
pub fn update_from_wcs(
    ap_ref: Aperture,
    ap_wcs: Option<&Aperture>,
    extract_width: Option<f64>,
    axis: DispersionAxis,
    diags: &mut Diagnostics,
) -> Aperture {
    let Some(ap_wcs) = ap_wcs else {
        return ap_ref;
    };
    if !sanity_check_limits(&ap_ref, ap_wcs) {
        diags.push(Diagnostic::WcsDomainIgnored {
            aperture: ap_ref,
            domain: *ap_wcs,
        });
        return ap_ref;
    }

    let ap = Aperture {
        xstart: compare_start(ap_ref.xstart, ap_wcs.xstart),
        xstop: compare_stop(ap_ref.xstop, ap_wcs.xstop),
        ystart: compare_start(ap_ref.ystart, ap_wcs.ystart),
        ystop: compare_stop(ap_ref.ystop, ap_wcs.ystop),
    };

    if let Some(requested) = extract_width {
        let (lo, hi) = ap.cross_limits(axis);
        let available = hi - lo + 1.0;
        if available < requested {
            diags.push(Diagnostic::ExtractWidthTruncated {
                requested,
                available,
            });
        }
    }

    ap
}

/// Centre a window of exactly `extract_width` pixels inside the current
/// cross-dispersion span.  The dispersion-direction limits are untouched.
pub fn update_from_width(ap: Aperture, extract_width: Option<f64>, axis: DispersionAxis) -> Aperture {
    let Some(width) = extract_width else {
        return ap;
    };
    let (start, stop) = ap.cross_limits(axis);
    if stop - start + 1.0 == width {
        return ap;
    }

    // Integral values are pixel centres; the window edges are expanded by
    // half a pixel when the boundary functions are built.
    let lower = (start + stop) / 2.0 - (width - 1.0) / 2.0;
    let upper = lower + (width - 1.0);
    match axis {
        DispersionAxis::Horizontal => Aperture {
            ystart: lower,
            ystop: upper,
            ..ap
        },
        DispersionAxis::Vertical => Aperture {
            xstart: lower,
            xstop: upper,
            ..ap
        },
    }
}

/// Compute the extraction aperture for a parametric region.
///
/// `shape` is `(ny, nx)`; `bbox` is the transform's valid domain, if any.
pub fn compute_aperture(
    region: &ParametricRegion,
    shape: (usize, usize),
    bbox: Option<&BoundingBox>,
    axis: DispersionAxis,
    diags: &mut Diagnostics,
) -> Aperture {
    let seed = aperture_from_ref(region, shape);

    let (ap, truncated) = update_from_shape(seed, shape);
    if truncated {
        diags.push(Diagnostic::ApertureTruncated { aperture: ap });
    }

    let ap_wcs = bbox.map(aperture_from_wcs);
    let ap = update_from_wcs(ap, ap_wcs.as_ref(), region.extract_width, axis, diags);
    let widened = update_from_width(ap, region.extract_width, axis);

    // A window wider than the image cannot be honoured in full.
    let (clipped, truncated) = update_from_shape(widened, shape);
    if truncated {
        let (lo, hi) = clipped.cross_limits(axis);
        diags.push(Diagnostic::ExtractWidthTruncated {
            requested: region.extract_width.unwrap_or(hi - lo + 1.0),
            available: hi - lo + 1.0,
        });
    }
    clipped
}

#[cfg(test)]
mod tests {
    use super::*;

    fn region(x: (f64, f64), y: (f64, f64)) -> ParametricRegion {
        ParametricRegion {
            xstart: Some(x.0),
            xstop: Some(x.1),
            ystart: Some(y.0),
            ystop: Some(y.1),
            ..Default::default()
        }
    }

    #[test]
    fn defaults_to_full_image() {
        let mut diags = Diagnostics::new();
        let ap = compute_aperture(
            &ParametricRegion::default(),
            (20, 30),
            None,
            DispersionAxis::Horizontal,
            &mut diags,
        );
        assert_eq!(ap, Aperture::new(0.0, 29.0, 0.0, 19.0));
        assert!(diags.is_empty());
    }

    #[test]
    fn clipped_to_image_and_ordered() {
        let mut diags = Diagnostics::new();
        let ap = compute_aperture(
            &region((-4.0, 40.0), (25.0, 22.0)),
            (20, 30),
            None,
            DispersionAxis::Horizontal,
            &mut diags,
        );
        assert_eq!(ap, Aperture::new(0.0, 29.0, 19.0, 19.0));
        assert!(diags.any(|d| matches!(d, Diagnostic::ApertureTruncated { .. })));
    }

    #[test]
    fn tightened_to_wcs_domain() {
        let mut diags = Diagnostics::new();
        let bbox = BoundingBox::new((2.3, 25.7), (-0.5, 19.5));
        let ap = compute_aperture(
            &region((0.0, 29.0), (4.0, 8.0)),
            (20, 30),
            Some(&bbox),
            DispersionAxis::Horizontal,
            &mut diags,
        );
        assert_eq!(ap, Aperture::new(3.0, 25.0, 4.0, 8.0));
    }

    #[test]
    fn abutting_domain_is_ignored() {
        let mut diags = Diagnostics::new();
        // Domain starts exactly where the aperture stops.
        let bbox = BoundingBox::new((29.0, 40.0), (0.0, 19.0));
        let ap = compute_aperture(
            &region((0.0, 29.0), (4.0, 8.0)),
            (20, 30),
            Some(&bbox),
            DispersionAxis::Horizontal,
            &mut diags,
        );
        assert_eq!(ap, Aperture::new(0.0, 29.0, 4.0, 8.0));
        assert!(diags.any(|d| matches!(d, Diagnostic::WcsDomainIgnored { .. })));
    }

    #[test]
    fn width_centres_window() {
        let ap = Aperture::new(0.0, 9.0, 3.0, 7.0);
        let narrowed = update_from_width(ap, Some(2.0), DispersionAxis::Horizontal);
        assert_eq!(narrowed, Aperture::new(0.0, 9.0, 4.5, 5.5));
        let vertical = update_from_width(ap, Some(4.0), DispersionAxis::Vertical);
        assert_eq!(vertical, Aperture::new(3.0, 6.0, 3.0, 7.0));
    }

    #[test]
    fn width_is_idempotent() {
        let ap = Aperture::new(0.0, 9.0, 2.0, 11.0);
        for width in [1.0, 3.0, 4.0, 7.5] {
            let once = update_from_width(ap, Some(width), DispersionAxis::Horizontal);
            let twice = update_from_width(once, Some(width), DispersionAxis::Horizontal);
            assert_eq!(once, twice);
        }
    }

    #[test]
    fn width_wider_than_domain_is_reported() {
        let mut diags = Diagnostics::new();
        let bbox = BoundingBox::new((0.0, 29.0), (5.0, 7.0));
        let mut reg = region((0.0, 29.0), (0.0, 19.0));
        reg.extract_width = Some(5.0);
        let ap = compute_aperture(
            &reg,
            (20, 30),
            Some(&bbox),
            DispersionAxis::Horizontal,
            &mut diags,
        );
        assert!(diags.any(|d| matches!(
            d,
            Diagnostic::ExtractWidthTruncated { requested, available }
                if *requested == 5.0 && *available == 3.0
        )));
        assert_eq!(ap, Aperture::new(0.0, 29.0, 4.0, 8.0));
    }

    #[test]
    fn bounds_stay_inside_image() {
        let shapes = [(5, 5), (12, 40), (1, 9)];
        let regions = [
            region((-10.0, 100.0), (-3.0, 3.0)),
            region((7.0, 2.0), (50.0, 60.0)),
            ParametricRegion {
                extract_width: Some(30.0),
                ..Default::default()
            },
        ];
        for shape in shapes {
            for reg in &regions {
                for axis in [DispersionAxis::Horizontal, DispersionAxis::Vertical] {
                    let mut diags = Diagnostics::new();
                    let ap = compute_aperture(reg, shape, None, axis, &mut diags);
                    let (ny, nx) = shape;
                    assert!(ap.xstart <= ap.xstop && ap.ystart <= ap.ystop);
                    assert!(ap.xstart >= 0.0 && ap.xstop <= nx as f64 - 1.0);
                    assert!(ap.ystart >= 0.0 && ap.ystop <= ny as f64 - 1.0);
                }
            }
        }
    }

    #[test]
    fn cross_bounds_rounded() {
        let mut diags = Diagnostics::new();
        let mut reg = region((0.2, 9.7), (3.4, 7.0));
        round_cross_bounds(&mut reg, DispersionAxis::Horizontal, &mut diags);
        assert_eq!(reg.ystart, Some(3.0));
        assert_eq!(reg.xstart, Some(0.2));
        assert_eq!(diags.len(), 1);
    }

    #[test]
    fn cross_bounds_round_half_to_even() {
        let mut diags = Diagnostics::new();
        let mut reg = region((0.0, 9.0), (2.5, 7.5));
        round_cross_bounds(&mut reg, DispersionAxis::Horizontal, &mut diags);
        assert_eq!(reg.ystart, Some(2.0));
        assert_eq!(reg.ystop, Some(8.0));
        assert_eq!(diags.len(), 2);
    }
}
