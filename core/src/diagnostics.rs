//! Structured records of the fallback decisions taken during extraction.
//!
//! Nearly every stage of an extraction has a "best effort" path: a WCS
//! bounding box that does not overlap the aperture is ignored, a trace that
//! cannot be located keeps its nominal position, a missing wavelength array
//! is replaced by the coordinate transform, and so on.  Each of those
//! decisions is recorded as a [`Diagnostic`] so callers (and tests) can ask
//! which path was taken without parsing log text.  Recording a diagnostic
//! also forwards it to the `log` facade at its severity.

use std::fmt;

use log::Level;
use serde::Serialize;

use crate::types::{Aperture, DispersionAxis};

/// A single fallback or notable condition encountered during extraction.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub enum Diagnostic {
    /// Reference bounds extended past the image and were clipped.
    ApertureTruncated { aperture: Aperture },
    /// The WCS bounding box does not overlap the aperture and was ignored.
    WcsDomainIgnored { aperture: Aperture, domain: Aperture },
    /// The requested extraction width is wider than the WCS domain allows.
    ExtractWidthTruncated { requested: f64, available: f64 },
    /// A cross-dispersion bound from the reference was not integral.
    BoundRounded { name: &'static str, from: f64, to: f64 },
    /// Even smoothing lengths are bumped to the next odd value.
    SmoothingLengthIncremented { from: u32, to: u32 },
    /// The reference did not name a dispersion axis.
    DispersionAxisNotInReference,
    /// The transform returned NaN wavelengths at the bounding-box centre.
    WcsWavelengthNan,
    /// The dispersion axis could not be determined from the data.
    DispersionAxisUndetermined,
    /// Dispersion axis inferred from the wavelength array or the WCS.
    DispersionAxisInferred { axis: DispersionAxis },
    /// No coordinate transform was available.
    WcsMissing,
    /// The coordinate transform has no bounding box.
    BoundingBoxMissing,
    /// Target coordinates were not available for trace location.
    TargetMissing,
    /// Closest transect pixel lies at the transect edge.
    TraceAtEdge { index: usize },
    /// Closest transect pixel is adjacent to an undefined region.
    TraceAdjacentToNan { index: usize },
    /// The trace was located by the WCS.
    TraceLocated { middle: usize, location: usize },
    /// The nominal location of the trace could not be computed.
    NominalLocationUndetermined,
    /// A nod/dither offset was applied.
    NodOffsetApplied { offset: f64 },
    /// A fractional offset was rounded for an image mask.
    NodOffsetRounded { from: f64, to: i64 },
    /// The offset exceeds the mask extent and was not applied.
    NodOffsetTooLarge { offset: i64 },
    /// The wavelength array contained NaNs inside the window.
    WavelengthNans { count: usize },
    /// No wavelengths were available; a pixel-index axis was synthesized.
    WavelengthsSynthesized,
    /// Output rows were trimmed because of NaN wavelengths at the ends.
    OutputTrimmed { count: usize },
    /// Every wavelength was NaN; all rows are flagged.
    AllWavelengthsNan,
    /// Right ascension resolved to no finite sample.
    RightAscensionUndefined,
    /// Declination resolved to no finite sample.
    DeclinationUndefined,
    /// Midpoint of the trace was NaN; the midrange was used instead.
    SkyMidpointNan,
    /// Response values were extrapolated and replaced by 1.
    ResponseExtrapolated { count: usize },
    /// Interpolated response values were non-positive and replaced by 1.
    ResponseNonPositive { count: usize },
    /// Response wavelengths were given in meters.
    ResponseWavelengthsConverted,
    /// No response curve; flux is reported as zero.
    ResponseMissing,
    /// An order matched only partially and was skipped.
    OrderSkipped { slit: String, order: i32 },
    /// The transform cannot be specialised to this order; skipped.
    InvalidOrderSkipped { slit: String, order: i32 },
    /// A slit with no data was skipped.
    EmptySlitSkipped { slit: String },
}

impl Diagnostic {
    /// Severity used when forwarding to the logger.
    pub fn level(&self) -> Level {
        use Diagnostic::*;
        match self {
            TraceLocated { .. }
            | DispersionAxisInferred { .. }
            | NodOffsetApplied { .. }
            | NodOffsetRounded { .. } => Level::Debug,
            OutputTrimmed { .. }
            | OrderSkipped { .. }
            | InvalidOrderSkipped { .. }
            | EmptySlitSkipped { .. } => Level::Info,
            _ => Level::Warn,
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use Diagnostic::*;
        match self {
            ApertureTruncated { aperture } => write!(
                f,
                "extraction limits extended outside the image; truncated to {:?}",
                aperture
            ),
            WcsDomainIgnored { aperture, domain } => write!(
                f,
                "WCS bounding box {:?} is outside the aperture {:?}; ignored",
                domain, aperture
            ),
            ExtractWidthTruncated {
                requested,
                available,
            } => write!(
                f,
                "extract_width was truncated from {} to {}",
                requested, available
            ),
            BoundRounded { name, from, to } => {
                write!(f, "{} {} should have been an integer; rounded to {}", name, from, to)
            }
            SmoothingLengthIncremented { from, to } => {
                write!(f, "smoothing_length was even ({}), so incremented to {}", from, to)
            }
            DispersionAxisNotInReference => write!(f, "dispaxis not specified in reference"),
            WcsWavelengthNan => write!(f, "wavelength from WCS is NaN within the bounding box"),
            DispersionAxisUndetermined => write!(f, "can't determine dispaxis"),
            DispersionAxisInferred { axis } => write!(f, "dispaxis inferred as {:?}", axis),
            WcsMissing => write!(f, "WCS function not found in input"),
            BoundingBoxMissing => write!(
                f,
                "the WCS bounding box is None, so the target location can't be found"
            ),
            TargetMissing => write!(
                f,
                "target RA and Dec are not available, so the target location can't be found"
            ),
            TraceAtEdge { index } => write!(
                f,
                "WCS implies the target is outside the bounding box (location {} at edge)",
                index
            ),
            TraceAdjacentToNan { index } => write!(
                f,
                "WCS implies the target is outside the bounding box (location {} next to NaN region)",
                index
            ),
            TraceLocated { middle, location } => write!(
                f,
                "spectrum location from WCS used line {}; target at {}",
                middle, location
            ),
            NominalLocationUndetermined => {
                write!(f, "couldn't determine the nominal cross-dispersion location")
            }
            NodOffsetApplied { offset } => write!(f, "applying nod/dither offset of {}", offset),
            NodOffsetRounded { from, to } => {
                write!(f, "rounding nod/dither offset of {} to {}", from, to)
            }
            NodOffsetTooLarge { offset } => {
                write!(f, "nod offset {} is too large, skipping", offset)
            }
            WavelengthNans { count } => write!(f, "{} NaNs in wavelength array", count),
            WavelengthsSynthesized => {
                write!(f, "wavelengths could not be determined; using pixel numbers")
            }
            OutputTrimmed { count } => {
                write!(f, "output arrays have been trimmed by {} elements", count)
            }
            AllWavelengthsNan => write!(f, "every wavelength is NaN; all rows flagged"),
            RightAscensionUndefined => {
                write!(f, "all right ascension values are NaN; assigning -999")
            }
            DeclinationUndefined => write!(f, "all declination values are NaN; assigning -999"),
            SkyMidpointNan => write!(
                f,
                "midpoint of coordinate array is NaN; using the midrange of finite values"
            ),
            ResponseExtrapolated { count } => write!(
                f,
                "{} response elements were extrapolated and set to 1",
                count
            ),
            ResponseNonPositive { count } => write!(
                f,
                "{} interpolated response values were <= 0 and set to 1",
                count
            ),
            ResponseWavelengthsConverted => {
                write!(f, "converting response wavelengths to microns")
            }
            ResponseMissing => write!(f, "no response curve, so flux can't be computed"),
            OrderSkipped { slit, order } => {
                write!(f, "spectral order {} not found for {}, skipping", order, slit)
            }
            InvalidOrderSkipped { slit, order } => {
                write!(f, "spectral order {} is not valid for {}, skipping", order, slit)
            }
            EmptySlitSkipped { slit } => write!(f, "no data for slit {}, skipping", slit),
        }
    }
}

/// Ordered collection of diagnostics attached to a result.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Diagnostics(Vec<Diagnostic>);

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a diagnostic and forward it to the logger.
    pub fn push(&mut self, diagnostic: Diagnostic) {
        log::log!(diagnostic.level(), "{}", diagnostic);
        self.0.push(diagnostic);
    }

    pub fn extend(&mut self, other: Diagnostics) {
        self.0.extend(other.0);
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// True when any recorded diagnostic satisfies `pred`.
    pub fn any(&self, pred: impl Fn(&Diagnostic) -> bool) -> bool {
        self.0.iter().any(pred)
    }
}

impl IntoIterator for Diagnostics {
    type Item = Diagnostic;
    type IntoIter = std::vec::IntoIter<Diagnostic>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}
