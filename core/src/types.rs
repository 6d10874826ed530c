//! Common types shared across the spectral-extraction pipeline.
//!
//! These structures represent the fundamental data objects of a 1-D
//! spectral extraction: the decoded extraction reference (aperture tables
//! or mask images), the rectangular pixel aperture, user overrides, and the
//! per-trace output rows.

use ndarray::Array2;
use serde::{Deserialize, Serialize};

#[cfg(feature = "python")]
use pyo3::prelude::*;

/// Slit name (or spectral-order string) that matches anything.
pub const ANY: &str = "ANY";

/// Mask-image spectral orders at or above this value match any order.
pub const ANY_ORDER: i32 = 1000;

/// Reference-table identifier that is never selected.
pub const DUMMY_ID: &str = "dummy";

/// Data-quality bit marking an element that must not be used.
pub const DO_NOT_USE: u32 = 1;

/// Sentinel right ascension / declination when no sky position resolves.
pub const SKY_SENTINEL: f64 = -999.0;

// ---------------------------------------------------------------------------
// DispersionAxis
// ---------------------------------------------------------------------------

/// Image axis along which wavelength predominantly varies.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DispersionAxis {
    /// Wavelength varies along a row (x); code 1.
    Horizontal,
    /// Wavelength varies along a column (y); code 2.
    Vertical,
}

impl DispersionAxis {
    /// Decode the integer convention used by reference files (1 or 2).
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            1 => Some(Self::Horizontal),
            2 => Some(Self::Vertical),
            _ => None,
        }
    }

    pub fn code(self) -> i32 {
        match self {
            Self::Horizontal => 1,
            Self::Vertical => 2,
        }
    }
}

// ---------------------------------------------------------------------------
// MatchQuality
// ---------------------------------------------------------------------------

/// Outcome of matching a slit / spectral order against reference entries.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MatchQuality {
    /// No entry had a matching identifier.
    NoMatch,
    /// The identifier matched but the spectral order (or region type) did not.
    Partial,
    /// Identifier and spectral order both matched.
    Exact,
}

// ---------------------------------------------------------------------------
// IndependentVar
// ---------------------------------------------------------------------------

/// Independent variable of the boundary polynomials.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndependentVar {
    #[default]
    Pixel,
    Wavelength,
}

impl IndependentVar {
    /// Parse the reference-file spelling, case-insensitively.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "pixel" | "pixels" => Some(Self::Pixel),
            "wavelength" => Some(Self::Wavelength),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Aperture
// ---------------------------------------------------------------------------

/// Pixel-inclusive rectangular extraction region.
///
/// Values are normally integral; cross-dispersion limits become fractional
/// when an explicit extraction width is centred inside the original span.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Aperture {
    pub xstart: f64,
    pub xstop: f64,
    pub ystart: f64,
    pub ystop: f64,
}

impl Aperture {
    pub fn new(xstart: f64, xstop: f64, ystart: f64, ystop: f64) -> Self {
        Self {
            xstart,
            xstop,
            ystart,
            ystop,
        }
    }

    /// Cross-dispersion (start, stop) for the given axis.
    pub fn cross_limits(&self, axis: DispersionAxis) -> (f64, f64) {
        match axis {
            DispersionAxis::Horizontal => (self.ystart, self.ystop),
            DispersionAxis::Vertical => (self.xstart, self.xstop),
        }
    }

    /// Dispersion-direction (start, stop) for the given axis.
    pub fn dispersion_limits(&self, axis: DispersionAxis) -> (f64, f64) {
        match axis {
            DispersionAxis::Horizontal => (self.xstart, self.xstop),
            DispersionAxis::Vertical => (self.ystart, self.ystop),
        }
    }
}

// ---------------------------------------------------------------------------
// Reference descriptor
// ---------------------------------------------------------------------------

/// Spectral order selector in an aperture table: a number or `"ANY"`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OrderSpec {
    Order(i32),
    Named(String),
}

impl OrderSpec {
    pub fn matches(&self, order: i32) -> bool {
        match self {
            OrderSpec::Order(n) => *n == order,
            OrderSpec::Named(s) => s.eq_ignore_ascii_case(ANY),
        }
    }
}

/// One entry of a parametric (aperture-table) reference.
///
/// Field names follow the JSON aperture-table convention.  Every field is
/// optional; defaults are applied during parameter resolution.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ApertureSpec {
    pub id: Option<String>,
    pub region_type: Option<String>,
    pub spectral_order: Option<OrderSpec>,
    pub dispaxis: Option<i32>,
    pub xstart: Option<f64>,
    pub xstop: Option<f64>,
    pub ystart: Option<f64>,
    pub ystop: Option<f64>,
    pub extract_width: Option<f64>,
    pub src_coeff: Option<Vec<Vec<f64>>>,
    pub bkg_coeff: Option<Vec<Vec<f64>>>,
    pub independent_var: Option<String>,
    pub smoothing_length: Option<u32>,
    pub bkg_order: Option<u32>,
}

/// One image of an image-mask reference.
///
/// Positive pixels mark the source region, negative pixels the background.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MaskImage {
    pub name: String,
    pub spectral_order: i32,
    pub dispersion_axis: Option<i32>,
    pub smoothing_length: u32,
    pub data: Array2<f32>,
}

#[derive(Deserialize)]
struct ApertureTable {
    apertures: Vec<ApertureSpec>,
}

/// Already-decoded extraction reference.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum ReferenceDescriptor {
    /// No reference file; defaults cover the whole image.
    #[default]
    None,
    Parametric { apertures: Vec<ApertureSpec> },
    ImageMask { images: Vec<MaskImage> },
}

impl ReferenceDescriptor {
    /// Decode the JSON aperture-table form `{"apertures": [...]}`.
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        let table: ApertureTable = serde_json::from_str(text)?;
        Ok(Self::Parametric {
            apertures: table.apertures,
        })
    }
}

// ---------------------------------------------------------------------------
// ExtractionOverrides
// ---------------------------------------------------------------------------

/// User overrides that take precedence over reference-file values.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractionOverrides {
    pub smoothing_length: Option<u32>,
    pub bkg_order: Option<u32>,
}

// ---------------------------------------------------------------------------
// Sky positions
// ---------------------------------------------------------------------------

/// World coordinates of a single pixel.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct WorldCoord {
    pub ra: f64,
    pub dec: f64,
    pub wavelength: f64,
}

impl WorldCoord {
    pub const NAN: WorldCoord = WorldCoord {
        ra: f64::NAN,
        dec: f64::NAN,
        wavelength: f64::NAN,
    };
}

/// Nominal sky position of the observed target, in degrees.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Target {
    pub ra: f64,
    pub dec: f64,
}

// ---------------------------------------------------------------------------
// ExtractedSpectrum
// ---------------------------------------------------------------------------

/// Output rows for one trace.
///
/// `wavelength`, `net`, `background` and `dq` always have equal length.
#[cfg_attr(feature = "python", pyclass(get_all))]
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExtractedSpectrum {
    /// Wavelength per output row, in micrometres.
    pub wavelength: Vec<f64>,
    /// Background-subtracted count rate.
    pub net: Vec<f64>,
    /// Background that was subtracted from the gross count rate.
    pub background: Vec<f64>,
    pub dq: Vec<u32>,
    /// Right ascension of the trace, or [`SKY_SENTINEL`].
    pub ra: f64,
    /// Declination of the trace, or [`SKY_SENTINEL`].
    pub dec: f64,
    pub spectral_order: i32,
}

impl ExtractedSpectrum {
    pub fn len(&self) -> usize {
        self.net.len()
    }

    pub fn is_empty(&self) -> bool {
        self.net.is_empty()
    }
}

#[cfg(feature = "python")]
#[pymethods]
impl ExtractedSpectrum {
    fn __len__(&self) -> usize {
        self.len()
    }

    fn __repr__(&self) -> String {
        format!(
            "ExtractedSpectrum(order={}, rows={}, ra={:.5}, dec={:.5})",
            self.spectral_order,
            self.len(),
            self.ra,
            self.dec,
        )
    }
}
