//! Extraction-parameter resolution.
//!
//! Given the decoded reference (no reference, an aperture table, or a set
//! of mask images), a slit identifier and a spectral order, pick the single
//! best-matching aperture description and merge it with the caller's
//! overrides.  Matching is tri-state: an entry whose identifier matches
//! makes the result at least [`MatchQuality::Partial`]; it becomes
//! [`MatchQuality::Exact`] only when the spectral order matches as well.
//! The first exact entry wins, so input order matters.

use log::debug;

use crate::diagnostics::{Diagnostic, Diagnostics};
use crate::poly::IntervalSet;
use crate::types::{
    ApertureSpec, DispersionAxis, ExtractionOverrides, IndependentVar, MaskImage, MatchQuality,
    ReferenceDescriptor, ANY, ANY_ORDER, DUMMY_ID,
};

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Configuration errors found while resolving reference parameters.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ParamsError {
    #[error("dispaxis = {0} is not valid; must be 1 or 2")]
    InvalidDispersionAxis(i32),

    #[error("independent_var = '{0}'; specify 'wavelength' or 'pixel'")]
    InvalidIndependentVar(String),

    #[error("coefficients must contain alternating lists of lower and upper limits (got {0} lists)")]
    OddCoefficientCount(usize),

    #[error("polynomial coefficient list is empty")]
    EmptyCoefficients,

    #[error("source coefficients must define at least one lower/upper pair")]
    EmptySourceCoefficients,
}

// ---------------------------------------------------------------------------
// Resolved parameters
// ---------------------------------------------------------------------------

/// Parametric description of the extraction region.
///
/// Unset bounds default to the full image during aperture geometry.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ParametricRegion {
    pub xstart: Option<f64>,
    pub xstop: Option<f64>,
    pub ystart: Option<f64>,
    pub ystop: Option<f64>,
    pub extract_width: Option<f64>,
    pub src: Option<IntervalSet>,
    pub bkg: Option<IntervalSet>,
    pub independent_var: IndependentVar,
}

/// The selected region description; decides which engine runs.
#[derive(Clone, Debug, PartialEq)]
pub enum Region {
    Parametric(ParametricRegion),
    ImageMask(MaskImage),
}

/// Resolved working parameters for one slit / spectral order.
#[derive(Clone, Debug, PartialEq)]
pub struct ExtractionParameters {
    pub match_quality: MatchQuality,
    pub spectral_order: i32,
    /// `None` until resolved from the reference or the data.
    pub dispaxis: Option<DispersionAxis>,
    /// Present only for an exact match.
    pub region: Option<Region>,
    /// Always odd, or zero.
    pub smoothing_length: u32,
    pub bkg_order: u32,
}

impl ExtractionParameters {
    fn unmatched(spectral_order: i32) -> Self {
        Self {
            match_quality: MatchQuality::NoMatch,
            spectral_order,
            dispaxis: None,
            region: None,
            smoothing_length: 0,
            bkg_order: 0,
        }
    }

    /// Log the resolved values at debug level.
    pub fn log_initial(&self) {
        debug!("match = {:?}", self.match_quality);
        debug!("dispaxis = {:?}", self.dispaxis);
        debug!("spectral order = {}", self.spectral_order);
        debug!("smoothing_length = {}", self.smoothing_length);
        debug!("bkg_order = {}", self.bkg_order);
        if let Some(Region::Parametric(region)) = &self.region {
            debug!("independent_var = {:?}", region.independent_var);
            debug!(
                "initial limits x = {:?}..{:?}, y = {:?}..{:?}",
                region.xstart, region.xstop, region.ystart, region.ystop
            );
            debug!("extract_width = {:?}", region.extract_width);
            debug!("initial src_coeff = {:?}", region.src.as_ref().map(|s| s.to_coefficients()));
            debug!("initial bkg_coeff = {:?}", region.bkg.as_ref().map(|s| s.to_coefficients()));
        }
    }
}

// ---------------------------------------------------------------------------
// Resolution
// ---------------------------------------------------------------------------

fn id_matches(entry: &str, slit_id: &str) -> bool {
    entry == slit_id || entry == ANY || slit_id == ANY
}

/// Smoothing lengths must be odd; bump even positive values by one.
fn odd_smoothing(length: u32, diags: &mut Diagnostics) -> u32 {
    if length > 0 && length % 2 == 0 {
        diags.push(Diagnostic::SmoothingLengthIncremented {
            from: length,
            to: length + 1,
        });
        length + 1
    } else {
        length
    }
}

/// Select the best-matching reference entry for `slit_id` / `spectral_order`.
pub fn resolve(
    reference: &ReferenceDescriptor,
    slit_id: &str,
    spectral_order: i32,
    overrides: &ExtractionOverrides,
    diags: &mut Diagnostics,
) -> Result<ExtractionParameters, ParamsError> {
    match reference {
        ReferenceDescriptor::None => Ok(ExtractionParameters {
            match_quality: MatchQuality::Exact,
            spectral_order,
            dispaxis: None,
            region: Some(Region::Parametric(ParametricRegion::default())),
            // No background subtraction without a reference.
            smoothing_length: 0,
            bkg_order: 0,
        }),
        ReferenceDescriptor::Parametric { apertures } => {
            resolve_parametric(apertures, slit_id, spectral_order, overrides, diags)
        }
        ReferenceDescriptor::ImageMask { images } => Ok(resolve_mask(
            images,
            slit_id,
            spectral_order,
            overrides,
            diags,
        )),
    }
}

fn resolve_parametric(
    apertures: &[ApertureSpec],
    slit_id: &str,
    spectral_order: i32,
    overrides: &ExtractionOverrides,
    diags: &mut Diagnostics,
) -> Result<ExtractionParameters, ParamsError> {
    let mut params = ExtractionParameters::unmatched(spectral_order);

    for aper in apertures {
        let Some(id) = aper.id.as_deref() else {
            continue;
        };
        if id == DUMMY_ID || !id_matches(id, slit_id) {
            continue;
        }
        params.match_quality = MatchQuality::Partial;

        if aper.region_type.as_deref().unwrap_or("target") != "target" {
            continue;
        }
        // A missing spectral order selects the entry.
        let order_ok = aper
            .spectral_order
            .as_ref()
            .map_or(true, |o| o.matches(spectral_order));
        if !order_ok {
            continue;
        }

        params.match_quality = MatchQuality::Exact;
        params.dispaxis = match aper.dispaxis {
            None => {
                diags.push(Diagnostic::DispersionAxisNotInReference);
                None
            }
            Some(code) => Some(
                DispersionAxis::from_code(code).ok_or(ParamsError::InvalidDispersionAxis(code))?,
            ),
        };

        let var = aper.independent_var.as_deref().unwrap_or("pixel");
        let independent_var = IndependentVar::parse(var)
            .ok_or_else(|| ParamsError::InvalidIndependentVar(var.to_string()))?;

        let src = aper
            .src_coeff
            .as_deref()
            .map(IntervalSet::from_coefficients)
            .transpose()?;
        if src.as_ref().is_some_and(IntervalSet::is_empty) {
            return Err(ParamsError::EmptySourceCoefficients);
        }
        let bkg = aper
            .bkg_coeff
            .as_deref()
            .map(IntervalSet::from_coefficients)
            .transpose()?;

        let smoothing = overrides
            .smoothing_length
            .unwrap_or_else(|| aper.smoothing_length.unwrap_or(0));
        params.smoothing_length = odd_smoothing(smoothing, diags);
        params.bkg_order = overrides
            .bkg_order
            .unwrap_or_else(|| aper.bkg_order.unwrap_or(0));

        params.region = Some(Region::Parametric(ParametricRegion {
            xstart: aper.xstart,
            xstop: aper.xstop,
            ystart: aper.ystart,
            ystop: aper.ystop,
            extract_width: aper.extract_width,
            src,
            bkg,
            independent_var,
        }));
        break;
    }

    Ok(params)
}

fn resolve_mask(
    images: &[MaskImage],
    slit_id: &str,
    spectral_order: i32,
    overrides: &ExtractionOverrides,
    diags: &mut Diagnostics,
) -> ExtractionParameters {
    let mut params = ExtractionParameters::unmatched(spectral_order);

    let found = images.iter().find(|im| {
        if !id_matches(&im.name, slit_id) {
            return false;
        }
        params.match_quality = MatchQuality::Partial;
        im.spectral_order == spectral_order || im.spectral_order >= ANY_ORDER
    });

    if let Some(im) = found {
        params.match_quality = MatchQuality::Exact;
        // An invalid axis code is left for the resolver to infer.
        params.dispaxis = im.dispersion_axis.and_then(DispersionAxis::from_code);
        let smoothing = overrides.smoothing_length.unwrap_or(im.smoothing_length);
        params.smoothing_length = odd_smoothing(smoothing, diags);
        params.region = Some(Region::ImageMask(im.clone()));
    }

    params
}
