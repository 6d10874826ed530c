//! Exposure-level orchestration.
//!
//! An exposure is either a whole image (a single plane or a cube of
//! integrations, possibly with several spectral orders) or a set of slit
//! cutouts.  Every trace runs the same sequence:
//!
//! 1. resolve parameters for the slit / spectral order,
//! 2. zero bad pixels,
//! 3. settle the dispersion axis and build the engine,
//! 4. locate the trace with the WCS and apply the nod/dither offset,
//! 5. extract and clean up the rows,
//! 6. convert net count rate to flux with the response curve.
//!
//! Slits and integrations are independent and run in parallel with
//! **rayon**; results keep the input order.

use std::sync::Arc;
use std::time::Instant;

use log::{error, info, warn};
use ndarray::{Array2, Array3, Axis};
use rayon::prelude::*;
use serde::Serialize;

use crate::diagnostics::{Diagnostic, Diagnostics};
use crate::engine::{ExtractError, ExtractionModel, Extractor};
use crate::locate::locate;
use crate::params::{resolve, ExtractionParameters};
use crate::postprocess::replace_bad_values;
use crate::response::ResponseCurve;
use crate::types::{
    ExtractedSpectrum, ExtractionOverrides, MatchQuality, ReferenceDescriptor, Target, ANY,
};
use crate::wcs::SpectralWcs;

// ---------------------------------------------------------------------------
// Inputs
// ---------------------------------------------------------------------------

/// One 2-D science plane with its optional companions.
#[derive(Clone, Debug, Default)]
pub struct SciencePlane {
    pub data: Array2<f32>,
    pub dq: Option<Array2<u32>>,
    /// Per-pixel wavelengths; all zeros means unpopulated.
    pub wavelength: Option<Array2<f64>>,
}

impl SciencePlane {
    pub fn new(data: Array2<f32>) -> Self {
        Self {
            data,
            dq: None,
            wavelength: None,
        }
    }
}

/// Catalogue information carried from a slit to its spectrum.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct SourceInfo {
    pub source_id: Option<i64>,
    pub source_name: Option<String>,
    pub source_type: Option<String>,
    pub slitlet_id: Option<i64>,
}

/// One slit of a multi-slit exposure.
#[derive(Clone)]
pub struct SlitExposure {
    pub name: String,
    pub spectral_order: i32,
    pub plane: SciencePlane,
    pub wcs: Option<Arc<dyn SpectralWcs>>,
    pub target: Option<Target>,
    pub response: Option<ResponseCurve>,
    pub source: SourceInfo,
}

impl SlitExposure {
    /// A first-order slit with no transform, target or response.
    pub fn new(name: impl Into<String>, plane: SciencePlane) -> Self {
        Self {
            name: name.into(),
            spectral_order: 1,
            plane,
            wcs: None,
            target: None,
            response: None,
            source: SourceInfo::default(),
        }
    }
}

/// Pixel data of a whole-image exposure.
#[derive(Clone, Debug)]
pub enum ImageLayout {
    Single(SciencePlane),
    /// `data` and `dq` are `(n_integrations, ny, nx)`; the wavelength map
    /// is shared by every integration.
    Integrations {
        data: Array3<f32>,
        dq: Option<Array3<u32>>,
        wavelength: Option<Array2<f64>>,
    },
}

/// A whole-image exposure.
#[derive(Clone)]
pub struct ImageExposure {
    /// `None` matches any reference entry.
    pub name: Option<String>,
    /// Orders to attempt, in output order.
    pub spectral_orders: Vec<i32>,
    pub layout: ImageLayout,
    pub wcs: Option<Arc<dyn SpectralWcs>>,
    pub target: Option<Target>,
    pub response: Option<ResponseCurve>,
}

impl ImageExposure {
    pub fn new(layout: ImageLayout) -> Self {
        Self {
            name: None,
            spectral_orders: vec![1],
            layout,
            wcs: None,
            target: None,
            response: None,
        }
    }
}

/// What the pipeline extracts from.
#[derive(Clone)]
pub enum Exposure {
    Image(ImageExposure),
    MultiSlit(Vec<SlitExposure>),
}

// ---------------------------------------------------------------------------
// Outputs
// ---------------------------------------------------------------------------

/// One calibrated spectrum and the decisions taken to produce it.
#[derive(Clone, Debug, Serialize)]
pub struct SpectrumProduct {
    /// Slit name; `None` for a wildcard image.
    pub name: Option<String>,
    pub integration: Option<usize>,
    pub source: Option<SourceInfo>,
    pub spectrum: ExtractedSpectrum,
    /// `net / response`, or zeros without a response curve.
    pub flux: Vec<f64>,
    pub diagnostics: Diagnostics,
}

/// Everything extracted from one exposure.
#[derive(Clone, Debug, Serialize)]
pub struct ExposureResult {
    pub spectra: Vec<SpectrumProduct>,
    /// Skipped slits and orders.
    pub skipped: Diagnostics,
    pub processing_time_ms: u64,
}

impl ExposureResult {
    /// Serialise the result to a JSON string for interoperability.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

// ---------------------------------------------------------------------------
// Single trace
// ---------------------------------------------------------------------------

fn check_shape(
    what: &'static str,
    found: (usize, usize),
    expected: (usize, usize),
) -> Result<(), ExtractError> {
    if found == expected {
        Ok(())
    } else {
        Err(ExtractError::ShapeMismatch {
            what,
            found,
            expected,
        })
    }
}

/// Extract one trace from one plane.
///
/// `params` must be an exact match; `slit` is used in error messages only.
pub fn extract_one_trace(
    plane: &SciencePlane,
    wcs: Option<&dyn SpectralWcs>,
    target: Option<&Target>,
    params: &ExtractionParameters,
    slit: &str,
    diags: &mut Diagnostics,
) -> Result<ExtractedSpectrum, ExtractError> {
    let shape = plane.data.dim();
    if shape.0 == 0 || shape.1 == 0 {
        return Err(ExtractError::EmptyData(shape.0, shape.1));
    }
    if let Some(dq) = &plane.dq {
        check_shape("dq", dq.dim(), shape)?;
    }
    if let Some(wl) = &plane.wavelength {
        check_shape("wavelength", wl.dim(), shape)?;
    }

    params.log_initial();
    let data = replace_bad_values(&plane.data, plane.dq.as_ref());
    let wavelength = plane.wavelength.as_ref();

    let mut model = ExtractionModel::build(params, slit, wcs, wavelength, shape, diags)?;

    // The difference between where the WCS puts the target and where the
    // reference expects it is the nod/dither offset.
    if let Some(ordered) = model.wcs() {
        if let Some(loc) = locate(&ordered, target, model.axis(), diags) {
            match model.nominal_location(loc.middle, loc.middle_wavelength) {
                Some(nominal) => {
                    model.apply_nod_correction(loc.location as f64 - nominal, diags)
                }
                None => diags.push(Diagnostic::NominalLocationUndetermined),
            }
        }
    }

    model.log_parameters();
    let out = model.extract(&data, wavelength, diags);

    Ok(ExtractedSpectrum {
        wavelength: out.rows.wavelength,
        net: out.rows.net,
        background: out.rows.background,
        dq: out.rows.dq,
        ra: out.ra,
        dec: out.dec,
        spectral_order: params.spectral_order,
    })
}

/// `net / response`, or zeros when there is no response curve.
pub fn calibrate(
    spectrum: &ExtractedSpectrum,
    response: Option<&ResponseCurve>,
    diags: &mut Diagnostics,
) -> Result<Vec<f64>, ExtractError> {
    match response.filter(|r| !r.is_empty()) {
        Some(curve) => {
            let factors = curve.interpolate(&spectrum.wavelength, diags)?;
            Ok(spectrum
                .net
                .iter()
                .zip(factors)
                .map(|(n, r)| n / r)
                .collect())
        }
        None => {
            diags.push(Diagnostic::ResponseMissing);
            Ok(vec![0.0; spectrum.len()])
        }
    }
}

// ---------------------------------------------------------------------------
// Exposure
// ---------------------------------------------------------------------------

/// Result of one slit / order / integration.
enum Outcome {
    Extracted(SpectrumProduct),
    Skipped(Diagnostic),
}

fn product_name(name: &str) -> Option<String> {
    (name != ANY).then(|| name.to_string())
}

/// Resolve parameters, treating a missing match as fatal and a partial
/// match as a skip.
fn exact_parameters(
    reference: &ReferenceDescriptor,
    slit: &str,
    order: i32,
    overrides: &ExtractionOverrides,
    diags: &mut Diagnostics,
) -> Result<Option<ExtractionParameters>, ExtractError> {
    let params = resolve(reference, slit, order, overrides, diags)?;
    match params.match_quality {
        MatchQuality::Exact => Ok(Some(params)),
        MatchQuality::Partial => Ok(None),
        MatchQuality::NoMatch => {
            error!("missing extraction parameters for {} order {}", slit, order);
            Err(ExtractError::MissingParameters {
                slit: slit.to_string(),
                order,
            })
        }
    }
}

fn process_slit(
    slit: &SlitExposure,
    reference: &ReferenceDescriptor,
    overrides: &ExtractionOverrides,
) -> Result<Outcome, ExtractError> {
    info!("working on slit {}", slit.name);
    if slit.plane.data.is_empty() {
        return Ok(Outcome::Skipped(Diagnostic::EmptySlitSkipped {
            slit: slit.name.clone(),
        }));
    }

    let order = slit.spectral_order;
    let mut diags = Diagnostics::new();
    let Some(params) = exact_parameters(reference, &slit.name, order, overrides, &mut diags)? else {
        return Ok(Outcome::Skipped(Diagnostic::OrderSkipped {
            slit: slit.name.clone(),
            order,
        }));
    };

    let spectrum = match extract_one_trace(
        &slit.plane,
        slit.wcs.as_deref(),
        slit.target.as_ref(),
        &params,
        &slit.name,
        &mut diags,
    ) {
        Ok(spectrum) => spectrum,
        Err(e) if e.is_recoverable() => {
            return Ok(Outcome::Skipped(Diagnostic::InvalidOrderSkipped {
                slit: slit.name.clone(),
                order,
            }))
        }
        Err(e) => return Err(e),
    };

    let flux = calibrate(&spectrum, slit.response.as_ref(), &mut diags)?;
    Ok(Outcome::Extracted(SpectrumProduct {
        name: product_name(&slit.name),
        integration: None,
        source: Some(slit.source.clone()),
        spectrum,
        flux,
        diagnostics: diags,
    }))
}

fn process_image_order(
    image: &ImageExposure,
    name: &str,
    order: i32,
    reference: &ReferenceDescriptor,
    overrides: &ExtractionOverrides,
) -> Result<Vec<Outcome>, ExtractError> {
    let mut resolve_diags = Diagnostics::new();
    let Some(params) = exact_parameters(reference, name, order, overrides, &mut resolve_diags)? else {
        return Ok(vec![Outcome::Skipped(Diagnostic::OrderSkipped {
            slit: name.to_string(),
            order,
        })]);
    };

    let run = |plane: &SciencePlane, integration: Option<usize>| -> Result<SpectrumProduct, ExtractError> {
        let mut diags = resolve_diags.clone();
        let spectrum = extract_one_trace(
            plane,
            image.wcs.as_deref(),
            image.target.as_ref(),
            &params,
            name,
            &mut diags,
        )?;
        let flux = calibrate(&spectrum, image.response.as_ref(), &mut diags)?;
        Ok(SpectrumProduct {
            name: product_name(name),
            integration,
            source: None,
            spectrum,
            flux,
            diagnostics: diags,
        })
    };

    let results: Vec<Result<SpectrumProduct, ExtractError>> = match &image.layout {
        ImageLayout::Single(plane) => vec![run(plane, None)],
        ImageLayout::Integrations {
            data,
            dq,
            wavelength,
        } => {
            if let Some(dq) = dq {
                if dq.dim() != data.dim() {
                    let (_, ny, nx) = dq.dim();
                    let (_, eny, enx) = data.dim();
                    return Err(ExtractError::ShapeMismatch {
                        what: "dq",
                        found: (ny, nx),
                        expected: (eny, enx),
                    });
                }
            }
            info!("extracting {} integrations", data.len_of(Axis(0)));
            (0..data.len_of(Axis(0)))
                .into_par_iter()
                .map(|integ| {
                    let plane = SciencePlane {
                        data: data.index_axis(Axis(0), integ).to_owned(),
                        dq: dq.as_ref().map(|d| d.index_axis(Axis(0), integ).to_owned()),
                        wavelength: wavelength.clone(),
                    };
                    run(&plane, Some(integ))
                })
                .collect()
        }
    };

    let mut outcomes = Vec::with_capacity(results.len());
    for result in results {
        match result {
            Ok(product) => outcomes.push(Outcome::Extracted(product)),
            // The whole order is skipped when the transform rejects it.
            Err(e) if e.is_recoverable() => {
                return Ok(vec![Outcome::Skipped(Diagnostic::InvalidOrderSkipped {
                    slit: name.to_string(),
                    order,
                })]);
            }
            Err(e) => return Err(e),
        }
    }
    Ok(outcomes)
}

/// Extract every trace of `exposure`.
///
/// A slit or order with no matching reference entry aborts the exposure;
/// partial matches and orders the transform cannot handle are skipped and
/// reported in [`ExposureResult::skipped`].
pub fn extract_exposure(
    exposure: &Exposure,
    reference: &ReferenceDescriptor,
    overrides: &ExtractionOverrides,
) -> Result<ExposureResult, ExtractError> {
    let start = Instant::now();

    let outcomes: Vec<Outcome> = match exposure {
        Exposure::MultiSlit(slits) => {
            info!("extracting {} slits", slits.len());
            let results: Vec<Result<Outcome, ExtractError>> = slits
                .par_iter()
                .map(|slit| process_slit(slit, reference, overrides))
                .collect();
            results.into_iter().collect::<Result<_, _>>()?
        }
        Exposure::Image(image) => {
            let name = image.name.as_deref().unwrap_or(ANY);
            let mut all = Vec::new();
            for &order in &image.spectral_orders {
                all.extend(process_image_order(image, name, order, reference, overrides)?);
            }
            all
        }
    };

    let mut spectra = Vec::new();
    let mut skipped = Diagnostics::new();
    for outcome in outcomes {
        match outcome {
            Outcome::Extracted(product) => spectra.push(product),
            Outcome::Skipped(diag) => skipped.push(diag),
        }
    }
    if spectra.is_empty() {
        warn!("no spectra were extracted");
    }

    let elapsed = start.elapsed().as_millis() as u64;
    info!(
        "extraction complete in {} ms: {} spectra, {} skipped",
        elapsed,
        spectra.len(),
        skipped.len(),
    );

    Ok(ExposureResult {
        spectra,
        skipped,
        processing_time_ms: elapsed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ApertureSpec, OrderSpec};
    use crate::wcs::AffineWcs;

    fn aperture(id: &str, order: i32) -> ApertureSpec {
        ApertureSpec {
            id: Some(id.into()),
            spectral_order: Some(OrderSpec::Order(order)),
            dispaxis: Some(1),
            ystart: Some(3.0),
            ystop: Some(7.0),
            ..Default::default()
        }
    }

    #[test]
    fn flux_with_and_without_response() {
        let spectrum = ExtractedSpectrum {
            wavelength: vec![1.0, 2.0],
            net: vec![4.0, 6.0],
            background: vec![0.0, 0.0],
            dq: vec![0, 0],
            ra: 0.0,
            dec: 0.0,
            spectral_order: 1,
        };
        let mut diags = Diagnostics::new();
        assert_eq!(calibrate(&spectrum, None, &mut diags).unwrap(), vec![0.0, 0.0]);
        assert!(diags.any(|d| matches!(d, Diagnostic::ResponseMissing)));

        let curve = ResponseCurve::new(vec![1.0, 2.0], vec![2.0, 3.0]).unwrap();
        assert_eq!(
            calibrate(&spectrum, Some(&curve), &mut diags).unwrap(),
            vec![2.0, 2.0]
        );
    }

    #[test]
    fn shape_mismatch_rejected() {
        let mut plane = SciencePlane::new(Array2::ones((4, 4)));
        plane.dq = Some(Array2::zeros((3, 4)));
        let params = resolve(
            &ReferenceDescriptor::None,
            ANY,
            1,
            &ExtractionOverrides::default(),
            &mut Diagnostics::new(),
        )
        .unwrap();
        let err = extract_one_trace(&plane, None, None, &params, ANY, &mut Diagnostics::new())
            .unwrap_err();
        assert!(matches!(err, ExtractError::ShapeMismatch { what: "dq", .. }));

        let empty = SciencePlane::new(Array2::zeros((0, 4)));
        assert_eq!(
            extract_one_trace(&empty, None, None, &params, ANY, &mut Diagnostics::new()),
            Err(ExtractError::EmptyData(0, 4))
        );
    }

    #[test]
    fn partial_and_missing_matches() {
        let reference = ReferenceDescriptor::Parametric {
            apertures: vec![aperture("S1", 2)],
        };
        let slits = vec![SlitExposure::new("S1", SciencePlane::new(Array2::ones((10, 10))))];
        let result = extract_exposure(
            &Exposure::MultiSlit(slits),
            &reference,
            &ExtractionOverrides::default(),
        )
        .unwrap();
        assert!(result.spectra.is_empty());
        assert!(result
            .skipped
            .any(|d| matches!(d, Diagnostic::OrderSkipped { order: 1, .. })));

        let slits = vec![SlitExposure::new("S9", SciencePlane::new(Array2::ones((10, 10))))];
        let err = extract_exposure(
            &Exposure::MultiSlit(slits),
            &reference,
            &ExtractionOverrides::default(),
        )
        .unwrap_err();
        assert!(matches!(err, ExtractError::MissingParameters { .. }));
    }

    #[test]
    fn integrations_in_order() {
        let data = Array3::from_shape_fn((3, 10, 10), |(k, _, _)| (k + 1) as f32);
        let wcs = AffineWcs::new([0.0; 3], [0.0; 3], [1.0, 0.01, 0.0]);
        let mut image = ImageExposure::new(ImageLayout::Integrations {
            data,
            dq: None,
            wavelength: None,
        });
        image.wcs = Some(Arc::new(wcs));
        let reference = ReferenceDescriptor::Parametric {
            apertures: vec![aperture("ANY", 1)],
        };
        let result = extract_exposure(
            &Exposure::Image(image),
            &reference,
            &ExtractionOverrides::default(),
        )
        .unwrap();
        assert_eq!(result.spectra.len(), 3);
        for (k, product) in result.spectra.iter().enumerate() {
            assert_eq!(product.integration, Some(k));
            assert_eq!(product.name, None);
            assert!(product
                .spectrum
                .net
                .iter()
                .all(|&n| (n - 5.0 * (k + 1) as f64).abs() < 1e-9));
        }
        assert!(result.to_json().unwrap().contains("processing_time_ms"));
    }

    #[test]
    fn invalid_order_skips_whole_order() {
        let wcs = AffineWcs::new([0.0; 3], [0.0; 3], [1.0, 0.01, 0.0]).with_orders([1, 2]);
        let mut image = ImageExposure::new(ImageLayout::Single(SciencePlane::new(Array2::ones(
            (10, 10),
        ))));
        image.spectral_orders = vec![1, 2, 3];
        image.wcs = Some(Arc::new(wcs));
        let reference = ReferenceDescriptor::Parametric {
            apertures: vec![ApertureSpec {
                id: Some("ANY".into()),
                spectral_order: Some(OrderSpec::Named("ANY".into())),
                dispaxis: Some(1),
                ..Default::default()
            }],
        };
        let result = extract_exposure(
            &Exposure::Image(image),
            &reference,
            &ExtractionOverrides::default(),
        )
        .unwrap();
        let orders: Vec<i32> = result.spectra.iter().map(|p| p.spectrum.spectral_order).collect();
        assert_eq!(orders, vec![1, 2]);
        assert!(result
            .skipped
            .any(|d| matches!(d, Diagnostic::InvalidOrderSkipped { order: 3, .. })));
    }
}
