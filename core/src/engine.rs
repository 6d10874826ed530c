//! Extraction engines.
//!
//! Two structurally different algorithms sit behind the [`Extractor`]
//! trait:
//!
//! | Engine | Region description | Nod correction |
//! |--------|--------------------|----------------|
//! | [`ParametricEngine`] | pixel bounds or polynomial boundary pairs | added to bounds / constant terms |
//! | [`MaskEngine`] | signed mask image (source > 0, background < 0) | mask shifted by whole pixels |
//!
//! [`ExtractionModel`] selects one of them from the resolved parameters and
//! owns it for the duration of a single trace.

use log::debug;
use ndarray::{Array2, ArrayView2, Axis, Slice};

use crate::aperture::{compute_aperture, round_cross_bounds};
use crate::diagnostics::{Diagnostic, Diagnostics};
use crate::dispaxis::resolve_axis;
use crate::extract1d::{bxcar, extract1d};
use crate::params::{ExtractionParameters, ParametricRegion, ParamsError, Region};
use crate::poly::IntervalSet;
use crate::postprocess::{has_wavelengths, nans_at_endpoints, summarize_sky, SpectrumRows};
use crate::response::ResponseError;
use crate::types::{Aperture, DispersionAxis, IndependentVar, MaskImage, WorldCoord, SKY_SENTINEL};
use crate::wcs::{OrderedWcs, SpectralWcs};

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors raised while extracting a trace or an exposure.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExtractError {
    #[error("spectral order {0} is not valid")]
    InvalidSpectralOrder(i32),

    #[error("missing extraction parameters for '{slit}', spectral order {order}")]
    MissingParameters { slit: String, order: i32 },

    #[error("dispersion axis could not be determined")]
    UndeterminedDispersionAxis,

    #[error("{what} has shape {found:?}, expected {expected:?}")]
    ShapeMismatch {
        what: &'static str,
        found: (usize, usize),
        expected: (usize, usize),
    },

    #[error("input data has zero-length axis (shape: {0}×{1})")]
    EmptyData(usize, usize),

    #[error(transparent)]
    Params(#[from] ParamsError),

    #[error(transparent)]
    Response(#[from] ResponseError),
}

impl ExtractError {
    /// True for conditions that skip one order (or slit) rather than abort
    /// the whole exposure.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, ExtractError::InvalidSpectralOrder(_))
    }
}

// ---------------------------------------------------------------------------
// Engine contract
// ---------------------------------------------------------------------------

/// Rows and sky position extracted from one trace.
#[derive(Clone, Debug, PartialEq)]
pub struct TraceExtraction {
    pub ra: f64,
    pub dec: f64,
    pub rows: SpectrumRows,
}

/// Operations shared by both extraction engines.
pub trait Extractor {
    /// Cross-dispersion location of the trace before any nod correction.
    fn nominal_location(&self, middle: usize, middle_wavelength: f64) -> Option<f64>;

    /// Move the extraction region by `offset` pixels across the dispersion.
    fn apply_nod_correction(&mut self, offset: f64, diags: &mut Diagnostics);

    /// Extract `data`, a cleaned science plane.
    fn extract(
        &self,
        data: &Array2<f32>,
        wavelength: Option<&Array2<f64>>,
        diags: &mut Diagnostics,
    ) -> TraceExtraction;

    /// Log the working parameters at debug level.
    fn log_parameters(&self);
}

fn usable_wavelengths<'w>(
    wavelength: Option<&'w Array2<f64>>,
    shape: (usize, usize),
) -> Option<&'w Array2<f64>> {
    wavelength.filter(|wl| wl.dim() == shape && has_wavelengths(wl))
}

/// Replace NaN wavelengths by a harmless value for the kernel; returns the
/// copy and the number of NaNs.
fn mask_nan_wavelengths(wavelength: &[f64]) -> (Vec<f64>, usize) {
    let mut n_nan = 0;
    let temp = wavelength
        .iter()
        .map(|&w| {
            if w.is_nan() {
                n_nan += 1;
                0.01
            } else {
                w
            }
        })
        .collect();
    (temp, n_nan)
}

fn finish_rows(rows: SpectrumRows, diags: &mut Diagnostics) -> SpectrumRows {
    let n_nan = rows.wavelength.iter().filter(|w| w.is_nan()).count();
    if n_nan > 0 {
        nans_at_endpoints(rows, diags)
    } else {
        rows
    }
}

// ---------------------------------------------------------------------------
// Parametric engine
// ---------------------------------------------------------------------------

/// Extraction from pixel bounds or polynomial boundary pairs.
#[derive(Clone, Debug)]
pub struct ParametricEngine<'a> {
    axis: DispersionAxis,
    spectral_order: i32,
    aperture: Aperture,
    src: Option<IntervalSet>,
    bkg: Option<IntervalSet>,
    independent_var: IndependentVar,
    smoothing_length: u32,
    bkg_order: u32,
    nod_correction: f64,
    wcs: Option<OrderedWcs<'a>>,
}

impl<'a> ParametricEngine<'a> {
    /// Build the engine, resolving the aperture against the image and the
    /// transform's valid domain.  `shape` is `(ny, nx)`.
    pub fn new(
        mut region: ParametricRegion,
        params: &ExtractionParameters,
        axis: DispersionAxis,
        shape: (usize, usize),
        wcs: Option<OrderedWcs<'a>>,
        diags: &mut Diagnostics,
    ) -> Self {
        round_cross_bounds(&mut region, axis, diags);
        let bbox = wcs.and_then(|w| w.bounding_box());
        let mut aperture = compute_aperture(&region, shape, bbox.as_ref(), axis, diags);

        // Dispersion-direction limits are whole pixels.
        match axis {
            DispersionAxis::Horizontal => {
                aperture.xstart = aperture.xstart.round_ties_even();
                aperture.xstop = aperture.xstop.round_ties_even();
            }
            DispersionAxis::Vertical => {
                aperture.ystart = aperture.ystart.round_ties_even();
                aperture.ystop = aperture.ystop.round_ties_even();
            }
        }

        Self {
            axis,
            spectral_order: params.spectral_order,
            aperture,
            src: region.src,
            bkg: region.bkg,
            independent_var: region.independent_var,
            smoothing_length: params.smoothing_length,
            bkg_order: params.bkg_order,
            nod_correction: 0.0,
            wcs,
        }
    }

    pub fn aperture(&self) -> Aperture {
        self.aperture
    }

    pub fn source(&self) -> Option<&IntervalSet> {
        self.src.as_ref()
    }

    pub fn background(&self) -> Option<&IntervalSet> {
        self.bkg.as_ref()
    }

    /// Source boundary pairs used by the kernel.
    ///
    /// Without coefficients a single constant pair is built from the
    /// cross-dispersion bounds, widened by half a pixel on each side.
    pub fn source_limits(&self) -> IntervalSet {
        match &self.src {
            Some(src) => src.clone(),
            None => {
                let (lo, hi) = self.aperture.cross_limits(self.axis);
                IntervalSet::constant(lo - 0.5, hi + 0.5)
            }
        }
    }

    /// Wavelength per dispersion pixel, averaged over the window.
    ///
    /// Non-positive and NaN values are ignored; a pixel with no valid
    /// values gets NaN.
    fn wavelengths_from_array(
        &self,
        wl: &Array2<f64>,
        disp: (usize, usize),
        cross: (usize, usize),
    ) -> Vec<f64> {
        (disp.0..=disp.1)
            .map(|d| {
                let (sum, n) = (cross.0..=cross.1)
                    .map(|c| match self.axis {
                        DispersionAxis::Horizontal => wl[[c, d]],
                        DispersionAxis::Vertical => wl[[d, c]],
                    })
                    .filter(|w| *w > 0.0)
                    .fold((0.0, 0usize), |(s, n), w| (s + w, n + 1));
                if n == 0 {
                    f64::NAN
                } else {
                    sum / n as f64
                }
            })
            .collect()
    }
}

impl Extractor for ParametricEngine<'_> {
    fn nominal_location(&self, middle: usize, middle_wavelength: f64) -> Option<f64> {
        let Some(src) = &self.src else {
            let (lo, hi) = self.aperture.cross_limits(self.axis);
            return Some((lo + hi) / 2.0);
        };
        let x = match self.independent_var {
            IndependentVar::Pixel => middle as f64,
            IndependentVar::Wavelength => middle_wavelength,
        };
        let (sum_data, sum_weights) = src
            .evaluate(x)
            .into_iter()
            .fold((0.0, 0.0), |(sd, sw), (lower, upper)| {
                let weight = upper - lower;
                (sd + weight * (lower + upper) / 2.0, sw + weight)
            });
        if sum_weights == 0.0 {
            None
        } else {
            Some(sum_data / sum_weights)
        }
    }

    fn apply_nod_correction(&mut self, offset: f64, diags: &mut Diagnostics) {
        if offset == 0.0 {
            return;
        }
        self.nod_correction += offset;
        diags.push(Diagnostic::NodOffsetApplied { offset });

        match &mut self.src {
            Some(src) => src.shift(offset),
            None => match self.axis {
                DispersionAxis::Horizontal => {
                    self.aperture.ystart += offset;
                    self.aperture.ystop += offset;
                }
                DispersionAxis::Vertical => {
                    self.aperture.xstart += offset;
                    self.aperture.xstop += offset;
                }
            },
        }
        if let Some(bkg) = &mut self.bkg {
            bkg.shift(offset);
        }
    }

    fn extract(
        &self,
        data: &Array2<f32>,
        wavelength: Option<&Array2<f64>>,
        diags: &mut Diagnostics,
    ) -> TraceExtraction {
        let shape = data.dim();
        let (d0, d1) = self.aperture.dispersion_limits(self.axis);
        let (c0, c1) = self.aperture.cross_limits(self.axis);
        let slice0 = d0.max(0.0) as usize;
        let slice1 = d1.max(d0).max(0.0) as usize;
        let n_cross = match self.axis {
            DispersionAxis::Horizontal => shape.0,
            DispersionAxis::Vertical => shape.1,
        };
        let last_cross = n_cross.saturating_sub(1) as f64;
        let cross = (
            c0.round_ties_even().clamp(0.0, last_cross) as usize,
            c1.round_ties_even().clamp(0.0, last_cross) as usize,
        );

        let mut wl_out = usable_wavelengths(wavelength, shape).map(|wl| {
            debug!("wavelengths are from the wavelength array");
            self.wavelengths_from_array(wl, (slice0, slice1), cross)
        });

        // Sky position along the middle of the window.
        let (ra, dec) = match &self.wcs {
            Some(wcs) => {
                let mid = (c0 + c1) / 2.0;
                let samples: Vec<WorldCoord> = (slice0..=slice1)
                    .map(|d| match self.axis {
                        DispersionAxis::Horizontal => wcs.eval(d as f64, mid),
                        DispersionAxis::Vertical => wcs.eval(mid, d as f64),
                    })
                    .collect();
                if wl_out.is_none() {
                    debug!("wavelengths are from the WCS");
                    wl_out = Some(samples.iter().map(|w| w.wavelength).collect());
                }
                let sky: Vec<(f64, f64)> = samples.iter().map(|w| (w.ra, w.dec)).collect();
                summarize_sky(&sky, false, diags)
            }
            None => {
                diags.push(Diagnostic::WcsMissing);
                (SKY_SENTINEL, SKY_SENTINEL)
            }
        };

        let wl_out = wl_out.unwrap_or_else(|| {
            diags.push(Diagnostic::WavelengthsSynthesized);
            let n = slice1 - slice0 + 1;
            if slice0 == 0 {
                (1..=n).map(|v| v as f64).collect()
            } else {
                (slice0..=slice1).map(|v| v as f64).collect()
            }
        });

        let (temp_wl, n_nan) = mask_nan_wavelengths(&wl_out);
        if n_nan > 0 {
            diags.push(Diagnostic::WavelengthNans { count: n_nan });
        }

        let image: ArrayView2<'_, f32> = match self.axis {
            DispersionAxis::Horizontal => data.view(),
            DispersionAxis::Vertical => data.t(),
        };
        let src = self.source_limits();
        let (net, background) = extract1d(
            image,
            &temp_wl,
            (slice0, slice1 + 1),
            &src,
            self.bkg.as_ref(),
            self.independent_var,
            self.smoothing_length,
            self.bkg_order,
        );

        let rows = finish_rows(SpectrumRows::new(wl_out, net, background), diags);
        TraceExtraction { ra, dec, rows }
    }

    fn log_parameters(&self) {
        debug!("nod_correction = {}", self.nod_correction);
        debug!("dispaxis = {:?}, spectral order = {}", self.axis, self.spectral_order);
        let a = &self.aperture;
        let note = if self.src.is_some() { " (not used; src coefficients given)" } else { "" };
        debug!("aperture x = {}..{}, y = {}..{}{}", a.xstart, a.xstop, a.ystart, a.ystop, note);
        if let Some(src) = &self.src {
            debug!("src_coeff = {:?}", src.to_coefficients());
        }
        if let Some(bkg) = &self.bkg {
            debug!("bkg_coeff = {:?}", bkg.to_coefficients());
        }
    }
}

// ---------------------------------------------------------------------------
// Image-mask engine
// ---------------------------------------------------------------------------

/// Extraction from a signed reference image.
#[derive(Clone, Debug)]
pub struct MaskEngine<'a> {
    axis: DispersionAxis,
    spectral_order: i32,
    mask: Array2<f32>,
    smoothing_length: u32,
    nod_correction: f64,
    wcs: Option<OrderedWcs<'a>>,
}

impl<'a> MaskEngine<'a> {
    pub fn new(
        image: MaskImage,
        params: &ExtractionParameters,
        axis: DispersionAxis,
        wcs: Option<OrderedWcs<'a>>,
    ) -> Self {
        Self {
            axis,
            spectral_order: params.spectral_order,
            mask: image.data,
            smoothing_length: params.smoothing_length,
            nod_correction: 0.0,
            wcs,
        }
    }

    pub fn mask(&self) -> &Array2<f32> {
        &self.mask
    }

    fn cross_axis(&self) -> Axis {
        match self.axis {
            DispersionAxis::Horizontal => Axis(0),
            DispersionAxis::Vertical => Axis(1),
        }
    }

    fn disp_axis(&self) -> Axis {
        match self.axis {
            DispersionAxis::Horizontal => Axis(1),
            DispersionAxis::Vertical => Axis(0),
        }
    }

    /// Zero-pad or crop the mask at the origin to `shape`.
    pub fn match_shape(&self, shape: (usize, usize)) -> Array2<f32> {
        if self.mask.dim() == shape {
            return self.mask.clone();
        }
        let mut out = Array2::<f32>::zeros(shape);
        let ny = shape.0.min(self.mask.nrows());
        let nx = shape.1.min(self.mask.ncols());
        out.slice_mut(ndarray::s![..ny, ..nx])
            .assign(&self.mask.slice(ndarray::s![..ny, ..nx]));
        out
    }
}

impl Extractor for MaskEngine<'_> {
    fn nominal_location(&self, middle: usize, _middle_wavelength: f64) -> Option<f64> {
        if middle >= self.mask.len_of(self.disp_axis()) {
            return None;
        }
        let line = self.mask.index_axis(self.disp_axis(), middle);
        let (num, den) = line
            .iter()
            .enumerate()
            .filter(|&(_, &v)| v > 0.0)
            .fold((0.0, 0.0), |(num, den), (i, _)| (num + i as f64, den + 1.0));
        if den > 0.0 {
            Some(num / den)
        } else {
            None
        }
    }

    fn apply_nod_correction(&mut self, offset: f64, diags: &mut Diagnostics) {
        if offset == 0.0 {
            return;
        }
        let ishift = offset.round_ties_even() as i64;
        if ishift as f64 != offset {
            diags.push(Diagnostic::NodOffsetRounded {
                from: offset,
                to: ishift,
            });
        }
        let axis = self.cross_axis();
        let extent = self.mask.len_of(axis) as i64;
        if ishift.abs() >= extent {
            diags.push(Diagnostic::NodOffsetTooLarge { offset: ishift });
            return;
        }
        if ishift == 0 {
            return;
        }

        let n = extent as isize;
        let k = ishift as isize;
        let mut shifted = Array2::<f32>::zeros(self.mask.dim());
        let (dst, src) = if k > 0 {
            (Slice::from(k..n), Slice::from(0..n - k))
        } else {
            (Slice::from(0..n + k), Slice::from(-k..n))
        };
        shifted
            .slice_axis_mut(axis, dst)
            .assign(&self.mask.slice_axis(axis, src));
        self.mask = shifted;
        self.nod_correction += ishift as f64;
        diags.push(Diagnostic::NodOffsetApplied {
            offset: ishift as f64,
        });
    }

    fn extract(
        &self,
        data: &Array2<f32>,
        wavelength: Option<&Array2<f64>>,
        diags: &mut Diagnostics,
    ) -> TraceExtraction {
        let shape = data.dim();
        let mask = self.match_shape(shape);
        let disp_axis = self.disp_axis();
        let n_disp = data.len_of(disp_axis);
        let has_bkg = mask.iter().any(|&v| v < 0.0);

        let mut gross = Vec::with_capacity(n_disp);
        let mut bkg_sum = Vec::with_capacity(n_disp);
        let mut n_target = Vec::with_capacity(n_disp);
        let mut n_bkg = Vec::with_capacity(n_disp);
        let mut trace = Vec::with_capacity(n_disp);
        for (line, mline) in data.axis_iter(disp_axis).zip(mask.axis_iter(disp_axis)) {
            let (mut g, mut b, mut nt, mut nb, mut gsum) = (0.0, 0.0, 0.0, 0.0, 0.0);
            for (i, (&v, &m)) in line.iter().zip(mline.iter()).enumerate() {
                if m > 0.0 {
                    g += v as f64;
                    nt += 1.0;
                    gsum += i as f64;
                } else if m < 0.0 {
                    b += v as f64;
                    nb += 1.0;
                }
            }
            gross.push(g);
            bkg_sum.push(b);
            n_target.push(nt);
            n_bkg.push(nb);
            let f_sum = if nt > 0.0 { nt } else { 1.0 };
            trace.push(gsum / f_sum);
        }

        let (net, background): (Vec<f64>, Vec<f64>) = if has_bkg {
            let smoothed = if self.smoothing_length > 1 {
                bxcar(&bkg_sum, self.smoothing_length)
            } else {
                bkg_sum
            };
            let background: Vec<f64> = smoothed
                .iter()
                .zip(n_target.iter().zip(&n_bkg))
                .map(|(&b, (&nt, &nb))| if nb > 0.0 { b * nt / nb } else { 0.0 })
                .collect();
            let net = gross.iter().zip(&background).map(|(g, b)| g - b).collect();
            (net, background)
        } else {
            (gross, vec![0.0; n_disp])
        };

        // Columns with no source pixels are dropped from the ends only.
        let first = n_target.iter().position(|&n| n > 0.0);
        let last = n_target.iter().rposition(|&n| n > 0.0);
        let keep = match (first, last) {
            (Some(f), Some(l)) => f..l + 1,
            _ => 0..n_disp,
        };

        // Pixel coordinates of the trace.
        let coords: Vec<(f64, f64)> = keep
            .clone()
            .map(|d| match self.axis {
                DispersionAxis::Horizontal => (d as f64, trace[d]),
                DispersionAxis::Vertical => (trace[d], d as f64),
            })
            .collect();

        let mut wl_out = usable_wavelengths(wavelength, shape).map(|wl| {
            debug!("wavelengths are from the wavelength array");
            let (ny, nx) = shape;
            coords
                .iter()
                .map(|&(x, y)| {
                    let ix = (x.round_ties_even().max(0.0) as usize).min(nx - 1);
                    let iy = (y.round_ties_even().max(0.0) as usize).min(ny - 1);
                    wl[[iy, ix]]
                })
                .collect::<Vec<f64>>()
        });

        let (ra, dec) = match &self.wcs {
            Some(wcs) => {
                let samples: Vec<WorldCoord> = coords.iter().map(|&(x, y)| wcs.eval(x, y)).collect();
                if wl_out.is_none() {
                    debug!("wavelengths are from the WCS");
                    wl_out = Some(samples.iter().map(|w| w.wavelength).collect());
                }
                let sky: Vec<(f64, f64)> = samples.iter().map(|w| (w.ra, w.dec)).collect();
                summarize_sky(&sky, true, diags)
            }
            None => {
                diags.push(Diagnostic::WcsMissing);
                (SKY_SENTINEL, SKY_SENTINEL)
            }
        };

        let wl_out = wl_out.unwrap_or_else(|| {
            diags.push(Diagnostic::WavelengthsSynthesized);
            keep.clone().map(|d| d as f64).collect()
        });

        let (_, n_nan) = mask_nan_wavelengths(&wl_out);
        if n_nan > 0 {
            diags.push(Diagnostic::WavelengthNans { count: n_nan });
        }

        let rows = SpectrumRows::new(
            wl_out,
            net[keep.clone()].to_vec(),
            background[keep].to_vec(),
        );
        let rows = finish_rows(rows, diags);
        TraceExtraction { ra, dec, rows }
    }

    fn log_parameters(&self) {
        debug!("using a reference image that defines extraction regions");
        debug!("dispaxis = {:?}", self.axis);
        debug!("spectral order = {}", self.spectral_order);
        debug!("smoothing_length = {}", self.smoothing_length);
        debug!("nod_correction = {}", self.nod_correction);
    }
}

// ---------------------------------------------------------------------------
// ExtractionModel
// ---------------------------------------------------------------------------

/// The engine selected for one trace.
#[derive(Clone, Debug)]
pub enum ExtractionModel<'a> {
    Parametric(ParametricEngine<'a>),
    ImageMask(MaskEngine<'a>),
}

impl<'a> ExtractionModel<'a> {
    /// Specialise the transform to the order, settle the dispersion axis and
    /// build the engine the reference calls for.
    ///
    /// `shape` is `(ny, nx)` of the science plane.
    pub fn build(
        params: &ExtractionParameters,
        slit: &str,
        wcs: Option<&'a dyn SpectralWcs>,
        wavelength: Option<&Array2<f64>>,
        shape: (usize, usize),
        diags: &mut Diagnostics,
    ) -> Result<Self, ExtractError> {
        let order = params.spectral_order;
        let region = params
            .region
            .as_ref()
            .ok_or_else(|| ExtractError::MissingParameters {
                slit: slit.to_string(),
                order,
            })?;
        let wcs = wcs
            .map(|w| OrderedWcs::new(w, order))
            .transpose()
            .map_err(|_| ExtractError::InvalidSpectralOrder(order))?;
        let axis = resolve_axis(wcs.as_ref(), wavelength, shape, params.dispaxis, diags)
            .ok_or(ExtractError::UndeterminedDispersionAxis)?;

        Ok(match region {
            Region::Parametric(region) => ExtractionModel::Parametric(ParametricEngine::new(
                region.clone(),
                params,
                axis,
                shape,
                wcs,
                diags,
            )),
            Region::ImageMask(image) => {
                ExtractionModel::ImageMask(MaskEngine::new(image.clone(), params, axis, wcs))
            }
        })
    }

    pub fn axis(&self) -> DispersionAxis {
        match self {
            ExtractionModel::Parametric(e) => e.axis,
            ExtractionModel::ImageMask(e) => e.axis,
        }
    }

    pub fn wcs(&self) -> Option<OrderedWcs<'a>> {
        match self {
            ExtractionModel::Parametric(e) => e.wcs,
            ExtractionModel::ImageMask(e) => e.wcs,
        }
    }

    fn inner(&self) -> &dyn Extractor {
        match self {
            ExtractionModel::Parametric(e) => e,
            ExtractionModel::ImageMask(e) => e,
        }
    }

    fn inner_mut(&mut self) -> &mut dyn Extractor {
        match self {
            ExtractionModel::Parametric(e) => e,
            ExtractionModel::ImageMask(e) => e,
        }
    }
}

impl Extractor for ExtractionModel<'_> {
    fn nominal_location(&self, middle: usize, middle_wavelength: f64) -> Option<f64> {
        self.inner().nominal_location(middle, middle_wavelength)
    }

    fn apply_nod_correction(&mut self, offset: f64, diags: &mut Diagnostics) {
        self.inner_mut().apply_nod_correction(offset, diags)
    }

    fn extract(
        &self,
        data: &Array2<f32>,
        wavelength: Option<&Array2<f64>>,
        diags: &mut Diagnostics,
    ) -> TraceExtraction {
        self.inner().extract(data, wavelength, diags)
    }

    fn log_parameters(&self) {
        self.inner().log_parameters()
    }
}
