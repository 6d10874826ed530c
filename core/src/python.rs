//! Python bindings.
//!
//! Arrays cross the boundary as flat row-major `Vec`s plus a shape, so they
//! can be reshaped with numpy on the Python side.

use std::sync::Arc;

use ndarray::Array2;
use pyo3::exceptions::{PyRuntimeError, PyValueError};
use pyo3::prelude::*;

use crate::diagnostics::Diagnostics;
use crate::pipeline::{extract_exposure, Exposure, ImageExposure, ImageLayout, SciencePlane};
use crate::response::ResponseCurve;
use crate::types::{ExtractedSpectrum, ExtractionOverrides, ReferenceDescriptor, Target};
use crate::wcs::{AffineWcs, BoundingBox, SpectralWcs};

fn value_error(e: impl std::fmt::Display) -> PyErr {
    PyValueError::new_err(e.to_string())
}

/// Affine pixel-to-world transform usable from Python.
#[pyclass(name = "AffineWcs")]
#[derive(Clone)]
pub struct PyAffineWcs {
    inner: AffineWcs,
}

#[pymethods]
impl PyAffineWcs {
    #[new]
    #[pyo3(signature = (ra, dec, wavelength, bounding_box=None, orders=None))]
    fn new(
        ra: [f64; 3],
        dec: [f64; 3],
        wavelength: [f64; 3],
        bounding_box: Option<((f64, f64), (f64, f64))>,
        orders: Option<Vec<i32>>,
    ) -> Self {
        let mut inner = AffineWcs::new(ra, dec, wavelength);
        if let Some((x, y)) = bounding_box {
            inner = inner.with_bounding_box(BoundingBox::new(x, y));
        }
        if let Some(orders) = orders {
            inner = inner.with_orders(orders);
        }
        Self { inner }
    }

    fn __repr__(&self) -> String {
        format!(
            "AffineWcs(wavelength={:?}, bounding_box={:?})",
            self.inner.wavelength, self.inner.bounding_box
        )
    }
}

/// Extract every requested order from one 2-D image.
///
/// `reference` is a JSON aperture table; `None` extracts the whole image.
/// Returns the spectra and the result serialised as JSON.
#[pyfunction]
#[pyo3(signature = (data, ny, nx, reference=None, wcs=None, target=None, spectral_orders=vec![1], response=None, smoothing_length=None, bkg_order=None))]
#[allow(clippy::too_many_arguments)]
fn extract_image(
    py: Python<'_>,
    data: Vec<f32>,
    ny: usize,
    nx: usize,
    reference: Option<&str>,
    wcs: Option<PyAffineWcs>,
    target: Option<(f64, f64)>,
    spectral_orders: Vec<i32>,
    response: Option<(Vec<f64>, Vec<f64>)>,
    smoothing_length: Option<u32>,
    bkg_order: Option<u32>,
) -> PyResult<(Vec<ExtractedSpectrum>, String)> {
    let data = Array2::from_shape_vec((ny, nx), data).map_err(value_error)?;
    let reference = match reference {
        Some(text) => ReferenceDescriptor::from_json(text).map_err(value_error)?,
        None => ReferenceDescriptor::None,
    };
    let response = response
        .map(|(w, r)| ResponseCurve::new(w, r))
        .transpose()
        .map_err(value_error)?;

    let mut image = ImageExposure::new(ImageLayout::Single(SciencePlane::new(data)));
    image.spectral_orders = spectral_orders;
    image.wcs = wcs.map(|w| Arc::new(w.inner) as Arc<dyn SpectralWcs>);
    image.target = target.map(|(ra, dec)| Target { ra, dec });
    image.response = response;
    let overrides = ExtractionOverrides {
        smoothing_length,
        bkg_order,
    };

    let exposure = Exposure::Image(image);
    let result = py
        .allow_threads(|| extract_exposure(&exposure, &reference, &overrides))
        .map_err(|e| PyRuntimeError::new_err(e.to_string()))?;
    let json = result.to_json().map_err(|e| PyRuntimeError::new_err(e.to_string()))?;
    let spectra = result.spectra.into_iter().map(|p| p.spectrum).collect();
    Ok((spectra, json))
}

/// Interpolate a response table at `wavelengths` (micrometres).
#[pyfunction]
fn interpolate_response(
    wavelength: Vec<f64>,
    response: Vec<f64>,
    wavelengths: Vec<f64>,
) -> PyResult<Vec<f64>> {
    let curve = ResponseCurve::new(wavelength, response).map_err(value_error)?;
    curve
        .interpolate(&wavelengths, &mut Diagnostics::new())
        .map_err(value_error)
}

/// The top-level Python module exposed by this crate.
///
/// Registered items:
/// - `AffineWcs`: linear pixel-to-world transform
/// - `ExtractedSpectrum`: one extracted trace
/// - `extract_image`: run the pipeline on a single image
/// - `interpolate_response`: evaluate a response table
#[pymodule]
fn specextract_core(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_class::<PyAffineWcs>()?;
    m.add_class::<ExtractedSpectrum>()?;
    m.add_function(wrap_pyfunction!(extract_image, m)?)?;
    m.add_function(wrap_pyfunction!(interpolate_response, m)?)?;

    m.add("__version__", "0.1.0")?;
    m.add("__doc__", "Spectral extraction core.")?;

    Ok(())
}
