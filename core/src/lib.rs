//! # specextract-core
//!
//! One-dimensional spectral extraction from 2-D detector images, with
//! optional Python bindings via [PyO3](https://pyo3.rs).
//!
//! ## Overview
//!
//! | Module          | Purpose                                                   |
//! |-----------------|-----------------------------------------------------------|
//! | [`types`]       | Shared data structures (reference entries, apertures, output) |
//! | [`diagnostics`] | Non-fatal decisions recorded during an extraction        |
//! | [`wcs`]         | Pixel-to-world transform seam                             |
//! | [`poly`]        | Polynomial boundary pairs for source/background regions   |
//! | [`params`]      | Selects reference parameters for a slit and order         |
//! | [`dispaxis`]    | Settles which image axis is the dispersion direction      |
//! | [`aperture`]    | Rectangular aperture geometry and clipping                |
//! | [`locate`]      | Finds the trace from the target's sky position            |
//! | [`extract1d`]   | Weighted row sums and polynomial background fits          |
//! | [`postprocess`] | Bad-pixel replacement, NaN trimming, sky position         |
//! | [`response`]    | Response-curve interpolation for flux calibration         |
//! | [`engine`]      | Parametric and image-mask extraction engines              |
//! | [`pipeline`]    | Runs slits, orders and integrations of an exposure        |
//!
//! ## Rust usage
//!
//! ```no_run
//! use ndarray::Array2;
//! use specextract_core::{
//!     extract_exposure, Exposure, ExtractionOverrides, ImageExposure, ImageLayout,
//!     ReferenceDescriptor, SciencePlane,
//! };
//!
//! let reference = ReferenceDescriptor::from_json(
//!     r#"{"apertures": [{"id": "ANY", "dispaxis": 1, "ystart": 3, "ystop": 7}]}"#,
//! )?;
//! let image = ImageExposure::new(ImageLayout::Single(SciencePlane::new(Array2::ones((10, 10)))));
//! let result = extract_exposure(&Exposure::Image(image), &reference, &ExtractionOverrides::default())?;
//! for product in &result.spectra {
//!     println!("{:?}", product.spectrum.net);
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Python usage
//!
//! Built with the `python` feature, the library exposes a module called
//! `specextract_core`:
//!
//! ```python
//! import specextract_core as sx
//!
//! spectra, report = sx.extract_image(data.ravel().tolist(), ny, nx, reference=aperture_json)
//! ```

pub mod aperture;
pub mod diagnostics;
pub mod dispaxis;
pub mod engine;
pub mod extract1d;
pub mod locate;
pub mod params;
pub mod pipeline;
pub mod poly;
pub mod postprocess;
pub mod response;
pub mod types;
pub mod wcs;

#[cfg(feature = "python")]
mod python;

// Re-export the most commonly used items at crate root for convenience.
pub use diagnostics::{Diagnostic, Diagnostics};
pub use engine::{ExtractError, ExtractionModel, Extractor};
pub use params::{resolve, ExtractionParameters};
pub use pipeline::{
    extract_exposure, extract_one_trace, Exposure, ExposureResult, ImageExposure, ImageLayout,
    SciencePlane, SlitExposure, SourceInfo, SpectrumProduct,
};
pub use response::ResponseCurve;
pub use types::{
    ApertureSpec, DispersionAxis, ExtractedSpectrum, ExtractionOverrides, MaskImage,
    ReferenceDescriptor, Target,
};
pub use wcs::{AffineWcs, BoundingBox, SpectralWcs};
