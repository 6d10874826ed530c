//! Coordinate-transform interface consumed by the extraction engines.
//!
//! The instrument model maps detector pixels to `(ra, dec, wavelength)`.
//! Only two capabilities are needed here: evaluate the forward transform at
//! a pixel (optionally specialised to a spectral order) and report the pixel
//! domain over which it is valid.  [`AffineWcs`] is a concrete linear model
//! used for synthetic exposures.

use std::collections::BTreeSet;

use crate::types::WorldCoord;

/// Errors raised by a coordinate transform.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum WcsError {
    #[error("spectral order {0} is not valid for this transform")]
    InvalidOrder(i32),
}

/// Inclusive pixel domain `((x0, x1), (y0, y1))` of a transform.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoundingBox {
    pub x: (f64, f64),
    pub y: (f64, f64),
}

impl BoundingBox {
    pub fn new(x: (f64, f64), y: (f64, f64)) -> Self {
        Self { x, y }
    }
}

/// Pixel → world transform with a queryable valid domain.
///
/// Implementations return NaN components outside their domain.
pub trait SpectralWcs: Send + Sync {
    /// Evaluate the transform at pixel `(x, y)` for `order`.
    fn forward(&self, x: f64, y: f64, order: i32) -> WorldCoord;

    /// Valid pixel domain, if the transform defines one.
    fn bounding_box(&self) -> Option<BoundingBox> {
        None
    }

    /// Whether the transform can be specialised to `order`.
    fn check_order(&self, _order: i32) -> Result<(), WcsError> {
        Ok(())
    }
}

/// A transform bound to one spectral order.
#[derive(Clone, Copy)]
pub struct OrderedWcs<'a> {
    wcs: &'a dyn SpectralWcs,
    order: i32,
}

impl<'a> OrderedWcs<'a> {
    /// Specialise `wcs` to `order`, failing when the order is unsupported.
    pub fn new(wcs: &'a dyn SpectralWcs, order: i32) -> Result<Self, WcsError> {
        wcs.check_order(order)?;
        Ok(Self { wcs, order })
    }

    pub fn eval(&self, x: f64, y: f64) -> WorldCoord {
        self.wcs.forward(x, y, self.order)
    }

    pub fn bounding_box(&self) -> Option<BoundingBox> {
        self.wcs.bounding_box()
    }

    pub fn order(&self) -> i32 {
        self.order
    }
}

impl std::fmt::Debug for OrderedWcs<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrderedWcs")
            .field("order", &self.order)
            .field("bounding_box", &self.wcs.bounding_box())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// AffineWcs
// ---------------------------------------------------------------------------

/// Linear pixel → world model.
///
/// Each world coordinate is `c0 + cx * x + cy * y`.  Outside the bounding
/// box (when one is set) every component is NaN.
#[derive(Clone, Debug, PartialEq)]
pub struct AffineWcs {
    pub ra: [f64; 3],
    pub dec: [f64; 3],
    pub wavelength: [f64; 3],
    pub bounding_box: Option<BoundingBox>,
    /// Orders accepted by [`SpectralWcs::check_order`]; empty accepts all.
    pub valid_orders: BTreeSet<i32>,
}

impl AffineWcs {
    pub fn new(ra: [f64; 3], dec: [f64; 3], wavelength: [f64; 3]) -> Self {
        Self {
            ra,
            dec,
            wavelength,
            bounding_box: None,
            valid_orders: BTreeSet::new(),
        }
    }

    pub fn with_bounding_box(mut self, bbox: BoundingBox) -> Self {
        self.bounding_box = Some(bbox);
        self
    }

    pub fn with_orders(mut self, orders: impl IntoIterator<Item = i32>) -> Self {
        self.valid_orders = orders.into_iter().collect();
        self
    }

    fn inside(&self, x: f64, y: f64) -> bool {
        match self.bounding_box {
            Some(bb) => x >= bb.x.0 && x <= bb.x.1 && y >= bb.y.0 && y <= bb.y.1,
            None => true,
        }
    }
}

fn affine(c: &[f64; 3], x: f64, y: f64) -> f64 {
    c[0] + c[1] * x + c[2] * y
}

impl SpectralWcs for AffineWcs {
    fn forward(&self, x: f64, y: f64, _order: i32) -> WorldCoord {
        if !self.inside(x, y) {
            return WorldCoord::NAN;
        }
        WorldCoord {
            ra: affine(&self.ra, x, y),
            dec: affine(&self.dec, x, y),
            wavelength: affine(&self.wavelength, x, y),
        }
    }

    fn bounding_box(&self) -> Option<BoundingBox> {
        self.bounding_box
    }

    fn check_order(&self, order: i32) -> Result<(), WcsError> {
        if self.valid_orders.is_empty() || self.valid_orders.contains(&order) {
            Ok(())
        } else {
            Err(WcsError::InvalidOrder(order))
        }
    }
}
