use crate::error::RangePlateError;
use crate::geometry::{Bounds, RangeGeometry};

pub const DEFAULT_BUFFER_DEG: f64 = 8.0;

/// Rectangular map window in degrees. `xmin < xmax` and `ymin < ymax` always hold.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Extent {
    xmin: f64,
    xmax: f64,
    ymin: f64,
    ymax: f64,
}

impl Extent {
    pub fn new(xmin: f64, xmax: f64, ymin: f64, ymax: f64) -> Result<Self, RangePlateError> {
        let bounds = Bounds {
            xmin,
            xmax,
            ymin,
            ymax,
        };
        if bounds.is_degenerate() {
            return Err(RangePlateError::InvalidGeometry(format!(
                "degenerate extent x=[{xmin}, {xmax}] y=[{ymin}, {ymax}]"
            )));
        }
        Ok(Self {
            xmin,
            xmax,
            ymin,
            ymax,
        })
    }

    pub fn xmin(&self) -> f64 {
        self.xmin
    }

    pub fn xmax(&self) -> f64 {
        self.xmax
    }

    pub fn ymin(&self) -> f64 {
        self.ymin
    }

    pub fn ymax(&self) -> f64 {
        self.ymax
    }

    pub fn lon_span(&self) -> f64 {
        self.xmax - self.xmin
    }

    pub fn lat_span(&self) -> f64 {
        self.ymax - self.ymin
    }

    pub fn center(&self) -> (f64, f64) {
        ((self.xmin + self.xmax) / 2.0, (self.ymin + self.ymax) / 2.0)
    }

    pub fn bounds(&self) -> Bounds {
        Bounds {
            xmin: self.xmin,
            xmax: self.xmax,
            ymin: self.ymin,
            ymax: self.ymax,
        }
    }
}

/// Pads the range's bounding box by `buffer_deg` and snaps outward to whole degrees.
pub fn compute_extent(range: &RangeGeometry, buffer_deg: f64) -> Result<Extent, RangePlateError> {
    if !buffer_deg.is_finite() || buffer_deg < 0.0 {
        return Err(RangePlateError::InvalidConfiguration(format!(
            "extent buffer must be a non-negative number of degrees, got {buffer_deg}"
        )));
    }
    let raw = range.bounds().ok_or_else(|| {
        RangePlateError::InvalidGeometry("range geometry has no finite bounding box".to_string())
    })?;
    if raw.is_degenerate() {
        return Err(RangePlateError::InvalidGeometry(format!(
            "range bounding box is degenerate: x=[{}, {}] y=[{}, {}]",
            raw.xmin, raw.xmax, raw.ymin, raw.ymax
        )));
    }
    let padded = raw.buffered(buffer_deg);
    Extent::new(
        padded.xmin.floor(),
        padded.xmax.ceil(),
        padded.ymin.floor(),
        padded.ymax.ceil(),
    )
}
