use crate::error::RangePlateError;
use geo::{
    Area, BooleanOps, BoundingRect, Centroid, Coord, CoordsIter, Intersects, LineString,
    MultiPolygon, Polygon,
};

/// Axis-aligned bounds in degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub xmin: f64,
    pub xmax: f64,
    pub ymin: f64,
    pub ymax: f64,
}

impl Bounds {
    pub fn width(&self) -> f64 {
        self.xmax - self.xmin
    }

    pub fn height(&self) -> f64 {
        self.ymax - self.ymin
    }

    pub fn is_finite(&self) -> bool {
        self.xmin.is_finite() && self.xmax.is_finite() && self.ymin.is_finite() && self.ymax.is_finite()
    }

    /// NaN-valued or zero-area bounds. A single point or a straight line is degenerate.
    pub fn is_degenerate(&self) -> bool {
        !self.is_finite() || !(self.width() > 0.0) || !(self.height() > 0.0)
    }

    pub fn buffered(&self, distance: f64) -> Bounds {
        Bounds {
            xmin: self.xmin - distance,
            xmax: self.xmax + distance,
            ymin: self.ymin - distance,
            ymax: self.ymax + distance,
        }
    }

    pub fn contains_bounds(&self, other: &Bounds) -> bool {
        self.xmin <= other.xmin
            && self.xmax >= other.xmax
            && self.ymin <= other.ymin
            && self.ymax >= other.ymax
    }

    pub fn to_polygon(&self) -> Polygon<f64> {
        Polygon::new(
            LineString::from(vec![
                (self.xmin, self.ymin),
                (self.xmax, self.ymin),
                (self.xmax, self.ymax),
                (self.xmin, self.ymax),
                (self.xmin, self.ymin),
            ]),
            Vec::new(),
        )
    }
}

/// A species distribution. Never mutated after construction; repair yields a new value.
#[derive(Debug, Clone, PartialEq)]
pub struct RangeGeometry {
    shape: MultiPolygon<f64>,
}

impl RangeGeometry {
    pub fn new(shape: MultiPolygon<f64>) -> Result<Self, RangePlateError> {
        let has_ring = shape
            .0
            .iter()
            .any(|polygon| polygon.exterior().0.len() >= 3);
        if !has_ring {
            return Err(RangePlateError::InvalidGeometry(
                "range geometry has no polygon rings".to_string(),
            ));
        }
        Ok(Self { shape })
    }

    /// One polygon per ring, each ring a list of `(lon, lat)` pairs.
    pub fn from_rings(rings: Vec<Vec<(f64, f64)>>) -> Result<Self, RangePlateError> {
        let polygons = rings
            .into_iter()
            .map(|ring| Polygon::new(LineString::from(ring), Vec::new()))
            .collect();
        Self::new(MultiPolygon::new(polygons))
    }

    pub fn shape(&self) -> &MultiPolygon<f64> {
        &self.shape
    }

    pub fn bounds(&self) -> Option<Bounds> {
        bounding_box(&self.shape)
    }

    pub fn is_valid(&self) -> bool {
        is_valid(&self.shape)
    }

    pub fn repaired(&self) -> Result<RangeGeometry, RangePlateError> {
        if self.is_valid() {
            return Ok(self.clone());
        }
        let fixed = make_valid(&self.shape);
        if fixed.0.is_empty() {
            return Err(RangePlateError::InvalidGeometry(
                "range geometry could not be repaired".to_string(),
            ));
        }
        Ok(Self { shape: fixed })
    }
}

/// A named reference polygon from the base layer (typically a country).
#[derive(Debug, Clone, PartialEq)]
pub struct BaseFeature {
    pub name: Option<String>,
    pub geometry: MultiPolygon<f64>,
}

impl BaseFeature {
    pub fn new(name: impl Into<String>, geometry: MultiPolygon<f64>) -> Self {
        Self {
            name: Some(name.into()),
            geometry,
        }
    }

    pub fn unnamed(geometry: MultiPolygon<f64>) -> Self {
        Self {
            name: None,
            geometry,
        }
    }

    /// Name with surrounding whitespace removed; blank names count as missing.
    pub fn label_name(&self) -> Option<&str> {
        self.name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
    }
}

/// `None` for an empty shape or one carrying non-finite coordinates.
pub fn bounding_box(shape: &MultiPolygon<f64>) -> Option<Bounds> {
    if shape
        .coords_iter()
        .any(|c| !c.x.is_finite() || !c.y.is_finite())
    {
        return None;
    }
    let rect = shape.bounding_rect()?;
    Some(Bounds {
        xmin: rect.min().x,
        xmax: rect.max().x,
        ymin: rect.min().y,
        ymax: rect.max().y,
    })
}

pub fn is_empty(shape: &MultiPolygon<f64>) -> bool {
    shape.0.is_empty() || shape.unsigned_area() <= 0.0
}

/// Closed rings of at least three distinct vertices, finite coordinates, positive area and
/// no ring crossing or touching itself.
pub fn is_valid(shape: &MultiPolygon<f64>) -> bool {
    !shape.0.is_empty() && shape.0.iter().all(polygon_is_valid)
}

fn polygon_is_valid(polygon: &Polygon<f64>) -> bool {
    ring_is_valid(polygon.exterior())
        && polygon.interiors().iter().all(ring_is_valid)
        && polygon.unsigned_area() > 0.0
}

fn ring_is_valid(ring: &LineString<f64>) -> bool {
    let coords = &ring.0;
    if coords.len() < 4 {
        return false;
    }
    if coords.first() != coords.last() {
        return false;
    }
    if coords.iter().any(|c| !c.x.is_finite() || !c.y.is_finite()) {
        return false;
    }
    let mut points: Vec<Coord<f64>> = Vec::with_capacity(coords.len());
    for c in coords {
        if points.last() != Some(c) {
            points.push(*c);
        }
    }
    // `points` is closed, so distinct vertices = len - 1.
    if points.len() < 4 {
        return false;
    }
    !ring_self_intersects(&points)
}

fn ring_self_intersects(points: &[Coord<f64>]) -> bool {
    let segments = points.len() - 1;
    for i in 0..segments {
        let (a, b) = (points[i], points[i + 1]);
        for j in (i + 1)..segments {
            let adjacent = j == i + 1 || (i == 0 && j == segments - 1);
            let (c, d) = (points[j], points[j + 1]);
            if adjacent {
                // Neighbours share a vertex; they only conflict if they fold back onto each other.
                if orientation(a, b, d) == 0.0 && j == i + 1 && folds_back(a, b, d) {
                    return true;
                }
                continue;
            }
            if segments_touch(a, b, c, d) {
                return true;
            }
        }
    }
    false
}

fn orientation(p: Coord<f64>, q: Coord<f64>, r: Coord<f64>) -> f64 {
    let v = (q.x - p.x) * (r.y - p.y) - (q.y - p.y) * (r.x - p.x);
    if v.abs() < 1e-12 { 0.0 } else { v.signum() }
}

fn on_segment(p: Coord<f64>, q: Coord<f64>, r: Coord<f64>) -> bool {
    q.x <= p.x.max(r.x) && q.x >= p.x.min(r.x) && q.y <= p.y.max(r.y) && q.y >= p.y.min(r.y)
}

// a-b followed by b-d on the same line, with d pointing back towards a.
fn folds_back(a: Coord<f64>, b: Coord<f64>, d: Coord<f64>) -> bool {
    let dot = (a.x - b.x) * (d.x - b.x) + (a.y - b.y) * (d.y - b.y);
    dot > 0.0
}

fn segments_touch(a: Coord<f64>, b: Coord<f64>, c: Coord<f64>, d: Coord<f64>) -> bool {
    let o1 = orientation(a, b, c);
    let o2 = orientation(a, b, d);
    let o3 = orientation(c, d, a);
    let o4 = orientation(c, d, b);
    if o1 != o2 && o3 != o4 && o1 * o2 <= 0.0 && o3 * o4 <= 0.0 {
        return true;
    }
    (o1 == 0.0 && on_segment(a, c, b))
        || (o2 == 0.0 && on_segment(a, d, b))
        || (o3 == 0.0 && on_segment(c, a, d))
        || (o4 == 0.0 && on_segment(c, b, d))
}

/// Returns a valid copy of `shape`. Rings with non-finite coordinates are dropped and
/// self-intersections are resolved by re-noding the rings through a boolean union.
pub fn make_valid(shape: &MultiPolygon<f64>) -> MultiPolygon<f64> {
    let finite: Vec<Polygon<f64>> = shape
        .0
        .iter()
        .filter(|polygon| {
            std::iter::once(polygon.exterior())
                .chain(polygon.interiors())
                .flat_map(|ring| ring.0.iter())
                .all(|c| c.x.is_finite() && c.y.is_finite())
        })
        .cloned()
        .collect();
    let finite = MultiPolygon::new(finite);
    if finite.0.is_empty() || is_valid(&finite) {
        return finite;
    }
    let repaired = finite.union(&MultiPolygon::<f64>::new(Vec::new()));
    MultiPolygon::new(
        repaired
            .0
            .into_iter()
            .filter(|polygon| polygon.unsigned_area() > 0.0)
            .collect(),
    )
}

/// Area-weighted centroid, or `None` when it is undefined or not finite.
pub fn centroid(shape: &MultiPolygon<f64>) -> Option<(f64, f64)> {
    let point = shape.centroid()?;
    let (x, y) = (point.x(), point.y());
    if x.is_finite() && y.is_finite() {
        Some((x, y))
    } else {
        None
    }
}

pub fn intersects(a: &MultiPolygon<f64>, b: &MultiPolygon<f64>) -> bool {
    a.0.iter()
        .any(|pa| b.0.iter().any(|pb| pa.intersects(pb)))
}

pub fn clip_to_bounds(shape: &MultiPolygon<f64>, bounds: &Bounds) -> MultiPolygon<f64> {
    let window = MultiPolygon::new(vec![bounds.to_polygon()]);
    shape.intersection(&window)
}
