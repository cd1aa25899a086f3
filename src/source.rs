use crate::error::{RangePlateError, ResourceKind};
use crate::geometry::{BaseFeature, RangeGeometry};
use geo::{LineString, MultiPolygon, Polygon};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

pub const DEFAULT_NAME_ATTRIBUTE: &str = "NAME";

/// Supplies range geometries and the shared reference land layer. Both are read-only to the
/// core; invalid rings are tolerated here and repaired downstream.
pub trait GeometryProvider: Send + Sync {
    fn range(&self, source: &Path) -> Result<RangeGeometry, RangePlateError>;
    fn base_layer(&self) -> Result<Arc<Vec<BaseFeature>>, RangePlateError>;
}

// Every GeoJSON object shape we accept, flattened; unused members stay empty.
#[derive(Debug, Deserialize)]
struct RawGeoJson {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    coordinates: Option<Value>,
    #[serde(default)]
    geometry: Option<Box<RawGeoJson>>,
    #[serde(default)]
    geometries: Vec<RawGeoJson>,
    #[serde(default)]
    features: Vec<RawGeoJson>,
    #[serde(default)]
    properties: Option<Map<String, Value>>,
}

type Ring = Vec<Vec<f64>>;

fn ring_from_positions(positions: Ring) -> Result<LineString<f64>, RangePlateError> {
    let mut coords = Vec::with_capacity(positions.len());
    for position in positions {
        if position.len() < 2 {
            return Err(RangePlateError::InvalidGeometry(format!(
                "position has {} coordinates, expected at least 2",
                position.len()
            )));
        }
        coords.push((position[0], position[1]));
    }
    Ok(LineString::from(coords))
}

fn polygon_from_rings(rings: Vec<Ring>) -> Result<Option<Polygon<f64>>, RangePlateError> {
    let mut rings = rings.into_iter();
    let Some(exterior) = rings.next() else {
        return Ok(None);
    };
    let exterior = ring_from_positions(exterior)?;
    let interiors = rings
        .map(ring_from_positions)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Some(Polygon::new(exterior, interiors)))
}

/// Polygons of a geometry object. Non-areal geometry types contribute nothing.
fn polygons_of(raw: &RawGeoJson, out: &mut Vec<Polygon<f64>>) -> Result<(), RangePlateError> {
    match raw.kind.as_str() {
        "Polygon" => {
            let Some(coords) = raw.coordinates.clone() else {
                return Ok(());
            };
            let rings: Vec<Ring> = serde_json::from_value(coords)?;
            out.extend(polygon_from_rings(rings)?);
        }
        "MultiPolygon" => {
            let Some(coords) = raw.coordinates.clone() else {
                return Ok(());
            };
            let polygons: Vec<Vec<Ring>> = serde_json::from_value(coords)?;
            for rings in polygons {
                out.extend(polygon_from_rings(rings)?);
            }
        }
        "GeometryCollection" => {
            for child in &raw.geometries {
                polygons_of(child, out)?;
            }
        }
        "Feature" => {
            if let Some(geometry) = raw.geometry.as_deref() {
                polygons_of(geometry, out)?;
            }
        }
        "FeatureCollection" => {
            for feature in &raw.features {
                polygons_of(feature, out)?;
            }
        }
        _ => {}
    }
    Ok(())
}

fn feature_name(raw: &RawGeoJson, attribute: &str) -> Option<String> {
    let value = raw.properties.as_ref()?.get(attribute)?;
    match value {
        Value::String(s) => Some(s.clone()),
        _ => None,
    }
}

fn read_geojson(path: &Path, kind: ResourceKind) -> Result<RawGeoJson, RangePlateError> {
    if !path.is_file() {
        return Err(RangePlateError::missing(kind, path));
    }
    let bytes = std::fs::read(path)?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// Parses a range from a GeoJSON `Feature`, `FeatureCollection` or bare geometry. All
/// polygons found are merged into one multi-polygon.
pub fn parse_range(json: &str) -> Result<RangeGeometry, RangePlateError> {
    let raw: RawGeoJson = serde_json::from_str(json)?;
    range_from_raw(&raw)
}

fn range_from_raw(raw: &RawGeoJson) -> Result<RangeGeometry, RangePlateError> {
    let mut polygons = Vec::new();
    polygons_of(raw, &mut polygons)?;
    RangeGeometry::new(MultiPolygon::new(polygons))
}

/// Parses a base layer `FeatureCollection`; each feature keeps its name from `attribute`.
pub fn parse_base_layer(json: &str, attribute: &str) -> Result<Vec<BaseFeature>, RangePlateError> {
    let raw: RawGeoJson = serde_json::from_str(json)?;
    base_layer_from_raw(&raw, attribute)
}

fn base_layer_from_raw(
    raw: &RawGeoJson,
    attribute: &str,
) -> Result<Vec<BaseFeature>, RangePlateError> {
    if raw.kind != "FeatureCollection" {
        return Err(RangePlateError::InvalidGeometry(format!(
            "base layer must be a FeatureCollection, found {}",
            raw.kind
        )));
    }
    let mut out = Vec::with_capacity(raw.features.len());
    for feature in &raw.features {
        let mut polygons = Vec::new();
        polygons_of(feature, &mut polygons)?;
        out.push(BaseFeature {
            name: feature_name(feature, attribute),
            geometry: MultiPolygon::new(polygons),
        });
    }
    Ok(out)
}

/// GeoJSON files on disk. The base layer is parsed on first use and shared afterwards.
#[derive(Debug)]
pub struct GeoJsonProvider {
    base_layer_path: PathBuf,
    name_attribute: String,
    root: Option<PathBuf>,
    base: OnceLock<Arc<Vec<BaseFeature>>>,
}

impl GeoJsonProvider {
    pub fn new(base_layer_path: impl Into<PathBuf>) -> Self {
        Self {
            base_layer_path: base_layer_path.into(),
            name_attribute: DEFAULT_NAME_ATTRIBUTE.to_string(),
            root: None,
            base: OnceLock::new(),
        }
    }

    pub fn with_name_attribute(mut self, attribute: impl Into<String>) -> Self {
        self.name_attribute = attribute.into();
        self
    }

    /// Relative range paths are resolved against `root`.
    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = Some(root.into());
        self
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        match &self.root {
            Some(root) if path.is_relative() => root.join(path),
            _ => path.to_path_buf(),
        }
    }
}

impl GeometryProvider for GeoJsonProvider {
    fn range(&self, source: &Path) -> Result<RangeGeometry, RangePlateError> {
        let raw = read_geojson(&self.resolve(source), ResourceKind::RangeGeometry)?;
        range_from_raw(&raw)
    }

    fn base_layer(&self) -> Result<Arc<Vec<BaseFeature>>, RangePlateError> {
        if let Some(base) = self.base.get() {
            return Ok(base.clone());
        }
        let raw = read_geojson(&self.base_layer_path, ResourceKind::BaseLayer)?;
        let loaded = Arc::new(base_layer_from_raw(&raw, &self.name_attribute)?);
        Ok(self.base.get_or_init(|| loaded).clone())
    }
}

/// Geometry held in memory, keyed by source path.
#[derive(Debug, Clone, Default)]
pub struct StaticGeometryProvider {
    ranges: BTreeMap<PathBuf, RangeGeometry>,
    base: Arc<Vec<BaseFeature>>,
}

impl StaticGeometryProvider {
    pub fn new(base: Vec<BaseFeature>) -> Self {
        Self {
            ranges: BTreeMap::new(),
            base: Arc::new(base),
        }
    }

    pub fn with_range(mut self, source: impl Into<PathBuf>, range: RangeGeometry) -> Self {
        self.ranges.insert(source.into(), range);
        self
    }
}

impl GeometryProvider for StaticGeometryProvider {
    fn range(&self, source: &Path) -> Result<RangeGeometry, RangePlateError> {
        self.ranges
            .get(source)
            .cloned()
            .ok_or_else(|| RangePlateError::missing(ResourceKind::RangeGeometry, source))
    }

    fn base_layer(&self) -> Result<Arc<Vec<BaseFeature>>, RangePlateError> {
        Ok(self.base.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry;
    use std::time::{SystemTime, UNIX_EPOCH};

    const BASE: &str = r#"{
        "type": "FeatureCollection",
        "features": [
            {"type": "Feature", "properties": {"NAME": "Kenya", "ADMIN": "Republic of Kenya"},
             "geometry": {"type": "Polygon", "coordinates": [[[34,-4],[41,-4],[41,4],[34,4],[34,-4]]]}},
            {"type": "Feature", "properties": {"NAME": null},
             "geometry": {"type": "MultiPolygon", "coordinates": [[[[0,0],[1,0],[1,1],[0,0]]]]}},
            {"type": "Feature", "properties": {"NAME": "Nowhere"}, "geometry": null},
            {"type": "Feature", "properties": {"NAME": "Point"},
             "geometry": {"type": "Point", "coordinates": [3, 3]}}
        ]
    }"#;

    fn temp_dir(label: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        let dir = std::env::temp_dir().join(format!(
            "rangeplate_source_{label}_{}_{nanos}",
            std::process::id()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn base_layer_keeps_every_feature_with_optional_names() {
        let features = parse_base_layer(BASE, "NAME").unwrap();
        assert_eq!(features.len(), 4);
        assert_eq!(features[0].label_name(), Some("Kenya"));
        assert_eq!(features[1].name, None);
        assert!(geometry::is_empty(&features[2].geometry));
        assert!(geometry::is_empty(&features[3].geometry));
        let admin = parse_base_layer(BASE, "ADMIN").unwrap();
        assert_eq!(admin[0].label_name(), Some("Republic of Kenya"));
    }

    #[test]
    fn range_accepts_feature_collection_feature_and_bare_geometry() {
        let bare = r#"{"type":"Polygon","coordinates":[[[10,0],[12,0],[12,2],[10,0]]]}"#;
        let feature = format!(r#"{{"type":"Feature","properties":{{}},"geometry":{bare}}}"#);
        let collection = format!(r#"{{"type":"FeatureCollection","features":[{feature},{feature}]}}"#);
        assert_eq!(parse_range(bare).unwrap().shape().0.len(), 1);
        assert_eq!(parse_range(&feature).unwrap().shape().0.len(), 1);
        assert_eq!(parse_range(&collection).unwrap().shape().0.len(), 2);
    }

    #[test]
    fn holes_and_altitude_are_read() {
        let json = r#"{"type":"Polygon","coordinates":[
            [[0,0,5],[10,0,5],[10,10,5],[0,10,5],[0,0,5]],
            [[2,2],[4,2],[4,4],[2,4],[2,2]]]}"#;
        let range = parse_range(json).unwrap();
        assert_eq!(range.shape().0[0].interiors().len(), 1);
    }

    #[test]
    fn range_without_polygons_is_invalid_geometry() {
        let err = parse_range(r#"{"type":"Point","coordinates":[1,2]}"#).unwrap_err();
        assert!(matches!(err, RangePlateError::InvalidGeometry(_)));
        let err = parse_range(r#"{"type":"Polygon","coordinates":[[[1]]]}"#).unwrap_err();
        assert!(matches!(err, RangePlateError::InvalidGeometry(_)));
    }

    #[test]
    fn provider_reports_missing_files_and_caches_base_layer() {
        let dir = temp_dir("provider");
        let base_path = dir.join("countries.geojson");
        std::fs::write(&base_path, BASE).unwrap();
        let provider = GeoJsonProvider::new(&base_path).with_root(&dir);
        let first = provider.base_layer().unwrap();
        std::fs::remove_file(&base_path).unwrap();
        let second = provider.base_layer().unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        let err = provider.range(Path::new("lion.geojson")).unwrap_err();
        assert!(matches!(
            err,
            RangePlateError::MissingResource {
                kind: ResourceKind::RangeGeometry,
                ..
            }
        ));
        let missing_base = GeoJsonProvider::new(dir.join("absent.geojson"));
        assert!(matches!(
            missing_base.base_layer().unwrap_err(),
            RangePlateError::MissingResource {
                kind: ResourceKind::BaseLayer,
                ..
            }
        ));
    }

    #[test]
    fn static_provider_serves_registered_ranges() {
        let range = parse_range(r#"{"type":"Polygon","coordinates":[[[0,0],[1,0],[1,1],[0,0]]]}"#).unwrap();
        let provider = StaticGeometryProvider::new(Vec::new()).with_range("a", range.clone());
        assert_eq!(provider.range(Path::new("a")).unwrap(), range);
        assert!(provider.range(Path::new("b")).is_err());
    }
}
