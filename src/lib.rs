mod canvas;
mod compose;
mod crop;
mod debug;
mod error;
mod extent;
mod font;
mod geometry;
mod labels;
mod layout;
mod metrics;
mod palette;
mod perf;
mod photo;
mod pipeline;
mod queue;
mod raster;
mod region;
mod scale_bar;
mod source;
mod types;

pub use canvas::{Canvas, Command, Document, TextAnchor};
pub use compose::{FigurePlan, FigureText, PHOTO_RESOURCE, compose};
pub use crop::{CropStats, crop_base_layer};
pub use debug::DebugLogger;
pub use error::{BuildWarning, RangePlateError, ResourceKind};
pub use extent::{DEFAULT_BUFFER_DEG, Extent, compute_extent};
pub use font::{FontFace, find_system_sans};
pub use geometry::{BaseFeature, Bounds, RangeGeometry};
pub use labels::{
    DEFAULT_LETTER_SPACING, ExclusionReason, LabelCandidate, LabelClass, LabelSet, letter_space,
    place_labels,
};
pub use layout::{LayoutPlan, LayoutSpec, NormRect, PageGeometry, Panel, compute_layout};
pub use metrics::BuildMetrics;
pub use palette::{Palette, PaletteResolver, ResolvedPalette};
pub use perf::PerfLogger;
pub use photo::{FsPhotoProvider, Photo, PhotoProvider, PhotoRef, cover_crop_rect};
pub use pipeline::{
    BuildArtifacts, BuildOutcome, BuildPipeline, BuildSettings, DEFAULT_DPI, SpeciesJob,
    output_path_for, species_slug,
};
pub use queue::{JobQueue, QueueItem, QueueRecord, QueueRunner, QueueStatus, RunReport};
pub use rangeplate_tables::{
    InsetWindowDef, PaletteDef, PaletteKey, Region, RegionBucketDef, tables_fingerprint_sha256,
};
pub use raster::{RasterRenderer, RenderStats, RenderedPage, Renderer};
pub use region::RegionClassifier;
pub use scale_bar::{
    DEFAULT_SCALE_MILES, DistanceUnit, ScaleBar, ScaleBars, compute_scale_bars, km_per_degree,
};
pub use source::{
    DEFAULT_NAME_ATTRIBUTE, GeoJsonProvider, GeometryProvider, StaticGeometryProvider,
    parse_base_layer, parse_range,
};
pub use types::{Color, Rect, Size, mm_to_pt, mm_to_px};

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

const DEFAULT_OUTPUT_DIR: &str = "figures";
const MAX_DPI: u32 = 2400;

/// Configured figure builder: one pipeline, one output directory, one queue policy.
pub struct RangePlate {
    pipeline: BuildPipeline,
    output_dir: PathBuf,
    force_rebuild: bool,
    threads: usize,
}

impl RangePlate {
    pub fn builder() -> RangePlateBuilder {
        RangePlateBuilder::new()
    }

    pub fn settings(&self) -> &BuildSettings {
        self.pipeline.settings()
    }

    pub fn pipeline(&self) -> &BuildPipeline {
        &self.pipeline
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn output_path_for(&self, species_id: &str) -> Result<PathBuf, RangePlateError> {
        output_path_for(&self.output_dir, species_id)
    }

    pub fn job_for(&self, record: &QueueRecord) -> Result<SpeciesJob, RangePlateError> {
        record
            .to_job(&self.output_dir)
            .map_err(|err| err.for_species(&record.species_id))
    }

    /// Runs every planning stage for one species without rendering or writing anything.
    pub fn plan_species(&self, record: &QueueRecord) -> Result<BuildArtifacts, RangePlateError> {
        let job = self.job_for(record)?;
        self.pipeline.plan(&job, None)
    }

    /// Builds one species unconditionally, overwriting any existing output.
    pub fn build_species(&self, record: &QueueRecord) -> Result<BuildOutcome, RangePlateError> {
        let job = self.job_for(record)?;
        self.pipeline.build(&job, None)
    }

    fn runner(&self) -> QueueRunner<'_> {
        QueueRunner::new(&self.pipeline, &self.output_dir)
            .force_rebuild(self.force_rebuild)
            .threads(self.threads)
    }

    pub fn run_records(&self, records: &[QueueRecord]) -> Result<RunReport, RangePlateError> {
        self.runner().run(records)
    }

    /// Runs the queue and persists statuses, regions and errors back to its file.
    pub fn run_queue(&self, queue: &mut JobQueue) -> Result<RunReport, RangePlateError> {
        self.runner().run_queue(queue)
    }
}

pub struct RangePlateBuilder {
    settings: BuildSettings,
    base_layer: Option<PathBuf>,
    name_attribute: String,
    geometry_root: Option<PathBuf>,
    photo_root: Option<PathBuf>,
    font_path: Option<PathBuf>,
    output_dir: PathBuf,
    force_rebuild: bool,
    threads: usize,
    debug_path: Option<PathBuf>,
    perf_path: Option<PathBuf>,
    palette_table: Option<(Vec<PaletteDef>, PaletteKey)>,
    region_table: Option<(Vec<RegionBucketDef>, Vec<InsetWindowDef>)>,
    geometry: Option<Arc<dyn GeometryProvider>>,
    photos: Option<Arc<dyn PhotoProvider>>,
    renderer: Option<Arc<dyn Renderer>>,
}

impl RangePlateBuilder {
    pub fn new() -> Self {
        Self {
            settings: BuildSettings::default(),
            base_layer: None,
            name_attribute: DEFAULT_NAME_ATTRIBUTE.to_string(),
            geometry_root: None,
            photo_root: None,
            font_path: None,
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            force_rebuild: false,
            threads: 1,
            debug_path: None,
            perf_path: None,
            palette_table: None,
            region_table: None,
            geometry: None,
            photos: None,
            renderer: None,
        }
    }

    pub fn buffer_deg(mut self, degrees: f64) -> Self {
        self.settings.buffer_deg = degrees;
        self
    }

    pub fn scale_miles(mut self, miles: f64) -> Self {
        self.settings.scale_miles = miles;
        self
    }

    pub fn page_width_mm(mut self, mm: f64) -> Self {
        self.settings.layout.page_width_mm = mm;
        self
    }

    pub fn column_split(mut self, split: f64) -> Self {
        self.settings.layout.column_split = split;
        self
    }

    pub fn title_mm(mut self, mm: f64) -> Self {
        self.settings.layout.title_mm = mm;
        self
    }

    pub fn attribution_mm(mut self, mm: f64) -> Self {
        self.settings.layout.attribution_mm = mm;
        self
    }

    pub fn inset_photo_gap_mm(mut self, mm: f64) -> Self {
        self.settings.layout.inset_photo_gap_mm = mm;
        self
    }

    pub fn divider_mm(mut self, mm: f64) -> Self {
        self.settings.layout.divider_mm = mm;
        self
    }

    pub fn layout(mut self, layout: LayoutSpec) -> Self {
        self.settings.layout = layout;
        self
    }

    pub fn dpi(mut self, dpi: u32) -> Self {
        self.settings.dpi = dpi;
        self
    }

    pub fn letter_spacing(mut self, spaces: usize) -> Self {
        self.settings.letter_spacing = spaces;
        self
    }

    pub fn attribution(mut self, text: impl Into<String>) -> Self {
        self.settings.attribution = text.into();
        self
    }

    /// GeoJSON `FeatureCollection` of land polygons shared by every build.
    pub fn base_layer(mut self, path: impl Into<PathBuf>) -> Self {
        self.base_layer = Some(path.into());
        self
    }

    pub fn name_attribute(mut self, attribute: impl Into<String>) -> Self {
        self.name_attribute = attribute.into();
        self
    }

    // Relative geometry sources in queue records resolve against this directory.
    pub fn geometry_root(mut self, path: impl Into<PathBuf>) -> Self {
        self.geometry_root = Some(path.into());
        self
    }

    pub fn photo_root(mut self, path: impl Into<PathBuf>) -> Self {
        self.photo_root = Some(path.into());
        self
    }

    pub fn font_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.font_path = Some(path.into());
        self
    }

    pub fn output_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.output_dir = path.into();
        self
    }

    pub fn force_rebuild(mut self, force: bool) -> Self {
        self.force_rebuild = force;
        self
    }

    pub fn threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    pub fn debug_log(mut self, path: impl Into<PathBuf>) -> Self {
        self.debug_path = Some(path.into());
        self
    }

    pub fn perf_log(mut self, path: impl Into<PathBuf>) -> Self {
        self.perf_path = Some(path.into());
        self
    }

    pub fn palette_table(mut self, defs: Vec<PaletteDef>, fallback: PaletteKey) -> Self {
        self.palette_table = Some((defs, fallback));
        self
    }

    pub fn region_table(
        mut self,
        buckets: Vec<RegionBucketDef>,
        insets: Vec<InsetWindowDef>,
    ) -> Self {
        self.region_table = Some((buckets, insets));
        self
    }

    /// Replaces the GeoJSON reader; `base_layer` and `geometry_root` are then ignored.
    pub fn geometry_provider(mut self, provider: Arc<dyn GeometryProvider>) -> Self {
        self.geometry = Some(provider);
        self
    }

    pub fn photo_provider(mut self, provider: Arc<dyn PhotoProvider>) -> Self {
        self.photos = Some(provider);
        self
    }

    pub fn renderer(mut self, renderer: Arc<dyn Renderer>) -> Self {
        self.renderer = Some(renderer);
        self
    }

    pub fn build(self) -> Result<RangePlate, RangePlateError> {
        let settings = self.settings;
        if !settings.buffer_deg.is_finite() || settings.buffer_deg < 0.0 {
            return Err(RangePlateError::InvalidConfiguration(format!(
                "buffer_deg must be a non-negative number of degrees, got {}",
                settings.buffer_deg
            )));
        }
        if !settings.scale_miles.is_finite() || settings.scale_miles <= 0.0 {
            return Err(RangePlateError::InvalidConfiguration(format!(
                "scale_miles must be positive, got {}",
                settings.scale_miles
            )));
        }
        if settings.dpi == 0 || settings.dpi > MAX_DPI {
            return Err(RangePlateError::InvalidConfiguration(format!(
                "dpi must be between 1 and {MAX_DPI}, got {}",
                settings.dpi
            )));
        }
        settings.layout.validate()?;
        if self.name_attribute.trim().is_empty() {
            return Err(RangePlateError::InvalidConfiguration(
                "name_attribute must not be empty".to_string(),
            ));
        }
        if self.output_dir.as_os_str().is_empty() {
            return Err(RangePlateError::InvalidConfiguration(
                "output_dir must not be empty".to_string(),
            ));
        }

        let geometry: Arc<dyn GeometryProvider> = match (self.geometry, self.base_layer) {
            (Some(provider), _) => provider,
            (None, Some(base_layer)) => {
                let mut provider =
                    GeoJsonProvider::new(base_layer).with_name_attribute(self.name_attribute);
                if let Some(root) = self.geometry_root {
                    provider = provider.with_root(root);
                }
                Arc::new(provider)
            }
            (None, None) => {
                return Err(RangePlateError::InvalidConfiguration(
                    "base_layer is required unless a geometry provider is supplied".to_string(),
                ));
            }
        };
        let photos = self
            .photos
            .unwrap_or_else(|| Arc::new(FsPhotoProvider::new(self.photo_root)));
        let renderer: Arc<dyn Renderer> = match (self.renderer, self.font_path) {
            (Some(renderer), _) => renderer,
            (None, Some(font_path)) => {
                let font = FontFace::load(font_path)?;
                Arc::new(RasterRenderer::new(Some(Arc::new(font))))
            }
            (None, None) => Arc::new(RasterRenderer::default()),
        };
        let palettes = match self.palette_table {
            Some((defs, fallback)) => PaletteResolver::new(&defs, fallback)?,
            None => PaletteResolver::with_defaults()?,
        };
        let classifier = match self.region_table {
            Some((buckets, insets)) => RegionClassifier::new(&buckets, &insets)?,
            None => RegionClassifier::default(),
        };
        let debug = match self.debug_path {
            Some(path) => Some(DebugLogger::new(path)?),
            None => None,
        };
        let perf = match self.perf_path {
            Some(path) => Some(PerfLogger::new(path)?),
            None => None,
        };

        let pipeline = BuildPipeline::new(settings, classifier, palettes, geometry, photos, renderer)
            .with_loggers(debug, perf);
        Ok(RangePlate {
            pipeline,
            output_dir: self.output_dir,
            force_rebuild: self.force_rebuild,
            threads: self.threads.max(1),
        })
    }
}

impl Default for RangePlateBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// File form of the builder settings. Every key is optional; unknown keys are rejected.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RangePlateConfig {
    pub buffer_deg: Option<f64>,
    pub scale_miles: Option<f64>,
    pub page_width_mm: Option<f64>,
    pub column_split: Option<f64>,
    pub title_mm: Option<f64>,
    pub attribution_mm: Option<f64>,
    pub inset_photo_gap_mm: Option<f64>,
    pub divider_mm: Option<f64>,
    pub dpi: Option<u32>,
    pub letter_spacing: Option<usize>,
    pub attribution: Option<String>,
    pub base_layer: Option<PathBuf>,
    pub name_attribute: Option<String>,
    pub geometry_root: Option<PathBuf>,
    pub photo_root: Option<PathBuf>,
    pub font_file: Option<PathBuf>,
    pub output_dir: Option<PathBuf>,
    pub force_rebuild: Option<bool>,
    pub threads: Option<usize>,
    pub debug_log: Option<PathBuf>,
    pub perf_log: Option<PathBuf>,
}

impl RangePlateConfig {
    pub fn from_json_str(text: &str) -> Result<Self, RangePlateError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, RangePlateError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Overlays every key present in the file onto `builder`.
    pub fn apply(&self, mut builder: RangePlateBuilder) -> RangePlateBuilder {
        if let Some(v) = self.buffer_deg {
            builder = builder.buffer_deg(v);
        }
        if let Some(v) = self.scale_miles {
            builder = builder.scale_miles(v);
        }
        if let Some(v) = self.page_width_mm {
            builder = builder.page_width_mm(v);
        }
        if let Some(v) = self.column_split {
            builder = builder.column_split(v);
        }
        if let Some(v) = self.title_mm {
            builder = builder.title_mm(v);
        }
        if let Some(v) = self.attribution_mm {
            builder = builder.attribution_mm(v);
        }
        if let Some(v) = self.inset_photo_gap_mm {
            builder = builder.inset_photo_gap_mm(v);
        }
        if let Some(v) = self.divider_mm {
            builder = builder.divider_mm(v);
        }
        if let Some(v) = self.dpi {
            builder = builder.dpi(v);
        }
        if let Some(v) = self.letter_spacing {
            builder = builder.letter_spacing(v);
        }
        if let Some(v) = &self.attribution {
            builder = builder.attribution(v.clone());
        }
        if let Some(v) = &self.base_layer {
            builder = builder.base_layer(v.clone());
        }
        if let Some(v) = &self.name_attribute {
            builder = builder.name_attribute(v.clone());
        }
        if let Some(v) = &self.geometry_root {
            builder = builder.geometry_root(v.clone());
        }
        if let Some(v) = &self.photo_root {
            builder = builder.photo_root(v.clone());
        }
        if let Some(v) = &self.font_file {
            builder = builder.font_file(v.clone());
        }
        if let Some(v) = &self.output_dir {
            builder = builder.output_dir(v.clone());
        }
        if let Some(v) = self.force_rebuild {
            builder = builder.force_rebuild(v);
        }
        if let Some(v) = self.threads {
            builder = builder.threads(v);
        }
        if let Some(v) = &self.debug_log {
            builder = builder.debug_log(v.clone());
        }
        if let Some(v) = &self.perf_log {
            builder = builder.perf_log(v.clone());
        }
        builder
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn temp_dir(label: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        let dir = std::env::temp_dir().join(format!(
            "rangeplate_lib_{label}_{}_{nanos}",
            std::process::id()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn square(x0: f64, y0: f64, x1: f64, y1: f64) -> serde_json::Value {
        serde_json::json!({
            "type": "Polygon",
            "coordinates": [[[x0, y0], [x1, y0], [x1, y1], [x0, y1], [x0, y0]]]
        })
    }

    fn write_inputs(dir: &Path) {
        let base = serde_json::json!({
            "type": "FeatureCollection",
            "features": [
                {"type": "Feature", "properties": {"NAME": "Kenya"}, "geometry": square(34.0, -4.0, 41.0, 4.0)},
                {"type": "Feature", "properties": {"NAME": "Somalia"}, "geometry": square(41.0, -1.0, 51.0, 11.0)},
                {"type": "Feature", "properties": {}, "geometry": square(26.0, -2.0, 28.0, 0.0)}
            ]
        });
        std::fs::write(dir.join("land.geojson"), base.to_string()).unwrap();
        let lion = serde_json::json!({
            "type": "Feature",
            "properties": {},
            "geometry": square(33.0, -6.0, 38.0, 2.0)
        });
        std::fs::write(dir.join("lion.geojson"), lion.to_string()).unwrap();
    }

    fn configured(dir: &Path) -> RangePlateBuilder {
        RangePlate::builder()
            .base_layer(dir.join("land.geojson"))
            .geometry_root(dir)
            .output_dir(dir.join("out"))
            .dpi(20)
    }

    #[test]
    fn builder_rejects_bad_settings_by_name() {
        let cases: Vec<(RangePlateBuilder, &str)> = vec![
            (RangePlate::builder().base_layer("x").buffer_deg(-1.0), "buffer_deg"),
            (RangePlate::builder().base_layer("x").scale_miles(0.0), "scale_miles"),
            (RangePlate::builder().base_layer("x").dpi(0), "dpi"),
            (RangePlate::builder().base_layer("x").column_split(1.0), "column_split"),
            (RangePlate::builder().base_layer("x").title_mm(-2.0), "title_mm"),
            (RangePlate::builder().base_layer("x").name_attribute(" "), "name_attribute"),
            (RangePlate::builder(), "base_layer"),
        ];
        for (builder, field) in cases {
            match builder.build() {
                Err(RangePlateError::InvalidConfiguration(message)) => {
                    assert!(message.contains(field), "{message} should name {field}")
                }
                Err(other) => panic!("unexpected error for {field}: {other}"),
                Ok(_) => panic!("{field} should have been rejected"),
            }
        }
    }

    #[test]
    fn missing_font_file_is_a_missing_resource() {
        let err = RangePlate::builder()
            .base_layer("land.geojson")
            .font_file("/definitely/not/here.ttf")
            .build()
            .err()
            .unwrap();
        assert!(matches!(
            err,
            RangePlateError::MissingResource {
                kind: ResourceKind::Font,
                ..
            }
        ));
    }

    #[test]
    fn config_file_overlays_builder_and_rejects_unknown_keys() {
        let config = RangePlateConfig::from_json_str(
            r#"{"buffer_deg": 4.0, "dpi": 150, "attribution": "Data: IUCN", "threads": 3}"#,
        )
        .unwrap();
        let plate = config
            .apply(RangePlate::builder().base_layer("land.geojson"))
            .build()
            .unwrap();
        assert_eq!(plate.settings().buffer_deg, 4.0);
        assert_eq!(plate.settings().dpi, 150);
        assert_eq!(plate.settings().attribution, "Data: IUCN");
        assert_eq!(plate.settings().scale_miles, DEFAULT_SCALE_MILES);
        assert_eq!(plate.threads, 3);

        let err = RangePlateConfig::from_json_str(r#"{"dpi": 300, "colour": "red"}"#).unwrap_err();
        assert!(matches!(err, RangePlateError::Json(_)));
    }

    #[test]
    fn builds_species_from_geojson_files() {
        let dir = temp_dir("geojson");
        write_inputs(&dir);
        let plate = configured(&dir).attribution("Range data: test").build().unwrap();
        let record = QueueRecord::new("Panthera leo", "Lion", "Panthera leo", "lion.geojson")
            .with_palette("savanna");

        let artifacts = plate.plan_species(&record).unwrap();
        let focus: Vec<_> = artifacts
            .plan
            .labels
            .focus
            .iter()
            .map(|l| l.text.as_str())
            .collect();
        assert_eq!(focus, vec!["K E N Y A"]);
        let context: Vec<_> = artifacts
            .plan
            .labels
            .context
            .iter()
            .map(|l| l.text.as_str())
            .collect();
        assert_eq!(context, vec!["S O M A L I A"]);
        assert_eq!(artifacts.plan.labels.excluded.len(), 1);

        let outcome = plate.build_species(&record).unwrap();
        assert_eq!(outcome.output_path, dir.join("out").join("panthera_leo.png"));
        assert!(outcome.output_path.is_file());
        assert_eq!(outcome.region, Region::Africa);
        assert_eq!(outcome.palette, PaletteKey::Savanna);
    }

    #[test]
    fn queue_run_is_idempotent_and_persists_status() {
        let dir = temp_dir("queue");
        write_inputs(&dir);
        let queue_path = dir.join("queue.json");
        let mut queue = JobQueue::new(&queue_path);
        queue
            .append(QueueRecord::new("lion", "Lion", "Panthera leo", "lion.geojson"))
            .unwrap();
        queue
            .append(QueueRecord::new("ghost", "Ghost", "Nullus", "ghost.geojson"))
            .unwrap();
        queue.save().unwrap();

        let debug_path = dir.join("debug.jsonl");
        let plate = configured(&dir).debug_log(&debug_path).build().unwrap();
        let mut queue = JobQueue::load(&queue_path).unwrap();
        let first = plate.run_queue(&mut queue).unwrap();
        assert_eq!(first.to_string().lines().next(), Some("1 built, 0 skipped, 1 failed"));

        let mut queue = JobQueue::load(&queue_path).unwrap();
        assert_eq!(queue.get("lion").unwrap().status, QueueStatus::Built);
        assert_eq!(queue.get("ghost").unwrap().status, QueueStatus::Failed);

        let second = plate.run_queue(&mut queue).unwrap();
        assert_eq!((second.built, second.skipped, second.failed), (0, 1, 1));

        let log = std::fs::read_to_string(&debug_path).unwrap();
        let events: Vec<serde_json::Value> = log
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        let types: Vec<&str> = events.iter().filter_map(|e| e["type"].as_str()).collect();
        assert!(types.contains(&"job.built"));
        assert!(types.contains(&"job.failed"));
        assert!(types.contains(&"job.skipped"));
        assert_eq!(types.iter().filter(|t| **t == "debug.summary").count(), 2);
    }
}
