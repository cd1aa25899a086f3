use crate::compose::{FigurePlan, FigureText, compose};
use crate::crop::crop_base_layer;
use crate::debug::DebugLogger;
use crate::error::{BuildWarning, RangePlateError};
use crate::extent::{DEFAULT_BUFFER_DEG, compute_extent};
use crate::labels::{DEFAULT_LETTER_SPACING, place_labels};
use crate::layout::{LayoutSpec, compute_layout};
use crate::metrics::BuildMetrics;
use crate::palette::PaletteResolver;
use crate::perf::{PerfLogger, StageTimer};
use crate::photo::{PhotoProvider, PhotoRef};
use crate::raster::Renderer;
use crate::region::RegionClassifier;
use crate::scale_bar::{DEFAULT_SCALE_MILES, compute_scale_bars};
use crate::source::GeometryProvider;
use rangeplate_tables::{PaletteKey, Region};
use serde_json::json;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub const DEFAULT_DPI: u32 = 300;

/// One species to draw, with its output location already resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct SpeciesJob {
    pub species_id: String,
    pub display_name: String,
    pub scientific_name: String,
    pub geometry_source: PathBuf,
    pub photo: PhotoRef,
    pub photo_credit: Option<String>,
    pub palette: String,
    pub output_path: PathBuf,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BuildSettings {
    pub buffer_deg: f64,
    pub scale_miles: f64,
    pub layout: LayoutSpec,
    pub dpi: u32,
    pub letter_spacing: usize,
    pub attribution: String,
}

impl Default for BuildSettings {
    fn default() -> Self {
        Self {
            buffer_deg: DEFAULT_BUFFER_DEG,
            scale_miles: DEFAULT_SCALE_MILES,
            layout: LayoutSpec::default(),
            dpi: DEFAULT_DPI,
            letter_spacing: DEFAULT_LETTER_SPACING,
            attribution: String::new(),
        }
    }
}

/// A finished plan before rendering.
#[derive(Debug, Clone)]
pub struct BuildArtifacts {
    pub plan: FigurePlan,
    pub palette: PaletteKey,
    pub warnings: Vec<BuildWarning>,
    pub metrics: BuildMetrics,
}

#[derive(Debug, Clone)]
pub struct BuildOutcome {
    pub species_id: String,
    pub output_path: PathBuf,
    pub region: Region,
    pub palette: PaletteKey,
    pub page_mm: (f64, f64),
    pub pixel_size: (u32, u32),
    pub png_sha256: String,
    pub tables_fingerprint: String,
    pub warnings: Vec<BuildWarning>,
    pub metrics: BuildMetrics,
}

/// Deterministic file stem for a species id: lowercase ASCII letters and digits, with
/// every other run of characters collapsed to one underscore.
pub fn species_slug(species_id: &str) -> Result<String, RangePlateError> {
    let mut slug = String::with_capacity(species_id.len());
    let mut pending_sep = false;
    for ch in species_id.trim().chars() {
        if ch.is_ascii_alphanumeric() {
            if pending_sep && !slug.is_empty() {
                slug.push('_');
            }
            pending_sep = false;
            slug.push(ch.to_ascii_lowercase());
        } else {
            pending_sep = true;
        }
    }
    if slug.is_empty() {
        return Err(RangePlateError::InvalidConfiguration(format!(
            "species id '{species_id}' has no characters usable in a file name"
        )));
    }
    Ok(slug)
}

pub fn output_path_for(output_dir: &Path, species_id: &str) -> Result<PathBuf, RangePlateError> {
    Ok(output_dir.join(format!("{}.png", species_slug(species_id)?)))
}

fn hex_sha256(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    let mut out = String::with_capacity(digest.len() * 2);
    for b in digest {
        use std::fmt::Write;
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}

/// Writes through a hidden sibling file and renames it into place, so readers never see a
/// partially written output.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), RangePlateError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| {
            RangePlateError::InvalidConfiguration(format!(
                "output path {} has no file name",
                path.display()
            ))
        })?;
    let tmp = path.with_file_name(format!(".{file_name}.tmp-{}", std::process::id()));
    fs::write(&tmp, bytes)?;
    if let Err(err) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(err.into());
    }
    Ok(())
}

/// Runs extent, crop, region, labels, scale bar, palette and layout for one species, then
/// composes, renders and writes the figure.
pub struct BuildPipeline {
    settings: BuildSettings,
    classifier: RegionClassifier,
    palettes: PaletteResolver,
    geometry: Arc<dyn GeometryProvider>,
    photos: Arc<dyn PhotoProvider>,
    renderer: Arc<dyn Renderer>,
    debug: Option<DebugLogger>,
    perf: Option<PerfLogger>,
}

impl BuildPipeline {
    pub fn new(
        settings: BuildSettings,
        classifier: RegionClassifier,
        palettes: PaletteResolver,
        geometry: Arc<dyn GeometryProvider>,
        photos: Arc<dyn PhotoProvider>,
        renderer: Arc<dyn Renderer>,
    ) -> Self {
        Self {
            settings,
            classifier,
            palettes,
            geometry,
            photos,
            renderer,
            debug: None,
            perf: None,
        }
    }

    pub fn with_loggers(mut self, debug: Option<DebugLogger>, perf: Option<PerfLogger>) -> Self {
        self.debug = debug;
        self.perf = perf;
        self
    }

    pub fn settings(&self) -> &BuildSettings {
        &self.settings
    }

    pub(crate) fn debug(&self) -> Option<&DebugLogger> {
        self.debug.as_ref()
    }

    pub(crate) fn perf(&self) -> Option<&PerfLogger> {
        self.perf.as_ref()
    }

    /// Plans the figure without rendering. Errors are tagged with the species id.
    pub fn plan(
        &self,
        job: &SpeciesJob,
        job_index: Option<usize>,
    ) -> Result<BuildArtifacts, RangePlateError> {
        self.plan_inner(job, job_index)
            .map_err(|err| err.for_species(&job.species_id))
    }

    /// Builds and writes the figure for `job`. Errors are tagged with the species id.
    pub fn build(
        &self,
        job: &SpeciesJob,
        job_index: Option<usize>,
    ) -> Result<BuildOutcome, RangePlateError> {
        self.build_inner(job, job_index)
            .map_err(|err| err.for_species(&job.species_id))
    }

    fn plan_inner(
        &self,
        job: &SpeciesJob,
        job_index: Option<usize>,
    ) -> Result<BuildArtifacts, RangePlateError> {
        let perf = self.perf.as_ref();
        let mut metrics = BuildMetrics::default();
        let mut warnings = Vec::new();

        let timer = StageTimer::start("extent");
        let range = self.geometry.range(&job.geometry_source)?.repaired()?;
        let extent = compute_extent(&range, self.settings.buffer_deg)?;
        metrics.record_stage("extent", timer.finish(perf, job_index));

        let timer = StageTimer::start("crop");
        let base = self.geometry.base_layer()?;
        let (land, crop_stats) = crop_base_layer(&extent, &base);
        metrics.base_features = crop_stats.input;
        metrics.cropped_features = land.len();
        metrics.repaired_features = crop_stats.repaired;
        metrics.record_stage("crop", timer.finish(perf, job_index));

        let timer = StageTimer::start("region");
        let region = self.classifier.classify(&extent);
        let inset_window = self.classifier.inset_window(region)?;
        let (inset_land, _) = crop_base_layer(&inset_window, &base);
        metrics.inset_features = inset_land.len();
        metrics.record_stage("region", timer.finish(perf, job_index));

        let timer = StageTimer::start("labels");
        let labels = place_labels(&land, &range, self.settings.letter_spacing);
        metrics.focus_labels = labels.focus.len();
        metrics.context_labels = labels.context.len();
        metrics.excluded_labels = labels.excluded.len();
        warnings.extend(labels.warning());
        metrics.record_stage("labels", timer.finish(perf, job_index));

        let timer = StageTimer::start("scale_bar");
        let scale_bars = compute_scale_bars(&extent, self.settings.scale_miles)?;
        metrics.record_stage("scale_bar", timer.finish(perf, job_index));

        let timer = StageTimer::start("layout");
        let resolved = self.palettes.resolve(&job.palette);
        warnings.extend(resolved.warning.clone());
        let layout = compute_layout(&extent, &inset_window, &self.settings.layout)?;
        let photo = self.photos.load(&job.photo)?;
        metrics.record_stage("layout", timer.finish(perf, job_index));

        if let Some(debug) = self.debug.as_ref() {
            for warning in &warnings {
                debug.event(
                    warning.code(),
                    json!({
                        "species_id": job.species_id,
                        "job": job_index,
                        "message": warning.to_string(),
                    }),
                );
            }
            debug.increment("labels.excluded_features", labels.excluded.len() as u64);
        }

        let plan = FigurePlan {
            text: FigureText {
                display_name: job.display_name.clone(),
                scientific_name: job.scientific_name.clone(),
                attribution: self.settings.attribution.clone(),
                photo_credit: job.photo_credit.clone(),
            },
            extent,
            region,
            inset_window,
            palette: resolved.palette,
            range,
            land,
            inset_land,
            labels,
            scale_bars,
            layout,
            photo,
        };
        Ok(BuildArtifacts {
            plan,
            palette: resolved.key,
            warnings,
            metrics,
        })
    }

    fn build_inner(
        &self,
        job: &SpeciesJob,
        job_index: Option<usize>,
    ) -> Result<BuildOutcome, RangePlateError> {
        let perf = self.perf.as_ref();
        let BuildArtifacts {
            plan,
            palette,
            warnings,
            mut metrics,
        } = self.plan_inner(job, job_index)?;

        let timer = StageTimer::start("compose");
        let document = compose(&plan);
        metrics.command_count = document.command_count();
        metrics.record_stage("compose", timer.finish(perf, job_index));

        let timer = StageTimer::start("raster");
        let rendered = self.renderer.render(&document, self.settings.dpi)?;
        metrics.text_runs_skipped = rendered.stats.text_runs_skipped;
        metrics.record_stage("raster", timer.finish(perf, job_index));

        let timer = StageTimer::start("write");
        write_atomic(&job.output_path, &rendered.png)?;
        metrics.output_bytes = rendered.png.len();
        metrics.record_stage("write", timer.finish(perf, job_index));

        if let Some(perf) = perf {
            perf.log_counts(
                "labels",
                job_index,
                &[
                    ("focus", metrics.focus_labels as u64),
                    ("context", metrics.context_labels as u64),
                    ("excluded", metrics.excluded_labels as u64),
                ],
            );
            perf.log_counts(
                "render",
                job_index,
                &[
                    ("commands", metrics.command_count as u64),
                    ("text_skipped", metrics.text_runs_skipped as u64),
                    ("bytes", metrics.output_bytes as u64),
                ],
            );
        }

        Ok(BuildOutcome {
            species_id: job.species_id.clone(),
            output_path: job.output_path.clone(),
            region: plan.region,
            palette,
            page_mm: (
                plan.layout.page.page_width_mm,
                plan.layout.page.page_height_mm,
            ),
            pixel_size: (rendered.width_px, rendered.height_px),
            png_sha256: hex_sha256(&rendered.png),
            tables_fingerprint: rangeplate_tables::tables_fingerprint_sha256(),
            warnings,
            metrics,
        })
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;
    use crate::error::ResourceKind;

    #[test]
    fn slug_is_deterministic_and_filesystem_safe() {
        assert_eq!(species_slug("Panthera leo").unwrap(), "panthera_leo");
        assert_eq!(species_slug("  --Okapia/johnstoni--  ").unwrap(), "okapia_johnstoni");
        assert_eq!(species_slug("ID 42").unwrap(), "id_42");
        assert!(species_slug(" / ").is_err());
        assert_eq!(
            output_path_for(Path::new("/out"), "Lion").unwrap(),
            PathBuf::from("/out/lion.png")
        );
    }

    #[test]
    fn plan_classifies_crops_and_partitions_labels() {
        let pipeline = pipeline(low_dpi());
        let dir = temp_dir("plan");
        let artifacts = pipeline.plan(&job("lion", "lion.geojson", &dir), None).unwrap();
        let plan = &artifacts.plan;
        assert_eq!(plan.region, Region::Africa);
        assert_eq!(
            (plan.extent.xmin(), plan.extent.xmax(), plan.extent.ymin(), plan.extent.ymax()),
            (25.0, 46.0, -14.0, 10.0)
        );
        let focus: Vec<_> = plan.labels.focus.iter().map(|l| l.text.as_str()).collect();
        assert_eq!(focus, vec!["K E N Y A", "T A N Z A N I A"]);
        // Chad is cropped away; the unnamed feature survives cropping but gets no label.
        assert!(plan.labels.context.is_empty());
        assert_eq!(artifacts.metrics.cropped_features, 3);
        assert_eq!(artifacts.metrics.excluded_labels, 1);
        assert!(artifacts.warnings.is_empty());
        assert_eq!(artifacts.palette, PaletteKey::Savanna);
    }

    #[test]
    fn unknown_palette_falls_back_with_warning() {
        let pipeline = pipeline(low_dpi());
        let dir = temp_dir("palette");
        let mut job = job("lion", "lion.geojson", &dir);
        job.palette = "neon".into();
        let artifacts = pipeline.plan(&job, None).unwrap();
        assert_eq!(artifacts.palette, PaletteKey::Jungle);
        assert_eq!(artifacts.warnings.len(), 1);
        assert_eq!(artifacts.warnings[0].code(), "palette.fallback");
    }

    #[test]
    fn invalid_range_is_repaired_before_use() {
        let pipeline = pipeline(low_dpi());
        let dir = temp_dir("bowtie");
        let artifacts = pipeline.plan(&job("bowtie", "bowtie.geojson", &dir), None).unwrap();
        assert!(artifacts.plan.range.is_valid());
    }

    #[test]
    fn build_writes_png_at_layout_size() {
        let pipeline = pipeline(low_dpi());
        let dir = temp_dir("build");
        let job = job("lion", "lion.geojson", &dir);
        let outcome = pipeline.build(&job, Some(0)).unwrap();
        assert!(job.output_path.is_file());
        let bytes = fs::read(&job.output_path).unwrap();
        assert_eq!(outcome.png_sha256, hex_sha256(&bytes));
        assert_eq!(outcome.png_sha256.len(), 64);
        assert_eq!(
            outcome.tables_fingerprint,
            rangeplate_tables::tables_fingerprint_sha256()
        );
        let img = image::load_from_memory(&bytes).unwrap();
        assert_eq!((img.width(), img.height()), outcome.pixel_size);
        let artifacts = pipeline.plan(&job, None).unwrap();
        assert_eq!(outcome.pixel_size, artifacts.plan.layout.page.pixel_size(20));
        for stage in ["extent", "crop", "region", "labels", "scale_bar", "layout", "compose", "raster", "write"] {
            assert!(outcome.metrics.stage_ms.contains_key(stage), "missing stage {stage}");
        }
        // No stray temporary files remain next to the output.
        let entries: Vec<_> = fs::read_dir(&dir).unwrap().flatten().collect();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn missing_geometry_is_tagged_with_species() {
        let pipeline = pipeline(low_dpi());
        let dir = temp_dir("missing");
        let err = pipeline
            .build(&job("ghost", "ghost.geojson", &dir), None)
            .unwrap_err();
        match &err {
            RangePlateError::Build { species_id, .. } => assert_eq!(species_id, "ghost"),
            other => panic!("unexpected error {other:?}"),
        }
        assert!(matches!(
            err.root(),
            RangePlateError::MissingResource {
                kind: ResourceKind::RangeGeometry,
                ..
            }
        ));
    }

    #[test]
    fn identical_inputs_render_identical_bytes() {
        let pipeline = pipeline(low_dpi());
        let a = pipeline
            .build(&job("lion", "lion.geojson", &temp_dir("det_a")), None)
            .unwrap();
        let b = pipeline
            .build(&job("lion", "lion.geojson", &temp_dir("det_b")), None)
            .unwrap();
        assert_eq!(a.png_sha256, b.png_sha256);
    }

    #[test]
    fn debug_log_records_fallback_warning() {
        let dir = temp_dir("debuglog");
        let log_path = dir.join("debug.jsonl");
        let debug = DebugLogger::new(&log_path).unwrap();
        let pipeline = pipeline(low_dpi()).with_loggers(Some(debug.clone()), None);
        let mut job = job("lion", "lion.geojson", &dir);
        job.palette = "neon".into();
        pipeline.plan(&job, Some(3)).unwrap();
        debug.flush();
        let text = fs::read_to_string(&log_path).unwrap();
        let first: serde_json::Value = serde_json::from_str(text.lines().next().unwrap()).unwrap();
        assert_eq!(first["type"], "palette.fallback");
        assert_eq!(first["species_id"], "lion");
        assert_eq!(first["job"], 3);
    }
}
