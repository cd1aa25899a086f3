use crate::error::{RangePlateError, ResourceKind};
use crate::photo::PhotoRef;
use crate::pipeline::{BuildOutcome, BuildPipeline, SpeciesJob, output_path_for, write_atomic};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::{Path, PathBuf};

pub const DEFAULT_QUEUE_PALETTE: &str = "jungle";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueStatus {
    #[default]
    Pending,
    Built,
    Skipped,
    Failed,
}

impl QueueStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueStatus::Pending => "pending",
            QueueStatus::Built => "built",
            QueueStatus::Skipped => "skipped",
            QueueStatus::Failed => "failed",
        }
    }
}

fn default_palette() -> String {
    DEFAULT_QUEUE_PALETTE.to_string()
}

/// One row of the persisted job queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QueueRecord {
    pub species_id: String,
    pub display_name: String,
    pub scientific_name: String,
    pub geometry_source: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub photo_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub photo_credit: Option<String>,
    #[serde(default = "default_palette")]
    pub palette: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(default)]
    pub status: QueueStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl QueueRecord {
    pub fn new(
        species_id: impl Into<String>,
        display_name: impl Into<String>,
        scientific_name: impl Into<String>,
        geometry_source: impl Into<PathBuf>,
    ) -> Self {
        Self {
            species_id: species_id.into(),
            display_name: display_name.into(),
            scientific_name: scientific_name.into(),
            geometry_source: geometry_source.into(),
            photo_path: None,
            photo_credit: None,
            palette: default_palette(),
            region: None,
            status: QueueStatus::Pending,
            error: None,
        }
    }

    pub fn with_photo(mut self, path: impl Into<PathBuf>, credit: Option<String>) -> Self {
        self.photo_path = Some(path.into());
        self.photo_credit = credit;
        self
    }

    pub fn with_palette(mut self, palette: impl Into<String>) -> Self {
        self.palette = palette.into();
        self
    }

    pub fn photo_ref(&self) -> PhotoRef {
        PhotoRef::from_option(self.photo_path.clone())
    }

    /// Resolves the record into a build job writing under `output_dir`.
    pub fn to_job(&self, output_dir: &Path) -> Result<SpeciesJob, RangePlateError> {
        Ok(SpeciesJob {
            species_id: self.species_id.clone(),
            display_name: self.display_name.clone(),
            scientific_name: self.scientific_name.clone(),
            geometry_source: self.geometry_source.clone(),
            photo: self.photo_ref(),
            photo_credit: self.photo_credit.clone(),
            palette: self.palette.clone(),
            output_path: output_path_for(output_dir, &self.species_id)?,
        })
    }
}

/// The job list, persisted as a JSON array of [`QueueRecord`]s keyed by species id.
#[derive(Debug, Clone, PartialEq)]
pub struct JobQueue {
    path: PathBuf,
    records: Vec<QueueRecord>,
}

impl JobQueue {
    /// An empty queue that will be saved to `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            records: Vec::new(),
        }
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, RangePlateError> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(RangePlateError::missing(ResourceKind::QueueFile, path));
        }
        let text = std::fs::read_to_string(path)?;
        let records: Vec<QueueRecord> = serde_json::from_str(&text)?;
        let mut seen = BTreeSet::new();
        for record in &records {
            if !seen.insert(record.species_id.as_str()) {
                return Err(RangePlateError::Queue(format!(
                    "{} lists species '{}' more than once",
                    path.display(),
                    record.species_id
                )));
            }
        }
        Ok(Self {
            path: path.to_path_buf(),
            records,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn records(&self) -> &[QueueRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, species_id: &str) -> Option<&QueueRecord> {
        self.records.iter().find(|r| r.species_id == species_id)
    }

    pub fn append(&mut self, record: QueueRecord) -> Result<(), RangePlateError> {
        if self.get(&record.species_id).is_some() {
            return Err(RangePlateError::Queue(format!(
                "species '{}' is already queued",
                record.species_id
            )));
        }
        self.records.push(record);
        Ok(())
    }

    /// Copies terminal statuses, regions and errors from a run back onto the records.
    pub fn apply_report(&mut self, report: &RunReport) {
        let by_id: BTreeMap<&str, &QueueItem> = report
            .items
            .iter()
            .map(|item| (item.species_id.as_str(), item))
            .collect();
        for record in &mut self.records {
            let Some(item) = by_id.get(record.species_id.as_str()) else {
                continue;
            };
            record.status = item.status;
            record.error = item.error.clone();
            if let Some(region) = item.region.as_ref() {
                record.region = Some(region.clone());
            }
        }
    }

    pub fn save(&self) -> Result<(), RangePlateError> {
        let text = serde_json::to_string_pretty(&self.records)?;
        write_atomic(&self.path, text.as_bytes())
    }
}

/// The result of one queue item in one run.
#[derive(Debug, Clone)]
pub struct QueueItem {
    pub index: usize,
    pub species_id: String,
    pub output_path: Option<PathBuf>,
    pub status: QueueStatus,
    pub region: Option<String>,
    pub error: Option<String>,
    pub outcome: Option<BuildOutcome>,
}

impl QueueItem {
    fn failed(index: usize, species_id: &str, output_path: Option<PathBuf>, error: String) -> Self {
        Self {
            index,
            species_id: species_id.to_string(),
            output_path,
            status: QueueStatus::Failed,
            region: None,
            error: Some(error),
            outcome: None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub items: Vec<QueueItem>,
    pub built: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl RunReport {
    fn from_items(items: Vec<QueueItem>) -> Self {
        let mut report = RunReport {
            items,
            ..RunReport::default()
        };
        for item in &report.items {
            match item.status {
                QueueStatus::Built => report.built += 1,
                QueueStatus::Skipped => report.skipped += 1,
                QueueStatus::Failed => report.failed += 1,
                QueueStatus::Pending => {}
            }
        }
        report
    }

    pub fn failures(&self) -> impl Iterator<Item = &QueueItem> {
        self.items
            .iter()
            .filter(|item| item.status == QueueStatus::Failed)
    }

    pub fn item(&self, species_id: &str) -> Option<&QueueItem> {
        self.items.iter().find(|item| item.species_id == species_id)
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} built, {} skipped, {} failed",
            self.built, self.skipped, self.failed
        )?;
        for item in self.failures() {
            write!(
                f,
                "\n  {}: {}",
                item.species_id,
                item.error.as_deref().unwrap_or("unknown error")
            )?;
        }
        Ok(())
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

enum Prepared {
    Ready(usize, SpeciesJob),
    Rejected(QueueItem),
}

/// Applies a [`BuildPipeline`] to every queued species. Each item ends in exactly one of
/// `built`, `skipped` or `failed`; a failing item never stops the run.
pub struct QueueRunner<'a> {
    pipeline: &'a BuildPipeline,
    output_dir: PathBuf,
    force_rebuild: bool,
    threads: usize,
}

impl<'a> QueueRunner<'a> {
    pub fn new(pipeline: &'a BuildPipeline, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            pipeline,
            output_dir: output_dir.into(),
            force_rebuild: false,
            threads: 1,
        }
    }

    pub fn force_rebuild(mut self, force: bool) -> Self {
        self.force_rebuild = force;
        self
    }

    /// Worker count. `0` and `1` both mean sequential.
    pub fn threads(mut self, threads: usize) -> Self {
        self.threads = threads.max(1);
        self
    }

    /// Runs every record and writes the results back to the queue file.
    pub fn run_queue(&self, queue: &mut JobQueue) -> Result<RunReport, RangePlateError> {
        let report = self.run(queue.records())?;
        queue.apply_report(&report);
        queue.save()?;
        Ok(report)
    }

    /// Runs `records` without touching any queue file. Items come back in input order.
    pub fn run(&self, records: &[QueueRecord]) -> Result<RunReport, RangePlateError> {
        let prepared = self.prepare(records);
        let items: Vec<QueueItem> = if self.threads > 1 {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(self.threads)
                .build()
                .map_err(|e| {
                    RangePlateError::InvalidConfiguration(format!(
                        "threads: worker pool could not start: {e}"
                    ))
                })?;
            pool.install(|| prepared.into_par_iter().map(|p| self.process(p)).collect())
        } else {
            prepared.into_iter().map(|p| self.process(p)).collect()
        };
        let report = RunReport::from_items(items);
        if let Some(debug) = self.pipeline.debug() {
            debug.increment("queue.items", report.items.len() as u64);
            debug.emit_summary("queue");
            debug.flush();
        }
        if let Some(perf) = self.pipeline.perf() {
            perf.log_counts(
                "queue",
                None,
                &[
                    ("built", report.built as u64),
                    ("skipped", report.skipped as u64),
                    ("failed", report.failed as u64),
                ],
            );
            perf.flush();
        }
        Ok(report)
    }

    /// Resolves output paths up front. A record whose path collides with an earlier one fails.
    fn prepare(&self, records: &[QueueRecord]) -> Vec<Prepared> {
        let mut claimed: BTreeMap<PathBuf, &str> = BTreeMap::new();
        records
            .iter()
            .enumerate()
            .map(|(index, record)| {
                let job = match record.to_job(&self.output_dir) {
                    Ok(job) => job,
                    Err(err) => {
                        return Prepared::Rejected(QueueItem::failed(
                            index,
                            &record.species_id,
                            None,
                            err.for_species(&record.species_id).to_string(),
                        ));
                    }
                };
                if let Some(owner) = claimed.get(&job.output_path) {
                    let message = format!(
                        "output path {} is already used by species '{}'",
                        job.output_path.display(),
                        owner
                    );
                    return Prepared::Rejected(QueueItem::failed(
                        index,
                        &record.species_id,
                        Some(job.output_path),
                        message,
                    ));
                }
                claimed.insert(job.output_path.clone(), record.species_id.as_str());
                Prepared::Ready(index, job)
            })
            .collect()
    }

    fn process(&self, prepared: Prepared) -> QueueItem {
        let item = match prepared {
            Prepared::Rejected(item) => item,
            Prepared::Ready(index, job) => self.process_job(index, &job),
        };
        self.log_item(&item);
        item
    }

    fn process_job(&self, index: usize, job: &SpeciesJob) -> QueueItem {
        if job.output_path.exists() && !self.force_rebuild {
            return QueueItem {
                index,
                species_id: job.species_id.clone(),
                output_path: Some(job.output_path.clone()),
                status: QueueStatus::Skipped,
                region: None,
                error: None,
                outcome: None,
            };
        }
        let result = catch_unwind(AssertUnwindSafe(|| self.pipeline.build(job, Some(index))));
        match result {
            Ok(Ok(outcome)) => QueueItem {
                index,
                species_id: job.species_id.clone(),
                output_path: Some(job.output_path.clone()),
                status: QueueStatus::Built,
                region: Some(outcome.region.as_str().to_string()),
                error: None,
                outcome: Some(outcome),
            },
            Ok(Err(err)) => QueueItem::failed(
                index,
                &job.species_id,
                Some(job.output_path.clone()),
                err.to_string(),
            ),
            Err(payload) => QueueItem::failed(
                index,
                &job.species_id,
                Some(job.output_path.clone()),
                format!("build panicked: {}", panic_message(payload)),
            ),
        }
    }

    fn log_item(&self, item: &QueueItem) {
        let Some(debug) = self.pipeline.debug() else {
            return;
        };
        let event = match item.status {
            QueueStatus::Built => "job.built",
            QueueStatus::Skipped => "job.skipped",
            QueueStatus::Failed => "job.failed",
            QueueStatus::Pending => return,
        };
        debug.event(
            event,
            json!({
                "species_id": item.species_id,
                "job": item.index,
                "output": item.output_path.as_ref().map(|p| p.display().to_string()),
                "region": item.region,
                "error": item.error,
            }),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{BaseFeature, RangeGeometry};
    use crate::palette::PaletteResolver;
    use crate::photo::FsPhotoProvider;
    use crate::pipeline::fixtures::{low_dpi, pipeline, temp_dir};
    use crate::raster::RasterRenderer;
    use crate::region::RegionClassifier;
    use crate::source::GeometryProvider;
    use std::sync::Arc;

    fn three_records() -> Vec<QueueRecord> {
        vec![
            QueueRecord::new("lion", "Lion", "Panthera leo", "lion.geojson")
                .with_palette("savanna"),
            QueueRecord::new("ghost", "Ghost", "Nullus nihil", "ghost.geojson"),
            QueueRecord::new("okapi", "Okapi", "Okapia johnstoni", "okapi.geojson"),
        ]
    }

    #[test]
    fn missing_geometry_fails_only_that_item() {
        let pipeline = pipeline(low_dpi());
        let out = temp_dir("queue_isolate");
        let report = QueueRunner::new(&pipeline, &out).run(&three_records()).unwrap();
        assert_eq!((report.built, report.skipped, report.failed), (2, 0, 1));
        let statuses: Vec<_> = report.items.iter().map(|i| i.status).collect();
        assert_eq!(
            statuses,
            vec![QueueStatus::Built, QueueStatus::Failed, QueueStatus::Built]
        );
        let ghost = report.item("ghost").unwrap();
        assert!(ghost.error.as_deref().unwrap().contains("missing range geometry"));
        let text = report.to_string();
        assert!(text.starts_with("2 built, 0 skipped, 1 failed"));
        assert!(text.contains("ghost: build failed for ghost"));
        assert!(out.join("lion.png").is_file());
        assert!(out.join("okapi.png").is_file());
        assert_eq!(report.item("lion").unwrap().region.as_deref(), Some("AFRICA"));
    }

    #[test]
    fn rerun_skips_existing_outputs_unless_forced() {
        let pipeline = pipeline(low_dpi());
        let out = temp_dir("queue_rerun");
        let records = vec![
            QueueRecord::new("lion", "Lion", "Panthera leo", "lion.geojson"),
            QueueRecord::new("okapi", "Okapi", "Okapia johnstoni", "okapi.geojson"),
        ];
        let first = QueueRunner::new(&pipeline, &out).run(&records).unwrap();
        assert_eq!(first.built, 2);

        let second = QueueRunner::new(&pipeline, &out).run(&records).unwrap();
        assert_eq!((second.built, second.skipped, second.failed), (0, 2, 0));
        assert!(second.items.iter().all(|i| i.outcome.is_none()));

        let forced = QueueRunner::new(&pipeline, &out)
            .force_rebuild(true)
            .run(&records)
            .unwrap();
        assert_eq!(forced.built, 2);
    }

    #[test]
    fn thread_count_does_not_change_output_bytes() {
        let pipeline = pipeline(low_dpi());
        let records: Vec<QueueRecord> = ["lion", "okapi"]
            .iter()
            .flat_map(|name| {
                (0..3).map(move |n| {
                    QueueRecord::new(
                        format!("{name}-{n}"),
                        *name,
                        format!("{name} sp."),
                        format!("{name}.geojson"),
                    )
                })
            })
            .collect();
        let sequential = QueueRunner::new(&pipeline, temp_dir("queue_seq"))
            .run(&records)
            .unwrap();
        let parallel = QueueRunner::new(&pipeline, temp_dir("queue_par"))
            .threads(4)
            .run(&records)
            .unwrap();
        assert_eq!(sequential.built, 6);
        assert_eq!(parallel.built, 6);
        for (a, b) in sequential.items.iter().zip(&parallel.items) {
            assert_eq!(a.species_id, b.species_id);
            let ha = &a.outcome.as_ref().unwrap().png_sha256;
            let hb = &b.outcome.as_ref().unwrap().png_sha256;
            assert_eq!(ha, hb);
        }
    }

    #[test]
    fn colliding_output_paths_fail_the_later_item() {
        let pipeline = pipeline(low_dpi());
        let out = temp_dir("queue_collide");
        let records = vec![
            QueueRecord::new("Lion", "Lion", "Panthera leo", "lion.geojson"),
            QueueRecord::new("lion", "Lion again", "Panthera leo", "lion.geojson"),
        ];
        let report = QueueRunner::new(&pipeline, &out).threads(2).run(&records).unwrap();
        assert_eq!(report.items[0].status, QueueStatus::Built);
        assert_eq!(report.items[1].status, QueueStatus::Failed);
        assert!(report.items[1].error.as_deref().unwrap().contains("already used"));
    }

    #[test]
    fn unusable_species_id_fails_without_building() {
        let pipeline = pipeline(low_dpi());
        let out = temp_dir("queue_slug");
        let records = vec![QueueRecord::new("///", "Nothing", "Nihil", "lion.geojson")];
        let report = QueueRunner::new(&pipeline, &out).run(&records).unwrap();
        assert_eq!(report.failed, 1);
        assert!(report.items[0].output_path.is_none());
    }

    struct PanickingGeometry;

    impl GeometryProvider for PanickingGeometry {
        fn range(&self, _source: &Path) -> Result<RangeGeometry, RangePlateError> {
            panic!("geometry backend exploded");
        }

        fn base_layer(&self) -> Result<Arc<Vec<BaseFeature>>, RangePlateError> {
            Ok(Arc::new(Vec::new()))
        }
    }

    #[test]
    fn panic_in_one_build_is_captured_as_failure() {
        let pipeline = BuildPipeline::new(
            low_dpi(),
            RegionClassifier::default(),
            PaletteResolver::with_defaults().unwrap(),
            Arc::new(PanickingGeometry),
            Arc::new(FsPhotoProvider::default()),
            Arc::new(RasterRenderer::default()),
        );
        let out = temp_dir("queue_panic");
        let records = vec![
            QueueRecord::new("a", "A", "A a", "a.geojson"),
            QueueRecord::new("b", "B", "B b", "b.geojson"),
        ];
        let report = QueueRunner::new(&pipeline, &out).run(&records).unwrap();
        assert_eq!(report.failed, 2);
        assert!(
            report.items[0]
                .error
                .as_deref()
                .unwrap()
                .contains("geometry backend exploded")
        );
    }

    #[test]
    fn queue_round_trips_and_records_results() {
        let dir = temp_dir("queue_file");
        let path = dir.join("queue.json");
        let mut queue = JobQueue::new(&path);
        for record in three_records() {
            queue.append(record).unwrap();
        }
        queue.save().unwrap();

        let mut queue = JobQueue::load(&path).unwrap();
        assert_eq!(queue.len(), 3);
        assert_eq!(queue.get("ghost").unwrap().palette, "jungle");
        assert_eq!(queue.get("lion").unwrap().photo_ref(), PhotoRef::Absent);

        let pipeline = pipeline(low_dpi());
        let report = QueueRunner::new(&pipeline, dir.join("out"))
            .run_queue(&mut queue)
            .unwrap();
        assert_eq!(report.failed, 1);

        let reloaded = JobQueue::load(&path).unwrap();
        let lion = reloaded.get("lion").unwrap();
        assert_eq!(lion.status, QueueStatus::Built);
        assert_eq!(lion.region.as_deref(), Some("AFRICA"));
        let ghost = reloaded.get("ghost").unwrap();
        assert_eq!(ghost.status, QueueStatus::Failed);
        assert!(ghost.error.is_some());
    }

    #[test]
    fn append_rejects_duplicate_species() {
        let mut queue = JobQueue::new(temp_dir("queue_dup").join("q.json"));
        queue
            .append(QueueRecord::new("lion", "Lion", "Panthera leo", "lion.geojson"))
            .unwrap();
        let err = queue
            .append(QueueRecord::new("lion", "Lion", "Panthera leo", "other.geojson"))
            .unwrap_err();
        assert!(matches!(err, RangePlateError::Queue(_)));
    }

    #[test]
    fn load_rejects_unknown_fields_and_missing_file() {
        let dir = temp_dir("queue_load");
        let missing = JobQueue::load(dir.join("absent.json")).unwrap_err();
        assert!(matches!(
            missing,
            RangePlateError::MissingResource {
                kind: ResourceKind::QueueFile,
                ..
            }
        ));
        let path = dir.join("bad.json");
        std::fs::write(
            &path,
            r#"[{"species_id":"a","display_name":"A","scientific_name":"A a","geometry_source":"a.geojson","colour":"red"}]"#,
        )
        .unwrap();
        assert!(matches!(JobQueue::load(&path), Err(RangePlateError::Json(_))));
    }

    #[test]
    fn status_serializes_lowercase() {
        let record = QueueRecord::new("a", "A", "A a", "a.geojson");
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["status"], "pending");
        assert!(value.get("photo_path").is_none());
    }
}
