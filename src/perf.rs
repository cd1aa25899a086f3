use serde_json::json;
use std::collections::HashMap;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Instant;

/// JSON-lines timing sink. On drop a `<stem>_hot.log` file ranks the slowest stages.
#[derive(Clone)]
pub struct PerfLogger {
    inner: Arc<Mutex<PerfState>>,
}

struct PerfState {
    writer: BufWriter<File>,
    path: PathBuf,
    span_totals: HashMap<String, f64>,
    span_counts: HashMap<String, u64>,
    count_totals: HashMap<String, u64>,
}

impl PerfLogger {
    pub fn new(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::create(&path)?;
        Ok(Self {
            inner: Arc::new(Mutex::new(PerfState {
                writer: BufWriter::new(file),
                path,
                span_totals: HashMap::new(),
                span_counts: HashMap::new(),
                count_totals: HashMap::new(),
            })),
        })
    }

    pub fn log_span_ms(&self, name: &str, job: Option<usize>, ms: f64) {
        let record = json!({
            "type": "perf.span",
            "name": name,
            "job": job,
            "unit": "ms",
            "ms": (ms * 1000.0).round() / 1000.0,
        });
        if let Ok(mut state) = self.inner.lock() {
            *state.span_totals.entry(name.to_string()).or_insert(0.0) += ms;
            let entry = state.span_counts.entry(name.to_string()).or_insert(0);
            *entry = entry.saturating_add(1);
            let _ = writeln!(state.writer, "{record}");
        }
    }

    pub fn log_counts(&self, name: &str, job: Option<usize>, counts: &[(&str, u64)]) {
        let fields: serde_json::Map<String, serde_json::Value> = counts
            .iter()
            .map(|(key, value)| (key.to_string(), json!(value)))
            .collect();
        let record = json!({
            "type": "perf.counts",
            "name": name,
            "job": job,
            "counts": fields,
        });
        if let Ok(mut state) = self.inner.lock() {
            for (key, value) in counts {
                let full_key = format!("{name}.{key}");
                let entry = state.count_totals.entry(full_key).or_insert(0);
                *entry = entry.saturating_add(*value);
            }
            let _ = writeln!(state.writer, "{record}");
        }
    }

    pub fn flush(&self) {
        if let Ok(mut state) = self.inner.lock() {
            let _ = state.writer.flush();
        }
    }
}

impl Drop for PerfState {
    fn drop(&mut self) {
        let _ = self.writer.flush();
        let hot_path = hot_path_for(&self.path);
        let Ok(file) = File::create(&hot_path) else {
            return;
        };
        let mut writer = BufWriter::new(file);

        let mut spans: Vec<(&String, &f64)> = self.span_totals.iter().collect();
        spans.sort_by(|a, b| {
            b.1.partial_cmp(a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(b.0))
        });
        for (rank, (name, ms)) in spans.into_iter().take(100).enumerate() {
            let count = self.span_counts.get(name).copied().unwrap_or(1);
            let avg = if count == 0 { 0.0 } else { ms / count as f64 };
            let record = json!({
                "type": "perf.hot.span",
                "rank": rank + 1,
                "name": name,
                "unit": "ms",
                "agg": "sum",
                "ms": (ms * 1000.0).round() / 1000.0,
                "count": count,
                "avg_ms": (avg * 1000.0).round() / 1000.0,
            });
            let _ = writeln!(writer, "{record}");
        }

        let mut counts: Vec<(&String, &u64)> = self.count_totals.iter().collect();
        counts.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));
        for (rank, (name, value)) in counts.into_iter().take(100).enumerate() {
            let record = json!({
                "type": "perf.hot.count",
                "rank": rank + 1,
                "name": name,
                "value": value,
            });
            let _ = writeln!(writer, "{record}");
        }
    }
}

fn hot_path_for(path: &Path) -> PathBuf {
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("rangeplate_perf.log");
    let stem = file_name
        .rsplit_once('.')
        .map(|(s, _)| s)
        .unwrap_or(file_name);
    path.with_file_name(format!("{stem}_hot.log"))
}

/// Times one pipeline stage. `finish` reports to the logger, if any, and returns milliseconds.
pub(crate) struct StageTimer {
    name: &'static str,
    started: Instant,
}

impl StageTimer {
    pub fn start(name: &'static str) -> Self {
        Self {
            name,
            started: Instant::now(),
        }
    }

    pub fn finish(self, perf: Option<&PerfLogger>, job: Option<usize>) -> f64 {
        let ms = self.started.elapsed().as_secs_f64() * 1000.0;
        if let Some(perf) = perf {
            perf.log_span_ms(self.name, job, ms);
        }
        ms
    }
}
