use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BuildMetrics {
    /// Milliseconds per pipeline stage, keyed by stage name.
    pub stage_ms: BTreeMap<&'static str, f64>,
    pub base_features: usize,
    pub cropped_features: usize,
    pub repaired_features: usize,
    pub inset_features: usize,
    pub focus_labels: usize,
    pub context_labels: usize,
    pub excluded_labels: usize,
    pub command_count: usize,
    pub text_runs_skipped: usize,
    pub output_bytes: usize,
}

impl BuildMetrics {
    pub fn record_stage(&mut self, stage: &'static str, ms: f64) {
        *self.stage_ms.entry(stage).or_insert(0.0) += ms;
    }

    pub fn total_ms(&self) -> f64 {
        self.stage_ms.values().sum()
    }
}
