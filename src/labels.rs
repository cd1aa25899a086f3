use crate::error::BuildWarning;
use crate::geometry::{self, BaseFeature, RangeGeometry};

pub const DEFAULT_LETTER_SPACING: usize = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LabelClass {
    /// The feature overlaps the species range.
    Focus,
    /// Geographic reference only.
    Context,
}

impl LabelClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            LabelClass::Focus => "focus",
            LabelClass::Context => "context",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LabelCandidate {
    pub x: f64,
    pub y: f64,
    pub text: String,
    pub class: LabelClass,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExclusionReason {
    MissingName,
    EmptyGeometry,
    InvalidGeometry,
    UndefinedCentroid,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LabelSet {
    pub focus: Vec<LabelCandidate>,
    pub context: Vec<LabelCandidate>,
    pub excluded: Vec<(usize, ExclusionReason)>,
    pub candidates: usize,
}

impl LabelSet {
    pub fn len(&self) -> usize {
        self.focus.len() + self.context.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Set when there were candidates but none survived filtering.
    pub fn warning(&self) -> Option<BuildWarning> {
        if self.candidates > 0 && self.is_empty() {
            Some(BuildWarning::LabelData {
                excluded: self.excluded.len(),
                total: self.candidates,
            })
        } else {
            None
        }
    }
}

/// Uppercases `name`, then joins every character, existing spaces and punctuation
/// included, with `spacing` blanks: `"South Africa"` at 1 becomes `"S O U T H   A F R I C A"`.
pub fn letter_space(name: &str, spacing: usize) -> String {
    let separator = " ".repeat(spacing);
    let upper = name.to_uppercase();
    let mut out = String::with_capacity(upper.len() * (spacing + 1));
    for (idx, ch) in upper.chars().enumerate() {
        if idx > 0 {
            out.push_str(&separator);
        }
        out.push(ch);
    }
    out
}

/// Places one label per usable feature at its centroid and splits them by whether the
/// feature polygon intersects the range. Output order follows `features`.
pub fn place_labels(features: &[BaseFeature], range: &RangeGeometry, spacing: usize) -> LabelSet {
    let mut set = LabelSet {
        candidates: features.len(),
        ..LabelSet::default()
    };
    for (idx, feature) in features.iter().enumerate() {
        let Some(name) = feature.label_name() else {
            set.excluded.push((idx, ExclusionReason::MissingName));
            continue;
        };
        if geometry::is_empty(&feature.geometry) {
            set.excluded.push((idx, ExclusionReason::EmptyGeometry));
            continue;
        }
        if !geometry::is_valid(&feature.geometry) {
            set.excluded.push((idx, ExclusionReason::InvalidGeometry));
            continue;
        }
        let Some((x, y)) = geometry::centroid(&feature.geometry) else {
            set.excluded.push((idx, ExclusionReason::UndefinedCentroid));
            continue;
        };
        let class = if geometry::intersects(&feature.geometry, range.shape()) {
            LabelClass::Focus
        } else {
            LabelClass::Context
        };
        let candidate = LabelCandidate {
            x,
            y,
            text: letter_space(name, spacing),
            class,
        };
        match class {
            LabelClass::Focus => set.focus.push(candidate),
            LabelClass::Context => set.context.push(candidate),
        }
    }
    set
}
