use std::fmt;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    RangeGeometry,
    BaseLayer,
    Photo,
    Font,
    QueueFile,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::RangeGeometry => "range geometry",
            ResourceKind::BaseLayer => "base layer",
            ResourceKind::Photo => "photo",
            ResourceKind::Font => "font",
            ResourceKind::QueueFile => "queue file",
        }
    }
}

#[derive(Debug)]
pub enum RangePlateError {
    InvalidGeometry(String),
    MissingResource { kind: ResourceKind, path: PathBuf },
    InvalidConfiguration(String),
    Render(String),
    Queue(String),
    Build {
        species_id: String,
        source: Box<RangePlateError>,
    },
    Io(std::io::Error),
    Json(serde_json::Error),
}

impl RangePlateError {
    pub fn missing(kind: ResourceKind, path: impl Into<PathBuf>) -> Self {
        RangePlateError::MissingResource {
            kind,
            path: path.into(),
        }
    }

    /// Tags an error with the species whose build produced it. Already-tagged errors pass through.
    pub fn for_species(self, species_id: &str) -> Self {
        match self {
            RangePlateError::Build { .. } => self,
            other => RangePlateError::Build {
                species_id: species_id.to_string(),
                source: Box::new(other),
            },
        }
    }

    /// The innermost error, skipping `Build` wrappers.
    pub fn root(&self) -> &RangePlateError {
        match self {
            RangePlateError::Build { source, .. } => source.root(),
            other => other,
        }
    }
}

impl fmt::Display for RangePlateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RangePlateError::InvalidGeometry(message) => {
                write!(f, "invalid geometry: {}", message)
            }
            RangePlateError::MissingResource { kind, path } => {
                write!(f, "missing {}: {}", kind.as_str(), path.display())
            }
            RangePlateError::InvalidConfiguration(message) => {
                write!(f, "invalid configuration: {}", message)
            }
            RangePlateError::Render(message) => write!(f, "render error: {}", message),
            RangePlateError::Queue(message) => write!(f, "queue error: {}", message),
            RangePlateError::Build { species_id, source } => {
                write!(f, "build failed for {}: {}", species_id, source)
            }
            RangePlateError::Io(err) => write!(f, "io error: {}", err),
            RangePlateError::Json(err) => write!(f, "json error: {}", err),
        }
    }
}

impl std::error::Error for RangePlateError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RangePlateError::Io(err) => Some(err),
            RangePlateError::Json(err) => Some(err),
            RangePlateError::Build { source, .. } => Some(source.as_ref()),
            _ => None,
        }
    }
}

impl From<std::io::Error> for RangePlateError {
    fn from(value: std::io::Error) -> Self {
        RangePlateError::Io(value)
    }
}

impl From<serde_json::Error> for RangePlateError {
    fn from(value: serde_json::Error) -> Self {
        RangePlateError::Json(value)
    }
}

/// Conditions recovered locally during a build. They never fail the build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildWarning {
    UnknownPalette { requested: String, fallback: String },
    LabelData { excluded: usize, total: usize },
}

impl BuildWarning {
    pub fn code(&self) -> &'static str {
        match self {
            BuildWarning::UnknownPalette { .. } => "palette.fallback",
            BuildWarning::LabelData { .. } => "labels.excluded",
        }
    }
}

impl fmt::Display for BuildWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuildWarning::UnknownPalette {
                requested,
                fallback,
            } => write!(
                f,
                "unknown palette '{}', falling back to '{}'",
                requested, fallback
            ),
            BuildWarning::LabelData { excluded, total } => write!(
                f,
                "all {} of {} label candidates excluded (missing name or unusable geometry)",
                excluded, total
            ),
        }
    }
}
