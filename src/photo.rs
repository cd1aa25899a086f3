use crate::error::{RangePlateError, ResourceKind};
use image::RgbaImage;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Photo reference for one species. Absence is a normal case, not a sentinel path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PhotoRef {
    Absent,
    File(PathBuf),
}

impl PhotoRef {
    pub fn from_option(path: Option<PathBuf>) -> Self {
        match path {
            Some(path) if !path.as_os_str().is_empty() => PhotoRef::File(path),
            _ => PhotoRef::Absent,
        }
    }

    pub fn path(&self) -> Option<&Path> {
        match self {
            PhotoRef::Absent => None,
            PhotoRef::File(path) => Some(path),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Photo {
    pub image: Arc<RgbaImage>,
}

impl Photo {
    pub fn new(image: RgbaImage) -> Self {
        Self {
            image: Arc::new(image),
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn aspect_ratio(&self) -> f64 {
        if self.height() == 0 {
            return 0.0;
        }
        self.width() as f64 / self.height() as f64
    }

    /// Crops the centre of the photo to `target_aspect` (width / height) so it can fill a
    /// panel without distortion.
    pub fn cover_crop(&self, target_aspect: f64) -> Photo {
        let (x, y, w, h) = cover_crop_rect(self.width(), self.height(), target_aspect);
        if (x, y, w, h) == (0, 0, self.width(), self.height()) {
            return self.clone();
        }
        Photo::new(image::imageops::crop_imm(&*self.image, x, y, w, h).to_image())
    }
}

/// Largest centred sub-rectangle of a `width x height` image with the requested aspect,
/// as `(x, y, w, h)` in pixels. Never returns an empty rectangle for a non-empty image.
pub fn cover_crop_rect(width: u32, height: u32, target_aspect: f64) -> (u32, u32, u32, u32) {
    if width == 0 || height == 0 || !(target_aspect.is_finite() && target_aspect > 0.0) {
        return (0, 0, width, height);
    }
    let source_aspect = width as f64 / height as f64;
    if source_aspect > target_aspect {
        let w = ((height as f64 * target_aspect).round() as u32).clamp(1, width);
        ((width - w) / 2, 0, w, height)
    } else {
        let h = ((width as f64 / target_aspect).round() as u32).clamp(1, height);
        (0, (height - h) / 2, width, h)
    }
}

pub trait PhotoProvider: Send + Sync {
    /// `Ok(None)` for [`PhotoRef::Absent`]; a referenced file that is missing is an error.
    fn load(&self, photo: &PhotoRef) -> Result<Option<Photo>, RangePlateError>;
}

/// Reads PNG or JPEG files, resolving relative paths against an optional root.
#[derive(Debug, Clone, Default)]
pub struct FsPhotoProvider {
    root: Option<PathBuf>,
}

impl FsPhotoProvider {
    pub fn new(root: Option<PathBuf>) -> Self {
        Self { root }
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        match &self.root {
            Some(root) if path.is_relative() => root.join(path),
            _ => path.to_path_buf(),
        }
    }
}

impl PhotoProvider for FsPhotoProvider {
    fn load(&self, photo: &PhotoRef) -> Result<Option<Photo>, RangePlateError> {
        let Some(path) = photo.path() else {
            return Ok(None);
        };
        let path = self.resolve(path);
        if !path.is_file() {
            return Err(RangePlateError::missing(ResourceKind::Photo, path));
        }
        let bytes = std::fs::read(&path)?;
        let decoded = image::load_from_memory(&bytes).map_err(|e| {
            RangePlateError::Render(format!("photo {} could not be decoded: {e}", path.display()))
        })?;
        let rgba = decoded.to_rgba8();
        if rgba.width() == 0 || rgba.height() == 0 {
            return Err(RangePlateError::Render(format!(
                "photo {} has no pixels",
                path.display()
            )));
        }
        Ok(Some(Photo::new(rgba)))
    }
}
