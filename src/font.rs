use crate::error::{RangePlateError, ResourceKind};
use std::collections::{HashMap, VecDeque};
use std::fs;
use std::path::Path;
use std::sync::Mutex;
use ttf_parser::GlyphId;

#[derive(Debug, Clone, Hash, PartialEq, Eq)]
struct TextWidthKey {
    size_milli: i64,
    text: String,
}

#[derive(Debug)]
struct TextWidthCache {
    map: HashMap<TextWidthKey, f32>,
    order: VecDeque<TextWidthKey>,
    max_entries: usize,
}

impl TextWidthCache {
    fn new(max_entries: usize) -> Self {
        Self {
            map: HashMap::new(),
            order: VecDeque::new(),
            max_entries,
        }
    }

    fn get(&self, key: &TextWidthKey) -> Option<f32> {
        self.map.get(key).copied()
    }

    fn insert(&mut self, key: TextWidthKey, value: f32) {
        if self.map.contains_key(&key) {
            return;
        }
        self.map.insert(key.clone(), value);
        self.order.push_back(key);
        while self.map.len() > self.max_entries {
            if let Some(old) = self.order.pop_front() {
                self.map.remove(&old);
            } else {
                break;
            }
        }
    }
}

/// One glyph positioned on a baseline, in page points.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct GlyphPlacement {
    pub glyph_id: u16,
    pub origin_x: f32,
    pub origin_y: f32,
    pub scale: f32,
}

/// A TrueType/OpenType font loaded once and shared by every render.
#[derive(Debug)]
pub struct FontFace {
    name: String,
    data: Vec<u8>,
    units_per_em: f32,
    width_cache: Mutex<TextWidthCache>,
}

impl FontFace {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, RangePlateError> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(RangePlateError::missing(ResourceKind::Font, path));
        }
        let data = fs::read(path)?;
        let fallback_name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("font")
            .to_string();
        Self::from_bytes(data, &fallback_name)
    }

    pub fn from_bytes(data: Vec<u8>, fallback_name: &str) -> Result<Self, RangePlateError> {
        let (name, units_per_em) = {
            let face = ttf_parser::Face::parse(&data, 0).map_err(|e| {
                RangePlateError::InvalidConfiguration(format!(
                    "font '{fallback_name}' could not be parsed: {e}"
                ))
            })?;
            let name = face
                .names()
                .into_iter()
                .filter(|n| n.name_id == ttf_parser::name_id::FULL_NAME)
                .find_map(|n| n.to_string())
                .unwrap_or_else(|| fallback_name.to_string());
            (name, face.units_per_em().max(1) as f32)
        };
        Ok(Self {
            name,
            data,
            units_per_em,
            width_cache: Mutex::new(TextWidthCache::new(4_096)),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn face(&self) -> Option<ttf_parser::Face<'_>> {
        ttf_parser::Face::parse(&self.data, 0).ok()
    }

    /// Advance width of `text` at `font_size`, unshaped. Characters without a glyph advance
    /// half an em.
    pub fn text_width(&self, text: &str, font_size: f32) -> f32 {
        let key = TextWidthKey {
            size_milli: (font_size * 1000.0).round() as i64,
            text: text.to_string(),
        };
        if let Ok(cache) = self.width_cache.lock() {
            if let Some(value) = cache.get(&key) {
                return value;
            }
        }
        let (_, width) = self.layout(text, font_size, 0.0, 0.0);
        if let Ok(mut cache) = self.width_cache.lock() {
            cache.insert(key, width);
        }
        width
    }

    /// Lays `text` out left to right from `(x, y)`; returns the placements and the pen advance.
    pub(crate) fn layout(
        &self,
        text: &str,
        font_size: f32,
        x: f32,
        y: f32,
    ) -> (Vec<GlyphPlacement>, f32) {
        let Some(face) = self.face() else {
            return (Vec::new(), 0.0);
        };
        let scale = font_size / self.units_per_em;
        let mut out = Vec::new();
        let mut pen_x = 0.0f32;
        for ch in text.chars() {
            let gid = face.glyph_index(ch).map(|id| id.0).unwrap_or(0);
            if gid == 0 {
                pen_x += font_size * 0.5;
                continue;
            }
            out.push(GlyphPlacement {
                glyph_id: gid,
                origin_x: x + pen_x,
                origin_y: y,
                scale,
            });
            let advance_units = face.glyph_hor_advance(GlyphId(gid)).unwrap_or(0) as f32;
            let mut adv = advance_units * scale;
            if adv <= 0.0 {
                adv = font_size * 0.5;
            }
            pen_x += adv;
        }
        (out, pen_x)
    }
}

/// Well-known locations of a sans-serif system font, used by tests and by callers that want
/// text without shipping their own font file.
pub fn find_system_sans() -> Option<std::path::PathBuf> {
    const CANDIDATES: [&str; 6] = [
        "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
        "/usr/share/fonts/dejavu/DejaVuSans.ttf",
        "/usr/share/fonts/TTF/DejaVuSans.ttf",
        "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
        "/Library/Fonts/Arial.ttf",
        "C:\\Windows\\Fonts\\arial.ttf",
    ];
    CANDIDATES
        .iter()
        .map(std::path::PathBuf::from)
        .find(|p| p.is_file())
}
