use crate::canvas::{Command, Document, TextAnchor};
use crate::error::RangePlateError;
use crate::font::FontFace;
use crate::types::{Color, PT_PER_INCH, mm_to_px};
use image::RgbaImage;
use std::collections::HashMap;
use std::sync::Arc;
use tiny_skia::{
    FillRule, FilterQuality, LineCap, LineJoin, Mask, Paint, Path, PathBuilder, Pixmap,
    PixmapPaint, Rect, Stroke, Transform,
};
use ttf_parser::{GlyphId, OutlineBuilder};

/// Largest edge, in pixels, a single page may rasterize to.
pub const MAX_EDGE_PX: i64 = 20_000;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenderStats {
    pub text_runs: usize,
    pub text_runs_skipped: usize,
    pub images_drawn: usize,
    pub images_missing: usize,
}

#[derive(Debug, Clone)]
pub struct RenderedPage {
    pub png: Vec<u8>,
    pub width_px: u32,
    pub height_px: u32,
    pub stats: RenderStats,
}

/// Turns a composed page into an encoded raster.
pub trait Renderer: Send + Sync {
    fn render(&self, document: &Document, dpi: u32) -> Result<RenderedPage, RangePlateError>;
}

/// `tiny-skia` renderer. Without a font, text runs are skipped and counted in the stats.
#[derive(Debug, Clone, Default)]
pub struct RasterRenderer {
    font: Option<Arc<FontFace>>,
}

impl RasterRenderer {
    pub fn new(font: Option<Arc<FontFace>>) -> Self {
        Self { font }
    }

    pub fn has_font(&self) -> bool {
        self.font.is_some()
    }
}

#[derive(Clone)]
struct RasterState {
    fill_color: Color,
    stroke_color: Color,
    line_width: f32,
    font_size: f32,
    clip_mask: Option<Mask>,
}

impl Default for RasterState {
    fn default() -> Self {
        Self {
            fill_color: Color::BLACK,
            stroke_color: Color::BLACK,
            line_width: 1.0,
            font_size: 12.0,
            clip_mask: None,
        }
    }
}

impl Renderer for RasterRenderer {
    fn render(&self, document: &Document, dpi: u32) -> Result<RenderedPage, RangePlateError> {
        if dpi == 0 {
            return Err(RangePlateError::InvalidConfiguration(
                "dpi must be > 0".to_string(),
            ));
        }
        let width_px = px_dimension(document.page_mm.0, dpi)?;
        let height_px = px_dimension(document.page_mm.1, dpi)?;
        let mut pixmap = Pixmap::new(width_px, height_px).ok_or_else(|| {
            RangePlateError::InvalidConfiguration(format!(
                "invalid raster size {width_px}x{height_px} at {dpi} DPI"
            ))
        })?;
        pixmap.fill(tiny_skia::Color::from_rgba8(255, 255, 255, 255));

        // Page space is y-up; flip once here so commands stay in page points.
        let scale = dpi as f32 / PT_PER_INCH;
        let base_transform = Transform::from_row(scale, 0.0, 0.0, -scale, 0.0, height_px as f32);

        let mut stats = RenderStats::default();
        let mut state = RasterState::default();
        let mut stack: Vec<RasterState> = Vec::new();
        let mut path_builder = PathBuilder::new();
        let mut has_path = false;
        let mut image_cache: HashMap<String, Option<Pixmap>> = HashMap::new();

        for cmd in &document.commands {
            match cmd {
                Command::SaveState => stack.push(state.clone()),
                Command::RestoreState => {
                    if let Some(restored) = stack.pop() {
                        state = restored;
                    }
                }
                Command::Meta { .. } => {}
                Command::SetFillColor(color) => state.fill_color = *color,
                Command::SetStrokeColor(color) => state.stroke_color = *color,
                Command::SetLineWidth(width) => state.line_width = width.max(0.0),
                Command::SetFontSize(size) => state.font_size = *size,
                Command::ClipRect {
                    x,
                    y,
                    width,
                    height,
                } => match Rect::from_xywh(*x, *y, *width, *height)
                    .filter(|_| *width > 0.0 && *height > 0.0)
                {
                    Some(rect) => {
                        let path = PathBuilder::from_rect(rect);
                        apply_clip_path(
                            &mut state,
                            &path,
                            base_transform,
                            pixmap.width(),
                            pixmap.height(),
                        );
                    }
                    // An empty clip hides everything that follows until the state is restored.
                    None => state.clip_mask = Mask::new(pixmap.width(), pixmap.height()),
                },
                Command::MoveTo { x, y } => {
                    path_builder.move_to(*x, *y);
                    has_path = true;
                }
                Command::LineTo { x, y } => {
                    path_builder.line_to(*x, *y);
                    has_path = true;
                }
                Command::ClosePath => {
                    if has_path {
                        path_builder.close();
                    }
                }
                Command::Fill => fill_current_path(
                    &mut pixmap,
                    &state,
                    &mut path_builder,
                    &mut has_path,
                    FillRule::Winding,
                    base_transform,
                ),
                Command::FillEvenOdd => fill_current_path(
                    &mut pixmap,
                    &state,
                    &mut path_builder,
                    &mut has_path,
                    FillRule::EvenOdd,
                    base_transform,
                ),
                Command::Stroke => {
                    if let Some(path) = take_path(&mut path_builder, &mut has_path) {
                        stroke_path(&mut pixmap, &state, &path, base_transform);
                    }
                }
                Command::FillStrokeEvenOdd => {
                    if let Some(path) = take_path(&mut path_builder, &mut has_path) {
                        let paint = fill_paint(state.fill_color);
                        pixmap.fill_path(
                            &path,
                            &paint,
                            FillRule::EvenOdd,
                            base_transform,
                            state.clip_mask.as_ref(),
                        );
                        stroke_path(&mut pixmap, &state, &path, base_transform);
                    }
                }
                Command::DrawString { x, y, text, anchor } => {
                    let Some(font) = self.font.as_deref() else {
                        stats.text_runs_skipped += 1;
                        continue;
                    };
                    if draw_string(&mut pixmap, &state, font, *x, *y, text, *anchor, base_transform) {
                        stats.text_runs += 1;
                    } else {
                        stats.text_runs_skipped += 1;
                    }
                }
                Command::DrawRect {
                    x,
                    y,
                    width,
                    height,
                } => {
                    if let Some(rect) = Rect::from_xywh(*x, *y, *width, *height) {
                        let path = PathBuilder::from_rect(rect);
                        let paint = fill_paint(state.fill_color);
                        pixmap.fill_path(
                            &path,
                            &paint,
                            FillRule::Winding,
                            base_transform,
                            state.clip_mask.as_ref(),
                        );
                    }
                }
                Command::DrawImage {
                    x,
                    y,
                    width,
                    height,
                    resource_id,
                } => {
                    let source = image_cache.entry(resource_id.clone()).or_insert_with(|| {
                        document
                            .images
                            .get(resource_id)
                            .and_then(|img| rgba_to_pixmap(img))
                    });
                    let Some(image) = source.as_ref() else {
                        stats.images_missing += 1;
                        continue;
                    };
                    let src_w = image.width() as f32;
                    let src_h = image.height() as f32;
                    if src_w <= 0.0 || src_h <= 0.0 || *width <= 0.0 || *height <= 0.0 {
                        continue;
                    }
                    // Source row 0 is the visual top of the placed rectangle.
                    let image_ts = Transform::from_row(
                        width / src_w,
                        0.0,
                        0.0,
                        -height / src_h,
                        *x,
                        y + height,
                    );
                    let mut paint = PixmapPaint::default();
                    paint.quality = FilterQuality::Bilinear;
                    pixmap.draw_pixmap(
                        0,
                        0,
                        image.as_ref(),
                        &paint,
                        base_transform.pre_concat(image_ts),
                        state.clip_mask.as_ref(),
                    );
                    stats.images_drawn += 1;
                }
            }
        }

        let png = pixmap
            .encode_png()
            .map_err(|e| RangePlateError::Render(format!("png encode failed: {e}")))?;
        Ok(RenderedPage {
            png,
            width_px,
            height_px,
            stats,
        })
    }
}

fn px_dimension(mm: f64, dpi: u32) -> Result<u32, RangePlateError> {
    let px = mm_to_px(mm, dpi);
    if px <= 0 || px > MAX_EDGE_PX {
        return Err(RangePlateError::InvalidConfiguration(format!(
            "pixel dimension {px} for {mm:.3} mm at {dpi} DPI is outside 1..={MAX_EDGE_PX}"
        )));
    }
    u32::try_from(px).map_err(|_| {
        RangePlateError::InvalidConfiguration(format!("pixel dimension out of range: {px}"))
    })
}

fn fill_current_path(
    pixmap: &mut Pixmap,
    state: &RasterState,
    path_builder: &mut PathBuilder,
    has_path: &mut bool,
    fill_rule: FillRule,
    base_transform: Transform,
) {
    let Some(path) = take_path(path_builder, has_path) else {
        return;
    };
    let paint = fill_paint(state.fill_color);
    pixmap.fill_path(
        &path,
        &paint,
        fill_rule,
        base_transform,
        state.clip_mask.as_ref(),
    );
}

fn stroke_path(pixmap: &mut Pixmap, state: &RasterState, path: &Path, base_transform: Transform) {
    if state.line_width <= 0.0 {
        return;
    }
    let paint = fill_paint(state.stroke_color);
    let mut stroke = Stroke::default();
    stroke.width = state.line_width;
    stroke.line_cap = LineCap::Butt;
    stroke.line_join = LineJoin::Round;
    pixmap.stroke_path(
        path,
        &paint,
        &stroke,
        base_transform,
        state.clip_mask.as_ref(),
    );
}

fn apply_clip_path(
    state: &mut RasterState,
    path: &Path,
    transform: Transform,
    width: u32,
    height: u32,
) {
    if let Some(mask) = state.clip_mask.as_mut() {
        mask.intersect_path(path, FillRule::Winding, true, transform);
        return;
    }
    let Some(mut mask) = Mask::new(width, height) else {
        return;
    };
    mask.fill_path(path, FillRule::Winding, true, transform);
    state.clip_mask = Some(mask);
}

#[allow(clippy::too_many_arguments)]
fn draw_string(
    pixmap: &mut Pixmap,
    state: &RasterState,
    font: &FontFace,
    x: f32,
    y: f32,
    text: &str,
    anchor: TextAnchor,
    base_transform: Transform,
) -> bool {
    let font_size = state.font_size.max(0.0);
    if font_size <= 0.0 || text.trim().is_empty() {
        return false;
    }
    let Some(face) = font.face() else {
        return false;
    };
    let width = font.text_width(text, font_size);
    let start_x = match anchor {
        TextAnchor::Start => x,
        TextAnchor::Middle => x - width / 2.0,
        TextAnchor::End => x - width,
    };
    let (placements, _) = font.layout(text, font_size, start_x, y);
    let paint = fill_paint(state.fill_color);
    let mut drawn = 0usize;
    for placement in placements {
        let mut builder =
            GlyphPathBuilder::new(placement.origin_x, placement.origin_y, placement.scale);
        if face
            .outline_glyph(GlyphId(placement.glyph_id), &mut builder)
            .is_none()
        {
            continue;
        }
        let Some(path) = builder.finish() else {
            continue;
        };
        pixmap.fill_path(
            &path,
            &paint,
            FillRule::Winding,
            base_transform,
            state.clip_mask.as_ref(),
        );
        drawn += 1;
    }
    drawn > 0
}

// Font units are y-up like page space, so outlines only need scaling and offsetting.
struct GlyphPathBuilder {
    builder: PathBuilder,
    origin_x: f32,
    origin_y: f32,
    scale: f32,
}

impl GlyphPathBuilder {
    fn new(origin_x: f32, origin_y: f32, scale: f32) -> Self {
        Self {
            builder: PathBuilder::new(),
            origin_x,
            origin_y,
            scale,
        }
    }

    fn point(&self, x: f32, y: f32) -> (f32, f32) {
        (self.origin_x + x * self.scale, self.origin_y + y * self.scale)
    }

    fn finish(self) -> Option<Path> {
        self.builder.finish()
    }
}

impl OutlineBuilder for GlyphPathBuilder {
    fn move_to(&mut self, x: f32, y: f32) {
        let (px, py) = self.point(x, y);
        self.builder.move_to(px, py);
    }

    fn line_to(&mut self, x: f32, y: f32) {
        let (px, py) = self.point(x, y);
        self.builder.line_to(px, py);
    }

    fn quad_to(&mut self, x1: f32, y1: f32, x: f32, y: f32) {
        let (cx, cy) = self.point(x1, y1);
        let (px, py) = self.point(x, y);
        self.builder.quad_to(cx, cy, px, py);
    }

    fn curve_to(&mut self, x1: f32, y1: f32, x2: f32, y2: f32, x: f32, y: f32) {
        let (c1x, c1y) = self.point(x1, y1);
        let (c2x, c2y) = self.point(x2, y2);
        let (px, py) = self.point(x, y);
        self.builder.cubic_to(c1x, c1y, c2x, c2y, px, py);
    }

    fn close(&mut self) {
        self.builder.close();
    }
}

fn take_path(path_builder: &mut PathBuilder, has_path: &mut bool) -> Option<Path> {
    if !*has_path {
        return None;
    }
    *has_path = false;
    let builder = std::mem::replace(path_builder, PathBuilder::new());
    builder.finish()
}

fn fill_paint(color: Color) -> Paint<'static> {
    let [r, g, b, a] = color.to_rgba8();
    let mut paint = Paint::default();
    paint.set_color_rgba8(r, g, b, a);
    paint.anti_alias = true;
    paint
}

fn rgba_to_pixmap(rgba: &RgbaImage) -> Option<Pixmap> {
    let (width, height) = rgba.dimensions();
    let mut pixmap = Pixmap::new(width, height)?;
    let src = rgba.as_raw();
    let dst = pixmap.data_mut();
    for (src_px, dst_px) in src.chunks_exact(4).zip(dst.chunks_exact_mut(4)) {
        let a = src_px[3];
        dst_px[0] = premul_u8(src_px[0], a);
        dst_px[1] = premul_u8(src_px[1], a);
        dst_px[2] = premul_u8(src_px[2], a);
        dst_px[3] = a;
    }
    Some(pixmap)
}

fn premul_u8(channel: u8, alpha: u8) -> u8 {
    let prod = (channel as u16) * (alpha as u16) + 127;
    ((prod + (prod >> 8)) >> 8) as u8
}
