use crate::canvas::{Canvas, Document, TextAnchor};
use crate::extent::Extent;
use crate::geometry::{BaseFeature, RangeGeometry};
use crate::labels::{LabelCandidate, LabelSet};
use crate::layout::{LayoutPlan, Panel};
use crate::palette::Palette;
use crate::photo::Photo;
use crate::scale_bar::{ScaleBar, ScaleBars};
use crate::types::{Color, Rect};
use geo::{LineString, MultiPolygon};
use rangeplate_tables::Region;

const TITLE_SIZE: f32 = 22.0;
const SCIENTIFIC_SIZE: f32 = 13.0;
const ATTRIBUTION_SIZE: f32 = 7.0;
const FOCUS_LABEL_SIZE: f32 = 8.0;
const CONTEXT_LABEL_SIZE: f32 = 6.0;
const SCALE_LABEL_SIZE: f32 = 6.5;
const CAPTION_SIZE: f32 = 7.0;
const MARGIN_PT: f32 = 12.0;

pub const PHOTO_RESOURCE: &str = "photo";

/// Text blocks printed in the title and attribution bands.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FigureText {
    pub display_name: String,
    pub scientific_name: String,
    pub attribution: String,
    pub photo_credit: Option<String>,
}

/// Everything needed to draw one figure. Produced by the build pipeline.
#[derive(Debug, Clone)]
pub struct FigurePlan {
    pub text: FigureText,
    pub extent: Extent,
    pub region: Region,
    pub inset_window: Extent,
    pub palette: Palette,
    pub range: RangeGeometry,
    pub land: Vec<BaseFeature>,
    pub inset_land: Vec<BaseFeature>,
    pub labels: LabelSet,
    pub scale_bars: ScaleBars,
    pub layout: LayoutPlan,
    pub photo: Option<Photo>,
}

/// Equirectangular mapping from an extent onto a page rectangle.
#[derive(Debug, Clone, Copy)]
struct Projection {
    extent: Extent,
    rect: Rect,
}

impl Projection {
    fn project(&self, lon: f64, lat: f64) -> (f32, f32) {
        let fx = (lon - self.extent.xmin()) / self.extent.lon_span();
        let fy = (lat - self.extent.ymin()) / self.extent.lat_span();
        (
            self.rect.x + (fx * self.rect.width as f64) as f32,
            self.rect.y + (fy * self.rect.height as f64) as f32,
        )
    }
}

fn panel_rect(plan: &LayoutPlan, panel: Panel, page_w: f32, page_h: f32) -> Rect {
    let Some(norm) = plan.panel(panel) else {
        return Rect {
            x: 0.0,
            y: 0.0,
            width: 0.0,
            height: 0.0,
        };
    };
    Rect {
        x: norm.x as f32 * page_w,
        y: norm.y as f32 * page_h,
        width: norm.width as f32 * page_w,
        height: norm.height as f32 * page_h,
    }
}

fn has_area(rect: &Rect) -> bool {
    rect.width > 0.0 && rect.height > 0.0
}

/// Lays a finished plan out as one page of drawing commands.
pub fn compose(plan: &FigurePlan) -> Document {
    let page = plan.layout.page;
    let mut canvas = Canvas::new(page.page_width_mm, page.page_height_mm);
    let size = canvas.page_size();
    let rect_of = |panel| panel_rect(&plan.layout, panel, size.width, size.height);

    draw_main_map(&mut canvas, plan, rect_of(Panel::MainMap));
    draw_inset(&mut canvas, plan, rect_of(Panel::LocatorInset));
    draw_photo(&mut canvas, plan, rect_of(Panel::Photo));
    draw_title(&mut canvas, plan, rect_of(Panel::Title));
    draw_attribution(&mut canvas, plan, rect_of(Panel::Attribution), size.width);

    canvas.meta("panel", Panel::Divider.as_str());
    let divider = rect_of(Panel::Divider);
    if has_area(&divider) {
        canvas.set_fill_color(plan.palette.border);
        canvas.draw_rect(divider.x, divider.y, divider.width, divider.height);
    }
    canvas.finish()
}

fn draw_main_map(canvas: &mut Canvas, plan: &FigurePlan, rect: Rect) {
    canvas.meta("panel", Panel::MainMap.as_str());
    if !has_area(&rect) {
        return;
    }
    let projection = Projection {
        extent: plan.extent,
        rect,
    };
    let palette = &plan.palette;

    canvas.save_state();
    canvas.clip_rect(rect.x, rect.y, rect.width, rect.height);
    canvas.set_fill_color(palette.ocean);
    canvas.draw_rect(rect.x, rect.y, rect.width, rect.height);

    canvas.set_fill_color(palette.land);
    canvas.set_stroke_color(palette.border);
    canvas.set_line_width(0.4);
    for feature in &plan.land {
        if trace_shape(canvas, &projection, &feature.geometry) {
            canvas.fill_stroke_evenodd();
        }
    }

    canvas.set_fill_color(palette.range);
    canvas.set_stroke_color(palette.stroke);
    canvas.set_line_width(0.6);
    for polygon in &plan.range.shape().0 {
        let single = MultiPolygon::new(vec![polygon.clone()]);
        if trace_shape(canvas, &projection, &single) {
            canvas.fill_stroke_evenodd();
        }
    }

    // Context first so focus labels sit on top where they overlap.
    draw_labels(
        canvas,
        &projection,
        &plan.labels.context,
        palette.context_text,
        CONTEXT_LABEL_SIZE,
    );
    draw_labels(
        canvas,
        &projection,
        &plan.labels.focus,
        palette.focus_text,
        FOCUS_LABEL_SIZE,
    );

    draw_scale_bar(canvas, &projection, &plan.scale_bars.miles, palette.species_text);
    draw_scale_bar(
        canvas,
        &projection,
        &plan.scale_bars.kilometers,
        palette.species_text,
    );
    canvas.restore_state();

    stroke_frame(canvas, rect, palette.border, 0.75);
}

fn draw_inset(canvas: &mut Canvas, plan: &FigurePlan, rect: Rect) {
    canvas.meta("panel", Panel::LocatorInset.as_str());
    if !has_area(&rect) {
        return;
    }
    let projection = Projection {
        extent: plan.inset_window,
        rect,
    };
    let palette = &plan.palette;

    canvas.save_state();
    canvas.clip_rect(rect.x, rect.y, rect.width, rect.height);
    canvas.set_fill_color(palette.ocean);
    canvas.draw_rect(rect.x, rect.y, rect.width, rect.height);
    canvas.set_fill_color(palette.land);
    canvas.set_stroke_color(palette.border);
    canvas.set_line_width(0.25);
    for feature in &plan.inset_land {
        if trace_shape(canvas, &projection, &feature.geometry) {
            canvas.fill_stroke_evenodd();
        }
    }

    let (x0, y0) = projection.project(plan.extent.xmin(), plan.extent.ymin());
    let (x1, y1) = projection.project(plan.extent.xmax(), plan.extent.ymax());
    canvas.set_stroke_color(palette.range);
    canvas.set_line_width(1.0);
    canvas.move_to(x0, y0);
    canvas.line_to(x1, y0);
    canvas.line_to(x1, y1);
    canvas.line_to(x0, y1);
    canvas.close_path();
    canvas.stroke();

    canvas.set_fill_color(palette.species_text);
    canvas.set_font_size(CAPTION_SIZE);
    canvas.draw_string(
        rect.x + 4.0,
        rect.top() - 4.0 - CAPTION_SIZE,
        plan.region.caption(),
        TextAnchor::Start,
    );
    canvas.restore_state();

    stroke_frame(canvas, rect, palette.border, 0.5);
}

fn draw_photo(canvas: &mut Canvas, plan: &FigurePlan, rect: Rect) {
    canvas.meta("panel", Panel::Photo.as_str());
    let Some(photo) = plan.photo.as_ref() else {
        return;
    };
    if !has_area(&rect) {
        return;
    }
    let cropped = photo.cover_crop(rect.width as f64 / rect.height as f64);
    canvas.register_image(PHOTO_RESOURCE, cropped.image);
    canvas.draw_image(rect.x, rect.y, rect.width, rect.height, PHOTO_RESOURCE);
}

fn draw_title(canvas: &mut Canvas, plan: &FigurePlan, rect: Rect) {
    canvas.meta("panel", Panel::Title.as_str());
    if !has_area(&rect) {
        return;
    }
    canvas.set_fill_color(plan.palette.species_text);
    let title_size = TITLE_SIZE.min(rect.height * 0.38);
    if !plan.text.display_name.trim().is_empty() {
        canvas.set_font_size(title_size);
        canvas.draw_string(
            rect.x + MARGIN_PT,
            rect.y + rect.height * 0.48,
            plan.text.display_name.trim(),
            TextAnchor::Start,
        );
    }
    if !plan.text.scientific_name.trim().is_empty() {
        canvas.set_font_size(SCIENTIFIC_SIZE.min(rect.height * 0.24));
        canvas.draw_string(
            rect.x + MARGIN_PT,
            rect.y + rect.height * 0.16,
            plan.text.scientific_name.trim(),
            TextAnchor::Start,
        );
    }
}

fn draw_attribution(canvas: &mut Canvas, plan: &FigurePlan, rect: Rect, page_w: f32) {
    canvas.meta("panel", Panel::Attribution.as_str());
    if !has_area(&rect) {
        return;
    }
    let baseline = rect.y + rect.height * 0.4;
    canvas.set_fill_color(plan.palette.species_text);
    canvas.set_font_size(ATTRIBUTION_SIZE.min(rect.height * 0.5));
    if !plan.text.attribution.trim().is_empty() {
        canvas.draw_string(
            rect.x + MARGIN_PT,
            baseline,
            plan.text.attribution.trim(),
            TextAnchor::Start,
        );
    }
    let credit = plan
        .text
        .photo_credit
        .as_deref()
        .map(str::trim)
        .filter(|c| !c.is_empty());
    if let (Some(credit), Some(_)) = (credit, plan.photo.as_ref()) {
        canvas.draw_string(
            page_w - MARGIN_PT,
            baseline,
            format!("Photo: {credit}"),
            TextAnchor::End,
        );
    }
}

fn draw_labels(
    canvas: &mut Canvas,
    projection: &Projection,
    labels: &[LabelCandidate],
    color: Color,
    size: f32,
) {
    if labels.is_empty() {
        return;
    }
    canvas.set_fill_color(color);
    canvas.set_font_size(size);
    for label in labels {
        let (x, y) = projection.project(label.x, label.y);
        // Baseline shifted down so the cap height straddles the centroid.
        canvas.draw_string(x, y - size * 0.35, label.text.as_str(), TextAnchor::Middle);
    }
}

fn draw_scale_bar(canvas: &mut Canvas, projection: &Projection, bar: &ScaleBar, color: Color) {
    let (x0, y) = projection.project(bar.anchor_x, bar.anchor_y);
    let (x1, _) = projection.project(bar.anchor_x + bar.length_deg, bar.anchor_y);
    canvas.set_stroke_color(color);
    canvas.set_line_width(1.2);
    canvas.move_to(x0, y);
    canvas.line_to(x1, y);
    canvas.stroke();
    canvas.set_line_width(0.8);
    for x in [x0, x1] {
        canvas.move_to(x, y);
        canvas.line_to(x, y + 3.0);
        canvas.stroke();
    }
    canvas.set_fill_color(color);
    canvas.set_font_size(SCALE_LABEL_SIZE);
    canvas.draw_string(
        x1 + 3.0,
        y - SCALE_LABEL_SIZE * 0.35,
        bar.label(),
        TextAnchor::Start,
    );
}

fn stroke_frame(canvas: &mut Canvas, rect: Rect, color: Color, width: f32) {
    canvas.set_stroke_color(color);
    canvas.set_line_width(width);
    canvas.move_to(rect.x, rect.y);
    canvas.line_to(rect.right(), rect.y);
    canvas.line_to(rect.right(), rect.top());
    canvas.line_to(rect.x, rect.top());
    canvas.close_path();
    canvas.stroke();
}

fn trace_ring(canvas: &mut Canvas, projection: &Projection, ring: &LineString<f64>) -> bool {
    let mut coords = ring.0.iter();
    let Some(first) = coords.next() else {
        return false;
    };
    if ring.0.len() < 3 {
        return false;
    }
    let (x, y) = projection.project(first.x, first.y);
    canvas.move_to(x, y);
    for c in coords {
        let (x, y) = projection.project(c.x, c.y);
        canvas.line_to(x, y);
    }
    canvas.close_path();
    true
}

/// Adds every ring of `shape` to the current path; false when nothing was traced.
fn trace_shape(canvas: &mut Canvas, projection: &Projection, shape: &MultiPolygon<f64>) -> bool {
    let mut traced = false;
    for polygon in &shape.0 {
        traced |= trace_ring(canvas, projection, polygon.exterior());
        for interior in polygon.interiors() {
            traced |= trace_ring(canvas, projection, interior);
        }
    }
    traced
}
