use crate::error::RangePlateError;
use crate::extent::Extent;
use crate::types::mm_to_px;
use std::collections::BTreeMap;

/// Fixed compositional template, all lengths in millimetres.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LayoutSpec {
    pub page_width_mm: f64,
    pub column_split: f64,
    pub title_mm: f64,
    pub attribution_mm: f64,
    pub inset_photo_gap_mm: f64,
    pub divider_mm: f64,
}

impl Default for LayoutSpec {
    fn default() -> Self {
        Self {
            page_width_mm: 240.0,
            column_split: 0.75,
            title_mm: 28.0,
            attribution_mm: 16.0,
            inset_photo_gap_mm: 0.0,
            divider_mm: 0.5,
        }
    }
}

impl LayoutSpec {
    pub fn validate(&self) -> Result<(), RangePlateError> {
        let positive = |name: &str, v: f64| {
            if v.is_finite() && v > 0.0 {
                Ok(())
            } else {
                Err(RangePlateError::InvalidConfiguration(format!(
                    "{name} must be positive, got {v}"
                )))
            }
        };
        let non_negative = |name: &str, v: f64| {
            if v.is_finite() && v >= 0.0 {
                Ok(())
            } else {
                Err(RangePlateError::InvalidConfiguration(format!(
                    "{name} must be non-negative, got {v}"
                )))
            }
        };
        positive("page_width_mm", self.page_width_mm)?;
        if !(self.column_split > 0.0 && self.column_split < 1.0) {
            return Err(RangePlateError::InvalidConfiguration(format!(
                "column_split must lie strictly between 0 and 1, got {}",
                self.column_split
            )));
        }
        non_negative("title_mm", self.title_mm)?;
        non_negative("attribution_mm", self.attribution_mm)?;
        non_negative("inset_photo_gap_mm", self.inset_photo_gap_mm)?;
        non_negative("divider_mm", self.divider_mm)?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Panel {
    MainMap,
    LocatorInset,
    Photo,
    Title,
    Attribution,
    Divider,
}

impl Panel {
    pub const ALL: [Panel; 6] = [
        Panel::MainMap,
        Panel::LocatorInset,
        Panel::Photo,
        Panel::Title,
        Panel::Attribution,
        Panel::Divider,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Panel::MainMap => "main_map",
            Panel::LocatorInset => "locator_inset",
            Panel::Photo => "photo",
            Panel::Title => "title",
            Panel::Attribution => "attribution",
            Panel::Divider => "divider",
        }
    }
}

/// Rectangle in canvas fractions, `y` measured up from the bottom edge.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NormRect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl NormRect {
    pub fn top(&self) -> f64 {
        self.y + self.height
    }

    pub fn right(&self) -> f64 {
        self.x + self.width
    }

    pub fn is_within_unit(&self) -> bool {
        const EPS: f64 = 1e-9;
        self.x >= -EPS
            && self.y >= -EPS
            && self.width >= 0.0
            && self.height >= 0.0
            && self.right() <= 1.0 + EPS
            && self.top() <= 1.0 + EPS
    }
}

/// Physical quantities behind a plan, in millimetres.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageGeometry {
    pub page_width_mm: f64,
    pub page_height_mm: f64,
    pub col_left_mm: f64,
    pub col_right_mm: f64,
    pub map_height_mm: f64,
    pub inset_height_mm: f64,
    pub photo_height_mm: f64,
    pub inset_clamped: bool,
}

impl PageGeometry {
    pub fn pixel_size(&self, dpi: u32) -> (u32, u32) {
        let w = mm_to_px(self.page_width_mm, dpi).max(1);
        let h = mm_to_px(self.page_height_mm, dpi).max(1);
        (
            u32::try_from(w).unwrap_or(u32::MAX),
            u32::try_from(h).unwrap_or(u32::MAX),
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LayoutPlan {
    pub page: PageGeometry,
    pub panels: BTreeMap<Panel, NormRect>,
}

impl LayoutPlan {
    pub fn panel(&self, panel: Panel) -> Option<NormRect> {
        self.panels.get(&panel).copied()
    }
}

/// Derives page height from the map's geographic aspect ratio and places the template panels.
///
/// Left column: attribution band at the bottom, map above it, title band on top. Right
/// column: photo resting on the attribution band, inset above it, flush with the map's top
/// edge. An inset taller than the map is clamped and the photo collapses to zero height.
pub fn compute_layout(
    extent: &Extent,
    inset_window: &Extent,
    spec: &LayoutSpec,
) -> Result<LayoutPlan, RangePlateError> {
    spec.validate()?;
    let col_left = spec.page_width_mm * spec.column_split;
    let col_right = spec.page_width_mm - col_left;
    let map_h = col_left * (extent.lat_span() / extent.lon_span());
    if !(map_h.is_finite() && map_h > 0.0) {
        return Err(RangePlateError::InvalidGeometry(format!(
            "extent aspect ratio produces unusable map height {map_h}"
        )));
    }
    let page_h = map_h + spec.title_mm + spec.attribution_mm;

    let natural_inset = col_right * (inset_window.lat_span() / inset_window.lon_span());
    let inset_clamped = natural_inset > map_h;
    let inset_h = natural_inset.min(map_h);
    let photo_h = (map_h - inset_h - spec.inset_photo_gap_mm).max(0.0);

    let split = spec.column_split;
    let right_w = 1.0 - split;
    let att = spec.attribution_mm / page_h;
    let map = map_h / page_h;
    let divider_w = spec.divider_mm / spec.page_width_mm;

    let mut panels = BTreeMap::new();
    panels.insert(
        Panel::Attribution,
        NormRect { x: 0.0, y: 0.0, width: 1.0, height: att },
    );
    panels.insert(
        Panel::MainMap,
        NormRect { x: 0.0, y: att, width: split, height: map },
    );
    panels.insert(
        Panel::Title,
        NormRect {
            x: 0.0,
            y: (spec.attribution_mm + map_h) / page_h,
            width: 1.0,
            height: spec.title_mm / page_h,
        },
    );
    panels.insert(
        Panel::Photo,
        NormRect { x: split, y: att, width: right_w, height: photo_h / page_h },
    );
    panels.insert(
        Panel::LocatorInset,
        NormRect {
            x: split,
            y: (spec.attribution_mm + map_h - inset_h) / page_h,
            width: right_w,
            height: inset_h / page_h,
        },
    );
    panels.insert(
        Panel::Divider,
        NormRect {
            x: (split - divider_w / 2.0).max(0.0),
            y: att,
            width: divider_w,
            height: map,
        },
    );

    Ok(LayoutPlan {
        page: PageGeometry {
            page_width_mm: spec.page_width_mm,
            page_height_mm: page_h,
            col_left_mm: col_left,
            col_right_mm: col_right,
            map_height_mm: map_h,
            inset_height_mm: inset_h,
            photo_height_mm: photo_h,
            inset_clamped,
        },
        panels,
    })
}
