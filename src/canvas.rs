use crate::types::{Color, Size};
use image::RgbaImage;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Horizontal alignment of a text run relative to its `x` coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextAnchor {
    Start,
    Middle,
    End,
}

/// Drawing commands in page points, origin at the bottom-left corner.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    SaveState,
    RestoreState,
    // Non-rendered marker; compose uses it to tag where each panel begins.
    Meta {
        key: String,
        value: String,
    },
    SetFillColor(Color),
    SetStrokeColor(Color),
    SetLineWidth(f32),
    SetFontSize(f32),
    ClipRect {
        x: f32,
        y: f32,
        width: f32,
        height: f32,
    },
    MoveTo {
        x: f32,
        y: f32,
    },
    LineTo {
        x: f32,
        y: f32,
    },
    ClosePath,
    Fill,
    FillEvenOdd,
    Stroke,
    FillStrokeEvenOdd,
    DrawString {
        x: f32,
        y: f32,
        text: String,
        anchor: TextAnchor,
    },
    DrawRect {
        x: f32,
        y: f32,
        width: f32,
        height: f32,
    },
    DrawImage {
        x: f32,
        y: f32,
        width: f32,
        height: f32,
        resource_id: String,
    },
}

/// A single finished page plus the decoded images it references.
#[derive(Debug, Clone)]
pub struct Document {
    pub page_size: Size,
    pub page_mm: (f64, f64),
    pub commands: Vec<Command>,
    pub images: BTreeMap<String, Arc<RgbaImage>>,
}

impl Document {
    pub fn command_count(&self) -> usize {
        self.commands.len()
    }

    pub fn text_runs(&self) -> impl Iterator<Item = &str> {
        self.commands.iter().filter_map(|cmd| match cmd {
            Command::DrawString { text, .. } => Some(text.as_str()),
            _ => None,
        })
    }

    pub fn meta_values(&self, wanted: &str) -> Vec<&str> {
        self.commands
            .iter()
            .filter_map(|cmd| match cmd {
                Command::Meta { key, value } if key == wanted => Some(value.as_str()),
                _ => None,
            })
            .collect()
    }
}

#[derive(Debug, Clone)]
struct GraphicsState {
    fill_color: Color,
    stroke_color: Color,
    line_width: f32,
    font_size: f32,
}

impl Default for GraphicsState {
    fn default() -> Self {
        Self {
            fill_color: Color::BLACK,
            stroke_color: Color::BLACK,
            line_width: 1.0,
            font_size: 12.0,
        }
    }
}

pub struct Canvas {
    page_size: Size,
    page_mm: (f64, f64),
    commands: Vec<Command>,
    images: BTreeMap<String, Arc<RgbaImage>>,
    state_stack: Vec<GraphicsState>,
    current_state: GraphicsState,
}

impl Canvas {
    pub fn new(width_mm: f64, height_mm: f64) -> Self {
        Self {
            page_size: Size::from_mm(width_mm as f32, height_mm as f32),
            page_mm: (width_mm, height_mm),
            commands: Vec::new(),
            images: BTreeMap::new(),
            state_stack: Vec::new(),
            current_state: GraphicsState::default(),
        }
    }

    pub fn page_size(&self) -> Size {
        self.page_size
    }

    pub fn save_state(&mut self) {
        self.state_stack.push(self.current_state.clone());
        self.commands.push(Command::SaveState);
    }

    pub fn restore_state(&mut self) {
        if let Some(state) = self.state_stack.pop() {
            self.current_state = state;
            self.commands.push(Command::RestoreState);
        }
    }

    pub fn meta(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.commands.push(Command::Meta {
            key: key.into(),
            value: value.into(),
        });
    }

    pub fn set_fill_color(&mut self, color: Color) {
        if self.current_state.fill_color == color {
            return;
        }
        self.current_state.fill_color = color;
        self.commands.push(Command::SetFillColor(color));
    }

    pub fn set_stroke_color(&mut self, color: Color) {
        if self.current_state.stroke_color == color {
            return;
        }
        self.current_state.stroke_color = color;
        self.commands.push(Command::SetStrokeColor(color));
    }

    pub fn set_line_width(&mut self, width: f32) {
        let width = width.max(0.0);
        if self.current_state.line_width == width {
            return;
        }
        self.current_state.line_width = width;
        self.commands.push(Command::SetLineWidth(width));
    }

    pub fn set_font_size(&mut self, size: f32) {
        if self.current_state.font_size == size {
            return;
        }
        self.current_state.font_size = size;
        self.commands.push(Command::SetFontSize(size));
    }

    pub fn clip_rect(&mut self, x: f32, y: f32, width: f32, height: f32) {
        self.commands.push(Command::ClipRect {
            x,
            y,
            width,
            height,
        });
    }

    pub fn move_to(&mut self, x: f32, y: f32) {
        self.commands.push(Command::MoveTo { x, y });
    }

    pub fn line_to(&mut self, x: f32, y: f32) {
        self.commands.push(Command::LineTo { x, y });
    }

    pub fn close_path(&mut self) {
        self.commands.push(Command::ClosePath);
    }

    pub fn fill(&mut self) {
        self.commands.push(Command::Fill);
    }

    pub fn fill_evenodd(&mut self) {
        self.commands.push(Command::FillEvenOdd);
    }

    pub fn stroke(&mut self) {
        self.commands.push(Command::Stroke);
    }

    pub fn fill_stroke_evenodd(&mut self) {
        self.commands.push(Command::FillStrokeEvenOdd);
    }

    pub fn draw_string(&mut self, x: f32, y: f32, text: impl Into<String>, anchor: TextAnchor) {
        self.commands.push(Command::DrawString {
            x,
            y,
            text: text.into(),
            anchor,
        });
    }

    pub fn draw_rect(&mut self, x: f32, y: f32, width: f32, height: f32) {
        self.commands.push(Command::DrawRect {
            x,
            y,
            width,
            height,
        });
    }

    /// Registers `image` under `resource_id`, replacing any earlier image with that id.
    pub fn register_image(&mut self, resource_id: impl Into<String>, image: Arc<RgbaImage>) {
        self.images.insert(resource_id.into(), image);
    }

    pub fn draw_image(
        &mut self,
        x: f32,
        y: f32,
        width: f32,
        height: f32,
        resource_id: impl Into<String>,
    ) {
        self.commands.push(Command::DrawImage {
            x,
            y,
            width,
            height,
            resource_id: resource_id.into(),
        });
    }

    pub fn current_command_count(&self) -> usize {
        self.commands.len()
    }

    pub fn finish(self) -> Document {
        Document {
            page_size: self.page_size,
            page_mm: self.page_mm,
            commands: self.commands,
            images: self.images,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redundant_state_changes_are_elided() {
        let mut canvas = Canvas::new(100.0, 50.0);
        canvas.set_fill_color(Color::WHITE);
        canvas.set_fill_color(Color::WHITE);
        canvas.set_line_width(2.0);
        canvas.set_line_width(2.0);
        assert_eq!(canvas.current_command_count(), 2);
    }

    #[test]
    fn restore_state_rewinds_tracked_colors() {
        let mut canvas = Canvas::new(100.0, 50.0);
        canvas.save_state();
        canvas.set_fill_color(Color::WHITE);
        canvas.restore_state();
        // Black is current again, so setting it must be a no-op.
        canvas.set_fill_color(Color::BLACK);
        let doc = canvas.finish();
        assert_eq!(
            doc.commands,
            vec![
                Command::SaveState,
                Command::SetFillColor(Color::WHITE),
                Command::RestoreState,
            ]
        );
    }

    #[test]
    fn unbalanced_restore_is_ignored() {
        let mut canvas = Canvas::new(100.0, 50.0);
        canvas.restore_state();
        assert_eq!(canvas.current_command_count(), 0);
    }

    #[test]
    fn finished_document_keeps_page_size_and_images() {
        let mut canvas = Canvas::new(254.0, 127.0);
        canvas.register_image("photo", Arc::new(RgbaImage::new(2, 2)));
        canvas.draw_string(1.0, 2.0, "A", TextAnchor::Middle);
        canvas.meta("panel", "title");
        let doc = canvas.finish();
        assert!((doc.page_size.width - 720.0).abs() < 1e-3);
        assert!((doc.page_size.height - 360.0).abs() < 1e-3);
        assert_eq!(doc.page_mm, (254.0, 127.0));
        assert!(doc.images.contains_key("photo"));
        assert_eq!(doc.text_runs().collect::<Vec<_>>(), vec!["A"]);
        assert_eq!(doc.meta_values("panel"), vec!["title"]);
    }
}
