//! Page-space geometry and painting helpers for one rendered page.

use eframe::egui;
use marking_core::layer::InProgressStroke;
use marking_core::notes::NoteEvent;
use marking_core::{
    parse_css_color, AnnotationLayer, Dimensions, PixelNote, PixelRect, Point, PointerInput,
    ToolKind,
};

/// Maps between screen positions and page-local pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageTransform {
    pub origin: egui::Pos2,
}

impl PageTransform {
    pub fn new(origin: egui::Pos2) -> Self {
        Self { origin }
    }

    pub fn to_local(&self, pos: egui::Pos2) -> Point {
        Point::new((pos.x - self.origin.x) as f64, (pos.y - self.origin.y) as f64)
    }

    pub fn to_screen(&self, p: Point) -> egui::Pos2 {
        egui::pos2(self.origin.x + p.x as f32, self.origin.y + p.y as f32)
    }

    pub fn rect_to_screen(&self, rect: PixelRect) -> egui::Rect {
        egui::Rect::from_min_size(
            self.to_screen(Point::new(rect.x, rect.y)),
            egui::vec2(rect.width as f32, rect.height as f32),
        )
    }
}

pub fn to_color32(css: &str, fallback: egui::Color32) -> egui::Color32 {
    parse_css_color(css)
        .map(|[r, g, b]| egui::Color32::from_rgb(r, g, b))
        .unwrap_or(fallback)
}

/// Touch input drives the gesture with its first contact.
pub fn pointer_input(pos: Point, touch: bool) -> PointerInput {
    if touch {
        PointerInput::Touch(vec![pos])
    } else {
        PointerInput::Mouse(pos)
    }
}

/// Route a note widget event into the layer that owns the note.
pub fn apply_note_event(layer: &mut AnnotationLayer, event: &NoteEvent) -> bool {
    match event {
        NoteEvent::Selected(id) => layer.begin_note_edit(id),
        NoteEvent::TextChanged { id, text } => layer.update_note_text(id, text),
        NoteEvent::Committed(id) => layer.commit_note_edit(id),
        NoteEvent::Resized { id, size } => layer.resize_note(id, *size),
    }
}

pub fn dimensions_of(rect: egui::Rect) -> Dimensions {
    Dimensions::new(rect.width() as f64, rect.height() as f64)
}

/// Live preview of the stroke under the pointer.
pub fn paint_in_progress(painter: &egui::Painter, transform: PageTransform, stroke: &InProgressStroke, ink: egui::Color32) {
    let color = match stroke.tool {
        ToolKind::Pencil => ink,
        _ => egui::Color32::from_rgba_unmultiplied(128, 128, 128, 140),
    };
    let points: Vec<egui::Pos2> = stroke
        .points
        .chunks_exact(2)
        .map(|p| transform.to_screen(Point::new(p[0], p[1])))
        .collect();
    if points.len() > 1 {
        painter.add(egui::Shape::line(points, egui::Stroke::new(stroke.width as f32, color)));
    }
}

pub fn paint_text_note(painter: &egui::Painter, rect: egui::Rect, note: &PixelNote, selected: bool) {
    painter.text(
        rect.min,
        egui::Align2::LEFT_TOP,
        &note.text,
        egui::FontId::proportional(note.font_size as f32),
        to_color32(&note.fill, egui::Color32::BLACK),
    );
    if selected {
        painter.rect_stroke(
            rect,
            2.0,
            egui::Stroke::new(1.0, egui::Color32::LIGHT_BLUE),
            egui::StrokeKind::Outside,
        );
    }
}

pub fn paint_sticky_icon(painter: &egui::Painter, rect: egui::Rect, note: &PixelNote, selected: bool) {
    painter.rect_filled(rect, 3.0, to_color32(&note.fill, egui::Color32::YELLOW));
    painter.text(
        rect.center(),
        egui::Align2::CENTER_CENTER,
        "✎",
        egui::FontId::proportional(rect.height() * 0.6),
        egui::Color32::from_gray(60),
    );
    let outline = if selected { egui::Color32::LIGHT_BLUE } else { egui::Color32::from_gray(120) };
    painter.rect_stroke(rect, 3.0, egui::Stroke::new(1.0, outline), egui::StrokeKind::Inside);
}

pub fn paint_question_box(painter: &egui::Painter, rect: egui::Rect, label: &str, marked: bool) {
    let color = if marked {
        egui::Color32::from_rgb(46, 160, 67)
    } else {
        egui::Color32::from_rgb(31, 111, 235)
    };
    painter.rect_stroke(rect, 0.0, egui::Stroke::new(1.5, color), egui::StrokeKind::Inside);
    painter.text(
        rect.left_top() + egui::vec2(4.0, 2.0),
        egui::Align2::LEFT_TOP,
        label,
        egui::FontId::proportional(12.0),
        color,
    );
}

pub fn paint_highlight(painter: &egui::Painter, rect: egui::Rect) {
    painter.rect_filled(rect, 0.0, egui::Color32::from_rgba_unmultiplied(255, 213, 0, 60));
    painter.rect_stroke(
        rect,
        0.0,
        egui::Stroke::new(2.0, egui::Color32::from_rgb(255, 170, 0)),
        egui::StrokeKind::Outside,
    );
}

/// Label for a mark value: whole numbers without decimals.
pub fn mark_label(value: f64) -> String {
    if value.fract() == 0.0 {
        format!("{value:.0}")
    } else {
        format!("{value}")
    }
}
