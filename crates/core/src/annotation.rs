//! Annotation data model
//!
//! One [`AnnotationSet`] holds the freehand strokes, text notes and sticky
//! notes of a single page. All geometry is stored in page percentages; pixel
//! geometry for painting is produced on demand by [`AnnotationSet::to_pixels`].
//!
//! The serde layout matches the JSON documents exchanged with the marking
//! service (camelCase keys, kebab-case tool names).

use crate::coords::{
    dimensions_to_pixels, line_points_to_pixels, position_to_pixels, round_point,
    scaled_font_size, Dimensions, PageSize, Point,
};
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable identifier of a stroke or note.
///
/// Generated as a UUID v4 string; arbitrary strings from older documents are
/// accepted as-is.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ElementId(String);

impl ElementId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ElementId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&str> for ElementId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl fmt::Display for ElementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Tool that produced an element
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ToolKind {
    Pencil,
    Eraser,
    FineEraser,
    TextNote,
    StickyNote,
}

/// Canvas compositing mode of a stroke
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CompositeOperation {
    /// Ink painted over what is beneath
    #[default]
    SourceOver,
    /// Masks out pixels of strokes beneath without touching their data
    DestinationOut,
}

/// Default ink colour for new strokes
pub const DEFAULT_STROKE: &str = "#ff0000";

/// Default text colour for text notes
pub const DEFAULT_TEXT_FILL: &str = "#000000";

/// Default paper colour for sticky notes
pub const DEFAULT_STICKY_FILL: &str = "#ffeb3b";

/// A freehand stroke
///
/// Immutable once committed: erasing either drops the whole line or lays a
/// masking stroke over it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineElement {
    #[serde(default)]
    pub id: ElementId,
    pub tool: ToolKind,
    /// Flat `[x, y, x, y, ...]` list in page percentages
    pub points: Vec<f64>,
    pub stroke: String,
    /// Width in pixels at the time the stroke was drawn
    pub stroke_width: f64,
    #[serde(default)]
    pub composite_operation: CompositeOperation,
}

impl LineElement {
    /// Number of (x, y) pairs
    pub fn point_count(&self) -> usize {
        self.points.len() / 2
    }

    /// Only pencil ink can be removed by the whole-stroke eraser.
    pub fn is_erasable(&self) -> bool {
        self.tool == ToolKind::Pencil
    }
}

/// A text note or sticky note
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NoteElement {
    #[serde(default)]
    pub id: ElementId,
    pub tool: ToolKind,
    /// Left edge in page percent
    pub x: f64,
    /// Top edge in page percent
    pub y: f64,
    #[serde(default)]
    pub text: String,
    pub font_size: f64,
    pub fill: String,
    /// Width in page percent, once the note has been resized
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<f64>,
    /// Height in page percent, once the note has been resized
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<f64>,
}

impl NoteElement {
    pub fn position(&self) -> Point {
        Point::new(self.x, self.y)
    }

    pub fn dimensions(&self) -> Option<Dimensions> {
        match (self.width, self.height) {
            (Some(width), Some(height)) => Some(Dimensions::new(width, height)),
            _ => None,
        }
    }
}

/// Text notes and sticky notes share one shape and differ by `tool`.
pub type TextElement = NoteElement;
pub type StickyNoteElement = NoteElement;

/// Everything annotated on one page; the unit of save and load
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnnotationSet {
    #[serde(default)]
    pub page: u32,
    #[serde(default)]
    pub lines: Vec<LineElement>,
    #[serde(default)]
    pub texts: Vec<TextElement>,
    #[serde(default)]
    pub sticky_notes: Vec<StickyNoteElement>,
}

impl AnnotationSet {
    pub fn new(page: u32) -> Self {
        Self {
            page,
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty() && self.texts.is_empty() && self.sticky_notes.is_empty()
    }

    /// Find a text note or sticky note by id.
    pub fn note(&self, id: &ElementId) -> Option<&NoteElement> {
        self.texts
            .iter()
            .chain(self.sticky_notes.iter())
            .find(|n| &n.id == id)
    }

    pub fn note_mut(&mut self, id: &ElementId) -> Option<&mut NoteElement> {
        self.texts
            .iter_mut()
            .chain(self.sticky_notes.iter_mut())
            .find(|n| &n.id == id)
    }

    /// Remove a text note or sticky note, returning it if it existed.
    pub fn remove_note(&mut self, id: &ElementId) -> Option<NoteElement> {
        if let Some(index) = self.texts.iter().position(|n| &n.id == id) {
            return Some(self.texts.remove(index));
        }
        if let Some(index) = self.sticky_notes.iter().position(|n| &n.id == id) {
            return Some(self.sticky_notes.remove(index));
        }
        None
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Copy with every percentage value rounded to `decimals` places.
    pub fn rounded(&self, decimals: u32) -> Self {
        let mut out = self.clone();
        for line in &mut out.lines {
            for chunk in line.points.chunks_mut(2) {
                if let [x, y] = chunk {
                    let p = round_point(Point::new(*x, *y), decimals);
                    *x = p.x;
                    *y = p.y;
                }
            }
        }
        for note in out.texts.iter_mut().chain(out.sticky_notes.iter_mut()) {
            let p = round_point(note.position(), decimals);
            note.x = p.x;
            note.y = p.y;
            if let Some(d) = note.dimensions() {
                let d = round_point(Point::new(d.width, d.height), decimals);
                note.width = Some(d.x);
                note.height = Some(d.y);
            }
        }
        out
    }

    /// Pixel geometry of this set for a page rendered at `page_size`.
    pub fn to_pixels(&self, page_size: PageSize) -> PixelAnnotations {
        let note_to_pixels = |note: &NoteElement| PixelNote {
            id: note.id.clone(),
            tool: note.tool,
            position: position_to_pixels(note.position(), page_size),
            size: note.dimensions().map(|d| dimensions_to_pixels(d, page_size)),
            text: note.text.clone(),
            font_size: scaled_font_size(note.font_size, page_size),
            fill: note.fill.clone(),
        };

        PixelAnnotations {
            lines: self
                .lines
                .iter()
                .map(|line| PixelLine {
                    id: line.id.clone(),
                    tool: line.tool,
                    points: line_points_to_pixels(&line.points, page_size),
                    stroke: line.stroke.clone(),
                    stroke_width: line.stroke_width,
                    composite_operation: line.composite_operation,
                })
                .collect(),
            texts: self.texts.iter().map(note_to_pixels).collect(),
            sticky_notes: self.sticky_notes.iter().map(note_to_pixels).collect(),
        }
    }
}

/// A stroke ready to paint
#[derive(Debug, Clone, PartialEq)]
pub struct PixelLine {
    pub id: ElementId,
    pub tool: ToolKind,
    pub points: Vec<f64>,
    pub stroke: String,
    pub stroke_width: f64,
    pub composite_operation: CompositeOperation,
}

/// A note ready to paint
#[derive(Debug, Clone, PartialEq)]
pub struct PixelNote {
    pub id: ElementId,
    pub tool: ToolKind,
    pub position: Point,
    /// Stored footprint in pixels; `None` means size to content
    pub size: Option<Dimensions>,
    pub text: String,
    pub font_size: f64,
    pub fill: String,
}

/// Pixel geometry for one paint pass. Never persisted.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PixelAnnotations {
    pub lines: Vec<PixelLine>,
    pub texts: Vec<PixelNote>,
    pub sticky_notes: Vec<PixelNote>,
}

const NAMED_COLORS: [(&str, [u8; 3]); 8] = [
    ("black", [0, 0, 0]),
    ("white", [255, 255, 255]),
    ("red", [255, 0, 0]),
    ("green", [0, 255, 0]),
    ("blue", [0, 0, 255]),
    ("yellow", [255, 255, 0]),
    ("cyan", [0, 255, 255]),
    ("magenta", [255, 0, 255]),
];

/// Parse `#rrggbb`, `#rgb` or one of the basic named colours.
pub fn parse_css_color(value: &str) -> Option<[u8; 3]> {
    let value = value.trim();
    let Some(hex) = value.strip_prefix('#') else {
        let lower = value.to_ascii_lowercase();
        return NAMED_COLORS
            .iter()
            .find(|(name, _)| *name == lower)
            .map(|(_, rgb)| *rgb);
    };
    if !hex.is_ascii() {
        return None;
    }

    match hex.len() {
        6 => {
            let r = u8::from_str_radix(&hex[0..2], 16).ok()?;
            let g = u8::from_str_radix(&hex[2..4], 16).ok()?;
            let b = u8::from_str_radix(&hex[4..6], 16).ok()?;
            Some([r, g, b])
        }
        3 => {
            let mut rgb = [0u8; 3];
            for (i, c) in hex.chars().enumerate() {
                let v = c.to_digit(16)? as u8;
                rgb[i] = v * 17;
            }
            Some(rgb)
        }
        _ => None,
    }
}
