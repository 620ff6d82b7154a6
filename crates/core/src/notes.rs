//! Interaction state for sticky note and text note widgets
//!
//! The widgets only track presentation state (expanded, editing, which way
//! to open). Note content lives in the [`AnnotationLayer`](crate::layer::AnnotationLayer);
//! widget interactions are reported as [`NoteEvent`]s for the owner to apply.

use crate::annotation::{AnnotationSet, ElementId, PixelNote};
use crate::coords::{Dimensions, PixelRect, Point};
use std::collections::HashMap;

/// Size of an expanded sticky note editor, in pixels
pub const STICKY_EXPANDED_SIZE: Dimensions = Dimensions {
    width: 200.0,
    height: 140.0,
};

/// Average glyph advance as a fraction of the font size
const CHAR_WIDTH_RATIO: f64 = 0.6;
const LINE_HEIGHT_RATIO: f64 = 1.2;
const MIN_EDITOR_CHARS: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExpandDirection {
    Left,
    #[default]
    Right,
}

#[derive(Debug, Clone, PartialEq)]
pub enum NoteEvent {
    Selected(ElementId),
    TextChanged { id: ElementId, text: String },
    /// Editing finished; the layer should record the edit
    Committed(ElementId),
    /// Text note measured after editing, in pixels
    Resized { id: ElementId, size: Dimensions },
}

/// Horizontal extent of the nearest scrolling container, in pixels
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScrollBounds {
    pub left: f64,
    pub right: f64,
}

/// Pick the side with room for the expanded editor.
///
/// Without a scroll container the viewport edge `[0, viewport_width]` is used.
pub fn expand_direction(
    icon: PixelRect,
    expanded_width: f64,
    bounds: Option<ScrollBounds>,
    viewport_width: f64,
) -> ExpandDirection {
    let bounds = bounds.unwrap_or(ScrollBounds {
        left: 0.0,
        right: viewport_width,
    });
    let space_right = bounds.right - icon.x;
    let space_left = icon.x + icon.width - bounds.left;
    if space_right >= expanded_width || space_right >= space_left {
        ExpandDirection::Right
    } else {
        ExpandDirection::Left
    }
}

/// Fit-content size estimate for note text.
pub fn estimate_text_size(text: &str, font_size: f64) -> Dimensions {
    let longest = text
        .lines()
        .map(|line| line.chars().count())
        .max()
        .unwrap_or(0)
        .max(MIN_EDITOR_CHARS);
    let lines = text.lines().count().max(1);
    Dimensions::new(
        longest as f64 * CHAR_WIDTH_RATIO * font_size,
        lines as f64 * LINE_HEIGHT_RATIO * font_size,
    )
}

#[derive(Debug, Clone, PartialEq)]
pub struct StickyNoteWidget {
    id: ElementId,
    expanded: bool,
    direction: ExpandDirection,
}

impl StickyNoteWidget {
    pub fn new(id: ElementId) -> Self {
        Self {
            id,
            expanded: false,
            direction: ExpandDirection::Right,
        }
    }

    pub fn id(&self) -> &ElementId {
        &self.id
    }

    pub fn is_expanded(&self) -> bool {
        self.expanded
    }

    pub fn direction(&self) -> ExpandDirection {
        self.direction
    }

    /// Outside clicks are only observed while expanded.
    pub fn wants_outside_clicks(&self) -> bool {
        self.expanded
    }

    pub fn click(
        &mut self,
        icon: PixelRect,
        bounds: Option<ScrollBounds>,
        viewport_width: f64,
    ) -> NoteEvent {
        if !self.expanded {
            self.direction =
                expand_direction(icon, STICKY_EXPANDED_SIZE.width, bounds, viewport_width);
            self.expanded = true;
        }
        NoteEvent::Selected(self.id.clone())
    }

    pub fn edit(&self, text: &str) -> NoteEvent {
        NoteEvent::TextChanged {
            id: self.id.clone(),
            text: text.to_string(),
        }
    }

    /// Collapse on blur. Returns the commit event if the note was open.
    pub fn collapse(&mut self) -> Option<NoteEvent> {
        if !self.expanded {
            return None;
        }
        self.expanded = false;
        Some(NoteEvent::Committed(self.id.clone()))
    }

    /// Pixel box of the editor when expanded from `icon`.
    pub fn expanded_rect(&self, icon: PixelRect) -> PixelRect {
        let x = match self.direction {
            ExpandDirection::Right => icon.x,
            ExpandDirection::Left => icon.x + icon.width - STICKY_EXPANDED_SIZE.width,
        };
        PixelRect::new(x, icon.y, STICKY_EXPANDED_SIZE.width, STICKY_EXPANDED_SIZE.height)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TextNoteWidget {
    id: ElementId,
    editing: bool,
}

impl TextNoteWidget {
    pub fn new(id: ElementId) -> Self {
        Self { id, editing: false }
    }

    pub fn id(&self) -> &ElementId {
        &self.id
    }

    pub fn is_editing(&self) -> bool {
        self.editing
    }

    pub fn click(&mut self) -> NoteEvent {
        self.editing = true;
        NoteEvent::Selected(self.id.clone())
    }

    pub fn begin_edit(&mut self) {
        self.editing = true;
    }

    pub fn edit(&self, text: &str) -> NoteEvent {
        NoteEvent::TextChanged {
            id: self.id.clone(),
            text: text.to_string(),
        }
    }

    /// Editor box: the stored footprint, or sized to the text.
    pub fn editor_size(note: &PixelNote) -> Dimensions {
        note.size
            .unwrap_or_else(|| estimate_text_size(&note.text, note.font_size))
    }

    /// Leave edit mode, reporting the measured editor size.
    pub fn blur(&mut self, measured: Dimensions) -> Option<NoteEvent> {
        if !self.editing {
            return None;
        }
        self.editing = false;
        Some(NoteEvent::Resized {
            id: self.id.clone(),
            size: measured,
        })
    }
}

/// Widget state for every note on a page, kept in step with the layer.
#[derive(Debug, Default, Clone)]
pub struct NoteWidgets {
    sticky: HashMap<ElementId, StickyNoteWidget>,
    text: HashMap<ElementId, TextNoteWidget>,
}

impl NoteWidgets {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add widgets for new notes and drop widgets of deleted ones.
    pub fn sync(&mut self, set: &AnnotationSet) {
        self.sticky
            .retain(|id, _| set.sticky_notes.iter().any(|n| &n.id == id));
        self.text.retain(|id, _| set.texts.iter().any(|n| &n.id == id));
        for note in &set.sticky_notes {
            self.sticky
                .entry(note.id.clone())
                .or_insert_with(|| StickyNoteWidget::new(note.id.clone()));
        }
        for note in &set.texts {
            self.text
                .entry(note.id.clone())
                .or_insert_with(|| TextNoteWidget::new(note.id.clone()));
        }
    }

    pub fn sticky(&self, id: &ElementId) -> Option<&StickyNoteWidget> {
        self.sticky.get(id)
    }

    pub fn sticky_mut(&mut self, id: &ElementId) -> Option<&mut StickyNoteWidget> {
        self.sticky.get_mut(id)
    }

    pub fn text(&self, id: &ElementId) -> Option<&TextNoteWidget> {
        self.text.get(id)
    }

    pub fn text_mut(&mut self, id: &ElementId) -> Option<&mut TextNoteWidget> {
        self.text.get_mut(id)
    }

    pub fn is_listening(&self) -> bool {
        self.sticky.values().any(StickyNoteWidget::wants_outside_clicks)
    }

    /// Collapse every expanded sticky note whose editor does not contain `pos`.
    ///
    /// `editor_rect` maps a note id to its expanded editor box in pixels.
    pub fn outside_click(
        &mut self,
        pos: Point,
        editor_rect: impl Fn(&ElementId) -> Option<PixelRect>,
    ) -> Vec<NoteEvent> {
        self.sticky
            .values_mut()
            .filter(|w| w.wants_outside_clicks())
            .filter(|w| !editor_rect(w.id()).is_some_and(|r| r.contains(pos)))
            .filter_map(StickyNoteWidget::collapse)
            .collect()
    }

    pub fn clear(&mut self) {
        self.sticky.clear();
        self.text.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotation::{NoteElement, ToolKind};

    fn note(id: &str, tool: ToolKind) -> NoteElement {
        NoteElement {
            id: ElementId::from(id),
            tool,
            x: 10.0,
            y: 10.0,
            text: String::new(),
            font_size: 16.0,
            fill: "#ffeb3b".to_string(),
            width: None,
            height: None,
        }
    }

    #[test]
    fn test_expands_right_when_room() {
        let icon = PixelRect::new(100.0, 50.0, 32.0, 32.0);
        assert_eq!(expand_direction(icon, 200.0, None, 1000.0), ExpandDirection::Right);
    }

    #[test]
    fn test_expands_left_near_container_edge() {
        let icon = PixelRect::new(850.0, 50.0, 32.0, 32.0);
        let bounds = ScrollBounds { left: 100.0, right: 900.0 };
        assert_eq!(
            expand_direction(icon, 200.0, Some(bounds), 1920.0),
            ExpandDirection::Left
        );
    }

    #[test]
    fn test_sticky_listens_only_while_expanded() {
        let mut widget = StickyNoteWidget::new(ElementId::from("s"));
        assert!(!widget.wants_outside_clicks());
        let event = widget.click(PixelRect::new(0.0, 0.0, 32.0, 32.0), None, 800.0);
        assert_eq!(event, NoteEvent::Selected(ElementId::from("s")));
        assert!(widget.wants_outside_clicks());

        assert_eq!(widget.collapse(), Some(NoteEvent::Committed(ElementId::from("s"))));
        assert_eq!(widget.collapse(), None);
    }

    #[test]
    fn test_left_expansion_keeps_right_edge() {
        let mut widget = StickyNoteWidget::new(ElementId::from("s"));
        let icon = PixelRect::new(780.0, 20.0, 32.0, 32.0);
        widget.click(icon, None, 800.0);
        let rect = widget.expanded_rect(icon);
        assert_eq!(rect.x + rect.width, 812.0);
    }

    #[test]
    fn test_text_note_blur_reports_size() {
        let mut widget = TextNoteWidget::new(ElementId::from("t"));
        assert_eq!(widget.blur(Dimensions::new(10.0, 10.0)), None);
        widget.click();
        assert!(widget.is_editing());
        let event = widget.blur(Dimensions::new(120.0, 40.0));
        assert_eq!(
            event,
            Some(NoteEvent::Resized {
                id: ElementId::from("t"),
                size: Dimensions::new(120.0, 40.0)
            })
        );
        assert!(!widget.is_editing());
    }

    #[test]
    fn test_estimate_text_size() {
        let size = estimate_text_size("", 10.0);
        assert!((size.width - 48.0).abs() < 1e-9);
        assert!((size.height - 12.0).abs() < 1e-9);

        let size = estimate_text_size("a much longer remark\nok", 10.0);
        assert!((size.width - 120.0).abs() < 1e-9);
        assert!((size.height - 24.0).abs() < 1e-9);
    }

    #[test]
    fn test_sync_and_outside_click() {
        let mut set = AnnotationSet::new(1);
        set.sticky_notes.push(note("a", ToolKind::StickyNote));
        set.sticky_notes.push(note("b", ToolKind::StickyNote));
        set.texts.push(note("t", ToolKind::TextNote));

        let mut widgets = NoteWidgets::new();
        widgets.sync(&set);
        assert!(!widgets.is_listening());

        let icon = PixelRect::new(0.0, 0.0, 32.0, 32.0);
        for id in ["a", "b"] {
            if let Some(w) = widgets.sticky_mut(&ElementId::from(id)) {
                w.click(icon, None, 800.0);
            }
        }
        assert!(widgets.is_listening());

        // Click lands inside "a"'s editor only
        let events = widgets.outside_click(Point::new(10.0, 10.0), |id| {
            (id.as_str() == "a").then(|| PixelRect::new(0.0, 0.0, 200.0, 140.0))
        });
        assert_eq!(events, vec![NoteEvent::Committed(ElementId::from("b"))]);
        assert!(widgets.sticky(&ElementId::from("a")).is_some_and(|w| w.is_expanded()));

        set.sticky_notes.remove(0);
        widgets.sync(&set);
        assert!(widgets.sticky(&ElementId::from("a")).is_none());
        assert!(widgets.text(&ElementId::from("t")).is_some());
    }
}
