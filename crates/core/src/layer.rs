//! Per-page annotation layer
//!
//! Owns one page's strokes and notes while the page is on screen, drives the
//! pointer gesture protocol for the active [`DrawingMode`], and keeps a
//! private [`HistoryStack`] for undo/redo. Everything is stored in page
//! percentages; pointer input arrives in pixels relative to the page origin
//! and is converted with the layer's current [`PageSize`].
//!
//! Changes are reported through [`LayerEvent`]s which the owner drains after
//! each interaction.

use crate::annotation::{
    AnnotationSet, CompositeOperation, ElementId, LineElement, NoteElement, PixelAnnotations,
    ToolKind, DEFAULT_STICKY_FILL, DEFAULT_STROKE, DEFAULT_TEXT_FILL,
};
use crate::coords::{
    clamp_position, dimensions_to_percentage, line_points_to_pixels, position_to_percentage,
    Dimensions, PageSize, PixelRect, Point, percentage_to_pixels, PercentageRect,
};
use crate::eraser;
use crate::history::{HistoryStack, DEFAULT_HISTORY_CAP};
use tracing::debug;

/// Estimated on-page size of a freshly placed text note, in pixels
pub const TEXT_NOTE_FOOTPRINT_PX: Dimensions = Dimensions {
    width: 150.0,
    height: 40.0,
};

/// Size of a collapsed sticky note icon, in pixels
pub const STICKY_NOTE_FOOTPRINT_PX: Dimensions = Dimensions {
    width: 32.0,
    height: 32.0,
};

/// Persistent tool selection. Exactly one is active at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DrawingMode {
    /// View and pan only
    #[default]
    None,
    Pencil,
    Eraser,
    FineEraser,
    TextNote,
    StickyNote,
}

impl DrawingMode {
    /// Toolbar order
    pub const ALL: [DrawingMode; 6] = [
        DrawingMode::None,
        DrawingMode::Pencil,
        DrawingMode::Eraser,
        DrawingMode::FineEraser,
        DrawingMode::TextNote,
        DrawingMode::StickyNote,
    ];

    /// Tool recorded on elements created in this mode
    pub fn tool(&self) -> Option<ToolKind> {
        match self {
            DrawingMode::None => None,
            DrawingMode::Pencil => Some(ToolKind::Pencil),
            DrawingMode::Eraser => Some(ToolKind::Eraser),
            DrawingMode::FineEraser => Some(ToolKind::FineEraser),
            DrawingMode::TextNote => Some(ToolKind::TextNote),
            DrawingMode::StickyNote => Some(ToolKind::StickyNote),
        }
    }

    /// Modes that collect a stroke between pointer-down and pointer-up
    pub fn is_stroke(&self) -> bool {
        matches!(
            self,
            DrawingMode::Pencil | DrawingMode::Eraser | DrawingMode::FineEraser
        )
    }

    pub fn label(&self) -> &'static str {
        match self {
            DrawingMode::None => "View",
            DrawingMode::Pencil => "Pencil",
            DrawingMode::Eraser => "Eraser",
            DrawingMode::FineEraser => "Fine Eraser",
            DrawingMode::TextNote => "Text",
            DrawingMode::StickyNote => "Sticky Note",
        }
    }
}

/// One-shot commands, delivered separately from the drawing mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Undo,
    Redo,
}

/// Availability of undo/redo for toolbar buttons
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HistoryState {
    pub can_undo: bool,
    pub can_redo: bool,
}

/// Notifications for the layer's owner
#[derive(Debug, Clone, PartialEq)]
pub enum LayerEvent {
    /// The visible annotation set changed and should be saved
    Changed(AnnotationSet),
    HistoryChanged(HistoryState),
    SelectionChanged(Option<ElementId>),
}

/// Raw pointer input in page-local pixels
#[derive(Debug, Clone, PartialEq)]
pub enum PointerInput {
    Mouse(Point),
    /// Active touches; the first one drives the gesture
    Touch(Vec<Point>),
}

/// Position driving a gesture for either input kind.
pub fn pointer_position(input: &PointerInput) -> Option<Point> {
    match input {
        PointerInput::Mouse(p) => Some(*p),
        PointerInput::Touch(touches) => touches.first().copied(),
    }
}

/// Keys the layer reacts to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerKey {
    Delete,
    Backspace { command: bool },
}

/// Drawing parameters for new elements
#[derive(Debug, Clone, PartialEq)]
pub struct LayerSettings {
    pub stroke: String,
    /// Pencil width on an A4-sized render, in pixels
    pub pencil_width: f64,
    /// Eraser tool width in pixels
    pub eraser_width: f64,
    /// Nominal note font size on an A4-sized render
    pub font_size: f64,
    pub text_fill: String,
    pub sticky_fill: String,
    pub history_cap: usize,
}

impl Default for LayerSettings {
    fn default() -> Self {
        Self {
            stroke: DEFAULT_STROKE.to_string(),
            pencil_width: 2.0,
            eraser_width: 20.0,
            font_size: 16.0,
            text_fill: DEFAULT_TEXT_FILL.to_string(),
            sticky_fill: DEFAULT_STICKY_FILL.to_string(),
            history_cap: DEFAULT_HISTORY_CAP,
        }
    }
}

/// Stroke being drawn, in pixels, for live preview
#[derive(Debug, Clone, PartialEq)]
pub struct InProgressStroke {
    pub tool: ToolKind,
    pub points: Vec<f64>,
    pub width: f64,
}

#[derive(Debug, Clone)]
enum Gesture {
    Idle,
    Drawing { tool: ToolKind, points: Vec<f64> },
    Dragging { id: ElementId, grab_offset: Point, moved: bool },
}

/// Estimated footprint of a note in page percent, used for clamping and hit tests.
pub fn estimated_footprint(tool: ToolKind, page: PageSize) -> Dimensions {
    let px = match tool {
        ToolKind::StickyNote => STICKY_NOTE_FOOTPRINT_PX,
        _ => TEXT_NOTE_FOOTPRINT_PX,
    };
    dimensions_to_percentage(px, page)
}

/// Editable annotations of one mounted page
///
/// The layer is the only writer of its [`AnnotationSet`] while mounted.
/// Committed changes go through the history stack and are announced with
/// [`LayerEvent::Changed`].
pub struct AnnotationLayer {
    page: u32,
    annotations: AnnotationSet,
    history: HistoryStack,
    mode: DrawingMode,
    settings: LayerSettings,
    dimensions: PageSize,
    gesture: Gesture,
    selected: Option<ElementId>,
    editing: Option<ElementId>,
    events: Vec<LayerEvent>,
}

impl AnnotationLayer {
    /// Mount a layer for `page`, seeding a fresh history with `initial`.
    pub fn new(page: u32, initial: AnnotationSet, settings: LayerSettings) -> Self {
        let mut initial = initial;
        initial.page = page;
        Self {
            page,
            history: HistoryStack::with_cap(initial.clone(), settings.history_cap),
            annotations: initial,
            mode: DrawingMode::None,
            settings,
            dimensions: PageSize::default(),
            gesture: Gesture::Idle,
            selected: None,
            editing: None,
            events: Vec::new(),
        }
    }

    pub fn page(&self) -> u32 {
        self.page
    }

    pub fn annotations(&self) -> &AnnotationSet {
        &self.annotations
    }

    pub fn history(&self) -> &HistoryStack {
        &self.history
    }

    /// Undo/redo availability for the toolbar
    pub fn history_state(&self) -> HistoryState {
        HistoryState {
            can_undo: self.history.can_undo(),
            can_redo: self.history.can_redo(),
        }
    }

    pub fn mode(&self) -> DrawingMode {
        self.mode
    }

    pub fn settings(&self) -> &LayerSettings {
        &self.settings
    }

    pub fn settings_mut(&mut self) -> &mut LayerSettings {
        &mut self.settings
    }

    /// Note currently selected, if any.
    pub fn selected(&self) -> Option<&ElementId> {
        self.selected.as_ref()
    }

    /// Note whose text is being edited. Keyboard deletes are ignored meanwhile.
    pub fn editing(&self) -> Option<&ElementId> {
        self.editing.as_ref()
    }

    /// Rendered size of the page, zero until measured.
    pub fn dimensions(&self) -> PageSize {
        self.dimensions
    }

    /// A stroke is being collected.
    pub fn is_drawing(&self) -> bool {
        matches!(self.gesture, Gesture::Drawing { .. })
    }

    /// Take all pending notifications.
    pub fn drain_events(&mut self) -> Vec<LayerEvent> {
        std::mem::take(&mut self.events)
    }

    /// Switch tool. An unfinished stroke or drag is abandoned.
    pub fn set_mode(&mut self, mode: DrawingMode) {
        if self.mode == mode {
            return;
        }
        self.mode = mode;
        if !matches!(self.gesture, Gesture::Idle) {
            debug!(page = self.page, "abandoning gesture on tool change");
            self.restore_current();
        }
    }

    /// Track the rendered page box. Returns whether the size changed.
    pub fn set_dimensions(&mut self, size: PageSize) -> bool {
        if self.dimensions == size {
            return false;
        }
        self.dimensions = size;
        true
    }

    /// Replace the contents with a freshly loaded set and restart history.
    pub fn load(&mut self, set: AnnotationSet) {
        let mut set = set;
        set.page = self.page;
        self.history.reset(set.clone());
        self.annotations = set;
        self.gesture = Gesture::Idle;
        self.selected = None;
        self.editing = None;
        self.events.push(LayerEvent::HistoryChanged(self.history_state()));
    }

    /// Start a gesture for the active mode.
    ///
    /// Stroke modes begin collecting points. Note modes select the note under
    /// the pointer or place a new one. With no tool it only changes selection.
    /// Ignored until the page is measured.
    pub fn pointer_down(&mut self, input: &PointerInput) {
        let Some(pos) = self.page_percent(input) else {
            return;
        };

        match self.mode {
            DrawingMode::Pencil | DrawingMode::Eraser | DrawingMode::FineEraser => {
                if let Some(tool) = self.mode.tool() {
                    self.gesture = Gesture::Drawing {
                        tool,
                        points: vec![pos.x, pos.y],
                    };
                }
            }
            DrawingMode::TextNote | DrawingMode::StickyNote => {
                if let Some(id) = self.note_at_percent(pos) {
                    self.select(Some(id));
                } else if let Some(tool) = self.mode.tool() {
                    self.place_note(tool, pos);
                }
            }
            DrawingMode::None => {
                let hit = self.note_at_percent(pos);
                self.select(hit);
            }
        }
    }

    /// Extend the current stroke or move the dragged note.
    pub fn pointer_move(&mut self, input: &PointerInput) {
        let Some(pos) = self.page_percent(input) else {
            return;
        };

        match &mut self.gesture {
            Gesture::Drawing { points, .. } => {
                points.push(pos.x);
                points.push(pos.y);
            }
            Gesture::Dragging { id, grab_offset, moved } => {
                let Some(note) = self.annotations.note_mut(id) else {
                    return;
                };
                let footprint = note
                    .dimensions()
                    .unwrap_or_else(|| estimated_footprint(note.tool, self.dimensions));
                let target = clamp_position(
                    Point::new(pos.x - grab_offset.x, pos.y - grab_offset.y),
                    footprint,
                );
                note.x = target.x;
                note.y = target.y;
                *moved = true;
            }
            Gesture::Idle => {}
        }
    }

    /// Finish the gesture, committing a stroke or a note drag that moved.
    pub fn pointer_up(&mut self) {
        match std::mem::replace(&mut self.gesture, Gesture::Idle) {
            Gesture::Drawing { tool, points } => self.finish_stroke(tool, points),
            Gesture::Dragging { id, moved, .. } => {
                if moved && &self.annotations != self.history.current() {
                    debug!(page = self.page, note = %id, "committing note drag");
                    self.commit(self.annotations.clone());
                }
            }
            Gesture::Idle => {}
        }
    }

    /// Start dragging note `id` from the pointer position in `input`.
    pub fn begin_drag(&mut self, id: &ElementId, input: &PointerInput) -> bool {
        let Some(pos) = self.page_percent(input) else {
            return false;
        };
        let Some(note) = self.annotations.note(id) else {
            return false;
        };
        let grab_offset = Point::new(pos.x - note.x, pos.y - note.y);
        self.select(Some(id.clone()));
        self.gesture = Gesture::Dragging {
            id: id.clone(),
            grab_offset,
            moved: false,
        };
        true
    }

    /// Step through history. Returns `false` when there is nothing to undo or redo.
    pub fn apply_command(&mut self, command: Command) -> bool {
        let restored = match command {
            Command::Undo => self.history.undo().cloned(),
            Command::Redo => self.history.redo().cloned(),
        };
        let Some(set) = restored else {
            return false;
        };

        debug!(page = self.page, ?command, index = self.history.index(), "history step");
        self.gesture = Gesture::Idle;
        self.editing = None;
        self.select(None);
        self.annotations = set.clone();
        self.events.push(LayerEvent::Changed(set));
        self.events.push(LayerEvent::HistoryChanged(self.history_state()));
        true
    }

    /// Change the selection, emitting an event only when it differs.
    pub fn select(&mut self, id: Option<ElementId>) {
        if self.selected != id {
            self.selected = id.clone();
            self.events.push(LayerEvent::SelectionChanged(id));
        }
    }

    /// Delete or Cmd+Backspace removes the selected note unless it is being edited.
    pub fn handle_key(&mut self, key: LayerKey) -> bool {
        if self.editing.is_some() {
            return false;
        }
        match key {
            LayerKey::Delete | LayerKey::Backspace { command: true } => self.delete_selected(),
            LayerKey::Backspace { command: false } => false,
        }
    }

    /// Remove the selected note as one undoable step.
    pub fn delete_selected(&mut self) -> bool {
        let Some(id) = self.selected.clone() else {
            return false;
        };
        let mut next = self.annotations.clone();
        if next.remove_note(&id).is_none() {
            return false;
        }
        self.select(None);
        self.commit(next);
        true
    }

    /// Open note `id` for text editing and select it.
    pub fn begin_note_edit(&mut self, id: &ElementId) -> bool {
        if self.annotations.note(id).is_none() {
            return false;
        }
        self.editing = Some(id.clone());
        self.select(Some(id.clone()));
        true
    }

    /// Live text edit. Reported for saving but not recorded in history.
    pub fn update_note_text(&mut self, id: &ElementId, text: &str) -> bool {
        let Some(note) = self.annotations.note_mut(id) else {
            return false;
        };
        if note.text == text {
            return false;
        }
        note.text = text.to_string();
        self.events.push(LayerEvent::Changed(self.annotations.clone()));
        true
    }

    /// Finish editing a note, recording the result if it differs from history.
    pub fn commit_note_edit(&mut self, id: &ElementId) -> bool {
        if self.editing.as_ref() == Some(id) {
            self.editing = None;
        }
        if &self.annotations == self.history.current() {
            return false;
        }
        self.commit(self.annotations.clone());
        true
    }

    /// Store a measured pixel size as the note's percentage footprint.
    pub fn resize_note(&mut self, id: &ElementId, size_px: Dimensions) -> bool {
        if !self.dimensions.is_ready() {
            return false;
        }
        let size = dimensions_to_percentage(size_px, self.dimensions);
        let mut next = self.annotations.clone();
        let Some(note) = next.note_mut(id) else {
            return false;
        };
        note.width = Some(size.width.min(100.0 - note.x).max(0.0));
        note.height = Some(size.height.min(100.0 - note.y).max(0.0));
        if self.editing.as_ref() == Some(id) {
            self.editing = None;
        }
        if &next == self.history.current() {
            self.annotations = next;
            return false;
        }
        self.commit(next);
        true
    }

    /// Topmost note under a pixel position.
    pub fn note_at(&self, p_px: Point) -> Option<ElementId> {
        if !self.dimensions.is_ready() {
            return None;
        }
        self.note_at_percent(position_to_percentage(p_px, self.dimensions))
    }

    /// Pixel box of a note for the current render.
    pub fn note_rect(&self, note: &NoteElement) -> PixelRect {
        let size = note
            .dimensions()
            .unwrap_or_else(|| estimated_footprint(note.tool, self.dimensions));
        percentage_to_pixels(
            &PercentageRect::new(note.x, note.y, size.width, size.height),
            self.dimensions,
        )
    }

    /// Pixel geometry for the current render; empty until the page is measured.
    pub fn render(&self) -> PixelAnnotations {
        if !self.dimensions.is_ready() {
            return PixelAnnotations::default();
        }
        self.annotations.to_pixels(self.dimensions)
    }

    /// The stroke being drawn, in pixels, for live preview.
    pub fn in_progress_stroke(&self) -> Option<InProgressStroke> {
        match &self.gesture {
            Gesture::Drawing { tool, points } if self.dimensions.is_ready() => {
                Some(InProgressStroke {
                    tool: *tool,
                    points: line_points_to_pixels(points, self.dimensions),
                    width: self.stroke_width_for(*tool),
                })
            }
            _ => None,
        }
    }

    fn page_percent(&self, input: &PointerInput) -> Option<Point> {
        if !self.dimensions.is_ready() {
            debug!(page = self.page, "pointer input before page measured");
            return None;
        }
        pointer_position(input).map(|p| position_to_percentage(p, self.dimensions))
    }

    fn note_at_percent(&self, pos: Point) -> Option<ElementId> {
        // Sticky notes paint above text notes; later elements above earlier ones
        self.annotations
            .sticky_notes
            .iter()
            .rev()
            .chain(self.annotations.texts.iter().rev())
            .find(|note| {
                let size = note
                    .dimensions()
                    .unwrap_or_else(|| estimated_footprint(note.tool, self.dimensions));
                pos.x >= note.x
                    && pos.x <= note.x + size.width
                    && pos.y >= note.y
                    && pos.y <= note.y + size.height
            })
            .map(|note| note.id.clone())
    }

    fn stroke_width_for(&self, tool: ToolKind) -> f64 {
        match tool {
            ToolKind::Pencil => {
                (self.settings.pencil_width * self.dimensions.scale_factor()).max(1.0)
            }
            _ => self.settings.eraser_width,
        }
    }

    fn place_note(&mut self, tool: ToolKind, pos: Point) {
        let footprint = estimated_footprint(tool, self.dimensions);
        let at = clamp_position(pos, footprint);
        let fill = if tool == ToolKind::StickyNote {
            self.settings.sticky_fill.clone()
        } else {
            self.settings.text_fill.clone()
        };
        let note = NoteElement {
            id: ElementId::new(),
            tool,
            x: at.x,
            y: at.y,
            text: String::new(),
            font_size: self.settings.font_size,
            fill,
            width: None,
            height: None,
        };
        let id = note.id.clone();

        let mut next = self.annotations.clone();
        if tool == ToolKind::StickyNote {
            next.sticky_notes.push(note);
        } else {
            next.texts.push(note);
        }
        debug!(page = self.page, ?tool, x = at.x, y = at.y, "placed note");
        self.commit(next);
        self.editing = Some(id.clone());
        self.select(Some(id));
    }

    fn finish_stroke(&mut self, tool: ToolKind, points: Vec<f64>) {
        if points.len() / 2 <= 1 {
            debug!(page = self.page, ?tool, "discarding single-point stroke");
            return;
        }

        let mut next = self.annotations.clone();
        match tool {
            ToolKind::Pencil => next.lines.push(LineElement {
                id: ElementId::new(),
                tool,
                points,
                stroke: self.settings.stroke.clone(),
                stroke_width: self.stroke_width_for(tool),
                composite_operation: CompositeOperation::SourceOver,
            }),
            ToolKind::Eraser => {
                let before = next.lines.len();
                next.lines = eraser::erase_lines(
                    &next.lines,
                    &points,
                    self.settings.eraser_width,
                    self.dimensions,
                );
                debug!(page = self.page, removed = before - next.lines.len(), "eraser pass");
            }
            ToolKind::FineEraser => next.lines.push(LineElement {
                id: ElementId::new(),
                tool,
                points,
                stroke: "#000000".to_string(),
                stroke_width: self.stroke_width_for(tool),
                composite_operation: CompositeOperation::DestinationOut,
            }),
            ToolKind::TextNote | ToolKind::StickyNote => return,
        }
        self.commit(next);
    }

    fn restore_current(&mut self) {
        self.gesture = Gesture::Idle;
        self.annotations = self.history.current().clone();
    }

    fn commit(&mut self, set: AnnotationSet) {
        self.history.push(set.clone());
        self.annotations = set.clone();
        self.events.push(LayerEvent::Changed(set));
        self.events.push(LayerEvent::HistoryChanged(self.history_state()));
    }
}
