//! Question regions and the lecturer's region-mapping controller

use crate::coords::{
    clamp_percentage, percentage_to_pixels, pixels_to_percentage, round_percentage,
    validate_percentage, PageSize, PercentageRect, PixelRect, Point, DEFAULT_PRECISION,
};
use crate::error::{MarkingError, Result};
use crate::ids::{AssessmentId, QuestionId};
use serde::{Deserialize, Serialize};

/// Drags smaller than this on either side are treated as clicks.
pub const MIN_REGION_PX: f64 = 5.0;

/// Largest button set offered for one question
pub const MAX_MARK_OPTIONS: usize = 1000;

const MARK_EPSILON: f64 = 1e-6;

/// Step values are snapped to this many parts per unit to drop float noise.
const SNAP_SCALE: f64 = 1e9;

/// A lecturer-defined grading area on one page of the answer sheet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionRegion {
    pub id: QuestionId,
    pub assessment_id: AssessmentId,
    pub question_number: String,
    /// 1-based page of the answer sheet
    pub page_number: u32,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    pub max_marks: f64,
    pub increment: f64,
    #[serde(default)]
    pub memo: Option<String>,
    #[serde(default)]
    pub marking_note: Option<String>,
}

impl QuestionRegion {
    pub fn rect(&self) -> PercentageRect {
        PercentageRect::new(self.x, self.y, self.width, self.height)
    }

    pub fn pixel_rect(&self, page: PageSize) -> PixelRect {
        percentage_to_pixels(&self.rect(), page)
    }

    pub fn mark_options(&self) -> Vec<f64> {
        mark_options(self.max_marks, self.increment)
    }

    pub fn is_valid_mark(&self, mark: f64) -> bool {
        is_offered_mark(self.max_marks, self.increment, mark)
    }
}

fn snap(value: f64) -> f64 {
    (value * SNAP_SCALE).round() / SNAP_SCALE
}

/// Number of increments that fit in `max_marks`, or `None` for an unusable scale.
fn step_count(max_marks: f64, increment: f64) -> Option<usize> {
    if !(max_marks.is_finite() && increment.is_finite()) || max_marks < 0.0 || increment <= 0.0 {
        return None;
    }
    // Tolerate float noise such as 3.0 / 0.1 = 29.999999999999996
    let steps = (max_marks / increment + MARK_EPSILON).floor();
    (steps < MAX_MARK_OPTIONS as f64).then_some(steps as usize)
}

/// Mark buttons for a question: `floor(max / increment) + 1` evenly spaced values from zero.
///
/// Empty when the scale is invalid or would need more than [`MAX_MARK_OPTIONS`] buttons.
pub fn mark_options(max_marks: f64, increment: f64) -> Vec<f64> {
    match step_count(max_marks, increment) {
        Some(steps) => (0..=steps).map(|i| snap(i as f64 * increment)).collect(),
        None => Vec::new(),
    }
}

/// Whether `mark` is one of the values [`mark_options`] offers.
pub fn is_offered_mark(max_marks: f64, increment: f64, mark: f64) -> bool {
    let Some(steps) = step_count(max_marks, increment) else {
        return false;
    };
    if !mark.is_finite() || mark < -MARK_EPSILON {
        return false;
    }
    let step = (mark / increment).round();
    step <= steps as f64 && (step * increment - mark).abs() < MARK_EPSILON
}

/// Editable question metadata before it is saved
#[derive(Debug, Clone, PartialEq, Default)]
pub struct QuestionDraft {
    pub question_number: String,
    pub page_number: u32,
    pub rect: PercentageRect,
    pub max_marks: f64,
    pub increment: f64,
    pub memo: Option<String>,
    pub marking_note: Option<String>,
}

impl QuestionDraft {
    pub fn from_region(region: &QuestionRegion) -> Self {
        Self {
            question_number: region.question_number.clone(),
            page_number: region.page_number,
            rect: region.rect(),
            max_marks: region.max_marks,
            increment: region.increment,
            memo: region.memo.clone(),
            marking_note: region.marking_note.clone(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.question_number.trim().is_empty() {
            return Err(MarkingError::Validation("question number is required".into()));
        }
        if self.page_number == 0 {
            return Err(MarkingError::Validation("page numbers start at 1".into()));
        }
        if !(self.max_marks > 0.0) {
            return Err(MarkingError::Validation("max marks must be positive".into()));
        }
        if !(self.increment > 0.0) {
            return Err(MarkingError::Validation("increment must be positive".into()));
        }
        if self.increment > self.max_marks {
            return Err(MarkingError::Validation(
                "increment cannot exceed max marks".into(),
            ));
        }
        if step_count(self.max_marks, self.increment).is_none() {
            return Err(MarkingError::Validation(format!(
                "at most {MAX_MARK_OPTIONS} mark values per question"
            )));
        }
        validate_percentage(&self.rect)?;
        if self.rect.width <= 0.0 || self.rect.height <= 0.0 {
            return Err(MarkingError::InvalidGeometry("question region is empty".into()));
        }
        Ok(())
    }

    /// Validate and produce the record to store, with geometry rounded.
    pub fn into_region(self, id: QuestionId, assessment_id: AssessmentId) -> Result<QuestionRegion> {
        self.validate()?;
        let rect = round_percentage(&self.rect, DEFAULT_PRECISION);
        Ok(QuestionRegion {
            id,
            assessment_id,
            question_number: self.question_number.trim().to_string(),
            page_number: self.page_number,
            x: rect.x,
            y: rect.y,
            width: rect.width,
            height: rect.height,
            max_marks: self.max_marks,
            increment: self.increment,
            memo: self.memo,
            marking_note: self.marking_note,
        })
    }
}

/// Drag-to-draw controller for question regions on a rendered page
#[derive(Debug, Clone, Default)]
pub struct QuestionMapper {
    page: u32,
    start: Option<Point>,
    current: Option<Point>,
}

impl QuestionMapper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_dragging(&self) -> bool {
        self.start.is_some()
    }

    pub fn page(&self) -> u32 {
        self.page
    }

    pub fn begin(&mut self, page: u32, p_px: Point) {
        self.page = page;
        self.start = Some(p_px);
        self.current = Some(p_px);
    }

    pub fn update(&mut self, p_px: Point) {
        if self.start.is_some() {
            self.current = Some(p_px);
        }
    }

    pub fn cancel(&mut self) {
        self.start = None;
        self.current = None;
    }

    /// Rectangle being dragged, in pixels.
    pub fn preview(&self) -> Option<PixelRect> {
        Some(PixelRect::from_corners(self.start?, self.current?))
    }

    /// Finish the drag and return the region in page percent.
    ///
    /// Returns `None` for tiny drags and for pages that are not measured.
    pub fn finish(&mut self, page: PageSize) -> Option<PercentageRect> {
        let rect = self.preview();
        self.cancel();
        let rect = rect?;
        if !page.is_ready() || rect.width < MIN_REGION_PX || rect.height < MIN_REGION_PX {
            return None;
        }
        let pct = clamp_percentage(&pixels_to_percentage(&rect, page));
        Some(round_percentage(&pct, DEFAULT_PRECISION))
    }
}
