//! Coordinate transforms between rendered pixels and page percentages
//!
//! Durable geometry (question regions, annotation points, note positions) is
//! stored as percentages of the page's rendered width and height, on a 0-100
//! scale. Pixel geometry only exists for the current paint pass and is always
//! derived from the current [`PageSize`].

use crate::error::{MarkingError, Result};
use serde::{Deserialize, Serialize};

/// Reference page width (A4, points)
pub const A4_WIDTH: f64 = 595.0;

/// Reference page height (A4, points)
pub const A4_HEIGHT: f64 = 842.0;

/// Smallest font size that stays legible after scaling
pub const MIN_FONT_SIZE: f64 = 8.0;

/// Decimal places kept when rounding geometry before persistence
pub const DEFAULT_PRECISION: u32 = 2;

/// Pixel size of the currently rendered page element
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PageSize {
    pub width: f64,
    pub height: f64,
}

impl PageSize {
    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }

    /// A page with a zero or negative side cannot be used as a scaling basis.
    pub fn is_ready(&self) -> bool {
        self.width > 0.0 && self.height > 0.0
    }

    /// Scale of this render relative to an A4 page.
    pub fn scale_factor(&self) -> f64 {
        (self.width / A4_WIDTH).min(self.height / A4_HEIGHT)
    }
}

/// Rectangle relative to page dimensions, each field on a 0-100 scale
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PercentageRect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl PercentageRect {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self { x, y, width, height }
    }
}

/// Rectangle in device pixels relative to the rendered page element
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PixelRect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl PixelRect {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self { x, y, width, height }
    }

    /// Normalized rectangle spanning two arbitrary corners.
    pub fn from_corners(a: Point, b: Point) -> Self {
        Self {
            x: a.x.min(b.x),
            y: a.y.min(b.y),
            width: (a.x - b.x).abs(),
            height: (a.y - b.y).abs(),
        }
    }

    pub fn contains(&self, p: Point) -> bool {
        p.x >= self.x && p.x <= self.x + self.width && p.y >= self.y && p.y <= self.y + self.height
    }
}

/// A single position; the unit (pixels or percent) is given by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance_to(&self, other: Point) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }
}

/// Width and height without a position.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Dimensions {
    pub width: f64,
    pub height: f64,
}

impl Dimensions {
    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }
}

/// Convert a pixel rectangle to percentages of `page`.
///
/// A page with a zero side yields non-finite fields; callers check
/// [`PageSize::is_ready`] first.
pub fn pixels_to_percentage(rect: &PixelRect, page: PageSize) -> PercentageRect {
    PercentageRect {
        x: rect.x / page.width * 100.0,
        y: rect.y / page.height * 100.0,
        width: rect.width / page.width * 100.0,
        height: rect.height / page.height * 100.0,
    }
}

/// Convert a percentage rectangle to pixels for `page`.
pub fn percentage_to_pixels(rect: &PercentageRect, page: PageSize) -> PixelRect {
    PixelRect {
        x: rect.x / 100.0 * page.width,
        y: rect.y / 100.0 * page.height,
        width: rect.width / 100.0 * page.width,
        height: rect.height / 100.0 * page.height,
    }
}

/// Map a flat `[x, y, x, y, ...]` list of percentage points to pixels.
pub fn line_points_to_pixels(points: &[f64], page: PageSize) -> Vec<f64> {
    points
        .iter()
        .enumerate()
        .map(|(i, v)| {
            if i % 2 == 0 {
                v / 100.0 * page.width
            } else {
                v / 100.0 * page.height
            }
        })
        .collect()
}

pub fn position_to_percentage(p: Point, page: PageSize) -> Point {
    Point {
        x: p.x / page.width * 100.0,
        y: p.y / page.height * 100.0,
    }
}

pub fn position_to_pixels(p: Point, page: PageSize) -> Point {
    Point {
        x: p.x / 100.0 * page.width,
        y: p.y / 100.0 * page.height,
    }
}

pub fn dimensions_to_percentage(d: Dimensions, page: PageSize) -> Dimensions {
    Dimensions {
        width: d.width / page.width * 100.0,
        height: d.height / page.height * 100.0,
    }
}

pub fn dimensions_to_pixels(d: Dimensions, page: PageSize) -> Dimensions {
    Dimensions {
        width: d.width / 100.0 * page.width,
        height: d.height / 100.0 * page.height,
    }
}

/// Scale a nominal font size to the rendered page, never below [`MIN_FONT_SIZE`].
pub fn scaled_font_size(base: f64, page: PageSize) -> f64 {
    (base * page.scale_factor()).max(MIN_FONT_SIZE)
}

fn round_to(value: f64, decimals: u32) -> f64 {
    let factor = 10f64.powi(decimals as i32);
    (value * factor).round() / factor
}

/// Round every field to `decimals` places so persisted values don't carry float noise.
pub fn round_percentage(rect: &PercentageRect, decimals: u32) -> PercentageRect {
    PercentageRect {
        x: round_to(rect.x, decimals),
        y: round_to(rect.y, decimals),
        width: round_to(rect.width, decimals),
        height: round_to(rect.height, decimals),
    }
}

pub fn round_point(p: Point, decimals: u32) -> Point {
    Point {
        x: round_to(p.x, decimals),
        y: round_to(p.y, decimals),
    }
}

/// Check that a rectangle lies inside the page box.
pub fn validate_percentage(rect: &PercentageRect) -> Result<()> {
    let fields = [rect.x, rect.y, rect.width, rect.height];
    if fields.iter().any(|v| !v.is_finite()) {
        return Err(MarkingError::InvalidGeometry(format!(
            "non-finite coordinates {:?}",
            rect
        )));
    }
    if rect.x < 0.0 || rect.y < 0.0 || rect.width < 0.0 || rect.height < 0.0 {
        return Err(MarkingError::InvalidGeometry(format!(
            "negative coordinates {:?}",
            rect
        )));
    }
    // Allow for rounding jitter at the far edges
    const EPSILON: f64 = 1e-9;
    if rect.x + rect.width > 100.0 + EPSILON || rect.y + rect.height > 100.0 + EPSILON {
        return Err(MarkingError::InvalidGeometry(format!(
            "rectangle exceeds page bounds {:?}",
            rect
        )));
    }
    Ok(())
}

/// Clamp a rectangle into the page box, shrinking it if it is larger than the page.
pub fn clamp_percentage(rect: &PercentageRect) -> PercentageRect {
    let width = rect.width.clamp(0.0, 100.0);
    let height = rect.height.clamp(0.0, 100.0);
    PercentageRect {
        x: rect.x.clamp(0.0, 100.0 - width),
        y: rect.y.clamp(0.0, 100.0 - height),
        width,
        height,
    }
}

/// Clamp a position so that an element of `footprint` (percent) stays on the page.
pub fn clamp_position(p: Point, footprint: Dimensions) -> Point {
    Point {
        x: p.x.clamp(0.0, (100.0 - footprint.width).max(0.0)),
        y: p.y.clamp(0.0, (100.0 - footprint.height).max(0.0)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pixels_to_percentage() {
        let page = PageSize::new(800.0, 1000.0);
        let pct = pixels_to_percentage(&PixelRect::new(80.0, 250.0, 400.0, 100.0), page);
        assert_eq!(pct, PercentageRect::new(10.0, 25.0, 50.0, 10.0));
    }

    #[test]
    fn test_zero_page_is_not_ready() {
        let page = PageSize::new(0.0, 842.0);
        assert!(!page.is_ready());
        let pct = pixels_to_percentage(&PixelRect::new(10.0, 10.0, 10.0, 10.0), page);
        assert!(!pct.x.is_finite());
        assert!(validate_percentage(&pct).is_err());
    }

    #[test]
    fn test_line_points_use_axis_scale() {
        let page = PageSize::new(1000.0, 500.0);
        let px = line_points_to_pixels(&[10.0, 10.0, 50.0, 100.0], page);
        assert_eq!(px, vec![100.0, 50.0, 500.0, 500.0]);
    }

    #[test]
    fn test_font_scaling_uses_smaller_axis() {
        let page = PageSize::new(A4_WIDTH * 2.0, A4_HEIGHT);
        assert!((scaled_font_size(16.0, page) - 16.0).abs() < 1e-9);

        let tiny = PageSize::new(100.0, 100.0);
        assert_eq!(scaled_font_size(16.0, tiny), MIN_FONT_SIZE);
    }

    #[test]
    fn test_round_percentage() {
        let rect = PercentageRect::new(10.123456, 0.1 + 0.2, 33.333333, 5.0);
        let rounded = round_percentage(&rect, 2);
        assert_eq!(rounded, PercentageRect::new(10.12, 0.3, 33.33, 5.0));
    }

    #[test]
    fn test_validate_bounds() {
        assert!(validate_percentage(&PercentageRect::new(0.0, 0.0, 100.0, 100.0)).is_ok());
        assert!(validate_percentage(&PercentageRect::new(60.0, 0.0, 50.0, 10.0)).is_err());
        assert!(validate_percentage(&PercentageRect::new(-1.0, 0.0, 5.0, 10.0)).is_err());
    }

    #[test]
    fn test_clamp_position_keeps_footprint_on_page() {
        let p = clamp_position(Point::new(100.0, 100.0), Dimensions::new(12.0, 4.0));
        assert_eq!(p, Point::new(88.0, 96.0));

        let oversized = clamp_position(Point::new(50.0, 50.0), Dimensions::new(150.0, 0.0));
        assert_eq!(oversized.x, 0.0);
    }

    #[test]
    fn test_clamp_percentage_shifts_inside() {
        let clamped = clamp_percentage(&PercentageRect::new(90.0, -5.0, 20.0, 10.0));
        assert_eq!(clamped, PercentageRect::new(80.0, 0.0, 20.0, 10.0));
        assert!(validate_percentage(&clamped).is_ok());
    }

    #[test]
    fn test_from_corners_normalizes() {
        let rect = PixelRect::from_corners(Point::new(50.0, 80.0), Point::new(10.0, 20.0));
        assert_eq!(rect, PixelRect::new(10.0, 20.0, 40.0, 60.0));
        assert!(rect.contains(Point::new(30.0, 30.0)));
    }
}
