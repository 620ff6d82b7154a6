//! Whole-stroke eraser hit testing
//!
//! Both the candidate line and the eraser path are converted to pixels for
//! the current page size, then every point pair is compared. A line is hit
//! when any pair is closer than half the combined stroke widths.
//!
//! This samples points rather than measuring segment-to-segment distance, so
//! a fast sparse eraser path can pass between two widely spaced ink points.
//! Existing documents were erased under these rules; keep them.

use crate::annotation::LineElement;
use crate::coords::{line_points_to_pixels, PageSize};

/// Whether any point of `line_px` lies within `threshold` of any point of `path_px`.
///
/// Both inputs are flat `[x, y, ...]` pixel lists.
pub fn points_within(line_px: &[f64], path_px: &[f64], threshold: f64) -> bool {
    line_px.chunks_exact(2).any(|p1| {
        path_px.chunks_exact(2).any(|p2| {
            let dx = p1[0] - p2[0];
            let dy = p1[1] - p2[1];
            (dx * dx + dy * dy).sqrt() < threshold
        })
    })
}

/// Whether an eraser path (percent points) touches `line` on a page of `page` size.
pub fn intersects(line: &LineElement, eraser_points: &[f64], eraser_width: f64, page: PageSize) -> bool {
    let line_px = line_points_to_pixels(&line.points, page);
    let path_px = line_points_to_pixels(eraser_points, page);
    let threshold = (line.stroke_width + eraser_width) / 2.0;
    points_within(&line_px, &path_px, threshold)
}

/// Lines left after sweeping the eraser along `eraser_points`.
///
/// Only pencil ink is removed; eraser and fine-eraser strokes always survive.
pub fn erase_lines(
    lines: &[LineElement],
    eraser_points: &[f64],
    eraser_width: f64,
    page: PageSize,
) -> Vec<LineElement> {
    lines
        .iter()
        .filter(|line| !(line.is_erasable() && intersects(line, eraser_points, eraser_width, page)))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotation::{CompositeOperation, ElementId, ToolKind};

    fn line(tool: ToolKind, points: Vec<f64>) -> LineElement {
        LineElement {
            id: ElementId::new(),
            tool,
            points,
            stroke: "#000".to_string(),
            stroke_width: 2.0,
            composite_operation: if tool == ToolKind::FineEraser {
                CompositeOperation::DestinationOut
            } else {
                CompositeOperation::SourceOver
            },
        }
    }

    #[test]
    fn test_points_within_threshold() {
        assert!(points_within(&[0.0, 0.0, 10.0, 0.0], &[10.0, 3.0], 4.0));
        assert!(!points_within(&[0.0, 0.0, 10.0, 0.0], &[10.0, 5.0], 4.0));
    }

    #[test]
    fn test_threshold_is_strict() {
        assert!(!points_within(&[0.0, 0.0], &[3.0, 4.0], 5.0));
    }

    #[test]
    fn test_erase_removes_only_pencil() {
        let page = PageSize::new(1000.0, 1000.0);
        let pencil = line(ToolKind::Pencil, vec![10.0, 10.0, 20.0, 10.0]);
        let mask = line(ToolKind::FineEraser, vec![10.0, 10.0, 20.0, 10.0]);
        let eraser = line(ToolKind::Eraser, vec![10.0, 10.0, 20.0, 10.0]);
        let far = line(ToolKind::Pencil, vec![80.0, 80.0, 90.0, 90.0]);

        let kept = erase_lines(
            &[pencil, mask.clone(), eraser.clone(), far.clone()],
            &[15.0, 10.0, 15.0, 10.0],
            120.0,
            page,
        );
        assert_eq!(kept, vec![mask, eraser, far]);
    }

    #[test]
    fn test_sparse_path_can_miss() {
        let page = PageSize::new(1000.0, 1000.0);
        let ink = line(ToolKind::Pencil, vec![50.0, 10.0, 50.0, 90.0]);
        // Path jumps across the stroke without sampling near it
        let kept = erase_lines(&[ink], &[10.0, 50.0, 90.0, 50.0], 10.0, page);
        assert_eq!(kept.len(), 1);
    }
}
