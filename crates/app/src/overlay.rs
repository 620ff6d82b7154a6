//! CPU compositing of committed strokes into an overlay texture.
//!
//! Fine-eraser strokes use destination-out, which the egui painter cannot
//! express, so lines are rasterized in order into a transparent RGBA buffer
//! and uploaded as one texture per page.

use eframe::egui;
use marking_core::{parse_css_color, CompositeOperation, PixelLine};

/// Stroke colour used when the stored CSS colour cannot be parsed
const FALLBACK_RGB: [u8; 3] = [255, 0, 0];

#[derive(Debug, Clone, PartialEq)]
pub struct Overlay {
    pub width: usize,
    pub height: usize,
    /// Unmultiplied RGBA
    pub rgba: Vec<u8>,
}

impl Overlay {
    pub fn to_color_image(&self) -> egui::ColorImage {
        egui::ColorImage::from_rgba_unmultiplied([self.width, self.height], &self.rgba)
    }

    fn alpha(&self, x: usize, y: usize) -> u8 {
        self.rgba[(y * self.width + x) * 4 + 3]
    }
}

/// Rasterize `lines` at `scale` device pixels per page pixel.
pub fn rasterize(lines: &[PixelLine], width: usize, height: usize, scale: f32) -> Overlay {
    let mut overlay = Overlay {
        width,
        height,
        rgba: vec![0; width * height * 4],
    };
    for line in lines {
        let rgb = parse_css_color(&line.stroke).unwrap_or(FALLBACK_RGB);
        let radius = (line.stroke_width as f32 * scale / 2.0).max(0.5);
        let points: Vec<(f32, f32)> = line
            .points
            .chunks_exact(2)
            .map(|p| (p[0] as f32 * scale, p[1] as f32 * scale))
            .collect();
        for segment in points.windows(2) {
            stamp_segment(&mut overlay, segment[0], segment[1], radius, |px| {
                match line.composite_operation {
                    CompositeOperation::SourceOver => {
                        px[..3].copy_from_slice(&rgb);
                        px[3] = 255;
                    }
                    CompositeOperation::DestinationOut => px.fill(0),
                }
            });
        }
    }
    overlay
}

/// Apply `paint` to every pixel whose centre lies within `radius` of segment `a`-`b`.
fn stamp_segment(
    overlay: &mut Overlay,
    a: (f32, f32),
    b: (f32, f32),
    radius: f32,
    paint: impl Fn(&mut [u8]),
) {
    if overlay.width == 0 || overlay.height == 0 {
        return;
    }
    let min_x = (a.0.min(b.0) - radius).floor().max(0.0) as usize;
    let min_y = (a.1.min(b.1) - radius).floor().max(0.0) as usize;
    let max_x = ((a.0.max(b.0) + radius).ceil().max(0.0) as usize).min(overlay.width - 1);
    let max_y = ((a.1.max(b.1) + radius).ceil().max(0.0) as usize).min(overlay.height - 1);

    let (dx, dy) = (b.0 - a.0, b.1 - a.1);
    let len_sq = dx * dx + dy * dy;
    let r_sq = radius * radius;
    for y in min_y..=max_y {
        for x in min_x..=max_x {
            let (cx, cy) = (x as f32 + 0.5, y as f32 + 0.5);
            let t = if len_sq > 0.0 {
                (((cx - a.0) * dx + (cy - a.1) * dy) / len_sq).clamp(0.0, 1.0)
            } else {
                0.0
            };
            let (nx, ny) = (a.0 + t * dx - cx, a.1 + t * dy - cy);
            if nx * nx + ny * ny <= r_sq {
                let i = (y * overlay.width + x) * 4;
                paint(&mut overlay.rgba[i..i + 4]);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use marking_core::{ElementId, ToolKind};

    fn line(tool: ToolKind, points: &[f64], width: f64) -> PixelLine {
        let op = match tool {
            ToolKind::FineEraser => CompositeOperation::DestinationOut,
            _ => CompositeOperation::SourceOver,
        };
        PixelLine {
            id: ElementId::new(),
            tool,
            points: points.to_vec(),
            stroke: if op == CompositeOperation::SourceOver { "#00ff00".into() } else { "#000000".into() },
            stroke_width: width,
            composite_operation: op,
        }
    }

    #[test]
    fn pencil_paints_along_the_stroke() {
        let overlay = rasterize(&[line(ToolKind::Pencil, &[2.0, 10.0, 30.0, 10.0], 4.0)], 40, 20, 1.0);
        let i = (10 * 40 + 15) * 4;
        assert_eq!(&overlay.rgba[i..i + 4], &[0, 255, 0, 255]);
        assert_eq!(overlay.alpha(15, 2), 0);
    }

    #[test]
    fn fine_eraser_clears_earlier_ink_only_where_it_passes() {
        let lines = [
            line(ToolKind::Pencil, &[2.0, 10.0, 30.0, 10.0], 4.0),
            line(ToolKind::FineEraser, &[15.0, 0.0, 15.0, 19.0], 4.0),
        ];
        let overlay = rasterize(&lines, 40, 20, 1.0);
        assert_eq!(overlay.alpha(15, 10), 0);
        assert_eq!(overlay.alpha(5, 10), 255);
        assert_eq!(overlay.alpha(25, 10), 255);
    }

    #[test]
    fn scale_maps_to_device_pixels() {
        let overlay = rasterize(&[line(ToolKind::Pencil, &[1.0, 5.0, 9.0, 5.0], 2.0)], 20, 20, 2.0);
        assert_eq!(overlay.alpha(10, 10), 255);
        assert_eq!(overlay.alpha(10, 4), 0);
    }

    #[test]
    fn strokes_off_the_page_are_clipped() {
        let overlay = rasterize(&[line(ToolKind::Pencil, &[-50.0, -50.0, 100.0, 100.0], 6.0)], 10, 10, 1.0);
        assert_eq!(overlay.rgba.len(), 10 * 10 * 4);
        assert_eq!(overlay.alpha(5, 5), 255);
    }
}
