//! Answer sheet rasterization using PDFium

use crate::error::{RenderError, RenderResult};
use marking_core::PageSize;
use pdfium_render::prelude::*;
use tracing::debug;

/// Owns the PDFium bindings. Construct once and share.
pub struct PdfRenderer {
    pdfium: Pdfium,
}

impl PdfRenderer {
    /// Bind to PDFium.
    ///
    /// Search order:
    /// 1. Executable's directory
    /// 2. Current working directory
    /// 3. System library paths
    pub fn init() -> RenderResult<Self> {
        let exe_dir = std::env::current_exe()
            .ok()
            .and_then(|p| p.parent().map(|p| p.to_path_buf()));

        if let Some(ref dir) = exe_dir {
            if let Ok(bindings) =
                Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path(dir))
            {
                return Ok(Self {
                    pdfium: Pdfium::new(bindings),
                });
            }
        }

        let bindings = Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./"))
            .or_else(|_| Pdfium::bind_to_system_library())
            .map_err(|e| RenderError::Initialization(e.to_string()))?;
        Ok(Self {
            pdfium: Pdfium::new(bindings),
        })
    }

    /// Open answer-sheet bytes fetched from the blob store.
    pub fn load(&self, bytes: Vec<u8>) -> RenderResult<AnswerSheet<'_>> {
        let document = self
            .pdfium
            .load_pdf_from_byte_vec(bytes, None)
            .map_err(|e| RenderError::Load(e.to_string()))?;
        Ok(AnswerSheet { document })
    }
}

/// Pixels of one rendered page
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedPage {
    /// 1-based page number
    pub page: u32,
    pub width: u32,
    pub height: u32,
    /// RGBA, 4 bytes per pixel
    pub rgba: Vec<u8>,
}

impl RenderedPage {
    /// Measured size to publish to the page render registry
    pub fn page_size(&self) -> PageSize {
        PageSize::new(self.width as f64, self.height as f64)
    }
}

/// Height that keeps a page's aspect ratio at `width` pixels.
pub fn target_height(page_width_pt: f32, page_height_pt: f32, width: u32) -> u32 {
    if page_width_pt <= 0.0 || page_height_pt <= 0.0 {
        return 0;
    }
    (width as f32 * page_height_pt / page_width_pt).round() as u32
}

pub struct AnswerSheet<'a> {
    document: PdfDocument<'a>,
}

impl<'a> AnswerSheet<'a> {
    pub fn page_count(&self) -> u32 {
        self.document.pages().len() as u32
    }

    fn page(&self, page: u32) -> RenderResult<PdfPage<'_>> {
        let index = page
            .checked_sub(1)
            .and_then(|i| u16::try_from(i).ok())
            .ok_or(RenderError::InvalidPage(page))?;
        self.document
            .pages()
            .get(index)
            .map_err(|_| RenderError::InvalidPage(page))
    }

    /// Page size in points
    pub fn page_points(&self, page: u32) -> RenderResult<(f32, f32)> {
        let p = self.page(page)?;
        Ok((p.width().value, p.height().value))
    }

    /// Rasterize `page` (1-based) at `width` pixels, keeping its aspect ratio.
    pub fn render_page(&self, page: u32, width: u32) -> RenderResult<RenderedPage> {
        let p = self.page(page)?;
        let height = target_height(p.width().value, p.height().value, width);
        if width == 0 || height == 0 {
            return Err(RenderError::Render(format!("page {page} has no area at width {width}")));
        }

        let config = PdfRenderConfig::new()
            .set_target_width(width as i32)
            .set_target_height(height as i32);
        let bitmap = p
            .render_with_config(&config)
            .map_err(|e| RenderError::Render(e.to_string()))?;

        debug!(page, width, height, "rendered page");
        Ok(RenderedPage {
            page,
            width,
            height,
            rgba: bitmap.as_rgba_bytes().to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_height_keeps_aspect() {
        assert_eq!(target_height(595.0, 842.0, 595), 842);
        assert_eq!(target_height(595.0, 842.0, 1190), 1684);
        assert_eq!(target_height(842.0, 595.0, 842), 595);
        assert_eq!(target_height(0.0, 842.0, 500), 0);
    }

    #[test]
    fn test_rendered_page_size() {
        let page = RenderedPage {
            page: 1,
            width: 700,
            height: 990,
            rgba: Vec::new(),
        };
        assert_eq!(page.page_size(), PageSize::new(700.0, 990.0));
    }
}
