//! Marking Render Library
//!
//! Answer sheet rendering collaborator: loads PDF bytes with PDFium,
//! rasterizes pages at a container-driven width and reports the measured
//! page sizes back to the marking surface.

pub mod cache;
pub mod error;
pub mod pdf;

pub use cache::PageCache;
pub use error::{RenderError, RenderResult};
pub use pdf::{target_height, AnswerSheet, PdfRenderer, RenderedPage};
