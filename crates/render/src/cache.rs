//! Rendered page cache for the current answer sheet
//!
//! Pages are keyed by number and valid for one `(render version, width)`
//! pair. A new version or width drops everything, which is how a settled
//! resize or a student change forces a full re-render.

use crate::error::RenderResult;
use crate::pdf::RenderedPage;
use std::collections::HashMap;

#[derive(Debug, Default)]
pub struct PageCache {
    version: u64,
    width: u32,
    pages: HashMap<u32, RenderedPage>,
}

impl PageCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn retarget(&mut self, version: u64, width: u32) {
        if self.version != version || self.width != width {
            self.pages.clear();
            self.version = version;
            self.width = width;
        }
    }

    /// Cached page for this version and width, rendering it with `render` on a miss.
    pub fn get_or_render(
        &mut self,
        page: u32,
        version: u64,
        width: u32,
        render: impl FnOnce() -> RenderResult<RenderedPage>,
    ) -> RenderResult<&RenderedPage> {
        self.retarget(version, width);
        if !self.pages.contains_key(&page) {
            let rendered = render()?;
            self.pages.insert(page, rendered);
        }
        self.pages
            .get(&page)
            .ok_or(crate::error::RenderError::InvalidPage(page))
    }

    pub fn get(&self, page: u32) -> Option<&RenderedPage> {
        self.pages.get(&page)
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    pub fn clear(&mut self) {
        self.pages.clear();
    }
}
