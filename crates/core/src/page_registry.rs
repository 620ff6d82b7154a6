//! Measured sizes of rendered pages
//!
//! The renderer reports every completed page paint here; geometry code asks
//! the registry for the current [`PageSize`] instead of inspecting widgets.

use crate::coords::PageSize;
use std::collections::HashMap;

/// Page number (1-based) to measured render size.
#[derive(Debug, Default, Clone)]
pub struct PageRenderRegistry {
    sizes: HashMap<u32, PageSize>,
    page_count: Option<u32>,
}

impl PageRenderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the final box size of a rendered page.
    pub fn record_render(&mut self, page: u32, size: PageSize) {
        if size.is_ready() {
            self.sizes.insert(page, size);
        } else {
            self.sizes.remove(&page);
        }
    }

    pub fn set_page_count(&mut self, count: u32) {
        self.page_count = Some(count);
    }

    pub fn page_count(&self) -> Option<u32> {
        self.page_count
    }

    /// Current size of `page`, or `None` when it has not been rendered.
    ///
    /// `None` means "not ready": callers skip the current pass.
    pub fn page_size(&self, page: u32) -> Option<PageSize> {
        self.sizes.get(&page).copied()
    }

    pub fn forget(&mut self, page: u32) {
        self.sizes.remove(&page);
    }

    /// Drop every measurement, e.g. before a full re-render.
    pub fn invalidate(&mut self) {
        self.sizes.clear();
    }

    /// Forget everything, including the page count.
    pub fn reset(&mut self) {
        self.sizes.clear();
        self.page_count = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unrendered_page_is_none() {
        let registry = PageRenderRegistry::new();
        assert_eq!(registry.page_size(1), None);
    }

    #[test]
    fn test_record_and_invalidate() {
        let mut registry = PageRenderRegistry::new();
        registry.set_page_count(3);
        registry.record_render(2, PageSize::new(700.0, 990.0));
        assert_eq!(registry.page_size(2), Some(PageSize::new(700.0, 990.0)));

        registry.invalidate();
        assert_eq!(registry.page_size(2), None);
        assert_eq!(registry.page_count(), Some(3));

        registry.reset();
        assert_eq!(registry.page_count(), None);
    }

    #[test]
    fn test_zero_size_is_not_recorded() {
        let mut registry = PageRenderRegistry::new();
        registry.record_render(1, PageSize::new(700.0, 990.0));
        registry.record_render(1, PageSize::new(0.0, 0.0));
        assert_eq!(registry.page_size(1), None);
    }
}
