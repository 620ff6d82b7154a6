//! Linear undo/redo history of annotation snapshots

use crate::annotation::AnnotationSet;

/// Maximum number of snapshots kept per mounted layer
pub const DEFAULT_HISTORY_CAP: usize = 50;

/// Ordered snapshots plus a cursor.
///
/// The stack is seeded with the state the layer was opened with, so undoing
/// every action returns to that state. Pushing after an undo discards the
/// redo branch; when the cap is exceeded the oldest snapshots are dropped.
#[derive(Debug, Clone)]
pub struct HistoryStack {
    entries: Vec<AnnotationSet>,
    index: usize,
    cap: usize,
}

impl HistoryStack {
    pub fn new(initial: AnnotationSet) -> Self {
        Self::with_cap(initial, DEFAULT_HISTORY_CAP)
    }

    pub fn with_cap(initial: AnnotationSet, cap: usize) -> Self {
        Self {
            entries: vec![initial],
            index: 0,
            cap: cap.max(1),
        }
    }

    /// Record a new state after the cursor.
    pub fn push(&mut self, set: AnnotationSet) {
        self.entries.truncate(self.index + 1);
        self.entries.push(set);
        if self.entries.len() > self.cap {
            let overflow = self.entries.len() - self.cap;
            self.entries.drain(..overflow);
        }
        self.index = self.entries.len() - 1;
    }

    /// Step back, returning the state to display.
    pub fn undo(&mut self) -> Option<&AnnotationSet> {
        if !self.can_undo() {
            return None;
        }
        self.index -= 1;
        self.entries.get(self.index)
    }

    /// Step forward, returning the state to display.
    pub fn redo(&mut self) -> Option<&AnnotationSet> {
        if !self.can_redo() {
            return None;
        }
        self.index += 1;
        self.entries.get(self.index)
    }

    pub fn can_undo(&self) -> bool {
        self.index > 0
    }

    pub fn can_redo(&self) -> bool {
        self.index + 1 < self.entries.len()
    }

    pub fn current(&self) -> &AnnotationSet {
        &self.entries[self.index]
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// Oldest snapshot still reachable by undo
    pub fn oldest(&self) -> &AnnotationSet {
        &self.entries[0]
    }

    /// Start over from `initial`, forgetting all snapshots.
    pub fn reset(&mut self, initial: AnnotationSet) {
        self.entries.clear();
        self.entries.push(initial);
        self.index = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(page: u32) -> AnnotationSet {
        AnnotationSet::new(page)
    }

    #[test]
    fn test_seeded_stack_cannot_undo() {
        let history = HistoryStack::new(set(0));
        assert!(!history.can_undo());
        assert!(!history.can_redo());
        assert_eq!(history.len(), 1);
    }

    #[test]
    fn test_undo_redo_moves_cursor_only() {
        let mut history = HistoryStack::new(set(0));
        history.push(set(1));
        history.push(set(2));

        assert_eq!(history.undo().map(|s| s.page), Some(1));
        assert_eq!(history.undo().map(|s| s.page), Some(0));
        assert!(history.undo().is_none());
        assert_eq!(history.len(), 3);

        assert_eq!(history.redo().map(|s| s.page), Some(1));
        assert!(history.can_redo());
    }

    #[test]
    fn test_push_truncates_redo_branch() {
        let mut history = HistoryStack::new(set(0));
        history.push(set(1));
        history.push(set(2));
        history.undo();
        history.push(set(3));

        assert!(!history.can_redo());
        assert_eq!(history.len(), 3);
        assert_eq!(history.current().page, 3);
    }

    #[test]
    fn test_cap_drops_oldest() {
        let mut history = HistoryStack::with_cap(set(0), 5);
        for page in 1..=8 {
            history.push(set(page));
        }
        assert_eq!(history.len(), 5);
        assert_eq!(history.index(), 4);
        assert_eq!(history.oldest().page, 4);
        assert_eq!(history.current().page, 8);
    }

    #[test]
    fn test_reset() {
        let mut history = HistoryStack::new(set(0));
        history.push(set(1));
        history.reset(set(9));
        assert_eq!(history.len(), 1);
        assert_eq!(history.current().page, 9);
    }
}
