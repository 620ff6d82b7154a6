//! Revocable handles for fetched answer-sheet bytes
//!
//! Fetched PDFs are registered here and referenced by [`BlobHandle`] while a
//! student is on screen. Navigating away revokes the handle and frees the
//! bytes; a revoked handle never resolves again.

use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlobHandle(u64);

#[derive(Debug, Default)]
pub struct BlobRegistry {
    next: u64,
    blobs: HashMap<BlobHandle, Arc<[u8]>>,
}

impl BlobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, bytes: Vec<u8>) -> BlobHandle {
        self.next += 1;
        let handle = BlobHandle(self.next);
        debug!(handle = handle.0, len = bytes.len(), "registered blob");
        self.blobs.insert(handle, Arc::from(bytes));
        handle
    }

    /// Bytes behind a live handle
    pub fn get(&self, handle: BlobHandle) -> Option<Arc<[u8]>> {
        self.blobs.get(&handle).cloned()
    }

    /// Release the bytes. Returns whether the handle was live.
    pub fn revoke(&mut self, handle: BlobHandle) -> bool {
        let removed = self.blobs.remove(&handle).is_some();
        if removed {
            debug!(handle = handle.0, "revoked blob");
        }
        removed
    }

    pub fn revoke_all(&mut self) {
        self.blobs.clear();
    }

    pub fn live_count(&self) -> usize {
        self.blobs.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_revoked_handle_never_resolves() {
        let mut registry = BlobRegistry::new();
        let a = registry.register(vec![1, 2, 3]);
        let b = registry.register(vec![4]);
        assert_ne!(a, b);
        assert_eq!(registry.get(a).as_deref(), Some(&[1u8, 2, 3][..]));

        assert!(registry.revoke(a));
        assert!(!registry.revoke(a));
        assert!(registry.get(a).is_none());
        assert_eq!(registry.live_count(), 1);

        // Handles are not reused
        let c = registry.register(vec![5]);
        assert_ne!(c, a);
    }
}
