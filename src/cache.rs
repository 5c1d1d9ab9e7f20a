use std::sync::Arc;

use parking_lot::RwLock;
use tracing::info;

use crate::traits::Segmenter;

/// Shared handle to the process' segmenter.
///
/// Cloning is cheap; all clones see the same slot. The slot is filled at most
/// once per `clear()`, either eagerly at startup or by the first request.
#[derive(Clone, Default)]
pub struct SegmenterCache {
    slot: Arc<RwLock<Option<Arc<dyn Segmenter>>>>,
}

impl SegmenterCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cache pre-seeded with `segmenter`, e.g. a stub in tests.
    pub fn with_segmenter(segmenter: Arc<dyn Segmenter>) -> Self {
        let cache = Self::new();
        *cache.slot.write() = Some(segmenter);
        cache
    }

    pub fn get(&self) -> Option<Arc<dyn Segmenter>> {
        self.slot.read().clone()
    }

    /// Returns the cached segmenter, running `init` if the slot is empty.
    pub fn get_or_init<F>(&self, init: F) -> Arc<dyn Segmenter>
    where
        F: FnOnce() -> Arc<dyn Segmenter>,
    {
        if let Some(segmenter) = self.get() {
            return segmenter;
        }

        let mut slot = self.slot.write();
        // another request may have won the race while we waited
        if let Some(segmenter) = slot.as_ref() {
            return Arc::clone(segmenter);
        }
        let segmenter = init();
        info!("Segmenter `{}` ready on {}", segmenter.name(), segmenter.device());
        *slot = Some(Arc::clone(&segmenter));
        segmenter
    }

    pub fn is_loaded(&self) -> bool {
        self.slot.read().is_some()
    }

    /// Drops the cached segmenter. In-flight requests keep their own reference.
    pub fn clear(&self) {
        if self.slot.write().take().is_some() {
            info!("Released cached segmenter");
        }
    }
}
