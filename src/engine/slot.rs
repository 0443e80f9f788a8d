//! Production slot accounting.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Counter of root jobs queued or in flight.
#[derive(Debug, Clone, Default)]
pub struct ActiveRoots(Arc<AtomicUsize>);

impl ActiveRoots {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }

    /// Reserve one slot for a root job about to be queued.
    pub(crate) fn reserve(&self) -> ActiveSlot {
        self.0.fetch_add(1, Ordering::SeqCst);
        ActiveSlot {
            counter: Some(Arc::clone(&self.0)),
        }
    }
}

/// One reserved production slot. Released exactly once, explicitly or on drop.
#[derive(Debug)]
pub struct ActiveSlot {
    counter: Option<Arc<AtomicUsize>>,
}

impl ActiveSlot {
    pub fn release(mut self) {
        self.release_inner();
    }

    fn release_inner(&mut self) {
        if let Some(counter) = self.counter.take() {
            counter.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

impl Drop for ActiveSlot {
    fn drop(&mut self) {
        self.release_inner();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_releases_once() {
        let roots = ActiveRoots::new();
        let a = roots.reserve();
        let b = roots.reserve();
        assert_eq!(roots.get(), 2);
        a.release();
        assert_eq!(roots.get(), 1);
        drop(b);
        assert_eq!(roots.get(), 0);
    }
}
