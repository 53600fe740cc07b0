//! Space generations.
//!
//! Background work captures a `SpaceGuard` when it starts. Once the
//! space is closed or switched the guard goes stale and the work's
//! results are thrown away instead of landing in the wrong space.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Counter bumped every time a space is opened or closed.
#[derive(Debug, Clone, Default)]
pub struct SpaceGeneration {
    current: Arc<AtomicU64>,
}

impl SpaceGeneration {
    pub fn new() -> Self {
        Self::default()
    }

    /// Invalidates every guard handed out so far.
    pub fn advance(&self) -> u64 {
        self.current.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn guard(&self) -> SpaceGuard {
        SpaceGuard {
            current: Arc::clone(&self.current),
            generation: self.current.load(Ordering::SeqCst),
        }
    }
}

/// Snapshot of the generation a piece of work belongs to.
#[derive(Debug, Clone)]
pub struct SpaceGuard {
    current: Arc<AtomicU64>,
    generation: u64,
}

impl SpaceGuard {
    pub fn is_current(&self) -> bool {
        self.current.load(Ordering::SeqCst) == self.generation
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guard_goes_stale() {
        let generation = SpaceGeneration::new();
        let guard = generation.guard();
        assert!(guard.is_current());
        generation.advance();
        assert!(!guard.is_current());
        assert!(generation.guard().is_current());
    }
}
