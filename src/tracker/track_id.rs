use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic source of track identities.
///
/// Each session owns one by default. Clones share the underlying counter, so
/// handing the same counter to several sessions gives identities that are
/// unique across all of them.
#[derive(Debug, Clone, Default)]
pub struct TrackIdCounter {
    last: Arc<AtomicU64>,
}

impl TrackIdCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume the next identity. The first identity is 1.
    pub fn next_id(&self) -> u64 {
        self.last.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Last identity handed out, 0 if none.
    pub fn current(&self) -> u64 {
        self.last.load(Ordering::SeqCst)
    }

    /// Start over from 1; only meaningful between independent runs.
    pub fn reset(&self) {
        self.last.store(0, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_id_is_strictly_increasing() {
        let counter = TrackIdCounter::new();
        let id1 = counter.next_id();
        let id2 = counter.next_id();
        assert_eq!(id1, 1);
        assert!(id2 > id1);
        assert_eq!(counter.current(), 2);
    }

    #[test]
    fn test_reset_restarts_at_one() {
        let counter = TrackIdCounter::new();
        counter.next_id();
        counter.reset();
        assert_eq!(counter.next_id(), 1);
    }

    #[test]
    fn test_clones_share_state() {
        let a = TrackIdCounter::new();
        let b = a.clone();
        assert_eq!(a.next_id(), 1);
        assert_eq!(b.next_id(), 2);
        assert_eq!(TrackIdCounter::new().next_id(), 1);
    }
}
