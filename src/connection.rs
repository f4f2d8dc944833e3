use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Counts client connections that are still being served
#[derive(Clone, Debug, Default)]
pub struct ConnectionTracker {
    active: Arc<AtomicUsize>,
}

impl ConnectionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection; it stays counted until the guard is dropped
    pub fn track(&self) -> ConnectionGuard {
        self.active.fetch_add(1, Ordering::Relaxed);
        ConnectionGuard {
            active: Arc::clone(&self.active),
        }
    }

    /// Get the current active connection count
    pub fn active_count(&self) -> usize {
        self.active.load(Ordering::Relaxed)
    }
}

/// RAII guard to ensure the connection count is properly decremented
#[derive(Debug)]
pub struct ConnectionGuard {
    active: Arc<AtomicUsize>,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_guard() {
        let tracker = ConnectionTracker::new();
        assert_eq!(tracker.active_count(), 0);

        {
            let _first = tracker.track();
            let _second = tracker.track();
            assert_eq!(tracker.active_count(), 2);
        }

        // Guards decrement on drop
        assert_eq!(tracker.active_count(), 0);
    }

    #[test]
    fn test_trackers_count_independently() {
        let tracker = ConnectionTracker::new();
        let other = ConnectionTracker::new();
        let shared = tracker.clone();

        let _guard = tracker.track();
        assert_eq!(shared.active_count(), 1);
        assert_eq!(other.active_count(), 0);
    }

    #[tokio::test]
    async fn test_guard_moved_into_task() {
        let tracker = ConnectionTracker::new();
        let guard = tracker.track();

        let handle = tokio::spawn(async move {
            let _guard = guard;
        });
        handle.await.unwrap();

        assert_eq!(tracker.active_count(), 0);
    }
}
