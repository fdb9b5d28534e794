//! Active-request accounting driving an external busy indicator.
//!
//! One counter per engine, injectable for tests. All mutation funnels
//! through a single lock so concurrently finishing requests cannot lose
//! updates, and the sink fires under that lock so zero-edge toggles stay
//! ordered.

use std::sync::Arc;

use parking_lot::Mutex;

/// Boolean sink toggled whenever the active count transitions to or from
/// zero.
pub trait ActivitySink: Send + Sync {
    fn set_active(&self, active: bool);
}

pub struct ActivityCounter {
    count: Mutex<u64>,
    sink: Option<Arc<dyn ActivitySink>>,
}

impl ActivityCounter {
    pub fn new(sink: Option<Arc<dyn ActivitySink>>) -> Self {
        Self { count: Mutex::new(0), sink }
    }

    pub fn count(&self) -> u64 {
        *self.count.lock()
    }

    pub(crate) fn increment(&self) {
        let mut count = self.count.lock();
        *count += 1;
        if *count == 1 {
            if let Some(sink) = &self.sink {
                sink.set_active(true);
            }
        }
    }

    pub(crate) fn decrement(&self) {
        let mut count = self.count.lock();
        debug_assert!(*count > 0, "active-request counter underflow");
        if *count == 0 {
            return;
        }
        *count -= 1;
        if *count == 0 {
            if let Some(sink) = &self.sink {
                sink.set_active(false);
            }
        }
    }
}
