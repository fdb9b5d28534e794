//! Callback delivery decoupled from the work context.
//!
//! Completed outcomes are handed to the caller as boxed callback units on a
//! delivery context of the caller's choosing. Units for one queue run in
//! scheduling order, so single-threaded callers observe completions
//! serially.

use tokio::sync::mpsc;

/// One scheduled callback: runs the caller's completion handler and the
/// paired activity-counter decrement.
pub type CallbackUnit = Box<dyn FnOnce() + Send + 'static>;

/// Handle to the execution context completed outcomes are delivered on.
#[derive(Clone)]
pub struct DeliveryQueue {
    tx: mpsc::UnboundedSender<CallbackUnit>,
}

impl DeliveryQueue {
    /// Spawns a dedicated tokio task that runs callback units in order.
    pub fn spawn() -> Self {
        let (queue, mut rx) = Self::channel();
        tokio::spawn(async move {
            while let Some(unit) = rx.recv().await {
                unit();
            }
        });
        queue
    }

    /// Pairs a queue with a receiver the caller pumps on its own execution
    /// context — the UI-thread analog.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<CallbackUnit>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub(crate) fn dispatch(&self, unit: CallbackUnit) {
        // A closed receiver means the caller stopped pumping; the unit is
        // dropped with it.
        let _ = self.tx.send(unit);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn units_arrive_in_dispatch_order() {
        let (queue, mut rx) = DeliveryQueue::channel();
        let (tx, mut results) = mpsc::unbounded_channel();

        for n in 0..3u32 {
            let tx = tx.clone();
            queue.dispatch(Box::new(move || {
                let _ = tx.send(n);
            }));
        }
        for _ in 0..3 {
            let unit = rx.recv().await.unwrap();
            unit();
        }

        assert_eq!(results.recv().await, Some(0));
        assert_eq!(results.recv().await, Some(1));
        assert_eq!(results.recv().await, Some(2));
    }
}
