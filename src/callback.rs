//! Query Callback Protocol
//!
//! TigerStyle: Exactly-once delivery of complete result snapshots.
//!
//! Every asynchronous operation takes a callback. The callback is an
//! `FnOnce`, moved into a [`ResultSink`] that consumes itself on delivery, so
//! it cannot run twice. Where it runs is decided by [`Delivery`]:
//!
//! - `Direct`: on the worker task that completed the I/O.
//! - `Queued`: pushed onto a [`CompletionQueue`] that the host drains on its
//!   own loop, for hosts that are not reentrant-safe.
//!
//! No ordering is implied between callbacks of different calls.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};

// =============================================================================
// Types
// =============================================================================

/// A result callback.
pub type Callback<T> = Box<dyn FnOnce(T) + Send + 'static>;

/// A callback bound to its result, ready to run.
pub struct Completion {
    op: &'static str,
    run: Box<dyn FnOnce() + Send + 'static>,
}

impl Completion {
    /// Operation that produced this completion.
    #[must_use]
    pub fn op(&self) -> &'static str {
        self.op
    }

    /// Run the callback.
    pub fn run(self) {
        (self.run)();
    }
}

impl std::fmt::Debug for Completion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Completion").field("op", &self.op).finish()
    }
}

/// Where callbacks run.
#[derive(Debug, Clone, Default)]
pub enum Delivery {
    /// Run on the worker task that completed the operation.
    #[default]
    Direct,
    /// Hand to the host's completion queue.
    Queued(mpsc::UnboundedSender<Completion>),
}

// =============================================================================
// Completion Queue
// =============================================================================

/// Host-side queue of completed operations.
#[derive(Debug)]
pub struct CompletionQueue {
    tx: mpsc::UnboundedSender<Completion>,
    rx: mpsc::UnboundedReceiver<Completion>,
}

impl Default for CompletionQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl CompletionQueue {
    /// Create an empty queue.
    #[must_use]
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self { tx, rx }
    }

    /// Delivery mode that routes callbacks into this queue.
    #[must_use]
    pub fn delivery(&self) -> Delivery {
        Delivery::Queued(self.tx.clone())
    }

    /// Run every completion that is ready, without waiting.
    ///
    /// Returns how many callbacks ran.
    pub fn run_pending(&mut self) -> usize {
        let mut count = 0;
        while let Ok(completion) = self.rx.try_recv() {
            completion.run();
            count += 1;
        }
        count
    }

    /// Wait for the next completion and run it.
    pub async fn run_next(&mut self) -> Option<&'static str> {
        // Our own sender keeps the channel open, so this only waits
        let completion = self.rx.recv().await?;
        let op = completion.op();
        completion.run();
        Some(op)
    }
}

// =============================================================================
// Result Sink
// =============================================================================

/// Holds one callback until its result is ready.
pub(crate) struct ResultSink<T: Send + 'static> {
    op: &'static str,
    callback: Option<Callback<T>>,
    delivery: Delivery,
    closed: Arc<AtomicBool>,
}

impl<T: Send + 'static> ResultSink<T> {
    pub(crate) fn new(
        op: &'static str,
        callback: Callback<T>,
        delivery: Delivery,
        closed: Arc<AtomicBool>,
    ) -> Self {
        Self {
            op,
            callback: Some(callback),
            delivery,
            closed,
        }
    }

    /// Deliver the complete result. Consumes the sink.
    pub(crate) fn deliver(mut self, value: T) {
        let Some(callback) = self.callback.take() else {
            return;
        };

        if self.closed.load(Ordering::SeqCst) {
            tracing::debug!(op = self.op, "store closed, dropping late result");
            return;
        }

        match &self.delivery {
            Delivery::Direct => callback(value),
            Delivery::Queued(tx) => {
                let completion = Completion {
                    op: self.op,
                    run: Box::new(move || callback(value)),
                };
                if tx.send(completion).is_err() {
                    tracing::debug!(op = self.op, "completion queue gone, dropping result");
                }
            }
        }
    }
}

impl<T: Send + 'static> ResultSink<T> {
    /// Drop the callback without running it.
    pub(crate) fn discard(mut self) {
        if self.callback.take().is_some() {
            tracing::debug!(op = self.op, "operation rejected, dropping callback");
        }
    }
}

impl<T: Send + 'static> Drop for ResultSink<T> {
    fn drop(&mut self) {
        if self.callback.is_none() {
            return;
        }
        // Rejected or abandoned around close: dropping the callback is expected
        if self.closed.load(Ordering::SeqCst) {
            tracing::debug!(op = self.op, "store closed, dropping callback");
        } else {
            tracing::warn!(op = self.op, "operation ended without delivering a result");
        }
    }
}

/// A callback paired with a receiver, for callers that would rather await.
pub fn channel<T: Send + 'static>() -> (Callback<T>, oneshot::Receiver<T>) {
    let (tx, rx) = oneshot::channel();
    let callback: Callback<T> = Box::new(move |value| {
        let _ = tx.send(value);
    });
    (callback, rx)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn open_gate() -> Arc<AtomicBool> {
        Arc::new(AtomicBool::new(false))
    }

    #[test]
    fn test_direct_runs_immediately() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        let sink = ResultSink::new(
            "load",
            Box::new(move |v: u32| seen_clone.lock().unwrap().push(v)),
            Delivery::Direct,
            open_gate(),
        );

        sink.deliver(7);

        assert_eq!(*seen.lock().unwrap(), vec![7]);
    }

    #[test]
    fn test_queued_waits_for_host() {
        let mut queue = CompletionQueue::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        let sink = ResultSink::new(
            "load",
            Box::new(move |v: u32| seen_clone.lock().unwrap().push(v)),
            queue.delivery(),
            open_gate(),
        );

        sink.deliver(3);
        assert!(seen.lock().unwrap().is_empty());

        assert_eq!(queue.run_pending(), 1);
        assert_eq!(*seen.lock().unwrap(), vec![3]);
        assert_eq!(queue.run_pending(), 0);
    }

    #[test]
    fn test_closed_gate_drops_result() {
        let gate = open_gate();
        let fired = Arc::new(AtomicBool::new(false));
        let fired_clone = fired.clone();
        let sink = ResultSink::new(
            "load",
            Box::new(move |_: u32| fired_clone.store(true, Ordering::SeqCst)),
            Delivery::Direct,
            gate.clone(),
        );

        gate.store(true, Ordering::SeqCst);
        sink.deliver(1);

        assert!(!fired.load(Ordering::SeqCst));
    }

    #[test]
    fn test_discard_never_runs_callback() {
        let fired = Arc::new(AtomicBool::new(false));
        let fired_clone = fired.clone();
        let sink = ResultSink::new(
            "load",
            Box::new(move |_: u32| fired_clone.store(true, Ordering::SeqCst)),
            Delivery::Direct,
            open_gate(),
        );

        sink.discard();

        assert!(!fired.load(Ordering::SeqCst));
    }

    #[test]
    fn test_dropped_queue_does_not_panic() {
        let queue = CompletionQueue::new();
        let delivery = queue.delivery();
        drop(queue);

        let sink = ResultSink::new("load", Box::new(|_: u32| {}), delivery, open_gate());
        sink.deliver(1);
    }

    #[tokio::test]
    async fn test_channel_callback() {
        let (callback, rx) = channel::<Vec<String>>();
        callback(vec!["rex".to_string()]);
        assert_eq!(rx.await.unwrap(), vec!["rex".to_string()]);
    }
}
