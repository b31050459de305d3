use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};

use crossbeam::channel::{bounded, Receiver, Sender};
use node_core_types::Seq;
use parking_lot::Mutex;

/// A completion closure, run exactly once with the outcome of the
/// sequence it was submitted against (§3 Pending Work Item, §4.1).
pub type Completion = Box<dyn FnOnce(i32) + Send>;

/// §Glossary "Work queue", §4.1. Completions are enrolled with
/// `submit`, resolved by `complete` (called from the processing
/// element's async-done callback, on any thread), and dispatched by
/// `drain`, which must only run on the main loop thread (§5).
///
/// `complete` posts across an internal channel and immediately drains
/// it, so calling it from the main loop thread observes the completion
/// synchronously, while calling it from another thread stays safe: the
/// actual dispatch still happens inside `drain`'s critical section.
pub struct WorkQueue {
    pending: Mutex<HashMap<Seq, Completion>>,
    completed: Mutex<HashSet<Seq>>,
    cancelled: AtomicBool,
    tx: Sender<(Seq, i32)>,
    rx: Receiver<(Seq, i32)>,
}

impl Default for WorkQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkQueue {
    pub fn new() -> Self {
        Self::with_capacity(1000)
    }

    /// Same as [`WorkQueue::new`] but with an explicit channel capacity
    /// (`NodeCoreConfig::channel_buffer_sz`).
    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, rx) = bounded(capacity);
        Self {
            pending: Mutex::new(HashMap::new()),
            completed: Mutex::new(HashSet::new()),
            cancelled: AtomicBool::new(false),
            tx,
            rx,
        }
    }

    /// Enrolls a completion for `seq`. When `immediate_result` is
    /// `Some`, this is a synchronous result: `completion` runs before
    /// `submit` returns. Otherwise the completion waits for a matching
    /// `complete` (§4.1).
    pub fn submit(&self, seq: Seq, immediate_result: Option<i32>, completion: Completion) {
        if let Some(result) = immediate_result {
            completion(result);
            return;
        }
        self.pending.lock().insert(seq, completion);
    }

    /// Invoked by the processing element's async-done callback; may run
    /// on any thread. Enqueues the result and drains immediately so a
    /// caller already on the main loop observes the dispatch
    /// synchronously (§4.1, §5).
    pub fn complete(&self, seq: Seq, result: i32) {
        let _ = self.tx.send((seq, result));
        self.drain();
    }

    /// Dispatches every completion whose `complete` has arrived. Must
    /// only be called from the main loop thread (§5 ordering
    /// guarantees).
    pub fn drain(&self) {
        while let Ok((seq, result)) = self.rx.try_recv() {
            let completion = self.pending.lock().remove(&seq);
            match completion {
                Some(completion) => {
                    self.completed.lock().insert(seq);
                    completion(result);
                }
                None if self.cancelled.load(Ordering::Acquire) => {
                    // Destroyed before this completion arrived: discard
                    // silently, never touch node state again (S6).
                }
                None if self.completed.lock().contains(&seq) => {
                    log::error!("work queue: double completion for sequence {seq}");
                }
                None => {
                    log::error!("work queue: completion for unknown sequence {seq}");
                }
            }
        }
    }

    /// Drops every pending completion without firing it (§4.1, §4.6
    /// step 7). Completions that arrive after this point are discarded
    /// by `drain` instead of erroring.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
        self.pending.lock().clear();
        while self.rx.try_recv().is_ok() {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicI32;
    use std::sync::Arc;

    #[test]
    fn immediate_result_runs_before_submit_returns() {
        let wq = WorkQueue::new();
        let fired = Arc::new(AtomicBool::new(false));
        let fired2 = fired.clone();
        wq.submit(
            1,
            Some(0),
            Box::new(move |_| fired2.store(true, Ordering::SeqCst)),
        );
        assert!(fired.load(Ordering::SeqCst));
    }

    #[test]
    fn async_completion_dispatches_exactly_once() {
        let wq = WorkQueue::new();
        let seen = Arc::new(AtomicI32::new(-1));
        let seen2 = seen.clone();
        wq.submit(
            7,
            None,
            Box::new(move |result| seen2.store(result, Ordering::SeqCst)),
        );
        assert_eq!(seen.load(Ordering::SeqCst), -1);
        wq.complete(7, 42);
        assert_eq!(seen.load(Ordering::SeqCst), 42);
    }

    #[test]
    fn cancel_discards_pending_without_firing() {
        let wq = WorkQueue::new();
        let fired = Arc::new(AtomicBool::new(false));
        let fired2 = fired.clone();
        wq.submit(3, None, Box::new(move |_| fired2.store(true, Ordering::SeqCst)));
        wq.cancel();
        wq.complete(3, 0);
        assert!(!fired.load(Ordering::SeqCst));
    }

    #[test]
    fn ordering_preserved_per_owner() {
        let wq = WorkQueue::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        for seq in 0..5 {
            let order = order.clone();
            wq.submit(seq, None, Box::new(move |_| order.lock().push(seq)));
        }
        for seq in 0..5 {
            wq.complete(seq, 0);
        }
        assert_eq!(*order.lock(), vec![0, 1, 2, 3, 4]);
    }
}
