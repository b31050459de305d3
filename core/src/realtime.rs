use crossbeam::channel::{bounded, Receiver, Sender};

use node_core_types::ExecutionError;

/// Identity of a node's slot in the real-time scheduling graph (§3,
/// §Glossary "Vertex"). Opaque beyond equality — the scheduler is the
/// only thing that interprets it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VertexHandle(pub u64);

/// The real-time scheduler this core drives through `need_input`/
/// `have_output` (§4.5, §6 Non-goals: the scheduling algorithm itself
/// is out of scope, only this edge of it).
pub trait Scheduler: Send + Sync {
    fn add_vertex(&self) -> VertexHandle;
    fn remove_vertex(&self, vertex: VertexHandle);
    fn pull(&self, vertex: VertexHandle);
    fn push(&self, vertex: VertexHandle);
    /// Runs one scheduling pass; returns `true` if it produced forward
    /// progress a subsequent pass might build on.
    fn iterate(&self, vertex: VertexHandle) -> bool;
}

/// §4.5: after a real-time callback asks for more work, drive the
/// scheduler until it reports no further progress rather than stopping
/// after a single pass.
pub fn iterate_to_quiescence(scheduler: &dyn Scheduler, vertex: VertexHandle) {
    while scheduler.iterate(vertex) {}
}

type Task = Box<dyn FnOnce() + Send>;

/// The main-loop side of the synchronous cross-thread invoke primitive
/// (§5 "dispatches on the main loop thread only"). Any thread can call
/// `invoke`; the call blocks until [`RtLoopHandle::service_one`] (or
/// `service_all`) has run the task on the loop thread.
pub struct RtLoop {
    tx: Sender<(Task, Sender<()>)>,
}

/// The loop-thread side: owns the receiving end and actually executes
/// queued tasks.
pub struct RtLoopHandle {
    rx: Receiver<(Task, Sender<()>)>,
}

/// Builds a paired loop: one side submits work, the other services it.
/// Reduced to the one piece this core needs: synchronous, ordered,
/// same-process invocation onto whichever thread services the loop.
pub fn new_rt_loop() -> (RtLoop, RtLoopHandle) {
    new_rt_loop_with_capacity(64)
}

/// Same as [`new_rt_loop`] but with an explicit channel capacity
/// (`NodeCoreConfig::channel_buffer_sz`).
pub fn new_rt_loop_with_capacity(capacity: usize) -> (RtLoop, RtLoopHandle) {
    let (tx, rx) = bounded(capacity);
    (RtLoop { tx }, RtLoopHandle { rx })
}

impl RtLoop {
    /// Submits `task` to the loop thread and blocks until it has run.
    /// Returns `RtInvokeFailed` if the loop thread is gone.
    pub fn invoke<F>(&self, task: F) -> Result<(), ExecutionError>
    where
        F: FnOnce() + Send + 'static,
    {
        let (done_tx, done_rx) = bounded(1);
        self.tx
            .send((Box::new(task), done_tx))
            .map_err(|_| ExecutionError::RtInvokeFailed("loop thread is gone".into()))?;
        done_rx
            .recv()
            .map_err(|_| ExecutionError::RtInvokeFailed("loop thread dropped without replying".into()))
    }
}

impl RtLoopHandle {
    /// Services exactly one queued invocation, if any is waiting.
    /// Returns `true` if it ran one.
    pub fn service_one(&self) -> bool {
        match self.rx.try_recv() {
            Ok((task, done_tx)) => {
                task();
                let _ = done_tx.send(());
                true
            }
            Err(_) => false,
        }
    }

    /// Services every invocation currently queued.
    pub fn service_all(&self) {
        while self.service_one() {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingScheduler {
        remaining: AtomicUsize,
    }

    impl Scheduler for CountingScheduler {
        fn add_vertex(&self) -> VertexHandle {
            VertexHandle(0)
        }
        fn remove_vertex(&self, _: VertexHandle) {}
        fn pull(&self, _: VertexHandle) {}
        fn push(&self, _: VertexHandle) {}
        fn iterate(&self, _: VertexHandle) -> bool {
            let prev = self.remaining.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| {
                if v == 0 {
                    None
                } else {
                    Some(v - 1)
                }
            });
            prev.is_ok()
        }
    }

    #[test]
    fn iterate_to_quiescence_stops_when_scheduler_reports_no_progress() {
        let scheduler = CountingScheduler {
            remaining: AtomicUsize::new(3),
        };
        iterate_to_quiescence(&scheduler, VertexHandle(0));
        assert_eq!(scheduler.remaining.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn invoke_runs_on_the_servicing_thread_and_blocks_the_caller() {
        let (rt_loop, handle) = new_rt_loop();
        let rt_loop = Arc::new(rt_loop);
        let ran = Arc::new(AtomicUsize::new(0));

        let rt_loop2 = rt_loop.clone();
        let ran2 = ran.clone();
        let caller = std::thread::spawn(move || {
            rt_loop2.invoke(move || {
                ran2.fetch_add(1, Ordering::SeqCst);
            })
        });

        // Give the invoking thread a chance to enqueue before servicing.
        while !handle.service_one() {
            std::thread::yield_now();
        }

        caller.join().unwrap().unwrap();
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn invoke_fails_once_the_servicing_side_is_dropped() {
        let (rt_loop, handle) = new_rt_loop();
        drop(handle);
        let err = rt_loop.invoke(|| {}).unwrap_err();
        assert!(matches!(err, ExecutionError::RtInvokeFailed(_)));
    }
}
