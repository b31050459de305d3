use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use node_core_types::{Direction, PortId};

use crate::state::NodeState;

static NEXT_OBSERVER_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

#[derive(Debug, Clone, Copy)]
pub struct PortArgs {
    pub port_id: PortId,
    pub direction: Direction,
}

#[derive(Debug, Clone, Copy)]
pub struct StateRequestArgs {
    pub target: NodeState,
}

#[derive(Debug, Clone, Copy)]
pub struct StateChangedArgs {
    pub old: NodeState,
    pub new: NodeState,
}

#[derive(Debug, Clone, Copy)]
pub struct AsyncCompleteArgs {
    pub seq: u64,
    pub result: i32,
}

type Handler<Args> = Arc<dyn Fn(&Args) + Send + Sync>;

/// One named signal (§C7 Observer Surface, §4.5). Connected handlers
/// are stored under a lock but `emit` takes a snapshot clone before
/// calling any of them, so a handler that disconnects itself or
/// another handler mid-emission never deadlocks or skips a sibling.
pub struct Signal<Args> {
    handlers: Mutex<Vec<(ObserverId, Handler<Args>)>>,
}

impl<Args> Default for Signal<Args> {
    fn default() -> Self {
        Self {
            handlers: Mutex::new(Vec::new()),
        }
    }
}

impl<Args> Signal<Args> {
    pub fn connect<F>(&self, handler: F) -> ObserverId
    where
        F: Fn(&Args) + Send + Sync + 'static,
    {
        let id = ObserverId(NEXT_OBSERVER_ID.fetch_add(1, Ordering::Relaxed));
        self.handlers.lock().push((id, Arc::new(handler)));
        id
    }

    pub fn disconnect(&self, id: ObserverId) {
        self.handlers.lock().retain(|(hid, _)| *hid != id);
    }

    pub fn emit(&self, args: &Args) {
        let snapshot: Vec<Handler<Args>> = self
            .handlers
            .lock()
            .iter()
            .map(|(_, h)| h.clone())
            .collect();
        for handler in snapshot {
            handler(args);
        }
    }

    pub fn clear(&self) {
        self.handlers.lock().clear();
    }
}

/// The eight signals a node exposes (§4.5, §6). `initialized`,
/// `destroy` and `free` carry no data beyond "it happened".
#[derive(Default)]
pub struct Observers {
    pub port_added: Signal<PortArgs>,
    pub port_removed: Signal<PortArgs>,
    pub state_request: Signal<StateRequestArgs>,
    pub state_changed: Signal<StateChangedArgs>,
    pub initialized: Signal<()>,
    pub async_complete: Signal<AsyncCompleteArgs>,
    pub destroy: Signal<()>,
    pub free: Signal<()>,
}

impl Observers {
    /// §4.6 step 3: drop every connected handler before the node's
    /// fields are torn down, so no later step can reach a dangling
    /// observer.
    pub fn clear_all(&self) {
        self.port_added.clear();
        self.port_removed.clear();
        self.state_request.clear();
        self.state_changed.clear();
        self.initialized.clear();
        self.async_complete.clear();
        self.destroy.clear();
        self.free.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize};

    #[test]
    fn emit_calls_every_connected_handler() {
        let signal: Signal<()> = Signal::default();
        let count = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let count = count.clone();
            signal.connect(move |_| {
                count.fetch_add(1, Ordering::SeqCst);
            });
        }
        signal.emit(&());
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn disconnect_stops_future_emissions() {
        let signal: Signal<()> = Signal::default();
        let count = Arc::new(AtomicUsize::new(0));
        let count2 = count.clone();
        let id = signal.connect(move |_| {
            count2.fetch_add(1, Ordering::SeqCst);
        });
        signal.disconnect(id);
        signal.emit(&());
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn handler_may_disconnect_itself_during_emission() {
        let signal: Arc<Signal<()>> = Arc::new(Signal::default());
        let count = Arc::new(AtomicUsize::new(0));
        let signal2 = signal.clone();
        let count2 = count.clone();
        let id_cell: Arc<Mutex<Option<ObserverId>>> = Arc::new(Mutex::new(None));
        let id_cell2 = id_cell.clone();
        let id = signal.connect(move |_| {
            count2.fetch_add(1, Ordering::SeqCst);
            if let Some(id) = *id_cell2.lock() {
                signal2.disconnect(id);
            }
        });
        *id_cell.lock() = Some(id);

        signal.emit(&());
        signal.emit(&());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn clear_all_drops_every_signal() {
        let observers = Observers::default();
        observers.initialized.connect(|_| {});
        observers.destroy.connect(|_| {});
        observers.clear_all();
        let fired = Arc::new(AtomicBool::new(false));
        let fired2 = fired.clone();
        observers.initialized.connect(move |_| {
            fired2.store(true, Ordering::SeqCst);
        });
        observers.initialized.emit(&());
        assert!(fired.load(Ordering::SeqCst));
    }
}
