use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use node_core_types::{Direction, ExecutionError, NodeId, PortId, Seq};

use crate::clock::ClockSource;
use crate::command::CommandChannel;
use crate::config::NodeCoreConfig;
use crate::element::{CommandResult, NodeCallbacks, ProcessingElement};
use crate::info::{change_bit, NodeInfo};
use crate::observer::{
    AsyncCompleteArgs, Observers, PortArgs, StateChangedArgs, StateRequestArgs,
};
use crate::port::{PerDirectionPorts, PortEvent};
use crate::realtime::{iterate_to_quiescence, RtLoop, Scheduler, VertexHandle};
use crate::state::{validate_request, NodeState};
use crate::work_queue::WorkQueue;

/// External node container this core notifies at the two points
/// spec.md §4.6 calls out (registration on construction, removal on
/// destroy) without itself modeling a graph or a wire protocol (§1
/// Non-goals).
pub trait NodeRegistry: Send + Sync {
    fn register(&self, id: NodeId, name: &str);
    fn unregister(&self, id: NodeId);
}

struct StateInner {
    current: NodeState,
    error: Option<String>,
}

/// The aggregate root (§3 Data model). Every field lives behind its
/// own lock (or atomic) rather than one big lock, matching the
/// teacher's per-concern-mutex style and letting real-time callbacks
/// touch `ports`/`vertex` without contending with main-loop-only state
/// like `info` or `observers`.
pub struct Node {
    name: String,
    id: Mutex<Option<NodeId>>,
    element: Arc<dyn ProcessingElement>,
    clock: Mutex<Option<Arc<dyn ClockSource>>>,
    live: AtomicBool,
    properties: Mutex<HashMap<String, String>>,
    ports: Mutex<PerDirectionPorts>,
    state: Mutex<StateInner>,
    info: Mutex<NodeInfo>,
    vertex: Mutex<Option<VertexHandle>>,
    scheduler: Arc<dyn Scheduler>,
    rt_loop: RtLoop,
    work_queue: Arc<WorkQueue>,
    command_channel: CommandChannel,
    pub observers: Observers,
    pub(crate) destroyed: AtomicBool,
    pub(crate) initialized: AtomicBool,
    registry: Option<Arc<dyn NodeRegistry>>,
}

impl Node {
    pub(crate) fn new(
        name: String,
        element: Arc<dyn ProcessingElement>,
        scheduler: Arc<dyn Scheduler>,
        rt_loop: RtLoop,
        registry: Option<Arc<dyn NodeRegistry>>,
        properties: HashMap<String, String>,
        config: NodeCoreConfig,
    ) -> Self {
        let work_queue = Arc::new(WorkQueue::with_capacity(config.channel_buffer_sz));
        let command_channel = CommandChannel::new(element.clone());
        let info = NodeInfo {
            name: name.clone(),
            properties: properties.clone(),
            ..NodeInfo::default()
        };
        Self {
            name,
            id: Mutex::new(None),
            element,
            clock: Mutex::new(None),
            live: AtomicBool::new(false),
            properties: Mutex::new(properties),
            ports: Mutex::new(PerDirectionPorts::with_max_ports(
                config.default_max_input_ports,
                config.default_max_output_ports,
            )),
            state: Mutex::new(StateInner {
                current: NodeState::Creating,
                error: None,
            }),
            info: Mutex::new(info),
            vertex: Mutex::new(None),
            scheduler,
            rt_loop,
            work_queue,
            command_channel,
            observers: Observers::default(),
            destroyed: AtomicBool::new(false),
            initialized: AtomicBool::new(false),
            registry,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn id(&self) -> Option<NodeId> {
        *self.id.lock()
    }

    pub(crate) fn set_id(&self, id: NodeId) {
        *self.id.lock() = Some(id);
        self.info.lock().id = Some(id);
    }

    pub fn current_state(&self) -> NodeState {
        self.state.lock().current
    }

    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::Acquire)
    }

    /// §9 third open question: liveness is a plain, independently
    /// settable flag, not derived from whether a clock is attached.
    pub fn set_live(&self, live: bool) {
        self.live.store(live, Ordering::Release);
    }

    pub fn set_clock(&self, clock: Option<Arc<dyn ClockSource>>) {
        *self.clock.lock() = clock;
    }

    pub fn set_property(&self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        self.properties.lock().insert(key.clone(), value.clone());
        let mut info = self.info.lock();
        info.properties.insert(key, value);
        info.change_mask |= change_bit::PROPS;
    }

    pub fn info(&self) -> NodeInfo {
        self.info.lock().clone()
    }

    pub(crate) fn work_queue(&self) -> &Arc<WorkQueue> {
        &self.work_queue
    }

    /// Schedules `task` to run on whichever thread services this
    /// node's [`crate::realtime::RtLoopHandle`] and blocks the caller
    /// until it has (§5, §C5). The real-time callbacks themselves never
    /// go through this path — only external callers that need to touch
    /// the node from outside the loop thread do.
    pub fn invoke_on_loop<F>(&self, task: F) -> Result<(), ExecutionError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.rt_loop.invoke(task)
    }

    pub(crate) fn element(&self) -> &Arc<dyn ProcessingElement> {
        &self.element
    }

    /// §4.6 construction step 5 (async branch): asks the processing
    /// element to begin its own init sequence, returning whatever
    /// marker it reports. A `Sync` result means the element had nothing
    /// to wait on; an `Async` one resolves later through
    /// [`NodeRtCallbacks::done`] like any other command.
    pub(crate) fn begin_init(&self) -> CommandResult {
        self.command_channel.init()
    }

    pub(crate) fn registry(&self) -> Option<&Arc<dyn NodeRegistry>> {
        self.registry.as_ref()
    }

    fn collect_authority_ids(&self, direction: Direction) -> (usize, Vec<PortId>) {
        let counts = self.element.get_n_ports();
        let mut in_ids = Vec::new();
        let mut out_ids = Vec::new();
        self.element
            .get_port_ids(counts.max_in, &mut in_ids, counts.max_out, &mut out_ids);
        match direction {
            Direction::Input => (counts.max_in as usize, in_ids),
            Direction::Output => (counts.max_out as usize, out_ids),
        }
    }

    /// Re-reads the processing element's port list and applies the
    /// diff (§4.2). Used both at init-complete (suppressed) and on
    /// every later renegotiation notice (not suppressed).
    pub fn reconcile_ports(
        &self,
        direction: Direction,
        suppress_events: bool,
    ) -> Result<Vec<PortEvent>, ExecutionError> {
        let (max_ports, authority_ids) = self.collect_authority_ids(direction);
        let (events, n_ports) = {
            let mut ports = self.ports.lock();
            let events = ports.get_mut(direction).reconcile(
                self.element.as_ref(),
                &authority_ids,
                max_ports,
                suppress_events,
            )?;
            (events, ports.get(direction).n_ports())
        };

        for event in &events {
            match *event {
                PortEvent::Added(port_id) => {
                    self.observers.port_added.emit(&PortArgs { port_id, direction })
                }
                PortEvent::Removed(port_id) => self
                    .observers
                    .port_removed
                    .emit(&PortArgs { port_id, direction }),
            }
        }

        let mut info = self.info.lock();
        info.change_mask |= match direction {
            Direction::Input => change_bit::N_INPUT_PORTS,
            Direction::Output => change_bit::N_OUTPUT_PORTS,
        };
        match direction {
            Direction::Input => {
                info.n_input_ports = n_ports as u32;
                info.max_input_ports = max_ports as u32;
            }
            Direction::Output => {
                info.n_output_ports = n_ports as u32;
                info.max_output_ports = max_ports as u32;
            }
        }
        Ok(events)
    }

    /// §4.6 init-complete step 5: enumerate port 0's formats in each
    /// direction until the element signals end, and copy them into the
    /// published info block.
    pub(crate) fn refresh_formats(&self) {
        let enumerate = |direction: Direction| -> Vec<crate::element::PortFormat> {
            let mut formats = Vec::new();
            let mut index = 0u32;
            while let Some(format) = self.element.port_enum_formats(direction, 0, index) {
                formats.push(format);
                index += 1;
            }
            formats
        };
        let input_formats = enumerate(Direction::Input);
        let output_formats = enumerate(Direction::Output);

        let mut info = self.info.lock();
        info.input_formats = input_formats;
        info.output_formats = output_formats;
        info.change_mask |= change_bit::FORMATS;
    }

    pub fn get_free_port(&self, direction: Direction) -> Result<PortId, ExecutionError> {
        let mut ports = self.ports.lock();
        ports.get_mut(direction).get_free_port(self.element.as_ref())
    }

    pub fn port_ids(&self, direction: Direction) -> Vec<PortId> {
        self.ports
            .lock()
            .get(direction)
            .ports()
            .iter()
            .map(|p| p.id)
            .collect()
    }

    /// Test/diagnostic hook: marks a port as linked (or unlinked),
    /// since link establishment itself is out of scope for this core
    /// (§1) but `get_free_port`'s reuse rules depend on it.
    pub fn set_port_link(&self, direction: Direction, id: PortId, link: Option<crate::port::LinkId>) {
        let mut ports = self.ports.lock();
        if let Some(port) = ports.get_mut(direction).ports_mut().iter_mut().find(|p| p.id == id) {
            match link {
                Some(link) => port.links.push(link),
                None => port.links.clear(),
            }
        }
    }

    /// Test/diagnostic hook mirroring [`Node::set_port_link`]: marks a
    /// port as able to accept more than one link (§4.2 saturated-input
    /// reuse rule, §8 S5).
    pub fn set_port_multiplex(&self, direction: Direction, id: PortId, multiplex: bool) {
        let mut ports = self.ports.lock();
        if let Some(port) = ports.get_mut(direction).ports_mut().iter_mut().find(|p| p.id == id) {
            port.multiplex = multiplex;
        }
    }

    pub(crate) fn vertex(&self) -> Option<VertexHandle> {
        *self.vertex.lock()
    }

    pub(crate) fn set_vertex(&self, vertex: Option<VertexHandle>) {
        *self.vertex.lock() = vertex;
    }

    /// §4.4 entry point: validates, emits the request signal, then
    /// drives whichever command the transition implies — every
    /// transition in the table runs its command unconditionally, even a
    /// same-state request (only `Idle`→`Idle` is a documented no-op,
    /// handled inside `do_pause`); `complete_state_change`'s `old != new`
    /// check is what suppresses a duplicate `state-changed` for the
    /// others. A command that completes synchronously finishes the
    /// transition immediately; an async one is latched on the work
    /// queue and finishes later from [`NodeRtCallbacks::done`].
    pub fn request_state(self: &Arc<Self>, target: NodeState) -> Result<(), ExecutionError> {
        validate_request(target)?;
        self.observers.state_request.emit(&StateRequestArgs { target });

        match target {
            NodeState::Suspended => self.do_suspend(),
            NodeState::Idle => self.do_pause(self.state.lock().current),
            NodeState::Running => self.do_activate_and_start(),
            NodeState::Error => {
                self.complete_state_change(NodeState::Error, -1);
                Ok(())
            }
            NodeState::Creating => unreachable!("rejected by validate_request"),
        }
    }

    fn do_suspend(self: &Arc<Self>) -> Result<(), ExecutionError> {
        let result = {
            let mut ports = self.ports.lock();
            crate::command::CommandChannel::suspend(&mut ports)
        };
        self.dispatch_result(NodeState::Suspended, result);
        Ok(())
    }

    fn do_pause(self: &Arc<Self>, current: NodeState) -> Result<(), ExecutionError> {
        if current.pause_is_noop() {
            self.complete_state_change(NodeState::Idle, 0);
            return Ok(());
        }
        let result = self.command_channel.pause();
        self.dispatch_result(NodeState::Idle, result);
        Ok(())
    }

    fn do_activate_and_start(self: &Arc<Self>) -> Result<(), ExecutionError> {
        let clock = self.clock.lock().clone();
        let live = self.is_live();
        let _ = self
            .command_channel
            .clock_update(clock.as_deref(), live);
        let result = self.command_channel.start();
        self.dispatch_result(NodeState::Running, result);
        Ok(())
    }

    fn dispatch_result(self: &Arc<Self>, target: NodeState, result: CommandResult) {
        match result {
            CommandResult::Sync(code) => self.complete_state_change(target, code),
            CommandResult::Async(seq) => self.latch_completion(seq, target),
        }
    }

    fn latch_completion(self: &Arc<Self>, seq: Seq, target: NodeState) {
        let weak: Weak<Node> = Arc::downgrade(self);
        self.work_queue.submit(
            seq,
            None,
            Box::new(move |result| {
                if let Some(node) = weak.upgrade() {
                    node.complete_state_change(target, result);
                }
            }),
        );
    }

    /// §4.4: a negative result always lands the node in `Error` with a
    /// formatted message regardless of what was requested; otherwise
    /// the requested target is reached.
    fn complete_state_change(&self, target: NodeState, result: i32) {
        let (old, new, error) = {
            let mut state = self.state.lock();
            let old = state.current;
            if result < 0 {
                state.current = NodeState::Error;
                state.error = Some(format!("error changing node state: {result}"));
            } else {
                state.current = target;
                state.error = None;
            }
            (old, state.current, state.error.clone())
        };
        if old != new {
            self.observers
                .state_changed
                .emit(&StateChangedArgs { old, new });
        }
        let mut info = self.info.lock();
        info.state = new;
        info.error = error;
        info.change_mask |= change_bit::STATE;
    }

    pub fn last_error(&self) -> Option<String> {
        self.state.lock().error.clone()
    }

    pub(crate) fn scheduler_ref(&self) -> &Arc<dyn Scheduler> {
        &self.scheduler
    }

    /// §4.6 destroy step 4: pause the element on the way down, fire and
    /// forget. Teardown proceeds regardless of the result — there is no
    /// state transition left to fail.
    pub(crate) fn best_effort_pause(&self) {
        if let CommandResult::Sync(result) = self.command_channel.pause() {
            if result < 0 {
                log::warn!("node {}: pause during destroy returned {result}", self.name);
            }
        }
    }

    /// Sets the current state directly, bypassing the command channel.
    /// Used only by construction, which settles on `Suspended` without
    /// a round trip to the processing element (§4.6, §9).
    pub(crate) fn force_state(self: &Arc<Self>, target: NodeState) {
        let (old, new) = {
            let mut state = self.state.lock();
            let old = state.current;
            state.current = target;
            state.error = None;
            (old, target)
        };
        if old != new {
            self.observers
                .state_changed
                .emit(&StateChangedArgs { old, new });
        }
        let mut info = self.info.lock();
        info.state = new;
        info.error = None;
        info.change_mask |= change_bit::STATE;
    }

    pub(crate) fn clear_ports(&self) {
        let mut ports = self.ports.lock();
        ports.input.clear();
        ports.output.clear();
    }
}

/// Routes the processing element's callbacks back onto the node,
/// holding only a [`Weak`] reference so a callback arriving after
/// teardown is a safe no-op instead of a use-after-free (§4.6 step 7,
/// §8 S6).
pub struct NodeRtCallbacks(pub(crate) Weak<Node>);

impl NodeCallbacks for NodeRtCallbacks {
    fn done(&self, seq: Seq, result: i32) {
        let Some(node) = self.0.upgrade() else { return };
        if node.destroyed.load(Ordering::Acquire) {
            return;
        }
        node.work_queue.complete(seq, result);
        node.observers
            .async_complete
            .emit(&AsyncCompleteArgs { seq, result });
    }

    fn event_request_clock_update(&self) {
        let Some(node) = self.0.upgrade() else { return };
        if node.destroyed.load(Ordering::Acquire) {
            return;
        }
        let clock = node.clock.lock().clone();
        let live = node.is_live();
        let _ = node.command_channel.clock_update(clock.as_deref(), live);
    }

    fn need_input(&self) {
        let Some(node) = self.0.upgrade() else { return };
        if node.destroyed.load(Ordering::Acquire) {
            return;
        }
        if let Some(vertex) = node.vertex() {
            node.scheduler.pull(vertex);
            iterate_to_quiescence(node.scheduler.as_ref(), vertex);
        }
    }

    fn have_output(&self) {
        let Some(node) = self.0.upgrade() else { return };
        if node.destroyed.load(Ordering::Acquire) {
            return;
        }
        if let Some(vertex) = node.vertex() {
            node.scheduler.push(vertex);
            iterate_to_quiescence(node.scheduler.as_ref(), vertex);
        }
    }
}
