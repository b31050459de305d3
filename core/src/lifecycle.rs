use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use node_core_types::{Direction, ExecutionError, NodeId, Seq};

use crate::config::NodeCoreConfig;
use crate::element::{CommandResult, ProcessingElement};
use crate::node::{Node, NodeRegistry, NodeRtCallbacks};
use crate::realtime::{new_rt_loop_with_capacity, RtLoopHandle, Scheduler};
use crate::state::NodeState;

/// Reserved sequence for the synthetic "construction finished" async
/// slot (§4.6 step 6). No real command ever uses this value: the work
/// queue is per-node and sequence numbers are assigned by the
/// processing element for everything except this one bookkeeping slot.
const INIT_COMPLETE_SEQ: Seq = u64::MAX;

#[derive(Default)]
pub struct NodeParams {
    pub name: String,
    pub properties: HashMap<String, String>,
    pub live: bool,
    /// §4.6 construction step 5: if set, init-complete is deferred
    /// behind whatever marker the processing element returns for its
    /// own init sequence instead of running immediately.
    pub async_init: bool,
    pub config: NodeCoreConfig,
}

impl Node {
    /// §4.6 construction. With `async_init` unset, synchronous end to
    /// end for a processing element that has no ports to negotiate (§8
    /// S1): by the time this returns, `current_state()` is already
    /// `Suspended` and every initial port is visible. With `async_init`
    /// set, this returns as soon as the element has been asked to begin
    /// its own init, and `current_state()` stays `Creating` until that
    /// resolves and init-complete runs.
    ///
    /// Returns the node and the handle the caller must service on the
    /// real-time loop thread to make async commands and callbacks
    /// progress.
    pub fn create(
        params: NodeParams,
        element: Arc<dyn ProcessingElement>,
        scheduler: Arc<dyn Scheduler>,
        registry: Option<Arc<dyn NodeRegistry>>,
    ) -> Result<(Arc<Node>, RtLoopHandle), ExecutionError> {
        let (rt_loop, rt_handle) = new_rt_loop_with_capacity(params.config.channel_buffer_sz);
        let async_init = params.async_init;

        let mut properties = params.properties;
        for (k, v) in element.info_properties() {
            properties.entry(k).or_insert(v);
        }

        let node = Arc::new(Node::new(
            params.name,
            element,
            scheduler,
            rt_loop,
            registry,
            properties,
            params.config,
        ));
        node.set_live(params.live);

        let callbacks: Arc<dyn crate::element::NodeCallbacks> =
            Arc::new(NodeRtCallbacks(Arc::downgrade(&node)));
        node.element().set_callbacks(callbacks);

        let id = NodeId::new_v4();
        node.set_id(id);
        if let Some(registry) = node.registry() {
            registry.register(id, node.name());
        }

        if async_init {
            match node.begin_init() {
                CommandResult::Sync(_) => node.init_complete()?,
                CommandResult::Async(seq) => {
                    let weak = Arc::downgrade(&node);
                    node.work_queue().submit(
                        seq,
                        None,
                        Box::new(move |_result| {
                            if let Some(node) = weak.upgrade() {
                                if let Err(e) = node.init_complete() {
                                    log::error!(
                                        "node {}: async init-complete failed: {e}",
                                        node.name()
                                    );
                                }
                            }
                        }),
                    );
                }
            }
        } else {
            node.init_complete()?;
        }

        Ok((node, rt_handle))
    }

    /// Runs the six-step sequence from §4.6: fix the vertex, pull the
    /// initial port lists without announcing them individually, settle
    /// on `Suspended`, then fire `initialized` once everything above is
    /// in place.
    fn init_complete(self: &Arc<Self>) -> Result<(), ExecutionError> {
        let vertex = self.scheduler_add_vertex();
        self.set_vertex(Some(vertex));

        self.reconcile_ports(Direction::Input, true)?;
        self.reconcile_ports(Direction::Output, true)?;
        self.refresh_formats();

        // Construction never dispatches a command to the element: a
        // freshly created node settles on `Suspended` without a round
        // trip (§9 second open question — only a genuine allocation
        // failure aborts construction, surfaced via `?` above). The
        // transition still goes through the work queue, under the
        // reserved `INIT_COMPLETE_SEQ` slot, so every `Suspended`
        // arrival looks identical to an observer regardless of how it
        // was reached.
        let weak = Arc::downgrade(self);
        self.work_queue().submit(
            INIT_COMPLETE_SEQ,
            Some(0),
            Box::new(move |_result| {
                if let Some(node) = weak.upgrade() {
                    node.force_state(NodeState::Suspended);
                }
            }),
        );

        self.initialized.store(true, Ordering::Release);
        self.observers.initialized.emit(&());
        Ok(())
    }

    fn scheduler_add_vertex(&self) -> crate::realtime::VertexHandle {
        self.scheduler_ref().add_vertex()
    }

    /// §4.6 teardown order: announce intent (letting every bound
    /// resource unhook itself from its own `destroy` callback, §4.7),
    /// unregister the global identity, hop to the real-time loop to
    /// quiesce the scheduler vertex under that context (§5 "any
    /// mutation that touches the scheduler vertex is marshalled to the
    /// real-time thread"), release ports, announce completion, then
    /// cancel whatever the work queue was still holding and drop every
    /// remaining observer. Safe to call more than once; only the first
    /// call does anything.
    pub fn destroy(self: &Arc<Self>) {
        if self.destroyed.swap(true, Ordering::AcqRel) {
            return;
        }

        self.observers.destroy.emit(&());

        if self.initialized.load(Ordering::Acquire) {
            if let (Some(id), Some(registry)) = (self.id(), self.registry()) {
                registry.unregister(id);
            }
        }

        let node = self.clone();
        if let Err(e) = self.invoke_on_loop(move || {
            node.best_effort_pause();
            if let Some(vertex) = node.vertex() {
                node.scheduler_ref().remove_vertex(vertex);
            }
            node.set_vertex(None);
        }) {
            log::error!("node {}: real-time hop during destroy failed: {e}", self.name());
        }

        self.clear_ports();

        self.observers.free.emit(&());

        self.work_queue().cancel();
        self.observers.clear_all();
    }
}
