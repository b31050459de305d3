use std::sync::Arc;

use node_core_types::{Direction, ExecutionError, PortId, Seq};

use crate::command::Command;

/// Port counts and caps as returned by `get_n_ports` (§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortCounts {
    pub n_in: u32,
    pub max_in: u32,
    pub n_out: u32,
    pub max_out: u32,
}

/// An opaque buffer format description. The core never interprets it,
/// only deep-copies it into the published info block (§4.6 step 5, §6,
/// Non-goals: buffer format negotiation is out of scope).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortFormat(pub Vec<u8>);

/// The shared cell a port exchanges its current buffer reference through
/// (§Glossary "I/O slot"). Its contents are owned by the processing
/// element; the core only plumbs the handle through `port_set_io`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IoSlot(pub usize);

/// Outcome of sending a command to the processing element (§6,
/// §Glossary "Async marker"). A negative `Sync` code is a completed
/// command that failed; a non-negative one succeeded immediately.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandResult {
    Sync(i32),
    Async(Seq),
}

/// Callback sink the processing element calls back into (§4.5, §6
/// `set_callbacks`). `need_input`, `have_output` and `reuse_buffer` run
/// on the real-time loop thread and must not allocate, lock against the
/// main loop, or invoke observers. `done` and `event` may arrive from
/// any thread and are routed to the main loop before anything else
/// happens.
pub trait NodeCallbacks: Send + Sync {
    fn done(&self, seq: Seq, result: i32);
    fn event_request_clock_update(&self);
    fn need_input(&self);
    fn have_output(&self);
    /// Reserved for propagating a returned buffer id to the peer output
    /// port's I/O slot (§4.5, §9 first open question). Inert until the
    /// link layer's contract is pinned down; override once it is.
    fn reuse_buffer(&self, _port_id: PortId, _buffer_id: u32) {}
}

/// The opaque processing element this core drives (§1, §6). Consumed
/// only through this contract; its internals are out of scope.
pub trait ProcessingElement: Send + Sync {
    fn get_n_ports(&self) -> PortCounts;

    /// Fills `out_in_ids`/`out_out_ids` in ascending order, truncated to
    /// `max_in`/`max_out` entries respectively.
    fn get_port_ids(
        &self,
        max_in: u32,
        out_in_ids: &mut Vec<PortId>,
        max_out: u32,
        out_out_ids: &mut Vec<PortId>,
    );

    fn add_port(&self, direction: Direction, id: PortId) -> Result<(), ExecutionError>;

    fn port_set_io(
        &self,
        direction: Direction,
        id: PortId,
        io_slot: IoSlot,
    ) -> Result<(), ExecutionError>;

    /// Returns `None` once `index` runs past the last format (§6).
    fn port_enum_formats(
        &self,
        direction: Direction,
        port_id: PortId,
        index: u32,
    ) -> Option<PortFormat>;

    fn send_command(&self, command: Command) -> CommandResult;

    fn set_callbacks(&self, callbacks: Arc<dyn NodeCallbacks>);

    /// Properties the element wants merged into the node's property bag
    /// at construction (§4.6 step 1). Empty by default.
    fn info_properties(&self) -> Vec<(String, String)> {
        Vec::new()
    }
}
