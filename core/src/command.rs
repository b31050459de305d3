use std::sync::Arc;

use node_core_types::Fraction;

use crate::clock::ClockSource;
use crate::element::{CommandResult, ProcessingElement};
use crate::port::PerDirectionPorts;

/// Change-mask bits for a `ClockUpdate` command (§6): which fields are
/// meaningful in this particular update.
pub mod clock_change {
    pub const TIME: u32 = 1 << 0;
    pub const SCALE: u32 = 1 << 1;
    pub const STATE: u32 = 1 << 2;
    pub const LATENCY: u32 = 1 << 3;
    pub const ALL: u32 = TIME | SCALE | STATE | LATENCY;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockState {
    Running,
    Paused,
}

/// Wire layout documented in §6: rate (fraction), ticks, monotonic_time
/// (ns), scale (`(num<<16)|den`), state, latency (ns), and a Live flag
/// set only when a clock is attached and the node is live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockUpdate {
    pub change_mask: u32,
    pub live: bool,
    pub rate: Fraction,
    pub ticks: u64,
    pub monotonic_time_ns: i64,
    pub scale: u32,
    pub state: ClockState,
    pub latency_ns: i64,
}

impl ClockUpdate {
    /// Builds the default descriptor and, if a clock is present and the
    /// node is live, overlays a live reading (§4.3). Matches the
    /// original's default of `rate=1/1`, `scale=(1<<16)|1`,
    /// `state=Running`.
    pub fn new(clock: Option<&dyn ClockSource>, live: bool) -> Self {
        let mut update = ClockUpdate {
            change_mask: clock_change::ALL,
            live: false,
            rate: Fraction::default(),
            ticks: 0,
            monotonic_time_ns: 0,
            scale: Fraction::default().pack(),
            state: ClockState::Running,
            latency_ns: 0,
        };

        if let (Some(clock), true) = (clock, live) {
            let (rate, ticks, monotonic_time_ns) = clock.get_time();
            update.rate = rate;
            update.ticks = ticks;
            update.monotonic_time_ns = monotonic_time_ns;
            update.live = true;
        }

        update
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// §4.6 construction step 5 (async branch): asks the element to
    /// begin whatever setup it needs before init-complete can run.
    Init,
    Pause,
    Start,
    ClockUpdate(ClockUpdate),
}

/// §4.3 Command Channel: translates State Machine requests into typed
/// commands on the processing element.
#[derive(Clone)]
pub struct CommandChannel {
    element: Arc<dyn ProcessingElement>,
}

impl CommandChannel {
    pub fn new(element: Arc<dyn ProcessingElement>) -> Self {
        Self { element }
    }

    /// §4.6 construction step 5 (async branch).
    pub fn init(&self) -> CommandResult {
        self.element.send_command(Command::Init)
    }

    pub fn pause(&self) -> CommandResult {
        self.element.send_command(Command::Pause)
    }

    pub fn start(&self) -> CommandResult {
        self.element.send_command(Command::Start)
    }

    pub fn clock_update(&self, clock: Option<&dyn ClockSource>, live: bool) -> CommandResult {
        self.element
            .send_command(Command::ClockUpdate(ClockUpdate::new(clock, live)))
    }

    /// `suspend` never reaches the processing element: it clears format
    /// on every port in both directions, best-effort, continuing on
    /// per-port error but returning the last one (§4.3). The original
    /// `suspend_node` likewise never sends a command to the element.
    pub fn suspend(ports: &mut PerDirectionPorts) -> CommandResult {
        let mut last_err = 0i32;
        for port in ports
            .input
            .ports_mut()
            .iter_mut()
            .chain(ports.output.ports_mut().iter_mut())
        {
            if let Err(e) = port.clear_format() {
                log::warn!("node: error unset format on port {}: {e}", port.id);
                last_err = -1;
            }
        }
        CommandResult::Sync(last_err)
    }
}
