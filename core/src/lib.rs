pub mod clock;
pub mod command;
pub mod config;
pub mod element;
pub mod info;
pub mod lifecycle;
pub mod node;
pub mod observer;
pub mod port;
pub mod realtime;
pub mod state;
pub mod work_queue;

pub use clock::ClockSource;
pub use command::{Command, ClockUpdate, CommandChannel};
pub use config::NodeCoreConfig;
pub use element::{CommandResult, IoSlot, NodeCallbacks, PortCounts, PortFormat, ProcessingElement};
pub use info::NodeInfo;
pub use lifecycle::NodeParams;
pub use node::{Node, NodeRegistry, NodeRtCallbacks};
pub use observer::{
    AsyncCompleteArgs, ObserverId, Observers, PortArgs, Signal, StateChangedArgs, StateRequestArgs,
};
pub use port::{Port, PortEvent, PortSet, PerDirectionPorts};
pub use realtime::{
    iterate_to_quiescence, new_rt_loop, new_rt_loop_with_capacity, RtLoop, RtLoopHandle, Scheduler,
    VertexHandle,
};
pub use state::NodeState;
pub use work_queue::{Completion, WorkQueue};

pub use node_core_types::{Direction, ExecutionError, Fraction, NodeId, PortId, Result, Seq};
