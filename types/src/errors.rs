use crate::ids::PortId;
use thiserror::Error;

/// Errors surfaced by the node lifecycle core (spec.md §7).
#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("out of memory")]
    NoMemory,

    #[error("invalid state transition requested")]
    InvalidState,

    #[error("operation on a destroyed node")]
    Destroyed,

    #[error("port {0} busy: shrinking max_ports below current occupancy")]
    Busy(PortId),

    #[error("reconciliation authority is inconsistent")]
    InconsistentAuthority,

    #[error("invalid port id: {0}")]
    InvalidPortId(PortId),

    #[error("no free port available")]
    NoFreePort,

    #[error("processing element returned error code {0}")]
    ElementError(i32),

    #[error("async completion signalled failure: {0}")]
    AsyncFailure(i32),

    #[error("work queue: double completion for sequence {0}")]
    DoubleCompletion(u64),

    #[error("cannot invoke the real-time loop: {0}")]
    RtInvokeFailed(String),
}

pub type Result<T> = std::result::Result<T, ExecutionError>;
