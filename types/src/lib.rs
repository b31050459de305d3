//! Shared primitives for the node lifecycle core: small, dependency-light,
//! and re-exporting the ambient crates the rest of the workspace builds
//! its logging/error/locking story on.

pub mod errors;
pub mod ids;

pub use errors::{ExecutionError, Result};
pub use ids::{Direction, Fraction, NodeId, PortId, Seq};

pub use log;
pub use parking_lot;
pub use thiserror;
