use std::collections::HashMap;

use node_core_types::NodeId;

use crate::element::PortFormat;
use crate::state::NodeState;

/// Change-mask bits for `NodeInfo` (§3, §6), mirroring the clock
/// update's bitset so observers can tell cheaply which fields moved.
pub mod change_bit {
    pub const STATE: u32 = 1 << 0;
    pub const N_INPUT_PORTS: u32 = 1 << 1;
    pub const N_OUTPUT_PORTS: u32 = 1 << 2;
    pub const FORMATS: u32 = 1 << 3;
    pub const PROPS: u32 = 1 << 4;
    pub const ALL: u32 =
        STATE | N_INPUT_PORTS | N_OUTPUT_PORTS | FORMATS | PROPS;
}

/// The published, read-only snapshot of a node (§3 Data model,
/// §Glossary "Info block"). Deep-copied out to observers rather than
/// shared, so a caller can't see partially applied updates.
#[derive(Debug, Clone, Default)]
pub struct NodeInfo {
    pub id: Option<NodeId>,
    pub name: String,
    pub state: NodeState,
    pub error: Option<String>,
    pub n_input_ports: u32,
    pub max_input_ports: u32,
    pub n_output_ports: u32,
    pub max_output_ports: u32,
    pub input_formats: Vec<PortFormat>,
    pub output_formats: Vec<PortFormat>,
    pub properties: HashMap<String, String>,
    pub change_mask: u32,
}

impl NodeInfo {
    /// Resets the change mask after a snapshot has been published
    /// (§4.6): the next mutation starts accumulating fresh bits.
    pub fn clear_change_mask(&mut self) {
        self.change_mask = 0;
    }
}
