/// Tunables for a single node's lifecycle core, bundled into one plain
/// struct rather than a file the orchestrator loads (that loading stays
/// out of scope here, §1).
#[derive(Debug, Clone, Copy)]
pub struct NodeCoreConfig {
    /// Capacity of the work queue's internal completion channel and of
    /// the real-time invoke channel.
    pub channel_buffer_sz: usize,
    /// Initial index-array size for a freshly constructed port set,
    /// before the first reconciliation learns the processing element's
    /// actual `max_ports`. Purely a sizing hint; reconciliation resizes
    /// as needed regardless.
    pub default_max_input_ports: usize,
    pub default_max_output_ports: usize,
}

impl Default for NodeCoreConfig {
    fn default() -> Self {
        Self {
            channel_buffer_sz: 1000,
            default_max_input_ports: 64,
            default_max_output_ports: 64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_matches_documented_values() {
        let config = NodeCoreConfig::default();
        assert_eq!(config.channel_buffer_sz, 1000);
        assert_eq!(config.default_max_input_ports, 64);
        assert_eq!(config.default_max_output_ports, 64);
    }
}
