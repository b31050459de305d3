use node_core_types::Fraction;

/// The external clock source a node may be bound to (§3 Data model,
/// §Glossary). Liveness is modeled separately on [`crate::node::Node`]
/// (§9 third open question) — a clock being present does not by itself
/// make a node live.
pub trait ClockSource: Send + Sync {
    /// Returns `(rate, ticks, monotonic_time_ns)`, the three fields a
    /// live `ClockUpdate` command copies from the clock (§4.3, §6).
    fn get_time(&self) -> (Fraction, u64, i64);
}
