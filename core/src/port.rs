use std::collections::HashMap;

use node_core_types::{Direction, ExecutionError, PortId};

use crate::element::{IoSlot, ProcessingElement};

/// An attachment between two ports, referenced only by identity (§1 out
/// of scope: "the per-link data path and buffer recycling"; §Glossary
/// "Link").
pub type LinkId = u32;

/// §3 Data model: a port belongs to exactly one node, identified by
/// `(direction, port_id)`.
#[derive(Debug)]
pub struct Port {
    pub id: PortId,
    pub direction: Direction,
    pub io_slot: Option<IoSlot>,
    pub links: Vec<LinkId>,
    /// Legal fan-in on the input side (§3, §4.2 saturated case).
    pub multiplex: bool,
}

impl Port {
    pub fn new(id: PortId, direction: Direction) -> Self {
        Self {
            id,
            direction,
            io_slot: None,
            links: Vec::new(),
            multiplex: false,
        }
    }

    pub fn is_unlinked(&self) -> bool {
        self.links.is_empty()
    }

    /// Best-effort format clear for `suspend` (§4.3). Format storage
    /// itself belongs to the processing element we only drive; this
    /// core just records the request and always succeeds, leaving the
    /// hook in place for processing elements that want to reject it.
    pub fn clear_format(&mut self) -> Result<(), ExecutionError> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortEvent {
    Added(PortId),
    Removed(PortId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DiffOp {
    Keep(PortId),
    Add(PortId),
    Remove(PortId),
}

/// Pure merge-diff between the existing sorted id sequence and the
/// authority's sorted id list (§4.2, §9 design note: "a small, testable
/// pure function ... that returns a diff script"). Ops are produced in
/// application order, which is why a `Remove` for a higher id can
/// precede an `Add` for a still-higher one in the same reconciliation
/// (see `spec.md` S2).
fn diff_ports(existing: &[PortId], authority: &[PortId]) -> Vec<DiffOp> {
    let mut ops = Vec::with_capacity(existing.len().max(authority.len()));
    let mut e = 0usize;
    let mut a = 0usize;
    loop {
        let p = existing.get(e).copied();
        let auth = authority.get(a).copied();
        match (p, auth) {
            (None, None) => break,
            (Some(pid), Some(aid)) if pid == aid => {
                ops.push(DiffOp::Keep(pid));
                e += 1;
                a += 1;
            }
            (existing_id, Some(aid)) if existing_id.is_none_or_greater_than(aid) => {
                ops.push(DiffOp::Add(aid));
                a += 1;
            }
            (Some(pid), _) => {
                ops.push(DiffOp::Remove(pid));
                e += 1;
            }
            _ => unreachable!("covered by the arms above"),
        }
    }
    ops
}

/// Small helper trait purely to make the merge-diff's guard read close
/// to the "authority id < p.port_id, or p exhausted" wording it
/// implements.
trait IsNoneOrGreaterThan {
    fn is_none_or_greater_than(self, other: PortId) -> bool;
}

impl IsNoneOrGreaterThan for Option<PortId> {
    fn is_none_or_greater_than(self, other: PortId) -> bool {
        match self {
            None => true,
            Some(pid) => other < pid,
        }
    }
}

/// §3 PortSet: an ordered sequence of ports sorted ascending by
/// `port_id`, plus a sparse index from `port_id` to position in that
/// sequence sized to `max_ports`.
#[derive(Debug)]
pub struct PortSet {
    direction: Direction,
    sequence: Vec<Port>,
    index: Vec<Option<usize>>,
}

impl PortSet {
    pub fn new(direction: Direction, max_ports: usize) -> Self {
        Self {
            direction,
            sequence: Vec::new(),
            index: vec![None; max_ports],
        }
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn max_ports(&self) -> usize {
        self.index.len()
    }

    pub fn n_ports(&self) -> usize {
        self.sequence.len()
    }

    pub fn ports(&self) -> &[Port] {
        &self.sequence
    }

    pub fn ports_mut(&mut self) -> &mut [Port] {
        &mut self.sequence
    }

    pub fn get(&self, id: PortId) -> Option<&Port> {
        let pos = (*self.index.get(id as usize)?)?;
        self.sequence.get(pos)
    }

    /// Checks the invariants of §8 property 1. Used by tests and
    /// debug-asserted after every mutating call.
    pub fn check_invariants(&self) -> bool {
        if self.sequence.len() > self.index.len() {
            return false;
        }
        for w in self.sequence.windows(2) {
            if w[0].id >= w[1].id {
                return false;
            }
        }
        for (pos, port) in self.sequence.iter().enumerate() {
            if self.index.get(port.id as usize).copied().flatten() != Some(pos) {
                return false;
            }
        }
        true
    }

    fn insert_sorted(&mut self, port: Port) -> usize {
        let pos = self.sequence.partition_point(|p| p.id < port.id);
        self.sequence.insert(pos, port);
        pos
    }

    fn reindex_from(&mut self, start: usize) {
        for i in start..self.sequence.len() {
            let id = self.sequence[i].id;
            self.index[id as usize] = Some(i);
        }
    }

    /// §4.2 reconciliation algorithm. `suppress_events` is set only
    /// during the first publication at init-complete (§4.6 step 2):
    /// every other call (re-scans triggered by notification) reports
    /// its events normally.
    pub fn reconcile(
        &mut self,
        element: &dyn ProcessingElement,
        authority_ids: &[PortId],
        max_ports: usize,
        suppress_events: bool,
    ) -> Result<Vec<PortEvent>, ExecutionError> {
        if max_ports < self.index.len() {
            if let Some(offender) = self
                .sequence
                .iter()
                .map(|p| p.id)
                .find(|&id| id as usize >= max_ports)
            {
                return Err(ExecutionError::Busy(offender));
            }
        }
        self.index.resize(max_ports, None);
        self.index.iter_mut().for_each(|slot| *slot = None);

        let existing_ids: Vec<PortId> = self.sequence.iter().map(|p| p.id).collect();
        let ops = diff_ports(&existing_ids, authority_ids);

        let mut old_ports: HashMap<PortId, Port> =
            self.sequence.drain(..).map(|p| (p.id, p)).collect();
        let mut new_sequence = Vec::with_capacity(authority_ids.len());
        let mut events = Vec::new();

        for op in ops {
            match op {
                DiffOp::Keep(id) => {
                    let port = old_ports
                        .remove(&id)
                        .expect("diff only keeps ids present in the old sequence");
                    new_sequence.push(port);
                }
                DiffOp::Remove(id) => {
                    old_ports.remove(&id);
                    if !suppress_events {
                        events.push(PortEvent::Removed(id));
                    }
                }
                DiffOp::Add(id) => {
                    // The authority list only ever names ports the
                    // element already reports via `get_port_ids`, so
                    // this arm binds an I/O slot on an existing port
                    // rather than creating one (that's `get_free_port`'s
                    // job, below).
                    let mut port = Port::new(id, self.direction);
                    if let Err(e) = element.port_set_io(self.direction, id, IoSlot(id as usize)) {
                        log::warn!("node: can't set {} IO {id}: {e}", self.direction);
                    } else {
                        port.io_slot = Some(IoSlot(id as usize));
                    }
                    new_sequence.push(port);
                    if !suppress_events {
                        events.push(PortEvent::Added(id));
                    }
                }
            }
        }

        for (pos, port) in new_sequence.iter().enumerate() {
            self.index[port.id as usize] = Some(pos);
        }
        self.sequence = new_sequence;

        debug_assert!(self.check_invariants());
        Ok(events)
    }

    /// §4.2 `get_free_port`.
    pub fn get_free_port(
        &mut self,
        element: &dyn ProcessingElement,
    ) -> Result<PortId, ExecutionError> {
        if let Some(p) = self.sequence.iter().find(|p| p.is_unlinked()) {
            return Ok(p.id);
        }

        if self.sequence.len() < self.index.len() {
            for i in 0..self.index.len() {
                if self.index[i].is_some() {
                    continue;
                }
                let mut port = Port::new(i as PortId, self.direction);
                if let Err(e) = element.add_port(self.direction, i as PortId) {
                    log::error!("node: could not add {} port {i}: {e}", self.direction);
                    continue;
                }
                if let Err(e) = element.port_set_io(self.direction, i as PortId, IoSlot(i)) {
                    log::warn!("node: can't set IO for new port {i}: {e}");
                } else {
                    port.io_slot = Some(IoSlot(i));
                }
                let pos = self.insert_sorted(port);
                self.reindex_from(pos);
                debug_assert!(self.check_invariants());
                return Ok(i as PortId);
            }
            return Err(ExecutionError::NoFreePort);
        }

        match self.direction {
            Direction::Output => self
                .sequence
                .first()
                .map(|p| p.id)
                .ok_or(ExecutionError::NoFreePort),
            Direction::Input => self
                .sequence
                .first()
                .filter(|p| p.multiplex)
                .map(|p| p.id)
                .ok_or(ExecutionError::NoFreePort),
        }
    }

    /// Destroys every port in the set, used during teardown (§4.6 step
    /// 5). Ports vanish without emitting `port-removed` — the node is
    /// already gone by the time this runs.
    pub fn clear(&mut self) {
        self.sequence.clear();
        self.index.iter_mut().for_each(|slot| *slot = None);
    }
}

/// The node's two port sets, bundled so callers that need both (e.g.
/// `suspend`) don't juggle two locks (§3).
pub struct PerDirectionPorts {
    pub input: PortSet,
    pub output: PortSet,
}

impl PerDirectionPorts {
    pub fn new() -> Self {
        Self::with_max_ports(0, 0)
    }

    /// Pre-sizes each direction's index array to `default_in`/
    /// `default_out` (`NodeCoreConfig::default_max_input_ports` /
    /// `default_max_output_ports`) ahead of the first reconciliation,
    /// which resizes to whatever the processing element actually
    /// reports regardless.
    pub fn with_max_ports(default_in: usize, default_out: usize) -> Self {
        Self {
            input: PortSet::new(Direction::Input, default_in),
            output: PortSet::new(Direction::Output, default_out),
        }
    }

    pub fn get(&self, direction: Direction) -> &PortSet {
        match direction {
            Direction::Input => &self.input,
            Direction::Output => &self.output,
        }
    }

    pub fn get_mut(&mut self, direction: Direction) -> &mut PortSet {
        match direction {
            Direction::Input => &mut self.input,
            Direction::Output => &mut self.output,
        }
    }
}

impl Default for PerDirectionPorts {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct StubElement {
        fail_add: Mutex<Vec<PortId>>,
    }

    impl crate::element::ProcessingElement for StubElement {
        fn get_n_ports(&self) -> crate::element::PortCounts {
            unimplemented!()
        }
        fn get_port_ids(&self, _: u32, _: &mut Vec<PortId>, _: u32, _: &mut Vec<PortId>) {}
        fn add_port(&self, _direction: Direction, id: PortId) -> Result<(), ExecutionError> {
            if self.fail_add.lock().unwrap().contains(&id) {
                Err(ExecutionError::ElementError(-1))
            } else {
                Ok(())
            }
        }
        fn port_set_io(&self, _: Direction, _: PortId, _: IoSlot) -> Result<(), ExecutionError> {
            Ok(())
        }
        fn port_enum_formats(&self, _: Direction, _: PortId, _: u32) -> Option<crate::element::PortFormat> {
            None
        }
        fn send_command(&self, _: crate::command::Command) -> crate::element::CommandResult {
            crate::element::CommandResult::Sync(0)
        }
        fn set_callbacks(&self, _: Arc<dyn crate::element::NodeCallbacks>) {}
    }

    #[test]
    fn s1_synchronous_construction_three_input_ports() {
        let element = StubElement::default();
        let mut set = PortSet::new(Direction::Input, 8);
        let events = set.reconcile(&element, &[0, 2, 5], 8, true).unwrap();
        assert!(events.is_empty());
        let ids: Vec<PortId> = set.ports().iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![0, 2, 5]);
        for id in [0u32, 2, 5] {
            assert!(set.get(id).is_some());
        }
        assert!(set.get(1).is_none());
        assert!(set.check_invariants());
    }

    #[test]
    fn s2_reconciliation_adds_and_removes_in_order() {
        let element = StubElement::default();
        let mut set = PortSet::new(Direction::Input, 8);
        set.reconcile(&element, &[0, 2, 5], 8, true).unwrap();

        let events = set.reconcile(&element, &[0, 3, 5], 8, false).unwrap();
        assert_eq!(
            events,
            vec![PortEvent::Removed(2), PortEvent::Added(3)]
        );
        let ids: Vec<PortId> = set.ports().iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![0, 3, 5]);
        assert!(set.check_invariants());
    }

    #[test]
    fn reconcile_against_unchanged_authority_is_a_no_op() {
        let element = StubElement::default();
        let mut set = PortSet::new(Direction::Input, 8);
        set.reconcile(&element, &[0, 2, 5], 8, true).unwrap();
        let events = set.reconcile(&element, &[0, 2, 5], 8, false).unwrap();
        assert!(events.is_empty());
    }

    #[test]
    fn shrinking_max_ports_below_occupancy_fails() {
        let element = StubElement::default();
        let mut set = PortSet::new(Direction::Input, 8);
        set.reconcile(&element, &[0, 5], 8, true).unwrap();
        let err = set.reconcile(&element, &[0, 5], 4, false).unwrap_err();
        assert!(matches!(err, ExecutionError::Busy(5)));
    }

    #[test]
    fn s5_get_free_port_saturated_input_without_multiplex() {
        let element = StubElement::default();
        let mut set = PortSet::new(Direction::Input, 2);
        set.reconcile(&element, &[0, 1], 2, true).unwrap();
        set.ports_mut()[0].links.push(1);
        set.ports_mut()[1].links.push(2);
        let result = set.get_free_port(&element);
        assert!(matches!(result, Err(ExecutionError::NoFreePort)));
    }

    #[test]
    fn get_free_port_saturated_output_reuses_first_port() {
        let element = StubElement::default();
        let mut set = PortSet::new(Direction::Output, 2);
        set.reconcile(&element, &[0, 1], 2, true).unwrap();
        set.ports_mut()[0].links.push(1);
        set.ports_mut()[1].links.push(2);
        assert_eq!(set.get_free_port(&element).unwrap(), 0);
    }

    #[test]
    fn get_free_port_prefers_unlinked_existing_port() {
        let element = StubElement::default();
        let mut set = PortSet::new(Direction::Input, 4);
        set.reconcile(&element, &[0, 1], 4, true).unwrap();
        set.ports_mut()[0].links.push(1);
        assert_eq!(set.get_free_port(&element).unwrap(), 1);
    }

    #[test]
    fn get_free_port_creates_new_port_when_room_remains() {
        let element = StubElement::default();
        let mut set = PortSet::new(Direction::Input, 4);
        set.reconcile(&element, &[0], 4, true).unwrap();
        set.ports_mut()[0].links.push(1);
        let id = set.get_free_port(&element).unwrap();
        assert_eq!(id, 1);
        assert!(set.get(1).is_some());
        assert!(set.check_invariants());
    }

    #[test]
    fn get_free_port_skips_slot_the_element_refuses_and_leaves_no_half_built_port() {
        let element = StubElement::default();
        element.fail_add.lock().unwrap().push(0);
        let mut set = PortSet::new(Direction::Input, 2);
        let id = set.get_free_port(&element).unwrap();
        assert_eq!(id, 1);
        assert!(set.get(0).is_none());
        assert!(set.check_invariants());
    }
}
