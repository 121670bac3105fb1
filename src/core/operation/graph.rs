// src/core/operation/graph.rs

use super::labels;
use super::types::Operation;
use crate::core::errors::MasterError;
use crate::core::reference_manager::ReferenceManager;
use std::collections::{BTreeSet, HashMap, HashSet};

/// A DAG edge: `blocker` must finish executing before `waiter` may start.
/// `permanent` edges survive retirement recomputation; transient edges are
/// cleared and re-derived whenever the waiter's dependency set changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct Edge {
    blocker: u64,
    waiter: u64,
    permanent: bool,
}

/// The live operation DAG: vertices are operations not yet retired, edges
/// are derived from the three string-labelled constraint sets. One mutex
/// (owned by [`super::processor::OperationProcessor`]) protects this whole
/// structure; workers hold it only while picking/accounting tasks, never
/// across an operation's `execute`.
#[derive(Debug, Default)]
pub struct OperationGraph {
    operations: HashMap<u64, Operation>,
    edges: HashSet<Edge>,
    /// Operations currently checked out by a worker — the only ops
    /// considered "active" for the exclusivity-conflict rule. Resolves the
    /// tension between the end-to-end "exclusivity serialization" scenario
    /// (two ops sharing a label coexist, B waits for A via an edge) and the
    /// boundary test (a second exclusive op is rejected outright): rejection
    /// only fires against an op that is actually executing right now, not
    /// merely graph-resident; a graph-resident holder instead gets a
    /// permanent ordering edge. Recorded in DESIGN.md as an Open Question
    /// resolution.
    in_flight: HashSet<u64>,
    exclusivity_index: HashMap<String, BTreeSet<u64>>,
    dependency_index: HashMap<String, BTreeSet<u64>>,
    obstruction_index: HashMap<String, BTreeSet<u64>>,
    /// Ops parked here instead of retired because they are `perpetual`.
    perpetual_ops: HashMap<u64, Operation>,
}

impl OperationGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    pub fn get(&self, id: u64) -> Option<&Operation> {
        self.operations.get(&id)
    }

    pub fn get_mut(&mut self, id: u64) -> Option<&mut Operation> {
        self.operations.get_mut(&id)
    }

    fn index_operation(&mut self, op: &Operation) {
        for l in &op.deps.exclusivities {
            self.exclusivity_index.entry(l.clone()).or_default().insert(op.id);
        }
        for l in &op.deps.dependencies {
            self.dependency_index.entry(l.clone()).or_default().insert(op.id);
        }
        for l in &op.deps.obstructions {
            self.obstruction_index.entry(l.clone()).or_default().insert(op.id);
        }
    }

    fn purge_from_indices(&mut self, op: &Operation) {
        for (index, labels) in [
            (&mut self.exclusivity_index, &op.deps.exclusivities),
            (&mut self.dependency_index, &op.deps.dependencies),
            (&mut self.obstruction_index, &op.deps.obstructions),
        ] {
            for l in labels {
                if let Some(set) = index.get_mut(l) {
                    set.remove(&op.id);
                    if set.is_empty() {
                        index.remove(l);
                    }
                }
            }
        }
    }

    /// Adds a transient edge for every label shared between `op`'s set and
    /// another live op's complementary set, per the three derivation rules
    /// in the component design. Exclusivity-exclusivity collisions against
    /// an in-flight holder are rejected by the caller before this runs;
    /// collisions against a merely graph-resident holder get a permanent
    /// ordering edge here (earlier id first).
    fn wire_edges_for(&mut self, op_id: u64) {
        let op = match self.operations.get(&op_id) {
            Some(o) => o.clone(),
            None => return,
        };

        // Rule: obstruction holder u blocks any v whose exclusivity or
        // dependency set names the same label.
        for label in &op.deps.obstructions {
            if let Some(waiters) = self.dependency_index.get(label).cloned() {
                for w in waiters {
                    if w != op_id {
                        self.edges.insert(Edge { blocker: op_id, waiter: w, permanent: false });
                    }
                }
            }
            if let Some(waiters) = self.exclusivity_index.get(label).cloned() {
                for w in waiters {
                    if w != op_id {
                        self.edges.insert(Edge { blocker: op_id, waiter: w, permanent: false });
                    }
                }
            }
        }

        // Rule: v's dependency on a label matched by another op u's
        // exclusivity or obstruction set means u blocks v.
        for label in &op.deps.dependencies {
            if let Some(blockers) = self.obstruction_index.get(label).cloned() {
                for b in blockers {
                    if b != op_id {
                        self.edges.insert(Edge { blocker: b, waiter: op_id, permanent: false });
                    }
                }
            }
            if let Some(blockers) = self.exclusivity_index.get(label).cloned() {
                for b in blockers {
                    if b != op_id {
                        self.edges.insert(Edge { blocker: b, waiter: op_id, permanent: false });
                    }
                }
            }
        }

        // Rule: mutual exclusivity holders of the same label serialize via
        // a permanent edge, earlier id first.
        for label in &op.deps.exclusivities {
            if let Some(holders) = self.exclusivity_index.get(label).cloned() {
                for h in holders {
                    if h != op_id {
                        let (blocker, waiter) = if h < op_id { (h, op_id) } else { (op_id, h) };
                        if !self.edges.iter().any(|e| e.blocker == blocker && e.waiter == waiter) {
                            self.edges.insert(Edge { blocker, waiter, permanent: true });
                        }
                    }
                }
            }
        }
    }

    fn clear_transient_edges_touching(&mut self, op_id: u64) {
        self.edges
            .retain(|e| e.permanent || (e.blocker != op_id && e.waiter != op_id));
    }

    /// Adds a new operation to the graph. Rejects with
    /// [`MasterError::OperationInProgress`] only if an *in-flight* op
    /// already holds one of the new op's exclusivity labels; a
    /// graph-resident (not yet executing) holder instead yields a
    /// permanent serializing edge and the add succeeds.
    pub fn add_operation(&mut self, op: Operation) -> Result<u64, MasterError> {
        for label in &op.deps.exclusivities {
            if let Some(holders) = self.exclusivity_index.get(label) {
                for &h in holders {
                    if self.in_flight.contains(&h) {
                        return Err(MasterError::OperationInProgress(label.clone()));
                    }
                }
            }
        }
        let id = op.id;
        self.index_operation(&op);
        self.operations.insert(id, op);
        self.wire_edges_for(id);
        Ok(id)
    }

    /// Stages `child` as a sub-operation of `parent`: adds the synthetic
    /// permanent obstruction/dependency pair, assigns `child` a
    /// remove-approval bit owned by `parent`, and appends `child` to
    /// `parent.sub_operations`. Per the resolved open question, `child`
    /// inherits neither `parent`'s exclusivities nor its dependencies.
    pub fn stage_subop(&mut self, parent_id: u64, mut child: Operation, approval_bit: u32) -> Result<u64, MasterError> {
        let parent = self
            .operations
            .get(&parent_id)
            .ok_or(MasterError::OperationNotFound(parent_id))?;
        let synthetic = labels::suboperation_of(&parent.label(), &child.label(), child.id);
        child.deps.add_obstruction(synthetic.clone());
        child.remove_approval_add(approval_bit);
        child.parent = Some(parent_id);
        child.owned_approval_bit = Some(approval_bit);
        let child_id = self.add_operation(child)?;

        let parent = self.operations.get_mut(&parent_id).unwrap();
        parent.deps.add_dependency(synthetic);
        parent.sub_operations.push(child_id);
        self.clear_transient_edges_touching(parent_id);
        self.wire_edges_for(parent_id);
        Ok(child_id)
    }

    /// Checks every sub-op of `parent` for an error; returns the first
    /// failing one, if any. Does not mutate state — callers decide whether
    /// to complete the parent with that error.
    pub fn first_failed_subop(&self, parent_id: u64) -> Option<(u64, u32, String)> {
        let parent = self.operations.get(&parent_id)?;
        for &sub_id in &parent.sub_operations {
            if let Some(sub) = self.operations.get(&sub_id) {
                if sub.is_complete() && sub.error_code != 0 {
                    return Some((
                        sub_id,
                        sub.error_code,
                        sub.error_message.clone().unwrap_or_default(),
                    ));
                }
            }
        }
        None
    }

    pub fn all_subops_complete(&self, parent_id: u64) -> bool {
        match self.operations.get(&parent_id) {
            Some(parent) => parent
                .sub_operations
                .iter()
                .all(|id| self.operations.get(id).map(|o| o.is_complete()).unwrap_or(true)),
            None => true,
        }
    }

    /// An op that has reached a terminal state is still not safe to retire
    /// if its own remove-approval mask isn't fully satisfied, or if
    /// something outside the graph — a recovery-step future, a staged
    /// sub-operation's parent pointer — still holds a live reference to its
    /// id in `references`.
    pub fn is_removable(&self, op_id: u64, references: &ReferenceManager) -> bool {
        match self.operations.get(&op_id) {
            Some(op) => op.is_removable() && !references.is_referenced(op_id),
            None => false,
        }
    }

    /// Removes an op that has reached COMPLETE: purges it from the three
    /// indices and all edges, and — if perpetual — parks it instead of
    /// dropping it. Returns `None` without touching the graph if `op_id`
    /// isn't removable yet (see `is_removable`); the caller should retry
    /// retirement on a later pass.
    pub fn retire(&mut self, op_id: u64, references: &ReferenceManager) -> Option<Operation> {
        if !self.is_removable(op_id, references) {
            return None;
        }
        let op = self.operations.remove(&op_id)?;
        self.purge_from_indices(&op);
        self.edges.retain(|e| e.blocker != op_id && e.waiter != op_id);
        self.in_flight.remove(&op_id);
        if op.perpetual {
            self.perpetual_ops.insert(op_id, op.clone());
        }
        Some(op)
    }

    /// Scans the obstruction and exclusivity indices for `label` and
    /// clears `blocked` on every matching op, then force-recomputes
    /// transient edges for those ops.
    pub fn unblock(&mut self, label: &str) {
        let mut touched = BTreeSet::new();
        if let Some(ids) = self.obstruction_index.get(label) {
            touched.extend(ids.iter().copied());
        }
        if let Some(ids) = self.exclusivity_index.get(label) {
            touched.extend(ids.iter().copied());
        }
        for id in touched {
            if let Some(op) = self.operations.get_mut(&id) {
                op.unblock();
            }
            self.clear_transient_edges_touching(id);
            self.wire_edges_for(id);
        }
    }

    /// Re-injects a parked perpetual op into the graph at `Initial` when a
    /// newly added operation carries a dependency matching one of the
    /// perpetual op's obstruction labels.
    pub fn maybe_reactivate_perpetual(&mut self, newly_added: u64) {
        let new_labels = match self.operations.get(&newly_added) {
            Some(op) => op.deps.dependencies.clone(),
            None => return,
        };
        let to_reactivate: Vec<u64> = self
            .perpetual_ops
            .iter()
            .filter(|(_, p)| p.deps.obstructions.iter().any(|o| new_labels.contains(o)))
            .map(|(id, _)| *id)
            .collect();
        for id in to_reactivate {
            if let Some(mut op) = self.perpetual_ops.remove(&id) {
                op.state = super::types::OperationState::Initial;
                op.blocked = false;
                self.index_operation(&op);
                self.operations.insert(id, op);
                self.wire_edges_for(id);
            }
        }
    }

    /// Longest-distance-to-leaf leveling: level 0 runs last-recorded as
    /// runnable leaves first... concretely, vertices with no outstanding
    /// blocker run at level 0, their direct dependents at level 1, and so
    /// on, matching "topological sort into levels" in the execution cycle.
    pub fn compute_levels(&self) -> Vec<Vec<u64>> {
        let mut remaining_in_degree: HashMap<u64, usize> = self
            .operations
            .keys()
            .map(|&id| (id, 0usize))
            .collect();
        for e in &self.edges {
            if self.operations.contains_key(&e.blocker) {
                *remaining_in_degree.entry(e.waiter).or_insert(0) += 1;
            }
        }

        let mut levels = Vec::new();
        let mut done: HashSet<u64> = HashSet::new();
        while done.len() < self.operations.len() {
            let level: Vec<u64> = remaining_in_degree
                .iter()
                .filter(|(id, deg)| !done.contains(*id) && **deg == 0)
                .map(|(id, _)| *id)
                .collect();
            if level.is_empty() {
                // Defensive: a cycle would stall progress; surface whatever
                // remains as a final level rather than looping forever.
                let rest: Vec<u64> = self
                    .operations
                    .keys()
                    .filter(|id| !done.contains(*id))
                    .copied()
                    .collect();
                levels.push(rest);
                break;
            }
            for &id in &level {
                done.insert(id);
            }
            for e in &self.edges {
                if level.contains(&e.blocker) {
                    if let Some(deg) = remaining_in_degree.get_mut(&e.waiter) {
                        *deg = deg.saturating_sub(1);
                    }
                }
            }
            levels.push(level);
        }
        levels
    }

    pub fn mark_in_flight(&mut self, id: u64) {
        self.in_flight.insert(id);
    }

    pub fn clear_in_flight(&mut self, id: u64) {
        self.in_flight.remove(&id);
    }

    pub fn is_blocked(&self, id: u64) -> bool {
        self.operations.get(&id).map(|o| o.blocked).unwrap_or(true)
    }

    /// Graphviz rendering of the live DAG, for operational debugging —
    /// never parsed by the processor itself.
    pub fn dump_dot(&self) -> String {
        let mut out = String::from("digraph operations {\n");
        let mut ids: Vec<&u64> = self.operations.keys().collect();
        ids.sort();
        for id in ids {
            let op = &self.operations[id];
            out.push_str(&format!(
                "  {} [label=\"{} state={:?}{}\"];\n",
                id,
                op.label(),
                op.state,
                if op.blocked { " blocked" } else { "" }
            ));
        }
        let mut edges: Vec<&Edge> = self.edges.iter().collect();
        edges.sort_by_key(|e| (e.blocker, e.waiter));
        for edge in edges {
            out.push_str(&format!("  {} -> {};\n", edge.blocker, edge.waiter));
        }
        out.push_str("}\n");
        out
    }

    /// One line per live operation: id, type, state, and the labels it
    /// holds or waits on. For a STATUS reply or a test assertion, not for
    /// machine parsing.
    pub fn state_description(&self) -> String {
        let mut ids: Vec<&u64> = self.operations.keys().collect();
        ids.sort();
        ids.into_iter()
            .map(|id| {
                let op = &self.operations[id];
                format!(
                    "#{id} {} state={:?} exclusivities={:?} dependencies={:?} obstructions={:?}",
                    op.label(),
                    op.state,
                    op.deps.exclusivities,
                    op.deps.dependencies,
                    op.deps.obstructions,
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::operation::types::{Operation, OperationType};

    #[test]
    fn exclusivity_serialization_orders_dependent_op() {
        let mut g = OperationGraph::new();
        let mut a = Operation::new(1, OperationType::CreateTable);
        a.deps.add_exclusivity("foo");
        let mut b = Operation::new(2, OperationType::CreateTable);
        b.deps.add_exclusivity("foo");
        g.add_operation(a).unwrap();
        g.add_operation(b).unwrap();

        let levels = g.compute_levels();
        let level_of = |id: u64| levels.iter().position(|l| l.contains(&id)).unwrap();
        assert!(level_of(1) < level_of(2));
    }

    #[test]
    fn in_flight_exclusivity_conflict_is_rejected() {
        let mut g = OperationGraph::new();
        let mut a = Operation::new(1, OperationType::CreateTable);
        a.deps.add_exclusivity("foo");
        g.add_operation(a).unwrap();
        g.mark_in_flight(1);

        let mut b = Operation::new(2, OperationType::CreateTable);
        b.deps.add_exclusivity("foo");
        let err = g.add_operation(b).unwrap_err();
        assert_eq!(err, MasterError::OperationInProgress("foo".into()));
        assert!(g.get(1).is_some());
    }

    #[test]
    fn blocked_chain_unblocks_in_order() {
        let mut g = OperationGraph::new();
        let mut foo = Operation::new(1, OperationType::Status);
        foo.deps.add_obstruction("foo-done");
        foo.block();
        let mut bar = Operation::new(2, OperationType::Status);
        bar.deps.add_dependency("foo-done");
        bar.deps.add_obstruction("bar-done");
        bar.block();
        let mut baz = Operation::new(3, OperationType::Status);
        baz.deps.add_dependency("bar-done");
        baz.block();

        g.add_operation(foo).unwrap();
        g.add_operation(bar).unwrap();
        g.add_operation(baz).unwrap();
        assert_eq!(g.len(), 3);

        g.unblock("bar-done");
        assert!(!g.is_blocked(3));
        assert!(g.is_blocked(1));
        assert!(g.is_blocked(2));
    }

    #[test]
    fn perpetual_op_reactivates_on_matching_dependency() {
        let mut g = OperationGraph::new();
        let mut p = Operation::new(1, OperationType::TimedBarrier);
        p.perpetual = true;
        p.deps.add_obstruction("yabadabadoo");
        g.add_operation(p).unwrap();
        g.retire(1, &ReferenceManager::new()); // simulate completing it once, parking it as perpetual

        let mut dependent = Operation::new(2, OperationType::Status);
        dependent.deps.add_dependency("yabadabadoo");
        g.add_operation(dependent).unwrap();
        g.maybe_reactivate_perpetual(2);

        let reactivated = g.get(1).expect("perpetual op re-inserted");
        assert!(matches!(reactivated.state, super::super::types::OperationState::Initial));
    }

    #[test]
    fn subop_staging_requires_parent_approval_before_removable() {
        let mut g = OperationGraph::new();
        let parent = Operation::new(1, OperationType::RecreateIndexTables);
        g.add_operation(parent).unwrap();
        let child = Operation::new(2, OperationType::DropTable);
        let child_id = g.stage_subop(1, child, 0b1).unwrap();

        assert!(!g.get(child_id).unwrap().is_removable());
        let mut c = g.get_mut(child_id).unwrap();
        assert!(c.approve_removal(0b1));
    }

    #[test]
    fn retire_leaves_an_externally_referenced_op_in_the_graph() {
        let mut g = OperationGraph::new();
        g.add_operation(Operation::new(1, OperationType::Status)).unwrap();
        let references = ReferenceManager::new();
        references.acquire(1);

        assert!(g.retire(1, &references).is_none());
        assert!(g.get(1).is_some());

        references.release(1);
        assert!(g.retire(1, &references).is_some());
        assert!(g.get(1).is_none());
    }

    #[test]
    fn dump_dot_and_state_description_mention_every_live_operation() {
        let mut g = OperationGraph::new();
        let mut a = Operation::new(1, OperationType::CreateTable);
        a.deps.add_exclusivity("table:foo");
        let mut b = Operation::new(2, OperationType::CreateTable);
        b.deps.add_exclusivity("table:foo");
        g.add_operation(a).unwrap();
        g.add_operation(b).unwrap();

        let dot = g.dump_dot();
        assert!(dot.contains("digraph operations"));
        assert!(dot.contains("1 -> 2"));

        let description = g.state_description();
        assert!(description.contains("#1"));
        assert!(description.contains("#2"));
        assert!(description.contains("table:foo"));
    }
}
