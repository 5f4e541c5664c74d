//! Update Scheduler
//!
//! The scheduler owns the dependency graph and decides which nodes need to
//! be revisited after a source changes.
//!
//! # Algorithm
//!
//! Change propagation is push-pull:
//!
//! 1. When a source node changes, its direct dependents are marked `Dirty`.
//! 2. Everything further downstream is marked `MaybeDirty`.
//! 3. Effect nodes reached by the walk are returned so the runtime can queue
//!    them for the next flush.
//! 4. When a maybe-dirty node is pulled, the runtime first brings its derived
//!    dependencies up to date. A derived node whose value actually changed
//!    marks its own direct dependents `Dirty` via [`UpdateScheduler::mark_dependents_dirty`].
//!    If nothing upstream changed, the node is simply marked clean again.
//!
//! This keeps equality-based de-duplication intact across memo chains: an
//! effect behind a memo that recomputes to the same value never re-runs.

use std::collections::{HashMap, HashSet, VecDeque};

use smallvec::SmallVec;

use super::node::{DirtyState, Node, NodeId, NodeKind};

/// The update scheduler manages the dependency graph and coordinates updates.
pub struct UpdateScheduler {
    /// All nodes in the graph, indexed by ID.
    nodes: HashMap<NodeId, Node>,
}

impl UpdateScheduler {
    /// Create a new empty scheduler.
    pub fn new() -> Self {
        Self {
            nodes: HashMap::new(),
        }
    }

    /// Add a node to the graph.
    pub fn add_node(&mut self, node: Node) -> NodeId {
        let id = node.id();
        self.nodes.insert(id, node);
        id
    }

    /// Remove a node from the graph.
    ///
    /// Also removes all edges involving this node.
    pub fn remove_node(&mut self, node_id: NodeId) {
        if let Some(node) = self.nodes.remove(&node_id) {
            for dep_id in node.dependencies() {
                if let Some(dep) = self.nodes.get_mut(dep_id) {
                    dep.remove_dependent(node_id);
                }
            }

            for dependent_id in node.dependents() {
                if let Some(dependent) = self.nodes.get_mut(dependent_id) {
                    dependent.remove_dependency(node_id);
                }
            }
        }
    }

    pub fn get_node(&self, node_id: NodeId) -> Option<&Node> {
        self.nodes.get(&node_id)
    }

    pub fn get_node_mut(&mut self, node_id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(&node_id)
    }

    /// Add a dependency edge: `dependent` depends on `dependency`.
    ///
    /// This means when `dependency` changes, `dependent` may need to update.
    pub fn add_edge(&mut self, dependency: NodeId, dependent: NodeId) {
        if !self.nodes.contains_key(&dependency) || !self.nodes.contains_key(&dependent) {
            return;
        }
        if let Some(dep_node) = self.nodes.get_mut(&dependency) {
            dep_node.add_dependent(dependent);
        }
        if let Some(dependent_node) = self.nodes.get_mut(&dependent) {
            dependent_node.add_dependency(dependency);
        }
    }

    /// Remove a dependency edge.
    pub fn remove_edge(&mut self, dependency: NodeId, dependent: NodeId) {
        if let Some(dep_node) = self.nodes.get_mut(&dependency) {
            dep_node.remove_dependent(dependent);
        }
        if let Some(dependent_node) = self.nodes.get_mut(&dependent) {
            dependent_node.remove_dependency(dependency);
        }
    }

    /// Replace every incoming edge of `node_id` with edges from `dependencies`.
    ///
    /// Called after a computation re-ran and collected a fresh read set.
    pub fn set_dependencies(&mut self, node_id: NodeId, dependencies: &[NodeId]) {
        let previous = match self.nodes.get_mut(&node_id) {
            Some(node) => node.take_dependencies(),
            None => return,
        };
        for dep_id in previous {
            if let Some(dep) = self.nodes.get_mut(&dep_id) {
                dep.remove_dependent(node_id);
            }
        }
        for &dep_id in dependencies {
            if dep_id != node_id {
                self.add_edge(dep_id, node_id);
            }
        }
    }

    /// Mark a source node as changed and propagate dirty flags.
    ///
    /// Returns the effect nodes reached by the walk, in discovery order.
    pub fn mark_changed(&mut self, source_id: NodeId) -> SmallVec<[NodeId; 4]> {
        let mut effects = SmallVec::new();
        let mut visited = HashSet::new();
        let mut queue = VecDeque::new();

        if let Some(source) = self.nodes.get(&source_id) {
            for dependent_id in source.dependents() {
                queue.push_back((*dependent_id, true));
            }
        }

        while let Some((node_id, direct)) = queue.pop_front() {
            let Some(node) = self.nodes.get_mut(&node_id) else {
                continue;
            };
            if direct {
                node.mark_dirty();
            } else {
                node.mark_maybe_dirty();
            }
            if !visited.insert(node_id) {
                continue;
            }
            if node.kind() == NodeKind::Effect {
                effects.push(node_id);
            }
            for dependent_id in node.dependents() {
                queue.push_back((*dependent_id, false));
            }
        }

        effects
    }

    /// Mark the direct dependents of a recomputed derived node as dirty.
    pub fn mark_dependents_dirty(&mut self, node_id: NodeId) {
        let dependents: SmallVec<[NodeId; 8]> = match self.nodes.get(&node_id) {
            Some(node) => node.dependents().iter().copied().collect(),
            None => return,
        };
        for dependent_id in dependents {
            if let Some(dependent) = self.nodes.get_mut(&dependent_id) {
                dependent.mark_dirty();
            }
        }
    }

    pub fn dirty_state(&self, node_id: NodeId) -> Option<DirtyState> {
        self.nodes.get(&node_id).map(Node::dirty_state)
    }

    pub fn kind(&self, node_id: NodeId) -> Option<NodeKind> {
        self.nodes.get(&node_id).map(Node::kind)
    }

    /// Get the total number of nodes in the graph.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }
}

impl Default for UpdateScheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_and_remove_nodes() {
        let mut scheduler = UpdateScheduler::new();

        let id1 = scheduler.add_node(Node::source());
        let id2 = scheduler.add_node(Node::derived());

        assert_eq!(scheduler.node_count(), 2);

        scheduler.remove_node(id1);
        assert_eq!(scheduler.node_count(), 1);
        assert!(scheduler.get_node(id1).is_none());
        assert!(scheduler.get_node(id2).is_some());
    }

    #[test]
    fn add_and_remove_edges() {
        let mut scheduler = UpdateScheduler::new();

        let source_id = scheduler.add_node(Node::source());
        let derived_id = scheduler.add_node(Node::derived());

        scheduler.add_edge(source_id, derived_id);

        assert!(scheduler
            .get_node(source_id)
            .unwrap()
            .dependents()
            .contains(&derived_id));
        assert!(scheduler
            .get_node(derived_id)
            .unwrap()
            .dependencies()
            .contains(&source_id));

        scheduler.remove_edge(source_id, derived_id);

        assert!(!scheduler
            .get_node(source_id)
            .unwrap()
            .dependents()
            .contains(&derived_id));
        assert!(!scheduler
            .get_node(derived_id)
            .unwrap()
            .dependencies()
            .contains(&source_id));
    }

    #[test]
    fn set_dependencies_replaces_edges() {
        let mut scheduler = UpdateScheduler::new();
        let a = scheduler.add_node(Node::source());
        let b = scheduler.add_node(Node::source());
        let memo = scheduler.add_node(Node::derived());

        scheduler.set_dependencies(memo, &[a]);
        assert!(scheduler.get_node(a).unwrap().dependents().contains(&memo));

        scheduler.set_dependencies(memo, &[b]);
        assert!(!scheduler.get_node(a).unwrap().dependents().contains(&memo));
        assert!(scheduler.get_node(b).unwrap().dependents().contains(&memo));
        assert_eq!(scheduler.get_node(memo).unwrap().dependencies().len(), 1);
    }

    #[test]
    fn mark_changed_propagates() {
        let mut scheduler = UpdateScheduler::new();

        // source -> derived1 -> derived2 -> effect
        let source_id = scheduler.add_node(Node::source());
        let derived1_id = scheduler.add_node(Node::derived());
        let derived2_id = scheduler.add_node(Node::derived());
        let effect_id = scheduler.add_node(Node::effect());

        scheduler.add_edge(source_id, derived1_id);
        scheduler.add_edge(derived1_id, derived2_id);
        scheduler.add_edge(derived2_id, effect_id);

        for id in [derived1_id, derived2_id, effect_id] {
            scheduler.get_node_mut(id).unwrap().mark_clean();
        }

        let effects = scheduler.mark_changed(source_id);

        assert_eq!(effects.as_slice(), &[effect_id]);
        assert_eq!(scheduler.dirty_state(derived1_id), Some(DirtyState::Dirty));
        assert_eq!(scheduler.dirty_state(derived2_id), Some(DirtyState::MaybeDirty));
        assert_eq!(scheduler.dirty_state(effect_id), Some(DirtyState::MaybeDirty));

        scheduler.mark_dependents_dirty(derived1_id);
        assert_eq!(scheduler.dirty_state(derived2_id), Some(DirtyState::Dirty));
    }

    #[test]
    fn diamond_reports_effect_once() {
        let mut scheduler = UpdateScheduler::new();
        let source = scheduler.add_node(Node::source());
        let left = scheduler.add_node(Node::derived());
        let right = scheduler.add_node(Node::derived());
        let effect = scheduler.add_node(Node::effect());

        scheduler.add_edge(source, left);
        scheduler.add_edge(source, right);
        scheduler.add_edge(left, effect);
        scheduler.add_edge(right, effect);

        let effects = scheduler.mark_changed(source);
        assert_eq!(effects.len(), 1);
    }
}
