//! Tree Nodes
//!
//! This module defines the nodes that make up an execution tree.

use std::collections::HashSet;
use std::fmt;

use indexmap::IndexSet;

use crate::component::{Component, ComponentId};

/// Position of a node in its tree's arena.
///
/// Node identity is the index: two nodes are the same node iff their indices
/// are equal, whatever their components look like.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeIndex(usize);

impl NodeIndex {
    pub(crate) fn new(index: usize) -> Self {
        Self(index)
    }

    /// Get the raw arena slot.
    pub fn raw(&self) -> usize {
        self.0
    }
}

impl fmt::Display for NodeIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A node in the execution tree.
///
/// A node owns one component and knows the nodes that depend on it directly.
/// The same node can be a dependent of several parents; it still exists once
/// and parents refer to it by index.
pub struct TreeNode {
    index: NodeIndex,

    /// The id the component was declared under, which may differ from the
    /// one its descriptor reports.
    id: ComponentId,

    component: Box<dyn Component>,

    /// Nodes whose component depends directly on this one (children in the DAG).
    dependents: IndexSet<NodeIndex>,
}

impl TreeNode {
    pub(crate) fn new(index: NodeIndex, id: ComponentId, component: Box<dyn Component>) -> Self {
        Self {
            index,
            id,
            component,
            dependents: IndexSet::new(),
        }
    }

    /// Get this node's slot in the arena.
    pub fn index(&self) -> NodeIndex {
        self.index
    }

    /// Get the component descriptor.
    pub fn component(&self) -> &dyn Component {
        self.component.as_ref()
    }

    /// Get the declared component id. Lookups and failure reports use it.
    pub fn id(&self) -> &ComponentId {
        &self.id
    }

    /// Get the component's display name.
    pub fn name(&self) -> &str {
        self.component.name()
    }

    /// Direct dependents, in the order they were attached.
    pub fn dependents(&self) -> &IndexSet<NodeIndex> {
        &self.dependents
    }

    /// Attach a direct dependent. Adding one that is already present is a no-op.
    ///
    /// Returns `true` if the dependent was new.
    pub(crate) fn add_dependent(&mut self, dependent: NodeIndex) -> bool {
        self.dependents.insert(dependent)
    }
}

impl PartialEq for TreeNode {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index
    }
}

impl Eq for TreeNode {}

impl std::hash::Hash for TreeNode {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.index.hash(state);
    }
}

impl fmt::Debug for TreeNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TreeNode")
            .field("index", &self.index)
            .field("id", self.id())
            .field("dependents", &self.dependents)
            .finish()
    }
}

/// Depth-first enumeration of every transitive dependent of a node.
///
/// The start node itself is not yielded. A dependent reachable through more
/// than one path is yielded once, on the first path that reaches it, and
/// always after the node it was reached from.
pub struct TransitiveDependents<'a> {
    nodes: &'a [TreeNode],
    stack: Vec<NodeIndex>,
    seen: HashSet<NodeIndex>,
}

impl<'a> TransitiveDependents<'a> {
    pub(crate) fn new(nodes: &'a [TreeNode], start: NodeIndex) -> Self {
        let mut walk = Self {
            nodes,
            stack: Vec::new(),
            seen: HashSet::new(),
        };
        walk.push_children(start);
        walk
    }

    fn push_children(&mut self, index: NodeIndex) {
        if let Some(node) = self.nodes.get(index.raw()) {
            // Reverse so the first dependent is popped first.
            self.stack.extend(node.dependents.iter().rev().copied());
        }
    }
}

impl<'a> Iterator for TransitiveDependents<'a> {
    type Item = &'a TreeNode;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(index) = self.stack.pop() {
            if !self.seen.insert(index) {
                continue;
            }
            self.push_children(index);
            if let Some(node) = self.nodes.get(index.raw()) {
                return Some(node);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::{ComponentError, ComponentMetadata, ExecutionContext, ServiceRegistry};
    use async_trait::async_trait;
    use tokio_util::sync::CancellationToken;

    struct Stub(ComponentMetadata);

    #[async_trait]
    impl Component for Stub {
        fn metadata(&self) -> &ComponentMetadata {
            &self.0
        }

        fn configure_services(&self, _: &mut ServiceRegistry) -> Result<(), ComponentError> {
            Ok(())
        }

        async fn initialize(
            &self,
            _: &ExecutionContext,
            _: &CancellationToken,
        ) -> Result<(), ComponentError> {
            Ok(())
        }
    }

    fn arena(names: &[&str]) -> Vec<TreeNode> {
        names
            .iter()
            .enumerate()
            .map(|(i, name)| {
                let stub = Stub(ComponentMetadata::new(*name, *name, "1.0.0"));
                TreeNode::new(NodeIndex::new(i), (*name).into(), Box::new(stub))
            })
            .collect()
    }

    fn ids<'a>(walk: impl Iterator<Item = &'a TreeNode>) -> Vec<&'a str> {
        walk.map(|node| node.id().as_str()).collect()
    }

    #[test]
    fn add_dependent_is_idempotent() {
        let mut nodes = arena(&["a", "b"]);
        let b = NodeIndex::new(1);

        assert!(nodes[0].add_dependent(b));
        assert!(!nodes[0].add_dependent(b));
        assert_eq!(nodes[0].dependents().len(), 1);
    }

    #[test]
    fn equality_is_by_index() {
        let nodes = arena(&["same", "same"]);
        assert_ne!(nodes[0], nodes[1]);
        assert_eq!(nodes[0], nodes[0]);
    }

    #[test]
    fn id_is_the_declared_one() {
        let stub = Stub(ComponentMetadata::new("reported", "Reported", "1.0.0"));
        let node = TreeNode::new(NodeIndex::new(0), "declared".into(), Box::new(stub));
        assert_eq!(node.id().as_str(), "declared");
        assert_eq!(node.component().id().as_str(), "reported");
    }

    #[test]
    fn transitive_dependents_depth_first() {
        // a -> b -> d, a -> c
        let mut nodes = arena(&["a", "b", "c", "d"]);
        nodes[0].add_dependent(NodeIndex::new(1));
        nodes[0].add_dependent(NodeIndex::new(2));
        nodes[1].add_dependent(NodeIndex::new(3));

        let walk = TransitiveDependents::new(&nodes, NodeIndex::new(0));
        assert_eq!(ids(walk), vec!["b", "d", "c"]);
    }

    #[test]
    fn transitive_dependents_yield_shared_node_once() {
        // Diamond: a -> b, a -> c, b -> d, c -> d
        let mut nodes = arena(&["a", "b", "c", "d"]);
        nodes[0].add_dependent(NodeIndex::new(1));
        nodes[0].add_dependent(NodeIndex::new(2));
        nodes[1].add_dependent(NodeIndex::new(3));
        nodes[2].add_dependent(NodeIndex::new(3));

        let walk = TransitiveDependents::new(&nodes, NodeIndex::new(0));
        assert_eq!(ids(walk), vec!["b", "d", "c"]);
    }

    #[test]
    fn leaf_has_no_transitive_dependents() {
        let nodes = arena(&["solo"]);
        assert_eq!(TransitiveDependents::new(&nodes, NodeIndex::new(0)).count(), 0);
    }
}
