//! Inlining Decision Trees
//!
//! One tree is produced per compilation attempt. Nodes live in a flat arena
//! and refer to each other by [`NodeId`], so both construction and
//! traversal run over explicit work-lists and never recurse.
//!
//! A tree has a node limit, never above [`MAX_TREE_NODES`], so every index
//! fits a [`NodeId`].

use std::fmt;
use std::sync::Arc;

use smallvec::SmallVec;

use crate::compile::{CallSiteId, CallTarget, TargetId};

/// Most nodes any tree can hold
pub const MAX_TREE_NODES: usize = u32::MAX as usize;

/// Index of a node in a [`DecisionTree`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u32);

impl NodeId {
    #[inline]
    fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// Profile data a decision was made on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CallProfile {
    pub call_count: u64,
    pub callee_size: u32,
}

/// One candidate call site and whether it was inlined
#[derive(Debug, Clone)]
pub struct InliningDecision {
    /// `None` for the root
    pub call_site: Option<CallSiteId>,
    pub target: Arc<CallTarget>,
    pub should_inline: bool,
    pub profile: CallProfile,
    pub depth: usize,
    pub parent: Option<NodeId>,
    children: SmallVec<[NodeId; 4]>,
}

impl InliningDecision {
    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    #[inline]
    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }
}

/// Arena of inlining decisions rooted at the compiled target
#[derive(Debug, Clone)]
pub struct DecisionTree {
    nodes: Vec<InliningDecision>,
    limit: usize,
}

impl DecisionTree {
    /// A tree holding only the root. The root counts as inlined.
    pub fn new(root: Arc<CallTarget>) -> Self {
        Self::with_node_limit(root, MAX_TREE_NODES)
    }

    /// A tree that refuses to grow past `limit` nodes (at least the root,
    /// at most [`MAX_TREE_NODES`]).
    pub fn with_node_limit(root: Arc<CallTarget>, limit: usize) -> Self {
        let profile = CallProfile {
            call_count: root.call_count(),
            callee_size: root.size(),
        };
        Self {
            nodes: vec![InliningDecision {
                call_site: None,
                target: root,
                should_inline: true,
                profile,
                depth: 0,
                parent: None,
                children: SmallVec::new(),
            }],
            limit: limit.clamp(1, MAX_TREE_NODES),
        }
    }

    /// Append a decision below `parent`. Returns `None` once the tree is
    /// full.
    ///
    /// # Panics
    ///
    /// Panics if `parent` does not belong to this tree.
    pub fn push_child(
        &mut self,
        parent: NodeId,
        call_site: CallSiteId,
        target: Arc<CallTarget>,
        should_inline: bool,
        profile: CallProfile,
    ) -> Option<NodeId> {
        if self.is_full() {
            return None;
        }
        let id = NodeId(u32::try_from(self.nodes.len()).ok()?);
        let depth = self.nodes[parent.index()].depth + 1;
        self.nodes.push(InliningDecision {
            call_site: Some(call_site),
            target,
            should_inline,
            profile,
            depth,
            parent: Some(parent),
            children: SmallVec::new(),
        });
        self.nodes[parent.index()].children.push(id);
        Some(id)
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.nodes.len() >= self.limit
    }

    pub fn node_limit(&self) -> usize {
        self.limit
    }

    #[inline]
    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    /// The compiled target
    pub fn root_target(&self) -> &Arc<CallTarget> {
        &self.nodes[0].target
    }

    pub fn node(&self, id: NodeId) -> &InliningDecision {
        &self.nodes[id.index()]
    }

    pub fn get(&self, id: NodeId) -> Option<&InliningDecision> {
        self.nodes.get(id.index())
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        self.node(id).children()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Number of non-root nodes that were inlined
    pub fn inlined_count(&self) -> usize {
        self.nodes
            .iter()
            .filter(|n| !n.is_root() && n.should_inline)
            .count()
    }

    /// Whether `target` is `id` itself or one of its ancestors.
    pub fn is_on_path(&self, id: NodeId, target: TargetId) -> bool {
        let mut cursor = Some(id);
        while let Some(current) = cursor {
            let node = self.node(current);
            if node.target.id() == target {
                return true;
            }
            cursor = node.parent;
        }
        false
    }

    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &InliningDecision)> {
        self.nodes
            .iter()
            .enumerate()
            // Indices stay below the node limit
            .map(|(i, n)| (NodeId(i as u32), n))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_by_hand() {
        let root = CallTarget::new("root", 10);
        let a = CallTarget::new("a", 3);
        let b = CallTarget::new("b", 4);

        let mut tree = DecisionTree::new(root.clone());
        let na = tree.push_child(tree.root(), CallSiteId::from_raw(1), a.clone(), true, CallProfile::default()).unwrap();
        let nb = tree.push_child(na, CallSiteId::from_raw(2), b.clone(), false, CallProfile::default()).unwrap();

        assert_eq!(tree.len(), 3);
        assert_eq!(tree.children(tree.root()), &[na]);
        assert_eq!(tree.node(nb).depth, 2);
        assert_eq!(tree.node(nb).parent, Some(na));
        assert_eq!(tree.inlined_count(), 1);
        assert!(tree.node(tree.root()).is_root());
        assert_eq!(tree.root_target().id(), root.id());
    }

    #[test]
    fn test_node_limit() {
        let root = CallTarget::new("root", 10);
        let a = CallTarget::new("a", 3);

        let mut tree = DecisionTree::with_node_limit(root.clone(), 2);
        assert!(!tree.is_full());
        assert!(tree
            .push_child(tree.root(), CallSiteId::from_raw(1), a.clone(), true, CallProfile::default())
            .is_some());
        assert!(tree.is_full());
        assert!(tree
            .push_child(tree.root(), CallSiteId::from_raw(2), a, true, CallProfile::default())
            .is_none());
        assert_eq!(tree.len(), 2);
        assert_eq!(tree.children(tree.root()).len(), 1);

        assert_eq!(DecisionTree::new(root.clone()).node_limit(), MAX_TREE_NODES);
        assert_eq!(DecisionTree::with_node_limit(root.clone(), usize::MAX).node_limit(), MAX_TREE_NODES);
        assert_eq!(DecisionTree::with_node_limit(root, 0).node_limit(), 1);
    }

    #[test]
    fn test_is_on_path() {
        let root = CallTarget::new("root", 10);
        let a = CallTarget::new("a", 3);
        let other = CallTarget::new("other", 3);

        let mut tree = DecisionTree::new(root.clone());
        let na = tree.push_child(tree.root(), CallSiteId::from_raw(1), a.clone(), true, CallProfile::default()).unwrap();

        assert!(tree.is_on_path(na, root.id()));
        assert!(tree.is_on_path(na, a.id()));
        assert!(!tree.is_on_path(na, other.id()));
        assert!(!tree.is_on_path(tree.root(), a.id()));
    }
}
