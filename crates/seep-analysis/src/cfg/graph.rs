//! Blocks, edges, and the graph container.

use std::sync::Arc;

use petgraph::stable_graph::{EdgeIndex, NodeIndex, StableDiGraph};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use seep_core::ast::Node;
use smallvec::SmallVec;

/// Ordered adjacent edges of one block. Almost every block has at most
/// a True/False pair, so the list lives inline.
pub type EdgeList = SmallVec<[(EdgeIndex, NodeIndex); 2]>;

/// Tag on a control-flow edge.
///
/// Multiple edges leave one block only as a `True`/`False` pair from a
/// branch, or as the chain of `False` edges threading switch case tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EdgeKind {
    Normal,
    True,
    False,
}

impl EdgeKind {
    /// Deterministic visit order: `True` before `False` before `Normal`.
    pub(crate) fn order(self) -> u8 {
        match self {
            EdgeKind::True => 0,
            EdgeKind::False => 1,
            EdgeKind::Normal => 2,
        }
    }
}

/// A directed control-flow edge, optionally carrying the case-label
/// expression that guards it (switch dispatch).
#[derive(Debug, Clone)]
pub struct CfgEdge {
    pub kind: EdgeKind,
    pub case_label: Option<Arc<Node>>,
}

impl CfgEdge {
    pub fn normal() -> Self {
        Self { kind: EdgeKind::Normal, case_label: None }
    }

    pub fn new(kind: EdgeKind) -> Self {
        Self { kind, case_label: None }
    }

    pub fn with_case_label(kind: EdgeKind, label: Arc<Node>) -> Self {
        Self { kind, case_label: Some(label) }
    }
}

/// One basic block.
///
/// A block carries at most one anchored syntax node: the statement or
/// condition it executes. Structural placeholders (root, exit) are
/// `is_special` and never pruned; plain empty blocks are splice
/// candidates.
#[derive(Debug, Clone, Default)]
pub struct Block {
    pub is_root: bool,
    pub is_leaf: bool,
    pub is_special: bool,
    /// Last statement unconditionally leaves the enclosing scope
    /// (break/continue/return/throw); fallthrough out of this block is
    /// impossible.
    pub breaks_out_of_scope: bool,
    pub anchor: Option<Arc<Node>>,
}

impl Block {
    /// A structural placeholder that must survive pruning.
    pub fn special() -> Self {
        Self { is_special: true, ..Self::default() }
    }

    /// An empty pass-through block; the pruner may splice it out.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn anchored(node: Arc<Node>) -> Self {
        Self { anchor: Some(node), ..Self::default() }
    }

    /// Whether the pruner may splice this block out of an edge chain.
    pub fn can_be_overridden(&self) -> bool {
        !self.is_special && self.anchor.is_none()
    }
}

/// A built control-flow graph: exactly one root, at least one leaf,
/// acyclic except for explicit loop back-edges.
#[derive(Debug)]
pub struct Cfg {
    pub graph: StableDiGraph<Block, CfgEdge>,
    pub root: NodeIndex,
    pub exit: NodeIndex,
}

impl Cfg {
    pub fn block_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Blocks with no outgoing edges.
    pub fn leaves(&self) -> Vec<NodeIndex> {
        self.graph
            .node_indices()
            .filter(|&n| self.graph.edges_directed(n, Direction::Outgoing).next().is_none())
            .collect()
    }

    /// Outgoing edges in deterministic order: `True` before `False`
    /// before `Normal`, ties broken by target index.
    pub fn successors_ordered(&self, block: NodeIndex) -> EdgeList {
        let mut out: SmallVec<[(EdgeIndex, NodeIndex, u8); 2]> = self
            .graph
            .edges_directed(block, Direction::Outgoing)
            .map(|e| (e.id(), e.target(), e.weight().kind.order()))
            .collect();
        out.sort_by_key(|&(_, target, order)| (order, target));
        out.into_iter().map(|(e, t, _)| (e, t)).collect()
    }

    /// Incoming edges in deterministic order (mirror of
    /// [`successors_ordered`](Self::successors_ordered)).
    pub fn predecessors_ordered(&self, block: NodeIndex) -> EdgeList {
        let mut inc: SmallVec<[(EdgeIndex, NodeIndex, u8); 2]> = self
            .graph
            .edges_directed(block, Direction::Incoming)
            .map(|e| (e.id(), e.source(), e.weight().kind.order()))
            .collect();
        inc.sort_by_key(|&(_, source, order)| (order, source));
        inc.into_iter().map(|(e, s, _)| (e, s)).collect()
    }
}
