//! Graph pruning: unreachable-block removal and empty-block splicing.
//!
//! Splicing runs to a fixpoint because removing one pass-through block
//! can leave its former neighbor on a fresh one-in/one-out chain.
//! Pruning an already-pruned graph is a no-op.

use std::collections::VecDeque;

use petgraph::stable_graph::NodeIndex;
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use seep_core::types::collections::FxHashSet;
use tracing::trace;

use super::graph::Cfg;

/// Prune `cfg` in place.
pub fn prune(cfg: &mut Cfg) {
    let removed = remove_unreachable(cfg);
    let mut spliced = 0;
    loop {
        let n = splice_pass(cfg);
        if n == 0 {
            break;
        }
        spliced += n;
    }
    trace!(removed, spliced, blocks = cfg.block_count(), "pruned cfg");
}

/// Drop every block breadth-first reachability from the root does not
/// visit.
fn remove_unreachable(cfg: &mut Cfg) -> usize {
    let mut reachable = FxHashSet::default();
    let mut queue = VecDeque::new();
    reachable.insert(cfg.root);
    queue.push_back(cfg.root);
    while let Some(block) = queue.pop_front() {
        for edge in cfg.graph.edges_directed(block, Direction::Outgoing) {
            if reachable.insert(edge.target()) {
                queue.push_back(edge.target());
            }
        }
    }

    let doomed: Vec<NodeIndex> = cfg
        .graph
        .node_indices()
        .filter(|n| !reachable.contains(n))
        .collect();
    let count = doomed.len();
    for block in doomed {
        cfg.graph.remove_node(block);
    }
    count
}

/// Splice out every overridable block sitting on exactly one in-edge
/// and one out-edge, reconnecting its neighbors directly. The surviving
/// edge keeps the in-edge's tag so branch semantics are preserved.
fn splice_pass(cfg: &mut Cfg) -> usize {
    let candidates: Vec<NodeIndex> = cfg.graph.node_indices().collect();
    let mut spliced = 0;
    for block in candidates {
        let Some(weight) = cfg.graph.node_weight(block) else {
            continue;
        };
        if !weight.can_be_overridden() {
            continue;
        }
        let mut incoming = cfg.graph.edges_directed(block, Direction::Incoming);
        let (in_src, in_tag) = match (incoming.next(), incoming.next()) {
            (Some(edge), None) => (edge.source(), edge.weight().clone()),
            _ => continue,
        };
        let mut outgoing = cfg.graph.edges_directed(block, Direction::Outgoing);
        let out_dst = match (outgoing.next(), outgoing.next()) {
            (Some(edge), None) => edge.target(),
            _ => continue,
        };
        // A self-loop is not a pass-through.
        if in_src == block || out_dst == block {
            continue;
        }
        cfg.graph.remove_node(block);
        cfg.graph.add_edge(in_src, out_dst, in_tag);
        spliced += 1;
    }
    spliced
}
